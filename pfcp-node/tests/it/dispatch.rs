use std::{
    net::{IpAddr, Ipv4Addr, SocketAddr},
    time::Duration,
};

use bytes::{Bytes, BytesMut};
use pfcp_node::{Entity, Function, HandlerError, HandlerRegistry, ReceivedMessage};
use pfcp_wire::{
    AssociationSetupRequest, Body, Cause, FSeid, Generic, HeartbeatRequest, HeartbeatResponse,
    Ie, Message, MessageType, SessionEstablishmentRequest,
};
use tokio::net::UdpSocket;

use crate::helpers::{far, localhost, options, pair, pdr};

/// Sends `request` from a plain socket and waits for one response.
async fn exchange(socket: &UdpSocket, peer: SocketAddr, request: &Message) -> Message {
    let mut buf = BytesMut::new();
    request.encode(&mut buf).unwrap();
    socket.send_to(&buf, peer).await.unwrap();

    let mut datagram = vec![0; 2048];
    let (n, from) = tokio::time::timeout(Duration::from_secs(1), socket.recv_from(&mut datagram))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(from, peer);
    Message::decode(Bytes::copy_from_slice(&datagram[..n])).unwrap()
}

fn cause(response: &Message) -> Cause {
    let cause = match response.body() {
        Body::AssociationSetupResponse(body) => body.cause.as_ref(),
        Body::SessionEstablishmentResponse(body) => body.cause.as_ref(),
        _ => panic!("unexpected response {:?}", response.message_type()),
    };
    cause.unwrap().cause().unwrap()
}

#[tokio::test]
async fn malformed_datagrams_are_dropped() {
    let _ = tracing_subscriber::fmt::try_init();
    let (cp, up) = pair(options()).await;
    let peer = up.local_addr().unwrap();

    let garbage = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    // Wrong version, then a header announcing more than it carries.
    garbage.send_to(&[0x40, 1, 0, 4, 0, 0, 1, 0], peer).await.unwrap();
    garbage.send_to(&[0x20, 1, 0, 40, 0, 0, 1, 0], peer).await.unwrap();

    let response = cp.request(peer, None, HeartbeatRequest::default()).await.unwrap();
    let Body::HeartbeatResponse(response) = response.body() else {
        panic!("unexpected response {:?}", response.message_type());
    };
    let recovery_time_stamp = response.recovery_time_stamp.as_ref().unwrap();
    assert_eq!(recovery_time_stamp.recovery_time_stamp().unwrap(), up.recovery_time_stamp().unwrap());
    assert_eq!(up.stats().decode_failures(), 2);

    cp.shutdown();
    up.shutdown();
}

#[tokio::test]
async fn unhandled_requests_get_no_response() {
    let _ = tracing_subscriber::fmt::try_init();
    let (cp, up) = pair(options().with_request_timeout(Duration::from_millis(50), 0)).await;

    let request = Generic { message_type: MessageType::NODE_REPORT_REQUEST, ies: Vec::new() };
    assert!(cp.request(up.local_addr().unwrap(), None, request).await.is_err());
    assert_eq!(up.stats().unhandled_messages(), 1);

    // The loop is still running.
    assert!(cp.request(up.local_addr().unwrap(), None, HeartbeatRequest::default()).await.is_ok());

    cp.shutdown();
    up.shutdown();
}

#[tokio::test]
async fn custom_handlers() {
    let _ = tracing_subscriber::fmt::try_init();

    let mut handlers = HandlerRegistry::for_function(Function::UserPlane);
    handlers
        .register(MessageType::NODE_REPORT_REQUEST, |msg: ReceivedMessage| async move {
            let response =
                Generic { message_type: MessageType::NODE_REPORT_RESPONSE, ies: Vec::new() };
            msg.reply(Message::new(msg.sequence(), response)).await?;
            Ok::<_, HandlerError>(())
        })
        .unwrap();
    // Fails on every request: wrong sequence number.
    handlers
        .register(MessageType::HEARTBEAT_REQUEST, |msg: ReceivedMessage| async move {
            let response = HeartbeatResponse {
                recovery_time_stamp: Some(Ie::new_recovery_time_stamp(0)),
                additional: Vec::new(),
            };
            msg.reply(Message::new(msg.sequence() + 1, response)).await?;
            Ok::<_, HandlerError>(())
        })
        .unwrap();

    let up = Entity::with_handlers(localhost(), Function::UserPlane, options(), handlers);
    let cp = Entity::with_options(localhost(), Function::ControlPlane, options());
    let peer = up.start().await.unwrap();
    cp.start().await.unwrap();

    let request = Generic { message_type: MessageType::NODE_REPORT_REQUEST, ies: Vec::new() };
    let response = cp.request(peer, None, request).await.unwrap();
    assert_eq!(response.message_type(), MessageType::NODE_REPORT_RESPONSE);

    assert!(cp.request(peer, None, HeartbeatRequest::default()).await.is_err());
    // One failure per transmission.
    assert_eq!(up.stats().handler_errors(), 2);

    cp.shutdown();
    up.shutdown();
}

#[tokio::test]
async fn retransmitted_requests_get_the_same_response() {
    let _ = tracing_subscriber::fmt::try_init();
    let up = Entity::with_options(localhost(), Function::UserPlane, options());
    let peer = up.start().await.unwrap();
    let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();

    let setup = Message::new(
        42,
        AssociationSetupRequest {
            node_id: Some(Ie::new_node_id(&localhost()).unwrap()),
            recovery_time_stamp: Some(Ie::new_recovery_time_stamp(1)),
            additional: Vec::new(),
        },
    );
    let first = exchange(&socket, peer, &setup).await;
    let second = exchange(&socket, peer, &setup).await;
    assert_eq!(cause(&first), Cause::RequestAccepted);
    assert_eq!(second, first);
    assert_eq!(up.associations().len(), 1);

    let cp_f_seid = FSeid::new(7, IpAddr::V4(Ipv4Addr::LOCALHOST));
    let establishment = Message::new(
        43,
        SessionEstablishmentRequest {
            node_id: Some(Ie::new_node_id(&localhost()).unwrap()),
            cp_f_seid: Some(Ie::new_f_seid(&cp_f_seid)),
            create_pdr: vec![pdr(1, 10, 1).to_create_ie()],
            create_far: vec![far(1).to_create_ie()],
            additional: Vec::new(),
        },
    );
    let first = exchange(&socket, peer, &establishment).await;
    let second = exchange(&socket, peer, &establishment).await;
    assert_eq!(cause(&first), Cause::RequestAccepted);
    assert_eq!(second, first);
    assert_eq!(up.sessions().len(), 1);
    assert_eq!(up.stats().duplicate_requests(), 2);

    // A new sequence number is a new request.
    let setup = Message::new(44, setup.into_body());
    assert_eq!(cause(&exchange(&socket, peer, &setup).await), Cause::RequestRejected);

    up.shutdown();
}
