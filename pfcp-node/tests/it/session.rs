use std::net::{IpAddr, Ipv4Addr};

use pfcp_node::{Entity, Function, RuleChanges, SessionError};
use pfcp_wire::{
    rules::{FarUpdate, PdrUpdate},
    Body, Cause, FSeid, Ie, IeType, Message, NodeId, SessionEstablishmentRequest,
    SessionEstablishmentResponse, SessionModificationRequest, SessionModificationResponse,
};

use crate::helpers::{associated_pair, far, localhost, options, pair, pdi, pdr};

fn establishment_response(message: &Message) -> &SessionEstablishmentResponse {
    match message.body() {
        Body::SessionEstablishmentResponse(response) => response,
        _ => panic!("unexpected response {:?}", message.message_type()),
    }
}

fn modification_response(message: &Message) -> &SessionModificationResponse {
    match message.body() {
        Body::SessionModificationResponse(response) => response,
        _ => panic!("unexpected response {:?}", message.message_type()),
    }
}

fn establishment_request(cp_seid: u64) -> SessionEstablishmentRequest {
    SessionEstablishmentRequest {
        node_id: Some(Ie::new_node_id(&localhost()).unwrap()),
        cp_f_seid: Some(Ie::new_f_seid(&FSeid::new(cp_seid, IpAddr::V4(Ipv4Addr::LOCALHOST)))),
        create_pdr: vec![pdr(1, 10, 1).to_create_ie()],
        create_far: vec![far(1).to_create_ie()],
        additional: Vec::new(),
    }
}

#[tokio::test]
async fn establish_and_modify() {
    let _ = tracing_subscriber::fmt::try_init();
    let (cp, up) = associated_pair(options()).await;
    let association = cp.association(&localhost()).unwrap();

    let local_seid = cp.next_session_id();
    let session = association
        .new_initiated_session(local_seid, vec![pdr(1, 20, 1), pdr(2, 10, 1)], vec![far(1)])
        .await
        .unwrap();
    assert!(session.is_established());
    assert_eq!(session.local_seid().unwrap(), local_seid);
    assert_eq!(session.remote_addr().unwrap(), up.local_addr().unwrap().ip());

    // The user plane indexes the session under the SEID it allocated.
    let up_addr = up.local_addr().unwrap().ip();
    let remote = up.session(up_addr, session.remote_seid().unwrap()).unwrap();
    assert!(remote.is_established());
    assert_eq!(remote.remote_seid().unwrap(), local_seid);
    let order: Vec<u16> = remote.pdrs_by_precedence().iter().map(|pdr| pdr.id).collect();
    assert_eq!(order, vec![2, 1]);

    let mut update = PdrUpdate::new(1);
    update.precedence = Some(5);
    update.far_id = Some(2);
    let changes = RuleChanges {
        create_pdrs: vec![pdr(3, 30, 2)],
        create_fars: vec![far(2)],
        update_pdrs: vec![update],
        ..Default::default()
    };
    assert_eq!(session.modify(changes).await.unwrap(), 1);

    for side in [&session, &remote] {
        let order: Vec<u16> = side.pdrs_by_precedence().iter().map(|pdr| pdr.id).collect();
        assert_eq!(order, vec![1, 2, 3]);
        assert_eq!(side.pdr(1).unwrap().far_id, Some(2));
        assert_eq!(side.generation(), 1);
    }

    cp.shutdown();
    up.shutdown();
}

#[tokio::test]
async fn rejected_modification_changes_nothing() {
    let _ = tracing_subscriber::fmt::try_init();
    let (cp, up) = associated_pair(options()).await;
    let association = cp.association(&localhost()).unwrap();
    let session = association
        .new_initiated_session(cp.next_session_id(), vec![pdr(1, 10, 1)], vec![far(1)])
        .await
        .unwrap();

    // Caught locally before anything is sent.
    let changes = RuleChanges::create(vec![pdr(1, 1, 1)], Vec::new());
    assert!(matches!(session.modify(changes).await, Err(SessionError::PdrExists(1))));

    // Sent as is, the peer rejects it.
    let request = SessionModificationRequest {
        create_pdr: vec![pdr(1, 1, 1).to_create_ie()],
        ..Default::default()
    };
    let peer = up.local_addr().unwrap();
    let response = cp.request(peer, Some(session.remote_seid().unwrap()), request).await.unwrap();
    assert_eq!(response.seid(), Some(session.local_seid().unwrap()));
    let response = modification_response(&response);
    assert_eq!(response.cause.as_ref().unwrap().cause().unwrap(), Cause::RequestRejected);

    let remote = up.session(peer.ip(), session.remote_seid().unwrap()).unwrap();
    assert_eq!(remote.pdr(1).unwrap().precedence, 10);
    assert_eq!(remote.generation(), 0);

    cp.shutdown();
    up.shutdown();
}

#[tokio::test]
async fn modification_of_unknown_session() {
    let _ = tracing_subscriber::fmt::try_init();
    let (cp, up) = associated_pair(options()).await;

    let mut update = FarUpdate::new(1);
    update.apply_action = Some(pfcp_wire::rules::ApplyAction::DROP);
    let request = SessionModificationRequest {
        update_far: vec![update.to_update_ie()],
        ..Default::default()
    };
    let response = cp.request(up.local_addr().unwrap(), Some(0xdead), request).await.unwrap();

    assert_eq!(response.seid(), Some(0));
    let response = modification_response(&response);
    assert_eq!(response.cause.as_ref().unwrap().cause().unwrap(), Cause::SessionContextNotFound);

    cp.shutdown();
    up.shutdown();
}

#[tokio::test]
async fn modification_without_association_finds_no_session() {
    let _ = tracing_subscriber::fmt::try_init();
    let (cp, up) = pair(options()).await;

    let request = SessionModificationRequest::default();
    let response = cp.request(up.local_addr().unwrap(), Some(0xdead), request).await.unwrap();

    assert_eq!(response.seid(), Some(0));
    let response = modification_response(&response);
    assert_eq!(response.cause.as_ref().unwrap().cause().unwrap(), Cause::SessionContextNotFound);

    cp.shutdown();
    up.shutdown();
}

#[tokio::test]
async fn modification_from_moved_control_plane() {
    let _ = tracing_subscriber::fmt::try_init();
    let (cp, up) = associated_pair(options()).await;
    let association = cp.association(&localhost()).unwrap();
    let session = association
        .new_initiated_session(cp.next_session_id(), vec![pdr(1, 10, 1)], vec![far(1)])
        .await
        .unwrap();
    let up_seid = session.remote_seid().unwrap();
    let peer = up.local_addr().unwrap();

    // A second control plane node, never associated with the user plane.
    let moved_node = NodeId::Ipv4(Ipv4Addr::new(127, 0, 0, 2));
    let moved = Entity::with_options(moved_node, Function::ControlPlane, options());
    let moved_addr = moved.start().await.unwrap();

    let cp_f_seid = FSeid::new(session.local_seid().unwrap(), moved_addr.ip());
    let request = SessionModificationRequest {
        cp_f_seid: Some(Ie::new_f_seid(&cp_f_seid)),
        create_pdr: vec![pdr(2, 5, 1).to_create_ie()],
        ..Default::default()
    };
    let response = moved.request(peer, Some(up_seid), request).await.unwrap();
    assert_eq!(response.seid(), Some(session.local_seid().unwrap()));
    let response = modification_response(&response);
    assert_eq!(response.cause.as_ref().unwrap().cause().unwrap(), Cause::RequestAccepted);

    let remote = up.session(peer.ip(), up_seid).unwrap();
    assert_eq!(remote.generation(), 1);
    assert_eq!(remote.pdrs_by_precedence()[0].id, 2);
    assert_eq!(remote.remote_addr().unwrap(), moved_addr.ip());

    moved.shutdown();
    cp.shutdown();
    up.shutdown();
}

#[tokio::test]
async fn cp_f_seid_moves_the_session() {
    let _ = tracing_subscriber::fmt::try_init();
    let (cp, up) = associated_pair(options()).await;
    let association = cp.association(&localhost()).unwrap();
    let session = association
        .new_initiated_session(cp.next_session_id(), vec![pdr(1, 10, 1)], vec![far(1)])
        .await
        .unwrap();

    let moved = FSeid::new(0, IpAddr::V4(Ipv4Addr::new(127, 0, 0, 2)));
    let request = SessionModificationRequest {
        cp_f_seid: Some(Ie::new_f_seid(&moved)),
        ..Default::default()
    };
    let peer = up.local_addr().unwrap();
    let response = cp.request(peer, Some(session.remote_seid().unwrap()), request).await.unwrap();
    let response = modification_response(&response);
    assert_eq!(response.cause.as_ref().unwrap().cause().unwrap(), Cause::RequestAccepted);

    let remote = up.session(peer.ip(), session.remote_seid().unwrap()).unwrap();
    assert_eq!(remote.remote_addr().unwrap(), moved.ip().unwrap());
    assert_eq!(remote.remote_seid().unwrap(), session.local_seid().unwrap());

    cp.shutdown();
    up.shutdown();
}

#[tokio::test]
async fn establishment_without_association() {
    let _ = tracing_subscriber::fmt::try_init();
    let (cp, up) = pair(options()).await;

    let response = cp
        .request(up.local_addr().unwrap(), None, establishment_request(77))
        .await
        .unwrap();

    assert_eq!(response.seid(), Some(77));
    let response = establishment_response(&response);
    assert_eq!(
        response.cause.as_ref().unwrap().cause().unwrap(),
        Cause::NoEstablishedPfcpAssociation
    );
    assert!(up.sessions().is_empty());

    cp.shutdown();
    up.shutdown();
}

#[tokio::test]
async fn establishment_validation() {
    let _ = tracing_subscriber::fmt::try_init();
    let (cp, up) = associated_pair(options()).await;
    let peer = up.local_addr().unwrap();

    let cases = [
        (
            SessionEstablishmentRequest { cp_f_seid: None, ..establishment_request(5) },
            0,
            Cause::MandatoryIeMissing,
            Some(IeType::F_SEID),
        ),
        (
            SessionEstablishmentRequest {
                cp_f_seid: Some(Ie::new(IeType::F_SEID, vec![0x02, 0, 0])),
                ..establishment_request(5)
            },
            0,
            Cause::InvalidLength,
            Some(IeType::F_SEID),
        ),
        (
            SessionEstablishmentRequest { node_id: None, ..establishment_request(5) },
            5,
            Cause::MandatoryIeMissing,
            Some(IeType::NODE_ID),
        ),
        (
            SessionEstablishmentRequest { create_pdr: Vec::new(), ..establishment_request(5) },
            5,
            Cause::MandatoryIeMissing,
            Some(IeType::CREATE_PDR),
        ),
        (
            SessionEstablishmentRequest { create_far: Vec::new(), ..establishment_request(5) },
            5,
            Cause::MandatoryIeMissing,
            Some(IeType::CREATE_FAR),
        ),
        (
            SessionEstablishmentRequest {
                create_pdr: vec![Ie::new_grouped(
                    IeType::CREATE_PDR,
                    &[Ie::new(IeType::PDR_ID, vec![1]), Ie::new_precedence(1), pdi(0)],
                )],
                ..establishment_request(5)
            },
            5,
            Cause::InvalidLength,
            Some(IeType::PDR_ID),
        ),
        (
            SessionEstablishmentRequest {
                create_pdr: vec![pdr(1, 10, 9).to_create_ie()],
                ..establishment_request(5)
            },
            5,
            Cause::RuleCreationModificationFailure,
            None,
        ),
    ];

    for (request, seid, cause, offending_ie) in cases {
        let response = cp.request(peer, None, request).await.unwrap();
        assert_eq!(response.seid(), Some(seid));

        let response = establishment_response(&response);
        assert_eq!(response.cause.as_ref().unwrap().cause().unwrap(), cause);
        assert_eq!(
            response.offending_ie.as_ref().map(|ie| ie.offending_ie().unwrap()),
            offending_ie
        );
        assert!(response.up_f_seid.is_none());
    }
    assert!(up.sessions().is_empty());

    // A well formed request is accepted.
    let response = cp.request(peer, None, establishment_request(5)).await.unwrap();
    let response = establishment_response(&response);
    assert_eq!(response.cause.as_ref().unwrap().cause().unwrap(), Cause::RequestAccepted);
    let up_f_seid = response.up_f_seid.as_ref().unwrap().f_seid().unwrap();
    assert!(up.session(peer.ip(), up_f_seid.seid).is_ok());

    cp.shutdown();
    up.shutdown();
}
