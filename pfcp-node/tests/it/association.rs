use std::time::Duration;

use pfcp_node::{AssociationError, EntityError, Function, TableError};
use pfcp_wire::{AssociationSetupRequest, Body, Cause, Ie, IeType};

use crate::helpers::{associated_pair, far, localhost, options, pair, pdr};

#[tokio::test]
async fn association_setup_and_heartbeat() {
    let _ = tracing_subscriber::fmt::try_init();
    let (cp, up) = associated_pair(options()).await;

    let cp_side = cp.association(&localhost()).unwrap();
    let up_side = up.association(&localhost()).unwrap();
    assert_eq!(cp_side.peer_addr(), up.local_addr().unwrap());
    assert_eq!(up_side.peer_addr(), cp.local_addr().unwrap());
    assert_eq!(cp_side.peer_recovery_time_stamp(), up.recovery_time_stamp().unwrap());
    assert_eq!(cp.stats().active_associations(), 1);
    assert_eq!(up.stats().active_associations(), 1);

    assert!(cp_side.is_alive().await.unwrap());
    assert!(up_side.is_alive().await.unwrap());

    cp.shutdown();
    up.shutdown();
}

#[tokio::test]
async fn duplicate_association_is_rejected() {
    let _ = tracing_subscriber::fmt::try_init();
    let (cp, up) = associated_pair(options()).await;
    let peer = up.local_addr().unwrap();

    assert!(matches!(
        cp.setup_association(localhost(), peer).await,
        Err(EntityError::Table(TableError::AssociationExists(_)))
    ));

    // The user plane still has the first association and answers with a rejection.
    let request = AssociationSetupRequest {
        node_id: Some(Ie::new_node_id(cp.node_id()).unwrap()),
        recovery_time_stamp: Some(Ie::new_recovery_time_stamp(cp.recovery_time_stamp().unwrap())),
        additional: Vec::new(),
    };
    let response = cp.request(peer, None, request).await.unwrap();
    let Body::AssociationSetupResponse(response) = response.body() else {
        panic!("unexpected response {:?}", response.message_type());
    };
    assert_eq!(response.cause.as_ref().unwrap().cause().unwrap(), Cause::RequestRejected);
    assert_eq!(up.associations().len(), 1);

    cp.shutdown();
    up.shutdown();
}

#[tokio::test]
async fn association_setup_without_node_id() {
    let _ = tracing_subscriber::fmt::try_init();
    let (cp, up) = pair(options()).await;

    let request = AssociationSetupRequest {
        recovery_time_stamp: Some(Ie::new_recovery_time_stamp(1)),
        ..Default::default()
    };
    let response = cp.request(up.local_addr().unwrap(), None, request).await.unwrap();
    let Body::AssociationSetupResponse(response) = response.body() else {
        panic!("unexpected response {:?}", response.message_type());
    };

    assert_eq!(response.cause.as_ref().unwrap().cause().unwrap(), Cause::MandatoryIeMissing);
    let offending = response.additional.iter().find(|ie| ie.ie_type() == IeType::OFFENDING_IE);
    assert_eq!(offending.unwrap().offending_ie().unwrap(), IeType::NODE_ID);
    assert!(up.associations().is_empty());

    cp.shutdown();
    up.shutdown();
}

#[tokio::test]
async fn lost_peer_terminates_association_and_sessions() {
    let _ = tracing_subscriber::fmt::try_init();
    let options = options()
        .with_heartbeat_interval(Duration::from_millis(100))
        .with_request_timeout(Duration::from_millis(50), 1);
    let (cp, up) = associated_pair(options).await;

    let association = cp.association(&localhost()).unwrap();
    let session = association
        .new_initiated_session(cp.next_session_id(), vec![pdr(1, 10, 1)], vec![far(1)])
        .await
        .unwrap();
    assert_eq!(cp.sessions().len(), 1);

    up.shutdown();
    tokio::time::sleep(Duration::from_millis(600)).await;

    assert!(association.is_terminated());
    assert!(cp.association(&localhost()).is_err());
    assert!(!session.is_established());
    assert!(cp.sessions().is_empty());
    assert_eq!(association.session_count(), 0);
    assert_eq!(cp.stats().active_associations(), 0);

    cp.shutdown();
}

#[tokio::test]
async fn peer_restart_is_detected() {
    let _ = tracing_subscriber::fmt::try_init();
    let options = options().with_heartbeat_interval(Duration::from_millis(100));
    let (cp, up) = pair(options.clone()).await;

    // Record a recovery time stamp the peer never had.
    let peer_addr = up.local_addr().unwrap();
    let association = cp
        .create_association(localhost(), peer_addr, up.recovery_time_stamp().unwrap() - 10)
        .unwrap();
    assert!(!association.is_alive().await.unwrap());

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(association.is_terminated());
    assert!(cp.associations().is_empty());

    cp.shutdown();
    up.shutdown();
}

#[tokio::test]
async fn explicit_removal_cascades() {
    let _ = tracing_subscriber::fmt::try_init();
    let (cp, up) = associated_pair(options()).await;

    let association = cp.association(&localhost()).unwrap();
    let session = association
        .new_initiated_session(cp.next_session_id(), vec![pdr(1, 10, 1)], vec![far(1)])
        .await
        .unwrap();

    cp.remove_association(&localhost()).unwrap();
    assert!(association.is_terminated());
    assert!(!session.is_established());
    assert!(cp.sessions().is_empty());
    assert!(matches!(
        cp.remove_association(&localhost()),
        Err(EntityError::Table(TableError::AssociationNotFound(_)))
    ));

    // Termination is idempotent.
    association.terminate();
    assert_eq!(cp.stats().active_associations(), 0);

    // New sessions cannot be created on a terminated association.
    assert!(association
        .new_initiated_session(cp.next_session_id(), vec![pdr(1, 10, 1)], vec![far(1)])
        .await
        .is_err());

    cp.shutdown();
    up.shutdown();
}

#[tokio::test]
async fn user_plane_does_not_initiate_sessions() {
    let _ = tracing_subscriber::fmt::try_init();
    let (cp, up) = associated_pair(options()).await;

    let association = up.association(&localhost()).unwrap();
    let result = association
        .new_initiated_session(up.next_session_id(), vec![pdr(1, 10, 1)], vec![far(1)])
        .await;
    assert!(matches!(result, Err(AssociationError::WrongFunction(Function::UserPlane))));

    cp.shutdown();
    up.shutdown();
}
