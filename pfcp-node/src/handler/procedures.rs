//! The request handlers registered by default.
//!
//! Every validation failure is answered with a cause code. Errors only escape a handler when no
//! response could be built or sent at all.

use std::{net::SocketAddr, sync::Arc};
use tracing::debug;

use pfcp_wire::{
    rules, AssociationSetupResponse, Body, Cause, FSeid, HeartbeatResponse, Ie, IeType, Message,
    NodeId, SessionEstablishmentRequest, SessionEstablishmentResponse, SessionModificationRequest,
    SessionModificationResponse,
};

use super::{HandlerError, ReceivedMessage};
use crate::{Association, Entity, RuleChanges, Session};

/// A request answered with something other than "request accepted".
struct Rejection {
    /// SEID to put in the response header.
    seid: u64,
    cause: Cause,
    offending_ie: Option<IeType>,
}

impl Rejection {
    fn new(seid: u64, cause: Cause) -> Self {
        Self { seid, cause, offending_ie: None }
    }

    fn offending(seid: u64, cause: Cause, offending_ie: IeType) -> Self {
        Self { seid, cause, offending_ie: Some(offending_ie) }
    }
}

fn recovery_time_stamp(entity: &Entity) -> Result<Ie, HandlerError> {
    let recovery_time_stamp = entity.recovery_time_stamp().ok_or(HandlerError::NotStarted)?;
    Ok(Ie::new_recovery_time_stamp(recovery_time_stamp))
}

/// The association of the sender. Peers are matched on the exact address of their node ID, so
/// a peer known only by FQDN is not found.
fn sender_association(entity: &Entity, sender: SocketAddr) -> Option<Arc<Association>> {
    entity.association(&NodeId::from(sender.ip())).ok()
}

pub(super) async fn heartbeat(msg: ReceivedMessage) -> Result<(), HandlerError> {
    let response = HeartbeatResponse {
        recovery_time_stamp: Some(recovery_time_stamp(msg.entity())?),
        additional: Vec::new(),
    };
    msg.reply(Message::new(msg.sequence(), response)).await?;
    Ok(())
}

pub(super) async fn association_setup(msg: ReceivedMessage) -> Result<(), HandlerError> {
    let Body::AssociationSetupRequest(request) = msg.body() else {
        return Err(HandlerError::UnexpectedBody(msg.message_type()));
    };
    let entity = msg.entity();

    let (cause, offending_ie) = match setup(entity, msg.sender(), request) {
        Ok(()) => (Cause::RequestAccepted, None),
        Err(rejection) => (rejection.cause, rejection.offending_ie),
    };

    let response = AssociationSetupResponse {
        node_id: Some(Ie::new_node_id(entity.node_id())?),
        cause: Some(Ie::new_cause(cause)),
        recovery_time_stamp: Some(recovery_time_stamp(entity)?),
        additional: offending_ie.map(Ie::new_offending_ie).into_iter().collect(),
    };
    msg.reply(Message::new(msg.sequence(), response)).await?;
    Ok(())
}

fn setup(
    entity: &Entity,
    sender: SocketAddr,
    request: &pfcp_wire::AssociationSetupRequest,
) -> Result<(), Rejection> {
    let node_id = match request.node_id.as_ref().map(Ie::node_id) {
        None => return Err(Rejection::offending(0, Cause::MandatoryIeMissing, IeType::NODE_ID)),
        Some(Err(e)) => return Err(Rejection::offending(0, e.cause(), IeType::NODE_ID)),
        Some(Ok(node_id)) => node_id,
    };
    let recovery_time_stamp = match request.recovery_time_stamp.as_ref().map(Ie::recovery_time_stamp)
    {
        None => {
            return Err(Rejection::offending(
                0,
                Cause::MandatoryIeMissing,
                IeType::RECOVERY_TIME_STAMP,
            ))
        }
        Some(Err(e)) => {
            return Err(Rejection::offending(0, e.cause(), IeType::RECOVERY_TIME_STAMP))
        }
        Some(Ok(recovery_time_stamp)) => recovery_time_stamp,
    };

    entity.create_association(node_id.clone(), sender, recovery_time_stamp).map_err(|e| {
        debug!(%node_id, peer = %sender, "Rejecting association setup: {}", e);
        Rejection::new(0, Cause::RequestRejected)
    })?;
    Ok(())
}

pub(super) async fn session_establishment(msg: ReceivedMessage) -> Result<(), HandlerError> {
    let Body::SessionEstablishmentRequest(request) = msg.body() else {
        return Err(HandlerError::UnexpectedBody(msg.message_type()));
    };
    let entity = msg.entity();

    let (seid, mut response) = match establish(entity, msg.sender(), request).await {
        Ok((remote_seid, session)) => {
            let response = SessionEstablishmentResponse {
                cause: Some(Ie::new_cause(Cause::RequestAccepted)),
                up_f_seid: Some(Ie::new_f_seid(&session.local_f_seid()?)),
                ..Default::default()
            };
            (remote_seid, response)
        }
        Err(rejection) => {
            let response = SessionEstablishmentResponse {
                cause: Some(Ie::new_cause(rejection.cause)),
                offending_ie: rejection.offending_ie.map(Ie::new_offending_ie),
                ..Default::default()
            };
            (rejection.seid, response)
        }
    };
    response.node_id = Some(Ie::new_node_id(entity.node_id())?);

    msg.reply(Message::with_seid(msg.sequence(), seid, response)).await?;
    Ok(())
}

/// Validates a Session Establishment Request and creates the session. Returns the remote SEID
/// with the session.
async fn establish(
    entity: &Entity,
    sender: SocketAddr,
    request: &SessionEstablishmentRequest,
) -> Result<(u64, Arc<Session>), Rejection> {
    // SEID 0 until the CP F-SEID is known.
    let remote = match request.cp_f_seid.as_ref().map(Ie::f_seid) {
        None => return Err(Rejection::offending(0, Cause::MandatoryIeMissing, IeType::F_SEID)),
        Some(Err(e)) => return Err(Rejection::offending(0, e.cause(), IeType::F_SEID)),
        Some(Ok(remote)) => remote,
    };
    let seid = remote.seid;

    if sender_association(entity, sender).is_none() {
        debug!(peer = %sender, "Session establishment from a peer without association");
        return Err(Rejection::new(seid, Cause::NoEstablishedPfcpAssociation));
    }

    // The session belongs to the association of the node in the request, which may differ
    // from the sender.
    let node_id = match request.node_id.as_ref().map(Ie::node_id) {
        None => return Err(Rejection::offending(seid, Cause::MandatoryIeMissing, IeType::NODE_ID)),
        Some(Err(e)) => return Err(Rejection::offending(seid, e.cause(), IeType::NODE_ID)),
        Some(Ok(node_id)) => node_id,
    };
    let association = entity
        .association(&node_id)
        .map_err(|_| Rejection::new(seid, Cause::NoEstablishedPfcpAssociation))?;

    if request.create_pdr.is_empty() {
        return Err(Rejection::offending(seid, Cause::MandatoryIeMissing, IeType::CREATE_PDR));
    }
    if request.create_far.is_empty() {
        return Err(Rejection::offending(seid, Cause::MandatoryIeMissing, IeType::CREATE_FAR));
    }

    let pdrs = rules::parse_create_pdrs(&request.create_pdr)
        .map_err(|e| Rejection::offending(seid, e.cause, e.offending_ie))?;
    let fars = rules::parse_create_fars(&request.create_far)
        .map_err(|e| Rejection::offending(seid, e.cause, e.offending_ie))?;

    let session = association
        .create_session(entity.next_session_id(), remote, pdrs, fars)
        .await
        .map_err(|e| {
            debug!(%node_id, seid, "Session creation failed: {}", e);
            Rejection::new(seid, Cause::RuleCreationModificationFailure)
        })?;
    Ok((seid, session))
}

pub(super) async fn session_modification(msg: ReceivedMessage) -> Result<(), HandlerError> {
    let Body::SessionModificationRequest(request) = msg.body() else {
        return Err(HandlerError::UnexpectedBody(msg.message_type()));
    };

    let (seid, response) = match modify(msg.entity(), msg.seid(), request) {
        Ok(remote_seid) => (
            remote_seid,
            SessionModificationResponse {
                cause: Some(Ie::new_cause(Cause::RequestAccepted)),
                ..Default::default()
            },
        ),
        Err(rejection) => (
            rejection.seid,
            SessionModificationResponse {
                cause: Some(Ie::new_cause(rejection.cause)),
                offending_ie: rejection.offending_ie.map(Ie::new_offending_ie),
                ..Default::default()
            },
        ),
    };

    msg.reply(Message::with_seid(msg.sequence(), seid, response)).await?;
    Ok(())
}

/// Applies a Session Modification Request to the session addressed by its header SEID.
/// Returns the remote SEID of the session.
///
/// The sender is not checked against the associations: once the control plane moved the
/// session with a new CP F-SEID, its requests come from an address with no association.
fn modify(
    entity: &Entity,
    local_seid: Option<u64>,
    request: &SessionModificationRequest,
) -> Result<u64, Rejection> {
    let local_addr = entity.local_addr().map(|addr| addr.ip());
    let session = local_addr
        .zip(local_seid)
        .and_then(|(addr, seid)| entity.session(addr, seid).ok())
        .ok_or(Rejection::new(0, Cause::SessionContextNotFound))?;
    let seid = session.remote_seid().unwrap_or_default();

    let changes = RuleChanges::from_modification(request)
        .map_err(|e| Rejection::offending(seid, e.cause, e.offending_ie))?;
    let cp_f_seid: Option<FSeid> = match request.cp_f_seid.as_ref().map(Ie::f_seid) {
        None => None,
        Some(Err(e)) => return Err(Rejection::offending(seid, e.cause(), IeType::F_SEID)),
        Some(Ok(f_seid)) => Some(f_seid),
    };

    let generation = session.add_update_rules(changes).map_err(|e| {
        debug!(seid, "Rejecting session modification: {}", e);
        Rejection::new(seid, Cause::RequestRejected)
    })?;

    // The CP function moved the session to a new address. Its SEID stays the same.
    if let Some(f_seid) = cp_f_seid {
        if let Err(e) = session.update_remote_address(&f_seid) {
            debug!(seid, "Ignoring CP F-SEID update: {}", e);
        }
    }

    debug!(seid, generation, "Session modified");
    Ok(seid)
}
