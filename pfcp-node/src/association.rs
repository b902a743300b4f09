use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use std::{
    net::SocketAddr,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Weak,
    },
    time::Duration,
};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn, Instrument};

use pfcp_common::system_time_from_ntp;
use pfcp_wire::{
    rules::{Far, Pdr},
    Body, FSeid, HeartbeatRequest, Ie, IeError, IeType, MessageType, NodeId,
};

use crate::{
    entity::EntityInner, Entity, Function, RequestError, Session, SessionError, TableError,
};

#[derive(Debug, Error)]
pub enum AssociationError {
    #[error("Entity dropped")]
    EntityGone,
    #[error("Entity not started")]
    NotStarted,
    #[error("Association with {0} terminated")]
    Terminated(NodeId),
    #[error("Operation not supported by a {0} function")]
    WrongFunction(Function),
    #[error("A session needs at least one PDR")]
    NoPdrs,
    #[error("A session needs at least one FAR")]
    NoFars,
    #[error("Session with remote SEID {0:#x} already exists")]
    SessionExists(u64),
    #[error("Session error: {0}")]
    Session(#[from] SessionError),
    #[error("Table error: {0}")]
    Table(#[from] TableError),
    #[error("Request error: {0}")]
    Request(#[from] RequestError),
    #[error("Unexpected response type {0}")]
    UnexpectedResponse(MessageType),
    #[error("Missing IE {0}")]
    MissingIe(IeType),
    #[error("Information element error: {0}")]
    Ie(#[from] IeError),
}

/// Sessions of one association, keyed by remote SEID.
#[derive(Debug, Default)]
struct Sessions {
    /// Sessions established by the peer.
    responder: FxHashMap<u64, Arc<Session>>,
    /// Sessions established by this entity.
    initiator: FxHashMap<u64, Arc<Session>>,
}

/// A PFCP association with one peer.
///
/// The association owns the sessions established over it. It is terminated when the peer stops
/// answering heartbeats or restarts, or when it is removed from the entity, and termination
/// takes its sessions down with it.
#[derive(Debug)]
pub struct Association {
    entity: Weak<EntityInner>,
    node_id: NodeId,
    peer_addr: SocketAddr,
    /// Recovery time stamp of the peer at setup.
    recovery_time_stamp: u32,
    /// Single lock for every session table mutation of this association.
    sessions: Mutex<Sessions>,
    terminated: AtomicBool,
    /// Stops the liveness monitor.
    cancel: CancellationToken,
}

impl Association {
    /// Creates the association and spawns its liveness monitor.
    pub(crate) fn new(
        entity: &Entity,
        node_id: NodeId,
        peer_addr: SocketAddr,
        recovery_time_stamp: u32,
    ) -> Arc<Self> {
        let association = Arc::new(Self {
            entity: entity.downgrade(),
            node_id,
            peer_addr,
            recovery_time_stamp,
            sessions: Mutex::default(),
            terminated: AtomicBool::new(false),
            cancel: entity.cancel_token().child_token(),
        });

        let span = tracing::info_span!(
            parent: None,
            "association",
            node_id = %association.node_id,
            peer = %peer_addr
        );
        tokio::spawn(
            monitor(
                Arc::downgrade(&association),
                association.cancel.clone(),
                entity.options().heartbeat_interval,
            )
            .instrument(span),
        );

        association
    }

    pub fn node_id(&self) -> &NodeId {
        &self.node_id
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    pub fn peer_recovery_time_stamp(&self) -> u32 {
        self.recovery_time_stamp
    }

    pub fn is_terminated(&self) -> bool {
        self.terminated.load(Ordering::Acquire)
    }

    pub(crate) fn entity(&self) -> Result<Entity, AssociationError> {
        self.entity.upgrade().map(Entity::from_inner).ok_or(AssociationError::EntityGone)
    }

    /// Creates a session requested by the peer, with the rules of its establishment request.
    /// Only a user plane function accepts sessions.
    pub async fn create_session(
        self: &Arc<Self>,
        local_seid: u64,
        remote: FSeid,
        pdrs: Vec<Pdr>,
        fars: Vec<Far>,
    ) -> Result<Arc<Session>, AssociationError> {
        let entity = self.entity()?;
        if entity.function() != Function::UserPlane {
            return Err(AssociationError::WrongFunction(entity.function()));
        }
        if pdrs.is_empty() {
            return Err(AssociationError::NoPdrs);
        }
        if fars.is_empty() {
            return Err(AssociationError::NoFars);
        }

        let local = self.local_f_seid(&entity, local_seid)?;
        let session =
            Arc::new(Session::new(Arc::downgrade(self), local, Some(remote), pdrs, fars)?);
        session.setup().await?;

        self.register(&entity, &session, remote.seid, false)?;
        debug!(node_id = %self.node_id, local_seid, remote_seid = remote.seid, "Session created");
        Ok(session)
    }

    /// Establishes a new session with the peer. Only a control plane function initiates
    /// sessions. The session is indexed by the SEID the peer assigned to it.
    pub async fn new_initiated_session(
        self: &Arc<Self>,
        local_seid: u64,
        pdrs: Vec<Pdr>,
        fars: Vec<Far>,
    ) -> Result<Arc<Session>, AssociationError> {
        let entity = self.entity()?;
        if entity.function() != Function::ControlPlane {
            return Err(AssociationError::WrongFunction(entity.function()));
        }
        if pdrs.is_empty() {
            return Err(AssociationError::NoPdrs);
        }
        if fars.is_empty() {
            return Err(AssociationError::NoFars);
        }
        if self.is_terminated() {
            return Err(AssociationError::Terminated(self.node_id.clone()));
        }

        let local = self.local_f_seid(&entity, local_seid)?;
        let session = Arc::new(Session::new(Arc::downgrade(self), local, None, pdrs, fars)?);
        session.setup().await?;

        let remote_seid = session.remote_seid()?;
        self.register(&entity, &session, remote_seid, true)?;
        debug!(node_id = %self.node_id, local_seid, remote_seid, "Session initiated");
        Ok(session)
    }

    fn local_f_seid(&self, entity: &Entity, seid: u64) -> Result<FSeid, AssociationError> {
        let local_addr = entity.local_addr().ok_or(AssociationError::NotStarted)?;
        Ok(FSeid::new(seid, local_addr.ip()))
    }

    /// Indexes an established session in this association and in the entity. A session that
    /// races with termination is invalidated instead.
    fn register(
        &self,
        entity: &Entity,
        session: &Arc<Session>,
        remote_seid: u64,
        initiator: bool,
    ) -> Result<(), AssociationError> {
        let mut sessions = self.sessions.lock();
        if self.is_terminated() {
            session.invalidate();
            return Err(AssociationError::Terminated(self.node_id.clone()));
        }

        let view = if initiator { &mut sessions.initiator } else { &mut sessions.responder };
        if view.contains_key(&remote_seid) {
            session.invalidate();
            return Err(AssociationError::SessionExists(remote_seid));
        }
        if let Err(e) = entity.sessions().add(Arc::clone(session)) {
            session.invalidate();
            return Err(e.into());
        }
        view.insert(remote_seid, Arc::clone(session));
        Ok(())
    }

    /// Looks up a session by remote SEID, in either direction.
    pub fn session(&self, remote_seid: u64) -> Option<Arc<Session>> {
        let sessions = self.sessions.lock();
        sessions
            .responder
            .get(&remote_seid)
            .or_else(|| sessions.initiator.get(&remote_seid))
            .cloned()
    }

    pub fn session_count(&self) -> usize {
        let sessions = self.sessions.lock();
        sessions.responder.len() + sessions.initiator.len()
    }

    /// Sends a heartbeat and checks that the peer has not restarted since the association was
    /// set up.
    pub async fn is_alive(&self) -> Result<bool, AssociationError> {
        let entity = self.entity()?;
        let recovery_time_stamp = entity.recovery_time_stamp().ok_or(AssociationError::NotStarted)?;
        let request = HeartbeatRequest {
            recovery_time_stamp: Some(Ie::new_recovery_time_stamp(recovery_time_stamp)),
            additional: Vec::new(),
        };

        let response = entity.request(self.peer_addr, None, request).await?;
        let msg_type = response.message_type();
        let Body::HeartbeatResponse(response) = response.into_body() else {
            return Err(AssociationError::UnexpectedResponse(msg_type));
        };
        let peer_recovery_time_stamp = response
            .recovery_time_stamp
            .as_ref()
            .ok_or(AssociationError::MissingIe(IeType::RECOVERY_TIME_STAMP))?
            .recovery_time_stamp()?;

        if peer_recovery_time_stamp != self.recovery_time_stamp {
            debug!(
                node_id = %self.node_id,
                restarted_at = ?system_time_from_ntp(peer_recovery_time_stamp),
                "Peer recovery time stamp changed"
            );
            return Ok(false);
        }
        Ok(true)
    }

    /// Terminates the association: stops the liveness monitor, invalidates and unindexes every
    /// session, and removes the association from the entity. Calling it again does nothing.
    pub fn terminate(&self) {
        if self.terminated.swap(true, Ordering::AcqRel) {
            return;
        }
        self.cancel.cancel();

        let sessions = {
            let mut sessions = self.sessions.lock();
            let Sessions { responder, initiator } = std::mem::take(&mut *sessions);
            responder.into_values().chain(initiator.into_values()).collect::<Vec<_>>()
        };

        let entity = self.entity.upgrade();
        for session in &sessions {
            session.invalidate();
            if let (Some(entity), Ok(local)) = (&entity, session.local_f_seid()) {
                if let Some(addr) = local.ip() {
                    entity.sessions.remove(addr, local.seid);
                }
            }
        }

        if let Some(entity) = entity {
            if entity.associations.remove_exact(&self.node_id, self) {
                entity.stats.decrement_active_associations();
            }
        }

        info!(node_id = %self.node_id, sessions = sessions.len(), "Association terminated");
    }
}

/// Sends a heartbeat every `interval` and terminates the association when the peer is lost.
async fn monitor(association: Weak<Association>, cancel: CancellationToken, interval: Duration) {
    let start = tokio::time::Instant::now() + interval;
    let mut ticker = tokio::time::interval_at(start, interval);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = ticker.tick() => {}
        }

        let Some(association) = association.upgrade() else {
            return;
        };

        let alive = tokio::select! {
            _ = cancel.cancelled() => return,
            alive = association.is_alive() => alive,
        };

        match alive {
            Ok(true) => trace!("Peer alive"),
            Ok(false) => {
                warn!("Peer restarted, terminating association");
                association.terminate();
                return;
            }
            Err(e) => {
                warn!("Heartbeat failed, terminating association: {}", e);
                association.terminate();
                return;
            }
        }
    }
}
