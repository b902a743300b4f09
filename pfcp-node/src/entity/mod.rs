use futures::{stream::SplitSink, SinkExt, StreamExt};
use parking_lot::Mutex;
use std::{
    fmt, io,
    net::SocketAddr,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, OnceLock,
    },
    time::Duration,
};
use thiserror::Error;
use tokio::net::{lookup_host, UdpSocket};
use tokio_util::{sync::CancellationToken, udp::UdpFramed};
use tracing::{debug, info, Instrument};

use pfcp_common::constants::PFCP_PORT;
use pfcp_wire::{
    AssociationSetupRequest, Body, Cause, Codec, Ie, IeError, IeType, Message, MessageType, NodeId,
};

use crate::{
    pending::{PendingGuard, PendingRequests},
    responses::ResponseCache,
    Association, AssociationTable, Handler, HandlerError, HandlerRegistry, Session, SessionTable,
    TableError,
};

mod driver;
mod stats;
use driver::RecvDriver;
pub use stats::EntityStats;

#[derive(Debug, Error)]
pub enum EntityError {
    #[error("IO error: {0:?}")]
    Io(#[from] io::Error),
    #[error("Could not resolve {0}")]
    Resolve(NodeId),
    #[error("Entity already started")]
    AlreadyStarted,
    #[error("Entity not started")]
    NotStarted,
    #[error("Handler error: {0}")]
    Handler(#[from] HandlerError),
    #[error("Table error: {0}")]
    Table(#[from] TableError),
    #[error("Request error: {0}")]
    Request(#[from] RequestError),
    #[error("Association setup rejected by {0}: {1:?}")]
    Rejected(NodeId, Cause),
    #[error("Unexpected response type {0}")]
    UnexpectedResponse(MessageType),
    #[error("Missing IE {0}")]
    MissingIe(IeType),
    #[error("Information element error: {0}")]
    Ie(#[from] IeError),
}

#[derive(Debug, Error)]
pub enum RequestError {
    #[error("Wire protocol error: {0:?}")]
    Wire(#[from] pfcp_wire::Error),
    #[error("Entity not started")]
    NotStarted,
    #[error("Entity shut down")]
    Closed,
    #[error("Request timed out after {0} attempts")]
    Timeout(usize),
}

/// The role of the local node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Function {
    /// Control plane function. Initiates sessions.
    ControlPlane,
    /// User plane function. Accepts sessions.
    UserPlane,
}

impl fmt::Display for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ControlPlane => f.write_str("CP"),
            Self::UserPlane => f.write_str("UP"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct EntityOptions {
    /// Local UDP port. Set to 0 for an ephemeral port.
    pub port: u16,
    /// UDP port of peers reached by node ID alone.
    pub peer_port: u16,
    /// Interval between two heartbeats sent to an associated peer.
    pub heartbeat_interval: Duration,
    /// Time to wait for a response before retransmitting a request (T1).
    pub request_timeout: Duration,
    /// Number of retransmissions before a request fails (N1).
    pub request_retries: usize,
}

impl Default for EntityOptions {
    fn default() -> Self {
        Self {
            port: PFCP_PORT,
            peer_port: PFCP_PORT,
            heartbeat_interval: Duration::from_secs(30),
            request_timeout: Duration::from_secs(3),
            request_retries: 3,
        }
    }
}

impl EntityOptions {
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_peer_port(mut self, port: u16) -> Self {
        self.peer_port = port;
        self
    }

    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    /// Sets the retransmission timer and the number of retransmissions.
    pub fn with_request_timeout(mut self, timeout: Duration, retries: usize) -> Self {
        self.request_timeout = timeout;
        self.request_retries = retries;
        self
    }
}

type Sink = SplitSink<UdpFramed<Codec>, (Message, SocketAddr)>;

/// The bound socket. Writers take turns on the sink, the receive loop owns the stream.
struct Transport {
    local_addr: SocketAddr,
    sink: tokio::sync::Mutex<Sink>,
}

/// Entity state, shared between the handles, the receive loop and the associations.
pub(crate) struct EntityInner {
    node_id: NodeId,
    function: Function,
    options: EntityOptions,
    /// Taken by the receive loop on start.
    handlers: Mutex<Option<HandlerRegistry>>,
    transport: OnceLock<Transport>,
    recovery_time_stamp: OnceLock<u32>,
    session_ids: AtomicU64,
    pub(crate) pending: PendingRequests,
    pub(crate) responses: ResponseCache,
    pub(crate) associations: AssociationTable,
    pub(crate) sessions: SessionTable,
    pub(crate) stats: EntityStats,
    pub(crate) cancel: CancellationToken,
}

/// A local PFCP node.
///
/// Handles are cheap to clone and share one socket, one association table and one session
/// table.
#[derive(Clone)]
pub struct Entity {
    inner: Arc<EntityInner>,
}

impl fmt::Debug for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Entity")
            .field("node_id", &self.inner.node_id)
            .field("function", &self.inner.function)
            .field("local_addr", &self.local_addr())
            .finish_non_exhaustive()
    }
}

impl Entity {
    /// Creates an entity with the default options and the default handlers for `function`.
    pub fn new(node_id: NodeId, function: Function) -> Self {
        Self::with_options(node_id, function, EntityOptions::default())
    }

    pub fn with_options(node_id: NodeId, function: Function, options: EntityOptions) -> Self {
        Self::with_handlers(node_id, function, options, HandlerRegistry::for_function(function))
    }

    pub fn with_handlers(
        node_id: NodeId,
        function: Function,
        options: EntityOptions,
        handlers: HandlerRegistry,
    ) -> Self {
        // Long enough to answer every retransmission of a peer using the same timers.
        let attempts = u32::try_from(options.request_retries + 1).unwrap_or(u32::MAX);
        let responses = ResponseCache::new(options.request_timeout.saturating_mul(attempts));

        let inner = EntityInner {
            node_id,
            function,
            options,
            handlers: Mutex::new(Some(handlers)),
            transport: OnceLock::new(),
            recovery_time_stamp: OnceLock::new(),
            session_ids: AtomicU64::new(1),
            pending: PendingRequests::default(),
            responses,
            associations: AssociationTable::default(),
            sessions: SessionTable::default(),
            stats: EntityStats::default(),
            cancel: CancellationToken::new(),
        };
        Self { inner: Arc::new(inner) }
    }

    pub(crate) fn from_inner(inner: Arc<EntityInner>) -> Self {
        Self { inner }
    }

    pub(crate) fn downgrade(&self) -> std::sync::Weak<EntityInner> {
        Arc::downgrade(&self.inner)
    }

    pub(crate) fn cancel_token(&self) -> &CancellationToken {
        &self.inner.cancel
    }

    /// Registers a handler for a request type. Fails once the entity is started.
    pub fn register_handler(
        &self,
        msg_type: MessageType,
        handler: impl Handler,
    ) -> Result<(), EntityError> {
        let mut handlers = self.inner.handlers.lock();
        let registry = handlers.as_mut().ok_or(EntityError::AlreadyStarted)?;
        registry.register(msg_type, handler)?;
        Ok(())
    }

    /// Binds the socket on the address of the node ID, sets the recovery time stamp and spawns
    /// the receive loop. Returns the bound address.
    pub async fn start(&self) -> Result<SocketAddr, EntityError> {
        // An FQDN node ID with an oversize label cannot be sent to peers.
        Ie::new_node_id(&self.inner.node_id)?;
        let handlers = self.inner.handlers.lock().take().ok_or(EntityError::AlreadyStarted)?;

        let socket = match self.bind().await {
            Ok(socket) => socket,
            Err(e) => {
                *self.inner.handlers.lock() = Some(handlers);
                return Err(e);
            }
        };
        let local_addr = socket.local_addr()?;

        let (sink, stream) = UdpFramed::new(socket, Codec::new()).split();
        let transport = Transport { local_addr, sink: tokio::sync::Mutex::new(sink) };
        if self.inner.transport.set(transport).is_err() {
            return Err(EntityError::AlreadyStarted);
        }
        let recovery_time_stamp = *self.inner.recovery_time_stamp.get_or_init(pfcp_common::ntp_now);

        let span = tracing::info_span!(parent: None, "pfcp_entity", %local_addr, node_id = %self.inner.node_id);
        span.in_scope(|| {
            info!(function = %self.inner.function, recovery_time_stamp, "Entity listening");
        });

        let driver = RecvDriver {
            entity: self.downgrade(),
            stream,
            handlers,
            cancel: self.inner.cancel.clone(),
        };
        tokio::spawn(driver.run().instrument(span));

        Ok(local_addr)
    }

    async fn bind(&self) -> Result<UdpSocket, EntityError> {
        let addr = resolve(&self.inner.node_id, self.inner.options.port).await?;
        Ok(UdpSocket::bind(addr).await?)
    }

    /// Stops the receive loop, terminates every association and fails all pending requests.
    pub fn shutdown(&self) {
        self.inner.cancel.cancel();
        for association in self.inner.associations.values() {
            association.terminate();
        }
        self.inner.pending.clear();
        debug!(node_id = %self.inner.node_id, "Entity shut down");
    }

    /// Returns the next local SEID. Strictly increasing, starting at 1.
    pub fn next_session_id(&self) -> u64 {
        self.inner.session_ids.fetch_add(1, Ordering::Relaxed)
    }

    /// Sends one message to `peer`. Concurrent senders are serialized on the socket.
    pub async fn send_message(&self, message: Message, peer: SocketAddr) -> Result<(), RequestError> {
        let transport = self.inner.transport.get().ok_or(RequestError::NotStarted)?;
        if self.inner.cancel.is_cancelled() {
            return Err(RequestError::Closed);
        }

        let size = message.encoded_len();
        transport.sink.lock().await.send((message, peer)).await?;
        self.inner.stats.increment_tx(size);
        Ok(())
    }

    /// Sends the response to a request and keeps it to answer retransmissions of that request.
    pub(crate) async fn send_response(
        &self,
        response: Message,
        peer: SocketAddr,
    ) -> Result<(), RequestError> {
        self.inner.responses.insert(peer, response.clone());
        self.send_message(response, peer).await
    }

    /// Sends a request and waits for the response with the same sequence number from `peer`.
    ///
    /// The request is retransmitted unchanged after each timeout, up to the configured number of
    /// retries. Session related requests carry `seid` in their header, node related requests
    /// pass `None`.
    pub async fn request(
        &self,
        peer: SocketAddr,
        seid: Option<u64>,
        body: impl Into<Body>,
    ) -> Result<Message, RequestError> {
        let pending = &self.inner.pending;
        let options = &self.inner.options;

        let sequence = pending.next_sequence();
        let message = match seid {
            Some(seid) => Message::with_seid(sequence, seid, body),
            None => Message::new(sequence, body),
        };
        let msg_type = message.message_type();

        let mut response = pending.register(sequence, peer);
        let _guard = PendingGuard { pending, sequence };

        let attempts = options.request_retries + 1;
        for attempt in 0..attempts {
            if attempt > 0 {
                self.inner.stats.increment_retransmissions();
                debug!(%peer, %msg_type, sequence, attempt, "Retransmitting request");
            }
            self.send_message(message.clone(), peer).await?;

            match tokio::time::timeout(options.request_timeout, &mut response).await {
                Ok(Ok(response)) => return Ok(response),
                Ok(Err(_)) => return Err(RequestError::Closed),
                Err(_) => continue,
            }
        }

        Err(RequestError::Timeout(attempts))
    }

    /// Runs the association setup procedure with the peer reached at `peer_addr`, and creates
    /// the association once the peer accepts.
    pub async fn setup_association(
        &self,
        node_id: NodeId,
        peer_addr: SocketAddr,
    ) -> Result<Arc<Association>, EntityError> {
        if self.inner.associations.contains(&node_id) {
            return Err(TableError::AssociationExists(node_id).into());
        }
        let recovery_time_stamp = self.recovery_time_stamp().ok_or(EntityError::NotStarted)?;

        let request = AssociationSetupRequest {
            node_id: Some(Ie::new_node_id(&self.inner.node_id)?),
            recovery_time_stamp: Some(Ie::new_recovery_time_stamp(recovery_time_stamp)),
            additional: Vec::new(),
        };
        let response = self.request(peer_addr, None, request).await?;
        let msg_type = response.message_type();
        let Body::AssociationSetupResponse(response) = response.into_body() else {
            return Err(EntityError::UnexpectedResponse(msg_type));
        };

        let cause = response.cause.as_ref().ok_or(EntityError::MissingIe(IeType::CAUSE))?.cause()?;
        if !cause.is_accepted() {
            return Err(EntityError::Rejected(node_id, cause));
        }
        let peer_recovery_time_stamp = response
            .recovery_time_stamp
            .as_ref()
            .ok_or(EntityError::MissingIe(IeType::RECOVERY_TIME_STAMP))?
            .recovery_time_stamp()?;

        self.create_association(node_id, peer_addr, peer_recovery_time_stamp)
    }

    /// Like [`Entity::setup_association`], reaching the peer on the address of its node ID and
    /// the configured peer port.
    pub async fn associate(&self, node_id: NodeId) -> Result<Arc<Association>, EntityError> {
        let peer_addr = resolve(&node_id, self.inner.options.peer_port).await?;
        self.setup_association(node_id, peer_addr).await
    }

    /// Creates an association with a peer and starts its liveness monitor. Fails if the peer
    /// already has one.
    pub fn create_association(
        &self,
        node_id: NodeId,
        peer_addr: SocketAddr,
        peer_recovery_time_stamp: u32,
    ) -> Result<Arc<Association>, EntityError> {
        let association = self.inner.associations.insert_with(node_id.clone(), || {
            Association::new(self, node_id.clone(), peer_addr, peer_recovery_time_stamp)
        })?;
        self.inner.stats.increment_active_associations();

        info!(%node_id, peer = %peer_addr, "Association established");
        Ok(association)
    }

    /// Terminates the association with `node_id` and every session it owns.
    pub fn remove_association(&self, node_id: &NodeId) -> Result<(), EntityError> {
        self.inner.associations.get(node_id)?.terminate();
        Ok(())
    }

    pub fn association(&self, node_id: &NodeId) -> Result<Arc<Association>, TableError> {
        self.inner.associations.get(node_id)
    }

    pub fn associations(&self) -> &AssociationTable {
        &self.inner.associations
    }

    /// Looks up a session by the address and SEID of its local F-SEID.
    pub fn session(&self, addr: std::net::IpAddr, seid: u64) -> Result<Arc<Session>, TableError> {
        self.inner.sessions.get(addr, seid)
    }

    pub fn sessions(&self) -> &SessionTable {
        &self.inner.sessions
    }

    pub fn node_id(&self) -> &NodeId {
        &self.inner.node_id
    }

    pub fn function(&self) -> Function {
        self.inner.function
    }

    pub fn options(&self) -> &EntityOptions {
        &self.inner.options
    }

    /// Set when the entity starts.
    pub fn recovery_time_stamp(&self) -> Option<u32> {
        self.inner.recovery_time_stamp.get().copied()
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.inner.transport.get().map(|transport| transport.local_addr)
    }

    pub fn stats(&self) -> &EntityStats {
        &self.inner.stats
    }

    pub fn is_started(&self) -> bool {
        self.inner.transport.get().is_some()
    }
}

async fn resolve(node_id: &NodeId, port: u16) -> Result<SocketAddr, EntityError> {
    if let Some(ip) = node_id.ip() {
        return Ok(SocketAddr::new(ip, port));
    }

    let NodeId::Fqdn(name) = node_id else {
        return Err(EntityError::Resolve(node_id.clone()));
    };
    lookup_host((name.as_str(), port))
        .await?
        .next()
        .ok_or_else(|| EntityError::Resolve(node_id.clone()))
}
