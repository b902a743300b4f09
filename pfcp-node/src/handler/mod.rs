use rustc_hash::FxHashMap;
use std::{fmt, future::Future, sync::Arc};
use thiserror::Error;

use pfcp_wire::{IeError, MessageType};

use crate::{Function, SessionError};

mod procedures;
mod received;
pub use received::{ReceivedMessage, ReplyError};

#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("Message type {0} is not a request")]
    NotARequest(MessageType),
    #[error("Unexpected body for message type {0}")]
    UnexpectedBody(MessageType),
    #[error("Entity not started")]
    NotStarted,
    #[error("Reply error: {0}")]
    Reply(#[from] ReplyError),
    #[error("Session error: {0}")]
    Session(#[from] SessionError),
    #[error("Information element error: {0}")]
    Ie(#[from] IeError),
}

/// Handles one type of inbound request.
///
/// Handlers run on the receive loop of the entity, one request at a time. A handler must not
/// wait for a response from a peer, since responses are read by the same loop.
#[async_trait::async_trait]
pub trait Handler: Send + Sync + 'static {
    async fn handle(&self, msg: ReceivedMessage) -> Result<(), HandlerError>;
}

#[async_trait::async_trait]
impl<F, Fut> Handler for F
where
    F: Fn(ReceivedMessage) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), HandlerError>> + Send,
{
    async fn handle(&self, msg: ReceivedMessage) -> Result<(), HandlerError> {
        self(msg).await
    }
}

/// Request handlers by message type. Built before the entity starts and frozen afterwards.
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: FxHashMap<MessageType, Arc<dyn Handler>>,
}

impl fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut types: Vec<_> = self.handlers.keys().map(|t| t.0).collect();
        types.sort_unstable();
        f.debug_struct("HandlerRegistry").field("types", &types).finish()
    }
}

impl HandlerRegistry {
    /// The procedures every function answers: heartbeat and association setup, plus session
    /// establishment and modification on a user plane function.
    pub fn for_function(function: Function) -> Self {
        let mut registry = Self::default();
        registry.insert(MessageType::HEARTBEAT_REQUEST, procedures::heartbeat);
        registry.insert(MessageType::ASSOCIATION_SETUP_REQUEST, procedures::association_setup);
        if function == Function::UserPlane {
            registry.insert(
                MessageType::SESSION_ESTABLISHMENT_REQUEST,
                procedures::session_establishment,
            );
            registry.insert(
                MessageType::SESSION_MODIFICATION_REQUEST,
                procedures::session_modification,
            );
        }
        registry
    }

    /// Registers `handler` for `msg_type`, replacing any previous handler. Only request types
    /// can be handled; responses go to the request waiting for them.
    pub fn register(
        &mut self,
        msg_type: MessageType,
        handler: impl Handler,
    ) -> Result<(), HandlerError> {
        if !msg_type.is_request() {
            return Err(HandlerError::NotARequest(msg_type));
        }
        self.insert(msg_type, handler);
        Ok(())
    }

    fn insert(&mut self, msg_type: MessageType, handler: impl Handler) {
        self.handlers.insert(msg_type, Arc::new(handler));
    }

    pub fn get(&self, msg_type: MessageType) -> Option<&Arc<dyn Handler>> {
        self.handlers.get(&msg_type)
    }

    pub fn contains(&self, msg_type: MessageType) -> bool {
        self.handlers.contains_key(&msg_type)
    }
}
