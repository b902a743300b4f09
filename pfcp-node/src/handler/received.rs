use std::net::SocketAddr;
use thiserror::Error;

use pfcp_wire::{Body, Message, MessageType};

use crate::{Entity, RequestError};

#[derive(Debug, Error)]
pub enum ReplyError {
    #[error("Message type {0} is not a request")]
    NotARequest(MessageType),
    #[error("Message type {reply} does not answer message type {request}")]
    TypeMismatch { request: MessageType, reply: MessageType },
    #[error("Sequence number {reply} does not match request sequence number {request}")]
    SequenceMismatch { request: u32, reply: u32 },
    #[error("Send error: {0}")]
    Send(#[from] RequestError),
}

/// A request received by an entity, with the address it came from.
#[derive(Debug)]
pub struct ReceivedMessage {
    message: Message,
    sender: SocketAddr,
    entity: Entity,
}

impl ReceivedMessage {
    pub(crate) fn new(message: Message, sender: SocketAddr, entity: Entity) -> Self {
        Self { message, sender, entity }
    }

    pub fn message(&self) -> &Message {
        &self.message
    }

    pub fn body(&self) -> &Body {
        self.message.body()
    }

    pub fn message_type(&self) -> MessageType {
        self.message.message_type()
    }

    pub fn sequence(&self) -> u32 {
        self.message.sequence()
    }

    pub fn seid(&self) -> Option<u64> {
        self.message.seid()
    }

    /// Returns the source address of the request.
    pub fn sender(&self) -> SocketAddr {
        self.sender
    }

    /// Returns the entity that received the request.
    pub fn entity(&self) -> &Entity {
        &self.entity
    }

    /// Sends `response` to the sender. The response must be of the type answering this
    /// request and carry its sequence number.
    pub async fn reply(&self, response: Message) -> Result<(), ReplyError> {
        let request_type = self.message_type();
        if !request_type.is_request() {
            return Err(ReplyError::NotARequest(request_type));
        }
        if request_type.response_type() != Some(response.message_type()) {
            return Err(ReplyError::TypeMismatch {
                request: request_type,
                reply: response.message_type(),
            });
        }
        if response.sequence() != self.sequence() {
            return Err(ReplyError::SequenceMismatch {
                request: self.sequence(),
                reply: response.sequence(),
            });
        }

        self.entity.send_response(response, self.sender).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::net::Ipv4Addr;

    use pfcp_wire::{HeartbeatRequest, HeartbeatResponse, NodeId, SessionModificationResponse};

    use super::*;
    use crate::Function;

    fn received(message: Message) -> ReceivedMessage {
        let entity = Entity::new(NodeId::Ipv4(Ipv4Addr::LOCALHOST), Function::UserPlane);
        ReceivedMessage::new(message, SocketAddr::from(([127, 0, 0, 1], 8805)), entity)
    }

    #[tokio::test]
    async fn reply_checks_correlation() {
        let msg = received(Message::new(42, HeartbeatRequest::default()));

        let wrong_type = Message::with_seid(42, 0, SessionModificationResponse::default());
        assert!(matches!(
            msg.reply(wrong_type).await,
            Err(ReplyError::TypeMismatch { .. })
        ));

        let wrong_sequence = Message::new(43, HeartbeatResponse::default());
        assert!(matches!(
            msg.reply(wrong_sequence).await,
            Err(ReplyError::SequenceMismatch { request: 42, reply: 43 })
        ));

        // Correlated, but the entity was never started.
        let ok = Message::new(42, HeartbeatResponse::default());
        assert!(matches!(msg.reply(ok).await, Err(ReplyError::Send(RequestError::NotStarted))));
    }

    #[tokio::test]
    async fn responses_cannot_be_replied_to() {
        let msg = received(Message::new(1, HeartbeatResponse::default()));
        let reply = Message::new(1, HeartbeatResponse::default());

        assert!(matches!(msg.reply(reply).await, Err(ReplyError::NotARequest(_))));
    }
}
