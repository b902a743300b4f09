use futures::{stream::SplitStream, StreamExt};
use std::{net::SocketAddr, sync::Weak};
use tokio_util::{sync::CancellationToken, udp::UdpFramed};
use tracing::{debug, error, trace, warn};

use pfcp_wire::{Codec, Message};

use super::{Entity, EntityInner};
use crate::{HandlerRegistry, ReceivedMessage};

/// The receive loop of an entity. Reads datagrams until the entity is shut down or dropped.
pub(crate) struct RecvDriver {
    pub(crate) entity: Weak<EntityInner>,
    pub(crate) stream: SplitStream<UdpFramed<Codec>>,
    pub(crate) handlers: HandlerRegistry,
    pub(crate) cancel: CancellationToken,
}

impl RecvDriver {
    pub(crate) async fn run(mut self) {
        loop {
            let next = tokio::select! {
                _ = self.cancel.cancelled() => {
                    debug!("Entity cancelled, shutting down receive loop");
                    return;
                }
                next = self.stream.next() => next,
            };

            let Some(entity) = self.entity.upgrade() else {
                debug!("Entity dropped, shutting down receive loop");
                return;
            };
            let entity = Entity::from_inner(entity);

            match next {
                Some(Ok((message, peer))) => self.on_message(entity, message, peer).await,
                Some(Err(pfcp_wire::Error::Io(e))) => {
                    warn!("Failed to read from socket: {:?}", e);
                }
                Some(Err(e)) => {
                    // Malformed datagrams are dropped without a response.
                    entity.stats().increment_decode_failures();
                    trace!("Dropping malformed datagram: {:?}", e);
                }
                None => {
                    debug!("Socket closed, shutting down receive loop");
                    return;
                }
            }
        }
    }

    async fn on_message(&self, entity: Entity, message: Message, peer: SocketAddr) {
        let msg_type = message.message_type();
        let sequence = message.sequence();
        entity.stats().increment_rx(message.encoded_len());
        trace!(%peer, %msg_type, sequence, "Received message");

        if msg_type.is_response() {
            match entity.inner.pending.complete(peer, message) {
                Some(rtt) => trace!(%peer, %msg_type, sequence, ?rtt, "Response matched"),
                None => debug!(%peer, %msg_type, sequence, "Dropping unsolicited response"),
            }
            return;
        }

        if let Some(response) = entity.inner.responses.get(peer, msg_type, sequence) {
            entity.stats().increment_duplicate_requests();
            debug!(%peer, %msg_type, sequence, "Answering retransmitted request");
            if let Err(e) = entity.send_message(response, peer).await {
                warn!(%peer, %msg_type, sequence, "Failed to resend response: {}", e);
            }
            return;
        }

        let Some(handler) = self.handlers.get(msg_type) else {
            entity.stats().increment_unhandled_messages();
            warn!(%peer, %msg_type, "No handler registered for message type");
            return;
        };

        let received = ReceivedMessage::new(message, peer, entity.clone());
        if let Err(e) = handler.handle(received).await {
            entity.stats().increment_handler_errors();
            error!(%peer, %msg_type, sequence, "Handler failed: {}", e);
        }
    }
}
