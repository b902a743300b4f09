use bytes::BytesMut;
use thiserror::Error;
use tokio_util::codec::{Decoder, Encoder};

use crate::{IeError, Message};

#[derive(Debug, Error)]
pub enum Error {
    #[error("IO error: {0:?}")]
    Io(#[from] std::io::Error),
    #[error("Unsupported PFCP version: {0}")]
    Version(u8),
    #[error("Message of {0} bytes exceeds the maximum PFCP message length")]
    Oversize(usize),
    #[error("Message truncated: expected {expected} bytes, got {actual}")]
    Truncated { expected: usize, actual: usize },
    #[error("Information element error: {0}")]
    Ie(#[from] IeError),
}

/// Datagram codec for PFCP messages.
///
/// Every call to [`Decoder::decode`] consumes the whole buffer, which holds exactly one
/// datagram when driven by a [`UdpFramed`](tokio_util::udp::UdpFramed). A datagram that
/// fails to decode is dropped entirely, so the next read starts from a clean buffer.
#[derive(Debug, Default, Clone, Copy)]
pub struct Codec;

impl Codec {
    pub fn new() -> Self {
        Self
    }
}

impl Decoder for Codec {
    type Item = Message;
    type Error = Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.is_empty() {
            return Ok(None);
        }

        let datagram = src.split().freeze();
        Message::decode(datagram).map(Some)
    }
}

impl Encoder<Message> for Codec {
    type Error = Error;

    fn encode(&mut self, item: Message, dst: &mut BytesMut) -> Result<(), Self::Error> {
        item.encode(dst)
    }
}
