//! PFCP wire formats: the message header, information elements, and the datagram codec used by
//! `pfcp-node`.

mod cause;
mod codec;
mod ie;
mod message;
pub mod rules;

pub use cause::Cause;
pub use codec::{Codec, Error};
pub use ie::{parse_ies, FSeid, Ie, IeError, IeType, NodeId, IE_HEADER_LEN};
pub use message::{
    AssociationSetupRequest, AssociationSetupResponse, Body, Generic, HeartbeatRequest,
    HeartbeatResponse, Message, MessageType, SessionEstablishmentRequest,
    SessionEstablishmentResponse, SessionModificationRequest, SessionModificationResponse,
};
