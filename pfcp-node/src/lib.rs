//! PFCP node management and session management.
//!
//! An [`Entity`] is the local PFCP node. It owns the UDP socket, dispatches inbound requests to
//! the handlers of its [`HandlerRegistry`], and keeps the [`Association`]s with its peers. Each
//! association owns the [`Session`]s established over it and tears them down when the peer is
//! lost.

mod association;
mod entity;
mod handler;
mod pending;
mod responses;
mod session;
mod table;

pub use association::{Association, AssociationError};
pub use entity::{Entity, EntityError, EntityOptions, EntityStats, Function, RequestError};
pub use handler::{Handler, HandlerError, HandlerRegistry, ReceivedMessage, ReplyError};
pub use session::{RuleChanges, Session, SessionError};
pub use table::{AssociationTable, SessionTable, TableError};
