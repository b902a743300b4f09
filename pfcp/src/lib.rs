#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]

pub use pfcp_common::constants;
pub use pfcp_node::*;
pub use pfcp_wire as wire;
pub use pfcp_wire::{rules, Cause, FSeid, Ie, IeType, Message, MessageType, NodeId};
