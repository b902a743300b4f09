use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::fmt;

use crate::{parse_ies, Error, Ie, IeType};

/// PFCP message type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MessageType(pub u8);

impl MessageType {
    pub const HEARTBEAT_REQUEST: Self = Self(1);
    pub const HEARTBEAT_RESPONSE: Self = Self(2);
    pub const PFD_MANAGEMENT_REQUEST: Self = Self(3);
    pub const PFD_MANAGEMENT_RESPONSE: Self = Self(4);
    pub const ASSOCIATION_SETUP_REQUEST: Self = Self(5);
    pub const ASSOCIATION_SETUP_RESPONSE: Self = Self(6);
    pub const ASSOCIATION_UPDATE_REQUEST: Self = Self(7);
    pub const ASSOCIATION_UPDATE_RESPONSE: Self = Self(8);
    pub const ASSOCIATION_RELEASE_REQUEST: Self = Self(9);
    pub const ASSOCIATION_RELEASE_RESPONSE: Self = Self(10);
    pub const VERSION_NOT_SUPPORTED_RESPONSE: Self = Self(11);
    pub const NODE_REPORT_REQUEST: Self = Self(12);
    pub const NODE_REPORT_RESPONSE: Self = Self(13);
    pub const SESSION_SET_DELETION_REQUEST: Self = Self(14);
    pub const SESSION_SET_DELETION_RESPONSE: Self = Self(15);
    pub const SESSION_ESTABLISHMENT_REQUEST: Self = Self(50);
    pub const SESSION_ESTABLISHMENT_RESPONSE: Self = Self(51);
    pub const SESSION_MODIFICATION_REQUEST: Self = Self(52);
    pub const SESSION_MODIFICATION_RESPONSE: Self = Self(53);
    pub const SESSION_DELETION_REQUEST: Self = Self(54);
    pub const SESSION_DELETION_RESPONSE: Self = Self(55);
    pub const SESSION_REPORT_REQUEST: Self = Self(56);
    pub const SESSION_REPORT_RESPONSE: Self = Self(57);

    pub fn is_request(self) -> bool {
        matches!(self.0, 1 | 3 | 5 | 7 | 9 | 12 | 14 | 50 | 52 | 54 | 56)
    }

    pub fn is_response(self) -> bool {
        matches!(self.0, 2 | 4 | 6 | 8 | 10 | 11 | 13 | 15 | 51 | 53 | 55 | 57)
    }

    /// Session related messages always carry a SEID in their header.
    pub fn is_session_related(self) -> bool {
        self.0 >= 50
    }

    /// Returns the response type answering this request type.
    pub fn response_type(self) -> Option<Self> {
        self.is_request().then(|| Self(self.0 + 1))
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Storage for the IEs of a message body: a single optional IE or a repeated one.
trait Slot {
    /// Stores the IE, handing it back if the slot cannot take it.
    fn store(&mut self, ie: Ie) -> Option<Ie>;

    fn visit(&self, f: &mut dyn FnMut(&Ie));
}

impl Slot for Option<Ie> {
    fn store(&mut self, ie: Ie) -> Option<Ie> {
        if self.is_some() {
            return Some(ie);
        }
        *self = Some(ie);
        None
    }

    fn visit(&self, f: &mut dyn FnMut(&Ie)) {
        if let Some(ie) = self {
            f(ie);
        }
    }
}

impl Slot for Vec<Ie> {
    fn store(&mut self, ie: Ie) -> Option<Ie> {
        self.push(ie);
        None
    }

    fn visit(&self, f: &mut dyn FnMut(&Ie)) {
        self.iter().for_each(f);
    }
}

macro_rules! message_body {
    (
        $(#[$meta:meta])*
        pub struct $name:ident {
            $( $field:ident: $ty:ty = $ie:expr, )*
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Default, PartialEq, Eq)]
        pub struct $name {
            $( pub $field: $ty, )*
            /// IEs without a dedicated field, kept in arrival order.
            pub additional: Vec<Ie>,
        }

        impl $name {
            fn from_ies(ies: Vec<Ie>) -> Self {
                let mut body = Self::default();
                'ies: for mut ie in ies {
                    $(
                        if ie.ie_type() == $ie {
                            match Slot::store(&mut body.$field, ie) {
                                None => continue 'ies,
                                Some(duplicate) => ie = duplicate,
                            }
                        }
                    )*
                    body.additional.push(ie);
                }
                body
            }

            /// Visits every IE of this body in encoding order.
            pub fn for_each_ie(&self, mut f: impl FnMut(&Ie)) {
                $( Slot::visit(&self.$field, &mut f); )*
                self.additional.iter().for_each(f);
            }
        }
    };
}

message_body! {
    pub struct HeartbeatRequest {
        recovery_time_stamp: Option<Ie> = IeType::RECOVERY_TIME_STAMP,
    }
}

message_body! {
    pub struct HeartbeatResponse {
        recovery_time_stamp: Option<Ie> = IeType::RECOVERY_TIME_STAMP,
    }
}

message_body! {
    pub struct AssociationSetupRequest {
        node_id: Option<Ie> = IeType::NODE_ID,
        recovery_time_stamp: Option<Ie> = IeType::RECOVERY_TIME_STAMP,
    }
}

message_body! {
    pub struct AssociationSetupResponse {
        node_id: Option<Ie> = IeType::NODE_ID,
        cause: Option<Ie> = IeType::CAUSE,
        recovery_time_stamp: Option<Ie> = IeType::RECOVERY_TIME_STAMP,
    }
}

message_body! {
    pub struct SessionEstablishmentRequest {
        node_id: Option<Ie> = IeType::NODE_ID,
        cp_f_seid: Option<Ie> = IeType::F_SEID,
        create_pdr: Vec<Ie> = IeType::CREATE_PDR,
        create_far: Vec<Ie> = IeType::CREATE_FAR,
    }
}

message_body! {
    pub struct SessionEstablishmentResponse {
        node_id: Option<Ie> = IeType::NODE_ID,
        cause: Option<Ie> = IeType::CAUSE,
        offending_ie: Option<Ie> = IeType::OFFENDING_IE,
        up_f_seid: Option<Ie> = IeType::F_SEID,
    }
}

message_body! {
    pub struct SessionModificationRequest {
        cp_f_seid: Option<Ie> = IeType::F_SEID,
        create_pdr: Vec<Ie> = IeType::CREATE_PDR,
        create_far: Vec<Ie> = IeType::CREATE_FAR,
        update_pdr: Vec<Ie> = IeType::UPDATE_PDR,
        update_far: Vec<Ie> = IeType::UPDATE_FAR,
    }
}

message_body! {
    pub struct SessionModificationResponse {
        cause: Option<Ie> = IeType::CAUSE,
        offending_ie: Option<Ie> = IeType::OFFENDING_IE,
    }
}

/// A message type without a dedicated body, carried as raw IEs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Generic {
    pub message_type: MessageType,
    pub ies: Vec<Ie>,
}

/// The typed body of a PFCP message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Body {
    HeartbeatRequest(HeartbeatRequest),
    HeartbeatResponse(HeartbeatResponse),
    AssociationSetupRequest(AssociationSetupRequest),
    AssociationSetupResponse(AssociationSetupResponse),
    SessionEstablishmentRequest(SessionEstablishmentRequest),
    SessionEstablishmentResponse(SessionEstablishmentResponse),
    SessionModificationRequest(SessionModificationRequest),
    SessionModificationResponse(SessionModificationResponse),
    Generic(Generic),
}

impl Body {
    fn from_ies(message_type: MessageType, ies: Vec<Ie>) -> Self {
        match message_type {
            MessageType::HEARTBEAT_REQUEST => Self::HeartbeatRequest(HeartbeatRequest::from_ies(ies)),
            MessageType::HEARTBEAT_RESPONSE => {
                Self::HeartbeatResponse(HeartbeatResponse::from_ies(ies))
            }
            MessageType::ASSOCIATION_SETUP_REQUEST => {
                Self::AssociationSetupRequest(AssociationSetupRequest::from_ies(ies))
            }
            MessageType::ASSOCIATION_SETUP_RESPONSE => {
                Self::AssociationSetupResponse(AssociationSetupResponse::from_ies(ies))
            }
            MessageType::SESSION_ESTABLISHMENT_REQUEST => {
                Self::SessionEstablishmentRequest(SessionEstablishmentRequest::from_ies(ies))
            }
            MessageType::SESSION_ESTABLISHMENT_RESPONSE => {
                Self::SessionEstablishmentResponse(SessionEstablishmentResponse::from_ies(ies))
            }
            MessageType::SESSION_MODIFICATION_REQUEST => {
                Self::SessionModificationRequest(SessionModificationRequest::from_ies(ies))
            }
            MessageType::SESSION_MODIFICATION_RESPONSE => {
                Self::SessionModificationResponse(SessionModificationResponse::from_ies(ies))
            }
            message_type => {
                tracing::trace!(%message_type, ies = ies.len(), "no typed body for message type");
                Self::Generic(Generic { message_type, ies })
            }
        }
    }

    pub fn message_type(&self) -> MessageType {
        match self {
            Self::HeartbeatRequest(_) => MessageType::HEARTBEAT_REQUEST,
            Self::HeartbeatResponse(_) => MessageType::HEARTBEAT_RESPONSE,
            Self::AssociationSetupRequest(_) => MessageType::ASSOCIATION_SETUP_REQUEST,
            Self::AssociationSetupResponse(_) => MessageType::ASSOCIATION_SETUP_RESPONSE,
            Self::SessionEstablishmentRequest(_) => MessageType::SESSION_ESTABLISHMENT_REQUEST,
            Self::SessionEstablishmentResponse(_) => MessageType::SESSION_ESTABLISHMENT_RESPONSE,
            Self::SessionModificationRequest(_) => MessageType::SESSION_MODIFICATION_REQUEST,
            Self::SessionModificationResponse(_) => MessageType::SESSION_MODIFICATION_RESPONSE,
            Self::Generic(generic) => generic.message_type,
        }
    }

    pub fn for_each_ie(&self, f: impl FnMut(&Ie)) {
        match self {
            Self::HeartbeatRequest(body) => body.for_each_ie(f),
            Self::HeartbeatResponse(body) => body.for_each_ie(f),
            Self::AssociationSetupRequest(body) => body.for_each_ie(f),
            Self::AssociationSetupResponse(body) => body.for_each_ie(f),
            Self::SessionEstablishmentRequest(body) => body.for_each_ie(f),
            Self::SessionEstablishmentResponse(body) => body.for_each_ie(f),
            Self::SessionModificationRequest(body) => body.for_each_ie(f),
            Self::SessionModificationResponse(body) => body.for_each_ie(f),
            Self::Generic(generic) => generic.ies.iter().for_each(f),
        }
    }
}

macro_rules! impl_from_body {
    ($($variant:ident),* $(,)?) => {
        $(
            impl From<$variant> for Body {
                fn from(body: $variant) -> Self {
                    Self::$variant(body)
                }
            }
        )*
    };
}

impl_from_body!(
    HeartbeatRequest,
    HeartbeatResponse,
    AssociationSetupRequest,
    AssociationSetupResponse,
    SessionEstablishmentRequest,
    SessionEstablishmentResponse,
    SessionModificationRequest,
    SessionModificationResponse,
    Generic,
);

/// A complete PFCP message: header fields plus typed body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    seid: Option<u64>,
    sequence: u32,
    body: Body,
}

impl Message {
    const VERSION: u8 = 1;
    const FLAG_S: u8 = 0x01;

    /// Creates a message. Session related messages get a zero SEID, which is what a
    /// Session Establishment Request carries.
    pub fn new(sequence: u32, body: impl Into<Body>) -> Self {
        let body = body.into();
        let seid = body.message_type().is_session_related().then_some(0);
        Self { seid, sequence: sequence & pfcp_common::constants::MAX_SEQUENCE, body }
    }

    /// Creates a session related message addressed to the given SEID.
    pub fn with_seid(sequence: u32, seid: u64, body: impl Into<Body>) -> Self {
        Self { seid: Some(seid), ..Self::new(sequence, body) }
    }

    pub fn message_type(&self) -> MessageType {
        self.body.message_type()
    }

    pub fn sequence(&self) -> u32 {
        self.sequence
    }

    pub fn seid(&self) -> Option<u64> {
        self.seid
    }

    pub fn body(&self) -> &Body {
        &self.body
    }

    pub fn into_body(self) -> Body {
        self.body
    }

    fn header_len(&self) -> usize {
        if self.seid.is_some() {
            16
        } else {
            8
        }
    }

    /// Returns the length of the encoded message in bytes.
    pub fn encoded_len(&self) -> usize {
        let mut len = self.header_len();
        self.body.for_each_ie(|ie| len += ie.encoded_len());
        len
    }

    /// Writes the message to `dst`. Fails without writing anything when the message does not
    /// fit the 16-bit length field.
    pub fn encode(&self, dst: &mut BytesMut) -> Result<(), Error> {
        let len = self.encoded_len();
        let Ok(length) = u16::try_from(len - 4) else {
            return Err(Error::Oversize(len));
        };
        dst.reserve(len);

        let mut flags = Self::VERSION << 5;
        if self.seid.is_some() {
            flags |= Self::FLAG_S;
        }
        dst.put_u8(flags);
        dst.put_u8(self.message_type().0);
        dst.put_u16(length);
        if let Some(seid) = self.seid {
            dst.put_u64(seid);
        }
        // 24-bit sequence number followed by a spare octet.
        dst.put_u32(self.sequence << 8);

        self.body.for_each_ie(|ie| ie.encode(dst));
        Ok(())
    }

    /// Decodes one message from the start of a datagram. Octets past the declared message
    /// length are ignored.
    pub fn decode(mut src: Bytes) -> Result<Self, Error> {
        if src.len() < 8 {
            return Err(Error::Truncated { expected: 8, actual: src.len() });
        }

        let flags = src.get_u8();
        let version = flags >> 5;
        if version != Self::VERSION {
            return Err(Error::Version(version));
        }
        let message_type = MessageType(src.get_u8());
        let length = src.get_u16() as usize;
        if src.len() < length {
            return Err(Error::Truncated { expected: length + 4, actual: src.len() + 4 });
        }
        let mut src = src.split_to(length);

        let seid = if flags & Self::FLAG_S != 0 {
            if src.len() < 12 {
                return Err(Error::Truncated { expected: 16, actual: src.len() + 4 });
            }
            Some(src.get_u64())
        } else {
            None
        };
        if src.len() < 4 {
            return Err(Error::Truncated { expected: 8, actual: src.len() + 4 });
        }
        let sequence = src.get_u32() >> 8;

        let ies = parse_ies(src)?;
        Ok(Self { seid, sequence, body: Body::from_ies(message_type, ies) })
    }
}
