use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::{
    fmt,
    net::{IpAddr, Ipv4Addr, Ipv6Addr},
    str::FromStr,
};
use thiserror::Error;

use crate::Cause;

/// Length of the type and length fields preceding every IE payload.
pub const IE_HEADER_LEN: usize = 4;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IeError {
    /// The payload ended before all mandatory fields were read.
    #[error("IE {0} is truncated")]
    Truncated(IeType),
    /// The payload has the right size but its content is invalid.
    #[error("IE {0} is malformed: {1}")]
    Malformed(IeType, &'static str),
    #[error("expected IE {expected}, found {found}")]
    UnexpectedType { expected: IeType, found: IeType },
}

impl IeError {
    /// Returns the cause a peer should receive when this IE was mandatory.
    pub fn cause(&self) -> Cause {
        match self {
            Self::Truncated(_) => Cause::InvalidLength,
            Self::Malformed(..) | Self::UnexpectedType { .. } => Cause::MandatoryIeIncorrect,
        }
    }

    /// Returns the type of the offending IE.
    pub fn ie_type(&self) -> IeType {
        match self {
            Self::Truncated(t) | Self::Malformed(t, _) => *t,
            Self::UnexpectedType { found, .. } => *found,
        }
    }
}

/// Information element type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct IeType(pub u16);

impl IeType {
    pub const CREATE_PDR: Self = Self(1);
    pub const PDI: Self = Self(2);
    pub const CREATE_FAR: Self = Self(3);
    pub const FORWARDING_PARAMETERS: Self = Self(4);
    pub const UPDATE_PDR: Self = Self(9);
    pub const UPDATE_FAR: Self = Self(10);
    pub const UPDATE_FORWARDING_PARAMETERS: Self = Self(11);
    pub const CAUSE: Self = Self(19);
    pub const SOURCE_INTERFACE: Self = Self(20);
    pub const F_TEID: Self = Self(21);
    pub const NETWORK_INSTANCE: Self = Self(22);
    pub const PRECEDENCE: Self = Self(29);
    pub const OFFENDING_IE: Self = Self(40);
    pub const DESTINATION_INTERFACE: Self = Self(42);
    pub const APPLY_ACTION: Self = Self(44);
    pub const PDR_ID: Self = Self(56);
    pub const F_SEID: Self = Self(57);
    pub const NODE_ID: Self = Self(60);
    pub const OUTER_HEADER_CREATION: Self = Self(84);
    pub const UE_IP_ADDRESS: Self = Self(93);
    pub const OUTER_HEADER_REMOVAL: Self = Self(95);
    pub const RECOVERY_TIME_STAMP: Self = Self(96);
    pub const FAR_ID: Self = Self(108);

    fn name(self) -> Option<&'static str> {
        let name = match self {
            Self::CREATE_PDR => "Create PDR",
            Self::PDI => "PDI",
            Self::CREATE_FAR => "Create FAR",
            Self::FORWARDING_PARAMETERS => "Forwarding Parameters",
            Self::UPDATE_PDR => "Update PDR",
            Self::UPDATE_FAR => "Update FAR",
            Self::UPDATE_FORWARDING_PARAMETERS => "Update Forwarding Parameters",
            Self::CAUSE => "Cause",
            Self::SOURCE_INTERFACE => "Source Interface",
            Self::PRECEDENCE => "Precedence",
            Self::OFFENDING_IE => "Offending IE",
            Self::APPLY_ACTION => "Apply Action",
            Self::PDR_ID => "PDR ID",
            Self::F_SEID => "F-SEID",
            Self::NODE_ID => "Node ID",
            Self::OUTER_HEADER_REMOVAL => "Outer Header Removal",
            Self::RECOVERY_TIME_STAMP => "Recovery Time Stamp",
            Self::FAR_ID => "FAR ID",
            _ => return None,
        };
        Some(name)
    }
}

impl fmt::Display for IeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => write!(f, "{name} ({})", self.0),
            None => write!(f, "{}", self.0),
        }
    }
}

/// A type-length-value information element.
///
/// The payload is kept undecoded; typed accessors such as [`Ie::f_seid`] parse it on demand, so
/// a message with a broken IE still decodes and the receiver can answer with a precise cause.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ie {
    ie_type: IeType,
    payload: Bytes,
}

impl Ie {
    pub fn new(ie_type: IeType, payload: impl Into<Bytes>) -> Self {
        Self { ie_type, payload: payload.into() }
    }

    /// Builds a grouped IE from its children.
    pub fn new_grouped<'a>(ie_type: IeType, children: impl IntoIterator<Item = &'a Ie>) -> Self {
        let mut buf = BytesMut::new();
        for child in children {
            child.encode(&mut buf);
        }
        Self::new(ie_type, buf.freeze())
    }

    /// Fails on an FQDN with an empty label or a label longer than 63 octets.
    pub fn new_node_id(node_id: &NodeId) -> Result<Self, IeError> {
        let mut buf = BytesMut::new();
        match node_id {
            NodeId::Ipv4(ip) => {
                buf.put_u8(NodeId::TYPE_IPV4);
                buf.put_slice(&ip.octets());
            }
            NodeId::Ipv6(ip) => {
                buf.put_u8(NodeId::TYPE_IPV6);
                buf.put_slice(&ip.octets());
            }
            NodeId::Fqdn(name) => {
                buf.put_u8(NodeId::TYPE_FQDN);
                for label in name.trim_end_matches('.').split('.') {
                    if label.is_empty() || label.len() > NodeId::MAX_LABEL_LEN {
                        return Err(IeError::Malformed(
                            IeType::NODE_ID,
                            "FQDN label must be 1 to 63 octets",
                        ));
                    }
                    buf.put_u8(label.len() as u8);
                    buf.put_slice(label.as_bytes());
                }
            }
        }
        Ok(Self::new(IeType::NODE_ID, buf.freeze()))
    }

    pub fn new_f_seid(f_seid: &FSeid) -> Self {
        let mut buf = BytesMut::with_capacity(25);
        let mut flags = 0;
        if f_seid.ipv4.is_some() {
            flags |= FSeid::FLAG_V4;
        }
        if f_seid.ipv6.is_some() {
            flags |= FSeid::FLAG_V6;
        }
        buf.put_u8(flags);
        buf.put_u64(f_seid.seid);
        if let Some(ip) = f_seid.ipv4 {
            buf.put_slice(&ip.octets());
        }
        if let Some(ip) = f_seid.ipv6 {
            buf.put_slice(&ip.octets());
        }
        Self::new(IeType::F_SEID, buf.freeze())
    }

    pub fn new_cause(cause: Cause) -> Self {
        Self::new(IeType::CAUSE, vec![cause as u8])
    }

    pub fn new_offending_ie(offending: IeType) -> Self {
        Self::new(IeType::OFFENDING_IE, offending.0.to_be_bytes().to_vec())
    }

    /// Recovery Time Stamp, in seconds since the NTP era origin.
    pub fn new_recovery_time_stamp(ntp_seconds: u32) -> Self {
        Self::new(IeType::RECOVERY_TIME_STAMP, ntp_seconds.to_be_bytes().to_vec())
    }

    pub fn new_pdr_id(id: u16) -> Self {
        Self::new(IeType::PDR_ID, id.to_be_bytes().to_vec())
    }

    pub fn new_precedence(precedence: u32) -> Self {
        Self::new(IeType::PRECEDENCE, precedence.to_be_bytes().to_vec())
    }

    pub fn new_far_id(id: u32) -> Self {
        Self::new(IeType::FAR_ID, id.to_be_bytes().to_vec())
    }

    pub fn ie_type(&self) -> IeType {
        self.ie_type
    }

    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    /// Returns the length of the encoded IE in bytes, header included.
    pub fn encoded_len(&self) -> usize {
        IE_HEADER_LEN + self.payload.len()
    }

    pub fn encode(&self, dst: &mut BytesMut) {
        dst.reserve(self.encoded_len());
        dst.put_u16(self.ie_type.0);
        dst.put_u16(self.payload.len() as u16);
        dst.put_slice(&self.payload);
    }

    /// Parses the payload of a grouped IE into its children.
    pub fn children(&self) -> Result<Vec<Ie>, IeError> {
        parse_ies(self.payload.clone()).map_err(|_| IeError::Truncated(self.ie_type))
    }

    pub fn node_id(&self) -> Result<NodeId, IeError> {
        let mut buf = self.expect(IeType::NODE_ID, 1)?;
        match buf.get_u8() & 0x0f {
            NodeId::TYPE_IPV4 => {
                let octets: [u8; 4] = take(&mut buf, IeType::NODE_ID)?;
                Ok(NodeId::Ipv4(Ipv4Addr::from(octets)))
            }
            NodeId::TYPE_IPV6 => {
                let octets: [u8; 16] = take(&mut buf, IeType::NODE_ID)?;
                Ok(NodeId::Ipv6(Ipv6Addr::from(octets)))
            }
            NodeId::TYPE_FQDN => {
                let mut labels = Vec::new();
                while buf.has_remaining() {
                    let len = buf.get_u8() as usize;
                    if len == 0 || len > buf.remaining() {
                        return Err(IeError::Malformed(IeType::NODE_ID, "invalid FQDN label"));
                    }
                    let label = buf.split_to(len);
                    let label = std::str::from_utf8(&label)
                        .map_err(|_| IeError::Malformed(IeType::NODE_ID, "FQDN is not UTF-8"))?;
                    labels.push(label.to_owned());
                }
                if labels.is_empty() {
                    return Err(IeError::Truncated(IeType::NODE_ID));
                }
                Ok(NodeId::Fqdn(labels.join(".")))
            }
            _ => Err(IeError::Malformed(IeType::NODE_ID, "unknown node ID type")),
        }
    }

    pub fn f_seid(&self) -> Result<FSeid, IeError> {
        let mut buf = self.expect(IeType::F_SEID, 9)?;
        let flags = buf.get_u8();
        let seid = buf.get_u64();
        let ipv4 = if flags & FSeid::FLAG_V4 != 0 {
            Some(Ipv4Addr::from(take::<4>(&mut buf, IeType::F_SEID)?))
        } else {
            None
        };
        let ipv6 = if flags & FSeid::FLAG_V6 != 0 {
            Some(Ipv6Addr::from(take::<16>(&mut buf, IeType::F_SEID)?))
        } else {
            None
        };
        Ok(FSeid { seid, ipv4, ipv6 })
    }

    pub fn cause(&self) -> Result<Cause, IeError> {
        let mut buf = self.expect(IeType::CAUSE, 1)?;
        Cause::try_from(buf.get_u8()).map_err(|_| IeError::Malformed(IeType::CAUSE, "unknown cause"))
    }

    pub fn offending_ie(&self) -> Result<IeType, IeError> {
        let mut buf = self.expect(IeType::OFFENDING_IE, 2)?;
        Ok(IeType(buf.get_u16()))
    }

    pub fn recovery_time_stamp(&self) -> Result<u32, IeError> {
        let mut buf = self.expect(IeType::RECOVERY_TIME_STAMP, 4)?;
        Ok(buf.get_u32())
    }

    pub fn pdr_id(&self) -> Result<u16, IeError> {
        let mut buf = self.expect(IeType::PDR_ID, 2)?;
        Ok(buf.get_u16())
    }

    pub fn precedence(&self) -> Result<u32, IeError> {
        let mut buf = self.expect(IeType::PRECEDENCE, 4)?;
        Ok(buf.get_u32())
    }

    pub fn far_id(&self) -> Result<u32, IeError> {
        let mut buf = self.expect(IeType::FAR_ID, 4)?;
        Ok(buf.get_u32())
    }

    /// Checks the IE type and minimum payload length, returning a cursor over the payload.
    fn expect(&self, expected: IeType, min_len: usize) -> Result<Bytes, IeError> {
        if self.ie_type != expected {
            return Err(IeError::UnexpectedType { expected, found: self.ie_type });
        }
        if self.payload.len() < min_len {
            return Err(IeError::Truncated(expected));
        }
        Ok(self.payload.clone())
    }
}

fn take<const N: usize>(buf: &mut Bytes, ie_type: IeType) -> Result<[u8; N], IeError> {
    if buf.remaining() < N {
        return Err(IeError::Truncated(ie_type));
    }
    let mut out = [0u8; N];
    buf.copy_to_slice(&mut out);
    Ok(out)
}

/// Splits a buffer into consecutive IEs.
pub fn parse_ies(mut buf: Bytes) -> Result<Vec<Ie>, IeError> {
    let mut ies = Vec::new();
    while buf.has_remaining() {
        if buf.remaining() < IE_HEADER_LEN {
            return Err(IeError::Truncated(IeType(0)));
        }
        let ie_type = IeType(buf.get_u16());
        let len = buf.get_u16() as usize;
        if buf.remaining() < len {
            return Err(IeError::Truncated(ie_type));
        }
        ies.push(Ie { ie_type, payload: buf.split_to(len) });
    }
    Ok(ies)
}

/// Identity of a PFCP node.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum NodeId {
    Ipv4(Ipv4Addr),
    Ipv6(Ipv6Addr),
    Fqdn(String),
}

impl NodeId {
    const TYPE_IPV4: u8 = 0;
    const TYPE_IPV6: u8 = 1;
    const TYPE_FQDN: u8 = 2;
    const MAX_LABEL_LEN: usize = 63;

    /// Returns the address if this identity is not an FQDN.
    pub fn ip(&self) -> Option<IpAddr> {
        match self {
            Self::Ipv4(ip) => Some(IpAddr::V4(*ip)),
            Self::Ipv6(ip) => Some(IpAddr::V6(*ip)),
            Self::Fqdn(_) => None,
        }
    }
}

impl From<IpAddr> for NodeId {
    fn from(ip: IpAddr) -> Self {
        match ip {
            IpAddr::V4(ip) => Self::Ipv4(ip),
            IpAddr::V6(ip) => match ip.to_ipv4_mapped() {
                Some(v4) => Self::Ipv4(v4),
                None => Self::Ipv6(ip),
            },
        }
    }
}

impl FromStr for NodeId {
    type Err = std::convert::Infallible;

    /// Anything that does not parse as an IP address is taken to be an FQDN.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.parse::<IpAddr>() {
            Ok(ip) => Self::from(ip),
            Err(_) => Self::Fqdn(s.to_owned()),
        })
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ipv4(ip) => ip.fmt(f),
            Self::Ipv6(ip) => ip.fmt(f),
            Self::Fqdn(name) => f.write_str(name),
        }
    }
}

/// Fully qualified session endpoint identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FSeid {
    pub seid: u64,
    pub ipv4: Option<Ipv4Addr>,
    pub ipv6: Option<Ipv6Addr>,
}

impl FSeid {
    const FLAG_V6: u8 = 0x01;
    const FLAG_V4: u8 = 0x02;

    pub fn new(seid: u64, ip: IpAddr) -> Self {
        match ip {
            IpAddr::V4(v4) => Self { seid, ipv4: Some(v4), ipv6: None },
            IpAddr::V6(v6) => Self { seid, ipv4: None, ipv6: Some(v6) },
        }
    }

    /// Returns the address, preferring IPv6 when both families are set.
    pub fn ip(&self) -> Option<IpAddr> {
        self.ipv6.map(IpAddr::V6).or(self.ipv4.map(IpAddr::V4))
    }
}
