//! PFCP Types
//!
//! Scalar information elements and protocol constants (3GPP TS 29.244
//! Section 8.2). Every IE value type encodes only its value part; the
//! type/length header is written by the enclosing grouped IE or message.

use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};

use bytes::{Buf, BufMut, Bytes, BytesMut};
use crate::error::{PfcpError, PfcpResult};
use crate::ie::{ensure_len, fqdn_decode, fqdn_encode};

/// PFCP Version
pub const PFCP_VERSION: u8 = 1;

/// PFCP UDP port (8805)
pub const PFCP_UDP_PORT: u16 = 8805;

/// PFCP bitrate length (5 bytes uplink + 5 bytes downlink)
pub const PFCP_BITRATE_LEN: usize = 10;

/// PFCP Cause Values (TS 29.244 Section 8.2.1)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PfcpCause {
    RequestAccepted = 1,
    RequestRejected = 64,
    SessionContextNotFound = 65,
    MandatoryIeMissing = 66,
    ConditionalIeMissing = 67,
    InvalidLength = 68,
    MandatoryIeIncorrect = 69,
    InvalidForwardingPolicy = 70,
    InvalidFTeidAllocationOption = 71,
    NoEstablishedPfcpAssociation = 72,
    RuleCreationModificationFailure = 73,
    PfcpEntityInCongestion = 74,
    NoResourcesAvailable = 75,
    ServiceNotSupported = 76,
    SystemFailure = 77,
    AllDynamicAddressesAreOccupied = 79,
}

impl TryFrom<u8> for PfcpCause {
    type Error = PfcpError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Self::RequestAccepted),
            64 => Ok(Self::RequestRejected),
            65 => Ok(Self::SessionContextNotFound),
            66 => Ok(Self::MandatoryIeMissing),
            67 => Ok(Self::ConditionalIeMissing),
            68 => Ok(Self::InvalidLength),
            69 => Ok(Self::MandatoryIeIncorrect),
            70 => Ok(Self::InvalidForwardingPolicy),
            71 => Ok(Self::InvalidFTeidAllocationOption),
            72 => Ok(Self::NoEstablishedPfcpAssociation),
            73 => Ok(Self::RuleCreationModificationFailure),
            74 => Ok(Self::PfcpEntityInCongestion),
            75 => Ok(Self::NoResourcesAvailable),
            76 => Ok(Self::ServiceNotSupported),
            77 => Ok(Self::SystemFailure),
            79 => Ok(Self::AllDynamicAddressesAreOccupied),
            _ => Err(PfcpError::InvalidCause(value)),
        }
    }
}

impl PfcpCause {
    /// Get the name of the cause
    pub fn name(&self) -> &'static str {
        match self {
            Self::RequestAccepted => "Request Accepted",
            Self::RequestRejected => "Request Rejected",
            Self::SessionContextNotFound => "Session Context Not Found",
            Self::MandatoryIeMissing => "Mandatory IE Missing",
            Self::ConditionalIeMissing => "Conditional IE Missing",
            Self::InvalidLength => "Invalid Length",
            Self::MandatoryIeIncorrect => "Mandatory IE Incorrect",
            Self::InvalidForwardingPolicy => "Invalid Forwarding Policy",
            Self::InvalidFTeidAllocationOption => "Invalid F-TEID Allocation Option",
            Self::NoEstablishedPfcpAssociation => "No Established PFCP Association",
            Self::RuleCreationModificationFailure => "Rule Creation/Modification Failure",
            Self::PfcpEntityInCongestion => "PFCP Entity in Congestion",
            Self::NoResourcesAvailable => "No Resources Available",
            Self::ServiceNotSupported => "Service Not Supported",
            Self::SystemFailure => "System Failure",
            Self::AllDynamicAddressesAreOccupied => "All Dynamic Addresses Are Occupied",
        }
    }

    /// Check if cause indicates success
    pub fn is_success(&self) -> bool {
        matches!(self, Self::RequestAccepted)
    }
}

/// GTPv2-C cause values reported towards the UE-facing side
pub mod gtp_cause {
    pub const REQUEST_ACCEPTED: u8 = 16;
    pub const CONTEXT_NOT_FOUND: u8 = 64;
    pub const INVALID_MESSAGE_FORMAT: u8 = 65;
    pub const INVALID_LENGTH: u8 = 67;
    pub const SERVICE_NOT_SUPPORTED: u8 = 68;
    pub const MANDATORY_IE_INCORRECT: u8 = 69;
    pub const MANDATORY_IE_MISSING: u8 = 70;
    pub const SYSTEM_FAILURE: u8 = 72;
    pub const NO_RESOURCES_AVAILABLE: u8 = 73;
    pub const SEMANTIC_ERRORS_IN_PACKET_FILTER: u8 = 74;
    pub const ALL_DYNAMIC_ADDRESSES_ARE_OCCUPIED: u8 = 84;
    pub const REQUEST_REJECTED_REASON_NOT_SPECIFIED: u8 = 94;
    pub const REMOTE_PEER_NOT_RESPONDING: u8 = 100;
    pub const CONDITIONAL_IE_MISSING: u8 = 103;
    pub const GTP_C_ENTITY_CONGESTION: u8 = 120;
}

/// Translate a PFCP cause octet into the GTPv2-C cause sent upstream.
///
/// Unknown values map to System Failure.
pub fn gtp_cause_from_pfcp(cause: u8) -> u8 {
    let Ok(cause) = PfcpCause::try_from(cause) else {
        return gtp_cause::SYSTEM_FAILURE;
    };
    match cause {
        PfcpCause::RequestAccepted => gtp_cause::REQUEST_ACCEPTED,
        PfcpCause::RequestRejected => gtp_cause::REQUEST_REJECTED_REASON_NOT_SPECIFIED,
        PfcpCause::SessionContextNotFound => gtp_cause::CONTEXT_NOT_FOUND,
        PfcpCause::MandatoryIeMissing => gtp_cause::MANDATORY_IE_MISSING,
        PfcpCause::ConditionalIeMissing => gtp_cause::CONDITIONAL_IE_MISSING,
        PfcpCause::InvalidLength => gtp_cause::INVALID_LENGTH,
        PfcpCause::MandatoryIeIncorrect => gtp_cause::MANDATORY_IE_INCORRECT,
        PfcpCause::InvalidForwardingPolicy | PfcpCause::InvalidFTeidAllocationOption => {
            gtp_cause::INVALID_MESSAGE_FORMAT
        }
        PfcpCause::NoEstablishedPfcpAssociation => gtp_cause::REMOTE_PEER_NOT_RESPONDING,
        PfcpCause::RuleCreationModificationFailure => {
            gtp_cause::SEMANTIC_ERRORS_IN_PACKET_FILTER
        }
        PfcpCause::PfcpEntityInCongestion => gtp_cause::GTP_C_ENTITY_CONGESTION,
        PfcpCause::NoResourcesAvailable => gtp_cause::NO_RESOURCES_AVAILABLE,
        PfcpCause::ServiceNotSupported => gtp_cause::SERVICE_NOT_SUPPORTED,
        PfcpCause::SystemFailure => gtp_cause::SYSTEM_FAILURE,
        PfcpCause::AllDynamicAddressesAreOccupied => {
            gtp_cause::ALL_DYNAMIC_ADDRESSES_ARE_OCCUPIED
        }
    }
}

/// Source/Destination Interface values (TS 29.244 Section 8.2.2, 8.2.24)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum PfcpInterface {
    #[default]
    Access = 0,
    Core = 1,
    SgiLanN6Lan = 2,
    CpFunction = 3,
    LiFunction = 4,
}

impl TryFrom<u8> for PfcpInterface {
    type Error = PfcpError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value & 0x0f {
            0 => Ok(Self::Access),
            1 => Ok(Self::Core),
            2 => Ok(Self::SgiLanN6Lan),
            3 => Ok(Self::CpFunction),
            4 => Ok(Self::LiFunction),
            _ => Err(PfcpError::InvalidInterfaceType(value)),
        }
    }
}

/// Node ID (TS 29.244 Section 8.2.38)
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeId {
    Ipv4(Ipv4Addr),
    Ipv6(Ipv6Addr),
    Fqdn(String),
}

impl NodeId {
    /// Node ID for the local PFCP endpoint (ogs_pfcp_sockaddr_to_node_id).
    pub fn from_sockaddr(
        addr4: Option<SocketAddr>,
        addr6: Option<SocketAddr>,
        prefer_ipv4: bool,
    ) -> PfcpResult<Self> {
        let v4 = addr4.and_then(|a| match a {
            SocketAddr::V4(a) => Some(NodeId::Ipv4(*a.ip())),
            SocketAddr::V6(_) => None,
        });
        let v6 = addr6.and_then(|a| match a {
            SocketAddr::V6(a) => Some(NodeId::Ipv6(*a.ip())),
            SocketAddr::V4(_) => None,
        });
        let chosen = if prefer_ipv4 { v4.or(v6) } else { v6.or(v4) };
        chosen.ok_or(PfcpError::NoLocalAddress)
    }

    pub fn encode(&self, buf: &mut BytesMut) {
        match self {
            NodeId::Ipv4(addr) => {
                buf.put_u8(0);
                buf.put_slice(&addr.octets());
            }
            NodeId::Ipv6(addr) => {
                buf.put_u8(1);
                buf.put_slice(&addr.octets());
            }
            NodeId::Fqdn(name) => {
                buf.put_u8(2);
                buf.put_slice(&fqdn_encode(name));
            }
        }
    }

    pub fn decode(data: &[u8]) -> PfcpResult<Self> {
        ensure_len(data, 1)?;
        match data[0] & 0x0f {
            0 => {
                ensure_len(data, 5)?;
                Ok(NodeId::Ipv4(Ipv4Addr::new(data[1], data[2], data[3], data[4])))
            }
            1 => {
                ensure_len(data, 17)?;
                Ok(NodeId::Ipv6(ipv6_from(&data[1..17])))
            }
            2 => Ok(NodeId::Fqdn(fqdn_decode(&data[1..])?)),
            t => Err(PfcpError::InvalidNodeIdType(t)),
        }
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NodeId::Ipv4(a) => write!(f, "{}", a),
            NodeId::Ipv6(a) => write!(f, "{}", a),
            NodeId::Fqdn(n) => write!(f, "{}", n),
        }
    }
}

fn ipv6_from(data: &[u8]) -> Ipv6Addr {
    let mut octets = [0u8; 16];
    octets.copy_from_slice(&data[..16]);
    Ipv6Addr::from(octets)
}

fn ipv4_from(data: &[u8]) -> Ipv4Addr {
    Ipv4Addr::new(data[0], data[1], data[2], data[3])
}

/// F-SEID (TS 29.244 Section 8.2.37)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FSeid {
    pub seid: u64,
    pub ipv4: Option<Ipv4Addr>,
    pub ipv6: Option<Ipv6Addr>,
}

impl FSeid {
    /// F-SEID carrying every local address (ogs_pfcp_sockaddr_to_f_seid).
    pub fn from_sockaddr(
        seid: u64,
        addr4: Option<SocketAddr>,
        addr6: Option<SocketAddr>,
    ) -> PfcpResult<Self> {
        let ipv4 = addr4.and_then(|a| match a {
            SocketAddr::V4(a) => Some(*a.ip()),
            SocketAddr::V6(_) => None,
        });
        let ipv6 = addr6.and_then(|a| match a {
            SocketAddr::V6(a) => Some(*a.ip()),
            SocketAddr::V4(_) => None,
        });
        if ipv4.is_none() && ipv6.is_none() {
            return Err(PfcpError::NoLocalAddress);
        }
        Ok(FSeid { seid, ipv4, ipv6 })
    }

    pub fn encode(&self, buf: &mut BytesMut) {
        let mut flags = 0u8;
        if self.ipv6.is_some() { flags |= 0x01; }
        if self.ipv4.is_some() { flags |= 0x02; }
        buf.put_u8(flags);
        buf.put_u64(self.seid);
        if let Some(a) = self.ipv4 { buf.put_slice(&a.octets()); }
        if let Some(a) = self.ipv6 { buf.put_slice(&a.octets()); }
    }

    pub fn decode(data: &[u8]) -> PfcpResult<Self> {
        ensure_len(data, 9)?;
        let flags = data[0];
        let mut buf = Bytes::copy_from_slice(&data[1..]);
        let seid = buf.get_u64();
        let ipv4 = if flags & 0x02 != 0 {
            ensure_len(&buf, 4)?;
            let a = ipv4_from(&buf);
            buf.advance(4);
            Some(a)
        } else {
            None
        };
        let ipv6 = if flags & 0x01 != 0 {
            ensure_len(&buf, 16)?;
            Some(ipv6_from(&buf))
        } else {
            None
        };
        Ok(FSeid { seid, ipv4, ipv6 })
    }
}

/// F-TEID (TS 29.244 Section 8.2.3)
///
/// With `choose` set the peer allocates the tunnel endpoint: the TEID and
/// addresses are omitted on the wire and `ipv4`/`ipv6` only carry which
/// families are requested.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FTeid {
    pub teid: u32,
    pub ipv4: Option<Ipv4Addr>,
    pub ipv6: Option<Ipv6Addr>,
    pub choose: bool,
    pub choose_id: Option<u8>,
}

impl FTeid {
    pub fn new(teid: u32, ipv4: Option<Ipv4Addr>, ipv6: Option<Ipv6Addr>) -> Self {
        FTeid { teid, ipv4, ipv6, choose: false, choose_id: None }
    }

    /// CHOOSE request for the requested address families.
    pub fn choose(v4: bool, v6: bool, choose_id: Option<u8>) -> Self {
        FTeid {
            teid: 0,
            ipv4: v4.then_some(Ipv4Addr::UNSPECIFIED),
            ipv6: v6.then_some(Ipv6Addr::UNSPECIFIED),
            choose: true,
            choose_id,
        }
    }

    pub fn encode(&self, buf: &mut BytesMut) {
        let mut flags = 0u8;
        if self.ipv4.is_some() { flags |= 0x01; }
        if self.ipv6.is_some() { flags |= 0x02; }
        if self.choose {
            flags |= 0x04;
            if self.choose_id.is_some() { flags |= 0x08; }
            buf.put_u8(flags);
            if let Some(id) = self.choose_id { buf.put_u8(id); }
            return;
        }
        buf.put_u8(flags);
        buf.put_u32(self.teid);
        if let Some(a) = self.ipv4 { buf.put_slice(&a.octets()); }
        if let Some(a) = self.ipv6 { buf.put_slice(&a.octets()); }
    }

    pub fn decode(data: &[u8]) -> PfcpResult<Self> {
        ensure_len(data, 1)?;
        let flags = data[0];
        let v4 = flags & 0x01 != 0;
        let v6 = flags & 0x02 != 0;
        if flags & 0x04 != 0 {
            let choose_id = if flags & 0x08 != 0 {
                ensure_len(data, 2)?;
                Some(data[1])
            } else {
                None
            };
            return Ok(FTeid::choose(v4, v6, choose_id));
        }

        ensure_len(data, 5)?;
        let mut buf = Bytes::copy_from_slice(&data[1..]);
        let teid = buf.get_u32();
        let ipv4 = if v4 {
            ensure_len(&buf, 4)?;
            let a = ipv4_from(&buf);
            buf.advance(4);
            Some(a)
        } else {
            None
        };
        let ipv6 = if v6 {
            ensure_len(&buf, 16)?;
            Some(ipv6_from(&buf))
        } else {
            None
        };
        Ok(FTeid::new(teid, ipv4, ipv6))
    }
}

/// UE IP Address (TS 29.244 Section 8.2.62)
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UeIpAddress {
    pub ipv4: Option<Ipv4Addr>,
    pub ipv6: Option<Ipv6Addr>,
    /// S/D flag: the address is the destination address
    pub destination: bool,
}

impl UeIpAddress {
    pub fn encode(&self, buf: &mut BytesMut) {
        let mut flags = 0u8;
        if self.ipv6.is_some() { flags |= 0x01; }
        if self.ipv4.is_some() { flags |= 0x02; }
        if self.destination { flags |= 0x04; }
        buf.put_u8(flags);
        if let Some(a) = self.ipv4 { buf.put_slice(&a.octets()); }
        if let Some(a) = self.ipv6 { buf.put_slice(&a.octets()); }
    }

    pub fn decode(data: &[u8]) -> PfcpResult<Self> {
        ensure_len(data, 1)?;
        let flags = data[0];
        let mut rest = &data[1..];
        let ipv4 = if flags & 0x02 != 0 {
            ensure_len(rest, 4)?;
            let a = ipv4_from(rest);
            rest = &rest[4..];
            Some(a)
        } else {
            None
        };
        let ipv6 = if flags & 0x01 != 0 {
            ensure_len(rest, 16)?;
            Some(ipv6_from(rest))
        } else {
            None
        };
        Ok(UeIpAddress { ipv4, ipv6, destination: flags & 0x04 != 0 })
    }
}

/// Outer Header Creation for GTP-U/UDP (TS 29.244 Section 8.2.56)
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OuterHeaderCreation {
    pub teid: u32,
    pub ipv4: Option<Ipv4Addr>,
    pub ipv6: Option<Ipv6Addr>,
}

impl OuterHeaderCreation {
    pub const GTPU_UDP_IPV4: u16 = 0x0100;
    pub const GTPU_UDP_IPV6: u16 = 0x0200;

    pub fn description(&self) -> u16 {
        let mut desc = 0u16;
        if self.ipv4.is_some() { desc |= Self::GTPU_UDP_IPV4; }
        if self.ipv6.is_some() { desc |= Self::GTPU_UDP_IPV6; }
        desc
    }

    pub fn encode(&self, buf: &mut BytesMut) {
        buf.put_u16(self.description());
        buf.put_u32(self.teid);
        if let Some(a) = self.ipv4 { buf.put_slice(&a.octets()); }
        if let Some(a) = self.ipv6 { buf.put_slice(&a.octets()); }
    }

    pub fn decode(data: &[u8]) -> PfcpResult<Self> {
        ensure_len(data, 2)?;
        let desc = u16::from_be_bytes([data[0], data[1]]);
        if desc & (Self::GTPU_UDP_IPV4 | Self::GTPU_UDP_IPV6) == 0 {
            return Err(PfcpError::InvalidFormat(format!(
                "unsupported outer header creation 0x{:04x}",
                desc
            )));
        }
        ensure_len(data, 6)?;
        let teid = u32::from_be_bytes([data[2], data[3], data[4], data[5]]);
        let mut rest = &data[6..];
        let ipv4 = if desc & Self::GTPU_UDP_IPV4 != 0 {
            ensure_len(rest, 4)?;
            let a = ipv4_from(rest);
            rest = &rest[4..];
            Some(a)
        } else {
            None
        };
        let ipv6 = if desc & Self::GTPU_UDP_IPV6 != 0 {
            ensure_len(rest, 16)?;
            Some(ipv6_from(rest))
        } else {
            None
        };
        Ok(OuterHeaderCreation { teid, ipv4, ipv6 })
    }
}

/// Outer Header Removal description (TS 29.244 Section 8.2.64)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OuterHeaderRemoval(pub u8);

impl OuterHeaderRemoval {
    pub const GTPU_UDP_IPV4: u8 = 0;
    pub const GTPU_UDP_IPV6: u8 = 1;
    pub const UDP_IPV4: u8 = 2;
    pub const UDP_IPV6: u8 = 3;
    pub const IPV4: u8 = 4;
    pub const IPV6: u8 = 5;
    pub const GTPU_UDP_IP: u8 = 6;
}

/// SDF Filter carrying a flow description (TS 29.244 Section 8.2.5)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SdfFilter {
    pub flow_description: String,
}

impl SdfFilter {
    pub fn encode(&self, buf: &mut BytesMut) {
        buf.put_u8(0x01); // FD
        buf.put_u8(0);
        buf.put_u16(self.flow_description.len() as u16);
        buf.put_slice(self.flow_description.as_bytes());
    }

    pub fn decode(data: &[u8]) -> PfcpResult<Self> {
        ensure_len(data, 2)?;
        if data[0] & 0x01 == 0 {
            return Ok(SdfFilter { flow_description: String::new() });
        }
        ensure_len(data, 4)?;
        let len = u16::from_be_bytes([data[2], data[3]]) as usize;
        ensure_len(data, 4 + len)?;
        Ok(SdfFilter {
            flow_description: String::from_utf8_lossy(&data[4..4 + len]).into_owned(),
        })
    }
}

/// Gate Status (TS 29.244 Section 8.2.7)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GateStatus {
    pub ul_open: bool,
    pub dl_open: bool,
}

impl Default for GateStatus {
    fn default() -> Self {
        GateStatus { ul_open: true, dl_open: true }
    }
}

impl GateStatus {
    pub fn to_u8(self) -> u8 {
        ((!self.ul_open as u8) << 2) | (!self.dl_open as u8)
    }

    pub fn from_u8(value: u8) -> Self {
        GateStatus {
            ul_open: (value >> 2) & 0x03 == 0,
            dl_open: value & 0x03 == 0,
        }
    }
}

/// MBR/GBR in bits per second; kilobits on the wire (TS 29.244 Section 8.2.8)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Bitrate {
    pub uplink: u64,
    pub downlink: u64,
}

impl Bitrate {
    pub fn is_zero(&self) -> bool {
        self.uplink == 0 && self.downlink == 0
    }

    pub fn encode(&self, buf: &mut BytesMut) {
        buf.put_slice(&(self.uplink / 1000).to_be_bytes()[3..8]);
        buf.put_slice(&(self.downlink / 1000).to_be_bytes()[3..8]);
    }

    pub fn decode(data: &[u8]) -> PfcpResult<Self> {
        ensure_len(data, PFCP_BITRATE_LEN)?;
        let read40 = |d: &[u8]| {
            let mut b = [0u8; 8];
            b[3..8].copy_from_slice(&d[..5]);
            u64::from_be_bytes(b) * 1000
        };
        Ok(Bitrate {
            uplink: read40(&data[0..5]),
            downlink: read40(&data[5..10]),
        })
    }
}

/// Volume Threshold / Volume Quota (TS 29.244 Section 8.2.13, 8.2.50)
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Volume {
    pub total: Option<u64>,
    pub uplink: Option<u64>,
    pub downlink: Option<u64>,
}

impl Volume {
    pub fn is_empty(&self) -> bool {
        self.total.is_none() && self.uplink.is_none() && self.downlink.is_none()
    }

    pub fn encode(&self, buf: &mut BytesMut) {
        let mut flags = 0u8;
        if self.total.is_some() { flags |= 0x01; }
        if self.uplink.is_some() { flags |= 0x02; }
        if self.downlink.is_some() { flags |= 0x04; }
        buf.put_u8(flags);
        if let Some(v) = self.total { buf.put_u64(v); }
        if let Some(v) = self.uplink { buf.put_u64(v); }
        if let Some(v) = self.downlink { buf.put_u64(v); }
    }

    pub fn decode(data: &[u8]) -> PfcpResult<Self> {
        ensure_len(data, 1)?;
        let flags = data[0];
        let count = (flags & 0x07).count_ones() as usize;
        ensure_len(data, 1 + count * 8)?;
        let mut buf = Bytes::copy_from_slice(&data[1..]);
        let mut vol = Volume::default();
        if flags & 0x01 != 0 { vol.total = Some(buf.get_u64()); }
        if flags & 0x02 != 0 { vol.uplink = Some(buf.get_u64()); }
        if flags & 0x04 != 0 { vol.downlink = Some(buf.get_u64()); }
        Ok(vol)
    }
}

/// Volume Measurement (TS 29.244 Section 8.2.44)
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VolumeMeasurement {
    pub total_volume: Option<u64>,
    pub uplink_volume: Option<u64>,
    pub downlink_volume: Option<u64>,
    pub total_packets: Option<u64>,
    pub uplink_packets: Option<u64>,
    pub downlink_packets: Option<u64>,
}

impl VolumeMeasurement {
    fn fields(&self) -> [Option<u64>; 6] {
        [
            self.total_volume,
            self.uplink_volume,
            self.downlink_volume,
            self.total_packets,
            self.uplink_packets,
            self.downlink_packets,
        ]
    }

    pub fn is_empty(&self) -> bool {
        self.fields().iter().all(Option::is_none)
    }

    pub fn encode(&self, buf: &mut BytesMut) {
        let fields = self.fields();
        let flags = fields
            .iter()
            .enumerate()
            .filter(|(_, v)| v.is_some())
            .fold(0u8, |acc, (i, _)| acc | (1 << i));
        buf.put_u8(flags);
        for v in fields.iter().flatten() {
            buf.put_u64(*v);
        }
    }

    pub fn decode(data: &[u8]) -> PfcpResult<Self> {
        ensure_len(data, 1)?;
        let flags = data[0];
        let count = (flags & 0x3f).count_ones() as usize;
        ensure_len(data, 1 + count * 8)?;
        let mut buf = Bytes::copy_from_slice(&data[1..]);
        let mut next = |bit: u8| (flags & bit != 0).then(|| buf.get_u64());
        Ok(VolumeMeasurement {
            total_volume: next(0x01),
            uplink_volume: next(0x02),
            downlink_volume: next(0x04),
            total_packets: next(0x08),
            uplink_packets: next(0x10),
            downlink_packets: next(0x20),
        })
    }
}

/// Downlink Data Service Information (TS 29.244 Section 8.2.32)
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DownlinkDataServiceInformation {
    pub paging_policy_indication: Option<u8>,
    pub qfi: Option<u8>,
}

impl DownlinkDataServiceInformation {
    pub fn is_empty(&self) -> bool {
        self.paging_policy_indication.is_none() && self.qfi.is_none()
    }

    pub fn encode(&self, buf: &mut BytesMut) {
        let mut flags = 0u8;
        if self.paging_policy_indication.is_some() { flags |= 0x01; }
        if self.qfi.is_some() { flags |= 0x02; }
        buf.put_u8(flags);
        if let Some(ppi) = self.paging_policy_indication { buf.put_u8(ppi & 0x3f); }
        if let Some(qfi) = self.qfi { buf.put_u8(qfi & 0x3f); }
    }

    pub fn decode(data: &[u8]) -> PfcpResult<Self> {
        ensure_len(data, 1)?;
        let flags = data[0];
        let mut rest = data[1..].iter();
        let mut info = DownlinkDataServiceInformation::default();
        if flags & 0x01 != 0 {
            info.paging_policy_indication = Some(
                rest.next().ok_or(PfcpError::BufferTooShort { needed: 2, available: 1 })? & 0x3f,
            );
        }
        if flags & 0x02 != 0 {
            info.qfi = Some(
                rest.next().ok_or(PfcpError::BufferTooShort { needed: 3, available: 2 })? & 0x3f,
            );
        }
        Ok(info)
    }
}

/// User Plane IP Resource Information (TS 29.244 Section 8.2.82)
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UserPlaneIpResourceInformation {
    /// Number of TEID bits used for the range (0 = no range)
    pub teid_range_indication: u8,
    pub teid_range: u8,
    pub ipv4: Option<Ipv4Addr>,
    pub ipv6: Option<Ipv6Addr>,
    pub network_instance: Option<String>,
    pub source_interface: Option<PfcpInterface>,
}

impl UserPlaneIpResourceInformation {
    pub fn encode(&self, buf: &mut BytesMut) {
        let mut flags = 0u8;
        if self.ipv4.is_some() { flags |= 0x01; }
        if self.ipv6.is_some() { flags |= 0x02; }
        flags |= (self.teid_range_indication & 0x07) << 2;
        if self.network_instance.is_some() { flags |= 0x20; }
        if self.source_interface.is_some() { flags |= 0x40; }
        buf.put_u8(flags);
        if self.teid_range_indication != 0 { buf.put_u8(self.teid_range); }
        if let Some(a) = self.ipv4 { buf.put_slice(&a.octets()); }
        if let Some(a) = self.ipv6 { buf.put_slice(&a.octets()); }
        if let Some(ni) = &self.network_instance { buf.put_slice(ni.as_bytes()); }
        if let Some(si) = self.source_interface { buf.put_u8(si as u8); }
    }

    pub fn decode(data: &[u8]) -> PfcpResult<Self> {
        ensure_len(data, 1)?;
        let flags = data[0];
        let mut rest = &data[1..];
        let mut info = UserPlaneIpResourceInformation {
            teid_range_indication: (flags >> 2) & 0x07,
            ..Default::default()
        };
        if info.teid_range_indication != 0 {
            ensure_len(rest, 1)?;
            info.teid_range = rest[0];
            rest = &rest[1..];
        }
        if flags & 0x01 != 0 {
            ensure_len(rest, 4)?;
            info.ipv4 = Some(ipv4_from(rest));
            rest = &rest[4..];
        }
        if flags & 0x02 != 0 {
            ensure_len(rest, 16)?;
            info.ipv6 = Some(ipv6_from(rest));
            rest = &rest[16..];
        }
        if flags & 0x40 != 0 {
            let (&last, head) = rest
                .split_last()
                .ok_or(PfcpError::MissingMandatoryIe("Source Interface"))?;
            info.source_interface = Some(PfcpInterface::try_from(last)?);
            rest = head;
        }
        if flags & 0x20 != 0 {
            info.network_instance = Some(String::from_utf8_lossy(rest).into_owned());
        }
        Ok(info)
    }
}

/// UP Function Features, octets 5 and 6 (TS 29.244 Section 8.2.25)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpFunctionFeatures {
    pub octet5: u8,
    pub octet6: u8,
}

impl UpFunctionFeatures {
    pub const BUCP: u8 = 0x01;
    pub const DDND: u8 = 0x02;
    pub const DLBD: u8 = 0x04;
    pub const TRST: u8 = 0x08;
    pub const FTUP: u8 = 0x10;
    pub const EMPU: u8 = 0x01; // octet 6

    /// UP function allocates F-TEIDs itself
    pub fn ftup(&self) -> bool {
        self.octet5 & Self::FTUP != 0
    }

    pub fn encode(&self, buf: &mut BytesMut) {
        buf.put_u8(self.octet5);
        buf.put_u8(self.octet6);
    }

    pub fn decode(data: &[u8]) -> PfcpResult<Self> {
        ensure_len(data, 1)?;
        Ok(UpFunctionFeatures {
            octet5: data[0],
            octet6: data.get(1).copied().unwrap_or(0),
        })
    }
}

macro_rules! pfcp_flags {
    ($(#[$doc:meta])* $name:ident($ty:ty) { $($flag:ident = $val:expr),* $(,)? }) => {
        $(#[$doc])*
        #[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
        pub struct $name(pub $ty);

        impl $name {
            $(pub const $flag: $ty = $val;)*

            pub fn contains(&self, bits: $ty) -> bool {
                self.0 & bits == bits
            }

            pub fn is_empty(&self) -> bool {
                self.0 == 0
            }
        }
    };
}

pfcp_flags! {
    /// Apply Action (TS 29.244 Section 8.2.26)
    ApplyAction(u8) {
        DROP = 0x01,
        FORW = 0x02,
        BUFF = 0x04,
        NOCP = 0x08,
        DUPL = 0x10,
    }
}

pfcp_flags! {
    /// PFCPSMReq-Flags (TS 29.244 Section 8.2.31)
    SmreqFlags(u8) {
        DROBU = 0x01,
        SNDEM = 0x02,
        QAURR = 0x04,
    }
}

pfcp_flags! {
    /// Measurement Method (TS 29.244 Section 8.2.40)
    MeasurementMethod(u8) {
        DURAT = 0x01,
        VOLUM = 0x02,
        EVENT = 0x04,
    }
}

pfcp_flags! {
    /// Measurement Information (TS 29.244 Section 8.2.68)
    MeasurementInformation(u8) {
        MBQE = 0x01,
        INAM = 0x02,
        RADI = 0x04,
        ISTM = 0x08,
        MNOP = 0x10,
    }
}

pfcp_flags! {
    /// Report Type (TS 29.244 Section 8.2.21)
    ReportType(u8) {
        DLDR = 0x01,
        USAR = 0x02,
        ERIR = 0x04,
        UPIR = 0x08,
    }
}

pfcp_flags! {
    /// CP Function Features (TS 29.244 Section 8.2.58)
    CpFunctionFeatures(u8) {
        LOAD = 0x01,
        OVRL = 0x02,
    }
}

pfcp_flags! {
    /// Reporting Triggers, octets 5..7 packed as reptri_5 << 16 | reptri_6 << 8 | reptri_7
    ReportingTriggers(u32) {
        PERIODIC_REPORTING = 0x01_0000,
        VOLUME_THRESHOLD = 0x02_0000,
        TIME_THRESHOLD = 0x04_0000,
        QUOTA_HOLDING_TIME = 0x08_0000,
        START_OF_TRAFFIC = 0x10_0000,
        STOP_OF_TRAFFIC = 0x20_0000,
        DROPPED_DL_TRAFFIC_THRESHOLD = 0x40_0000,
        LINKED_USAGE_REPORTING = 0x80_0000,
        VOLUME_QUOTA = 0x00_0100,
        TIME_QUOTA = 0x00_0200,
        ENVELOPE_CLOSURE = 0x00_0400,
        MAC_ADDRESSES_REPORTING = 0x00_0800,
        EVENT_THRESHOLD = 0x00_1000,
        EVENT_QUOTA = 0x00_2000,
        IP_MULTICAST_JOIN_LEAVE = 0x00_4000,
        QUOTA_VALIDITY_TIME = 0x00_8000,
        REPORT_THE_END_MARKER_RECEPTION = 0x00_0001,
        USER_PLANE_INACTIVITY_TIMER = 0x00_0002,
    }
}

pfcp_flags! {
    /// Usage Report Trigger, octets 5..7 packed like [`ReportingTriggers`]
    UsageReportTrigger(u32) {
        PERIODIC_REPORTING = 0x01_0000,
        VOLUME_THRESHOLD = 0x02_0000,
        TIME_THRESHOLD = 0x04_0000,
        QUOTA_HOLDING_TIME = 0x08_0000,
        START_OF_TRAFFIC = 0x10_0000,
        STOP_OF_TRAFFIC = 0x20_0000,
        DROPPED_DL_TRAFFIC_THRESHOLD = 0x40_0000,
        IMMEDIATE_REPORT = 0x80_0000,
        VOLUME_QUOTA = 0x00_0100,
        TIME_QUOTA = 0x00_0200,
        LINKED_USAGE_REPORTING = 0x00_0400,
        TERMINATION_REPORT = 0x00_0800,
        MONITORING_TIME = 0x00_1000,
        ENVELOPE_CLOSURE = 0x00_2000,
        MAC_ADDRESSES_REPORTING = 0x00_4000,
        EVENT_THRESHOLD = 0x00_8000,
        EVENT_QUOTA = 0x00_0001,
        TERMINATION_BY_UP_FUNCTION_REPORT = 0x00_0002,
        IP_MULTICAST_JOIN_LEAVE = 0x00_0004,
        QUOTA_VALIDITY_TIME = 0x00_0008,
    }
}

/// PDN Type (TS 29.244 Section 8.2.79)
pub mod pdn_type {
    pub const IPV4: u8 = 1;
    pub const IPV6: u8 = 2;
    pub const IPV4V6: u8 = 3;
    pub const NON_IP: u8 = 4;
    pub const ETHERNET: u8 = 5;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_id_from_sockaddr_prefers_configured_family() {
        let a4: SocketAddr = "10.0.0.1:8805".parse().unwrap();
        let a6: SocketAddr = "[2001:db8::1]:8805".parse().unwrap();

        assert_eq!(
            NodeId::from_sockaddr(Some(a4), Some(a6), true).unwrap(),
            NodeId::Ipv4("10.0.0.1".parse().unwrap())
        );
        assert_eq!(
            NodeId::from_sockaddr(Some(a4), Some(a6), false).unwrap(),
            NodeId::Ipv6("2001:db8::1".parse().unwrap())
        );
        assert_eq!(
            NodeId::from_sockaddr(Some(a4), None, false).unwrap(),
            NodeId::Ipv4("10.0.0.1".parse().unwrap())
        );
        assert!(matches!(
            NodeId::from_sockaddr(None, None, true),
            Err(PfcpError::NoLocalAddress)
        ));
    }

    #[test]
    fn test_node_id_fqdn() {
        let node_id = NodeId::Fqdn("upf.example.org".to_string());
        let mut buf = BytesMut::new();
        node_id.encode(&mut buf);
        assert_eq!(buf[0], 2);
        assert_eq!(NodeId::decode(&buf).unwrap(), node_id);
        assert!(matches!(NodeId::decode(&[7]), Err(PfcpError::InvalidNodeIdType(7))));
    }

    #[test]
    fn test_f_seid_dual_stack() {
        let f_seid = FSeid {
            seid: 0x1122_3344_5566_7788,
            ipv4: Some("192.168.1.1".parse().unwrap()),
            ipv6: Some("fe80::1".parse().unwrap()),
        };
        let mut buf = BytesMut::new();
        f_seid.encode(&mut buf);
        assert_eq!(buf[0], 0x03);
        assert_eq!(buf.len(), 1 + 8 + 4 + 16);
        assert_eq!(FSeid::decode(&buf).unwrap(), f_seid);
    }

    #[test]
    fn test_f_teid_choose_omits_teid() {
        let f_teid = FTeid::choose(true, false, Some(5));
        let mut buf = BytesMut::new();
        f_teid.encode(&mut buf);
        assert_eq!(&buf[..], &[0x01 | 0x04 | 0x08, 5]);

        let decoded = FTeid::decode(&buf).unwrap();
        assert!(decoded.choose);
        assert_eq!(decoded.choose_id, Some(5));
        assert!(decoded.ipv4.is_some());
        assert!(decoded.ipv6.is_none());
    }

    #[test]
    fn test_f_teid_explicit() {
        let f_teid = FTeid::new(0xdeadbeef, Some("10.1.1.1".parse().unwrap()), None);
        let mut buf = BytesMut::new();
        f_teid.encode(&mut buf);
        assert_eq!(&buf[..5], &[0x01, 0xde, 0xad, 0xbe, 0xef]);
        assert_eq!(FTeid::decode(&buf).unwrap(), f_teid);
        assert!(FTeid::decode(&buf[..3]).is_err());
    }

    #[test]
    fn test_ue_ip_address_destination_flag() {
        let ue = UeIpAddress {
            ipv4: Some("10.45.0.2".parse().unwrap()),
            ipv6: None,
            destination: true,
        };
        let mut buf = BytesMut::new();
        ue.encode(&mut buf);
        assert_eq!(&buf[..], &[0x06, 10, 45, 0, 2]);
        assert_eq!(UeIpAddress::decode(&buf).unwrap(), ue);
    }

    #[test]
    fn test_outer_header_creation() {
        let ohc = OuterHeaderCreation {
            teid: 0x100,
            ipv4: Some("172.16.0.9".parse().unwrap()),
            ipv6: None,
        };
        let mut buf = BytesMut::new();
        ohc.encode(&mut buf);
        assert_eq!(&buf[..2], &[0x01, 0x00]);
        assert_eq!(OuterHeaderCreation::decode(&buf).unwrap(), ohc);
        assert!(OuterHeaderCreation::decode(&[0x04, 0x00]).is_err());
    }

    #[test]
    fn test_bitrate_is_kbps_on_wire() {
        let br = Bitrate { uplink: 1_000_000, downlink: 2_000_000 };
        let mut buf = BytesMut::new();
        br.encode(&mut buf);
        assert_eq!(buf.len(), PFCP_BITRATE_LEN);
        assert_eq!(&buf[..5], &[0, 0, 0, 0x03, 0xe8]);
        assert_eq!(Bitrate::decode(&buf).unwrap(), br);
    }

    #[test]
    fn test_gate_status() {
        let gate = GateStatus { ul_open: false, dl_open: true };
        assert_eq!(gate.to_u8(), 0x04);
        assert_eq!(GateStatus::from_u8(0x04), gate);
        assert_eq!(GateStatus::default().to_u8(), 0);
    }

    #[test]
    fn test_volume_measurement_packs_present_fields() {
        let vm = VolumeMeasurement {
            total_volume: Some(300),
            downlink_volume: Some(200),
            ..Default::default()
        };
        let mut buf = BytesMut::new();
        vm.encode(&mut buf);
        assert_eq!(buf[0], 0x05);
        assert_eq!(buf.len(), 17);
        assert_eq!(VolumeMeasurement::decode(&buf).unwrap(), vm);
        assert!(VolumeMeasurement::decode(&buf[..9]).is_err());
    }

    #[test]
    fn test_user_plane_ip_resource_information() {
        let info = UserPlaneIpResourceInformation {
            teid_range_indication: 4,
            teid_range: 9,
            ipv4: Some("127.0.0.7".parse().unwrap()),
            ipv6: None,
            network_instance: Some("internet".to_string()),
            source_interface: Some(PfcpInterface::Access),
        };
        let mut buf = BytesMut::new();
        info.encode(&mut buf);
        assert_eq!(buf[0], 0x01 | (4 << 2) | 0x20 | 0x40);
        assert_eq!(buf[1], 9);
        assert_eq!(UserPlaneIpResourceInformation::decode(&buf).unwrap(), info);
    }

    #[test]
    fn test_downlink_data_service_information() {
        let info = DownlinkDataServiceInformation {
            paging_policy_indication: Some(3),
            qfi: Some(9),
        };
        let mut buf = BytesMut::new();
        info.encode(&mut buf);
        assert_eq!(&buf[..], &[0x03, 3, 9]);
        assert_eq!(DownlinkDataServiceInformation::decode(&buf).unwrap(), info);
    }

    #[test]
    fn test_flags_contains() {
        let action = ApplyAction(ApplyAction::BUFF | ApplyAction::NOCP);
        assert!(action.contains(ApplyAction::BUFF));
        assert!(!action.contains(ApplyAction::FORW));
        assert!(ReportingTriggers(ReportingTriggers::VOLUME_THRESHOLD).contains(0x02_0000));
    }

    #[test]
    fn test_gtp_cause_translation() {
        assert_eq!(gtp_cause_from_pfcp(1), gtp_cause::REQUEST_ACCEPTED);
        assert_eq!(gtp_cause_from_pfcp(65), gtp_cause::CONTEXT_NOT_FOUND);
        assert_eq!(gtp_cause_from_pfcp(66), gtp_cause::MANDATORY_IE_MISSING);
        assert_eq!(gtp_cause_from_pfcp(71), gtp_cause::INVALID_MESSAGE_FORMAT);
        assert_eq!(gtp_cause_from_pfcp(72), gtp_cause::REMOTE_PEER_NOT_RESPONDING);
        assert_eq!(gtp_cause_from_pfcp(79), gtp_cause::ALL_DYNAMIC_ADDRESSES_ARE_OCCUPIED);
        assert_eq!(gtp_cause_from_pfcp(200), gtp_cause::SYSTEM_FAILURE);
    }
}
