//! PFCP Header
//!
//! PFCP message header as specified in 3GPP TS 29.244.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use crate::error::{PfcpError, PfcpResult};
use crate::types::PFCP_VERSION;

/// PFCP Header length without SEID (8 bytes)
pub const PFCP_HEADER_LEN: usize = 8;

/// PFCP Header length with SEID (16 bytes)
pub const PFCP_HEADER_LEN_WITH_SEID: usize = 16;

/// Largest sequence number that fits the 3-octet field
pub const PFCP_MAX_SEQUENCE_NUMBER: u32 = 0x00ff_ffff;

/// PFCP Message Types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PfcpMessageType {
    // Node related messages (no SEID)
    HeartbeatRequest = 1,
    HeartbeatResponse = 2,
    AssociationSetupRequest = 5,
    AssociationSetupResponse = 6,
    AssociationReleaseRequest = 9,
    AssociationReleaseResponse = 10,
    VersionNotSupportedResponse = 11,

    // Session related messages (with SEID)
    SessionEstablishmentRequest = 50,
    SessionEstablishmentResponse = 51,
    SessionModificationRequest = 52,
    SessionModificationResponse = 53,
    SessionDeletionRequest = 54,
    SessionDeletionResponse = 55,
    SessionReportRequest = 56,
    SessionReportResponse = 57,
}

impl TryFrom<u8> for PfcpMessageType {
    type Error = PfcpError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Self::HeartbeatRequest),
            2 => Ok(Self::HeartbeatResponse),
            5 => Ok(Self::AssociationSetupRequest),
            6 => Ok(Self::AssociationSetupResponse),
            9 => Ok(Self::AssociationReleaseRequest),
            10 => Ok(Self::AssociationReleaseResponse),
            11 => Ok(Self::VersionNotSupportedResponse),
            50 => Ok(Self::SessionEstablishmentRequest),
            51 => Ok(Self::SessionEstablishmentResponse),
            52 => Ok(Self::SessionModificationRequest),
            53 => Ok(Self::SessionModificationResponse),
            54 => Ok(Self::SessionDeletionRequest),
            55 => Ok(Self::SessionDeletionResponse),
            56 => Ok(Self::SessionReportRequest),
            57 => Ok(Self::SessionReportResponse),
            _ => Err(PfcpError::InvalidMessageType(value)),
        }
    }
}

impl PfcpMessageType {
    /// Check if this message type requires SEID
    pub fn has_seid(&self) -> bool {
        (*self as u8) >= Self::SessionEstablishmentRequest as u8
    }

    /// Check if this message type opens an exchange.
    ///
    /// Node requests are odd and session requests are even, so the parity of
    /// the type octet cannot be used.
    pub fn is_request(&self) -> bool {
        matches!(
            self,
            Self::HeartbeatRequest
                | Self::AssociationSetupRequest
                | Self::AssociationReleaseRequest
                | Self::SessionEstablishmentRequest
                | Self::SessionModificationRequest
                | Self::SessionDeletionRequest
                | Self::SessionReportRequest
        )
    }

    /// Get the name of the message type
    pub fn name(&self) -> &'static str {
        match self {
            Self::HeartbeatRequest => "Heartbeat Request",
            Self::HeartbeatResponse => "Heartbeat Response",
            Self::AssociationSetupRequest => "Association Setup Request",
            Self::AssociationSetupResponse => "Association Setup Response",
            Self::AssociationReleaseRequest => "Association Release Request",
            Self::AssociationReleaseResponse => "Association Release Response",
            Self::VersionNotSupportedResponse => "Version Not Supported Response",
            Self::SessionEstablishmentRequest => "Session Establishment Request",
            Self::SessionEstablishmentResponse => "Session Establishment Response",
            Self::SessionModificationRequest => "Session Modification Request",
            Self::SessionModificationResponse => "Session Modification Response",
            Self::SessionDeletionRequest => "Session Deletion Request",
            Self::SessionDeletionResponse => "Session Deletion Response",
            Self::SessionReportRequest => "Session Report Request",
            Self::SessionReportResponse => "Session Report Response",
        }
    }
}

impl std::fmt::Display for PfcpMessageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}({})", self.name(), *self as u8)
    }
}

/// PFCP Header structure
///
/// Format (without SEID - 8 bytes):
/// ```text
/// +-------+-------+-------+-------+-------+-------+-------+-------+
/// |  Ver  | Spare | S | MP|       Message Type                    |
/// +-------+-------+-------+-------+-------+-------+-------+-------+
/// |                    Message Length                             |
/// +-------+-------+-------+-------+-------+-------+-------+-------+
/// |                    Sequence Number                            |
/// +-------+-------+-------+-------+-------+-------+-------+-------+
/// |  Spare                                                        |
/// +-------+-------+-------+-------+-------+-------+-------+-------+
/// ```
///
/// Format (with SEID - 16 bytes):
/// ```text
/// +-------+-------+-------+-------+-------+-------+-------+-------+
/// |  Ver  | Spare | S | MP|       Message Type                    |
/// +-------+-------+-------+-------+-------+-------+-------+-------+
/// |                    Message Length                             |
/// +-------+-------+-------+-------+-------+-------+-------+-------+
/// |                    SEID (8 bytes)                             |
/// +-------+-------+-------+-------+-------+-------+-------+-------+
/// |                    Sequence Number                            |
/// +-------+-------+-------+-------+-------+-------+-------+-------+
/// |  Spare                                                        |
/// +-------+-------+-------+-------+-------+-------+-------+-------+
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PfcpHeader {
    /// PFCP version (should be 1)
    pub version: u8,
    /// Message Priority flag (MP bit)
    pub message_priority: bool,
    /// Message type
    pub message_type: PfcpMessageType,
    /// Message length (excluding first 4 bytes)
    pub length: u16,
    /// Session Endpoint Identifier, present on session messages
    pub seid: Option<u64>,
    /// Sequence number
    pub sequence_number: u32,
    /// Message priority value (if MP bit is set)
    pub priority: Option<u8>,
}

impl PfcpHeader {
    /// Create a new PFCP header without SEID
    pub fn new(message_type: PfcpMessageType, sequence_number: u32) -> Self {
        Self {
            version: PFCP_VERSION,
            message_priority: false,
            message_type,
            length: 0,
            seid: None,
            sequence_number,
            priority: None,
        }
    }

    /// Create a new PFCP header with SEID
    pub fn new_with_seid(message_type: PfcpMessageType, seid: u64, sequence_number: u32) -> Self {
        Self {
            seid: Some(seid),
            ..Self::new(message_type, sequence_number)
        }
    }

    /// Get the header length
    pub fn header_len(&self) -> usize {
        if self.seid.is_some() {
            PFCP_HEADER_LEN_WITH_SEID
        } else {
            PFCP_HEADER_LEN
        }
    }

    /// Encode the header to bytes
    pub fn encode(&self, buf: &mut BytesMut) {
        // First byte: version (3 bits) | spare (2 bits) | S (1 bit) | MP (1 bit) | spare (1 bit)
        let first_byte = ((self.version & 0x07) << 5)
            | ((self.seid.is_some() as u8) << 2)
            | ((self.message_priority as u8) << 1);
        buf.put_u8(first_byte);
        buf.put_u8(self.message_type as u8);
        buf.put_u16(self.length);

        if let Some(seid) = self.seid {
            buf.put_u64(seid);
        }

        // Sequence number (3 bytes) + spare/priority (1 byte)
        let seq_bytes = (self.sequence_number & PFCP_MAX_SEQUENCE_NUMBER).to_be_bytes();
        buf.put_slice(&seq_bytes[1..4]);
        buf.put_u8(self.priority.unwrap_or(0) << 4);
    }

    /// Decode header from bytes
    pub fn decode(buf: &mut Bytes) -> PfcpResult<Self> {
        if buf.remaining() < 4 {
            return Err(PfcpError::BufferTooShort {
                needed: 4,
                available: buf.remaining(),
            });
        }

        let first_byte = buf.get_u8();
        let version = (first_byte >> 5) & 0x07;
        let seid_presence = (first_byte >> 2) & 0x01 != 0;
        let message_priority = (first_byte >> 1) & 0x01 != 0;

        if version != PFCP_VERSION {
            return Err(PfcpError::VersionNotSupported(version));
        }

        let message_type = PfcpMessageType::try_from(buf.get_u8())?;
        let length = buf.get_u16();

        let min_remaining = if seid_presence { 12 } else { 4 };
        if buf.remaining() < min_remaining {
            return Err(PfcpError::BufferTooShort {
                needed: min_remaining,
                available: buf.remaining(),
            });
        }

        let seid = if seid_presence {
            Some(buf.get_u64())
        } else {
            None
        };

        let mut seq_bytes = [0u8; 4];
        buf.copy_to_slice(&mut seq_bytes[1..4]);
        let sequence_number = u32::from_be_bytes(seq_bytes);

        let last_byte = buf.get_u8();
        let priority = if message_priority {
            Some((last_byte >> 4) & 0x0F)
        } else {
            None
        };

        Ok(Self {
            version,
            message_priority,
            message_type,
            length,
            seid,
            sequence_number,
            priority,
        })
    }
}

/// Version and sequence number of a raw datagram, read without validating
/// anything else.
///
/// Used ahead of full decoding so that a datagram from a newer protocol
/// version can still be answered with its own sequence number.
pub fn peek_version_and_sequence(data: &[u8]) -> Option<(u8, u32)> {
    if data.len() < PFCP_HEADER_LEN {
        return None;
    }
    let version = (data[0] >> 5) & 0x07;
    let offset = if data[0] & 0x04 != 0 { 12 } else { 4 };
    let seq = data.get(offset..offset + 3)?;
    Some((
        version,
        u32::from_be_bytes([0, seq[0], seq[1], seq[2]]),
    ))
}

/// The 8-byte Version Not Supported Response echoing `sequence_number`.
pub fn build_version_not_supported_response(sequence_number: u32) -> BytesMut {
    let mut header = PfcpHeader::new(
        PfcpMessageType::VersionNotSupportedResponse,
        sequence_number,
    );
    header.length = 4;

    let mut buf = BytesMut::with_capacity(PFCP_HEADER_LEN);
    header.encode(&mut buf);
    buf
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_encode_decode_no_seid() {
        let header = PfcpHeader::new(PfcpMessageType::HeartbeatRequest, 12345);
        let mut buf = BytesMut::new();
        header.encode(&mut buf);
        assert_eq!(buf.len(), PFCP_HEADER_LEN);

        let mut bytes = buf.freeze();
        let decoded = PfcpHeader::decode(&mut bytes).unwrap();

        assert_eq!(decoded.version, PFCP_VERSION);
        assert_eq!(decoded.message_type, PfcpMessageType::HeartbeatRequest);
        assert_eq!(decoded.sequence_number, 12345);
        assert!(decoded.seid.is_none());
    }

    #[test]
    fn test_header_encode_decode_with_seid() {
        let header = PfcpHeader::new_with_seid(
            PfcpMessageType::SessionEstablishmentRequest,
            0x123456789ABCDEF0,
            54321,
        );
        let mut buf = BytesMut::new();
        header.encode(&mut buf);
        assert_eq!(buf.len(), PFCP_HEADER_LEN_WITH_SEID);

        let mut bytes = buf.freeze();
        let decoded = PfcpHeader::decode(&mut bytes).unwrap();

        assert_eq!(decoded.message_type, PfcpMessageType::SessionEstablishmentRequest);
        assert_eq!(decoded.sequence_number, 54321);
        assert_eq!(decoded.seid, Some(0x123456789ABCDEF0));
    }

    #[test]
    fn test_message_type_has_seid() {
        assert!(!PfcpMessageType::HeartbeatRequest.has_seid());
        assert!(!PfcpMessageType::AssociationSetupRequest.has_seid());
        assert!(!PfcpMessageType::VersionNotSupportedResponse.has_seid());
        assert!(PfcpMessageType::SessionEstablishmentRequest.has_seid());
        assert!(PfcpMessageType::SessionReportResponse.has_seid());
    }

    #[test]
    fn test_message_type_is_request() {
        assert!(PfcpMessageType::HeartbeatRequest.is_request());
        assert!(PfcpMessageType::SessionEstablishmentRequest.is_request());
        assert!(PfcpMessageType::SessionReportRequest.is_request());
        assert!(!PfcpMessageType::AssociationSetupResponse.is_request());
        assert!(!PfcpMessageType::SessionDeletionResponse.is_request());
        assert!(!PfcpMessageType::VersionNotSupportedResponse.is_request());
    }

    #[test]
    fn test_decode_rejects_other_versions() {
        let mut bytes = Bytes::from_static(&[0x40, 1, 0, 4, 0, 0, 1, 0]);
        assert!(matches!(
            PfcpHeader::decode(&mut bytes),
            Err(PfcpError::VersionNotSupported(2))
        ));
    }

    #[test]
    fn test_peek_version_and_sequence() {
        // version 2, no SEID, seq 0x010203
        let raw = [0x40, 1, 0, 4, 0x01, 0x02, 0x03, 0];
        assert_eq!(peek_version_and_sequence(&raw), Some((2, 0x010203)));

        // version 3, SEID present, seq 7
        let mut raw = vec![0x64, 50, 0, 12];
        raw.extend_from_slice(&[0u8; 8]);
        raw.extend_from_slice(&[0, 0, 7, 0]);
        assert_eq!(peek_version_and_sequence(&raw), Some((3, 7)));

        assert_eq!(peek_version_and_sequence(&[0x20, 1, 0]), None);
    }

    #[test]
    fn test_version_not_supported_response() {
        let buf = build_version_not_supported_response(0xABCDEF);
        assert_eq!(&buf[..], &[0x20, 11, 0, 4, 0xAB, 0xCD, 0xEF, 0]);
    }
}
