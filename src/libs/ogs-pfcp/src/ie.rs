//! PFCP Information Elements
//!
//! IE type numbers and TLV helpers (3GPP TS 29.244 Section 8.1).

use bytes::{Buf, BufMut, Bytes, BytesMut};
use crate::error::{PfcpError, PfcpResult};

/// PFCP IE Type values (TS 29.244 Section 8.1)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum IeType {
    CreatePdr = 1,
    Pdi = 2,
    CreateFar = 3,
    ForwardingParameters = 4,
    CreateUrr = 6,
    CreateQer = 7,
    CreatedPdr = 8,
    UpdatePdr = 9,
    UpdateFar = 10,
    UpdateForwardingParameters = 11,
    UpdateBar = 12,
    UpdateUrr = 13,
    UpdateQer = 14,
    RemovePdr = 15,
    RemoveFar = 16,
    RemoveUrr = 17,
    RemoveQer = 18,
    Cause = 19,
    SourceInterface = 20,
    FTeid = 21,
    NetworkInstance = 22,
    SdfFilter = 23,
    GateStatus = 25,
    Mbr = 26,
    Gbr = 27,
    Precedence = 29,
    VolumeThreshold = 31,
    TimeThreshold = 32,
    ReportingTriggers = 37,
    ReportType = 39,
    DestinationInterface = 42,
    UpFunctionFeatures = 43,
    ApplyAction = 44,
    DownlinkDataServiceInformation = 45,
    DownlinkDataNotificationDelay = 46,
    PfcpSmreqFlags = 49,
    PdrId = 56,
    FSeid = 57,
    NodeId = 60,
    MeasurementMethod = 62,
    UsageReportTrigger = 63,
    MeasurementPeriod = 64,
    VolumeMeasurement = 66,
    DurationMeasurement = 67,
    TimeOfFirstPacket = 69,
    TimeOfLastPacket = 70,
    QuotaHoldingTime = 71,
    VolumeQuota = 73,
    TimeQuota = 74,
    StartTime = 75,
    EndTime = 76,
    UsageReportSmr = 78,
    UsageReportSdr = 79,
    UsageReportSrr = 80,
    UrrId = 81,
    DownlinkDataReport = 83,
    OuterHeaderCreation = 84,
    CreateBar = 85,
    UpdateBarSmr = 86,
    RemoveBar = 87,
    BarId = 88,
    CpFunctionFeatures = 89,
    UeIpAddress = 93,
    OuterHeaderRemoval = 95,
    RecoveryTimeStamp = 96,
    ErrorIndicationReport = 99,
    MeasurementInformation = 100,
    UrSeqn = 104,
    FarId = 108,
    QerId = 109,
    PdnType = 113,
    UserPlaneIpResourceInformation = 116,
    Qfi = 124,
    SuggestedBufferingPacketsCount = 140,
    EventQuota = 148,
    EventThreshold = 149,
    QuotaValidityTime = 181,
}

/// PFCP IE Header (4 bytes)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IeHeader {
    pub ie_type: u16,
    pub length: u16,
}

impl IeHeader {
    pub const LEN: usize = 4;

    pub fn new(ie_type: u16, length: u16) -> Self {
        Self { ie_type, length }
    }

    pub fn encode(&self, buf: &mut BytesMut) {
        buf.put_u16(self.ie_type);
        buf.put_u16(self.length);
    }

    pub fn decode(buf: &mut Bytes) -> PfcpResult<Self> {
        if buf.remaining() < Self::LEN {
            return Err(PfcpError::BufferTooShort {
                needed: Self::LEN,
                available: buf.remaining(),
            });
        }
        Ok(Self {
            ie_type: buf.get_u16(),
            length: buf.get_u16(),
        })
    }
}

/// Generic PFCP IE with raw data
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawIe {
    pub ie_type: u16,
    pub data: Bytes,
}

impl RawIe {
    pub fn new(ie_type: u16, data: Bytes) -> Self {
        Self { ie_type, data }
    }

    pub fn is(&self, ie_type: IeType) -> bool {
        self.ie_type == ie_type as u16
    }

    pub fn encode(&self, buf: &mut BytesMut) {
        let header = IeHeader::new(self.ie_type, self.data.len() as u16);
        header.encode(buf);
        buf.put_slice(&self.data);
    }

    pub fn decode(buf: &mut Bytes) -> PfcpResult<Self> {
        let header = IeHeader::decode(buf)?;
        if buf.remaining() < header.length as usize {
            return Err(PfcpError::BufferTooShort {
                needed: header.length as usize,
                available: buf.remaining(),
            });
        }
        let data = buf.copy_to_bytes(header.length as usize);
        Ok(Self {
            ie_type: header.ie_type,
            data,
        })
    }

    pub fn get_u8(&self) -> PfcpResult<u8> {
        ensure_len(&self.data, 1)?;
        Ok(self.data[0])
    }

    pub fn get_u16(&self) -> PfcpResult<u16> {
        ensure_len(&self.data, 2)?;
        Ok(u16::from_be_bytes([self.data[0], self.data[1]]))
    }

    /// 3-octet integer (reporting triggers, usage report trigger)
    pub fn get_u24(&self) -> PfcpResult<u32> {
        ensure_len(&self.data, 3)?;
        Ok(u32::from_be_bytes([0, self.data[0], self.data[1], self.data[2]]))
    }

    pub fn get_u32(&self) -> PfcpResult<u32> {
        ensure_len(&self.data, 4)?;
        let mut data = self.data.clone();
        Ok(data.get_u32())
    }
}

/// Iterate over the IEs of a grouped IE or message body.
pub fn for_each_ie(
    mut buf: Bytes,
    mut f: impl FnMut(RawIe) -> PfcpResult<()>,
) -> PfcpResult<()> {
    while buf.remaining() >= IeHeader::LEN {
        let ie = RawIe::decode(&mut buf)?;
        f(ie)?;
    }
    Ok(())
}

pub(crate) fn ensure_len(data: &[u8], needed: usize) -> PfcpResult<()> {
    if data.len() < needed {
        return Err(PfcpError::BufferTooShort {
            needed,
            available: data.len(),
        });
    }
    Ok(())
}

/// Helper to encode a u8 IE
pub fn encode_u8_ie(buf: &mut BytesMut, ie_type: IeType, value: u8) {
    IeHeader::new(ie_type as u16, 1).encode(buf);
    buf.put_u8(value);
}

/// Helper to encode a u16 IE
pub fn encode_u16_ie(buf: &mut BytesMut, ie_type: IeType, value: u16) {
    IeHeader::new(ie_type as u16, 2).encode(buf);
    buf.put_u16(value);
}

/// Helper to encode a 3-octet IE
pub fn encode_u24_ie(buf: &mut BytesMut, ie_type: IeType, value: u32) {
    IeHeader::new(ie_type as u16, 3).encode(buf);
    buf.put_slice(&value.to_be_bytes()[1..4]);
}

/// Helper to encode a u32 IE
pub fn encode_u32_ie(buf: &mut BytesMut, ie_type: IeType, value: u32) {
    IeHeader::new(ie_type as u16, 4).encode(buf);
    buf.put_u32(value);
}

/// Helper to encode bytes IE
pub fn encode_bytes_ie(buf: &mut BytesMut, ie_type: IeType, data: &[u8]) {
    IeHeader::new(ie_type as u16, data.len() as u16).encode(buf);
    buf.put_slice(data);
}

/// Encode an IE whose value is produced by `f`.
///
/// The length field is back-patched once the value has been written, which
/// is how grouped IEs nest.
pub fn encode_ie_with(buf: &mut BytesMut, ie_type: IeType, f: impl FnOnce(&mut BytesMut)) {
    let start = buf.len();
    IeHeader::new(ie_type as u16, 0).encode(buf);
    f(buf);
    let length = (buf.len() - start - IeHeader::LEN) as u16;
    buf[start + 2..start + 4].copy_from_slice(&length.to_be_bytes());
}

/// Encode a DNN or network instance as DNS labels (ogs_fqdn_build).
pub fn fqdn_encode(name: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(name.len() + 1);
    for label in name.split('.').filter(|l| !l.is_empty()) {
        out.push(label.len() as u8);
        out.extend_from_slice(label.as_bytes());
    }
    out
}

/// Decode DNS labels into a dotted name (ogs_fqdn_parse).
pub fn fqdn_decode(data: &[u8]) -> PfcpResult<String> {
    let mut labels = Vec::new();
    let mut i = 0;
    while i < data.len() {
        let len = data[i] as usize;
        i += 1;
        let label = data.get(i..i + len).ok_or(PfcpError::BufferTooShort {
            needed: i + len,
            available: data.len(),
        })?;
        labels.push(String::from_utf8_lossy(label).into_owned());
        i += len;
    }
    Ok(labels.join("."))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_raw_ie_roundtrip() {
        let mut buf = BytesMut::new();
        encode_u16_ie(&mut buf, IeType::PdrId, 7);
        encode_u32_ie(&mut buf, IeType::FarId, 0x0102_0304);

        let mut bytes = buf.freeze();
        let first = RawIe::decode(&mut bytes).unwrap();
        assert!(first.is(IeType::PdrId));
        assert_eq!(first.get_u16().unwrap(), 7);

        let second = RawIe::decode(&mut bytes).unwrap();
        assert!(second.is(IeType::FarId));
        assert_eq!(second.get_u32().unwrap(), 0x0102_0304);
        assert!(bytes.is_empty());
    }

    #[test]
    fn test_u24_ie() {
        let mut buf = BytesMut::new();
        encode_u24_ie(&mut buf, IeType::ReportingTriggers, 0x0A0B0C);
        assert_eq!(&buf[..], &[0, 37, 0, 3, 0x0A, 0x0B, 0x0C]);

        let ie = RawIe::decode(&mut buf.freeze()).unwrap();
        assert_eq!(ie.get_u24().unwrap(), 0x0A0B0C);
    }

    #[test]
    fn test_encode_ie_with_backpatches_length() {
        let mut buf = BytesMut::new();
        encode_ie_with(&mut buf, IeType::RemovePdr, |b| {
            encode_u16_ie(b, IeType::PdrId, 3);
        });
        assert_eq!(&buf[..], &[0, 15, 0, 6, 0, 56, 0, 2, 0, 3]);
    }

    #[test]
    fn test_short_ie_is_rejected() {
        let mut bytes = Bytes::from_static(&[0, 56, 0, 4, 0, 1]);
        assert!(matches!(
            RawIe::decode(&mut bytes),
            Err(PfcpError::BufferTooShort { needed: 4, available: 2 })
        ));

        let ie = RawIe::new(IeType::FarId as u16, Bytes::from_static(&[1, 2]));
        assert!(ie.get_u32().is_err());
    }

    #[test]
    fn test_fqdn_roundtrip() {
        let encoded = fqdn_encode("internet.mnc001.mcc001");
        assert_eq!(encoded[0], 8);
        assert_eq!(&encoded[1..9], b"internet");
        assert_eq!(fqdn_decode(&encoded).unwrap(), "internet.mnc001.mcc001");

        assert!(fqdn_decode(&[5, b'a']).is_err());
    }
}
