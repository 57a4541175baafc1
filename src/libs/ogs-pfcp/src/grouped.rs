//! PFCP Grouped IEs
//!
//! Rule-level grouped information elements (Create/Update/Remove PDR, FAR,
//! QER, URR, BAR) and the report structures carried by session messages.
//! `encode` writes the embedded IEs; the caller wraps them with the
//! grouped IE header through [`encode_ie_with`].

use bytes::{Bytes, BytesMut};

use crate::error::{PfcpError, PfcpResult};
use crate::ie::{
    encode_bytes_ie, encode_ie_with, encode_u16_ie, encode_u24_ie, encode_u32_ie, encode_u8_ie,
    fqdn_decode, fqdn_encode, for_each_ie, IeType,
};
use crate::types::{
    ApplyAction, Bitrate, DownlinkDataServiceInformation, FTeid, GateStatus,
    MeasurementInformation, MeasurementMethod, OuterHeaderCreation, OuterHeaderRemoval,
    PfcpInterface, ReportingTriggers, SdfFilter, SmreqFlags, UeIpAddress, UsageReportTrigger,
    Volume, VolumeMeasurement,
};

/// PDI - Packet Detection Information
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Pdi {
    pub source_interface: PfcpInterface,
    pub local_f_teid: Option<FTeid>,
    pub network_instance: Option<String>,
    pub ue_ip_address: Option<UeIpAddress>,
    pub sdf_filters: Vec<SdfFilter>,
    pub qfi: Option<u8>,
}

impl Pdi {
    pub fn encode(&self, buf: &mut BytesMut) {
        encode_u8_ie(buf, IeType::SourceInterface, self.source_interface as u8);
        if let Some(f_teid) = &self.local_f_teid {
            encode_ie_with(buf, IeType::FTeid, |b| f_teid.encode(b));
        }
        if let Some(ni) = &self.network_instance {
            encode_bytes_ie(buf, IeType::NetworkInstance, &fqdn_encode(ni));
        }
        if let Some(ue) = &self.ue_ip_address {
            encode_ie_with(buf, IeType::UeIpAddress, |b| ue.encode(b));
        }
        for sdf in &self.sdf_filters {
            encode_ie_with(buf, IeType::SdfFilter, |b| sdf.encode(b));
        }
        if let Some(qfi) = self.qfi {
            encode_u8_ie(buf, IeType::Qfi, qfi);
        }
    }

    pub fn decode(data: Bytes) -> PfcpResult<Self> {
        let mut source_interface = None;
        let mut pdi = Pdi::default();

        for_each_ie(data, |ie| {
            match ie.ie_type {
                t if t == IeType::SourceInterface as u16 => {
                    source_interface = Some(PfcpInterface::try_from(ie.get_u8()?)?);
                }
                t if t == IeType::FTeid as u16 => {
                    pdi.local_f_teid = Some(FTeid::decode(&ie.data)?);
                }
                t if t == IeType::NetworkInstance as u16 => {
                    pdi.network_instance = Some(fqdn_decode(&ie.data)?);
                }
                t if t == IeType::UeIpAddress as u16 => {
                    pdi.ue_ip_address = Some(UeIpAddress::decode(&ie.data)?);
                }
                t if t == IeType::SdfFilter as u16 => {
                    pdi.sdf_filters.push(SdfFilter::decode(&ie.data)?);
                }
                t if t == IeType::Qfi as u16 => {
                    pdi.qfi = Some(ie.get_u8()? & 0x3f);
                }
                _ => {}
            }
            Ok(())
        })?;

        pdi.source_interface =
            source_interface.ok_or(PfcpError::MissingMandatoryIe("Source Interface"))?;
        Ok(pdi)
    }
}

/// Create PDR
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CreatePdr {
    pub pdr_id: u16,
    pub precedence: Option<u32>,
    pub pdi: Pdi,
    pub outer_header_removal: Option<OuterHeaderRemoval>,
    pub far_id: Option<u32>,
    pub urr_ids: Vec<u32>,
    pub qer_id: Option<u32>,
}

impl CreatePdr {
    pub fn encode(&self, buf: &mut BytesMut) {
        encode_u16_ie(buf, IeType::PdrId, self.pdr_id);
        if let Some(precedence) = self.precedence {
            encode_u32_ie(buf, IeType::Precedence, precedence);
        }
        encode_ie_with(buf, IeType::Pdi, |b| self.pdi.encode(b));
        if let Some(ohr) = self.outer_header_removal {
            encode_u8_ie(buf, IeType::OuterHeaderRemoval, ohr.0);
        }
        if let Some(far_id) = self.far_id {
            encode_u32_ie(buf, IeType::FarId, far_id);
        }
        for urr_id in &self.urr_ids {
            encode_u32_ie(buf, IeType::UrrId, *urr_id);
        }
        if let Some(qer_id) = self.qer_id {
            encode_u32_ie(buf, IeType::QerId, qer_id);
        }
    }

    pub fn decode(data: Bytes) -> PfcpResult<Self> {
        let mut pdr_id = None;
        let mut pdi = None;
        let mut pdr = CreatePdr::default();

        for_each_ie(data, |ie| {
            match ie.ie_type {
                t if t == IeType::PdrId as u16 => pdr_id = Some(ie.get_u16()?),
                t if t == IeType::Precedence as u16 => pdr.precedence = Some(ie.get_u32()?),
                t if t == IeType::Pdi as u16 => pdi = Some(Pdi::decode(ie.data)?),
                t if t == IeType::OuterHeaderRemoval as u16 => {
                    pdr.outer_header_removal = Some(OuterHeaderRemoval(ie.get_u8()?));
                }
                t if t == IeType::FarId as u16 => pdr.far_id = Some(ie.get_u32()?),
                t if t == IeType::UrrId as u16 => pdr.urr_ids.push(ie.get_u32()?),
                t if t == IeType::QerId as u16 => pdr.qer_id = Some(ie.get_u32()?),
                _ => {}
            }
            Ok(())
        })?;

        pdr.pdr_id = pdr_id.ok_or(PfcpError::MissingMandatoryIe("PDR ID"))?;
        pdr.pdi = pdi.ok_or(PfcpError::MissingMandatoryIe("PDI"))?;
        Ok(pdr)
    }
}

/// Update PDR
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpdatePdr {
    pub pdr_id: u16,
    pub precedence: Option<u32>,
    pub pdi: Option<Pdi>,
    pub outer_header_removal: Option<OuterHeaderRemoval>,
    pub far_id: Option<u32>,
}

impl UpdatePdr {
    pub fn encode(&self, buf: &mut BytesMut) {
        encode_u16_ie(buf, IeType::PdrId, self.pdr_id);
        if let Some(ohr) = self.outer_header_removal {
            encode_u8_ie(buf, IeType::OuterHeaderRemoval, ohr.0);
        }
        if let Some(precedence) = self.precedence {
            encode_u32_ie(buf, IeType::Precedence, precedence);
        }
        if let Some(pdi) = &self.pdi {
            encode_ie_with(buf, IeType::Pdi, |b| pdi.encode(b));
        }
        if let Some(far_id) = self.far_id {
            encode_u32_ie(buf, IeType::FarId, far_id);
        }
    }

    pub fn decode(data: Bytes) -> PfcpResult<Self> {
        let mut pdr_id = None;
        let mut pdr = UpdatePdr::default();

        for_each_ie(data, |ie| {
            match ie.ie_type {
                t if t == IeType::PdrId as u16 => pdr_id = Some(ie.get_u16()?),
                t if t == IeType::Precedence as u16 => pdr.precedence = Some(ie.get_u32()?),
                t if t == IeType::Pdi as u16 => pdr.pdi = Some(Pdi::decode(ie.data)?),
                t if t == IeType::OuterHeaderRemoval as u16 => {
                    pdr.outer_header_removal = Some(OuterHeaderRemoval(ie.get_u8()?));
                }
                t if t == IeType::FarId as u16 => pdr.far_id = Some(ie.get_u32()?),
                _ => {}
            }
            Ok(())
        })?;

        pdr.pdr_id = pdr_id.ok_or(PfcpError::MissingMandatoryIe("PDR ID"))?;
        Ok(pdr)
    }
}

/// Created PDR, reported by a UP function that allocated the F-TEID
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreatedPdr {
    pub pdr_id: u16,
    pub local_f_teid: Option<FTeid>,
}

impl CreatedPdr {
    pub fn encode(&self, buf: &mut BytesMut) {
        encode_u16_ie(buf, IeType::PdrId, self.pdr_id);
        if let Some(f_teid) = &self.local_f_teid {
            encode_ie_with(buf, IeType::FTeid, |b| f_teid.encode(b));
        }
    }

    pub fn decode(data: Bytes) -> PfcpResult<Self> {
        let mut pdr_id = None;
        let mut local_f_teid = None;

        for_each_ie(data, |ie| {
            match ie.ie_type {
                t if t == IeType::PdrId as u16 => pdr_id = Some(ie.get_u16()?),
                t if t == IeType::FTeid as u16 => local_f_teid = Some(FTeid::decode(&ie.data)?),
                _ => {}
            }
            Ok(())
        })?;

        Ok(CreatedPdr {
            pdr_id: pdr_id.ok_or(PfcpError::MissingMandatoryIe("PDR ID"))?,
            local_f_teid,
        })
    }
}

/// Forwarding Parameters
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ForwardingParameters {
    pub destination_interface: PfcpInterface,
    pub network_instance: Option<String>,
    pub outer_header_creation: Option<OuterHeaderCreation>,
}

impl ForwardingParameters {
    pub fn encode(&self, buf: &mut BytesMut) {
        encode_u8_ie(buf, IeType::DestinationInterface, self.destination_interface as u8);
        if let Some(ni) = &self.network_instance {
            encode_bytes_ie(buf, IeType::NetworkInstance, &fqdn_encode(ni));
        }
        if let Some(ohc) = &self.outer_header_creation {
            encode_ie_with(buf, IeType::OuterHeaderCreation, |b| ohc.encode(b));
        }
    }

    pub fn decode(data: Bytes) -> PfcpResult<Self> {
        let mut dst_if = None;
        let mut params = ForwardingParameters::default();

        for_each_ie(data, |ie| {
            match ie.ie_type {
                t if t == IeType::DestinationInterface as u16 => {
                    dst_if = Some(PfcpInterface::try_from(ie.get_u8()?)?);
                }
                t if t == IeType::NetworkInstance as u16 => {
                    params.network_instance = Some(fqdn_decode(&ie.data)?);
                }
                t if t == IeType::OuterHeaderCreation as u16 => {
                    params.outer_header_creation = Some(OuterHeaderCreation::decode(&ie.data)?);
                }
                _ => {}
            }
            Ok(())
        })?;

        params.destination_interface =
            dst_if.ok_or(PfcpError::MissingMandatoryIe("Destination Interface"))?;
        Ok(params)
    }
}

/// Update Forwarding Parameters
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpdateForwardingParameters {
    pub destination_interface: Option<PfcpInterface>,
    pub network_instance: Option<String>,
    pub outer_header_creation: Option<OuterHeaderCreation>,
    pub smreq_flags: Option<SmreqFlags>,
}

impl UpdateForwardingParameters {
    pub fn encode(&self, buf: &mut BytesMut) {
        if let Some(dst_if) = self.destination_interface {
            encode_u8_ie(buf, IeType::DestinationInterface, dst_if as u8);
        }
        if let Some(ni) = &self.network_instance {
            encode_bytes_ie(buf, IeType::NetworkInstance, &fqdn_encode(ni));
        }
        if let Some(ohc) = &self.outer_header_creation {
            encode_ie_with(buf, IeType::OuterHeaderCreation, |b| ohc.encode(b));
        }
        if let Some(flags) = self.smreq_flags {
            encode_u8_ie(buf, IeType::PfcpSmreqFlags, flags.0);
        }
    }

    pub fn decode(data: Bytes) -> PfcpResult<Self> {
        let mut params = UpdateForwardingParameters::default();

        for_each_ie(data, |ie| {
            match ie.ie_type {
                t if t == IeType::DestinationInterface as u16 => {
                    params.destination_interface = Some(PfcpInterface::try_from(ie.get_u8()?)?);
                }
                t if t == IeType::NetworkInstance as u16 => {
                    params.network_instance = Some(fqdn_decode(&ie.data)?);
                }
                t if t == IeType::OuterHeaderCreation as u16 => {
                    params.outer_header_creation = Some(OuterHeaderCreation::decode(&ie.data)?);
                }
                t if t == IeType::PfcpSmreqFlags as u16 => {
                    params.smreq_flags = Some(SmreqFlags(ie.get_u8()?));
                }
                _ => {}
            }
            Ok(())
        })?;

        Ok(params)
    }
}

/// Create FAR
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CreateFar {
    pub far_id: u32,
    pub apply_action: ApplyAction,
    pub forwarding_parameters: Option<ForwardingParameters>,
    pub bar_id: Option<u8>,
}

impl CreateFar {
    pub fn encode(&self, buf: &mut BytesMut) {
        encode_u32_ie(buf, IeType::FarId, self.far_id);
        encode_u8_ie(buf, IeType::ApplyAction, self.apply_action.0);
        if let Some(params) = &self.forwarding_parameters {
            encode_ie_with(buf, IeType::ForwardingParameters, |b| params.encode(b));
        }
        if let Some(bar_id) = self.bar_id {
            encode_u8_ie(buf, IeType::BarId, bar_id);
        }
    }

    pub fn decode(data: Bytes) -> PfcpResult<Self> {
        let mut far_id = None;
        let mut apply_action = None;
        let mut far = CreateFar::default();

        for_each_ie(data, |ie| {
            match ie.ie_type {
                t if t == IeType::FarId as u16 => far_id = Some(ie.get_u32()?),
                t if t == IeType::ApplyAction as u16 => {
                    apply_action = Some(ApplyAction(ie.get_u8()?));
                }
                t if t == IeType::ForwardingParameters as u16 => {
                    far.forwarding_parameters = Some(ForwardingParameters::decode(ie.data)?);
                }
                t if t == IeType::BarId as u16 => far.bar_id = Some(ie.get_u8()?),
                _ => {}
            }
            Ok(())
        })?;

        far.far_id = far_id.ok_or(PfcpError::MissingMandatoryIe("FAR ID"))?;
        far.apply_action = apply_action.ok_or(PfcpError::MissingMandatoryIe("Apply Action"))?;
        Ok(far)
    }
}

/// Update FAR
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpdateFar {
    pub far_id: u32,
    pub apply_action: Option<ApplyAction>,
    pub update_forwarding_parameters: Option<UpdateForwardingParameters>,
    pub bar_id: Option<u8>,
}

impl UpdateFar {
    pub fn encode(&self, buf: &mut BytesMut) {
        encode_u32_ie(buf, IeType::FarId, self.far_id);
        if let Some(action) = self.apply_action {
            encode_u8_ie(buf, IeType::ApplyAction, action.0);
        }
        if let Some(params) = &self.update_forwarding_parameters {
            encode_ie_with(buf, IeType::UpdateForwardingParameters, |b| params.encode(b));
        }
        if let Some(bar_id) = self.bar_id {
            encode_u8_ie(buf, IeType::BarId, bar_id);
        }
    }

    pub fn decode(data: Bytes) -> PfcpResult<Self> {
        let mut far_id = None;
        let mut far = UpdateFar::default();

        for_each_ie(data, |ie| {
            match ie.ie_type {
                t if t == IeType::FarId as u16 => far_id = Some(ie.get_u32()?),
                t if t == IeType::ApplyAction as u16 => {
                    far.apply_action = Some(ApplyAction(ie.get_u8()?));
                }
                t if t == IeType::UpdateForwardingParameters as u16 => {
                    far.update_forwarding_parameters =
                        Some(UpdateForwardingParameters::decode(ie.data)?);
                }
                t if t == IeType::BarId as u16 => far.bar_id = Some(ie.get_u8()?),
                _ => {}
            }
            Ok(())
        })?;

        far.far_id = far_id.ok_or(PfcpError::MissingMandatoryIe("FAR ID"))?;
        Ok(far)
    }
}

/// Create QER
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CreateQer {
    pub qer_id: u32,
    pub gate_status: GateStatus,
    pub mbr: Option<Bitrate>,
    pub gbr: Option<Bitrate>,
    pub qfi: Option<u8>,
}

impl CreateQer {
    pub fn encode(&self, buf: &mut BytesMut) {
        encode_u32_ie(buf, IeType::QerId, self.qer_id);
        encode_u8_ie(buf, IeType::GateStatus, self.gate_status.to_u8());
        if let Some(mbr) = &self.mbr {
            encode_ie_with(buf, IeType::Mbr, |b| mbr.encode(b));
        }
        if let Some(gbr) = &self.gbr {
            encode_ie_with(buf, IeType::Gbr, |b| gbr.encode(b));
        }
        if let Some(qfi) = self.qfi {
            encode_u8_ie(buf, IeType::Qfi, qfi);
        }
    }

    pub fn decode(data: Bytes) -> PfcpResult<Self> {
        let mut qer_id = None;
        let mut qer = CreateQer::default();

        for_each_ie(data, |ie| {
            match ie.ie_type {
                t if t == IeType::QerId as u16 => qer_id = Some(ie.get_u32()?),
                t if t == IeType::GateStatus as u16 => {
                    qer.gate_status = GateStatus::from_u8(ie.get_u8()?);
                }
                t if t == IeType::Mbr as u16 => qer.mbr = Some(Bitrate::decode(&ie.data)?),
                t if t == IeType::Gbr as u16 => qer.gbr = Some(Bitrate::decode(&ie.data)?),
                t if t == IeType::Qfi as u16 => qer.qfi = Some(ie.get_u8()? & 0x3f),
                _ => {}
            }
            Ok(())
        })?;

        qer.qer_id = qer_id.ok_or(PfcpError::MissingMandatoryIe("QER ID"))?;
        Ok(qer)
    }
}

/// Update QER
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpdateQer {
    pub qer_id: u32,
    pub gate_status: Option<GateStatus>,
    pub mbr: Option<Bitrate>,
    pub gbr: Option<Bitrate>,
}

impl UpdateQer {
    pub fn encode(&self, buf: &mut BytesMut) {
        encode_u32_ie(buf, IeType::QerId, self.qer_id);
        if let Some(gate) = self.gate_status {
            encode_u8_ie(buf, IeType::GateStatus, gate.to_u8());
        }
        if let Some(mbr) = &self.mbr {
            encode_ie_with(buf, IeType::Mbr, |b| mbr.encode(b));
        }
        if let Some(gbr) = &self.gbr {
            encode_ie_with(buf, IeType::Gbr, |b| gbr.encode(b));
        }
    }

    pub fn decode(data: Bytes) -> PfcpResult<Self> {
        let mut qer_id = None;
        let mut qer = UpdateQer::default();

        for_each_ie(data, |ie| {
            match ie.ie_type {
                t if t == IeType::QerId as u16 => qer_id = Some(ie.get_u32()?),
                t if t == IeType::GateStatus as u16 => {
                    qer.gate_status = Some(GateStatus::from_u8(ie.get_u8()?));
                }
                t if t == IeType::Mbr as u16 => qer.mbr = Some(Bitrate::decode(&ie.data)?),
                t if t == IeType::Gbr as u16 => qer.gbr = Some(Bitrate::decode(&ie.data)?),
                _ => {}
            }
            Ok(())
        })?;

        qer.qer_id = qer_id.ok_or(PfcpError::MissingMandatoryIe("QER ID"))?;
        Ok(qer)
    }
}

/// Create URR
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CreateUrr {
    pub urr_id: u32,
    pub measurement_method: MeasurementMethod,
    pub reporting_triggers: ReportingTriggers,
    pub measurement_period: Option<u32>,
    pub volume_threshold: Option<Volume>,
    pub volume_quota: Option<Volume>,
    pub event_threshold: Option<u32>,
    pub event_quota: Option<u32>,
    pub time_threshold: Option<u32>,
    pub time_quota: Option<u32>,
    pub quota_holding_time: Option<u32>,
    pub quota_validity_time: Option<u32>,
    pub measurement_information: Option<MeasurementInformation>,
}

impl CreateUrr {
    pub fn encode(&self, buf: &mut BytesMut) {
        encode_u32_ie(buf, IeType::UrrId, self.urr_id);
        encode_u8_ie(buf, IeType::MeasurementMethod, self.measurement_method.0);
        encode_u24_ie(buf, IeType::ReportingTriggers, self.reporting_triggers.0);
        if let Some(v) = self.measurement_period {
            encode_u32_ie(buf, IeType::MeasurementPeriod, v);
        }
        if let Some(vol) = &self.volume_threshold {
            encode_ie_with(buf, IeType::VolumeThreshold, |b| vol.encode(b));
        }
        if let Some(vol) = &self.volume_quota {
            encode_ie_with(buf, IeType::VolumeQuota, |b| vol.encode(b));
        }
        if let Some(v) = self.event_threshold {
            encode_u32_ie(buf, IeType::EventThreshold, v);
        }
        if let Some(v) = self.event_quota {
            encode_u32_ie(buf, IeType::EventQuota, v);
        }
        if let Some(v) = self.time_threshold {
            encode_u32_ie(buf, IeType::TimeThreshold, v);
        }
        if let Some(v) = self.time_quota {
            encode_u32_ie(buf, IeType::TimeQuota, v);
        }
        if let Some(v) = self.quota_holding_time {
            encode_u32_ie(buf, IeType::QuotaHoldingTime, v);
        }
        if let Some(v) = self.quota_validity_time {
            encode_u32_ie(buf, IeType::QuotaValidityTime, v);
        }
        if let Some(info) = self.measurement_information {
            encode_u8_ie(buf, IeType::MeasurementInformation, info.0);
        }
    }

    pub fn decode(data: Bytes) -> PfcpResult<Self> {
        let mut urr_id = None;
        let mut urr = CreateUrr::default();

        for_each_ie(data, |ie| {
            match ie.ie_type {
                t if t == IeType::UrrId as u16 => urr_id = Some(ie.get_u32()?),
                t if t == IeType::MeasurementMethod as u16 => {
                    urr.measurement_method = MeasurementMethod(ie.get_u8()?);
                }
                t if t == IeType::ReportingTriggers as u16 => {
                    urr.reporting_triggers = ReportingTriggers(ie.get_u24()?);
                }
                t if t == IeType::MeasurementPeriod as u16 => {
                    urr.measurement_period = Some(ie.get_u32()?);
                }
                t if t == IeType::VolumeThreshold as u16 => {
                    urr.volume_threshold = Some(Volume::decode(&ie.data)?);
                }
                t if t == IeType::VolumeQuota as u16 => {
                    urr.volume_quota = Some(Volume::decode(&ie.data)?);
                }
                t if t == IeType::EventThreshold as u16 => urr.event_threshold = Some(ie.get_u32()?),
                t if t == IeType::EventQuota as u16 => urr.event_quota = Some(ie.get_u32()?),
                t if t == IeType::TimeThreshold as u16 => urr.time_threshold = Some(ie.get_u32()?),
                t if t == IeType::TimeQuota as u16 => urr.time_quota = Some(ie.get_u32()?),
                t if t == IeType::QuotaHoldingTime as u16 => {
                    urr.quota_holding_time = Some(ie.get_u32()?);
                }
                t if t == IeType::QuotaValidityTime as u16 => {
                    urr.quota_validity_time = Some(ie.get_u32()?);
                }
                t if t == IeType::MeasurementInformation as u16 => {
                    urr.measurement_information = Some(MeasurementInformation(ie.get_u8()?));
                }
                _ => {}
            }
            Ok(())
        })?;

        urr.urr_id = urr_id.ok_or(PfcpError::MissingMandatoryIe("URR ID"))?;
        Ok(urr)
    }
}

/// Update URR; only the changed IEs are present
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpdateUrr {
    pub urr_id: u32,
    pub measurement_method: Option<MeasurementMethod>,
    pub reporting_triggers: Option<ReportingTriggers>,
    pub volume_threshold: Option<Volume>,
    pub time_threshold: Option<u32>,
}

impl UpdateUrr {
    pub fn encode(&self, buf: &mut BytesMut) {
        encode_u32_ie(buf, IeType::UrrId, self.urr_id);
        if let Some(method) = self.measurement_method {
            encode_u8_ie(buf, IeType::MeasurementMethod, method.0);
        }
        if let Some(triggers) = self.reporting_triggers {
            encode_u24_ie(buf, IeType::ReportingTriggers, triggers.0);
        }
        if let Some(vol) = &self.volume_threshold {
            encode_ie_with(buf, IeType::VolumeThreshold, |b| vol.encode(b));
        }
        if let Some(v) = self.time_threshold {
            encode_u32_ie(buf, IeType::TimeThreshold, v);
        }
    }

    pub fn decode(data: Bytes) -> PfcpResult<Self> {
        let mut urr_id = None;
        let mut urr = UpdateUrr::default();

        for_each_ie(data, |ie| {
            match ie.ie_type {
                t if t == IeType::UrrId as u16 => urr_id = Some(ie.get_u32()?),
                t if t == IeType::MeasurementMethod as u16 => {
                    urr.measurement_method = Some(MeasurementMethod(ie.get_u8()?));
                }
                t if t == IeType::ReportingTriggers as u16 => {
                    urr.reporting_triggers = Some(ReportingTriggers(ie.get_u24()?));
                }
                t if t == IeType::VolumeThreshold as u16 => {
                    urr.volume_threshold = Some(Volume::decode(&ie.data)?);
                }
                t if t == IeType::TimeThreshold as u16 => urr.time_threshold = Some(ie.get_u32()?),
                _ => {}
            }
            Ok(())
        })?;

        urr.urr_id = urr_id.ok_or(PfcpError::MissingMandatoryIe("URR ID"))?;
        Ok(urr)
    }
}

/// Create BAR, also used for Update BAR
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CreateBar {
    pub bar_id: u8,
    pub downlink_data_notification_delay: Option<u8>,
    pub suggested_buffering_packets_count: Option<u8>,
}

impl CreateBar {
    pub fn encode(&self, buf: &mut BytesMut) {
        encode_u8_ie(buf, IeType::BarId, self.bar_id);
        if let Some(delay) = self.downlink_data_notification_delay {
            encode_u8_ie(buf, IeType::DownlinkDataNotificationDelay, delay);
        }
        if let Some(count) = self.suggested_buffering_packets_count {
            encode_u8_ie(buf, IeType::SuggestedBufferingPacketsCount, count);
        }
    }

    pub fn decode(data: Bytes) -> PfcpResult<Self> {
        let mut bar_id = None;
        let mut bar = CreateBar::default();

        for_each_ie(data, |ie| {
            match ie.ie_type {
                t if t == IeType::BarId as u16 => bar_id = Some(ie.get_u8()?),
                t if t == IeType::DownlinkDataNotificationDelay as u16 => {
                    bar.downlink_data_notification_delay = Some(ie.get_u8()?);
                }
                t if t == IeType::SuggestedBufferingPacketsCount as u16 => {
                    bar.suggested_buffering_packets_count = Some(ie.get_u8()?);
                }
                _ => {}
            }
            Ok(())
        })?;

        bar.bar_id = bar_id.ok_or(PfcpError::MissingMandatoryIe("BAR ID"))?;
        Ok(bar)
    }
}

/// Grouped IE carrying a single rule id (Remove PDR/FAR/QER/URR/BAR)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RemoveRule(pub u32);

impl RemoveRule {
    /// Encode the `Remove*` grouped IE of `group` around the id IE `id_type`.
    pub fn encode(&self, buf: &mut BytesMut, group: IeType, id_type: IeType) {
        let id = self.0;
        encode_ie_with(buf, group, |b| match id_type {
            IeType::PdrId => encode_u16_ie(b, id_type, id as u16),
            IeType::BarId => encode_u8_ie(b, id_type, id as u8),
            _ => encode_u32_ie(b, id_type, id),
        });
    }

    pub fn decode(data: Bytes, id_type: IeType) -> PfcpResult<Self> {
        let mut id = None;
        for_each_ie(data, |ie| {
            if ie.is(id_type) {
                id = Some(match id_type {
                    IeType::PdrId => ie.get_u16()? as u32,
                    IeType::BarId => ie.get_u8()? as u32,
                    _ => ie.get_u32()?,
                });
            }
            Ok(())
        })?;
        id.map(RemoveRule)
            .ok_or(PfcpError::MissingMandatoryIe("Rule ID"))
    }
}

/// Usage Report (SMR, SDR and SRR variants share the layout)
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UsageReport {
    pub urr_id: u32,
    pub ur_seqn: u32,
    pub usage_report_trigger: UsageReportTrigger,
    pub start_time: Option<u32>,
    pub end_time: Option<u32>,
    pub volume_measurement: Option<VolumeMeasurement>,
    pub duration_measurement: Option<u32>,
    pub time_of_first_packet: Option<u32>,
    pub time_of_last_packet: Option<u32>,
}

impl UsageReport {
    pub fn encode(&self, buf: &mut BytesMut) {
        encode_u32_ie(buf, IeType::UrrId, self.urr_id);
        encode_u32_ie(buf, IeType::UrSeqn, self.ur_seqn);
        encode_u24_ie(buf, IeType::UsageReportTrigger, self.usage_report_trigger.0);
        if let Some(v) = self.start_time {
            encode_u32_ie(buf, IeType::StartTime, v);
        }
        if let Some(v) = self.end_time {
            encode_u32_ie(buf, IeType::EndTime, v);
        }
        if let Some(vm) = &self.volume_measurement {
            encode_ie_with(buf, IeType::VolumeMeasurement, |b| vm.encode(b));
        }
        if let Some(v) = self.duration_measurement {
            encode_u32_ie(buf, IeType::DurationMeasurement, v);
        }
        if let Some(v) = self.time_of_first_packet {
            encode_u32_ie(buf, IeType::TimeOfFirstPacket, v);
        }
        if let Some(v) = self.time_of_last_packet {
            encode_u32_ie(buf, IeType::TimeOfLastPacket, v);
        }
    }

    pub fn decode(data: Bytes) -> PfcpResult<Self> {
        let mut urr_id = None;
        let mut report = UsageReport::default();

        for_each_ie(data, |ie| {
            match ie.ie_type {
                t if t == IeType::UrrId as u16 => urr_id = Some(ie.get_u32()?),
                t if t == IeType::UrSeqn as u16 => report.ur_seqn = ie.get_u32()?,
                t if t == IeType::UsageReportTrigger as u16 => {
                    report.usage_report_trigger = UsageReportTrigger(ie.get_u24()?);
                }
                t if t == IeType::StartTime as u16 => report.start_time = Some(ie.get_u32()?),
                t if t == IeType::EndTime as u16 => report.end_time = Some(ie.get_u32()?),
                t if t == IeType::VolumeMeasurement as u16 => {
                    report.volume_measurement = Some(VolumeMeasurement::decode(&ie.data)?);
                }
                t if t == IeType::DurationMeasurement as u16 => {
                    report.duration_measurement = Some(ie.get_u32()?);
                }
                t if t == IeType::TimeOfFirstPacket as u16 => {
                    report.time_of_first_packet = Some(ie.get_u32()?);
                }
                t if t == IeType::TimeOfLastPacket as u16 => {
                    report.time_of_last_packet = Some(ie.get_u32()?);
                }
                _ => {}
            }
            Ok(())
        })?;

        report.urr_id = urr_id.ok_or(PfcpError::MissingMandatoryIe("URR ID"))?;
        Ok(report)
    }
}

/// Downlink Data Report
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DownlinkDataReport {
    pub pdr_ids: Vec<u16>,
    pub service_information: Option<DownlinkDataServiceInformation>,
}

impl DownlinkDataReport {
    pub fn encode(&self, buf: &mut BytesMut) {
        for pdr_id in &self.pdr_ids {
            encode_u16_ie(buf, IeType::PdrId, *pdr_id);
        }
        if let Some(info) = &self.service_information {
            encode_ie_with(buf, IeType::DownlinkDataServiceInformation, |b| info.encode(b));
        }
    }

    pub fn decode(data: Bytes) -> PfcpResult<Self> {
        let mut report = DownlinkDataReport::default();
        for_each_ie(data, |ie| {
            match ie.ie_type {
                t if t == IeType::PdrId as u16 => report.pdr_ids.push(ie.get_u16()?),
                t if t == IeType::DownlinkDataServiceInformation as u16 => {
                    report.service_information =
                        Some(DownlinkDataServiceInformation::decode(&ie.data)?);
                }
                _ => {}
            }
            Ok(())
        })?;
        Ok(report)
    }
}

/// Error Indication Report
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ErrorIndicationReport {
    pub remote_f_teids: Vec<FTeid>,
}

impl ErrorIndicationReport {
    pub fn encode(&self, buf: &mut BytesMut) {
        for f_teid in &self.remote_f_teids {
            encode_ie_with(buf, IeType::FTeid, |b| f_teid.encode(b));
        }
    }

    pub fn decode(data: Bytes) -> PfcpResult<Self> {
        let mut report = ErrorIndicationReport::default();
        for_each_ie(data, |ie| {
            if ie.is(IeType::FTeid) {
                report.remote_f_teids.push(FTeid::decode(&ie.data)?);
            }
            Ok(())
        })?;
        Ok(report)
    }
}

/// Encode `items` as repeated grouped IEs of `ie_type`.
pub(crate) fn encode_each<T>(
    buf: &mut BytesMut,
    ie_type: IeType,
    items: &[T],
    encode: impl Fn(&T, &mut BytesMut),
) {
    for item in items {
        encode_ie_with(buf, ie_type, |b| encode(item, b));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ie::RawIe;
    use crate::types::Volume;

    fn grouped(ie_type: IeType, f: impl FnOnce(&mut BytesMut)) -> RawIe {
        let mut buf = BytesMut::new();
        encode_ie_with(&mut buf, ie_type, f);
        RawIe::decode(&mut buf.freeze()).unwrap()
    }

    #[test]
    fn test_create_pdr_roundtrip() {
        let pdr = CreatePdr {
            pdr_id: 1,
            precedence: Some(255),
            pdi: Pdi {
                source_interface: PfcpInterface::Access,
                local_f_teid: Some(FTeid::choose(true, false, Some(1))),
                network_instance: Some("internet".to_string()),
                ue_ip_address: Some(UeIpAddress {
                    ipv4: Some("10.45.0.2".parse().unwrap()),
                    ipv6: None,
                    destination: false,
                }),
                sdf_filters: vec![SdfFilter {
                    flow_description: "permit out ip from any to assigned".to_string(),
                }],
                qfi: Some(9),
            },
            outer_header_removal: Some(OuterHeaderRemoval(OuterHeaderRemoval::GTPU_UDP_IPV4)),
            far_id: Some(1),
            urr_ids: vec![1, 2],
            qer_id: Some(1),
        };

        let ie = grouped(IeType::CreatePdr, |b| pdr.encode(b));
        assert!(ie.is(IeType::CreatePdr));
        assert_eq!(CreatePdr::decode(ie.data).unwrap(), pdr);
    }

    #[test]
    fn test_create_pdr_requires_pdi() {
        let ie = grouped(IeType::CreatePdr, |b| encode_u16_ie(b, IeType::PdrId, 1));
        assert!(matches!(
            CreatePdr::decode(ie.data),
            Err(PfcpError::MissingMandatoryIe("PDI"))
        ));
    }

    #[test]
    fn test_create_far_buffering() {
        let far = CreateFar {
            far_id: 2,
            apply_action: ApplyAction(ApplyAction::BUFF | ApplyAction::NOCP),
            forwarding_parameters: None,
            bar_id: Some(1),
        };
        let ie = grouped(IeType::CreateFar, |b| far.encode(b));
        assert_eq!(CreateFar::decode(ie.data).unwrap(), far);
    }

    #[test]
    fn test_update_far_with_smreq_flags() {
        let far = UpdateFar {
            far_id: 3,
            apply_action: Some(ApplyAction(ApplyAction::FORW)),
            update_forwarding_parameters: Some(UpdateForwardingParameters {
                destination_interface: Some(PfcpInterface::Access),
                network_instance: None,
                outer_header_creation: Some(OuterHeaderCreation {
                    teid: 0x55,
                    ipv4: Some("10.0.0.9".parse().unwrap()),
                    ipv6: None,
                }),
                smreq_flags: Some(SmreqFlags(SmreqFlags::SNDEM)),
            }),
            bar_id: None,
        };
        let ie = grouped(IeType::UpdateFar, |b| far.encode(b));
        assert_eq!(UpdateFar::decode(ie.data).unwrap(), far);
    }

    #[test]
    fn test_create_urr_roundtrip() {
        let urr = CreateUrr {
            urr_id: 7,
            measurement_method: MeasurementMethod(MeasurementMethod::VOLUM | MeasurementMethod::DURAT),
            reporting_triggers: ReportingTriggers(
                ReportingTriggers::VOLUME_THRESHOLD | ReportingTriggers::TIME_THRESHOLD,
            ),
            measurement_period: None,
            volume_threshold: Some(Volume { total: Some(1_000_000), ..Default::default() }),
            volume_quota: None,
            event_threshold: None,
            event_quota: None,
            time_threshold: Some(60),
            time_quota: None,
            quota_holding_time: None,
            quota_validity_time: Some(3600),
            measurement_information: Some(MeasurementInformation(MeasurementInformation::MNOP)),
        };
        let ie = grouped(IeType::CreateUrr, |b| urr.encode(b));
        assert_eq!(CreateUrr::decode(ie.data).unwrap(), urr);
    }

    #[test]
    fn test_remove_rule_id_widths() {
        let mut buf = BytesMut::new();
        RemoveRule(5).encode(&mut buf, IeType::RemovePdr, IeType::PdrId);
        assert_eq!(&buf[..], &[0, 15, 0, 6, 0, 56, 0, 2, 0, 5]);

        let ie = RawIe::decode(&mut buf.freeze()).unwrap();
        assert_eq!(RemoveRule::decode(ie.data, IeType::PdrId).unwrap(), RemoveRule(5));

        let ie = grouped(IeType::RemoveBar, |b| encode_u8_ie(b, IeType::BarId, 1));
        assert_eq!(RemoveRule::decode(ie.data, IeType::BarId).unwrap(), RemoveRule(1));
    }

    #[test]
    fn test_usage_report_roundtrip() {
        let report = UsageReport {
            urr_id: 1,
            ur_seqn: 4,
            usage_report_trigger: UsageReportTrigger(UsageReportTrigger::TERMINATION_REPORT),
            start_time: Some(100),
            end_time: Some(160),
            volume_measurement: Some(VolumeMeasurement {
                total_volume: Some(4096),
                ..Default::default()
            }),
            duration_measurement: Some(60),
            time_of_first_packet: None,
            time_of_last_packet: None,
        };
        let ie = grouped(IeType::UsageReportSdr, |b| report.encode(b));
        assert_eq!(UsageReport::decode(ie.data).unwrap(), report);
    }
}
