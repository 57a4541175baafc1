//! PFCP Messages
//!
//! PFCP message structures and encoding/decoding as specified in 3GPP TS 29.244.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use crate::error::{PfcpError, PfcpResult};
use crate::grouped::{
    encode_each, CreateBar, CreateFar, CreatePdr, CreateQer, CreateUrr, CreatedPdr,
    DownlinkDataReport, ErrorIndicationReport, RemoveRule, UpdateFar, UpdatePdr, UpdateQer,
    UpdateUrr, UsageReport,
};
use crate::header::{PfcpHeader, PfcpMessageType};
use crate::ie::{encode_ie_with, encode_u32_ie, encode_u8_ie, for_each_ie, IeType, RawIe};
use crate::types::{
    CpFunctionFeatures, FSeid, NodeId, PfcpCause, ReportType, UpFunctionFeatures,
    UserPlaneIpResourceInformation,
};

fn decode_cause(ie: &RawIe) -> PfcpResult<PfcpCause> {
    PfcpCause::try_from(ie.get_u8()?)
}

fn encode_cause(buf: &mut BytesMut, cause: PfcpCause) {
    encode_u8_ie(buf, IeType::Cause, cause as u8);
}

/// Heartbeat Request message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeartbeatRequest {
    pub recovery_time_stamp: u32,
}

impl HeartbeatRequest {
    pub fn new(recovery_time_stamp: u32) -> Self {
        Self { recovery_time_stamp }
    }

    pub fn encode(&self, buf: &mut BytesMut) {
        encode_u32_ie(buf, IeType::RecoveryTimeStamp, self.recovery_time_stamp);
    }

    pub fn decode(buf: Bytes) -> PfcpResult<Self> {
        let mut recovery_time_stamp = None;
        for_each_ie(buf, |ie| {
            if ie.is(IeType::RecoveryTimeStamp) {
                recovery_time_stamp = Some(ie.get_u32()?);
            }
            Ok(())
        })?;
        Ok(Self {
            recovery_time_stamp: recovery_time_stamp
                .ok_or(PfcpError::MissingMandatoryIe("Recovery Time Stamp"))?,
        })
    }
}

/// Heartbeat Response message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeartbeatResponse {
    pub recovery_time_stamp: u32,
}

impl HeartbeatResponse {
    pub fn new(recovery_time_stamp: u32) -> Self {
        Self { recovery_time_stamp }
    }

    pub fn encode(&self, buf: &mut BytesMut) {
        encode_u32_ie(buf, IeType::RecoveryTimeStamp, self.recovery_time_stamp);
    }

    pub fn decode(buf: Bytes) -> PfcpResult<Self> {
        let req = HeartbeatRequest::decode(buf)?;
        Ok(Self { recovery_time_stamp: req.recovery_time_stamp })
    }
}

/// Body shared by Association Setup Request and Response
#[derive(Debug, Clone, PartialEq, Eq)]
struct AssociationSetupBody {
    node_id: NodeId,
    cause: Option<PfcpCause>,
    recovery_time_stamp: u32,
    up_function_features: Option<UpFunctionFeatures>,
    cp_function_features: Option<CpFunctionFeatures>,
    user_plane_ip_resource_information: Vec<UserPlaneIpResourceInformation>,
}

impl AssociationSetupBody {
    fn encode(&self, buf: &mut BytesMut) {
        encode_ie_with(buf, IeType::NodeId, |b| self.node_id.encode(b));
        if let Some(cause) = self.cause {
            encode_cause(buf, cause);
        }
        encode_u32_ie(buf, IeType::RecoveryTimeStamp, self.recovery_time_stamp);
        if let Some(features) = &self.up_function_features {
            encode_ie_with(buf, IeType::UpFunctionFeatures, |b| features.encode(b));
        }
        if let Some(features) = self.cp_function_features {
            encode_u8_ie(buf, IeType::CpFunctionFeatures, features.0);
        }
        encode_each(
            buf,
            IeType::UserPlaneIpResourceInformation,
            &self.user_plane_ip_resource_information,
            UserPlaneIpResourceInformation::encode,
        );
    }

    fn decode(buf: Bytes) -> PfcpResult<Self> {
        let mut node_id = None;
        let mut cause = None;
        let mut recovery_time_stamp = None;
        let mut up_function_features = None;
        let mut cp_function_features = None;
        let mut user_plane_ip_resource_information = Vec::new();

        for_each_ie(buf, |ie| {
            match ie.ie_type {
                t if t == IeType::NodeId as u16 => node_id = Some(NodeId::decode(&ie.data)?),
                t if t == IeType::Cause as u16 => cause = Some(decode_cause(&ie)?),
                t if t == IeType::RecoveryTimeStamp as u16 => {
                    recovery_time_stamp = Some(ie.get_u32()?);
                }
                t if t == IeType::UpFunctionFeatures as u16 => {
                    up_function_features = Some(UpFunctionFeatures::decode(&ie.data)?);
                }
                t if t == IeType::CpFunctionFeatures as u16 => {
                    cp_function_features = Some(CpFunctionFeatures(ie.get_u8()?));
                }
                t if t == IeType::UserPlaneIpResourceInformation as u16 => {
                    user_plane_ip_resource_information
                        .push(UserPlaneIpResourceInformation::decode(&ie.data)?);
                }
                _ => {}
            }
            Ok(())
        })?;

        Ok(Self {
            node_id: node_id.ok_or(PfcpError::MissingMandatoryIe("Node ID"))?,
            cause,
            recovery_time_stamp: recovery_time_stamp
                .ok_or(PfcpError::MissingMandatoryIe("Recovery Time Stamp"))?,
            up_function_features,
            cp_function_features,
            user_plane_ip_resource_information,
        })
    }
}

/// Association Setup Request message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssociationSetupRequest {
    pub node_id: NodeId,
    pub recovery_time_stamp: u32,
    pub up_function_features: Option<UpFunctionFeatures>,
    pub cp_function_features: Option<CpFunctionFeatures>,
    pub user_plane_ip_resource_information: Vec<UserPlaneIpResourceInformation>,
}

impl AssociationSetupRequest {
    pub fn new(node_id: NodeId, recovery_time_stamp: u32) -> Self {
        Self {
            node_id,
            recovery_time_stamp,
            up_function_features: None,
            cp_function_features: None,
            user_plane_ip_resource_information: Vec::new(),
        }
    }

    pub fn encode(&self, buf: &mut BytesMut) {
        AssociationSetupBody {
            node_id: self.node_id.clone(),
            cause: None,
            recovery_time_stamp: self.recovery_time_stamp,
            up_function_features: self.up_function_features,
            cp_function_features: self.cp_function_features,
            user_plane_ip_resource_information: self.user_plane_ip_resource_information.clone(),
        }
        .encode(buf)
    }

    pub fn decode(buf: Bytes) -> PfcpResult<Self> {
        let body = AssociationSetupBody::decode(buf)?;
        Ok(Self {
            node_id: body.node_id,
            recovery_time_stamp: body.recovery_time_stamp,
            up_function_features: body.up_function_features,
            cp_function_features: body.cp_function_features,
            user_plane_ip_resource_information: body.user_plane_ip_resource_information,
        })
    }
}

/// Association Setup Response message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssociationSetupResponse {
    pub node_id: NodeId,
    pub cause: PfcpCause,
    pub recovery_time_stamp: u32,
    pub up_function_features: Option<UpFunctionFeatures>,
    pub cp_function_features: Option<CpFunctionFeatures>,
    pub user_plane_ip_resource_information: Vec<UserPlaneIpResourceInformation>,
}

impl AssociationSetupResponse {
    pub fn new(node_id: NodeId, cause: PfcpCause, recovery_time_stamp: u32) -> Self {
        Self {
            node_id,
            cause,
            recovery_time_stamp,
            up_function_features: None,
            cp_function_features: None,
            user_plane_ip_resource_information: Vec::new(),
        }
    }

    pub fn encode(&self, buf: &mut BytesMut) {
        AssociationSetupBody {
            node_id: self.node_id.clone(),
            cause: Some(self.cause),
            recovery_time_stamp: self.recovery_time_stamp,
            up_function_features: self.up_function_features,
            cp_function_features: self.cp_function_features,
            user_plane_ip_resource_information: self.user_plane_ip_resource_information.clone(),
        }
        .encode(buf)
    }

    pub fn decode(buf: Bytes) -> PfcpResult<Self> {
        let body = AssociationSetupBody::decode(buf)?;
        Ok(Self {
            node_id: body.node_id,
            cause: body.cause.ok_or(PfcpError::MissingMandatoryIe("Cause"))?,
            recovery_time_stamp: body.recovery_time_stamp,
            up_function_features: body.up_function_features,
            cp_function_features: body.cp_function_features,
            user_plane_ip_resource_information: body.user_plane_ip_resource_information,
        })
    }
}

/// Association Release Request message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssociationReleaseRequest {
    pub node_id: NodeId,
}

impl AssociationReleaseRequest {
    pub fn encode(&self, buf: &mut BytesMut) {
        encode_ie_with(buf, IeType::NodeId, |b| self.node_id.encode(b));
    }

    pub fn decode(buf: Bytes) -> PfcpResult<Self> {
        let mut node_id = None;
        for_each_ie(buf, |ie| {
            if ie.is(IeType::NodeId) {
                node_id = Some(NodeId::decode(&ie.data)?);
            }
            Ok(())
        })?;
        Ok(Self {
            node_id: node_id.ok_or(PfcpError::MissingMandatoryIe("Node ID"))?,
        })
    }
}

/// Association Release Response message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssociationReleaseResponse {
    pub node_id: NodeId,
    pub cause: PfcpCause,
}

impl AssociationReleaseResponse {
    pub fn encode(&self, buf: &mut BytesMut) {
        encode_ie_with(buf, IeType::NodeId, |b| self.node_id.encode(b));
        encode_cause(buf, self.cause);
    }

    pub fn decode(buf: Bytes) -> PfcpResult<Self> {
        let mut node_id = None;
        let mut cause = None;
        for_each_ie(buf, |ie| {
            if ie.is(IeType::NodeId) {
                node_id = Some(NodeId::decode(&ie.data)?);
            } else if ie.is(IeType::Cause) {
                cause = Some(decode_cause(&ie)?);
            }
            Ok(())
        })?;
        Ok(Self {
            node_id: node_id.ok_or(PfcpError::MissingMandatoryIe("Node ID"))?,
            cause: cause.ok_or(PfcpError::MissingMandatoryIe("Cause"))?,
        })
    }
}

/// Session Establishment Request message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionEstablishmentRequest {
    pub node_id: NodeId,
    pub cp_f_seid: FSeid,
    pub create_pdrs: Vec<CreatePdr>,
    pub create_fars: Vec<CreateFar>,
    pub create_urrs: Vec<CreateUrr>,
    pub create_qers: Vec<CreateQer>,
    pub create_bar: Option<CreateBar>,
    pub pdn_type: Option<u8>,
}

impl SessionEstablishmentRequest {
    pub fn new(node_id: NodeId, cp_f_seid: FSeid) -> Self {
        Self {
            node_id,
            cp_f_seid,
            create_pdrs: Vec::new(),
            create_fars: Vec::new(),
            create_urrs: Vec::new(),
            create_qers: Vec::new(),
            create_bar: None,
            pdn_type: None,
        }
    }

    pub fn encode(&self, buf: &mut BytesMut) {
        encode_ie_with(buf, IeType::NodeId, |b| self.node_id.encode(b));
        encode_ie_with(buf, IeType::FSeid, |b| self.cp_f_seid.encode(b));
        encode_each(buf, IeType::CreatePdr, &self.create_pdrs, CreatePdr::encode);
        encode_each(buf, IeType::CreateFar, &self.create_fars, CreateFar::encode);
        encode_each(buf, IeType::CreateUrr, &self.create_urrs, CreateUrr::encode);
        encode_each(buf, IeType::CreateQer, &self.create_qers, CreateQer::encode);
        if let Some(bar) = &self.create_bar {
            encode_ie_with(buf, IeType::CreateBar, |b| bar.encode(b));
        }
        if let Some(pdn_type) = self.pdn_type {
            encode_u8_ie(buf, IeType::PdnType, pdn_type);
        }
    }

    pub fn decode(buf: Bytes) -> PfcpResult<Self> {
        let mut node_id = None;
        let mut cp_f_seid = None;
        let mut create_pdrs = Vec::new();
        let mut create_fars = Vec::new();
        let mut create_urrs = Vec::new();
        let mut create_qers = Vec::new();
        let mut create_bar = None;
        let mut pdn_type = None;

        for_each_ie(buf, |ie| {
            match ie.ie_type {
                t if t == IeType::NodeId as u16 => node_id = Some(NodeId::decode(&ie.data)?),
                t if t == IeType::FSeid as u16 => cp_f_seid = Some(FSeid::decode(&ie.data)?),
                t if t == IeType::CreatePdr as u16 => create_pdrs.push(CreatePdr::decode(ie.data)?),
                t if t == IeType::CreateFar as u16 => create_fars.push(CreateFar::decode(ie.data)?),
                t if t == IeType::CreateUrr as u16 => create_urrs.push(CreateUrr::decode(ie.data)?),
                t if t == IeType::CreateQer as u16 => create_qers.push(CreateQer::decode(ie.data)?),
                t if t == IeType::CreateBar as u16 => create_bar = Some(CreateBar::decode(ie.data)?),
                t if t == IeType::PdnType as u16 => pdn_type = Some(ie.get_u8()? & 0x07),
                _ => {}
            }
            Ok(())
        })?;

        Ok(Self {
            node_id: node_id.ok_or(PfcpError::MissingMandatoryIe("Node ID"))?,
            cp_f_seid: cp_f_seid.ok_or(PfcpError::MissingMandatoryIe("CP F-SEID"))?,
            create_pdrs,
            create_fars,
            create_urrs,
            create_qers,
            create_bar,
            pdn_type,
        })
    }
}

/// Session Establishment Response message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionEstablishmentResponse {
    pub node_id: NodeId,
    pub cause: PfcpCause,
    pub up_f_seid: Option<FSeid>,
    pub created_pdrs: Vec<CreatedPdr>,
}

impl SessionEstablishmentResponse {
    pub fn new(node_id: NodeId, cause: PfcpCause) -> Self {
        Self { node_id, cause, up_f_seid: None, created_pdrs: Vec::new() }
    }

    pub fn encode(&self, buf: &mut BytesMut) {
        encode_ie_with(buf, IeType::NodeId, |b| self.node_id.encode(b));
        encode_cause(buf, self.cause);
        if let Some(f_seid) = &self.up_f_seid {
            encode_ie_with(buf, IeType::FSeid, |b| f_seid.encode(b));
        }
        encode_each(buf, IeType::CreatedPdr, &self.created_pdrs, CreatedPdr::encode);
    }

    pub fn decode(buf: Bytes) -> PfcpResult<Self> {
        let mut node_id = None;
        let mut cause = None;
        let mut up_f_seid = None;
        let mut created_pdrs = Vec::new();

        for_each_ie(buf, |ie| {
            match ie.ie_type {
                t if t == IeType::NodeId as u16 => node_id = Some(NodeId::decode(&ie.data)?),
                t if t == IeType::Cause as u16 => cause = Some(decode_cause(&ie)?),
                t if t == IeType::FSeid as u16 => up_f_seid = Some(FSeid::decode(&ie.data)?),
                t if t == IeType::CreatedPdr as u16 => {
                    created_pdrs.push(CreatedPdr::decode(ie.data)?);
                }
                _ => {}
            }
            Ok(())
        })?;

        Ok(Self {
            node_id: node_id.ok_or(PfcpError::MissingMandatoryIe("Node ID"))?,
            cause: cause.ok_or(PfcpError::MissingMandatoryIe("Cause"))?,
            up_f_seid,
            created_pdrs,
        })
    }
}

/// Session Modification Request message
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionModificationRequest {
    pub cp_f_seid: Option<FSeid>,
    pub remove_pdrs: Vec<u16>,
    pub remove_fars: Vec<u32>,
    pub remove_urrs: Vec<u32>,
    pub remove_qers: Vec<u32>,
    pub remove_bar: Option<u8>,
    pub create_pdrs: Vec<CreatePdr>,
    pub create_fars: Vec<CreateFar>,
    pub create_urrs: Vec<CreateUrr>,
    pub create_qers: Vec<CreateQer>,
    pub create_bar: Option<CreateBar>,
    pub update_pdrs: Vec<UpdatePdr>,
    pub update_fars: Vec<UpdateFar>,
    pub update_urrs: Vec<UpdateUrr>,
    pub update_qers: Vec<UpdateQer>,
    pub update_bar: Option<CreateBar>,
}

impl SessionModificationRequest {
    pub fn new() -> Self {
        Self::default()
    }

    /// True when the request would change nothing on the UP function.
    pub fn is_empty(&self) -> bool {
        self.remove_pdrs.is_empty()
            && self.remove_fars.is_empty()
            && self.remove_urrs.is_empty()
            && self.remove_qers.is_empty()
            && self.remove_bar.is_none()
            && self.create_pdrs.is_empty()
            && self.create_fars.is_empty()
            && self.create_urrs.is_empty()
            && self.create_qers.is_empty()
            && self.create_bar.is_none()
            && self.update_pdrs.is_empty()
            && self.update_fars.is_empty()
            && self.update_urrs.is_empty()
            && self.update_qers.is_empty()
            && self.update_bar.is_none()
    }

    pub fn encode(&self, buf: &mut BytesMut) {
        if let Some(f_seid) = &self.cp_f_seid {
            encode_ie_with(buf, IeType::FSeid, |b| f_seid.encode(b));
        }
        for id in &self.remove_pdrs {
            RemoveRule(*id as u32).encode(buf, IeType::RemovePdr, IeType::PdrId);
        }
        for id in &self.remove_fars {
            RemoveRule(*id).encode(buf, IeType::RemoveFar, IeType::FarId);
        }
        for id in &self.remove_urrs {
            RemoveRule(*id).encode(buf, IeType::RemoveUrr, IeType::UrrId);
        }
        for id in &self.remove_qers {
            RemoveRule(*id).encode(buf, IeType::RemoveQer, IeType::QerId);
        }
        encode_each(buf, IeType::CreatePdr, &self.create_pdrs, CreatePdr::encode);
        encode_each(buf, IeType::CreateFar, &self.create_fars, CreateFar::encode);
        encode_each(buf, IeType::CreateUrr, &self.create_urrs, CreateUrr::encode);
        encode_each(buf, IeType::CreateQer, &self.create_qers, CreateQer::encode);
        encode_each(buf, IeType::UpdatePdr, &self.update_pdrs, UpdatePdr::encode);
        encode_each(buf, IeType::UpdateFar, &self.update_fars, UpdateFar::encode);
        encode_each(buf, IeType::UpdateUrr, &self.update_urrs, UpdateUrr::encode);
        encode_each(buf, IeType::UpdateQer, &self.update_qers, UpdateQer::encode);
        if let Some(id) = self.remove_bar {
            RemoveRule(id as u32).encode(buf, IeType::RemoveBar, IeType::BarId);
        }
        if let Some(bar) = &self.create_bar {
            encode_ie_with(buf, IeType::CreateBar, |b| bar.encode(b));
        }
        if let Some(bar) = &self.update_bar {
            encode_ie_with(buf, IeType::UpdateBarSmr, |b| bar.encode(b));
        }
    }

    pub fn decode(buf: Bytes) -> PfcpResult<Self> {
        let mut msg = Self::new();

        for_each_ie(buf, |ie| {
            match ie.ie_type {
                t if t == IeType::FSeid as u16 => msg.cp_f_seid = Some(FSeid::decode(&ie.data)?),
                t if t == IeType::RemovePdr as u16 => {
                    msg.remove_pdrs.push(RemoveRule::decode(ie.data, IeType::PdrId)?.0 as u16);
                }
                t if t == IeType::RemoveFar as u16 => {
                    msg.remove_fars.push(RemoveRule::decode(ie.data, IeType::FarId)?.0);
                }
                t if t == IeType::RemoveUrr as u16 => {
                    msg.remove_urrs.push(RemoveRule::decode(ie.data, IeType::UrrId)?.0);
                }
                t if t == IeType::RemoveQer as u16 => {
                    msg.remove_qers.push(RemoveRule::decode(ie.data, IeType::QerId)?.0);
                }
                t if t == IeType::RemoveBar as u16 => {
                    msg.remove_bar = Some(RemoveRule::decode(ie.data, IeType::BarId)?.0 as u8);
                }
                t if t == IeType::CreatePdr as u16 => {
                    msg.create_pdrs.push(CreatePdr::decode(ie.data)?);
                }
                t if t == IeType::CreateFar as u16 => {
                    msg.create_fars.push(CreateFar::decode(ie.data)?);
                }
                t if t == IeType::CreateUrr as u16 => {
                    msg.create_urrs.push(CreateUrr::decode(ie.data)?);
                }
                t if t == IeType::CreateQer as u16 => {
                    msg.create_qers.push(CreateQer::decode(ie.data)?);
                }
                t if t == IeType::CreateBar as u16 => {
                    msg.create_bar = Some(CreateBar::decode(ie.data)?);
                }
                t if t == IeType::UpdatePdr as u16 => {
                    msg.update_pdrs.push(UpdatePdr::decode(ie.data)?);
                }
                t if t == IeType::UpdateFar as u16 => {
                    msg.update_fars.push(UpdateFar::decode(ie.data)?);
                }
                t if t == IeType::UpdateUrr as u16 => {
                    msg.update_urrs.push(UpdateUrr::decode(ie.data)?);
                }
                t if t == IeType::UpdateQer as u16 => {
                    msg.update_qers.push(UpdateQer::decode(ie.data)?);
                }
                t if t == IeType::UpdateBarSmr as u16 => {
                    msg.update_bar = Some(CreateBar::decode(ie.data)?);
                }
                _ => {}
            }
            Ok(())
        })?;

        Ok(msg)
    }
}

/// Session Modification Response message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionModificationResponse {
    pub cause: PfcpCause,
    pub created_pdrs: Vec<CreatedPdr>,
    pub usage_reports: Vec<UsageReport>,
}

impl SessionModificationResponse {
    pub fn new(cause: PfcpCause) -> Self {
        Self { cause, created_pdrs: Vec::new(), usage_reports: Vec::new() }
    }

    pub fn encode(&self, buf: &mut BytesMut) {
        encode_cause(buf, self.cause);
        encode_each(buf, IeType::CreatedPdr, &self.created_pdrs, CreatedPdr::encode);
        encode_each(buf, IeType::UsageReportSmr, &self.usage_reports, UsageReport::encode);
    }

    pub fn decode(buf: Bytes) -> PfcpResult<Self> {
        let mut cause = None;
        let mut created_pdrs = Vec::new();
        let mut usage_reports = Vec::new();

        for_each_ie(buf, |ie| {
            match ie.ie_type {
                t if t == IeType::Cause as u16 => cause = Some(decode_cause(&ie)?),
                t if t == IeType::CreatedPdr as u16 => {
                    created_pdrs.push(CreatedPdr::decode(ie.data)?);
                }
                t if t == IeType::UsageReportSmr as u16 => {
                    usage_reports.push(UsageReport::decode(ie.data)?);
                }
                _ => {}
            }
            Ok(())
        })?;

        Ok(Self {
            cause: cause.ok_or(PfcpError::MissingMandatoryIe("Cause"))?,
            created_pdrs,
            usage_reports,
        })
    }
}

/// Session Deletion Request message (empty body)
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionDeletionRequest;

impl SessionDeletionRequest {
    pub fn encode(&self, _buf: &mut BytesMut) {}

    pub fn decode(_buf: Bytes) -> PfcpResult<Self> {
        Ok(Self)
    }
}

/// Session Deletion Response message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionDeletionResponse {
    pub cause: PfcpCause,
    pub usage_reports: Vec<UsageReport>,
}

impl SessionDeletionResponse {
    pub fn new(cause: PfcpCause) -> Self {
        Self { cause, usage_reports: Vec::new() }
    }

    pub fn encode(&self, buf: &mut BytesMut) {
        encode_cause(buf, self.cause);
        encode_each(buf, IeType::UsageReportSdr, &self.usage_reports, UsageReport::encode);
    }

    pub fn decode(buf: Bytes) -> PfcpResult<Self> {
        let mut cause = None;
        let mut usage_reports = Vec::new();

        for_each_ie(buf, |ie| {
            if ie.is(IeType::Cause) {
                cause = Some(decode_cause(&ie)?);
            } else if ie.is(IeType::UsageReportSdr) {
                usage_reports.push(UsageReport::decode(ie.data)?);
            }
            Ok(())
        })?;

        Ok(Self {
            cause: cause.ok_or(PfcpError::MissingMandatoryIe("Cause"))?,
            usage_reports,
        })
    }
}

/// Session Report Request message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionReportRequest {
    pub report_type: ReportType,
    pub downlink_data_report: Option<DownlinkDataReport>,
    pub usage_reports: Vec<UsageReport>,
    pub error_indication_report: Option<ErrorIndicationReport>,
}

impl SessionReportRequest {
    pub fn new(report_type: ReportType) -> Self {
        Self {
            report_type,
            downlink_data_report: None,
            usage_reports: Vec::new(),
            error_indication_report: None,
        }
    }

    pub fn encode(&self, buf: &mut BytesMut) {
        encode_u8_ie(buf, IeType::ReportType, self.report_type.0);
        if let Some(report) = &self.downlink_data_report {
            encode_ie_with(buf, IeType::DownlinkDataReport, |b| report.encode(b));
        }
        encode_each(buf, IeType::UsageReportSrr, &self.usage_reports, UsageReport::encode);
        if let Some(report) = &self.error_indication_report {
            encode_ie_with(buf, IeType::ErrorIndicationReport, |b| report.encode(b));
        }
    }

    pub fn decode(buf: Bytes) -> PfcpResult<Self> {
        let mut report_type = None;
        let mut downlink_data_report = None;
        let mut usage_reports = Vec::new();
        let mut error_indication_report = None;

        for_each_ie(buf, |ie| {
            match ie.ie_type {
                t if t == IeType::ReportType as u16 => report_type = Some(ReportType(ie.get_u8()?)),
                t if t == IeType::DownlinkDataReport as u16 => {
                    downlink_data_report = Some(DownlinkDataReport::decode(ie.data)?);
                }
                t if t == IeType::UsageReportSrr as u16 => {
                    usage_reports.push(UsageReport::decode(ie.data)?);
                }
                t if t == IeType::ErrorIndicationReport as u16 => {
                    error_indication_report = Some(ErrorIndicationReport::decode(ie.data)?);
                }
                _ => {}
            }
            Ok(())
        })?;

        Ok(Self {
            report_type: report_type.ok_or(PfcpError::MissingMandatoryIe("Report Type"))?,
            downlink_data_report,
            usage_reports,
            error_indication_report,
        })
    }
}

/// Session Report Response message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionReportResponse {
    pub cause: PfcpCause,
}

impl SessionReportResponse {
    pub fn new(cause: PfcpCause) -> Self {
        Self { cause }
    }

    pub fn encode(&self, buf: &mut BytesMut) {
        encode_cause(buf, self.cause);
    }

    pub fn decode(buf: Bytes) -> PfcpResult<Self> {
        let mut cause = None;
        for_each_ie(buf, |ie| {
            if ie.is(IeType::Cause) {
                cause = Some(decode_cause(&ie)?);
            }
            Ok(())
        })?;
        Ok(Self {
            cause: cause.ok_or(PfcpError::MissingMandatoryIe("Cause"))?,
        })
    }
}

/// PFCP Message enum containing all message types
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PfcpMessage {
    HeartbeatRequest(HeartbeatRequest),
    HeartbeatResponse(HeartbeatResponse),
    AssociationSetupRequest(AssociationSetupRequest),
    AssociationSetupResponse(AssociationSetupResponse),
    AssociationReleaseRequest(AssociationReleaseRequest),
    AssociationReleaseResponse(AssociationReleaseResponse),
    SessionEstablishmentRequest(SessionEstablishmentRequest),
    SessionEstablishmentResponse(SessionEstablishmentResponse),
    SessionModificationRequest(SessionModificationRequest),
    SessionModificationResponse(SessionModificationResponse),
    SessionDeletionRequest(SessionDeletionRequest),
    SessionDeletionResponse(SessionDeletionResponse),
    SessionReportRequest(SessionReportRequest),
    SessionReportResponse(SessionReportResponse),
}

impl PfcpMessage {
    /// Get the message type
    pub fn message_type(&self) -> PfcpMessageType {
        match self {
            Self::HeartbeatRequest(_) => PfcpMessageType::HeartbeatRequest,
            Self::HeartbeatResponse(_) => PfcpMessageType::HeartbeatResponse,
            Self::AssociationSetupRequest(_) => PfcpMessageType::AssociationSetupRequest,
            Self::AssociationSetupResponse(_) => PfcpMessageType::AssociationSetupResponse,
            Self::AssociationReleaseRequest(_) => PfcpMessageType::AssociationReleaseRequest,
            Self::AssociationReleaseResponse(_) => PfcpMessageType::AssociationReleaseResponse,
            Self::SessionEstablishmentRequest(_) => PfcpMessageType::SessionEstablishmentRequest,
            Self::SessionEstablishmentResponse(_) => PfcpMessageType::SessionEstablishmentResponse,
            Self::SessionModificationRequest(_) => PfcpMessageType::SessionModificationRequest,
            Self::SessionModificationResponse(_) => PfcpMessageType::SessionModificationResponse,
            Self::SessionDeletionRequest(_) => PfcpMessageType::SessionDeletionRequest,
            Self::SessionDeletionResponse(_) => PfcpMessageType::SessionDeletionResponse,
            Self::SessionReportRequest(_) => PfcpMessageType::SessionReportRequest,
            Self::SessionReportResponse(_) => PfcpMessageType::SessionReportResponse,
        }
    }

    /// Encode the message body (without header)
    pub fn encode_body(&self, buf: &mut BytesMut) {
        match self {
            Self::HeartbeatRequest(msg) => msg.encode(buf),
            Self::HeartbeatResponse(msg) => msg.encode(buf),
            Self::AssociationSetupRequest(msg) => msg.encode(buf),
            Self::AssociationSetupResponse(msg) => msg.encode(buf),
            Self::AssociationReleaseRequest(msg) => msg.encode(buf),
            Self::AssociationReleaseResponse(msg) => msg.encode(buf),
            Self::SessionEstablishmentRequest(msg) => msg.encode(buf),
            Self::SessionEstablishmentResponse(msg) => msg.encode(buf),
            Self::SessionModificationRequest(msg) => msg.encode(buf),
            Self::SessionModificationResponse(msg) => msg.encode(buf),
            Self::SessionDeletionRequest(msg) => msg.encode(buf),
            Self::SessionDeletionResponse(msg) => msg.encode(buf),
            Self::SessionReportRequest(msg) => msg.encode(buf),
            Self::SessionReportResponse(msg) => msg.encode(buf),
        }
    }

    /// Decode message body based on message type
    pub fn decode_body(message_type: PfcpMessageType, buf: Bytes) -> PfcpResult<Self> {
        Ok(match message_type {
            PfcpMessageType::HeartbeatRequest => {
                Self::HeartbeatRequest(HeartbeatRequest::decode(buf)?)
            }
            PfcpMessageType::HeartbeatResponse => {
                Self::HeartbeatResponse(HeartbeatResponse::decode(buf)?)
            }
            PfcpMessageType::AssociationSetupRequest => {
                Self::AssociationSetupRequest(AssociationSetupRequest::decode(buf)?)
            }
            PfcpMessageType::AssociationSetupResponse => {
                Self::AssociationSetupResponse(AssociationSetupResponse::decode(buf)?)
            }
            PfcpMessageType::AssociationReleaseRequest => {
                Self::AssociationReleaseRequest(AssociationReleaseRequest::decode(buf)?)
            }
            PfcpMessageType::AssociationReleaseResponse => {
                Self::AssociationReleaseResponse(AssociationReleaseResponse::decode(buf)?)
            }
            PfcpMessageType::SessionEstablishmentRequest => {
                Self::SessionEstablishmentRequest(SessionEstablishmentRequest::decode(buf)?)
            }
            PfcpMessageType::SessionEstablishmentResponse => {
                Self::SessionEstablishmentResponse(SessionEstablishmentResponse::decode(buf)?)
            }
            PfcpMessageType::SessionModificationRequest => {
                Self::SessionModificationRequest(SessionModificationRequest::decode(buf)?)
            }
            PfcpMessageType::SessionModificationResponse => {
                Self::SessionModificationResponse(SessionModificationResponse::decode(buf)?)
            }
            PfcpMessageType::SessionDeletionRequest => {
                Self::SessionDeletionRequest(SessionDeletionRequest::decode(buf)?)
            }
            PfcpMessageType::SessionDeletionResponse => {
                Self::SessionDeletionResponse(SessionDeletionResponse::decode(buf)?)
            }
            PfcpMessageType::SessionReportRequest => {
                Self::SessionReportRequest(SessionReportRequest::decode(buf)?)
            }
            PfcpMessageType::SessionReportResponse => {
                Self::SessionReportResponse(SessionReportResponse::decode(buf)?)
            }
            PfcpMessageType::VersionNotSupportedResponse => {
                return Err(PfcpError::InvalidMessageType(message_type as u8));
            }
        })
    }
}

/// Build a complete PFCP message with header.
///
/// Session messages always carry the SEID field; `None` encodes SEID 0,
/// which is what an establishment response to an unknown session uses.
pub fn build_message(
    message: &PfcpMessage,
    sequence_number: u32,
    seid: Option<u64>,
) -> BytesMut {
    let message_type = message.message_type();

    let mut body = BytesMut::new();
    message.encode_body(&mut body);

    let mut header = if message_type.has_seid() {
        PfcpHeader::new_with_seid(message_type, seid.unwrap_or(0), sequence_number)
    } else {
        PfcpHeader::new(message_type, sequence_number)
    };

    // Length excludes the first 4 octets of the header
    header.length = (body.len() + header.header_len() - 4) as u16;

    let mut buf = BytesMut::with_capacity(header.header_len() + body.len());
    header.encode(&mut buf);
    buf.put_slice(&body);

    buf
}

/// Parse a complete PFCP message
pub fn parse_message(buf: &mut Bytes) -> PfcpResult<(PfcpHeader, PfcpMessage)> {
    let header = PfcpHeader::decode(buf)?;

    let body_len = (header.length as usize)
        .checked_sub(header.header_len() - 4)
        .ok_or_else(|| PfcpError::InvalidFormat(format!("length {} too small", header.length)))?;

    if buf.remaining() < body_len {
        return Err(PfcpError::BufferTooShort {
            needed: body_len,
            available: buf.remaining(),
        });
    }

    let body = buf.copy_to_bytes(body_len);
    let message = PfcpMessage::decode_body(header.message_type, body)?;

    Ok((header, message))
}
