//! PFCP IE and message builders
//!
//! Projections from the rule model and the local node configuration onto
//! wire structures. Builders only read state, except where an Update FAR
//! consumes one-shot flags.

use crate::context::PfcpSelfConf;
use crate::error::PfcpResult;
use crate::grouped::{
    CreateBar, CreateFar, CreatePdr, CreateQer, CreateUrr, CreatedPdr, DownlinkDataReport,
    ErrorIndicationReport, ForwardingParameters, Pdi, UpdateFar, UpdateForwardingParameters,
    UpdatePdr, UpdateQer, UpdateUrr, UsageReport,
};
use crate::message::{
    AssociationReleaseRequest, AssociationReleaseResponse, AssociationSetupRequest,
    AssociationSetupResponse, HeartbeatRequest, HeartbeatResponse, SessionDeletionResponse,
    SessionEstablishmentResponse, SessionModificationResponse, SessionReportRequest,
    SessionReportResponse,
};
use crate::rule::{Bar, Far, Pdr, Qer, Urr, UrrUpdate};
use crate::session::PfcpSess;
use crate::types::{
    ApplyAction, DownlinkDataServiceInformation, FTeid, PfcpCause, ReportType, SmreqFlags,
    UpFunctionFeatures,
};

fn build_pdi(pdr: &Pdr) -> Pdi {
    Pdi {
        source_interface: pdr.src_if,
        local_f_teid: pdr.local_f_teid.as_ref().map(|f_teid| f_teid.to_ie()),
        network_instance: pdr.network_instance.clone(),
        ue_ip_address: pdr.ue_ip_addr.clone(),
        sdf_filters: pdr.sdf_filter_ies(),
        qfi: (pdr.qfi != 0).then_some(pdr.qfi),
    }
}

pub fn build_create_pdr(pdr: &Pdr) -> CreatePdr {
    CreatePdr {
        pdr_id: pdr.id,
        precedence: (pdr.precedence != 0).then_some(pdr.precedence),
        pdi: build_pdi(pdr),
        outer_header_removal: pdr.outer_header_removal,
        far_id: pdr.far_id,
        urr_ids: pdr.urr_ids.clone(),
        qer_id: pdr.qer_id,
    }
}

/// Update PDR carrying a fresh PDI (packet filter change).
pub fn build_update_pdr(pdr: &Pdr) -> UpdatePdr {
    UpdatePdr {
        pdr_id: pdr.id,
        precedence: None,
        pdi: Some(build_pdi(pdr)),
        outer_header_removal: None,
        far_id: None,
    }
}

/// Created PDR reported back by the UP function.
///
/// Only present when this UP function allocates F-TEIDs itself and the PDR
/// has one.
pub fn build_created_pdr(pdr: &Pdr, up_features: UpFunctionFeatures) -> Option<CreatedPdr> {
    if !up_features.ftup() {
        return None;
    }
    let f_teid = pdr.local_f_teid.as_ref()?.f_teid()?;
    Some(CreatedPdr { pdr_id: pdr.id, local_f_teid: Some(f_teid.clone()) })
}

/// Create FAR. A buffering FAR must have the session BAR at hand.
pub fn build_create_far(far: &Far, bar: Option<&Bar>) -> CreateFar {
    let mut ie = CreateFar {
        far_id: far.id,
        apply_action: far.apply_action,
        forwarding_parameters: None,
        bar_id: None,
    };

    if far.is_forwarding() {
        ie.forwarding_parameters = Some(ForwardingParameters {
            destination_interface: far.dst_if,
            network_instance: far.network_instance.clone(),
            outer_header_creation: far.outer_header_creation.clone(),
        });
    } else if far.is_buffering() {
        ogs_core::ogs_assert!(bar.is_some(), "FAR-ID[{}] buffers without a BAR", far.id);
        ie.bar_id = bar.map(|b| b.id);
    }

    ie
}

/// Update FAR switching a forwarding rule back on.
///
/// The SMReq flags are one-shot: they are sent once and cleared.
pub fn build_update_far_activate(far: &mut Far) -> UpdateFar {
    ogs_core::ogs_assert!(far.is_forwarding(), "FAR-ID[{}] is not forwarding", far.id);

    let smreq_flags = std::mem::take(&mut far.smreq_flags);

    UpdateFar {
        far_id: far.id,
        apply_action: Some(far.apply_action),
        update_forwarding_parameters: Some(UpdateForwardingParameters {
            destination_interface: Some(far.dst_if),
            network_instance: far.network_instance.clone(),
            outer_header_creation: far.outer_header_creation.clone(),
            smreq_flags: (!smreq_flags.is_empty()).then_some(smreq_flags),
        }),
        bar_id: None,
    }
}

/// Update FAR telling the UP function to buffer and notify.
pub fn build_update_far_deactivate(far: &Far, bar: Option<&Bar>) -> UpdateFar {
    ogs_core::ogs_assert!(bar.is_some(), "FAR-ID[{}] deactivated without a BAR", far.id);

    UpdateFar {
        far_id: far.id,
        apply_action: Some(far.apply_action),
        update_forwarding_parameters: None,
        bar_id: bar.map(|b| b.id),
    }
}

/// Mark a FAR as buffering with CP notification.
pub fn far_set_deactivated(far: &mut Far) {
    far.apply_action = ApplyAction(ApplyAction::BUFF | ApplyAction::NOCP);
}

/// Request an end marker with the next activation.
pub fn far_set_end_marker(far: &mut Far) {
    far.smreq_flags.0 |= SmreqFlags::SNDEM;
}

pub fn build_create_qer(qer: &Qer) -> CreateQer {
    CreateQer {
        qer_id: qer.id,
        gate_status: qer.gate_status,
        mbr: (!qer.mbr.is_zero()).then_some(qer.mbr),
        gbr: (!qer.gbr.is_zero()).then_some(qer.gbr),
        qfi: (qer.qfi != 0).then_some(qer.qfi),
    }
}

pub fn build_update_qer(qer: &Qer) -> UpdateQer {
    UpdateQer {
        qer_id: qer.id,
        gate_status: None,
        mbr: (!qer.mbr.is_zero()).then_some(qer.mbr),
        gbr: (!qer.gbr.is_zero()).then_some(qer.gbr),
    }
}

pub fn build_create_urr(urr: &Urr) -> CreateUrr {
    fn nonzero(v: u32) -> Option<u32> {
        (v != 0).then_some(v)
    }

    CreateUrr {
        urr_id: urr.id,
        measurement_method: urr.meas_method,
        reporting_triggers: urr.rep_triggers,
        measurement_period: nonzero(urr.meas_period),
        volume_threshold: (!urr.vol_threshold.is_empty()).then(|| urr.vol_threshold.clone()),
        volume_quota: (!urr.vol_quota.is_empty()).then(|| urr.vol_quota.clone()),
        event_threshold: nonzero(urr.event_threshold),
        event_quota: nonzero(urr.event_quota),
        time_threshold: nonzero(urr.time_threshold),
        time_quota: nonzero(urr.time_quota),
        quota_holding_time: nonzero(urr.quota_holding_time),
        quota_validity_time: nonzero(urr.quota_validity_time),
        measurement_information: (!urr.meas_info.is_empty()).then_some(urr.meas_info),
    }
}

/// Update URR with only the fields named by `update`, `None` if nothing changes.
pub fn build_update_urr(urr: &Urr, update: UrrUpdate) -> Option<UpdateUrr> {
    if update.is_empty() {
        return None;
    }

    let mut ie = UpdateUrr { urr_id: urr.id, ..Default::default() };
    if update.contains(UrrUpdate::MEAS_METHOD) {
        ie.measurement_method = Some(urr.meas_method);
    }
    if update.contains(UrrUpdate::REPORT_TRIGGER) {
        ie.reporting_triggers = Some(urr.rep_triggers);
    }
    if update.contains(UrrUpdate::VOLUME_THRESH) {
        ie.volume_threshold = Some(urr.vol_threshold.clone());
    }
    if update.contains(UrrUpdate::TIME_THRESH) {
        ie.time_threshold = Some(urr.time_threshold);
    }
    Some(ie)
}

pub fn build_create_bar(bar: &Bar) -> CreateBar {
    CreateBar {
        bar_id: bar.id,
        downlink_data_notification_delay: bar.dl_data_notification_delay,
        suggested_buffering_packets_count: bar.suggested_buffering_packets_count,
    }
}

pub fn build_heartbeat_request(conf: &PfcpSelfConf) -> HeartbeatRequest {
    HeartbeatRequest::new(conf.recovery_time_stamp)
}

pub fn build_heartbeat_response(conf: &PfcpSelfConf) -> HeartbeatResponse {
    HeartbeatResponse::new(conf.recovery_time_stamp)
}

pub fn build_cp_association_setup_request(conf: &PfcpSelfConf) -> PfcpResult<AssociationSetupRequest> {
    let mut req = AssociationSetupRequest::new(conf.node_id()?, conf.recovery_time_stamp);
    req.cp_function_features = Some(conf.cp_function_features);
    Ok(req)
}

pub fn build_cp_association_setup_response(
    conf: &PfcpSelfConf,
    cause: PfcpCause,
) -> PfcpResult<AssociationSetupResponse> {
    let mut rsp = AssociationSetupResponse::new(conf.node_id()?, cause, conf.recovery_time_stamp);
    rsp.cp_function_features = Some(conf.cp_function_features);
    Ok(rsp)
}

pub fn build_up_association_setup_request(conf: &PfcpSelfConf) -> PfcpResult<AssociationSetupRequest> {
    let mut req = AssociationSetupRequest::new(conf.node_id()?, conf.recovery_time_stamp);
    req.up_function_features = Some(conf.up_function_features);
    if !conf.up_function_features.ftup() {
        req.user_plane_ip_resource_information = conf.gtpu_resources.clone();
    }
    Ok(req)
}

pub fn build_up_association_setup_response(
    conf: &PfcpSelfConf,
    cause: PfcpCause,
) -> PfcpResult<AssociationSetupResponse> {
    let mut rsp = AssociationSetupResponse::new(conf.node_id()?, cause, conf.recovery_time_stamp);
    rsp.up_function_features = Some(conf.up_function_features);
    if !conf.up_function_features.ftup() {
        rsp.user_plane_ip_resource_information = conf.gtpu_resources.clone();
    }
    Ok(rsp)
}

pub fn build_association_release_request(conf: &PfcpSelfConf) -> PfcpResult<AssociationReleaseRequest> {
    Ok(AssociationReleaseRequest { node_id: conf.node_id()? })
}

pub fn build_association_release_response(
    conf: &PfcpSelfConf,
    cause: PfcpCause,
) -> PfcpResult<AssociationReleaseResponse> {
    Ok(AssociationReleaseResponse { node_id: conf.node_id()?, cause })
}

/// Establishment response from the UP function, with the F-SEID and the
/// Created PDRs when accepted.
pub fn build_session_establishment_response(
    conf: &PfcpSelfConf,
    sess: &PfcpSess,
    cause: PfcpCause,
) -> PfcpResult<SessionEstablishmentResponse> {
    let mut rsp = SessionEstablishmentResponse::new(conf.node_id()?, cause);
    if cause == PfcpCause::RequestAccepted {
        rsp.up_f_seid = Some(conf.f_seid(sess.local_seid)?);
        rsp.created_pdrs = sess
            .pdrs
            .iter()
            .filter_map(|pdr| build_created_pdr(pdr, conf.up_function_features))
            .collect();
    }
    Ok(rsp)
}

pub fn build_session_modification_response(
    created_pdrs: Vec<CreatedPdr>,
    cause: PfcpCause,
) -> SessionModificationResponse {
    let mut rsp = SessionModificationResponse::new(cause);
    rsp.created_pdrs = created_pdrs;
    rsp
}

pub fn build_session_deletion_response(
    usage_reports: Vec<UsageReport>,
    cause: PfcpCause,
) -> SessionDeletionResponse {
    let mut rsp = SessionDeletionResponse::new(cause);
    rsp.usage_reports = usage_reports;
    rsp
}

/// What the UP function has to tell the CP function about a session
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UserPlaneReport {
    pub report_type: ReportType,
    /// PDR that saw downlink data while buffering
    pub downlink_data: Option<DownlinkDataReportInfo>,
    pub usage_reports: Vec<UsageReport>,
    pub error_indication: Option<FTeid>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DownlinkDataReportInfo {
    pub pdr_id: u16,
    pub qfi: u8,
    pub paging_policy_indication: u8,
}

pub fn build_session_report_request(report: &UserPlaneReport) -> SessionReportRequest {
    let mut req = SessionReportRequest::new(report.report_type);

    if report.report_type.contains(ReportType::DLDR) {
        if let Some(dl) = &report.downlink_data {
            let info = DownlinkDataServiceInformation {
                paging_policy_indication: (dl.paging_policy_indication != 0)
                    .then_some(dl.paging_policy_indication),
                qfi: (dl.qfi != 0).then_some(dl.qfi),
            };
            req.downlink_data_report = Some(DownlinkDataReport {
                pdr_ids: vec![dl.pdr_id],
                service_information: (!info.is_empty()).then_some(info),
            });
        }
    }
    if report.report_type.contains(ReportType::USAR) {
        req.usage_reports = report.usage_reports.clone();
    }
    if report.report_type.contains(ReportType::ERIR) {
        if let Some(f_teid) = &report.error_indication {
            req.error_indication_report = Some(ErrorIndicationReport {
                remote_f_teids: vec![f_teid.clone()],
            });
        }
    }

    req
}

pub fn build_session_report_response(cause: PfcpCause) -> SessionReportResponse {
    SessionReportResponse::new(cause)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rule::LocalFTeid;
    use crate::types::{Bitrate, OuterHeaderCreation, PfcpInterface, ReportingTriggers, Volume};
    use std::net::Ipv4Addr;

    fn forwarding_far() -> Far {
        let mut far = Far::new(3, PfcpInterface::Access, ApplyAction(ApplyAction::FORW));
        far.outer_header_creation = Some(OuterHeaderCreation {
            teid: 0x77,
            ipv4: Some(Ipv4Addr::new(192, 168, 0, 1)),
            ipv6: None,
        });
        far
    }

    #[test]
    fn test_build_create_pdr_omits_zero_fields() {
        let mut pdr = Pdr::new(1, PfcpInterface::Access);
        pdr.far_id = Some(1);
        let ie = build_create_pdr(&pdr);
        assert_eq!(ie.precedence, None);
        assert_eq!(ie.pdi.qfi, None);
        assert_eq!(ie.pdi.local_f_teid, None);

        pdr.precedence = 255;
        pdr.qfi = 5;
        pdr.local_f_teid = Some(LocalFTeid::Choose { ipv4: true, ipv6: false, choose_id: None });
        let ie = build_create_pdr(&pdr);
        assert_eq!(ie.precedence, Some(255));
        assert_eq!(ie.pdi.qfi, Some(5));
        assert!(ie.pdi.local_f_teid.unwrap().choose);
    }

    #[test]
    fn test_build_created_pdr_needs_ftup() {
        let mut pdr = Pdr::new(1, PfcpInterface::Access);
        pdr.local_f_teid = Some(LocalFTeid::Assigned(FTeid::new(
            9,
            Some(Ipv4Addr::new(10, 0, 0, 1)),
            None,
        )));
        let ftup = UpFunctionFeatures { octet5: UpFunctionFeatures::FTUP, octet6: 0 };

        assert!(build_created_pdr(&pdr, UpFunctionFeatures::default()).is_none());
        assert_eq!(build_created_pdr(&pdr, ftup).unwrap().local_f_teid.unwrap().teid, 9);

        pdr.local_f_teid = Some(LocalFTeid::Choose { ipv4: true, ipv6: false, choose_id: None });
        assert!(build_created_pdr(&pdr, ftup).is_none());
    }

    #[test]
    fn test_build_create_far() {
        let far = forwarding_far();
        let ie = build_create_far(&far, None);
        let params = ie.forwarding_parameters.unwrap();
        assert_eq!(params.destination_interface, PfcpInterface::Access);
        assert_eq!(params.outer_header_creation.unwrap().teid, 0x77);
        assert_eq!(ie.bar_id, None);

        let mut buffering = Far::new(4, PfcpInterface::Access, ApplyAction::default());
        far_set_deactivated(&mut buffering);
        let bar = Bar::new(1);
        let ie = build_create_far(&buffering, Some(&bar));
        assert!(ie.forwarding_parameters.is_none());
        assert_eq!(ie.bar_id, Some(1));
    }

    #[test]
    #[should_panic]
    fn test_build_create_far_buffering_without_bar() {
        let mut far = Far::new(4, PfcpInterface::Access, ApplyAction::default());
        far_set_deactivated(&mut far);
        build_create_far(&far, None);
    }

    #[test]
    fn test_update_far_activate_consumes_smreq() {
        let mut far = forwarding_far();
        far_set_end_marker(&mut far);

        let ie = build_update_far_activate(&mut far);
        let params = ie.update_forwarding_parameters.unwrap();
        assert_eq!(params.smreq_flags, Some(SmreqFlags(SmreqFlags::SNDEM)));
        assert!(far.smreq_flags.is_empty());

        let ie = build_update_far_activate(&mut far);
        assert_eq!(ie.update_forwarding_parameters.unwrap().smreq_flags, None);
    }

    #[test]
    #[should_panic]
    fn test_update_far_activate_requires_forw() {
        let mut far = Far::new(1, PfcpInterface::Access, ApplyAction(ApplyAction::DROP));
        build_update_far_activate(&mut far);
    }

    #[test]
    fn test_update_far_deactivate() {
        let mut far = forwarding_far();
        far_set_deactivated(&mut far);
        let bar = Bar::new(1);
        let ie = build_update_far_deactivate(&far, Some(&bar));
        assert_eq!(
            ie.apply_action,
            Some(ApplyAction(ApplyAction::BUFF | ApplyAction::NOCP))
        );
        assert_eq!(ie.bar_id, Some(1));
        assert!(ie.update_forwarding_parameters.is_none());
    }

    #[test]
    fn test_build_qer() {
        let mut qer = Qer::new(1);
        qer.qfi = 9;
        let ie = build_create_qer(&qer);
        assert_eq!(ie.mbr, None);
        assert_eq!(ie.qfi, Some(9));

        qer.mbr = Bitrate { uplink: 1000, downlink: 2000 };
        let ie = build_update_qer(&qer);
        assert_eq!(ie.mbr, Some(qer.mbr));
        assert_eq!(ie.gbr, None);
    }

    #[test]
    fn test_build_update_urr_only_flagged_fields() {
        let mut urr = Urr::new(2);
        urr.rep_triggers = ReportingTriggers(ReportingTriggers::VOLUME_THRESHOLD);
        urr.vol_threshold = Volume { total: Some(1 << 20), uplink: None, downlink: None };
        urr.time_threshold = 60;

        assert!(build_update_urr(&urr, UrrUpdate::default()).is_none());

        let ie = build_update_urr(&urr, UrrUpdate(UrrUpdate::VOLUME_THRESH)).unwrap();
        assert_eq!(ie.urr_id, 2);
        assert_eq!(ie.volume_threshold.unwrap().total, Some(1 << 20));
        assert_eq!(ie.time_threshold, None);
        assert_eq!(ie.reporting_triggers, None);

        let create = build_create_urr(&urr);
        assert_eq!(create.time_threshold, Some(60));
        assert_eq!(create.time_quota, None);
        assert!(create.volume_quota.is_none());
    }

    #[test]
    fn test_build_session_report_request() {
        let report = UserPlaneReport {
            report_type: ReportType(ReportType::DLDR | ReportType::ERIR),
            downlink_data: Some(DownlinkDataReportInfo { pdr_id: 2, qfi: 0, paging_policy_indication: 0 }),
            usage_reports: vec![UsageReport { urr_id: 1, ..Default::default() }],
            error_indication: Some(FTeid::new(5, Some(Ipv4Addr::new(10, 0, 0, 9)), None)),
        };
        let req = build_session_report_request(&report);
        let dl = req.downlink_data_report.unwrap();
        assert_eq!(dl.pdr_ids, vec![2]);
        assert!(dl.service_information.is_none());
        // USAR not set
        assert!(req.usage_reports.is_empty());
        assert_eq!(req.error_indication_report.unwrap().remote_f_teids[0].teid, 5);
    }
}
