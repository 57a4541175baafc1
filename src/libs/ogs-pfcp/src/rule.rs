//! PFCP rule model
//!
//! In-memory PDR/FAR/QER/URR/BAR as owned by a session. Rule ids are
//! scoped to the session and to the rule type; a PDR refers to its FAR,
//! QER and URRs by id only and the session resolves the reference.

use std::fmt;

use crate::error::{PfcpError, PfcpResult};
use crate::grouped::{CreateBar, CreateFar, CreatePdr, CreateQer, CreateUrr, UpdateFar, UpdatePdr,
    UpdateQer, UpdateUrr};
use crate::types::{
    ApplyAction, Bitrate, FTeid, GateStatus, MeasurementInformation, MeasurementMethod,
    OuterHeaderCreation, OuterHeaderRemoval, PfcpInterface, ReportingTriggers, SdfFilter,
    SmreqFlags, UeIpAddress, Volume,
};

pub type PdrId = u16;
pub type FarId = u32;
pub type QerId = u32;
pub type UrrId = u32;
pub type BarId = u8;

/// Smallest id in `1..=max` not present in `used`.
pub(crate) fn alloc_rule_id(
    kind: &'static str,
    used: impl Iterator<Item = u32> + Clone,
    max: u32,
) -> PfcpResult<u32> {
    (1..=max)
        .find(|id| !used.clone().any(|u| u == *id))
        .ok_or(PfcpError::PoolExhausted(kind))
}

/// Local tunnel endpoint of a PDR.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LocalFTeid {
    /// Allocated by this node.
    Assigned(FTeid),
    /// The peer allocates; nothing is known until it reports a Created PDR.
    Choose {
        ipv4: bool,
        ipv6: bool,
        choose_id: Option<u8>,
    },
    /// Reported by the peer in a Created PDR.
    Learned(FTeid),
}

impl LocalFTeid {
    /// The usable F-TEID, `None` while a CHOOSE request is outstanding.
    pub fn f_teid(&self) -> Option<&FTeid> {
        match self {
            LocalFTeid::Assigned(f_teid) | LocalFTeid::Learned(f_teid) => Some(f_teid),
            LocalFTeid::Choose { .. } => None,
        }
    }

    pub fn teid(&self) -> Option<u32> {
        self.f_teid().map(|f_teid| f_teid.teid)
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, LocalFTeid::Choose { .. })
    }

    /// Wire form placed in the PDI.
    pub fn to_ie(&self) -> FTeid {
        match self {
            LocalFTeid::Assigned(f_teid) | LocalFTeid::Learned(f_teid) => f_teid.clone(),
            LocalFTeid::Choose { ipv4, ipv6, choose_id } => FTeid::choose(*ipv4, *ipv6, *choose_id),
        }
    }

    fn from_ie(f_teid: &FTeid) -> Self {
        if f_teid.choose {
            LocalFTeid::Choose {
                ipv4: f_teid.ipv4.is_some(),
                ipv6: f_teid.ipv6.is_some(),
                choose_id: f_teid.choose_id,
            }
        } else {
            LocalFTeid::Assigned(f_teid.clone())
        }
    }
}

/// Traffic direction of a PDR/FAR pair
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// core -> access
    Downlink,
    /// access -> core
    Uplink,
    /// access -> access, relaying UE traffic back towards the access side
    Indirect,
}

impl Direction {
    /// Classify by the PDR source interface and the FAR destination interface.
    ///
    /// Pairs outside access/core (and core -> core) have no direction.
    pub fn classify(src_if: PfcpInterface, dst_if: PfcpInterface) -> Option<Self> {
        match (src_if, dst_if) {
            (PfcpInterface::Core, PfcpInterface::Access) => Some(Direction::Downlink),
            (PfcpInterface::Access, PfcpInterface::Core) => Some(Direction::Uplink),
            (PfcpInterface::Access, PfcpInterface::Access) => Some(Direction::Indirect),
            _ => None,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Direction::Downlink => "DL",
            Direction::Uplink => "UL",
            Direction::Indirect => "INDIRECT",
        };
        f.write_str(s)
    }
}

/// Packet Detection Rule
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pdr {
    pub id: PdrId,
    /// Lower value wins
    pub precedence: u32,
    pub src_if: PfcpInterface,
    pub network_instance: Option<String>,
    pub sdf_filters: Vec<String>,
    pub ue_ip_addr: Option<UeIpAddress>,
    pub local_f_teid: Option<LocalFTeid>,
    pub qfi: u8,
    pub outer_header_removal: Option<OuterHeaderRemoval>,
    pub far_id: Option<FarId>,
    pub urr_ids: Vec<UrrId>,
    pub qer_id: Option<QerId>,
}

impl Pdr {
    pub fn new(id: PdrId, src_if: PfcpInterface) -> Self {
        Pdr {
            id,
            precedence: 0,
            src_if,
            network_instance: None,
            sdf_filters: Vec::new(),
            ue_ip_addr: None,
            local_f_teid: None,
            qfi: 0,
            outer_header_removal: None,
            far_id: None,
            urr_ids: Vec::new(),
            qer_id: None,
        }
    }

    /// Local TEID, `None` while unknown.
    pub fn teid(&self) -> Option<u32> {
        self.local_f_teid.as_ref().and_then(LocalFTeid::teid)
    }

    pub fn is_choose_pending(&self) -> bool {
        self.local_f_teid.as_ref().is_some_and(LocalFTeid::is_pending)
    }

    /// Rule installed from a Create PDR received from the CP function.
    pub fn from_create(ie: &CreatePdr) -> Self {
        let pdi = &ie.pdi;
        Pdr {
            id: ie.pdr_id,
            precedence: ie.precedence.unwrap_or(0),
            src_if: pdi.source_interface,
            network_instance: pdi.network_instance.clone(),
            sdf_filters: pdi.sdf_filters.iter().map(|f| f.flow_description.clone()).collect(),
            ue_ip_addr: pdi.ue_ip_address.clone(),
            local_f_teid: pdi.local_f_teid.as_ref().map(LocalFTeid::from_ie),
            qfi: pdi.qfi.unwrap_or(0),
            outer_header_removal: ie.outer_header_removal,
            far_id: ie.far_id,
            urr_ids: ie.urr_ids.clone(),
            qer_id: ie.qer_id,
        }
    }

    pub fn apply_update(&mut self, ie: &UpdatePdr) {
        if let Some(precedence) = ie.precedence {
            self.precedence = precedence;
        }
        if let Some(pdi) = &ie.pdi {
            self.src_if = pdi.source_interface;
            self.network_instance = pdi.network_instance.clone();
            self.sdf_filters = pdi.sdf_filters.iter().map(|f| f.flow_description.clone()).collect();
            if let Some(ue) = &pdi.ue_ip_address {
                self.ue_ip_addr = Some(ue.clone());
            }
            if let Some(qfi) = pdi.qfi {
                self.qfi = qfi;
            }
        }
        if let Some(ohr) = ie.outer_header_removal {
            self.outer_header_removal = Some(ohr);
        }
        if let Some(far_id) = ie.far_id {
            self.far_id = Some(far_id);
        }
    }

    pub(crate) fn sdf_filter_ies(&self) -> Vec<SdfFilter> {
        self.sdf_filters
            .iter()
            .map(|flow| SdfFilter { flow_description: flow.clone() })
            .collect()
    }
}

/// Forwarding Action Rule
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Far {
    pub id: FarId,
    pub apply_action: ApplyAction,
    pub dst_if: PfcpInterface,
    pub network_instance: Option<String>,
    pub outer_header_creation: Option<OuterHeaderCreation>,
    /// One-shot signalling flags, cleared once sent in an Update FAR
    pub smreq_flags: SmreqFlags,
}

impl Far {
    pub fn new(id: FarId, dst_if: PfcpInterface, apply_action: ApplyAction) -> Self {
        Far {
            id,
            apply_action,
            dst_if,
            network_instance: None,
            outer_header_creation: None,
            smreq_flags: SmreqFlags::default(),
        }
    }

    pub fn is_forwarding(&self) -> bool {
        self.apply_action.contains(ApplyAction::FORW)
    }

    pub fn is_buffering(&self) -> bool {
        self.apply_action.contains(ApplyAction::BUFF)
    }

    pub fn from_create(ie: &CreateFar) -> Self {
        let params = ie.forwarding_parameters.as_ref();
        Far {
            id: ie.far_id,
            apply_action: ie.apply_action,
            dst_if: params.map(|p| p.destination_interface).unwrap_or_default(),
            network_instance: params.and_then(|p| p.network_instance.clone()),
            outer_header_creation: params.and_then(|p| p.outer_header_creation.clone()),
            smreq_flags: SmreqFlags::default(),
        }
    }

    pub fn apply_update(&mut self, ie: &UpdateFar) {
        if let Some(action) = ie.apply_action {
            self.apply_action = action;
        }
        if let Some(params) = &ie.update_forwarding_parameters {
            if let Some(dst_if) = params.destination_interface {
                self.dst_if = dst_if;
            }
            if let Some(ni) = &params.network_instance {
                self.network_instance = Some(ni.clone());
            }
            if let Some(ohc) = &params.outer_header_creation {
                self.outer_header_creation = Some(ohc.clone());
            }
        }
    }
}

/// QoS Enforcement Rule
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Qer {
    pub id: QerId,
    pub gate_status: GateStatus,
    pub mbr: Bitrate,
    pub gbr: Bitrate,
    pub qfi: u8,
}

impl Qer {
    pub fn new(id: QerId) -> Self {
        Qer {
            id,
            gate_status: GateStatus::default(),
            mbr: Bitrate::default(),
            gbr: Bitrate::default(),
            qfi: 0,
        }
    }

    pub fn from_create(ie: &CreateQer) -> Self {
        Qer {
            id: ie.qer_id,
            gate_status: ie.gate_status,
            mbr: ie.mbr.unwrap_or_default(),
            gbr: ie.gbr.unwrap_or_default(),
            qfi: ie.qfi.unwrap_or(0),
        }
    }

    pub fn apply_update(&mut self, ie: &UpdateQer) {
        if let Some(gate) = ie.gate_status {
            self.gate_status = gate;
        }
        if let Some(mbr) = ie.mbr {
            self.mbr = mbr;
        }
        if let Some(gbr) = ie.gbr {
            self.gbr = gbr;
        }
    }
}

/// Which URR fields an Update URR carries
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UrrUpdate(pub u8);

impl UrrUpdate {
    pub const MEAS_METHOD: u8 = 0x01;
    pub const REPORT_TRIGGER: u8 = 0x02;
    pub const VOLUME_THRESH: u8 = 0x04;
    pub const TIME_THRESH: u8 = 0x08;

    pub fn contains(&self, bits: u8) -> bool {
        self.0 & bits == bits
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }
}

/// Usage Reporting Rule
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Urr {
    pub id: UrrId,
    pub meas_method: MeasurementMethod,
    pub rep_triggers: ReportingTriggers,
    pub meas_period: u32,
    pub vol_threshold: Volume,
    pub vol_quota: Volume,
    pub event_threshold: u32,
    pub event_quota: u32,
    pub time_threshold: u32,
    pub time_quota: u32,
    pub quota_holding_time: u32,
    pub quota_validity_time: u32,
    pub meas_info: MeasurementInformation,
    /// UR-SEQN of the next usage report
    pub ur_seqn: u32,
}

impl Urr {
    pub fn new(id: UrrId) -> Self {
        Urr { id, ..Default::default() }
    }

    pub fn from_create(ie: &CreateUrr) -> Self {
        Urr {
            id: ie.urr_id,
            meas_method: ie.measurement_method,
            rep_triggers: ie.reporting_triggers,
            meas_period: ie.measurement_period.unwrap_or(0),
            vol_threshold: ie.volume_threshold.clone().unwrap_or_default(),
            vol_quota: ie.volume_quota.clone().unwrap_or_default(),
            event_threshold: ie.event_threshold.unwrap_or(0),
            event_quota: ie.event_quota.unwrap_or(0),
            time_threshold: ie.time_threshold.unwrap_or(0),
            time_quota: ie.time_quota.unwrap_or(0),
            quota_holding_time: ie.quota_holding_time.unwrap_or(0),
            quota_validity_time: ie.quota_validity_time.unwrap_or(0),
            meas_info: ie.measurement_information.unwrap_or_default(),
            ur_seqn: 0,
        }
    }

    pub fn apply_update(&mut self, ie: &UpdateUrr) {
        if let Some(method) = ie.measurement_method {
            self.meas_method = method;
        }
        if let Some(triggers) = ie.reporting_triggers {
            self.rep_triggers = triggers;
        }
        if let Some(vol) = &ie.volume_threshold {
            self.vol_threshold = vol.clone();
        }
        if let Some(t) = ie.time_threshold {
            self.time_threshold = t;
        }
    }

    /// Hand out the next UR-SEQN.
    pub fn next_ur_seqn(&mut self) -> u32 {
        let seqn = self.ur_seqn;
        self.ur_seqn = self.ur_seqn.wrapping_add(1);
        seqn
    }
}

/// Buffering Action Rule
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Bar {
    pub id: BarId,
    pub dl_data_notification_delay: Option<u8>,
    pub suggested_buffering_packets_count: Option<u8>,
}

impl Bar {
    pub fn new(id: BarId) -> Self {
        Bar { id, ..Default::default() }
    }

    pub fn from_create(ie: &CreateBar) -> Self {
        Bar {
            id: ie.bar_id,
            dl_data_notification_delay: ie.downlink_data_notification_delay,
            suggested_buffering_packets_count: ie.suggested_buffering_packets_count,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grouped::{ForwardingParameters, Pdi, UpdateForwardingParameters};
    use std::net::Ipv4Addr;

    #[test]
    fn test_classify_interface_pairs() {
        use PfcpInterface::*;
        assert_eq!(Direction::classify(Core, Access), Some(Direction::Downlink));
        assert_eq!(Direction::classify(Access, Core), Some(Direction::Uplink));
        assert_eq!(Direction::classify(Access, Access), Some(Direction::Indirect));
        assert_eq!(Direction::classify(Core, Core), None);
        assert_eq!(Direction::classify(CpFunction, Access), None);
        assert_eq!(Direction::classify(Access, CpFunction), None);
    }

    #[test]
    fn test_choose_teid_is_unknown() {
        let mut pdr = Pdr::new(1, PfcpInterface::Access);
        assert_eq!(pdr.teid(), None);

        pdr.local_f_teid = Some(LocalFTeid::Choose { ipv4: true, ipv6: false, choose_id: None });
        assert!(pdr.is_choose_pending());
        assert_eq!(pdr.teid(), None);

        let wire = pdr.local_f_teid.as_ref().unwrap().to_ie();
        assert!(wire.choose);
        assert_eq!(wire.ipv4, Some(Ipv4Addr::UNSPECIFIED));

        pdr.local_f_teid = Some(LocalFTeid::Learned(FTeid::new(
            0x100,
            Some(Ipv4Addr::new(10, 0, 0, 7)),
            None,
        )));
        assert!(!pdr.is_choose_pending());
        assert_eq!(pdr.teid(), Some(0x100));
    }

    #[test]
    fn test_alloc_rule_id_fills_gaps() {
        let used = [1u32, 2, 4];
        assert_eq!(alloc_rule_id("pdr", used.iter().copied(), 10).unwrap(), 3);
        assert_eq!(alloc_rule_id("bar", [].iter().copied(), 10).unwrap(), 1);
        let full = [1u32, 2];
        assert!(matches!(
            alloc_rule_id("bar", full.iter().copied(), 2),
            Err(PfcpError::PoolExhausted("bar"))
        ));
    }

    #[test]
    fn test_pdr_from_create_keeps_choose() {
        let ie = CreatePdr {
            pdr_id: 2,
            precedence: Some(255),
            pdi: Pdi {
                source_interface: PfcpInterface::Access,
                local_f_teid: Some(FTeid::choose(true, false, Some(5))),
                ..Default::default()
            },
            far_id: Some(2),
            ..Default::default()
        };
        let pdr = Pdr::from_create(&ie);
        assert_eq!(pdr.id, 2);
        assert_eq!(pdr.precedence, 255);
        assert_eq!(
            pdr.local_f_teid,
            Some(LocalFTeid::Choose { ipv4: true, ipv6: false, choose_id: Some(5) })
        );
        assert_eq!(pdr.far_id, Some(2));
    }

    #[test]
    fn test_far_update() {
        let mut far = Far::from_create(&CreateFar {
            far_id: 1,
            apply_action: ApplyAction(ApplyAction::BUFF | ApplyAction::NOCP),
            forwarding_parameters: Some(ForwardingParameters {
                destination_interface: PfcpInterface::Access,
                ..Default::default()
            }),
            bar_id: Some(1),
        });
        assert!(far.is_buffering());
        assert!(!far.is_forwarding());

        far.apply_update(&UpdateFar {
            far_id: 1,
            apply_action: Some(ApplyAction(ApplyAction::FORW)),
            update_forwarding_parameters: Some(UpdateForwardingParameters {
                outer_header_creation: Some(OuterHeaderCreation {
                    teid: 9,
                    ipv4: Some(Ipv4Addr::new(10, 0, 0, 1)),
                    ipv6: None,
                }),
                ..Default::default()
            }),
            bar_id: None,
        });
        assert!(far.is_forwarding());
        assert_eq!(far.outer_header_creation.as_ref().map(|o| o.teid), Some(9));
        assert_eq!(far.dst_if, PfcpInterface::Access);
    }

    #[test]
    fn test_urr_seqn_advances() {
        let mut urr = Urr::new(1);
        assert_eq!(urr.next_ur_seqn(), 0);
        assert_eq!(urr.next_ur_seqn(), 1);
    }
}
