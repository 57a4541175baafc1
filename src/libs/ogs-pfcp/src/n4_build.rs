//! Session message building (CP side)
//!
//! Establishment, Modification and Deletion requests assembled from a
//! session's rule lists. A Modification request targets one action over
//! a subset of PDR/FAR pairs selected by traffic direction.

use crate::build::{
    build_create_bar, build_create_far, build_create_pdr, build_create_qer, build_create_urr,
    build_update_far_activate, build_update_far_deactivate, build_update_pdr, build_update_qer,
    build_update_urr, far_set_deactivated, far_set_end_marker,
};
use crate::context::PfcpSelfConf;
use crate::error::PfcpResult;
use crate::message::{
    SessionDeletionRequest, SessionEstablishmentRequest, SessionModificationRequest,
};
use crate::rule::{Direction, FarId, PdrId, UrrUpdate};
use crate::session::{PfcpSess, QosFlow};

/// Legacy bitmask form of a modification request.
///
/// Exactly one action bit and at most one direction bit may be set; use
/// [`ModifyRequest::from_flags`] to turn it into typed parameters.
pub mod modify_flags {
    pub const CREATE: u64 = 1 << 0;
    pub const REMOVE: u64 = 1 << 1;
    pub const ACTIVATE: u64 = 1 << 2;
    pub const DEACTIVATE: u64 = 1 << 3;
    pub const DL_ONLY: u64 = 1 << 4;
    pub const UL_ONLY: u64 = 1 << 5;
    pub const INDIRECT: u64 = 1 << 6;
    pub const END_MARKER: u64 = 1 << 7;
    pub const TFT_UPDATE: u64 = 1 << 12;
    pub const QOS_UPDATE: u64 = 1 << 15;

    pub const ACTIONS: u64 = CREATE | REMOVE | ACTIVATE | DEACTIVATE;
    pub const DIRECTIONS: u64 = DL_ONLY | UL_ONLY | INDIRECT;
}

/// What to do with each selected PDR/FAR pair
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleActionKind {
    Create,
    Remove,
    Activate,
    Deactivate,
}

/// Which PDR/FAR pairs a modification applies to
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DirectionFilter {
    #[default]
    All,
    DownlinkOnly,
    UplinkOnly,
    Indirect,
}

impl DirectionFilter {
    /// A directional filter excludes pairs that have no direction.
    pub fn matches(self, direction: Option<Direction>) -> bool {
        match self {
            DirectionFilter::All => true,
            DirectionFilter::DownlinkOnly => direction == Some(Direction::Downlink),
            DirectionFilter::UplinkOnly => direction == Some(Direction::Uplink),
            DirectionFilter::Indirect => direction == Some(Direction::Indirect),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModifyRequest {
    pub action: RuleActionKind,
    pub filter: DirectionFilter,
    /// Ask the UP function to send end markers on activation
    pub end_marker: bool,
}

impl ModifyRequest {
    pub fn new(action: RuleActionKind, filter: DirectionFilter) -> Self {
        ModifyRequest { action, filter, end_marker: false }
    }

    pub fn with_end_marker(mut self) -> Self {
        self.end_marker = true;
        self
    }

    /// Convert a `modify_flags` bitmask.
    ///
    /// Contradictory flags are a bug in the caller and abort.
    pub fn from_flags(flags: u64) -> Self {
        let actions = flags & modify_flags::ACTIONS;
        let directions = flags & modify_flags::DIRECTIONS;
        ogs_core::ogs_assert!(
            actions.count_ones() == 1,
            "modify flags 0x{:x} need exactly one action",
            flags
        );
        ogs_core::ogs_assert!(
            directions.count_ones() <= 1,
            "modify flags 0x{:x} carry several directions",
            flags
        );

        let action = match actions {
            modify_flags::CREATE => RuleActionKind::Create,
            modify_flags::REMOVE => RuleActionKind::Remove,
            modify_flags::ACTIVATE => RuleActionKind::Activate,
            _ => RuleActionKind::Deactivate,
        };
        let filter = match directions {
            modify_flags::DL_ONLY => DirectionFilter::DownlinkOnly,
            modify_flags::UL_ONLY => DirectionFilter::UplinkOnly,
            modify_flags::INDIRECT => DirectionFilter::Indirect,
            _ => DirectionFilter::All,
        };

        ModifyRequest { action, filter, end_marker: flags & modify_flags::END_MARKER != 0 }
    }
}

/// Session Establishment Request carrying the whole rule set.
pub fn build_session_establishment_request(
    conf: &PfcpSelfConf,
    sess: &PfcpSess,
) -> PfcpResult<SessionEstablishmentRequest> {
    let mut req = SessionEstablishmentRequest::new(conf.node_id()?, conf.f_seid(sess.local_seid)?);

    req.create_pdrs = sess.pdrs.iter().map(build_create_pdr).collect();
    req.create_fars = sess
        .fars
        .iter()
        .map(|far| build_create_far(far, sess.bar.as_ref()))
        .collect();
    req.create_urrs = sess.urrs.iter().map(build_create_urr).collect();
    req.create_qers = sess.qers.iter().map(build_create_qer).collect();
    req.create_bar = sess.bar.as_ref().map(build_create_bar);
    req.pdn_type = sess.pdn_type;

    Ok(req)
}

/// PDR/FAR pairs selected by `filter`, in PDR order.
fn select_pairs(sess: &PfcpSess, filter: DirectionFilter) -> Vec<(PdrId, FarId)> {
    sess.pdrs
        .iter()
        .filter_map(|pdr| {
            let far = sess.pdr_far(pdr);
            ogs_core::ogs_assert!(far.is_some(), "PDR-ID[{}] has no FAR", pdr.id);
            let far = far?;
            let direction = Direction::classify(pdr.src_if, far.dst_if);
            filter.matches(direction).then_some((pdr.id, far.id))
        })
        .collect()
}

/// Session Modification Request applying `req.action` to the selected pairs.
///
/// Activation and deactivation change the FARs in place; the end-marker
/// flag is consumed by the Update FAR that carries it. A FAR shared by
/// several selected PDRs appears once.
pub fn build_session_modification_request(
    sess: &mut PfcpSess,
    req: ModifyRequest,
) -> SessionModificationRequest {
    let mut msg = SessionModificationRequest::new();
    let mut seen_fars: Vec<FarId> = Vec::new();

    for (pdr_id, far_id) in select_pairs(sess, req.filter) {
        let first_use = !seen_fars.contains(&far_id);
        if first_use {
            seen_fars.push(far_id);
        }

        match req.action {
            RuleActionKind::Remove => {
                msg.remove_pdrs.push(pdr_id);
                if first_use {
                    msg.remove_fars.push(far_id);
                }
            }
            RuleActionKind::Create => {
                if let Some(pdr) = sess.find_pdr(pdr_id) {
                    msg.create_pdrs.push(build_create_pdr(pdr));
                }
                if let Some(far) = sess.find_far(far_id).filter(|_| first_use) {
                    msg.create_fars.push(build_create_far(far, sess.bar.as_ref()));
                }
            }
            RuleActionKind::Activate | RuleActionKind::Deactivate if !first_use => {}
            RuleActionKind::Activate => {
                if let Some(far) = sess.find_far_mut(far_id) {
                    if far.is_forwarding() {
                        if req.end_marker {
                            far_set_end_marker(far);
                        }
                        msg.update_fars.push(build_update_far_activate(far));
                    }
                }
            }
            RuleActionKind::Deactivate => {
                let bar = sess.bar.clone();
                if let Some(far) = sess.find_far_mut(far_id) {
                    far_set_deactivated(far);
                    msg.update_fars.push(build_update_far_deactivate(far, bar.as_ref()));
                }
            }
        }
    }

    log::debug!(
        "Modification [{:?}/{:?}] SEID[0x{:x}] remove[{}] create[{}] update[{}]",
        req.action,
        req.filter,
        sess.local_seid,
        msg.remove_pdrs.len(),
        msg.create_pdrs.len(),
        msg.update_fars.len()
    );

    msg
}

/// Session Modification Request for one QoS flow.
///
/// `flags` combines REMOVE, CREATE, TFT_UPDATE, ACTIVATE, DEACTIVATE,
/// UL_ONLY, END_MARKER and QOS_UPDATE from [`modify_flags`]. REMOVE
/// excludes everything else.
pub fn build_qos_flow_modification_request(
    sess: &mut PfcpSess,
    flow: &QosFlow,
    flags: u64,
) -> SessionModificationRequest {
    use modify_flags::*;

    let mut msg = SessionModificationRequest::new();

    if flags & REMOVE != 0 {
        ogs_core::ogs_assert!(flags & CREATE == 0, "QoS flow flags 0x{:x} remove and create", flags);
        msg.remove_pdrs.extend([flow.dl_pdr, flow.ul_pdr]);
        msg.remove_fars.extend([flow.dl_far, flow.ul_far]);
        msg.remove_qers.extend(flow.qer);
        return msg;
    }

    if flags & CREATE != 0 {
        for id in [flow.dl_pdr, flow.ul_pdr] {
            if let Some(pdr) = sess.find_pdr(id) {
                msg.create_pdrs.push(build_create_pdr(pdr));
            }
        }
        for id in [flow.dl_far, flow.ul_far] {
            if let Some(far) = sess.find_far(id) {
                msg.create_fars.push(build_create_far(far, sess.bar.as_ref()));
            }
        }
        if let Some(qer) = flow.qer.and_then(|id| sess.find_qer(id)) {
            msg.create_qers.push(build_create_qer(qer));
        }
    }

    if flags & TFT_UPDATE != 0 {
        for id in [flow.dl_pdr, flow.ul_pdr] {
            if let Some(pdr) = sess.find_pdr(id) {
                msg.update_pdrs.push(build_update_pdr(pdr));
            }
        }
    }

    if flags & (ACTIVATE | UL_ONLY) != 0 {
        if let Some(far) = sess.find_far_mut(flow.dl_far) {
            if far.is_forwarding() {
                if flags & END_MARKER != 0 {
                    far_set_end_marker(far);
                }
                msg.update_fars.push(build_update_far_activate(far));
            }
        }
    } else if flags & DEACTIVATE != 0 {
        let bar = sess.bar.clone();
        if let Some(far) = sess.find_far_mut(flow.dl_far) {
            far_set_deactivated(far);
            msg.update_fars.push(build_update_far_deactivate(far, bar.as_ref()));
        }
    }

    if flags & QOS_UPDATE != 0 {
        if let Some(qer) = flow.qer.and_then(|id| sess.find_qer(id)) {
            msg.update_qers.push(build_update_qer(qer));
        }
    }

    msg
}

/// Session Modification Request updating every URR of the session with
/// the fields named by `update`. `None` when there is nothing to send.
pub fn build_urr_modification_request(
    sess: &PfcpSess,
    update: UrrUpdate,
) -> Option<SessionModificationRequest> {
    let mut msg = SessionModificationRequest::new();
    msg.update_urrs = sess
        .urrs
        .iter()
        .filter_map(|urr| build_update_urr(urr, update))
        .collect();

    (!msg.update_urrs.is_empty()).then_some(msg)
}

pub fn build_session_deletion_request() -> SessionDeletionRequest {
    SessionDeletionRequest
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ApplyAction, OuterHeaderCreation, PfcpInterface, SmreqFlags};
    use ogs_core::OgsPool;
    use std::net::Ipv4Addr;

    /// DL, UL and indirect pairs plus a core -> core pair.
    fn sess() -> PfcpSess {
        let mut pool = OgsPool::new("node", 1);
        let mut sess = PfcpSess::new(0x10, pool.alloc(()).unwrap());
        let forw = ApplyAction(ApplyAction::FORW);
        sess.add_pdr_far(PfcpInterface::Core, PfcpInterface::Access, forw).unwrap();
        sess.add_pdr_far(PfcpInterface::Access, PfcpInterface::Core, forw).unwrap();
        sess.add_pdr_far(PfcpInterface::Access, PfcpInterface::Access, forw).unwrap();
        sess.add_pdr_far(PfcpInterface::Core, PfcpInterface::Core, forw).unwrap();
        for far in &mut sess.fars {
            far.outer_header_creation = Some(OuterHeaderCreation {
                teid: far.id,
                ipv4: Some(Ipv4Addr::new(10, 0, 0, 2)),
                ipv6: None,
            });
        }
        sess.create_bar();
        sess
    }

    #[test]
    fn test_from_flags() {
        let req = ModifyRequest::from_flags(modify_flags::ACTIVATE | modify_flags::DL_ONLY);
        assert_eq!(req.action, RuleActionKind::Activate);
        assert_eq!(req.filter, DirectionFilter::DownlinkOnly);
        assert!(!req.end_marker);

        let req = ModifyRequest::from_flags(modify_flags::REMOVE | modify_flags::INDIRECT);
        assert_eq!(req.action, RuleActionKind::Remove);
        assert_eq!(req.filter, DirectionFilter::Indirect);

        let req = ModifyRequest::from_flags(modify_flags::ACTIVATE | modify_flags::END_MARKER);
        assert_eq!(req.filter, DirectionFilter::All);
        assert!(req.end_marker);
    }

    #[test]
    #[should_panic]
    fn test_from_flags_create_and_remove() {
        ModifyRequest::from_flags(modify_flags::CREATE | modify_flags::REMOVE);
    }

    #[test]
    #[should_panic]
    fn test_from_flags_no_action() {
        ModifyRequest::from_flags(modify_flags::DL_ONLY);
    }

    #[test]
    #[should_panic]
    fn test_from_flags_two_directions() {
        ModifyRequest::from_flags(
            modify_flags::DEACTIVATE | modify_flags::DL_ONLY | modify_flags::UL_ONLY,
        );
    }

    #[test]
    fn test_direction_filter_selection() {
        let mut sess = sess();

        let all = build_session_modification_request(
            &mut sess,
            ModifyRequest::new(RuleActionKind::Remove, DirectionFilter::All),
        );
        assert_eq!(all.remove_pdrs, vec![1, 2, 3, 4]);
        assert_eq!(all.remove_fars, vec![1, 2, 3, 4]);

        let cases = [
            (DirectionFilter::DownlinkOnly, vec![1]),
            (DirectionFilter::UplinkOnly, vec![2]),
            (DirectionFilter::Indirect, vec![3]),
        ];
        for (filter, expected) in cases {
            let msg = build_session_modification_request(
                &mut sess,
                ModifyRequest::new(RuleActionKind::Remove, filter),
            );
            assert_eq!(msg.remove_pdrs, expected, "{:?}", filter);
            assert!(!msg.remove_pdrs.contains(&4));
        }
    }

    #[test]
    fn test_create_indirect() {
        let mut sess = sess();
        let msg = build_session_modification_request(
            &mut sess,
            ModifyRequest::new(RuleActionKind::Create, DirectionFilter::Indirect),
        );
        assert_eq!(msg.create_pdrs.len(), 1);
        assert_eq!(msg.create_pdrs[0].pdr_id, 3);
        assert_eq!(msg.create_fars[0].far_id, 3);
        assert!(msg.remove_pdrs.is_empty());
        assert!(msg.cp_f_seid.is_none());
    }

    #[test]
    fn test_activate_end_marker_sent_once() {
        let mut sess = sess();
        let req = ModifyRequest::new(RuleActionKind::Activate, DirectionFilter::DownlinkOnly)
            .with_end_marker();

        let first = build_session_modification_request(&mut sess, req);
        assert_eq!(first.update_fars.len(), 1);
        let params = first.update_fars[0].update_forwarding_parameters.as_ref().unwrap();
        assert_eq!(params.smreq_flags, Some(SmreqFlags(SmreqFlags::SNDEM)));

        let again = build_session_modification_request(
            &mut sess,
            ModifyRequest::new(RuleActionKind::Activate, DirectionFilter::DownlinkOnly),
        );
        let params = again.update_fars[0].update_forwarding_parameters.as_ref().unwrap();
        assert_eq!(params.smreq_flags, None);
    }

    #[test]
    fn test_activate_skips_non_forwarding() {
        let mut sess = sess();
        sess.find_far_mut(1).unwrap().apply_action = ApplyAction(ApplyAction::DROP);
        let msg = build_session_modification_request(
            &mut sess,
            ModifyRequest::new(RuleActionKind::Activate, DirectionFilter::DownlinkOnly),
        );
        assert!(msg.update_fars.is_empty());
    }

    #[test]
    fn test_deactivate_buffers() {
        let mut sess = sess();
        let msg = build_session_modification_request(
            &mut sess,
            ModifyRequest::new(RuleActionKind::Deactivate, DirectionFilter::DownlinkOnly),
        );
        assert_eq!(msg.update_fars.len(), 1);
        assert_eq!(msg.update_fars[0].bar_id, Some(1));
        assert!(sess.find_far(1).unwrap().is_buffering());
        assert!(!sess.find_far(2).unwrap().is_buffering());
    }

    #[test]
    fn test_shared_far_is_sent_once() {
        let mut sess = sess();
        // a second downlink PDR forwarding through FAR 1
        let pdr = sess.add_pdr(PfcpInterface::Core).unwrap();
        pdr.far_id = Some(1);

        let msg = build_session_modification_request(
            &mut sess,
            ModifyRequest::new(RuleActionKind::Activate, DirectionFilter::DownlinkOnly),
        );
        assert_eq!(msg.update_fars.len(), 1);
        assert_eq!(msg.update_fars[0].far_id, 1);

        let msg = build_session_modification_request(
            &mut sess,
            ModifyRequest::new(RuleActionKind::Deactivate, DirectionFilter::DownlinkOnly),
        );
        assert_eq!(msg.update_fars.len(), 1);

        let msg = build_session_modification_request(
            &mut sess,
            ModifyRequest::new(RuleActionKind::Remove, DirectionFilter::DownlinkOnly),
        );
        assert_eq!(msg.remove_pdrs, vec![1, 5]);
        assert_eq!(msg.remove_fars, vec![1]);

        let msg = build_session_modification_request(
            &mut sess,
            ModifyRequest::new(RuleActionKind::Create, DirectionFilter::DownlinkOnly),
        );
        assert_eq!(msg.create_pdrs.len(), 2);
        assert_eq!(msg.create_fars.len(), 1);
    }

    #[test]
    fn test_urr_modification() {
        let mut sess = sess();
        assert!(build_urr_modification_request(
            &sess,
            UrrUpdate(UrrUpdate::TIME_THRESH)
        )
        .is_none());

        let urr = sess.add_urr().unwrap();
        urr.time_threshold = 600;
        let urr_id = urr.id;

        assert!(build_urr_modification_request(&sess, UrrUpdate::default()).is_none());

        let msg = build_urr_modification_request(&sess, UrrUpdate(UrrUpdate::TIME_THRESH)).unwrap();
        assert_eq!(msg.update_urrs.len(), 1);
        assert_eq!(msg.update_urrs[0].urr_id, urr_id);
        assert_eq!(msg.update_urrs[0].time_threshold, Some(600));
        assert_eq!(msg.update_urrs[0].volume_threshold, None);
        assert!(msg.update_fars.is_empty() && msg.create_pdrs.is_empty());
    }

    #[test]
    fn test_qos_flow_flags() {
        let mut pool = OgsPool::new("node", 1);
        let mut sess = PfcpSess::new(0x20, pool.alloc(()).unwrap());
        let flow = sess.add_qos_flow(5).unwrap();
        sess.find_qer_mut(flow.qer.unwrap()).unwrap().mbr.downlink = 1_000_000;

        let msg = build_qos_flow_modification_request(&mut sess, &flow, modify_flags::CREATE);
        assert_eq!(msg.create_pdrs.len(), 2);
        assert_eq!(msg.create_fars.len(), 2);
        assert_eq!(msg.create_qers.len(), 1);

        let msg = build_qos_flow_modification_request(
            &mut sess,
            &flow,
            modify_flags::TFT_UPDATE | modify_flags::QOS_UPDATE,
        );
        assert_eq!(msg.update_pdrs.len(), 2);
        assert_eq!(msg.update_qers.len(), 1);
        assert!(msg.update_fars.is_empty());

        let msg = build_qos_flow_modification_request(&mut sess, &flow, modify_flags::REMOVE);
        assert_eq!(msg.remove_pdrs, vec![flow.dl_pdr, flow.ul_pdr]);
        assert_eq!(msg.remove_qers, vec![flow.qer.unwrap()]);
        assert!(msg.create_pdrs.is_empty());
    }
}
