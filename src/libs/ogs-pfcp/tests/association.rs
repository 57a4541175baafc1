//! CP and UP engines talking to each other through in-memory outboxes

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::{Duration, Instant};

use anyhow::{anyhow, Result};
use ogs_app::PfcpRole;
use ogs_pfcp::prelude::*;

#[derive(Debug, Default)]
struct Outbox {
    sent: Vec<(SocketAddr, Vec<u8>)>,
}

impl PfcpTransport for Outbox {
    fn send(&mut self, to: SocketAddr, buf: &[u8]) -> std::io::Result<()> {
        self.sent.push((to, buf.to_vec()));
        Ok(())
    }
}

const CP_ADDR: SocketAddr = SocketAddr::new(IpAddr::V4(Ipv4Addr::new(127, 0, 0, 4)), 8805);
const UP_ADDR: SocketAddr = SocketAddr::new(IpAddr::V4(Ipv4Addr::new(127, 0, 0, 7)), 8805);

struct Pair {
    cp: PfcpContext<Outbox>,
    up: PfcpContext<Outbox>,
    now: Instant,
}

impl Pair {
    fn new() -> Self {
        let _ = env_logger::builder().is_test(true).try_init();

        let now = Instant::now();
        let cp = PfcpContext::new(
            PfcpSelfConf::new(PfcpRole::Cp, Some(CP_ADDR), None),
            Outbox::default(),
            now,
        );

        let mut up_conf = PfcpSelfConf::new(PfcpRole::Up, Some(UP_ADDR), None);
        up_conf.up_function_features = UpFunctionFeatures {
            octet5: UpFunctionFeatures::FTUP,
            octet6: 0,
        };
        let up = PfcpContext::new(up_conf, Outbox::default(), now);

        Pair { cp, up, now }
    }

    /// Deliver datagrams both ways until nobody has anything left to say.
    fn pump(&mut self) {
        self.pump_lossy(|_| false);
    }

    /// Like `pump`, but UP -> CP datagrams for which `lost` holds vanish.
    fn pump_lossy(&mut self, lost: impl Fn(&[u8]) -> bool) {
        loop {
            let to_up = std::mem::take(&mut self.cp.transport_mut().sent);
            let to_cp = std::mem::take(&mut self.up.transport_mut().sent);
            if to_up.is_empty() && to_cp.is_empty() {
                break;
            }
            for (to, data) in to_up {
                assert_eq!(to, UP_ADDR);
                self.up.receive(self.now, CP_ADDR, &data);
            }
            for (to, data) in to_cp {
                assert_eq!(to, CP_ADDR);
                if !lost(&data) {
                    self.cp.receive(self.now, UP_ADDR, &data);
                }
            }
        }
    }

    /// Let `duration` pass in half-second steps.
    fn run(&mut self, duration: Duration, lost: impl Fn(&[u8]) -> bool) {
        let end = self.now + duration;
        while self.now < end {
            self.now += Duration::from_millis(500);
            self.cp.tick(self.now);
            self.up.tick(self.now);
            self.pump_lossy(&lost);
        }
    }

    fn associate(&mut self) -> Result<NodeHandle> {
        let node = self.cp.node_add(UP_ADDR, true)?;
        self.cp.node_start(node);
        self.pump();
        Ok(node)
    }
}

fn established(events: &[PfcpEvent]) -> Option<(SessHandle, PfcpCause)> {
    events.iter().find_map(|e| match e {
        PfcpEvent::SessionEstablished { sess, cause, .. } => Some((*sess, *cause)),
        _ => None,
    })
}

#[test]
fn test_association_both_sides() -> Result<()> {
    let mut pair = Pair::new();
    let node = pair.associate()?;

    assert_eq!(pair.cp.node_state(node), Some(PfcpState::Associated));
    let up_node = pair.up.node_find(CP_ADDR).ok_or(anyhow!("UP does not know the CP"))?;
    assert_eq!(pair.up.node_state(up_node), Some(PfcpState::Associated));

    // the CP learned that the UP allocates F-TEIDs
    assert!(pair.cp.node(node).ok_or(anyhow!("node"))?.up_function_features.ftup());
    assert!(pair
        .cp
        .drain_events()
        .iter()
        .any(|e| matches!(e, PfcpEvent::NodeAssociated { addr, .. } if *addr == UP_ADDR)));
    Ok(())
}

#[test]
fn test_session_lifecycle() -> Result<()> {
    let mut pair = Pair::new();
    let node = pair.associate()?;
    pair.cp.drain_events();
    pair.up.drain_events();

    let sess = pair.cp.sess_add(node)?;
    let flow = {
        let s = pair.cp.sess_mut(sess).ok_or(anyhow!("session"))?;
        let flow = s.add_qos_flow(9)?;
        s.add_urr()?;
        s.create_bar();
        let ul = s.find_pdr_mut(flow.ul_pdr).ok_or(anyhow!("UL PDR"))?;
        ul.local_f_teid = Some(LocalFTeid::Choose { ipv4: true, ipv6: false, choose_id: None });
        flow
    };

    // establishment, the UP chooses the UL F-TEID
    pair.cp.send_session_establishment_request(sess)?;
    pair.pump();

    let (up_sess, up_cause) =
        established(&pair.up.drain_events()).ok_or(anyhow!("UP did not establish"))?;
    assert_eq!(up_cause, PfcpCause::RequestAccepted);
    let (cp_sess, cp_cause) =
        established(&pair.cp.drain_events()).ok_or(anyhow!("CP did not establish"))?;
    assert_eq!(cp_sess, sess);
    assert_eq!(cp_cause, PfcpCause::RequestAccepted);

    let cp_side = pair.cp.sess(sess).ok_or(anyhow!("session"))?;
    let up_side = pair.up.sess(up_sess).ok_or(anyhow!("UP session"))?;
    assert_eq!(cp_side.remote_seid, Some(up_side.local_seid));
    assert_eq!(up_side.remote_seid, Some(cp_side.local_seid));
    assert_eq!(up_side.pdrs.len(), 2);
    let ul = cp_side.find_pdr(flow.ul_pdr).ok_or(anyhow!("UL PDR"))?;
    assert!(matches!(ul.local_f_teid, Some(LocalFTeid::Learned(_))));
    assert_eq!(
        ul.teid(),
        up_side.find_pdr(flow.ul_pdr).and_then(|p| p.teid())
    );

    // downlink goes to buffering
    let req = ModifyRequest::new(RuleActionKind::Deactivate, DirectionFilter::DownlinkOnly);
    pair.cp.send_session_modification_request(sess, req)?;
    pair.pump();
    assert!(pair
        .cp
        .drain_events()
        .iter()
        .any(|e| matches!(e, PfcpEvent::SessionModified { cause: PfcpCause::RequestAccepted, .. })));
    let up_side = pair.up.sess(up_sess).ok_or(anyhow!("UP session"))?;
    assert!(up_side.find_far(flow.dl_far).ok_or(anyhow!("DL FAR"))?.is_buffering());
    assert!(!up_side.find_far(flow.ul_far).ok_or(anyhow!("UL FAR"))?.is_buffering());

    // the UP reports buffered downlink data
    let report = UserPlaneReport {
        report_type: ReportType(ReportType::DLDR),
        downlink_data: Some(DownlinkDataReportInfo { pdr_id: flow.dl_pdr, qfi: 9, ..Default::default() }),
        usage_reports: Vec::new(),
        error_indication: None,
    };
    pair.up.send_session_report_request(up_sess, &report)?;
    pair.pump();
    assert!(pair
        .cp
        .drain_events()
        .iter()
        .any(|e| matches!(e, PfcpEvent::SessionReport { sess: s, .. } if *s == sess)));

    // deletion carries the final usage report
    pair.cp.send_session_deletion_request(sess)?;
    pair.pump();
    let deleted = pair
        .cp
        .drain_events()
        .into_iter()
        .find_map(|e| match e {
            PfcpEvent::SessionDeleted { cause, usage_reports, .. } => Some((cause, usage_reports)),
            _ => None,
        })
        .ok_or(anyhow!("CP did not delete"))?;
    assert_eq!(deleted.0, PfcpCause::RequestAccepted);
    assert_eq!(deleted.1.len(), 1);
    assert_eq!(pair.cp.sess_count(), 0);
    assert_eq!(pair.up.sess_count(), 0);
    Ok(())
}

#[test]
fn test_duplicate_request_replays_response() -> Result<()> {
    let mut pair = Pair::new();
    pair.associate()?;

    let up_node = pair.up.node_find(CP_ADDR).ok_or(anyhow!("UP does not know the CP"))?;
    pair.up.send_heartbeat_request(up_node)?;
    let (_, request) = pair.up.transport_mut().sent.pop().ok_or(anyhow!("no heartbeat"))?;

    pair.cp.receive(pair.now, UP_ADDR, &request);
    pair.cp.receive(pair.now, UP_ADDR, &request);
    let replies = std::mem::take(&mut pair.cp.transport_mut().sent);
    assert_eq!(replies.len(), 2);
    assert_eq!(replies[0].1, replies[1].1);
    Ok(())
}

#[test]
fn test_missed_heartbeats_fail_outstanding_requests() -> Result<()> {
    let mut pair = Pair::new();
    let node = pair.associate()?;
    pair.cp.drain_events();
    let start = pair.now;

    let sess = pair.cp.sess_add(node)?;
    pair.cp.sess_mut(sess).ok_or(anyhow!("session"))?.add_qos_flow(5)?;

    // the UP has gone silent from here on
    let t1 = Duration::from_millis(2500);
    let heartbeat_at = start + Duration::from_secs(11);
    pair.cp.tick(heartbeat_at);
    pair.cp.tick(heartbeat_at + t1);
    pair.cp.tick(heartbeat_at + t1 * 2);

    pair.cp.tick(heartbeat_at + t1 * 2 + Duration::from_millis(500));
    let pending = pair.cp.send_session_establishment_request(sess)?;
    assert_eq!(pair.cp.xact_state(pending), Some(XactState::Sent));

    pair.cp.tick(heartbeat_at + t1 * 3);
    assert_eq!(pair.cp.node_state(node), Some(PfcpState::Exception));
    assert_eq!(pair.cp.xact_state(pending), Some(XactState::Failed));

    let events = pair.cp.drain_events();
    let timeouts: Vec<PfcpMessageType> = events
        .iter()
        .filter_map(|e| match e {
            PfcpEvent::XactTimeout { message_type, .. } => Some(*message_type),
            _ => None,
        })
        .collect();
    assert!(timeouts.contains(&PfcpMessageType::HeartbeatRequest));
    assert!(timeouts.contains(&PfcpMessageType::SessionEstablishmentRequest));
    assert_eq!(
        events.iter().filter(|e| matches!(e, PfcpEvent::NodeException { .. })).count(),
        1
    );

    // sending needs the association back
    assert!(matches!(
        pair.cp.send_session_establishment_request(sess),
        Err(PfcpError::NoAssociation(_))
    ));
    Ok(())
}

#[test]
fn test_lost_up_heartbeats_recover() -> Result<()> {
    let mut pair = Pair::new();
    let node = pair.associate()?;
    let up_node = pair.up.node_find(CP_ADDR).ok_or(anyhow!("UP does not know the CP"))?;

    // only the UP's own heartbeat requests get lost
    let up_heartbeat = |data: &[u8]| data[1] == PfcpMessageType::HeartbeatRequest as u8;
    pair.run(Duration::from_secs(20), up_heartbeat);
    assert_eq!(pair.up.node_state(up_node), Some(PfcpState::Exception));

    pair.run(Duration::from_secs(60), |_| false);
    assert_eq!(pair.cp.node_state(node), Some(PfcpState::Associated));
    assert_eq!(pair.up.node_state(up_node), Some(PfcpState::Associated));

    pair.cp.drain_events();
    let sess = pair.cp.sess_add(node)?;
    pair.cp.sess_mut(sess).ok_or(anyhow!("session"))?.add_qos_flow(5)?;
    pair.cp.send_session_establishment_request(sess)?;
    pair.pump();
    let (_, cause) = established(&pair.cp.drain_events()).ok_or(anyhow!("CP did not establish"))?;
    assert_eq!(cause, PfcpCause::RequestAccepted);
    Ok(())
}

#[test]
fn test_association_release_reaches_peer() -> Result<()> {
    let mut pair = Pair::new();
    let node = pair.associate()?;
    let up_node = pair.up.node_find(CP_ADDR).ok_or(anyhow!("UP does not know the CP"))?;

    pair.cp.node_release(node);
    pair.pump();
    assert_eq!(pair.cp.node_state(node), Some(PfcpState::Exception));
    assert_eq!(pair.up.node_state(up_node), Some(PfcpState::Exception));
    assert!(pair
        .up
        .drain_events()
        .iter()
        .any(|e| matches!(e, PfcpEvent::NodeException { addr, .. } if *addr == CP_ADDR)));

    // the CP sets the association up again on its next attempt
    pair.run(Duration::from_secs(12), |_| false);
    assert_eq!(pair.cp.node_state(node), Some(PfcpState::Associated));
    assert_eq!(pair.up.node_state(up_node), Some(PfcpState::Associated));
    Ok(())
}

#[test]
fn test_urr_modification_reaches_up() -> Result<()> {
    let mut pair = Pair::new();
    let node = pair.associate()?;

    let sess = pair.cp.sess_add(node)?;
    let urr_id = {
        let s = pair.cp.sess_mut(sess).ok_or(anyhow!("session"))?;
        s.add_qos_flow(9)?;
        s.add_urr()?.id
    };
    pair.cp.send_session_establishment_request(sess)?;
    pair.pump();
    let (up_sess, _) = established(&pair.up.drain_events()).ok_or(anyhow!("UP did not establish"))?;
    pair.cp.drain_events();

    let s = pair.cp.sess_mut(sess).ok_or(anyhow!("session"))?;
    s.urrs[0].time_threshold = 600;
    s.urrs[0].vol_threshold.total = Some(1 << 20);
    pair.cp.send_urr_modification_request(sess, UrrUpdate(UrrUpdate::TIME_THRESH))?;
    pair.pump();

    assert!(pair
        .cp
        .drain_events()
        .iter()
        .any(|e| matches!(e, PfcpEvent::SessionModified { cause: PfcpCause::RequestAccepted, .. })));
    let up_side = pair.up.sess(up_sess).ok_or(anyhow!("UP session"))?;
    let urr = up_side.urrs.iter().find(|u| u.id == urr_id).ok_or(anyhow!("URR"))?;
    assert_eq!(urr.time_threshold, 600);
    // only the selected field travels
    assert_eq!(urr.vol_threshold.total, None);
    Ok(())
}
