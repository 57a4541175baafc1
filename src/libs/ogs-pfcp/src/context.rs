//! PFCP engine context
//!
//! One `PfcpContext` per network function. It owns the node, session and
//! transaction pools, the timer manager and the event queue, and is driven
//! from a single event loop: datagrams go in through
//! [`PfcpContext::receive`], time goes in through [`PfcpContext::tick`] and
//! results come out through [`PfcpContext::poll_event`].

use std::collections::{HashMap, VecDeque};
use std::net::{IpAddr, SocketAddr};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use ogs_app::{OgsAppConfig, PfcpRole, PfcpTimeConf};
use ogs_core::{OgsPool, OgsTimerMgr};

use crate::error::{PfcpError, PfcpResult};
use crate::event::PfcpEvent;
use crate::node::{NodeHandle, PfcpNode};
use crate::path::PfcpTransport;
use crate::rule::LocalFTeid;
use crate::session::{PfcpSess, SessHandle};
use crate::types::{
    CpFunctionFeatures, FSeid, FTeid, NodeId, PfcpInterface, UpFunctionFeatures,
    UserPlaneIpResourceInformation,
};
use crate::xact::{PfcpXact, XactId};

/// Seconds between 1900-01-01 and 1970-01-01
const NTP_UNIX_OFFSET: u64 = 2_208_988_800;

/// Current time as a 32-bit NTP seconds value, used as recovery time stamp.
pub fn ntp_time_now() -> u32 {
    let unix = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    (unix + NTP_UNIX_OFFSET) as u32
}

/// Local PFCP endpoint settings
#[derive(Debug, Clone)]
pub struct PfcpSelfConf {
    pub role: PfcpRole,
    pub addr4: Option<SocketAddr>,
    pub addr6: Option<SocketAddr>,
    pub prefer_ipv4: bool,
    pub time: PfcpTimeConf,
    pub recovery_time_stamp: u32,
    pub up_function_features: UpFunctionFeatures,
    pub cp_function_features: CpFunctionFeatures,
    /// Advertised in association setup when the UP function does not own F-TEIDs
    pub gtpu_resources: Vec<UserPlaneIpResourceInformation>,
    pub release_sessions_on_failure: bool,
    pub max_sess: usize,
    pub max_peer: usize,
}

impl PfcpSelfConf {
    pub fn new(role: PfcpRole, addr4: Option<SocketAddr>, addr6: Option<SocketAddr>) -> Self {
        PfcpSelfConf {
            role,
            addr4,
            addr6,
            prefer_ipv4: true,
            time: PfcpTimeConf::default(),
            recovery_time_stamp: ntp_time_now(),
            up_function_features: UpFunctionFeatures::default(),
            cp_function_features: CpFunctionFeatures::default(),
            gtpu_resources: Vec::new(),
            release_sessions_on_failure: false,
            max_sess: ogs_app::MAX_NUM_OF_SESS,
            max_peer: ogs_app::MAX_NUM_OF_PEER,
        }
    }

    pub fn from_app_config(config: &OgsAppConfig, recovery_time_stamp: u32) -> Self {
        let (addr4, addr6) = config.pfcp_addrs();
        let pfcp = &config.pfcp;

        let f = &pfcp.up_function_features;
        let mut octet5 = 0;
        for (on, bit) in [
            (f.bucp, UpFunctionFeatures::BUCP),
            (f.ddnd, UpFunctionFeatures::DDND),
            (f.dlbd, UpFunctionFeatures::DLBD),
            (f.trst, UpFunctionFeatures::TRST),
            (f.ftup, UpFunctionFeatures::FTUP),
        ] {
            if on {
                octet5 |= bit;
            }
        }
        let octet6 = if f.empu { UpFunctionFeatures::EMPU } else { 0 };

        let gtpu_resources = pfcp
            .gtpu_resource
            .iter()
            .map(|res| UserPlaneIpResourceInformation {
                teid_range_indication: res.teid_range_indication,
                teid_range: res.teid_range,
                ipv4: res.address.iter().find_map(|a| match a {
                    IpAddr::V4(a) => Some(*a),
                    IpAddr::V6(_) => None,
                }),
                ipv6: res.address.iter().find_map(|a| match a {
                    IpAddr::V6(a) => Some(*a),
                    IpAddr::V4(_) => None,
                }),
                network_instance: res.network_instance.clone(),
                source_interface: res.source_interface.and_then(|s| PfcpInterface::try_from(s).ok()),
            })
            .collect();

        PfcpSelfConf {
            role: pfcp.role,
            addr4,
            addr6,
            prefer_ipv4: config.parameter.prefer_ipv4,
            time: config.pfcp_time(),
            recovery_time_stamp,
            up_function_features: UpFunctionFeatures { octet5, octet6 },
            cp_function_features: CpFunctionFeatures::default(),
            gtpu_resources,
            release_sessions_on_failure: pfcp.release_sessions_on_failure,
            max_sess: config.max.sess,
            max_peer: config.max.peer,
        }
    }

    /// Node ID of this endpoint, IPv4 first when preferred.
    pub fn node_id(&self) -> PfcpResult<NodeId> {
        NodeId::from_sockaddr(self.addr4, self.addr6, self.prefer_ipv4)
    }

    pub fn f_seid(&self, seid: u64) -> PfcpResult<FSeid> {
        FSeid::from_sockaddr(seid, self.addr4, self.addr6)
    }

    fn local_ip(&self) -> Option<IpAddr> {
        let v4 = self.addr4.map(|a| a.ip());
        let v6 = self.addr6.map(|a| a.ip());
        if self.prefer_ipv4 { v4.or(v6) } else { v6.or(v4) }
    }
}

/// Timer payloads
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PfcpTimer {
    XactResponse(XactId),
    XactHolding(XactId),
    Association(NodeHandle),
    NoHeartbeat(NodeHandle),
}

pub struct PfcpContext<T: PfcpTransport> {
    pub(crate) conf: PfcpSelfConf,
    pub(crate) transport: T,

    pub(crate) nodes: OgsPool<PfcpNode>,
    pub(crate) sessions: OgsPool<PfcpSess>,
    pub(crate) xacts: OgsPool<PfcpXact>,
    pub(crate) timers: OgsTimerMgr<PfcpTimer>,

    events: VecDeque<PfcpEvent>,
    seid_index: HashMap<u64, SessHandle>,
    next_seid: u64,
    next_teid: u32,

    /// Time of the last tick or datagram
    pub(crate) now: Instant,
}

impl<T: PfcpTransport> PfcpContext<T> {
    pub fn new(conf: PfcpSelfConf, transport: T, now: Instant) -> Self {
        let max_xact = (conf.max_sess + conf.max_peer) * 4;
        let max_timer = max_xact * 2 + conf.max_peer * 2;

        log::debug!(
            "PFCP context: peer[{}] sess[{}] xact[{}]",
            conf.max_peer,
            conf.max_sess,
            max_xact
        );

        PfcpContext {
            nodes: OgsPool::new("pfcp_node", conf.max_peer),
            sessions: OgsPool::new("pfcp_sess", conf.max_sess),
            xacts: OgsPool::new("pfcp_xact", max_xact),
            timers: OgsTimerMgr::new(max_timer),
            conf,
            transport,
            events: VecDeque::new(),
            seid_index: HashMap::new(),
            next_seid: 1,
            next_teid: 1,
            now,
        }
    }

    pub fn conf(&self) -> &PfcpSelfConf {
        &self.conf
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn now(&self) -> Instant {
        self.now
    }

    /// Fire every timer due at `now`.
    pub fn tick(&mut self, now: Instant) {
        self.now = now;
        while let Some((_, timer)) = self.timers.pop_expired(now) {
            match timer {
                PfcpTimer::XactResponse(xact) => self.xact_response_timeout(xact),
                PfcpTimer::XactHolding(xact) => self.xact_holding_timeout(xact),
                PfcpTimer::Association(node) => self.node_association_timeout(node),
                PfcpTimer::NoHeartbeat(node) => self.node_no_heartbeat_timeout(node),
            }
        }
    }

    /// Time until the next timer is due, `None` when nothing is armed.
    pub fn next_timeout(&self, now: Instant) -> Option<Duration> {
        self.timers.next(now)
    }

    pub fn poll_event(&mut self) -> Option<PfcpEvent> {
        self.events.pop_front()
    }

    pub fn drain_events(&mut self) -> Vec<PfcpEvent> {
        self.events.drain(..).collect()
    }

    pub(crate) fn push_event(&mut self, event: PfcpEvent) {
        log::debug!("[{}] queued", event.name());
        self.events.push_back(event);
    }

    /// Create a session bound to `node` with a fresh local SEID.
    pub fn sess_add(&mut self, node: NodeHandle) -> PfcpResult<SessHandle> {
        if !self.nodes.contains(node) {
            return Err(PfcpError::StaleNode);
        }

        let mut seid = self.next_seid;
        while seid == 0 || self.seid_index.contains_key(&seid) {
            seid = seid.wrapping_add(1);
        }
        self.next_seid = seid.wrapping_add(1);

        let mut sess = PfcpSess::new(seid, node);
        sess.started = self.now;
        let handle = self
            .sessions
            .alloc(sess)
            .ok_or(PfcpError::PoolExhausted("pfcp_sess"))?;

        self.seid_index.insert(seid, handle);
        if let Some(node) = self.nodes.find_mut(node) {
            node.sessions.push(handle);
        }

        log::debug!("Session added SEID[0x{:x}] ({}/{})", seid,
            self.sessions.allocated(), self.sessions.capacity());
        Ok(handle)
    }

    /// Destroy a session, cancelling its transactions and timers first.
    pub fn sess_remove(&mut self, handle: SessHandle) -> Option<PfcpSess> {
        let xacts = self.sessions.find(handle)?.xacts.clone();
        for xact in xacts {
            self.xact_delete(xact);
        }

        let mut sess = self.sessions.free(handle)?;
        sess.remove_all_rules();
        self.seid_index.remove(&sess.local_seid);
        if let Some(node) = self.nodes.find_mut(sess.node) {
            node.sessions.retain(|s| *s != handle);
        }

        log::debug!("Session removed SEID[0x{:x}]", sess.local_seid);
        Some(sess)
    }

    pub fn sess(&self, handle: SessHandle) -> Option<&PfcpSess> {
        self.sessions.find(handle)
    }

    pub fn sess_mut(&mut self, handle: SessHandle) -> Option<&mut PfcpSess> {
        self.sessions.find_mut(handle)
    }

    pub fn sess_count(&self) -> usize {
        self.sessions.allocated()
    }

    pub fn sess_find_by_local_seid(&self, seid: u64) -> Option<SessHandle> {
        self.seid_index.get(&seid).copied()
    }

    pub fn sess_find_by_remote_seid(&self, node: NodeHandle, seid: u64) -> Option<SessHandle> {
        self.nodes.find(node)?.sessions.iter().copied().find(|s| {
            self.sessions
                .find(*s)
                .is_some_and(|sess| sess.remote_seid == Some(seid))
        })
    }

    /// Sessions bound to `node`.
    pub fn node_sessions(&self, node: NodeHandle) -> Vec<SessHandle> {
        self.nodes
            .find(node)
            .map(|n| n.sessions.clone())
            .unwrap_or_default()
    }

    /// Next TEID for the given pool entry.
    ///
    /// With a TEID range the top `teidri` bits of the TEID carry the range
    /// value. TEID 0 is reserved and never handed out.
    fn next_teid(&mut self, res: Option<&UserPlaneIpResourceInformation>) -> u32 {
        loop {
            let index = self.next_teid;
            self.next_teid = if index == u32::MAX { 1 } else { index + 1 };

            let teid = match res {
                Some(res) if res.teid_range_indication > 0 && res.teid_range_indication < 32 => {
                    let bits = 32 - res.teid_range_indication as u32;
                    ((res.teid_range as u32) << bits) | (index & ((1u32 << bits) - 1))
                }
                _ => index,
            };
            if teid != 0 {
                return teid;
            }
        }
    }

    /// Tunnel endpoint from the first matching resource, or `fallback`.
    pub(crate) fn alloc_f_teid(
        &mut self,
        resources: &[UserPlaneIpResourceInformation],
        fallback: Option<IpAddr>,
        src_if: PfcpInterface,
        network_instance: Option<&str>,
    ) -> FTeid {
        let res = resources
            .iter()
            .find(|res| {
                res.source_interface.map_or(true, |s| s == src_if)
                    && res
                        .network_instance
                        .as_deref()
                        .map_or(true, |ni| Some(ni) == network_instance)
            })
            .cloned();

        let teid = self.next_teid(res.as_ref());
        match res {
            Some(res) if res.ipv4.is_some() || res.ipv6.is_some() => {
                FTeid::new(teid, res.ipv4, res.ipv6)
            }
            _ => match fallback {
                Some(IpAddr::V4(a)) => FTeid::new(teid, Some(a), None),
                Some(IpAddr::V6(a)) => FTeid::new(teid, None, Some(a)),
                None => FTeid::new(teid, None, None),
            },
        }
    }

    /// Replace CHOOSE requests with CP-allocated F-TEIDs when the peer does
    /// not allocate them itself. Returns how many were assigned.
    pub fn assign_local_f_teids(&mut self, handle: SessHandle) -> PfcpResult<usize> {
        let sess = self.sessions.find(handle).ok_or(PfcpError::StaleSession)?;
        let node = self.nodes.find(sess.node).ok_or(PfcpError::StaleNode)?;
        if node.up_function_features.ftup() {
            return Ok(0);
        }

        let resources = node.gtpu_resources.clone();
        let fallback = Some(node.addr.ip());
        let pending: Vec<_> = sess
            .pending_choose()
            .map(|pdr| (pdr.id, pdr.src_if, pdr.network_instance.clone()))
            .collect();

        for (id, src_if, ni) in &pending {
            let f_teid = self.alloc_f_teid(&resources, fallback, *src_if, ni.as_deref());
            log::debug!("PDR-ID[{}] CP allocated TEID[0x{:x}]", id, f_teid.teid);
            if let Some(pdr) = self.sessions.find_mut(handle).and_then(|s| s.find_pdr_mut(*id)) {
                pdr.local_f_teid = Some(LocalFTeid::Assigned(f_teid));
            }
        }

        Ok(pending.len())
    }

    /// Allocate F-TEIDs for CHOOSE requests received by the UP function.
    ///
    /// PDRs sharing a CHOOSE ID share one F-TEID.
    pub(crate) fn choose_local_f_teids(&mut self, handle: SessHandle) -> PfcpResult<()> {
        let sess = self.sessions.find(handle).ok_or(PfcpError::StaleSession)?;
        let pending: Vec<_> = sess
            .pdrs
            .iter()
            .filter_map(|pdr| match &pdr.local_f_teid {
                Some(LocalFTeid::Choose { choose_id, .. }) => {
                    Some((pdr.id, pdr.src_if, pdr.network_instance.clone(), *choose_id))
                }
                _ => None,
            })
            .collect();

        let resources = self.conf.gtpu_resources.clone();
        let fallback = self.conf.local_ip();
        let mut chosen: HashMap<u8, FTeid> = HashMap::new();

        for (id, src_if, ni, choose_id) in pending {
            let f_teid = match choose_id.and_then(|c| chosen.get(&c)) {
                Some(f_teid) => f_teid.clone(),
                None => {
                    let f_teid = self.alloc_f_teid(&resources, fallback, src_if, ni.as_deref());
                    if let Some(c) = choose_id {
                        chosen.insert(c, f_teid.clone());
                    }
                    f_teid
                }
            };
            if let Some(pdr) = self.sessions.find_mut(handle).and_then(|s| s.find_pdr_mut(id)) {
                pdr.local_f_teid = Some(LocalFTeid::Assigned(f_teid));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::path::tests::RecordingTransport;
    use std::net::Ipv4Addr;

    fn addr(last: u8) -> SocketAddr {
        SocketAddr::new(IpAddr::V4(Ipv4Addr::new(127, 0, 0, last)), 8805)
    }

    fn ctx() -> PfcpContext<RecordingTransport> {
        let conf = PfcpSelfConf::new(PfcpRole::Cp, Some(addr(4)), None);
        PfcpContext::new(conf, RecordingTransport::default(), Instant::now())
    }

    #[test]
    fn test_self_conf_node_id() {
        let conf = PfcpSelfConf::new(PfcpRole::Cp, Some(addr(4)), None);
        assert_eq!(conf.node_id().unwrap(), NodeId::Ipv4(Ipv4Addr::new(127, 0, 0, 4)));
        assert_eq!(conf.f_seid(7).unwrap().seid, 7);

        let none = PfcpSelfConf::new(PfcpRole::Cp, None, None);
        assert!(matches!(none.node_id(), Err(PfcpError::NoLocalAddress)));
    }

    #[test]
    fn test_self_conf_from_yaml() {
        let yaml = r#"
pfcp:
  role: up
  server:
    - address: 127.0.0.7
  up_function_features:
    ftup: true
  gtpu_resource:
    - address: [10.0.0.7]
      teid_range_indication: 2
      teid_range: 1
"#;
        let config = OgsAppConfig::from_yaml_str(yaml).unwrap();
        let conf = PfcpSelfConf::from_app_config(&config, 42);
        assert_eq!(conf.role, PfcpRole::Up);
        assert!(conf.up_function_features.ftup());
        assert_eq!(conf.recovery_time_stamp, 42);
        assert_eq!(conf.gtpu_resources.len(), 1);
        assert_eq!(conf.gtpu_resources[0].ipv4, Some(Ipv4Addr::new(10, 0, 0, 7)));
        assert_eq!(conf.addr4, Some(addr(7)));
    }

    #[test]
    fn test_sess_add_remove() {
        let mut ctx = ctx();
        let node = ctx.node_add(addr(7), false).unwrap();
        let a = ctx.sess_add(node).unwrap();
        let b = ctx.sess_add(node).unwrap();

        let seid_a = ctx.sess(a).unwrap().local_seid;
        assert_ne!(seid_a, ctx.sess(b).unwrap().local_seid);
        assert_eq!(ctx.sess_find_by_local_seid(seid_a), Some(a));
        assert_eq!(ctx.node_sessions(node), vec![a, b]);

        ctx.sess_mut(b).unwrap().remote_seid = Some(0x99);
        assert_eq!(ctx.sess_find_by_remote_seid(node, 0x99), Some(b));

        ctx.sess_mut(a).unwrap().add_qos_flow(9).unwrap();
        let removed = ctx.sess_remove(a).unwrap();
        assert!(removed.pdrs.is_empty() && removed.fars.is_empty() && removed.qers.is_empty());
        assert!(ctx.sess(a).is_none());
        assert_eq!(ctx.sess_find_by_local_seid(seid_a), None);
        assert_eq!(ctx.node_sessions(node), vec![b]);
        assert!(ctx.sess_remove(a).is_none());
    }

    #[test]
    fn test_teid_range() {
        let mut ctx = ctx();
        let res = UserPlaneIpResourceInformation {
            teid_range_indication: 4,
            teid_range: 0x5,
            ipv4: Some(Ipv4Addr::new(10, 0, 0, 1)),
            ..Default::default()
        };
        let f_teid = ctx.alloc_f_teid(&[res], None, PfcpInterface::Access, None);
        assert_eq!(f_teid.teid >> 28, 0x5);
        assert_eq!(f_teid.ipv4, Some(Ipv4Addr::new(10, 0, 0, 1)));
    }

    #[test]
    fn test_teid_zero_is_skipped() {
        let mut ctx = ctx();
        let res = UserPlaneIpResourceInformation {
            teid_range_indication: 8,
            teid_range: 0,
            ipv4: Some(Ipv4Addr::new(10, 0, 0, 1)),
            ..Default::default()
        };
        // the low 24 bits of this index are all zero
        ctx.next_teid = 1 << 24;
        let f_teid = ctx.alloc_f_teid(&[res], None, PfcpInterface::Access, None);
        assert_eq!(f_teid.teid, 1);

        ctx.next_teid = u32::MAX;
        assert_eq!(ctx.next_teid(None), u32::MAX);
        assert_eq!(ctx.next_teid(None), 1);
    }

    #[test]
    fn test_teid_resource_matching() {
        let mut ctx = ctx();
        let core = UserPlaneIpResourceInformation {
            ipv4: Some(Ipv4Addr::new(10, 0, 1, 1)),
            source_interface: Some(PfcpInterface::Core),
            ..Default::default()
        };
        let internet = UserPlaneIpResourceInformation {
            ipv4: Some(Ipv4Addr::new(10, 0, 2, 1)),
            network_instance: Some("internet".into()),
            ..Default::default()
        };
        let resources = [core, internet];
        let fallback = Some(IpAddr::V4(Ipv4Addr::new(127, 0, 0, 7)));

        let f = ctx.alloc_f_teid(&resources, fallback, PfcpInterface::Access, Some("internet"));
        assert_eq!(f.ipv4, Some(Ipv4Addr::new(10, 0, 2, 1)));

        let f = ctx.alloc_f_teid(&resources, fallback, PfcpInterface::Access, Some("ims"));
        assert_eq!(f.ipv4, Some(Ipv4Addr::new(127, 0, 0, 7)));
    }

    #[test]
    fn test_assign_local_f_teids_without_ftup() {
        let mut ctx = ctx();
        let node = ctx.node_add(addr(7), false).unwrap();
        let sess = ctx.sess_add(node).unwrap();
        let pdr = ctx.sess_mut(sess).unwrap().add_pdr(PfcpInterface::Access).unwrap();
        pdr.local_f_teid = Some(LocalFTeid::Choose { ipv4: true, ipv6: false, choose_id: None });

        assert_eq!(ctx.assign_local_f_teids(sess).unwrap(), 1);
        let pdr = &ctx.sess(sess).unwrap().pdrs[0];
        assert!(matches!(pdr.local_f_teid, Some(LocalFTeid::Assigned(_))));
        assert_eq!(pdr.local_f_teid.as_ref().unwrap().f_teid().unwrap().ipv4,
            Some(Ipv4Addr::new(127, 0, 0, 7)));
    }
}
