//! PFCP transaction manager
//!
//! A local transaction carries one request we sent and waits for its
//! response, retransmitting on T1 up to N1 times. A remote transaction
//! tracks a request we received and caches our response so that a
//! retransmitted request is answered without being processed again.
//!
//! Both kinds stay in the pool for the holding window after reaching a
//! terminal state and are released when the holding timer runs out.

use std::net::SocketAddr;

use bytes::Bytes;
use ogs_core::{OgsPoolId, OgsTimerId};

use crate::context::{PfcpContext, PfcpTimer};
use crate::error::{PfcpError, PfcpResult};
use crate::event::PfcpEvent;
use crate::header::{PfcpHeader, PfcpMessageType};
use crate::message::{build_message, PfcpMessage};
use crate::node::{NodeHandle, PfcpNodeEvent};
use crate::path::PfcpTransport;
use crate::session::SessHandle;

pub type XactId = OgsPoolId;

/// Largest locally allocated sequence number
pub const PFCP_MAX_XACT_ID: u32 = 0x7f_ffff;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum XactOrigin {
    Local,
    Remote,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum XactState {
    Created,
    Sent,
    Retried,
    Completed,
    Failed,
}

impl XactState {
    pub fn is_terminal(self) -> bool {
        matches!(self, XactState::Completed | XactState::Failed)
    }

    pub fn name(self) -> &'static str {
        match self {
            XactState::Created => "CREATED",
            XactState::Sent => "SENT",
            XactState::Retried => "RETRIED",
            XactState::Completed => "COMPLETED",
            XactState::Failed => "FAILED",
        }
    }
}

#[derive(Debug)]
pub struct PfcpXact {
    pub origin: XactOrigin,
    pub node: NodeHandle,
    pub peer: SocketAddr,
    pub seq: u32,
    /// Type of the request this transaction carries
    pub message_type: PfcpMessageType,
    pub sess: Option<SessHandle>,
    pub state: XactState,
    /// Retransmissions performed so far
    pub retransmissions: u32,

    response_rcount: u32,
    holding_rcount: u32,
    request: Option<Bytes>,
    response: Option<Bytes>,
    tm_response: Option<OgsTimerId>,
    tm_holding: Option<OgsTimerId>,
}

impl PfcpXact {
    fn origin_name(&self) -> &'static str {
        match self.origin {
            XactOrigin::Local => "LOCAL",
            XactOrigin::Remote => "REMOTE",
        }
    }
}

impl<T: PfcpTransport> PfcpContext<T> {
    pub fn xact(&self, id: XactId) -> Option<&PfcpXact> {
        self.xacts.find(id)
    }

    pub fn xact_count(&self) -> usize {
        self.xacts.allocated()
    }

    pub fn xact_state(&self, id: XactId) -> Option<XactState> {
        self.xacts.find(id).map(|x| x.state)
    }

    /// Whether the retransmission timer of `id` is armed.
    pub fn xact_is_timer_running(&self, id: XactId) -> bool {
        self.xacts
            .find(id)
            .and_then(|x| x.tm_response)
            .is_some_and(|tm| self.timers.is_running(tm))
    }

    /// Next free sequence number of `node`.
    ///
    /// A number held by a transaction still in flight is skipped; one held
    /// by a terminal transaction is reclaimed.
    fn xact_next_seq(&mut self, node: NodeHandle) -> PfcpResult<u32> {
        for _ in 0..PFCP_MAX_XACT_ID {
            let n = self.nodes.find_mut(node).ok_or(PfcpError::StaleNode)?;
            let seq = n.next_seq;
            n.next_seq = if seq >= PFCP_MAX_XACT_ID { 1 } else { seq + 1 };

            let Some(&held) = n.local_xacts.get(&seq) else {
                return Ok(seq);
            };
            match self.xacts.find(held).map(|x| x.state) {
                Some(state) if !state.is_terminal() => continue,
                Some(_) => {
                    self.xact_delete(held);
                    return Ok(seq);
                }
                None => {
                    n.local_xacts.remove(&seq);
                    return Ok(seq);
                }
            }
        }
        Err(PfcpError::PoolExhausted("pfcp_sequence"))
    }

    fn xact_create(
        &mut self,
        origin: XactOrigin,
        node: NodeHandle,
        seq: u32,
        message_type: PfcpMessageType,
        sess: Option<SessHandle>,
    ) -> PfcpResult<XactId> {
        let peer = self.nodes.find(node).ok_or(PfcpError::StaleNode)?.addr;

        let xact = PfcpXact {
            origin,
            node,
            peer,
            seq,
            message_type,
            sess,
            state: XactState::Created,
            retransmissions: 0,
            response_rcount: self.conf.time.n1_response_rcount,
            holding_rcount: self.conf.time.n1_holding_rcount,
            request: None,
            response: None,
            tm_response: None,
            tm_holding: None,
        };
        let id = self
            .xacts
            .alloc(xact)
            .ok_or(PfcpError::PoolExhausted("pfcp_xact"))?;

        let tm_response = match origin {
            XactOrigin::Local => self.timers.add(PfcpTimer::XactResponse(id)),
            XactOrigin::Remote => None,
        };
        let tm_holding = self.timers.add(PfcpTimer::XactHolding(id));
        if tm_holding.is_none() || (origin == XactOrigin::Local && tm_response.is_none()) {
            for tm in [tm_response, tm_holding].into_iter().flatten() {
                self.timers.delete(tm);
            }
            self.xacts.free(id);
            return Err(PfcpError::PoolExhausted("timer"));
        }

        if let Some(x) = self.xacts.find_mut(id) {
            x.tm_response = tm_response;
            x.tm_holding = tm_holding;
        }
        if let Some(n) = self.nodes.find_mut(node) {
            match origin {
                XactOrigin::Local => n.local_xacts.insert(seq, id),
                XactOrigin::Remote => n.remote_xacts.insert(seq, id),
            };
        }
        if let Some(s) = sess.and_then(|s| self.sessions.find_mut(s)) {
            s.xacts.push(id);
        }

        log::debug!(
            "[{}] {} Create  peer [{}] {}",
            seq,
            if origin == XactOrigin::Local { "LOCAL " } else { "REMOTE" },
            peer,
            message_type
        );
        Ok(id)
    }

    /// Send a request in a new local transaction.
    pub(crate) fn send_request(
        &mut self,
        node: NodeHandle,
        sess: Option<SessHandle>,
        message: &PfcpMessage,
        seid: Option<u64>,
    ) -> PfcpResult<XactId> {
        let seq = self.xact_next_seq(node)?;
        let id = self.xact_create(XactOrigin::Local, node, seq, message.message_type(), sess)?;

        let buf = build_message(message, seq, seid).freeze();
        let (peer, tm) = {
            let x = self.xacts.find_mut(id).ok_or(PfcpError::StaleXact)?;
            x.request = Some(buf.clone());
            x.state = XactState::Sent;
            (x.peer, x.tm_response)
        };
        if let Some(tm) = tm {
            self.timers.start(tm, self.now, self.conf.time.t1_response_duration);
        }
        self.send_to(peer, &buf);

        Ok(id)
    }

    /// Answer the request held by remote transaction `id`.
    pub(crate) fn respond(
        &mut self,
        id: XactId,
        message: &PfcpMessage,
        seid: Option<u64>,
    ) -> PfcpResult<()> {
        let x = self.xacts.find_mut(id).ok_or(PfcpError::StaleXact)?;
        ogs_core::ogs_assert!(x.origin == XactOrigin::Remote, "[{}] respond on a local xact", x.seq);
        ogs_core::ogs_assert!(
            message.message_type() as u8 == x.message_type as u8 + 1,
            "[{}] {} answered with {}",
            x.seq,
            x.message_type,
            message.message_type()
        );

        let buf = build_message(message, x.seq, seid).freeze();
        x.response = Some(buf.clone());
        x.state = XactState::Completed;
        let (peer, tm) = (x.peer, x.tm_holding);

        if let Some(tm) = tm {
            self.timers.start(tm, self.now, self.conf.time.t1_holding_duration);
        }
        self.send_to(peer, &buf);
        Ok(())
    }

    /// Match an inbound request against the remote transactions of `node`.
    ///
    /// Returns the new transaction to process, or `None` when the request is
    /// a retransmission, in which case the cached response (if any) has
    /// already been resent.
    pub(crate) fn xact_receive_request(
        &mut self,
        node: NodeHandle,
        header: &PfcpHeader,
    ) -> Option<XactId> {
        let seq = header.sequence_number;
        let held = self.nodes.find(node)?.remote_xacts.get(&seq).copied();

        if let Some(id) = held {
            match self.xacts.find(id) {
                Some(x) if x.message_type == header.message_type => {
                    match &x.response {
                        Some(response) => {
                            log::info!("[{}] {} retransmitted, resend response", seq, x.message_type);
                            let (peer, response) = (x.peer, response.clone());
                            self.send_to(peer, &response);
                        }
                        None => {
                            log::info!("[{}] {} retransmitted, still processing", seq, x.message_type);
                        }
                    }
                    return None;
                }
                Some(x) => {
                    log::warn!(
                        "[{}] {} reuses the sequence of {}",
                        seq,
                        header.message_type,
                        x.message_type
                    );
                    self.xact_delete(id);
                }
                None => {
                    if let Some(n) = self.nodes.find_mut(node) {
                        n.remote_xacts.remove(&seq);
                    }
                }
            }
        }

        match self.xact_create(XactOrigin::Remote, node, seq, header.message_type, None) {
            Ok(id) => Some(id),
            Err(e) => {
                log::error!("[{}] {} dropped: {}", seq, header.message_type, e);
                None
            }
        }
    }

    /// Match an inbound response against the local transactions of `node`.
    pub(crate) fn xact_receive_response(
        &mut self,
        node: NodeHandle,
        header: &PfcpHeader,
    ) -> Option<XactId> {
        let seq = header.sequence_number;
        let Some(id) = self.nodes.find(node)?.local_xacts.get(&seq).copied() else {
            log::warn!("[{}] {} has no matching request", seq, header.message_type);
            return None;
        };
        let x = self.xacts.find_mut(id)?;

        if x.state.is_terminal() {
            log::info!("[{}] {} late response in {}", seq, header.message_type, x.state.name());
            return None;
        }
        if header.message_type as u8 != x.message_type as u8 + 1 {
            log::warn!("[{}] {} does not answer {}", seq, header.message_type, x.message_type);
            return None;
        }

        x.state = XactState::Completed;
        let (tm_response, tm_holding) = (x.tm_response, x.tm_holding);
        if let Some(tm) = tm_response {
            self.timers.stop(tm);
        }
        if let Some(tm) = tm_holding {
            self.timers.start(tm, self.now, self.conf.time.t1_holding_duration);
        }
        log::debug!("[{}] LOCAL  Commit  {}", seq, header.message_type);
        Some(id)
    }

    pub(crate) fn xact_response_timeout(&mut self, id: XactId) {
        let Some(x) = self.xacts.find_mut(id) else {
            return;
        };
        if x.state.is_terminal() {
            return;
        }

        x.response_rcount = x.response_rcount.saturating_sub(1);
        if x.response_rcount > 0 {
            x.state = XactState::Retried;
            x.retransmissions += 1;
            log::warn!(
                "[{}] {} No Response, retransmit #{}",
                x.seq,
                x.message_type,
                x.retransmissions
            );
            let (peer, request, tm) = (x.peer, x.request.clone(), x.tm_response);
            if let Some(tm) = tm {
                self.timers.start(tm, self.now, self.conf.time.t1_response_duration);
            }
            if let Some(request) = request {
                self.send_to(peer, &request);
            }
        } else {
            log::error!(
                "[{}] {} No Response from [{}]. Give up!",
                x.seq,
                x.message_type,
                x.peer
            );
            self.xact_fail(id, true);
        }
    }

    /// Move a local transaction to FAILED and report it.
    ///
    /// The retransmission timer is disarmed for good; the record lingers
    /// for the holding window. With `notify_node` a failed heartbeat is
    /// also fed to the node state machine.
    pub(crate) fn xact_fail(&mut self, id: XactId, notify_node: bool) {
        let Some(x) = self.xacts.find_mut(id) else {
            return;
        };
        if x.state.is_terminal() {
            return;
        }
        x.state = XactState::Failed;
        let (tm_response, tm_holding) = (x.tm_response, x.tm_holding);
        let (node, sess, message_type) = (x.node, x.sess, x.message_type);

        if let Some(tm) = tm_response {
            self.timers.stop(tm);
        }
        if let Some(tm) = tm_holding {
            self.timers.start(tm, self.now, self.conf.time.t1_holding_duration);
        }

        self.push_event(PfcpEvent::XactTimeout { xact: id, node, sess, message_type });

        if notify_node && message_type == PfcpMessageType::HeartbeatRequest {
            self.node_dispatch(node, PfcpNodeEvent::HeartbeatFailed);
        }
    }

    pub(crate) fn xact_holding_timeout(&mut self, id: XactId) {
        let Some(x) = self.xacts.find_mut(id) else {
            return;
        };
        x.holding_rcount = x.holding_rcount.saturating_sub(1);
        if x.holding_rcount > 0 {
            let tm = x.tm_holding;
            if let Some(tm) = tm {
                self.timers.start(tm, self.now, self.conf.time.t1_holding_duration);
            }
        } else {
            log::debug!("[{}] {} Delete  {}", x.seq, x.origin_name(), x.message_type);
            self.xact_delete(id);
        }
    }

    /// Fail every local transaction of `node` still waiting for a response
    /// and drop the remote ones not answered yet.
    pub(crate) fn xact_fail_all(&mut self, node: NodeHandle) {
        let Some(n) = self.nodes.find(node) else {
            return;
        };
        let mut local: Vec<XactId> = n.local_xacts.values().copied().collect();
        let remote: Vec<XactId> = n.remote_xacts.values().copied().collect();
        local.sort_by_key(|id| self.xacts.find(*id).map(|x| x.seq));

        for id in local {
            self.xact_fail(id, false);
        }
        for id in remote {
            if self.xact_state(id) == Some(XactState::Created) {
                self.xact_delete(id);
            }
        }
    }

    /// Stop caring about the session of `id`, so that destroying the
    /// session keeps the transaction (and its cached response) alive.
    pub(crate) fn xact_detach_sess(&mut self, id: XactId) {
        let Some(x) = self.xacts.find_mut(id) else {
            return;
        };
        if let Some(s) = x.sess.take().and_then(|s| self.sessions.find_mut(s)) {
            s.xacts.retain(|x| *x != id);
        }
    }

    /// Release a transaction and its timers.
    pub(crate) fn xact_delete(&mut self, id: XactId) {
        let Some(x) = self.xacts.free(id) else {
            return;
        };
        for tm in [x.tm_response, x.tm_holding].into_iter().flatten() {
            self.timers.delete(tm);
        }
        if let Some(n) = self.nodes.find_mut(x.node) {
            let map = match x.origin {
                XactOrigin::Local => &mut n.local_xacts,
                XactOrigin::Remote => &mut n.remote_xacts,
            };
            if map.get(&x.seq) == Some(&id) {
                map.remove(&x.seq);
            }
        }
        if let Some(s) = x.sess.and_then(|s| self.sessions.find_mut(s)) {
            s.xacts.retain(|other| *other != id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::PfcpSelfConf;
    use crate::message::{HeartbeatRequest, HeartbeatResponse};
    use crate::path::tests::RecordingTransport;
    use ogs_app::PfcpRole;
    use std::net::{IpAddr, Ipv4Addr};
    use std::time::{Duration, Instant};

    fn addr(last: u8) -> SocketAddr {
        SocketAddr::new(IpAddr::V4(Ipv4Addr::new(127, 0, 0, last)), 8805)
    }

    fn setup() -> (PfcpContext<RecordingTransport>, NodeHandle, Instant) {
        let now = Instant::now();
        let conf = PfcpSelfConf::new(PfcpRole::Cp, Some(addr(4)), None);
        let mut ctx = PfcpContext::new(conf, RecordingTransport::default(), now);
        let node = ctx.node_add(addr(7), false).unwrap();
        (ctx, node, now)
    }

    fn heartbeat() -> PfcpMessage {
        PfcpMessage::HeartbeatRequest(HeartbeatRequest::new(1))
    }

    fn header(message_type: PfcpMessageType, seq: u32) -> PfcpHeader {
        PfcpHeader::new(message_type, seq)
    }

    #[test]
    fn test_retransmit_then_fail() {
        let (mut ctx, node, now) = setup();
        let t1 = ctx.conf.time.t1_response_duration;

        let id = ctx.send_request(node, None, &heartbeat(), None).unwrap();
        assert_eq!(ctx.xact_state(id), Some(XactState::Sent));
        assert_eq!(ctx.transport.sent.len(), 1);

        ctx.tick(now + t1);
        assert_eq!(ctx.xact_state(id), Some(XactState::Retried));
        ctx.tick(now + t1 * 2);
        assert_eq!(ctx.xact(id).unwrap().retransmissions, 2);
        assert_eq!(ctx.transport.sent.len(), 3);
        // every copy carries the same sequence number
        assert!(ctx.transport.sent.windows(2).all(|w| w[0].1 == w[1].1));

        ctx.tick(now + t1 * 3);
        assert_eq!(ctx.xact_state(id), Some(XactState::Failed));
        assert!(!ctx.xact_is_timer_running(id));
        assert!(ctx
            .drain_events()
            .iter()
            .any(|e| matches!(e, PfcpEvent::XactTimeout { xact, .. } if *xact == id)));
    }

    #[test]
    fn test_failed_is_idempotent_under_ticks() {
        let (mut ctx, node, now) = setup();
        let t1 = ctx.conf.time.t1_response_duration;
        let id = ctx.send_request(node, None, &heartbeat(), None).unwrap();

        for i in 1..=3 {
            ctx.tick(now + t1 * i);
        }
        assert_eq!(ctx.xact_state(id), Some(XactState::Failed));
        let sent = ctx.transport.sent.len();
        ctx.drain_events();

        for i in 4..=6 {
            ctx.xact_response_timeout(id);
            ctx.tick(now + t1 * i);
        }
        assert_eq!(ctx.transport.sent.len(), sent);
        assert!(ctx
            .drain_events()
            .iter()
            .all(|e| !matches!(e, PfcpEvent::XactTimeout { .. })));

        // released after the holding window
        ctx.tick(now + t1 * 3 + ctx.conf.time.t1_holding_duration);
        assert!(ctx.xact(id).is_none());
    }

    #[test]
    fn test_response_completes() {
        let (mut ctx, node, now) = setup();
        let id = ctx.send_request(node, None, &heartbeat(), None).unwrap();
        let seq = ctx.xact(id).unwrap().seq;

        let rsp = header(PfcpMessageType::HeartbeatResponse, seq);
        assert_eq!(ctx.xact_receive_response(node, &rsp), Some(id));
        assert_eq!(ctx.xact_state(id), Some(XactState::Completed));
        assert!(!ctx.xact_is_timer_running(id));

        // duplicate response is dropped
        assert_eq!(ctx.xact_receive_response(node, &rsp), None);

        ctx.tick(now + ctx.conf.time.t1_holding_duration);
        assert!(ctx.xact(id).is_none());
    }

    #[test]
    fn test_response_of_wrong_type() {
        let (mut ctx, node, _) = setup();
        let id = ctx.send_request(node, None, &heartbeat(), None).unwrap();
        let seq = ctx.xact(id).unwrap().seq;

        let rsp = header(PfcpMessageType::AssociationSetupResponse, seq);
        assert_eq!(ctx.xact_receive_response(node, &rsp), None);
        assert_eq!(ctx.xact_state(id), Some(XactState::Sent));
    }

    #[test]
    fn test_duplicate_request_replays_response() {
        let (mut ctx, node, _) = setup();
        let req = header(PfcpMessageType::HeartbeatRequest, 77);

        let id = ctx.xact_receive_request(node, &req).unwrap();
        // retransmission before we answered: dropped, nothing sent
        assert_eq!(ctx.xact_receive_request(node, &req), None);
        assert!(ctx.transport.sent.is_empty());

        let rsp = PfcpMessage::HeartbeatResponse(HeartbeatResponse::new(1));
        ctx.respond(id, &rsp, None).unwrap();
        assert_eq!(ctx.transport.sent.len(), 1);

        assert_eq!(ctx.xact_receive_request(node, &req), None);
        assert_eq!(ctx.transport.sent.len(), 2);
        assert_eq!(ctx.transport.sent[0].1, ctx.transport.sent[1].1);
        assert_eq!(ctx.xact_count(), 1);
    }

    #[test]
    fn test_sequence_skips_in_flight() {
        let (mut ctx, node, _) = setup();
        let first = ctx.send_request(node, None, &heartbeat(), None).unwrap();
        let first_seq = ctx.xact(first).unwrap().seq;

        // force the counter back onto the sequence still in flight
        ctx.nodes.find_mut(node).unwrap().next_seq = first_seq;
        let second = ctx.send_request(node, None, &heartbeat(), None).unwrap();
        assert_ne!(ctx.xact(second).unwrap().seq, first_seq);
        assert_eq!(ctx.xact_state(first), Some(XactState::Sent));
    }

    #[test]
    fn test_sequence_wraps() {
        let (mut ctx, node, _) = setup();
        ctx.nodes.find_mut(node).unwrap().next_seq = PFCP_MAX_XACT_ID;
        let a = ctx.send_request(node, None, &heartbeat(), None).unwrap();
        let b = ctx.send_request(node, None, &heartbeat(), None).unwrap();
        assert_eq!(ctx.xact(a).unwrap().seq, PFCP_MAX_XACT_ID);
        assert_eq!(ctx.xact(b).unwrap().seq, 1);
    }

    #[test]
    fn test_session_remove_cancels_xacts() {
        let (mut ctx, node, now) = setup();
        let sess = ctx.sess_add(node).unwrap();
        let id = ctx.send_request(node, Some(sess), &heartbeat(), None).unwrap();
        assert_eq!(ctx.sess(sess).unwrap().xacts(), &[id]);

        ctx.sess_remove(sess);
        assert!(ctx.xact(id).is_none());
        assert_eq!(ctx.timers.running(), 0);

        ctx.tick(now + Duration::from_secs(60));
        assert!(ctx.transport.sent.len() == 1);
    }
}
