//! PFCP node and its association state machine
//!
//! ```text
//! INITIAL -> WILL_ASSOCIATE -> ASSOCIATED -> EXCEPTION -> WILL_ASSOCIATE
//!                                                 \-------> FINAL
//! ```
//!
//! Every state is a handler taking a [`PfcpNodeEvent`]; a handler asks for
//! a transition by returning [`PfcpFsmResult::Transition`], upon which the
//! old state sees `Exit` and the new one `Entry`.

use std::collections::HashMap;
use std::net::SocketAddr;

use ogs_app::PfcpRole;
use ogs_core::{OgsPoolId, OgsTimerId};

use crate::context::{PfcpContext, PfcpTimer};
use crate::error::{PfcpError, PfcpResult};
use crate::event::PfcpEvent;
use crate::header::PfcpHeader;
use crate::message::PfcpMessage;
use crate::path::PfcpTransport;
use crate::session::SessHandle;
use crate::types::{
    CpFunctionFeatures, NodeId, PfcpCause, UpFunctionFeatures, UserPlaneIpResourceInformation,
};
use crate::xact::XactId;

pub type NodeHandle = OgsPoolId;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum PfcpState {
    #[default]
    Initial,
    WillAssociate,
    Associated,
    Exception,
    Final,
}

impl PfcpState {
    pub fn name(&self) -> &'static str {
        match self {
            PfcpState::Initial => "PFCP_STATE_INITIAL",
            PfcpState::WillAssociate => "PFCP_STATE_WILL_ASSOCIATE",
            PfcpState::Associated => "PFCP_STATE_ASSOCIATED",
            PfcpState::Exception => "PFCP_STATE_EXCEPTION",
            PfcpState::Final => "PFCP_STATE_FINAL",
        }
    }
}

impl std::fmt::Display for PfcpState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PfcpFsmResult {
    Handled,
    Ignored,
    Transition(PfcpState),
}

#[derive(Debug, Clone, Copy)]
pub(crate) enum PfcpNodeEvent<'a> {
    Entry,
    Exit,
    AssociationTimer,
    NoHeartbeatTimer,
    Message {
        xact: XactId,
        header: &'a PfcpHeader,
        message: &'a PfcpMessage,
    },
    /// A heartbeat request went unanswered
    HeartbeatFailed,
    /// Local decision to drop the association
    Release,
}

impl PfcpNodeEvent<'_> {
    fn name(&self) -> &'static str {
        match self {
            PfcpNodeEvent::Entry => "ENTRY",
            PfcpNodeEvent::Exit => "EXIT",
            PfcpNodeEvent::AssociationTimer => "ASSOCIATION_TIMER",
            PfcpNodeEvent::NoHeartbeatTimer => "NO_HEARTBEAT_TIMER",
            PfcpNodeEvent::Message { message, .. } => message.message_type().name(),
            PfcpNodeEvent::HeartbeatFailed => "HEARTBEAT_FAILED",
            PfcpNodeEvent::Release => "RELEASE",
        }
    }
}

/// One PFCP peer
#[derive(Debug)]
pub struct PfcpNode {
    pub addr: SocketAddr,
    pub node_id: Option<NodeId>,
    pub state: PfcpState,
    /// Send association setup ourselves instead of waiting for the peer
    pub try_to_associate: bool,

    pub remote_recovery: Option<u32>,
    pub restoration_required: bool,

    pub up_function_features: UpFunctionFeatures,
    pub cp_function_features: CpFunctionFeatures,
    pub gtpu_resources: Vec<UserPlaneIpResourceInformation>,

    pub(crate) sessions: Vec<SessHandle>,
    pub(crate) local_xacts: HashMap<u32, XactId>,
    pub(crate) remote_xacts: HashMap<u32, XactId>,
    pub(crate) next_seq: u32,

    t_association: Option<OgsTimerId>,
    t_no_heartbeat: Option<OgsTimerId>,
}

impl PfcpNode {
    pub fn is_associated(&self) -> bool {
        self.state == PfcpState::Associated
    }
}

impl<T: PfcpTransport> PfcpContext<T> {
    /// Register a peer, or return the one already known at `addr`.
    ///
    /// The node stays in INITIAL until [`PfcpContext::node_start`].
    pub fn node_add(&mut self, addr: SocketAddr, try_to_associate: bool) -> PfcpResult<NodeHandle> {
        if let Some(node) = self.node_find(addr) {
            return Ok(node);
        }

        let node = self
            .nodes
            .alloc(PfcpNode {
                addr,
                node_id: None,
                state: PfcpState::Initial,
                try_to_associate,
                remote_recovery: None,
                restoration_required: false,
                up_function_features: UpFunctionFeatures::default(),
                cp_function_features: CpFunctionFeatures::default(),
                gtpu_resources: Vec::new(),
                sessions: Vec::new(),
                local_xacts: HashMap::new(),
                remote_xacts: HashMap::new(),
                next_seq: 1,
                t_association: None,
                t_no_heartbeat: None,
            })
            .ok_or(PfcpError::PoolExhausted("pfcp_node"))?;

        let t_association = self.timers.add(PfcpTimer::Association(node));
        let t_no_heartbeat = self.timers.add(PfcpTimer::NoHeartbeat(node));
        let (Some(t_association), Some(t_no_heartbeat)) = (t_association, t_no_heartbeat) else {
            for tm in [t_association, t_no_heartbeat].into_iter().flatten() {
                self.timers.delete(tm);
            }
            self.nodes.free(node);
            return Err(PfcpError::PoolExhausted("timer"));
        };
        if let Some(n) = self.nodes.find_mut(node) {
            n.t_association = Some(t_association);
            n.t_no_heartbeat = Some(t_no_heartbeat);
        }

        log::info!("PFCP node [{}] added ({}/{})", addr,
            self.nodes.allocated(), self.nodes.capacity());
        Ok(node)
    }

    /// Leave INITIAL; the node then associates, or waits for the peer to.
    pub fn node_start(&mut self, node: NodeHandle) {
        if self.node_state(node) == Some(PfcpState::Initial) {
            self.node_transition(node, PfcpState::WillAssociate);
        }
    }

    pub fn node_find(&self, addr: SocketAddr) -> Option<NodeHandle> {
        self.nodes
            .iter()
            .find(|(_, n)| n.addr == addr)
            .map(|(id, _)| id)
    }

    pub fn node(&self, node: NodeHandle) -> Option<&PfcpNode> {
        self.nodes.find(node)
    }

    pub fn node_state(&self, node: NodeHandle) -> Option<PfcpState> {
        self.nodes.find(node).map(|n| n.state)
    }

    pub fn node_count(&self) -> usize {
        self.nodes.allocated()
    }

    /// Drop the association with an associated peer.
    ///
    /// Outstanding transactions fail, the node goes to EXCEPTION and the
    /// peer is sent an Association Release Request.
    pub fn node_release(&mut self, node: NodeHandle) -> PfcpFsmResult {
        let result = self.node_dispatch(node, PfcpNodeEvent::Release);
        if result == PfcpFsmResult::Transition(PfcpState::Exception) {
            if let Err(e) = self.send_association_release_request(node) {
                log::error!("association release request failed: {}", e);
            }
        }
        result
    }

    /// Remove every session of `node`, reporting each one as deleted.
    fn node_release_sessions(&mut self, node: NodeHandle) {
        for sess in self.node_sessions(node) {
            if let Some(s) = self.sess_remove(sess) {
                self.push_event(PfcpEvent::SessionDeleted {
                    local_seid: s.local_seid,
                    cause: PfcpCause::NoEstablishedPfcpAssociation,
                    usage_reports: Vec::new(),
                });
            }
        }
    }

    /// Tear the node down: FINAL, then every session and transaction bound
    /// to it is destroyed and its timers are released.
    pub fn node_remove(&mut self, node: NodeHandle) {
        if !self.nodes.contains(node) {
            return;
        }
        self.node_transition(node, PfcpState::Final);

        for sess in self.node_sessions(node) {
            self.sess_remove(sess);
        }
        let xacts: Vec<XactId> = self
            .nodes
            .find(node)
            .map(|n| n.local_xacts.values().chain(n.remote_xacts.values()).copied().collect())
            .unwrap_or_default();
        for xact in xacts {
            self.xact_delete(xact);
        }

        if let Some(n) = self.nodes.free(node) {
            for tm in [n.t_association, n.t_no_heartbeat].into_iter().flatten() {
                self.timers.delete(tm);
            }
            log::info!("PFCP node [{}] removed", n.addr);
        }
    }

    pub(crate) fn node_dispatch(&mut self, node: NodeHandle, event: PfcpNodeEvent<'_>) -> PfcpFsmResult {
        let Some(state) = self.node_state(node) else {
            return PfcpFsmResult::Ignored;
        };
        let result = self.node_handle(node, state, event);
        if let PfcpFsmResult::Transition(next) = result {
            self.node_transition(node, next);
        }
        result
    }

    fn node_transition(&mut self, node: NodeHandle, next: PfcpState) {
        let mut next = next;
        loop {
            let Some(prev) = self.node_state(node) else {
                return;
            };
            if prev == next {
                return;
            }
            self.node_handle(node, prev, PfcpNodeEvent::Exit);

            let Some(n) = self.nodes.find_mut(node) else {
                return;
            };
            n.state = next;
            log::info!("[{}] {} -> {}", n.addr, prev, next);

            match self.node_handle(node, next, PfcpNodeEvent::Entry) {
                PfcpFsmResult::Transition(again) => next = again,
                _ => return,
            }
        }
    }

    fn node_handle(&mut self, node: NodeHandle, state: PfcpState, event: PfcpNodeEvent<'_>) -> PfcpFsmResult {
        if let Some(n) = self.nodes.find(node) {
            log::trace!("[{}] {}: {}", n.addr, state, event.name());
        }
        match state {
            PfcpState::Initial => PfcpFsmResult::Ignored,
            PfcpState::WillAssociate => self.pfcp_state_will_associate(node, event),
            PfcpState::Associated => self.pfcp_state_associated(node, event),
            PfcpState::Exception => self.pfcp_state_exception(node, event),
            PfcpState::Final => self.pfcp_state_final(node, event),
        }
    }

    pub(crate) fn node_association_timeout(&mut self, node: NodeHandle) {
        self.node_dispatch(node, PfcpNodeEvent::AssociationTimer);
    }

    pub(crate) fn node_no_heartbeat_timeout(&mut self, node: NodeHandle) {
        self.node_dispatch(node, PfcpNodeEvent::NoHeartbeatTimer);
    }

    fn node_timers(&self, node: NodeHandle) -> Option<(OgsTimerId, OgsTimerId)> {
        let n = self.nodes.find(node)?;
        Some((n.t_association?, n.t_no_heartbeat?))
    }

    fn node_start_association_timer(&mut self, node: NodeHandle) {
        if let Some((tm, _)) = self.node_timers(node) {
            self.timers.start(tm, self.now, self.conf.time.association_interval);
        }
    }

    fn node_start_no_heartbeat_timer(&mut self, node: NodeHandle) {
        if let Some((_, tm)) = self.node_timers(node) {
            self.timers.start(tm, self.now, self.conf.time.no_heartbeat_duration);
        }
    }

    fn node_stop_timers(&mut self, node: NodeHandle) {
        if let Some((a, h)) = self.node_timers(node) {
            self.timers.stop(a);
            self.timers.stop(h);
        }
    }

    fn node_addr(&self, node: NodeHandle) -> Option<SocketAddr> {
        self.nodes.find(node).map(|n| n.addr)
    }

    /// Emit the restoration event once per detected peer restart.
    fn node_check_restoration(&mut self, node: NodeHandle) {
        let Some(n) = self.nodes.find_mut(node) else {
            return;
        };
        if !std::mem::take(&mut n.restoration_required) {
            return;
        }
        let addr = n.addr;
        log::warn!("[{}] peer restarted, sessions need restoration", addr);
        self.push_event(PfcpEvent::NodeRestoration { node, addr });
    }

    fn pfcp_state_will_associate(&mut self, node: NodeHandle, event: PfcpNodeEvent<'_>) -> PfcpFsmResult {
        match event {
            PfcpNodeEvent::Entry => {
                let try_to_associate = self.nodes.find(node).is_some_and(|n| n.try_to_associate);
                if try_to_associate {
                    self.node_start_association_timer(node);
                    self.node_send_association_setup(node);
                }
                PfcpFsmResult::Handled
            }
            PfcpNodeEvent::Exit => {
                if let Some((tm, _)) = self.node_timers(node) {
                    self.timers.stop(tm);
                }
                PfcpFsmResult::Handled
            }
            PfcpNodeEvent::AssociationTimer => {
                if let Some(addr) = self.node_addr(node) {
                    log::warn!("[{}] retry association setup", addr);
                }
                self.node_start_association_timer(node);
                self.node_send_association_setup(node);
                PfcpFsmResult::Handled
            }
            PfcpNodeEvent::Message { xact, header, message } => match message {
                PfcpMessage::HeartbeatRequest(req) => {
                    self.handle_heartbeat_request(node, xact, req);
                    PfcpFsmResult::Handled
                }
                PfcpMessage::HeartbeatResponse(rsp) => {
                    self.handle_heartbeat_response(node, rsp);
                    PfcpFsmResult::Handled
                }
                PfcpMessage::AssociationSetupRequest(req) => {
                    if self.handle_association_setup_request(node, xact, req) {
                        PfcpFsmResult::Transition(PfcpState::Associated)
                    } else {
                        PfcpFsmResult::Handled
                    }
                }
                PfcpMessage::AssociationSetupResponse(rsp) => {
                    if self.handle_association_setup_response(node, rsp) {
                        PfcpFsmResult::Transition(PfcpState::Associated)
                    } else {
                        PfcpFsmResult::Handled
                    }
                }
                PfcpMessage::AssociationReleaseRequest(req) => {
                    self.handle_association_release_request(node, xact, req);
                    PfcpFsmResult::Handled
                }
                _ => {
                    self.reject_unassociated(node, xact, header, message);
                    PfcpFsmResult::Handled
                }
            },
            PfcpNodeEvent::NoHeartbeatTimer
            | PfcpNodeEvent::HeartbeatFailed
            | PfcpNodeEvent::Release => PfcpFsmResult::Ignored,
        }
    }

    fn pfcp_state_associated(&mut self, node: NodeHandle, event: PfcpNodeEvent<'_>) -> PfcpFsmResult {
        match event {
            PfcpNodeEvent::Entry => {
                self.node_start_no_heartbeat_timer(node);
                if let Some(addr) = self.node_addr(node) {
                    log::info!("PFCP associated [{}]", addr);
                    self.push_event(PfcpEvent::NodeAssociated { node, addr });
                }
                self.node_check_restoration(node);
                PfcpFsmResult::Handled
            }
            PfcpNodeEvent::Exit => {
                if let Some((_, tm)) = self.node_timers(node) {
                    self.timers.stop(tm);
                }
                if self.conf.release_sessions_on_failure {
                    self.node_release_sessions(node);
                }
                PfcpFsmResult::Handled
            }
            PfcpNodeEvent::NoHeartbeatTimer => {
                if let Err(e) = self.send_heartbeat_request(node) {
                    log::error!("heartbeat request failed: {}", e);
                }
                PfcpFsmResult::Handled
            }
            PfcpNodeEvent::Message { xact, header, message } => match message {
                PfcpMessage::HeartbeatRequest(req) => {
                    self.handle_heartbeat_request(node, xact, req);
                    self.node_start_no_heartbeat_timer(node);
                    self.node_check_restoration(node);
                    PfcpFsmResult::Handled
                }
                PfcpMessage::HeartbeatResponse(rsp) => {
                    self.handle_heartbeat_response(node, rsp);
                    self.node_start_no_heartbeat_timer(node);
                    self.node_check_restoration(node);
                    PfcpFsmResult::Handled
                }
                PfcpMessage::AssociationSetupRequest(req) => {
                    if self.handle_association_setup_request(node, xact, req) {
                        self.node_check_restoration(node);
                    }
                    PfcpFsmResult::Handled
                }
                PfcpMessage::AssociationSetupResponse(rsp) => {
                    self.handle_association_setup_response(node, rsp);
                    PfcpFsmResult::Handled
                }
                PfcpMessage::AssociationReleaseRequest(req) => {
                    self.handle_association_release_request(node, xact, req);
                    PfcpFsmResult::Transition(PfcpState::Exception)
                }
                PfcpMessage::AssociationReleaseResponse(_) => PfcpFsmResult::Handled,
                _ => {
                    self.handle_session_message(node, xact, header, message);
                    PfcpFsmResult::Handled
                }
            },
            PfcpNodeEvent::HeartbeatFailed | PfcpNodeEvent::Release => {
                if let Some(addr) = self.node_addr(node) {
                    log::warn!("[{}] association lost ({})", addr, event.name());
                }
                PfcpFsmResult::Transition(PfcpState::Exception)
            }
            PfcpNodeEvent::AssociationTimer => PfcpFsmResult::Ignored,
        }
    }

    fn pfcp_state_exception(&mut self, node: NodeHandle, event: PfcpNodeEvent<'_>) -> PfcpFsmResult {
        match event {
            PfcpNodeEvent::Entry => {
                let Some(addr) = self.node_addr(node) else {
                    return PfcpFsmResult::Ignored;
                };
                log::warn!("PFCP exception [{}]", addr);

                self.xact_fail_all(node);
                self.push_event(PfcpEvent::NodeException { node, addr });

                if self.nodes.find(node).is_some_and(|n| n.try_to_associate) {
                    self.node_start_association_timer(node);
                }
                PfcpFsmResult::Handled
            }
            PfcpNodeEvent::Exit => {
                if let Some((tm, _)) = self.node_timers(node) {
                    self.timers.stop(tm);
                }
                PfcpFsmResult::Handled
            }
            PfcpNodeEvent::AssociationTimer => PfcpFsmResult::Transition(PfcpState::WillAssociate),
            PfcpNodeEvent::Message { xact, header, message } => match message {
                // left unanswered so that the peer loses the association too
                // and sets it up again
                PfcpMessage::HeartbeatRequest(_) => {
                    if let Some(addr) = self.node_addr(node) {
                        log::warn!("[{}] heartbeat ignored while not associated", addr);
                    }
                    PfcpFsmResult::Ignored
                }
                PfcpMessage::HeartbeatResponse(rsp) => {
                    self.handle_heartbeat_response(node, rsp);
                    PfcpFsmResult::Handled
                }
                PfcpMessage::AssociationReleaseRequest(req) => {
                    self.handle_association_release_request(node, xact, req);
                    PfcpFsmResult::Handled
                }
                PfcpMessage::AssociationReleaseResponse(rsp) => {
                    if let Some(addr) = self.node_addr(node) {
                        log::info!("[{}] association released [{}]", addr, rsp.cause.name());
                    }
                    PfcpFsmResult::Handled
                }
                PfcpMessage::AssociationSetupRequest(req) => {
                    if self.handle_association_setup_request(node, xact, req) {
                        PfcpFsmResult::Transition(PfcpState::Associated)
                    } else {
                        PfcpFsmResult::Handled
                    }
                }
                _ => {
                    self.reject_unassociated(node, xact, header, message);
                    PfcpFsmResult::Ignored
                }
            },
            // already failed: nothing more to tear down
            PfcpNodeEvent::NoHeartbeatTimer
            | PfcpNodeEvent::HeartbeatFailed
            | PfcpNodeEvent::Release => PfcpFsmResult::Ignored,
        }
    }

    fn pfcp_state_final(&mut self, node: NodeHandle, event: PfcpNodeEvent<'_>) -> PfcpFsmResult {
        match event {
            PfcpNodeEvent::Entry => {
                self.node_stop_timers(node);
                self.xact_fail_all(node);
                PfcpFsmResult::Handled
            }
            _ => PfcpFsmResult::Ignored,
        }
    }

    fn node_send_association_setup(&mut self, node: NodeHandle) {
        if let Err(e) = self.send_association_setup_request(node) {
            log::error!("association setup request failed: {}", e);
        }
    }

    /// Whether sessions may be created towards `node`.
    pub(crate) fn node_check_associated(&self, node: NodeHandle) -> PfcpResult<()> {
        let n = self.nodes.find(node).ok_or(PfcpError::StaleNode)?;
        if n.state != PfcpState::Associated {
            return Err(PfcpError::NoAssociation(n.addr));
        }
        Ok(())
    }

    pub(crate) fn is_cp(&self) -> bool {
        self.conf.role == PfcpRole::Cp
    }
}
