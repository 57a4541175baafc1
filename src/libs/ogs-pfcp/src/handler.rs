//! PFCP message handlers
//!
//! Node-level handlers run from the association state machine. Session
//! handlers run only while the node is associated: the CP side consumes
//! responses and session reports, the UP side installs the rules it is
//! given and answers establishment, modification and deletion.

use crate::build::{
    build_association_release_response, build_cp_association_setup_response, build_created_pdr,
    build_heartbeat_response, build_session_deletion_response,
    build_session_establishment_response, build_session_modification_response,
    build_session_report_response, build_up_association_setup_response,
};
use crate::context::{ntp_time_now, PfcpContext};
use crate::event::PfcpEvent;
use crate::grouped::{
    CreateBar, CreateFar, CreatePdr, CreateQer, CreateUrr, UpdateFar, UpdatePdr, UpdateQer,
    UpdateUrr, UsageReport,
};
use crate::header::{PfcpHeader, PfcpMessageType};
use crate::message::{
    AssociationReleaseRequest, AssociationSetupRequest, AssociationSetupResponse,
    HeartbeatRequest, HeartbeatResponse, PfcpMessage, SessionDeletionResponse,
    SessionEstablishmentRequest, SessionEstablishmentResponse, SessionModificationRequest,
    SessionModificationResponse, SessionReportRequest, SessionReportResponse,
};
use crate::node::NodeHandle;
use crate::path::PfcpTransport;
use crate::rule::{Bar, Far, Pdr, PdrId, Qer, Urr};
use crate::session::{PfcpSess, SessHandle};
use crate::types::{gtp_cause_from_pfcp, PfcpCause, UsageReportTrigger};
use crate::xact::XactId;

/// Rule changes carried by an establishment or modification request
#[derive(Default)]
struct RuleChanges<'a> {
    remove_pdrs: &'a [u16],
    remove_fars: &'a [u32],
    remove_urrs: &'a [u32],
    remove_qers: &'a [u32],
    remove_bar: bool,
    create_pdrs: &'a [CreatePdr],
    create_fars: &'a [CreateFar],
    create_urrs: &'a [CreateUrr],
    create_qers: &'a [CreateQer],
    create_bar: Option<&'a CreateBar>,
    update_pdrs: &'a [UpdatePdr],
    update_fars: &'a [UpdateFar],
    update_urrs: &'a [UpdateUrr],
    update_qers: &'a [UpdateQer],
    update_bar: Option<&'a CreateBar>,
}

impl<'a> RuleChanges<'a> {
    fn establishment(req: &'a SessionEstablishmentRequest) -> Self {
        RuleChanges {
            create_pdrs: &req.create_pdrs,
            create_fars: &req.create_fars,
            create_urrs: &req.create_urrs,
            create_qers: &req.create_qers,
            create_bar: req.create_bar.as_ref(),
            ..Default::default()
        }
    }

    fn modification(req: &'a SessionModificationRequest) -> Self {
        RuleChanges {
            remove_pdrs: &req.remove_pdrs,
            remove_fars: &req.remove_fars,
            remove_urrs: &req.remove_urrs,
            remove_qers: &req.remove_qers,
            remove_bar: req.remove_bar.is_some(),
            create_pdrs: &req.create_pdrs,
            create_fars: &req.create_fars,
            create_urrs: &req.create_urrs,
            create_qers: &req.create_qers,
            create_bar: req.create_bar.as_ref(),
            update_pdrs: &req.update_pdrs,
            update_fars: &req.update_fars,
            update_urrs: &req.update_urrs,
            update_qers: &req.update_qers,
            update_bar: req.update_bar.as_ref(),
        }
    }
}

fn rule_failure(kind: &str, id: u32, what: &str) -> PfcpCause {
    log::error!("{}-ID[{}] {}", kind, id, what);
    PfcpCause::RuleCreationModificationFailure
}

/// Install `changes` into `sess`: removals, then creations (referenced
/// rules before PDRs), then updates. Returns the ids of the new PDRs.
///
/// Changes applied before a failure are kept.
fn apply_rule_changes(sess: &mut PfcpSess, changes: &RuleChanges<'_>) -> Result<Vec<PdrId>, PfcpCause> {
    for id in changes.remove_pdrs {
        sess.remove_pdr(*id)
            .ok_or_else(|| rule_failure("PDR", *id as u32, "unknown in Remove PDR"))?;
    }
    for id in changes.remove_fars {
        sess.remove_far(*id)
            .ok_or_else(|| rule_failure("FAR", *id, "unknown in Remove FAR"))?;
    }
    for id in changes.remove_urrs {
        sess.remove_urr(*id)
            .ok_or_else(|| rule_failure("URR", *id, "unknown in Remove URR"))?;
    }
    for id in changes.remove_qers {
        sess.remove_qer(*id)
            .ok_or_else(|| rule_failure("QER", *id, "unknown in Remove QER"))?;
    }
    if changes.remove_bar {
        sess.remove_bar();
    }

    for ie in changes.create_fars {
        if sess.find_far(ie.far_id).is_some() {
            return Err(rule_failure("FAR", ie.far_id, "already exists"));
        }
        sess.fars.push(Far::from_create(ie));
    }
    for ie in changes.create_urrs {
        if sess.find_urr(ie.urr_id).is_some() {
            return Err(rule_failure("URR", ie.urr_id, "already exists"));
        }
        sess.urrs.push(Urr::from_create(ie));
    }
    for ie in changes.create_qers {
        if sess.find_qer(ie.qer_id).is_some() {
            return Err(rule_failure("QER", ie.qer_id, "already exists"));
        }
        sess.qers.push(Qer::from_create(ie));
    }
    if let Some(ie) = changes.create_bar {
        sess.bar = Some(Bar::from_create(ie));
    }

    let mut created = Vec::with_capacity(changes.create_pdrs.len());
    for ie in changes.create_pdrs {
        if sess.find_pdr(ie.pdr_id).is_some() {
            return Err(rule_failure("PDR", ie.pdr_id as u32, "already exists"));
        }
        sess.pdrs.push(Pdr::from_create(ie));
        created.push(ie.pdr_id);
    }

    for ie in changes.update_pdrs {
        sess.find_pdr_mut(ie.pdr_id)
            .ok_or_else(|| rule_failure("PDR", ie.pdr_id as u32, "unknown in Update PDR"))?
            .apply_update(ie);
    }
    for ie in changes.update_fars {
        sess.find_far_mut(ie.far_id)
            .ok_or_else(|| rule_failure("FAR", ie.far_id, "unknown in Update FAR"))?
            .apply_update(ie);
    }
    for ie in changes.update_urrs {
        sess.find_urr_mut(ie.urr_id)
            .ok_or_else(|| rule_failure("URR", ie.urr_id, "unknown in Update URR"))?
            .apply_update(ie);
    }
    for ie in changes.update_qers {
        sess.find_qer_mut(ie.qer_id)
            .ok_or_else(|| rule_failure("QER", ie.qer_id, "unknown in Update QER"))?
            .apply_update(ie);
    }
    if let Some(ie) = changes.update_bar {
        sess.bar = Some(Bar::from_create(ie));
    }

    for pdr in &sess.pdrs {
        if let Some(far_id) = pdr.far_id {
            if sess.find_far(far_id).is_none() {
                log::error!("PDR-ID[{}] refers to unknown FAR-ID[{}]", pdr.id, far_id);
                return Err(PfcpCause::MandatoryIeIncorrect);
            }
        }
    }

    Ok(created)
}

impl<T: PfcpTransport> PfcpContext<T> {
    fn respond_or_log(&mut self, xact: XactId, message: PfcpMessage, seid: Option<u64>) {
        if let Err(e) = self.respond(xact, &message, seid) {
            log::error!("cannot send {}: {}", message.message_type(), e);
        }
    }

    /// Peer recovery time stamp changed: the peer restarted.
    fn node_check_recovery(&mut self, node: NodeHandle, recovery_time_stamp: u32) {
        let Some(n) = self.nodes.find_mut(node) else {
            return;
        };
        if let Some(prev) = n.remote_recovery {
            if prev != recovery_time_stamp {
                log::warn!(
                    "[{}] recovery time stamp changed [{} -> {}]",
                    n.addr,
                    prev,
                    recovery_time_stamp
                );
                n.restoration_required = true;
            }
        }
        n.remote_recovery = Some(recovery_time_stamp);
    }

    pub(crate) fn handle_heartbeat_request(&mut self, node: NodeHandle, xact: XactId, req: &HeartbeatRequest) {
        self.node_check_recovery(node, req.recovery_time_stamp);
        let rsp = build_heartbeat_response(&self.conf);
        self.respond_or_log(xact, PfcpMessage::HeartbeatResponse(rsp), None);
    }

    pub(crate) fn handle_heartbeat_response(&mut self, node: NodeHandle, rsp: &HeartbeatResponse) {
        self.node_check_recovery(node, rsp.recovery_time_stamp);
    }

    /// Store what the peer tells about itself and accept the association.
    pub(crate) fn handle_association_setup_request(
        &mut self,
        node: NodeHandle,
        xact: XactId,
        req: &AssociationSetupRequest,
    ) -> bool {
        let Some(n) = self.nodes.find_mut(node) else {
            return false;
        };
        n.node_id = Some(req.node_id.clone());
        if let Some(features) = req.up_function_features {
            n.up_function_features = features;
        }
        if let Some(features) = req.cp_function_features {
            n.cp_function_features = features;
        }
        n.gtpu_resources = req.user_plane_ip_resource_information.clone();
        self.node_check_recovery(node, req.recovery_time_stamp);

        let rsp = if self.is_cp() {
            build_cp_association_setup_response(&self.conf, PfcpCause::RequestAccepted)
        } else {
            build_up_association_setup_response(&self.conf, PfcpCause::RequestAccepted)
        };
        match rsp {
            Ok(rsp) => {
                self.respond_or_log(xact, PfcpMessage::AssociationSetupResponse(rsp), None);
                true
            }
            Err(e) => {
                log::error!("cannot answer association setup: {}", e);
                false
            }
        }
    }

    pub(crate) fn handle_association_setup_response(
        &mut self,
        node: NodeHandle,
        rsp: &AssociationSetupResponse,
    ) -> bool {
        if rsp.cause != PfcpCause::RequestAccepted {
            log::warn!("association setup rejected [{}]", rsp.cause.name());
            return false;
        }
        let Some(n) = self.nodes.find_mut(node) else {
            return false;
        };
        n.node_id = Some(rsp.node_id.clone());
        if let Some(features) = rsp.up_function_features {
            n.up_function_features = features;
        }
        if let Some(features) = rsp.cp_function_features {
            n.cp_function_features = features;
        }
        n.gtpu_resources = rsp.user_plane_ip_resource_information.clone();
        self.node_check_recovery(node, rsp.recovery_time_stamp);
        true
    }

    pub(crate) fn handle_association_release_request(
        &mut self,
        node: NodeHandle,
        xact: XactId,
        req: &AssociationReleaseRequest,
    ) {
        if let Some(n) = self.nodes.find(node) {
            log::info!("[{}] association release requested by {:?}", n.addr, req.node_id);
        }
        match build_association_release_response(&self.conf, PfcpCause::RequestAccepted) {
            Ok(rsp) => self.respond_or_log(xact, PfcpMessage::AssociationReleaseResponse(rsp), None),
            Err(e) => log::error!("cannot answer association release: {}", e),
        }
    }

    /// Answer a session request received without an association.
    pub(crate) fn reject_unassociated(
        &mut self,
        node: NodeHandle,
        xact: XactId,
        header: &PfcpHeader,
        message: &PfcpMessage,
    ) {
        self.reject_session_request(node, xact, header, message, PfcpCause::NoEstablishedPfcpAssociation);
    }

    /// Answer a session request with `cause` and leave the sessions alone.
    fn reject_session_request(
        &mut self,
        node: NodeHandle,
        xact: XactId,
        header: &PfcpHeader,
        message: &PfcpMessage,
        cause: PfcpCause,
    ) {
        let peer_seid = |ctx: &Self| {
            header
                .seid
                .and_then(|seid| ctx.sess_find_by_local_seid(seid))
                .and_then(|sess| ctx.sessions.find(sess))
                .and_then(|sess| sess.remote_seid)
                .unwrap_or(0)
        };

        let (rsp, seid) = match message {
            PfcpMessage::SessionEstablishmentRequest(req) => match self.conf.node_id() {
                Ok(node_id) => (
                    PfcpMessage::SessionEstablishmentResponse(SessionEstablishmentResponse::new(node_id, cause)),
                    req.cp_f_seid.seid,
                ),
                Err(e) => {
                    log::error!("cannot reject establishment: {}", e);
                    return;
                }
            },
            PfcpMessage::SessionModificationRequest(_) => (
                PfcpMessage::SessionModificationResponse(SessionModificationResponse::new(cause)),
                peer_seid(self),
            ),
            PfcpMessage::SessionDeletionRequest(_) => (
                PfcpMessage::SessionDeletionResponse(SessionDeletionResponse::new(cause)),
                peer_seid(self),
            ),
            PfcpMessage::SessionReportRequest(_) => (
                PfcpMessage::SessionReportResponse(SessionReportResponse::new(cause)),
                peer_seid(self),
            ),
            _ => {
                if let Some(n) = self.nodes.find(node) {
                    log::warn!("[{}] {} unexpected in {}", n.addr, message.message_type(), n.state);
                }
                return;
            }
        };

        log::warn!("{} rejected [{}]", message.message_type(), cause.name());
        self.respond_or_log(xact, rsp, Some(seid));
    }

    /// Session message on an associated node.
    ///
    /// Each role only serves the procedures it answers; requests meant for
    /// the other role are rejected.
    pub(crate) fn handle_session_message(
        &mut self,
        node: NodeHandle,
        xact: XactId,
        header: &PfcpHeader,
        message: &PfcpMessage,
    ) {
        let cp = self.is_cp();
        match message {
            PfcpMessage::SessionEstablishmentRequest(req) if !cp => {
                self.up_handle_session_establishment_request(node, xact, req)
            }
            PfcpMessage::SessionModificationRequest(req) if !cp => {
                self.up_handle_session_modification_request(node, xact, header, req)
            }
            PfcpMessage::SessionDeletionRequest(_) if !cp => {
                self.up_handle_session_deletion_request(node, xact, header)
            }
            PfcpMessage::SessionReportResponse(rsp) if !cp => {
                self.up_handle_session_report_response(xact, rsp)
            }
            PfcpMessage::SessionEstablishmentResponse(rsp) if cp => {
                self.cp_handle_session_establishment_response(xact, header, rsp)
            }
            PfcpMessage::SessionModificationResponse(rsp) if cp => {
                self.cp_handle_session_modification_response(xact, header, rsp)
            }
            PfcpMessage::SessionDeletionResponse(rsp) if cp => {
                self.cp_handle_session_deletion_response(xact, header, rsp)
            }
            PfcpMessage::SessionReportRequest(req) if cp => {
                self.cp_handle_session_report_request(node, xact, header, req)
            }
            PfcpMessage::SessionEstablishmentRequest(_)
            | PfcpMessage::SessionModificationRequest(_)
            | PfcpMessage::SessionDeletionRequest(_)
            | PfcpMessage::SessionReportRequest(_) => {
                log::warn!("{} not served by the {:?} function", message.message_type(), self.conf.role);
                self.reject_session_request(node, xact, header, message, PfcpCause::ServiceNotSupported);
            }
            _ => log::warn!("{} not handled here", message.message_type()),
        }
    }

    /// Session of a local transaction, else the one named by the header SEID.
    fn response_sess(&self, xact: XactId, header: &PfcpHeader) -> Option<SessHandle> {
        self.xact(xact)
            .and_then(|x| x.sess)
            .filter(|sess| self.sessions.contains(*sess))
            .or_else(|| header.seid.and_then(|seid| self.sess_find_by_local_seid(seid)))
    }

    /// Session named by the header SEID of a request, if bound to `node`.
    fn request_sess(&self, node: NodeHandle, header: &PfcpHeader) -> Option<SessHandle> {
        let sess = header.seid.and_then(|seid| self.sess_find_by_local_seid(seid))?;
        (self.sessions.find(sess)?.node == node).then_some(sess)
    }

    pub(crate) fn cp_handle_session_establishment_response(
        &mut self,
        xact: XactId,
        header: &PfcpHeader,
        rsp: &SessionEstablishmentResponse,
    ) {
        let Some(handle) = self.response_sess(xact, header) else {
            log::warn!("No Context in {}", PfcpMessageType::SessionEstablishmentResponse);
            return;
        };
        let Some(sess) = self.sessions.find_mut(handle) else {
            return;
        };

        let cause = if rsp.cause != PfcpCause::RequestAccepted {
            rsp.cause
        } else if let Some(f_seid) = &rsp.up_f_seid {
            sess.remote_seid = Some(f_seid.seid);
            let resolved = rsp
                .created_pdrs
                .iter()
                .try_for_each(|created| sess.handle_created_pdr(created));
            match resolved {
                Err(cause) => cause,
                Ok(()) if sess.pending_choose().next().is_some() => {
                    log::error!("SEID[0x{:x}] CHOOSE left unanswered", sess.local_seid);
                    PfcpCause::MandatoryIeMissing
                }
                Ok(()) => PfcpCause::RequestAccepted,
            }
        } else {
            log::error!("No UP F-SEID");
            PfcpCause::MandatoryIeMissing
        };

        let local_seid = sess.local_seid;
        if cause == PfcpCause::RequestAccepted {
            log::debug!("SEID[0x{:x}] established, UP SEID[0x{:x}]",
                local_seid, sess.remote_seid.unwrap_or(0));
        } else {
            log::warn!("SEID[0x{:x}] establishment failed [{}] (GTP cause {})",
                local_seid, cause.name(), gtp_cause_from_pfcp(cause as u8));
        }
        self.push_event(PfcpEvent::SessionEstablished { sess: handle, local_seid, cause });
    }

    pub(crate) fn cp_handle_session_modification_response(
        &mut self,
        xact: XactId,
        header: &PfcpHeader,
        rsp: &SessionModificationResponse,
    ) {
        let Some(handle) = self.response_sess(xact, header) else {
            log::warn!("No Context in {}", PfcpMessageType::SessionModificationResponse);
            return;
        };
        let Some(sess) = self.sessions.find_mut(handle) else {
            return;
        };

        let mut cause = rsp.cause;
        if cause == PfcpCause::RequestAccepted {
            if let Err(c) = rsp
                .created_pdrs
                .iter()
                .try_for_each(|created| sess.handle_created_pdr(created))
            {
                cause = c;
            }
        } else {
            log::warn!("SEID[0x{:x}] modification failed [{}]", sess.local_seid, cause.name());
        }

        let local_seid = sess.local_seid;
        self.push_event(PfcpEvent::SessionModified { sess: handle, local_seid, cause });
    }

    /// The session is destroyed whatever the cause.
    pub(crate) fn cp_handle_session_deletion_response(
        &mut self,
        xact: XactId,
        header: &PfcpHeader,
        rsp: &SessionDeletionResponse,
    ) {
        let Some(handle) = self.response_sess(xact, header) else {
            log::warn!("No Context in {}", PfcpMessageType::SessionDeletionResponse);
            return;
        };
        if rsp.cause != PfcpCause::RequestAccepted {
            log::warn!("session deletion answered [{}]", rsp.cause.name());
        }

        self.xact_detach_sess(xact);
        if let Some(sess) = self.sess_remove(handle) {
            self.push_event(PfcpEvent::SessionDeleted {
                local_seid: sess.local_seid,
                cause: rsp.cause,
                usage_reports: rsp.usage_reports.clone(),
            });
        }
    }

    pub(crate) fn cp_handle_session_report_request(
        &mut self,
        node: NodeHandle,
        xact: XactId,
        header: &PfcpHeader,
        req: &SessionReportRequest,
    ) {
        let Some(handle) = self.request_sess(node, header) else {
            log::warn!("No Context in {}", PfcpMessageType::SessionReportRequest);
            let rsp = build_session_report_response(PfcpCause::SessionContextNotFound);
            self.respond_or_log(xact, PfcpMessage::SessionReportResponse(rsp), Some(0));
            return;
        };
        let Some(sess) = self.sessions.find(handle) else {
            return;
        };
        let (local_seid, remote_seid) = (sess.local_seid, sess.remote_seid.unwrap_or(0));

        let rsp = build_session_report_response(PfcpCause::RequestAccepted);
        self.respond_or_log(xact, PfcpMessage::SessionReportResponse(rsp), Some(remote_seid));

        self.push_event(PfcpEvent::SessionReport { sess: handle, local_seid, report: req.clone() });
    }

    pub(crate) fn up_handle_session_establishment_request(
        &mut self,
        node: NodeHandle,
        xact: XactId,
        req: &SessionEstablishmentRequest,
    ) {
        let cp_seid = req.cp_f_seid.seid;
        if let Some(old) = self.sess_find_by_remote_seid(node, cp_seid) {
            log::warn!("CP SEID[0x{:x}] re-established, old session dropped", cp_seid);
            self.sess_remove(old);
        }

        let handle = match self.sess_add(node) {
            Ok(handle) => handle,
            Err(e) => {
                log::error!("cannot create session: {}", e);
                if let Ok(node_id) = self.conf.node_id() {
                    let rsp = SessionEstablishmentResponse::new(node_id, PfcpCause::NoResourcesAvailable);
                    self.respond_or_log(xact, PfcpMessage::SessionEstablishmentResponse(rsp), Some(cp_seid));
                }
                return;
            }
        };

        let ftup = self.conf.up_function_features.ftup();
        let mut cause = match self.sessions.find_mut(handle) {
            Some(sess) => {
                sess.remote_seid = Some(cp_seid);
                sess.pdn_type = req.pdn_type;
                match apply_rule_changes(sess, &RuleChanges::establishment(req)) {
                    Ok(_) if !ftup && sess.pending_choose().next().is_some() => {
                        log::error!("CHOOSE requested but F-TEID allocation is not supported");
                        PfcpCause::InvalidFTeidAllocationOption
                    }
                    Ok(_) => PfcpCause::RequestAccepted,
                    Err(cause) => cause,
                }
            }
            None => PfcpCause::SystemFailure,
        };
        if cause == PfcpCause::RequestAccepted {
            if let Err(e) = self.choose_local_f_teids(handle) {
                log::error!("F-TEID allocation failed: {}", e);
                cause = PfcpCause::NoResourcesAvailable;
            }
        }

        let rsp = match self.sessions.find(handle) {
            Some(sess) => build_session_establishment_response(&self.conf, sess, cause),
            None => return,
        };
        match rsp {
            Ok(rsp) => self.respond_or_log(xact, PfcpMessage::SessionEstablishmentResponse(rsp), Some(cp_seid)),
            Err(e) => log::error!("cannot answer establishment: {}", e),
        }

        match self.sessions.find(handle) {
            Some(sess) if cause == PfcpCause::RequestAccepted => {
                let local_seid = sess.local_seid;
                log::debug!("UP SEID[0x{:x}] CP SEID[0x{:x}] established", local_seid, cp_seid);
                self.push_event(PfcpEvent::SessionEstablished { sess: handle, local_seid, cause });
            }
            _ => {
                log::warn!("CP SEID[0x{:x}] establishment rejected [{}]", cp_seid, cause.name());
                self.sess_remove(handle);
            }
        }
    }

    pub(crate) fn up_handle_session_modification_request(
        &mut self,
        node: NodeHandle,
        xact: XactId,
        header: &PfcpHeader,
        req: &SessionModificationRequest,
    ) {
        let Some(handle) = self.request_sess(node, header) else {
            log::warn!("No Context in {}", PfcpMessageType::SessionModificationRequest);
            let rsp = build_session_modification_response(Vec::new(), PfcpCause::SessionContextNotFound);
            self.respond_or_log(xact, PfcpMessage::SessionModificationResponse(rsp), Some(0));
            return;
        };

        let ftup = self.conf.up_function_features.ftup();
        let (mut cause, created) = match self.sessions.find_mut(handle) {
            Some(sess) => {
                if let Some(f_seid) = &req.cp_f_seid {
                    sess.remote_seid = Some(f_seid.seid);
                }
                match apply_rule_changes(sess, &RuleChanges::modification(req)) {
                    Ok(_) if !ftup && sess.pending_choose().next().is_some() => {
                        (PfcpCause::InvalidFTeidAllocationOption, Vec::new())
                    }
                    Ok(created) => (PfcpCause::RequestAccepted, created),
                    Err(cause) => (cause, Vec::new()),
                }
            }
            None => return,
        };
        if cause == PfcpCause::RequestAccepted {
            if let Err(e) = self.choose_local_f_teids(handle) {
                log::error!("F-TEID allocation failed: {}", e);
                cause = PfcpCause::NoResourcesAvailable;
            }
        }

        let Some(sess) = self.sessions.find(handle) else {
            return;
        };
        let created_pdrs = if cause == PfcpCause::RequestAccepted {
            created
                .iter()
                .filter_map(|id| sess.find_pdr(*id))
                .filter_map(|pdr| build_created_pdr(pdr, self.conf.up_function_features))
                .collect()
        } else {
            Vec::new()
        };
        let (local_seid, remote_seid) = (sess.local_seid, sess.remote_seid.unwrap_or(0));

        let rsp = build_session_modification_response(created_pdrs, cause);
        self.respond_or_log(xact, PfcpMessage::SessionModificationResponse(rsp), Some(remote_seid));
        self.push_event(PfcpEvent::SessionModified { sess: handle, local_seid, cause });
    }

    pub(crate) fn up_handle_session_deletion_request(
        &mut self,
        node: NodeHandle,
        xact: XactId,
        header: &PfcpHeader,
    ) {
        let Some(handle) = self.request_sess(node, header) else {
            log::warn!("No Context in {}", PfcpMessageType::SessionDeletionRequest);
            let rsp = build_session_deletion_response(Vec::new(), PfcpCause::SessionContextNotFound);
            self.respond_or_log(xact, PfcpMessage::SessionDeletionResponse(rsp), Some(0));
            return;
        };

        let now = self.now;
        let Some(sess) = self.sessions.find_mut(handle) else {
            return;
        };
        let usage_reports = termination_reports(sess, now);
        let remote_seid = sess.remote_seid.unwrap_or(0);

        let rsp = build_session_deletion_response(usage_reports.clone(), PfcpCause::RequestAccepted);
        self.respond_or_log(xact, PfcpMessage::SessionDeletionResponse(rsp), Some(remote_seid));

        if let Some(sess) = self.sess_remove(handle) {
            self.push_event(PfcpEvent::SessionDeleted {
                local_seid: sess.local_seid,
                cause: PfcpCause::RequestAccepted,
                usage_reports,
            });
        }
    }

    pub(crate) fn up_handle_session_report_response(&mut self, xact: XactId, rsp: &SessionReportResponse) {
        if rsp.cause != PfcpCause::RequestAccepted {
            let seid = self
                .xact(xact)
                .and_then(|x| x.sess)
                .and_then(|sess| self.sessions.find(sess))
                .map(|sess| sess.local_seid)
                .unwrap_or(0);
            log::warn!("SEID[0x{:x}] session report answered [{}]", seid, rsp.cause.name());
        }
    }
}

/// Final usage report of every URR of a session being deleted.
fn termination_reports(sess: &mut PfcpSess, now: std::time::Instant) -> Vec<UsageReport> {
    let duration = now.saturating_duration_since(sess.started).as_secs() as u32;
    let end_time = ntp_time_now();
    let start_time = end_time.wrapping_sub(duration);

    sess.urrs
        .iter_mut()
        .map(|urr| UsageReport {
            urr_id: urr.id,
            ur_seqn: urr.next_ur_seqn(),
            usage_report_trigger: UsageReportTrigger(UsageReportTrigger::TERMINATION_REPORT),
            start_time: Some(start_time),
            end_time: Some(end_time),
            duration_measurement: Some(duration),
            ..Default::default()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grouped::{ForwardingParameters, Pdi};
    use crate::types::{ApplyAction, PfcpInterface};

    fn create_far(id: u32) -> CreateFar {
        CreateFar {
            far_id: id,
            apply_action: ApplyAction(ApplyAction::FORW),
            forwarding_parameters: Some(ForwardingParameters {
                destination_interface: PfcpInterface::Core,
                ..Default::default()
            }),
            bar_id: None,
        }
    }

    fn create_pdr(id: u16, far_id: u32) -> CreatePdr {
        CreatePdr {
            pdr_id: id,
            precedence: Some(255),
            pdi: Pdi { source_interface: PfcpInterface::Access, ..Default::default() },
            far_id: Some(far_id),
            ..Default::default()
        }
    }

    fn sess() -> PfcpSess {
        let node = ogs_core::OgsPool::<()>::new("t", 1).alloc(()).unwrap();
        PfcpSess::new(1, node)
    }

    #[test]
    fn test_apply_creates_in_dependency_order() {
        let mut sess = sess();
        let pdrs = [create_pdr(1, 1)];
        let fars = [create_far(1)];
        let changes = RuleChanges { create_pdrs: &pdrs, create_fars: &fars, ..Default::default() };

        assert_eq!(apply_rule_changes(&mut sess, &changes), Ok(vec![1]));
        assert_eq!(sess.pdrs.len(), 1);
        assert_eq!(sess.find_far(1).unwrap().dst_if, PfcpInterface::Core);
    }

    #[test]
    fn test_apply_rejects_dangling_far() {
        let mut sess = sess();
        let pdrs = [create_pdr(1, 9)];
        let changes = RuleChanges { create_pdrs: &pdrs, ..Default::default() };
        assert_eq!(apply_rule_changes(&mut sess, &changes), Err(PfcpCause::MandatoryIeIncorrect));
    }

    #[test]
    fn test_apply_rejects_duplicate_and_unknown() {
        let mut sess = sess();
        let fars = [create_far(1)];
        let changes = RuleChanges { create_fars: &fars, ..Default::default() };
        apply_rule_changes(&mut sess, &changes).unwrap();
        assert_eq!(
            apply_rule_changes(&mut sess, &changes),
            Err(PfcpCause::RuleCreationModificationFailure)
        );

        let unknown = [7u16];
        let changes = RuleChanges { remove_pdrs: &unknown, ..Default::default() };
        assert_eq!(
            apply_rule_changes(&mut sess, &changes),
            Err(PfcpCause::RuleCreationModificationFailure)
        );
    }

    #[test]
    fn test_apply_remove_then_update() {
        let mut sess = sess();
        let pdrs = [create_pdr(1, 1), create_pdr(2, 1)];
        let fars = [create_far(1)];
        apply_rule_changes(
            &mut sess,
            &RuleChanges { create_pdrs: &pdrs, create_fars: &fars, ..Default::default() },
        )
        .unwrap();

        let remove = [2u16];
        let update = [UpdateFar {
            far_id: 1,
            apply_action: Some(ApplyAction(ApplyAction::BUFF | ApplyAction::NOCP)),
            ..Default::default()
        }];
        let changes = RuleChanges { remove_pdrs: &remove, update_fars: &update, ..Default::default() };
        assert_eq!(apply_rule_changes(&mut sess, &changes), Ok(vec![]));
        assert!(sess.find_pdr(2).is_none());
        assert!(sess.find_far(1).unwrap().is_buffering());
    }

    #[test]
    fn test_termination_reports() {
        let mut sess = sess();
        sess.add_urr().unwrap();
        let now = sess.started + std::time::Duration::from_secs(30);

        let reports = termination_reports(&mut sess, now);
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].duration_measurement, Some(30));
        assert!(reports[0]
            .usage_report_trigger
            .contains(UsageReportTrigger::TERMINATION_REPORT));
        assert_eq!(termination_reports(&mut sess, now)[0].ur_seqn, reports[0].ur_seqn + 1);
    }
}
