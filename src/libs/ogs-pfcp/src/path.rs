//! PFCP path
//!
//! Glue between the engine and the socket: inbound datagrams are matched
//! against transactions and fed to the node state machine, outbound
//! requests are built from sessions and handed to a [`PfcpTransport`].

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use tokio::net::UdpSocket;

use crate::build::{
    build_association_release_request, build_cp_association_setup_request,
    build_heartbeat_request, build_session_report_request, build_up_association_setup_request,
    UserPlaneReport,
};
use crate::context::PfcpContext;
use crate::error::{PfcpError, PfcpResult};
use crate::header::{build_version_not_supported_response, peek_version_and_sequence};
use crate::message::{parse_message, PfcpMessage};
use crate::n4_build::{
    build_qos_flow_modification_request, build_session_deletion_request,
    build_session_establishment_request, build_session_modification_request,
    build_urr_modification_request, modify_flags, ModifyRequest, RuleActionKind,
};
use crate::node::{NodeHandle, PfcpNodeEvent};
use crate::rule::UrrUpdate;
use crate::session::{QosFlow, SessHandle};
use crate::types::PFCP_VERSION;
use crate::xact::{XactId, XactState};

/// Outbound datagram sink
pub trait PfcpTransport {
    fn send(&mut self, to: SocketAddr, buf: &[u8]) -> std::io::Result<()>;
}

/// Sender over a shared tokio UDP socket.
///
/// The engine is synchronous, so [`PfcpTransport::send`] only queues the
/// datagram; the event loop that owns the socket drains the queue with
/// [`UdpTransport::flush`]. The receive half stays with that loop too.
#[derive(Debug)]
pub struct UdpTransport {
    socket: Arc<UdpSocket>,
    pending: VecDeque<(SocketAddr, Bytes)>,
}

impl UdpTransport {
    pub fn new(socket: Arc<UdpSocket>) -> Self {
        UdpTransport { socket, pending: VecDeque::new() }
    }

    pub async fn bind(addr: SocketAddr) -> std::io::Result<Self> {
        let socket = UdpSocket::bind(addr).await?;
        log::info!("PFCP socket bound to {}", socket.local_addr()?);
        Ok(UdpTransport::new(Arc::new(socket)))
    }

    pub fn socket(&self) -> Arc<UdpSocket> {
        self.socket.clone()
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Datagrams queued and not sent yet
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Send every queued datagram, in order.
    ///
    /// A failed send is logged and the datagram dropped; the transaction
    /// layer retransmits requests.
    pub async fn flush(&mut self) {
        while let Some((to, buf)) = self.pending.pop_front() {
            match self.socket.send_to(&buf, to).await {
                Ok(sent) if sent != buf.len() => {
                    log::warn!("PFCP short send to {} ({}/{})", to, sent, buf.len());
                }
                Ok(_) => {}
                Err(e) => log::error!("PFCP send to {} failed: {}", to, e),
            }
        }
    }
}

impl PfcpTransport for UdpTransport {
    fn send(&mut self, to: SocketAddr, buf: &[u8]) -> std::io::Result<()> {
        self.pending.push_back((to, Bytes::copy_from_slice(buf)));
        Ok(())
    }
}

impl<T: PfcpTransport> PfcpContext<T> {
    /// Send failures are logged only; retransmission covers them.
    pub(crate) fn send_to(&mut self, to: SocketAddr, buf: &[u8]) {
        if let Err(e) = self.transport.send(to, buf) {
            log::error!("PFCP send to {} failed: {}", to, e);
        }
    }

    /// Process one datagram from `from`.
    pub fn receive(&mut self, now: Instant, from: SocketAddr, data: &[u8]) {
        self.now = now;

        let Some((version, seq)) = peek_version_and_sequence(data) else {
            log::error!("PFCP datagram too short ({} bytes) from {}", data.len(), from);
            return;
        };
        if version > PFCP_VERSION {
            log::warn!("PFCP version {} not supported, from {}", version, from);
            let rsp = build_version_not_supported_response(seq);
            self.send_to(from, &rsp);
            return;
        }

        let (header, message) = match parse_message(&mut Bytes::copy_from_slice(data)) {
            Ok(parsed) => parsed,
            Err(e) => {
                log::error!("PFCP decode from {} failed: {}", from, e);
                return;
            }
        };

        let node = match self.node_find(from) {
            Some(node) => node,
            None => match self.node_add(from, false) {
                Ok(node) => {
                    self.node_start(node);
                    node
                }
                Err(e) => {
                    log::error!("PFCP node [{}] rejected: {}", from, e);
                    return;
                }
            },
        };

        log::debug!("[{}] {} from [{}]", header.sequence_number, header.message_type, from);

        if header.message_type.is_request() {
            let Some(xact) = self.xact_receive_request(node, &header) else {
                return;
            };
            self.node_dispatch(node, PfcpNodeEvent::Message { xact, header: &header, message: &message });
            if self.xact_state(xact) == Some(XactState::Created) {
                self.xact_delete(xact);
            }
        } else {
            let Some(xact) = self.xact_receive_response(node, &header) else {
                return;
            };
            self.node_dispatch(node, PfcpNodeEvent::Message { xact, header: &header, message: &message });
        }
    }

    pub fn send_heartbeat_request(&mut self, node: NodeHandle) -> PfcpResult<XactId> {
        let req = build_heartbeat_request(&self.conf);
        self.send_request(node, None, &PfcpMessage::HeartbeatRequest(req), None)
    }

    pub(crate) fn send_association_setup_request(&mut self, node: NodeHandle) -> PfcpResult<XactId> {
        let req = if self.is_cp() {
            build_cp_association_setup_request(&self.conf)?
        } else {
            build_up_association_setup_request(&self.conf)?
        };
        self.send_request(node, None, &PfcpMessage::AssociationSetupRequest(req), None)
    }

    /// Tell an associated peer that the association is being released.
    pub(crate) fn send_association_release_request(&mut self, node: NodeHandle) -> PfcpResult<XactId> {
        let req = build_association_release_request(&self.conf)?;
        self.send_request(node, None, &PfcpMessage::AssociationReleaseRequest(req), None)
    }

    fn sess_node(&self, sess: SessHandle) -> PfcpResult<NodeHandle> {
        let node = self.sessions.find(sess).ok_or(PfcpError::StaleSession)?.node;
        self.node_check_associated(node)?;
        Ok(node)
    }

    fn sess_remote_seid(&self, sess: SessHandle) -> PfcpResult<u64> {
        let s = self.sessions.find(sess).ok_or(PfcpError::StaleSession)?;
        s.remote_seid.ok_or(PfcpError::SessionNotEstablished(s.local_seid))
    }

    /// Establish `sess` on its node.
    ///
    /// CHOOSE requests are resolved locally first when the peer cannot
    /// allocate F-TEIDs.
    pub fn send_session_establishment_request(&mut self, sess: SessHandle) -> PfcpResult<XactId> {
        let node = self.sess_node(sess)?;
        self.assign_local_f_teids(sess)?;

        let s = self.sessions.find(sess).ok_or(PfcpError::StaleSession)?;
        let req = build_session_establishment_request(&self.conf, s)?;
        self.send_request(node, Some(sess), &PfcpMessage::SessionEstablishmentRequest(req), Some(0))
    }

    pub fn send_session_modification_request(
        &mut self,
        sess: SessHandle,
        req: ModifyRequest,
    ) -> PfcpResult<XactId> {
        let node = self.sess_node(sess)?;
        let remote_seid = self.sess_remote_seid(sess)?;
        if req.action == RuleActionKind::Create {
            self.assign_local_f_teids(sess)?;
        }

        let s = self.sessions.find_mut(sess).ok_or(PfcpError::StaleSession)?;
        let msg = build_session_modification_request(s, req);
        self.send_request(node, Some(sess), &PfcpMessage::SessionModificationRequest(msg), Some(remote_seid))
    }

    /// Modify one QoS flow; `flags` as in [`modify_flags`].
    pub fn send_qos_flow_modification_request(
        &mut self,
        sess: SessHandle,
        flow: &QosFlow,
        flags: u64,
    ) -> PfcpResult<XactId> {
        let node = self.sess_node(sess)?;
        let remote_seid = self.sess_remote_seid(sess)?;
        if flags & modify_flags::CREATE != 0 {
            self.assign_local_f_teids(sess)?;
        }

        let s = self.sessions.find_mut(sess).ok_or(PfcpError::StaleSession)?;
        let msg = build_qos_flow_modification_request(s, flow, flags);
        self.send_request(node, Some(sess), &PfcpMessage::SessionModificationRequest(msg), Some(remote_seid))
    }

    /// Update the URRs of `sess` with the fields named by `update`.
    pub fn send_urr_modification_request(
        &mut self,
        sess: SessHandle,
        update: UrrUpdate,
    ) -> PfcpResult<XactId> {
        let node = self.sess_node(sess)?;
        let remote_seid = self.sess_remote_seid(sess)?;

        let s = self.sessions.find(sess).ok_or(PfcpError::StaleSession)?;
        let msg = build_urr_modification_request(s, update).ok_or(PfcpError::NothingToModify)?;
        self.send_request(node, Some(sess), &PfcpMessage::SessionModificationRequest(msg), Some(remote_seid))
    }

    pub fn send_session_deletion_request(&mut self, sess: SessHandle) -> PfcpResult<XactId> {
        let node = self.sess_node(sess)?;
        let remote_seid = self.sess_remote_seid(sess)?;
        let req = build_session_deletion_request();
        self.send_request(node, Some(sess), &PfcpMessage::SessionDeletionRequest(req), Some(remote_seid))
    }

    /// UP side: report on `sess` to the CP function.
    pub fn send_session_report_request(
        &mut self,
        sess: SessHandle,
        report: &UserPlaneReport,
    ) -> PfcpResult<XactId> {
        let node = self.sess_node(sess)?;
        let remote_seid = self.sess_remote_seid(sess)?;
        let req = build_session_report_request(report);
        self.send_request(node, Some(sess), &PfcpMessage::SessionReportRequest(req), Some(remote_seid))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::context::PfcpSelfConf;
    use crate::header::PfcpMessageType;
    use crate::message::{build_message, HeartbeatRequest, SessionModificationRequest};
    use crate::n4_build::DirectionFilter;
    use crate::node::PfcpState;
    use crate::types::{FSeid, NodeId, PfcpCause, PfcpInterface};
    use ogs_app::PfcpRole;
    use std::net::{IpAddr, Ipv4Addr};

    /// Keeps every datagram instead of sending it
    #[derive(Debug, Default)]
    pub(crate) struct RecordingTransport {
        pub sent: Vec<(SocketAddr, Vec<u8>)>,
    }

    impl PfcpTransport for RecordingTransport {
        fn send(&mut self, to: SocketAddr, buf: &[u8]) -> std::io::Result<()> {
            self.sent.push((to, buf.to_vec()));
            Ok(())
        }
    }

    fn addr(last: u8) -> SocketAddr {
        SocketAddr::new(IpAddr::V4(Ipv4Addr::new(127, 0, 0, last)), 8805)
    }

    fn ctx(role: PfcpRole) -> PfcpContext<RecordingTransport> {
        let conf = PfcpSelfConf::new(role, Some(addr(4)), None);
        PfcpContext::new(conf, RecordingTransport::default(), Instant::now())
    }

    #[test]
    fn test_version_not_supported_before_node_lookup() {
        let mut ctx = ctx(PfcpRole::Cp);
        let mut datagram = build_message(
            &PfcpMessage::HeartbeatRequest(HeartbeatRequest::new(1)),
            0x123456,
            None,
        );
        datagram[0] = (2 << 5) | (datagram[0] & 0x1f);

        ctx.receive(Instant::now(), addr(9), &datagram);

        assert_eq!(ctx.node_count(), 0);
        assert_eq!(ctx.xact_count(), 0);
        let (to, reply) = &ctx.transport.sent[0];
        assert_eq!(*to, addr(9));
        assert_eq!(reply.len(), 8);
        assert_eq!(reply[0] >> 5, 1);
        assert_eq!(reply[1], PfcpMessageType::VersionNotSupportedResponse as u8);
        assert_eq!(&reply[2..4], &[0, 4]);
        assert_eq!(&reply[4..7], &[0x12, 0x34, 0x56]);
    }

    #[test]
    fn test_garbage_is_dropped() {
        let mut ctx = ctx(PfcpRole::Cp);
        ctx.receive(Instant::now(), addr(9), &[0x20, 1]);
        ctx.receive(Instant::now(), addr(9), &[0x20, 0xff, 0, 4, 0, 0, 1, 0]);
        assert!(ctx.transport.sent.is_empty());
        assert_eq!(ctx.node_count(), 0);
    }

    #[test]
    fn test_unknown_peer_heartbeat_is_answered() {
        let mut ctx = ctx(PfcpRole::Up);
        let hb = build_message(&PfcpMessage::HeartbeatRequest(HeartbeatRequest::new(5)), 3, None);
        ctx.receive(Instant::now(), addr(9), &hb);

        let node = ctx.node_find(addr(9)).unwrap();
        assert_eq!(ctx.node_state(node), Some(PfcpState::WillAssociate));
        let (_, reply) = &ctx.transport.sent[0];
        assert_eq!(reply[1], PfcpMessageType::HeartbeatResponse as u8);
    }

    #[test]
    fn test_session_request_without_association() {
        let mut ctx = ctx(PfcpRole::Up);
        let req = crate::message::SessionEstablishmentRequest::new(
            NodeId::Ipv4(Ipv4Addr::new(127, 0, 0, 9)),
            FSeid { seid: 0x77, ipv4: Some(Ipv4Addr::new(127, 0, 0, 9)), ipv6: None },
        );
        let datagram = build_message(&PfcpMessage::SessionEstablishmentRequest(req), 8, Some(0));
        ctx.receive(Instant::now(), addr(9), &datagram);

        let (_, reply) = &ctx.transport.sent[0];
        let (header, message) = parse_message(&mut Bytes::from(reply.clone())).unwrap();
        assert_eq!(header.seid, Some(0x77));
        assert!(matches!(message, PfcpMessage::SessionEstablishmentResponse(rsp)
            if rsp.cause == PfcpCause::NoEstablishedPfcpAssociation));
        assert_eq!(ctx.sess_count(), 0);
        // the answered transaction stays for duplicate suppression
        assert_eq!(ctx.xact_count(), 1);
    }

    #[test]
    fn test_cp_rejects_session_establishment() {
        let mut ctx = ctx(PfcpRole::Cp);
        let node = ctx.node_add(addr(9), false).unwrap();
        ctx.nodes.find_mut(node).unwrap().state = PfcpState::Associated;

        let req = crate::message::SessionEstablishmentRequest::new(
            NodeId::Ipv4(Ipv4Addr::new(127, 0, 0, 9)),
            FSeid { seid: 0x78, ipv4: Some(Ipv4Addr::new(127, 0, 0, 9)), ipv6: None },
        );
        let datagram = build_message(&PfcpMessage::SessionEstablishmentRequest(req), 8, Some(0));
        ctx.receive(Instant::now(), addr(9), &datagram);

        let (_, reply) = &ctx.transport.sent[0];
        let (header, message) = parse_message(&mut Bytes::from(reply.clone())).unwrap();
        assert_eq!(header.seid, Some(0x78));
        assert!(matches!(message, PfcpMessage::SessionEstablishmentResponse(rsp)
            if rsp.cause == PfcpCause::ServiceNotSupported));
        assert_eq!(ctx.sess_count(), 0);
        assert!(ctx.drain_events().is_empty());
    }

    #[test]
    fn test_udp_transport_queues_until_flushed() {
        let runtime = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();
        runtime.block_on(async {
            let any: SocketAddr = "127.0.0.1:0".parse().unwrap();
            let mut transport = UdpTransport::bind(any).await.unwrap();
            let peer = UdpSocket::bind("127.0.0.1:0").await.unwrap();
            let to = peer.local_addr().unwrap();

            transport.send(to, &[1, 2, 3]).unwrap();
            transport.send(to, &[4, 5]).unwrap();
            assert_eq!(transport.pending(), 2);

            transport.flush().await;
            assert_eq!(transport.pending(), 0);

            let mut buf = [0u8; 16];
            let (len, _) = peer.recv_from(&mut buf).await.unwrap();
            assert_eq!(&buf[..len], &[1, 2, 3]);
            let (len, _) = peer.recv_from(&mut buf).await.unwrap();
            assert_eq!(&buf[..len], &[4, 5]);
        });
    }

    #[test]
    fn test_send_requires_association_and_remote_seid() {
        let mut ctx = ctx(PfcpRole::Cp);
        let node = ctx.node_add(addr(7), false).unwrap();
        let sess = ctx.sess_add(node).unwrap();
        ctx.sess_mut(sess).unwrap().add_pdr_far(
            PfcpInterface::Core,
            PfcpInterface::Access,
            crate::types::ApplyAction(crate::types::ApplyAction::FORW),
        ).unwrap();

        assert!(matches!(
            ctx.send_session_establishment_request(sess),
            Err(PfcpError::NoAssociation(_))
        ));

        ctx.nodes.find_mut(node).unwrap().state = PfcpState::Associated;
        let req = ModifyRequest::new(RuleActionKind::Deactivate, DirectionFilter::All);
        assert!(matches!(
            ctx.send_session_modification_request(sess, req),
            Err(PfcpError::SessionNotEstablished(_))
        ));

        ctx.sess_mut(sess).unwrap().remote_seid = Some(0x55);
        ctx.sess_mut(sess).unwrap().create_bar();
        let xact = ctx.send_session_modification_request(sess, req).unwrap();
        assert_eq!(ctx.sess(sess).unwrap().xacts(), &[xact]);

        let (_, data) = ctx.transport.sent.last().unwrap();
        let (header, message) = parse_message(&mut Bytes::from(data.clone())).unwrap();
        assert_eq!(header.seid, Some(0x55));
        let PfcpMessage::SessionModificationRequest(SessionModificationRequest { update_fars, .. }) = message else {
            panic!("unexpected message");
        };
        assert_eq!(update_fars.len(), 1);
    }
}
