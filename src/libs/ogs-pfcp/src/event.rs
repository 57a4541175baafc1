//! Events the PFCP engine hands to the upper layer

use std::net::SocketAddr;

use crate::grouped::UsageReport;
use crate::header::PfcpMessageType;
use crate::message::SessionReportRequest;
use crate::node::NodeHandle;
use crate::session::SessHandle;
use crate::types::{gtp_cause_from_pfcp, PfcpCause};
use crate::xact::XactId;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PfcpEvent {
    /// Association set up, sessions may be created
    NodeAssociated { node: NodeHandle, addr: SocketAddr },
    /// Association lost; outstanding transactions have failed
    NodeException { node: NodeHandle, addr: SocketAddr },
    /// The peer restarted and lost its sessions
    NodeRestoration { node: NodeHandle, addr: SocketAddr },

    SessionEstablished { sess: SessHandle, local_seid: u64, cause: PfcpCause },
    SessionModified { sess: SessHandle, local_seid: u64, cause: PfcpCause },
    /// The session is gone once this is seen
    SessionDeleted { local_seid: u64, cause: PfcpCause, usage_reports: Vec<UsageReport> },
    SessionReport { sess: SessHandle, local_seid: u64, report: SessionReportRequest },

    /// A local request got no response after all retransmissions
    XactTimeout {
        xact: XactId,
        node: NodeHandle,
        sess: Option<SessHandle>,
        message_type: PfcpMessageType,
    },
}

impl PfcpEvent {
    pub fn name(&self) -> &'static str {
        match self {
            PfcpEvent::NodeAssociated { .. } => "PFCP_EVT_NODE_ASSOCIATED",
            PfcpEvent::NodeException { .. } => "PFCP_EVT_NODE_EXCEPTION",
            PfcpEvent::NodeRestoration { .. } => "PFCP_EVT_NODE_RESTORATION",
            PfcpEvent::SessionEstablished { .. } => "PFCP_EVT_SESSION_ESTABLISHED",
            PfcpEvent::SessionModified { .. } => "PFCP_EVT_SESSION_MODIFIED",
            PfcpEvent::SessionDeleted { .. } => "PFCP_EVT_SESSION_DELETED",
            PfcpEvent::SessionReport { .. } => "PFCP_EVT_SESSION_REPORT",
            PfcpEvent::XactTimeout { .. } => "PFCP_EVT_XACT_TIMEOUT",
        }
    }

    /// GTPv2 cause for a session result, as reported towards the UE side.
    pub fn gtp_cause(&self) -> Option<u8> {
        match self {
            PfcpEvent::SessionEstablished { cause, .. }
            | PfcpEvent::SessionModified { cause, .. }
            | PfcpEvent::SessionDeleted { cause, .. } => Some(gtp_cause_from_pfcp(*cause as u8)),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::gtp_cause;

    #[test]
    fn test_gtp_cause_of_session_result() {
        let ev = PfcpEvent::SessionDeleted {
            local_seid: 1,
            cause: PfcpCause::SessionContextNotFound,
            usage_reports: Vec::new(),
        };
        assert_eq!(ev.name(), "PFCP_EVT_SESSION_DELETED");
        assert_eq!(ev.gtp_cause(), Some(gtp_cause::CONTEXT_NOT_FOUND));
    }
}
