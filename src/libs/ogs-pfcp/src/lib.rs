//! NextGCore PFCP Protocol Library
//!
//! PFCP (3GPP TS 29.244) between a control plane function (SMF, SGW-C) and
//! a user plane function (UPF, SGW-U): the message codec, the rule model
//! (PDR, FAR, QER, URR, BAR), sessions, the message builders, the
//! transaction manager and the per-peer association state machine.
//!
//! The engine is a single [`PfcpContext`] driven by one event loop. It never
//! blocks and never reads a clock by itself: datagrams go in through
//! [`PfcpContext::receive`], time through [`PfcpContext::tick`], and results
//! come out as [`PfcpEvent`]s.
//!
//! # Example
//!
//! ```rust
//! use std::net::SocketAddr;
//! use std::time::Instant;
//! use ogs_app::PfcpRole;
//! use ogs_pfcp::prelude::*;
//!
//! #[derive(Default)]
//! struct Outbox(Vec<(SocketAddr, Vec<u8>)>);
//!
//! impl PfcpTransport for Outbox {
//!     fn send(&mut self, to: SocketAddr, buf: &[u8]) -> std::io::Result<()> {
//!         self.0.push((to, buf.to_vec()));
//!         Ok(())
//!     }
//! }
//!
//! let local: SocketAddr = "127.0.0.4:8805".parse().unwrap();
//! let peer: SocketAddr = "127.0.0.7:8805".parse().unwrap();
//!
//! let conf = PfcpSelfConf::new(PfcpRole::Cp, Some(local), None);
//! let mut ctx = PfcpContext::new(conf, Outbox::default(), Instant::now());
//!
//! let node = ctx.node_add(peer, true).unwrap();
//! ctx.node_start(node);
//! assert_eq!(ctx.node_state(node), Some(PfcpState::WillAssociate));
//! assert_eq!(ctx.transport().0.len(), 1);
//! ```

pub mod error;
pub mod header;
pub mod ie;
pub mod types;
pub mod grouped;
pub mod message;

pub mod rule;
pub mod session;
pub mod build;
pub mod n4_build;

pub mod context;
pub mod event;
pub mod xact;
pub mod node;
mod handler;
pub mod path;


pub use context::{ntp_time_now, PfcpContext, PfcpSelfConf};
pub use error::{PfcpError, PfcpResult};
pub use event::PfcpEvent;
pub use header::{PfcpHeader, PfcpMessageType, PFCP_HEADER_LEN, PFCP_HEADER_LEN_WITH_SEID};
pub use node::{NodeHandle, PfcpFsmResult, PfcpNode, PfcpState};
pub use path::{PfcpTransport, UdpTransport};
pub use session::{PfcpSess, QosFlow, SessHandle};
pub use types::{PFCP_UDP_PORT, PFCP_VERSION};
pub use xact::{PfcpXact, XactId, XactOrigin, XactState};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::build::{DownlinkDataReportInfo, UserPlaneReport};
    pub use crate::context::{PfcpContext, PfcpSelfConf};
    pub use crate::error::{PfcpError, PfcpResult};
    pub use crate::event::PfcpEvent;
    pub use crate::header::{PfcpHeader, PfcpMessageType};
    pub use crate::message::{build_message, parse_message, PfcpMessage};
    pub use crate::n4_build::{modify_flags, DirectionFilter, ModifyRequest, RuleActionKind};
    pub use crate::node::{NodeHandle, PfcpState};
    pub use crate::path::{PfcpTransport, UdpTransport};
    pub use crate::rule::{Bar, Direction, Far, LocalFTeid, Pdr, Qer, Urr, UrrUpdate};
    pub use crate::session::{PfcpSess, QosFlow, SessHandle};
    pub use crate::types::{
        ApplyAction, Bitrate, FSeid, FTeid, NodeId, OuterHeaderCreation, PfcpCause,
        PfcpInterface, ReportType, UeIpAddress, UpFunctionFeatures,
    };
    pub use crate::xact::{XactId, XactState};
}
