//! PFCP Error Types
//!
//! Error types for PFCP codec and engine operations.

use std::net::SocketAddr;
use thiserror::Error;

/// PFCP Error type
#[derive(Debug, Error)]
pub enum PfcpError {
    /// Buffer too short for operation
    #[error("Buffer too short: needed {needed} bytes, available {available}")]
    BufferTooShort { needed: usize, available: usize },

    /// Invalid message format
    #[error("Invalid message format: {0}")]
    InvalidFormat(String),

    /// Invalid message type
    #[error("Invalid message type: {0}")]
    InvalidMessageType(u8),

    /// Invalid cause value
    #[error("Invalid cause value: {0}")]
    InvalidCause(u8),

    /// Invalid node ID type
    #[error("Invalid node ID type: {0}")]
    InvalidNodeIdType(u8),

    /// Invalid interface type
    #[error("Invalid interface type: {0}")]
    InvalidInterfaceType(u8),

    /// Missing mandatory IE
    #[error("Missing mandatory IE: {0}")]
    MissingMandatoryIe(&'static str),

    /// Version not supported
    #[error("PFCP version not supported: {0}")]
    VersionNotSupported(u8),

    /// No PFCP node for the address
    #[error("Unknown PFCP node: {0}")]
    NodeNotFound(SocketAddr),

    /// Stale or unknown node handle
    #[error("PFCP node handle is stale")]
    StaleNode,

    /// No session for the SEID
    #[error("Unknown PFCP session: SEID 0x{0:x}")]
    SessionNotFound(u64),

    /// Stale or unknown session handle
    #[error("PFCP session handle is stale")]
    StaleSession,

    /// The peer SEID has not been learned yet
    #[error("PFCP session SEID 0x{0:x} has no remote SEID")]
    SessionNotEstablished(u64),

    /// Stale or unknown transaction handle
    #[error("PFCP transaction handle is stale")]
    StaleXact,

    /// The node is not associated
    #[error("No PFCP association with {0}")]
    NoAssociation(SocketAddr),

    /// Pool exhausted
    #[error("{0} pool exhausted")]
    PoolExhausted(&'static str),

    /// Rule lookup failed
    #[error("Unknown {kind} id {id}")]
    RuleNotFound { kind: &'static str, id: u32 },

    /// A modification request would carry no rule
    #[error("Nothing to modify")]
    NothingToModify,

    /// No local address to build a Node ID or F-SEID from
    #[error("No local PFCP address configured")]
    NoLocalAddress,

    /// Socket failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// PFCP Result type
pub type PfcpResult<T> = Result<T, PfcpError>;
