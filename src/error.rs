//! Error types
//!
//! One crate-wide error enum covers both the relay nodes and the load
//! balancer. Variants follow how the failure is handled: some reject a
//! request, some disconnect a peer, some evict a node.

use thiserror::Error;

/// Result type alias for relay and load balancer operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised by relay nodes and the load balancer
#[derive(Debug, Error)]
pub enum Error {
    /// Missing or wrong shared key
    #[error("authentication failed")]
    Auth,

    /// Missing or malformed header, path parameter or field
    #[error("validation error: {0}")]
    Validation(String),

    /// A peer broke the relay wire protocol
    #[error("protocol violation: {0}")]
    Protocol(#[from] ProtocolError),

    /// Payload addressed to an unknown room or target
    #[error("no route for payload")]
    RouteNotFound,

    /// No room with this id on this node
    #[error("room not found: {0}")]
    RoomNotFound(String),

    /// No free room id was found
    #[error("no unique room id after {attempts} attempts")]
    IdExhaustion { attempts: usize },

    /// A relay node did not answer a stats or room list request
    #[error("node {node} unreachable: {reason}")]
    NodeUnreachable { node: String, reason: String },

    /// Admission probe of a candidate node failed
    #[error("probe of {node} failed: {reason}")]
    ProbeFailed { node: String, reason: String },

    /// The node registry is empty
    #[error("no relay nodes available")]
    NoNodesAvailable,

    /// The selected node has no usable address
    #[error("selected node has no resolvable address")]
    NoAddressResolvable,

    /// HTTP client failure outside of node probing
    #[error("http error: {0}")]
    Http(String),

    /// Configuration could not be loaded
    #[error("config error: {0}")]
    Config(String),

    /// JSON (de)serialization failure
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Relay wire protocol violations
///
/// Any of these disconnects the offending connection.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Frame had no opcode byte
    #[error("empty frame")]
    EmptyFrame,

    /// Opcode byte is not a known client opcode
    #[error("unknown opcode {0:#04x}")]
    UnknownOpCode(u8),

    /// A field ran past the end of the frame
    #[error("truncated frame: needed {needed} bytes, {remaining} left")]
    Truncated { needed: usize, remaining: usize },

    /// A length prefix was negative
    #[error("negative length prefix {0}")]
    NegativeLength(i32),

    /// A string field was not UTF-8
    #[error("invalid utf-8 in string field")]
    InvalidString,

    /// Payload larger than the configured maximum
    #[error("payload of {size} bytes exceeds max packet size {max}")]
    Oversized { size: usize, max: usize },

    /// Message sent before authenticating
    #[error("message before authentication")]
    NotAuthenticated,

    /// Wrong shared key in the authentication response
    #[error("bad authentication key")]
    BadKey,

    /// Transport frame length over the allowed limit
    #[error("transport frame of {0} bytes too large")]
    FrameTooLarge(usize),
}
