//! Error kinds for the AMI client.
//!
//! Mirrors the split the teacher workspace draws between connection-fatal
//! errors (which tear down the read loop and fail every outstanding awaiter)
//! and per-action errors (which are surfaced to the caller alone).

use crate::packet::Packet;
use std::fmt;

/// Everything that can go wrong talking to an AMI server.
#[derive(Debug, thiserror::Error)]
pub enum AmiError {
    /// The first line of the connection did not match the AMI banner.
    #[error("banner mismatch: expected {expected:?}, got {got:?}")]
    BannerMismatch { expected: String, got: String },

    /// `Login` returned `Response: Error`.
    #[error("authentication failed: {0}")]
    AuthenticationFailure(String),

    /// Action response carried `Message: Permission denied`.
    #[error("permission denied")]
    PermissionDenied,

    /// Any other non-success action response.
    #[error("action failed: {0}")]
    ActionFailed(String),

    /// Unexpected response shape (missing ActionID, bad close handshake, ...).
    #[error("communication error: {context} (packet: {packet:?})")]
    CommunicationError { context: String, packet: Box<Packet> },

    /// EOF observed at a packet boundary.
    #[error("connection gone away")]
    GoneAway,

    /// A header line could not be parsed.
    #[error("malformed packet: {0}")]
    Malformed(String),

    /// Attempted to subscribe a handler already registered for that event.
    #[error("duplicate subscription for event {0:?}")]
    DuplicateSubscription(String),

    /// `Getvar` (or similar) returned `(null)` with no caller-supplied default.
    #[error("key not found: {0}")]
    KeyNotFound(String),

    /// An action did not complete within its deadline.
    #[error("action timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// The deferred-response buffer exceeded its configured capacity.
    #[error("response buffer overflow (capacity {0})")]
    ResponseOverflow(usize),

    /// Underlying I/O failure.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration file missing, malformed, or missing a required field.
    #[error("config error: {0}")]
    Config(#[from] ConfigError),
}

impl AmiError {
    pub fn communication(context: impl Into<String>, packet: Packet) -> Self {
        AmiError::CommunicationError {
            context: context.into(),
            packet: Box::new(packet),
        }
    }
}

/// Errors arising from loading the connection profile from disk.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("no config file found (searched: {searched})")]
    NotFound { searched: String },

    #[error("failed to read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },

    #[error("missing required field `{0}`")]
    MissingField(&'static str),

    #[error("no connection named {0:?} defined in config")]
    UnknownConnection(String),

    #[error("config defines no connections")]
    NoConnections,
}

/// Error kind surfaced by the CLI argument parsing layer.
#[derive(Debug)]
pub struct CliUsageError(pub String);

impl fmt::Display for CliUsageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for CliUsageError {}

pub type Result<T> = std::result::Result<T, AmiError>;
