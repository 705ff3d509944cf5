//! The error taxonomies of the core. Connection, command, log source and
//! parse failures are deliberately separate enums so a caller can always tell
//! which layer gave up.

use std::io;

use thiserror::Error;

/// Failures of the TCP transport and the authentication handshake.
#[derive(Debug, Error)]
pub enum ConnectionError {
    /// The server actively refused the connection.
    #[error("connection refused by {addr}: {source}")]
    Refused {
        addr: String,
        #[source]
        source: io::Error,
    },
    /// The connect attempt did not finish within the configured timeout.
    #[error("connect to {addr} timed out")]
    ConnectTimeout { addr: String },
    /// The server rejected the configured password. Terminal: retrying with
    /// the same credentials cannot succeed.
    #[error("rcon authentication failed")]
    AuthFailed,
    /// No AUTH_RESPONSE arrived within the command timeout.
    #[error("rcon authentication timed out")]
    AuthTimeout,
    /// The socket failed while connected.
    #[error("socket error: {0}")]
    Socket(#[source] io::Error),
    /// An operation that requires a live connection found none.
    #[error("not connected")]
    NotConnected,
}

impl ConnectionError {
    /// Whether the reconnect machinery may try again. Authentication failures
    /// are terminal for the configured credentials.
    pub fn is_recoverable(&self) -> bool {
        !matches!(
            self,
            ConnectionError::AuthFailed | ConnectionError::AuthTimeout
        )
    }
}

/// Failures of an individual RCON command.
#[derive(Debug, Error)]
pub enum CommandError {
    /// No END frame arrived within the per-command deadline. Recoverable, the
    /// execute wrapper retries these up to the configured count.
    #[error("command timed out")]
    Timeout,
    /// The connection left the Connected state while the command was pending.
    #[error("command aborted: {0}")]
    Aborted(String),
    /// The command could not be written to the transport.
    #[error("command failed: {0}")]
    Failed(String),
    /// The command text does not fit a frame.
    #[error(transparent)]
    Encode(#[from] rcon_protocol::EncodeError),
    /// A typed query command got a response the parser does not recognize.
    /// Distinct from the transport errors above so callers can separate the
    /// RCON layer from the semantic layer.
    #[error(transparent)]
    UnexpectedFormat(#[from] ParseError),
    /// The engine is not connected at all.
    #[error(transparent)]
    Connection(#[from] ConnectionError),
}

/// A typed response parser met text it does not understand.
#[derive(Debug, Error)]
#[error("unexpected {command} response: expected {expected}, got `{actual}`")]
pub struct ParseError {
    pub command: &'static str,
    pub expected: &'static str,
    pub actual: String,
}

impl ParseError {
    pub fn new(command: &'static str, expected: &'static str, actual: impl Into<String>) -> Self {
        Self {
            command,
            expected,
            actual: actual.into(),
        }
    }
}

/// Failures surfaced when a log source starts watching. Transient errors of a
/// running source are swallowed and retried on the next tick instead.
#[derive(Debug, Error)]
pub enum LogSourceError {
    #[error("log file not found: {0}")]
    FileNotFound(String),
    #[error("permission denied on {0}")]
    PermissionDenied(String),
    #[error("connection to log host failed: {0}")]
    ConnectionFailed(String),
    #[error("log host rejected the credentials")]
    AuthFailed,
    #[error("read error: {0}")]
    Read(String),
}

/// Why the server controller could not reach its running state.
#[derive(Debug, Error)]
pub enum StartError {
    #[error("rcon connect failed: {0}")]
    Rcon(#[from] ConnectionError),
    #[error("log source failed: {0}")]
    LogSource(#[from] LogSourceError),
}

/// Failures of the event bus surface.
#[derive(Debug, Error)]
pub enum BusError {
    /// The per-kind subscriber cap was hit; almost always a subscription leak.
    #[error("subscriber limit of {limit} reached for {kind}")]
    TooManySubscribers { kind: &'static str, limit: usize },
    /// `wait_for` ran out of time.
    #[error("timed out waiting for {kind}")]
    WaitTimeout { kind: &'static str },
}
