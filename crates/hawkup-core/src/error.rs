//! Agent error type covering transport, protocol and lifecycle failures.

use std::fmt;

/// Server response that violates the single-bundle deployment contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolViolation {
    /// Deployment carries more than one chunk.
    MultiChunks,
    /// Deployment chunk carries more than one artifact.
    MultiArtifacts,
    /// Neither an HTTPS nor an HTTP download link is present.
    MissingDownloadUrl,
}

impl fmt::Display for ProtocolViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProtocolViolation::MultiChunks => {
                write!(f, "deployment unsupported: cannot handle multiple chunks")
            }
            ProtocolViolation::MultiArtifacts => {
                write!(f, "deployment unsupported: cannot handle multiple artifacts")
            }
            ProtocolViolation::MissingDownloadUrl => {
                write!(f, "deployment artifact has no download link")
            }
        }
    }
}

/// Error returned by agent operations.
///
/// Transport and HTTP failures bubble up from the DDI client; the remaining
/// variants are raised by the deployment, download and cancel processors and
/// translated into log warnings plus best-effort server feedback at the
/// boundary of each processor.
#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    /// Curl reported an error (timeout, connection, TLS, partial data).
    #[error("{0}")]
    Transport(#[from] curl::Error),

    /// HTTP response had a non-200 status. Carries the server's response
    /// body when one was received.
    #[error("HTTP request failed: {code}{}", .body.as_deref().map(|b| format!("; server response: {b}")).unwrap_or_default())]
    Http { code: u32, body: Option<String> },

    /// JSON parse failure or missing required field.
    #[error("{0}")]
    Parse(String),

    /// Server violated a core invariant of the deployment descriptor.
    #[error("{0}")]
    Protocol(ProtocolViolation),

    /// Not enough free disk space for the bundle.
    #[error("file size {need} exceeds available space {avail}")]
    InsufficientSpace { need: u64, avail: u64 },

    /// Computed digest disagrees with the declared sha1.
    #[error("invalid checksum: {actual} expected {expected}")]
    Checksum { expected: String, actual: String },

    /// A deployment is already being processed; not reported to the server.
    #[error("deployment {0} is already in progress")]
    AlreadyInProgress(String),

    /// Cancelation arrived after installation started and was rejected.
    #[error("cancelation impossible, installation started already")]
    Cancelation,

    /// HTTP streaming installation reported failure.
    #[error("streaming installation failed")]
    StreamInstall,

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl AgentError {
    /// True if this is an HTTP error with the given status code.
    pub fn is_http(&self, status: u32) -> bool {
        matches!(self, AgentError::Http { code, .. } if *code == status)
    }

    /// True for transport failures a download can be resumed after:
    /// timeouts, DNS/connect failures, partial transfers, send/recv errors
    /// and HTTP/2 framing errors. Everything else ends the download.
    pub fn is_resumable_transport(&self) -> bool {
        match self {
            AgentError::Transport(e) => {
                e.is_operation_timedout()
                    || e.is_couldnt_resolve_host()
                    || e.is_couldnt_connect()
                    || e.is_partial_file()
                    || e.is_send_error()
                    || e.is_recv_error()
                    || e.is_http2_error()
                    || e.is_http2_stream_error()
            }
            _ => false,
        }
    }
}

impl From<serde_json::Error> for AgentError {
    fn from(e: serde_json::Error) -> Self {
        AgentError::Parse(e.to_string())
    }
}
