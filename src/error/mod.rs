//! Error types for authflow.

use std::fmt;

use thiserror::Error;

/// Convenience alias used across the crate.
pub type Result<T> = std::result::Result<T, FlowError>;

/// Primary error type for all authorization-flow operations.
#[derive(Error, Debug)]
pub enum FlowError {
    /// The server does not implement the Device Authorization Flow.
    ///
    /// [`crate::flow::Flow::detect_flow`] treats this as the signal to fall
    /// back to the web-application flow; it is not fatal at that level.
    #[error("device flow not supported")]
    Unsupported,

    /// A structured protocol error reported by the server.
    #[error("{}", ServerErrorDisplay(.0))]
    Server(ServerError),

    /// A numeric field in an otherwise successful response failed to parse.
    #[error("could not parse {field}={value:?} as integer")]
    MalformedResponse { field: &'static str, value: String },

    /// Internal poll-loop signal; never escapes [`crate::device::wait`].
    #[error("authorization pending")]
    AuthorizationPending,

    /// The authorization window closed before the user completed the flow.
    #[error("authentication timed out")]
    Timeout,

    /// The caller cancelled the flow.
    #[error("authentication cancelled")]
    Cancelled,

    /// The state echoed back by the browser redirect did not match the CSRF
    /// token generated for this flow. The token exchange is never attempted.
    #[error("state mismatch")]
    StateMismatch,

    /// The caller-supplied redirect URI could not be parsed.
    #[error("invalid redirect URI: {0}")]
    InvalidRedirect(String),

    /// The browser-opener hook failed.
    #[error("error opening the web browser: {0}")]
    Browser(String),

    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Details of an unexpected HTTP response from the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerError {
    /// Server-defined short identifier, e.g. `access_denied`.
    pub code: String,
    /// HTTP status of the response.
    pub status: u16,
    /// The URI the failing request was sent to.
    pub request_uri: String,
    /// Human-readable description, when the server supplied one.
    pub message: String,
}

struct ServerErrorDisplay<'a>(&'a ServerError);

impl fmt::Display for ServerErrorDisplay<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let e = self.0;
        if !e.message.is_empty() {
            write!(f, "{} ({})", e.message, e.code)
        } else if !e.code.is_empty() {
            f.write_str(&e.code)
        } else {
            write!(f, "HTTP {}", e.status)
        }
    }
}

impl FlowError {
    /// Whether this error means the server does not speak the device flow.
    pub fn is_unsupported(&self) -> bool {
        matches!(self, Self::Unsupported)
    }

    /// The protocol error code, when this is a server-reported error.
    pub fn server_code(&self) -> Option<&str> {
        match self {
            Self::Server(e) => Some(&e.code),
            _ => None,
        }
    }
}
