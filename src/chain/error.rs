//! JSON-RPC failure classification.

/// Whether a failed call may be retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RpcErrorKind {
    /// Timeouts, refused connections, overloaded nodes. Retry may succeed.
    Transient,
    /// Malformed responses or a node-side rejection. Retrying will not help.
    Terminal,
}

/// Error code used for transport failures that never produced a JSON-RPC reply.
pub const TRANSPORT_ERROR_CODE: i64 = -32099;

/// Error code used for non-2xx HTTP responses.
pub const HTTP_STATUS_ERROR_CODE: i64 = -32098;

/// Error code for replies that are not valid JSON-RPC (standard parse error).
pub const MALFORMED_RESPONSE_CODE: i64 = -32700;

/// A failed JSON-RPC call.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("RPC error {code}: {message}")]
pub struct RpcError {
    pub code: i64,
    pub message: String,
    pub kind: RpcErrorKind,
}

impl RpcError {
    pub fn transient(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            kind: RpcErrorKind::Transient,
        }
    }

    pub fn terminal(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            kind: RpcErrorKind::Terminal,
        }
    }

    pub fn malformed(message: impl Into<String>) -> Self {
        Self::terminal(MALFORMED_RESPONSE_CODE, message)
    }

    pub fn is_transient(&self) -> bool {
        self.kind == RpcErrorKind::Transient
    }

    /// Classify an HTTP status that is not 2xx.
    pub fn from_status(status: reqwest::StatusCode, url: &str) -> Self {
        let message = format!("HTTP {status} from {url}");
        if status.is_server_error() || status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            Self::transient(HTTP_STATUS_ERROR_CODE, message)
        } else {
            Self::terminal(HTTP_STATUS_ERROR_CODE, message)
        }
    }
}

impl From<reqwest::Error> for RpcError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            RpcError::malformed(format!("invalid JSON-RPC response: {e}"))
        } else if e.is_builder() {
            RpcError::terminal(TRANSPORT_ERROR_CODE, format!("invalid request: {e}"))
        } else {
            // Connect, timeout, and body read failures.
            RpcError::transient(TRANSPORT_ERROR_CODE, e.to_string())
        }
    }
}
