use thiserror::Error;

use crate::transport::TransportError;

#[derive(Error, Debug)]
pub enum TetherError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Not available: {0}")]
    NotAvailable(String),

    #[error("Not connected: {0}")]
    NotConnected(String),

    #[error("Already connecting: {0}")]
    AlreadyConnecting(String),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Send failed: {0}")]
    SendFailed(String),

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("Not implemented: {0}")]
    NotImplemented(String),

    #[error("Fatal error: {0}")]
    Fatal(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Config error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl TetherError {
    /// Machine-readable kind carried in every failure payload.
    pub fn kind(&self) -> &'static str {
        match self {
            TetherError::Validation(_) => "validation_error",
            TetherError::NotFound(_) => "not_found",
            TetherError::NotAvailable(_) => "not_available",
            TetherError::NotConnected(_) => "not_connected",
            TetherError::AlreadyConnecting(_) => "already_connecting",
            TetherError::Connection(_) => "connection_error",
            TetherError::SendFailed(_) => "send_failed",
            TetherError::Timeout(_) => "timeout",
            TetherError::NotImplemented(_) => "not_implemented",
            TetherError::Fatal(_)
            | TetherError::Database(_)
            | TetherError::Config(_)
            | TetherError::Io(_) => "fatal",
        }
    }

    pub fn status_code(&self) -> u16 {
        status_for_kind(self.kind())
    }

    /// Transient failures eligible for bounded automatic retry.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            TetherError::Connection(_) | TetherError::SendFailed(_) | TetherError::Timeout(_)
        )
    }

    /// Human-readable detail without the kind prefix.
    pub fn detail(&self) -> String {
        match self {
            TetherError::Validation(s)
            | TetherError::NotFound(s)
            | TetherError::NotAvailable(s)
            | TetherError::NotConnected(s)
            | TetherError::AlreadyConnecting(s)
            | TetherError::Connection(s)
            | TetherError::SendFailed(s)
            | TetherError::Timeout(s)
            | TetherError::NotImplemented(s)
            | TetherError::Fatal(s) => s.clone(),
            other => other.to_string(),
        }
    }
}

/// HTTP-style status for an error kind. Unknown kinds map to 500.
pub fn status_for_kind(kind: &str) -> u16 {
    match kind {
        "validation_error" => 400,
        "not_found" | "not_available" => 404,
        "not_connected" | "already_connecting" => 409,
        "not_implemented" => 501,
        "connection_error" | "send_failed" => 502,
        "timeout" => 504,
        _ => 500,
    }
}

impl From<TransportError> for TetherError {
    fn from(e: TransportError) -> Self {
        match e {
            TransportError::Busy => TetherError::SendFailed("transport busy".to_string()),
            TransportError::Transient(msg) => TetherError::Connection(msg),
            TransportError::Timeout => TetherError::Timeout("transport call timed out".to_string()),
            TransportError::Closed => TetherError::NotConnected("transport session closed".to_string()),
            TransportError::Fatal(msg) => TetherError::Fatal(msg),
        }
    }
}

pub type Result<T> = std::result::Result<T, TetherError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes_follow_taxonomy() {
        assert_eq!(TetherError::Validation("x".into()).status_code(), 400);
        assert_eq!(TetherError::NotFound("x".into()).status_code(), 404);
        assert_eq!(TetherError::NotAvailable("x".into()).status_code(), 404);
        assert_eq!(TetherError::NotConnected("x".into()).status_code(), 409);
        assert_eq!(TetherError::NotImplemented("x".into()).status_code(), 501);
        assert_eq!(TetherError::SendFailed("x".into()).status_code(), 502);
        assert_eq!(TetherError::Fatal("x".into()).status_code(), 500);
        assert_eq!(status_for_kind("something_new"), 500);
    }

    #[test]
    fn test_only_transient_kinds_are_retryable() {
        assert!(TetherError::Connection("x".into()).is_retryable());
        assert!(TetherError::Timeout("x".into()).is_retryable());
        assert!(!TetherError::Validation("x".into()).is_retryable());
        assert!(!TetherError::NotImplemented("x".into()).is_retryable());
        assert!(!TetherError::Fatal("x".into()).is_retryable());
    }

    #[test]
    fn test_detail_strips_kind_prefix() {
        let e = TetherError::NotConnected("org1 is disconnected".into());
        assert_eq!(e.detail(), "org1 is disconnected");
        assert_eq!(e.kind(), "not_connected");
    }

    #[test]
    fn test_transport_errors_convert() {
        assert_eq!(TetherError::from(TransportError::Busy).kind(), "send_failed");
        assert_eq!(TetherError::from(TransportError::Timeout).kind(), "timeout");
        assert_eq!(
            TetherError::from(TransportError::Fatal("boom".into())).kind(),
            "fatal"
        );
    }
}
