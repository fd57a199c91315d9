//! Transport Client collaborator interface
//!
//! The wire-level pairing handshake, encryption and socket I/O live behind
//! these traits. A connector builds one live session per tenant and hands
//! back the session handle together with its asynchronous event stream.
//!
//! Implementations:
//! - **loopback** — in-process development transport (see `loopback.rs`)

pub mod loopback;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;

use crate::config::TransportConfig;
use crate::models::{OutboundPayload, ReceiptStatus};

pub use loopback::LoopbackConnector;

/// Errors surfaced by a Transport Client.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// The session is handling another call; try again shortly.
    #[error("transport busy")]
    Busy,

    #[error("transient transport failure: {0}")]
    Transient(String),

    #[error("transport call timed out")]
    Timeout,

    #[error("transport session closed")]
    Closed,

    #[error("unrecoverable transport failure: {0}")]
    Fatal(String),
}

impl TransportError {
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            TransportError::Busy | TransportError::Transient(_) | TransportError::Timeout
        )
    }
}

/// Asynchronous protocol events, one case per event kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TransportEvent {
    PairingCode {
        code: String,
    },
    Connected {
        #[serde(default)]
        phone_number: Option<String>,
        #[serde(default)]
        display_name: Option<String>,
        #[serde(default)]
        credentials_ref: Option<String>,
    },
    Disconnected {
        #[serde(default)]
        reason: Option<String>,
    },
    LoggedOut {
        #[serde(default)]
        reason: Option<String>,
    },
    MessageReceived {
        message_id: String,
        from: String,
        #[serde(default)]
        text: Option<String>,
        #[serde(default = "Utc::now")]
        timestamp: DateTime<Utc>,
    },
    DeliveryReceipt {
        message_id: String,
        status: ReceiptStatus,
        #[serde(default = "Utc::now")]
        timestamp: DateTime<Utc>,
    },
    /// The transport hit a failure it cannot recover from.
    StreamError {
        detail: String,
    },
    /// Event kinds this build does not know about.
    #[serde(other)]
    Unknown,
}

impl TransportEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            TransportEvent::PairingCode { .. } => "pairing_code",
            TransportEvent::Connected { .. } => "connected",
            TransportEvent::Disconnected { .. } => "disconnected",
            TransportEvent::LoggedOut { .. } => "logged_out",
            TransportEvent::MessageReceived { .. } => "message_received",
            TransportEvent::DeliveryReceipt { .. } => "delivery_receipt",
            TransportEvent::StreamError { .. } => "stream_error",
            TransportEvent::Unknown => "unknown",
        }
    }
}

pub type EventStream = mpsc::Receiver<TransportEvent>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectRequest {
    pub organization_id: String,
    pub device_id: String,
    /// Stored credentials from a previous pairing, if any.
    pub credentials_ref: Option<String>,
}

/// A freshly constructed session and the stream of events it will produce.
pub struct TransportConnection {
    pub session: Arc<dyn TransportSession>,
    pub events: EventStream,
}

/// Builds live sessions.
#[async_trait]
pub trait TransportConnector: Send + Sync {
    async fn connect(&self, request: ConnectRequest) -> Result<TransportConnection, TransportError>;

    /// Connector name for logging.
    fn name(&self) -> &str;
}

/// A live session handle. May serialize or reject concurrent calls on its
/// own; rejection surfaces as `TransportError::Busy`.
#[async_trait]
pub trait TransportSession: Send + Sync {
    /// Send a message and return the protocol-assigned message id.
    async fn send(&self, recipient: &str, payload: &OutboundPayload)
        -> Result<String, TransportError>;

    /// Tear the session down. The event stream ends afterwards.
    async fn disconnect(&self);
}

/// Create the configured connector.
pub fn create_connector(
    config: &TransportConfig,
) -> Result<Arc<dyn TransportConnector>, TransportError> {
    match config.backend.as_str() {
        "loopback" => Ok(Arc::new(LoopbackConnector::new(config.clone()))),
        other => Err(TransportError::Fatal(format!(
            "unknown transport backend: {}",
            other
        ))),
    }
}
