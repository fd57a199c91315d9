use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    Text,
    Image,
    Video,
    Audio,
    Document,
}

impl MessageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageKind::Text => "text",
            MessageKind::Image => "image",
            MessageKind::Video => "video",
            MessageKind::Audio => "audio",
            MessageKind::Document => "document",
        }
    }

    pub fn is_media(&self) -> bool {
        !matches!(self, MessageKind::Text)
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MessageKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "text" => Ok(MessageKind::Text),
            "image" => Ok(MessageKind::Image),
            "video" => Ok(MessageKind::Video),
            "audio" => Ok(MessageKind::Audio),
            "document" => Ok(MessageKind::Document),
            other => Err(format!("unsupported message type: {}", other)),
        }
    }
}

/// What the transport is asked to deliver.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum OutboundPayload {
    Text { text: String },
    Media { kind: MessageKind, url: String, caption: Option<String> },
}

/// One row per send attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutboundMessage {
    pub id: Uuid,
    pub account_id: Uuid,
    pub organization_id: String,
    /// Protocol-assigned id; `None` until a send succeeds.
    pub message_id: Option<String>,
    pub to_jid: String,
    pub message_type: MessageKind,
    pub message_text: Option<String>,
    pub media_url: Option<String>,
    pub lead_id: Option<String>,
    pub is_sent: bool,
    pub error_code: Option<String>,
    pub error_message: Option<String>,
    pub retry_count: i32,
    pub created_at: DateTime<Utc>,
    pub sent_at: Option<DateTime<Utc>>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub read_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InboundMessage {
    pub id: Uuid,
    pub account_id: Uuid,
    pub organization_id: String,
    pub message_id: String,
    pub from_jid: String,
    pub message_text: Option<String>,
    pub received_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReceiptStatus {
    Delivered,
    Read,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_parsing_is_case_insensitive() {
        assert_eq!("TEXT".parse::<MessageKind>(), Ok(MessageKind::Text));
        assert_eq!(" image ".parse::<MessageKind>(), Ok(MessageKind::Image));
        assert_eq!("Document".parse::<MessageKind>(), Ok(MessageKind::Document));
    }

    #[test]
    fn test_unknown_kind_rejected() {
        let err = "sticker".parse::<MessageKind>().unwrap_err();
        assert!(err.contains("sticker"));
    }

    #[test]
    fn test_only_text_is_not_media() {
        assert!(!MessageKind::Text.is_media());
        assert!(MessageKind::Audio.is_media());
        assert!(MessageKind::Video.is_media());
    }
}
