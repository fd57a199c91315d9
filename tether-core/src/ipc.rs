use serde::{Deserialize, Serialize};

use crate::error::TetherError;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum TetherRequest {
    Ping,
    Health,
    Connect {
        organization_id: String,
        device_id: String,
    },
    Disconnect {
        organization_id: String,
    },
    Status {
        organization_id: String,
    },
    PairingCode {
        organization_id: String,
    },
    Send {
        organization_id: String,
        to: String,
        message_type: String,
        #[serde(default)]
        message_text: Option<String>,
        #[serde(default)]
        media_url: Option<String>,
        #[serde(default)]
        lead_id: Option<String>,
    },
    Messages {
        organization_id: String,
        #[serde(default)]
        limit: Option<u32>,
    },
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct TetherResponse {
    pub status: String,
    pub data: Option<serde_json::Value>,
    pub error: Option<String>,
    pub error_kind: Option<String>,
    pub version: String,
}

impl TetherResponse {
    pub fn ok(data: serde_json::Value) -> Self {
        Self {
            status: "ok".to_string(),
            data: Some(data),
            error: None,
            error_kind: None,
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }

    pub fn err(kind: &str, msg: impl Into<String>) -> Self {
        Self {
            status: "error".to_string(),
            data: None,
            error: Some(msg.into()),
            error_kind: Some(kind.to_string()),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }

    pub fn from_error(e: &TetherError) -> Self {
        Self::err(e.kind(), e.detail())
    }

    pub fn pong() -> Self {
        Self::ok(serde_json::json!({"pong": true}))
    }

    pub fn is_ok(&self) -> bool {
        self.status == "ok"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_tagged_by_action() {
        let req: TetherRequest = serde_json::from_value(serde_json::json!({
            "action": "send",
            "organization_id": "org1",
            "to": "1555@s.whatsapp.net",
            "message_type": "text",
            "message_text": "hi"
        }))
        .unwrap();

        match req {
            TetherRequest::Send { message_text, media_url, .. } => {
                assert_eq!(message_text.as_deref(), Some("hi"));
                assert!(media_url.is_none());
            }
            other => panic!("unexpected request {:?}", other),
        }
    }

    #[test]
    fn test_error_response_carries_kind() {
        let resp = TetherResponse::from_error(&TetherError::NotConnected("org1".into()));
        assert!(!resp.is_ok());
        assert_eq!(resp.error_kind.as_deref(), Some("not_connected"));
        assert_eq!(resp.error.as_deref(), Some("org1"));
    }
}
