//! Outbound Dispatcher: validated sends through a tenant's live handle.
//!
//! Each `send` produces at most one persisted row, written whether delivery
//! succeeded or failed. Requests that never reach the transport (bad input,
//! tenant not connected) leave no row behind. Busy, transient and timed-out
//! calls into the handle are retried on the configured schedule within the
//! same request; `retry_count` on the row records how many.

use std::sync::{Arc, OnceLock};

use chrono::Utc;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tokio_retry::RetryIf;
use uuid::Uuid;

use tether_core::config::{RetryConfig, SessionConfig};
use tether_core::models::OutboundPayload;
use tether_core::policy::{retry_schedule, with_deadline};
use tether_core::{
    AccountStore, ConnectionState, MessageKind, OutboundMessage, TetherError, TransportError,
};

use super::session::SessionManager;

const DEFAULT_LIST_LIMIT: u32 = 50;
const MAX_LIST_LIMIT: u32 = 500;

fn recipient_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"^[^@\s]+@[^@\s]+$").ok())
        .as_ref()
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendRequest {
    pub organization_id: String,
    pub to: String,
    pub message_type: String,
    #[serde(default)]
    pub message_text: Option<String>,
    #[serde(default)]
    pub media_url: Option<String>,
    #[serde(default)]
    pub lead_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SendOutcome {
    pub message_id: String,
    pub record_id: Uuid,
}

/// Check a send request and build the transport payload. No IO.
pub fn validate(req: &SendRequest) -> Result<(MessageKind, OutboundPayload), TetherError> {
    if req.organization_id.trim().is_empty() {
        return Err(TetherError::Validation("organizationId is required".into()));
    }
    if !recipient_pattern().is_some_and(|re| re.is_match(&req.to)) {
        return Err(TetherError::Validation(format!(
            "recipient '{}' is not a protocol address",
            req.to
        )));
    }
    let kind: MessageKind = req
        .message_type
        .parse()
        .map_err(TetherError::Validation)?;

    let payload = match kind {
        MessageKind::Text => match req.message_text.as_deref() {
            Some(text) if !text.trim().is_empty() => OutboundPayload::Text {
                text: text.to_string(),
            },
            _ => {
                return Err(TetherError::Validation(
                    "messageText is required for text messages".into(),
                ))
            }
        },
        media => match req.media_url.as_deref() {
            Some(url) if !url.trim().is_empty() => OutboundPayload::Media {
                kind: media,
                url: url.to_string(),
                caption: req.message_text.clone(),
            },
            _ => {
                return Err(TetherError::Validation(format!(
                    "mediaUrl is required for {} messages",
                    media
                )))
            }
        },
    };
    Ok((kind, payload))
}

#[derive(Clone)]
pub struct OutboundDispatcher {
    sessions: SessionManager,
    store: Arc<dyn AccountStore>,
    session: SessionConfig,
    retry: RetryConfig,
}

impl OutboundDispatcher {
    pub fn new(
        sessions: SessionManager,
        store: Arc<dyn AccountStore>,
        session: SessionConfig,
        retry: RetryConfig,
    ) -> Self {
        Self {
            sessions,
            store,
            session,
            retry,
        }
    }

    pub async fn send(&self, req: SendRequest) -> Result<SendOutcome, TetherError> {
        let (kind, payload) = validate(&req)?;
        let tenant = req.organization_id.as_str();

        let account = with_deadline(
            self.session.store_timeout(),
            "load account",
            self.store.get_account(tenant),
        )
        .await?
        .ok_or_else(|| TetherError::NotConnected(format!("no account for {}", tenant)))?;

        if account.state() != ConnectionState::Connected {
            return Err(TetherError::NotConnected(format!(
                "{} is {}",
                tenant,
                account.state()
            )));
        }
        let live = self.sessions.live_session(tenant).await?;

        let mut row = OutboundMessage {
            id: Uuid::new_v4(),
            account_id: account.id,
            organization_id: tenant.to_string(),
            message_id: None,
            to_jid: req.to.clone(),
            message_type: kind,
            message_text: req.message_text.clone(),
            media_url: req.media_url.clone(),
            lead_id: req.lead_id.clone(),
            is_sent: false,
            error_code: None,
            error_message: None,
            retry_count: 0,
            created_at: Utc::now(),
            sent_at: None,
            delivered_at: None,
            read_at: None,
        };

        if kind.is_media() {
            let err = TetherError::NotImplemented(format!("{} messages are not supported yet", kind));
            self.record_failure(&mut row, &err).await;
            return Err(err);
        }

        let mut attempts: i32 = 0;
        let result = {
            let _gate = live.exclusive().await;
            let send_timeout = self.session.send_timeout();
            let transport = live.transport();
            let to = req.to.as_str();
            RetryIf::spawn(
                retry_schedule(&self.retry),
                || {
                    attempts += 1;
                    let payload = &payload;
                    async move {
                        match tokio::time::timeout(send_timeout, transport.send(to, payload)).await {
                            Ok(res) => res,
                            Err(_) => Err(TransportError::Timeout),
                        }
                    }
                },
                |e: &TransportError| e.is_retryable(),
            )
            .await
        };
        row.retry_count = (attempts - 1).max(0);

        match result {
            Ok(message_id) => {
                let now = Utc::now();
                row.message_id = Some(message_id.clone());
                row.is_sent = true;
                row.sent_at = Some(now);
                if let Err(e) = self.persist(&row).await {
                    tracing::error!(
                        tenant,
                        message_id = %message_id,
                        error = %e,
                        "Message sent but its record could not be written"
                    );
                }
                tracing::info!(tenant, message_id = %message_id, retries = row.retry_count, "Message sent");
                Ok(SendOutcome {
                    message_id,
                    record_id: row.id,
                })
            }
            Err(te) => {
                let err = match te {
                    TransportError::Busy => TetherError::SendFailed(format!(
                        "transport busy after {} attempts",
                        attempts
                    )),
                    TransportError::Transient(msg) => TetherError::SendFailed(format!(
                        "{} (after {} attempts)",
                        msg, attempts
                    )),
                    TransportError::Fatal(msg) => TetherError::SendFailed(msg),
                    TransportError::Timeout => TetherError::Timeout(format!(
                        "send exceeded {}ms on each of {} attempts",
                        self.session.send_timeout().as_millis(),
                        attempts
                    )),
                    TransportError::Closed => {
                        TetherError::NotConnected("transport session closed".into())
                    }
                };
                tracing::warn!(tenant, to = %req.to, error = %err, "Send failed");
                self.record_failure(&mut row, &err).await;
                Err(err)
            }
        }
    }

    pub async fn list_messages(
        &self,
        tenant: &str,
        limit: Option<u32>,
    ) -> Result<Vec<OutboundMessage>, TetherError> {
        if tenant.trim().is_empty() {
            return Err(TetherError::Validation("organizationId is required".into()));
        }
        let limit = limit.unwrap_or(DEFAULT_LIST_LIMIT).clamp(1, MAX_LIST_LIMIT);
        with_deadline(
            self.session.store_timeout(),
            "list messages",
            self.store.list_outbound(tenant, limit),
        )
        .await
    }

    async fn persist(&self, row: &OutboundMessage) -> Result<(), TetherError> {
        with_deadline(
            self.session.store_timeout(),
            "insert outbound",
            self.store.insert_outbound(row),
        )
        .await
    }

    async fn record_failure(&self, row: &mut OutboundMessage, err: &TetherError) {
        row.is_sent = false;
        row.error_code = Some(err.kind().to_string());
        row.error_message = Some(err.detail());
        if let Err(e) = self.persist(row).await {
            tracing::error!(
                tenant = %row.organization_id,
                error = %e,
                "Failed to record failed send"
            );
        }
    }
}
