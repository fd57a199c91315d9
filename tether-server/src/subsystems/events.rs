//! Event Translator: turns one handle's event stream into session updates.
//!
//! One translator task runs per handle and processes that handle's events
//! in arrival order. Lifecycle events become state changes applied through
//! the Session Manager; message and receipt events are persisted directly.
//! A failure to record an event is logged and the event is dropped.

use tether_core::policy::with_deadline;
use tether_core::transport::EventStream;
use tether_core::{TetherError, TransportEvent};
use tokio::task::JoinHandle;

use super::session::SessionManager;

pub struct EventTranslator {
    tenant: String,
    generation: u64,
    manager: SessionManager,
}

impl EventTranslator {
    pub fn new(tenant: String, generation: u64, manager: SessionManager) -> Self {
        Self {
            tenant,
            generation,
            manager,
        }
    }

    pub fn spawn(self, events: EventStream) -> JoinHandle<()> {
        tokio::spawn(self.run(events))
    }

    async fn run(self, mut events: EventStream) {
        while let Some(event) = events.recv().await {
            let kind = event.kind();
            if let Err(e) = self.handle(event).await {
                tracing::error!(
                    tenant = %self.tenant,
                    event = kind,
                    error = %e,
                    "Failed to record transport event"
                );
            }
        }
        tracing::debug!(tenant = %self.tenant, generation = self.generation, "Event stream closed");
    }

    pub async fn handle(&self, event: TransportEvent) -> Result<(), TetherError> {
        let tenant = self.tenant.as_str();
        let generation = self.generation;

        match event {
            TransportEvent::PairingCode { code } => {
                self.manager.record_pairing(tenant, generation, code).await?;
            }
            TransportEvent::Connected {
                phone_number,
                display_name,
                credentials_ref,
            } => {
                self.manager
                    .record_connected(tenant, generation, phone_number, display_name, credentials_ref)
                    .await?;
            }
            TransportEvent::Disconnected { reason } => {
                tracing::warn!(tenant, reason = ?reason, "Transport reported disconnect");
                self.manager.record_disconnected(tenant, generation).await?;
            }
            TransportEvent::LoggedOut { reason } => {
                tracing::warn!(tenant, reason = ?reason, "Transport reported logout");
                self.manager.record_logged_out(tenant, generation).await?;
            }
            TransportEvent::StreamError { detail } => {
                self.manager.record_failure(tenant, generation, detail).await?;
            }
            TransportEvent::MessageReceived {
                message_id,
                from,
                text,
                timestamp,
            } => {
                self.manager
                    .record_inbound(
                        tenant,
                        generation,
                        message_id,
                        from,
                        text,
                        timestamp,
                    )
                    .await?;
            }
            TransportEvent::DeliveryReceipt {
                message_id,
                status,
                timestamp,
            } => {
                let store = self.manager.store();
                let applied = with_deadline(
                    self.manager.session_config().store_timeout(),
                    "apply receipt",
                    store.apply_receipt(&message_id, status, timestamp),
                )
                .await?;
                if !applied {
                    tracing::debug!(tenant, message_id = %message_id, "Receipt for unknown message");
                }
            }
            TransportEvent::Unknown => {
                tracing::debug!(tenant, "Ignoring unrecognised transport event");
            }
        }
        Ok(())
    }
}
