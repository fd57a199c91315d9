//! Loopback transport: an in-process stand-in for a real protocol client.
//!
//! `connect` hands out a pairing code straight away, or reports `Connected`
//! when the device already paired in this process (or stored credentials were
//! supplied). With `auto_pair_after_ms` set, the pairing is "scanned"
//! automatically after that delay. Sends succeed with a generated id.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use uuid::Uuid;

use super::{
    ConnectRequest, TransportConnection, TransportConnector, TransportError, TransportEvent,
    TransportSession,
};
use crate::config::TransportConfig;
use crate::models::OutboundPayload;

const EVENT_BUFFER: usize = 64;

pub struct LoopbackConnector {
    config: TransportConfig,
    paired: Arc<Mutex<HashSet<String>>>,
}

impl LoopbackConnector {
    pub fn new(config: TransportConfig) -> Self {
        Self {
            config,
            paired: Arc::new(Mutex::new(HashSet::new())),
        }
    }
}

fn connected_event(config: &TransportConfig, device_id: &str) -> TransportEvent {
    TransportEvent::Connected {
        phone_number: Some(
            config
                .phone_number
                .clone()
                .unwrap_or_else(|| "+10000000000".to_string()),
        ),
        display_name: config.display_name.clone(),
        credentials_ref: Some(format!("loopback:{}", device_id)),
    }
}

#[async_trait]
impl TransportConnector for LoopbackConnector {
    async fn connect(&self, request: ConnectRequest) -> Result<TransportConnection, TransportError> {
        let (tx, rx) = mpsc::channel(EVENT_BUFFER);

        let already_paired = request.credentials_ref.is_some()
            || self
                .paired
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .contains(&request.device_id);

        if already_paired {
            tx.try_send(connected_event(&self.config, &request.device_id))
                .map_err(|e| TransportError::Transient(e.to_string()))?;
        } else {
            let code = pairing_code();
            tx.try_send(TransportEvent::PairingCode { code })
                .map_err(|e| TransportError::Transient(e.to_string()))?;
        }

        let session = Arc::new(LoopbackSession {
            tx: Mutex::new(Some(tx)),
            sent: AtomicU64::new(0),
        });

        if let (false, Some(delay_ms)) = (already_paired, self.config.auto_pair_after_ms) {
            let session = session.clone();
            let paired = self.paired.clone();
            let event = connected_event(&self.config, &request.device_id);
            let device_id = request.device_id.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                if !session.is_open() {
                    return;
                }
                paired
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .insert(device_id);
                session.emit(event).await;
            });
        }

        tracing::debug!(
            tenant = %request.organization_id,
            device = %request.device_id,
            already_paired,
            "Loopback session constructed"
        );

        Ok(TransportConnection {
            session,
            events: rx,
        })
    }

    fn name(&self) -> &str {
        "loopback"
    }
}

pub struct LoopbackSession {
    tx: Mutex<Option<mpsc::Sender<TransportEvent>>>,
    sent: AtomicU64,
}

impl LoopbackSession {
    /// Push an event onto the stream. Returns false once torn down.
    async fn emit(&self, event: TransportEvent) -> bool {
        let tx = self.tx.lock().unwrap_or_else(|e| e.into_inner()).clone();
        match tx {
            Some(tx) => tx.send(event).await.is_ok(),
            None => false,
        }
    }

    fn is_open(&self) -> bool {
        self.tx.lock().unwrap_or_else(|e| e.into_inner()).is_some()
    }
}

#[async_trait]
impl TransportSession for LoopbackSession {
    async fn send(
        &self,
        recipient: &str,
        _payload: &OutboundPayload,
    ) -> Result<String, TransportError> {
        if !self.is_open() {
            return Err(TransportError::Closed);
        }
        // Sequence prefix keeps ids from one session ordered.
        let n = self.sent.fetch_add(1, Ordering::Relaxed);
        let id = Uuid::new_v4().simple().to_string().to_uppercase();
        tracing::debug!(recipient, n, "Loopback send accepted");
        Ok(format!("3EB0{:04X}{}", n & 0xFFFF, &id[..12]))
    }

    async fn disconnect(&self) {
        self.tx.lock().unwrap_or_else(|e| e.into_inner()).take();
    }
}

fn pairing_code() -> String {
    let raw = Uuid::new_v4().simple().to_string().to_uppercase();
    format!("{}-{}", &raw[..4], &raw[4..8])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(device: &str) -> ConnectRequest {
        ConnectRequest {
            organization_id: "org1".into(),
            device_id: device.into(),
            credentials_ref: None,
        }
    }

    #[tokio::test]
    async fn test_fresh_device_gets_pairing_code() {
        let connector = LoopbackConnector::new(TransportConfig::default());
        let mut conn = connector.connect(request("dev1")).await.unwrap();

        match conn.events.recv().await {
            Some(TransportEvent::PairingCode { code }) => assert_eq!(code.len(), 9),
            other => panic!("expected pairing code, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_stored_credentials_connect_directly() {
        let connector = LoopbackConnector::new(TransportConfig::default());
        let mut req = request("dev1");
        req.credentials_ref = Some("loopback:dev1".into());
        let mut conn = connector.connect(req).await.unwrap();

        assert!(matches!(
            conn.events.recv().await,
            Some(TransportEvent::Connected { .. })
        ));
    }

    #[tokio::test]
    async fn test_auto_pair_emits_connected_then_remembers_device() {
        let config = TransportConfig {
            auto_pair_after_ms: Some(5),
            phone_number: Some("+15550001111".into()),
            ..TransportConfig::default()
        };
        let connector = LoopbackConnector::new(config);
        let mut conn = connector.connect(request("dev1")).await.unwrap();

        assert!(matches!(
            conn.events.recv().await,
            Some(TransportEvent::PairingCode { .. })
        ));
        match conn.events.recv().await {
            Some(TransportEvent::Connected { phone_number, .. }) => {
                assert_eq!(phone_number.as_deref(), Some("+15550001111"))
            }
            other => panic!("expected connected, got {:?}", other),
        }

        conn.session.disconnect().await;
        let mut again = connector.connect(request("dev1")).await.unwrap();
        assert!(matches!(
            again.events.recv().await,
            Some(TransportEvent::Connected { .. })
        ));
    }

    #[tokio::test]
    async fn test_disconnect_closes_stream_and_rejects_sends() {
        let connector = LoopbackConnector::new(TransportConfig::default());
        let mut conn = connector.connect(request("dev1")).await.unwrap();
        let _ = conn.events.recv().await;

        let payload = OutboundPayload::Text { text: "hi".into() };
        let id = conn.session.send("1555@s.whatsapp.net", &payload).await.unwrap();
        assert!(id.starts_with("3EB0"));

        conn.session.disconnect().await;
        assert!(conn.events.recv().await.is_none());
        assert_eq!(
            conn.session.send("1555@s.whatsapp.net", &payload).await,
            Err(TransportError::Closed)
        );
    }

    #[tokio::test]
    async fn test_send_ids_carry_sequence() {
        let connector = LoopbackConnector::new(TransportConfig::default());
        let conn = connector.connect(request("dev-seq")).await.unwrap();
        let payload = OutboundPayload::Text { text: "hi".into() };

        let first = conn.session.send("1555@s.whatsapp.net", &payload).await.unwrap();
        let second = conn.session.send("1555@s.whatsapp.net", &payload).await.unwrap();

        assert_eq!(first.len(), 20);
        assert!(first.starts_with("3EB00000"), "{}", first);
        assert!(second.starts_with("3EB00001"), "{}", second);
        assert_ne!(first, second);
    }
}
