//! Shared harness: a scripted Transport Client and an in-memory context.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tether_core::models::{
    Account, InboundMessage, OutboundMessage, OutboundPayload, ReceiptStatus,
};
use tether_core::transport::{ConnectRequest, TransportConnection};
use tether_core::{
    AccountStore, ConnectionState, MemoryAccountStore, TetherConfig, TetherError,
    TransportConnector, TransportError, TransportEvent, TransportSession,
};
use tether_server::AppContext;
use tokio::sync::mpsc;

/// What the next `connect` call does.
#[derive(Debug, Clone)]
pub enum Construct {
    Succeed,
    Fail(TransportError),
    /// Never completes; exercises the connect deadline.
    Hang,
}

#[derive(Default)]
pub struct MockConnector {
    constructions: AtomicUsize,
    script: Mutex<VecDeque<Construct>>,
    delay: Mutex<Option<Duration>>,
    sessions: Mutex<Vec<Arc<MockSession>>>,
    senders: Mutex<Vec<mpsc::Sender<TransportEvent>>>,
    requests: Mutex<Vec<ConnectRequest>>,
}

impl MockConnector {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Queue behaviours for upcoming constructions. Once the queue is empty
    /// every construction succeeds.
    pub fn script(&self, steps: impl IntoIterator<Item = Construct>) {
        self.script.lock().unwrap().extend(steps);
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = Some(delay);
    }

    pub fn constructions(&self) -> usize {
        self.constructions.load(Ordering::SeqCst)
    }

    pub fn session(&self, index: usize) -> Arc<MockSession> {
        self.sessions.lock().unwrap()[index].clone()
    }

    pub fn latest_session(&self) -> Arc<MockSession> {
        self.sessions.lock().unwrap().last().cloned().unwrap()
    }

    pub fn requests(&self) -> Vec<ConnectRequest> {
        self.requests.lock().unwrap().clone()
    }

    /// Push an event onto the stream of the `index`-th built handle.
    pub async fn emit_on(&self, index: usize, event: TransportEvent) {
        let tx = self.senders.lock().unwrap()[index].clone();
        tx.send(event).await.unwrap();
    }

    /// Push an event onto the newest handle's stream.
    pub async fn emit(&self, event: TransportEvent) {
        let tx = self.senders.lock().unwrap().last().cloned().unwrap();
        tx.send(event).await.unwrap();
    }
}

#[async_trait]
impl TransportConnector for MockConnector {
    async fn connect(&self, request: ConnectRequest) -> Result<TransportConnection, TransportError> {
        self.constructions.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().unwrap().push(request);

        let delay = *self.delay.lock().unwrap();
        if let Some(d) = delay {
            tokio::time::sleep(d).await;
        }

        let step = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Construct::Succeed);
        match step {
            Construct::Succeed => {}
            Construct::Fail(e) => return Err(e),
            Construct::Hang => std::future::pending::<()>().await,
        }

        let (tx, rx) = mpsc::channel(32);
        let session = Arc::new(MockSession::default());
        self.sessions.lock().unwrap().push(session.clone());
        self.senders.lock().unwrap().push(tx);
        Ok(TransportConnection {
            session,
            events: rx,
        })
    }

    fn name(&self) -> &str {
        "mock"
    }
}

#[derive(Default)]
pub struct MockSession {
    busy_remaining: AtomicUsize,
    transient_remaining: AtomicUsize,
    hang: AtomicBool,
    in_flight: AtomicUsize,
    overlapped: AtomicBool,
    closed: AtomicBool,
    counter: AtomicUsize,
    sends: Mutex<Vec<(String, OutboundPayload)>>,
}

impl MockSession {
    /// Reject the next `n` sends with `Busy`.
    pub fn busy_for(&self, n: usize) {
        self.busy_remaining.store(n, Ordering::SeqCst);
    }

    /// Reject the next `n` sends with `Transient`.
    pub fn transient_for(&self, n: usize) {
        self.transient_remaining.store(n, Ordering::SeqCst);
    }

    /// True if two sends were ever inside the handle at once.
    pub fn overlapped(&self) -> bool {
        self.overlapped.load(Ordering::SeqCst)
    }

    pub fn hang_sends(&self) {
        self.hang.store(true, Ordering::SeqCst);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn sends(&self) -> Vec<(String, OutboundPayload)> {
        self.sends.lock().unwrap().clone()
    }
}

#[async_trait]
impl TransportSession for MockSession {
    async fn send(&self, recipient: &str, payload: &OutboundPayload) -> Result<String, TransportError> {
        if self.is_closed() {
            return Err(TransportError::Closed);
        }
        if self
            .busy_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(TransportError::Busy);
        }
        if self
            .transient_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(TransportError::Transient("socket reset".into()));
        }
        if self.hang.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        if self.in_flight.fetch_add(1, Ordering::SeqCst) > 0 {
            self.overlapped.store(true, Ordering::SeqCst);
        }
        tokio::time::sleep(Duration::from_millis(2)).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.sends
            .lock()
            .unwrap()
            .push((recipient.to_string(), payload.clone()));
        let n = self.counter.fetch_add(1, Ordering::SeqCst);
        Ok(format!("MOCK{:04}", n))
    }

    async fn disconnect(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

pub fn test_config() -> TetherConfig {
    TetherConfig::from_toml_str(
        r#"
        [service]
        socket_path = "/tmp/tether-test.sock"
        log_level = "debug"

        [database]
        backend = "memory"
        url = ""
        max_connections = 1

        [session]
        connect_timeout_ms = 200
        send_timeout_ms = 200
        store_timeout_ms = 1000
        teardown_timeout_ms = 100

        [retry]
        max_attempts = 3
        initial_backoff_ms = 10
        max_backoff_ms = 40
        "#,
    )
    .unwrap()
}

pub struct Harness {
    pub ctx: AppContext,
    pub store: Arc<MemoryAccountStore>,
    pub connector: Arc<MockConnector>,
}

pub fn harness() -> Harness {
    harness_with(test_config())
}

pub fn harness_with(config: TetherConfig) -> Harness {
    let store = Arc::new(MemoryAccountStore::new());
    let connector = MockConnector::new();
    let ctx = AppContext::new(config, store.clone(), connector.clone());
    Harness {
        ctx,
        store,
        connector,
    }
}

/// Poll the store until the tenant reaches `state` or two seconds pass.
pub async fn wait_for_state(store: &MemoryAccountStore, tenant: &str, state: ConnectionState) {
    let mut last = None;
    for _ in 0..200 {
        last = store
            .get_account(tenant)
            .await
            .unwrap()
            .map(|a| a.connection_status);
        if last == Some(state) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("{} never reached {}, last seen {:?}", tenant, state, last);
}

pub async fn wait_until(mut check: impl FnMut() -> bool) {
    for _ in 0..200 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition never became true");
}

pub fn connected_event() -> TransportEvent {
    TransportEvent::Connected {
        phone_number: Some("+15550001111".into()),
        display_name: Some("Front Desk".into()),
        credentials_ref: Some("creds:front-desk".into()),
    }
}

/// Drive a tenant to `Connected` through the mock transport.
pub async fn connect_tenant(h: &Harness, tenant: &str) {
    h.ctx.sessions.connect(tenant, "device-1").await.unwrap();
    h.connector.emit(connected_event()).await;
    wait_for_state(&h.store, tenant, ConnectionState::Connected).await;
}

/// Memory store whose health check never answers.
pub struct StalledHealthStore {
    inner: MemoryAccountStore,
}

impl StalledHealthStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: MemoryAccountStore::new(),
        })
    }
}

#[async_trait]
impl AccountStore for StalledHealthStore {
    async fn get_account(&self, organization_id: &str) -> Result<Option<Account>, TetherError> {
        self.inner.get_account(organization_id).await
    }

    async fn create_account(
        &self,
        organization_id: &str,
        device_id: &str,
    ) -> Result<Account, TetherError> {
        self.inner.create_account(organization_id, device_id).await
    }

    async fn save_account(&self, account: &Account) -> Result<(), TetherError> {
        self.inner.save_account(account).await
    }

    async fn list_accounts(&self) -> Result<Vec<Account>, TetherError> {
        self.inner.list_accounts().await
    }

    async fn insert_outbound(&self, message: &OutboundMessage) -> Result<(), TetherError> {
        self.inner.insert_outbound(message).await
    }

    async fn apply_receipt(
        &self,
        message_id: &str,
        status: ReceiptStatus,
        at: DateTime<Utc>,
    ) -> Result<bool, TetherError> {
        self.inner.apply_receipt(message_id, status, at).await
    }

    async fn list_outbound(
        &self,
        organization_id: &str,
        limit: u32,
    ) -> Result<Vec<OutboundMessage>, TetherError> {
        self.inner.list_outbound(organization_id, limit).await
    }

    async fn insert_inbound(&self, message: &InboundMessage) -> Result<(), TetherError> {
        self.inner.insert_inbound(message).await
    }

    async fn health_check(&self) -> Result<String, TetherError> {
        std::future::pending().await
    }

    fn name(&self) -> &str {
        "stalled"
    }
}
