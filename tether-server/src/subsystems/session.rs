//! Session Manager: one lifecycle state machine per tenant
//!
//! Owns the only mutable reference to each tenant's Transport Client handle.
//! Every account-state transition for a tenant, whether it comes from an API
//! call or from the transport's event stream, runs inside that tenant's
//! critical section (`TenantSlot::lifecycle`) as a read-modify-write of the
//! account row. Tenants never share a lock.
//!
//! Handles carry a generation number. Tearing a handle down or installing a
//! new one bumps the generation, so events still draining from an old stream
//! (and reconnect loops started for it) are recognised and dropped.

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio::sync::{Mutex, MutexGuard};
use tokio_retry::RetryIf;
use uuid::Uuid;

use tether_core::config::{RetryConfig, SessionConfig};
use tether_core::models::{Account, ConnectionState, InboundMessage, StateChange, Trigger};
use tether_core::policy::{retry_schedule, with_deadline};
use tether_core::transport::{ConnectRequest, TransportConnection};
use tether_core::{AccountStore, TetherError, TransportConnector, TransportSession};

use super::events::EventTranslator;

type Result<T> = std::result::Result<T, TetherError>;

/// Cheap to clone; all clones share one session table.
#[derive(Clone)]
pub struct SessionManager {
    inner: Arc<Inner>,
}

struct Inner {
    store: Arc<dyn AccountStore>,
    connector: Arc<dyn TransportConnector>,
    session: SessionConfig,
    retry: RetryConfig,
    slots: DashMap<String, Arc<TenantSlot>>,
    /// Handles currently installed; readable without any tenant lock.
    live: AtomicUsize,
}

#[derive(Default)]
struct TenantSlot {
    /// The per-tenant critical section.
    lifecycle: Mutex<SlotState>,
    /// Serializes calls into the live handle.
    send_gate: Mutex<()>,
}

#[derive(Default)]
struct SlotState {
    handle: Option<LiveHandle>,
    generation: u64,
    reconnecting: bool,
    /// Mirror of the last persisted state written under this lock.
    state: Option<ConnectionState>,
}

struct LiveHandle {
    session: Arc<dyn TransportSession>,
    device_id: String,
}

impl SlotState {
    fn bump(&mut self) -> u64 {
        self.generation += 1;
        self.generation
    }
}

/// A resolved live handle, borrowed by the Outbound Dispatcher.
pub struct LiveSession {
    session: Arc<dyn TransportSession>,
    slot: Arc<TenantSlot>,
}

impl LiveSession {
    pub fn transport(&self) -> &Arc<dyn TransportSession> {
        &self.session
    }

    /// Hold this while calling into the handle.
    pub async fn exclusive(&self) -> MutexGuard<'_, ()> {
        self.slot.send_gate.lock().await
    }
}

enum ReconnectOutcome {
    Established,
    Abandoned,
}

impl SessionManager {
    pub fn new(
        store: Arc<dyn AccountStore>,
        connector: Arc<dyn TransportConnector>,
        session: SessionConfig,
        retry: RetryConfig,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                connector,
                session,
                retry,
                slots: DashMap::new(),
                live: AtomicUsize::new(0),
            }),
        }
    }

    pub fn store(&self) -> &Arc<dyn AccountStore> {
        &self.inner.store
    }

    pub fn session_config(&self) -> &SessionConfig {
        &self.inner.session
    }

    fn slot(&self, tenant: &str) -> Arc<TenantSlot> {
        self.inner
            .slots
            .entry(tenant.to_string())
            .or_default()
            .value()
            .clone()
    }

    async fn store_call<T, F>(&self, what: &str, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        with_deadline(self.inner.session.store_timeout(), what, fut).await
    }

    async fn save(&self, guard: &mut SlotState, account: &Account) -> Result<()> {
        self.store_call("save account", self.inner.store.save_account(account))
            .await?;
        guard.state = Some(account.state());
        Ok(())
    }

    // ========================================================================
    // API operations
    // ========================================================================

    /// Construct a Transport Client handle for the tenant unless one is
    /// already live. Idempotent while `Connecting`/`Pairing`/`Connected`.
    pub async fn connect(&self, tenant: &str, device_id: &str) -> Result<ConnectionState> {
        if tenant.trim().is_empty() || device_id.trim().is_empty() {
            return Err(TetherError::Validation(
                "organizationId and deviceId are required".to_string(),
            ));
        }

        let slot = self.slot(tenant);
        let mut guard = slot.lifecycle.lock().await;

        let mut account = self
            .store_call(
                "create account",
                self.inner.store.create_account(tenant, device_id),
            )
            .await?;
        let current = account.state();
        let live_state = matches!(
            current,
            ConnectionState::Connecting | ConnectionState::Pairing | ConnectionState::Connected
        );

        if let Some(handle) = &guard.handle {
            if handle.device_id != device_id {
                return Err(TetherError::AlreadyConnecting(format!(
                    "{} already has a session for device {}",
                    tenant, handle.device_id
                )));
            }
            if live_state {
                tracing::debug!(tenant, state = %current, "Connect is a no-op, handle already live");
                return Ok(current);
            }
        }

        if guard.reconnecting && current == ConnectionState::Connecting {
            if account.device_id != device_id {
                return Err(TetherError::AlreadyConnecting(format!(
                    "{} is reconnecting device {}",
                    tenant, account.device_id
                )));
            }
            tracing::debug!(tenant, "Connect is a no-op, automatic reconnect in flight");
            return Ok(current);
        }

        // Anything left over is stale: a handle in a non-live state, or a
        // persisted live state with no handle behind it (process restart).
        self.retire_locked(tenant, &mut guard);
        if live_state {
            account.connection_status = ConnectionState::Disconnected;
            account.qr_code = None;
        }

        let request = ConnectRequest {
            organization_id: tenant.to_string(),
            device_id: device_id.to_string(),
            credentials_ref: account.credentials_ref.clone(),
        };

        let connection = match self.construct(request).await {
            Ok(c) => c,
            Err(e @ TetherError::Fatal(_)) => {
                tracing::error!(tenant, error = %e, "Transport construction failed permanently");
                if account
                    .apply(StateChange::Failed { detail: e.detail() }, Utc::now())
                    .is_some()
                {
                    if let Err(se) = self.save(&mut guard, &account).await {
                        tracing::error!(tenant, error = %se, "Failed to persist error state");
                    }
                }
                return Err(e);
            }
            Err(e) => {
                tracing::warn!(tenant, error = %e, "Transport construction failed");
                return Err(e);
            }
        };

        let next = account
            .apply(
                StateChange::ConnectRequested {
                    device_id: device_id.to_string(),
                },
                Utc::now(),
            )
            .unwrap_or(ConnectionState::Connecting);

        if let Err(e) = self.save(&mut guard, &account).await {
            connection.session.disconnect().await;
            return Err(e);
        }

        self.install_locked(tenant, device_id, &mut guard, connection);
        tracing::info!(tenant, device = device_id, "Session connecting");
        Ok(next)
    }

    /// Tear down the live handle (if any) and move to `Disconnected`.
    /// Succeeds for unknown tenants and already-disconnected ones.
    pub async fn disconnect(&self, tenant: &str) -> Result<ConnectionState> {
        let slot = self.slot(tenant);
        let mut guard = slot.lifecycle.lock().await;

        if let Some(handle) = self.teardown_locked(tenant, &mut guard) {
            let limit = self.inner.session.teardown_timeout();
            if tokio::time::timeout(limit, handle.session.disconnect()).await.is_err() {
                tracing::warn!(tenant, "Transport teardown timed out, handle dropped");
            }
        }

        let Some(mut account) = self
            .store_call("load account", self.inner.store.get_account(tenant))
            .await?
        else {
            return Ok(ConnectionState::Disconnected);
        };

        if account.state() == ConnectionState::Disconnected && account.qr_code.is_none() {
            guard.state = Some(ConnectionState::Disconnected);
            return Ok(ConnectionState::Disconnected);
        }

        account.apply(StateChange::DisconnectRequested, Utc::now());
        self.save(&mut guard, &account).await?;
        tracing::info!(tenant, "Session disconnected");
        Ok(ConnectionState::Disconnected)
    }

    pub async fn get_account(&self, tenant: &str) -> Result<Account> {
        self.store_call("load account", self.inner.store.get_account(tenant))
            .await?
            .ok_or_else(|| TetherError::NotFound(format!("no account for {}", tenant)))
    }

    pub async fn pairing_artifact(&self, tenant: &str) -> Result<String> {
        let account = self.get_account(tenant).await?;
        match (account.state(), account.qr_code) {
            (ConnectionState::Pairing, Some(code)) => Ok(code),
            (state, _) => Err(TetherError::NotAvailable(format!(
                "no pairing code for {} in state {}",
                tenant, state
            ))),
        }
    }

    /// Resolve the tenant's live handle. Never constructs one.
    pub async fn live_session(&self, tenant: &str) -> Result<LiveSession> {
        let slot = self.slot(tenant);
        let session = {
            let guard = slot.lifecycle.lock().await;
            match (&guard.handle, guard.state) {
                (Some(handle), Some(ConnectionState::Connected)) => Some(handle.session.clone()),
                _ => None,
            }
        };
        match session {
            Some(session) => Ok(LiveSession { session, slot }),
            None => Err(TetherError::NotConnected(format!(
                "{} has no connected session",
                tenant
            ))),
        }
    }

    /// Number of tenants with a live handle. Never waits on a tenant lock.
    pub fn live_count(&self) -> usize {
        self.inner.live.load(Ordering::Acquire)
    }

    /// No handle survives a restart: demote persisted live states.
    pub async fn reconcile_on_startup(&self) -> Result<usize> {
        let accounts = self
            .store_call("list accounts", self.inner.store.list_accounts())
            .await?;
        let mut reset = 0;
        for account in accounts {
            if !matches!(
                account.state(),
                ConnectionState::Connecting | ConnectionState::Pairing | ConnectionState::Connected
            ) {
                continue;
            }
            let slot = self.slot(&account.organization_id);
            let mut guard = slot.lifecycle.lock().await;
            if guard.handle.is_some() {
                continue;
            }
            let mut account = account;
            account.apply(StateChange::DisconnectRequested, Utc::now());
            self.save(&mut guard, &account).await?;
            reset += 1;
        }
        if reset > 0 {
            tracing::info!(reset, "Reconciled stale session states to DISCONNECTED");
        }
        Ok(reset)
    }

    /// Disconnect every tenant that has a live handle.
    pub async fn shutdown(&self) {
        let tenants: Vec<String> = self.inner.slots.iter().map(|e| e.key().clone()).collect();
        for tenant in tenants {
            let live = {
                let slot = self.slot(&tenant);
                let guard = slot.lifecycle.lock().await;
                guard.handle.is_some() || guard.reconnecting
            };
            if live {
                if let Err(e) = self.disconnect(&tenant).await {
                    tracing::warn!(tenant = %tenant, error = %e, "Shutdown disconnect failed");
                }
            }
        }
    }

    // ========================================================================
    // Event-driven transitions (called by the Event Translator)
    // ========================================================================

    pub async fn record_pairing(
        &self,
        tenant: &str,
        generation: u64,
        code: String,
    ) -> Result<Option<ConnectionState>> {
        self.apply_event(tenant, generation, StateChange::PairingIssued { code })
            .await
    }

    pub async fn record_connected(
        &self,
        tenant: &str,
        generation: u64,
        phone_number: Option<String>,
        display_name: Option<String>,
        credentials_ref: Option<String>,
    ) -> Result<Option<ConnectionState>> {
        self.apply_event(
            tenant,
            generation,
            StateChange::Connected {
                phone_number,
                display_name,
                credentials_ref,
            },
        )
        .await
    }

    /// Unexpected drop. From `Connected` this starts the automatic reconnect.
    pub async fn record_disconnected(
        &self,
        tenant: &str,
        generation: u64,
    ) -> Result<Option<ConnectionState>> {
        self.apply_event(tenant, generation, StateChange::TransportDropped)
            .await
    }

    pub async fn record_logged_out(
        &self,
        tenant: &str,
        generation: u64,
    ) -> Result<Option<ConnectionState>> {
        self.apply_event(tenant, generation, StateChange::LoggedOut).await
    }

    pub async fn record_failure(
        &self,
        tenant: &str,
        generation: u64,
        detail: String,
    ) -> Result<Option<ConnectionState>> {
        self.apply_event(tenant, generation, StateChange::Failed { detail })
            .await
    }

    /// Persist an inbound message and bump the account's last-seen time.
    pub async fn record_inbound(
        &self,
        tenant: &str,
        generation: u64,
        message_id: String,
        from_jid: String,
        message_text: Option<String>,
        received_at: DateTime<Utc>,
    ) -> Result<()> {
        let slot = self.slot(tenant);
        let mut guard = slot.lifecycle.lock().await;
        if guard.generation != generation {
            tracing::debug!(tenant, generation, "Dropping inbound message from stale handle");
            return Ok(());
        }

        let Some(mut account) = self
            .store_call("load account", self.inner.store.get_account(tenant))
            .await?
        else {
            return Err(TetherError::NotFound(format!("no account for {}", tenant)));
        };

        let message = InboundMessage {
            id: Uuid::new_v4(),
            account_id: account.id,
            organization_id: tenant.to_string(),
            message_id,
            from_jid,
            message_text,
            received_at,
        };
        self.store_call("insert inbound", self.inner.store.insert_inbound(&message))
            .await?;

        account.last_seen = Some(received_at);
        self.save(&mut guard, &account).await
    }

    async fn apply_event(
        &self,
        tenant: &str,
        generation: u64,
        change: StateChange,
    ) -> Result<Option<ConnectionState>> {
        let slot = self.slot(tenant);
        let mut guard = slot.lifecycle.lock().await;
        if guard.generation != generation {
            tracing::debug!(
                tenant,
                generation,
                current = guard.generation,
                trigger = ?change.trigger(),
                "Dropping event from stale handle"
            );
            return Ok(None);
        }

        let Some(mut account) = self
            .store_call("load account", self.inner.store.get_account(tenant))
            .await?
        else {
            return Err(TetherError::NotFound(format!("no account for {}", tenant)));
        };

        let from = account.state();
        let trigger = change.trigger();
        let Some(next) = account.apply(change, Utc::now()) else {
            tracing::warn!(tenant, from = %from, ?trigger, "Transition not in table, event ignored");
            if trigger == Trigger::TransportDropped {
                // The handle is dead even though the state stays put.
                self.retire_locked(tenant, &mut guard);
            }
            return Ok(None);
        };

        self.save(&mut guard, &account).await?;
        tracing::info!(tenant, from = %from, to = %next, ?trigger, "Session state changed");

        match next {
            ConnectionState::Connecting if from == ConnectionState::Connected => {
                // Unexpected drop: discard the dead handle and reconnect.
                self.retire_locked(tenant, &mut guard);
                guard.reconnecting = true;
                self.spawn_reconnect(tenant.to_string(), guard.generation);
            }
            ConnectionState::Disconnected | ConnectionState::Error => {
                self.retire_locked(tenant, &mut guard);
            }
            _ => {}
        }

        Ok(Some(next))
    }

    // ========================================================================
    // Handle bookkeeping (caller holds the tenant lock)
    // ========================================================================

    async fn construct(&self, request: ConnectRequest) -> Result<TransportConnection> {
        let connector = self.inner.connector.clone();
        with_deadline(
            self.inner.session.connect_timeout(),
            "transport connect",
            async move { connector.connect(request).await.map_err(TetherError::from) },
        )
        .await
    }

    fn install_locked(
        &self,
        tenant: &str,
        device_id: &str,
        guard: &mut SlotState,
        connection: TransportConnection,
    ) {
        let generation = guard.bump();
        let previous = guard.handle.replace(LiveHandle {
            session: connection.session,
            device_id: device_id.to_string(),
        });
        if previous.is_none() {
            self.inner.live.fetch_add(1, Ordering::AcqRel);
        }
        guard.reconnecting = false;
        EventTranslator::new(tenant.to_string(), generation, self.clone())
            .spawn(connection.events);
    }

    /// Detach the handle and invalidate its generation. The caller decides
    /// whether to await the transport teardown.
    fn teardown_locked(&self, tenant: &str, guard: &mut SlotState) -> Option<LiveHandle> {
        guard.bump();
        guard.reconnecting = false;
        let handle = guard.handle.take();
        if handle.is_some() {
            self.inner.live.fetch_sub(1, Ordering::AcqRel);
            tracing::debug!(tenant, generation = guard.generation, "Handle detached");
        }
        handle
    }

    /// Detach and tear down in the background; the event path must not wait
    /// on the transport.
    fn retire_locked(&self, tenant: &str, guard: &mut SlotState) {
        if let Some(handle) = self.teardown_locked(tenant, guard) {
            let limit = self.inner.session.teardown_timeout();
            tokio::spawn(async move {
                let _ = tokio::time::timeout(limit, handle.session.disconnect()).await;
            });
        }
    }

    // ========================================================================
    // Automatic reconnect
    // ========================================================================

    fn spawn_reconnect(&self, tenant: String, generation: u64) {
        let manager = self.clone();
        tokio::spawn(async move {
            manager.run_reconnect(tenant, generation).await;
        });
    }

    async fn run_reconnect(&self, tenant: String, generation: u64) {
        let mut attempt = 0usize;

        let result = RetryIf::spawn(
            retry_schedule(&self.inner.retry),
            || {
                attempt += 1;
                self.reconnect_attempt(&tenant, generation, attempt)
            },
            |e: &TetherError| e.is_retryable(),
        )
        .await;

        match result {
            Ok(ReconnectOutcome::Established) => {
                tracing::info!(tenant = %tenant, "Automatic reconnect established a new handle");
            }
            Ok(ReconnectOutcome::Abandoned) => {
                tracing::debug!(tenant = %tenant, "Automatic reconnect abandoned");
            }
            Err(e) => {
                tracing::error!(tenant = %tenant, attempts = attempt, error = %e, "Automatic reconnect failed");
                let detail = format!("reconnect failed after {} attempts: {}", attempt, e.detail());
                if let Err(se) = self.finish_reconnect(&tenant, generation, detail).await {
                    tracing::error!(tenant = %tenant, error = %se, "Failed to persist reconnect failure");
                }
            }
        }
    }

    async fn reconnect_attempt(
        &self,
        tenant: &str,
        generation: u64,
        attempt: usize,
    ) -> Result<ReconnectOutcome> {
        let slot = self.slot(tenant);
        let mut guard = slot.lifecycle.lock().await;
        if guard.generation != generation || !guard.reconnecting || guard.handle.is_some() {
            return Ok(ReconnectOutcome::Abandoned);
        }

        let Some(account) = self
            .store_call("load account", self.inner.store.get_account(tenant))
            .await?
        else {
            return Ok(ReconnectOutcome::Abandoned);
        };

        tracing::info!(tenant, attempt, "Attempting automatic reconnect");
        let request = ConnectRequest {
            organization_id: tenant.to_string(),
            device_id: account.device_id.clone(),
            credentials_ref: account.credentials_ref.clone(),
        };

        let connection = match self.construct(request).await {
            Ok(c) => c,
            Err(e) => {
                tracing::warn!(tenant, attempt, error = %e, "Reconnect attempt failed");
                return Err(e);
            }
        };

        self.install_locked(tenant, &account.device_id, &mut guard, connection);
        Ok(ReconnectOutcome::Established)
    }

    async fn finish_reconnect(&self, tenant: &str, generation: u64, detail: String) -> Result<()> {
        let slot = self.slot(tenant);
        let mut guard = slot.lifecycle.lock().await;
        if guard.generation != generation || !guard.reconnecting {
            return Ok(());
        }
        guard.reconnecting = false;

        let Some(mut account) = self
            .store_call("load account", self.inner.store.get_account(tenant))
            .await?
        else {
            return Ok(());
        };
        if account
            .apply(StateChange::Failed { detail }, Utc::now())
            .is_some()
        {
            self.save(&mut guard, &account).await?;
        }
        Ok(())
    }
}
