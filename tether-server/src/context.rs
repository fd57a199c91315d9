use std::sync::Arc;

use tether_core::policy::with_deadline;
use tether_core::{AccountStore, TetherConfig, TetherError, TransportConnector};

use crate::subsystems::dispatch::OutboundDispatcher;
use crate::subsystems::session::SessionManager;

/// Everything a request handler needs, shared by the IPC and HTTP fronts.
#[derive(Clone)]
pub struct AppContext {
    pub config: TetherConfig,
    pub store: Arc<dyn AccountStore>,
    pub sessions: SessionManager,
    pub dispatcher: OutboundDispatcher,
}

impl AppContext {
    pub fn new(
        config: TetherConfig,
        store: Arc<dyn AccountStore>,
        connector: Arc<dyn TransportConnector>,
    ) -> Self {
        let sessions = SessionManager::new(
            store.clone(),
            connector,
            config.session.clone(),
            config.retry.clone(),
        );
        let dispatcher = OutboundDispatcher::new(
            sessions.clone(),
            store.clone(),
            config.session.clone(),
            config.retry.clone(),
        );
        Self {
            config,
            store,
            sessions,
            dispatcher,
        }
    }

    /// Build the store and transport named in the config.
    pub async fn from_config(config: TetherConfig) -> anyhow::Result<Self> {
        let store = tether_core::create_store(&config.database).await?;
        let connector = tether_core::create_connector(&config.transport)?;
        tracing::info!(
            store = store.name(),
            transport = connector.name(),
            "Backends ready"
        );
        Ok(Self::new(config, store, connector))
    }

    /// Store reachability, bounded by the store deadline.
    pub async fn store_health(&self) -> Result<String, TetherError> {
        with_deadline(
            self.config.session.store_timeout(),
            "store health check",
            self.store.health_check(),
        )
        .await
    }
}
