//! Account Store: persisted tenant session state and message records.
//!
//! Two implementations share one contract:
//! - **postgres** — `sqlx` against the `tether_*` tables (see `db.rs`)
//! - **memory** — process-local maps, for development and tests
//!
//! The store performs plain reads and writes. Read-modify-write of an
//! account row is serialized by the caller's per-tenant critical section.

pub mod memory;
pub mod postgres;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::config::DatabaseConfig;
use crate::error::Result;
use crate::models::{Account, InboundMessage, OutboundMessage, ReceiptStatus};

pub use memory::MemoryAccountStore;
pub use postgres::PgAccountStore;

#[async_trait]
pub trait AccountStore: Send + Sync {
    async fn get_account(&self, organization_id: &str) -> Result<Option<Account>>;

    /// Insert a `Disconnected` row for the tenant if none exists and return
    /// the stored row either way.
    async fn create_account(&self, organization_id: &str, device_id: &str) -> Result<Account>;

    /// Write every mutable field of an existing row.
    async fn save_account(&self, account: &Account) -> Result<()>;

    async fn list_accounts(&self) -> Result<Vec<Account>>;

    async fn insert_outbound(&self, message: &OutboundMessage) -> Result<()>;

    /// Record a delivery/read receipt against the row carrying
    /// `message_id`. Returns false when no row matches.
    async fn apply_receipt(
        &self,
        message_id: &str,
        status: ReceiptStatus,
        at: DateTime<Utc>,
    ) -> Result<bool>;

    /// Newest first.
    async fn list_outbound(&self, organization_id: &str, limit: u32)
        -> Result<Vec<OutboundMessage>>;

    async fn insert_inbound(&self, message: &InboundMessage) -> Result<()>;

    /// Backend description for the health endpoint.
    async fn health_check(&self) -> Result<String>;

    /// Store name for logging.
    fn name(&self) -> &str;
}

/// Create the configured store. Postgres connects and ensures the schema.
pub async fn create_store(config: &DatabaseConfig) -> Result<Arc<dyn AccountStore>> {
    match config.backend.as_str() {
        "memory" => Ok(Arc::new(MemoryAccountStore::new())),
        _ => {
            let pool = crate::db::create_pool(config).await?;
            crate::db::ensure_schema(&pool).await?;
            Ok(Arc::new(PgAccountStore::new(pool)))
        }
    }
}
