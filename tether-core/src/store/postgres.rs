use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use super::AccountStore;
use crate::error::{Result, TetherError};
use crate::models::{Account, InboundMessage, MessageKind, OutboundMessage, ReceiptStatus};

pub struct PgAccountStore {
    pool: PgPool,
}

impl PgAccountStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

const ACCOUNT_COLUMNS: &str = "id, organization_id, device_id, connection_status, qr_code, \
     phone_number, display_name, credentials_ref, last_error, last_seen, created_at, updated_at";

const OUTBOUND_COLUMNS: &str = "id, account_id, organization_id, message_id, to_jid, \
     message_type, message_text, media_url, lead_id, is_sent, error_code, error_message, \
     retry_count, created_at, sent_at, delivered_at, read_at";

#[derive(sqlx::FromRow)]
struct AccountRow {
    id: Uuid,
    organization_id: String,
    device_id: String,
    connection_status: String,
    qr_code: Option<String>,
    phone_number: Option<String>,
    display_name: Option<String>,
    credentials_ref: Option<String>,
    last_error: Option<String>,
    last_seen: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<AccountRow> for Account {
    type Error = TetherError;

    fn try_from(row: AccountRow) -> Result<Self> {
        Ok(Account {
            id: row.id,
            organization_id: row.organization_id,
            device_id: row.device_id,
            connection_status: row.connection_status.parse().map_err(TetherError::Fatal)?,
            qr_code: row.qr_code,
            phone_number: row.phone_number,
            display_name: row.display_name,
            credentials_ref: row.credentials_ref,
            last_error: row.last_error,
            last_seen: row.last_seen,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct OutboundRow {
    id: Uuid,
    account_id: Uuid,
    organization_id: String,
    message_id: Option<String>,
    to_jid: String,
    message_type: String,
    message_text: Option<String>,
    media_url: Option<String>,
    lead_id: Option<String>,
    is_sent: bool,
    error_code: Option<String>,
    error_message: Option<String>,
    retry_count: i32,
    created_at: DateTime<Utc>,
    sent_at: Option<DateTime<Utc>>,
    delivered_at: Option<DateTime<Utc>>,
    read_at: Option<DateTime<Utc>>,
}

impl TryFrom<OutboundRow> for OutboundMessage {
    type Error = TetherError;

    fn try_from(row: OutboundRow) -> Result<Self> {
        Ok(OutboundMessage {
            id: row.id,
            account_id: row.account_id,
            organization_id: row.organization_id,
            message_id: row.message_id,
            to_jid: row.to_jid,
            message_type: row
                .message_type
                .parse::<MessageKind>()
                .map_err(TetherError::Fatal)?,
            message_text: row.message_text,
            media_url: row.media_url,
            lead_id: row.lead_id,
            is_sent: row.is_sent,
            error_code: row.error_code,
            error_message: row.error_message,
            retry_count: row.retry_count,
            created_at: row.created_at,
            sent_at: row.sent_at,
            delivered_at: row.delivered_at,
            read_at: row.read_at,
        })
    }
}

#[async_trait]
impl AccountStore for PgAccountStore {
    async fn get_account(&self, organization_id: &str) -> Result<Option<Account>> {
        let row: Option<AccountRow> = sqlx::query_as(&format!(
            "SELECT {} FROM tether_accounts WHERE organization_id = $1",
            ACCOUNT_COLUMNS
        ))
        .bind(organization_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Account::try_from).transpose()
    }

    async fn create_account(&self, organization_id: &str, device_id: &str) -> Result<Account> {
        let fresh = Account::new(organization_id, device_id);
        sqlx::query(
            r#"
            INSERT INTO tether_accounts
                (id, organization_id, device_id, connection_status, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $5)
            ON CONFLICT (organization_id) DO NOTHING
            "#,
        )
        .bind(fresh.id)
        .bind(organization_id)
        .bind(device_id)
        .bind(fresh.connection_status.as_str())
        .bind(fresh.created_at)
        .execute(&self.pool)
        .await?;

        self.get_account(organization_id).await?.ok_or_else(|| {
            TetherError::Fatal(format!("account {} vanished after insert", organization_id))
        })
    }

    async fn save_account(&self, account: &Account) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE tether_accounts
            SET device_id = $2,
                connection_status = $3,
                qr_code = $4,
                phone_number = $5,
                display_name = $6,
                credentials_ref = $7,
                last_error = $8,
                last_seen = $9,
                updated_at = NOW()
            WHERE organization_id = $1
            "#,
        )
        .bind(&account.organization_id)
        .bind(&account.device_id)
        .bind(account.connection_status.as_str())
        .bind(&account.qr_code)
        .bind(&account.phone_number)
        .bind(&account.display_name)
        .bind(&account.credentials_ref)
        .bind(&account.last_error)
        .bind(account.last_seen)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(TetherError::NotFound(format!(
                "account {} does not exist",
                account.organization_id
            )));
        }
        Ok(())
    }

    async fn list_accounts(&self) -> Result<Vec<Account>> {
        let rows: Vec<AccountRow> = sqlx::query_as(&format!(
            "SELECT {} FROM tether_accounts ORDER BY organization_id",
            ACCOUNT_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Account::try_from).collect()
    }

    async fn insert_outbound(&self, message: &OutboundMessage) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO tether_outbound_messages
                (id, account_id, organization_id, message_id, to_jid, message_type,
                 message_text, media_url, lead_id, is_sent, error_code, error_message,
                 retry_count, created_at, sent_at, delivered_at, read_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17)
            "#,
        )
        .bind(message.id)
        .bind(message.account_id)
        .bind(&message.organization_id)
        .bind(&message.message_id)
        .bind(&message.to_jid)
        .bind(message.message_type.as_str())
        .bind(&message.message_text)
        .bind(&message.media_url)
        .bind(&message.lead_id)
        .bind(message.is_sent)
        .bind(&message.error_code)
        .bind(&message.error_message)
        .bind(message.retry_count)
        .bind(message.created_at)
        .bind(message.sent_at)
        .bind(message.delivered_at)
        .bind(message.read_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn apply_receipt(
        &self,
        message_id: &str,
        status: ReceiptStatus,
        at: DateTime<Utc>,
    ) -> Result<bool> {
        let query = match status {
            ReceiptStatus::Delivered => {
                "UPDATE tether_outbound_messages
                 SET delivered_at = COALESCE(delivered_at, $2)
                 WHERE message_id = $1"
            }
            ReceiptStatus::Read => {
                "UPDATE tether_outbound_messages
                 SET delivered_at = COALESCE(delivered_at, $2),
                     read_at = COALESCE(read_at, $2)
                 WHERE message_id = $1"
            }
        };

        let result = sqlx::query(query)
            .bind(message_id)
            .bind(at)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn list_outbound(
        &self,
        organization_id: &str,
        limit: u32,
    ) -> Result<Vec<OutboundMessage>> {
        let rows: Vec<OutboundRow> = sqlx::query_as(&format!(
            "SELECT {} FROM tether_outbound_messages
             WHERE organization_id = $1
             ORDER BY created_at DESC
             LIMIT $2",
            OUTBOUND_COLUMNS
        ))
        .bind(organization_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(OutboundMessage::try_from).collect()
    }

    async fn insert_inbound(&self, message: &InboundMessage) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO tether_inbound_messages
                (id, account_id, organization_id, message_id, from_jid, message_text, received_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(message.id)
        .bind(message.account_id)
        .bind(&message.organization_id)
        .bind(&message.message_id)
        .bind(&message.from_jid)
        .bind(&message.message_text)
        .bind(message.received_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn health_check(&self) -> Result<String> {
        Ok(crate::db::health_check(&self.pool).await?)
    }

    fn name(&self) -> &str {
        "postgres"
    }
}
