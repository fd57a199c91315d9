use crate::config::DatabaseConfig;
use sqlx::{postgres::PgPoolOptions, PgPool};

pub async fn create_pool(config: &DatabaseConfig) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(config.max_connections)
        .connect(&config.url)
        .await
}

pub async fn health_check(pool: &PgPool) -> Result<String, sqlx::Error> {
    let row: (String,) = sqlx::query_as("SELECT version()").fetch_one(pool).await?;
    Ok(row.0)
}

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS tether_accounts (
        id UUID PRIMARY KEY,
        organization_id TEXT NOT NULL UNIQUE,
        device_id TEXT NOT NULL,
        connection_status TEXT NOT NULL,
        qr_code TEXT,
        phone_number TEXT,
        display_name TEXT,
        credentials_ref TEXT,
        last_error TEXT,
        last_seen TIMESTAMPTZ,
        created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS tether_outbound_messages (
        id UUID PRIMARY KEY,
        account_id UUID NOT NULL REFERENCES tether_accounts(id),
        organization_id TEXT NOT NULL,
        message_id TEXT,
        to_jid TEXT NOT NULL,
        message_type TEXT NOT NULL,
        message_text TEXT,
        media_url TEXT,
        lead_id TEXT,
        is_sent BOOLEAN NOT NULL,
        error_code TEXT,
        error_message TEXT,
        retry_count INTEGER NOT NULL DEFAULT 0,
        created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        sent_at TIMESTAMPTZ,
        delivered_at TIMESTAMPTZ,
        read_at TIMESTAMPTZ
    )
    "#,
    r#"
    CREATE UNIQUE INDEX IF NOT EXISTS tether_outbound_messages_message_id
        ON tether_outbound_messages (message_id)
        WHERE message_id IS NOT NULL
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS tether_outbound_messages_org_created
        ON tether_outbound_messages (organization_id, created_at DESC)
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS tether_inbound_messages (
        id UUID PRIMARY KEY,
        account_id UUID NOT NULL REFERENCES tether_accounts(id),
        organization_id TEXT NOT NULL,
        message_id TEXT NOT NULL,
        from_jid TEXT NOT NULL,
        message_text TEXT,
        received_at TIMESTAMPTZ NOT NULL
    )
    "#,
];

/// Create the tables this service owns if they are missing.
pub async fn ensure_schema(pool: &PgPool) -> Result<(), sqlx::Error> {
    for statement in SCHEMA {
        sqlx::query(statement).execute(pool).await?;
    }
    Ok(())
}
