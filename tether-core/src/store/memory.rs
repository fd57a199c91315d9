use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use super::AccountStore;
use crate::error::{Result, TetherError};
use crate::models::{Account, InboundMessage, OutboundMessage, ReceiptStatus};

#[derive(Default)]
pub struct MemoryAccountStore {
    accounts: RwLock<HashMap<String, Account>>,
    outbound: RwLock<Vec<OutboundMessage>>,
    inbound: RwLock<Vec<InboundMessage>>,
}

impl MemoryAccountStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every recorded inbound message, oldest first.
    pub async fn inbound_messages(&self) -> Vec<InboundMessage> {
        self.inbound.read().await.clone()
    }
}

#[async_trait]
impl AccountStore for MemoryAccountStore {
    async fn get_account(&self, organization_id: &str) -> Result<Option<Account>> {
        Ok(self.accounts.read().await.get(organization_id).cloned())
    }

    async fn create_account(&self, organization_id: &str, device_id: &str) -> Result<Account> {
        let mut accounts = self.accounts.write().await;
        let account = accounts
            .entry(organization_id.to_string())
            .or_insert_with(|| Account::new(organization_id, device_id));
        Ok(account.clone())
    }

    async fn save_account(&self, account: &Account) -> Result<()> {
        let mut accounts = self.accounts.write().await;
        match accounts.get_mut(&account.organization_id) {
            Some(existing) => {
                let mut updated = account.clone();
                updated.id = existing.id;
                updated.created_at = existing.created_at;
                updated.updated_at = Utc::now();
                *existing = updated;
                Ok(())
            }
            None => Err(TetherError::NotFound(format!(
                "account {} does not exist",
                account.organization_id
            ))),
        }
    }

    async fn list_accounts(&self) -> Result<Vec<Account>> {
        let mut accounts: Vec<Account> = self.accounts.read().await.values().cloned().collect();
        accounts.sort_by(|a, b| a.organization_id.cmp(&b.organization_id));
        Ok(accounts)
    }

    async fn insert_outbound(&self, message: &OutboundMessage) -> Result<()> {
        let mut outbound = self.outbound.write().await;
        if let Some(id) = &message.message_id {
            if outbound.iter().any(|m| m.message_id.as_ref() == Some(id)) {
                return Err(TetherError::Fatal(format!(
                    "duplicate protocol message id {}",
                    id
                )));
            }
        }
        outbound.push(message.clone());
        Ok(())
    }

    async fn apply_receipt(
        &self,
        message_id: &str,
        status: ReceiptStatus,
        at: DateTime<Utc>,
    ) -> Result<bool> {
        let mut outbound = self.outbound.write().await;
        let Some(row) = outbound
            .iter_mut()
            .find(|m| m.message_id.as_deref() == Some(message_id))
        else {
            return Ok(false);
        };

        match status {
            ReceiptStatus::Delivered => {
                row.delivered_at.get_or_insert(at);
            }
            ReceiptStatus::Read => {
                row.delivered_at.get_or_insert(at);
                row.read_at.get_or_insert(at);
            }
        }
        Ok(true)
    }

    async fn list_outbound(
        &self,
        organization_id: &str,
        limit: u32,
    ) -> Result<Vec<OutboundMessage>> {
        let outbound = self.outbound.read().await;
        Ok(outbound
            .iter()
            .rev()
            .filter(|m| m.organization_id == organization_id)
            .take(limit as usize)
            .cloned()
            .collect())
    }

    async fn insert_inbound(&self, message: &InboundMessage) -> Result<()> {
        self.inbound.write().await.push(message.clone());
        Ok(())
    }

    async fn health_check(&self) -> Result<String> {
        let accounts = self.accounts.read().await.len();
        Ok(format!("in-memory store ({} accounts)", accounts))
    }

    fn name(&self) -> &str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ConnectionState, MessageKind, StateChange};
    use uuid::Uuid;

    fn outbound(org: &str, account_id: Uuid, message_id: Option<&str>) -> OutboundMessage {
        OutboundMessage {
            id: Uuid::new_v4(),
            account_id,
            organization_id: org.to_string(),
            message_id: message_id.map(str::to_string),
            to_jid: "1555@s.whatsapp.net".into(),
            message_type: MessageKind::Text,
            message_text: Some("hi".into()),
            media_url: None,
            lead_id: None,
            is_sent: message_id.is_some(),
            error_code: None,
            error_message: None,
            retry_count: 0,
            created_at: Utc::now(),
            sent_at: None,
            delivered_at: None,
            read_at: None,
        }
    }

    #[tokio::test]
    async fn test_create_account_is_insert_if_absent() {
        let store = MemoryAccountStore::new();
        let first = store.create_account("org1", "dev1").await.unwrap();
        let second = store.create_account("org1", "dev2").await.unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(second.device_id, "dev1");
        assert_eq!(store.list_accounts().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_save_account_persists_transition() {
        let store = MemoryAccountStore::new();
        let mut account = store.create_account("org1", "dev1").await.unwrap();
        account.apply(
            StateChange::ConnectRequested { device_id: "dev1".into() },
            Utc::now(),
        );
        store.save_account(&account).await.unwrap();

        let stored = store.get_account("org1").await.unwrap().unwrap();
        assert_eq!(stored.state(), ConnectionState::Connecting);
    }

    #[tokio::test]
    async fn test_save_unknown_account_fails() {
        let store = MemoryAccountStore::new();
        let account = Account::new("ghost", "dev1");
        assert!(matches!(
            store.save_account(&account).await,
            Err(TetherError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_protocol_message_id_is_unique() {
        let store = MemoryAccountStore::new();
        let account = store.create_account("org1", "dev1").await.unwrap();

        store.insert_outbound(&outbound("org1", account.id, Some("3EB0A"))).await.unwrap();
        store.insert_outbound(&outbound("org1", account.id, None)).await.unwrap();
        store.insert_outbound(&outbound("org1", account.id, None)).await.unwrap();
        assert!(store
            .insert_outbound(&outbound("org1", account.id, Some("3EB0A")))
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_read_receipt_implies_delivery() {
        let store = MemoryAccountStore::new();
        let account = store.create_account("org1", "dev1").await.unwrap();
        store.insert_outbound(&outbound("org1", account.id, Some("3EB0B"))).await.unwrap();

        let at = Utc::now();
        assert!(store.apply_receipt("3EB0B", ReceiptStatus::Read, at).await.unwrap());
        assert!(!store.apply_receipt("missing", ReceiptStatus::Read, at).await.unwrap());

        let rows = store.list_outbound("org1", 10).await.unwrap();
        assert_eq!(rows[0].delivered_at, Some(at));
        assert_eq!(rows[0].read_at, Some(at));
    }

    #[tokio::test]
    async fn test_list_outbound_newest_first_and_scoped() {
        let store = MemoryAccountStore::new();
        let a = store.create_account("org1", "dev1").await.unwrap();
        let b = store.create_account("org2", "dev1").await.unwrap();
        store.insert_outbound(&outbound("org1", a.id, Some("1"))).await.unwrap();
        store.insert_outbound(&outbound("org2", b.id, Some("2"))).await.unwrap();
        store.insert_outbound(&outbound("org1", a.id, Some("3"))).await.unwrap();

        let rows = store.list_outbound("org1", 10).await.unwrap();
        let ids: Vec<_> = rows.iter().filter_map(|m| m.message_id.as_deref()).collect();
        assert_eq!(ids, vec!["3", "1"]);
        assert_eq!(store.list_outbound("org1", 1).await.unwrap().len(), 1);
    }
}
