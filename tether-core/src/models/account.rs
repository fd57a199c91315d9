use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Pairing,
    Connected,
    Error,
}

impl ConnectionState {
    pub const ALL: [ConnectionState; 5] = [
        ConnectionState::Disconnected,
        ConnectionState::Connecting,
        ConnectionState::Pairing,
        ConnectionState::Connected,
        ConnectionState::Error,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "DISCONNECTED",
            ConnectionState::Connecting => "CONNECTING",
            ConnectionState::Pairing => "PAIRING",
            ConnectionState::Connected => "CONNECTED",
            ConnectionState::Error => "ERROR",
        }
    }

    /// The lifecycle transition table. `None` means the pair is not listed:
    /// the caller leaves the state unchanged and logs the event.
    pub fn on(self, trigger: Trigger) -> Option<ConnectionState> {
        use ConnectionState::*;
        match (self, trigger) {
            (_, Trigger::LoggedOut) | (_, Trigger::DisconnectRequested) => Some(Disconnected),
            (_, Trigger::Failed) => Some(Error),
            (Disconnected | Error, Trigger::ConnectRequested) => Some(Connecting),
            // Pairing codes rotate while waiting for a scan.
            (Connecting | Pairing, Trigger::PairingIssued) => Some(Pairing),
            (Connecting | Pairing, Trigger::Connected) => Some(Connected),
            (Connected, Trigger::TransportDropped) => Some(Connecting),
            _ => None,
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConnectionState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "DISCONNECTED" => Ok(ConnectionState::Disconnected),
            "CONNECTING" => Ok(ConnectionState::Connecting),
            "PAIRING" => Ok(ConnectionState::Pairing),
            "CONNECTED" => Ok(ConnectionState::Connected),
            "ERROR" => Ok(ConnectionState::Error),
            other => Err(format!("unknown connection state: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    ConnectRequested,
    PairingIssued,
    Connected,
    TransportDropped,
    LoggedOut,
    DisconnectRequested,
    Failed,
}

/// A trigger together with the data it writes into the account row.
#[derive(Debug, Clone, PartialEq)]
pub enum StateChange {
    ConnectRequested {
        device_id: String,
    },
    PairingIssued {
        code: String,
    },
    Connected {
        phone_number: Option<String>,
        display_name: Option<String>,
        credentials_ref: Option<String>,
    },
    TransportDropped,
    LoggedOut,
    DisconnectRequested,
    Failed {
        detail: String,
    },
}

impl StateChange {
    pub fn trigger(&self) -> Trigger {
        match self {
            StateChange::ConnectRequested { .. } => Trigger::ConnectRequested,
            StateChange::PairingIssued { .. } => Trigger::PairingIssued,
            StateChange::Connected { .. } => Trigger::Connected,
            StateChange::TransportDropped => Trigger::TransportDropped,
            StateChange::LoggedOut => Trigger::LoggedOut,
            StateChange::DisconnectRequested => Trigger::DisconnectRequested,
            StateChange::Failed { .. } => Trigger::Failed,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Account {
    pub id: Uuid,
    pub organization_id: String,
    pub device_id: String,
    pub connection_status: ConnectionState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub qr_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone_number: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(skip_serializing)]
    pub credentials_ref: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_seen: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Account {
    pub fn new(organization_id: &str, device_id: &str) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            organization_id: organization_id.to_string(),
            device_id: device_id.to_string(),
            connection_status: ConnectionState::Disconnected,
            qr_code: None,
            phone_number: None,
            display_name: None,
            credentials_ref: None,
            last_error: None,
            last_seen: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.connection_status
    }

    pub fn is_connected(&self) -> bool {
        self.connection_status == ConnectionState::Connected
    }

    pub fn is_paired(&self) -> bool {
        self.credentials_ref.is_some()
    }

    /// Apply a state change if the transition table allows it, keeping the
    /// pairing artifact and connection metadata consistent with the new state.
    /// Returns the new state, or `None` if the change was rejected.
    pub fn apply(&mut self, change: StateChange, now: DateTime<Utc>) -> Option<ConnectionState> {
        let next = self.connection_status.on(change.trigger())?;

        match change {
            StateChange::ConnectRequested { device_id } => {
                self.device_id = device_id;
                self.qr_code = None;
                self.last_error = None;
            }
            StateChange::PairingIssued { code } => {
                self.qr_code = Some(code);
            }
            StateChange::Connected {
                phone_number,
                display_name,
                credentials_ref,
            } => {
                self.qr_code = None;
                self.last_error = None;
                if phone_number.is_some() {
                    self.phone_number = phone_number;
                }
                if display_name.is_some() {
                    self.display_name = display_name;
                }
                if credentials_ref.is_some() {
                    self.credentials_ref = credentials_ref;
                }
                self.last_seen = Some(now);
            }
            StateChange::TransportDropped | StateChange::DisconnectRequested => {
                self.qr_code = None;
            }
            StateChange::LoggedOut => {
                self.qr_code = None;
                self.credentials_ref = None;
            }
            StateChange::Failed { detail } => {
                self.qr_code = None;
                self.last_error = Some(detail);
            }
        }

        self.connection_status = next;
        self.updated_at = now;
        Some(next)
    }

    /// Pairing artifact present only in `Pairing`; `Connected` implies
    /// connection metadata.
    pub fn is_consistent(&self) -> bool {
        let pairing_ok =
            self.qr_code.is_some() == (self.connection_status == ConnectionState::Pairing);
        let metadata_ok =
            self.connection_status != ConnectionState::Connected || self.phone_number.is_some();
        pairing_ok && metadata_ok
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TRIGGERS: [Trigger; 7] = [
        Trigger::ConnectRequested,
        Trigger::PairingIssued,
        Trigger::Connected,
        Trigger::TransportDropped,
        Trigger::LoggedOut,
        Trigger::DisconnectRequested,
        Trigger::Failed,
    ];

    fn listed(from: ConnectionState, trigger: Trigger) -> Option<ConnectionState> {
        use ConnectionState::*;
        match (from, trigger) {
            (Disconnected, Trigger::ConnectRequested) => Some(Connecting),
            (Error, Trigger::ConnectRequested) => Some(Connecting),
            (Connecting, Trigger::PairingIssued) => Some(Pairing),
            (Pairing, Trigger::PairingIssued) => Some(Pairing),
            (Connecting, Trigger::Connected) => Some(Connected),
            (Pairing, Trigger::Connected) => Some(Connected),
            (Connected, Trigger::TransportDropped) => Some(Connecting),
            (_, Trigger::LoggedOut) => Some(Disconnected),
            (_, Trigger::DisconnectRequested) => Some(Disconnected),
            (_, Trigger::Failed) => Some(Error),
            _ => None,
        }
    }

    #[test]
    fn test_transition_table_is_exhaustive_and_deterministic() {
        for state in ConnectionState::ALL {
            for trigger in TRIGGERS {
                assert_eq!(
                    state.on(trigger),
                    listed(state, trigger),
                    "unexpected transition for ({:?}, {:?})",
                    state,
                    trigger
                );
                // Same input, same answer.
                assert_eq!(state.on(trigger), state.on(trigger));
            }
        }
    }

    #[test]
    fn test_unlisted_pairs_rejected() {
        assert_eq!(ConnectionState::Connected.on(Trigger::ConnectRequested), None);
        assert_eq!(ConnectionState::Disconnected.on(Trigger::PairingIssued), None);
        assert_eq!(ConnectionState::Disconnected.on(Trigger::Connected), None);
        assert_eq!(ConnectionState::Pairing.on(Trigger::TransportDropped), None);
        assert_eq!(ConnectionState::Connected.on(Trigger::Connected), None);
    }

    #[test]
    fn test_state_string_roundtrip() {
        for state in ConnectionState::ALL {
            assert_eq!(state.as_str().parse::<ConnectionState>(), Ok(state));
        }
        assert!("PAIRED".parse::<ConnectionState>().is_err());
    }

    #[test]
    fn test_pairing_then_connected_clears_artifact() {
        let mut account = Account::new("org1", "dev1");
        let now = Utc::now();

        account.apply(StateChange::ConnectRequested { device_id: "dev1".into() }, now);
        account.apply(StateChange::PairingIssued { code: "ABC123".into() }, now);
        assert_eq!(account.qr_code.as_deref(), Some("ABC123"));
        assert!(account.is_consistent());

        let next = account.apply(
            StateChange::Connected {
                phone_number: Some("+15551234567".into()),
                display_name: Some("Alice".into()),
                credentials_ref: Some("dev1:store".into()),
            },
            now,
        );
        assert_eq!(next, Some(ConnectionState::Connected));
        assert!(account.qr_code.is_none());
        assert_eq!(account.phone_number.as_deref(), Some("+15551234567"));
        assert!(account.is_paired());
        assert!(account.is_consistent());
    }

    #[test]
    fn test_rejected_change_leaves_row_untouched() {
        let mut account = Account::new("org1", "dev1");
        let before = account.clone();

        let next = account.apply(StateChange::PairingIssued { code: "X".into() }, Utc::now());

        assert_eq!(next, None);
        assert_eq!(account, before);
    }

    #[test]
    fn test_logged_out_purges_credentials_and_artifact() {
        let mut account = Account::new("org1", "dev1");
        let now = Utc::now();
        account.apply(StateChange::ConnectRequested { device_id: "dev1".into() }, now);
        account.apply(StateChange::PairingIssued { code: "ABC".into() }, now);
        account.credentials_ref = Some("creds".into());

        account.apply(StateChange::LoggedOut, now);

        assert_eq!(account.state(), ConnectionState::Disconnected);
        assert!(account.qr_code.is_none());
        assert!(account.credentials_ref.is_none());
        assert!(account.is_consistent());
    }

    #[test]
    fn test_failure_records_detail_and_reconnect_clears_it() {
        let mut account = Account::new("org1", "dev1");
        let now = Utc::now();
        account.apply(StateChange::Failed { detail: "handshake rejected".into() }, now);
        assert_eq!(account.state(), ConnectionState::Error);
        assert_eq!(account.last_error.as_deref(), Some("handshake rejected"));

        account.apply(StateChange::ConnectRequested { device_id: "dev2".into() }, now);
        assert_eq!(account.state(), ConnectionState::Connecting);
        assert_eq!(account.device_id, "dev2");
        assert!(account.last_error.is_none());
    }

    #[test]
    fn test_account_json_hides_credentials() {
        let mut account = Account::new("org1", "dev1");
        account.credentials_ref = Some("secret".into());
        let json = serde_json::to_value(&account).unwrap();

        assert_eq!(json["organizationId"], "org1");
        assert_eq!(json["connectionStatus"], "DISCONNECTED");
        assert!(json.get("credentialsRef").is_none());
    }
}
