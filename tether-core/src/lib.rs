pub mod config;
pub mod db;
pub mod error;
pub mod ipc;
pub mod models;
pub mod policy;
pub mod store;
pub mod transport;

pub use config::TetherConfig;
pub use error::TetherError;
pub use models::{Account, ConnectionState, MessageKind, OutboundMessage};
pub use store::{create_store, AccountStore, MemoryAccountStore, PgAccountStore};
pub use transport::{
    create_connector, TransportConnector, TransportError, TransportEvent, TransportSession,
};
