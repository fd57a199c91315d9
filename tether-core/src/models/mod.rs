pub mod account;
pub mod message;

pub use account::{Account, ConnectionState, StateChange, Trigger};
pub use message::{
    InboundMessage, MessageKind, OutboundMessage, OutboundPayload, ReceiptStatus,
};
