//! Chunked, acknowledged message exchange over a poll-driven
//! command/response link, with an emulated NDEF tag on the target side.

pub mod chunk;
pub mod client;
pub mod config;
pub mod dispatcher;
pub mod envelope;
pub mod events;
pub mod ndef;
pub mod protocol;
pub mod server;
pub mod supervisor;
pub mod transport;

pub use config::{BridgeConfig, TransferConfig};
pub use dispatcher::CommandDispatcher;
pub use envelope::{Delivery, MessageEnvelope};
pub use events::{EventSink, TransferEvent};
pub use supervisor::{Role, TransferSupervisor};
