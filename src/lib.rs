//! cursor-stream: stream a demand-driven query cursor to a flow-controlled
//! socket as one JSON array, without ever holding the full result set.

pub mod config;
pub mod error;
pub mod server;
pub mod streaming;

pub use config::{BridgeConfig, HttpVersion, KeepAlive};
pub use error::{BridgeError, EncodeError, Result, SourceError};
pub use streaming::{
    BridgeHandle, Completion, Item, ItemEncoder, JsonEncoder, OutputChannel, Publisher,
    StreamBridge, StreamSource, StreamSummary, Subscriber, Subscription, WriteOutcome,
    WriterChannel,
};
