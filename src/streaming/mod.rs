//! Streaming bridge from a demand-driven cursor to a flow-controlled socket.
//!
//! Items are requested from the source in batches, queued as they arrive,
//! and written to the output channel as one JSON array, one write at a time.
//!
//! # Architecture
//!
//! ```text
//!                 request(batch)                      submit(bytes)
//! +--------------+ <------------ +------------+  +--------------+ ----------> +---------------+
//! |  Publisher   |               | Subscriber |  |    Writer    |             | OutputChannel |
//! | (query data) | ------------> |  (queue +  |  | (drain/frame |             |   (socket)    |
//! +--------------+  on_item ...  |  increment)|  |  /encode)    | <---------- +---------------+
//!                                +------------+  +--------------+  completion
//!                                       \             /
//!                                        v           v
//!                                    +-----------------+
//!                                    |    StateCell    |
//!                                    | (single owner of|
//!                                    |  the write slot)|
//!                                    +-----------------+
//! ```
//!
//! Output is always one JSON array: `[`, items separated by `,`, `]`.
//! A failed response stops mid-array and the connection is closed, so the
//! missing `]` tells the client the result is incomplete.

pub mod channel;
pub mod encoder;
pub mod framing;
pub mod pipeline;
pub mod queue;
pub mod source;
pub mod state;
mod subscriber;
mod writer;

pub use channel::{OutputChannel, WriteCompletion, WriteOutcome, WriterChannel};
pub use encoder::{encode_item, Item, ItemEncoder, JsonEncoder};
pub use framing::Framing;
pub use pipeline::{BridgeHandle, Completion, StreamBridge, StreamSummary};
pub use queue::PendingQueue;
pub use source::{Publisher, StreamSource, Subscriber, Subscription};
pub use state::{Phase, Snapshot, StateCell};
