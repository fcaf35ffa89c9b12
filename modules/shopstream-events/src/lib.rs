//! Durable event log plumbing: publish with delivery confirmation, and a
//! per-process dispatcher that routes consumed messages to handlers and
//! commits positions only after a handler succeeds.
//!
//! Two log backends ship here: `MemoryLog` (in-process, used by tests and
//! the single-process deployment) and `PgLog` (Postgres tables).

pub mod dispatcher;
pub mod error;
pub mod handler;
pub mod instrument;
pub mod memory;
pub mod postgres;
pub mod publisher;
pub mod transport;
pub mod types;

pub use dispatcher::{
    DispatchStats, Dispatched, Dispatcher, DispatcherConfig, DispatcherState,
};
pub use error::{DispatchError, HandlerError, PublishError, TransportError};
pub use handler::{EventHandler, HandlerBindings};
pub use instrument::Instrumented;
pub use memory::{MemoryConsumer, MemoryLog, MemoryProducer};
pub use postgres::{PgConsumer, PgLog, PgProducer};
pub use publisher::Publisher;
pub use transport::{LogConsumer, LogProducer};
pub use types::{DeliveryReport, LogMessage, TopicPartition};
