//! The Z-Wave host driver core.
//!
//! One logical scheduler owns the serial transport, the priority send
//! queue, the node arena, and the ValueDB. Applications enqueue work via
//! the [`DriverApi`] handle and observe state through the event stream;
//! concurrent mutation of driver state from outside is not possible.

pub mod cc_values;
pub mod config;
pub mod driver;
pub mod error;
pub mod events;
pub mod fsm;
pub mod interview;
pub mod logging;
pub mod node;
pub mod queue;
pub mod storage;
pub mod transaction;
pub mod transport;
pub mod value_db;

pub use config::DriverConfig;
pub use driver::{Driver, DriverApi, NodeSummary};
pub use error::{DriverError, TransactionFailure};
pub use events::DriverEvent;
pub use interview::InterviewStage;
pub use node::Node;
pub use transaction::{MessageMatcher, Priority, TransactionStage};
pub use transport::{MockHandle, MockTransport, SerialTransport, TransportError, TransportEvent};
pub use value_db::{Value, ValueDB, ValueEvent, ValueId, ValueKind, ValueMetadata};
