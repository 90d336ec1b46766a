//! Events delivered to applications.

use crate::interview::InterviewStage;
use crate::value_db::ValueEvent;

/// The driver's outward event stream. Events carry ids and new/previous
/// values only; applications read details through the API.
#[derive(Debug, Clone, PartialEq)]
pub enum DriverEvent {
    /// Controller identified and the node list restored.
    Ready { home_id: u32, own_node_id: u8 },
    NodeAdded { node_id: u8 },
    NodeRemoved { node_id: u8 },
    InterviewStageChanged {
        node_id: u8,
        stage: InterviewStage,
    },
    /// The node exhausted its interview retries.
    NodeDead { node_id: u8 },
    /// A sleeping node announced wakefulness.
    NodeAwake { node_id: u8 },
    /// Value or metadata change from the ValueDB.
    Value(ValueEvent),
    /// A non-recoverable driver error; the driver is stopping.
    Error(String),
}
