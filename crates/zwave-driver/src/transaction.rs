//! Transactions: a scheduled send-and-wait unit.

use std::time::Duration;

use tokio::sync::oneshot;

use zwave_serial::message::payloads::UpdateType;
use zwave_serial::{FunctionType, Message, MessagePayload, MessageType};

use crate::error::TransactionFailure;

/// Scheduling priority, most urgent first. Ordering is significant: the
/// queue pops the smallest value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Priority {
    /// Controller maintenance; preempts everything at the queue boundary.
    Controller,
    /// Interview probes.
    NodeQuery,
    /// Scheduled verification polls.
    Poll,
    Normal,
    /// Commands drained towards a node around its wake-up.
    WakeUp,
}

/// Lifecycle of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionStage {
    Created,
    Queued,
    Sending,
    WaitingForAck,
    WaitingForResponse,
    WaitingForCallback,
    Completed,
    Failed,
}

/// Declarative predicates over inbound messages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageMatcher {
    /// A Response frame for the given function.
    ResponseFor(FunctionType),
    /// A callback Request carrying the given callback id.
    CallbackFor {
        function: FunctionType,
        callback_id: u8,
    },
    /// A terminal ApplicationUpdate for the given node (NIF received, or
    /// the request-failed marker which carries node id 0). Interim update
    /// types do not match.
    NodeUpdateFrom { node_id: u8 },
}

impl MessageMatcher {
    pub fn matches(&self, msg: &Message) -> bool {
        match self {
            MessageMatcher::ResponseFor(function) => {
                msg.msg_type == MessageType::Response && msg.function == *function
            }
            MessageMatcher::CallbackFor {
                function,
                callback_id,
            } => {
                msg.msg_type == MessageType::Request
                    && msg.function == *function
                    && msg.callback_id() == Some(*callback_id)
            }
            MessageMatcher::NodeUpdateFrom { node_id } => {
                if msg.msg_type != MessageType::Request
                    || msg.function != FunctionType::ApplicationUpdate
                {
                    return false;
                }
                match &msg.payload {
                    MessagePayload::ApplicationUpdate(update) => match update.update_type {
                        UpdateType::NodeInfoReceived => update.node_id == *node_id,
                        UpdateType::NodeInfoRequestFailed => true,
                        _ => false,
                    },
                    _ => false,
                }
            }
        }
    }
}

/// The value a finished transaction resolves to: the last relevant message
/// (callback if one was expected, else the response), or `None` for
/// ACK-only sends.
pub type TransactionResult = Result<Option<Message>, TransactionFailure>;

pub type CompletionSender = oneshot::Sender<TransactionResult>;
pub type CompletionReceiver = oneshot::Receiver<TransactionResult>;

/// A queued send-and-wait unit. Owned by the send queue while pending and
/// resolved through its completion channel.
#[derive(Debug)]
pub struct Transaction {
    pub id: u64,
    pub message: Message,
    pub priority: Priority,
    /// The node this transaction addresses, if node-addressed.
    pub target_node: Option<u8>,
    pub expected_response: Option<MessageMatcher>,
    pub expected_callback: Option<MessageMatcher>,
    /// Function-specific override of the callback timeout.
    pub callback_timeout: Option<Duration>,
    pub max_attempts: u8,
    completion: Option<CompletionSender>,
}

impl Transaction {
    pub fn new(message: Message, priority: Priority) -> (Self, CompletionReceiver) {
        let (tx, rx) = oneshot::channel();
        (
            Self {
                id: 0,
                message,
                priority,
                target_node: None,
                expected_response: None,
                expected_callback: None,
                callback_timeout: None,
                max_attempts: 1,
                completion: Some(tx),
            },
            rx,
        )
    }

    /// A transaction whose completion nobody awaits.
    pub fn fire_and_forget(message: Message, priority: Priority) -> Self {
        let (tx, _rx) = Self::new(message, priority);
        tx
    }

    pub fn with_target_node(mut self, node_id: u8) -> Self {
        self.target_node = Some(node_id);
        self
    }

    pub fn with_expected_response(mut self, matcher: MessageMatcher) -> Self {
        self.expected_response = Some(matcher);
        self
    }

    pub fn with_expected_callback(mut self, matcher: MessageMatcher) -> Self {
        self.expected_callback = Some(matcher);
        self
    }

    pub fn with_callback_timeout(mut self, timeout: Duration) -> Self {
        self.callback_timeout = Some(timeout);
        self
    }

    pub fn with_max_attempts(mut self, attempts: u8) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    /// Resolve the completion channel. Dropped receivers are fine.
    pub fn complete(&mut self, result: TransactionResult) {
        if let Some(done) = self.completion.take() {
            let _ = done.send(result);
        }
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        // A transaction dropped without resolution counts as cancelled.
        self.complete(Err(TransactionFailure::Cancelled));
    }
}
