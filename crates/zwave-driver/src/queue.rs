//! The priority send queue.
//!
//! One logical queue, ordered by priority and stable within a priority via
//! the enqueue sequence number. Transactions addressing sleeping nodes are
//! parked in per-node pending sets and only become visible to the global
//! queue once the node signals wakefulness.

use std::collections::{BTreeMap, HashMap, VecDeque};

use crate::transaction::Transaction;

/// Ordering key: priority first, enqueue order second.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct QueueKey {
    priority: crate::transaction::Priority,
    seq: u64,
}

/// The send queue plus per-node wake-up pending sets.
#[derive(Debug, Default)]
pub struct SendQueue {
    ready: BTreeMap<QueueKey, Transaction>,
    parked: HashMap<u8, VecDeque<Transaction>>,
    next_seq: u64,
}

impl SendQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_seq(&mut self) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        seq
    }

    /// Enqueue a transaction. `park` holds it for the target node's next
    /// wake-up instead of making it immediately sendable.
    pub fn push(&mut self, transaction: Transaction, park: bool) {
        let seq = self.next_seq();
        match (park, transaction.target_node) {
            (true, Some(node_id)) => {
                self.parked.entry(node_id).or_default().push_back(transaction);
            }
            _ => {
                let key = QueueKey {
                    priority: transaction.priority,
                    seq,
                };
                self.ready.insert(key, transaction);
            }
        }
    }

    /// Park a transaction that already ran (SendData NoAck against a
    /// sleeping node). It keeps its place at the front of the node's set.
    pub fn park_front(&mut self, node_id: u8, transaction: Transaction) {
        self.parked.entry(node_id).or_default().push_front(transaction);
    }

    /// Select the most urgent sendable transaction.
    pub fn pop_ready(&mut self) -> Option<Transaction> {
        let key = *self.ready.keys().next()?;
        self.ready.remove(&key)
    }

    /// Release a node's parked transactions into the ready queue,
    /// preserving their enqueue order. Returns how many were released.
    pub fn wake_node(&mut self, node_id: u8) -> usize {
        let Some(pending) = self.parked.remove(&node_id) else {
            return 0;
        };
        let count = pending.len();
        for transaction in pending {
            // Re-sequence to keep FIFO order relative to each other while
            // honoring priorities already in the ready queue.
            let seq = self.next_seq();
            let key = QueueKey {
                priority: transaction.priority,
                seq,
            };
            self.ready.insert(key, transaction);
        }
        count
    }

    /// Whether anything is parked for this node.
    pub fn has_parked(&self, node_id: u8) -> bool {
        self.parked.get(&node_id).is_some_and(|q| !q.is_empty())
    }

    /// Whether anything in the ready queue addresses this node.
    pub fn has_ready_for(&self, node_id: u8) -> bool {
        self.ready
            .values()
            .any(|t| t.target_node == Some(node_id))
    }

    /// Remove a not-yet-sent transaction by id (cancellation).
    pub fn cancel(&mut self, id: u64) -> Option<Transaction> {
        if let Some(key) = self
            .ready
            .iter()
            .find(|(_, t)| t.id == id)
            .map(|(k, _)| *k)
        {
            return self.ready.remove(&key);
        }
        for pending in self.parked.values_mut() {
            if let Some(pos) = pending.iter().position(|t| t.id == id) {
                return pending.remove(pos);
            }
        }
        None
    }

    /// Take everything, ready and parked (driver shutdown).
    pub fn drain_all(&mut self) -> Vec<Transaction> {
        let mut all: Vec<Transaction> = std::mem::take(&mut self.ready)
            .into_values()
            .collect();
        for (_, pending) in std::mem::take(&mut self.parked) {
            all.extend(pending);
        }
        all
    }

    pub fn ready_len(&self) -> usize {
        self.ready.len()
    }

    pub fn is_idle(&self) -> bool {
        self.ready.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transaction::Priority;
    use zwave_serial::{FunctionType, Message, MessagePayload};

    fn make_tx(priority: Priority, id: u64) -> Transaction {
        let msg = Message::request(
            FunctionType::GetControllerVersion,
            MessagePayload::GetControllerVersionRequest,
        );
        let mut tx = Transaction::fire_and_forget(msg, priority);
        tx.id = id;
        tx
    }

    fn make_node_tx(priority: Priority, id: u64, node_id: u8) -> Transaction {
        make_tx(priority, id).with_target_node(node_id)
    }

    #[test]
    fn priority_wins_over_enqueue_order() {
        let mut queue = SendQueue::new();
        queue.push(make_tx(Priority::Normal, 1), false);
        queue.push(make_tx(Priority::Controller, 2), false);

        assert_eq!(queue.pop_ready().unwrap().id, 2);
        assert_eq!(queue.pop_ready().unwrap().id, 1);
        assert!(queue.pop_ready().is_none());
    }

    #[test]
    fn stable_within_priority() {
        let mut queue = SendQueue::new();
        for id in 1..=4 {
            queue.push(make_tx(Priority::Normal, id), false);
        }
        for id in 1..=4 {
            assert_eq!(queue.pop_ready().unwrap().id, id);
        }
    }

    #[test]
    fn parked_transactions_invisible_until_wake() {
        let mut queue = SendQueue::new();
        queue.push(make_node_tx(Priority::WakeUp, 1, 9), true);
        assert!(queue.pop_ready().is_none());
        assert!(queue.has_parked(9));

        assert_eq!(queue.wake_node(9), 1);
        assert!(!queue.has_parked(9));
        assert_eq!(queue.pop_ready().unwrap().id, 1);
    }

    #[test]
    fn wake_preserves_enqueue_order() {
        let mut queue = SendQueue::new();
        queue.push(make_node_tx(Priority::WakeUp, 1, 9), true);
        queue.push(make_node_tx(Priority::WakeUp, 2, 9), true);
        queue.push(make_node_tx(Priority::WakeUp, 3, 9), true);
        queue.wake_node(9);
        for id in 1..=3 {
            assert_eq!(queue.pop_ready().unwrap().id, id);
        }
    }

    #[test]
    fn wake_of_unknown_node_is_noop() {
        let mut queue = SendQueue::new();
        assert_eq!(queue.wake_node(42), 0);
    }

    #[test]
    fn park_front_keeps_head_position() {
        let mut queue = SendQueue::new();
        queue.push(make_node_tx(Priority::WakeUp, 2, 9), true);
        queue.park_front(9, make_node_tx(Priority::WakeUp, 1, 9));
        queue.wake_node(9);
        assert_eq!(queue.pop_ready().unwrap().id, 1);
        assert_eq!(queue.pop_ready().unwrap().id, 2);
    }

    #[test]
    fn cancel_from_ready_and_parked() {
        let mut queue = SendQueue::new();
        queue.push(make_tx(Priority::Normal, 1), false);
        queue.push(make_node_tx(Priority::WakeUp, 2, 9), true);

        assert_eq!(queue.cancel(1).unwrap().id, 1);
        assert_eq!(queue.cancel(2).unwrap().id, 2);
        assert!(queue.cancel(3).is_none());
        assert!(queue.is_idle());
        assert!(!queue.has_parked(9));
    }

    #[test]
    fn drain_takes_everything() {
        let mut queue = SendQueue::new();
        queue.push(make_tx(Priority::Normal, 1), false);
        queue.push(make_node_tx(Priority::WakeUp, 2, 9), true);
        let drained = queue.drain_all();
        assert_eq!(drained.len(), 2);
        assert!(queue.is_idle());
    }

    #[test]
    fn has_ready_for_node() {
        let mut queue = SendQueue::new();
        queue.push(make_node_tx(Priority::Normal, 1, 5), false);
        assert!(queue.has_ready_for(5));
        assert!(!queue.has_ready_for(6));
    }
}

#[cfg(test)]
mod proptests {
    use super::*;
    use crate::transaction::Priority;
    use proptest::prelude::*;
    use zwave_serial::{FunctionType, Message, MessagePayload};

    fn arb_priority() -> impl Strategy<Value = Priority> {
        prop_oneof![
            Just(Priority::Controller),
            Just(Priority::NodeQuery),
            Just(Priority::Poll),
            Just(Priority::Normal),
            Just(Priority::WakeUp),
        ]
    }

    proptest! {
        /// Popping drains by priority, and enqueue order is preserved
        /// within each priority.
        #[test]
        fn pop_order_is_priority_then_fifo(priorities in proptest::collection::vec(arb_priority(), 1..32)) {
            let mut queue = SendQueue::new();
            for (id, priority) in priorities.iter().enumerate() {
                let msg = Message::request(
                    FunctionType::GetControllerVersion,
                    MessagePayload::GetControllerVersionRequest,
                );
                let mut tx = Transaction::fire_and_forget(msg, *priority);
                tx.id = id as u64;
                queue.push(tx, false);
            }

            let mut popped = Vec::new();
            while let Some(tx) = queue.pop_ready() {
                popped.push((tx.priority, tx.id));
            }
            prop_assert_eq!(popped.len(), priorities.len());

            for window in popped.windows(2) {
                let (prev_priority, prev_id) = window[0];
                let (next_priority, next_id) = window[1];
                prop_assert!(prev_priority <= next_priority);
                if prev_priority == next_priority {
                    prop_assert!(prev_id < next_id, "FIFO within a priority");
                }
            }
        }
    }
}
