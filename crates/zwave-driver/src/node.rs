//! The node model.
//!
//! Nodes live in an arena keyed by node id on the driver; endpoints are
//! addressed by index and back-references are plain ids resolved through
//! the driver, never pointers.

use std::collections::BTreeMap;
use std::time::Instant;

use zwave_serial::message::{NodeInformationFrame, NodeProtocolInfo};
use zwave_cc::security::SecurityClass;
use zwave_cc::CommandClasses;

use crate::interview::InterviewStage;

/// Ids above this are outside what the protocol itself can address; they
/// are accepted but flagged.
pub const MAX_PROTOCOL_NODE_ID: u8 = 232;

/// Interview attempts across sessions before a node is marked dead.
pub const MAX_INTERVIEW_ATTEMPTS: u8 = 5;

/// A logical sub-device reachable via Multi Channel.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Endpoint {
    pub index: u8,
    pub generic_class: u8,
    pub specific_class: u8,
    pub supported_ccs: Vec<u8>,
}

/// One Z-Wave node as the driver knows it.
#[derive(Debug)]
pub struct Node {
    pub id: u8,
    pub protocol_info: Option<NodeProtocolInfo>,
    /// Supported CCs advertised in the NIF (root endpoint).
    pub supported_ccs: Vec<u8>,
    pub controlled_ccs: Vec<u8>,
    /// Versions reported per CC during the interview.
    pub cc_versions: BTreeMap<u8, u8>,
    /// Endpoints beyond the root, discovered via Multi Channel.
    pub endpoints: BTreeMap<u8, Endpoint>,
    pub security_class: Option<SecurityClass>,
    pub interview_stage: InterviewStage,
    /// Whether a sleeping node is currently believed awake.
    pub awake: bool,
    pub wake_up_interval: Option<u32>,
    pub manufacturer_id: Option<u16>,
    pub product_type: Option<u16>,
    pub product_id: Option<u16>,
    pub association_groups: BTreeMap<u8, Vec<u8>>,
    /// Group count from an Association GroupingsReport, if received.
    pub association_group_count: Option<u8>,
    pub dead: bool,
    /// Failed interview attempts across sessions.
    pub interview_attempts: u8,
    /// When the next interview retry is due, if backing off.
    pub interview_retry_at: Option<Instant>,
    /// Whether a NIF was received this session.
    pub nif_received: bool,
}

impl Node {
    pub fn new(id: u8) -> Self {
        if id > MAX_PROTOCOL_NODE_ID {
            tracing::warn!(
                node_id = id,
                "node id exceeds the protocol limit of 232; controller-specific extension assumed"
            );
        }
        Self {
            id,
            protocol_info: None,
            supported_ccs: Vec::new(),
            controlled_ccs: Vec::new(),
            cc_versions: BTreeMap::new(),
            endpoints: BTreeMap::new(),
            security_class: None,
            interview_stage: InterviewStage::None,
            awake: true,
            wake_up_interval: None,
            manufacturer_id: None,
            product_type: None,
            product_id: None,
            association_groups: BTreeMap::new(),
            association_group_count: None,
            dead: false,
            interview_attempts: 0,
            interview_retry_at: None,
            nif_received: false,
        }
    }

    /// Always-on nodes can be reached at any time.
    pub fn is_listening(&self) -> bool {
        self.protocol_info.as_ref().is_some_and(|info| info.listening)
    }

    /// Battery nodes are only reachable around wake-ups.
    pub fn is_sleeping_capable(&self) -> bool {
        self.protocol_info
            .as_ref()
            .is_some_and(|info| info.is_sleeping())
    }

    /// Whether a send should be parked for the node's next wake-up.
    pub fn should_park_sends(&self) -> bool {
        self.is_sleeping_capable() && !self.awake
    }

    pub fn is_secure(&self) -> bool {
        self.security_class.is_some()
    }

    pub fn supports_cc(&self, cc: CommandClasses) -> bool {
        self.supported_ccs.contains(&cc.as_u8())
    }

    pub fn endpoint_supports_cc(&self, endpoint: u8, cc: CommandClasses) -> bool {
        if endpoint == 0 {
            return self.supports_cc(cc);
        }
        self.endpoints
            .get(&endpoint)
            .is_some_and(|ep| ep.supported_ccs.contains(&cc.as_u8()))
    }

    /// Apply a received NIF.
    pub fn apply_nif(&mut self, nif: &NodeInformationFrame) {
        self.supported_ccs = nif.supported_ccs.clone();
        self.controlled_ccs = nif.controlled_ccs.clone();
        self.nif_received = true;
    }

    /// Advance the interview stage. Stages only move forward; going back
    /// requires [`Node::reset_interview`].
    pub fn advance_stage(&mut self, stage: InterviewStage) -> bool {
        if stage <= self.interview_stage {
            tracing::debug!(
                node_id = self.id,
                current = ?self.interview_stage,
                requested = ?stage,
                "ignoring non-monotonic interview stage change"
            );
            return false;
        }
        self.interview_stage = stage;
        true
    }

    /// Deliberate re-interview: drop discovered state and start over.
    pub fn reset_interview(&mut self) {
        self.interview_stage = InterviewStage::None;
        self.cc_versions.clear();
        self.endpoints.clear();
        self.interview_attempts = 0;
        self.interview_retry_at = None;
        self.dead = false;
        self.nif_received = false;
    }

    /// Record a failed interview attempt; marks the node dead once the
    /// budget is exhausted. Returns whether the node is now dead.
    pub fn record_interview_failure(&mut self) -> bool {
        self.interview_attempts = self.interview_attempts.saturating_add(1);
        if self.interview_attempts >= MAX_INTERVIEW_ATTEMPTS {
            self.dead = true;
        }
        self.dead
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use zwave_serial::message::payloads::{FrequentListening, MaxBaudRate};

    fn listening_info() -> NodeProtocolInfo {
        NodeProtocolInfo {
            listening: true,
            frequent_listening: FrequentListening::No,
            routing: true,
            max_baud_rate: MaxBaudRate::Baud100k,
            protocol_version: 3,
            secure: false,
            beaming: true,
            basic_class: 0x04,
            generic_class: 0x10,
            specific_class: 0x01,
        }
    }

    fn sleeping_info() -> NodeProtocolInfo {
        NodeProtocolInfo {
            listening: false,
            frequent_listening: FrequentListening::No,
            routing: true,
            max_baud_rate: MaxBaudRate::Baud40k,
            protocol_version: 3,
            secure: false,
            beaming: false,
            basic_class: 0x04,
            generic_class: 0x21,
            specific_class: 0x01,
        }
    }

    #[test]
    fn listening_node_never_parks() {
        let mut node = Node::new(5);
        node.protocol_info = Some(listening_info());
        node.awake = false;
        assert!(node.is_listening());
        assert!(!node.should_park_sends());
    }

    #[test]
    fn sleeping_node_parks_until_awake() {
        let mut node = Node::new(9);
        node.protocol_info = Some(sleeping_info());
        node.awake = false;
        assert!(node.should_park_sends());
        node.awake = true;
        assert!(!node.should_park_sends());
    }

    #[test]
    fn stage_is_monotonic() {
        let mut node = Node::new(5);
        assert!(node.advance_stage(InterviewStage::ProtocolInfo));
        assert!(node.advance_stage(InterviewStage::NodeInfo));
        // Going backwards is refused.
        assert!(!node.advance_stage(InterviewStage::ProtocolInfo));
        assert_eq!(node.interview_stage, InterviewStage::NodeInfo);
        // Same stage is refused too.
        assert!(!node.advance_stage(InterviewStage::NodeInfo));
    }

    #[test]
    fn reset_interview_goes_back_to_none() {
        let mut node = Node::new(5);
        node.advance_stage(InterviewStage::Complete);
        node.cc_versions.insert(0x25, 2);
        node.reset_interview();
        assert_eq!(node.interview_stage, InterviewStage::None);
        assert!(node.cc_versions.is_empty());
    }

    #[test]
    fn nif_application() {
        let mut node = Node::new(9);
        node.apply_nif(&NodeInformationFrame {
            basic_class: 0x04,
            generic_class: 0x10,
            specific_class: 0x01,
            supported_ccs: vec![0x25, 0x86],
            controlled_ccs: vec![0x26],
        });
        assert!(node.supports_cc(CommandClasses::BinarySwitch));
        assert!(!node.supports_cc(CommandClasses::MultilevelSwitch));
        assert!(node.nif_received);
    }

    #[test]
    fn endpoint_cc_lookup() {
        let mut node = Node::new(9);
        node.supported_ccs = vec![0x86];
        node.endpoints.insert(
            2,
            Endpoint {
                index: 2,
                generic_class: 0x10,
                specific_class: 0x01,
                supported_ccs: vec![0x25],
            },
        );
        assert!(node.endpoint_supports_cc(0, CommandClasses::Version));
        assert!(node.endpoint_supports_cc(2, CommandClasses::BinarySwitch));
        assert!(!node.endpoint_supports_cc(2, CommandClasses::Version));
        assert!(!node.endpoint_supports_cc(3, CommandClasses::BinarySwitch));
    }

    #[test]
    fn interview_failures_mark_dead() {
        let mut node = Node::new(9);
        for _ in 0..(MAX_INTERVIEW_ATTEMPTS - 1) {
            assert!(!node.record_interview_failure());
        }
        assert!(node.record_interview_failure());
        assert!(node.dead);
    }
}
