//! The staged node interview.
//!
//! Stages run in a fixed order; every stage is idempotent and its
//! completion is persisted, so a driver restart resumes at the first
//! incomplete stage. The planner below is pure: it inspects the node and
//! yields the next probe, and the driver performs the I/O.

use std::collections::VecDeque;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use zwave_cc::cc::{
    AssociationCC, BasicCC, BinarySwitchCC, ManufacturerSpecificCC, MultiChannelCC,
    MultilevelSwitchCC, VersionCC, WakeUpCC,
};
use zwave_cc::{CommandClasses, CC};

use crate::node::Node;

/// Interview progression, totally ordered.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub enum InterviewStage {
    #[default]
    None,
    ProtocolInfo,
    NodeInfo,
    CommandClasses,
    Endpoints,
    Static,
    Cache,
    Dynamic,
    Complete,
}

impl InterviewStage {
    pub fn next(self) -> Option<InterviewStage> {
        use InterviewStage as S;
        match self {
            S::None => Some(S::ProtocolInfo),
            S::ProtocolInfo => Some(S::NodeInfo),
            S::NodeInfo => Some(S::CommandClasses),
            S::CommandClasses => Some(S::Endpoints),
            S::Endpoints => Some(S::Static),
            S::Static => Some(S::Cache),
            S::Cache => Some(S::Dynamic),
            S::Dynamic => Some(S::Complete),
            S::Complete => None,
        }
    }

    /// Whether results of this stage are persisted to the network cache.
    pub fn is_persisted(self) -> bool {
        !matches!(self, InterviewStage::Cache | InterviewStage::Dynamic)
    }
}

/// Backoff before interview retry `attempt` (1-based): 5 min growing
/// fourfold, capped at 2 h.
pub fn interview_retry_delay(attempt: u8) -> Duration {
    const BASE: Duration = Duration::from_secs(5 * 60);
    const CAP: Duration = Duration::from_secs(2 * 60 * 60);
    let factor = 4u64.saturating_pow(attempt.saturating_sub(1) as u32);
    BASE.saturating_mul(factor.min(u32::MAX as u64) as u32).min(CAP)
}

/// The next thing the interviewer wants done for a node.
#[derive(Debug, Clone, PartialEq)]
pub enum InterviewStep {
    /// Ask the controller for the node's protocol capabilities.
    GetProtocolInfo,
    /// Ask the controller to request the node's NIF.
    RequestNodeInfo,
    /// Send a CC query to the node and wait for its paired report.
    Query { cc: CC, endpoint: u8 },
    /// Restore cached values; touches no RF and may run while asleep.
    RestoreCache,
    /// The current stage is done: persist and move on.
    AdvanceStage,
    /// The interview is complete.
    Finished,
}

type PlanFn = fn(&Node) -> VecDeque<(CC, u8)>;

/// Per-node interview planner. Holds only scheduling state; all observed
/// facts live on the [`Node`].
#[derive(Debug, Default)]
pub struct NodeInterview {
    pending: VecDeque<(CC, u8)>,
    planned: Option<(InterviewStage, u8)>,
}

impl NodeInterview {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decide the next step for the node's current stage.
    pub fn next_step(&mut self, node: &Node) -> InterviewStep {
        use InterviewStage as S;
        match node.interview_stage {
            S::None => InterviewStep::AdvanceStage,
            S::ProtocolInfo => {
                if node.protocol_info.is_none() {
                    InterviewStep::GetProtocolInfo
                } else {
                    InterviewStep::AdvanceStage
                }
            }
            S::NodeInfo => {
                if node.nif_received || !node.supported_ccs.is_empty() {
                    InterviewStep::AdvanceStage
                } else {
                    InterviewStep::RequestNodeInfo
                }
            }
            S::CommandClasses => {
                self.staged(node, S::CommandClasses, &[plan_cc_versions, plan_cc_discovery])
            }
            S::Endpoints => {
                self.staged(node, S::Endpoints, &[plan_endpoint_discovery, plan_endpoint_capabilities])
            }
            S::Static => self.staged(node, S::Static, &[plan_static, plan_association_groups]),
            S::Cache => InterviewStep::RestoreCache,
            S::Dynamic => self.staged(node, S::Dynamic, &[plan_dynamic]),
            S::Complete => InterviewStep::Finished,
        }
    }

    fn staged(&mut self, node: &Node, stage: InterviewStage, phases: &[PlanFn]) -> InterviewStep {
        loop {
            if let Some((cc, endpoint)) = self.pending.pop_front() {
                return InterviewStep::Query { cc, endpoint };
            }
            let next_phase = match self.planned {
                Some((planned_stage, phase)) if planned_stage == stage => phase + 1,
                _ => 0,
            };
            if next_phase as usize >= phases.len() {
                return InterviewStep::AdvanceStage;
            }
            self.planned = Some((stage, next_phase));
            self.pending = phases[next_phase as usize](node);
        }
    }
}

/// Version query for every supported CC whose version is still unknown.
fn plan_cc_versions(node: &Node) -> VecDeque<(CC, u8)> {
    if !node.supports_cc(CommandClasses::Version) {
        return VecDeque::new();
    }
    node.supported_ccs
        .iter()
        .filter(|&&cc| !node.cc_versions.contains_key(&cc))
        .map(|&cc| (CC::Version(VersionCC::CommandClassGet { cc }), 0))
        .collect()
}

/// CC-specific discovery after versions are known.
fn plan_cc_discovery(node: &Node) -> VecDeque<(CC, u8)> {
    let mut plan = VecDeque::new();
    if node.supports_cc(CommandClasses::WakeUp) && node.wake_up_interval.is_none() {
        plan.push_back((CC::WakeUp(WakeUpCC::IntervalGet), 0));
    }
    if node.supports_cc(CommandClasses::MultilevelSwitch) {
        plan.push_back((CC::MultilevelSwitch(MultilevelSwitchCC::SupportedGet), 0));
    }
    plan
}

fn plan_endpoint_discovery(node: &Node) -> VecDeque<(CC, u8)> {
    if node.supports_cc(CommandClasses::MultiChannel) && node.endpoints.is_empty() {
        VecDeque::from([(CC::MultiChannel(MultiChannelCC::EndPointGet), 0)])
    } else {
        VecDeque::new()
    }
}

fn plan_endpoint_capabilities(node: &Node) -> VecDeque<(CC, u8)> {
    node.endpoints
        .values()
        .filter(|ep| ep.supported_ccs.is_empty())
        .map(|ep| {
            (
                CC::MultiChannel(MultiChannelCC::CapabilityGet { endpoint: ep.index }),
                0,
            )
        })
        .collect()
}

/// One-shot static state queries.
fn plan_static(node: &Node) -> VecDeque<(CC, u8)> {
    let mut plan = VecDeque::new();
    if node.supports_cc(CommandClasses::ManufacturerSpecific) && node.manufacturer_id.is_none() {
        plan.push_back((CC::ManufacturerSpecific(ManufacturerSpecificCC::Get), 0));
    }
    if node.supports_cc(CommandClasses::Association) && node.association_group_count.is_none() {
        plan.push_back((CC::Association(AssociationCC::GroupingsGet), 0));
    }
    plan
}

/// Membership query per association group once the count is known.
fn plan_association_groups(node: &Node) -> VecDeque<(CC, u8)> {
    let Some(count) = node.association_group_count else {
        return VecDeque::new();
    };
    (1..=count)
        .filter(|group| !node.association_groups.contains_key(group))
        .map(|group_id| (CC::Association(AssociationCC::Get { group_id }), 0))
        .collect()
}

/// Volatile state, refreshed every session.
fn plan_dynamic(node: &Node) -> VecDeque<(CC, u8)> {
    let mut plan = VecDeque::new();
    let mut endpoints: Vec<u8> = vec![0];
    endpoints.extend(node.endpoints.keys().copied());

    for endpoint in endpoints {
        if node.endpoint_supports_cc(endpoint, CommandClasses::BinarySwitch) {
            plan.push_back((CC::BinarySwitch(BinarySwitchCC::Get), endpoint));
        } else if node.endpoint_supports_cc(endpoint, CommandClasses::MultilevelSwitch) {
            plan.push_back((CC::MultilevelSwitch(MultilevelSwitchCC::Get), endpoint));
        } else if node.endpoint_supports_cc(endpoint, CommandClasses::Basic) {
            plan.push_back((CC::Basic(BasicCC::Get), endpoint));
        }
    }
    plan
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::Endpoint;

    fn node_with_ccs(ccs: &[u8]) -> Node {
        let mut node = Node::new(9);
        node.supported_ccs = ccs.to_vec();
        node.nif_received = true;
        node
    }

    #[test]
    fn stage_order_is_total() {
        let mut stage = InterviewStage::None;
        let mut seen = vec![stage];
        while let Some(next) = stage.next() {
            assert!(next > stage, "{next:?} should follow {stage:?}");
            seen.push(next);
            stage = next;
        }
        assert_eq!(seen.len(), 9);
        assert_eq!(stage, InterviewStage::Complete);
    }

    #[test]
    fn retry_delay_grows_to_cap() {
        assert_eq!(interview_retry_delay(1), Duration::from_secs(300));
        assert_eq!(interview_retry_delay(2), Duration::from_secs(1200));
        assert_eq!(interview_retry_delay(3), Duration::from_secs(4800));
        assert_eq!(interview_retry_delay(4), Duration::from_secs(7200));
        assert_eq!(interview_retry_delay(5), Duration::from_secs(7200));
    }

    #[test]
    fn fresh_node_starts_with_protocol_info() {
        let mut interview = NodeInterview::new();
        let mut node = Node::new(9);
        assert_eq!(interview.next_step(&node), InterviewStep::AdvanceStage);
        node.advance_stage(InterviewStage::ProtocolInfo);
        assert_eq!(interview.next_step(&node), InterviewStep::GetProtocolInfo);
    }

    #[test]
    fn resumed_node_skips_done_stages() {
        // Persisted state says NodeInfo is done; the interview resumes at
        // CommandClasses and never asks for protocol info again.
        let mut interview = NodeInterview::new();
        let mut node = node_with_ccs(&[0x25, 0x86]);
        node.interview_stage = InterviewStage::NodeInfo;

        assert_eq!(interview.next_step(&node), InterviewStep::AdvanceStage);
        node.advance_stage(InterviewStage::CommandClasses);

        match interview.next_step(&node) {
            InterviewStep::Query { cc, .. } => {
                assert_eq!(cc, CC::Version(VersionCC::CommandClassGet { cc: 0x25 }));
            }
            other => panic!("expected a version query, got {other:?}"),
        }
    }

    #[test]
    fn version_queries_skip_known() {
        let mut interview = NodeInterview::new();
        let mut node = node_with_ccs(&[0x25, 0x86]);
        node.interview_stage = InterviewStage::CommandClasses;
        node.cc_versions.insert(0x25, 2);

        match interview.next_step(&node) {
            InterviewStep::Query { cc, .. } => {
                assert_eq!(cc, CC::Version(VersionCC::CommandClassGet { cc: 0x86 }));
            }
            other => panic!("expected a version query, got {other:?}"),
        }
    }

    #[test]
    fn no_version_cc_means_no_version_queries() {
        let mut interview = NodeInterview::new();
        let mut node = node_with_ccs(&[0x25]);
        node.interview_stage = InterviewStage::CommandClasses;
        assert_eq!(interview.next_step(&node), InterviewStep::AdvanceStage);
    }

    #[test]
    fn endpoints_stage_two_phases() {
        let mut interview = NodeInterview::new();
        let mut node = node_with_ccs(&[0x60]);
        node.interview_stage = InterviewStage::Endpoints;

        // Phase 0: discover the endpoint count.
        assert_eq!(
            interview.next_step(&node),
            InterviewStep::Query {
                cc: CC::MultiChannel(MultiChannelCC::EndPointGet),
                endpoint: 0,
            }
        );

        // The report created two endpoints without capabilities yet.
        for index in [1u8, 2] {
            node.endpoints.insert(
                index,
                Endpoint {
                    index,
                    ..Endpoint::default()
                },
            );
        }

        // Phase 1: capability query per endpoint.
        let mut queried = Vec::new();
        loop {
            match interview.next_step(&node) {
                InterviewStep::Query { cc, .. } => match cc {
                    CC::MultiChannel(MultiChannelCC::CapabilityGet { endpoint }) => {
                        queried.push(endpoint);
                    }
                    other => panic!("unexpected query {other:?}"),
                },
                InterviewStep::AdvanceStage => break,
                other => panic!("unexpected step {other:?}"),
            }
        }
        assert_eq!(queried, vec![1, 2]);
    }

    #[test]
    fn static_stage_plans_association_groups_after_count() {
        let mut interview = NodeInterview::new();
        let mut node = node_with_ccs(&[0x72, 0x85]);
        node.interview_stage = InterviewStage::Static;
        node.manufacturer_id = Some(0x0086);

        assert_eq!(
            interview.next_step(&node),
            InterviewStep::Query {
                cc: CC::Association(AssociationCC::GroupingsGet),
                endpoint: 0,
            }
        );

        node.association_group_count = Some(2);
        assert_eq!(
            interview.next_step(&node),
            InterviewStep::Query {
                cc: CC::Association(AssociationCC::Get { group_id: 1 }),
                endpoint: 0,
            }
        );
        node.association_groups.insert(1, vec![1]);
        assert_eq!(
            interview.next_step(&node),
            InterviewStep::Query {
                cc: CC::Association(AssociationCC::Get { group_id: 2 }),
                endpoint: 0,
            }
        );
        node.association_groups.insert(2, vec![]);
        assert_eq!(interview.next_step(&node), InterviewStep::AdvanceStage);
    }

    #[test]
    fn cache_stage_restores_without_rf() {
        let mut interview = NodeInterview::new();
        let mut node = node_with_ccs(&[0x25]);
        node.interview_stage = InterviewStage::Cache;
        assert_eq!(interview.next_step(&node), InterviewStep::RestoreCache);
    }

    #[test]
    fn dynamic_stage_polls_each_endpoint_once() {
        let mut interview = NodeInterview::new();
        let mut node = node_with_ccs(&[0x25]);
        node.interview_stage = InterviewStage::Dynamic;
        node.endpoints.insert(
            2,
            Endpoint {
                index: 2,
                generic_class: 0x10,
                specific_class: 0x01,
                supported_ccs: vec![0x26],
            },
        );

        assert_eq!(
            interview.next_step(&node),
            InterviewStep::Query {
                cc: CC::BinarySwitch(BinarySwitchCC::Get),
                endpoint: 0,
            }
        );
        assert_eq!(
            interview.next_step(&node),
            InterviewStep::Query {
                cc: CC::MultilevelSwitch(MultilevelSwitchCC::Get),
                endpoint: 2,
            }
        );
        // Volatile queries are not re-planned within the stage.
        assert_eq!(interview.next_step(&node), InterviewStep::AdvanceStage);
    }

    #[test]
    fn complete_stage_finishes() {
        let mut interview = NodeInterview::new();
        let mut node = node_with_ccs(&[]);
        node.interview_stage = InterviewStage::Complete;
        assert_eq!(interview.next_step(&node), InterviewStep::Finished);
    }
}
