//! The typed command-class union and its dispatch.

pub mod association;
pub mod basic;
pub mod binary_switch;
pub mod crc16_encap;
pub mod manufacturer_specific;
pub mod multi_channel;
pub mod multilevel_switch;
pub mod no_operation;
pub mod security_s0;
pub mod security_s2;
pub mod supervision;
pub mod transport_service;
pub mod version;
pub mod wake_up;

pub use association::AssociationCC;
pub use basic::BasicCC;
pub use binary_switch::BinarySwitchCC;
pub use crc16_encap::Crc16CC;
pub use manufacturer_specific::ManufacturerSpecificCC;
pub use multi_channel::MultiChannelCC;
pub use multilevel_switch::{LevelChangeDirection, MultilevelSwitchCC, SwitchType};
pub use no_operation::NoOperationCC;
pub use security_s0::{S0Encap, SecurityS0CC};
pub use security_s2::{S2Encap, S2Extension, SecurityS2CC};
pub use supervision::{SupervisionCC, SupervisionStatus};
pub use transport_service::{DatagramReassembler, ReassemblyOutcome, TransportServiceCC};
pub use version::VersionCC;
pub use wake_up::WakeUpCC;

use crate::commandclass::CommandClasses;
use crate::error::CCError;
use crate::registry::CCRegistry;

/// A parsed command class command.
#[derive(Debug, Clone, PartialEq, Eq)]
#[must_use]
pub enum CC {
    NoOperation(NoOperationCC),
    Basic(BasicCC),
    BinarySwitch(BinarySwitchCC),
    MultilevelSwitch(MultilevelSwitchCC),
    Version(VersionCC),
    ManufacturerSpecific(ManufacturerSpecificCC),
    WakeUp(WakeUpCC),
    Association(AssociationCC),
    Crc16(Crc16CC),
    MultiChannel(MultiChannelCC),
    Supervision(SupervisionCC),
    TransportService(TransportServiceCC),
    SecurityS0(SecurityS0CC),
    SecurityS2(SecurityS2CC),
}

impl CC {
    pub fn cc_id(&self) -> CommandClasses {
        match self {
            CC::NoOperation(_) => CommandClasses::NoOperation,
            CC::Basic(_) => CommandClasses::Basic,
            CC::BinarySwitch(_) => CommandClasses::BinarySwitch,
            CC::MultilevelSwitch(_) => CommandClasses::MultilevelSwitch,
            CC::Version(_) => CommandClasses::Version,
            CC::ManufacturerSpecific(_) => CommandClasses::ManufacturerSpecific,
            CC::WakeUp(_) => CommandClasses::WakeUp,
            CC::Association(_) => CommandClasses::Association,
            CC::Crc16(_) => CommandClasses::Crc16Encapsulation,
            CC::MultiChannel(_) => CommandClasses::MultiChannel,
            CC::Supervision(_) => CommandClasses::Supervision,
            CC::TransportService(_) => CommandClasses::TransportService,
            CC::SecurityS0(_) => CommandClasses::SecurityS0,
            CC::SecurityS2(_) => CommandClasses::SecurityS2,
        }
    }

    /// The command byte. No Operation has none and reports 0.
    pub fn cc_command(&self) -> u8 {
        match self {
            CC::NoOperation(_) => 0,
            CC::Basic(cc) => cc.command(),
            CC::BinarySwitch(cc) => cc.command(),
            CC::MultilevelSwitch(cc) => cc.command(),
            CC::Version(cc) => cc.command(),
            CC::ManufacturerSpecific(cc) => cc.command(),
            CC::WakeUp(cc) => cc.command(),
            CC::Association(cc) => cc.command(),
            CC::Crc16(cc) => cc.command(),
            CC::MultiChannel(cc) => cc.command(),
            CC::Supervision(cc) => cc.command(),
            CC::TransportService(cc) => cc.command(),
            CC::SecurityS0(cc) => cc.command(),
            CC::SecurityS2(cc) => cc.command(),
        }
    }

    /// Serialize to `cc id | command | payload` (No Operation is the single
    /// byte `0x00`).
    pub fn serialize(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.push(self.cc_id().as_u8());
        if let CC::NoOperation(_) = self {
            return out;
        }
        out.push(self.cc_command());
        match self {
            CC::NoOperation(_) => unreachable!("returned above"),
            CC::Basic(cc) => cc.write_payload(&mut out),
            CC::BinarySwitch(cc) => cc.write_payload(&mut out),
            CC::MultilevelSwitch(cc) => cc.write_payload(&mut out),
            CC::Version(cc) => cc.write_payload(&mut out),
            CC::ManufacturerSpecific(cc) => cc.write_payload(&mut out),
            CC::WakeUp(cc) => cc.write_payload(&mut out),
            CC::Association(cc) => cc.write_payload(&mut out),
            CC::Crc16(cc) => cc.write_payload(&mut out),
            CC::MultiChannel(cc) => cc.write_payload(&mut out),
            CC::Supervision(cc) => cc.write_payload(&mut out),
            CC::TransportService(cc) => cc.write_payload(&mut out),
            CC::SecurityS0(cc) => cc.write_payload(&mut out),
            CC::SecurityS2(cc) => cc.write_payload(&mut out),
        }
        out
    }

    /// Parse using the default registry.
    pub fn parse(bytes: &[u8]) -> Result<CC, CCError> {
        crate::registry::default_registry().parse(bytes)
    }

    /// Parse using an explicit registry.
    pub fn parse_with(bytes: &[u8], registry: &CCRegistry) -> Result<CC, CCError> {
        registry.parse(bytes)
    }

    /// The `(cc id, command)` of the report this command pairs with, if the
    /// command expects an application-level answer.
    pub fn expected_response(&self) -> Option<(u8, u8)> {
        let pair = match self {
            CC::Basic(BasicCC::Get) => (0x20, basic::REPORT),
            CC::BinarySwitch(BinarySwitchCC::Get) => (0x25, binary_switch::REPORT),
            CC::MultilevelSwitch(MultilevelSwitchCC::Get) => (0x26, multilevel_switch::REPORT),
            CC::MultilevelSwitch(MultilevelSwitchCC::SupportedGet) => {
                (0x26, multilevel_switch::SUPPORTED_REPORT)
            }
            CC::Version(VersionCC::Get) => (0x86, version::REPORT),
            CC::Version(VersionCC::CommandClassGet { .. }) => {
                (0x86, version::COMMAND_CLASS_REPORT)
            }
            CC::ManufacturerSpecific(ManufacturerSpecificCC::Get) => {
                (0x72, manufacturer_specific::REPORT)
            }
            CC::WakeUp(WakeUpCC::IntervalGet) => (0x84, wake_up::INTERVAL_REPORT),
            CC::Association(AssociationCC::Get { .. }) => (0x85, association::REPORT),
            CC::Association(AssociationCC::GroupingsGet) => {
                (0x85, association::GROUPINGS_REPORT)
            }
            CC::MultiChannel(MultiChannelCC::EndPointGet) => {
                (0x60, multi_channel::END_POINT_REPORT)
            }
            CC::MultiChannel(MultiChannelCC::CapabilityGet { .. }) => {
                (0x60, multi_channel::CAPABILITY_REPORT)
            }
            CC::Supervision(SupervisionCC::Get { .. }) => (0x6C, supervision::REPORT),
            CC::SecurityS0(SecurityS0CC::NonceGet) => (0x98, security_s0::NONCE_REPORT),
            CC::SecurityS0(SecurityS0CC::CommandsSupportedGet) => {
                (0x98, security_s0::COMMANDS_SUPPORTED_REPORT)
            }
            CC::SecurityS2(SecurityS2CC::NonceGet { .. }) => {
                (0x9F, security_s2::NONCE_REPORT)
            }
            _ => return None,
        };
        Some(pair)
    }
}


#[cfg(test)]
mod proptests {
    use super::*;
    use crate::types::Duration;
    use proptest::prelude::*;

    fn arb_duration() -> impl Strategy<Value = Option<Duration>> {
        proptest::option::of(any::<u8>().prop_map(Duration::parse))
    }

    proptest! {
        #[test]
        fn basic_set_roundtrip(value in any::<u8>()) {
            let cc = CC::Basic(BasicCC::Set { target_value: value });
            prop_assert_eq!(CC::parse(&cc.serialize()).unwrap(), cc);
        }

        #[test]
        fn binary_switch_set_roundtrip(value in any::<bool>(), duration in arb_duration()) {
            let cc = CC::BinarySwitch(BinarySwitchCC::Set {
                target_value: value,
                duration,
            });
            prop_assert_eq!(CC::parse(&cc.serialize()).unwrap(), cc);
        }

        #[test]
        fn multilevel_set_roundtrip(value in 0u8..=99, duration in arb_duration()) {
            let cc = CC::MultilevelSwitch(MultilevelSwitchCC::Set {
                target_value: value,
                duration,
            });
            prop_assert_eq!(CC::parse(&cc.serialize()).unwrap(), cc);
        }

        #[test]
        fn supervision_get_roundtrip(
            session in 0u8..=0x3F,
            updates in any::<bool>(),
            inner in proptest::collection::vec(any::<u8>(), 1..32),
        ) {
            let cc = CC::Supervision(SupervisionCC::Get {
                session_id: session,
                status_updates: updates,
                inner,
            });
            prop_assert_eq!(CC::parse(&cc.serialize()).unwrap(), cc);
        }

        #[test]
        fn association_report_roundtrip(
            group in any::<u8>(),
            max_nodes in any::<u8>(),
            nodes in proptest::collection::vec(1u8..=232, 0..16),
        ) {
            let cc = CC::Association(AssociationCC::Report {
                group_id: group,
                max_nodes,
                reports_to_follow: 0,
                node_ids: nodes,
            });
            prop_assert_eq!(CC::parse(&cc.serialize()).unwrap(), cc);
        }
    }
}
