//! The `(cc id, command)`-keyed parse registry.
//!
//! The registry maps each known command to its parse hook and records the
//! implemented version per CC. It is populated at initialization and can be
//! extended by embedders; [`default_registry`] returns a lazily-built shared
//! instance covering everything the core implements.

use std::collections::BTreeMap;
use std::sync::OnceLock;

use crate::cc::{
    association, basic, binary_switch, crc16_encap, manufacturer_specific, multi_channel,
    multilevel_switch, security_s0, security_s2, supervision, transport_service, version,
    wake_up, CC,
};
use crate::cc::{
    AssociationCC, BasicCC, BinarySwitchCC, Crc16CC, ManufacturerSpecificCC, MultiChannelCC,
    MultilevelSwitchCC, NoOperationCC, SecurityS0CC, SecurityS2CC, SupervisionCC,
    TransportServiceCC, VersionCC, WakeUpCC,
};
use crate::commandclass::CommandClasses;
use crate::error::CCError;

/// Parse hook: the payload after the command byte to a typed CC.
pub type ParseCommandFn = fn(u8, &[u8]) -> Result<CC, CCError>;

/// Registry of parseable commands.
#[derive(Clone)]
pub struct CCRegistry {
    commands: BTreeMap<(u8, u8), ParseCommandFn>,
    versions: BTreeMap<u8, u8>,
}

impl Default for CCRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl CCRegistry {
    pub fn empty() -> Self {
        Self {
            commands: BTreeMap::new(),
            versions: BTreeMap::new(),
        }
    }

    /// Register one command of a CC.
    pub fn register(&mut self, cc: CommandClasses, command: u8, parse: ParseCommandFn) {
        self.commands.insert((cc.as_u8(), command), parse);
        self.versions
            .entry(cc.as_u8())
            .or_insert_with(|| cc.implemented_version());
    }

    /// The implemented version of a CC, 0 if unknown.
    pub fn implemented_version(&self, cc: CommandClasses) -> u8 {
        self.versions.get(&cc.as_u8()).copied().unwrap_or(0)
    }

    /// Whether any command of the CC is registered.
    pub fn knows(&self, cc: CommandClasses) -> bool {
        self.versions.contains_key(&cc.as_u8())
    }

    /// Parse `cc id | command | payload` into a typed CC.
    pub fn parse(&self, bytes: &[u8]) -> Result<CC, CCError> {
        if bytes.is_empty() {
            return Err(CCError::MalformedCC("empty command class frame"));
        }
        let cc_id = bytes[0];

        // No Operation is the one CC without a command byte.
        if cc_id == CommandClasses::NoOperation.as_u8() {
            return Ok(CC::NoOperation(NoOperationCC::parse(&bytes[1..])?));
        }

        if bytes.len() < 2 {
            return Err(CCError::MalformedCC("command class frame lacks a command"));
        }
        let command = bytes[1];
        let payload = &bytes[2..];

        // Transport Service packs size bits into the command byte; dispatch
        // on the masked command.
        let key_command = if cc_id == CommandClasses::TransportService.as_u8() {
            command & transport_service::COMMAND_MASK
        } else {
            command
        };

        match self.commands.get(&(cc_id, key_command)) {
            Some(parse) => parse(command, payload),
            None if self.knows(CommandClasses::from_u8(cc_id)) => Err(CCError::UnknownCommand {
                cc: cc_id,
                command,
            }),
            None => Err(CCError::UnknownCommandClass(cc_id)),
        }
    }

    /// A registry covering every CC the core implements.
    pub fn with_defaults() -> Self {
        use CommandClasses as C;

        let mut reg = Self::empty();

        reg.register(C::Basic, basic::SET, |c, p| {
            Ok(CC::Basic(BasicCC::parse(c, p)?))
        });
        reg.register(C::Basic, basic::GET, |c, p| {
            Ok(CC::Basic(BasicCC::parse(c, p)?))
        });
        reg.register(C::Basic, basic::REPORT, |c, p| {
            Ok(CC::Basic(BasicCC::parse(c, p)?))
        });

        reg.register(C::BinarySwitch, binary_switch::SET, |c, p| {
            Ok(CC::BinarySwitch(BinarySwitchCC::parse(c, p)?))
        });
        reg.register(C::BinarySwitch, binary_switch::GET, |c, p| {
            Ok(CC::BinarySwitch(BinarySwitchCC::parse(c, p)?))
        });
        reg.register(C::BinarySwitch, binary_switch::REPORT, |c, p| {
            Ok(CC::BinarySwitch(BinarySwitchCC::parse(c, p)?))
        });

        for command in [
            multilevel_switch::SET,
            multilevel_switch::GET,
            multilevel_switch::REPORT,
            multilevel_switch::START_LEVEL_CHANGE,
            multilevel_switch::STOP_LEVEL_CHANGE,
            multilevel_switch::SUPPORTED_GET,
            multilevel_switch::SUPPORTED_REPORT,
        ] {
            reg.register(C::MultilevelSwitch, command, |c, p| {
                Ok(CC::MultilevelSwitch(MultilevelSwitchCC::parse(c, p)?))
            });
        }

        for command in [
            version::GET,
            version::REPORT,
            version::COMMAND_CLASS_GET,
            version::COMMAND_CLASS_REPORT,
        ] {
            reg.register(C::Version, command, |c, p| {
                Ok(CC::Version(VersionCC::parse(c, p)?))
            });
        }

        for command in [manufacturer_specific::GET, manufacturer_specific::REPORT] {
            reg.register(C::ManufacturerSpecific, command, |c, p| {
                Ok(CC::ManufacturerSpecific(ManufacturerSpecificCC::parse(c, p)?))
            });
        }

        for command in [
            wake_up::INTERVAL_SET,
            wake_up::INTERVAL_GET,
            wake_up::INTERVAL_REPORT,
            wake_up::NOTIFICATION,
            wake_up::NO_MORE_INFORMATION,
        ] {
            reg.register(C::WakeUp, command, |c, p| {
                Ok(CC::WakeUp(WakeUpCC::parse(c, p)?))
            });
        }

        for command in [
            association::SET,
            association::GET,
            association::REPORT,
            association::REMOVE,
            association::GROUPINGS_GET,
            association::GROUPINGS_REPORT,
        ] {
            reg.register(C::Association, command, |c, p| {
                Ok(CC::Association(AssociationCC::parse(c, p)?))
            });
        }

        reg.register(C::Crc16Encapsulation, crc16_encap::ENCAP, |c, p| {
            Ok(CC::Crc16(Crc16CC::parse(c, p)?))
        });

        for command in [
            multi_channel::END_POINT_GET,
            multi_channel::END_POINT_REPORT,
            multi_channel::CAPABILITY_GET,
            multi_channel::CAPABILITY_REPORT,
            multi_channel::CMD_ENCAP,
        ] {
            reg.register(C::MultiChannel, command, |c, p| {
                Ok(CC::MultiChannel(MultiChannelCC::parse(c, p)?))
            });
        }

        for command in [supervision::GET, supervision::REPORT] {
            reg.register(C::Supervision, command, |c, p| {
                Ok(CC::Supervision(SupervisionCC::parse(c, p)?))
            });
        }

        for command in [
            transport_service::FIRST_SEGMENT,
            transport_service::SUBSEQUENT_SEGMENT,
            transport_service::SEGMENT_REQUEST,
            transport_service::SEGMENT_COMPLETE,
            transport_service::SEGMENT_WAIT,
        ] {
            reg.register(C::TransportService, command, |c, p| {
                Ok(CC::TransportService(TransportServiceCC::parse(c, p)?))
            });
        }

        for command in [
            security_s0::COMMANDS_SUPPORTED_GET,
            security_s0::COMMANDS_SUPPORTED_REPORT,
            security_s0::NONCE_GET,
            security_s0::NONCE_REPORT,
            security_s0::COMMAND_ENCAP,
        ] {
            reg.register(C::SecurityS0, command, |c, p| {
                Ok(CC::SecurityS0(SecurityS0CC::parse(c, p)?))
            });
        }

        for command in [
            security_s2::NONCE_GET,
            security_s2::NONCE_REPORT,
            security_s2::MESSAGE_ENCAP,
        ] {
            reg.register(C::SecurityS2, command, |c, p| {
                Ok(CC::SecurityS2(SecurityS2CC::parse(c, p)?))
            });
        }

        // No Operation has no command table entry but is a known CC.
        reg.versions.insert(
            C::NoOperation.as_u8(),
            C::NoOperation.implemented_version(),
        );

        reg
    }
}

impl std::fmt::Debug for CCRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CCRegistry")
            .field("commands", &self.commands.len())
            .field("known_ccs", &self.versions.len())
            .finish()
    }
}

/// The shared registry with every built-in CC, built on first use.
pub fn default_registry() -> &'static CCRegistry {
    static REGISTRY: OnceLock<CCRegistry> = OnceLock::new();
    REGISTRY.get_or_init(CCRegistry::with_defaults)
}
