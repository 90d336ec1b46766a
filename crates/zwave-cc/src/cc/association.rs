//! Association CC (0x85): group membership management.

use crate::error::CCError;
use crate::validate_payload;

pub const SET: u8 = 0x01;
pub const GET: u8 = 0x02;
pub const REPORT: u8 = 0x03;
pub const REMOVE: u8 = 0x04;
pub const GROUPINGS_GET: u8 = 0x05;
pub const GROUPINGS_REPORT: u8 = 0x06;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AssociationCC {
    Set {
        group_id: u8,
        node_ids: Vec<u8>,
    },
    Get {
        group_id: u8,
    },
    Report {
        group_id: u8,
        max_nodes: u8,
        reports_to_follow: u8,
        node_ids: Vec<u8>,
    },
    Remove {
        group_id: u8,
        /// Empty means "remove all nodes from the group".
        node_ids: Vec<u8>,
    },
    GroupingsGet,
    GroupingsReport {
        group_count: u8,
    },
}

impl AssociationCC {
    pub fn command(&self) -> u8 {
        match self {
            AssociationCC::Set { .. } => SET,
            AssociationCC::Get { .. } => GET,
            AssociationCC::Report { .. } => REPORT,
            AssociationCC::Remove { .. } => REMOVE,
            AssociationCC::GroupingsGet => GROUPINGS_GET,
            AssociationCC::GroupingsReport { .. } => GROUPINGS_REPORT,
        }
    }

    pub fn parse(command: u8, payload: &[u8]) -> Result<Self, CCError> {
        match command {
            SET => {
                validate_payload!(payload.len() >= 2, "association set needs group and nodes");
                Ok(AssociationCC::Set {
                    group_id: payload[0],
                    node_ids: payload[1..].to_vec(),
                })
            }
            GET => {
                validate_payload!(payload.len() == 1, "association get names one group");
                Ok(AssociationCC::Get {
                    group_id: payload[0],
                })
            }
            REPORT => {
                validate_payload!(payload.len() >= 3, "association report carries three bytes");
                Ok(AssociationCC::Report {
                    group_id: payload[0],
                    max_nodes: payload[1],
                    reports_to_follow: payload[2],
                    node_ids: payload[3..].to_vec(),
                })
            }
            REMOVE => {
                validate_payload!(!payload.is_empty(), "association remove names a group");
                Ok(AssociationCC::Remove {
                    group_id: payload[0],
                    node_ids: payload[1..].to_vec(),
                })
            }
            GROUPINGS_GET => {
                validate_payload!(payload.is_empty(), "groupings get carries no payload");
                Ok(AssociationCC::GroupingsGet)
            }
            GROUPINGS_REPORT => {
                validate_payload!(payload.len() == 1, "groupings report carries one byte");
                Ok(AssociationCC::GroupingsReport {
                    group_count: payload[0],
                })
            }
            other => Err(CCError::UnknownCommand {
                cc: 0x85,
                command: other,
            }),
        }
    }

    pub fn write_payload(&self, out: &mut Vec<u8>) {
        match self {
            AssociationCC::Set { group_id, node_ids }
            | AssociationCC::Remove { group_id, node_ids } => {
                out.push(*group_id);
                out.extend_from_slice(node_ids);
            }
            AssociationCC::Get { group_id } => out.push(*group_id),
            AssociationCC::Report {
                group_id,
                max_nodes,
                reports_to_follow,
                node_ids,
            } => {
                out.push(*group_id);
                out.push(*max_nodes);
                out.push(*reports_to_follow);
                out.extend_from_slice(node_ids);
            }
            AssociationCC::GroupingsGet => {}
            AssociationCC::GroupingsReport { group_count } => out.push(*group_count),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn report_roundtrip() {
        let cc = AssociationCC::Report {
            group_id: 1,
            max_nodes: 5,
            reports_to_follow: 0,
            node_ids: vec![1, 9, 14],
        };
        let mut out = Vec::new();
        cc.write_payload(&mut out);
        assert_eq!(out, vec![1, 5, 0, 1, 9, 14]);
        assert_eq!(AssociationCC::parse(REPORT, &out).unwrap(), cc);
    }

    #[test]
    fn remove_all_from_group() {
        let cc = AssociationCC::parse(REMOVE, &[2]).unwrap();
        assert_eq!(
            cc,
            AssociationCC::Remove {
                group_id: 2,
                node_ids: vec![],
            }
        );
    }

    #[test]
    fn groupings_roundtrip() {
        let cc = AssociationCC::parse(GROUPINGS_REPORT, &[3]).unwrap();
        assert_eq!(cc, AssociationCC::GroupingsReport { group_count: 3 });
    }

    #[test]
    fn set_requires_nodes() {
        assert!(AssociationCC::parse(SET, &[1]).is_err());
    }
}
