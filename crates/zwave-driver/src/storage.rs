//! Network cache persistence.
//!
//! One JSON document per home id holds everything worth keeping across
//! sessions: node identity and capabilities, the last interview stage
//! reached, per-endpoint CCs, security class, stateful values, and
//! association groups. Writes are atomic (write to `.tmp`, then rename).

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tokio::fs;

use zwave_cc::security::SecurityClass;
use zwave_serial::message::payloads::{FrequentListening, MaxBaudRate};
use zwave_serial::message::NodeProtocolInfo;

use crate::interview::InterviewStage;
use crate::node::{Endpoint, Node};
use crate::value_db::{Value, ValueId};

/// Errors from cache operations.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialize(String),

    #[error("deserialization error: {0}")]
    Deserialize(String),

    #[error("failed to determine cache directory: {0}")]
    Directory(String),
}

/// Serializable mirror of [`NodeProtocolInfo`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachedProtocolInfo {
    pub listening: bool,
    pub frequent_listening_ms: u16,
    pub routing: bool,
    pub max_baud: u32,
    pub protocol_version: u8,
    pub secure: bool,
    pub beaming: bool,
    pub basic_class: u8,
    pub generic_class: u8,
    pub specific_class: u8,
}

impl From<&NodeProtocolInfo> for CachedProtocolInfo {
    fn from(info: &NodeProtocolInfo) -> Self {
        Self {
            listening: info.listening,
            frequent_listening_ms: match info.frequent_listening {
                FrequentListening::No => 0,
                FrequentListening::Every250ms => 250,
                FrequentListening::Every1000ms => 1000,
            },
            routing: info.routing,
            max_baud: match info.max_baud_rate {
                MaxBaudRate::Baud9600 => 9_600,
                MaxBaudRate::Baud40k => 40_000,
                MaxBaudRate::Baud100k => 100_000,
            },
            protocol_version: info.protocol_version,
            secure: info.secure,
            beaming: info.beaming,
            basic_class: info.basic_class,
            generic_class: info.generic_class,
            specific_class: info.specific_class,
        }
    }
}

impl From<&CachedProtocolInfo> for NodeProtocolInfo {
    fn from(cached: &CachedProtocolInfo) -> Self {
        Self {
            listening: cached.listening,
            frequent_listening: match cached.frequent_listening_ms {
                250 => FrequentListening::Every250ms,
                1000 => FrequentListening::Every1000ms,
                _ => FrequentListening::No,
            },
            routing: cached.routing,
            max_baud_rate: match cached.max_baud {
                100_000 => MaxBaudRate::Baud100k,
                40_000 => MaxBaudRate::Baud40k,
                _ => MaxBaudRate::Baud9600,
            },
            protocol_version: cached.protocol_version,
            secure: cached.secure,
            beaming: cached.beaming,
            basic_class: cached.basic_class,
            generic_class: cached.generic_class,
            specific_class: cached.specific_class,
        }
    }
}

fn security_class_to_str(class: SecurityClass) -> &'static str {
    match class {
        SecurityClass::S2AccessControl => "s2-access-control",
        SecurityClass::S2Authenticated => "s2-authenticated",
        SecurityClass::S2Unauthenticated => "s2-unauthenticated",
        SecurityClass::S0 => "s0",
    }
}

fn security_class_from_str(s: &str) -> Option<SecurityClass> {
    match s {
        "s2-access-control" => Some(SecurityClass::S2AccessControl),
        "s2-authenticated" => Some(SecurityClass::S2Authenticated),
        "s2-unauthenticated" => Some(SecurityClass::S2Unauthenticated),
        "s0" => Some(SecurityClass::S0),
        _ => None,
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CachedEndpoint {
    pub generic_class: u8,
    pub specific_class: u8,
    pub supported_ccs: Vec<u8>,
}

/// A persisted stateful value.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachedValue {
    pub id: ValueId,
    pub value: Value,
}

/// Everything the cache keeps for one node.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CachedNode {
    pub interview_stage: InterviewStage,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protocol_info: Option<CachedProtocolInfo>,
    #[serde(default)]
    pub supported_ccs: Vec<u8>,
    #[serde(default)]
    pub controlled_ccs: Vec<u8>,
    #[serde(default)]
    pub cc_versions: BTreeMap<u8, u8>,
    #[serde(default)]
    pub endpoints: BTreeMap<u8, CachedEndpoint>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub security_class: Option<String>,
    #[serde(default)]
    pub values: Vec<CachedValue>,
    #[serde(default)]
    pub association_groups: BTreeMap<u8, Vec<u8>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub association_group_count: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wake_up_interval: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub manufacturer_id: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub product_type: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub product_id: Option<u16>,
    #[serde(default)]
    pub interview_attempts: u8,
    #[serde(default)]
    pub dead: bool,
}

impl CachedNode {
    /// Snapshot a live node (values are added separately by the caller).
    pub fn from_node(node: &Node) -> Self {
        Self {
            // The volatile stages are not resumable; persist the last
            // persisted-stage boundary instead.
            interview_stage: if node.interview_stage == InterviewStage::Complete {
                InterviewStage::Complete
            } else {
                node.interview_stage.min(InterviewStage::Static)
            },
            protocol_info: node.protocol_info.as_ref().map(CachedProtocolInfo::from),
            supported_ccs: node.supported_ccs.clone(),
            controlled_ccs: node.controlled_ccs.clone(),
            cc_versions: node.cc_versions.clone(),
            endpoints: node
                .endpoints
                .iter()
                .map(|(&index, ep)| {
                    (
                        index,
                        CachedEndpoint {
                            generic_class: ep.generic_class,
                            specific_class: ep.specific_class,
                            supported_ccs: ep.supported_ccs.clone(),
                        },
                    )
                })
                .collect(),
            security_class: node.security_class.map(|c| security_class_to_str(c).to_string()),
            values: Vec::new(),
            association_groups: node.association_groups.clone(),
            association_group_count: node.association_group_count,
            wake_up_interval: node.wake_up_interval,
            manufacturer_id: node.manufacturer_id,
            product_type: node.product_type,
            product_id: node.product_id,
            interview_attempts: node.interview_attempts,
            dead: node.dead,
        }
    }

    /// Rebuild a node from its cached state.
    pub fn restore(&self, node_id: u8) -> Node {
        let mut node = Node::new(node_id);
        node.interview_stage = self.interview_stage;
        node.protocol_info = self.protocol_info.as_ref().map(NodeProtocolInfo::from);
        node.supported_ccs = self.supported_ccs.clone();
        node.controlled_ccs = self.controlled_ccs.clone();
        node.nif_received = !self.supported_ccs.is_empty();
        node.cc_versions = self.cc_versions.clone();
        node.endpoints = self
            .endpoints
            .iter()
            .map(|(&index, ep)| {
                (
                    index,
                    Endpoint {
                        index,
                        generic_class: ep.generic_class,
                        specific_class: ep.specific_class,
                        supported_ccs: ep.supported_ccs.clone(),
                    },
                )
            })
            .collect();
        node.security_class = self
            .security_class
            .as_deref()
            .and_then(security_class_from_str);
        node.association_groups = self.association_groups.clone();
        node.association_group_count = self.association_group_count;
        node.wake_up_interval = self.wake_up_interval;
        node.manufacturer_id = self.manufacturer_id;
        node.product_type = self.product_type;
        node.product_id = self.product_id;
        node.interview_attempts = self.interview_attempts;
        node.dead = self.dead;
        // A restored sleeping node is presumed asleep until it talks.
        node.awake = !node.is_sleeping_capable();
        node
    }
}

/// The persisted network document.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct NetworkCache {
    pub home_id: u32,
    pub own_node_id: u8,
    pub nodes: BTreeMap<u8, CachedNode>,
}

/// File-backed cache store partitioned by home id.
#[derive(Debug)]
pub struct CacheStore {
    base_dir: PathBuf,
}

impl CacheStore {
    /// Create a store, creating the directory if needed.
    pub fn new(base_dir: PathBuf) -> Result<Self, StorageError> {
        std::fs::create_dir_all(&base_dir)?;
        Ok(Self { base_dir })
    }

    /// Create a store at the default path (`~/.zwave/cache`).
    pub fn default_path() -> Result<Self, StorageError> {
        let home = dirs::home_dir()
            .ok_or_else(|| StorageError::Directory("could not determine home directory".into()))?;
        Self::new(home.join(".zwave").join("cache"))
    }

    fn file_for(&self, home_id: u32) -> PathBuf {
        self.base_dir.join(format!("{home_id:08x}.json"))
    }

    /// Load the cache for a network. Returns `Ok(None)` when nothing was
    /// persisted yet.
    pub async fn load(&self, home_id: u32) -> Result<Option<NetworkCache>, StorageError> {
        let path = self.file_for(home_id);
        match fs::read(&path).await {
            Ok(bytes) => {
                let cache: NetworkCache = serde_json::from_slice(&bytes)
                    .map_err(|e| StorageError::Deserialize(e.to_string()))?;
                Ok(Some(cache))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StorageError::Io(e)),
        }
    }

    /// Persist the cache with at-least-once durability.
    pub async fn flush(&self, cache: &NetworkCache) -> Result<(), StorageError> {
        let bytes = serde_json::to_vec_pretty(cache)
            .map_err(|e| StorageError::Serialize(e.to_string()))?;
        self.atomic_write(&self.file_for(cache.home_id), &bytes).await
    }

    /// Write data atomically: write to a `.tmp` file then rename.
    async fn atomic_write(&self, path: &Path, data: &[u8]) -> Result<(), StorageError> {
        let tmp_path = path.with_extension("tmp");
        fs::write(&tmp_path, data).await?;
        fs::rename(&tmp_path, path).await?;
        Ok(())
    }
}
