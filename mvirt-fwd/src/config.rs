//! Router configuration.

use std::collections::HashSet;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{FwdError, Result};
use crate::family::parse_mac;
use crate::neighbor::DEFAULT_BUCKETS;
use crate::port::{Port, PortTable};
use crate::trie::DEFAULT_MAX_NODES;

/// Default bound of the control event queue.
pub const DEFAULT_EVENT_QUEUE_CAPACITY: usize = 1024;

/// A router port as configured.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortConfig {
    pub name: String,
    pub if_index: u32,
    /// Colon notation, e.g. "52:54:00:12:34:56"
    pub mac: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouterConfig {
    /// Packet worker threads, one per core by default.
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// Router ports; the port index is the position in this list.
    pub ports: Vec<PortConfig>,
    /// Node pool capacity of each FIB trie.
    #[serde(default = "default_trie_max_nodes")]
    pub trie_max_nodes: usize,
    /// Bucket count of every neighbor table.
    #[serde(default = "default_neighbor_buckets")]
    pub neighbor_buckets: usize,
    #[serde(default = "default_event_queue_capacity")]
    pub event_queue_capacity: usize,
}

fn default_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

fn default_trie_max_nodes() -> usize {
    DEFAULT_MAX_NODES
}

fn default_neighbor_buckets() -> usize {
    DEFAULT_BUCKETS
}

fn default_event_queue_capacity() -> usize {
    DEFAULT_EVENT_QUEUE_CAPACITY
}

impl RouterConfig {
    /// Configuration with default sizes for the given ports.
    pub fn new(ports: Vec<PortConfig>) -> Self {
        RouterConfig {
            workers: default_workers(),
            ports,
            trie_max_nodes: default_trie_max_nodes(),
            neighbor_buckets: default_neighbor_buckets(),
            event_queue_capacity: default_event_queue_capacity(),
        }
    }

    /// Parse and validate a JSON configuration.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: RouterConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a JSON configuration file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let json = fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    pub fn validate(&self) -> Result<()> {
        if self.ports.is_empty() {
            return Err(FwdError::Config("at least one port is required".to_string()));
        }
        if self.workers == 0 {
            return Err(FwdError::Config("workers must be non-zero".to_string()));
        }
        if self.trie_max_nodes == 0 {
            return Err(FwdError::Config("trie_max_nodes must be non-zero".to_string()));
        }
        if self.neighbor_buckets == 0 {
            return Err(FwdError::Config(
                "neighbor_buckets must be non-zero".to_string(),
            ));
        }
        if self.event_queue_capacity == 0 {
            return Err(FwdError::Config(
                "event_queue_capacity must be non-zero".to_string(),
            ));
        }

        let mut if_indices = HashSet::new();
        for port in &self.ports {
            if !if_indices.insert(port.if_index) {
                return Err(FwdError::Config(format!(
                    "duplicate interface index {} (port {})",
                    port.if_index, port.name
                )));
            }
            if parse_mac(&port.mac).is_none() {
                return Err(FwdError::Config(format!(
                    "invalid MAC address '{}' (port {})",
                    port.mac, port.name
                )));
            }
        }
        Ok(())
    }

    /// Build the port table.
    pub fn port_table(&self) -> Result<PortTable> {
        let ports = self
            .ports
            .iter()
            .map(|port| {
                let mac = parse_mac(&port.mac).ok_or_else(|| {
                    FwdError::Config(format!("invalid MAC address '{}'", port.mac))
                })?;
                Ok(Port {
                    name: port.name.clone(),
                    if_index: port.if_index,
                    mac,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(PortTable::new(ports))
    }
}
