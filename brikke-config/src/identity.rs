//! Identity subsystem configuration parameters.
//!
//! Manages the properties that select and size the identity allocator:
//! - Allocator variant selection (full vs. no-op)
//! - Local identity space sizing
//! - Checkpoint persistence
//! - Cluster-scope coordination

use std::net::IpAddr;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use validator::{self, Validate};

use crate::validation;

/// Identity allocation configuration.
#[derive(Debug, Serialize, Deserialize, Validate, Clone)]
pub struct IdentityConfig {
    /// Whether the network-policy subsystem is active. When disabled the
    /// process runs the no-op allocator: nothing is allocated, persisted,
    /// or propagated.
    #[serde(default = "default_true")]
    pub network_policy_enabled: bool,

    /// Whether an external controller owns cluster-wide identity lifecycle.
    /// Hidden/advanced: flipping this changes a cluster-wide operational
    /// mode, not a per-process tunable.
    #[serde(default)]
    pub operator_manages_identities: bool,

    /// Size of the local numeric identity space (must be a power of two).
    #[serde(default = "default_local_capacity")]
    #[validate(range(min = 16, max = 16777216))]
    #[validate(custom(function = validation::validate_power_of_two))]
    pub local_identity_capacity: usize,

    /// Checkpoint persistence settings.
    #[validate(nested)]
    #[serde(default)]
    pub checkpoint: CheckpointConfig,

    /// Cluster-scope coordination settings.
    #[validate(nested)]
    #[serde(default)]
    pub cluster: ClusterConfig,
}

fn default_true() -> bool {
    true
}

fn default_local_capacity() -> usize {
    4096
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            network_policy_enabled: default_true(),
            operator_manages_identities: false,
            local_identity_capacity: default_local_capacity(),
            checkpoint: CheckpointConfig::default(),
            cluster: ClusterConfig::default(),
        }
    }
}

/// Checkpoint persistence configuration.
#[derive(Debug, Serialize, Deserialize, Validate, Clone)]
pub struct CheckpointConfig {
    /// Directory holding the local identity snapshot.
    #[serde(default = "default_checkpoint_directory")]
    pub directory: PathBuf,

    /// Write a fresh snapshot on every change to the live identity set.
    #[serde(default = "default_true")]
    pub save_on_change: bool,
}

fn default_checkpoint_directory() -> PathBuf {
    PathBuf::from("/var/run/brikke")
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        Self {
            directory: default_checkpoint_directory(),
            save_on_change: default_true(),
        }
    }
}

/// Cluster-scope coordination configuration.
#[derive(Debug, Serialize, Deserialize, Validate, Clone)]
pub struct ClusterConfig {
    /// Whether cluster-wide allocation is requested. Requires a coordination
    /// backend to be installed at startup.
    #[serde(default)]
    pub enabled: bool,

    /// Name of this cluster within the mesh.
    #[serde(default = "default_cluster_name")]
    #[validate(custom(function = validation::validate_cluster_name))]
    pub name: String,

    /// Address of the local node, used as the suffix for coordination keys.
    /// Allocation of cluster-scope identities fails until this is known.
    #[serde(default)]
    pub node_address: Option<IpAddr>,
}

fn default_cluster_name() -> String {
    "default".into()
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            name: default_cluster_name(),
            node_address: None,
        }
    }
}
