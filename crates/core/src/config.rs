//! Configuration system for the simulator.
//!
//! This module defines all configuration structures used to parameterize the
//! core. It provides:
//! 1. **Defaults:** baseline machine constants (widths, queue sizes, latencies).
//! 2. **Structures:** hierarchical config for general, core, and cluster
//!    parameters, deserializable from JSON.
//! 3. **Validation:** structural limits checked once at core construction.

use serde::Deserialize;

use crate::common::CoreError;
use crate::isa::{fu, ARCH_REG_COUNT};

/// Default configuration constants.
///
/// These values define the baseline machine when not overridden in a JSON
/// config file.
pub mod defaults {
    /// Reorder buffer entries.
    pub const ROB_SIZE: usize = 128;

    /// Load queue occupancy limit.
    pub const LDQ_SIZE: usize = 32;

    /// Store queue occupancy limit.
    pub const STQ_SIZE: usize = 32;

    /// Physical register file slots (null + permanent + rename pool).
    pub const PHYS_REG_FILE_SIZE: usize = 128;

    /// First permanent architectural PRF slot (slot 0 is the null register).
    pub const PHYS_REG_ARCH_BASE: usize = 1;

    /// Uops fetched per cycle.
    pub const FETCH_WIDTH: usize = 4;

    /// Fetch queue entries.
    pub const FETCH_QUEUE_SIZE: usize = 32;

    /// Uops renamed per cycle.
    pub const FRONTEND_WIDTH: usize = 4;

    /// Artificial frontend pipeline depth in cycles.
    pub const FRONTEND_STAGES: usize = 4;

    /// Uops dispatched to issue queues per cycle.
    pub const DISPATCH_WIDTH: usize = 4;

    /// Uops committed per cycle.
    pub const COMMIT_WIDTH: usize = 4;

    /// Results written back per cluster per cycle.
    pub const WRITEBACK_WIDTH: usize = 4;

    /// L1 load-use latency in cycles.
    pub const LOAD_LATENCY: u16 = 2;

    /// Highest forwarding cycle modeled by the inter-cluster bypass network.
    pub const MAX_FORWARDING_LATENCY: u8 = 2;

    /// Load/store alias predictor entries.
    pub const LSAP_SIZE: usize = 16;

    /// Cycles without a commit before the deadlock heuristic fires.
    pub const DEADLOCK_CYCLES: u64 = 1024;

    /// Instruction-cache fetch granularity in bytes.
    pub const ICACHE_FETCH_GRANULARITY: u64 = 16;
}

/// Hard ceiling on clusters (the dispatch LUTs use fixed-width masks).
pub const MAX_CLUSTERS: usize = 8;

/// One execution cluster: an issue queue plus a set of functional units.
#[derive(Clone, Debug, Deserialize)]
pub struct ClusterConfig {
    /// Display name.
    pub name: String,
    /// Uops issued from this cluster per cycle.
    pub issue_width: usize,
    /// Functional units reachable from this cluster.
    pub fu_mask: u32,
    /// Issue queue slots.
    pub issueq_size: usize,
}

/// Core sizing and width parameters.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct CoreConfig {
    pub rob_size: usize,
    pub ldq_size: usize,
    pub stq_size: usize,
    pub phys_reg_file_size: usize,
    pub fetch_width: usize,
    pub fetch_queue_size: usize,
    pub frontend_width: usize,
    pub frontend_stages: usize,
    pub dispatch_width: usize,
    pub commit_width: usize,
    pub writeback_width: usize,
    pub load_latency: u16,
    pub max_forwarding_latency: u8,
    pub lsap_size: usize,
    /// Execution clusters, oldest-priority order.
    pub clusters: Vec<ClusterConfig>,
    /// `intercluster_latency[src][dst]` in cycles; 0 on the diagonal.
    pub intercluster_latency: Vec<Vec<u8>>,
}

impl Default for CoreConfig {
    fn default() -> Self {
        let clusters = vec![
            ClusterConfig {
                name: "int0".to_string(),
                issue_width: 2,
                fu_mask: fu::ALU0 | fu::MUL0 | fu::BR0,
                issueq_size: 16,
            },
            ClusterConfig {
                name: "int1".to_string(),
                issue_width: 2,
                fu_mask: fu::ALU1 | fu::BR0,
                issueq_size: 16,
            },
            ClusterConfig {
                name: "ld".to_string(),
                issue_width: 1,
                fu_mask: fu::LD0,
                issueq_size: 16,
            },
            ClusterConfig {
                name: "st".to_string(),
                issue_width: 1,
                fu_mask: fu::ST0,
                issueq_size: 16,
            },
        ];
        let n = clusters.len();
        let intercluster_latency = (0..n)
            .map(|src| (0..n).map(|dst| u8::from(src != dst)).collect())
            .collect();
        CoreConfig {
            rob_size: defaults::ROB_SIZE,
            ldq_size: defaults::LDQ_SIZE,
            stq_size: defaults::STQ_SIZE,
            phys_reg_file_size: defaults::PHYS_REG_FILE_SIZE,
            fetch_width: defaults::FETCH_WIDTH,
            fetch_queue_size: defaults::FETCH_QUEUE_SIZE,
            frontend_width: defaults::FRONTEND_WIDTH,
            frontend_stages: defaults::FRONTEND_STAGES,
            dispatch_width: defaults::DISPATCH_WIDTH,
            commit_width: defaults::COMMIT_WIDTH,
            writeback_width: defaults::WRITEBACK_WIDTH,
            load_latency: defaults::LOAD_LATENCY,
            max_forwarding_latency: defaults::MAX_FORWARDING_LATENCY,
            lsap_size: defaults::LSAP_SIZE,
            clusters,
            intercluster_latency,
        }
    }
}

/// General simulation controls.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Per-stage trace lines on stderr.
    pub trace: bool,
    /// Cross-check refcounts and state lists every cycle (slow).
    pub check_invariants: bool,
    /// Stop after committing this many macro-ops (0 = unbounded).
    pub max_macro_ops: u64,
    /// Stop after this many cycles (0 = unbounded).
    pub max_cycles: u64,
    /// Deadlock heuristic threshold in commit-free cycles.
    pub deadlock_cycles: u64,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        GeneralConfig {
            trace: false,
            check_invariants: false,
            max_macro_ops: 0,
            max_cycles: 0,
            deadlock_cycles: defaults::DEADLOCK_CYCLES,
        }
    }
}

/// Root configuration.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub general: GeneralConfig,
    pub core: CoreConfig,
}

impl Config {
    /// Parses a configuration from JSON, applying defaults for absent fields.
    pub fn from_json(json: &str) -> Result<Config, CoreError> {
        let config: Config =
            serde_json::from_str(json).map_err(|e| CoreError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Checks structural limits the engine depends on.
    pub fn validate(&self) -> Result<(), CoreError> {
        let core = &self.core;
        if core.rob_size == 0 || core.rob_size > 256 {
            return Err(CoreError::Config(format!(
                "rob_size {} outside 1..=256 (issue queue tags are bytes)",
                core.rob_size
            )));
        }
        if core.ldq_size == 0 || core.stq_size == 0 {
            return Err(CoreError::Config("ldq_size/stq_size must be nonzero".into()));
        }
        if core.phys_reg_file_size < defaults::PHYS_REG_ARCH_BASE + ARCH_REG_COUNT + core.rob_size / 4 {
            return Err(CoreError::Config(format!(
                "phys_reg_file_size {} too small for {} permanent slots plus a rename pool",
                core.phys_reg_file_size, ARCH_REG_COUNT
            )));
        }
        if core.clusters.is_empty() || core.clusters.len() > MAX_CLUSTERS {
            return Err(CoreError::Config(format!(
                "cluster count {} outside 1..={}",
                core.clusters.len(),
                MAX_CLUSTERS
            )));
        }
        for cluster in &core.clusters {
            if cluster.issueq_size == 0 || cluster.issueq_size > 64 {
                return Err(CoreError::Config(format!(
                    "cluster {}: issueq_size {} outside 1..=64",
                    cluster.name, cluster.issueq_size
                )));
            }
            if cluster.issue_width == 0 {
                return Err(CoreError::Config(format!(
                    "cluster {}: issue_width must be nonzero",
                    cluster.name
                )));
            }
            if cluster.fu_mask == 0 || cluster.fu_mask & !fu::ALL != 0 {
                return Err(CoreError::Config(format!(
                    "cluster {}: fu_mask {:#x} invalid",
                    cluster.name, cluster.fu_mask
                )));
            }
        }
        let n = core.clusters.len();
        if core.intercluster_latency.len() != n
            || core.intercluster_latency.iter().any(|row| row.len() != n)
        {
            return Err(CoreError::Config(
                "intercluster_latency must be a square matrix over the clusters".into(),
            ));
        }
        for (src, row) in core.intercluster_latency.iter().enumerate() {
            for (dst, &lat) in row.iter().enumerate() {
                if lat > core.max_forwarding_latency {
                    return Err(CoreError::Config(format!(
                        "intercluster_latency[{}][{}] = {} exceeds max_forwarding_latency {}",
                        src, dst, lat, core.max_forwarding_latency
                    )));
                }
            }
        }
        // Every opcode must be executable somewhere.
        let all_fus: u32 = core.clusters.iter().fold(0, |acc, c| acc | c.fu_mask);
        if all_fus != fu::ALL {
            return Err(CoreError::Config(format!(
                "clusters cover functional units {:#x}, need {:#x}",
                all_fus,
                fu::ALL
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_validates() {
        Config::default().validate().unwrap();
    }

    #[test]
    fn test_from_json_partial() {
        let config = Config::from_json(r#"{"core": {"rob_size": 64}}"#).unwrap();
        assert_eq!(config.core.rob_size, 64);
        assert_eq!(config.core.ldq_size, defaults::LDQ_SIZE);
    }

    #[test]
    fn test_rejects_oversized_rob() {
        let config = Config::from_json(r#"{"core": {"rob_size": 300}}"#);
        assert!(config.is_err());
    }

    #[test]
    fn test_rejects_bad_latency_matrix() {
        let mut config = Config::default();
        config.core.intercluster_latency[0][1] = 9;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_missing_store_unit() {
        let mut config = Config::default();
        config.core.clusters.retain(|c| c.name != "st");
        config.core.intercluster_latency = vec![vec![0; 3]; 3];
        assert!(config.validate().is_err());
    }
}
