//! Agent configuration

use advisor_lib::config::{AdvisorConfig, ReclaimedResourceConfig};
use anyhow::Result;
use serde::Deserialize;

/// Agent configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AgentConfig {
    /// Node name from the Kubernetes downward API
    #[serde(default = "default_node_name")]
    pub node_name: String,

    /// API server port for health/metrics/headroom
    #[serde(default = "default_api_port")]
    pub api_port: u16,

    /// Seconds between advisor update triggers
    #[serde(default = "default_trigger_interval")]
    pub trigger_interval_secs: u64,

    /// CPUs seeded into the reserve pool until the metadata sync subsystem
    /// populates the cache
    #[serde(default = "default_reserve_pool_cpus")]
    pub reserve_pool_cpus: usize,

    /// Whether idle CPUs may be handed to reclaimed workloads
    #[serde(default)]
    pub enable_reclaim: bool,

    /// CPUs reserved out of the reclaim budget, never allocated
    #[serde(default = "default_reserved_cpus_for_allocate")]
    pub reserved_cpus_for_allocate: i64,

    /// Seconds after startup during which plans are suppressed
    #[serde(default = "default_startup_period")]
    pub startup_period_secs: u64,
}

fn default_node_name() -> String {
    std::env::var("NODE_NAME").unwrap_or_else(|_| "unknown".to_string())
}

fn default_api_port() -> u16 {
    8080
}

fn default_trigger_interval() -> u64 {
    10
}

fn default_reserve_pool_cpus() -> usize {
    2
}

fn default_reserved_cpus_for_allocate() -> i64 {
    4
}

fn default_startup_period() -> u64 {
    30
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            node_name: default_node_name(),
            api_port: default_api_port(),
            trigger_interval_secs: default_trigger_interval(),
            reserve_pool_cpus: default_reserve_pool_cpus(),
            enable_reclaim: false,
            reserved_cpus_for_allocate: default_reserved_cpus_for_allocate(),
            startup_period_secs: default_startup_period(),
        }
    }
}

impl AgentConfig {
    /// Load configuration from the environment.
    pub fn load() -> Result<Self> {
        let config = config::Config::builder()
            .add_source(config::Environment::with_prefix("AGENT"))
            .build()?;

        Ok(config.try_deserialize().unwrap_or_else(|_| AgentConfig::default()))
    }

    /// Advisor view of the agent configuration.
    pub fn advisor_config(&self) -> AdvisorConfig {
        AdvisorConfig {
            startup_period_secs: self.startup_period_secs,
            reclaimed_resource: ReclaimedResourceConfig {
                enable_reclaim: self.enable_reclaim,
                reserved_resource_for_allocate_cpus: self.reserved_cpus_for_allocate,
                ..ReclaimedResourceConfig::default()
            },
            ..AdvisorConfig::default()
        }
    }
}
