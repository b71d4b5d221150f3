//! Advisor configuration
//!
//! The reclaimed-resource section may be hot-reloaded by the configuration
//! subsystem, so the advisor keeps it behind a shared lock and re-reads
//! every field it needs once per update cycle.

use serde::Deserialize;
use std::sync::{Arc, RwLock};
use std::time::Duration;

/// Reclaimed-resource policy knobs
#[derive(Debug, Clone, Deserialize)]
pub struct ReclaimedResourceConfig {
    /// Whether idle CPUs may be handed to reclaimed workloads.
    #[serde(default)]
    pub enable_reclaim: bool,

    /// CPUs reserved out of the reclaim budget, never allocated.
    #[serde(default = "default_reserved_for_allocate_cpus")]
    pub reserved_resource_for_allocate_cpus: i64,

    /// CPUs withheld from the reclaimed capacity reported upstream.
    #[serde(default)]
    pub reserved_resource_for_report_cpus: i64,

    /// Floor of the reclaimed capacity reported upstream.
    #[serde(default = "default_min_reclaimed_for_report_cpus")]
    pub min_reclaimed_resource_for_report_cpus: i64,
}

fn default_reserved_for_allocate_cpus() -> i64 {
    4
}

fn default_min_reclaimed_for_report_cpus() -> i64 {
    4
}

impl Default for ReclaimedResourceConfig {
    fn default() -> Self {
        Self {
            enable_reclaim: false,
            reserved_resource_for_allocate_cpus: default_reserved_for_allocate_cpus(),
            reserved_resource_for_report_cpus: 0,
            min_reclaimed_resource_for_report_cpus: default_min_reclaimed_for_report_cpus(),
        }
    }
}

/// Top-level advisor configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AdvisorConfig {
    /// Seconds after construction during which plans are computed but not
    /// sent downstream.
    #[serde(default = "default_startup_period_secs")]
    pub startup_period_secs: u64,

    /// Provision policy each region instantiates, by registered name.
    #[serde(default = "default_policy_name")]
    pub provision_policy: String,

    /// Headroom policy each region instantiates, by registered name.
    #[serde(default = "default_policy_name")]
    pub headroom_policy: String,

    #[serde(default)]
    pub reclaimed_resource: ReclaimedResourceConfig,
}

fn default_startup_period_secs() -> u64 {
    30
}

fn default_policy_name() -> String {
    crate::policy::POLICY_NAME_CANONICAL.to_string()
}

impl Default for AdvisorConfig {
    fn default() -> Self {
        Self {
            startup_period_secs: default_startup_period_secs(),
            provision_policy: default_policy_name(),
            headroom_policy: default_policy_name(),
            reclaimed_resource: ReclaimedResourceConfig::default(),
        }
    }
}

impl AdvisorConfig {
    pub fn startup_period(&self) -> Duration {
        Duration::from_secs(self.startup_period_secs)
    }
}

/// Handle the advisor and the configuration subsystem share.
pub type SharedAdvisorConfig = Arc<RwLock<AdvisorConfig>>;

/// Wrap a configuration for sharing with the advisor.
pub fn shared(conf: AdvisorConfig) -> SharedAdvisorConfig {
    Arc::new(RwLock::new(conf))
}
