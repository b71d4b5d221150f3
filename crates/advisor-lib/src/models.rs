//! Core data model for the CPU resource advisor
//!
//! Types shared between the metadata cache, the QoS regions and the
//! provision plan sent to the CPU enforcement server.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// CPU quantities are whole cores.
pub type CpuQuantity = i64;

/// NUMA id used in pool entries when no NUMA preference is needed.
pub const FAKED_NUMA_ID: i64 = -1;

/// Pool receiving the CPUs reserved for system components.
pub const POOL_NAME_RESERVE: &str = "reserve";
/// Pool backing shared-cores workloads.
pub const POOL_NAME_SHARE: &str = "share";
/// Pool backing reclaimed (best-effort) workloads.
pub const POOL_NAME_RECLAIM: &str = "reclaim";
/// Owner pool of dedicated-cores containers; has no entry in the cache.
pub const POOL_NAME_DEDICATED: &str = "dedicated";

/// QoS class of a workload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QosLevel {
    SharedCores,
    DedicatedCores,
    ReclaimedCores,
    SystemCores,
}

impl QosLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            QosLevel::SharedCores => "shared_cores",
            QosLevel::DedicatedCores => "dedicated_cores",
            QosLevel::ReclaimedCores => "reclaimed_cores",
            QosLevel::SystemCores => "system_cores",
        }
    }
}

impl fmt::Display for QosLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An ordered set of CPU ids. Also used for sets of NUMA ids, which share
/// the same representation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CpuSet(BTreeSet<usize>);

impl CpuSet {
    pub fn new() -> Self {
        Self(BTreeSet::new())
    }

    pub fn from_ids(ids: impl IntoIterator<Item = usize>) -> Self {
        Self(ids.into_iter().collect())
    }

    /// Contiguous range `[start, end)`.
    pub fn from_range(start: usize, end: usize) -> Self {
        Self((start..end).collect())
    }

    pub fn size(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn contains(&self, id: usize) -> bool {
        self.0.contains(&id)
    }

    pub fn insert(&mut self, id: usize) {
        self.0.insert(id);
    }

    /// Ids in `self` but not in `other`.
    pub fn difference(&self, other: &CpuSet) -> CpuSet {
        Self(self.0.difference(&other.0).copied().collect())
    }

    pub fn union(&self, other: &CpuSet) -> CpuSet {
        Self(self.0.union(&other.0).copied().collect())
    }

    pub fn is_subset(&self, other: &CpuSet) -> bool {
        self.0.is_subset(&other.0)
    }

    pub fn iter(&self) -> impl Iterator<Item = usize> + '_ {
        self.0.iter().copied()
    }

    pub fn to_vec(&self) -> Vec<usize> {
        self.0.iter().copied().collect()
    }
}

impl FromIterator<usize> for CpuSet {
    fn from_iter<T: IntoIterator<Item = usize>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl fmt::Display for CpuSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ids: Vec<String> = self.0.iter().map(|id| id.to_string()).collect();
        write!(f, "{{{}}}", ids.join(","))
    }
}

/// Container metadata as maintained by the metadata cache
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerInfo {
    pub pod_uid: String,
    pub pod_name: String,
    pub container_name: String,
    pub qos_level: QosLevel,
    /// Requested CPU in cores.
    pub cpu_request: f64,
    pub owner_pool_name: String,
    /// NUMA id to the CPUs assigned on that NUMA.
    pub topology_aware_assignments: BTreeMap<usize, CpuSet>,
    pub is_numa_binding: bool,
    pub is_numa_exclusive: bool,
    /// Regions the container currently belongs to; rewritten every cycle.
    #[serde(default)]
    pub region_names: BTreeSet<String>,
}

/// Pool metadata as maintained by the metadata cache
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolInfo {
    pub pool_name: String,
    /// NUMA id to the CPUs assigned on that NUMA.
    pub topology_aware_assignments: BTreeMap<usize, CpuSet>,
    /// Regions serving the pool; rewritten every cycle.
    #[serde(default)]
    pub region_names: BTreeSet<String>,
}

impl PoolInfo {
    /// Total CPUs across all NUMA assignments.
    pub fn pool_size(&self) -> usize {
        self.topology_aware_assignments.values().map(CpuSet::size).sum()
    }

    /// CPUs assigned on the given NUMA, zero when the pool has none there.
    pub fn size_on_numa(&self, numa_id: usize) -> usize {
        self.topology_aware_assignments
            .get(&numa_id)
            .map_or(0, CpuSet::size)
    }
}

/// Kind of a QoS region
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegionType {
    Share,
    DedicatedNumaExclusive,
}

impl RegionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RegionType::Share => "share",
            RegionType::DedicatedNumaExclusive => "dedicated_numa_exclusive",
        }
    }
}

impl fmt::Display for RegionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Control knobs a provision policy can emit
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControlKnobName {
    /// Share regions: CPUs to dedicate to non-reclaimed workloads.
    NonReclaimedCpusetSize,
    /// Dedicated-NUMA-exclusive regions: CPUs on the bound NUMA available
    /// for reclaim.
    ReclaimedCpuSupplied,
}

/// Action attached to a control knob value
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControlKnobAction {
    #[default]
    None,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ControlKnobItem {
    pub value: f64,
    pub action: ControlKnobAction,
}

impl ControlKnobItem {
    pub fn new(value: f64) -> Self {
        Self {
            value,
            action: ControlKnobAction::None,
        }
    }
}

pub type ControlKnobMap = BTreeMap<ControlKnobName, ControlKnobItem>;

/// Per-region snapshot handed to the policies once per cycle
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceEssentials {
    /// CPUs in the region's binding NUMAs.
    pub total: usize,
    /// Reserve pool CPUs intersecting the binding NUMAs.
    pub reserve_pool_size: usize,
    /// Region share of the node-wide reserved-for-allocate CPUs.
    pub reserved_for_allocate: usize,
    pub enable_reclaim: bool,
}

/// Region state published back to the metadata cache every cycle
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegionInfo {
    pub region_type: RegionType,
    pub binding_numas: CpuSet,
    pub control_knob_map: ControlKnobMap,
    pub provision_policy_top_priority: String,
    pub provision_policy_in_use: String,
    pub headroom_policy_top_priority: String,
    pub headroom_policy_in_use: String,
    /// Filled after the headroom pass of the same cycle.
    #[serde(default)]
    pub headroom: CpuQuantity,
}

pub type RegionEntries = BTreeMap<String, RegionInfo>;

/// Set of pods with their containers, as held by a region
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PodSet(BTreeMap<String, BTreeSet<String>>);

impl PodSet {
    pub fn new() -> Self {
        Self(BTreeMap::new())
    }

    pub fn insert(&mut self, pod_uid: &str, container_name: &str) {
        self.0
            .entry(pod_uid.to_string())
            .or_default()
            .insert(container_name.to_string());
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Number of containers across all pods.
    pub fn container_count(&self) -> usize {
        self.0.values().map(BTreeSet::len).sum()
    }

    pub fn clear(&mut self) {
        self.0.clear();
    }

    /// Iterate `(pod_uid, container_name)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> + '_ {
        self.0.iter().flat_map(|(pod_uid, containers)| {
            containers
                .iter()
                .map(move |name| (pod_uid.as_str(), name.as_str()))
        })
    }
}

/// Calculation result conveyed to the CPU enforcement server, one per cycle
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InternalCalculationResult {
    /// `pool name -> NUMA id -> cores`; [`FAKED_NUMA_ID`] means no NUMA
    /// preference.
    pub pool_entries: BTreeMap<String, BTreeMap<i64, CpuQuantity>>,
}

impl InternalCalculationResult {
    pub fn set_pool_entry(&mut self, pool_name: &str, numa_id: i64, cores: CpuQuantity) {
        self.pool_entries
            .entry(pool_name.to_string())
            .or_default()
            .insert(numa_id, cores);
    }

    pub fn get_pool_entry(&self, pool_name: &str, numa_id: i64) -> Option<CpuQuantity> {
        self.pool_entries
            .get(pool_name)
            .and_then(|numas| numas.get(&numa_id))
            .copied()
    }
}
