//! Canonical provision policy
//!
//! Conservative sizing from container CPU requests alone. Share regions get
//! a non-reclaimed cpuset sized to the summed requests, clamped between the
//! reserve pool and the region limit; dedicated-NUMA-exclusive regions
//! supply whatever the requests leave unused on their NUMA.

use super::ProvisionPolicy;
use crate::metacache::MetaReader;
use crate::models::{
    ControlKnobItem, ControlKnobMap, ControlKnobName, PodSet, RegionType, ResourceEssentials,
};
use anyhow::Result;
use std::sync::Arc;
use tracing::warn;

pub struct CanonicalProvisionPolicy {
    region_name: String,
    region_type: RegionType,
    meta_reader: Arc<dyn MetaReader>,
}

impl CanonicalProvisionPolicy {
    pub fn new(region_name: &str, region_type: RegionType, meta_reader: Arc<dyn MetaReader>) -> Self {
        Self {
            region_name: region_name.to_string(),
            region_type,
            meta_reader,
        }
    }

    /// Summed CPU requests of the region's containers, rounded up to whole
    /// cores. Containers missing from the cache are skipped.
    fn cpu_requirement(&self, pod_set: &PodSet) -> i64 {
        let mut requests = 0.0;
        for (pod_uid, container_name) in pod_set.iter() {
            match self.meta_reader.get_container_info(pod_uid, container_name) {
                Some(ci) => requests += ci.cpu_request,
                None => warn!(
                    region = %self.region_name,
                    pod_uid, container_name,
                    "container in region but not in metacache"
                ),
            }
        }
        requests.ceil() as i64
    }
}

impl ProvisionPolicy for CanonicalProvisionPolicy {
    fn name(&self) -> &str {
        super::POLICY_NAME_CANONICAL
    }

    fn update(
        &mut self,
        essentials: &ResourceEssentials,
        pod_set: &PodSet,
    ) -> Result<ControlKnobMap> {
        let total = essentials.total as i64;
        let reserve = essentials.reserve_pool_size as i64;
        let reserved_for_allocate = essentials.reserved_for_allocate as i64;
        let requirement = self.cpu_requirement(pod_set);

        let mut knobs = ControlKnobMap::new();
        match self.region_type {
            RegionType::Share => {
                let size = if essentials.enable_reclaim {
                    requirement.max(reserve).min(total - reserved_for_allocate)
                } else {
                    total - reserve
                };
                knobs.insert(
                    ControlKnobName::NonReclaimedCpusetSize,
                    ControlKnobItem::new(size.max(0) as f64),
                );
            }
            RegionType::DedicatedNumaExclusive => {
                let supplied = if essentials.enable_reclaim {
                    total - requirement - reserved_for_allocate
                } else {
                    0
                };
                knobs.insert(
                    ControlKnobName::ReclaimedCpuSupplied,
                    ControlKnobItem::new(supplied.max(0) as f64),
                );
            }
        }
        Ok(knobs)
    }
}
