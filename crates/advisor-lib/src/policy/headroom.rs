//! Canonical headroom policy
//!
//! Reads the region's just-published control knobs back from the metadata
//! cache, so it must run after the cycle's region entries were written.

use super::HeadroomPolicy;
use crate::metacache::MetaReader;
use crate::models::{ControlKnobName, CpuQuantity, RegionType, ResourceEssentials};
use anyhow::{Context, Result};
use std::sync::Arc;

pub struct CanonicalHeadroomPolicy {
    region_name: String,
    region_type: RegionType,
    meta_reader: Arc<dyn MetaReader>,
}

impl CanonicalHeadroomPolicy {
    pub fn new(region_name: &str, region_type: RegionType, meta_reader: Arc<dyn MetaReader>) -> Self {
        Self {
            region_name: region_name.to_string(),
            region_type,
            meta_reader,
        }
    }

    fn knob_value(&self, knob: ControlKnobName) -> Result<f64> {
        let entry = self
            .meta_reader
            .get_region_info(&self.region_name)
            .with_context(|| format!("no published entry for region {}", self.region_name))?;
        let item = entry
            .control_knob_map
            .get(&knob)
            .with_context(|| format!("region {} entry missing knob {:?}", self.region_name, knob))?;
        Ok(item.value)
    }
}

impl HeadroomPolicy for CanonicalHeadroomPolicy {
    fn name(&self) -> &str {
        super::POLICY_NAME_CANONICAL
    }

    fn update(&mut self, essentials: &ResourceEssentials) -> Result<CpuQuantity> {
        match self.region_type {
            RegionType::Share => {
                if !essentials.enable_reclaim {
                    return Ok(0);
                }
                let non_reclaimed = self.knob_value(ControlKnobName::NonReclaimedCpusetSize)?;
                let headroom = essentials.total as i64
                    - essentials.reserve_pool_size as i64
                    - non_reclaimed as i64;
                Ok(headroom.max(0))
            }
            RegionType::DedicatedNumaExclusive => {
                let supplied = self.knob_value(ControlKnobName::ReclaimedCpuSupplied)?;
                Ok(supplied as i64)
            }
        }
    }
}
