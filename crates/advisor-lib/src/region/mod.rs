//! QoS regions
//!
//! A region is the advisor's provisioning unit: a set of containers bound to
//! a set of NUMA nodes, carrying one provision policy and one headroom
//! policy. Regions are rebuilt from the container population every cycle and
//! garbage-collected as soon as they become empty.

use crate::config::AdvisorConfig;
use crate::metacache::MetaReader;
use crate::models::{
    ContainerInfo, ControlKnobMap, CpuQuantity, CpuSet, PodSet, QosLevel, RegionType,
    ResourceEssentials,
};
use crate::policy::{new_headroom_policy, new_provision_policy, HeadroomPolicy, ProvisionPolicy};
use anyhow::{anyhow, bail, Result};
use std::sync::Arc;
use tracing::error;
use uuid::Uuid;

const REGION_NAME_SEPARATOR: &str = "-";

fn generate_region_name(region_type: RegionType) -> String {
    format!("{}{}{}", region_type, REGION_NAME_SEPARATOR, Uuid::new_v4())
}

pub struct QosRegion {
    name: String,
    region_type: RegionType,
    owner_pool_name: String,

    binding_numas: CpuSet,
    pod_set: PodSet,
    essentials: ResourceEssentials,

    provision_policy: Box<dyn ProvisionPolicy>,
    headroom_policy: Box<dyn HeadroomPolicy>,

    control_knobs: Option<ControlKnobMap>,
    provision_failed: bool,
    headroom: Option<CpuQuantity>,
    headroom_failed: bool,
}

impl QosRegion {
    fn new(
        region_type: RegionType,
        owner_pool_name: &str,
        binding_numas: CpuSet,
        conf: &AdvisorConfig,
        meta_reader: Arc<dyn MetaReader>,
    ) -> Result<Self> {
        let name = generate_region_name(region_type);
        let provision_policy = new_provision_policy(
            &conf.provision_policy,
            &name,
            region_type,
            meta_reader.clone(),
        )?;
        let headroom_policy =
            new_headroom_policy(&conf.headroom_policy, &name, region_type, meta_reader)?;

        Ok(Self {
            name,
            region_type,
            owner_pool_name: owner_pool_name.to_string(),
            binding_numas,
            pod_set: PodSet::new(),
            essentials: ResourceEssentials::default(),
            provision_policy,
            headroom_policy,
            control_knobs: None,
            provision_failed: false,
            headroom: None,
            headroom_failed: false,
        })
    }

    /// Region serving a pool of shared-cores containers. Binding NUMAs are
    /// assigned by the advisor once the non-binding set is known.
    pub fn new_share(
        owner_pool_name: &str,
        conf: &AdvisorConfig,
        meta_reader: Arc<dyn MetaReader>,
    ) -> Result<Self> {
        Self::new(
            RegionType::Share,
            owner_pool_name,
            CpuSet::new(),
            conf,
            meta_reader,
        )
    }

    /// Region for a NUMA-binding container, bound to exactly one NUMA.
    pub fn new_dedicated_numa_exclusive(
        owner_pool_name: &str,
        numa_id: usize,
        conf: &AdvisorConfig,
        meta_reader: Arc<dyn MetaReader>,
    ) -> Result<Self> {
        Self::new(
            RegionType::DedicatedNumaExclusive,
            owner_pool_name,
            CpuSet::from_ids([numa_id]),
            conf,
            meta_reader,
        )
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn region_type(&self) -> RegionType {
        self.region_type
    }

    pub fn owner_pool_name(&self) -> &str {
        &self.owner_pool_name
    }

    pub fn is_empty(&self) -> bool {
        self.pod_set.is_empty()
    }

    pub fn pod_set(&self) -> &PodSet {
        &self.pod_set
    }

    /// Drop all containers; called at the start of every assignment pass.
    pub fn clear(&mut self) {
        self.pod_set.clear();
    }

    pub fn add_container(&mut self, ci: &ContainerInfo) -> Result<()> {
        match self.region_type {
            RegionType::Share => {
                if ci.qos_level != QosLevel::SharedCores {
                    bail!(
                        "container {}/{} with qos {} cannot join share region {}",
                        ci.pod_uid,
                        ci.container_name,
                        ci.qos_level,
                        self.name
                    );
                }
                if ci.owner_pool_name != self.owner_pool_name {
                    bail!(
                        "container {}/{} owned by pool {} cannot join region {} of pool {}",
                        ci.pod_uid,
                        ci.container_name,
                        ci.owner_pool_name,
                        self.name,
                        self.owner_pool_name
                    );
                }
            }
            RegionType::DedicatedNumaExclusive => {
                if !ci.is_numa_binding {
                    bail!(
                        "container {}/{} is not numa-binding, cannot join region {}",
                        ci.pod_uid,
                        ci.container_name,
                        self.name
                    );
                }
                let bound = self
                    .binding_numas
                    .iter()
                    .all(|numa| ci.topology_aware_assignments.contains_key(&numa));
                if !bound {
                    bail!(
                        "container {}/{} has no assignment on numas {} of region {}",
                        ci.pod_uid,
                        ci.container_name,
                        self.binding_numas,
                        self.name
                    );
                }
            }
        }

        self.pod_set.insert(&ci.pod_uid, &ci.container_name);
        Ok(())
    }

    pub fn binding_numas(&self) -> &CpuSet {
        &self.binding_numas
    }

    pub fn set_binding_numas(&mut self, numas: CpuSet) {
        self.binding_numas = numas;
    }

    pub fn set_essentials(&mut self, essentials: ResourceEssentials) {
        self.essentials = essentials;
    }

    pub fn essentials(&self) -> &ResourceEssentials {
        &self.essentials
    }

    /// Run the provision policy. On failure the region keeps its previous
    /// knobs internally but reports none until a successful update.
    pub fn try_update_provision(&mut self) {
        match self.provision_policy.update(&self.essentials, &self.pod_set) {
            Ok(knobs) => {
                self.control_knobs = Some(knobs);
                self.provision_failed = false;
            }
            Err(e) => {
                self.provision_failed = true;
                error!(region = %self.name, error = %e, "provision policy update failed");
            }
        }
    }

    pub fn get_provision(&self) -> Result<ControlKnobMap> {
        if self.provision_failed {
            return Err(anyhow!("provision update failed for region {}", self.name));
        }
        self.control_knobs
            .clone()
            .ok_or_else(|| anyhow!("no provision computed for region {}", self.name))
    }

    /// Run the headroom policy; requires the cycle's region entries to be
    /// published already.
    pub fn try_update_headroom(&mut self) {
        match self.headroom_policy.update(&self.essentials) {
            Ok(headroom) => {
                self.headroom = Some(headroom);
                self.headroom_failed = false;
            }
            Err(e) => {
                self.headroom_failed = true;
                error!(region = %self.name, error = %e, "headroom policy update failed");
            }
        }
    }

    pub fn get_headroom(&self) -> Result<CpuQuantity> {
        if self.headroom_failed {
            return Err(anyhow!("headroom update failed for region {}", self.name));
        }
        self.headroom
            .ok_or_else(|| anyhow!("no headroom computed for region {}", self.name))
    }

    /// `(top priority, in use)` provision policy names. With a single policy
    /// slot per region both are the configured policy.
    pub fn provision_policy_names(&self) -> (String, String) {
        let name = self.provision_policy.name().to_string();
        (name.clone(), name)
    }

    /// `(top priority, in use)` headroom policy names.
    pub fn headroom_policy_names(&self) -> (String, String) {
        let name = self.headroom_policy.name().to_string();
        (name.clone(), name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metacache::{MetaCache, MetaCacheImpl};
    use crate::policy::register_canonical_policies;
    use std::collections::{BTreeMap, BTreeSet};

    fn test_conf() -> AdvisorConfig {
        register_canonical_policies();
        AdvisorConfig::default()
    }

    fn shared_container(pod_uid: &str, pool: &str) -> ContainerInfo {
        ContainerInfo {
            pod_uid: pod_uid.to_string(),
            pod_name: format!("pod-{}", pod_uid),
            container_name: "main".to_string(),
            qos_level: QosLevel::SharedCores,
            cpu_request: 2.0,
            owner_pool_name: pool.to_string(),
            topology_aware_assignments: BTreeMap::new(),
            is_numa_binding: false,
            is_numa_exclusive: false,
            region_names: BTreeSet::new(),
        }
    }

    fn numa_binding_container(pod_uid: &str, numa_id: usize) -> ContainerInfo {
        ContainerInfo {
            pod_uid: pod_uid.to_string(),
            pod_name: format!("pod-{}", pod_uid),
            container_name: "main".to_string(),
            qos_level: QosLevel::DedicatedCores,
            cpu_request: 6.0,
            owner_pool_name: "dedicated".to_string(),
            topology_aware_assignments: BTreeMap::from([(
                numa_id,
                CpuSet::from_range(numa_id * 8, (numa_id + 1) * 8),
            )]),
            is_numa_binding: true,
            is_numa_exclusive: true,
            region_names: BTreeSet::new(),
        }
    }

    #[test]
    fn test_region_names_carry_type_prefix() {
        let conf = test_conf();
        let cache = Arc::new(MetaCacheImpl::new());

        let share = QosRegion::new_share("share", &conf, cache.clone()).unwrap();
        assert!(share.name().starts_with("share-"));

        let dedicated =
            QosRegion::new_dedicated_numa_exclusive("dedicated", 0, &conf, cache).unwrap();
        assert!(dedicated.name().starts_with("dedicated_numa_exclusive-"));
        assert_eq!(dedicated.binding_numas(), &CpuSet::from_ids([0]));
    }

    #[test]
    fn test_share_region_rejects_foreign_containers() {
        let conf = test_conf();
        let cache = Arc::new(MetaCacheImpl::new());
        let mut region = QosRegion::new_share("share", &conf, cache).unwrap();

        assert!(region.add_container(&shared_container("a", "share")).is_ok());
        assert!(region.add_container(&shared_container("b", "other-pool")).is_err());
        assert!(region.add_container(&numa_binding_container("c", 0)).is_err());
        assert_eq!(region.pod_set().container_count(), 1);
    }

    #[test]
    fn test_dedicated_region_requires_matching_numa() {
        let conf = test_conf();
        let cache = Arc::new(MetaCacheImpl::new());
        let mut region =
            QosRegion::new_dedicated_numa_exclusive("dedicated", 0, &conf, cache).unwrap();

        assert!(region.add_container(&numa_binding_container("a", 0)).is_ok());
        assert!(region.add_container(&numa_binding_container("b", 1)).is_err());
        assert!(region.add_container(&shared_container("c", "share")).is_err());
    }

    #[test]
    fn test_clear_empties_region() {
        let conf = test_conf();
        let cache = Arc::new(MetaCacheImpl::new());
        let mut region = QosRegion::new_share("share", &conf, cache).unwrap();

        region.add_container(&shared_container("a", "share")).unwrap();
        assert!(!region.is_empty());

        region.clear();
        assert!(region.is_empty());
    }

    #[test]
    fn test_provision_flow() {
        let conf = test_conf();
        let cache = Arc::new(MetaCacheImpl::new());
        let ci = shared_container("a", "share");
        cache.set_container_info(ci.clone()).unwrap();

        let mut region = QosRegion::new_share("share", &conf, cache).unwrap();
        region.add_container(&ci).unwrap();

        // Nothing computed before the first update.
        assert!(region.get_provision().is_err());

        region.set_essentials(ResourceEssentials {
            total: 16,
            reserve_pool_size: 2,
            reserved_for_allocate: 4,
            enable_reclaim: true,
        });
        region.try_update_provision();

        let knobs = region.get_provision().unwrap();
        assert_eq!(
            knobs[&crate::models::ControlKnobName::NonReclaimedCpusetSize].value,
            2.0
        );
    }

    #[test]
    fn test_policy_name_getters() {
        let conf = test_conf();
        let cache = Arc::new(MetaCacheImpl::new());
        let region = QosRegion::new_share("share", &conf, cache).unwrap();

        assert_eq!(
            region.provision_policy_names(),
            ("canonical".to_string(), "canonical".to_string())
        );
        assert_eq!(
            region.headroom_policy_names(),
            ("canonical".to_string(), "canonical".to_string())
        );
    }
}
