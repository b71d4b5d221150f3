//! Metadata cache interface
//!
//! Source of truth for pool info, container info and region entries. The
//! cache is populated by the metadata sync subsystem; the advisor ranges it
//! once per cycle and writes region links and region entries back. All
//! accessors are synchronous non-blocking reads so callers may hold them
//! inside the advisor's critical section.

use crate::models::{ContainerInfo, PoolInfo, RegionEntries, RegionInfo};
use anyhow::{bail, Result};
use std::collections::BTreeMap;
use std::sync::RwLock;

/// Read-only view of the cache, the side handed to policies.
pub trait MetaReader: Send + Sync {
    fn get_container_info(&self, pod_uid: &str, container_name: &str) -> Option<ContainerInfo>;

    fn get_pool_info(&self, pool_name: &str) -> Option<PoolInfo>;

    /// Total CPUs of a pool, `None` when the pool is absent.
    fn get_pool_size(&self, pool_name: &str) -> Option<usize>;

    fn get_region_info(&self, region_name: &str) -> Option<RegionInfo>;
}

/// Full cache interface used by the advisor.
pub trait MetaCache: MetaReader {
    fn set_container_info(&self, container: ContainerInfo) -> Result<()>;

    fn remove_container(&self, pod_uid: &str, container_name: &str) -> Result<()>;

    fn set_pool_info(&self, pool_name: &str, pool: PoolInfo) -> Result<()>;

    fn remove_pool(&self, pool_name: &str) -> Result<()>;

    /// Visit every container, allowing the visitor to mutate it in place.
    /// The iteration is atomic with respect to other container writers; the
    /// visitor may access pool and region state but must not reenter the
    /// container accessors. Returning `false` stops the iteration.
    fn range_and_update_container(
        &self,
        f: &mut dyn FnMut(&str, &str, &mut ContainerInfo) -> bool,
    );

    /// Replace the published region entries.
    fn update_region_entries(&self, entries: &RegionEntries) -> Result<()>;
}

/// In-memory metadata cache
///
/// Containers, pools and regions are guarded separately so the container
/// range can hold its lock while the visitor reads or writes pool links.
#[derive(Debug, Default)]
pub struct MetaCacheImpl {
    containers: RwLock<BTreeMap<(String, String), ContainerInfo>>,
    pools: RwLock<BTreeMap<String, PoolInfo>>,
    regions: RwLock<RegionEntries>,
}

impl MetaCacheImpl {
    pub fn new() -> Self {
        Self::default()
    }
}

impl MetaReader for MetaCacheImpl {
    fn get_container_info(&self, pod_uid: &str, container_name: &str) -> Option<ContainerInfo> {
        let containers = self.containers.read().expect("container lock poisoned");
        containers
            .get(&(pod_uid.to_string(), container_name.to_string()))
            .cloned()
    }

    fn get_pool_info(&self, pool_name: &str) -> Option<PoolInfo> {
        let pools = self.pools.read().expect("pool lock poisoned");
        pools.get(pool_name).cloned()
    }

    fn get_pool_size(&self, pool_name: &str) -> Option<usize> {
        self.get_pool_info(pool_name).map(|pool| pool.pool_size())
    }

    fn get_region_info(&self, region_name: &str) -> Option<RegionInfo> {
        let regions = self.regions.read().expect("region lock poisoned");
        regions.get(region_name).cloned()
    }
}

impl MetaCache for MetaCacheImpl {
    fn set_container_info(&self, container: ContainerInfo) -> Result<()> {
        let mut containers = self.containers.write().expect("container lock poisoned");
        let key = (container.pod_uid.clone(), container.container_name.clone());
        containers.insert(key, container);
        Ok(())
    }

    fn remove_container(&self, pod_uid: &str, container_name: &str) -> Result<()> {
        let mut containers = self.containers.write().expect("container lock poisoned");
        let key = (pod_uid.to_string(), container_name.to_string());
        if containers.remove(&key).is_none() {
            bail!("container {}/{} not found", pod_uid, container_name);
        }
        Ok(())
    }

    fn set_pool_info(&self, pool_name: &str, pool: PoolInfo) -> Result<()> {
        let mut pools = self.pools.write().expect("pool lock poisoned");
        pools.insert(pool_name.to_string(), pool);
        Ok(())
    }

    fn remove_pool(&self, pool_name: &str) -> Result<()> {
        let mut pools = self.pools.write().expect("pool lock poisoned");
        pools.remove(pool_name);
        Ok(())
    }

    fn range_and_update_container(
        &self,
        f: &mut dyn FnMut(&str, &str, &mut ContainerInfo) -> bool,
    ) {
        let mut containers = self.containers.write().expect("container lock poisoned");
        for ((pod_uid, container_name), ci) in containers.iter_mut() {
            if !f(pod_uid, container_name, ci) {
                break;
            }
        }
    }

    fn update_region_entries(&self, entries: &RegionEntries) -> Result<()> {
        let mut regions = self.regions.write().expect("region lock poisoned");
        *regions = entries.clone();
        Ok(())
    }
}
