//! Provision and headroom policies
//!
//! A provision policy turns a region's per-cycle essentials into control
//! knobs; a headroom policy estimates the CPUs the region can spare for
//! reclaimed workloads. Policies are instantiated by name through
//! process-local registries so alternative algorithms can be plugged in
//! without touching the region code.

mod headroom;
mod provision;

pub use headroom::CanonicalHeadroomPolicy;
pub use provision::CanonicalProvisionPolicy;

use crate::metacache::MetaReader;
use crate::models::{ControlKnobMap, CpuQuantity, PodSet, RegionType, ResourceEssentials};
use anyhow::{anyhow, Result};
use std::collections::HashMap;
use std::sync::{Arc, OnceLock, RwLock};

/// Name of the only policy registered by default.
pub const POLICY_NAME_CANONICAL: &str = "canonical";

/// Computes control knobs for a region, once per update cycle.
pub trait ProvisionPolicy: Send + Sync {
    fn name(&self) -> &str;

    fn update(
        &mut self,
        essentials: &ResourceEssentials,
        pod_set: &PodSet,
    ) -> Result<ControlKnobMap>;
}

/// Computes a region's reclaim headroom. Runs after the cycle's region
/// entries were published, so implementations may read them back from the
/// cache.
pub trait HeadroomPolicy: Send + Sync {
    fn name(&self) -> &str;

    fn update(&mut self, essentials: &ResourceEssentials) -> Result<CpuQuantity>;
}

pub type ProvisionPolicyFactory =
    fn(region_name: &str, region_type: RegionType, meta_reader: Arc<dyn MetaReader>) -> Box<dyn ProvisionPolicy>;

pub type HeadroomPolicyFactory =
    fn(region_name: &str, region_type: RegionType, meta_reader: Arc<dyn MetaReader>) -> Box<dyn HeadroomPolicy>;

static PROVISION_FACTORIES: OnceLock<RwLock<HashMap<String, ProvisionPolicyFactory>>> =
    OnceLock::new();
static HEADROOM_FACTORIES: OnceLock<RwLock<HashMap<String, HeadroomPolicyFactory>>> =
    OnceLock::new();

fn provision_factories() -> &'static RwLock<HashMap<String, ProvisionPolicyFactory>> {
    PROVISION_FACTORIES.get_or_init(Default::default)
}

fn headroom_factories() -> &'static RwLock<HashMap<String, HeadroomPolicyFactory>> {
    HEADROOM_FACTORIES.get_or_init(Default::default)
}

pub fn register_provision_policy(name: &str, factory: ProvisionPolicyFactory) {
    provision_factories()
        .write()
        .expect("policy registry lock poisoned")
        .insert(name.to_string(), factory);
}

pub fn register_headroom_policy(name: &str, factory: HeadroomPolicyFactory) {
    headroom_factories()
        .write()
        .expect("policy registry lock poisoned")
        .insert(name.to_string(), factory);
}

pub fn new_provision_policy(
    name: &str,
    region_name: &str,
    region_type: RegionType,
    meta_reader: Arc<dyn MetaReader>,
) -> Result<Box<dyn ProvisionPolicy>> {
    let factories = provision_factories()
        .read()
        .expect("policy registry lock poisoned");
    let factory = factories
        .get(name)
        .ok_or_else(|| anyhow!("provision policy {} not registered", name))?;
    Ok(factory(region_name, region_type, meta_reader))
}

pub fn new_headroom_policy(
    name: &str,
    region_name: &str,
    region_type: RegionType,
    meta_reader: Arc<dyn MetaReader>,
) -> Result<Box<dyn HeadroomPolicy>> {
    let factories = headroom_factories()
        .read()
        .expect("policy registry lock poisoned");
    let factory = factories
        .get(name)
        .ok_or_else(|| anyhow!("headroom policy {} not registered", name))?;
    Ok(factory(region_name, region_type, meta_reader))
}

/// Register the canonical policies. Idempotent; the advisor calls this at
/// construction.
pub fn register_canonical_policies() {
    register_provision_policy(POLICY_NAME_CANONICAL, |name, region_type, meta_reader| {
        Box::new(CanonicalProvisionPolicy::new(name, region_type, meta_reader))
    });
    register_headroom_policy(POLICY_NAME_CANONICAL, |name, region_type, meta_reader| {
        Box::new(CanonicalHeadroomPolicy::new(name, region_type, meta_reader))
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metacache::MetaCacheImpl;

    #[test]
    fn test_unknown_policy_name_is_error() {
        register_canonical_policies();
        let cache = Arc::new(MetaCacheImpl::new());

        let result =
            new_provision_policy("nonexistent", "share-x", RegionType::Share, cache.clone());
        assert!(result.is_err());

        let result = new_headroom_policy("nonexistent", "share-x", RegionType::Share, cache);
        assert!(result.is_err());
    }

    #[test]
    fn test_canonical_policies_resolve() {
        register_canonical_policies();
        let cache = Arc::new(MetaCacheImpl::new());

        let policy = new_provision_policy(
            POLICY_NAME_CANONICAL,
            "share-x",
            RegionType::Share,
            cache.clone(),
        )
        .unwrap();
        assert_eq!(policy.name(), POLICY_NAME_CANONICAL);

        let policy = new_headroom_policy(
            POLICY_NAME_CANONICAL,
            "share-x",
            RegionType::Share,
            cache,
        )
        .unwrap();
        assert_eq!(policy.name(), POLICY_NAME_CANONICAL);
    }
}
