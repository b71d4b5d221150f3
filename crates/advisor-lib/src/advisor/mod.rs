//! CPU resource advisor core
//!
//! Maintains the QoS region lifecycle and runs the update cycle: triggered by
//! the CPU server, it rebuilds the region set from the metadata cache, runs
//! every region's provision policy, publishes region entries, assembles the
//! node-wide provision plan, notifies the CPU server, and finally refreshes
//! per-region headroom. The aggregated headroom is served on demand through
//! [`HeadroomProvider`].


use crate::config::{AdvisorConfig, SharedAdvisorConfig};
use crate::metacache::{MetaCache, MetaReader};
use crate::metaserver::MetaServer;
use crate::models::{
    ContainerInfo, CpuQuantity, CpuSet, InternalCalculationResult, PoolInfo, QosLevel,
    RegionEntries, RegionInfo, ControlKnobName, RegionType, ResourceEssentials, FAKED_NUMA_ID,
    POOL_NAME_DEDICATED, POOL_NAME_RECLAIM, POOL_NAME_RESERVE, POOL_NAME_SHARE,
};
use crate::observability::AdvisorMetrics;
use crate::policy::register_canonical_policies;
use crate::region::QosRegion;
use anyhow::{anyhow, bail, Context, Result};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{broadcast, mpsc, RwLock};
use tracing::{debug, error, info, warn};

/// State guarded by the advisor's readers-writer lock. `update` holds the
/// write guard for the whole cycle; headroom queries take the read guard.
#[derive(Default)]
struct AdvisorState {
    region_map: HashMap<String, QosRegion>,
    /// NUMAs without NUMA-binding pods; recomputed every cycle.
    non_binding_numas: CpuSet,
}

/// Entrance of CPU provision advice for all QoS regions
///
/// Owns the region map, merges per-region provision results into one
/// calculation result and notifies the CPU server through the plan channel.
pub struct CpuResourceAdvisor {
    conf: SharedAdvisorConfig,
    meta_cache: Arc<dyn MetaCache>,
    meta_reader: Arc<dyn MetaReader>,
    meta_server: Arc<MetaServer>,

    system_numas: CpuSet,
    start_deadline: Instant,

    state: Arc<RwLock<AdvisorState>>,

    recv_rx: mpsc::Receiver<()>,
    send_tx: mpsc::Sender<InternalCalculationResult>,

    metrics: AdvisorMetrics,
}

/// Cloneable handle serving aggregated node headroom, safe for concurrent
/// callers. Queries block while an update cycle is in flight.
#[derive(Clone)]
pub struct HeadroomProvider {
    state: Arc<RwLock<AdvisorState>>,
    meta_reader: Arc<dyn MetaReader>,
    meta_server: Arc<MetaServer>,
    metrics: AdvisorMetrics,
}

impl CpuResourceAdvisor {
    /// Create an advisor plus its trigger and plan channels. Both channels
    /// have capacity one: a trigger sent during an in-progress cycle blocks
    /// the sender, which is the back-pressure mechanism towards the CPU
    /// server.
    pub fn new<M>(
        conf: SharedAdvisorConfig,
        meta_cache: Arc<M>,
        meta_server: Arc<MetaServer>,
    ) -> (Self, mpsc::Sender<()>, mpsc::Receiver<InternalCalculationResult>)
    where
        M: MetaCache + 'static,
    {
        register_canonical_policies();

        let (trigger_tx, recv_rx) = mpsc::channel(1);
        let (send_tx, plan_rx) = mpsc::channel(1);

        let startup_period = conf.read().expect("config lock poisoned").startup_period();
        let advisor = Self {
            conf,
            meta_cache: meta_cache.clone(),
            meta_reader: meta_cache,
            system_numas: meta_server.numa_nodes(),
            meta_server,
            start_deadline: Instant::now() + startup_period,
            state: Arc::new(RwLock::new(AdvisorState::default())),
            recv_rx,
            send_tx,
            metrics: AdvisorMetrics::new(),
        };

        (advisor, trigger_tx, plan_rx)
    }

    /// Handle for headroom queries, usable after the advisor moved into its
    /// task.
    pub fn headroom_provider(&self) -> HeadroomProvider {
        HeadroomProvider {
            state: self.state.clone(),
            meta_reader: self.meta_reader.clone(),
            meta_server: self.meta_server.clone(),
            metrics: self.metrics.clone(),
        }
    }

    /// Node headroom for reclaimed workloads.
    pub async fn get_headroom(&self) -> Result<CpuQuantity> {
        self.headroom_provider().get_headroom().await
    }

    /// Receive loop: one update cycle per trigger, until shutdown. An
    /// in-progress cycle always runs to completion.
    pub async fn run(mut self, mut shutdown: broadcast::Receiver<()>) {
        info!("starting cpu resource advisor");

        loop {
            tokio::select! {
                trigger = self.recv_rx.recv() => match trigger {
                    Some(()) => {
                        debug!("received update trigger from cpu server");
                        self.update().await;
                    }
                    None => {
                        info!("trigger channel closed, stopping cpu resource advisor");
                        break;
                    }
                },
                _ = shutdown.recv() => {
                    info!("shutting down cpu resource advisor");
                    break;
                }
            }
        }
    }

    /// One full update cycle. Aborted cycles leave the outputs of the
    /// previous successful cycle intact.
    async fn update(&mut self) {
        let start = Instant::now();
        self.metrics.inc_update_cycles();

        let mut state = self.state.write().await;

        // Without the reserve pool the advisor is ignorant of pools and
        // containers; skip the cycle entirely.
        let Some(reserve_pool) = self.meta_cache.get_pool_info(POOL_NAME_RESERVE) else {
            warn!("skip update: reserve pool not exist");
            self.metrics.inc_update_skips();
            return;
        };

        let conf = self.conf.read().expect("config lock poisoned").clone();

        if let Err(e) = self.assign_containers_to_regions(&mut state, &conf) {
            self.metrics.inc_assignment_errors();
            error!(error = %e, "assign containers to regions reported errors");
        }
        self.metrics.set_regions(state.region_map.len() as i64);

        self.update_region_provision(&mut state, &reserve_pool, &conf);

        // Publish region entries before the plan so headroom policies can
        // read this cycle's provision results.
        let mut entries = assemble_region_entries(&state);
        if let Err(e) = self.meta_cache.update_region_entries(&entries) {
            error!(error = %e, "publish region entries failed");
        }

        // An assembly failure only aborts the send; entries stay published
        // and the headroom pass below still runs.
        if Instant::now() < self.start_deadline {
            info!("skip notifying cpu server: starting up");
        } else {
            match self.assemble_provision(&state, &reserve_pool) {
                Ok(provision) => {
                    if self.send_tx.send(provision.clone()).await.is_err() {
                        warn!("plan channel closed, dropping provision result");
                    } else {
                        self.metrics.inc_plans_sent();
                        info!(plan = ?provision.pool_entries, "notified cpu server");
                    }
                }
                Err(e) => {
                    self.metrics.inc_assembly_errors();
                    error!(error = %e, "assemble provision failed, plan not sent");
                }
            }
        }

        // Headroom runs last: policies may read the freshly published region
        // entries, and the headroom write-back below completes them.
        for region in state.region_map.values_mut() {
            region.try_update_headroom();
        }
        update_headroom_for_region_entries(&state, &mut entries);
        if let Err(e) = self.meta_cache.update_region_entries(&entries) {
            error!(error = %e, "publish region headroom failed");
        }

        self.metrics.observe_update_latency(start.elapsed().as_secs_f64());
    }

    /// Rebuild the region set from the container population. Regions are
    /// reconstructed from scratch every cycle rather than diffed
    /// incrementally; the metadata cache guarantees a consistent view.
    /// Per-container failures are collected and returned aggregated, the
    /// rebuild itself keeps going.
    fn assign_containers_to_regions(
        &self,
        state: &mut AdvisorState,
        conf: &AdvisorConfig,
    ) -> Result<()> {
        let AdvisorState {
            region_map,
            non_binding_numas,
        } = state;

        for region in region_map.values_mut() {
            region.clear();
        }

        let mut err_list: Vec<anyhow::Error> = Vec::new();
        self.meta_cache
            .range_and_update_container(&mut |_pod_uid, _container_name, ci| {
                let region_names = match self.assign_to_regions(region_map, conf, ci) {
                    Ok(names) => names,
                    Err(e) => {
                        err_list.push(e);
                        return true;
                    }
                };
                if region_names.is_empty() {
                    return true;
                }

                for name in &region_names {
                    let Some(region) = region_map.get_mut(name) else {
                        err_list.push(anyhow!("assigned region {} vanished from map", name));
                        return true;
                    };
                    if let Err(e) = region.add_container(ci) {
                        err_list.push(e);
                        return true;
                    }
                }

                ci.region_names = region_names.iter().cloned().collect();

                // The dedicated pool has no pool entry in the cache.
                if ci.owner_pool_name != POOL_NAME_DEDICATED {
                    if let Err(e) = self.set_pool_regions(&ci.owner_pool_name, &region_names) {
                        err_list.push(e);
                    }
                }
                true
            });

        self.gc(region_map);
        self.update_non_binding_numas(region_map, non_binding_numas);

        if err_list.is_empty() {
            Ok(())
        } else {
            let joined: Vec<String> = err_list.iter().map(|e| e.to_string()).collect();
            Err(anyhow!(
                "{} container(s) failed assignment: {}",
                err_list.len(),
                joined.join("; ")
            ))
        }
    }

    /// Region list for one container, creating regions on demand.
    fn assign_to_regions(
        &self,
        region_map: &mut HashMap<String, QosRegion>,
        conf: &AdvisorConfig,
        ci: &ContainerInfo,
    ) -> Result<Vec<String>> {
        if ci.qos_level == QosLevel::SharedCores {
            // Shared cores containers follow their pool.
            let names = self.pool_region_names(region_map, &ci.owner_pool_name)?;
            if !names.is_empty() {
                return Ok(names);
            }

            let region = QosRegion::new_share(&ci.owner_pool_name, conf, self.meta_reader.clone())?;
            let name = region.name().to_string();
            region_map.insert(name.clone(), region);
            Ok(vec![name])
        } else if ci.is_numa_binding {
            // NUMA-binding containers follow the container itself, one
            // region per assigned NUMA.
            let names = container_region_names(region_map, ci)?;
            if !names.is_empty() {
                return Ok(names);
            }

            let mut names = Vec::new();
            for numa_id in ci.topology_aware_assignments.keys() {
                let region = QosRegion::new_dedicated_numa_exclusive(
                    &ci.owner_pool_name,
                    *numa_id,
                    conf,
                    self.meta_reader.clone(),
                )?;
                names.push(region.name().to_string());
                region_map.insert(region.name().to_string(), region);
            }
            Ok(names)
        } else {
            Ok(Vec::new())
        }
    }

    /// Existing regions a pool references. Empty when the pool is unknown or
    /// carries no links yet; a link to a region missing from the map is an
    /// error.
    fn pool_region_names(
        &self,
        region_map: &HashMap<String, QosRegion>,
        pool_name: &str,
    ) -> Result<Vec<String>> {
        let Some(pool) = self.meta_cache.get_pool_info(pool_name) else {
            return Ok(Vec::new());
        };

        let mut names = Vec::new();
        for name in &pool.region_names {
            if !region_map.contains_key(name) {
                bail!("failed to find region {} of pool {}", name, pool_name);
            }
            names.push(name.clone());
        }
        Ok(names)
    }

    fn set_pool_regions(&self, pool_name: &str, region_names: &[String]) -> Result<()> {
        let mut pool = self
            .meta_cache
            .get_pool_info(pool_name)
            .with_context(|| format!("failed to find pool {}", pool_name))?;
        pool.region_names = region_names.iter().cloned().collect();
        self.meta_cache.set_pool_info(pool_name, pool)
    }

    /// Drop regions that came out of reassignment empty, unlinking them from
    /// their owner pools so pool links stay consistent with the region map.
    fn gc(&self, region_map: &mut HashMap<String, QosRegion>) {
        let dropped: Vec<(String, String)> = region_map
            .iter()
            .filter(|(_, region)| region.is_empty())
            .map(|(name, region)| (name.clone(), region.owner_pool_name().to_string()))
            .collect();

        for (name, owner_pool) in dropped {
            region_map.remove(&name);
            info!(region = %name, "deleted empty region");

            if owner_pool == POOL_NAME_DEDICATED {
                continue;
            }
            if let Some(mut pool) = self.meta_cache.get_pool_info(&owner_pool) {
                if pool.region_names.remove(&name) {
                    if let Err(e) = self.meta_cache.set_pool_info(&owner_pool, pool) {
                        error!(pool = %owner_pool, error = %e, "unlink region from pool failed");
                    }
                }
            }
        }
    }

    /// non-binding = system NUMAs minus every dedicated-exclusive binding;
    /// share regions always bind exactly the non-binding set.
    fn update_non_binding_numas(
        &self,
        region_map: &mut HashMap<String, QosRegion>,
        non_binding_numas: &mut CpuSet,
    ) {
        let mut non_binding = self.system_numas.clone();
        for region in region_map.values() {
            if region.region_type() == RegionType::DedicatedNumaExclusive {
                non_binding = non_binding.difference(region.binding_numas());
            }
        }

        for region in region_map.values_mut() {
            if region.region_type() == RegionType::Share {
                region.set_binding_numas(non_binding.clone());
            }
        }

        *non_binding_numas = non_binding;
    }

    /// Compute per-region essentials and run every provision policy.
    fn update_region_provision(
        &self,
        state: &mut AdvisorState,
        reserve_pool: &PoolInfo,
        conf: &AdvisorConfig,
    ) {
        let cpus_per_numa = self.meta_server.cpus_per_numa();
        let total_numas = self.meta_server.num_numa_nodes();
        let reserved_for_allocate =
            conf.reclaimed_resource.reserved_resource_for_allocate_cpus.max(0) as usize;

        for region in state.region_map.values_mut() {
            let numas = region.binding_numas();
            let region_cpu_limit = numas.size() * cpus_per_numa;
            let region_reserve_pool_size: usize =
                numas.iter().map(|numa_id| reserve_pool.size_on_numa(numa_id)).sum();
            let region_reserved_for_allocate =
                ceil_div(reserved_for_allocate * numas.size(), total_numas);

            region.set_essentials(ResourceEssentials {
                total: region_cpu_limit,
                reserve_pool_size: region_reserve_pool_size,
                reserved_for_allocate: region_reserved_for_allocate,
                enable_reclaim: conf.reclaimed_resource.enable_reclaim,
            });
            region.try_update_provision();
        }
    }

    /// Merge region provision results into the node-wide calculation result.
    /// Pool names follow the enforcement server's definition; NUMA id -1
    /// means no NUMA preference.
    fn assemble_provision(
        &self,
        state: &AdvisorState,
        reserve_pool: &PoolInfo,
    ) -> Result<InternalCalculationResult> {
        let mut provision = InternalCalculationResult::default();
        let reserve_pool_size = reserve_pool.pool_size();
        provision.set_pool_entry(POOL_NAME_RESERVE, FAKED_NUMA_ID, reserve_pool_size as i64);

        let mut non_numa_binding_requirement: i64 = 0;

        for (name, region) in &state.region_map {
            let knobs = match region.get_provision() {
                Ok(knobs) => knobs,
                Err(e) => {
                    warn!(region = %name, error = %e, "excluding region from provision plan");
                    continue;
                }
            };

            match region.region_type() {
                RegionType::Share => {
                    let item = knobs
                        .get(&ControlKnobName::NonReclaimedCpusetSize)
                        .with_context(|| {
                            format!("share region {} missing non_reclaimed_cpuset_size", name)
                        })?;
                    let share_pool_size = item.value as i64;
                    provision.set_pool_entry(POOL_NAME_SHARE, FAKED_NUMA_ID, share_pool_size);
                    non_numa_binding_requirement += share_pool_size;
                }
                RegionType::DedicatedNumaExclusive => {
                    let numas = region.binding_numas();
                    let Some(numa_id) = numas.iter().next().filter(|_| numas.size() == 1) else {
                        error!(
                            region = %name, numas = %numas,
                            "dedicated numa exclusive region must bind exactly one numa, excluding"
                        );
                        continue;
                    };
                    let item = knobs
                        .get(&ControlKnobName::ReclaimedCpuSupplied)
                        .with_context(|| {
                            format!("dedicated region {} missing reclaimed_cpu_supplied", name)
                        })?;
                    provision.set_pool_entry(POOL_NAME_RECLAIM, numa_id as i64, item.value as i64);
                }
            }
        }

        // Reclaim budget of the NUMAs not claimed by any binding pod.
        let non_binding = &state.non_binding_numas;
        let reserve_on_non_binding = ceil_div(
            reserve_pool_size * non_binding.size(),
            self.meta_server.num_numa_nodes(),
        ) as i64;
        let reclaim_on_non_binding = (non_binding.size() * self.meta_server.cpus_per_numa()) as i64
            - non_numa_binding_requirement
            - reserve_on_non_binding;
        provision.set_pool_entry(
            POOL_NAME_RECLAIM,
            FAKED_NUMA_ID,
            reclaim_on_non_binding.max(0),
        );

        Ok(provision)
    }
}

impl HeadroomProvider {
    /// Aggregated node headroom. With no regions, everything but the reserve
    /// pool is headroom; otherwise region headrooms are summed, plus the
    /// budget of non-binding NUMAs when no share region covers them.
    pub async fn get_headroom(&self) -> Result<CpuQuantity> {
        let state = self.state.read().await;

        let reserve_pool_size = self
            .meta_reader
            .get_pool_size(POOL_NAME_RESERVE)
            .context("reserve pool not exist")?;

        if state.region_map.is_empty() {
            let headroom = self.meta_server.num_cpus() as i64 - reserve_pool_size as i64;
            self.metrics.set_headroom_cpus(headroom);
            return Ok(headroom);
        }

        let mut total_headroom: i64 = 0;
        let mut has_share_region = false;
        for region in state.region_map.values() {
            total_headroom += region.get_headroom()?;
            if region.region_type() == RegionType::Share {
                has_share_region = true;
            }
        }

        if !has_share_region {
            let non_binding = &state.non_binding_numas;
            let reserve_on_non_binding = ceil_div(
                reserve_pool_size * non_binding.size(),
                self.meta_server.num_numa_nodes(),
            ) as i64;
            total_headroom += (non_binding.size() * self.meta_server.cpus_per_numa()) as i64
                - reserve_on_non_binding;
        }

        self.metrics.set_headroom_cpus(total_headroom);
        Ok(total_headroom)
    }
}

/// Region entries for publication; regions without a usable provision result
/// this cycle are excluded.
fn assemble_region_entries(state: &AdvisorState) -> RegionEntries {
    let mut entries = RegionEntries::new();

    for (name, region) in &state.region_map {
        let control_knob_map = match region.get_provision() {
            Ok(knobs) => knobs,
            Err(e) => {
                warn!(region = %name, error = %e, "excluding region from region entries");
                continue;
            }
        };

        let (provision_top, provision_in_use) = region.provision_policy_names();
        let (headroom_top, headroom_in_use) = region.headroom_policy_names();
        entries.insert(
            name.clone(),
            RegionInfo {
                region_type: region.region_type(),
                binding_numas: region.binding_numas().clone(),
                control_knob_map,
                provision_policy_top_priority: provision_top,
                provision_policy_in_use: provision_in_use,
                headroom_policy_top_priority: headroom_top,
                headroom_policy_in_use: headroom_in_use,
                headroom: 0,
            },
        );
    }

    entries
}

/// Write each region's headroom into its published entry. Entries whose
/// region disappeared from the map are skipped.
fn update_headroom_for_region_entries(state: &AdvisorState, entries: &mut RegionEntries) {
    for (name, entry) in entries.iter_mut() {
        let Some(region) = state.region_map.get(name) else {
            warn!(region = %name, "region in entries but not in region map");
            continue;
        };
        match region.get_headroom() {
            Ok(headroom) => entry.headroom = headroom,
            Err(e) => error!(region = %name, error = %e, "get headroom for region failed"),
        }
    }
}

fn container_region_names(
    region_map: &HashMap<String, QosRegion>,
    ci: &ContainerInfo,
) -> Result<Vec<String>> {
    let mut names = Vec::new();
    for name in &ci.region_names {
        if !region_map.contains_key(name) {
            bail!(
                "failed to find region {} of container {}/{}",
                name,
                ci.pod_uid,
                ci.container_name
            );
        }
        names.push(name.clone());
    }
    Ok(names)
}

fn ceil_div(numerator: usize, denominator: usize) -> usize {
    if denominator == 0 {
        return 0;
    }
    numerator.div_ceil(denominator)
}
