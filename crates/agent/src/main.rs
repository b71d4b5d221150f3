//! QoS agent - node-local CPU resource advisor
//!
//! Runs as a DaemonSet on each node: discovers the NUMA topology, drives
//! the advisor's update cycle, and serves health/metrics/headroom over HTTP.

use advisor_lib::{
    config as advisor_config, AgentStatus, CpuResourceAdvisor, CpuSet, CpuTopology, MetaCache,
    MetaCacheImpl, MetaServer, PoolInfo, POOL_NAME_RESERVE,
};
use anyhow::Result;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod api;
mod config;

const AGENT_VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and env filter
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    let agent_conf = config::AgentConfig::load()?;
    info!(
        node_name = %agent_conf.node_name,
        version = AGENT_VERSION,
        "Starting qos-agent"
    );

    let status = AgentStatus::new();

    let meta_server = Arc::new(discover_meta_server(&status));
    info!(
        numa_nodes = meta_server.num_numa_nodes(),
        cpus = meta_server.num_cpus(),
        "Topology ready"
    );

    let meta_cache = Arc::new(MetaCacheImpl::new());
    seed_reserve_pool(&meta_cache, &meta_server, agent_conf.reserve_pool_cpus)?;

    let conf = advisor_config::shared(agent_conf.advisor_config());
    let (advisor, trigger_tx, mut plan_rx) =
        CpuResourceAdvisor::new(conf, meta_cache, meta_server);
    let headroom = advisor.headroom_provider();

    let (shutdown_tx, _) = broadcast::channel(1);
    let advisor_handle = tokio::spawn(advisor.run(shutdown_tx.subscribe()));

    // Periodic trigger standing in for the CPU server's update requests. A
    // slow cycle blocks the next trigger: that back-pressure is intended.
    let trigger_interval = Duration::from_secs(agent_conf.trigger_interval_secs);
    let trigger_status = status.clone();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(trigger_interval);
        loop {
            ticker.tick().await;
            if trigger_tx.send(()).await.is_err() {
                trigger_status.mark_advisor_stopped();
                break;
            }
        }
    });

    // Plan consumer standing in for the CPU enforcement server.
    tokio::spawn(async move {
        while let Some(plan) = plan_rx.recv().await {
            info!(plan = ?plan.pool_entries, "received provision plan");
        }
    });

    let app_state = Arc::new(api::AppState::new(status.clone(), headroom));
    status.set_ready();
    let _api_handle = tokio::spawn(api::serve(agent_conf.api_port, app_state));

    tokio::signal::ctrl_c().await?;
    info!("SIGINT received, shutting down");
    let _ = shutdown_tx.send(());
    let _ = advisor_handle.await;

    Ok(())
}

/// Discover the machine topology, falling back to a single synthetic NUMA
/// node when sysfs is unavailable (containers without /sys mounted).
fn discover_meta_server(status: &AgentStatus) -> MetaServer {
    match MetaServer::discover() {
        Ok(meta_server) => meta_server,
        Err(e) => {
            warn!(error = %e, "Topology discovery failed, assuming one NUMA node");
            status.set_degraded(format!("sysfs unavailable: {}", e));
            let cpus = std::thread::available_parallelism().map_or(1, |n| n.get());
            MetaServer::new(CpuTopology::uniform(1, cpus))
        }
    }
}

/// Seed the reserve pool with `cpus` CPUs spread evenly across NUMA nodes.
fn seed_reserve_pool(
    meta_cache: &MetaCacheImpl,
    meta_server: &MetaServer,
    cpus: usize,
) -> Result<()> {
    let numa_ids = meta_server.numa_nodes().to_vec();
    let base = cpus / numa_ids.len();
    let remainder = cpus % numa_ids.len();

    let mut assignments: BTreeMap<usize, CpuSet> = BTreeMap::new();
    for (idx, numa_id) in numa_ids.iter().enumerate() {
        let count = base + usize::from(idx < remainder);
        let numa_cpus = meta_server
            .topology()
            .cpus_on_numa(*numa_id)
            .map(|set| set.iter().take(count).collect())
            .unwrap_or_default();
        assignments.insert(*numa_id, numa_cpus);
    }

    meta_cache.set_pool_info(
        POOL_NAME_RESERVE,
        PoolInfo {
            pool_name: POOL_NAME_RESERVE.to_string(),
            topology_aware_assignments: assignments,
            region_names: Default::default(),
        },
    )?;
    info!(cpus, "Seeded reserve pool");
    Ok(())
}
