//! Machine topology
//!
//! NUMA layout of the node: which CPUs belong to which NUMA node. Discovered
//! once at startup from sysfs (`/sys/devices/system/node`), with the root
//! injectable so tests can point at a fixture tree.

use crate::models::CpuSet;
use anyhow::{bail, Context, Result};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

const SYSFS_NODE_ROOT: &str = "/sys/devices/system/node";

/// Static CPU topology of the node
#[derive(Debug, Clone, Default)]
pub struct CpuTopology {
    /// NUMA id to the CPUs on that node.
    numa_cpus: BTreeMap<usize, CpuSet>,
}

impl CpuTopology {
    /// Build a synthetic topology of `numa_count` nodes with `cpus_per_numa`
    /// consecutive CPUs each.
    pub fn uniform(numa_count: usize, cpus_per_numa: usize) -> Self {
        let numa_cpus = (0..numa_count)
            .map(|n| (n, CpuSet::from_range(n * cpus_per_numa, (n + 1) * cpus_per_numa)))
            .collect();
        Self { numa_cpus }
    }

    /// Read the topology from a sysfs node directory.
    pub fn from_sysfs(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref();
        let mut numa_cpus = BTreeMap::new();

        for entry in std::fs::read_dir(root)
            .with_context(|| format!("failed to read {}", root.display()))?
        {
            let entry = entry?;
            let name = entry.file_name();
            let name = name.to_string_lossy();
            let Some(id) = name.strip_prefix("node").and_then(|s| s.parse::<usize>().ok())
            else {
                continue;
            };

            let cpulist_path: PathBuf = entry.path().join("cpulist");
            let content = std::fs::read_to_string(&cpulist_path)
                .with_context(|| format!("failed to read {}", cpulist_path.display()))?;
            numa_cpus.insert(id, parse_cpulist(content.trim())?);
        }

        if numa_cpus.is_empty() {
            bail!("no NUMA nodes found under {}", root.display());
        }
        Ok(Self { numa_cpus })
    }

    pub fn num_cpus(&self) -> usize {
        self.numa_cpus.values().map(CpuSet::size).sum()
    }

    pub fn num_numa_nodes(&self) -> usize {
        self.numa_cpus.len()
    }

    /// CPUs per NUMA node, assuming a uniform layout.
    pub fn cpus_per_numa(&self) -> usize {
        if self.numa_cpus.is_empty() {
            return 0;
        }
        self.num_cpus() / self.num_numa_nodes()
    }

    /// The set of NUMA ids on this machine.
    pub fn numa_nodes(&self) -> CpuSet {
        self.numa_cpus.keys().copied().collect()
    }

    pub fn cpus_on_numa(&self, numa_id: usize) -> Option<&CpuSet> {
        self.numa_cpus.get(&numa_id)
    }
}

/// Parse a kernel cpulist string such as `"0-3,8,10-11"`.
pub fn parse_cpulist(list: &str) -> Result<CpuSet> {
    let mut cpus = CpuSet::new();
    if list.is_empty() {
        return Ok(cpus);
    }

    for part in list.split(',') {
        let part = part.trim();
        match part.split_once('-') {
            Some((start, end)) => {
                let start: usize = start
                    .parse()
                    .with_context(|| format!("bad cpulist range start {:?}", part))?;
                let end: usize = end
                    .parse()
                    .with_context(|| format!("bad cpulist range end {:?}", part))?;
                if end < start {
                    bail!("descending cpulist range {:?}", part);
                }
                for id in start..=end {
                    cpus.insert(id);
                }
            }
            None => {
                let id: usize = part
                    .parse()
                    .with_context(|| format!("bad cpulist entry {:?}", part))?;
                cpus.insert(id);
            }
        }
    }
    Ok(cpus)
}

/// Read-only view of the machine the advisor runs on
#[derive(Debug, Clone)]
pub struct MetaServer {
    cpu_topology: CpuTopology,
}

impl MetaServer {
    pub fn new(cpu_topology: CpuTopology) -> Self {
        Self { cpu_topology }
    }

    /// Discover the topology of the local machine from sysfs.
    pub fn discover() -> Result<Self> {
        Ok(Self::new(CpuTopology::from_sysfs(SYSFS_NODE_ROOT)?))
    }

    pub fn num_cpus(&self) -> usize {
        self.cpu_topology.num_cpus()
    }

    pub fn num_numa_nodes(&self) -> usize {
        self.cpu_topology.num_numa_nodes()
    }

    pub fn cpus_per_numa(&self) -> usize {
        self.cpu_topology.cpus_per_numa()
    }

    pub fn numa_nodes(&self) -> CpuSet {
        self.cpu_topology.numa_nodes()
    }

    pub fn topology(&self) -> &CpuTopology {
        &self.cpu_topology
    }
}
