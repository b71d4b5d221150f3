//! CPU resource advisor library
//!
//! This crate provides the core of the node-local, QoS-aware CPU advisor:
//! - QoS region lifecycle over the container population
//! - Provision and headroom policies with pluggable registries
//! - The update cycle merging regions into a node-wide provision plan
//! - Reclaim headroom estimation
//! - Machine topology and metadata cache interfaces

pub mod advisor;
pub mod config;
pub mod health;
pub mod metacache;
pub mod metaserver;
pub mod models;
pub mod observability;
pub mod policy;
pub mod region;

pub use advisor::{CpuResourceAdvisor, HeadroomProvider};
pub use health::{AgentCondition, AgentStatus, ReadinessReport, StatusReport};
pub use metacache::{MetaCache, MetaCacheImpl, MetaReader};
pub use metaserver::{CpuTopology, MetaServer};
pub use models::*;
pub use observability::AdvisorMetrics;
