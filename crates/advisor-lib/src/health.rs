//! Agent health state
//!
//! Minimal liveness and readiness state behind the agent's probe endpoints.
//! The agent has exactly one critical task (the advisor) and one recoverable
//! impairment (degraded topology discovery), so the state is three flags
//! rather than a per-component registry: ready, advisor stopped, and an
//! optional degradation reason.

use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

/// Liveness condition of the agent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentCondition {
    Ok,
    /// Serving with an impairment, e.g. a synthetic fallback topology.
    Degraded,
    /// The advisor task is gone; the agent cannot produce plans.
    Down,
}

/// Liveness probe payload
#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub condition: AgentCondition,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Readiness probe payload
#[derive(Debug, Clone, Serialize)]
pub struct ReadinessReport {
    pub ready: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Shared health state of the agent. Cheap to clone; all writers are the
/// agent wiring, all readers are the probe handlers.
#[derive(Clone, Default)]
pub struct AgentStatus {
    inner: Arc<StatusInner>,
}

#[derive(Default)]
struct StatusInner {
    ready: AtomicBool,
    advisor_stopped: AtomicBool,
    degraded_reason: RwLock<Option<String>>,
}

impl AgentStatus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark the agent wiring complete.
    pub fn set_ready(&self) {
        self.inner.ready.store(true, Ordering::Release);
    }

    pub fn is_ready(&self) -> bool {
        self.inner.ready.load(Ordering::Acquire)
    }

    /// Record a recoverable impairment; the agent keeps serving.
    pub fn set_degraded(&self, reason: impl Into<String>) {
        let mut slot = self.inner.degraded_reason.write().expect("status lock poisoned");
        *slot = Some(reason.into());
    }

    /// Record that the advisor task exited; liveness reports `down` and
    /// readiness drops from here on.
    pub fn mark_advisor_stopped(&self) {
        self.inner.advisor_stopped.store(true, Ordering::Release);
    }

    pub fn report(&self) -> StatusReport {
        if self.inner.advisor_stopped.load(Ordering::Acquire) {
            return StatusReport {
                condition: AgentCondition::Down,
                reason: Some("advisor task stopped".to_string()),
            };
        }

        let degraded = self
            .inner
            .degraded_reason
            .read()
            .expect("status lock poisoned")
            .clone();
        match degraded {
            Some(reason) => StatusReport {
                condition: AgentCondition::Degraded,
                reason: Some(reason),
            },
            None => StatusReport {
                condition: AgentCondition::Ok,
                reason: None,
            },
        }
    }

    pub fn readiness(&self) -> ReadinessReport {
        if !self.is_ready() {
            ReadinessReport {
                ready: false,
                reason: Some("agent wiring not finished".to_string()),
            }
        } else if self.inner.advisor_stopped.load(Ordering::Acquire) {
            ReadinessReport {
                ready: false,
                reason: Some("advisor task stopped".to_string()),
            }
        } else {
            ReadinessReport {
                ready: true,
                reason: None,
            }
        }
    }
}
