//! Heartbeat failure detector: lease-expiry sweep run by the coordinator.
//!
//! An agent whose heartbeat is older than the configured timeout is marked
//! timed out (terminal) and its in-progress tasks are released back to
//! pending. A slow-but-alive agent can be falsely expired; its task may be
//! re-claimed while it still runs. That risk is accepted for simplicity.

use chrono::{Duration, Utc};

use crate::error::PublishError;
use crate::queue::QueueManager;
use crate::registry::{AgentStatus, Registry, RegistryManager};

/// Result of one detector sweep.
#[derive(Debug, Default)]
pub struct SweepReport {
    pub expired_agents: Vec<String>,
    pub released_tasks: Vec<String>,
}

/// Expire stale agents and reclaim their work. One registry publish for
/// the expirations, then one queue publish per reclaimed task.
pub fn sweep(
    registry_mgr: &RegistryManager<'_>,
    queue_mgr: &QueueManager<'_>,
    timeout: Duration,
) -> Result<SweepReport, PublishError> {
    let mut report = SweepReport::default();

    let stale = stale_agents(&registry_mgr.snapshot()?, timeout);
    if stale.is_empty() {
        return Ok(report);
    }

    // Staleness is re-derived inside the publish cycle: the document may
    // have moved (a live agent could have heartbeated) between read and
    // swap, and the retried mutation must see that.
    let expired = registry_mgr.expire_stale(timeout)?;

    for agent_id in &expired {
        tracing::warn!(agent = %agent_id, "agent heartbeat expired, reclaiming work");
    }

    let queue = queue_mgr.snapshot()?;
    let orphaned: Vec<String> = queue
        .in_progress
        .iter()
        .filter(|t| t.claimed_by.as_deref().is_some_and(|a| expired.iter().any(|e| e == a)))
        .map(|t| t.id.clone())
        .collect();

    for task_id in orphaned {
        if queue_mgr.release(&task_id)? {
            tracing::info!(task = %task_id, "released task from expired agent");
            report.released_tasks.push(task_id);
        }
    }

    report.expired_agents = expired;
    Ok(report)
}

/// Ids of idle or active agents whose last heartbeat is older than the
/// timeout. Stopped and already timed-out agents are skipped.
fn stale_agents(registry: &Registry, timeout: Duration) -> Vec<String> {
    let now = Utc::now();
    registry
        .agents
        .iter()
        .filter(|a| matches!(a.status, AgentStatus::Idle | AgentStatus::Active))
        .filter(|a| now - a.last_heartbeat > timeout)
        .map(|a| a.id.clone())
        .collect()
}
