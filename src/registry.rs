//! Fleet registry: one record per worker process, plus fleet metadata.
//!
//! The registry is a single versioned document; every mutation goes through
//! the claim protocol in [`crate::store`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{PublishError, StoreError};
use crate::store::{self, REGISTRY_DOC, RetryPolicy, VersionedStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentKind {
    Coder,
    Reviewer,
    Tester,
    Planner,
}

impl std::fmt::Display for AgentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Coder => "coder",
            Self::Reviewer => "reviewer",
            Self::Tester => "tester",
            Self::Planner => "planner",
        };
        f.write_str(s)
    }
}

impl std::str::FromStr for AgentKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "coder" => Ok(Self::Coder),
            "reviewer" => Ok(Self::Reviewer),
            "tester" => Ok(Self::Tester),
            "planner" => Ok(Self::Planner),
            other => Err(format!("unknown agent kind: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    Idle,
    Active,
    Stopped,
    /// Terminal: set by the failure detector, never self-heals. A crashed
    /// worker comes back under a fresh id.
    TimedOut,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentRecord {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: AgentKind,
    pub status: AgentStatus,
    pub current_task_id: Option<String>,
    pub branch: Option<String>,
    pub started_at: DateTime<Utc>,
    pub last_heartbeat: DateTime<Utc>,
    pub capabilities: Vec<String>,
    pub container_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryMetadata {
    pub created_at: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
    pub active_count: usize,
    pub total_spawned: u64,
}

impl Default for RegistryMetadata {
    fn default() -> Self {
        let now = Utc::now();
        Self {
            created_at: now,
            last_updated: now,
            active_count: 0,
            total_spawned: 0,
        }
    }
}

/// The persisted registry document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Registry {
    #[serde(default)]
    pub agents: Vec<AgentRecord>,
    #[serde(default)]
    pub metadata: RegistryMetadata,
}

impl Registry {
    pub fn find(&self, agent_id: &str) -> Option<&AgentRecord> {
        self.agents.iter().find(|a| a.id == agent_id)
    }

    fn find_mut(&mut self, agent_id: &str) -> Option<&mut AgentRecord> {
        self.agents.iter_mut().find(|a| a.id == agent_id)
    }

    pub fn count_by_status(&self, statuses: &[AgentStatus]) -> usize {
        self.agents
            .iter()
            .filter(|a| statuses.contains(&a.status))
            .count()
    }

    fn touch(&mut self) {
        self.metadata.last_updated = Utc::now();
        // Live agents only; stopped and timed-out records stay in the
        // document but no longer count toward the fleet.
        self.metadata.active_count =
            self.count_by_status(&[AgentStatus::Idle, AgentStatus::Active]);
    }
}

/// Registry operations over a versioned store.
pub struct RegistryManager<'a> {
    store: &'a dyn VersionedStore,
    policy: RetryPolicy,
}

impl<'a> RegistryManager<'a> {
    pub fn new(store: &'a dyn VersionedStore, policy: RetryPolicy) -> Self {
        Self { store, policy }
    }

    /// Idempotent upsert: an existing id is reset to idle with a fresh
    /// heartbeat; a new id is appended and `total_spawned` bumped.
    pub fn register(
        &self,
        agent_id: &str,
        kind: AgentKind,
        capabilities: &[String],
    ) -> Result<(), PublishError> {
        let summary = format!("[swarm] register {agent_id}");
        let id = agent_id.to_string();
        let caps = capabilities.to_vec();
        store::publish::<Registry, _, _, _>(self.store, REGISTRY_DOC, &summary, self.policy, {
            move |registry| {
                let now = Utc::now();
                if let Some(agent) = registry.find_mut(&id) {
                    agent.status = AgentStatus::Idle;
                    agent.current_task_id = None;
                    agent.last_heartbeat = now;
                } else {
                    registry.agents.push(AgentRecord {
                        id: id.clone(),
                        kind,
                        status: AgentStatus::Idle,
                        current_task_id: None,
                        branch: None,
                        started_at: now,
                        last_heartbeat: now,
                        capabilities: caps.clone(),
                        container_id: None,
                    });
                    registry.metadata.total_spawned += 1;
                }
                registry.touch();
            }
        })
    }

    /// Stamp the agent's heartbeat. Uses the same bounded retry as every
    /// other mutation; a missed beat is tolerated by callers because the
    /// next cycle tries again.
    pub fn heartbeat(&self, agent_id: &str) -> Result<(), PublishError> {
        let summary = format!("[swarm] heartbeat {agent_id}");
        let id = agent_id.to_string();
        store::publish::<Registry, _, _, _>(
            self.store,
            REGISTRY_DOC,
            &summary,
            self.policy,
            move |registry| {
                if let Some(agent) = registry.find_mut(&id) {
                    agent.last_heartbeat = Utc::now();
                }
                registry.touch();
            },
        )
    }

    /// Update status and current task together, atomically.
    pub fn set_status(
        &self,
        agent_id: &str,
        status: AgentStatus,
        task_id: Option<&str>,
    ) -> Result<(), PublishError> {
        let summary = format!("[swarm] status {agent_id}");
        let id = agent_id.to_string();
        let task = task_id.map(ToString::to_string);
        store::publish::<Registry, _, _, _>(
            self.store,
            REGISTRY_DOC,
            &summary,
            self.policy,
            move |registry| {
                if let Some(agent) = registry.find_mut(&id) {
                    agent.status = status;
                    agent.current_task_id = task.clone();
                    agent.last_heartbeat = Utc::now();
                }
                registry.touch();
            },
        )
    }

    /// Mark idle/active agents whose heartbeat is older than `timeout` as
    /// timed out. Returns the expired ids. Staleness is evaluated against
    /// the revision the swap lands on, so an agent that heartbeats mid-race
    /// survives.
    pub fn expire_stale(
        &self,
        timeout: chrono::Duration,
    ) -> Result<Vec<String>, PublishError> {
        store::publish::<Registry, _, _, _>(
            self.store,
            REGISTRY_DOC,
            "[swarm] expired stale agents",
            self.policy,
            move |registry| {
                let now = Utc::now();
                let mut expired = Vec::new();
                for agent in &mut registry.agents {
                    if matches!(agent.status, AgentStatus::Idle | AgentStatus::Active)
                        && now - agent.last_heartbeat > timeout
                    {
                        agent.status = AgentStatus::TimedOut;
                        // The task reference dies with the agent: the sweep
                        // releases the task back to pending, and only an
                        // active agent may point at a task.
                        agent.current_task_id = None;
                        expired.push(agent.id.clone());
                    }
                }
                registry.touch();
                expired
            },
        )
    }

    /// Pure read of the whole document.
    pub fn snapshot(&self) -> Result<Registry, StoreError> {
        store::fetch(self.store, REGISTRY_DOC)
    }

    /// Pure read: count of agents in any of the given statuses.
    pub fn count_by_status(&self, statuses: &[AgentStatus]) -> Result<usize, StoreError> {
        Ok(self.snapshot()?.count_by_status(statuses))
    }
}
