//! Task queue: four disjoint buckets plus metadata, persisted as one
//! versioned document. A task id lives in exactly one bucket at any
//! observed snapshot, and the only moves are pending -> in_progress ->
//! completed, or in_progress -> pending on release.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{PublishError, StoreError};
use crate::store::{self, QUEUE_DOC, RetryPolicy, VersionedStore};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Complexity {
    Low,
    #[default]
    Medium,
    High,
}

impl Complexity {
    /// Scheduler weight: heavier tasks rank lower at equal priority.
    pub fn weight(self) -> f64 {
        match self {
            Self::Low => 1.0,
            Self::Medium => 1.5,
            Self::High => 2.0,
        }
    }
}

impl std::str::FromStr for Complexity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "low" => Ok(Self::Low),
            "medium" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            other => Err(format!("unknown complexity: {other}")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_priority")]
    pub priority: i64,
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default)]
    pub required_capabilities: Vec<String>,
    #[serde(default)]
    pub estimated_complexity: Complexity,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_task: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub claimed_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub claimed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

fn default_priority() -> i64 {
    5
}

/// Author-facing fields for a new task.
#[derive(Debug, Clone)]
pub struct TaskSpec {
    pub id: String,
    pub title: String,
    pub description: String,
    pub priority: i64,
    pub dependencies: Vec<String>,
    pub required_capabilities: Vec<String>,
    pub estimated_complexity: Complexity,
    pub parent_task: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueMetadata {
    pub created_at: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
    pub total_tasks_created: u64,
    pub total_tasks_completed: u64,
}

impl Default for QueueMetadata {
    fn default() -> Self {
        let now = Utc::now();
        Self {
            created_at: now,
            last_updated: now,
            total_tasks_created: 0,
            total_tasks_completed: 0,
        }
    }
}

/// The persisted queue document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Queue {
    #[serde(default)]
    pub pending: Vec<Task>,
    #[serde(default)]
    pub in_progress: Vec<Task>,
    #[serde(default)]
    pub completed: Vec<Task>,
    #[serde(default)]
    pub blocked: Vec<Task>,
    #[serde(default)]
    pub metadata: QueueMetadata,
}

impl Queue {
    pub fn total_tasks(&self) -> usize {
        self.pending.len() + self.in_progress.len() + self.completed.len() + self.blocked.len()
    }

    fn touch(&mut self) {
        self.metadata.last_updated = Utc::now();
    }

    /// First pending task (in order) whose dependencies are all completed
    /// and whose required capabilities are empty or intersect the given
    /// set. First-match, not best-match: ordering is the scheduler's job.
    pub fn find_claimable(&self, capabilities: &[String]) -> Option<&Task> {
        let completed_ids: Vec<&str> = self.completed.iter().map(|t| t.id.as_str()).collect();
        self.pending.iter().find(|task| {
            let deps_met = task
                .dependencies
                .iter()
                .all(|dep| completed_ids.contains(&dep.as_str()));
            let caps_met = task.required_capabilities.is_empty()
                || task
                    .required_capabilities
                    .iter()
                    .any(|cap| capabilities.contains(cap));
            deps_met && caps_met
        })
    }
}

/// Outcome of a claim attempt. Losing the race is an expected result,
/// not an error.
#[derive(Debug, Clone)]
pub enum ClaimOutcome {
    Claimed(Task),
    Lost,
}

/// Queue operations over a versioned store.
pub struct QueueManager<'a> {
    store: &'a dyn VersionedStore,
    policy: RetryPolicy,
}

impl<'a> QueueManager<'a> {
    pub fn new(store: &'a dyn VersionedStore, policy: RetryPolicy) -> Self {
        Self { store, policy }
    }

    /// Pure read of the whole document.
    pub fn snapshot(&self) -> Result<Queue, StoreError> {
        store::fetch(self.store, QUEUE_DOC)
    }

    /// Pure read: first claimable pending task for the given capabilities.
    pub fn find_claimable(&self, capabilities: &[String]) -> Result<Option<Task>, StoreError> {
        Ok(self.snapshot()?.find_claimable(capabilities).cloned())
    }

    /// Move a task from pending to in_progress and stamp the claim. If the
    /// task is no longer pending in the revision the swap lands on, the
    /// claim is lost.
    pub fn claim(&self, task_id: &str, agent_id: &str) -> Result<ClaimOutcome, PublishError> {
        let summary = format!("[swarm] {agent_id} claims {task_id}");
        let task_id = task_id.to_string();
        let agent_id = agent_id.to_string();
        store::publish::<Queue, _, _, _>(
            self.store,
            QUEUE_DOC,
            &summary,
            self.policy,
            move |queue| {
                let Some(pos) = queue.pending.iter().position(|t| t.id == task_id) else {
                    return ClaimOutcome::Lost;
                };
                let mut task = queue.pending.remove(pos);
                task.claimed_by = Some(agent_id.clone());
                task.claimed_at = Some(Utc::now());
                queue.in_progress.push(task.clone());
                queue.touch();
                ClaimOutcome::Claimed(task)
            },
        )
    }

    /// Move a task from in_progress to completed and stamp completion.
    pub fn complete(&self, task_id: &str, agent_id: &str) -> Result<bool, PublishError> {
        let summary = format!("[swarm] {agent_id} completed {task_id}");
        let task_id = task_id.to_string();
        let agent_id = agent_id.to_string();
        store::publish::<Queue, _, _, _>(
            self.store,
            QUEUE_DOC,
            &summary,
            self.policy,
            move |queue| {
                let Some(pos) = queue.in_progress.iter().position(|t| t.id == task_id) else {
                    return false;
                };
                let mut task = queue.in_progress.remove(pos);
                task.completed_by = Some(agent_id.clone());
                task.completed_at = Some(Utc::now());
                queue.completed.push(task);
                queue.metadata.total_tasks_completed += 1;
                queue.touch();
                true
            },
        )
    }

    /// Move a task from in_progress back to pending, clearing the claim.
    pub fn release(&self, task_id: &str) -> Result<bool, PublishError> {
        let summary = format!("[swarm] released {task_id}");
        let task_id = task_id.to_string();
        store::publish::<Queue, _, _, _>(
            self.store,
            QUEUE_DOC,
            &summary,
            self.policy,
            move |queue| {
                let Some(pos) = queue.in_progress.iter().position(|t| t.id == task_id) else {
                    return false;
                };
                let mut task = queue.in_progress.remove(pos);
                task.claimed_by = None;
                task.claimed_at = None;
                queue.pending.push(task);
                queue.touch();
                true
            },
        )
    }

    /// Append a new task to pending.
    pub fn add_task(&self, spec: TaskSpec) -> Result<(), PublishError> {
        let summary = format!("[swarm] task added {}", spec.id);
        store::publish::<Queue, _, _, _>(
            self.store,
            QUEUE_DOC,
            &summary,
            self.policy,
            move |queue| {
                queue.pending.push(Task {
                    id: spec.id.clone(),
                    title: spec.title.clone(),
                    description: spec.description.clone(),
                    priority: spec.priority,
                    dependencies: spec.dependencies.clone(),
                    required_capabilities: spec.required_capabilities.clone(),
                    estimated_complexity: spec.estimated_complexity,
                    created_at: Utc::now(),
                    parent_task: spec.parent_task.clone(),
                    claimed_by: None,
                    claimed_at: None,
                    completed_by: None,
                    completed_at: None,
                });
                queue.metadata.total_tasks_created += 1;
                queue.touch();
            },
        )
    }
}

#[cfg(test)]
pub(crate) fn task_fixture(id: &str) -> Task {
    Task {
        id: id.to_string(),
        title: format!("task {id}"),
        description: String::new(),
        priority: 5,
        dependencies: Vec::new(),
        required_capabilities: Vec::new(),
        estimated_complexity: Complexity::Medium,
        created_at: Utc::now(),
        parent_task: None,
        claimed_by: None,
        claimed_at: None,
        completed_by: None,
        completed_at: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemStore;
    use std::time::Duration;

    fn fast() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            backoff_base: Duration::from_millis(1),
        }
    }

    fn spec(id: &str) -> TaskSpec {
        TaskSpec {
            id: id.to_string(),
            title: format!("task {id}"),
            description: String::new(),
            priority: 5,
            dependencies: Vec::new(),
            required_capabilities: Vec::new(),
            estimated_complexity: Complexity::Medium,
            parent_task: None,
        }
    }

    #[test]
    fn claim_moves_pending_to_in_progress() {
        let store = MemStore::new();
        let mgr = QueueManager::new(&store, fast());
        mgr.add_task(spec("t-1")).unwrap();

        let outcome = mgr.claim("t-1", "coder-1").unwrap();
        let ClaimOutcome::Claimed(task) = outcome else {
            panic!("expected claim to succeed");
        };
        assert_eq!(task.claimed_by.as_deref(), Some("coder-1"));
        assert!(task.claimed_at.is_some());

        let queue = mgr.snapshot().unwrap();
        assert!(queue.pending.is_empty());
        assert_eq!(queue.in_progress.len(), 1);
    }

    #[test]
    fn claiming_missing_task_is_lost_not_error() {
        let store = MemStore::new();
        let mgr = QueueManager::new(&store, fast());
        let outcome = mgr.claim("ghost", "coder-1").unwrap();
        assert!(matches!(outcome, ClaimOutcome::Lost));
    }

    #[test]
    fn second_claim_loses() {
        let store = MemStore::new();
        let mgr = QueueManager::new(&store, fast());
        mgr.add_task(spec("t-1")).unwrap();

        assert!(matches!(
            mgr.claim("t-1", "a").unwrap(),
            ClaimOutcome::Claimed(_)
        ));
        assert!(matches!(mgr.claim("t-1", "b").unwrap(), ClaimOutcome::Lost));
    }

    #[test]
    fn complete_stamps_and_counts() {
        let store = MemStore::new();
        let mgr = QueueManager::new(&store, fast());
        mgr.add_task(spec("t-1")).unwrap();
        mgr.claim("t-1", "coder-1").unwrap();

        assert!(mgr.complete("t-1", "coder-1").unwrap());
        let queue = mgr.snapshot().unwrap();
        assert_eq!(queue.completed.len(), 1);
        assert_eq!(queue.metadata.total_tasks_completed, 1);
        let done = &queue.completed[0];
        assert_eq!(done.completed_by.as_deref(), Some("coder-1"));
        assert!(done.completed_at.is_some());
        // The claim stamp survives into the completed record.
        assert_eq!(done.claimed_by.as_deref(), Some("coder-1"));
    }

    #[test]
    fn release_returns_task_to_pending_and_clears_claim() {
        let store = MemStore::new();
        let mgr = QueueManager::new(&store, fast());
        mgr.add_task(spec("t-1")).unwrap();
        mgr.claim("t-1", "coder-1").unwrap();

        assert!(mgr.release("t-1").unwrap());
        let queue = mgr.snapshot().unwrap();
        assert_eq!(queue.pending.len(), 1);
        assert!(queue.in_progress.is_empty());
        assert!(queue.pending[0].claimed_by.is_none());
        assert!(queue.pending[0].claimed_at.is_none());
    }

    #[test]
    fn dependency_gated_claimability() {
        let store = MemStore::new();
        let mgr = QueueManager::new(&store, fast());
        mgr.add_task(spec("a")).unwrap();
        let mut b = spec("b");
        b.dependencies = vec!["a".to_string()];
        mgr.add_task(b).unwrap();

        // Only A is claimable while A is incomplete.
        let found = mgr.find_claimable(&[]).unwrap().unwrap();
        assert_eq!(found.id, "a");

        mgr.claim("a", "w").unwrap();
        mgr.complete("a", "w").unwrap();

        let found = mgr.find_claimable(&[]).unwrap().unwrap();
        assert_eq!(found.id, "b");
    }

    #[test]
    fn capability_gated_claimability() {
        let store = MemStore::new();
        let mgr = QueueManager::new(&store, fast());
        let mut t = spec("t");
        t.required_capabilities = vec!["python".to_string()];
        mgr.add_task(t).unwrap();

        assert!(
            mgr.find_claimable(&["design".to_string()])
                .unwrap()
                .is_none()
        );
        let found = mgr
            .find_claimable(&["python".to_string(), "design".to_string()])
            .unwrap();
        assert_eq!(found.unwrap().id, "t");
    }

    #[test]
    fn empty_required_capabilities_matches_any_agent() {
        let store = MemStore::new();
        let mgr = QueueManager::new(&store, fast());
        mgr.add_task(spec("t")).unwrap();
        assert!(mgr.find_claimable(&[]).unwrap().is_some());
    }

    #[test]
    fn task_conservation_across_moves() {
        let store = MemStore::new();
        let mgr = QueueManager::new(&store, fast());
        for i in 0..5 {
            mgr.add_task(spec(&format!("t-{i}"))).unwrap();
        }

        mgr.claim("t-0", "w").unwrap();
        mgr.claim("t-1", "w").unwrap();
        mgr.complete("t-0", "w").unwrap();
        mgr.release("t-1").unwrap();

        let queue = mgr.snapshot().unwrap();
        assert_eq!(queue.total_tasks(), 5);
        assert_eq!(queue.metadata.total_tasks_created, 5);
    }
}
