//! Coordinator: the fleet-side control loop. Each cycle expires stale
//! agents, reclaims their work, reprioritizes pending tasks, and scales
//! the worker pool against the backlog.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::Context;
use clap::Args;
use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::monitor;
use crate::queue::QueueManager;
use crate::registry::{AgentStatus, RegistryManager};
use crate::scheduler;
use crate::store::{GitStore, RetryPolicy, VersionedStore};
use crate::subprocess::Tool;

#[derive(Debug, Args)]
pub struct CoordinatorArgs {
    /// Run the control loop forever at the poll interval
    #[arg(long)]
    pub daemon: bool,
    /// Spawn workers for pending tasks, then exit
    #[arg(long)]
    pub spawn_workers: bool,
    /// Scale the worker pool to N workers, then exit
    #[arg(long, value_name = "N")]
    pub scale_workers: Option<usize>,
    /// Reorder pending tasks by priority, then exit
    #[arg(long)]
    pub prioritize: bool,
    /// Mark all agents stopped
    #[arg(long)]
    pub shutdown: bool,
    /// With --shutdown: do not wait for agents to finish current work
    #[arg(long)]
    pub force: bool,
    /// With --shutdown: seconds to wait for agents to wind down
    #[arg(long, default_value_t = 300)]
    pub grace_period: u64,
    /// Emit current agent/task counts as JSON, then exit
    #[arg(long)]
    pub report: bool,
    /// Project root directory
    #[arg(long)]
    pub project_root: Option<PathBuf>,
}

/// Counts emitted by `--report` and logged each cycle.
#[derive(Debug, Serialize, Deserialize)]
pub struct FleetReport {
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub agents: AgentCounts,
    pub tasks: TaskCounts,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AgentCounts {
    pub total: usize,
    pub active: usize,
    pub idle: usize,
    pub stopped: usize,
    pub timed_out: usize,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TaskCounts {
    pub pending: usize,
    pub in_progress: usize,
    pub completed: usize,
    pub blocked: usize,
}

pub struct Coordinator<'a> {
    store: &'a dyn VersionedStore,
    policy: RetryPolicy,
    config: Config,
    /// Directory workers are spawned in; None disables spawning (tests).
    spawn_root: Option<PathBuf>,
}

impl<'a> Coordinator<'a> {
    pub fn new(
        store: &'a dyn VersionedStore,
        policy: RetryPolicy,
        config: Config,
        spawn_root: Option<PathBuf>,
    ) -> Self {
        Self {
            store,
            policy,
            config,
            spawn_root,
        }
    }

    fn registry(&self) -> RegistryManager<'a> {
        RegistryManager::new(self.store, self.policy)
    }

    fn queue(&self) -> QueueManager<'a> {
        QueueManager::new(self.store, self.policy)
    }

    /// One coordination cycle: sweep, reprioritize, scale, report.
    pub fn run_cycle(&self) -> anyhow::Result<FleetReport> {
        let sweep = monitor::sweep(
            &self.registry(),
            &self.queue(),
            self.config.heartbeat_timeout(),
        )?;
        if !sweep.expired_agents.is_empty() {
            tracing::warn!(
                expired = sweep.expired_agents.len(),
                released = sweep.released_tasks.len(),
                "reclaimed work from expired agents"
            );
        }

        scheduler::recompute_priorities(self.store, self.policy)?;

        if self.config.coordinator.enable_auto_scaling {
            self.spawn_workers_for_backlog()?;
        }

        let report = self.report()?;
        tracing::info!(
            active = report.agents.active,
            idle = report.agents.idle,
            pending = report.tasks.pending,
            in_progress = report.tasks.in_progress,
            "coordination cycle complete"
        );
        Ok(report)
    }

    /// Loop until interrupted, sleeping the poll interval between cycles.
    pub fn run_daemon(&self, stop: &AtomicBool) -> anyhow::Result<()> {
        tracing::info!("coordinator daemon started");
        while !stop.load(Ordering::SeqCst) {
            if let Err(e) = self.run_cycle() {
                tracing::error!(error = %e, "coordination cycle failed");
            }
            std::thread::sleep(self.config.poll_interval());
        }
        tracing::info!("coordinator daemon stopped");
        Ok(())
    }

    pub fn report(&self) -> anyhow::Result<FleetReport> {
        let registry = self.registry().snapshot()?;
        let queue = self.queue().snapshot()?;
        Ok(FleetReport {
            timestamp: chrono::Utc::now(),
            agents: AgentCounts {
                total: registry.agents.len(),
                active: registry.count_by_status(&[AgentStatus::Active]),
                idle: registry.count_by_status(&[AgentStatus::Idle]),
                stopped: registry.count_by_status(&[AgentStatus::Stopped]),
                timed_out: registry.count_by_status(&[AgentStatus::TimedOut]),
            },
            tasks: TaskCounts {
                pending: queue.pending.len(),
                in_progress: queue.in_progress.len(),
                completed: queue.completed.len(),
                blocked: queue.blocked.len(),
            },
        })
    }

    /// Spawn workers when there is a backlog and nobody idle to take it,
    /// capped at `max_workers` live agents.
    pub fn spawn_workers_for_backlog(&self) -> anyhow::Result<usize> {
        let registry = self.registry().snapshot()?;
        let queue = self.queue().snapshot()?;

        let pending = queue.pending.len();
        let idle = registry.count_by_status(&[AgentStatus::Idle]);
        if pending == 0 || idle > 0 {
            return Ok(0);
        }

        let live = registry.count_by_status(&[AgentStatus::Idle, AgentStatus::Active]);
        let room = self.config.agents.max_workers.saturating_sub(live);
        let to_spawn = room.min(pending);
        for _ in 0..to_spawn {
            self.spawn_worker()?;
        }
        Ok(to_spawn)
    }

    /// Scale the live pool to `count`: spawn up, or mark idle workers
    /// stopped to drain down.
    pub fn scale_workers(&self, count: usize) -> anyhow::Result<()> {
        let max = self.config.agents.max_workers;
        if count > max {
            anyhow::bail!("cannot scale to {count}: max_workers is {max}");
        }

        let registry_mgr = self.registry();
        let registry = registry_mgr.snapshot()?;
        let live = registry.count_by_status(&[AgentStatus::Idle, AgentStatus::Active]);

        if count > live {
            let to_spawn = count - live;
            tracing::info!(to_spawn, "scaling up");
            for _ in 0..to_spawn {
                self.spawn_worker()?;
            }
        } else if count < live {
            let mut to_stop = live - count;
            tracing::info!(to_stop, "scaling down");
            let idle_ids: Vec<String> = registry
                .agents
                .iter()
                .filter(|a| a.status == AgentStatus::Idle)
                .map(|a| a.id.clone())
                .collect();
            for id in idle_ids {
                if to_stop == 0 {
                    break;
                }
                registry_mgr.set_status(&id, AgentStatus::Stopped, None)?;
                to_stop -= 1;
            }
        }
        Ok(())
    }

    /// Mark every idle/active agent stopped. Workers notice at the top of
    /// their next cycle; --force skips the grace wait.
    pub fn shutdown(&self, force: bool, grace_period_secs: u64) -> anyhow::Result<()> {
        let registry_mgr = self.registry();
        let ids: Vec<String> = registry_mgr
            .snapshot()?
            .agents
            .iter()
            .filter(|a| matches!(a.status, AgentStatus::Idle | AgentStatus::Active))
            .map(|a| a.id.clone())
            .collect();

        tracing::info!(agents = ids.len(), force, "shutting down fleet");
        for id in &ids {
            registry_mgr.set_status(id, AgentStatus::Stopped, None)?;
        }

        if !force && !ids.is_empty() {
            tracing::info!(grace_period_secs, "waiting for agents to wind down");
            std::thread::sleep(std::time::Duration::from_secs(grace_period_secs));
        }
        Ok(())
    }

    /// Launch one detached `swarm worker` child.
    fn spawn_worker(&self) -> anyhow::Result<()> {
        let Some(root) = &self.spawn_root else {
            tracing::debug!("worker spawning disabled");
            return Ok(());
        };
        let millis = chrono::Utc::now().timestamp_millis();
        let agent_id = format!("coder-{:06}", millis.rem_euclid(1_000_000));
        let exe = std::env::current_exe().context("locating swarm binary")?;
        let caps = self.config.capabilities.available.join(",");

        let mut tool = Tool::new(&exe.to_string_lossy())
            .args(&["worker", "--agent-id", &agent_id])
            .current_dir(root);
        if !caps.is_empty() {
            tool = tool.args(&["--capabilities", &caps]);
        }
        tool.spawn_detached()?;
        tracing::info!(agent = %agent_id, "spawned worker");
        Ok(())
    }
}

/// `swarm report`: the same JSON as `swarm coordinator --report`.
#[derive(Debug, Args)]
pub struct ReportArgs {
    /// Project root directory
    #[arg(long)]
    pub project_root: Option<PathBuf>,
}

impl ReportArgs {
    pub fn execute(&self) -> anyhow::Result<()> {
        CoordinatorArgs {
            daemon: false,
            spawn_workers: false,
            scale_workers: None,
            prioritize: false,
            shutdown: false,
            force: false,
            grace_period: 300,
            report: true,
            project_root: self.project_root.clone(),
        }
        .execute()
    }
}

impl CoordinatorArgs {
    pub fn execute(&self) -> anyhow::Result<()> {
        let root = self
            .project_root
            .clone()
            .or_else(|| std::env::current_dir().ok())
            .context("determining project root")?;
        let config = Config::load_or_default(&root)?;
        let policy = RetryPolicy {
            max_attempts: config.agents.max_retries,
            backoff_base: std::time::Duration::from_millis(config.store.backoff_base_ms),
        };
        let store = GitStore::auto(&root);
        let coordinator = Coordinator::new(&store, policy, config, Some(root));

        if self.shutdown {
            return coordinator.shutdown(self.force, self.grace_period);
        }
        if let Some(count) = self.scale_workers {
            return coordinator.scale_workers(count);
        }
        if self.report {
            let report = coordinator.report()?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            return Ok(());
        }
        if self.prioritize {
            scheduler::recompute_priorities(&store, policy)?;
            return Ok(());
        }
        if self.spawn_workers {
            coordinator.spawn_workers_for_backlog()?;
            return Ok(());
        }
        if self.daemon {
            let stop = Arc::new(AtomicBool::new(false));
            let stop_handler = Arc::clone(&stop);
            ctrlc::set_handler(move || {
                tracing::info!("interrupt received, stopping daemon");
                stop_handler.store(true, Ordering::SeqCst);
            })
            .context("setting interrupt handler")?;
            return coordinator.run_daemon(&stop);
        }

        // Default: a single coordination cycle.
        coordinator.run_cycle().map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::{Complexity, TaskSpec};
    use crate::registry::AgentKind;
    use crate::store::MemStore;
    use std::time::Duration;

    fn fast() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            backoff_base: Duration::from_millis(1),
        }
    }

    fn coordinator(store: &MemStore) -> Coordinator<'_> {
        Coordinator::new(store, fast(), Config::default(), None)
    }

    fn spec(id: &str, priority: i64) -> TaskSpec {
        TaskSpec {
            id: id.to_string(),
            title: format!("task {id}"),
            description: String::new(),
            priority,
            dependencies: Vec::new(),
            required_capabilities: Vec::new(),
            estimated_complexity: Complexity::Medium,
            parent_task: None,
        }
    }

    #[test]
    fn report_counts_buckets_and_statuses() {
        let store = MemStore::new();
        let c = coordinator(&store);
        let registry = RegistryManager::new(&store, fast());
        let queue = QueueManager::new(&store, fast());

        registry.register("a", AgentKind::Coder, &[]).unwrap();
        registry.register("b", AgentKind::Tester, &[]).unwrap();
        registry
            .set_status("b", AgentStatus::Active, Some("t-0"))
            .unwrap();
        queue.add_task(spec("t-0", 5)).unwrap();
        queue.add_task(spec("t-1", 5)).unwrap();
        queue.claim("t-0", "b").unwrap();

        let report = c.report().unwrap();
        assert_eq!(report.agents.total, 2);
        assert_eq!(report.agents.active, 1);
        assert_eq!(report.agents.idle, 1);
        assert_eq!(report.tasks.pending, 1);
        assert_eq!(report.tasks.in_progress, 1);
    }

    #[test]
    fn cycle_reprioritizes_pending() {
        let store = MemStore::new();
        let c = coordinator(&store);
        let queue = QueueManager::new(&store, fast());

        queue.add_task(spec("low", 1)).unwrap();
        queue.add_task(spec("high", 9)).unwrap();

        c.run_cycle().unwrap();
        let snapshot = queue.snapshot().unwrap();
        assert_eq!(snapshot.pending[0].id, "high");
        assert_eq!(snapshot.pending[1].id, "low");
    }

    #[test]
    fn scale_beyond_max_is_rejected() {
        let store = MemStore::new();
        let c = coordinator(&store);
        assert!(c.scale_workers(999).is_err());
    }

    #[test]
    fn scale_down_stops_idle_workers_only() {
        let store = MemStore::new();
        let c = coordinator(&store);
        let registry = RegistryManager::new(&store, fast());
        registry.register("a", AgentKind::Coder, &[]).unwrap();
        registry.register("b", AgentKind::Coder, &[]).unwrap();
        registry
            .set_status("b", AgentStatus::Active, Some("t"))
            .unwrap();

        c.scale_workers(1).unwrap();
        let snapshot = registry.snapshot().unwrap();
        assert_eq!(snapshot.find("a").unwrap().status, AgentStatus::Stopped);
        // The active worker finishes its task before draining.
        assert_eq!(snapshot.find("b").unwrap().status, AgentStatus::Active);
    }

    #[test]
    fn shutdown_marks_all_live_agents_stopped() {
        let store = MemStore::new();
        let c = coordinator(&store);
        let registry = RegistryManager::new(&store, fast());
        registry.register("a", AgentKind::Coder, &[]).unwrap();
        registry.register("b", AgentKind::Coder, &[]).unwrap();
        registry
            .set_status("b", AgentStatus::Active, Some("t"))
            .unwrap();

        c.shutdown(true, 0).unwrap();
        let snapshot = registry.snapshot().unwrap();
        assert!(
            snapshot
                .agents
                .iter()
                .all(|a| a.status == AgentStatus::Stopped)
        );
    }

    #[test]
    fn backlog_spawning_skipped_when_idle_agents_exist() {
        let store = MemStore::new();
        let c = coordinator(&store);
        let registry = RegistryManager::new(&store, fast());
        let queue = QueueManager::new(&store, fast());
        registry.register("a", AgentKind::Coder, &[]).unwrap();
        queue.add_task(spec("t", 5)).unwrap();

        assert_eq!(c.spawn_workers_for_backlog().unwrap(), 0);
    }

    #[test]
    fn backlog_spawning_capped_by_max_workers() {
        let store = MemStore::new();
        let mut config = Config::default();
        config.agents.max_workers = 2;
        // spawn_root is None so "spawning" only counts.
        let c = Coordinator::new(&store, fast(), config, None);
        let queue = QueueManager::new(&store, fast());
        for i in 0..5 {
            queue.add_task(spec(&format!("t-{i}"), 5)).unwrap();
        }

        assert_eq!(c.spawn_workers_for_backlog().unwrap(), 2);
    }

    #[test]
    fn cycle_expires_stale_agents_and_releases_work() {
        let store = MemStore::new();
        let c = coordinator(&store);
        let registry = RegistryManager::new(&store, fast());
        let queue = QueueManager::new(&store, fast());

        registry.register("dead", AgentKind::Coder, &[]).unwrap();
        queue.add_task(spec("t", 5)).unwrap();
        queue.claim("t", "dead").unwrap();
        registry
            .set_status("dead", AgentStatus::Active, Some("t"))
            .unwrap();
        crate::store::publish::<crate::registry::Registry, _, _, _>(
            &store,
            crate::store::REGISTRY_DOC,
            "backdate",
            fast(),
            |r| {
                for a in &mut r.agents {
                    a.last_heartbeat = chrono::Utc::now() - chrono::Duration::minutes(11);
                }
            },
        )
        .unwrap();

        let report = c.run_cycle().unwrap();
        assert_eq!(report.agents.timed_out, 1);
        assert_eq!(report.tasks.pending, 1);
        assert_eq!(report.tasks.in_progress, 0);
    }
}
