//! Worker lifecycle: register, then poll for claimable tasks and execute
//! them one at a time. idle -> active -> idle, with stopped as the
//! terminal state on shutdown.

use std::io::Write;
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use anyhow::Context;
use clap::Args;

use crate::config::Config;
use crate::error::ExitError;
use crate::queue::{ClaimOutcome, QueueManager, Task};
use crate::registry::{AgentKind, AgentStatus, RegistryManager};
use crate::statusdoc::StatusDir;
use crate::store::{GitStore, RetryPolicy, STATUS_DIR, VersionedStore};

/// Business logic run for a claimed task. The coordination layer only
/// cares about success or failure.
pub trait TaskExecutor {
    fn execute(&self, task: &Task) -> anyhow::Result<()>;
}

impl<F> TaskExecutor for F
where
    F: Fn(&Task) -> anyhow::Result<()>,
{
    fn execute(&self, task: &Task) -> anyhow::Result<()> {
        self(task)
    }
}

/// Runs a configured shell command with the task as JSON on stdin.
/// Nonzero exit is a task failure.
pub struct ShellExecutor {
    command: String,
}

impl ShellExecutor {
    pub fn new(command: &str) -> Self {
        Self {
            command: command.to_string(),
        }
    }
}

impl TaskExecutor for ShellExecutor {
    fn execute(&self, task: &Task) -> anyhow::Result<()> {
        let mut child = Command::new("sh")
            .args(["-c", &self.command])
            .stdin(Stdio::piped())
            .spawn()
            .context("spawning worker command")?;
        if let Some(stdin) = child.stdin.as_mut() {
            let body = serde_json::to_string(task)?;
            stdin.write_all(body.as_bytes()).context("writing task to stdin")?;
        }
        let status = child.wait().context("waiting for worker command")?;
        if status.success() {
            Ok(())
        } else {
            anyhow::bail!("worker command exited with {status}")
        }
    }
}

/// Logs the task and reports success. Used when no worker command is
/// configured.
pub struct NoopExecutor;

impl TaskExecutor for NoopExecutor {
    fn execute(&self, task: &Task) -> anyhow::Result<()> {
        tracing::info!(task = %task.id, title = %task.title, "no worker command configured, marking done");
        Ok(())
    }
}

/// What a single poll cycle did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    /// No claimable task this cycle.
    NoWork,
    /// Lost the claim race; the caller retries next cycle.
    ClaimLost,
    Completed(String),
    Failed(String),
}

/// One worker process's view of the fleet.
pub struct Worker<'a> {
    pub agent_id: String,
    pub kind: AgentKind,
    pub capabilities: Vec<String>,
    registry: RegistryManager<'a>,
    queue: QueueManager<'a>,
    status_docs: StatusDir,
    executor: Box<dyn TaskExecutor + 'a>,
}

impl<'a> Worker<'a> {
    pub fn new(
        agent_id: &str,
        kind: AgentKind,
        capabilities: Vec<String>,
        store: &'a dyn VersionedStore,
        policy: RetryPolicy,
        status_dir: &std::path::Path,
        executor: Box<dyn TaskExecutor + 'a>,
    ) -> Self {
        Self {
            agent_id: agent_id.to_string(),
            kind,
            capabilities,
            registry: RegistryManager::new(store, policy),
            queue: QueueManager::new(store, policy),
            status_docs: StatusDir::new(status_dir),
            executor,
        }
    }

    /// Register with the fleet. A worker that cannot register must not
    /// run: nothing would reclaim its work if it died.
    pub fn register(&self) -> anyhow::Result<()> {
        self.registry
            .register(&self.agent_id, self.kind, &self.capabilities)
            .map_err(|e| {
                ExitError::RegistrationFailed {
                    agent: self.agent_id.clone(),
                    message: e.to_string(),
                }
                .into()
            })
    }

    pub fn heartbeat(&self) {
        if let Err(e) = self.registry.heartbeat(&self.agent_id) {
            // Tolerated: the next beat covers it, and the lease is long.
            tracing::warn!(agent = %self.agent_id, error = %e, "heartbeat publish failed");
        }
    }

    /// One idle-state poll: look for work, claim it, execute, and record
    /// the result. Claim races and executor failures are ordinary
    /// outcomes, not errors; errors mean the store itself failed.
    pub fn run_cycle(&self) -> anyhow::Result<CycleOutcome> {
        let Some(candidate) = self.queue.find_claimable(&self.capabilities)? else {
            return Ok(CycleOutcome::NoWork);
        };

        let task = match self.queue.claim(&candidate.id, &self.agent_id)? {
            ClaimOutcome::Claimed(task) => task,
            ClaimOutcome::Lost => {
                tracing::debug!(task = %candidate.id, "claim lost to another agent");
                return Ok(CycleOutcome::ClaimLost);
            }
        };

        // Queue first, registry second: a crash here leaves the task
        // claimed with a stale registry record, which the heartbeat sweep
        // eventually repairs. The reverse order could mark us active on a
        // task we never got.
        self.registry
            .set_status(&self.agent_id, AgentStatus::Active, Some(&task.id))?;
        if let Err(e) = self.status_docs.create(&self.agent_id, &task, None) {
            tracing::warn!(error = %e, "could not write status document");
        }

        tracing::info!(agent = %self.agent_id, task = %task.id, "executing task");
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            self.executor.execute(&task)
        }))
        .unwrap_or_else(|_| Err(anyhow::anyhow!("executor panicked")));

        match result {
            Ok(()) => {
                if !self.queue.complete(&task.id, &self.agent_id)? {
                    // The task left in_progress under us (e.g. a sweep
                    // reclaimed it after a false expiry). Nothing to undo.
                    tracing::warn!(task = %task.id, "task was no longer in progress at completion");
                }
                self.registry
                    .set_status(&self.agent_id, AgentStatus::Idle, None)?;
                if let Err(e) = self.status_docs.archive(&self.agent_id, &task.id) {
                    tracing::warn!(error = %e, "could not archive status document");
                }
                tracing::info!(agent = %self.agent_id, task = %task.id, "task completed");
                Ok(CycleOutcome::Completed(task.id))
            }
            Err(e) => {
                tracing::error!(agent = %self.agent_id, task = %task.id, error = %e, "task execution failed");
                let _ = self
                    .status_docs
                    .append_progress(&self.agent_id, &format!("Execution failed: {e}"));
                // Release immediately instead of stranding the task in
                // in_progress until the heartbeat sweep fires.
                self.queue.release(&task.id)?;
                self.registry
                    .set_status(&self.agent_id, AgentStatus::Idle, None)?;
                Ok(CycleOutcome::Failed(task.id))
            }
        }
    }

    /// Mark ourselves stopped. Best-effort on the way out.
    pub fn stop(&self) {
        if let Err(e) = self
            .registry
            .set_status(&self.agent_id, AgentStatus::Stopped, None)
        {
            tracing::warn!(agent = %self.agent_id, error = %e, "could not record stop");
        }
    }

    /// Full poll loop. The stop flag is checked at the top of each
    /// iteration; an in-flight cycle always runs to completion.
    pub fn run(
        &self,
        poll_interval: std::time::Duration,
        heartbeat_interval: std::time::Duration,
        stop: &AtomicBool,
    ) -> anyhow::Result<()> {
        self.register()?;
        tracing::info!(agent = %self.agent_id, kind = %self.kind, "worker registered");

        let mut last_beat = Instant::now();
        while !stop.load(Ordering::SeqCst) {
            if last_beat.elapsed() >= heartbeat_interval {
                self.heartbeat();
                last_beat = Instant::now();
            }

            match self.run_cycle() {
                Ok(CycleOutcome::NoWork) => {}
                Ok(CycleOutcome::ClaimLost) => continue,
                Ok(CycleOutcome::Completed(_) | CycleOutcome::Failed(_)) => continue,
                Err(e) => {
                    // Store trouble: log and keep polling. The loop must
                    // survive transient infrastructure failures.
                    tracing::error!(agent = %self.agent_id, error = %e, "cycle failed");
                }
            }

            std::thread::sleep(poll_interval);
        }

        self.stop();
        tracing::info!(agent = %self.agent_id, "worker stopped");
        Ok(())
    }
}

#[derive(Debug, Args)]
pub struct WorkerArgs {
    /// Unique agent id for this worker process
    #[arg(long)]
    pub agent_id: String,
    /// Agent kind (coder, reviewer, tester, planner)
    #[arg(long, default_value = "coder")]
    pub kind: AgentKind,
    /// Comma-separated capability tags
    #[arg(long, value_delimiter = ',')]
    pub capabilities: Vec<String>,
    /// Project root directory
    #[arg(long)]
    pub project_root: Option<PathBuf>,
}

impl WorkerArgs {
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

        let executor: Box<dyn TaskExecutor> = match &config.agents.worker_command {
            Some(cmd) if !cmd.is_empty() => Box::new(ShellExecutor::new(cmd)),
            _ => Box::new(NoopExecutor),
        };

        let worker = Worker::new(
            &self.agent_id,
            self.kind,
            self.capabilities.clone(),
            &store,
            policy,
            &root.join(STATUS_DIR),
            executor,
        );

        let stop = Arc::new(AtomicBool::new(false));
        let stop_handler = Arc::clone(&stop);
        ctrlc::set_handler(move || {
            tracing::info!("interrupt received, stopping after current cycle");
            stop_handler.store(true, Ordering::SeqCst);
        })
        .context("setting interrupt handler")?;

        worker.run(config.poll_interval(), config.heartbeat_interval(), &stop)
    }
}
