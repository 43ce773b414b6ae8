//! Operator task management: add tasks to the queue and force-complete
//! stuck ones.

use std::path::PathBuf;

use anyhow::Context;
use clap::{Args, Subcommand};

use crate::config::Config;
use crate::queue::{Complexity, QueueManager, TaskSpec};
use crate::store::{GitStore, RetryPolicy};

#[derive(Debug, Subcommand)]
pub enum TaskCommand {
    /// Add a new task to the pending queue
    Add(AddArgs),
    /// Force-complete a task on behalf of an agent
    Complete(CompleteArgs),
}

#[derive(Debug, Args)]
pub struct AddArgs {
    /// Task id; generated from the title when omitted
    #[arg(long)]
    pub id: Option<String>,
    #[arg(long)]
    pub title: String,
    #[arg(long, default_value = "")]
    pub description: String,
    /// Base priority; higher runs sooner
    #[arg(long, default_value_t = 5)]
    pub priority: i64,
    #[arg(long, default_value = "medium")]
    pub complexity: Complexity,
    /// Comma-separated ids this task depends on
    #[arg(long, value_delimiter = ',')]
    pub depends: Vec<String>,
    /// Comma-separated capabilities an agent needs to claim this
    #[arg(long, value_delimiter = ',')]
    pub requires: Vec<String>,
    /// Parent task id, for decomposed work
    #[arg(long)]
    pub parent: Option<String>,
    /// Project root directory
    #[arg(long)]
    pub project_root: Option<PathBuf>,
}

#[derive(Debug, Args)]
pub struct CompleteArgs {
    #[arg(long)]
    pub task_id: String,
    /// Agent credited with the completion
    #[arg(long)]
    pub agent_id: String,
    /// Project root directory
    #[arg(long)]
    pub project_root: Option<PathBuf>,
}

impl TaskCommand {
    pub fn execute(&self) -> anyhow::Result<()> {
        match self {
            Self::Add(args) => args.execute(),
            Self::Complete(args) => args.execute(),
        }
    }
}

fn queue_manager(root: Option<&PathBuf>) -> anyhow::Result<(GitStore, RetryPolicy)> {
    let root = root
        .cloned()
        .or_else(|| std::env::current_dir().ok())
        .context("determining project root")?;
    let config = Config::load_or_default(&root)?;
    let policy = RetryPolicy {
        max_attempts: config.agents.max_retries,
        backoff_base: std::time::Duration::from_millis(config.store.backoff_base_ms),
    };
    Ok((GitStore::auto(&root), policy))
}

impl AddArgs {
    pub fn execute(&self) -> anyhow::Result<()> {
        let (store, policy) = queue_manager(self.project_root.as_ref())?;
        let queue = QueueManager::new(&store, policy);

        let id = self
            .id
            .clone()
            .unwrap_or_else(|| slugify(&self.title));
        queue.add_task(TaskSpec {
            id: id.clone(),
            title: self.title.clone(),
            description: self.description.clone(),
            priority: self.priority,
            dependencies: self.depends.clone(),
            required_capabilities: self.requires.clone(),
            estimated_complexity: self.complexity,
            parent_task: self.parent.clone(),
        })?;
        println!("Added task {id}");
        Ok(())
    }
}

impl CompleteArgs {
    pub fn execute(&self) -> anyhow::Result<()> {
        let (store, policy) = queue_manager(self.project_root.as_ref())?;
        let queue = QueueManager::new(&store, policy);

        if queue.complete(&self.task_id, &self.agent_id)? {
            println!("Completed task {}", self.task_id);
            Ok(())
        } else {
            anyhow::bail!("task {} is not in progress", self.task_id)
        }
    }
}

/// Derive a task id from a title: lowercase alphanumeric runs joined by
/// hyphens, with a timestamp suffix for uniqueness.
fn slugify(title: &str) -> String {
    let mut slug = String::new();
    let mut last_hyphen = true;
    for ch in title.chars().take(48) {
        if ch.is_ascii_alphanumeric() {
            slug.push(ch.to_ascii_lowercase());
            last_hyphen = false;
        } else if !last_hyphen {
            slug.push('-');
            last_hyphen = true;
        }
    }
    let slug = slug.trim_end_matches('-');
    let stamp = chrono::Utc::now().timestamp_millis().rem_euclid(1_000_000);
    format!("{slug}-{stamp:06}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slugify_normalizes_punctuation_and_case() {
        let slug = slugify("Fix: the Login BUG!!");
        let (name, stamp) = slug.rsplit_once('-').unwrap();
        assert_eq!(name, "fix-the-login-bug");
        assert_eq!(stamp.len(), 6);
        assert!(stamp.chars().all(|c| c.is_ascii_digit()));
    }

    #[test]
    fn slugify_never_emits_double_hyphens() {
        let slug = slugify("a  --  b");
        assert!(!slug.contains("--"));
    }
}
