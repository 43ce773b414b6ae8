//! Bootstrap the coordination documents and directories in a project.

use std::path::PathBuf;

use anyhow::Context;
use clap::Args;

use crate::queue::Queue;
use crate::registry::Registry;
use crate::store::{
    GitStore, QUEUE_DOC, REGISTRY_DOC, RetryPolicy, STATUS_DIR, VersionedStore, publish,
};

#[derive(Debug, Args)]
pub struct InitArgs {
    /// Project root directory
    #[arg(long)]
    pub project_root: Option<PathBuf>,
}

impl InitArgs {
    pub fn execute(&self) -> anyhow::Result<()> {
        let root = self
            .project_root
            .clone()
            .or_else(|| std::env::current_dir().ok())
            .context("determining project root")?;

        for dir in [STATUS_DIR, ".swarm/status/archive", ".swarm/tasks"] {
            std::fs::create_dir_all(root.join(dir))
                .with_context(|| format!("creating {dir}"))?;
        }

        let store = GitStore::auto(&root);
        bootstrap(&store)?;

        println!("Initialized swarm coordination in {}", root.display());
        println!("Next: add tasks with `swarm task add`, then run `swarm coordinator --daemon`.");
        Ok(())
    }
}

/// Create the registry and queue documents if they do not exist yet.
/// Existing documents are left untouched.
pub fn bootstrap(store: &dyn VersionedStore) -> anyhow::Result<()> {
    let policy = RetryPolicy::default();

    let (registry, _) = store.read(REGISTRY_DOC)?;
    if registry.is_none() {
        publish::<Registry, _, _, _>(store, REGISTRY_DOC, "[swarm] init registry", policy, |_| ())?;
        tracing::info!("initialized {REGISTRY_DOC}");
    }

    let (queue, _) = store.read(QUEUE_DOC)?;
    if queue.is_none() {
        publish::<Queue, _, _, _>(store, QUEUE_DOC, "[swarm] init task queue", policy, |_| ())?;
        tracing::info!("initialized {QUEUE_DOC}");
    }

    Ok(())
}
