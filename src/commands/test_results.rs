//! Splice CI test results into an agent's status document.

use std::path::PathBuf;

use anyhow::Context;
use clap::Args;

use crate::statusdoc::{StatusDir, TestSummary};
use crate::store::STATUS_DIR;

#[derive(Debug, Args)]
pub struct TestResultsArgs {
    /// Agent whose status document to update
    #[arg(long, conflicts_with = "branch")]
    pub agent_id: Option<String>,
    /// Resolve the agent from the branch recorded in its status document
    #[arg(long)]
    pub branch: Option<String>,
    #[arg(long)]
    pub passed: u64,
    #[arg(long, default_value_t = 0)]
    pub failed: u64,
    #[arg(long, default_value_t = 0)]
    pub skipped: u64,
    /// Coverage percentage
    #[arg(long)]
    pub coverage: Option<f64>,
    /// Project root directory
    #[arg(long)]
    pub project_root: Option<PathBuf>,
}

impl TestResultsArgs {
    pub fn execute(&self) -> anyhow::Result<()> {
        let root = self
            .project_root
            .clone()
            .or_else(|| std::env::current_dir().ok())
            .context("determining project root")?;
        let docs = StatusDir::new(&root.join(STATUS_DIR));

        let agent_id = match (&self.agent_id, &self.branch) {
            (Some(id), _) => id.clone(),
            (None, Some(branch)) => docs
                .agent_for_branch(branch)
                .with_context(|| format!("no agent found for branch {branch}"))?,
            (None, None) => anyhow::bail!("one of --agent-id or --branch is required"),
        };

        let summary = TestSummary {
            total: self.passed + self.failed + self.skipped,
            passed: self.passed,
            failed: self.failed,
            skipped: self.skipped,
            coverage: self.coverage,
        };
        docs.update_test_results(&agent_id, &summary)?;
        println!(
            "Updated test results for {agent_id}: {} passed, {} failed",
            self.passed, self.failed
        );
        Ok(())
    }
}
