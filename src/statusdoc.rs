//! Per-agent status documents: human-readable markdown, one per active
//! agent. Not authoritative state; the registry and queue are.
//!
//! The section headings are load-bearing. External CI tooling rewrites the
//! `## Test Results` section by locating that heading and the next `## `
//! heading, so the heading text must stay byte-for-byte stable.

use std::path::{Path, PathBuf};

use anyhow::Context;
use chrono::Utc;

use crate::queue::Task;

pub const PROGRESS_HEADING: &str = "## Progress";
pub const DEPENDENCIES_HEADING: &str = "## Dependencies";
pub const TEST_RESULTS_HEADING: &str = "## Test Results";

/// Test counts splice into the Test Results section.
#[derive(Debug, Clone, Copy)]
pub struct TestSummary {
    pub total: u64,
    pub passed: u64,
    pub failed: u64,
    pub skipped: u64,
    pub coverage: Option<f64>,
}

impl TestSummary {
    pub fn passing(&self) -> bool {
        self.failed == 0
    }
}

/// Directory of status documents, one markdown file per agent.
pub struct StatusDir {
    dir: PathBuf,
}

impl StatusDir {
    pub fn new(dir: &Path) -> Self {
        Self {
            dir: dir.to_path_buf(),
        }
    }

    pub fn path_for(&self, agent_id: &str) -> PathBuf {
        self.dir.join(format!("{agent_id}.md"))
    }

    /// Write a fresh status document for a newly claimed task.
    pub fn create(&self, agent_id: &str, task: &Task, branch: Option<&str>) -> anyhow::Result<()> {
        std::fs::create_dir_all(&self.dir).context("creating status directory")?;
        let now = Utc::now();
        let deps = if task.dependencies.is_empty() {
            "None".to_string()
        } else {
            task.dependencies.join(", ")
        };
        let content = format!(
            "# Agent: {agent_id}\n\
             **Status**: active\n\
             **Task**: {task_id} - {title}\n\
             **Branch**: {branch}\n\
             **Started**: {started}\n\
             \n\
             ## Plan\n\
             - [ ] Analyze task requirements\n\
             - [ ] Implement solution\n\
             - [ ] Test implementation\n\
             \n\
             {progress}\n\
             ### Started ({stamp})\n\
             - Task claimed and initialized\n\
             \n\
             {dependencies}\n\
             - Waiting on: {deps}\n\
             \n\
             ## Issues\n\
             - None currently\n\
             \n\
             {tests}\n\
             - Not yet run\n",
            task_id = task.id,
            title = task.title,
            branch = branch.unwrap_or("TBD"),
            started = now.format("%Y-%m-%d %H:%M UTC"),
            progress = PROGRESS_HEADING,
            stamp = now.format("%Y-%m-%d %H:%M"),
            dependencies = DEPENDENCIES_HEADING,
            tests = TEST_RESULTS_HEADING,
        );
        std::fs::write(self.path_for(agent_id), content).context("writing status document")
    }

    /// Append a progress entry. The log is append-only: entries go at the
    /// end of the Progress section, just before the Dependencies heading.
    pub fn append_progress(&self, agent_id: &str, message: &str) -> anyhow::Result<()> {
        let path = self.path_for(agent_id);
        if !path.exists() {
            return Ok(());
        }
        let content = std::fs::read_to_string(&path).context("reading status document")?;

        let stamp = Utc::now().format("%Y-%m-%d %H:%M");
        let entry = format!("\n### Progress Update ({stamp})\n- {message}\n");

        let updated = match content.find(DEPENDENCIES_HEADING) {
            Some(idx) => {
                let (before, after) = content.split_at(idx);
                format!("{}{}\n{}", before.trim_end(), entry, after)
            }
            None => format!("{content}{entry}"),
        };
        std::fs::write(&path, updated).context("writing status document")
    }

    /// Replace only the Test Results section, leaving everything else
    /// untouched. The section runs from its heading to the next `## `
    /// heading (or end of file).
    pub fn update_test_results(
        &self,
        agent_id: &str,
        summary: &TestSummary,
    ) -> anyhow::Result<()> {
        let path = self.path_for(agent_id);
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("reading status document {}", path.display()))?;

        let coverage_line = summary
            .coverage
            .map(|c| format!("- Coverage: {c:.1}%\n"))
            .unwrap_or_default();
        let section = format!(
            "{heading}\n\
             - Total tests: {total}\n\
             - Passed: {passed}\n\
             - Failed: {failed}\n\
             - Skipped: {skipped}\n\
             {coverage_line}\
             - Status: {status}\n",
            heading = TEST_RESULTS_HEADING,
            total = summary.total,
            passed = summary.passed,
            failed = summary.failed,
            skipped = summary.skipped,
            status = if summary.passing() { "PASSING" } else { "FAILING" },
        );

        let updated = match content.find(TEST_RESULTS_HEADING) {
            Some(start) => {
                let after_heading = &content[start + TEST_RESULTS_HEADING.len()..];
                let rest = match after_heading.find("\n## ") {
                    Some(next) => &after_heading[next + 1..],
                    None => "",
                };
                format!("{}{}{}", &content[..start], section, rest)
            }
            None => format!("{}\n{}", content.trim_end(), section),
        };
        std::fs::write(&path, updated).context("writing status document")
    }

    /// Move a finished task's document into the archive subdirectory.
    pub fn archive(&self, agent_id: &str, task_id: &str) -> anyhow::Result<()> {
        let path = self.path_for(agent_id);
        if !path.exists() {
            return Ok(());
        }
        let archive_dir = self.dir.join("archive");
        std::fs::create_dir_all(&archive_dir).context("creating status archive")?;
        std::fs::rename(&path, archive_dir.join(format!("{agent_id}-{task_id}.md")))
            .context("archiving status document")
    }

    /// Find the agent whose status document records the given branch.
    pub fn agent_for_branch(&self, branch: &str) -> Option<String> {
        let needle = format!("**Branch**: {branch}");
        let entries = std::fs::read_dir(&self.dir).ok()?;
        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().is_some_and(|e| e == "md")
                && let Ok(content) = std::fs::read_to_string(&path)
                && content.contains(&needle)
            {
                return path.file_stem().map(|s| s.to_string_lossy().into_owned());
            }
        }
        None
    }
}
