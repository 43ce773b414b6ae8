//! Git-backed store: a JSON file committed to a shared repository.
//!
//! "Commit + push" is the CAS attempt; a rejected (non-fast-forward) push
//! is the conflict signal. The version token is the blob hash of the
//! document at the clone's HEAD, so a swap against a stale token is
//! detected locally before the network round-trip when possible.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant, SystemTime};

use crate::error::{CasError, StoreError};
use crate::subprocess::Tool;

use super::{Version, VersionedStore};

const ABSENT: &str = "absent";

/// How long a swap waits on the clone lock before giving up.
const LOCK_WAIT: Duration = Duration::from_secs(10);
/// A lock file older than this belongs to a crashed process and is broken.
const LOCK_STALE: Duration = Duration::from_secs(30);

/// Exclusive advisory lock on a clone, held for the full
/// check-write-commit sequence. Multiple workers on one machine share a
/// single clone, so the version check and the commit must not interleave.
/// Created atomically with `create_new`; removed on drop.
struct CloneLock {
    path: PathBuf,
}

impl CloneLock {
    fn acquire(repo_root: &Path) -> Result<Self, CasError> {
        let dir = repo_root.join(".swarm");
        std::fs::create_dir_all(&dir).map_err(|e| CasError::Unavailable(e.to_string()))?;
        let path = dir.join("store.lock");
        let deadline = Instant::now() + LOCK_WAIT;
        loop {
            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(mut file) => {
                    let _ = write!(file, "{}", std::process::id());
                    return Ok(Self { path });
                }
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                    if Self::is_stale(&path) {
                        tracing::warn!(lock = %path.display(), "breaking stale store lock");
                        let _ = std::fs::remove_file(&path);
                        continue;
                    }
                    if Instant::now() >= deadline {
                        return Err(CasError::Unavailable(
                            "timed out waiting for the clone lock".to_string(),
                        ));
                    }
                    std::thread::sleep(Duration::from_millis(10));
                }
                Err(e) => return Err(CasError::Unavailable(e.to_string())),
            }
        }
    }

    fn is_stale(path: &Path) -> bool {
        std::fs::metadata(path)
            .and_then(|m| m.modified())
            .ok()
            .and_then(|mtime| SystemTime::now().duration_since(mtime).ok())
            .is_some_and(|age| age > LOCK_STALE)
    }
}

impl Drop for CloneLock {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

pub struct GitStore {
    repo_root: PathBuf,
    /// Skip fetch/push, operating on the local clone only. Used by
    /// single-machine runs and tests; multi-machine fleets need a remote.
    offline: bool,
}

impl GitStore {
    pub fn new(repo_root: &Path) -> Self {
        Self {
            repo_root: repo_root.to_path_buf(),
            offline: false,
        }
    }

    /// A store that never talks to a remote. CAS is still atomic per
    /// process tree because commits serialize on the index lock.
    pub fn local_only(repo_root: &Path) -> Self {
        Self {
            repo_root: repo_root.to_path_buf(),
            offline: true,
        }
    }

    /// Pick remote or local mode based on whether the clone has a remote
    /// configured.
    pub fn auto(repo_root: &Path) -> Self {
        let has_remote = Tool::new("git")
            .args(&["remote"])
            .current_dir(repo_root)
            .run()
            .map(|out| out.success() && !out.stdout.trim().is_empty())
            .unwrap_or(false);
        if has_remote {
            Self::new(repo_root)
        } else {
            Self::local_only(repo_root)
        }
    }

    fn git(&self, args: &[&str]) -> Tool {
        Tool::new("git").args(args).current_dir(&self.repo_root)
    }

    /// Best-effort sync with the remote before reading.
    fn sync(&self) {
        if self.offline {
            return;
        }
        if let Ok(out) = self.git(&["pull", "--rebase"]).run()
            && !out.success()
        {
            tracing::warn!(stderr = %out.stderr.trim(), "git pull --rebase failed");
        }
    }

    /// Blob hash of the document at HEAD, or [`ABSENT`].
    fn blob_version(&self, doc: &str) -> Result<Version, StoreError> {
        let spec = format!("HEAD:{doc}");
        let out = self
            .git(&["rev-parse", &spec])
            .run()
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;
        if out.success() {
            Ok(Version(out.stdout.trim().to_string()))
        } else {
            Ok(Version(ABSENT.to_string()))
        }
    }

    fn doc_path(&self, doc: &str) -> PathBuf {
        self.repo_root.join(doc)
    }
}

impl VersionedStore for GitStore {
    fn read(&self, doc: &str) -> Result<(Option<String>, Version), StoreError> {
        self.sync();
        let version = self.blob_version(doc)?;
        let path = self.doc_path(doc);
        let body = if path.exists() {
            Some(
                std::fs::read_to_string(&path)
                    .map_err(|e| StoreError::Unavailable(e.to_string()))?,
            )
        } else {
            None
        };
        Ok((body, version))
    }

    fn compare_and_swap(
        &self,
        doc: &str,
        expected: &Version,
        new: &str,
        summary: &str,
    ) -> Result<(), CasError> {
        // The lock serializes every check-write-commit against this clone.
        // Without it, two local writers could both pass the version check
        // and clobber each other's staged content mid-commit.
        let _lock = CloneLock::acquire(&self.repo_root)?;

        // Staleness check, now under the lock: if HEAD already moved past
        // the version we read, there is no point committing.
        let current = self
            .blob_version(doc)
            .map_err(|e| CasError::Unavailable(e.to_string()))?;
        if current != *expected {
            return Err(CasError::Conflict);
        }

        let path = self.doc_path(doc);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| CasError::Unavailable(e.to_string()))?;
        }
        std::fs::write(&path, new).map_err(|e| CasError::Unavailable(e.to_string()))?;

        self.git(&["add", doc])
            .run_ok()
            .map_err(|e| CasError::Unavailable(e.to_string()))?;
        let commit = self
            .git(&["commit", "-m", summary])
            .run()
            .map_err(|e| CasError::Unavailable(e.to_string()))?;
        if !commit.success() {
            return Err(CasError::Unavailable(commit.stderr.trim().to_string()));
        }

        if self.offline {
            return Ok(());
        }

        let push = self
            .git(&["push"])
            .run()
            .map_err(|e| CasError::Unavailable(e.to_string()))?;
        if push.success() {
            return Ok(());
        }

        // Rejected push: drop the speculative commit so the next read
        // starts from a clean tree, then report the conflict.
        let _ = self.git(&["reset", "--hard", "HEAD~1"]).run();
        if push.stderr.contains("rejected") || push.stderr.contains("non-fast-forward") {
            Err(CasError::Conflict)
        } else {
            Err(CasError::Unavailable(push.stderr.trim().to_string()))
        }
    }
}
