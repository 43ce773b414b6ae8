//! Versioned shared store and the claim protocol built on top of it.
//!
//! All shared state (registry and queue) lives in versioned documents whose
//! only synchronization primitive is compare-and-swap. Mutations go through
//! [`publish`], which retries the whole read-mutate-swap cycle on conflict.

mod git;
mod memory;

pub use git::GitStore;
pub use memory::MemStore;

use std::time::Duration;

use rand::Rng;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::{CasError, PublishError, StoreError};

/// Opaque version token for a document revision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Version(pub String);

/// Paths of the shared documents, relative to the store root.
pub const REGISTRY_DOC: &str = ".swarm/registry.json";
pub const QUEUE_DOC: &str = ".swarm/tasks/queue.json";

/// Directory of per-agent status documents, relative to the project root.
pub const STATUS_DIR: &str = ".swarm/status";

/// A document store offering read and compare-and-swap.
///
/// Implementations must guarantee that of any set of concurrent
/// `compare_and_swap` calls against the same version, at most one succeeds;
/// the rest observe [`CasError::Conflict`].
pub trait VersionedStore {
    /// Read a document's raw content and current version. A missing
    /// document reads as `None` with the store's initial version.
    fn read(&self, doc: &str) -> Result<(Option<String>, Version), StoreError>;

    /// Replace the document iff its version is still `expected`.
    fn compare_and_swap(
        &self,
        doc: &str,
        expected: &Version,
        new: &str,
        summary: &str,
    ) -> Result<(), CasError>;
}

/// Retry policy for [`publish`].
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff_base: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_base: Duration::from_millis(500),
        }
    }
}

impl RetryPolicy {
    /// Backoff before retrying after `attempt` (0-based): base * 2^attempt,
    /// plus up to 25% jitter so colliding writers desynchronize.
    fn backoff(&self, attempt: u32) -> Duration {
        let base = self.backoff_base.saturating_mul(1u32 << attempt.min(16));
        let jitter = rand::rng().random_range(0..=base.as_millis() as u64 / 4);
        base + Duration::from_millis(jitter)
    }
}

/// Decode a document body, treating a missing document as the default value.
fn decode<T: DeserializeOwned + Default>(
    doc: &str,
    raw: Option<&str>,
) -> Result<T, StoreError> {
    match raw {
        None => Ok(T::default()),
        Some(body) => serde_json::from_str(body).map_err(|e| StoreError::Corrupt {
            doc: doc.to_string(),
            message: e.to_string(),
        }),
    }
}

/// Read and decode a document without mutating it.
pub fn fetch<T, S>(store: &S, doc: &str) -> Result<T, StoreError>
where
    T: DeserializeOwned + Default,
    S: VersionedStore + ?Sized,
{
    let (raw, _) = store.read(doc)?;
    decode(doc, raw.as_deref())
}

/// Publish a mutation of a shared document.
///
/// Each attempt re-fetches the document, re-applies `mutate` to the fresh
/// value, and attempts the swap. The local mutation is discarded on
/// conflict — it may have depended on data that changed. After the retry
/// budget is exhausted the caller must treat the state change as not having
/// happened.
///
/// `mutate` returns a value passed through to the caller on success, which
/// lets callers observe what the committed revision actually contained
/// (e.g. whether a task was still claimable).
pub fn publish<T, S, F, R>(
    store: &S,
    doc: &str,
    summary: &str,
    policy: RetryPolicy,
    mut mutate: F,
) -> Result<R, PublishError>
where
    T: Serialize + DeserializeOwned + Default,
    S: VersionedStore + ?Sized,
    F: FnMut(&mut T) -> R,
{
    let attempts = policy.max_attempts.max(1);
    for attempt in 0..attempts {
        let (raw, version) = store.read(doc)?;
        let mut value: T = decode(doc, raw.as_deref())?;
        let outcome = mutate(&mut value);
        let body = serde_json::to_string_pretty(&value).map_err(|e| {
            PublishError::Corrupt {
                doc: doc.to_string(),
                message: e.to_string(),
            }
        })?;

        // A mutation that changed nothing (e.g. a claim that found the
        // task already gone) needs no revision.
        if raw.as_deref() == Some(body.as_str()) {
            return Ok(outcome);
        }

        match store.compare_and_swap(doc, &version, &body, summary) {
            Ok(()) => return Ok(outcome),
            Err(CasError::Conflict) => {
                tracing::debug!(doc, attempt, "publish conflict, refetching");
                if attempt + 1 < attempts {
                    std::thread::sleep(policy.backoff(attempt));
                }
            }
            Err(CasError::Unavailable(m)) => return Err(PublishError::Unavailable(m)),
        }
    }
    Err(PublishError::RetriesExhausted { attempts })
}
