//! In-process store used by tests and single-machine runs.

use std::collections::HashMap;
use std::sync::Mutex;

use crate::error::{CasError, StoreError};

use super::{Version, VersionedStore};

#[derive(Debug)]
struct Slot {
    body: Option<String>,
    revision: u64,
}

/// A CAS register held in process memory.
///
/// Versions are per-document revision counters. Every `compare_and_swap`
/// holds the map lock for the duration of the check-and-write, so of any
/// set of racing swaps against one version exactly one wins.
#[derive(Debug, Default)]
pub struct MemStore {
    docs: Mutex<HashMap<String, Slot>>,
}

impl MemStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl VersionedStore for MemStore {
    fn read(&self, doc: &str) -> Result<(Option<String>, Version), StoreError> {
        let docs = self
            .docs
            .lock()
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;
        match docs.get(doc) {
            Some(slot) => Ok((slot.body.clone(), Version(slot.revision.to_string()))),
            None => Ok((None, Version("0".to_string()))),
        }
    }

    fn compare_and_swap(
        &self,
        doc: &str,
        expected: &Version,
        new: &str,
        _summary: &str,
    ) -> Result<(), CasError> {
        let mut docs = self
            .docs
            .lock()
            .map_err(|e| CasError::Unavailable(e.to_string()))?;
        let slot = docs.entry(doc.to_string()).or_insert(Slot {
            body: None,
            revision: 0,
        });
        if slot.revision.to_string() != expected.0 {
            return Err(CasError::Conflict);
        }
        slot.body = Some(new.to_string());
        slot.revision += 1;
        Ok(())
    }
}
