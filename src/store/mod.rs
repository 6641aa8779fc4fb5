//! Durable record of filings that have already been notified.

pub mod durable;
#[cfg(test)]
pub mod memory;

use std::collections::HashSet;

use async_trait::async_trait;

use crate::error::StoreError;
use crate::filings::FilingId;

/// The set of notified filing ids as of one load, plus ids added since.
///
/// Only grows. `version` is the store version the set was loaded at; a
/// commit against a store that has moved on is rejected.
#[derive(Debug, Clone, Default)]
pub struct SentIdSet {
    ids: HashSet<FilingId>,
    pending: Vec<FilingId>,
    version: u64,
}

impl SentIdSet {
    pub fn loaded(ids: impl IntoIterator<Item = FilingId>, version: u64) -> Self {
        Self {
            ids: ids.into_iter().collect(),
            pending: Vec::new(),
            version,
        }
    }

    pub fn contains(&self, id: &str) -> bool {
        self.ids.contains(id)
    }

    /// Add an id. Returns false if it was already present.
    pub fn insert(&mut self, id: impl Into<FilingId>) -> bool {
        let id = id.into();
        if !self.ids.insert(id.clone()) {
            return false;
        }
        self.pending.push(id);
        true
    }

    /// Ids added since load or the last commit, in insertion order.
    pub fn pending(&self) -> &[FilingId] {
        &self.pending
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Called by stores once the pending ids are durable.
    pub(crate) fn mark_committed(&mut self, version: u64) {
        self.pending.clear();
        self.version = version;
    }
}

#[async_trait]
pub trait SentStore: Send + Sync {
    async fn load(&self) -> Result<SentIdSet, StoreError>;

    /// Atomically persist the set's pending ids. Either all of them become
    /// durable or none do; on success the pending list is cleared.
    async fn commit(&self, set: &mut SentIdSet) -> Result<(), StoreError>;
}
