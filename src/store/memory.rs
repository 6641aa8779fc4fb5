//! In-memory sent-id store for tests.

use std::collections::BTreeSet;
use std::sync::Mutex;

use async_trait::async_trait;

use super::{SentIdSet, SentStore};
use crate::error::StoreError;

#[derive(Default)]
pub struct MemorySentStore {
    state: Mutex<(BTreeSet<String>, u64)>,
    fail_commits: bool,
}

impl MemorySentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A store whose commits always fail, as a full disk would.
    pub fn failing() -> Self {
        Self {
            fail_commits: true,
            ..Self::default()
        }
    }

    pub fn ids(&self) -> Vec<String> {
        self.state.lock().unwrap().0.iter().cloned().collect()
    }

    pub fn version(&self) -> u64 {
        self.state.lock().unwrap().1
    }
}

#[async_trait]
impl SentStore for MemorySentStore {
    async fn load(&self) -> Result<SentIdSet, StoreError> {
        let state = self.state.lock().unwrap();
        Ok(SentIdSet::loaded(state.0.iter().cloned(), state.1))
    }

    async fn commit(&self, set: &mut SentIdSet) -> Result<(), StoreError> {
        if set.pending().is_empty() {
            return Ok(());
        }
        if self.fail_commits {
            return Err(StoreError::Backend(anyhow::anyhow!("no space left on device")));
        }

        let mut state = self.state.lock().unwrap();
        if state.1 != set.version() {
            return Err(StoreError::Conflict {
                expected: set.version(),
                found: state.1,
            });
        }
        state.0.extend(set.pending().iter().cloned());
        state.1 += 1;
        set.mark_committed(state.1);
        Ok(())
    }
}
