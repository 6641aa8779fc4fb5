use std::path::Path;

use anyhow::Context;
use async_trait::async_trait;
use cnidarium::{StateDelta, StateRead, StateWrite, Storage};
use futures::StreamExt;
use serde::Serialize;
use tracing::{debug, info};

use super::{SentIdSet, SentStore};
use crate::error::StoreError;

// No trailing slash (cnidarium prefix convention)
const SENT_PREFIX: &str = "sent";

fn sent_key(id: &str) -> String {
    format!("{}/{}", SENT_PREFIX, id)
}

#[derive(Debug, Serialize)]
struct SentEntry {
    notified_at: i64,
}

/// Sent-id set kept in cnidarium storage. Each commit is one atomic
/// batch, and the database directory stays locked while the store is open.
pub struct CnidariumStore {
    storage: Storage,
}

impl CnidariumStore {
    pub async fn open(data_dir: &Path) -> anyhow::Result<Self> {
        std::fs::create_dir_all(data_dir)?;
        let storage = Storage::load(data_dir.to_path_buf(), vec![SENT_PREFIX.to_string()])
            .await
            .context("Failed to init cnidarium storage")?;
        info!(version = storage.latest_snapshot().version(), "Sent-id store opened at {:?}", data_dir);
        Ok(Self { storage })
    }

    /// Shut the database down and free its lock.
    pub async fn close(self) {
        self.storage.release().await;
    }
}

#[async_trait]
impl SentStore for CnidariumStore {
    async fn load(&self) -> Result<SentIdSet, StoreError> {
        let snapshot = self.storage.latest_snapshot();
        let version = snapshot.version();
        let prefix = format!("{}/", SENT_PREFIX);
        let mut stream = snapshot.prefix_raw(&prefix);
        let mut ids = Vec::new();

        while let Some(entry) = stream.next().await {
            let (key, _) = entry.context("Error reading sent-id stream")?;
            if let Some(id) = key.strip_prefix(&prefix) {
                ids.push(id.to_string());
            }
        }

        debug!(count = ids.len(), version, "Sent ids loaded");
        Ok(SentIdSet::loaded(ids, version))
    }

    async fn commit(&self, set: &mut SentIdSet) -> Result<(), StoreError> {
        if set.pending().is_empty() {
            return Ok(());
        }

        let snapshot = self.storage.latest_snapshot();
        let found = snapshot.version();
        if found != set.version() {
            return Err(StoreError::Conflict {
                expected: set.version(),
                found,
            });
        }

        let entry = serde_json::to_vec(&SentEntry {
            notified_at: chrono::Utc::now().timestamp(),
        })
        .context("serialize sent entry")?;

        let mut delta = StateDelta::new(snapshot);
        for id in set.pending() {
            delta.put_raw(sent_key(id), entry.clone());
        }
        self.storage
            .commit(delta)
            .await
            .context("Failed to commit sent ids")?;

        let version = self.storage.latest_snapshot().version();
        debug!(added = set.pending().len(), version, "Sent ids committed");
        set.mark_committed(version);
        Ok(())
    }
}
