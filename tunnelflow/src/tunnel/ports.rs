//! Services the tunnel stages call into.
//!
//! Transport, decoding and retries live behind these traits; the stages only
//! see their results.

use super::{ChannelCursor, Checkpoint, RecordBatch};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

/// Reads the next batch of records from a channel.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RecordFetcher: Send + Sync {
    /// Fetches records starting at `cursor`.
    async fn fetch(&self, cursor: &ChannelCursor) -> anyhow::Result<RecordBatch>;
}

/// Applies records to the consumer's target system.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RecordApplier: Send + Sync {
    /// Applies every record of `batch`, in order.
    async fn apply(&self, batch: &RecordBatch) -> anyhow::Result<()>;
}

/// Persists channel checkpoints.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Saves `checkpoint`, replacing the previous one for its channel.
    async fn save(&self, checkpoint: &Checkpoint) -> anyhow::Result<()>;

    /// Loads the latest checkpoint of a channel.
    async fn load(&self, tunnel_id: &str, channel_id: &str) -> anyhow::Result<Option<Checkpoint>>;
}

/// Checkpoint store kept in process memory.
#[derive(Debug, Default, Clone)]
pub struct InMemoryCheckpointStore {
    entries: Arc<Mutex<HashMap<(String, String), Checkpoint>>>,
}

impl InMemoryCheckpointStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of channels with a checkpoint.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Returns true if no checkpoint was saved.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

#[async_trait]
impl CheckpointStore for InMemoryCheckpointStore {
    async fn save(&self, checkpoint: &Checkpoint) -> anyhow::Result<()> {
        self.entries
            .lock()
            .insert(checkpoint.channel_key(), checkpoint.clone());
        Ok(())
    }

    async fn load(&self, tunnel_id: &str, channel_id: &str) -> anyhow::Result<Option<Checkpoint>> {
        let key = (tunnel_id.to_string(), channel_id.to_string());
        Ok(self.entries.lock().get(&key).cloned())
    }
}
