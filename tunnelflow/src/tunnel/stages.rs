//! Fetch, apply and checkpoint stages.

use super::{ChannelCursor, Checkpoint, CheckpointStore, RecordApplier, RecordBatch, RecordFetcher};
use crate::context::PipelineContext;
use crate::errors::StageError;
use crate::stages::Stage;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

/// Reads one batch per input cursor.
///
/// Emits nothing once the channel is exhausted (an empty batch with no
/// continuation token).
pub struct FetchStage {
    name: String,
    fetcher: Arc<dyn RecordFetcher>,
}

impl FetchStage {
    /// Creates a fetch stage.
    pub fn new(name: impl Into<String>, fetcher: Arc<dyn RecordFetcher>) -> Self {
        Self {
            name: name.into(),
            fetcher,
        }
    }
}

impl std::fmt::Debug for FetchStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FetchStage").field("name", &self.name).finish()
    }
}

#[async_trait]
impl Stage for FetchStage {
    type Input = ChannelCursor;
    type Output = RecordBatch;

    fn name(&self) -> &str {
        &self.name
    }

    async fn do_process(&self, cursor: ChannelCursor) -> Result<Option<RecordBatch>, StageError> {
        let batch = self.fetcher.fetch(&cursor).await.map_err(|err| {
            StageError::process(format!("failed to fetch from {cursor}"))
                .with_input(&cursor)
                .with_source(err)
        })?;

        if batch.is_exhausted() {
            debug!(stage = %self.name, %cursor, "Channel exhausted");
            return Ok(None);
        }
        debug!(stage = %self.name, %cursor, records = batch.len(), "Fetched batch");
        Ok(Some(batch))
    }
}

/// Applies each batch, then emits the checkpoint that covers it.
///
/// A batch whose apply fails produces no checkpoint, so it is read again
/// after a restart.
pub struct ApplyStage {
    name: String,
    applier: Arc<dyn RecordApplier>,
}

impl ApplyStage {
    /// Creates an apply stage.
    pub fn new(name: impl Into<String>, applier: Arc<dyn RecordApplier>) -> Self {
        Self {
            name: name.into(),
            applier,
        }
    }
}

impl std::fmt::Debug for ApplyStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApplyStage").field("name", &self.name).finish()
    }
}

#[async_trait]
impl Stage for ApplyStage {
    type Input = RecordBatch;
    type Output = Checkpoint;

    fn name(&self) -> &str {
        &self.name
    }

    async fn do_process(&self, batch: RecordBatch) -> Result<Option<Checkpoint>, StageError> {
        if !batch.is_empty() {
            self.applier.apply(&batch).await.map_err(|err| {
                StageError::process(format!("failed to apply {} records", batch.len()))
                    .with_input(&batch.cursor)
                    .with_source(err)
            })?;
        }
        Ok(Some(Checkpoint::for_batch(&batch)))
    }
}

/// Persists checkpoints and forwards the ones it saved.
///
/// A checkpoint whose sequence is below the last one saved for the same
/// channel is skipped; with several apply workers batches can finish out of
/// order.
pub struct CheckpointStage {
    name: String,
    store: Arc<dyn CheckpointStore>,
    saved: Mutex<HashMap<(String, String), u64>>,
}

impl CheckpointStage {
    /// Creates a checkpoint stage.
    pub fn new(name: impl Into<String>, store: Arc<dyn CheckpointStore>) -> Self {
        Self {
            name: name.into(),
            store,
            saved: Mutex::new(HashMap::new()),
        }
    }

    /// Last saved sequence of a channel.
    #[must_use]
    pub fn last_saved(&self, tunnel_id: &str, channel_id: &str) -> Option<u64> {
        let key = (tunnel_id.to_string(), channel_id.to_string());
        self.saved.lock().get(&key).copied()
    }

    fn is_stale(&self, checkpoint: &Checkpoint) -> bool {
        let Some(sequence) = checkpoint.sequence else {
            return false;
        };
        self.saved
            .lock()
            .get(&checkpoint.channel_key())
            .is_some_and(|&last| sequence < last)
    }
}

impl std::fmt::Debug for CheckpointStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CheckpointStage")
            .field("name", &self.name)
            .field("channels", &self.saved.lock().len())
            .finish()
    }
}

#[async_trait]
impl Stage for CheckpointStage {
    type Input = Checkpoint;
    type Output = Checkpoint;

    fn name(&self) -> &str {
        &self.name
    }

    async fn init(&self, ctx: &PipelineContext) -> Result<(), StageError> {
        info!(
            stage = %self.name,
            run_id = %ctx.identity().run_id,
            tunnel_id = ?ctx.identity().tunnel_id,
            "Checkpoint stage ready"
        );
        Ok(())
    }

    async fn do_process(&self, checkpoint: Checkpoint) -> Result<Option<Checkpoint>, StageError> {
        if self.is_stale(&checkpoint) {
            debug!(
                stage = %self.name,
                channel = %checkpoint.channel_id,
                sequence = ?checkpoint.sequence,
                "Skipping stale checkpoint"
            );
            return Ok(None);
        }

        self.store.save(&checkpoint).await.map_err(|err| {
            StageError::process("failed to save checkpoint")
                .with_input(checkpoint.resume_cursor())
                .with_source(err)
        })?;

        if let Some(sequence) = checkpoint.sequence {
            let mut saved = self.saved.lock();
            let last = saved.entry(checkpoint.channel_key()).or_insert(sequence);
            *last = (*last).max(sequence);
        }
        Ok(Some(checkpoint))
    }

    async fn shutdown(&self) -> Result<(), StageError> {
        self.saved.lock().clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::StageErrorKind;
    use crate::tunnel::{
        InMemoryCheckpointStore, MockCheckpointStore, MockRecordApplier, MockRecordFetcher,
        RecordAction, StreamRecord,
    };
    use serde_json::{json, Map};

    fn record(sequence: u64) -> StreamRecord {
        let mut pk = Map::new();
        pk.insert("id".to_string(), json!(sequence));
        StreamRecord::new(RecordAction::Put, pk, sequence)
    }

    fn batch(sequences: &[u64], next: Option<&str>) -> RecordBatch {
        RecordBatch::new(
            ChannelCursor::new("t1", "c1"),
            sequences.iter().copied().map(record).collect(),
            next.map(ToString::to_string),
        )
    }

    #[tokio::test]
    async fn test_fetch_forwards_batch() {
        let mut fetcher = MockRecordFetcher::new();
        fetcher
            .expect_fetch()
            .withf(|cursor| cursor.channel_id == "c1")
            .times(1)
            .returning(|_| Ok(batch(&[1, 2], Some("n1"))));
        let stage = FetchStage::new("fetch", Arc::new(fetcher));

        let out = stage.do_process(ChannelCursor::new("t1", "c1")).await.unwrap();
        assert_eq!(out.map(|b| b.len()), Some(2));
    }

    #[tokio::test]
    async fn test_fetch_stops_on_exhausted_channel() {
        let mut fetcher = MockRecordFetcher::new();
        fetcher.expect_fetch().returning(|_| Ok(batch(&[], None)));
        let stage = FetchStage::new("fetch", Arc::new(fetcher));

        let out = stage.do_process(ChannelCursor::new("t1", "c1")).await.unwrap();
        assert!(out.is_none());
    }

    #[tokio::test]
    async fn test_fetch_error_carries_cursor() {
        let mut fetcher = MockRecordFetcher::new();
        fetcher
            .expect_fetch()
            .returning(|_| Err(anyhow::anyhow!("connection reset")));
        let stage = FetchStage::new("fetch", Arc::new(fetcher));

        let err = stage
            .do_process(ChannelCursor::new("t1", "c1").with_token("x"))
            .await
            .unwrap_err();
        assert_eq!(err.kind, StageErrorKind::Process);
        assert!(err.message.contains("t1/c1@x"));
        assert_eq!(err.source_chain(), vec!["connection reset".to_string()]);
    }

    #[tokio::test]
    async fn test_apply_emits_checkpoint_after_apply() {
        let mut applier = MockRecordApplier::new();
        applier
            .expect_apply()
            .withf(|batch| batch.len() == 2)
            .times(1)
            .returning(|_| Ok(()));
        let stage = ApplyStage::new("apply", Arc::new(applier));

        let checkpoint = stage
            .do_process(batch(&[4, 5], Some("n2")))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(checkpoint.sequence, Some(5));
        assert_eq!(checkpoint.token.as_deref(), Some("n2"));
    }

    #[tokio::test]
    async fn test_apply_failure_emits_no_checkpoint() {
        let mut applier = MockRecordApplier::new();
        applier
            .expect_apply()
            .returning(|_| Err(anyhow::anyhow!("constraint violation")));
        let stage = ApplyStage::new("apply", Arc::new(applier));

        let err = stage.do_process(batch(&[1], None)).await.unwrap_err();
        assert!(err.message.contains("1 records"));
    }

    #[tokio::test]
    async fn test_apply_skips_empty_batch_but_advances_token() {
        let mut applier = MockRecordApplier::new();
        applier.expect_apply().times(0);
        let stage = ApplyStage::new("apply", Arc::new(applier));

        let checkpoint = stage
            .do_process(batch(&[], Some("n3")))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(checkpoint.sequence, None);
        assert_eq!(checkpoint.token.as_deref(), Some("n3"));
    }

    #[tokio::test]
    async fn test_checkpoint_skips_stale_sequence() {
        let store = InMemoryCheckpointStore::new();
        let stage = CheckpointStage::new("checkpoint", Arc::new(store.clone()));

        let newer = Checkpoint::for_batch(&batch(&[10], Some("b")));
        let older = Checkpoint::for_batch(&batch(&[3], Some("a")));

        assert!(stage.do_process(newer).await.unwrap().is_some());
        assert!(stage.do_process(older).await.unwrap().is_none());

        assert_eq!(stage.last_saved("t1", "c1"), Some(10));
        let saved = store.load("t1", "c1").await.unwrap().unwrap();
        assert_eq!(saved.token.as_deref(), Some("b"));
    }

    #[tokio::test]
    async fn test_checkpoint_save_failure() {
        let mut store = MockCheckpointStore::new();
        store
            .expect_save()
            .returning(|_| Err(anyhow::anyhow!("disk full")));
        let stage = CheckpointStage::new("checkpoint", Arc::new(store));

        let err = stage
            .do_process(Checkpoint::for_batch(&batch(&[1], None)))
            .await
            .unwrap_err();
        assert_eq!(err.source_chain(), vec!["disk full".to_string()]);
        assert_eq!(stage.last_saved("t1", "c1"), None);
    }
}
