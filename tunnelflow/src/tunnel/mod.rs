//! Stages for consuming a change-data-capture tunnel.
//!
//! A typical consumer chains [`FetchStage`] → [`ApplyStage`] →
//! [`CheckpointStage`], decorating apply and checkpoint with their own
//! executors so a slow target never stalls fetching:
//!
//! ```rust,ignore
//! let pipeline = Pipeline::builder("orders-cdc")
//!     .stage(FetchStage::new("fetch", fetcher))
//!     .stage_with_executor(ApplyStage::new("apply", applier), config.build_executor("apply")?)
//!     .stage_with_executor(CheckpointStage::new("checkpoint", store), config.build_executor("checkpoint")?)
//!     .build()?;
//! ```

mod ports;
mod stages;
mod types;

pub use ports::{CheckpointStore, InMemoryCheckpointStore, RecordApplier, RecordFetcher};
pub use stages::{ApplyStage, CheckpointStage, FetchStage};
pub use types::{ChannelCursor, Checkpoint, RecordAction, RecordBatch, StreamRecord};

#[cfg(test)]
pub use ports::{MockCheckpointStore, MockRecordApplier, MockRecordFetcher};

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{PipelineContext, RunIdentity};
    use crate::executor::WorkerPool;
    use crate::pipeline::Pipeline;
    use crate::testing::{assert_init_complete, CollectingStage};
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use serde_json::{json, Map};
    use std::collections::HashMap;
    use std::sync::Arc;
    use std::time::Duration;

    /// Serves pre-built pages keyed by continuation token.
    struct PagedFetcher {
        pages: HashMap<Option<String>, RecordBatch>,
    }

    #[async_trait]
    impl RecordFetcher for PagedFetcher {
        async fn fetch(&self, cursor: &ChannelCursor) -> anyhow::Result<RecordBatch> {
            self.pages
                .get(&cursor.token)
                .cloned()
                .ok_or_else(|| anyhow::anyhow!("unknown token {:?}", cursor.token))
        }
    }

    #[derive(Default)]
    struct RecordingApplier {
        applied: Mutex<Vec<u64>>,
    }

    #[async_trait]
    impl RecordApplier for RecordingApplier {
        async fn apply(&self, batch: &RecordBatch) -> anyhow::Result<()> {
            self.applied
                .lock()
                .extend(batch.records.iter().map(|record| record.sequence));
            Ok(())
        }
    }

    fn page(token: Option<&str>, sequences: &[u64], next: Option<&str>) -> RecordBatch {
        let mut cursor = ChannelCursor::new("orders", "shard-0");
        cursor.token = token.map(ToString::to_string);
        let records = sequences
            .iter()
            .map(|&seq| {
                let mut pk = Map::new();
                pk.insert("order_id".to_string(), json!(seq));
                StreamRecord::new(RecordAction::Put, pk, seq).with_column("status", "paid")
            })
            .collect();
        RecordBatch::new(cursor, records, next.map(ToString::to_string))
    }

    #[tokio::test]
    async fn test_fetch_apply_checkpoint_end_to_end() {
        let mut pages = HashMap::new();
        pages.insert(None, page(None, &[1, 2], Some("p2")));
        pages.insert(Some("p2".to_string()), page(Some("p2"), &[3], Some("p3")));
        pages.insert(Some("p3".to_string()), page(Some("p3"), &[], None));

        let applier = Arc::new(RecordingApplier::default());
        let store = InMemoryCheckpointStore::new();
        let collector = CollectingStage::new("committed");
        let committed = collector.sink();

        let pipeline = Pipeline::builder("orders-cdc")
            .stage(FetchStage::new("fetch", Arc::new(PagedFetcher { pages })))
            .stage_with_executor(
                ApplyStage::new("apply", applier.clone()),
                WorkerPool::single("apply").unwrap(),
            )
            .stage_with_executor(
                CheckpointStage::new("checkpoint", Arc::new(store.clone())),
                WorkerPool::single("checkpoint").unwrap(),
            )
            .stage(collector)
            .build()
            .unwrap();

        let ctx = PipelineContext::builder()
            .identity(RunIdentity::new().with_tunnel_id("orders"))
            .build();
        pipeline.init(ctx).unwrap();
        assert_init_complete(&pipeline.wait_initialized().await.unwrap());

        let start = ChannelCursor::new("orders", "shard-0");
        pipeline.process(start.clone()).await;
        pipeline.process(start.clone().with_token("p2")).await;
        pipeline.process(start.with_token("p3")).await;

        let checkpoints = committed.wait_for(2, Duration::from_secs(5)).await;
        assert_eq!(checkpoints.len(), 2);
        assert_eq!(checkpoints[1].sequence, Some(3));
        assert_eq!(*applier.applied.lock(), vec![1, 2, 3]);

        let saved = store.load("orders", "shard-0").await.unwrap().unwrap();
        assert_eq!(saved.token.as_deref(), Some("p3"));

        pipeline.shutdown().await.unwrap();
    }
}
