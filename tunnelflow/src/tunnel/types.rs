//! Data flowing through a tunnel consumer pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Read position within one channel of a tunnel.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChannelCursor {
    /// Tunnel identifier.
    pub tunnel_id: String,
    /// Channel identifier.
    pub channel_id: String,
    /// Continuation token; `None` reads from the start of the channel.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
}

impl ChannelCursor {
    /// Creates a cursor at the start of a channel.
    #[must_use]
    pub fn new(tunnel_id: impl Into<String>, channel_id: impl Into<String>) -> Self {
        Self {
            tunnel_id: tunnel_id.into(),
            channel_id: channel_id.into(),
            token: None,
        }
    }

    /// Sets the continuation token.
    #[must_use]
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }
}

impl fmt::Display for ChannelCursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.tunnel_id, self.channel_id)?;
        if let Some(token) = &self.token {
            write!(f, "@{token}")?;
        }
        Ok(())
    }
}

/// The mutation a record describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordAction {
    /// The row was written in full.
    Put,
    /// Some columns of the row changed.
    Update,
    /// The row was removed.
    Delete,
}

/// One table mutation read from a channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamRecord {
    /// The mutation kind.
    pub action: RecordAction,
    /// Primary key columns of the affected row.
    pub primary_key: Map<String, Value>,
    /// Attribute columns; empty for deletes.
    #[serde(default)]
    pub columns: Map<String, Value>,
    /// Position of the record in its channel.
    pub sequence: u64,
}

impl StreamRecord {
    /// Creates a record.
    #[must_use]
    pub fn new(action: RecordAction, primary_key: Map<String, Value>, sequence: u64) -> Self {
        Self {
            action,
            primary_key,
            columns: Map::new(),
            sequence,
        }
    }

    /// Sets one attribute column.
    #[must_use]
    pub fn with_column(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.columns.insert(name.into(), value.into());
        self
    }
}

/// Records fetched from a channel in one call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordBatch {
    /// The cursor the batch was read from.
    pub cursor: ChannelCursor,
    /// Records in channel order.
    pub records: Vec<StreamRecord>,
    /// Token to continue from; `None` once the channel is finished.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_token: Option<String>,
}

impl RecordBatch {
    /// Creates a batch.
    #[must_use]
    pub fn new(
        cursor: ChannelCursor,
        records: Vec<StreamRecord>,
        next_token: Option<String>,
    ) -> Self {
        Self {
            cursor,
            records,
            next_token,
        }
    }

    /// Returns the number of records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Returns true if the batch has no records.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Returns true if the channel has nothing more to give.
    #[must_use]
    pub fn is_exhausted(&self) -> bool {
        self.records.is_empty() && self.next_token.is_none()
    }

    /// Sequence of the last record, if any.
    #[must_use]
    pub fn last_sequence(&self) -> Option<u64> {
        self.records.iter().map(|record| record.sequence).max()
    }

    /// The cursor to read the following batch from.
    #[must_use]
    pub fn next_cursor(&self) -> Option<ChannelCursor> {
        self.next_token.as_ref().map(|token| ChannelCursor {
            token: Some(token.clone()),
            ..self.cursor.clone()
        })
    }
}

/// Durable progress marker for one channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Tunnel identifier.
    pub tunnel_id: String,
    /// Channel identifier.
    pub channel_id: String,
    /// Token to resume from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    /// Last applied sequence; `None` if the batch carried no records.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sequence: Option<u64>,
    /// Records covered by this checkpoint.
    pub record_count: usize,
    /// When the checkpoint was taken.
    pub created_at: DateTime<Utc>,
}

impl Checkpoint {
    /// Builds the checkpoint that marks `batch` as applied.
    #[must_use]
    pub fn for_batch(batch: &RecordBatch) -> Self {
        Self {
            tunnel_id: batch.cursor.tunnel_id.clone(),
            channel_id: batch.cursor.channel_id.clone(),
            token: batch.next_token.clone(),
            sequence: batch.last_sequence(),
            record_count: batch.len(),
            created_at: Utc::now(),
        }
    }

    /// Returns the `(tunnel, channel)` key this checkpoint belongs to.
    #[must_use]
    pub fn channel_key(&self) -> (String, String) {
        (self.tunnel_id.clone(), self.channel_id.clone())
    }

    /// Returns the cursor to resume reading from.
    #[must_use]
    pub fn resume_cursor(&self) -> ChannelCursor {
        ChannelCursor {
            tunnel_id: self.tunnel_id.clone(),
            channel_id: self.channel_id.clone(),
            token: self.token.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn key(id: i64) -> Map<String, Value> {
        let mut pk = Map::new();
        pk.insert("id".to_string(), json!(id));
        pk
    }

    #[test]
    fn test_cursor_display() {
        let cursor = ChannelCursor::new("t1", "c1");
        assert_eq!(cursor.to_string(), "t1/c1");
        assert_eq!(cursor.with_token("abc").to_string(), "t1/c1@abc");
    }

    #[test]
    fn test_batch_exhaustion() {
        let cursor = ChannelCursor::new("t1", "c1");
        assert!(RecordBatch::new(cursor.clone(), Vec::new(), None).is_exhausted());

        let waiting = RecordBatch::new(cursor.clone(), Vec::new(), Some("t2".to_string()));
        assert!(!waiting.is_exhausted());
        assert_eq!(waiting.next_cursor(), Some(cursor.with_token("t2")));
    }

    #[test]
    fn test_checkpoint_for_batch() {
        let batch = RecordBatch::new(
            ChannelCursor::new("t1", "c1"),
            vec![
                StreamRecord::new(RecordAction::Put, key(1), 7).with_column("name", "a"),
                StreamRecord::new(RecordAction::Delete, key(2), 9),
            ],
            Some("next".to_string()),
        );

        let checkpoint = Checkpoint::for_batch(&batch);
        assert_eq!(checkpoint.sequence, Some(9));
        assert_eq!(checkpoint.record_count, 2);
        assert_eq!(checkpoint.resume_cursor(), ChannelCursor::new("t1", "c1").with_token("next"));
    }

    #[test]
    fn test_record_json_shape() {
        let record = StreamRecord::new(RecordAction::Update, key(3), 1).with_column("qty", 5);
        let json = serde_json::to_value(&record).unwrap();

        assert_eq!(json["action"], "update");
        assert_eq!(json["primary_key"]["id"], 3);
        assert_eq!(json["columns"]["qty"], 5);
    }
}
