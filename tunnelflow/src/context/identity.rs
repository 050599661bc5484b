//! Run identity for correlating pipeline logs and failures.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Identifies one run of a tunnel client's pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunIdentity {
    /// The unique ID for this run.
    pub run_id: Uuid,

    /// The tunnel being consumed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tunnel_id: Option<String>,

    /// The client instance tag.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_tag: Option<String>,
}

impl Default for RunIdentity {
    fn default() -> Self {
        Self::new()
    }
}

impl RunIdentity {
    /// Creates a new run identity with a generated run ID.
    #[must_use]
    pub fn new() -> Self {
        Self {
            run_id: Uuid::new_v4(),
            tunnel_id: None,
            client_tag: None,
        }
    }

    /// Creates a run identity with a specific run ID.
    #[must_use]
    pub fn with_run_id(run_id: Uuid) -> Self {
        Self {
            run_id,
            ..Self::new()
        }
    }

    /// Sets the tunnel ID.
    #[must_use]
    pub fn with_tunnel_id(mut self, tunnel_id: impl Into<String>) -> Self {
        self.tunnel_id = Some(tunnel_id.into());
        self
    }

    /// Sets the client tag.
    #[must_use]
    pub fn with_client_tag(mut self, client_tag: impl Into<String>) -> Self {
        self.client_tag = Some(client_tag.into());
        self
    }

    /// Converts to a dictionary with string values (or null).
    #[must_use]
    pub fn to_dict(&self) -> HashMap<String, serde_json::Value> {
        let mut map = HashMap::new();
        map.insert(
            "run_id".to_string(),
            serde_json::json!(self.run_id.to_string()),
        );
        map.insert(
            "tunnel_id".to_string(),
            self.tunnel_id
                .as_ref()
                .map_or(serde_json::Value::Null, |id| serde_json::json!(id)),
        );
        map.insert(
            "client_tag".to_string(),
            self.client_tag
                .as_ref()
                .map_or(serde_json::Value::Null, |tag| serde_json::json!(tag)),
        );
        map
    }
}
