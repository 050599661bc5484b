//! Immutable, shared resource bundle handed to every stage at `init`.

use super::RunIdentity;
use crate::events::{ErrorReporter, NoOpErrorReporter, StageFailure};
use chrono::{DateTime, Utc};
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::Arc;

/// Shared dependencies for a pipeline run.
///
/// Once built the context cannot be mutated; stages receive it through
/// `Arc<PipelineContext>` and read typed resources (storage clients,
/// collaborators) and string attributes from it.
pub struct PipelineContext {
    identity: RunIdentity,
    attributes: HashMap<String, String>,
    resources: HashMap<TypeId, Arc<dyn Any + Send + Sync>>,
    error_reporter: Arc<dyn ErrorReporter>,
    created_at: DateTime<Utc>,
}

impl PipelineContext {
    /// Creates a context with a fresh identity and no resources.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Self::builder().build()
    }

    /// Starts building a context.
    #[must_use]
    pub fn builder() -> PipelineContextBuilder {
        PipelineContextBuilder::default()
    }

    /// Returns the run identity.
    #[must_use]
    pub fn identity(&self) -> &RunIdentity {
        &self.identity
    }

    /// Returns an attribute value.
    #[must_use]
    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(String::as_str)
    }

    /// Returns all attributes.
    #[must_use]
    pub fn attributes(&self) -> &HashMap<String, String> {
        &self.attributes
    }

    /// Returns the shared resource of type `T`, if one was registered.
    #[must_use]
    pub fn resource<T>(&self) -> Option<Arc<T>>
    where
        T: Any + Send + Sync,
    {
        self.resources
            .get(&TypeId::of::<T>())
            .cloned()
            .and_then(|res| res.downcast::<T>().ok())
    }

    /// Returns the error reporter.
    #[must_use]
    pub fn error_reporter(&self) -> &Arc<dyn ErrorReporter> {
        &self.error_reporter
    }

    /// Delivers a failure to the configured reporter.
    pub fn report(&self, failure: StageFailure) {
        self.error_reporter.report(failure);
    }

    /// Returns when the context was built.
    #[must_use]
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
}

impl std::fmt::Debug for PipelineContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineContext")
            .field("identity", &self.identity)
            .field("attributes", &self.attributes)
            .field("resource_count", &self.resources.len())
            .field("created_at", &self.created_at)
            .finish_non_exhaustive()
    }
}

/// Builder for [`PipelineContext`].
#[derive(Default)]
pub struct PipelineContextBuilder {
    identity: Option<RunIdentity>,
    attributes: HashMap<String, String>,
    resources: HashMap<TypeId, Arc<dyn Any + Send + Sync>>,
    error_reporter: Option<Arc<dyn ErrorReporter>>,
}

impl PipelineContextBuilder {
    /// Sets the run identity.
    #[must_use]
    pub fn identity(mut self, identity: RunIdentity) -> Self {
        self.identity = Some(identity);
        self
    }

    /// Adds a string attribute.
    #[must_use]
    pub fn attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    /// Registers a shared resource, replacing any previous one of the same type.
    #[must_use]
    pub fn resource<T>(mut self, resource: Arc<T>) -> Self
    where
        T: Any + Send + Sync,
    {
        self.resources.insert(TypeId::of::<T>(), resource);
        self
    }

    /// Sets the error reporter.
    #[must_use]
    pub fn error_reporter(mut self, reporter: Arc<dyn ErrorReporter>) -> Self {
        self.error_reporter = Some(reporter);
        self
    }

    /// Seals the context.
    #[must_use]
    pub fn build(self) -> Arc<PipelineContext> {
        Arc::new(PipelineContext {
            identity: self.identity.unwrap_or_default(),
            attributes: self.attributes,
            resources: self.resources,
            error_reporter: self
                .error_reporter
                .unwrap_or_else(|| Arc::new(NoOpErrorReporter)),
            created_at: Utc::now(),
        })
    }
}

impl std::fmt::Debug for PipelineContextBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineContextBuilder")
            .field("identity", &self.identity)
            .field("attributes", &self.attributes)
            .field("resource_count", &self.resources.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::StageError;
    use crate::events::CollectingErrorReporter;

    #[derive(Debug, PartialEq)]
    struct StorageClient {
        endpoint: String,
    }

    #[test]
    fn test_resource_lookup_by_type() {
        let client = Arc::new(StorageClient {
            endpoint: "https://instance.example".to_string(),
        });
        let ctx = PipelineContext::builder().resource(client.clone()).build();

        let found = ctx.resource::<StorageClient>().unwrap();
        assert!(Arc::ptr_eq(&found, &client));
        assert!(ctx.resource::<String>().is_none());
    }

    #[test]
    fn test_attributes() {
        let ctx = PipelineContext::builder()
            .attribute("table", "orders")
            .attribute("instance", "prod")
            .build();

        assert_eq!(ctx.attribute("table"), Some("orders"));
        assert_eq!(ctx.attribute("missing"), None);
        assert_eq!(ctx.attributes().len(), 2);
    }

    #[test]
    fn test_identity_is_preserved() {
        let identity = RunIdentity::new().with_tunnel_id("tunnel-1");
        let ctx = PipelineContext::builder().identity(identity.clone()).build();
        assert_eq!(ctx.identity(), &identity);
    }

    #[test]
    fn test_report_uses_configured_reporter() {
        let reporter = Arc::new(CollectingErrorReporter::new());
        let ctx = PipelineContext::builder()
            .error_reporter(reporter.clone())
            .build();

        let err = StageError::process("bad row").in_stage("apply");
        ctx.report(StageFailure::from(&err));

        assert_eq!(reporter.len(), 1);
        assert_eq!(reporter.failures()[0].stage, "apply");
    }
}
