use async_trait::async_trait;

use crate::messages::{PageResult, QueryRequest};

/// Remote record store exposing a query endpoint.
///
/// Implementations: HTTP (`runlens-client`), in-memory (tests, demos).
/// Reference-name listings are ordinary queries with an explicit `limit`.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Executes one query and returns a single page of results.
    ///
    /// A query referencing a bind name with no value in `params` is rejected
    /// by the store; callers must not rely on defaults being supplied.
    async fn query(&self, request: &QueryRequest) -> anyhow::Result<PageResult>;
}

#[async_trait]
impl<T: RecordStore + ?Sized> RecordStore for std::sync::Arc<T> {
    async fn query(&self, request: &QueryRequest) -> anyhow::Result<PageResult> {
        (**self).query(request).await
    }
}
