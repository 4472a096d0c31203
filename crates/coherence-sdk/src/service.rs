//! Request-scoped content access.

use coherence_cache::{CacheError, ContentBuilder, KeyDimensions, Published, RequestMemo};
use coherence_observability::{request_span, RequestId};
use tracing::Instrument;

use crate::runtime::ContentCache;

/// Published content for the lifetime of one request.
///
/// Owns the request's memo, so repeated lookups of the same artifact within
/// the request never leave the process. Drop it when the request ends.
pub struct ContentService<'a> {
    cache: &'a ContentCache,
    memo: RequestMemo,
    request_id: RequestId,
}

impl<'a> ContentService<'a> {
    pub fn new(cache: &'a ContentCache) -> Self {
        Self::with_request_id(cache, RequestId::generate())
    }

    /// Reuse the caller's request id, e.g. from an `x-request-id` header.
    pub fn with_request_id(cache: &'a ContentCache, request_id: RequestId) -> Self {
        Self {
            cache,
            memo: RequestMemo::new(),
            request_id,
        }
    }

    pub fn request_id(&self) -> &RequestId {
        &self.request_id
    }

    /// Number of artifacts memoised so far in this request.
    pub fn memoised(&self) -> usize {
        self.memo.len()
    }

    pub async fn get<B: ContentBuilder>(
        &self,
        dims: &KeyDimensions,
        builder: &B,
        ctx: &B::Context,
    ) -> Result<Published<B::Payload>, CacheError> {
        self.cache
            .get_or_build_memo(dims, builder, ctx, &self.memo)
            .instrument(request_span(&self.request_id))
            .await
    }
}
