use super::{DataRequestHandler, Next};
use crate::processor::{ResponseProcessor, ShapingProcessor};
use crate::request::{ApiRequest, BackendQuery, RequestContext};
use crate::Result;

use async_trait::async_trait;
use std::sync::Arc;

/// Injects sorting, top-N and pagination for requests that ask for them
#[derive(Debug, Default, Clone, Copy)]
pub struct ShapingHandler;

#[async_trait]
impl DataRequestHandler for ShapingHandler {
    async fn handle_request(
        &self,
        ctx: Arc<RequestContext>,
        request: Arc<ApiRequest>,
        query: BackendQuery,
        processor: Arc<dyn ResponseProcessor>,
        next: Next,
    ) -> Result<bool> {
        if !request.has_shaping() {
            return next.run(ctx, request, query, processor).await;
        }

        let processor: Arc<dyn ResponseProcessor> = Arc::new(ShapingProcessor::new(
            processor,
            request.sorts.clone(),
            request.top_n,
            request.pagination,
        ));
        next.run(ctx, request, query, processor).await
    }
}
