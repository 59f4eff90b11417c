//! Request handler chain
//!
//! A request travels down an ordered list of [`DataRequestHandler`] stages
//! built once at startup. The standard order is:
//!
//! 1. [`PartialDataHandler`]: missing and volatile interval annotation
//! 2. [`ShapingHandler`]: sort, top-N and pagination
//! 3. [`SplitQueryHandler`]: one sub-query per grain bucket
//! 4. [`CacheReadHandler`]: answer from cache or arrange a cache write
//! 5. [`WeightCheckHandler`]: admission control
//! 6. [`BackendSelectorHandler`]: backend, priority and remaining timeout
//! 7. [`DispatchHandler`]: the backend call
//!
//! A stage either answers through the processor it was given, passes the
//! request on through [`Next`], or passes on a rewritten query and/or a
//! wrapped processor. The split stage passes on several queries sharing one
//! processor.

mod annotation;
mod cache;
mod dispatch;
mod selector;
mod shaping;
mod split;
mod weight;

pub use annotation::PartialDataHandler;
pub use cache::CacheReadHandler;
pub use dispatch::DispatchHandler;
pub use selector::{
    BackendSelector, BackendSelectorHandler, RoutingBackendSelector, RoutingRule,
    SingleBackendSelector,
};
pub use shaping::ShapingHandler;
pub use split::SplitQueryHandler;
pub use weight::WeightCheckHandler;

use crate::processor::ResponseProcessor;
use crate::request::{ApiRequest, BackendQuery, RequestContext};
use crate::{Error, Result};

use async_trait::async_trait;
use std::sync::Arc;

/// One stage of the handler chain
#[async_trait]
pub trait DataRequestHandler: Send + Sync {
    /// Handle or pass on a request
    ///
    /// Returns whether the request was scheduled. Completion is always
    /// reported through `processor`, never through the return value.
    async fn handle_request(
        &self,
        ctx: Arc<RequestContext>,
        request: Arc<ApiRequest>,
        query: BackendQuery,
        processor: Arc<dyn ResponseProcessor>,
        next: Next,
    ) -> Result<bool>;
}

/// Cursor over the remaining stages of a chain
#[derive(Clone)]
pub struct Next {
    handlers: Arc<[Arc<dyn DataRequestHandler>]>,
    index: usize,
}

impl Next {
    /// Run the stage this cursor points at
    pub async fn run(
        self,
        ctx: Arc<RequestContext>,
        request: Arc<ApiRequest>,
        query: BackendQuery,
        processor: Arc<dyn ResponseProcessor>,
    ) -> Result<bool> {
        let Some(handler) = self.handlers.get(self.index).cloned() else {
            return Err(Error::Internal(
                "handler chain ended without dispatching the query".to_string(),
            ));
        };
        let next = Next {
            handlers: self.handlers,
            index: self.index + 1,
        };
        handler
            .handle_request(ctx, request, query, processor, next)
            .await
    }

    /// Stages left to run, including the current one
    pub fn remaining(&self) -> usize {
        self.handlers.len().saturating_sub(self.index)
    }
}

/// Builds an ordered handler chain
#[derive(Default)]
pub struct HandlerChain {
    handlers: Vec<Arc<dyn DataRequestHandler>>,
}

impl HandlerChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn then<H: DataRequestHandler + 'static>(mut self, handler: H) -> Self {
        self.handlers.push(Arc::new(handler));
        self
    }

    pub fn then_arc(mut self, handler: Arc<dyn DataRequestHandler>) -> Self {
        self.handlers.push(handler);
        self
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Cursor at the first stage
    pub fn build(self) -> Next {
        Next {
            handlers: self.handlers.into(),
            index: 0,
        }
    }
}
