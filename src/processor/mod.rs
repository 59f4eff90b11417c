//! Response processor chain
//!
//! Every backend outcome flows back through a stack of [`ResponseProcessor`]
//! decorators built by the handler chain on the way down. Each decorator does
//! its work and hands the (possibly rewritten) outcome to the processor it
//! wraps; the innermost is the [`ResponseSink`] the gateway awaits.
//!
//! Exactly one of `process_response`, `on_error` or `on_failure` is called
//! per dispatched query.

mod cache;
mod partial;
mod shaping;
mod sink;
mod split;
mod weight;

pub use cache::{CacheWriteMode, CacheWriteProcessor};
pub use partial::PartialDataProcessor;
pub use shaping::ShapingProcessor;
pub use sink::{QueryResponse, ResponseSink};
pub use split::SplitMergeProcessor;
pub use weight::WeightCheckProcessor;

pub(crate) use shaping::row_field;

use crate::backend::BackendResponse;
use crate::request::{BackendQuery, RequestLog, ResponseContext};
use crate::Error;

use async_trait::async_trait;
use std::sync::Arc;

#[async_trait]
pub trait ResponseProcessor: Send + Sync {
    /// Annotations shared by every processor of this request
    fn response_context(&self) -> &Arc<ResponseContext>;

    async fn process_response(&self, response: BackendResponse, query: &BackendQuery, log: RequestLog);

    /// Backend answered with an HTTP-level error
    async fn on_error(&self, query: &BackendQuery, status: u16, reason: String, body: String);

    /// The query could not be answered
    async fn on_failure(&self, query: &BackendQuery, error: Error);
}
