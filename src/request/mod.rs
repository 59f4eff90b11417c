//! Request-side types threaded through the handler and processor chains

mod api;
mod context;
mod log;
mod query;

pub use api::{ApiRequest, Pagination, SortColumn, SortDirection};
pub use context::{
    PaginationInfo, RequestContext, ResponseContext, REQUEST_TIMER, WEIGHT_CHECK_TIMER,
};
pub use log::{RequestLog, ResponseSource};
pub use query::{
    Aggregation, BackendQuery, DataSource, QueryContext, QueryType, WEIGHT_COUNT_COLUMN,
};
