//! Result shaping: sort, top-N per time bucket, pagination

use super::ResponseProcessor;
use crate::backend::BackendResponse;
use crate::request::{
    BackendQuery, Pagination, PaginationInfo, RequestLog, ResponseContext, SortColumn,
    SortDirection,
};
use crate::Error;

use async_trait::async_trait;
use serde_json::Value;
use std::cmp::Ordering;
use std::sync::Arc;

/// Column of a result row
///
/// Grouped rows nest their columns under `event`, timeseries rows under
/// `result`; flat rows are read as-is.
pub(crate) fn row_field<'a>(row: &'a Value, column: &str) -> Option<&'a Value> {
    row.get("event")
        .or_else(|| row.get("result"))
        .and_then(|nested| nested.get(column))
        .or_else(|| row.get(column))
}

fn row_timestamp(row: &Value) -> Option<&str> {
    row.get("timestamp").and_then(Value::as_str)
}

/// Numbers before strings before everything else; missing values last
fn compare_values(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a, b) {
        (Some(Value::Number(x)), Some(Value::Number(y))) => {
            let (x, y) = (x.as_f64().unwrap_or(0.0), y.as_f64().unwrap_or(0.0));
            x.partial_cmp(&y).unwrap_or(Ordering::Equal)
        }
        (Some(Value::String(x)), Some(Value::String(y))) => x.cmp(y),
        (Some(Value::Number(_)), Some(_)) => Ordering::Less,
        (Some(_), Some(Value::Number(_))) => Ordering::Greater,
        (Some(_), Some(_)) => Ordering::Equal,
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

/// Applies the request's sort, top-N and pagination to the final rows
///
/// Rows stay grouped by timestamp; sorting and top-N apply within each time
/// bucket. Pagination records the page and total row count in the response
/// context.
pub struct ShapingProcessor {
    next: Arc<dyn ResponseProcessor>,
    sorts: Vec<SortColumn>,
    top_n: Option<usize>,
    pagination: Option<Pagination>,
}

impl ShapingProcessor {
    pub fn new(
        next: Arc<dyn ResponseProcessor>,
        sorts: Vec<SortColumn>,
        top_n: Option<usize>,
        pagination: Option<Pagination>,
    ) -> Self {
        Self {
            next,
            sorts,
            top_n,
            pagination,
        }
    }

    fn sort(&self, rows: &mut [Value]) {
        rows.sort_by(|a, b| {
            row_timestamp(a).cmp(&row_timestamp(b)).then_with(|| {
                self.sorts
                    .iter()
                    .map(|sort| {
                        let ordering =
                            compare_values(row_field(a, &sort.column), row_field(b, &sort.column));
                        match sort.direction {
                            SortDirection::Asc => ordering,
                            SortDirection::Desc => ordering.reverse(),
                        }
                    })
                    .find(|ordering| ordering.is_ne())
                    .unwrap_or(Ordering::Equal)
            })
        });
    }

    fn top_n(limit: usize, rows: Vec<Value>) -> Vec<Value> {
        let mut kept = Vec::with_capacity(rows.len());
        let mut bucket: Option<String> = None;
        let mut in_bucket = 0;
        for row in rows {
            let timestamp = row_timestamp(&row).map(str::to_string);
            if timestamp != bucket {
                bucket = timestamp;
                in_bucket = 0;
            }
            if in_bucket < limit {
                kept.push(row);
            }
            in_bucket += 1;
        }
        kept
    }

    fn paginate(&self, pagination: Pagination, rows: Vec<Value>) -> Result<Vec<Value>, Error> {
        if pagination.page == 0 || pagination.per_page == 0 {
            return Err(Error::Query(
                "page and per-page must both be at least 1".to_string(),
            ));
        }
        let total_rows = rows.len();
        let start = (pagination.page - 1).saturating_mul(pagination.per_page);
        if start >= total_rows && total_rows > 0 {
            return Err(Error::Query(format!(
                "page {} is past the last page of {} rows",
                pagination.page, total_rows
            )));
        }
        self.response_context().set_pagination(PaginationInfo {
            page: pagination.page,
            per_page: pagination.per_page,
            total_rows,
        });
        Ok(rows
            .into_iter()
            .skip(start)
            .take(pagination.per_page)
            .collect())
    }
}

#[async_trait]
impl ResponseProcessor for ShapingProcessor {
    fn response_context(&self) -> &Arc<ResponseContext> {
        self.next.response_context()
    }

    async fn process_response(&self, mut response: BackendResponse, query: &BackendQuery, log: RequestLog) {
        let mut rows = std::mem::take(&mut response.rows);
        if !self.sorts.is_empty() || self.top_n.is_some() {
            self.sort(&mut rows);
        }
        if let Some(limit) = self.top_n {
            rows = Self::top_n(limit, rows);
        }
        if let Some(pagination) = self.pagination {
            rows = match self.paginate(pagination, rows) {
                Ok(page) => page,
                Err(e) => {
                    self.next.on_failure(query, e).await;
                    return;
                }
            };
        }
        response.rows = rows;
        self.next.process_response(response, query, log).await;
    }

    async fn on_error(&self, query: &BackendQuery, status: u16, reason: String, body: String) {
        self.next.on_error(query, status, reason, body).await;
    }

    async fn on_failure(&self, query: &BackendQuery, error: Error) {
        self.next.on_failure(query, error).await;
    }
}
