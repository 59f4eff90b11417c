use super::{DataRequestHandler, Next};
use crate::request::{ApiRequest, BackendQuery, RequestContext};
use crate::processor::ResponseProcessor;
use crate::{Error, Result};

use async_trait::async_trait;
use chrono::{TimeDelta, Utc};
use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;
use uuid::Uuid;

/// Picks the backend endpoint a query is sent to
pub trait BackendSelector: Send + Sync + Debug {
    fn select(&self, request: &ApiRequest, query: &BackendQuery) -> String;
}

/// Sends everything to one backend
#[derive(Debug, Clone)]
pub struct SingleBackendSelector {
    name: String,
}

impl SingleBackendSelector {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl BackendSelector for SingleBackendSelector {
    fn select(&self, _request: &ApiRequest, _query: &BackendQuery) -> String {
        self.name.clone()
    }
}

/// One routing rule; the first matching rule wins
#[derive(Debug, Clone)]
pub enum RoutingRule {
    /// Tables whose name starts with `prefix`
    TablePrefix { prefix: String, backend: String },
    /// Queries at the `all` grain
    AllGrain { backend: String },
    /// Queries that only touch the last `max_age` of data
    Lookback { max_age: TimeDelta, backend: String },
}

impl RoutingRule {
    fn matches(&self, request: &ApiRequest, query: &BackendQuery) -> Option<&str> {
        match self {
            RoutingRule::TablePrefix { prefix, backend } => query
                .table_names()
                .iter()
                .chain(std::iter::once(&request.table))
                .all(|table| table.starts_with(prefix.as_str()))
                .then_some(backend.as_str()),
            RoutingRule::AllGrain { backend } => {
                query.granularity.is_all().then_some(backend.as_str())
            }
            RoutingRule::Lookback { max_age, backend } => {
                let earliest = query.intervals.iter().map(|i| i.start()).min()?;
                // A lookback reaching past the calendar has no horizon
                match Utc::now().checked_sub_signed(*max_age) {
                    Some(horizon) if earliest < horizon => None,
                    _ => Some(backend.as_str()),
                }
            }
        }
    }
}

/// Ordered rules with a fallback backend
#[derive(Debug, Clone)]
pub struct RoutingBackendSelector {
    rules: Vec<RoutingRule>,
    default: String,
}

impl RoutingBackendSelector {
    pub fn new(default: impl Into<String>) -> Self {
        Self {
            rules: Vec::new(),
            default: default.into(),
        }
    }

    pub fn rule(mut self, rule: RoutingRule) -> Self {
        self.rules.push(rule);
        self
    }
}

impl BackendSelector for RoutingBackendSelector {
    fn select(&self, request: &ApiRequest, query: &BackendQuery) -> String {
        self.rules
            .iter()
            .find_map(|rule| rule.matches(request, query))
            .unwrap_or(&self.default)
            .to_string()
    }
}

/// Fills in backend, priority, remaining timeout and uncovered-interval
/// limit on the outgoing query context
pub struct BackendSelectorHandler {
    selector: Arc<dyn BackendSelector>,
    default_priority: i32,
    request_timeout: Duration,
    uncovered_limit: u32,
}

impl BackendSelectorHandler {
    pub fn new(
        selector: Arc<dyn BackendSelector>,
        default_priority: i32,
        request_timeout: Duration,
        uncovered_limit: u32,
    ) -> Self {
        Self {
            selector,
            default_priority,
            request_timeout,
            uncovered_limit,
        }
    }
}

#[async_trait]
impl DataRequestHandler for BackendSelectorHandler {
    async fn handle_request(
        &self,
        ctx: Arc<RequestContext>,
        request: Arc<ApiRequest>,
        mut query: BackendQuery,
        processor: Arc<dyn ResponseProcessor>,
        next: Next,
    ) -> Result<bool> {
        let remaining = self.request_timeout.saturating_sub(ctx.elapsed());
        if remaining.is_zero() {
            return Err(Error::Timeout);
        }

        let backend = self.selector.select(&request, &query);
        debug!(backend = %backend, remaining_ms = remaining.as_millis() as u64, "Selected backend");

        let context = &mut query.context;
        context.backend = Some(backend);
        context.priority.get_or_insert(self.default_priority);
        context.timeout = Some(remaining.as_millis().max(1) as u64);
        context.uncovered_intervals_limit.get_or_insert(self.uncovered_limit);
        context
            .query_id
            .get_or_insert_with(|| Uuid::new_v4().to_string());

        next.run(ctx, request, query, processor).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interval::{test_interval, Granularity, Interval};
    use crate::request::{DataSource, QueryType};

    fn query(table: &str, granularity: Granularity, interval: Interval) -> (ApiRequest, BackendQuery) {
        (
            ApiRequest::new(table, granularity, vec![interval]),
            BackendQuery::new(
                QueryType::Timeseries,
                DataSource::table(table),
                granularity,
                vec![interval],
            ),
        )
    }

    #[test]
    fn test_first_matching_rule_wins() {
        let selector = RoutingBackendSelector::new("historical")
            .rule(RoutingRule::TablePrefix {
                prefix: "rt_".to_string(),
                backend: "realtime".to_string(),
            })
            .rule(RoutingRule::AllGrain {
                backend: "summary".to_string(),
            });
        let old = test_interval("2020-01-01", "2020-01-02");

        let (request, q) = query("rt_wiki", Granularity::All, old);
        assert_eq!(selector.select(&request, &q), "realtime");

        let (request, q) = query("wiki", Granularity::All, old);
        assert_eq!(selector.select(&request, &q), "summary");

        let (request, q) = query("wiki", Granularity::Day, old);
        assert_eq!(selector.select(&request, &q), "historical");
    }

    #[test]
    fn test_lookback_rule_only_matches_recent_queries() {
        let selector = RoutingBackendSelector::new("historical").rule(RoutingRule::Lookback {
            max_age: TimeDelta::days(2),
            backend: "realtime".to_string(),
        });

        let now = Utc::now();
        let recent = Interval::new(now - TimeDelta::hours(6), now).unwrap();
        let (request, q) = query("wiki", Granularity::Hour, recent);
        assert_eq!(selector.select(&request, &q), "realtime");

        let (request, q) = query("wiki", Granularity::Day, test_interval("2020-01-01", "2020-01-02"));
        assert_eq!(selector.select(&request, &q), "historical");
    }

    #[test]
    fn test_unbounded_lookback_matches_everything() {
        let selector = RoutingBackendSelector::new("historical").rule(RoutingRule::Lookback {
            max_age: TimeDelta::weeks(1_000_000_000),
            backend: "archive".to_string(),
        });

        let (request, q) = query("wiki", Granularity::Day, test_interval("1970-01-01", "1970-01-02"));
        assert_eq!(selector.select(&request, &q), "archive");
    }
}
