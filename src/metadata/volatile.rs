//! Volatile (still-changing) interval tracking

use crate::interval::{Granularity, Interval, SimplifiedIntervalList};

use chrono::{DateTime, TimeDelta, Utc};
use std::collections::HashMap;
use std::sync::Arc;

/// Produces the ranges of a table whose data may still change
pub trait VolatileIntervalsFunction: Send + Sync {
    fn volatile_intervals(&self) -> SimplifiedIntervalList;
}

/// Nothing is volatile
#[derive(Debug, Default, Clone, Copy)]
pub struct NoVolatileIntervals;

impl VolatileIntervalsFunction for NoVolatileIntervals {
    fn volatile_intervals(&self) -> SimplifiedIntervalList {
        SimplifiedIntervalList::new()
    }
}

/// Everything from `window` before now onward is volatile
#[derive(Debug, Clone, Copy)]
pub struct TrailingVolatileIntervals {
    window: TimeDelta,
}

impl TrailingVolatileIntervals {
    pub fn new(window: TimeDelta) -> Self {
        Self { window }
    }

    pub fn volatile_intervals_at(&self, now: DateTime<Utc>) -> SimplifiedIntervalList {
        let start = now.checked_sub_signed(self.window).unwrap_or(now);
        Interval::new(start, DateTime::<Utc>::MAX_UTC)
            .map(SimplifiedIntervalList::single)
            .unwrap_or_default()
    }
}

impl VolatileIntervalsFunction for TrailingVolatileIntervals {
    fn volatile_intervals(&self) -> SimplifiedIntervalList {
        self.volatile_intervals_at(Utc::now())
    }
}

/// Answers which request buckets of a table are volatile
pub trait VolatileIntervalsService: Send + Sync {
    /// Request-grain buckets of `requested` that touch a volatile range of `table`
    fn volatile_intervals(
        &self,
        granularity: Granularity,
        requested: &SimplifiedIntervalList,
        table: &str,
    ) -> SimplifiedIntervalList;
}

/// Per-table volatility functions with a fallback for unmapped tables
pub struct DefaultingVolatileIntervalsService {
    default: Arc<dyn VolatileIntervalsFunction>,
    by_table: HashMap<String, Arc<dyn VolatileIntervalsFunction>>,
}

impl DefaultingVolatileIntervalsService {
    pub fn new(default: Arc<dyn VolatileIntervalsFunction>) -> Self {
        Self {
            default,
            by_table: HashMap::new(),
        }
    }

    pub fn with_table(
        mut self,
        table: impl Into<String>,
        function: Arc<dyn VolatileIntervalsFunction>,
    ) -> Self {
        self.by_table.insert(table.into(), function);
        self
    }
}

impl Default for DefaultingVolatileIntervalsService {
    fn default() -> Self {
        Self::new(Arc::new(NoVolatileIntervals))
    }
}

impl VolatileIntervalsService for DefaultingVolatileIntervalsService {
    fn volatile_intervals(
        &self,
        granularity: Granularity,
        requested: &SimplifiedIntervalList,
        table: &str,
    ) -> SimplifiedIntervalList {
        let function = self.by_table.get(table).unwrap_or(&self.default);
        let volatile = function.volatile_intervals();
        if volatile.is_empty() {
            return volatile;
        }

        granularity
            .slice(requested)
            .into_iter()
            .filter(|bucket| volatile.overlaps(bucket))
            .collect()
    }
}
