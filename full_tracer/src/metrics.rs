//! Optional timing instrumentation for the event handlers.

use std::collections::BTreeMap;
use std::time::Duration;

use crate::command::EventKind;

/// Receives the time spent handling each event.
///
/// The tracer only reads the clock when [`MetricsCollector::ENABLED`] is
/// `true`, so [`NoopMetrics`] costs nothing.
pub trait MetricsCollector {
    /// Whether the tracer should time events at all.
    const ENABLED: bool = true;

    /// Collect the time spent handling one event of the given kind.
    fn record(&mut self, kind: EventKind, elapsed: Duration);

    /// Called once `onFinishBatch` has been handled.
    fn batch_finished(&mut self) {}
}

/// Collector which does not collect anything.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopMetrics;

impl MetricsCollector for NoopMetrics {
    const ENABLED: bool = false;

    fn record(&mut self, _kind: EventKind, _elapsed: Duration) {}
}

/// Aggregated time for one event kind.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct TimeMetric {
    /// Number of handled events.
    pub count: u64,
    /// Total time spent in the handler.
    pub total: Duration,
}

/// Accumulates per-event timings and logs a summary at the end of every batch.
#[derive(Clone, Debug)]
pub struct TimeMetrics {
    name: &'static str,
    metrics: BTreeMap<EventKind, TimeMetric>,
}

impl TimeMetrics {
    /// Creates a collector whose summary lines are prefixed with `name`.
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            metrics: BTreeMap::new(),
        }
    }

    /// Returns the accumulated metric of `kind`, if any event of that kind was
    /// handled.
    pub fn get(&self, kind: EventKind) -> Option<&TimeMetric> {
        self.metrics.get(&kind)
    }

    /// Logs one line per event kind, plus a total.
    pub fn log_summary(&self) {
        let mut total = TimeMetric::default();
        for (kind, metric) in &self.metrics {
            log::info!(
                "{}: {} called {} times, total {:?}, average {:?}",
                self.name,
                kind,
                metric.count,
                metric.total,
                average(metric)
            );
            total.count += metric.count;
            total.total += metric.total;
        }
        log::info!(
            "{}: {} events, total {:?}, average {:?}",
            self.name,
            total.count,
            total.total,
            average(&total)
        );
    }
}

impl Default for TimeMetrics {
    fn default() -> Self {
        Self::new("FullTracer")
    }
}

impl MetricsCollector for TimeMetrics {
    fn record(&mut self, kind: EventKind, elapsed: Duration) {
        let metric = self.metrics.entry(kind).or_default();
        metric.count += 1;
        metric.total += elapsed;
    }

    fn batch_finished(&mut self) {
        self.log_summary();
    }
}

fn average(metric: &TimeMetric) -> Duration {
    match u32::try_from(metric.count) {
        Ok(0) => Duration::ZERO,
        Ok(count) => metric.total / count,
        Err(_) => Duration::from_secs_f64(metric.total.as_secs_f64() / metric.count as f64),
    }
}
