use anyhow::Result;
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use parking_lot::Mutex;
use std::sync::Arc;

use crate::metrics::Tally;

/// One flush worth of activity, as handed to a sink.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricsRecord {
    pub keypresses: i64,
    pub mouse_clicks: i64,
    pub mouse_distance_in: f64,
    pub mouse_distance_mi: f64,
    pub scroll_steps: i64,
    pub timestamp: DateTime<Utc>,
}

impl MetricsRecord {
    pub fn from_tally(tally: &Tally, timestamp: DateTime<Utc>) -> Self {
        Self {
            keypresses: saturating_i64(tally.keypresses),
            mouse_clicks: saturating_i64(tally.mouse_clicks),
            mouse_distance_in: tally.mouse_distance_in,
            mouse_distance_mi: tally.mouse_distance_mi(),
            scroll_steps: saturating_i64(tally.scroll_steps),
            timestamp,
        }
    }
}

fn saturating_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

/// Durable destination for flushed metrics. A write is all-or-nothing: an
/// `Err` means nothing from the record was stored.
pub trait MetricsSink: Send + Sync {
    fn name(&self) -> &str;

    fn flush<'a>(&'a self, record: &'a MetricsRecord) -> BoxFuture<'a, Result<()>>;

    /// Lifetime totals already stored, if the backend can aggregate them.
    fn load_totals(&self) -> BoxFuture<'_, Result<Option<Tally>>> {
        Box::pin(async { Ok(None) })
    }
}

/// Keeps records in memory. Used when no database is configured and in tests.
#[derive(Default)]
pub struct MemorySink {
    records: Mutex<Vec<MetricsRecord>>,
    fail_next: Mutex<u32>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    pub fn records(&self) -> Vec<MetricsRecord> {
        self.records.lock().clone()
    }

    /// Makes the next `count` flushes fail.
    #[cfg(test)]
    pub fn fail_next(&self, count: u32) {
        *self.fail_next.lock() = count;
    }
}

impl MetricsSink for MemorySink {
    fn name(&self) -> &str {
        "memory"
    }

    fn flush<'a>(&'a self, record: &'a MetricsRecord) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            {
                let mut fail_next = self.fail_next.lock();
                if *fail_next > 0 {
                    *fail_next -= 1;
                    anyhow::bail!("memory sink configured to fail");
                }
            }
            self.records.lock().push(record.clone());
            Ok(())
        })
    }

    fn load_totals(&self) -> BoxFuture<'_, Result<Option<Tally>>> {
        Box::pin(async move {
            let mut total = Tally::default();
            for record in self.records.lock().iter() {
                total += Tally {
                    keypresses: record.keypresses.max(0) as u64,
                    mouse_clicks: record.mouse_clicks.max(0) as u64,
                    mouse_distance_in: record.mouse_distance_in,
                    scroll_steps: record.scroll_steps.max(0) as u64,
                };
            }
            Ok(Some(total))
        })
    }
}

/// Writes to a primary sink and mirrors successful writes to secondaries.
/// Only the primary decides whether the flush succeeded; secondary failures
/// are logged.
pub struct FanoutSink {
    primary: Arc<dyn MetricsSink>,
    secondaries: Vec<Arc<dyn MetricsSink>>,
}

impl FanoutSink {
    pub fn new(primary: Arc<dyn MetricsSink>) -> Self {
        Self {
            primary,
            secondaries: Vec::new(),
        }
    }

    pub fn with_secondary(mut self, sink: Arc<dyn MetricsSink>) -> Self {
        self.secondaries.push(sink);
        self
    }
}

impl MetricsSink for FanoutSink {
    fn name(&self) -> &str {
        self.primary.name()
    }

    fn flush<'a>(&'a self, record: &'a MetricsRecord) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            self.primary.flush(record).await?;

            for sink in &self.secondaries {
                if let Err(e) = sink.flush(record).await {
                    log::error!("Failed to save metrics to {}: {:#}", sink.name(), e);
                }
            }
            Ok(())
        })
    }

    fn load_totals(&self) -> BoxFuture<'_, Result<Option<Tally>>> {
        self.primary.load_totals()
    }
}
