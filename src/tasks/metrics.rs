use anyhow::{anyhow, Context, Result};
use chrono::Utc;
use futures::stream::BoxStream;
use futures::StreamExt;
use std::future::Future;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::time::{self, Duration, MissedTickBehavior};

use crate::app::AppState;
use crate::distance::DistanceTracker;
use crate::input::{InputEvent, InputEventSource};
use crate::sink::{MetricsRecord, MetricsSink};

pub async fn collect_metrics(state: Arc<AppState>, mut events: BoxStream<'static, InputEvent>) {
    let mut tracker = DistanceTracker::new(Arc::clone(&state.monitors));

    while let Some(event) = events.next().await {
        state.apply_event(event, &mut tracker);
    }

    log::warn!("Input event stream ended, no further activity will be counted");
}

/// Starts `source`, counts its events and flushes on schedule until
/// `shutdown` resolves. A source that fails to start, or whose stream ends,
/// stops the whole loop with an error. Pending metrics get one final flush
/// either way.
pub async fn collect_until_shutdown<S>(
    state: Arc<AppState>,
    scheduler: Arc<FlushScheduler>,
    source: Box<dyn InputEventSource>,
    shutdown: S,
) -> Result<()>
where
    S: Future<Output = Result<()>>,
{
    let events = source.subscribe().context("Failed to start input event source")?;

    let collector = tokio::spawn(collect_metrics(state, events));
    let flusher = tokio::spawn(Arc::clone(&scheduler).run());

    let result = tokio::select! {
        _ = collector => Err(anyhow!("Input event stream ended")),
        r = shutdown => r,
    };
    flusher.abort();

    log::info!("Flushing pending metrics");
    scheduler.flush_once().await;
    result
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushState {
    Idle,
    Flushing,
}

#[derive(Debug, PartialEq)]
pub enum FlushOutcome {
    Saved(MetricsRecord),
    Skipped,
    Failed,
}

/// Hands the since-flush tally to a sink on a fixed period.
pub struct FlushScheduler {
    state: Arc<AppState>,
    sink: Arc<dyn MetricsSink>,
    period: Duration,
    skip_empty: bool,
    phase: Mutex<FlushState>,
}

impl FlushScheduler {
    pub fn new(state: Arc<AppState>, sink: Arc<dyn MetricsSink>, period: Duration) -> Self {
        Self {
            state,
            sink,
            period,
            skip_empty: false,
            phase: Mutex::new(FlushState::Idle),
        }
    }

    pub fn skip_empty(mut self, skip: bool) -> Self {
        self.skip_empty = skip;
        self
    }

    pub fn phase(&self) -> FlushState {
        *self.phase.lock()
    }

    /// Runs one cycle. The snapshot is taken and cleared atomically; if the
    /// sink rejects it, it is merged back so the next cycle carries it.
    pub async fn flush_once(&self) -> FlushOutcome {
        let snapshot = self.state.counters.take();
        if self.skip_empty && snapshot.is_empty() {
            return FlushOutcome::Skipped;
        }

        *self.phase.lock() = FlushState::Flushing;
        let record = MetricsRecord::from_tally(&snapshot, Utc::now());
        let result = self.sink.flush(&record).await;
        *self.phase.lock() = FlushState::Idle;

        match result {
            Ok(()) => {
                log::debug!(
                    "Saved metrics to {}: {} keys, {} clicks, {:.2} in, {} scroll steps",
                    self.sink.name(),
                    record.keypresses,
                    record.mouse_clicks,
                    record.mouse_distance_in,
                    record.scroll_steps
                );
                FlushOutcome::Saved(record)
            }
            Err(e) => {
                log::error!("Failed to save metrics to {}: {:#}", self.sink.name(), e);
                self.state.counters.restore(snapshot);
                FlushOutcome::Failed
            }
        }
    }

    pub async fn run(self: Arc<Self>) {
        let mut ticker = time::interval_at(time::Instant::now() + self.period, self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            self.flush_once().await;
        }
    }
}
