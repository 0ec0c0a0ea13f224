use anyhow::{Context, Result};
use std::sync::Arc;

use crate::{
    config::{Config, DBType},
    db::{Database, PostgresDatabase},
    distance::DistanceTracker,
    input::InputEvent,
    metrics::MetricsCounters,
    monitor::{get_monitors, monitors_from_specs, Monitor, MonitorRegistry},
    sink::{FanoutSink, MemorySink, MetricsSink},
    supabase::SupabaseClient,
};

pub struct AppState {
    pub counters: MetricsCounters,
    pub monitors: Arc<MonitorRegistry>,
}

impl AppState {
    pub fn new(monitors: Vec<Monitor>, counters: MetricsCounters) -> Arc<Self> {
        Arc::new(Self {
            counters,
            monitors: Arc::new(MonitorRegistry::new(monitors)),
        })
    }

    /// Resolves the display layout and seeds the lifetime tally from the
    /// sink's history. Without monitors nothing can be measured, so a failed
    /// detection is fatal.
    pub async fn initialize(config: &Config, sink: &dyn MetricsSink) -> Result<Arc<Self>> {
        let monitors = if config.monitors.is_empty() {
            get_monitors().context("Failed to detect monitors")?
        } else {
            log::info!("Using {} configured monitor(s)", config.monitors.len());
            monitors_from_specs(&config.monitors).context("Invalid monitor configuration")?
        };
        for m in &monitors {
            log::info!(
                "Monitor at ({}, {}) {}x{} px, {:.1} ppi{}",
                m.x_pos,
                m.y_pos,
                m.width_px,
                m.height_px,
                m.ppi,
                if m.primary { " (primary)" } else { "" }
            );
        }

        let counters = match sink.load_totals().await {
            Ok(Some(totals)) => MetricsCounters::with_lifetime(totals),
            Ok(None) => MetricsCounters::new(),
            Err(e) => {
                log::warn!("Failed to load total metrics from {}: {:#}", sink.name(), e);
                MetricsCounters::new()
            }
        };

        Ok(Self::new(monitors, counters))
    }

    pub fn apply_event(&self, event: InputEvent, tracker: &mut DistanceTracker) {
        match event {
            InputEvent::KeyDown => self.counters.record_keypress(),
            InputEvent::MouseDown => self.counters.record_click(),
            InputEvent::MouseMove { x, y } => {
                let distance = tracker.move_to(x, y);
                self.counters.record_distance(distance);
            }
            InputEvent::Wheel { rotation } => self.counters.record_scroll(rotation),
        }
    }
}

/// Builds the configured primary store, mirrored to Supabase when enabled.
pub async fn build_sink(config: &Config) -> Result<Arc<dyn MetricsSink>> {
    let primary: Arc<dyn MetricsSink> = match config.database.db_type {
        DBType::Sqlite => {
            let db = match &config.database.filepath {
                Some(path) => Database::open(path).await?,
                None => Database::new().await?,
            };
            Arc::new(db)
        }
        DBType::Postgres => {
            let url = config
                .database
                .url
                .as_deref()
                .context("database.url is required for postgres")?;
            Arc::new(PostgresDatabase::connect(url).await?)
        }
        DBType::Memory => {
            log::warn!("Using in-memory metrics store, nothing will be persisted");
            Arc::new(MemorySink::new())
        }
    };

    let mut sink = FanoutSink::new(primary);
    match (&config.supabase.url, &config.supabase.api_key) {
        (Some(url), Some(api_key)) if config.has_supabase_config() => {
            let client = SupabaseClient::new(url, api_key)?;
            log::info!("Mirroring metrics to Supabase as device {}", client.device_id());
            sink = sink.with_secondary(Arc::new(client));
        }
        _ => log::info!("Supabase configuration not found, skipping..."),
    }

    Ok(Arc::new(sink))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::Tally;
    use crate::monitor::tests::monitor;
    use crate::monitor::MonitorSpec;
    use crate::sink::MetricsRecord;

    #[test]
    fn events_update_both_tallies() {
        let state = AppState::new(vec![monitor(0, 0, 1920, 1080, 96.0)], MetricsCounters::new());
        let mut tracker = DistanceTracker::new(Arc::clone(&state.monitors));

        for event in [
            InputEvent::KeyDown,
            InputEvent::MouseDown,
            InputEvent::MouseMove { x: 100, y: 100 },
            InputEvent::MouseMove { x: 500, y: 100 },
            InputEvent::Wheel { rotation: -3.0 },
        ] {
            state.apply_event(event, &mut tracker);
        }

        let since = state.counters.since_flush();
        assert_eq!(since.keypresses, 1);
        assert_eq!(since.mouse_clicks, 1);
        assert_eq!(since.scroll_steps, 3);
        assert!((since.mouse_distance_in - 400.0 / 96.0).abs() < 1e-9);
        assert_eq!(state.counters.totals(), since);
    }

    #[tokio::test]
    async fn initialize_uses_configured_monitors_and_stored_totals() {
        let mut config = Config::from_yaml("").unwrap();
        config.monitors = vec![MonitorSpec {
            x_pos: 0,
            y_pos: 0,
            width_px: 1920,
            height_px: 1080,
            width_in: 20.0,
            height_in: 11.25,
            primary: true,
        }];

        let sink = MemorySink::new();
        let tally = Tally {
            keypresses: 42,
            ..Tally::default()
        };
        sink.flush(&MetricsRecord::from_tally(&tally, chrono::Utc::now()))
            .await
            .unwrap();

        let state = AppState::initialize(&config, &sink).await.unwrap();
        assert_eq!(state.monitors.len(), 1);
        assert_eq!(state.counters.totals().keypresses, 42);
        assert!(state.counters.since_flush().is_empty());
    }

    #[tokio::test]
    async fn builds_memory_sink_from_config() {
        let config = Config::from_yaml("database:\n  type: memory\n").unwrap();
        let sink = build_sink(&config).await.unwrap();
        assert_eq!(sink.name(), "memory");
    }
}
