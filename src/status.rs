use std::sync::Arc;
use tokio::time::{self, Duration, MissedTickBehavior};

use crate::app::AppState;
use crate::config::DistanceUnit;
use crate::metrics::Tally;

const CM_PER_INCH: f64 = 2.54;
const CM_PER_KM: f64 = 100_000.0;

/// Menu-style summary of a tally, one entry per line.
pub fn format_status(totals: &Tally, unit: DistanceUnit) -> [String; 4] {
    let travel = match unit {
        DistanceUnit::Imperial => format!(
            "Mouse Travel (in) {:.2} / (mi) {:.2}",
            totals.mouse_distance_in,
            totals.mouse_distance_mi()
        ),
        DistanceUnit::Metric => {
            let cm = totals.mouse_distance_in * CM_PER_INCH;
            format!("Mouse Travel (cm) {:.2} / (km) {:.2}", cm, cm / CM_PER_KM)
        }
    };

    [
        format!("Keypresses: {}", totals.keypresses),
        format!("Mouse Clicks: {}", totals.mouse_clicks),
        travel,
        format!("Scroll Steps: {}", totals.scroll_steps),
    ]
}

/// Publishes the lifetime summary whenever it changes.
pub async fn report_status_periodically(state: Arc<AppState>, unit: DistanceUnit, period: Duration) {
    let mut ticker = time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut last_reported: Option<Tally> = None;

    loop {
        ticker.tick().await;
        let totals = state.counters.totals();
        if last_reported == Some(totals) {
            continue;
        }
        log::debug!("Stats - {}", format_status(&totals, unit).join(", "));
        last_reported = Some(totals);
    }
}
