use std::sync::Arc;
use tokio::time::{self, Duration, MissedTickBehavior};

use crate::{app::AppState, monitor::get_monitors};

/// Re-detects displays and swaps the registry when the layout changed.
pub async fn refresh_monitors_periodically(state: Arc<AppState>, period: Duration) {
    let mut ticker = time::interval_at(time::Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        match get_monitors() {
            Ok(new_monitors) => {
                if state.monitors.snapshot()[..] != new_monitors[..] {
                    log::info!("Display layout changed, now {} monitor(s)", new_monitors.len());
                    state.monitors.set_monitors(new_monitors);
                }
            }
            Err(e) => log::warn!("Failed to refresh monitors: {:#}", e),
        }
    }
}
