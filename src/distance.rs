use std::sync::Arc;

use crate::monitor::{get_monitor_for_coordinates, Monitor, MonitorRegistry};

pub const INCHES_PER_MILE: f64 = 63360.0;

pub fn inches_to_miles(inches: f64) -> f64 {
    inches / INCHES_PER_MILE
}

pub fn calculate_distance(x1: i32, y1: i32, x2: i32, y2: i32) -> f64 {
    let dx = (x2 - x1) as f64;
    let dy = (y2 - y1) as f64;
    (dx * dx + dy * dy).sqrt()
}

/// Where the move `from -> to` leaves `monitor`, approximated by clamping `to`
/// against the first edge it overshoots (left, right, top, bottom) while the
/// other axis keeps `from`'s value.
fn edge_exit_point(from: (i32, i32), to: (i32, i32), monitor: &Monitor) -> (i32, i32) {
    let (from_x, from_y) = from;
    let (to_x, to_y) = to;

    if to_x < monitor.x_pos {
        (monitor.x_pos, from_y)
    } else if to_x >= monitor.x_pos + monitor.width_px {
        (monitor.x_pos + monitor.width_px, from_y)
    } else if to_y < monitor.y_pos {
        (from_x, monitor.y_pos)
    } else if to_y >= monitor.y_pos + monitor.height_px {
        (from_x, monitor.y_pos + monitor.height_px)
    } else {
        to
    }
}

/// Physical length in inches of a cursor move.
///
/// Both segments of a cross-monitor move are normalised by the origin
/// monitor's PPI, so a move onto a denser display is measured in the origin's
/// density. Moves are assumed to span at most two monitors.
pub fn calculate_multi_monitor_distance(x1: i32, y1: i32, x2: i32, y2: i32, monitors: &[Monitor]) -> f64 {
    let (Some(m1), Some(m2)) = (
        get_monitor_for_coordinates(x1, y1, monitors),
        get_monitor_for_coordinates(x2, y2, monitors),
    ) else {
        log::warn!("Monitor registry is empty, dropping distance sample");
        return 0.0;
    };

    if std::ptr::eq(m1, m2) {
        return calculate_distance(x1, y1, x2, y2) / m1.ppi;
    }

    let (ex1, ey1) = edge_exit_point((x1, y1), (x2, y2), m1);
    let d1 = calculate_distance(x1, y1, ex1, ey1) / m1.ppi;

    // Same line, seen from the destination monitor's side.
    let (ex2, ey2) = edge_exit_point((x2, y2), (x1, y1), m2);
    let d2 = calculate_distance(x1, y1, ex2, ey2) / m1.ppi;

    d1 + d2
}

/// Follows the cursor and turns absolute positions into travelled distance.
pub struct DistanceTracker {
    monitors: Arc<MonitorRegistry>,
    last_position: Option<(i32, i32)>,
}

impl DistanceTracker {
    pub fn new(monitors: Arc<MonitorRegistry>) -> Self {
        Self {
            monitors,
            last_position: None,
        }
    }

    /// Records a new cursor position and returns the distance in inches since
    /// the previous one. The first observed position yields zero.
    pub fn move_to(&mut self, x: i32, y: i32) -> f64 {
        let distance = match self.last_position {
            Some((last_x, last_y)) if (last_x, last_y) != (x, y) => {
                let monitors = self.monitors.snapshot();
                calculate_multi_monitor_distance(last_x, last_y, x, y, &monitors)
            }
            _ => 0.0,
        };
        self.last_position = Some((x, y));
        distance
    }

    #[cfg(test)]
    pub fn last_position(&self) -> Option<(i32, i32)> {
        self.last_position
    }
}
