use anyhow::{anyhow, Result};
use display_info::DisplayInfo;
use parking_lot::RwLock;
use serde::Deserialize;
use std::error::Error;
use std::fmt;
use std::sync::Arc;

/// Nominal points-per-inch the platform assumes at a scale factor of 1.0.
#[cfg(target_os = "macos")]
const NOMINAL_DPI: f64 = 72.0;
#[cfg(not(target_os = "macos"))]
const NOMINAL_DPI: f64 = 96.0;

/// Raw geometry as reported by the display subsystem or written in the config.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct MonitorSpec {
    pub x_pos: i32,
    pub y_pos: i32,
    pub width_px: i32,
    pub height_px: i32,
    pub width_in: f64,
    pub height_in: f64,
    #[serde(default)]
    pub primary: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Monitor {
    pub x_pos: i32,
    pub y_pos: i32,
    pub width_px: i32,
    pub height_px: i32,
    pub width_in: f64,
    pub height_in: f64,
    pub ppi: f64,
    pub primary: bool,
}

#[derive(Debug, PartialEq)]
pub enum MonitorError {
    NoMonitorsFound,
    InvalidGeometry(MonitorSpec),
    SystemError(String),
}

impl Error for MonitorError {}

impl fmt::Display for MonitorError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            MonitorError::NoMonitorsFound => write!(f, "No monitors found"),
            MonitorError::InvalidGeometry(spec) => write!(
                f,
                "Invalid monitor geometry: {}x{} px, {:.2}x{:.2} in at ({}, {})",
                spec.width_px, spec.height_px, spec.width_in, spec.height_in, spec.x_pos, spec.y_pos
            ),
            MonitorError::SystemError(msg) => write!(f, "System error: {}", msg),
        }
    }
}

impl Monitor {
    pub fn from_spec(spec: MonitorSpec) -> Result<Self, MonitorError> {
        let valid = spec.width_px > 0
            && spec.height_px > 0
            && spec.width_in.is_finite()
            && spec.height_in.is_finite()
            && spec.width_in > 0.0
            && spec.height_in > 0.0;
        if !valid {
            return Err(MonitorError::InvalidGeometry(spec));
        }

        let width_dpi = spec.width_px as f64 / spec.width_in;
        let height_dpi = spec.height_px as f64 / spec.height_in;

        Ok(Monitor {
            x_pos: spec.x_pos,
            y_pos: spec.y_pos,
            width_px: spec.width_px,
            height_px: spec.height_px,
            width_in: spec.width_in,
            height_in: spec.height_in,
            ppi: (width_dpi + height_dpi) / 2.0,
            primary: spec.primary,
        })
    }

    fn from_display(display: &DisplayInfo) -> Result<Self, MonitorError> {
        // The display subsystem only reports a scale factor, so the physical
        // size is estimated from the platform's nominal DPI.
        let scale = if display.scale_factor > 0.0 {
            display.scale_factor as f64
        } else {
            1.0
        };
        let estimated_ppi = NOMINAL_DPI * scale;

        Monitor::from_spec(MonitorSpec {
            x_pos: display.x,
            y_pos: display.y,
            width_px: display.width as i32,
            height_px: display.height as i32,
            width_in: display.width as f64 / estimated_ppi,
            height_in: display.height as f64 / estimated_ppi,
            primary: display.is_primary,
        })
    }

    pub fn contains_point(&self, x: i32, y: i32) -> bool {
        x >= self.x_pos
            && x < self.x_pos + self.width_px
            && y >= self.y_pos
            && y < self.y_pos + self.height_px
    }
}

/// Builds monitors from configured geometry, rejecting the whole list if any
/// entry is malformed.
pub fn monitors_from_specs(specs: &[MonitorSpec]) -> Result<Vec<Monitor>, MonitorError> {
    if specs.is_empty() {
        return Err(MonitorError::NoMonitorsFound);
    }
    specs.iter().copied().map(Monitor::from_spec).collect()
}

pub fn get_monitors() -> Result<Vec<Monitor>> {
    let displays = DisplayInfo::all()
        .map_err(|e| MonitorError::SystemError(format!("Failed to get displays: {}", e)))?;

    if displays.is_empty() {
        return Err(MonitorError::NoMonitorsFound.into());
    }

    let mut monitors = Vec::new();
    for display in &displays {
        match Monitor::from_display(display) {
            Ok(monitor) => monitors.push(monitor),
            Err(e) => log::warn!("Skipping display {}: {}", display.id, e),
        }
    }

    if monitors.is_empty() {
        return Err(anyhow!(MonitorError::NoMonitorsFound));
    }

    Ok(monitors)
}

/// Resolves the monitor containing `(x, y)`. Points off every known display
/// fall back to the primary monitor, or the first one if none is primary.
pub fn get_monitor_for_coordinates(x: i32, y: i32, monitors: &[Monitor]) -> Option<&Monitor> {
    monitors
        .iter()
        .find(|m| m.contains_point(x, y))
        .or_else(|| {
            log::debug!("No monitor contains ({}, {}), using fallback", x, y);
            monitors.iter().find(|m| m.primary).or_else(|| monitors.first())
        })
}

pub type MonitorSet = Arc<[Monitor]>;

/// Shared view of the connected displays. Readers take a snapshot of the
/// whole set; replacement swaps the set in one step.
pub struct MonitorRegistry {
    monitors: RwLock<MonitorSet>,
}

impl MonitorRegistry {
    pub fn new(monitors: Vec<Monitor>) -> Self {
        Self {
            monitors: RwLock::new(monitors.into()),
        }
    }

    pub fn set_monitors(&self, monitors: Vec<Monitor>) {
        let next: MonitorSet = monitors.into();
        *self.monitors.write() = next;
    }

    pub fn snapshot(&self) -> MonitorSet {
        Arc::clone(&self.monitors.read())
    }

    #[cfg(test)]
    pub fn monitor_at(&self, x: i32, y: i32) -> Option<Monitor> {
        let monitors = self.snapshot();
        get_monitor_for_coordinates(x, y, &monitors).cloned()
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.monitors.read().len()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    pub(crate) fn monitor(x_pos: i32, y_pos: i32, width_px: i32, height_px: i32, ppi: f64) -> Monitor {
        Monitor::from_spec(MonitorSpec {
            x_pos,
            y_pos,
            width_px,
            height_px,
            width_in: width_px as f64 / ppi,
            height_in: height_px as f64 / ppi,
            primary: false,
        })
        .expect("valid geometry")
    }

    #[test]
    fn ppi_is_the_mean_of_both_axes() {
        let m = Monitor::from_spec(MonitorSpec {
            x_pos: 0,
            y_pos: 0,
            width_px: 1920,
            height_px: 1080,
            width_in: 20.0,
            height_in: 10.0,
            primary: true,
        })
        .unwrap();
        assert!((m.ppi - (96.0 + 108.0) / 2.0).abs() < 1e-9);
    }

    #[test]
    fn rejects_non_positive_dimensions() {
        let spec = MonitorSpec {
            x_pos: 0,
            y_pos: 0,
            width_px: 1920,
            height_px: 1080,
            width_in: 0.0,
            height_in: 10.0,
            primary: false,
        };
        assert_eq!(Monitor::from_spec(spec), Err(MonitorError::InvalidGeometry(spec)));
        assert_eq!(monitors_from_specs(&[]), Err(MonitorError::NoMonitorsFound));
    }

    #[test]
    fn lookup_uses_half_open_rectangles() {
        let monitors = vec![monitor(0, 0, 1920, 1080, 96.0), monitor(1920, 0, 1920, 1080, 192.0)];
        assert_eq!(get_monitor_for_coordinates(1919, 500, &monitors).unwrap().x_pos, 0);
        assert_eq!(get_monitor_for_coordinates(1920, 500, &monitors).unwrap().x_pos, 1920);
    }

    #[test]
    fn lookup_miss_falls_back_to_primary_then_first() {
        let mut monitors = vec![monitor(0, 0, 1920, 1080, 96.0), monitor(1920, 0, 1920, 1080, 192.0)];
        assert_eq!(get_monitor_for_coordinates(-50, -50, &monitors).unwrap().x_pos, 0);

        monitors[1].primary = true;
        assert_eq!(get_monitor_for_coordinates(-50, -50, &monitors).unwrap().x_pos, 1920);

        assert!(get_monitor_for_coordinates(0, 0, &[]).is_none());
    }

    #[test]
    fn registry_lookup_follows_replacement() {
        let registry = MonitorRegistry::new(vec![monitor(0, 0, 1920, 1080, 96.0)]);
        assert_eq!(registry.monitor_at(5000, 0).unwrap().ppi, 96.0);

        registry.set_monitors(vec![monitor(0, 0, 1920, 1080, 96.0), monitor(1920, 0, 3840, 2160, 192.0)]);
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.monitor_at(5000, 0).unwrap().ppi, 192.0);

        registry.set_monitors(Vec::new());
        assert!(registry.monitor_at(0, 0).is_none());
    }

    #[test]
    fn replace_under_load_never_exposes_a_partial_set() {
        let old_set = || vec![monitor(0, 0, 1920, 1080, 96.0), monitor(1920, 0, 1920, 1080, 96.0)];
        let new_set = || {
            vec![
                monitor(0, 0, 2560, 1440, 192.0),
                monitor(2560, 0, 2560, 1440, 192.0),
                monitor(5120, 0, 2560, 1440, 192.0),
            ]
        };
        let registry = MonitorRegistry::new(old_set());
        let done = AtomicBool::new(false);

        std::thread::scope(|s| {
            let readers: Vec<_> = (0..100)
                .map(|_| {
                    s.spawn(|| {
                        for _ in 0..200 {
                            let set = registry.snapshot();
                            let ppi = set[0].ppi;
                            assert!(set.iter().all(|m| (m.ppi - ppi).abs() < 1e-9));
                            let expected_len = if (ppi - 96.0).abs() < 1e-9 { 2 } else { 3 };
                            assert_eq!(set.len(), expected_len);
                        }
                    })
                })
                .collect();

            s.spawn(|| {
                let mut flip = false;
                while !done.load(Ordering::Relaxed) {
                    registry.set_monitors(if flip { old_set() } else { new_set() });
                    flip = !flip;
                }
            });

            for reader in readers {
                reader.join().unwrap();
            }
            done.store(true, Ordering::Relaxed);
        });
    }
}
