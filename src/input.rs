use anyhow::{anyhow, Context, Result};
use device_query::{DeviceQuery, DeviceState, Keycode, MouseState};
use futures::channel::mpsc::{self, UnboundedSender};
use futures::stream::BoxStream;
use futures::StreamExt;
use std::sync::mpsc::{sync_channel, Receiver, RecvTimeoutError};
use std::thread;
use std::time::Duration;

/// How long a hook thread gets to report a failed start. `rdev::listen`
/// never signals success, so silence past this point counts as running.
const HOOK_STARTUP_GRACE: Duration = Duration::from_millis(500);

use crate::config::{InputBackend, InputConfig};

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum InputEvent {
    KeyDown,
    MouseDown,
    MouseMove { x: i32, y: i32 },
    /// Signed wheel rotation as reported by the platform.
    Wheel { rotation: f64 },
}

/// Anything that can produce the global stream of input events.
pub trait InputEventSource {
    /// Starts producing events. The stream ends only if the underlying
    /// subsystem stops.
    fn subscribe(self: Box<Self>) -> Result<BoxStream<'static, InputEvent>>;
}

pub fn source_for(config: &InputConfig) -> Box<dyn InputEventSource> {
    match config.backend {
        InputBackend::Hook => Box::new(HookSource),
        InputBackend::Poll => Box::new(PollingSource {
            interval: Duration::from_millis(config.poll_interval_ms),
        }),
    }
}

/// Waits for an input thread to report how its startup went.
fn await_startup(ready: Receiver<Result<(), String>>, grace: Duration) -> Result<()> {
    match ready.recv_timeout(grace) {
        Ok(Ok(())) | Err(RecvTimeoutError::Timeout) => Ok(()),
        Ok(Err(e)) => Err(anyhow!(e)),
        Err(RecvTimeoutError::Disconnected) => Err(anyhow!("input thread exited during startup")),
    }
}

/// Global hook based on `rdev::listen`, which blocks its thread forever.
pub struct HookSource;

impl HookSource {
    fn translate(event_type: &rdev::EventType) -> Option<InputEvent> {
        match *event_type {
            rdev::EventType::KeyPress(_) => Some(InputEvent::KeyDown),
            rdev::EventType::ButtonPress(_) => Some(InputEvent::MouseDown),
            rdev::EventType::MouseMove { x, y } => Some(InputEvent::MouseMove {
                x: x.round() as i32,
                y: y.round() as i32,
            }),
            rdev::EventType::Wheel { delta_x, delta_y } => {
                let rotation = if delta_y != 0 { delta_y } else { delta_x };
                Some(InputEvent::Wheel {
                    rotation: rotation as f64,
                })
            }
            _ => None,
        }
    }
}

impl InputEventSource for HookSource {
    fn subscribe(self: Box<Self>) -> Result<BoxStream<'static, InputEvent>> {
        let (tx, rx) = mpsc::unbounded();
        let (ready_tx, ready_rx) = sync_channel(1);

        thread::Builder::new()
            .name("input-hook".to_string())
            .spawn(move || {
                log::info!("Input hook listening");
                let result = rdev::listen(move |event| {
                    if let Some(input) = HookSource::translate(&event.event_type) {
                        // Receiver gone means the process is shutting down.
                        let _ = tx.unbounded_send(input);
                    }
                });
                if let Err(e) = result {
                    log::error!("Input hook stopped: {:?}", e);
                    let _ = ready_tx.send(Err(format!("{:?}", e)));
                }
            })
            .context("Failed to spawn input hook thread")?;

        await_startup(ready_rx, HOOK_STARTUP_GRACE).context("Failed to start input hook")?;
        Ok(rx.boxed())
    }
}

/// Samples keyboard and mouse state at a fixed interval and reports the
/// transitions. Wheel movement is not observable this way.
pub struct PollingSource {
    pub interval: Duration,
}

#[derive(Default)]
struct PollState {
    keys: Vec<Keycode>,
    mouse: Option<MouseState>,
}

impl PollState {
    fn diff(&mut self, keys: Vec<Keycode>, mouse: MouseState, tx: &UnboundedSender<InputEvent>) -> bool {
        let mut events = Vec::new();

        events.extend(
            keys.iter()
                .filter(|k| !self.keys.contains(k))
                .map(|_| InputEvent::KeyDown),
        );

        match &self.mouse {
            Some(last) => {
                let newly_pressed = mouse
                    .button_pressed
                    .iter()
                    .enumerate()
                    .filter(|(i, pressed)| **pressed && !last.button_pressed.get(*i).copied().unwrap_or(false))
                    .count();
                events.extend((0..newly_pressed).map(|_| InputEvent::MouseDown));

                if last.coords != mouse.coords {
                    events.push(InputEvent::MouseMove {
                        x: mouse.coords.0,
                        y: mouse.coords.1,
                    });
                }
            }
            None => events.push(InputEvent::MouseMove {
                x: mouse.coords.0,
                y: mouse.coords.1,
            }),
        }

        self.keys = keys;
        self.mouse = Some(mouse);

        events.into_iter().all(|event| tx.unbounded_send(event).is_ok())
    }
}

impl InputEventSource for PollingSource {
    fn subscribe(self: Box<Self>) -> Result<BoxStream<'static, InputEvent>> {
        let (tx, rx) = mpsc::unbounded();
        let (ready_tx, ready_rx) = sync_channel(1);
        let interval = self.interval;

        thread::Builder::new()
            .name("input-poll".to_string())
            .spawn(move || {
                // device_query panics when it cannot open the input devices.
                let device_state = match std::panic::catch_unwind(DeviceState::new) {
                    Ok(device_state) => device_state,
                    Err(_) => {
                        let _ = ready_tx.send(Err("could not open input devices".to_string()));
                        return;
                    }
                };
                let _ = ready_tx.send(Ok(()));
                log::info!("Polling input devices every {:?}", interval);
                let mut state = PollState::default();
                loop {
                    if !state.diff(device_state.get_keys(), device_state.get_mouse(), &tx) {
                        break;
                    }
                    thread::sleep(interval);
                }
            })
            .context("Failed to spawn input polling thread")?;

        await_startup(ready_rx, Duration::MAX).context("Failed to start input polling")?;
        Ok(rx.boxed())
    }
}

/// Replays a fixed list of events, then ends.
#[cfg(test)]
pub struct ScriptedSource(pub Vec<InputEvent>);

#[cfg(test)]
impl InputEventSource for ScriptedSource {
    fn subscribe(self: Box<Self>) -> Result<BoxStream<'static, InputEvent>> {
        Ok(futures::stream::iter(self.0).boxed())
    }
}

/// A source whose backend refuses to start.
#[cfg(test)]
pub struct FailingSource;

#[cfg(test)]
impl InputEventSource for FailingSource {
    fn subscribe(self: Box<Self>) -> Result<BoxStream<'static, InputEvent>> {
        let (ready_tx, ready_rx) = sync_channel(1);
        thread::spawn(move || {
            let _ = ready_tx.send(Err("MissingDisplayError".to_string()));
        });
        await_startup(ready_rx, Duration::from_secs(5)).context("Failed to start input hook")?;
        Ok(futures::stream::empty().boxed())
    }
}
