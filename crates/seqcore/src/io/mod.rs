//! Platform I/O driver (§5 "Main loop / scheduling").
//!
//! Polls every attached device's descriptors with [`polling`], turns
//! `SIGINT`/`SIGCONT`/`SIGWINCH` into flags via [`signal_hook`] rather than
//! running code in signal-handler context, and converts wall-clock time
//! into the 1/24-µs deltas the rest of the crate runs on.
//!
//! The ordering within one wake matches §5 exactly: poll, then drain
//! devices in registration order, then compute one elapsed delta, then
//! advance the timeout wheel, then the transport, then flush output.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use polling::{Event, Events, PollMode, Poller};
use signal_hook::consts::{SIGCONT, SIGINT, SIGWINCH};
use signal_hook::flag;

use crate::config::{MAX_SANE_DELTA_MS, TICK_PERIOD_MS, USEC24_PER_SECOND};
use crate::engine::Engine;
use crate::error::{Error, Result};
use crate::transport::TickSink;

/// Flags set from signal-handler context; the main loop polls them rather
/// than doing any work inside the handler itself.
pub struct Signals {
    pub interrupted: Arc<AtomicBool>,
    pub resumed: Arc<AtomicBool>,
    pub window_changed: Arc<AtomicBool>,
}

impl Signals {
    pub fn install() -> io::Result<Self> {
        let interrupted = Arc::new(AtomicBool::new(false));
        let resumed = Arc::new(AtomicBool::new(false));
        let window_changed = Arc::new(AtomicBool::new(false));
        flag::register(SIGINT, Arc::clone(&interrupted))?;
        flag::register(SIGCONT, Arc::clone(&resumed))?;
        flag::register(SIGWINCH, Arc::clone(&window_changed))?;
        Ok(Signals {
            interrupted,
            resumed,
            window_changed,
        })
    }

    /// Clears and returns whether SIGCONT fired since the last call. A
    /// caller observing this should discard the next elapsed delta (§5
    /// "suspend/resume artifact guard") since it likely spans a suspend.
    pub fn take_resumed(&self) -> bool {
        self.resumed.swap(false, Ordering::Relaxed)
    }

    pub fn take_window_changed(&self) -> bool {
        self.window_changed.swap(false, Ordering::Relaxed)
    }

    pub fn interrupted(&self) -> bool {
        self.interrupted.load(Ordering::Relaxed)
    }
}

/// Drives an [`Engine`] against real wall-clock time and real device
/// descriptors. Construction registers every currently-attached device's
/// descriptors with the poller; call [`Driver::rebuild`] after attaching or
/// detaching a device.
pub struct Driver {
    poller: Poller,
    events: Events,
    signals: Signals,
    last_wake: Instant,
    just_resumed: bool,
}

impl Driver {
    pub fn new() -> Result<Self> {
        let poller = Poller::new().map_err(|err| Error::fatal(format!("poller init failed: {err}")))?;
        let signals = Signals::install().map_err(|err| Error::fatal(format!("signal install failed: {err}")))?;
        Ok(Driver {
            poller,
            events: Events::new(),
            signals,
            last_wake: Instant::now(),
            just_resumed: false,
        })
    }

    pub fn signals(&self) -> &Signals {
        &self.signals
    }

    /// Re-registers every attached device's descriptors with the poller,
    /// one-shot (§5: each wake re-arms interest after draining a device to
    /// empty, so a busy device can't starve the others).
    ///
    /// # Safety of the underlying `add`
    /// `Poller::add` requires the registered descriptor to stay open and
    /// registered with at most one poller until explicitly deleted. Device
    /// back-ends own their descriptors for their full attached lifetime and
    /// `detach` happens before the next `rebuild`, so that invariant holds.
    pub fn rebuild(&mut self, engine: &Engine) -> Result<()> {
        let mut raw = Vec::new();
        for unit in engine.devices.units_in_order() {
            let Some(device) = engine.devices.get(unit) else {
                continue;
            };
            raw.clear();
            device.backend.fill_descriptors(&mut raw);
            for (slot, &fd) in raw.iter().enumerate() {
                let key = unit * 2 + slot;
                unsafe {
                    self.poller
                        .add_with_mode(fd, Event::all(key), PollMode::Oneshot)
                        .map_err(|err| Error::device(unit, format!("poll registration failed: {err}")))?;
                }
            }
        }
        Ok(())
    }

    /// Blocks up to `TICK_PERIOD_MS`, then returns the elapsed delta in
    /// 1/24-µs, or `None` if the interval should be discarded (§5
    /// "suspend/resume artifact guard": negative or implausibly large
    /// deltas, e.g. after a laptop lid close, are dropped rather than fed
    /// to the timeout wheel or transport).
    pub fn wait_tick(&mut self) -> Result<Option<u32>> {
        self.events.clear();
        let timeout = Duration::from_millis(TICK_PERIOD_MS);
        self.poller
            .wait(&mut self.events, Some(timeout))
            .map_err(|err| Error::fatal(format!("poll wait failed: {err}")))?;

        if self.signals.take_resumed() {
            self.just_resumed = true;
        }

        let now = Instant::now();
        let elapsed = now.saturating_duration_since(self.last_wake);
        self.last_wake = now;

        if self.just_resumed || elapsed > Duration::from_millis(MAX_SANE_DELTA_MS) {
            self.just_resumed = false;
            return Ok(None);
        }

        let usec24 = (elapsed.as_secs_f64() * USEC24_PER_SECOND as f64).round() as u32;
        Ok(Some(usec24))
    }

    /// Runs one full cycle (§5's ordering): poll, drain devices, advance
    /// the timeout wheel and transport, flush output.
    pub fn run_once(&mut self, engine: &mut Engine, sink: &mut dyn TickSink) -> Result<()> {
        let delta = self.wait_tick()?;
        let now_ms = monotonic_ms();
        engine.poll_devices(now_ms)?;
        if let Some(delta_usec24) = delta {
            engine.timeouts.update(delta_usec24);
            engine.advance(delta_usec24, sink);
            engine.tick_sensing(now_ms)?;
        }
        engine.flush_devices()?;
        Ok(())
    }
}

/// Coarse monotonic millisecond clock for sensing watchdogs, seeded once
/// per process (`Instant` has no fixed epoch, so callers needing an
/// absolute-looking millisecond count use elapsed-since-start instead).
fn monotonic_ms() -> u64 {
    use std::sync::OnceLock;
    static START: OnceLock<Instant> = OnceLock::new();
    let start = *START.get_or_init(Instant::now);
    start.elapsed().as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signals_start_clear() {
        let interrupted = Arc::new(AtomicBool::new(false));
        assert!(!interrupted.load(Ordering::Relaxed));
    }

    #[test]
    fn monotonic_ms_is_nondecreasing() {
        let a = monotonic_ms();
        let b = monotonic_ms();
        assert!(b >= a);
    }
}
