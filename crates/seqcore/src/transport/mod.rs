//! Transport / mux phase machine (§3 "Transport", §4.5).
//!
//! The heart of synchronization: a phase state machine that arbitrates
//! between an external MIDI clock source, an MTC source, and the internal
//! timer to produce one authoritative tick stream, plus the ingress/egress
//! paths that route events through the statelists.

use bitflags::bitflags;

use crate::config::{DEFAULT_TICLENGTH, MUX_START_DELAY, TICS_PER_UNIT_DEFAULT};
use crate::device::{Device, DeviceList};
use crate::event::{Command, Event};
use crate::state::Statelist;

bitflags! {
    /// `Phase` here tags the *transport's* run state (distinct from
    /// [`crate::event::Phase`], which tags an event's role in its frame).
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct RunPhase: u8 {
        const STOP      = 0b00001;
        const STARTWAIT = 0b00010;
        const START     = 0b00100;
        const FIRST_TIC = 0b01000;
        const NEXT_TIC  = 0b10000;
    }
}

/// A collaborator invoked on every fired tick to advance playback cursors
/// (out of scope here: the song/sequencer layer owns the implementation).
pub trait TickSink {
    fn song_movecb(&mut self, curtic: u32);
    fn song_startcb(&mut self, curtic: u32);
}

pub struct NullTickSink;

impl TickSink for NullTickSink {
    fn song_movecb(&mut self, _curtic: u32) {}
    fn song_startcb(&mut self, _curtic: u32) {}
}

pub struct Transport {
    pub phase: RunPhase,
    requested_phase: RunPhase,

    /// Tick length in 1/24-µs (the tempo).
    pub ticlength: u32,
    pub ticrate: u32,
    pub curtic: u32,

    /// Position accumulator and next-tick threshold, both in 1/24-µs.
    curpos: u32,
    nextpos: u32,

    /// Elapsed time since `start_request`, while waiting for the internal
    /// timer to fire the first tick (no external clock source).
    start_elapsed: u32,

    pub input: Statelist,
    pub output: Statelist,
}

impl Transport {
    pub fn new(statelist_capacity: usize) -> Self {
        Transport {
            phase: RunPhase::STOP,
            requested_phase: RunPhase::STOP,
            ticlength: DEFAULT_TICLENGTH,
            ticrate: TICS_PER_UNIT_DEFAULT,
            curtic: 0,
            curpos: 0,
            nextpos: DEFAULT_TICLENGTH,
            start_elapsed: 0,
            input: Statelist::new(statelist_capacity),
            output: Statelist::new(statelist_capacity),
        }
    }

    pub fn start_request(&mut self) {
        self.requested_phase = RunPhase::START;
        if self.phase == RunPhase::STOP {
            self.phase = RunPhase::STARTWAIT;
            self.start_elapsed = 0;
        }
    }

    /// The phase last requested by a collaborator, independent of where the
    /// state machine has actually gotten to (e.g. still `STARTWAIT` while
    /// `requested_phase` already reads `START`).
    pub fn requested_phase(&self) -> RunPhase {
        self.requested_phase
    }

    /// `STARTWAIT -> START` on receiving MIDI start from a clock source, or
    /// immediately if there is none.
    pub fn on_midi_start(&mut self, has_clock_source: bool) {
        if self.phase == RunPhase::STARTWAIT && has_clock_source {
            self.phase = RunPhase::START;
        }
    }

    pub fn on_midi_stop(&mut self) {
        if self.is_running() {
            self.stop_request();
        }
    }

    pub fn stop_request(&mut self) {
        self.phase = RunPhase::STOP;
        self.requested_phase = RunPhase::STOP;
        self.curpos = 0;
        self.nextpos = self.ticlength;
    }

    /// Changes tempo. While running, `nextpos` is nudged by the delta so
    /// the in-progress tick's timing drifts smoothly (§4.5 "Tempo change").
    pub fn set_ticlength(&mut self, new_ticlength: u32) {
        if self.is_running() {
            self.nextpos = self.nextpos.wrapping_add(new_ticlength.wrapping_sub(self.ticlength));
        }
        self.ticlength = new_ticlength;
    }

    /// Any phase at or past `START` (§4.5's state diagram: "any >= START").
    fn is_running(&self) -> bool {
        matches!(self.phase, RunPhase::START | RunPhase::FIRST_TIC | RunPhase::NEXT_TIC)
    }

    /// Drives the transport with a monotonic delta in 1/24-µs, when no
    /// external clock or MTC source is attached (§4.5 "tick arbitration",
    /// third branch). Returns the number of ticks that fired.
    pub fn advance_internal(&mut self, delta_usec24: u32) -> u32 {
        match self.phase {
            // STARTWAIT and START share one accumulator and one threshold:
            // crossing MUX_START_DELAY fires the first tick in the same call
            // that crosses it, regardless of which of the two phases we were
            // in when this call started.
            RunPhase::STARTWAIT | RunPhase::START => {
                self.start_elapsed = self.start_elapsed.wrapping_add(delta_usec24);
                if self.start_elapsed < MUX_START_DELAY {
                    return 0;
                }
                self.phase = RunPhase::FIRST_TIC;
                self.curpos = 0;
                self.nextpos = self.ticlength;
                1
            }
            RunPhase::FIRST_TIC | RunPhase::NEXT_TIC => {
                self.curpos = self.curpos.wrapping_add(delta_usec24);
                let mut fired = 0;
                while self.curpos >= self.nextpos {
                    self.nextpos = self.nextpos.wrapping_add(self.ticlength);
                    fired += 1;
                }
                if fired > 0 {
                    self.phase = RunPhase::NEXT_TIC;
                }
                fired
            }
            RunPhase::STOP => 0,
            _ => 0,
        }
    }

    /// Applies a single tick's effect (§4.5 "Tick effect"): advances
    /// `curtic`, broadcasts MIDI clock to `sendclk` devices honoring each
    /// one's tick-rate ratio, and calls the appropriate collaborator hook.
    pub fn fire_tick(&mut self, devices: &mut DeviceList, clock_source: Option<usize>, sink: &mut dyn TickSink) {
        let is_first = self.curtic == 0;
        self.curtic = self.curtic.wrapping_add(1);

        for unit in devices.units_in_order().collect::<Vec<_>>() {
            if Some(unit) == clock_source {
                continue;
            }
            if let Some(dev) = devices.get_mut(unit) {
                if !dev.sendclk {
                    continue;
                }
                send_clock_bytes(dev, self.ticrate);
            }
        }

        if is_first {
            sink.song_startcb(self.curtic);
        } else {
            sink.song_movecb(self.curtic);
        }
    }

    /// Event ingress (§4.5): feeds an already-unpacked event into the input
    /// statelist so downstream consumers can query current state.
    pub fn ingest(&mut self, ev: Event) {
        self.input.update(ev);
    }

    /// Event egress (§4.5 "putev"): asserts `ev` is voice-like, updates the
    /// output state (for running-status/14-bit awareness downstream), and
    /// hands it to `device` for packing and queuing.
    pub fn putev(&mut self, ev: Event, device: &mut Device) -> crate::error::Result<()> {
        debug_assert!(ev.cmd.has_dev_chan() || matches!(ev.cmd, Command::Tempo | Command::Timesig));
        self.output.update(ev);
        device.send(&ev)
    }
}

/// Emits one MIDI-clock byte per `ticrate`-scaled unit of `mux_ticrate`
/// (§4.5, §9 Open Question (b)): `ticdelta` accumulates by `mux_ticrate`
/// *after* each emission, so a device whose `ticrate` is a multiple of
/// `mux_ticrate` can emit more than one clock byte per mux tick.
fn send_clock_bytes(dev: &mut Device, mux_ticrate: u32) {
    // `ticdelta` is folded into a derived quantity here rather than a
    // persistent field: each mux tick always contributes exactly
    // `mux_ticrate`, so the number of clock bytes due is a pure function of
    // the device's own `ticrate`. The loop still increments *after*
    // emitting, preserving the original's ordering (§9 Open Question b).
    let mut ticdelta = 0u32;
    loop {
        ticdelta += mux_ticrate;
        if ticdelta < dev.ticrate {
            break;
        }
        if let Err(err) = dev.queue_clock_tick() {
            log::warn!("dropping MIDI clock byte: {err}");
            break;
        }
        ticdelta -= dev.ticrate;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tempo_wrap_fires_first_tick_after_mux_start_delay() {
        let mut t = Transport::new(8);
        t.start_request();
        assert_eq!(t.phase, RunPhase::STARTWAIT);

        // No external clock: advance_internal drives STARTWAIT -> START ->
        // FIRST_TIC once MUX_START_DELAY elapses.
        let step = 1_000_000;
        let mut total_fired = 0;
        for _ in 0..8 {
            total_fired += t.advance_internal(step);
        }
        assert_eq!(t.phase, RunPhase::FIRST_TIC);
        assert_eq!(total_fired, 1);

        // Subsequent ticks fire every `ticlength` units.
        let fired = t.advance_internal(t.ticlength);
        assert_eq!(fired, 1);
        assert_eq!(t.phase, RunPhase::NEXT_TIC);
    }

    #[test]
    fn stop_request_resets_position() {
        let mut t = Transport::new(8);
        t.start_request();
        for _ in 0..10 {
            t.advance_internal(1_000_000);
        }
        t.stop_request();
        assert_eq!(t.phase, RunPhase::STOP);
    }

    #[test]
    fn set_ticlength_nudges_nextpos_while_running() {
        let mut t = Transport::new(8);
        t.start_request();
        for _ in 0..8 {
            t.advance_internal(1_000_000);
        }
        assert_eq!(t.phase, RunPhase::FIRST_TIC);
        let before = t.nextpos;
        t.set_ticlength(600_000);
        assert_eq!(t.nextpos, before + 100_000);
    }
}
