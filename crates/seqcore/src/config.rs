//! Engine-wide constants.
//!
//! The original system loads most of these from a configuration file; that
//! loader is out of scope here (see `SPEC_FULL.md` §1), but the constants it
//! would otherwise set still need a home, so they live here as `const`s with
//! sane defaults instead.

/// Maximum number of devices the engine can register at once.
pub const MAXNDEVS: usize = 16;

/// MIDI clock ticks per quarter note, the canonical sequencer time base.
pub const TICS_PER_UNIT_DEFAULT: u32 = 24;

/// Tick length unit: 1/(24 * 10^6) second, so tempo values round-trip
/// losslessly with the SMF 24-bit microseconds-per-quarter representation.
pub const USEC24_PER_SECOND: u32 = 24_000_000;

/// Default tempo: 120 BPM at 24 ticks per beat.
///
/// `60 * 24_000_000 / (120 * 24) = 500_000`.
pub const DEFAULT_TICLENGTH: u32 = 500_000;

/// Delay, in 1/24-µs units, the internal timer waits after a start request
/// before firing the first tick when no external clock source is attached.
pub const MUX_START_DELAY: u32 = 8_000_000;

/// MTC units per second: the common multiple of 96, 100, 120 (fps * 4),
/// matching every supported quarter-frame rate.
pub const MTC_SEC: u32 = 2400;

/// The period, in MTC units, at which MIDI Time Code wraps (24 hours).
pub const MTC_PERIOD: u64 = 24 * 3600 * MTC_SEC as u64;

/// Default active-sensing output interval, in milliseconds.
pub const SENSING_OUTPUT_MS: u64 = 250;

/// Inbound sensing watchdog: if no byte arrives for this long after sensing
/// was observed, the device is considered lost.
pub const SENSING_INPUT_MS: u64 = 350;

/// Default "next expected quarter-frame is late" timeout for the MTC parser,
/// in milliseconds.
pub const MTC_QUARTER_FRAME_TIMEOUT_MS: u64 = 200;

/// Target resolution of the periodic tick signal driving the I/O driver.
pub const TICK_PERIOD_MS: u64 = 1;

/// Suspend/resume artifact guard: monotonic deltas larger than this are
/// discarded rather than advanced through the timeout wheel.
pub const MAX_SANE_DELTA_MS: u64 = 1_000;
