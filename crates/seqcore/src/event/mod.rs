//! The event model (§3, §4.2): a uniform representation of every MIDI action
//! plus the *evinfo* table describing how each command packs/unpacks and
//! what role it plays in a frame.

pub mod conv;
pub mod info;

use bitflags::bitflags;
pub use info::{EventInfo, PhaseSignature, info_of};

bitflags! {
    /// A 3-bit mask marking an event's role in its frame (§3 "Phase").
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Phase: u8 {
        const FIRST = 0b001;
        const NEXT  = 0b010;
        const LAST  = 0b100;
    }
}

/// Command tag. Roughly twenty kinds, matching §3's "Event" data model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    NoteOn,
    NoteOff,
    KeyAftertouch,
    ChannelAftertouch,
    ProgramChange,
    /// A plain 7-bit MIDI controller (0..=127).
    Ctl,
    /// An extended 14-bit controller, reassembled from MSB/LSB pairs.
    Xctl,
    Bend,
    Nrpn,
    Rpn,
    Tempo,
    Timesig,
    /// One of a fixed set of custom sysex "pattern slots" (§4.2): a matching
    /// byte pattern with placeholder positions for v0/v1.
    Sysex,
    Marker,
    EndOfTrack,
    /// A no-op placeholder, e.g. for padding or cancelled events.
    Null,
}

impl Command {
    /// Whether this command carries a device/channel pair (§3 "evinfo").
    pub fn has_dev_chan(self) -> bool {
        info_of(self).has_dev_chan
    }
}

/// A semantic MIDI event: uniform across wire messages, meta events, and
/// sysex pattern slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Event {
    pub cmd: Command,
    /// Device index, `0..MAXNDEVS`. Meaningless (but present) for globals
    /// like [`Command::Tempo`]/[`Command::Timesig`].
    pub dev: u8,
    /// Channel index, `0..16`, where [`Command::has_dev_chan`] is true.
    pub chan: u8,
    /// First value field: note number, controller number, program number,
    /// the sysex slot index, etc.
    pub v0: i32,
    /// Second value field: velocity, controller value, bend amount. For
    /// [`Command::Tempo`] this is the tick-length in 1/24-µs; for
    /// [`Command::Timesig`] it packs beats-per-measure (low byte) and
    /// ticks-per-beat (high byte).
    pub v1: i32,
}

impl Event {
    pub fn new(cmd: Command, dev: u8, chan: u8, v0: i32, v1: i32) -> Self {
        Event {
            cmd,
            dev,
            chan,
            v0,
            v1,
        }
    }

    /// The event's phase, determined solely by its command and values
    /// (§3: "note-off velocity 0 is normalized to note-off").
    pub fn phase(&self) -> Phase {
        match info_of(self.cmd).phase_signature {
            PhaseSignature::Stateless => Phase::FIRST | Phase::LAST,
            PhaseSignature::Framed => match self.cmd {
                Command::NoteOn if self.v1 == 0 => Phase::LAST,
                Command::NoteOn => Phase::FIRST,
                Command::NoteOff => Phase::LAST,
                Command::KeyAftertouch => Phase::NEXT,
                _ => unreachable!("only note-family commands are Framed"),
            },
        }
    }

    /// Normalizes a velocity-0 note-on into an explicit note-off, the way
    /// [`Event::phase`] already treats it for classification purposes.
    pub fn normalized(mut self) -> Self {
        if self.cmd == Command::NoteOn && self.v1 == 0 {
            self.cmd = Command::NoteOff;
        }
        self
    }

    /// The key used by the statelist to match events into frames (§4.4
    /// "lookup"): command plus whichever fields discriminate that command's
    /// frames from each other.
    pub fn key(&self) -> EventKey {
        match self.cmd {
            Command::NoteOn | Command::NoteOff | Command::KeyAftertouch => EventKey {
                cmd: Command::NoteOn,
                dev: self.dev,
                chan: self.chan,
                discriminant: self.v0,
            },
            Command::Ctl | Command::Xctl => EventKey {
                cmd: self.cmd,
                dev: self.dev,
                chan: self.chan,
                discriminant: self.v0,
            },
            Command::Tempo | Command::Timesig => EventKey {
                cmd: self.cmd,
                dev: 0,
                chan: 0,
                discriminant: 0,
            },
            _ => EventKey {
                cmd: self.cmd,
                dev: self.dev,
                chan: self.chan,
                discriminant: 0,
            },
        }
    }
}

/// The lookup key identifying which frame an event belongs to.
///
/// Note-on/note-off/key-aftertouch share a key (keyed on note number) since
/// they're all part of the same note frame; every other voice command is
/// keyed on `(cmd, dev, chan)`, and globals like tempo/timesig collapse to a
/// single process-wide key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EventKey {
    pub cmd: Command,
    pub dev: u8,
    pub chan: u8,
    pub discriminant: i32,
}
