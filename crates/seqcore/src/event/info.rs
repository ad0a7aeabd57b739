//! The *evinfo* table (§3, §4.2): per-command metadata describing parameter
//! count, whether the command carries a device/channel, and its phase
//! signature.

use super::Command;

/// Which phase-transition shape a command follows (§3 "Phase").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhaseSignature {
    /// `{FIRST, NEXT*, LAST}` — only the note-on/note-off/key-aftertouch
    /// family: a held note opens on note-on, continues over any number of
    /// key-aftertouch messages, and closes on note-off.
    Framed,
    /// `{FIRST+LAST}` — every other command. These are either genuinely
    /// one-shot (program change, tempo) or a continuously-updated value
    /// that nonetheless has no separate "continue" message of its own
    /// (a 7-bit controller's every message is a complete FIRST+LAST).
    Stateless,
}

#[derive(Debug, Clone, Copy)]
pub struct EventInfo {
    /// Number of semantically meaningful value fields (0, 1, or 2).
    pub nparams: u8,
    /// Whether the command carries a device/channel pair.
    pub has_dev_chan: bool,
    pub phase_signature: PhaseSignature,
}

const fn voice(nparams: u8, phase_signature: PhaseSignature) -> EventInfo {
    EventInfo {
        nparams,
        has_dev_chan: true,
        phase_signature,
    }
}

const fn global(nparams: u8) -> EventInfo {
    EventInfo {
        nparams,
        has_dev_chan: false,
        phase_signature: PhaseSignature::Stateless,
    }
}

/// Looks up the evinfo record for `cmd`.
pub fn info_of(cmd: Command) -> EventInfo {
    use Command::*;
    use PhaseSignature::*;
    match cmd {
        NoteOn => voice(2, Framed),
        NoteOff => voice(2, Framed),
        KeyAftertouch => voice(2, Framed),
        ChannelAftertouch => voice(1, Stateless),
        ProgramChange => voice(1, Stateless),
        Ctl => voice(2, Stateless),
        Xctl => voice(2, Stateless),
        Bend => voice(1, Stateless),
        Nrpn => voice(2, Stateless),
        Rpn => voice(2, Stateless),
        Tempo => global(1),
        Timesig => global(2),
        Sysex => voice(2, Stateless),
        Marker => global(1),
        EndOfTrack => global(0),
        Null => global(0),
    }
}
