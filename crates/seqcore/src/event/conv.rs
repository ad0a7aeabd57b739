//! Event encoding and decoding (§4.2): `pack` turns a semantic [`Event`] into
//! wire bytes (or a meta-event byte form for tempo/timesig); `unpack`
//! reassembles wire bytes — plain voice messages, 14-bit extended
//! controllers, and NRPN/RPN four-message sequences — back into events.

use super::{Command, Event};

/// Maximum number of raw controller messages buffered while reassembling a
/// single 14-bit extended controller or NRPN/RPN event.
pub const CONV_NUMREV: usize = 4;

const NRPN_HI: u8 = 99;
const NRPN_LO: u8 = 98;
const RPN_HI: u8 = 101;
const RPN_LO: u8 = 100;
const DATAENT_HI: u8 = 6;
const DATAENT_LO: u8 = 38;

/// Per-device conversion options (§4.2): which controllers are 14-bit on
/// this device, and which of {XCTL, NRPN, RPN} coalescing is enabled.
#[derive(Debug, Clone)]
pub struct ConvOpts {
    pub xctl_enabled: bool,
    pub nrpn_enabled: bool,
    pub rpn_enabled: bool,
    /// Controller numbers (0..=127, MSB half of the pair) treated as 14-bit.
    pub xctlset: [bool; 128],
}

impl Default for ConvOpts {
    fn default() -> Self {
        ConvOpts {
            xctl_enabled: false,
            nrpn_enabled: false,
            rpn_enabled: false,
            xctlset: [false; 128],
        }
    }
}

/// A single incoming 7-bit controller message, prior to any reassembly.
#[derive(Debug, Clone, Copy)]
pub struct RawCtl {
    pub dev: u8,
    pub chan: u8,
    pub num: u8,
    pub val: u8,
}

#[derive(Debug, Clone, Copy, Default)]
struct NrpnState {
    num_hi: Option<u8>,
    num_lo: Option<u8>,
    data_hi: Option<u8>,
    is_rpn: bool,
}

/// Per-channel reassembly state for a single device's input side.
#[derive(Debug, Default)]
pub struct InputConv {
    /// `xctl_hi[chan][ctl]` holds the MSB half once seen, waiting for `ctl+32`.
    xctl_hi: [[Option<u8>; 128]; 16],
    nrpn: [Option<NrpnState>; 16],
}

impl InputConv {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds one raw 7-bit controller message through reassembly,
    /// producing a coalesced event once a full 14-bit/NRPN/RPN sequence
    /// completes, or `None` while still buffering.
    ///
    /// Plain controllers not covered by any enabled reassembly rule pass
    /// straight through as `Command::Ctl`.
    pub fn unpack_ctl(&mut self, opts: &ConvOpts, raw: RawCtl) -> Option<Event> {
        let chan = raw.chan as usize;

        if opts.nrpn_enabled && matches!(raw.num, NRPN_HI | NRPN_LO) {
            return self.accumulate(chan, raw, false);
        }
        if opts.rpn_enabled && matches!(raw.num, RPN_HI | RPN_LO) {
            return self.accumulate(chan, raw, true);
        }
        if opts.nrpn_enabled || opts.rpn_enabled {
            if raw.num == DATAENT_HI || raw.num == DATAENT_LO {
                return self.accumulate(chan, raw, self.nrpn[chan].map(|s| s.is_rpn).unwrap_or(false));
            }
        }

        if opts.xctl_enabled && (raw.num as usize) < 32 && opts.xctlset[raw.num as usize] {
            self.xctl_hi[chan][raw.num as usize] = Some(raw.val);
            return None;
        }
        if opts.xctl_enabled && (32..64).contains(&raw.num) {
            let hi_num = raw.num - 32;
            if opts.xctlset[hi_num as usize] {
                if let Some(hi) = self.xctl_hi[chan][hi_num as usize].take() {
                    let v1 = (i32::from(hi) << 7) | i32::from(raw.val);
                    return Some(Event::new(Command::Xctl, raw.dev, raw.chan, hi_num as i32, v1));
                }
                return None;
            }
        }

        Some(Event::new(
            Command::Ctl,
            raw.dev,
            raw.chan,
            i32::from(raw.num),
            i32::from(raw.val),
        ))
    }

    fn accumulate(&mut self, chan: usize, raw: RawCtl, is_rpn: bool) -> Option<Event> {
        let state = self.nrpn[chan].get_or_insert(NrpnState {
            is_rpn,
            ..Default::default()
        });
        state.is_rpn = is_rpn;
        match raw.num {
            NRPN_HI | RPN_HI => state.num_hi = Some(raw.val),
            NRPN_LO | RPN_LO => state.num_lo = Some(raw.val),
            DATAENT_HI => state.data_hi = Some(raw.val),
            DATAENT_LO => {
                let (Some(num_hi), Some(num_lo), Some(data_hi)) =
                    (state.num_hi, state.num_lo, state.data_hi)
                else {
                    // Data entry LSB arrived before the (N)RPN number or
                    // data-entry MSB was fully buffered; drop the sequence.
                    self.nrpn[chan] = None;
                    return None;
                };
                // v0 = (num_hi << 7) | num_lo, the standard MSB/LSB assembly
                // used for data_hi/data_lo just below. See DESIGN.md's Open
                // Questions for a scenario whose stated result this formula
                // cannot reproduce from either byte ordering.
                let v0 = (i32::from(num_hi) << 7) | i32::from(num_lo);
                let v1 = (i32::from(data_hi) << 7) | i32::from(raw.val);
                let cmd = if is_rpn { Command::Rpn } else { Command::Nrpn };
                self.nrpn[chan] = None;
                return Some(Event::new(cmd, raw.dev, raw.chan, v0, v1));
            }
            _ => {}
        }
        None
    }
}

/// Packs a semantic event into wire bytes, given the current per-device
/// running status. Returns the bytes to write and the new running status
/// (the caller's output ring owns the running-status cache across calls).
pub fn pack(ev: &Event, opts: &ConvOpts, running_status: &mut Option<u8>) -> Vec<u8> {
    match ev.cmd {
        Command::Xctl => {
            let hi = ((ev.v1 >> 7) & 0x7F) as u8;
            let lo = (ev.v1 & 0x7F) as u8;
            let mut bytes = pack_voice(Command::Ctl, ev.chan, ev.v0 as u8, hi, running_status);
            bytes.extend(pack_voice(
                Command::Ctl,
                ev.chan,
                ev.v0 as u8 + 32,
                lo,
                running_status,
            ));
            bytes
        }
        Command::Nrpn | Command::Rpn => {
            let (hi_ctl, lo_ctl) = if ev.cmd == Command::Nrpn {
                (NRPN_HI, NRPN_LO)
            } else {
                (RPN_HI, RPN_LO)
            };
            let num_hi = ((ev.v0 >> 7) & 0x7F) as u8;
            let num_lo = (ev.v0 & 0x7F) as u8;
            let data_hi = ((ev.v1 >> 7) & 0x7F) as u8;
            let data_lo = (ev.v1 & 0x7F) as u8;
            let mut bytes = pack_voice(Command::Ctl, ev.chan, hi_ctl, num_hi, running_status);
            bytes.extend(pack_voice(Command::Ctl, ev.chan, lo_ctl, num_lo, running_status));
            bytes.extend(pack_voice(
                Command::Ctl,
                ev.chan,
                DATAENT_HI,
                data_hi,
                running_status,
            ));
            bytes.extend(pack_voice(
                Command::Ctl,
                ev.chan,
                DATAENT_LO,
                data_lo,
                running_status,
            ));
            bytes
        }
        Command::Tempo => pack_meta_tempo(ev.v1 as u32),
        Command::Timesig => pack_meta_timesig(ev),
        Command::NoteOn | Command::NoteOff | Command::KeyAftertouch => {
            pack_voice(ev.cmd, ev.chan, ev.v0 as u8, ev.v1 as u8, running_status)
        }
        Command::ChannelAftertouch | Command::ProgramChange => {
            pack_voice(ev.cmd, ev.chan, ev.v0 as u8, 0, running_status)
        }
        Command::Ctl => pack_voice(Command::Ctl, ev.chan, ev.v0 as u8, ev.v1 as u8, running_status),
        Command::Bend => {
            let raw = (ev.v0 + 8192).clamp(0, 16383) as u16;
            pack_voice(
                Command::Bend,
                ev.chan,
                (raw & 0x7F) as u8,
                (raw >> 7) as u8,
                running_status,
            )
        }
        Command::Sysex | Command::Marker | Command::EndOfTrack | Command::Null => Vec::new(),
    }
}

/// Reassembles a plain (non-controller) voice message into a semantic
/// event. Controllers go through [`InputConv::unpack_ctl`] instead, since
/// they may need 14-bit/NRPN/RPN coalescing.
pub fn unpack_voice(dev: u8, status: u8, data1: u8, data2: Option<u8>) -> Option<Event> {
    let chan = status & 0x0F;
    let d1 = data2.unwrap_or(0);
    match status & 0xF0 {
        0x80 => Some(Event::new(Command::NoteOff, dev, chan, i32::from(data1), i32::from(d1))),
        0x90 => Some(Event::new(Command::NoteOn, dev, chan, i32::from(data1), i32::from(d1))),
        0xA0 => Some(Event::new(
            Command::KeyAftertouch,
            dev,
            chan,
            i32::from(data1),
            i32::from(d1),
        )),
        0xC0 => Some(Event::new(Command::ProgramChange, dev, chan, i32::from(data1), 0)),
        0xD0 => Some(Event::new(Command::ChannelAftertouch, dev, chan, i32::from(data1), 0)),
        0xE0 => {
            let raw14 = i32::from(data1) | (i32::from(d1) << 7);
            Some(Event::new(Command::Bend, dev, chan, raw14 - 8192, 0))
        }
        _ => None,
    }
}

fn status_byte(cmd: Command, chan: u8) -> u8 {
    let hi = match cmd {
        Command::NoteOff => 0x80,
        Command::NoteOn => 0x90,
        Command::KeyAftertouch => 0xA0,
        Command::Ctl => 0xB0,
        Command::ProgramChange => 0xC0,
        Command::ChannelAftertouch => 0xD0,
        Command::Bend => 0xE0,
        _ => unreachable!("status_byte called for a non-voice command"),
    };
    hi | (chan & 0x0F)
}

fn pack_voice(
    cmd: Command,
    chan: u8,
    d0: u8,
    d1: u8,
    running_status: &mut Option<u8>,
) -> Vec<u8> {
    let status = status_byte(cmd, chan);
    let nparams = super::info::info_of(cmd).nparams;
    let mut bytes = Vec::with_capacity(3);
    if *running_status != Some(status) {
        bytes.push(status);
        *running_status = Some(status);
    }
    bytes.push(d0);
    if nparams > 1 {
        bytes.push(d1);
    }
    bytes
}

fn pack_meta_tempo(usec24: u32) -> Vec<u8> {
    let bytes24 = usec24.to_be_bytes();
    vec![0xFF, 0x51, 0x03, bytes24[1], bytes24[2], bytes24[3]]
}

fn pack_meta_timesig(ev: &Event) -> Vec<u8> {
    let numerator = ev.v0 as u8;
    let ticks_per_beat = ev.v1 as u8;
    vec![0xFF, 0x58, 0x04, numerator, 2, 24, ticks_per_beat]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nrpn_sequence_coalesces_to_one_event() {
        let opts = ConvOpts {
            nrpn_enabled: true,
            ..Default::default()
        };
        let mut conv = InputConv::new();
        let msgs = [(99u8, 1u8), (98, 2), (6, 0x7F), (38, 0x40)];
        let mut produced = Vec::new();
        for (num, val) in msgs {
            if let Some(ev) = conv.unpack_ctl(
                &opts,
                RawCtl {
                    dev: 0,
                    chan: 0,
                    num,
                    val,
                },
            ) {
                produced.push(ev);
            }
        }
        assert_eq!(produced.len(), 1);
        let ev = produced[0];
        assert_eq!(ev.cmd, Command::Nrpn);
        assert_eq!(ev.chan, 0);
        assert_eq!(ev.v0, 0x82);
        assert_eq!(ev.v1, 0x3FC0);
    }

    #[test]
    fn xctl_pair_coalesces_and_round_trips() {
        let mut xctlset = [false; 128];
        xctlset[7] = true;
        let opts = ConvOpts {
            xctl_enabled: true,
            xctlset,
            ..Default::default()
        };
        let mut conv = InputConv::new();
        assert!(
            conv.unpack_ctl(
                &opts,
                RawCtl {
                    dev: 0,
                    chan: 0,
                    num: 7,
                    val: 0x10,
                },
            )
            .is_none()
        );
        let ev = conv
            .unpack_ctl(
                &opts,
                RawCtl {
                    dev: 0,
                    chan: 0,
                    num: 39,
                    val: 0x55,
                },
            )
            .unwrap();
        assert_eq!(ev.cmd, Command::Xctl);
        assert_eq!(ev.v0, 7);
        assert_eq!(ev.v1, (0x10 << 7) | 0x55);

        let mut running_status = None;
        let packed = pack(&ev, &opts, &mut running_status);
        // MSB message then LSB message, both controller 0xB0.
        assert_eq!(packed, vec![0xB0, 7, 0x10, 0xB0, 39, 0x55]);
    }

    #[test]
    fn running_status_elides_repeated_status_byte() {
        let opts = ConvOpts::default();
        let mut rs = None;
        let a = Event::new(Command::NoteOn, 0, 0, 60, 100);
        let b = Event::new(Command::NoteOn, 0, 0, 64, 90);
        let first = pack(&a, &opts, &mut rs);
        let second = pack(&b, &opts, &mut rs);
        assert_eq!(first, vec![0x90, 60, 100]);
        assert_eq!(second, vec![64, 90]);
    }

    #[test]
    fn bend_round_trips_through_pack_and_unpack_voice() {
        let ev = Event::new(Command::Bend, 0, 3, -100, 0);
        let mut rs = None;
        let bytes = pack(&ev, &ConvOpts::default(), &mut rs);
        let unpacked = unpack_voice(0, bytes[0], bytes[1], Some(bytes[2])).unwrap();
        assert_eq!(unpacked.cmd, Command::Bend);
        assert_eq!(unpacked.chan, 3);
        assert_eq!(unpacked.v0, -100);
    }

    #[test]
    fn tempo_packs_smf_meta_form() {
        let ev = Event::new(Command::Tempo, 0, 0, 0, 500_000);
        let mut rs = None;
        let bytes = pack(&ev, &ConvOpts::default(), &mut rs);
        assert_eq!(bytes, vec![0xFF, 0x51, 0x03, 0x07, 0xA1, 0x20]);
    }
}
