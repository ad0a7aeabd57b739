//! Device abstraction (§3 "Device", §4.5 "Event ingress/egress", §6).
//!
//! A [`Device`] owns everything specific to one MIDI port: its incremental
//! [`parser::Parser`], an optional [`mtc::MtcParser`] if it sources time
//! code, a bounded output ring with its own running-status cache, and the
//! per-direction 14-bit/NRPN/RPN conversion options. [`DeviceList`] is the
//! global registry, indexed by unit number.
//!
//! Unlike the seqev/state/timeout records, devices are not pool-allocated:
//! attach/detach is rare (not a per-tick hot path), so a plain
//! `Vec<Option<Device>>` indexed by unit plays the role the original's
//! intrusive singly-linked registry plus `by_unit[MAXNDEVS]` played.

pub mod backend;
pub mod mtc;
pub mod parser;

use std::collections::VecDeque;
use std::fmt;

use bitflags::bitflags;

use crate::config::MAXNDEVS;
use crate::error::{Error, Result};
use crate::event::conv::{self, ConvOpts, InputConv};
use crate::event::Event;

pub use backend::{Backend, ReadyEvents};
pub use parser::ParsedMessage;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct DeviceMode: u8 {
        const IN  = 0b01;
        const OUT = 0b10;
    }
}

/// Bounded output byte buffer plus the running-status cache `conv::pack`
/// consults to elide repeated status bytes.
pub struct OutputRing {
    buf: VecDeque<u8>,
    capacity: usize,
    running_status: Option<u8>,
}

impl fmt::Debug for OutputRing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let contiguous: Vec<u8> = self.buf.iter().copied().collect();
        write!(
            f,
            "OutputRing {{ running_status: {:?}, buf:\n{} }}",
            self.running_status,
            pretty_hex::pretty_hex(&contiguous)
        )
    }
}

impl OutputRing {
    pub fn new(capacity: usize) -> Self {
        OutputRing {
            buf: VecDeque::with_capacity(capacity),
            capacity,
            running_status: None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn push_message(&mut self, unit: usize, bytes: &[u8]) -> Result<()> {
        if self.buf.len() + bytes.len() > self.capacity {
            return Err(Error::device(unit, "output ring overflow"));
        }
        self.buf.extend(bytes);
        Ok(())
    }

    /// Writes as many queued bytes as `backend` accepts, draining them.
    pub fn flush_into(&mut self, backend: &mut dyn Backend) -> Result<usize> {
        let contiguous: Vec<u8> = self.buf.iter().copied().collect();
        if contiguous.is_empty() {
            return Ok(0);
        }
        let written = backend.write(&contiguous)?;
        self.buf.drain(..written);
        Ok(written)
    }
}

pub struct Device {
    /// This device's unit number in its owning `DeviceList`, set by
    /// `DeviceList::attach`. `0` until attached.
    pub unit: usize,
    pub mode: DeviceMode,
    pub backend: Box<dyn Backend>,
    parser: parser::Parser,
    mtc: Option<mtc::MtcParser>,
    output: OutputRing,

    pub in_opts: ConvOpts,
    pub out_opts: ConvOpts,
    input_conv: InputConv,

    pub ticrate: u32,
    pub mux_ticrate: u32,
    pub sendclk: bool,
    pub sendmmc: bool,

    sensing_out_due_ms: Option<u64>,
    sensing_in_deadline_ms: Option<u64>,

    pub failed: bool,
}

impl Device {
    pub fn new(backend: Box<dyn Backend>, mode: DeviceMode, output_capacity: usize) -> Self {
        Device {
            unit: 0,
            mode,
            backend,
            parser: parser::Parser::new(),
            mtc: None,
            output: OutputRing::new(output_capacity),
            in_opts: ConvOpts::default(),
            out_opts: ConvOpts::default(),
            input_conv: InputConv::new(),
            ticrate: crate::config::TICS_PER_UNIT_DEFAULT,
            mux_ticrate: crate::config::TICS_PER_UNIT_DEFAULT,
            sendclk: false,
            sendmmc: false,
            sensing_out_due_ms: None,
            sensing_in_deadline_ms: None,
            failed: false,
        }
    }

    pub fn enable_mtc_source(&mut self, timeout_ms: u64) {
        self.mtc = Some(mtc::MtcParser::new(timeout_ms));
    }

    pub fn mtc(&mut self) -> Option<&mut mtc::MtcParser> {
        self.mtc.as_mut()
    }

    /// Drains whatever bytes are currently available and feeds them through
    /// the parser (via a [`Scanner`](crate::scanner::Scanner) over each
    /// read's slice), returning every complete message produced. Quarter
    /// frames and full-frame sysex are additionally folded into this
    /// device's MTC parser, if one is configured.
    pub fn poll_input(&mut self, now_ms: u64) -> Result<Vec<ParsedMessage>> {
        let mut scratch = [0u8; 256];
        let mut messages = Vec::new();
        loop {
            let n = self.backend.read(&mut scratch)?;
            if n == 0 {
                break;
            }
            let mut scanner = crate::scanner::Scanner::new(&scratch[..n]);
            while let Some(byte) = scanner.eat() {
                if let Some(msg) = self.parser.feed(byte) {
                    match &msg {
                        ParsedMessage::QuarterFrame(data_byte) => {
                            if let Some(mtc) = self.mtc.as_mut() {
                                mtc.on_quarter_frame(*data_byte, now_ms);
                            }
                        }
                        ParsedMessage::Sysex(payload) => {
                            Self::feed_full_frame(&mut self.mtc, payload, now_ms);
                        }
                        _ => {}
                    }
                    messages.push(msg);
                }
            }
            if self.backend.eof() {
                self.failed = true;
                break;
            }
        }
        Ok(messages)
    }

    /// Recognizes a full-frame MTC sysex (`F0 7F <dev-id> 01 01 hr mn sc fr
    /// F7`) and seeds `mtc`'s baseline from it. Any other sysex payload, or
    /// no MTC parser configured at all, is a no-op.
    fn feed_full_frame(mtc: &mut Option<mtc::MtcParser>, payload: &[u8], now_ms: u64) {
        let Some(mtc) = mtc.as_mut() else { return };
        let mut scanner = crate::scanner::Scanner::new(payload);
        if scanner.eat() != Some(0x7F) {
            return;
        }
        if scanner.eat().is_none() {
            return; // device ID byte, value not needed here
        }
        if scanner.eat_array::<2>() != Some([0x01, 0x01]) {
            return;
        }
        let Some([hr_byte, minutes, seconds, frames]) = scanner.eat_array::<4>() else {
            return;
        };
        let hours = hr_byte & 0x1F;
        let fps_code = (hr_byte >> 5) & 0x3;
        mtc.on_full_frame(hours, minutes, seconds, frames, fps_code, now_ms);
    }

    /// Reassembles a parsed voice message into a semantic [`Event`] via
    /// `conv::unpack_ctl`, folding in 14-bit/NRPN/RPN state (§4.2).
    pub fn unpack(&mut self, dev: u8, status: u8, data1: u8, data2: Option<u8>) -> Option<Event> {
        let chan = status & 0x0F;
        match status & 0xF0 {
            0xB0 => self.input_conv.unpack_ctl(
                &self.in_opts,
                conv::RawCtl {
                    dev,
                    chan,
                    num: data1,
                    val: data2.unwrap_or(0),
                },
            ),
            _ => conv::unpack_voice(dev, status, data1, data2),
        }
    }

    /// Packs `ev` and queues the resulting bytes for output.
    pub fn send(&mut self, ev: &Event) -> Result<()> {
        let bytes = conv::pack(ev, &self.out_opts, &mut self.output.running_status);
        if !bytes.is_empty() {
            self.output.push_message(self.unit, &bytes)?;
        }
        Ok(())
    }

    pub fn flush(&mut self) -> Result<usize> {
        self.output.flush_into(self.backend.as_mut())
    }

    /// Queues a single MIDI-clock byte (0xF8), used by the transport's
    /// clock broadcast (§4.5 "Tick effect").
    pub fn queue_clock_tick(&mut self) -> Result<()> {
        self.output.push_message(self.unit, &[0xF8])
    }

    /// Emits active sensing (0xFE) if `sensing_out_due_ms` has elapsed since
    /// the last output, and restarts the timer.
    pub fn maybe_send_sensing(&mut self, now_ms: u64, interval_ms: u64) -> Result<()> {
        let due = *self.sensing_out_due_ms.get_or_insert(now_ms + interval_ms);
        if now_ms >= due {
            self.output.push_message(self.unit, &[0xFE])?;
            self.sensing_out_due_ms = Some(now_ms + interval_ms);
        }
        Ok(())
    }

    /// Call on every received byte: restarts the inbound sensing watchdog.
    /// Returns `true` if the watchdog had already expired (device lost).
    pub fn note_input_activity(&mut self, now_ms: u64, watchdog_ms: u64) {
        self.sensing_in_deadline_ms = Some(now_ms + watchdog_ms);
    }

    pub fn sensing_expired(&self, now_ms: u64) -> bool {
        matches!(self.sensing_in_deadline_ms, Some(deadline) if now_ms > deadline)
    }
}

pub struct DeviceList {
    slots: Vec<Option<Device>>,
    order: Vec<usize>,
    clock_source: Option<usize>,
    mtc_source: Option<usize>,
}

impl DeviceList {
    pub fn new() -> Self {
        let mut slots = Vec::with_capacity(MAXNDEVS);
        slots.resize_with(MAXNDEVS, || None);
        DeviceList {
            slots,
            order: Vec::new(),
            clock_source: None,
            mtc_source: None,
        }
    }

    pub fn attach(&mut self, unit: usize, mut device: Device) -> Result<()> {
        if unit >= MAXNDEVS {
            return Err(Error::fatal("device unit out of range"));
        }
        if self.slots[unit].is_some() {
            return Err(Error::device(unit, "unit already attached"));
        }
        device.unit = unit;
        self.slots[unit] = Some(device);
        self.order.push(unit);
        Ok(())
    }

    pub fn detach(&mut self, unit: usize) -> Option<Device> {
        self.order.retain(|&u| u != unit);
        if self.clock_source == Some(unit) {
            self.clock_source = None;
        }
        if self.mtc_source == Some(unit) {
            self.mtc_source = None;
        }
        self.slots.get_mut(unit).and_then(Option::take)
    }

    pub fn get(&self, unit: usize) -> Option<&Device> {
        self.slots.get(unit)?.as_ref()
    }

    pub fn get_mut(&mut self, unit: usize) -> Option<&mut Device> {
        self.slots.get_mut(unit)?.as_mut()
    }

    /// Units in registration order, mirroring the ordering guarantee in §5:
    /// "device input is drained in list order".
    pub fn units_in_order(&self) -> impl Iterator<Item = usize> + '_ {
        self.order.iter().copied()
    }

    pub fn set_clock_source(&mut self, unit: usize) -> Result<()> {
        if self.slots[unit].is_none() {
            return Err(Error::device(unit, "cannot source clock from an unattached unit"));
        }
        self.clock_source = Some(unit);
        Ok(())
    }

    pub fn clock_source(&self) -> Option<usize> {
        self.clock_source
    }

    pub fn set_mtc_source(&mut self, unit: usize) -> Result<()> {
        if self.slots[unit].is_none() {
            return Err(Error::device(unit, "cannot source MTC from an unattached unit"));
        }
        self.mtc_source = Some(unit);
        Ok(())
    }

    pub fn mtc_source(&self) -> Option<usize> {
        self.mtc_source
    }
}

impl Default for DeviceList {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::Command;

    struct NullBackend {
        eof: bool,
    }

    impl Backend for NullBackend {
        fn open(&mut self) -> Result<()> {
            Ok(())
        }
        fn close(&mut self) {}
        fn read(&mut self, _buf: &mut [u8]) -> Result<usize> {
            Ok(0)
        }
        fn write(&mut self, buf: &[u8]) -> Result<usize> {
            Ok(buf.len())
        }
        fn descriptor_count(&self) -> usize {
            0
        }
        fn fill_descriptors(&self, _out: &mut Vec<backend::RawDescriptor>) {}
        fn poll_events(&self, _ready: &[backend::RawDescriptor]) -> ReadyEvents {
            ReadyEvents::default()
        }
        fn eof(&self) -> bool {
            self.eof
        }
    }

    #[test]
    fn attach_and_detach_round_trip() {
        let mut list = DeviceList::new();
        let dev = Device::new(Box::new(NullBackend { eof: false }), DeviceMode::IN | DeviceMode::OUT, 64);
        list.attach(0, dev).unwrap();
        assert!(list.get(0).is_some());
        assert_eq!(list.units_in_order().collect::<Vec<_>>(), vec![0]);

        list.detach(0);
        assert!(list.get(0).is_none());
        assert!(list.units_in_order().collect::<Vec<_>>().is_empty());
    }

    #[test]
    fn at_most_one_clock_source() {
        let mut list = DeviceList::new();
        list.attach(0, Device::new(Box::new(NullBackend { eof: false }), DeviceMode::OUT, 64))
            .unwrap();
        list.attach(1, Device::new(Box::new(NullBackend { eof: false }), DeviceMode::OUT, 64))
            .unwrap();
        list.set_clock_source(0).unwrap();
        assert_eq!(list.clock_source(), Some(0));
        list.set_clock_source(1).unwrap();
        assert_eq!(list.clock_source(), Some(1));
    }

    #[test]
    fn failed_device_is_isolated() {
        let mut dev = Device::new(Box::new(NullBackend { eof: true }), DeviceMode::IN, 64);
        dev.poll_input(0).unwrap();
        assert!(dev.failed);
    }

    #[test]
    fn attach_stamps_the_device_with_its_unit() {
        let mut list = DeviceList::new();
        list.attach(2, Device::new(Box::new(NullBackend { eof: false }), DeviceMode::OUT, 64))
            .unwrap();
        assert_eq!(list.get(2).unwrap().unit, 2);
    }

    #[test]
    fn overflow_error_names_the_overflowing_unit() {
        let mut list = DeviceList::new();
        list.attach(3, Device::new(Box::new(NullBackend { eof: false }), DeviceMode::OUT, 1))
            .unwrap();
        let dev = list.get_mut(3).unwrap();
        let err = dev.send(&Event::new(Command::Ctl, 3, 0, 7, 99)).unwrap_err();
        assert!(err.to_string().contains('3'), "error must name unit 3, got: {err}");
    }
}
