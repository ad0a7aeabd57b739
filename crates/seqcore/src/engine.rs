//! The engine context (§9 Design Notes: "replace process-wide globals with
//! a context struct threaded by `&mut` reference").
//!
//! [`Engine`] owns every piece of mutable state this crate manages — the
//! device registry, the transport/mux phase machine, and the timeout wheel
//! — and is the single handle the platform I/O driver in [`crate::io`]
//! drives on each wake. Nothing here is global or thread-shared; the whole
//! crate is built to run on one thread with one `Engine` alive at a time.

use crate::config::{MAXNDEVS, SENSING_INPUT_MS, SENSING_OUTPUT_MS};
use crate::device::{Device, DeviceList, ParsedMessage};
use crate::error::Result;
use crate::event::Event;
use crate::filter::Chain;
use crate::timeout::TimeoutWheel;
use crate::transport::{NullTickSink, TickSink, Transport};

/// Default statelist capacity: generous enough for every note/controller on
/// every channel of every device to be open simultaneously.
const STATELIST_CAPACITY: usize = 16 * 16 * MAXNDEVS;

/// Default timeout wheel capacity: sensing timers for every device plus
/// headroom for song-level timers the sequencer layer schedules.
const TIMEOUT_CAPACITY: usize = MAXNDEVS * 4;

pub struct Engine {
    pub devices: DeviceList,
    pub transport: Transport,
    pub timeouts: TimeoutWheel,
    /// Per-device input filter chains, indexed by unit.
    pub input_filters: Vec<Chain>,
    /// Per-device output filter chains, indexed by unit.
    pub output_filters: Vec<Chain>,
}

impl Engine {
    pub fn new() -> Self {
        Engine {
            devices: DeviceList::new(),
            transport: Transport::new(STATELIST_CAPACITY),
            timeouts: TimeoutWheel::new(TIMEOUT_CAPACITY),
            input_filters: (0..MAXNDEVS).map(|_| Chain::default()).collect(),
            output_filters: (0..MAXNDEVS).map(|_| Chain::default()).collect(),
        }
    }

    /// Drains and unpacks input from every attached device, in registration
    /// order (§5), running each resulting event through that device's
    /// input filter chain and the transport's ingress statelist. `now_ms`
    /// rearms each device's inbound sensing watchdog on any byte received.
    pub fn poll_devices(&mut self, now_ms: u64) -> Result<Vec<Event>> {
        let mut ingested = Vec::new();
        let mut newly_failed = Vec::new();
        for unit in self.devices.units_in_order().collect::<Vec<_>>() {
            let Some(device) = self.devices.get_mut(unit) else {
                continue;
            };
            let was_failed = device.failed;
            let messages = device.poll_input(now_ms)?;
            if !messages.is_empty() {
                device.note_input_activity(now_ms, SENSING_INPUT_MS);
            }
            for msg in messages {
                let ParsedMessage::Voice { status, data1, data2 } = msg else {
                    continue;
                };
                let Some(ev) = device.unpack(unit as u8, status, data1, data2) else {
                    continue;
                };
                let Some(ev) = self.input_filters[unit].run(ev) else {
                    continue;
                };
                self.transport.ingest(ev);
                ingested.push(ev);
            }
            if !was_failed && device.failed {
                newly_failed.push(unit);
            }
        }
        for unit in newly_failed {
            self.fail_device(unit)?;
        }
        Ok(ingested)
    }

    /// Marks `unit` failed (idempotent) and broadcasts "all notes off" /
    /// "reset all controllers" for its live output state (§7 "device failure
    /// recovery"), implemented via [`Statelist::cancel_device`] over the
    /// transport's egress statelist, attempting one last flush to the device
    /// before it goes quiet.
    ///
    /// [`Statelist::cancel_device`]: crate::state::Statelist::cancel_device
    pub fn fail_device(&mut self, unit: usize) -> Result<()> {
        let cancels = self.transport.output.cancel_device(unit as u8);
        if let Some(device) = self.devices.get_mut(unit) {
            device.failed = true;
            for ev in cancels {
                device.send(&ev)?;
            }
            device.flush()?;
        }
        Ok(())
    }

    /// Runs `ev` through `unit`'s output filter chain and, if it survives,
    /// hands it to the transport's egress path.
    pub fn send_to(&mut self, unit: usize, ev: Event) -> Result<()> {
        let Some(ev) = self.output_filters[unit].run(ev) else {
            return Ok(());
        };
        if let Some(device) = self.devices.get_mut(unit) {
            self.transport.putev(ev, device)?;
        }
        Ok(())
    }

    /// Flushes every attached device's output ring to its back-end.
    pub fn flush_devices(&mut self) -> Result<()> {
        for unit in self.devices.units_in_order().collect::<Vec<_>>() {
            if let Some(device) = self.devices.get_mut(unit) {
                device.flush()?;
            }
        }
        Ok(())
    }

    /// One I/O-driver cycle's worth of book-keeping: sensing output/input
    /// watchdogs for every attached device (§4.5, §3 "Device"). A device
    /// whose inbound watchdog just expired is failed via [`Engine::fail_device`].
    pub fn tick_sensing(&mut self, now_ms: u64) -> Result<()> {
        let mut newly_failed = Vec::new();
        for unit in self.devices.units_in_order().collect::<Vec<_>>() {
            if let Some(device) = self.devices.get_mut(unit) {
                let was_failed = device.failed;
                let _ = device.maybe_send_sensing(now_ms, SENSING_OUTPUT_MS);
                if device.sensing_expired(now_ms) {
                    device.failed = true;
                }
                if !was_failed && device.failed {
                    newly_failed.push(unit);
                }
            }
        }
        for unit in newly_failed {
            self.fail_device(unit)?;
        }
        Ok(())
    }

    /// Advances the transport's internal timer by `delta_usec24` and fires
    /// whatever ticks come due, using `sink` for playback-cursor callbacks.
    pub fn advance(&mut self, delta_usec24: u32, sink: &mut dyn TickSink) {
        let fired = self.transport.advance_internal(delta_usec24);
        let clock_source = self.devices.clock_source();
        for _ in 0..fired {
            self.transport.fire_tick(&mut self.devices, clock_source, sink);
        }
    }

    /// Convenience wrapper for callers with no song/sequencer layer wired
    /// up yet: fires ticks against a no-op sink.
    pub fn advance_untracked(&mut self, delta_usec24: u32) {
        let mut sink = NullTickSink;
        self.advance(delta_usec24, &mut sink);
    }

    pub fn attach_device(&mut self, unit: usize, device: Device) -> Result<()> {
        self.devices.attach(unit, device)
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::backend::{Backend, RawDescriptor, ReadyEvents};
    use crate::device::DeviceMode;

    struct LoopbackBackend {
        eof: bool,
    }

    impl Backend for LoopbackBackend {
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
        fn fill_descriptors(&self, _out: &mut Vec<RawDescriptor>) {}
        fn poll_events(&self, _ready: &[RawDescriptor]) -> ReadyEvents {
            ReadyEvents::default()
        }
        fn eof(&self) -> bool {
            self.eof
        }
    }

    #[test]
    fn flush_devices_drains_every_attached_unit() {
        let mut engine = Engine::new();
        engine
            .attach_device(0, Device::new(Box::new(LoopbackBackend { eof: false }), DeviceMode::OUT, 64))
            .unwrap();
        engine.flush_devices().unwrap();
    }

    #[test]
    fn poll_devices_returns_no_events_for_a_quiet_backend() {
        let mut engine = Engine::new();
        engine
            .attach_device(0, Device::new(Box::new(LoopbackBackend { eof: false }), DeviceMode::IN, 64))
            .unwrap();
        let events = engine.poll_devices(0).unwrap();
        assert!(events.is_empty());
    }

    #[test]
    fn advance_untracked_does_not_panic_before_start_request() {
        let mut engine = Engine::new();
        engine.advance_untracked(1_000_000);
    }

    #[test]
    fn fail_device_broadcasts_note_off_for_that_devices_open_notes() {
        use crate::event::{Command, Event};

        let mut engine = Engine::new();
        engine
            .attach_device(0, Device::new(Box::new(LoopbackBackend { eof: false }), DeviceMode::OUT, 64))
            .unwrap();

        let dev = engine.devices.get_mut(0).unwrap();
        engine
            .transport
            .putev(Event::new(Command::NoteOn, 0, 0, 60, 100), dev)
            .unwrap();

        engine.fail_device(0).unwrap();

        assert!(engine.devices.get(0).unwrap().failed);
        assert_eq!(engine.transport.output.iter().count(), 0, "the cancel must drop the open note");
    }
}
