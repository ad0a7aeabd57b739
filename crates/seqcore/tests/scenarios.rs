//! End-to-end scenarios, one per integration test.

use seqcore::device::backend::{Backend, RawDescriptor, ReadyEvents};
use seqcore::device::{Device, DeviceMode};
use seqcore::event::{Command, Event, Phase};
use seqcore::state::{StateFlags, Statelist};
use seqcore::timeout::TimeoutWheel;
use seqcore::transport::Transport;
use seqcore::Result;

fn note_on(note: i32, vel: i32) -> Event {
    Event::new(Command::NoteOn, 0, 0, note, vel)
}

fn note_off(note: i32) -> Event {
    Event::new(Command::NoteOff, 0, 0, note, 0)
}

#[test]
fn note_on_off_round_trip_empties_list() {
    let mut list = Statelist::new(8);
    let id = list.update(note_on(60, 100));
    assert!(list.get(id).flags.contains(StateFlags::NEW));
    assert!(list.lookup(&note_on(60, 100)).is_some());

    let id2 = list.update(note_off(60));
    assert_eq!(id, id2);
    assert!(!list.get(id2).flags.contains(StateFlags::NEW));

    list.outdate();
    assert!(list.iter().next().is_none());
}

#[test]
fn bogus_frame() {
    let mut list = Statelist::new(8);
    let id = list.update(note_off(60));
    let state = list.get(id);
    assert!(state.flags.contains(StateFlags::BOGUS | StateFlags::NEW));
    assert_eq!(state.phase, Phase::FIRST | Phase::LAST);
}

struct NullBackend;

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
    fn fill_descriptors(&self, _out: &mut Vec<RawDescriptor>) {}
    fn poll_events(&self, _ready: &[RawDescriptor]) -> ReadyEvents {
        ReadyEvents::default()
    }
    fn eof(&self) -> bool {
        false
    }
}

struct EofBackend;

impl Backend for EofBackend {
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
        true
    }
}

#[test]
fn nrpn_coalescing() {
    let mut device = Device::new(Box::new(NullBackend), DeviceMode::IN, 64);
    device.in_opts.nrpn_enabled = true;

    let bytes: [(u8, u8, u8); 4] = [(0xB0, 0x63, 0x01), (0xB0, 0x62, 0x02), (0xB0, 0x06, 0x7F), (0xB0, 0x26, 0x40)];
    let mut produced = Vec::new();
    for (status, data1, data2) in bytes {
        if let Some(ev) = device.unpack(0, status, data1, Some(data2)) {
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
fn tempo_wrap() {
    let mut t = Transport::new(8);
    t.start_request();

    let mut elapsed = 0u32;
    let mut fired_at = None;
    for _ in 0..16 {
        let step = 500_000;
        let fired = t.advance_internal(step);
        elapsed += step;
        if fired > 0 && fired_at.is_none() {
            fired_at = Some(elapsed);
        }
    }
    assert_eq!(fired_at, Some(8_000_000));

    let fired = t.advance_internal(t.ticlength);
    assert_eq!(fired, 1);
}

#[test]
fn timeout_ordering_across_wrap() {
    let mut wheel = TimeoutWheel::new(8);
    wheel.set_abstime(u32::MAX - 999);

    thread_local! {
        static FIRED: std::cell::RefCell<Vec<u32>> = const { std::cell::RefCell::new(Vec::new()) };
    }
    fn record(arg: u32) {
        FIRED.with(|f| f.borrow_mut().push(arg));
    }

    wheel.add(record, 1, 500);
    wheel.add(record, 2, 1500);
    wheel.update(2000);

    FIRED.with(|f| assert_eq!(*f.borrow(), vec![1, 2]));
}

#[test]
fn device_failure_isolation() {
    let mut devices = seqcore::device::DeviceList::new();
    devices.attach(0, Device::new(Box::new(NullBackend), DeviceMode::OUT, 64)).unwrap();
    devices.attach(1, Device::new(Box::new(EofBackend), DeviceMode::IN, 64)).unwrap();

    // Queue a pending note-on for device 0 before device 1 fails.
    let mut transport = Transport::new(8);
    let dev0 = devices.get_mut(0).unwrap();
    transport.putev(note_on(60, 100), dev0).unwrap();

    // Device 1 observes EOF on poll; device 0 is unaffected.
    let dev1 = devices.get_mut(1).unwrap();
    dev1.poll_input(0).unwrap();
    assert!(dev1.failed);

    let dev0 = devices.get_mut(0).unwrap();
    assert!(!dev0.failed);
    let written = dev0.flush().unwrap();
    assert!(written > 0, "device 0's queued note-on must still flush after device 1 fails");
}
