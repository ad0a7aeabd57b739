use std::collections::VecDeque;

use seqcore::device::backend::{Backend, RawDescriptor, ReadyEvents};
use seqcore::device::{Device, DeviceMode};
use seqcore::transport::NullTickSink;
use seqcore::{Engine, Result};

/// An in-memory loopback back-end: whatever is written comes back out the
/// read side. Good enough to demonstrate the engine without a real ALSA/
/// CoreMIDI back-end, which is out of scope for this crate.
struct LoopbackBackend {
    queued: VecDeque<u8>,
}

impl Backend for LoopbackBackend {
    fn open(&mut self) -> Result<()> {
        Ok(())
    }

    fn close(&mut self) {}

    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let mut n = 0;
        while n < buf.len() {
            let Some(byte) = self.queued.pop_front() else {
                break;
            };
            buf[n] = byte;
            n += 1;
        }
        Ok(n)
    }

    fn write(&mut self, buf: &[u8]) -> Result<usize> {
        self.queued.extend(buf);
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

fn main() -> anyhow::Result<()> {
    env_logger::init();

    let mut engine = Engine::new();
    engine.attach_device(
        0,
        Device::new(Box::new(LoopbackBackend { queued: VecDeque::new() }), DeviceMode::IN | DeviceMode::OUT, 256),
    )?;

    engine.transport.start_request();

    let mut sink = NullTickSink;
    let tick_usec24 = 1_000_000;
    for _ in 0..10_000 {
        engine.poll_devices(0)?;
        engine.advance(tick_usec24, &mut sink);
        engine.flush_devices()?;
    }

    log::info!("ran {} ticks at phase {:?}", engine.transport.curtic, engine.transport.phase);
    Ok(())
}
