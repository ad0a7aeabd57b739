//! Real-time core of a MIDI sequencer/filter.
//!
//! This crate moves MIDI events through time: it multiplexes wire-level MIDI
//! between attached devices, runs a tempo-driven transport that arbitrates
//! between an internal clock, external MIDI clock, and MIDI Time Code, and
//! tracks which notes/controllers/bends are currently "live" via a stateful
//! stream filter. See `SPEC_FULL.md` in the workspace root for the full
//! design.
//!
//! Everything here is single-threaded and non-blocking except the top-level
//! poll call in [`io`]; see that module and [`engine`] for how the pieces are
//! wired together behind one [`engine::Engine`] context.

pub mod config;
pub mod device;
pub mod engine;
pub mod error;
pub mod event;
pub mod filter;
pub mod io;
pub mod pool;
pub mod scanner;
pub mod state;
pub mod timeout;
pub mod track;
pub mod transport;

pub use engine::Engine;
pub use error::{Error, Result};
