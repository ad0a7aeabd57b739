//! Error taxonomy (§7): fatal, device-level, protocol, and user-observable.
//!
//! Only [`Error::Fatal`] ever propagates out of the engine's public entry
//! points as something the caller should abort on; everything else is
//! logged and absorbed at the point it occurs, matching "the transport never
//! throws through to the event loop; it self-quiesces to STOP."

use derive_more::{Display, Error};

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Display, Error)]
pub enum Error {
    /// Pool exhaustion, an invariant violation, or a clock read failure.
    /// These abort the process after logging.
    #[display("fatal: {_0}")]
    Fatal(#[error(not(source))] String),

    /// Read/write error, parser desync, or EOF on a device. The device is
    /// marked failed; the engine keeps running the others.
    #[display("device {device} failed: {reason}")]
    Device {
        device: usize,
        #[error(not(source))]
        reason: String,
    },

    /// Sensing timeout, or an unexpected tick/start while stopped.
    #[display("protocol error: {_0}")]
    Protocol(#[error(not(source))] String),
}

impl Error {
    pub fn fatal(msg: impl Into<String>) -> Self {
        Error::Fatal(msg.into())
    }

    pub fn device(device: usize, reason: impl Into<String>) -> Self {
        Error::Device {
            device,
            reason: reason.into(),
        }
    }

    pub fn protocol(msg: impl Into<String>) -> Self {
        Error::Protocol(msg.into())
    }
}
