use thiserror::Error;

use crate::params::{FormatMask, SoundParams};

#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("no output device available")]
    NoDevice,

    #[error("unsupported sound parameters: {0}")]
    UnsupportedParams(String),

    #[error("cannot open device: {0}")]
    Open(String),

    #[error("device write failed: {0}")]
    Write(String),

    #[error("device is not open")]
    NotOpen,
}

/// What an output driver can accept, reported by `Device::init` and
/// intersected with the producer's formats during negotiation.
#[derive(Clone, Copy, Debug)]
pub struct DeviceCaps {
    pub min_channels: u8,
    pub max_channels: u8,
    pub formats: FormatMask,
}

/// Contract between the playback worker and an OS audio sink. The worker
/// is the only caller of `open`/`close`/`play`/`reset`/`buf_fill`; it
/// retries short `play` writes until a chunk is fully drained and treats
/// write failures as the loss of the current chunk only.
pub trait Device: Send {
    /// Probes the backend and reports its capabilities.
    fn init(&mut self) -> Result<DeviceCaps, DeviceError>;

    fn open(&mut self, params: &SoundParams) -> Result<(), DeviceError>;

    fn close(&mut self);

    /// Writes bytes, possibly fewer than offered. Returns the accepted
    /// count.
    fn play(&mut self, buf: &[u8]) -> Result<usize, DeviceError>;

    /// Drops pending audio so the device is ready for immediate reuse.
    /// Returns false when the backend could not comply (logged and
    /// ignored by the worker).
    fn reset(&mut self) -> bool;

    /// Bytes buffered by the device and not yet audible; 0 if unknown.
    fn buf_fill(&mut self) -> usize;

    /// Actual rate of the open stream in Hz, 0 when closed.
    fn rate(&self) -> u32;

    /// Hardware (or driver-level) volume in percent, `None` when the
    /// backend has no readable mixer.
    fn read_mixer(&self) -> Option<u8>;

    fn set_mixer(&mut self, percent: u8);
}
