use std::sync::{Arc, Mutex};

use crate::output::device::{Device, DeviceCaps, DeviceError};
use crate::params::{FormatMask, SampleType, SoundParams};

/// Sink without hardware: accepts every format, records what was played.
/// Useful for tests and for running the pipeline headless.
pub struct NullDevice {
    params: Option<SoundParams>,
    mixer: u8,
    written: Arc<Mutex<Vec<u8>>>,
}

impl NullDevice {
    pub fn new() -> Self {
        Self {
            params: None,
            mixer: 100,
            written: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Handle onto everything played so far, usable after the device has
    /// been moved into an output buffer.
    pub fn written(&self) -> Arc<Mutex<Vec<u8>>> {
        Arc::clone(&self.written)
    }
}

impl Default for NullDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl Device for NullDevice {
    fn init(&mut self) -> Result<DeviceCaps, DeviceError> {
        let formats = FormatMask::native(SampleType::U8)
            | FormatMask::native(SampleType::S8)
            | FormatMask::native(SampleType::U16)
            | FormatMask::native(SampleType::S16)
            | FormatMask::native(SampleType::U32)
            | FormatMask::native(SampleType::S32)
            | FormatMask::native(SampleType::Float);
        Ok(DeviceCaps {
            min_channels: 1,
            max_channels: 2,
            formats,
        })
    }

    fn open(&mut self, params: &SoundParams) -> Result<(), DeviceError> {
        self.params = Some(*params);
        Ok(())
    }

    fn close(&mut self) {
        self.params = None;
    }

    fn play(&mut self, buf: &[u8]) -> Result<usize, DeviceError> {
        if self.params.is_none() {
            return Err(DeviceError::NotOpen);
        }
        self.written
            .lock()
            .map_err(|_| DeviceError::Write("record lock poisoned".into()))?
            .extend_from_slice(buf);
        Ok(buf.len())
    }

    fn reset(&mut self) -> bool {
        true
    }

    fn buf_fill(&mut self) -> usize {
        0
    }

    fn rate(&self) -> u32 {
        self.params.map_or(0, |p| p.rate)
    }

    fn read_mixer(&self) -> Option<u8> {
        Some(self.mixer)
    }

    fn set_mixer(&mut self, percent: u8) {
        self.mixer = percent.min(100);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::SampleFormat;

    #[test]
    fn records_played_bytes_in_order() {
        let mut dev = NullDevice::new();
        let sink = dev.written();
        let params = SoundParams::new(SampleFormat::native(SampleType::S16), 2, 44_100);

        dev.open(&params).unwrap();
        assert_eq!(dev.play(b"abc").unwrap(), 3);
        assert_eq!(dev.play(b"def").unwrap(), 3);
        assert_eq!(&*sink.lock().unwrap(), b"abcdef");
        assert_eq!(dev.rate(), 44_100);
    }

    #[test]
    fn refuses_to_play_while_closed() {
        let mut dev = NullDevice::new();
        assert!(matches!(dev.play(b"x"), Err(DeviceError::NotOpen)));
        dev.open(&SoundParams::new(
            SampleFormat::native(SampleType::U8),
            1,
            8_000,
        ))
        .unwrap();
        dev.close();
        assert!(matches!(dev.play(b"x"), Err(DeviceError::NotOpen)));
    }

    #[test]
    fn caps_cover_every_native_format() {
        let mut dev = NullDevice::new();
        let caps = dev.init().unwrap();
        assert_eq!(caps.min_channels, 1);
        assert_eq!(caps.max_channels, 2);
        for sample in [
            SampleType::U8,
            SampleType::S8,
            SampleType::U16,
            SampleType::S16,
            SampleType::U32,
            SampleType::S32,
            SampleType::Float,
        ] {
            assert!(caps.formats.supports(SampleFormat::native(sample)));
        }
    }

    #[test]
    fn mixer_percent_round_trips() {
        let mut dev = NullDevice::new();
        dev.set_mixer(55);
        assert_eq!(dev.read_mixer(), Some(55));
        dev.set_mixer(200);
        assert_eq!(dev.read_mixer(), Some(100));
    }
}
