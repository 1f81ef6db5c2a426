use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleRate, Stream, StreamConfig};
use log::{info, warn};
use ringbuf::{
    traits::{Consumer as _, Observer as _, Producer as _, Split},
    HeapCons, HeapProd, HeapRb,
};

use crate::options::Options;
use crate::output::device::{Device, DeviceCaps, DeviceError};
use crate::params::{FormatMask, SampleType, SoundParams};

/// Bytes queued between `play` and the stream callback.
const RING_CAPACITY: usize = 64 * 1024;

/// How long `play` waits for the callback to make room before the chunk
/// is declared lost.
const PLAY_STALL_TIMEOUT: Duration = Duration::from_secs(1);

/// Output driver on top of the default cpal host. Bytes accepted by
/// `play` travel through a ring to the stream callback, which decodes
/// them into the stream's sample type and injects silence on underrun.
pub struct CpalDevice {
    allow_24bit: bool,
    volume: Arc<AtomicU8>,
    opened: Option<OpenStream>,
}

struct OpenStream {
    _stream: Stream,
    producer: HeapProd<u8>,
    reset_flag: Arc<AtomicBool>,
    params: SoundParams,
    /// Bytes of a sample split across `play` calls. The ring only ever
    /// carries whole samples so the callback cannot tear one.
    stash: Vec<u8>,
}

impl CpalDevice {
    pub fn new(opts: &Options) -> Self {
        Self {
            allow_24bit: opts.allow_24bit_output,
            volume: Arc::new(AtomicU8::new(100)),
            opened: None,
        }
    }
}

impl Device for CpalDevice {
    fn init(&mut self) -> Result<DeviceCaps, DeviceError> {
        let host = cpal::default_host();
        let device = host.default_output_device().ok_or(DeviceError::NoDevice)?;

        let ranges = device
            .supported_output_configs()
            .map_err(|e| DeviceError::Open(format!("cannot query output configs: {e}")))?;

        let mut formats = FormatMask::empty();
        let mut min_channels = u8::MAX;
        let mut max_channels = 0u8;
        for cfg in ranges {
            if let Some(sample) = sample_type_of(cfg.sample_format()) {
                formats |= FormatMask::native(sample);
            }
            let channels = cfg.channels().min(u16::from(u8::MAX)) as u8;
            min_channels = min_channels.min(channels);
            max_channels = max_channels.max(channels);
        }

        if !self.allow_24bit {
            formats.remove(FormatMask::native(SampleType::S32) | FormatMask::native(SampleType::U32));
        }
        if formats.is_empty() || max_channels == 0 {
            return Err(DeviceError::NoDevice);
        }

        // The pipeline itself only produces one or two channels.
        Ok(DeviceCaps {
            min_channels: min_channels.clamp(1, 2),
            max_channels: max_channels.min(2),
            formats,
        })
    }

    fn open(&mut self, params: &SoundParams) -> Result<(), DeviceError> {
        if self.opened.is_some() {
            self.close();
        }

        if !params.format.is_native_endian() {
            return Err(DeviceError::UnsupportedParams(format!(
                "{} samples must be native-endian for this backend",
                params.format.sample.as_str()
            )));
        }
        if matches!(params.format.sample, SampleType::S32 | SampleType::U32) && !self.allow_24bit {
            return Err(DeviceError::UnsupportedParams(
                "32-bit output is disabled by Allow24bitOutput".into(),
            ));
        }
        if !(1..=2).contains(&params.channels) {
            return Err(DeviceError::UnsupportedParams(format!(
                "{} channels not supported",
                params.channels
            )));
        }

        let host = cpal::default_host();
        let device = host.default_output_device().ok_or(DeviceError::NoDevice)?;
        let config = StreamConfig {
            channels: u16::from(params.channels),
            sample_rate: SampleRate(params.rate),
            buffer_size: cpal::BufferSize::Default,
        };

        let (producer, consumer) = HeapRb::<u8>::new(RING_CAPACITY).split();
        let reset_flag = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&reset_flag);
        let volume = Arc::clone(&self.volume);

        let stream = match params.format.sample {
            SampleType::U8 => build_stream::<u8, 1>(
                &device,
                &config,
                consumer,
                flag,
                volume,
                |b| b[0],
                scale_u8,
                0x80,
            ),
            SampleType::S8 => build_stream::<i8, 1>(
                &device,
                &config,
                consumer,
                flag,
                volume,
                |b| b[0] as i8,
                scale_i8,
                0,
            ),
            SampleType::U16 => build_stream::<u16, 2>(
                &device,
                &config,
                consumer,
                flag,
                volume,
                u16::from_ne_bytes,
                scale_u16,
                0x8000,
            ),
            SampleType::S16 => build_stream::<i16, 2>(
                &device,
                &config,
                consumer,
                flag,
                volume,
                i16::from_ne_bytes,
                scale_i16,
                0,
            ),
            SampleType::U32 => build_stream::<u32, 4>(
                &device,
                &config,
                consumer,
                flag,
                volume,
                u32::from_ne_bytes,
                scale_u32,
                0x8000_0000,
            ),
            SampleType::S32 => build_stream::<i32, 4>(
                &device,
                &config,
                consumer,
                flag,
                volume,
                i32::from_ne_bytes,
                scale_i32,
                0,
            ),
            SampleType::Float => build_stream::<f32, 4>(
                &device,
                &config,
                consumer,
                flag,
                volume,
                f32::from_ne_bytes,
                scale_f32,
                0.0,
            ),
        }?;

        info!(
            "opened cpal output: {} ch {} Hz {}",
            params.channels,
            params.rate,
            params.format.sample.as_str()
        );

        self.opened = Some(OpenStream {
            _stream: stream,
            producer,
            reset_flag,
            params: *params,
            stash: Vec::with_capacity(4),
        });
        Ok(())
    }

    fn close(&mut self) {
        if self.opened.take().is_some() {
            info!("closed cpal output");
        }
    }

    fn play(&mut self, buf: &[u8]) -> Result<usize, DeviceError> {
        let Some(open) = self.opened.as_mut() else {
            return Err(DeviceError::NotOpen);
        };
        let sample_bytes = open.params.format.bytes();
        let mut consumed = 0;

        // Complete a sample split by the previous call.
        if !open.stash.is_empty() {
            let need = sample_bytes - open.stash.len();
            let take = need.min(buf.len());
            open.stash.extend_from_slice(&buf[..take]);
            consumed += take;
            if open.stash.len() < sample_bytes {
                return Ok(consumed);
            }
            let sample = std::mem::take(&mut open.stash);
            push_blocking(&mut open.producer, &sample)?;
        }

        let aligned = (buf.len() - consumed) / sample_bytes * sample_bytes;
        if aligned > 0 {
            let pushed = push_blocking(&mut open.producer, &buf[consumed..consumed + aligned])?;
            consumed += pushed;
            if pushed < aligned {
                // Short write; the caller retries with the rest.
                return Ok(consumed);
            }
        }

        // Stash a trailing partial sample and report it as accepted.
        if consumed < buf.len() {
            open.stash.extend_from_slice(&buf[consumed..]);
            consumed = buf.len();
        }

        Ok(consumed)
    }

    fn reset(&mut self) -> bool {
        if let Some(open) = self.opened.as_mut() {
            open.stash.clear();
            open.reset_flag.store(true, Ordering::SeqCst);
        }
        true
    }

    fn buf_fill(&mut self) -> usize {
        self.opened
            .as_mut()
            .map_or(0, |open| open.producer.occupied_len() + open.stash.len())
    }

    fn rate(&self) -> u32 {
        self.opened.as_ref().map_or(0, |open| open.params.rate)
    }

    fn read_mixer(&self) -> Option<u8> {
        Some(self.volume.load(Ordering::Relaxed))
    }

    fn set_mixer(&mut self, percent: u8) {
        self.volume.store(percent.min(100), Ordering::Relaxed);
    }
}

/// Pushes `data` (a whole number of samples), blocking until at least part
/// of it fits. Returns the number of bytes pushed; errors when the
/// callback stops draining the ring entirely.
fn push_blocking(producer: &mut HeapProd<u8>, data: &[u8]) -> Result<usize, DeviceError> {
    let deadline = Instant::now() + PLAY_STALL_TIMEOUT;
    let mut remaining = data;
    let mut pushed_total = 0;

    while !remaining.is_empty() {
        let pushed = producer.push_slice(remaining);
        pushed_total += pushed;
        remaining = &remaining[pushed..];
        if pushed > 0 {
            continue;
        }
        if Instant::now() >= deadline {
            return Err(DeviceError::Write("audio callback stalled".into()));
        }
        thread::sleep(Duration::from_millis(1));
    }

    Ok(pushed_total)
}

fn build_stream<T, const N: usize>(
    device: &cpal::Device,
    config: &StreamConfig,
    mut consumer: HeapCons<u8>,
    reset: Arc<AtomicBool>,
    volume: Arc<AtomicU8>,
    decode: fn([u8; N]) -> T,
    scale: fn(T, f32) -> T,
    silence: T,
) -> Result<Stream, DeviceError>
where
    T: cpal::SizedSample + Copy + Send + 'static,
{
    let stream = device
        .build_output_stream(
            config,
            move |output: &mut [T], _| {
                if reset.swap(false, Ordering::SeqCst) {
                    consumer.clear();
                }
                let vol = f32::from(volume.load(Ordering::Relaxed)) / 100.0;
                let attenuate = vol < 1.0;
                let mut raw = [0u8; N];
                for slot in output.iter_mut() {
                    *slot = if consumer.pop_slice(&mut raw) == N {
                        let sample = decode(raw);
                        if attenuate {
                            scale(sample, vol)
                        } else {
                            sample
                        }
                    } else {
                        silence
                    };
                }
            },
            |err| warn!("audio stream error: {err}"),
            None,
        )
        .map_err(|e| DeviceError::Open(format!("failed to build output stream: {e}")))?;

    stream
        .play()
        .map_err(|e| DeviceError::Open(format!("failed to start stream: {e}")))?;

    Ok(stream)
}

fn sample_type_of(format: cpal::SampleFormat) -> Option<SampleType> {
    match format {
        cpal::SampleFormat::U8 => Some(SampleType::U8),
        cpal::SampleFormat::I8 => Some(SampleType::S8),
        cpal::SampleFormat::U16 => Some(SampleType::U16),
        cpal::SampleFormat::I16 => Some(SampleType::S16),
        cpal::SampleFormat::U32 => Some(SampleType::U32),
        cpal::SampleFormat::I32 => Some(SampleType::S32),
        cpal::SampleFormat::F32 => Some(SampleType::Float),
        _ => None,
    }
}

// Volume scaling in the callback: float math, clamp, cast back, with the
// midpoint shift for unsigned formats.

fn scale_f32(v: f32, vol: f32) -> f32 {
    v * vol
}

fn scale_i8(v: i8, vol: f32) -> i8 {
    (f32::from(v) * vol).clamp(f32::from(i8::MIN), f32::from(i8::MAX)) as i8
}

fn scale_i16(v: i16, vol: f32) -> i16 {
    (f32::from(v) * vol).clamp(f32::from(i16::MIN), f32::from(i16::MAX)) as i16
}

fn scale_i32(v: i32, vol: f32) -> i32 {
    (f64::from(v) * f64::from(vol)).clamp(f64::from(i32::MIN), f64::from(i32::MAX)) as i32
}

fn scale_u8(v: u8, vol: f32) -> u8 {
    const MID: f32 = 128.0;
    ((f32::from(v) - MID) * vol + MID).clamp(0.0, f32::from(u8::MAX)) as u8
}

fn scale_u16(v: u16, vol: f32) -> u16 {
    const MID: f32 = 32_768.0;
    ((f32::from(v) - MID) * vol + MID).clamp(0.0, f32::from(u16::MAX)) as u16
}

fn scale_u32(v: u32, vol: f32) -> u32 {
    const MID: f64 = 2_147_483_648.0;
    ((f64::from(v) - MID) * f64::from(vol) + MID).clamp(0.0, u32::MAX as f64) as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unsigned_scaling_pivots_on_the_midpoint() {
        assert_eq!(scale_u8(128, 0.5), 128);
        assert_eq!(scale_u8(255, 0.5), 191);
        assert_eq!(scale_u8(0, 0.5), 64);
        assert_eq!(scale_u16(32_768, 0.25), 32_768);
    }

    #[test]
    fn signed_scaling_attenuates_towards_zero() {
        assert_eq!(scale_i16(-20_000, 0.5), -10_000);
        assert_eq!(scale_i16(i16::MAX, 1.0), i16::MAX);
        assert_eq!(scale_i8(100, 0.1), 10);
        assert_eq!(scale_i32(1_000_000, 0.5), 500_000);
    }

    #[test]
    fn cpal_formats_map_onto_sample_types() {
        assert_eq!(sample_type_of(cpal::SampleFormat::I16), Some(SampleType::S16));
        assert_eq!(sample_type_of(cpal::SampleFormat::F32), Some(SampleType::Float));
        assert_eq!(sample_type_of(cpal::SampleFormat::U8), Some(SampleType::U8));
        assert_eq!(sample_type_of(cpal::SampleFormat::F64), None);
    }

    #[test]
    fn closed_device_reports_idle_state() {
        let mut dev = CpalDevice::new(&Options::default());
        assert_eq!(dev.rate(), 0);
        assert_eq!(dev.buf_fill(), 0);
        assert!(matches!(dev.play(b"xx"), Err(DeviceError::NotOpen)));
        assert!(dev.reset());
    }

    #[test]
    fn mixer_percent_is_clamped() {
        let mut dev = CpalDevice::new(&Options::default());
        dev.set_mixer(150);
        assert_eq!(dev.read_mixer(), Some(100));
        dev.set_mixer(30);
        assert_eq!(dev.read_mixer(), Some(30));
    }
}
