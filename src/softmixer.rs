use std::fs;
use std::io;
use std::path::Path;

use log::{debug, warn};

use crate::params::{Endian, SampleType, SoundParams};

/// Lowest accepted amplification percent.
pub const SOFTMIXER_MIN: u16 = 0;
/// Highest accepted amplification percent. Values above 100 may clip.
pub const SOFTMIXER_MAX: u16 = 200;

const NAME_ON: &str = "Soft";
const NAME_OFF: &str = "S.Off";

/// Software volume control applied to the final byte stream before it
/// reaches the device: sample-wise gain with clipping plus an optional
/// stereo-to-mono downmix. Owned by the pipeline and shared by reference;
/// it keeps no per-stream state.
pub struct SoftMixer {
    active: bool,
    mono: bool,
    value: u8,
    amp: u16,
    /// Effective gain in integer percent: `value * amp / 100`, clamped
    /// to `SOFTMIXER_MIN..=SOFTMIXER_MAX`.
    real: i32,
    realf: f32,
}

impl SoftMixer {
    pub fn new() -> Self {
        let mut mixer = Self {
            active: false,
            mono: false,
            value: 100,
            amp: 100,
            real: 100,
            realf: 1.0,
        };
        mixer.set_value(100);
        mixer
    }

    /// Mixer label for a front-end volume display.
    pub fn name(&self) -> &'static str {
        if self.active {
            NAME_ON
        } else {
            NAME_OFF
        }
    }

    pub fn set_value(&mut self, value: u8) {
        self.value = value.min(100);
        self.recompute();
    }

    pub fn value(&self) -> u8 {
        self.value
    }

    pub fn set_amp(&mut self, amp: u16) {
        self.amp = amp.min(SOFTMIXER_MAX);
        self.recompute();
    }

    pub fn amp(&self) -> u16 {
        self.amp
    }

    pub fn set_active(&mut self, active: bool) {
        self.active = active;
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn set_mono(&mut self, mono: bool) {
        self.mono = mono;
    }

    pub fn is_mono(&self) -> bool {
        self.mono
    }

    fn recompute(&mut self) {
        let real = (i32::from(self.value) * i32::from(self.amp)) / 100;
        self.real = real.clamp(i32::from(SOFTMIXER_MIN), i32::from(SOFTMIXER_MAX));
        self.realf = self.real as f32 / 100.0;
    }

    /// Applies gain and the mono downmix to `buf` in place. `params`
    /// describes the samples in the buffer; non-native-endian integer
    /// samples are byte-swapped before the arithmetic and swapped back
    /// afterwards, so the buffer keeps its declared byte order.
    pub fn process_buffer(&self, buf: &mut [u8], params: &SoundParams) {
        if !self.active {
            return;
        }
        if self.real == 100 && !self.mono {
            return;
        }

        debug!("softmixer processing {} bytes", buf.len());

        let sample = params.format.sample;
        let needs_swap =
            params.format.endian != Endian::NATIVE && sample.size() > 1 && !sample.is_float();

        if needs_swap {
            swap_endianness(buf, sample.size());
        }

        let do_softmix = self.real != 100;
        let channels = params.channels as usize;

        match sample {
            SampleType::U8 => {
                if do_softmix {
                    scale_u8(buf, self.real);
                }
                if self.mono {
                    mix_mono_u8(buf, channels);
                }
            }
            SampleType::S8 => {
                if do_softmix {
                    scale_s8(buf, self.real);
                }
                if self.mono {
                    mix_mono_s8(buf, channels);
                }
            }
            SampleType::U16 => {
                if do_softmix {
                    scale_u16(buf, self.real);
                }
                if self.mono {
                    mix_mono_u16(buf, channels);
                }
            }
            SampleType::S16 => {
                if do_softmix {
                    scale_s16(buf, self.real);
                }
                if self.mono {
                    mix_mono_s16(buf, channels);
                }
            }
            SampleType::U32 => {
                if do_softmix {
                    scale_u32(buf, self.real);
                }
                if self.mono {
                    mix_mono_u32(buf, channels);
                }
            }
            SampleType::S32 => {
                if do_softmix {
                    scale_s32(buf, self.real);
                }
                if self.mono {
                    mix_mono_s32(buf, channels);
                }
            }
            SampleType::Float => {
                if do_softmix {
                    scale_float(buf, self.realf);
                }
                if self.mono {
                    mix_mono_float(buf, channels);
                }
            }
        }

        if needs_swap {
            swap_endianness(buf, sample.size());
        }
    }

    /// Reads persisted mixer state from the line-oriented `Key: value`
    /// file written by `save`. Keys are case-insensitive; unknown keys are
    /// ignored and malformed or out-of-range lines are logged and skipped.
    pub fn load(&mut self, path: &Path) -> io::Result<()> {
        let content = fs::read_to_string(path)?;

        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let Some((key, value)) = line.split_once(':') else {
                warn!("skipping malformed softmixer state line: {line}");
                continue;
            };
            let Ok(number) = value.trim().parse::<i64>() else {
                warn!("skipping non-numeric softmixer state line: {line}");
                continue;
            };

            match key.trim().to_ascii_lowercase().as_str() {
                "active" => self.active = number > 0,
                "mono" => self.mono = number > 0,
                "amplification" => {
                    if (i64::from(SOFTMIXER_MIN)..=i64::from(SOFTMIXER_MAX)).contains(&number) {
                        self.set_amp(number as u16);
                    } else {
                        warn!("softmixer amplification {number} out of range, ignored");
                    }
                }
                "value" => {
                    if (0..=100).contains(&number) {
                        self.set_value(number as u8);
                    } else {
                        warn!("softmixer value {number} out of range, ignored");
                    }
                }
                _ => {}
            }
        }

        Ok(())
    }

    /// Writes the mixer state to `path`. The file is replaced atomically:
    /// the content goes to a temporary sibling which is then renamed over
    /// the target.
    pub fn save(&self, path: &Path) -> io::Result<()> {
        let content = format!(
            "Active: {}\nAmplification: {}\nValue: {}\nMono: {}\n",
            i32::from(self.active),
            self.amp,
            self.value,
            i32::from(self.mono),
        );

        let mut tmp = path.as_os_str().to_owned();
        tmp.push(".tmp");
        let tmp = std::path::PathBuf::from(tmp);

        fs::write(&tmp, content)?;
        fs::rename(&tmp, path)
    }
}

impl Default for SoftMixer {
    fn default() -> Self {
        Self::new()
    }
}

fn swap_endianness(buf: &mut [u8], sample_size: usize) {
    match sample_size {
        2 => {
            for pair in buf.chunks_exact_mut(2) {
                pair.swap(0, 1);
            }
        }
        4 => {
            for quad in buf.chunks_exact_mut(4) {
                quad.reverse();
            }
        }
        _ => {}
    }
}

// Gain loops: a wider intermediate holds sample * percent, which is then
// divided by 100 and clamped back into the sample range. Unsigned formats
// are re-centered around their midpoint first.

fn scale_u8(buf: &mut [u8], real: i32) {
    let real = real as i16;
    for b in buf.iter_mut() {
        let mut tmp = i16::from(*b);
        tmp -= i16::from(u8::MAX >> 1);
        tmp *= real;
        tmp /= 100;
        tmp += i16::from(u8::MAX >> 1);
        *b = tmp.clamp(0, i16::from(u8::MAX)) as u8;
    }
}

fn scale_s8(buf: &mut [u8], real: i32) {
    let real = real as i16;
    for b in buf.iter_mut() {
        let tmp = i16::from(*b as i8) * real / 100;
        *b = tmp.clamp(i16::from(i8::MIN), i16::from(i8::MAX)) as i8 as u8;
    }
}

fn scale_u16(buf: &mut [u8], real: i32) {
    for s in buf.chunks_exact_mut(2) {
        let mut tmp = i32::from(u16::from_ne_bytes([s[0], s[1]]));
        tmp -= i32::from(u16::MAX >> 1);
        tmp *= real;
        tmp /= 100;
        tmp += i32::from(u16::MAX >> 1);
        let v = tmp.clamp(0, i32::from(u16::MAX)) as u16;
        s.copy_from_slice(&v.to_ne_bytes());
    }
}

fn scale_s16(buf: &mut [u8], real: i32) {
    for s in buf.chunks_exact_mut(2) {
        let tmp = i32::from(i16::from_ne_bytes([s[0], s[1]])) * real / 100;
        let v = tmp.clamp(i32::from(i16::MIN), i32::from(i16::MAX)) as i16;
        s.copy_from_slice(&v.to_ne_bytes());
    }
}

fn scale_u32(buf: &mut [u8], real: i32) {
    for s in buf.chunks_exact_mut(4) {
        let mut tmp = i64::from(u32::from_ne_bytes([s[0], s[1], s[2], s[3]]));
        tmp -= i64::from(u32::MAX >> 1);
        tmp *= i64::from(real);
        tmp /= 100;
        tmp += i64::from(u32::MAX >> 1);
        let v = tmp.clamp(0, i64::from(u32::MAX)) as u32;
        s.copy_from_slice(&v.to_ne_bytes());
    }
}

fn scale_s32(buf: &mut [u8], real: i32) {
    for s in buf.chunks_exact_mut(4) {
        let tmp = i64::from(i32::from_ne_bytes([s[0], s[1], s[2], s[3]])) * i64::from(real) / 100;
        let v = tmp.clamp(i64::from(i32::MIN), i64::from(i32::MAX)) as i32;
        s.copy_from_slice(&v.to_ne_bytes());
    }
}

fn scale_float(buf: &mut [u8], realf: f32) {
    for s in buf.chunks_exact_mut(4) {
        let v = f32::from_ne_bytes([s[0], s[1], s[2], s[3]]) * realf;
        s.copy_from_slice(&v.clamp(-1.0, 1.0).to_ne_bytes());
    }
}

// Mono downmix: the integer mean across all channels of a frame is written
// back to every channel slot. The frame layout and channel count do not
// change.

fn mix_mono_u8(buf: &mut [u8], channels: usize) {
    if channels < 2 {
        return;
    }
    for frame in buf.chunks_exact_mut(channels) {
        let sum: i16 = frame.iter().map(|b| i16::from(*b)).sum();
        let mono = (sum / channels as i16).clamp(0, i16::from(u8::MAX)) as u8;
        frame.fill(mono);
    }
}

fn mix_mono_s8(buf: &mut [u8], channels: usize) {
    if channels < 2 {
        return;
    }
    for frame in buf.chunks_exact_mut(channels) {
        let sum: i16 = frame.iter().map(|b| i16::from(*b as i8)).sum();
        let mono = (sum / channels as i16).clamp(i16::from(i8::MIN), i16::from(i8::MAX)) as i8;
        frame.fill(mono as u8);
    }
}

fn mix_mono_u16(buf: &mut [u8], channels: usize) {
    if channels < 2 {
        return;
    }
    for frame in buf.chunks_exact_mut(channels * 2) {
        let sum: i32 = frame
            .chunks_exact(2)
            .map(|s| i32::from(u16::from_ne_bytes([s[0], s[1]])))
            .sum();
        let mono = (sum / channels as i32).clamp(0, i32::from(u16::MAX)) as u16;
        for s in frame.chunks_exact_mut(2) {
            s.copy_from_slice(&mono.to_ne_bytes());
        }
    }
}

fn mix_mono_s16(buf: &mut [u8], channels: usize) {
    if channels < 2 {
        return;
    }
    for frame in buf.chunks_exact_mut(channels * 2) {
        let sum: i32 = frame
            .chunks_exact(2)
            .map(|s| i32::from(i16::from_ne_bytes([s[0], s[1]])))
            .sum();
        let mono =
            (sum / channels as i32).clamp(i32::from(i16::MIN), i32::from(i16::MAX)) as i16;
        for s in frame.chunks_exact_mut(2) {
            s.copy_from_slice(&mono.to_ne_bytes());
        }
    }
}

fn mix_mono_u32(buf: &mut [u8], channels: usize) {
    if channels < 2 {
        return;
    }
    for frame in buf.chunks_exact_mut(channels * 4) {
        let sum: i64 = frame
            .chunks_exact(4)
            .map(|s| i64::from(u32::from_ne_bytes([s[0], s[1], s[2], s[3]])))
            .sum();
        let mono = (sum / channels as i64).clamp(0, i64::from(u32::MAX)) as u32;
        for s in frame.chunks_exact_mut(4) {
            s.copy_from_slice(&mono.to_ne_bytes());
        }
    }
}

fn mix_mono_s32(buf: &mut [u8], channels: usize) {
    if channels < 2 {
        return;
    }
    for frame in buf.chunks_exact_mut(channels * 4) {
        let sum: i64 = frame
            .chunks_exact(4)
            .map(|s| i64::from(i32::from_ne_bytes([s[0], s[1], s[2], s[3]])))
            .sum();
        let mono =
            (sum / channels as i64).clamp(i64::from(i32::MIN), i64::from(i32::MAX)) as i32;
        for s in frame.chunks_exact_mut(4) {
            s.copy_from_slice(&mono.to_ne_bytes());
        }
    }
}

fn mix_mono_float(buf: &mut [u8], channels: usize) {
    if channels < 2 {
        return;
    }
    for frame in buf.chunks_exact_mut(channels * 4) {
        let sum: f32 = frame
            .chunks_exact(4)
            .map(|s| f32::from_ne_bytes([s[0], s[1], s[2], s[3]]))
            .sum();
        let mono = (sum / channels as f32).clamp(-1.0, 1.0);
        for s in frame.chunks_exact_mut(4) {
            s.copy_from_slice(&mono.to_ne_bytes());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::{SampleFormat, SampleType};

    fn params(sample: SampleType, channels: u8) -> SoundParams {
        SoundParams::new(SampleFormat::native(sample), channels, 44_100)
    }

    fn s16_buf(samples: &[i16]) -> Vec<u8> {
        samples.iter().flat_map(|s| s.to_ne_bytes()).collect()
    }

    fn s16_of(buf: &[u8]) -> Vec<i16> {
        buf.chunks_exact(2)
            .map(|s| i16::from_ne_bytes([s[0], s[1]]))
            .collect()
    }

    #[test]
    fn full_gain_without_mono_is_identity() {
        let mut mixer = SoftMixer::new();
        mixer.set_active(true);
        let mut buf = s16_buf(&[1234, -5678, i16::MAX, i16::MIN]);
        let original = buf.clone();
        mixer.process_buffer(&mut buf, &params(SampleType::S16, 2));
        assert_eq!(buf, original);
    }

    #[test]
    fn inactive_mixer_does_nothing() {
        let mut mixer = SoftMixer::new();
        mixer.set_value(10);
        mixer.set_mono(true);
        let mut buf = s16_buf(&[1000, 2000]);
        let original = buf.clone();
        mixer.process_buffer(&mut buf, &params(SampleType::S16, 2));
        assert_eq!(buf, original);
    }

    #[test]
    fn half_gain_s16() {
        let mut mixer = SoftMixer::new();
        mixer.set_active(true);
        mixer.set_value(50);
        let mut buf = s16_buf(&[32767, -32768, 0, 100]);
        mixer.process_buffer(&mut buf, &params(SampleType::S16, 2));
        assert_eq!(s16_of(&buf), vec![16383, -16384, 0, 50]);
    }

    #[test]
    fn double_gain_clips_s8() {
        let mut mixer = SoftMixer::new();
        mixer.set_active(true);
        mixer.set_amp(200);
        let mut buf = vec![100i8 as u8, (-100i8) as u8];
        mixer.process_buffer(&mut buf, &params(SampleType::S8, 2));
        assert_eq!(buf[0] as i8, 127);
        assert_eq!(buf[1] as i8, -128);
    }

    #[test]
    fn unsigned_gain_scales_around_midpoint() {
        let mut mixer = SoftMixer::new();
        mixer.set_active(true);
        mixer.set_value(50);
        // Midpoint stays put, extremes move halfway towards it.
        let mut buf = vec![127u8, 255, 0];
        mixer.process_buffer(&mut buf, &params(SampleType::U8, 1));
        assert_eq!(buf, vec![127, 191, 64]);
    }

    #[test]
    fn mono_downmix_s16_stereo() {
        let mut mixer = SoftMixer::new();
        mixer.set_active(true);
        mixer.set_mono(true);
        let mut buf = s16_buf(&[10_000, -10_000, 4, 6, i16::MAX, i16::MAX]);
        mixer.process_buffer(&mut buf, &params(SampleType::S16, 2));
        assert_eq!(
            s16_of(&buf),
            vec![0, 0, 5, 5, i16::MAX, i16::MAX]
        );
    }

    #[test]
    fn mono_downmix_keeps_mono_buffers() {
        let mut mixer = SoftMixer::new();
        mixer.set_active(true);
        mixer.set_mono(true);
        let mut buf = s16_buf(&[100, -50]);
        let original = buf.clone();
        mixer.process_buffer(&mut buf, &params(SampleType::S16, 1));
        assert_eq!(buf, original);
    }

    #[test]
    fn foreign_endian_buffer_round_trips() {
        let mut mixer = SoftMixer::new();
        mixer.set_active(true);
        mixer.set_value(50);

        let foreign = match Endian::NATIVE {
            Endian::Little => Endian::Big,
            Endian::Big => Endian::Little,
        };
        let samples = [32767i16, -32768, 0, 100];

        // Native-endian reference result.
        let mut native = s16_buf(&samples);
        mixer.process_buffer(&mut native, &params(SampleType::S16, 2));

        // Same samples, byte-swapped buffer, tagged with the other order.
        let mut swapped: Vec<u8> = s16_buf(&samples);
        swap_endianness(&mut swapped, 2);
        let p = SoundParams::new(SampleFormat::new(SampleType::S16, foreign), 2, 44_100);
        mixer.process_buffer(&mut swapped, &p);
        swap_endianness(&mut swapped, 2);

        assert_eq!(native, swapped);
    }

    #[test]
    fn effective_gain_combines_value_and_amp() {
        let mut mixer = SoftMixer::new();
        mixer.set_value(50);
        mixer.set_amp(200);
        assert_eq!(mixer.real, 100);
        mixer.set_amp(150);
        assert_eq!(mixer.real, 75);
        mixer.set_value(100);
        assert_eq!(mixer.real, 150);
    }

    #[test]
    fn name_follows_active_flag() {
        let mut mixer = SoftMixer::new();
        assert_eq!(mixer.name(), "S.Off");
        mixer.set_active(true);
        assert_eq!(mixer.name(), "Soft");
    }

    #[test]
    fn state_survives_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("softmixer");

        let mut mixer = SoftMixer::new();
        mixer.set_active(true);
        mixer.set_amp(150);
        mixer.set_value(42);
        mixer.set_mono(true);
        mixer.save(&path).unwrap();

        let mut loaded = SoftMixer::new();
        loaded.load(&path).unwrap();
        assert!(loaded.is_active());
        assert_eq!(loaded.amp(), 150);
        assert_eq!(loaded.value(), 42);
        assert!(loaded.is_mono());
        assert_eq!(loaded.real, mixer.real);
    }

    #[test]
    fn load_skips_junk_and_unknown_keys() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("softmixer");
        std::fs::write(
            &path,
            "garbage line\nColor: 7\nACTIVE: 1\nvalue: 31\nAmplification: 999\n",
        )
        .unwrap();

        let mut mixer = SoftMixer::new();
        mixer.load(&path).unwrap();
        assert!(mixer.is_active());
        assert_eq!(mixer.value(), 31);
        // Out-of-range amplification is rejected, the default survives.
        assert_eq!(mixer.amp(), 100);
    }
}
