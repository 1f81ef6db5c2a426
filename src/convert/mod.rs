pub mod resample;

use log::debug;
use thiserror::Error;

use crate::params::{Endian, SampleType, SoundParams};
use resample::{ResampleMethod, StreamResampler};

#[derive(Debug, Error)]
pub enum ConvertError {
    #[error("sound parameters are identical, nothing to convert")]
    NothingToConvert,

    #[error("unsupported channel conversion: {from} -> {to} channels")]
    UnsupportedChannels { from: u8, to: u8 },

    #[error("cannot convert {0} samples to float")]
    UnsupportedToFloat(&'static str),

    #[error("cannot convert float samples to {0}")]
    UnsupportedFromFloat(&'static str),

    #[error("failed to construct resampler: {0}")]
    ResamplerConstruction(#[from] rubato::ResamplerConstructionError),

    #[error("resampling failed: {0}")]
    Resampling(#[from] rubato::ResampleError),
}

/// Stateful converter reshaping a producer's PCM into the target format,
/// endianness, channel count and rate. One converter serves one stream;
/// recreate it when the source parameters change so the resampler carry
/// is discarded with it.
pub struct AudioConverter {
    from: SoundParams,
    to: SoundParams,
    resampler: Option<StreamResampler>,
}

impl AudioConverter {
    /// Builds a converter between `from` and `to`. Identical parameters are
    /// rejected (the caller bypasses the converter), as is any channel
    /// change other than mono to stereo.
    pub fn new(
        from: SoundParams,
        to: SoundParams,
        method: ResampleMethod,
    ) -> Result<Self, ConvertError> {
        if from == to {
            return Err(ConvertError::NothingToConvert);
        }
        if from.channels != to.channels && !(from.channels == 1 && to.channels == 2) {
            return Err(ConvertError::UnsupportedChannels {
                from: from.channels,
                to: to.channels,
            });
        }

        // Channel expansion is the last pipeline step, so the resampler
        // runs at the source channel count.
        let resampler = if from.rate != to.rate {
            Some(StreamResampler::new(
                method,
                from.rate,
                to.rate,
                from.channels as usize,
            )?)
        } else {
            None
        };

        Ok(Self {
            from,
            to,
            resampler,
        })
    }

    pub fn from_params(&self) -> SoundParams {
        self.from
    }

    pub fn to_params(&self) -> SoundParams {
        self.to
    }

    /// Converts one payload. Output length can differ from input length
    /// (resampling, width changes, channel expansion) and may be empty
    /// while the resampler accumulates its first chunk.
    pub fn process(&mut self, input: &[u8]) -> Result<Vec<u8>, ConvertError> {
        let mut buf = input.to_vec();
        let mut cur = self.from.format;

        if !cur.is_native_endian() {
            swap_endian(&mut buf, cur.sample);
            cur.endian = Endian::NATIVE;
        }

        // Equal-rate 32-bit to 16-bit is a plain shift; signedness is kept
        // and reconciled by the sign-change step below if needed.
        if self.from.rate == self.to.rate
            && matches!(cur.sample, SampleType::S32 | SampleType::U32)
            && matches!(self.to.format.sample, SampleType::S16 | SampleType::U16)
        {
            buf = demote_32_to_16(&buf);
            cur.sample = if cur.sample == SampleType::S32 {
                SampleType::S16
            } else {
                SampleType::U16
            };
            debug!("fast 32->16 conversion");
        }

        let needs_float = self.from.rate != self.to.rate
            || self.to.format.sample == SampleType::Float
            || self.to.format.sample.size() != cur.sample.size();
        if needs_float && cur.sample != SampleType::Float {
            buf = fixed_to_float(&buf, cur.sample)?;
            cur.sample = SampleType::Float;
        }

        if let Some(resampler) = self.resampler.as_mut() {
            let resampled = resampler.process(&f32_from_bytes(&buf))?;
            buf = f32_to_bytes(&resampled);
        }

        if cur.sample != self.to.format.sample {
            if cur.sample != SampleType::Float {
                // Same width, opposite signedness: flip the sign bit.
                change_sign(&mut buf, cur.sample);
            } else {
                buf = float_to_fixed(&f32_from_bytes(&buf), self.to.format.sample)?;
            }
            cur.sample = self.to.format.sample;
        }

        if cur.endian != self.to.format.endian {
            swap_endian(&mut buf, cur.sample);
            cur.endian = self.to.format.endian;
        }

        if self.from.channels == 1 && self.to.channels == 2 {
            buf = mono_to_stereo(&buf, cur.sample.size());
        }

        Ok(buf)
    }
}

/// Byte-swaps multi-byte integer samples in place. One-byte and float
/// samples keep their representation.
fn swap_endian(buf: &mut [u8], sample: SampleType) {
    match sample {
        SampleType::U8 | SampleType::S8 | SampleType::Float => {}
        SampleType::U16 | SampleType::S16 => {
            for pair in buf.chunks_exact_mut(2) {
                pair.swap(0, 1);
            }
        }
        SampleType::U32 | SampleType::S32 => {
            for quad in buf.chunks_exact_mut(4) {
                quad.reverse();
            }
        }
    }
}

fn demote_32_to_16(buf: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(buf.len() / 2);
    for s in buf.chunks_exact(4) {
        let wide = u32::from_ne_bytes([s[0], s[1], s[2], s[3]]);
        out.extend_from_slice(&((wide >> 16) as u16).to_ne_bytes());
    }
    out
}

fn change_sign(buf: &mut [u8], sample: SampleType) {
    match sample {
        SampleType::U8 | SampleType::S8 => {
            for b in buf.iter_mut() {
                *b ^= 1 << 7;
            }
        }
        SampleType::U16 | SampleType::S16 => {
            for s in buf.chunks_exact_mut(2) {
                let v = u16::from_ne_bytes([s[0], s[1]]) ^ (1 << 15);
                s.copy_from_slice(&v.to_ne_bytes());
            }
        }
        SampleType::U32 | SampleType::S32 => {
            for s in buf.chunks_exact_mut(4) {
                let v = u32::from_ne_bytes([s[0], s[1], s[2], s[3]]) ^ (1 << 31);
                s.copy_from_slice(&v.to_ne_bytes());
            }
        }
        SampleType::Float => {}
    }
}

/// Fixed point to float, scaled so the output lies in [-1.0, 1.0).
/// Only signed sources have a float representation here.
fn fixed_to_float(buf: &[u8], sample: SampleType) -> Result<Vec<u8>, ConvertError> {
    let floats: Vec<f32> = match sample {
        SampleType::S8 => buf
            .iter()
            .map(|b| f32::from(*b as i8) / (i8::MAX as f32 + 1.0))
            .collect(),
        SampleType::S16 => buf
            .chunks_exact(2)
            .map(|s| f32::from(i16::from_ne_bytes([s[0], s[1]])) / (i16::MAX as f32 + 1.0))
            .collect(),
        SampleType::S32 => buf
            .chunks_exact(4)
            .map(|s| {
                i32::from_ne_bytes([s[0], s[1], s[2], s[3]]) as f32 / (i32::MAX as f32 + 1.0)
            })
            .collect(),
        other => return Err(ConvertError::UnsupportedToFloat(other.as_str())),
    };
    Ok(f32_to_bytes(&floats))
}

// Maximum and minimum values of 32-bit samples: 24 significant bits,
// shifted left 8 when stored.
const S24_MAX: i32 = (1 << 23) - 1;
const S24_MIN: i32 = -(1 << 23);

fn float_to_fixed(input: &[f32], sample: SampleType) -> Result<Vec<u8>, ConvertError> {
    match sample {
        SampleType::S8 => {
            let mut out = Vec::with_capacity(input.len());
            for &x in input {
                let f = x * i32::MAX as f32;
                let v = if f >= i32::MAX as f32 {
                    i8::MAX
                } else if f <= i32::MIN as f32 {
                    i8::MIN
                } else {
                    ((f.round() as i32) >> 24) as i8
                };
                out.push(v as u8);
            }
            Ok(out)
        }
        SampleType::S16 => {
            let mut out = Vec::with_capacity(input.len() * 2);
            for &x in input {
                let f = x * i32::MAX as f32;
                let v = if f >= i32::MAX as f32 {
                    i16::MAX
                } else if f <= i32::MIN as f32 {
                    i16::MIN
                } else {
                    ((f.round() as i32) >> 16) as i16
                };
                out.extend_from_slice(&v.to_ne_bytes());
            }
            Ok(out)
        }
        SampleType::S32 => {
            let mut out = Vec::with_capacity(input.len() * 4);
            for &x in input {
                let f = x * S24_MAX as f32;
                let v = if f >= S24_MAX as f32 {
                    S24_MAX
                } else if f <= S24_MIN as f32 {
                    S24_MIN
                } else {
                    f.round() as i32
                };
                out.extend_from_slice(&(v << 8).to_ne_bytes());
            }
            Ok(out)
        }
        other => Err(ConvertError::UnsupportedFromFloat(other.as_str())),
    }
}

fn mono_to_stereo(buf: &[u8], sample_bytes: usize) -> Vec<u8> {
    let mut out = Vec::with_capacity(buf.len() * 2);
    for s in buf.chunks_exact(sample_bytes) {
        out.extend_from_slice(s);
        out.extend_from_slice(s);
    }
    out
}

fn f32_from_bytes(buf: &[u8]) -> Vec<f32> {
    buf.chunks_exact(4)
        .map(|s| f32::from_ne_bytes([s[0], s[1], s[2], s[3]]))
        .collect()
}

fn f32_to_bytes(samples: &[f32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(samples.len() * 4);
    for s in samples {
        out.extend_from_slice(&s.to_ne_bytes());
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::SampleFormat;

    fn params(sample: SampleType, channels: u8, rate: u32) -> SoundParams {
        SoundParams::new(SampleFormat::native(sample), channels, rate)
    }

    fn s16_bytes(samples: &[i16]) -> Vec<u8> {
        samples.iter().flat_map(|s| s.to_ne_bytes()).collect()
    }

    fn s16_values(buf: &[u8]) -> Vec<i16> {
        buf.chunks_exact(2)
            .map(|s| i16::from_ne_bytes([s[0], s[1]]))
            .collect()
    }

    #[test]
    fn identical_params_are_rejected() {
        let p = params(SampleType::S16, 2, 44_100);
        assert!(matches!(
            AudioConverter::new(p, p, ResampleMethod::Linear),
            Err(ConvertError::NothingToConvert)
        ));
    }

    #[test]
    fn stereo_to_mono_is_rejected() {
        let from = params(SampleType::S16, 2, 44_100);
        let to = params(SampleType::S16, 1, 44_100);
        assert!(matches!(
            AudioConverter::new(from, to, ResampleMethod::Linear),
            Err(ConvertError::UnsupportedChannels { from: 2, to: 1 })
        ));
    }

    #[test]
    fn fast_path_shifts_32_to_16() {
        let from = params(SampleType::S32, 2, 44_100);
        let to = params(SampleType::S16, 2, 44_100);
        let mut conv = AudioConverter::new(from, to, ResampleMethod::Linear).unwrap();

        let input: Vec<i32> = vec![0x0102_0304, -0x0102_0304, i32::MAX, i32::MIN];
        let bytes: Vec<u8> = input.iter().flat_map(|s| s.to_ne_bytes()).collect();
        let out = conv.process(&bytes).unwrap();

        let expected: Vec<i16> = input.iter().map(|s| (s >> 16) as i16).collect();
        assert_eq!(s16_values(&out), expected);
    }

    #[test]
    fn sign_change_round_trips() {
        let s16 = params(SampleType::S16, 2, 44_100);
        let u16p = params(SampleType::U16, 2, 44_100);
        let mut there = AudioConverter::new(s16, u16p, ResampleMethod::Linear).unwrap();
        let mut back = AudioConverter::new(u16p, s16, ResampleMethod::Linear).unwrap();

        let original = s16_bytes(&[0, 1, -1, i16::MAX, i16::MIN, 12_345]);
        let unsigned = there.process(&original).unwrap();
        assert_ne!(unsigned, original);
        assert_eq!(back.process(&unsigned).unwrap(), original);
    }

    #[test]
    fn endianness_retag_swaps_bytes() {
        let from = SoundParams::new(
            SampleFormat::new(SampleType::S16, Endian::Big),
            2,
            44_100,
        );
        let to = SoundParams::new(
            SampleFormat::new(SampleType::S16, Endian::Little),
            2,
            44_100,
        );
        let mut conv = AudioConverter::new(from, to, ResampleMethod::Linear).unwrap();
        let out = conv.process(&[0x01, 0x02, 0x7F, 0x80]).unwrap();
        assert_eq!(out, vec![0x02, 0x01, 0x80, 0x7F]);
    }

    #[test]
    fn mono_expands_to_stereo() {
        let from = params(SampleType::S16, 1, 44_100);
        let to = params(SampleType::S16, 2, 44_100);
        let mut conv = AudioConverter::new(from, to, ResampleMethod::Linear).unwrap();
        let out = conv.process(&s16_bytes(&[7, -3])).unwrap();
        assert_eq!(s16_values(&out), vec![7, 7, -3, -3]);
    }

    #[test]
    fn s16_promotes_to_unit_range_float() {
        let from = params(SampleType::S16, 1, 44_100);
        let to = params(SampleType::Float, 1, 44_100);
        let mut conv = AudioConverter::new(from, to, ResampleMethod::Linear).unwrap();
        let out = conv.process(&s16_bytes(&[i16::MIN, 0, 16_384])).unwrap();
        let floats = f32_from_bytes(&out);
        assert_eq!(floats, vec![-1.0, 0.0, 0.5]);
    }

    #[test]
    fn float_to_s16_scales_and_clamps() {
        let from = params(SampleType::Float, 1, 44_100);
        let to = params(SampleType::S16, 1, 44_100);
        let mut conv = AudioConverter::new(from, to, ResampleMethod::Linear).unwrap();
        let out = conv.process(&f32_to_bytes(&[0.5, -0.5, 1.0, -1.0, 0.0])).unwrap();
        assert_eq!(
            s16_values(&out),
            vec![16_384, -16_384, i16::MAX, i16::MIN, 0]
        );
    }

    #[test]
    fn float_to_s32_keeps_eight_bits_of_headroom() {
        let from = params(SampleType::Float, 1, 44_100);
        let to = params(SampleType::S32, 1, 44_100);
        let mut conv = AudioConverter::new(from, to, ResampleMethod::Linear).unwrap();
        let out = conv.process(&f32_to_bytes(&[1.0, -1.0, 0.5])).unwrap();
        let values: Vec<i32> = out
            .chunks_exact(4)
            .map(|s| i32::from_ne_bytes([s[0], s[1], s[2], s[3]]))
            .collect();
        assert_eq!(values[0], S24_MAX << 8);
        assert_eq!(values[1], S24_MIN << 8);
        assert_eq!(values[2] >> 8, 4_194_304);
        // The low byte is headroom and stays clear.
        assert!(values.iter().all(|v| v & 0xFF == 0));
    }

    #[test]
    fn unsigned_source_cannot_reach_the_float_stage() {
        let from = params(SampleType::U16, 1, 22_050);
        let to = params(SampleType::U16, 1, 44_100);
        let mut conv = AudioConverter::new(from, to, ResampleMethod::Linear).unwrap();
        assert!(matches!(
            conv.process(&[0, 1, 2, 3]),
            Err(ConvertError::UnsupportedToFloat("u16"))
        ));
    }

    #[test]
    fn rate_conversion_carries_input_across_calls() {
        let from = params(SampleType::S16, 1, 22_050);
        let to = params(SampleType::S16, 1, 44_100);
        let mut conv = AudioConverter::new(from, to, ResampleMethod::Linear).unwrap();

        // Below one resampler chunk: everything is carried, nothing emitted.
        let out = conv.process(&s16_bytes(&vec![100; 512])).unwrap();
        assert!(out.is_empty());

        // Enough input accumulated now; roughly twice as many frames come out.
        let out = conv.process(&s16_bytes(&vec![100; 2048])).unwrap();
        assert!(!out.is_empty());
        assert_eq!(out.len() % 2, 0);
        let frames = out.len() / 2;
        assert!(frames > 3000, "expected ~2x upsampled output, got {frames}");
    }

    #[test]
    fn fast_path_does_not_apply_across_rates() {
        let from = params(SampleType::S32, 1, 22_050);
        let to = params(SampleType::S16, 1, 44_100);
        let mut conv = AudioConverter::new(from, to, ResampleMethod::Linear).unwrap();

        // S32 with a rate change goes through float promotion; the
        // converter accepts it and produces frames once a chunk fills.
        let input: Vec<u8> = vec![0x40_00_00_00i32; 2048]
            .iter()
            .flat_map(|s| s.to_ne_bytes())
            .collect();
        let out = conv.process(&input).unwrap();
        assert!(!out.is_empty());
        // Output samples are 16-bit; values near half scale.
        let values = s16_values(&out);
        let mid = values[values.len() / 2];
        assert!((8_000..=24_576).contains(&mid), "unexpected level {mid}");
    }
}
