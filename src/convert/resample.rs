use std::str::FromStr;

use rubato::{
    FastFixedIn, PolynomialDegree, ResampleError, Resampler, ResamplerConstructionError,
    SincFixedIn, SincInterpolationParameters, SincInterpolationType, WindowFunction,
};
use serde::{Deserialize, Serialize};

/// Frames fed to the resampler per processing round.
const CHUNK_FRAMES: usize = 1024;

/// Resampling algorithm selected by the `ResampleMethod` configuration key.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResampleMethod {
    SincBestQuality,
    SincMediumQuality,
    SincFastest,
    ZeroOrderHold,
    Linear,
}

impl ResampleMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResampleMethod::SincBestQuality => "SincBestQuality",
            ResampleMethod::SincMediumQuality => "SincMediumQuality",
            ResampleMethod::SincFastest => "SincFastest",
            ResampleMethod::ZeroOrderHold => "ZeroOrderHold",
            ResampleMethod::Linear => "Linear",
        }
    }
}

impl Default for ResampleMethod {
    fn default() -> Self {
        ResampleMethod::Linear
    }
}

impl FromStr for ResampleMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let all = [
            ResampleMethod::SincBestQuality,
            ResampleMethod::SincMediumQuality,
            ResampleMethod::SincFastest,
            ResampleMethod::ZeroOrderHold,
            ResampleMethod::Linear,
        ];
        all.into_iter()
            .find(|m| m.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown ResampleMethod: {s}"))
    }
}

fn sinc_params(
    sinc_len: usize,
    oversampling_factor: usize,
    interpolation: SincInterpolationType,
) -> SincInterpolationParameters {
    SincInterpolationParameters {
        sinc_len,
        f_cutoff: 0.95,
        interpolation,
        oversampling_factor,
        window: WindowFunction::BlackmanHarris2,
    }
}

enum Inner {
    Sinc(SincFixedIn<f32>),
    Fast(FastFixedIn<f32>),
}

impl Inner {
    fn input_frames_next(&self) -> usize {
        match self {
            Inner::Sinc(r) => r.input_frames_next(),
            Inner::Fast(r) => r.input_frames_next(),
        }
    }

    fn process(&mut self, planar: &[Vec<f32>]) -> Result<Vec<Vec<f32>>, ResampleError> {
        match self {
            Inner::Sinc(r) => r.process(planar, None),
            Inner::Fast(r) => r.process(planar, None),
        }
    }
}

/// Streaming rate converter over interleaved f32 samples. The resampler
/// consumes fixed-size chunks; input that does not yet fill a chunk is
/// carried over to the next call, so only fully produced frames are
/// emitted. The carry belongs to one stream and must be dropped (by
/// dropping the converter) on stream change.
pub struct StreamResampler {
    inner: Inner,
    channels: usize,
    carry: Vec<f32>,
}

impl StreamResampler {
    pub fn new(
        method: ResampleMethod,
        from_rate: u32,
        to_rate: u32,
        channels: usize,
    ) -> Result<Self, ResamplerConstructionError> {
        let ratio = f64::from(to_rate) / f64::from(from_rate);

        let inner = match method {
            ResampleMethod::SincBestQuality => Inner::Sinc(SincFixedIn::<f32>::new(
                ratio,
                2.0,
                sinc_params(256, 256, SincInterpolationType::Cubic),
                CHUNK_FRAMES,
                channels,
            )?),
            ResampleMethod::SincMediumQuality => Inner::Sinc(SincFixedIn::<f32>::new(
                ratio,
                2.0,
                sinc_params(128, 128, SincInterpolationType::Linear),
                CHUNK_FRAMES,
                channels,
            )?),
            ResampleMethod::SincFastest => Inner::Sinc(SincFixedIn::<f32>::new(
                ratio,
                2.0,
                sinc_params(64, 64, SincInterpolationType::Nearest),
                CHUNK_FRAMES,
                channels,
            )?),
            ResampleMethod::ZeroOrderHold => Inner::Fast(FastFixedIn::<f32>::new(
                ratio,
                2.0,
                PolynomialDegree::Nearest,
                CHUNK_FRAMES,
                channels,
            )?),
            ResampleMethod::Linear => Inner::Fast(FastFixedIn::<f32>::new(
                ratio,
                2.0,
                PolynomialDegree::Linear,
                CHUNK_FRAMES,
                channels,
            )?),
        };

        Ok(Self {
            inner,
            channels,
            carry: Vec::new(),
        })
    }

    /// Resamples `interleaved` plus any carried-over input. Returns the
    /// interleaved output produced this round, which may be empty when the
    /// accumulated input is still shorter than one resampler chunk.
    pub fn process(&mut self, interleaved: &[f32]) -> Result<Vec<f32>, ResampleError> {
        self.carry.extend_from_slice(interleaved);

        let mut out = Vec::new();
        loop {
            let need = self.inner.input_frames_next() * self.channels;
            if self.carry.len() < need {
                break;
            }

            let mut planar = vec![Vec::with_capacity(need / self.channels); self.channels];
            for frame in self.carry[..need].chunks_exact(self.channels) {
                for (ch, sample) in frame.iter().enumerate() {
                    planar[ch].push(*sample);
                }
            }

            let resampled = self.inner.process(&planar)?;

            let frames = resampled.first().map_or(0, Vec::len);
            out.reserve(frames * self.channels);
            for i in 0..frames {
                for ch in &resampled {
                    out.push(ch[i]);
                }
            }

            self.carry.drain(..need);
        }

        Ok(out)
    }

    /// Input frames waiting for the next full chunk.
    pub fn pending_frames(&self) -> usize {
        self.carry.len() / self.channels
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn method_names_parse_case_insensitively() {
        assert_eq!(
            "sincbestquality".parse::<ResampleMethod>().unwrap(),
            ResampleMethod::SincBestQuality
        );
        assert_eq!(
            "ZEROORDERHOLD".parse::<ResampleMethod>().unwrap(),
            ResampleMethod::ZeroOrderHold
        );
        assert_eq!(
            "Linear".parse::<ResampleMethod>().unwrap(),
            ResampleMethod::Linear
        );
        assert!("Cubic".parse::<ResampleMethod>().is_err());
    }

    #[test]
    fn short_input_is_carried_not_emitted() {
        let mut rs = StreamResampler::new(ResampleMethod::Linear, 44_100, 48_000, 2).unwrap();
        let out = rs.process(&vec![0.0; 2 * 100]).unwrap();
        assert!(out.is_empty());
        assert_eq!(rs.pending_frames(), 100);
    }

    #[test]
    fn full_chunk_produces_output_and_keeps_remainder() {
        let mut rs = StreamResampler::new(ResampleMethod::Linear, 24_000, 48_000, 1).unwrap();
        let out = rs.process(&vec![0.25; CHUNK_FRAMES + 10]).unwrap();
        assert!(!out.is_empty());
        assert_eq!(rs.pending_frames(), 10);
    }

    #[test]
    fn upsampling_roughly_doubles_frames() {
        let mut rs = StreamResampler::new(ResampleMethod::Linear, 24_000, 48_000, 1).unwrap();
        let mut produced = 0;
        for _ in 0..8 {
            produced += rs.process(&vec![0.5; CHUNK_FRAMES]).unwrap().len();
        }
        let expected = 8 * CHUNK_FRAMES * 2;
        assert!(
            produced > expected * 8 / 10 && produced < expected * 12 / 10,
            "produced {produced}, expected about {expected}"
        );
    }

    #[test]
    fn stereo_output_stays_interleaved() {
        let mut rs = StreamResampler::new(ResampleMethod::ZeroOrderHold, 22_050, 44_100, 2).unwrap();
        // Left channel constant 1.0, right channel constant -1.0.
        let mut input = Vec::with_capacity(2 * CHUNK_FRAMES);
        for _ in 0..CHUNK_FRAMES {
            input.push(1.0);
            input.push(-1.0);
        }
        let out = rs.process(&input).unwrap();
        assert!(!out.is_empty());
        assert_eq!(out.len() % 2, 0);
        // Skip the filter warm-up, then channels must keep their values.
        for frame in out.chunks_exact(2).skip(out.len() / 4) {
            assert!(frame[0] > 0.5, "left drifted: {}", frame[0]);
            assert!(frame[1] < -0.5, "right drifted: {}", frame[1]);
        }
    }
}
