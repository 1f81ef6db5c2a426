use bitflags::bitflags;

/// Sample value type carried by a PCM stream.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SampleType {
    U8,
    S8,
    U16,
    S16,
    U32,
    S32,
    Float,
}

impl SampleType {
    /// Size of one sample in bytes.
    pub fn size(&self) -> usize {
        match self {
            SampleType::U8 | SampleType::S8 => 1,
            SampleType::U16 | SampleType::S16 => 2,
            SampleType::U32 | SampleType::S32 | SampleType::Float => 4,
        }
    }

    pub fn is_signed(&self) -> bool {
        matches!(self, SampleType::S8 | SampleType::S16 | SampleType::S32)
    }

    pub fn is_float(&self) -> bool {
        matches!(self, SampleType::Float)
    }

    /// The same width with the opposite signedness; `None` for Float.
    pub fn opposite_sign(&self) -> Option<SampleType> {
        match self {
            SampleType::U8 => Some(SampleType::S8),
            SampleType::S8 => Some(SampleType::U8),
            SampleType::U16 => Some(SampleType::S16),
            SampleType::S16 => Some(SampleType::U16),
            SampleType::U32 => Some(SampleType::S32),
            SampleType::S32 => Some(SampleType::U32),
            SampleType::Float => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SampleType::U8 => "u8",
            SampleType::S8 => "s8",
            SampleType::U16 => "u16",
            SampleType::S16 => "s16",
            SampleType::U32 => "u32",
            SampleType::S32 => "s32",
            SampleType::Float => "float",
        }
    }
}

/// Byte order of multi-byte samples.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Endian {
    Little,
    Big,
}

impl Endian {
    /// The machine byte order, resolved at compile time.
    pub const NATIVE: Endian = if cfg!(target_endian = "big") {
        Endian::Big
    } else {
        Endian::Little
    };
}

/// Complete sample format: value type plus byte order.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SampleFormat {
    pub sample: SampleType,
    pub endian: Endian,
}

impl SampleFormat {
    pub fn new(sample: SampleType, endian: Endian) -> Self {
        Self { sample, endian }
    }

    /// Format with the given sample type in native byte order.
    pub fn native(sample: SampleType) -> Self {
        Self::new(sample, Endian::NATIVE)
    }

    pub fn bytes(&self) -> usize {
        self.sample.size()
    }

    pub fn is_native_endian(&self) -> bool {
        self.endian == Endian::NATIVE
    }

    pub fn with_sample(self, sample: SampleType) -> Self {
        Self { sample, ..self }
    }

    pub fn with_endian(self, endian: Endian) -> Self {
        Self { endian, ..self }
    }
}

/// Parameters describing a PCM stream: format, channel count and rate.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SoundParams {
    pub format: SampleFormat,
    pub channels: u8,
    pub rate: u32,
}

impl SoundParams {
    pub fn new(format: SampleFormat, channels: u8, rate: u32) -> Self {
        Self {
            format,
            channels,
            rate,
        }
    }

    /// Bytes of one interleaved frame (one sample per channel).
    pub fn frame_bytes(&self) -> usize {
        self.format.bytes() * self.channels as usize
    }

    /// Bytes of PCM per second of playback.
    pub fn bytes_per_second(&self) -> usize {
        self.frame_bytes() * self.rate as usize
    }
}

bitflags! {
    /// Bitset of sample formats a device accepts, one bit per
    /// (sample type, endianness) pair. Capability negotiation is a
    /// bitwise AND between what the producer has and what the device takes.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct FormatMask: u16 {
        const U8_LE = 1 << 0;
        const U8_BE = 1 << 1;
        const S8_LE = 1 << 2;
        const S8_BE = 1 << 3;
        const U16_LE = 1 << 4;
        const U16_BE = 1 << 5;
        const S16_LE = 1 << 6;
        const S16_BE = 1 << 7;
        const U32_LE = 1 << 8;
        const U32_BE = 1 << 9;
        const S32_LE = 1 << 10;
        const S32_BE = 1 << 11;
        const FLOAT_LE = 1 << 12;
        const FLOAT_BE = 1 << 13;
    }
}

impl FormatMask {
    /// The single bit matching `format`.
    pub fn of(format: SampleFormat) -> FormatMask {
        let le = format.endian == Endian::Little;
        match format.sample {
            SampleType::U8 => {
                if le {
                    FormatMask::U8_LE
                } else {
                    FormatMask::U8_BE
                }
            }
            SampleType::S8 => {
                if le {
                    FormatMask::S8_LE
                } else {
                    FormatMask::S8_BE
                }
            }
            SampleType::U16 => {
                if le {
                    FormatMask::U16_LE
                } else {
                    FormatMask::U16_BE
                }
            }
            SampleType::S16 => {
                if le {
                    FormatMask::S16_LE
                } else {
                    FormatMask::S16_BE
                }
            }
            SampleType::U32 => {
                if le {
                    FormatMask::U32_LE
                } else {
                    FormatMask::U32_BE
                }
            }
            SampleType::S32 => {
                if le {
                    FormatMask::S32_LE
                } else {
                    FormatMask::S32_BE
                }
            }
            SampleType::Float => {
                if le {
                    FormatMask::FLOAT_LE
                } else {
                    FormatMask::FLOAT_BE
                }
            }
        }
    }

    /// The bit for `sample` in machine byte order.
    pub fn native(sample: SampleType) -> FormatMask {
        Self::of(SampleFormat::native(sample))
    }

    pub fn supports(&self, format: SampleFormat) -> bool {
        self.contains(Self::of(format))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bytes_per_second_counts_channels_and_width() {
        let params = SoundParams::new(SampleFormat::native(SampleType::S16), 2, 44_100);
        assert_eq!(params.frame_bytes(), 4);
        assert_eq!(params.bytes_per_second(), 176_400);
    }

    #[test]
    fn native_endian_matches_target() {
        let native = SampleFormat::native(SampleType::S16);
        assert!(native.is_native_endian());
        if cfg!(target_endian = "little") {
            assert_eq!(native.endian, Endian::Little);
        } else {
            assert_eq!(native.endian, Endian::Big);
        }
    }

    #[test]
    fn mask_intersection_is_negotiation() {
        let device = FormatMask::native(SampleType::S16) | FormatMask::native(SampleType::Float);
        let producer = FormatMask::native(SampleType::Float) | FormatMask::native(SampleType::U8);
        let common = device & producer;
        assert!(common.supports(SampleFormat::native(SampleType::Float)));
        assert!(!common.supports(SampleFormat::native(SampleType::S16)));
        assert!(!common.supports(SampleFormat::native(SampleType::U8)));
    }

    #[test]
    fn opposite_sign_pairs_up() {
        assert_eq!(SampleType::S16.opposite_sign(), Some(SampleType::U16));
        assert_eq!(SampleType::U32.opposite_sign(), Some(SampleType::S32));
        assert_eq!(SampleType::Float.opposite_sign(), None);
    }
}
