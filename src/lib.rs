//! Audio playback pipeline for a console music player.
//!
//! Decoded PCM flows from a producer through the [`AudioConverter`]
//! (format, endianness, channel and rate reshaping), optionally through
//! the [`SoftMixer`] (gain, amplification, mono downmix), into the
//! [`OutputBuffer`], whose worker thread drains it to a [`Device`]
//! backend and keeps track of playback time. Decoders, configuration
//! loading and the user interface live upstream of this crate.

pub mod convert;
pub mod fifo;
pub mod options;
pub mod output;
pub mod params;
pub mod softmixer;

pub use convert::resample::ResampleMethod;
pub use convert::{AudioConverter, ConvertError};
pub use fifo::FifoBuf;
pub use options::Options;
pub use output::{CpalDevice, Device, DeviceCaps, DeviceError, NullDevice, OutputBuffer};
pub use params::{Endian, FormatMask, SampleFormat, SampleType, SoundParams};
pub use softmixer::SoftMixer;
