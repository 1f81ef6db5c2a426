use serde::{Deserialize, Serialize};

use crate::convert::resample::ResampleMethod;

/// Smallest accepted output buffer, in KiB.
pub const MIN_OUTPUT_BUFFER_KIB: usize = 128;

/// Tunables consumed by the playback pipeline. Field names serialize to the
/// literal configuration keys a front-end reads from its config file; the
/// defaults match a stock installation.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct Options {
    /// Output FIFO capacity in KiB.
    #[serde(rename = "OutputBuffer")]
    pub output_buffer_kib: usize,

    /// KiB to accumulate before playback starts.
    #[serde(rename = "Prebuffering")]
    pub prebuffering_kib: usize,

    #[serde(rename = "ResampleMethod")]
    pub resample_method: ResampleMethod,

    /// Request SCHED_RR max priority for the playback worker.
    #[serde(rename = "UseRealtimePriority")]
    pub use_realtime_priority: bool,

    /// Persist softmixer state between runs.
    #[serde(rename = "Softmixer_SaveState")]
    pub softmixer_save_state: bool,

    /// Permit the 32-bit (24 significant bits) output path.
    #[serde(rename = "Allow24bitOutput")]
    pub allow_24bit_output: bool,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            output_buffer_kib: 512,
            prebuffering_kib: 64,
            resample_method: ResampleMethod::Linear,
            use_realtime_priority: false,
            softmixer_save_state: true,
            allow_24bit_output: false,
        }
    }
}

impl Options {
    pub fn validate(&self) -> Result<(), String> {
        if self.output_buffer_kib < MIN_OUTPUT_BUFFER_KIB {
            return Err(format!(
                "OutputBuffer must be at least {MIN_OUTPUT_BUFFER_KIB} KiB, got {}",
                self.output_buffer_kib
            ));
        }
        if self.prebuffering_kib > self.output_buffer_kib {
            return Err(format!(
                "Prebuffering ({} KiB) cannot exceed OutputBuffer ({} KiB)",
                self.prebuffering_kib, self.output_buffer_kib
            ));
        }
        Ok(())
    }

    pub fn output_buffer_bytes(&self) -> usize {
        self.output_buffer_kib * 1024
    }

    pub fn prebuffering_bytes(&self) -> usize {
        self.prebuffering_kib * 1024
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        assert!(Options::default().validate().is_ok());
    }

    #[test]
    fn tiny_output_buffer_is_rejected() {
        let opts = Options {
            output_buffer_kib: 64,
            prebuffering_kib: 8,
            ..Options::default()
        };
        assert!(opts.validate().is_err());
    }

    #[test]
    fn prebuffer_larger_than_buffer_is_rejected() {
        let opts = Options {
            output_buffer_kib: 128,
            prebuffering_kib: 256,
            ..Options::default()
        };
        assert!(opts.validate().is_err());
    }
}
