use crate::error::EngineError;

/// Lowest sample rate accepted for a logical buffer.
pub const FREQUENCY_MIN: u32 = 100;
/// Highest sample rate accepted for a logical buffer.
pub const FREQUENCY_MAX: u32 = 200_000;

/// PCM format descriptor for a logical buffer.
///
/// All byte offsets handled by the engine (write offsets, notification
/// offsets, playback positions) are relative to data in this format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PcmFormat {
    pub channels: u16,
    pub sample_rate: u32,
    pub bits_per_sample: u16,
    /// Bytes per sample frame; must equal `channels * bits_per_sample / 8`.
    pub block_align: u16,
}

impl PcmFormat {
    pub fn new(channels: u16, sample_rate: u32, bits_per_sample: u16) -> Self {
        Self {
            channels,
            sample_rate,
            bits_per_sample,
            block_align: channels * bits_per_sample / 8,
        }
    }

    /// Checks the descriptor against the ranges the engine accepts.
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.channels == 0 {
            return Err(EngineError::InvalidParameter("zero channels"));
        }
        if self.sample_rate < FREQUENCY_MIN || self.sample_rate > FREQUENCY_MAX {
            return Err(EngineError::InvalidParameter("sample rate out of range"));
        }
        if self.bits_per_sample == 0 || self.bits_per_sample % 8 != 0 || self.bits_per_sample > 32 {
            return Err(EngineError::InvalidParameter("unsupported bit depth"));
        }
        if self.block_align != self.channels * self.bits_per_sample / 8 {
            return Err(EngineError::InvalidParameter("block alignment mismatch"));
        }
        Ok(())
    }

    /// Byte value representing silence. Unsigned 8-bit PCM is centered at
    /// mid-scale; every other depth is signed or float and centers at zero.
    pub fn silence_byte(&self) -> u8 {
        if self.bits_per_sample == 8 {
            0x80
        } else {
            0x00
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_common_formats() {
        assert!(PcmFormat::new(1, 22_050, 8).validate().is_ok());
        assert!(PcmFormat::new(2, 44_100, 16).validate().is_ok());
        assert!(PcmFormat::new(6, 48_000, 32).validate().is_ok());
    }

    #[test]
    fn rejects_bad_descriptors() {
        assert!(PcmFormat::new(0, 44_100, 16).validate().is_err());
        assert!(PcmFormat::new(2, 99, 16).validate().is_err());
        assert!(PcmFormat::new(2, 200_001, 16).validate().is_err());
        assert!(PcmFormat::new(2, 44_100, 12).validate().is_err());
        assert!(PcmFormat::new(2, 44_100, 0).validate().is_err());

        let mut format = PcmFormat::new(2, 44_100, 16);
        format.block_align = 3;
        assert!(format.validate().is_err());
    }

    #[test]
    fn silence_is_mid_scale_for_unsigned_eight_bit() {
        assert_eq!(PcmFormat::new(1, 22_050, 8).silence_byte(), 0x80);
        assert_eq!(PcmFormat::new(2, 44_100, 16).silence_byte(), 0x00);
        assert_eq!(PcmFormat::new(2, 44_100, 32).silence_byte(), 0x00);
    }
}
