/// Status flags attached to a capture packet or a render release.
///
/// Bit values follow the platform buffer flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct BufferFlags {
    /// Gap or glitch between this packet and the previous one.
    pub data_discontinuity: bool,
    /// Packet should be treated as silence regardless of its contents.
    pub silent: bool,
    /// Device position / timestamp for this packet is unreliable.
    pub timestamp_error: bool,
}

impl BufferFlags {
    pub const DATA_DISCONTINUITY: u32 = 0x1;
    pub const SILENT: u32 = 0x2;
    pub const TIMESTAMP_ERROR: u32 = 0x4;

    pub const NONE: BufferFlags = BufferFlags {
        data_discontinuity: false,
        silent: false,
        timestamp_error: false,
    };

    pub fn from_bits(bits: u32) -> Self {
        Self {
            data_discontinuity: bits & Self::DATA_DISCONTINUITY != 0,
            silent: bits & Self::SILENT != 0,
            timestamp_error: bits & Self::TIMESTAMP_ERROR != 0,
        }
    }

    pub fn bits(&self) -> u32 {
        let mut bits = 0;
        if self.data_discontinuity {
            bits |= Self::DATA_DISCONTINUITY;
        }
        if self.silent {
            bits |= Self::SILENT;
        }
        if self.timestamp_error {
            bits |= Self::TIMESTAMP_ERROR;
        }
        bits
    }

    /// True when the block should not be trusted as continuous signal.
    pub fn is_suspect(&self) -> bool {
        self.data_discontinuity || self.timestamp_error
    }

    /// Accumulate flags across several packets.
    pub fn merge(self, other: BufferFlags) -> Self {
        Self::from_bits(self.bits() | other.bits())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn platform_bits() {
        let flags = BufferFlags::from_bits(0x1 | 0x4);
        assert!(flags.data_discontinuity);
        assert!(!flags.silent);
        assert!(flags.timestamp_error);
        assert_eq!(flags.bits(), 0x5);
        assert!(flags.is_suspect());
    }

    #[test]
    fn merge_accumulates() {
        let silent = BufferFlags::from_bits(BufferFlags::SILENT);
        let merged = BufferFlags::NONE.merge(silent).merge(BufferFlags::from_bits(0x1));
        assert_eq!(merged.bits(), 0x3);
        assert!(!BufferFlags::NONE.is_suspect());
    }
}
