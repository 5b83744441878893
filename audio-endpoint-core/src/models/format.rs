//! Stream format descriptor and its fixed-size binary form.
//!
//! The binary form is the 40-byte extensible wave format structure exchanged
//! with the device API. Layout (little-endian):
//!
//! ```text
//! [0-1]    format tag (0xFFFE = extensible)
//! [2-3]    channels
//! [4-7]    sample rate
//! [8-11]   average bytes per second = sample_rate * block_align
//! [12-13]  block align = channels * bits_per_sample / 8
//! [14-15]  bits per sample (container size)
//! [16-17]  extension size (22)
//! [18-19]  valid bits per sample
//! [20-23]  channel mask
//! [24-39]  sub-format GUID (PCM or IEEE float)
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};

use super::error::AudioError;

/// Size of the extensible format descriptor in bytes.
pub const FORMAT_DESCRIPTOR_SIZE: usize = 40;

/// Size of the basic (non-extensible) format descriptor in bytes.
pub const BASIC_FORMAT_DESCRIPTOR_SIZE: usize = 18;

const TAG_PCM: u16 = 0x0001;
const TAG_IEEE_FLOAT: u16 = 0x0003;
const TAG_EXTENSIBLE: u16 = 0xFFFE;
const EXTENSION_SIZE: u16 = 22;

const SUBTYPE_PCM: u128 = 0x00000001_0000_0010_8000_00aa00389b71;
const SUBTYPE_IEEE_FLOAT: u128 = 0x00000003_0000_0010_8000_00aa00389b71;

/// Sample encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SampleType {
    Int,
    Float,
}

/// Stream access mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ShareMode {
    /// Mixed with other applications by the platform audio engine.
    Shared,
    /// Sole owner of the hardware.
    Exclusive,
}

/// Negotiated or requested stream format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StreamFormat {
    pub sample_rate: u32,
    /// Container size of one sample in bits.
    pub bits_per_sample: u16,
    /// Meaningful bits inside the container (24-in-32 and similar).
    pub valid_bits_per_sample: u16,
    pub channels: u16,
    pub channel_mask: u32,
    pub sample_type: SampleType,
}

impl StreamFormat {
    /// Integer PCM with a default speaker layout for `channels`.
    pub fn pcm(sample_rate: u32, bits_per_sample: u16, channels: u16) -> Self {
        Self {
            sample_rate,
            bits_per_sample,
            valid_bits_per_sample: bits_per_sample,
            channels,
            channel_mask: default_channel_mask(channels),
            sample_type: SampleType::Int,
        }
    }

    /// 32-bit IEEE float with a default speaker layout for `channels`.
    pub fn float(sample_rate: u32, channels: u16) -> Self {
        Self {
            sample_rate,
            bits_per_sample: 32,
            valid_bits_per_sample: 32,
            channels,
            channel_mask: default_channel_mask(channels),
            sample_type: SampleType::Float,
        }
    }

    /// Bytes per frame (all channels of one sample instant).
    pub fn block_align(&self) -> usize {
        self.channels as usize * self.bits_per_sample as usize / 8
    }

    pub fn bytes_per_second(&self) -> u32 {
        self.sample_rate * self.block_align() as u32
    }

    /// Number of whole frames covered by `duration`, rounded down.
    pub fn frames_for(&self, duration: std::time::Duration) -> u32 {
        (self.sample_rate as u128 * duration.as_micros() / 1_000_000) as u32
    }

    pub fn validate(&self) -> Result<(), AudioError> {
        if self.sample_rate == 0 {
            return Err(AudioError::InvalidArgument("sample rate must be positive".into()));
        }
        if self.channels == 0 {
            return Err(AudioError::InvalidArgument("channel count must be positive".into()));
        }
        let supported_bits = match self.sample_type {
            SampleType::Int => [16, 24, 32].contains(&self.bits_per_sample),
            SampleType::Float => self.bits_per_sample == 32,
        };
        if !supported_bits {
            return Err(AudioError::FormatNotSupported(format!(
                "{}-bit {:?} samples",
                self.bits_per_sample, self.sample_type
            )));
        }
        if self.valid_bits_per_sample == 0 || self.valid_bits_per_sample > self.bits_per_sample {
            return Err(AudioError::InvalidArgument(format!(
                "valid bits {} exceed container {}",
                self.valid_bits_per_sample, self.bits_per_sample
            )));
        }
        Ok(())
    }

    /// Encode as the 40-byte extensible descriptor.
    pub fn to_bytes(&self) -> [u8; FORMAT_DESCRIPTOR_SIZE] {
        let mut out = [0u8; FORMAT_DESCRIPTOR_SIZE];
        let block_align = self.block_align() as u16;
        let sub_format = match self.sample_type {
            SampleType::Int => SUBTYPE_PCM,
            SampleType::Float => SUBTYPE_IEEE_FLOAT,
        };

        out[0..2].copy_from_slice(&TAG_EXTENSIBLE.to_le_bytes());
        out[2..4].copy_from_slice(&self.channels.to_le_bytes());
        out[4..8].copy_from_slice(&self.sample_rate.to_le_bytes());
        out[8..12].copy_from_slice(&self.bytes_per_second().to_le_bytes());
        out[12..14].copy_from_slice(&block_align.to_le_bytes());
        out[14..16].copy_from_slice(&self.bits_per_sample.to_le_bytes());
        out[16..18].copy_from_slice(&EXTENSION_SIZE.to_le_bytes());
        out[18..20].copy_from_slice(&self.valid_bits_per_sample.to_le_bytes());
        out[20..24].copy_from_slice(&self.channel_mask.to_le_bytes());
        out[24..40].copy_from_slice(&guid_to_bytes(sub_format));
        out
    }

    /// Decode a basic (18-byte) or extensible (40-byte) descriptor.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, AudioError> {
        if bytes.len() < BASIC_FORMAT_DESCRIPTOR_SIZE {
            return Err(AudioError::InvalidArgument(format!(
                "format descriptor too short: {} bytes",
                bytes.len()
            )));
        }

        let tag = read_u16(bytes, 0);
        let channels = read_u16(bytes, 2);
        let sample_rate = read_u32(bytes, 4);
        let bits_per_sample = read_u16(bytes, 14);

        let format = match tag {
            TAG_PCM | TAG_IEEE_FLOAT => Self {
                sample_rate,
                bits_per_sample,
                valid_bits_per_sample: bits_per_sample,
                channels,
                channel_mask: default_channel_mask(channels),
                sample_type: if tag == TAG_PCM { SampleType::Int } else { SampleType::Float },
            },
            TAG_EXTENSIBLE => {
                if bytes.len() < FORMAT_DESCRIPTOR_SIZE || read_u16(bytes, 16) < EXTENSION_SIZE {
                    return Err(AudioError::InvalidArgument(
                        "truncated extensible format descriptor".into(),
                    ));
                }
                let sample_type = match guid_from_bytes(&bytes[24..40]) {
                    SUBTYPE_PCM => SampleType::Int,
                    SUBTYPE_IEEE_FLOAT => SampleType::Float,
                    other => {
                        return Err(AudioError::FormatNotSupported(format!(
                            "sub-format {:032x}",
                            other
                        )))
                    }
                };
                Self {
                    sample_rate,
                    bits_per_sample,
                    valid_bits_per_sample: read_u16(bytes, 18),
                    channels,
                    channel_mask: read_u32(bytes, 20),
                    sample_type,
                }
            }
            other => {
                return Err(AudioError::FormatNotSupported(format!("format tag {:#06x}", other)));
            }
        };

        Ok(format)
    }
}

impl Default for StreamFormat {
    fn default() -> Self {
        Self::pcm(48000, 16, 1)
    }
}

impl fmt::Display for StreamFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rate_khz = self.sample_rate as f64 / 1000.0;
        let kind = match self.sample_type {
            SampleType::Int => "",
            SampleType::Float => " float",
        };
        if rate_khz.fract() == 0.0 {
            write!(f, "{}kHz/{}-bit{}/{}ch", rate_khz as u32, self.bits_per_sample, kind, self.channels)
        } else {
            write!(f, "{:.1}kHz/{}-bit{}/{}ch", rate_khz, self.bits_per_sample, kind, self.channels)
        }
    }
}

/// Speaker mask for common layouts; zero (unspecified) for anything unusual.
pub fn default_channel_mask(channels: u16) -> u32 {
    match channels {
        1 => 0x4,   // front center
        2 => 0x3,   // front left | front right
        4 => 0x33,  // quad
        6 => 0x3F,  // 5.1
        8 => 0x63F, // 7.1 surround
        _ => 0,
    }
}

/// Encode a GUID held as a `u128` into its in-memory (mixed-endian) byte order.
pub(crate) fn guid_to_bytes(guid: u128) -> [u8; 16] {
    let mut out = [0u8; 16];
    out[0..4].copy_from_slice(&((guid >> 96) as u32).to_le_bytes());
    out[4..6].copy_from_slice(&((guid >> 80) as u16).to_le_bytes());
    out[6..8].copy_from_slice(&((guid >> 64) as u16).to_le_bytes());
    out[8..16].copy_from_slice(&(guid as u64).to_be_bytes());
    out
}

pub(crate) fn guid_from_bytes(bytes: &[u8]) -> u128 {
    let data1 = read_u32(bytes, 0) as u128;
    let data2 = read_u16(bytes, 4) as u128;
    let data3 = read_u16(bytes, 6) as u128;
    let mut data4 = [0u8; 8];
    data4.copy_from_slice(&bytes[8..16]);
    (data1 << 96) | (data2 << 80) | (data3 << 64) | u64::from_be_bytes(data4) as u128
}

fn read_u16(bytes: &[u8], offset: usize) -> u16 {
    u16::from_le_bytes([bytes[offset], bytes[offset + 1]])
}

fn read_u32(bytes: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([
        bytes[offset],
        bytes[offset + 1],
        bytes[offset + 2],
        bytes[offset + 3],
    ])
}
