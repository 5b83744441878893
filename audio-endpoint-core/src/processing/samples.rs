//! Sample conversion between device buffers and normalized `f32` audio.
//!
//! Device buffers are little-endian interleaved frames in the negotiated
//! `StreamFormat`. Integer containers are decoded by their container width;
//! the low `bits_per_sample - valid_bits_per_sample` bits are padding and end
//! up as sub-LSB noise after normalization.

use crate::models::error::AudioError;
use crate::models::format::{SampleType, StreamFormat};

const I24_MAX: f32 = 8_388_607.0;

/// Decode interleaved device bytes into normalized `[-1.0, 1.0]` samples.
///
/// `bytes` must hold a whole number of frames.
pub fn decode_to_f32(bytes: &[u8], format: &StreamFormat) -> Result<Vec<f32>, AudioError> {
    let block_align = format.block_align();
    if block_align == 0 || bytes.len() % block_align != 0 {
        return Err(AudioError::InvalidArgument(format!(
            "{} bytes is not a whole number of {}-byte frames",
            bytes.len(),
            block_align
        )));
    }

    let samples = match (format.sample_type, format.bits_per_sample) {
        (SampleType::Int, 16) => bytes
            .chunks_exact(2)
            .map(|b| i16::from_le_bytes([b[0], b[1]]) as f32 / i16::MAX as f32)
            .collect(),
        (SampleType::Int, 24) => bytes
            .chunks_exact(3)
            .map(|b| {
                // Sign-extend through the top byte of an i32.
                let v = i32::from_le_bytes([0, b[0], b[1], b[2]]) >> 8;
                v as f32 / I24_MAX
            })
            .collect(),
        (SampleType::Int, 32) => bytes
            .chunks_exact(4)
            .map(|b| i32::from_le_bytes([b[0], b[1], b[2], b[3]]) as f32 / i32::MAX as f32)
            .collect(),
        (SampleType::Float, 32) => bytes
            .chunks_exact(4)
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect(),
        (sample_type, bits) => {
            return Err(AudioError::FormatNotSupported(format!(
                "cannot decode {}-bit {:?} samples",
                bits, sample_type
            )))
        }
    };
    Ok(samples)
}

/// Encode normalized samples into device bytes, clamping out-of-range values.
pub fn encode_from_f32(samples: &[f32], format: &StreamFormat) -> Result<Vec<u8>, AudioError> {
    let width = format.bits_per_sample as usize / 8;
    let mut out = Vec::with_capacity(samples.len() * width);
    encode_into(samples, format, &mut out)?;
    Ok(out)
}

/// Encode into the front of `dest`, which must be exactly `samples.len()` samples wide.
pub fn encode_to_slice(samples: &[f32], format: &StreamFormat, dest: &mut [u8]) -> Result<(), AudioError> {
    let width = format.bits_per_sample as usize / 8;
    if dest.len() != samples.len() * width {
        return Err(AudioError::InvalidArgument(format!(
            "destination holds {} bytes, {} samples need {}",
            dest.len(),
            samples.len(),
            samples.len() * width
        )));
    }
    let mut out = Vec::with_capacity(dest.len());
    encode_into(samples, format, &mut out)?;
    dest.copy_from_slice(&out);
    Ok(())
}

fn encode_into(samples: &[f32], format: &StreamFormat, out: &mut Vec<u8>) -> Result<(), AudioError> {
    match (format.sample_type, format.bits_per_sample) {
        (SampleType::Int, 16) => {
            for &s in samples {
                let v = (s.clamp(-1.0, 1.0) * i16::MAX as f32) as i16;
                out.extend_from_slice(&v.to_le_bytes());
            }
        }
        (SampleType::Int, 24) => {
            for &s in samples {
                let v = (s.clamp(-1.0, 1.0) * I24_MAX) as i32;
                out.extend_from_slice(&v.to_le_bytes()[..3]);
            }
        }
        (SampleType::Int, 32) => {
            for &s in samples {
                let v = (s.clamp(-1.0, 1.0) as f64 * i32::MAX as f64) as i32;
                out.extend_from_slice(&v.to_le_bytes());
            }
        }
        (SampleType::Float, 32) => {
            for &s in samples {
                out.extend_from_slice(&s.clamp(-1.0, 1.0).to_le_bytes());
            }
        }
        (sample_type, bits) => {
            return Err(AudioError::FormatNotSupported(format!(
                "cannot encode {}-bit {:?} samples",
                bits, sample_type
            )))
        }
    }
    Ok(())
}

/// Average interleaved channels into one mono sample per frame.
pub fn downmix_to_mono(samples: &[f32], channels: usize) -> Vec<f32> {
    if channels <= 1 {
        return samples.to_vec();
    }
    let scale = 1.0 / channels as f32;
    samples
        .chunks_exact(channels)
        .map(|frame| frame.iter().sum::<f32>() * scale)
        .collect()
}

/// Copy one mono sample into every channel of each frame.
pub fn upmix_from_mono(samples: &[f32], channels: usize) -> Vec<f32> {
    if channels <= 1 {
        return samples.to_vec();
    }
    samples
        .iter()
        .flat_map(|&s| std::iter::repeat(s).take(channels))
        .collect()
}

/// Root-mean-square level (0.0 for empty input).
pub fn rms_level(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_sq: f32 = samples.iter().map(|s| s * s).sum();
    (sum_sq / samples.len() as f32).sqrt()
}

pub fn peak_level(samples: &[f32]) -> f32 {
    samples.iter().map(|s| s.abs()).fold(0.0f32, f32::max)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn decode_int16_full_scale() {
        let format = StreamFormat::pcm(48000, 16, 1);
        let bytes = [i16::MAX.to_le_bytes(), 0i16.to_le_bytes(), (-i16::MAX).to_le_bytes()].concat();
        let samples = decode_to_f32(&bytes, &format).unwrap();
        assert_eq!(samples, vec![1.0, 0.0, -1.0]);
    }

    #[test]
    fn decode_int24_sign_extends() {
        let format = StreamFormat::pcm(48000, 24, 1);
        // -1 in 24-bit two's complement.
        let samples = decode_to_f32(&[0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0x7F], &format).unwrap();
        assert_relative_eq!(samples[0], -1.0 / I24_MAX);
        assert_relative_eq!(samples[1], 1.0);
    }

    #[test]
    fn decode_float_passes_through() {
        let format = StreamFormat::float(48000, 2);
        let bytes = [0.25f32.to_le_bytes(), (-0.5f32).to_le_bytes()].concat();
        assert_eq!(decode_to_f32(&bytes, &format).unwrap(), vec![0.25, -0.5]);
    }

    #[test]
    fn decode_rejects_partial_frames() {
        let format = StreamFormat::pcm(48000, 16, 2);
        assert!(matches!(
            decode_to_f32(&[0, 0, 0], &format),
            Err(AudioError::InvalidArgument(_))
        ));
    }

    #[test]
    fn encode_clamps_and_decodes_back_close() {
        let format = StreamFormat::pcm(44100, 24, 1);
        let bytes = encode_from_f32(&[2.0, 0.5, -3.0], &format).unwrap();
        assert_eq!(bytes.len(), 9);
        let back = decode_to_f32(&bytes, &format).unwrap();
        assert_relative_eq!(back[0], 1.0);
        assert_relative_eq!(back[1], 0.5, epsilon = 1e-6);
        assert_relative_eq!(back[2], -1.0);
    }

    #[test]
    fn encode_to_slice_checks_length() {
        let format = StreamFormat::pcm(48000, 16, 1);
        let mut dest = [0u8; 3];
        assert!(encode_to_slice(&[0.0, 0.0], &format, &mut dest).is_err());
        let mut dest = [0u8; 4];
        encode_to_slice(&[1.0, -1.0], &format, &mut dest).unwrap();
        assert_eq!(&dest[..2], &i16::MAX.to_le_bytes());
    }

    #[test]
    fn downmix_averages_channels() {
        let mono = downmix_to_mono(&[0.2, 0.8, 0.4, 0.6], 2);
        assert_eq!(mono.len(), 2);
        assert_relative_eq!(mono[0], 0.5);
        assert_relative_eq!(mono[1], 0.5);
    }

    #[test]
    fn upmix_repeats_samples() {
        assert_eq!(upmix_from_mono(&[0.1, 0.2], 3), vec![0.1, 0.1, 0.1, 0.2, 0.2, 0.2]);
    }

    #[test]
    fn levels() {
        assert_eq!(rms_level(&[]), 0.0);
        assert_relative_eq!(rms_level(&[0.5, -0.5, 0.5, -0.5]), 0.5);
        assert_relative_eq!(peak_level(&[0.1, -0.9, 0.3]), 0.9);
    }
}
