//! Default analyzer: signal levels plus an autocorrelation pitch estimate.

use crate::models::buffer_flags::BufferFlags;
use crate::processing::samples::{peak_level, rms_level};
use crate::traits::analyzer::{AnalysisResult, Analyzer};

/// Below this RMS the window is treated as silence and no pitch is reported.
const NOISE_FLOOR: f32 = 1e-3;

/// Normalized-autocorrelation pitch detector.
///
/// Searches lags corresponding to `[min_hz, max_hz]` and reports the best peak
/// when its normalized correlation (the clarity) reaches `threshold`.
#[derive(Debug, Clone)]
pub struct LevelAnalyzer {
    pub min_hz: f32,
    pub max_hz: f32,
    pub threshold: f32,
}

impl Default for LevelAnalyzer {
    fn default() -> Self {
        Self {
            min_hz: 60.0,
            max_hz: 1500.0,
            threshold: 0.8,
        }
    }
}

impl LevelAnalyzer {
    fn estimate_pitch(&self, window: &[f32], sample_rate: u32) -> (Option<f32>, f32) {
        let rate = sample_rate as f32;
        let min_lag = ((rate / self.max_hz).floor() as usize).max(2);
        let max_lag = ((rate / self.min_hz).ceil() as usize).min(window.len() / 2);
        if min_lag >= max_lag {
            return (None, 0.0);
        }

        let correlations: Vec<f32> = (min_lag..=max_lag + 1)
            .map(|lag| normalized_correlation(window, lag))
            .collect();

        // First local maximum above threshold; falls back to the global best.
        let mut best = (0usize, f32::MIN);
        for i in 1..correlations.len() - 1 {
            let c = correlations[i];
            if c > correlations[i - 1] && c >= correlations[i + 1] {
                if c >= self.threshold {
                    best = (i, c);
                    break;
                }
                if c > best.1 {
                    best = (i, c);
                }
            }
        }
        if best.0 == 0 {
            return (None, 0.0);
        }

        let (i, clarity) = best;
        let clarity = clarity.clamp(0.0, 1.0);
        if clarity < self.threshold {
            return (None, clarity);
        }

        // Parabolic interpolation around the peak.
        let (a, b, c) = (correlations[i - 1], correlations[i], correlations[i + 1]);
        let denom = a - 2.0 * b + c;
        let offset = if denom.abs() > f32::EPSILON {
            0.5 * (a - c) / denom
        } else {
            0.0
        };
        let lag = (min_lag + i) as f32 + offset;
        (Some(rate / lag), clarity)
    }
}

fn normalized_correlation(window: &[f32], lag: usize) -> f32 {
    let n = window.len() - lag;
    let (mut xy, mut xx, mut yy) = (0.0f32, 0.0f32, 0.0f32);
    for (x, y) in window[..n].iter().zip(&window[lag..]) {
        xy += x * y;
        xx += x * x;
        yy += y * y;
    }
    let norm = (xx * yy).sqrt();
    if norm > f32::EPSILON {
        xy / norm
    } else {
        0.0
    }
}

impl Analyzer for LevelAnalyzer {
    fn analyze(&mut self, window: &[f32], sample_rate: u32, flags: BufferFlags) -> AnalysisResult {
        let rms = rms_level(window);
        let peak = peak_level(window);
        if flags.silent || rms < NOISE_FLOOR || sample_rate == 0 {
            return AnalysisResult {
                pitch_hz: None,
                clarity: 0.0,
                rms,
                peak,
            };
        }
        let (pitch_hz, clarity) = self.estimate_pitch(window, sample_rate);
        AnalysisResult {
            pitch_hz,
            clarity,
            rms,
            peak,
        }
    }
}
