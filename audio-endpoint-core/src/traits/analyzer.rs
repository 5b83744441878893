use crate::models::buffer_flags::BufferFlags;

/// Output of one analyzer invocation.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct AnalysisResult {
    pub pitch_hz: Option<f32>,
    pub clarity: f32,
    pub rms: f32,
    pub peak: f32,
}

/// Pitch / tone analyzer fed with the rolling mono waveform window.
///
/// Runs on the capture-processing thread once per processed block, so it must
/// finish well inside one period.
pub trait Analyzer: Send {
    /// Analyze `window` (mono, oldest sample first). `flags` are the flags
    /// accumulated over the packets that fed the newest block.
    fn analyze(&mut self, window: &[f32], sample_rate: u32, flags: BufferFlags) -> AnalysisResult;

    /// Drop any state carried between blocks (called after a discontinuity).
    fn reset(&mut self) {}
}
