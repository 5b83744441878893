use super::buffer_flags::BufferFlags;

/// Latest analysis result plus the waveform window it was computed from.
///
/// Snapshots are never mutated after publication; `Clone` is a deep copy, so a
/// reader's copy stays valid no matter how many publishes follow.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct AnalysisSnapshot {
    /// Monotonic publish counter; zero means "nothing published yet".
    pub sequence: u64,
    /// Estimated fundamental frequency, `None` when no stable pitch was found.
    pub pitch_hz: Option<f32>,
    /// Confidence of the pitch estimate, 0.0–1.0.
    pub clarity: f32,
    /// RMS level of the analyzed block, 0.0–1.0.
    pub rms: f32,
    /// Peak level of the analyzed block, 0.0–1.0.
    pub peak: f32,
    /// Flags accumulated over the packets that fed this block.
    pub flags: BufferFlags,
    /// Total frames analyzed since the stream started.
    pub frames_analyzed: u64,
    /// Mono waveform window used for the analysis.
    pub waveform: Vec<f32>,
}

impl AnalysisSnapshot {
    pub fn is_empty(&self) -> bool {
        self.sequence == 0
    }

    /// Pitch as a MIDI note number (A4 = 69), if a pitch was detected.
    pub fn midi_note(&self) -> Option<f32> {
        self.pitch_hz
            .filter(|hz| *hz > 0.0)
            .map(|hz| 69.0 + 12.0 * (hz / 440.0).log2())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn default_is_empty() {
        let snapshot = AnalysisSnapshot::default();
        assert!(snapshot.is_empty());
        assert!(snapshot.waveform.is_empty());
        assert_eq!(snapshot.midi_note(), None);
    }

    #[test]
    fn midi_note_from_pitch() {
        let snapshot = AnalysisSnapshot {
            sequence: 1,
            pitch_hz: Some(220.0),
            ..Default::default()
        };
        assert_relative_eq!(snapshot.midi_note().unwrap(), 57.0, epsilon = 1e-4);
    }

    #[test]
    fn clone_is_independent() {
        let original = AnalysisSnapshot {
            sequence: 3,
            waveform: vec![0.1, 0.2],
            ..Default::default()
        };
        let mut copy = original.clone();
        copy.waveform[0] = 0.9;
        assert_eq!(original.waveform[0], 0.1);
    }
}
