use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

use crate::models::snapshot::AnalysisSnapshot;

/// Single-slot mailbox for the latest analysis snapshot.
///
/// The capture thread publishes, the consumer copies. Both hold the lock only
/// for a move or a clone, so a slow consumer never stalls the capture period
/// and a reader never sees fields from two different publishes.
#[derive(Debug, Default)]
pub struct ResultExchange {
    slot: Mutex<AnalysisSnapshot>,
    published: AtomicU64,
}

impl ResultExchange {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the slot with `snapshot`.
    pub fn publish(&self, snapshot: AnalysisSnapshot) {
        let previous = std::mem::replace(&mut *self.slot.lock(), snapshot);
        // Freed outside the lock.
        drop(previous);
        self.published.fetch_add(1, Ordering::Relaxed);
    }

    /// Independent copy of the latest snapshot (default before the first publish).
    pub fn read_copy(&self) -> AnalysisSnapshot {
        self.slot.lock().clone()
    }

    /// Sequence number of the latest snapshot without copying the waveform.
    pub fn latest_sequence(&self) -> u64 {
        self.slot.lock().sequence
    }

    pub fn published_count(&self) -> u64 {
        self.published.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;
    use std::sync::Arc;
    use std::thread;

    fn snapshot(sequence: u64) -> AnalysisSnapshot {
        // Every field derives from `sequence` so a torn read is detectable.
        AnalysisSnapshot {
            sequence,
            pitch_hz: Some(sequence as f32),
            clarity: 0.5,
            rms: sequence as f32 * 0.25,
            peak: sequence as f32 * 0.5,
            frames_analyzed: sequence * 480,
            waveform: vec![sequence as f32; 64],
            ..AnalysisSnapshot::default()
        }
    }

    fn is_consistent(s: &AnalysisSnapshot) -> bool {
        if s.sequence == 0 {
            return s.is_empty();
        }
        let n = s.sequence as f32;
        s.pitch_hz == Some(n)
            && s.rms == n * 0.25
            && s.peak == n * 0.5
            && s.frames_analyzed == s.sequence * 480
            && s.waveform.iter().all(|&w| w == n)
    }

    #[test]
    fn read_before_publish_is_empty() {
        let exchange = ResultExchange::new();
        assert!(exchange.read_copy().is_empty());
        assert_eq!(exchange.published_count(), 0);
    }

    #[test]
    fn copy_is_independent_of_later_publishes() {
        let exchange = ResultExchange::new();
        exchange.publish(snapshot(1));
        let copy = exchange.read_copy();
        exchange.publish(snapshot(2));

        assert_eq!(copy.sequence, 1);
        assert!(is_consistent(&copy));
        assert_eq!(exchange.latest_sequence(), 2);
        assert_eq!(exchange.published_count(), 2);
    }

    #[test]
    fn concurrent_reads_are_monotonic_and_untorn() {
        let exchange = Arc::new(ResultExchange::new());
        let done = Arc::new(AtomicBool::new(false));

        let writer = {
            let exchange = Arc::clone(&exchange);
            let done = Arc::clone(&done);
            thread::spawn(move || {
                for seq in 1..=5000 {
                    exchange.publish(snapshot(seq));
                }
                done.store(true, Ordering::SeqCst);
            })
        };

        let mut last = 0;
        while !done.load(Ordering::SeqCst) {
            let read = exchange.read_copy();
            assert!(is_consistent(&read), "torn snapshot {:?}", read.sequence);
            assert!(read.sequence >= last);
            last = read.sequence;
        }
        writer.join().unwrap();
        assert_eq!(exchange.read_copy().sequence, 5000);
    }
}
