/// Fixed-capacity window over the most recent mono samples.
///
/// The capture loop writes every decoded block into it and hands the analyzer
/// a contiguous copy of the newest `capacity` samples. Old samples are
/// overwritten, never read out.
#[derive(Debug)]
pub struct RingBuffer {
    buffer: Vec<f32>,
    write_index: usize,
    available: usize,
}

impl RingBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            buffer: vec![0.0; capacity.max(1)],
            write_index: 0,
            available: 0,
        }
    }

    /// Append samples, overwriting the oldest once full.
    pub fn write(&mut self, samples: &[f32]) {
        let capacity = self.buffer.len();
        let samples = if samples.len() > capacity {
            &samples[samples.len() - capacity..]
        } else {
            samples
        };

        let first = samples.len().min(capacity - self.write_index);
        self.buffer[self.write_index..self.write_index + first].copy_from_slice(&samples[..first]);
        let rest = samples.len() - first;
        self.buffer[..rest].copy_from_slice(&samples[first..]);

        self.write_index = (self.write_index + samples.len()) % capacity;
        self.available = (self.available + samples.len()).min(capacity);
    }

    /// The newest `count` samples (fewer if not yet written), oldest first.
    pub fn latest(&self, count: usize) -> Vec<f32> {
        let mut out = Vec::new();
        self.copy_latest(count, &mut out);
        out
    }

    /// Like `latest`, reusing `out`'s allocation.
    pub fn copy_latest(&self, count: usize, out: &mut Vec<f32>) {
        let capacity = self.buffer.len();
        let n = count.min(self.available);
        let start = (self.write_index + capacity - n) % capacity;
        out.clear();
        out.reserve(n);
        if start + n <= capacity {
            out.extend_from_slice(&self.buffer[start..start + n]);
        } else {
            out.extend_from_slice(&self.buffer[start..]);
            out.extend_from_slice(&self.buffer[..n - (capacity - start)]);
        }
    }

    pub fn count(&self) -> usize {
        self.available
    }

    pub fn is_empty(&self) -> bool {
        self.available == 0
    }

    pub fn is_full(&self) -> bool {
        self.available == self.buffer.len()
    }

    pub fn reset(&mut self) {
        self.write_index = 0;
        self.available = 0;
    }

    pub fn capacity(&self) -> usize {
        self.buffer.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn latest_returns_oldest_first() {
        let mut buf = RingBuffer::new(10);
        buf.write(&[1.0, 2.0, 3.0]);

        assert_eq!(buf.count(), 3);
        assert_eq!(buf.latest(2), vec![2.0, 3.0]);
        assert_eq!(buf.latest(10), vec![1.0, 2.0, 3.0]);
        // Reading does not consume.
        assert_eq!(buf.count(), 3);
    }

    #[test]
    fn overwrites_oldest_when_full() {
        let mut buf = RingBuffer::new(4);
        buf.write(&[1.0, 2.0, 3.0, 4.0]);
        buf.write(&[5.0, 6.0]);

        assert!(buf.is_full());
        assert_eq!(buf.latest(4), vec![3.0, 4.0, 5.0, 6.0]);
    }

    #[test]
    fn oversized_write_keeps_tail() {
        let mut buf = RingBuffer::new(3);
        buf.write(&[1.0, 2.0, 3.0, 4.0, 5.0]);
        assert_eq!(buf.latest(3), vec![3.0, 4.0, 5.0]);
    }

    #[test]
    fn wraparound_copy_is_contiguous() {
        let mut buf = RingBuffer::new(4);
        buf.write(&[1.0, 2.0, 3.0]);
        buf.write(&[4.0, 5.0, 6.0]);

        let mut out = vec![9.0; 8];
        buf.copy_latest(3, &mut out);
        assert_eq!(out, vec![4.0, 5.0, 6.0]);
    }

    #[test]
    fn reset_clears_window() {
        let mut buf = RingBuffer::new(10);
        buf.write(&[1.0, 2.0, 3.0]);
        buf.reset();

        assert!(buf.is_empty());
        assert!(buf.latest(10).is_empty());
    }

    #[test]
    fn empty_writes_are_noops() {
        let mut buf = RingBuffer::new(10);
        buf.write(&[]);
        assert!(buf.is_empty());
        assert_eq!(buf.capacity(), 10);
    }
}
