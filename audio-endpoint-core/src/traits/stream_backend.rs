use std::time::Duration;

use crate::models::buffer_flags::BufferFlags;
use crate::models::error::AudioError;

/// One capture packet as exposed by the device: a window into its ring buffer.
#[derive(Debug)]
pub struct RawCapture<'a> {
    pub frames: u32,
    /// `frames * block_align` bytes in the negotiated format.
    pub data: &'a [u8],
    pub flags: BufferFlags,
    /// Device position of the first frame, in frames since the stream started.
    pub device_position: u64,
}

/// An initialized platform stream.
///
/// Sequencing (one outstanding buffer, release sizes) is enforced by
/// `StreamSession`; backends only translate calls to the device.
pub trait StreamBackend: Send {
    /// Total device buffer size in frames.
    fn buffer_frames(&self) -> u32;

    /// Frames currently queued in the device buffer.
    fn padding(&self) -> Result<u32, AudioError>;

    /// Maximum stream latency reported by the device.
    fn latency(&self) -> Duration;

    fn start(&mut self) -> Result<(), AudioError>;

    fn stop(&mut self) -> Result<(), AudioError>;

    /// Discard buffered audio. Only valid while stopped.
    fn reset(&mut self) -> Result<(), AudioError>;

    /// Next capture packet, or `AudioError::BufferEmpty` when nothing is ready.
    fn capture_buffer(&mut self) -> Result<RawCapture<'_>, AudioError>;

    /// Return a capture packet. `frames` is either 0 (keep it) or the packet size.
    fn release_capture(&mut self, frames: u32) -> Result<(), AudioError>;

    /// Writable window of exactly `frames` frames.
    fn render_buffer(&mut self, frames: u32) -> Result<&mut [u8], AudioError>;

    /// Commit `frames` frames of the window returned by `render_buffer`.
    fn release_render(&mut self, frames: u32, flags: BufferFlags) -> Result<(), AudioError>;
}
