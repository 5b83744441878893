use std::collections::VecDeque;
use std::f64::consts::TAU;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::models::buffer_flags::BufferFlags;
use crate::models::endpoint::DataFlow;
use crate::models::error::AudioError;
use crate::models::format::StreamFormat;
use crate::processing::samples::{decode_to_f32, encode_from_f32, peak_level, upmix_from_mono};
use crate::traits::stream_backend::{RawCapture, StreamBackend};

use super::device_api::SimClock;

pub(super) const TONE_AMPLITUDE: f32 = 0.5;

struct Packet {
    data: Vec<u8>,
    frames: u32,
    flags: BufferFlags,
    position: u64,
}

/// Device side of one simulated stream, shared with the API for ticking and
/// invalidation.
pub(super) struct StreamCore {
    pub(super) device_id: String,
    flow: DataFlow,
    format: StreamFormat,
    buffer_frames: u32,
    period_frames: u32,
    clock: SimClock,
    tone_hz: f32,
    running: bool,
    lost: bool,
    last_advance: Option<Instant>,

    packets: VecDeque<Packet>,
    queued_frames: u32,
    next_flags: BufferFlags,
    phase: f64,
    position: u64,

    render_padding: u32,
    rendered_frames: u64,
    rendered_peak: f32,
}

impl StreamCore {
    pub(super) fn new(
        device_id: &str,
        flow: DataFlow,
        format: StreamFormat,
        buffer_frames: u32,
        period_frames: u32,
        clock: SimClock,
        tone_hz: f32,
    ) -> Self {
        Self {
            device_id: device_id.to_string(),
            flow,
            format,
            buffer_frames,
            period_frames,
            clock,
            tone_hz,
            running: false,
            lost: false,
            last_advance: None,
            packets: VecDeque::new(),
            queued_frames: 0,
            next_flags: BufferFlags::NONE,
            phase: 0.0,
            position: 0,
            render_padding: 0,
            rendered_frames: 0,
            rendered_peak: 0.0,
        }
    }

    pub(super) fn invalidate(&mut self) {
        self.lost = true;
        self.running = false;
    }

    pub(super) fn is_running(&self) -> bool {
        self.running
    }

    pub(super) fn period_frames(&self) -> u32 {
        self.period_frames
    }

    pub(super) fn rendered_frames(&self) -> u64 {
        self.rendered_frames
    }

    pub(super) fn rendered_peak(&self) -> f32 {
        self.rendered_peak
    }

    pub(super) fn flag_next_packet(&mut self, flags: BufferFlags) {
        self.next_flags = self.next_flags.merge(flags);
    }

    fn check_live(&self) -> Result<(), AudioError> {
        if self.lost {
            Err(AudioError::DeviceLost(self.device_id.clone()))
        } else {
            Ok(())
        }
    }

    /// Move the device forward by `frames`, in whole periods.
    pub(super) fn advance(&mut self, frames: u32) {
        if !self.running {
            return;
        }
        let mut remaining = frames;
        while remaining >= self.period_frames {
            match self.flow {
                DataFlow::Input => self.produce_period(),
                DataFlow::Output => {
                    self.render_padding = self.render_padding.saturating_sub(self.period_frames);
                }
            }
            remaining -= self.period_frames;
        }
    }

    fn catch_up(&mut self) {
        if self.clock != SimClock::Realtime || !self.running {
            return;
        }
        let now = Instant::now();
        let last = *self.last_advance.get_or_insert(now);
        let due = self.format.frames_for(now.duration_since(last));
        let periods = due / self.period_frames;
        if periods == 0 {
            return;
        }
        self.advance(periods * self.period_frames);
        let consumed = Duration::from_secs_f64(
            (periods * self.period_frames) as f64 / self.format.sample_rate as f64,
        );
        self.last_advance = Some(last + consumed);
    }

    fn produce_period(&mut self) {
        let frames = self.period_frames;
        let mut flags = std::mem::take(&mut self.next_flags);

        let step = TAU * self.tone_hz as f64 / self.format.sample_rate as f64;
        let mono: Vec<f32> = (0..frames)
            .map(|i| {
                if flags.silent {
                    0.0
                } else {
                    TONE_AMPLITUDE * (self.phase + step * i as f64).sin() as f32
                }
            })
            .collect();
        self.phase = (self.phase + step * frames as f64) % TAU;

        // Overrun: the oldest unread packets are lost and the reader sees a gap.
        let mut overrun = false;
        while self.queued_frames + frames > self.buffer_frames {
            let Some(dropped) = self.packets.pop_front() else {
                break;
            };
            self.queued_frames -= dropped.frames;
            overrun = true;
        }
        if overrun {
            match self.packets.front_mut() {
                Some(front) => front.flags.data_discontinuity = true,
                None => flags.data_discontinuity = true,
            }
        }

        let interleaved = upmix_from_mono(&mono, self.format.channels as usize);
        // The format was validated when the stream was opened.
        let data = encode_from_f32(&interleaved, &self.format).unwrap_or_default();
        self.packets.push_back(Packet {
            data,
            frames,
            flags,
            position: self.position,
        });
        self.queued_frames += frames;
        self.position += frames as u64;
    }
}

/// Application side of a simulated stream.
pub(super) struct SimStream {
    core: Arc<Mutex<StreamCore>>,
    buffer_frames: u32,
    block_align: usize,
    latency: Duration,
    held: Option<Packet>,
    render_window: Vec<u8>,
    render_leased: u32,
}

impl SimStream {
    pub(super) fn new(core: Arc<Mutex<StreamCore>>) -> Self {
        let (buffer_frames, block_align, latency) = {
            let c = core.lock();
            let latency =
                Duration::from_secs_f64(c.buffer_frames as f64 / c.format.sample_rate as f64);
            (c.buffer_frames, c.format.block_align(), latency)
        };
        Self {
            core,
            buffer_frames,
            block_align,
            latency,
            held: None,
            render_window: Vec::new(),
            render_leased: 0,
        }
    }
}

impl StreamBackend for SimStream {
    fn buffer_frames(&self) -> u32 {
        self.buffer_frames
    }

    fn padding(&self) -> Result<u32, AudioError> {
        let mut core = self.core.lock();
        core.check_live()?;
        core.catch_up();
        Ok(match core.flow {
            DataFlow::Input => core.queued_frames + self.held.as_ref().map_or(0, |p| p.frames),
            DataFlow::Output => core.render_padding,
        })
    }

    fn latency(&self) -> Duration {
        self.latency
    }

    fn start(&mut self) -> Result<(), AudioError> {
        let mut core = self.core.lock();
        core.check_live()?;
        core.running = true;
        core.last_advance = Some(Instant::now());
        Ok(())
    }

    fn stop(&mut self) -> Result<(), AudioError> {
        let mut core = self.core.lock();
        core.check_live()?;
        core.catch_up();
        core.running = false;
        Ok(())
    }

    fn reset(&mut self) -> Result<(), AudioError> {
        let mut core = self.core.lock();
        core.check_live()?;
        if core.running {
            return Err(AudioError::InvalidState("stream must be stopped before reset".into()));
        }
        core.packets.clear();
        core.queued_frames = 0;
        core.render_padding = 0;
        self.held = None;
        self.render_leased = 0;
        Ok(())
    }

    fn capture_buffer(&mut self) -> Result<RawCapture<'_>, AudioError> {
        {
            let mut core = self.core.lock();
            core.check_live()?;
            if self.held.is_none() {
                core.catch_up();
                let packet = core.packets.pop_front().ok_or(AudioError::BufferEmpty)?;
                core.queued_frames -= packet.frames;
                self.held = Some(packet);
            }
        }
        let packet = self.held.as_ref().ok_or(AudioError::BufferEmpty)?;
        Ok(RawCapture {
            frames: packet.frames,
            data: &packet.data,
            flags: packet.flags,
            device_position: packet.position,
        })
    }

    fn release_capture(&mut self, frames: u32) -> Result<(), AudioError> {
        self.core.lock().check_live()?;
        if frames == 0 {
            return Ok(());
        }
        match &self.held {
            Some(packet) if packet.frames == frames => {
                self.held = None;
                Ok(())
            }
            Some(packet) => Err(AudioError::InvalidArgument(format!(
                "release of {} frames does not match packet of {}",
                frames, packet.frames
            ))),
            None => Err(AudioError::InvalidArgument("no capture packet outstanding".into())),
        }
    }

    fn render_buffer(&mut self, frames: u32) -> Result<&mut [u8], AudioError> {
        {
            let mut core = self.core.lock();
            core.check_live()?;
            core.catch_up();
            let free = self.buffer_frames - core.render_padding;
            if frames > free {
                return Err(AudioError::InvalidArgument(format!(
                    "{} frames requested, {} free",
                    frames, free
                )));
            }
        }
        self.render_leased = frames;
        self.render_window.clear();
        self.render_window.resize(frames as usize * self.block_align, 0);
        Ok(&mut self.render_window)
    }

    fn release_render(&mut self, frames: u32, flags: BufferFlags) -> Result<(), AudioError> {
        let mut core = self.core.lock();
        core.check_live()?;
        if frames > self.render_leased {
            return Err(AudioError::InvalidArgument(format!(
                "{} frames written, {} leased",
                frames, self.render_leased
            )));
        }
        if frames > 0 && !flags.silent {
            let written = &self.render_window[..frames as usize * self.block_align];
            if let Ok(samples) = decode_to_f32(written, &core.format) {
                core.rendered_peak = core.rendered_peak.max(peak_level(&samples));
            }
        }
        core.render_padding += frames;
        core.rendered_frames += frames as u64;
        self.render_leased = 0;
        Ok(())
    }
}
