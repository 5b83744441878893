use std::time::Duration;

use super::endpoint::DeviceRole;
use super::error::AudioError;
use super::format::{ShareMode, StreamFormat};

/// Configuration for a capture session.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionConfiguration {
    /// Requested stream format (default: 48 kHz / 16-bit / mono PCM).
    /// Shared mode may substitute the closest supported format.
    pub format: StreamFormat,

    /// Stream access mode (default: shared).
    pub share_mode: ShareMode,

    /// Device buffer duration requested at open (default: 100ms).
    pub buffer_duration: Duration,

    /// Capture-processing period (default: 10ms).
    pub period: Duration,

    /// Mono samples kept in the analysis waveform window (default: 2048).
    pub analysis_window: usize,

    /// Role used when falling back to the default device (default: console).
    pub role: DeviceRole,
}

impl SessionConfiguration {
    pub fn validate(&self) -> Result<(), AudioError> {
        self.format.validate()?;
        if self.buffer_duration.is_zero() {
            return Err(AudioError::InvalidArgument("buffer duration must be positive".into()));
        }
        if self.period.is_zero() {
            return Err(AudioError::InvalidArgument("period must be positive".into()));
        }
        if self.period > self.buffer_duration {
            return Err(AudioError::InvalidArgument(format!(
                "period {:?} exceeds buffer duration {:?}",
                self.period, self.buffer_duration
            )));
        }
        if self.analysis_window == 0 {
            return Err(AudioError::InvalidArgument("analysis window must be positive".into()));
        }
        Ok(())
    }
}

impl Default for SessionConfiguration {
    fn default() -> Self {
        Self {
            format: StreamFormat::pcm(48000, 16, 1),
            share_mode: ShareMode::Shared,
            buffer_duration: Duration::from_millis(100),
            period: Duration::from_millis(10),
            analysis_window: 2048,
            role: DeviceRole::Console,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_valid() {
        assert!(SessionConfiguration::default().validate().is_ok());
    }

    #[test]
    fn period_longer_than_buffer_is_rejected() {
        let config = SessionConfiguration {
            period: Duration::from_millis(200),
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(AudioError::InvalidArgument(_))));
    }

    #[test]
    fn zero_window_is_rejected() {
        let config = SessionConfiguration {
            analysis_window: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
