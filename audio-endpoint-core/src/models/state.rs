/// Stream session state machine.
///
/// State transitions:
/// ```text
/// Closed → Opened → Running ⇄ Stopped
///            ↑         │          │
///            └─ reset ─┴──────────┘
/// any state → Closed (close)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    Closed,
    Opened,
    Running,
    Stopped,
}

impl SessionState {
    pub fn is_closed(&self) -> bool {
        matches!(self, Self::Closed)
    }

    pub fn is_running(&self) -> bool {
        matches!(self, Self::Running)
    }

    /// Buffers may only be leased while the stream is open.
    pub fn is_open(&self) -> bool {
        !self.is_closed()
    }

    pub fn can_start(&self) -> bool {
        matches!(self, Self::Opened | Self::Stopped)
    }

    pub fn can_stop(&self) -> bool {
        matches!(self, Self::Running)
    }

    /// `reset` discards buffered audio; the platform rejects it while running.
    pub fn can_reset(&self) -> bool {
        matches!(self, Self::Opened | Self::Stopped)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transitions() {
        assert!(SessionState::Opened.can_start());
        assert!(SessionState::Stopped.can_start());
        assert!(!SessionState::Running.can_start());
        assert!(!SessionState::Closed.can_start());

        assert!(SessionState::Running.can_stop());
        assert!(!SessionState::Stopped.can_stop());

        assert!(SessionState::Stopped.can_reset());
        assert!(!SessionState::Running.can_reset());
        assert!(!SessionState::Closed.is_open());
    }
}
