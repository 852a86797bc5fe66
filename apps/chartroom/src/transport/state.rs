use std::time::Duration;

/// Close codes after which the server is refusing us rather than failing.
pub const CLOSE_POLICY_VIOLATION: u16 = 1008;
pub const CLOSE_TRY_AGAIN_LATER: u16 = 1013;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionPhase {
    Disconnected,
    Connecting,
    Open,
    ClosedNormal,
    ClosedRejected,
    ReconnectScheduled { attempt: u32, delay: Duration },
    ShutDown,
}

impl ConnectionPhase {
    pub fn is_open(&self) -> bool {
        matches!(self, ConnectionPhase::Open)
    }

    pub fn is_active(&self) -> bool {
        matches!(self, ConnectionPhase::Open | ConnectionPhase::Connecting)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseKind {
    Normal,
    Rejected,
}

impl CloseKind {
    pub fn classify(code: Option<u16>, saw_unauthorized: bool) -> Self {
        match code {
            _ if saw_unauthorized => CloseKind::Rejected,
            Some(CLOSE_POLICY_VIOLATION) | Some(CLOSE_TRY_AGAIN_LATER) => CloseKind::Rejected,
            _ => CloseKind::Normal,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub base: Duration,
    pub max: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_millis(1_000),
            max: Duration::from_millis(30_000),
        }
    }
}

impl BackoffPolicy {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self { base, max }
    }

    /// `min(base * 2^attempt, max)`, saturating instead of overflowing.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.base
            .checked_mul(factor)
            .unwrap_or(Duration::MAX)
            .min(self.max)
    }
}

/// Session and reconnect bookkeeping for one transport instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportState {
    phase: ConnectionPhase,
    session_id: Option<String>,
    reconnect_attempts: u32,
    attempts_before_open: u32,
}

impl TransportState {
    pub fn new(session_id: Option<String>) -> Self {
        Self {
            phase: ConnectionPhase::Disconnected,
            session_id,
            reconnect_attempts: 0,
            attempts_before_open: 0,
        }
    }

    pub fn phase(&self) -> ConnectionPhase {
        self.phase
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    pub fn reconnect_attempts(&self) -> u32 {
        self.reconnect_attempts
    }

    pub fn set_session_id(&mut self, session_id: impl Into<String>) {
        self.session_id = Some(session_id.into());
    }

    /// Moves to `Connecting`. Returns false when a connection is already
    /// open or being opened, or after shutdown.
    pub fn begin_connect(&mut self) -> bool {
        if self.phase.is_active() || self.phase == ConnectionPhase::ShutDown {
            return false;
        }
        self.phase = ConnectionPhase::Connecting;
        true
    }

    pub fn opened(&mut self) {
        self.attempts_before_open = self.reconnect_attempts;
        self.reconnect_attempts = 0;
        self.phase = ConnectionPhase::Open;
    }

    pub fn closed(&mut self, kind: CloseKind) {
        if self.phase == ConnectionPhase::ShutDown {
            return;
        }
        match kind {
            CloseKind::Normal => self.phase = ConnectionPhase::ClosedNormal,
            CloseKind::Rejected => {
                self.reconnect_attempts = self.attempts_before_open;
                self.phase = ConnectionPhase::ClosedRejected;
            }
        }
    }

    /// Counts one more attempt and returns its delay, or `None` after shutdown.
    pub fn schedule_reconnect(&mut self, policy: &BackoffPolicy) -> Option<Duration> {
        if self.phase == ConnectionPhase::ShutDown {
            return None;
        }
        self.reconnect_attempts = self.reconnect_attempts.saturating_add(1);
        let delay = policy.delay_for(self.reconnect_attempts);
        self.phase = ConnectionPhase::ReconnectScheduled {
            attempt: self.reconnect_attempts,
            delay,
        };
        Some(delay)
    }

    pub fn shut_down(&mut self) {
        self.phase = ConnectionPhase::ShutDown;
    }
}
