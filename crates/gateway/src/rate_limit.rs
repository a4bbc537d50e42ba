//! Per-connection fixed-window admission.
//!
//! Signaling traffic and everything else are counted in separate windows so
//! that ICE candidate bursts cannot starve calls and chat (or vice versa).

use std::time::{Duration, Instant};

use {lrcom_config::LimitsConfig, lrcom_protocol::kinds};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrafficClass {
    Signal,
    Control,
}

impl TrafficClass {
    pub fn of(kind: &str) -> Self {
        if kind == kinds::SIGNAL {
            Self::Signal
        } else {
            Self::Control
        }
    }
}

/// Kinds that are counted but never refused: teardown and keepalive must get
/// through even when a client is flooding.
pub fn is_exempt(kind: &str) -> bool {
    matches!(
        kind,
        kinds::CALL_HANGUP | kinds::ACK | kinds::PING | kinds::CLIENT_HELLO
    )
}

#[derive(Debug, Clone)]
pub struct FixedWindow {
    started: Instant,
    count: u32,
}

impl FixedWindow {
    pub fn new(now: Instant) -> Self {
        Self {
            started: now,
            count: 0,
        }
    }

    /// Count one hit and report whether it stayed within `limit`.
    pub fn hit(&mut self, now: Instant, limit: u32, width: Duration) -> bool {
        if now.saturating_duration_since(self.started) > width {
            self.started = now;
            self.count = 0;
        }
        self.count = self.count.saturating_add(1);
        self.count <= limit
    }

    pub fn count(&self) -> u32 {
        self.count
    }
}

#[derive(Debug, Clone)]
pub struct RateWindows {
    signal: FixedWindow,
    control: FixedWindow,
}

impl RateWindows {
    pub fn new(now: Instant) -> Self {
        Self {
            signal: FixedWindow::new(now),
            control: FixedWindow::new(now),
        }
    }

    pub fn admit(&mut self, kind: &str, now: Instant, limits: &LimitsConfig) -> bool {
        let width = limits.window();
        let within = match TrafficClass::of(kind) {
            TrafficClass::Signal => self.signal.hit(now, limits.signal_per_window, width),
            TrafficClass::Control => self.control.hit(now, limits.control_per_window, width),
        };
        within || is_exempt(kind)
    }

    pub fn window(&self, class: TrafficClass) -> &FixedWindow {
        match class {
            TrafficClass::Signal => &self.signal,
            TrafficClass::Control => &self.control,
        }
    }
}
