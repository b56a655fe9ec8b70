//! Heartbeat bookkeeping for liveness detection over an open connection.

use std::time::Duration;

use crate::config::Config;

/// Tracks outstanding liveness probes while the session is Connected.
///
/// The session task sends a probe every `interval` and arms a single liveness
/// timeout when a probe goes out with no acknowledgement outstanding. The
/// timeout is measured from the first unacknowledged probe; a fixed threshold
/// by design, with no adaptive heuristic.
#[derive(Debug)]
pub struct HeartbeatMonitor {
    interval: Duration,
    timeout: Duration,
    awaiting_ack: bool,
}

impl HeartbeatMonitor {
    pub fn new(interval: Duration, timeout: Duration) -> Self {
        Self {
            interval,
            timeout,
            awaiting_ack: false,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.heartbeat_interval, config.heartbeat_timeout)
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Record an outbound probe. Returns true when the liveness timeout must
    /// be armed (first probe of an unacknowledged run); later probes reuse the
    /// already-armed timeout.
    pub fn probe_sent(&mut self) -> bool {
        let arm = !self.awaiting_ack;
        self.awaiting_ack = true;
        arm
    }

    /// Record an acknowledgement. Returns true when a timeout was outstanding
    /// and must now be disarmed.
    pub fn ack_received(&mut self) -> bool {
        let disarm = self.awaiting_ack;
        self.awaiting_ack = false;
        disarm
    }

    /// Forget any outstanding probe. Called on every exit from Connected.
    pub fn reset(&mut self) {
        self.awaiting_ack = false;
    }

    pub fn awaiting_ack(&self) -> bool {
        self.awaiting_ack
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn monitor() -> HeartbeatMonitor {
        HeartbeatMonitor::new(Duration::from_secs(30), Duration::from_secs(60))
    }

    #[test]
    fn first_probe_arms_the_timeout_once() {
        let mut hb = monitor();
        assert!(hb.probe_sent());
        // A second probe while the first is unacknowledged must not re-arm.
        assert!(!hb.probe_sent());
        assert!(hb.awaiting_ack());
    }

    #[test]
    fn ack_disarms_and_allows_rearming() {
        let mut hb = monitor();
        hb.probe_sent();
        assert!(hb.ack_received());
        assert!(!hb.awaiting_ack());
        assert!(hb.probe_sent());
    }

    #[test]
    fn unsolicited_ack_is_a_no_op() {
        let mut hb = monitor();
        assert!(!hb.ack_received());
    }

    #[test]
    fn reset_clears_outstanding_probe() {
        let mut hb = monitor();
        hb.probe_sent();
        hb.reset();
        assert!(!hb.awaiting_ack());
        assert!(hb.probe_sent());
    }
}
