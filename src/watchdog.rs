//! Start watchdog.
//!
//! Some devices accept an open request and then never deliver a frame. The
//! watchdog is armed when a stream starts and accumulates refresh time until
//! either a frame is observed or the timeout elapses.

use std::time::Duration;

/// Default time a freshly opened stream has to deliver its first frame.
pub const DEFAULT_START_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WatchdogState {
    Watching,
    /// A frame arrived in time.
    Satisfied,
    TimedOut,
}

#[derive(Clone, Debug)]
pub struct StartWatchdog {
    timeout: Duration,
    elapsed: Duration,
    state: WatchdogState,
}

impl StartWatchdog {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            elapsed: Duration::ZERO,
            state: WatchdogState::Watching,
        }
    }

    pub fn state(&self) -> WatchdogState {
        self.state
    }

    /// Feed one refresh. `frame_arrived` is the stream's new-frame flag for
    /// this refresh; `dt` the refresh length.
    pub fn poll(&mut self, frame_arrived: bool, dt: Duration) -> WatchdogState {
        if self.state != WatchdogState::Watching {
            return self.state;
        }
        if frame_arrived {
            self.state = WatchdogState::Satisfied;
        } else if self.elapsed >= self.timeout {
            self.state = WatchdogState::TimedOut;
        } else {
            self.elapsed += dt;
        }
        self.state
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_frame_satisfies() {
        let mut dog = StartWatchdog::new(Duration::from_secs(1));
        assert_eq!(dog.poll(false, Duration::from_millis(100)), WatchdogState::Watching);
        assert_eq!(dog.poll(true, Duration::from_millis(100)), WatchdogState::Satisfied);
        // Later stalls do not re-arm.
        for _ in 0..100 {
            assert_eq!(dog.poll(false, Duration::from_millis(100)), WatchdogState::Satisfied);
        }
    }

    #[test]
    fn times_out_without_frames() {
        let mut dog = StartWatchdog::new(Duration::from_millis(500));
        let mut polls = 0;
        while dog.poll(false, Duration::from_millis(100)) == WatchdogState::Watching {
            polls += 1;
            assert!(polls < 100);
        }
        assert_eq!(dog.state(), WatchdogState::TimedOut);
        assert_eq!(polls, 5);
    }

    #[test]
    fn frame_on_deadline_still_counts() {
        let mut dog = StartWatchdog::new(Duration::from_millis(200));
        dog.poll(false, Duration::from_millis(100));
        dog.poll(false, Duration::from_millis(100));
        assert_eq!(dog.poll(true, Duration::from_millis(100)), WatchdogState::Satisfied);
    }
}
