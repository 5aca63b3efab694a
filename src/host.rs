use crate::scheduler::Outcome;
use std::io;
use std::time::Instant;

/// Reasons a due packet did not go out. None of these are fatal; the
/// scheduler reports them and waits for the next evaluation.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("Wake-on-LAN is disabled")]
    Disabled,
    #[error("Target MAC address is not configured")]
    UnconfiguredTarget,
    #[error("Network is not connected")]
    NotConnected,
    #[error("Failed to send magic packet: {0}")]
    Transport(#[from] io::Error),
    #[error("Only {0} bytes of the magic packet were sent")]
    ShortWrite(usize),
}

impl Error {
    /// True when the failure came from the network rather than configuration.
    pub fn is_transport_unavailable(&self) -> bool {
        matches!(
            self,
            Self::NotConnected | Self::Transport(_) | Self::ShortWrite(_)
        )
    }
}

/// Monotonic milliseconds.
pub trait Clock: Send {
    fn now_ms(&self) -> u64;
}

pub struct MonotonicClock {
    start: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        MonotonicClock {
            start: Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn now_ms(&self) -> u64 {
        self.start.elapsed().as_millis() as u64
    }
}

/// Hooks a hosting application drives.
pub trait Lifecycle {
    /// Called once at startup. Triggers before this are ignored.
    fn on_init(&mut self);
    /// Called whenever the network (re)connects.
    fn on_network_up(&mut self) -> Outcome;
    /// Called periodically from the host's loop.
    fn on_tick(&mut self) -> Outcome;
    /// An explicit request to wake the target now.
    fn on_command(&mut self) -> Outcome;
}

#[cfg(test)]
mod tests {
    use crate::host::*;

    #[test]
    fn test_transport_unavailable() {
        assert!(Error::NotConnected.is_transport_unavailable());
        assert!(Error::ShortWrite(12).is_transport_unavailable());
        assert!(
            Error::from(io::Error::new(io::ErrorKind::Other, "boom")).is_transport_unavailable()
        );
        assert!(!Error::UnconfiguredTarget.is_transport_unavailable());
        assert!(!Error::Disabled.is_transport_unavailable());
    }

    #[test]
    fn test_monotonic_clock() {
        let clock = MonotonicClock::new();
        let a = clock.now_ms();
        let b = clock.now_ms();
        assert!(b >= a);
    }
}
