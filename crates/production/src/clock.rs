//! Wall-clock time that follows tokio's clock.

use palisade_core::{Clock, SystemClock};
use std::time::Duration;
use tokio::time::Instant;

/// Wall-clock time at creation plus tokio's elapsed time.
///
/// Under a paused tokio runtime the clock advances with virtual time, so
/// heartbeat silence and recovery waits line up with `tokio::time::sleep`.
#[derive(Debug, Clone, Copy)]
pub struct TokioClock {
    base: Duration,
    start: Instant,
}

impl TokioClock {
    pub fn new() -> Self {
        Self {
            base: SystemClock.now(),
            start: Instant::now(),
        }
    }
}

impl Default for TokioClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for TokioClock {
    fn now(&self) -> Duration {
        self.base + self.start.elapsed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_follows_virtual_time() {
        let clock = TokioClock::new();
        let before = clock.now();
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(clock.now() - before, Duration::from_secs(30));
    }
}
