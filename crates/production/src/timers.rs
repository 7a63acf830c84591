//! Timer management for the cluster node.
//!
//! Provides tokio-based timers for the consensus state machine. Each timer is
//! a task that sleeps and then sends the matching event; it can be cancelled.

use palisade_core::{Event, TimerId};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, trace};

/// Convert a TimerId to the corresponding Event.
fn timer_event(id: TimerId) -> Event {
    match id {
        TimerId::Phase(sequence) => Event::PhaseTimeout { sequence },
        TimerId::ViewChange(view) => Event::ViewChangeTimeout { view },
    }
}

/// Manages timers for the consensus task.
pub struct TimerManager {
    /// Active timers (id -> task handle).
    timers: HashMap<TimerId, JoinHandle<()>>,
    /// Event sender for timer fires.
    event_tx: mpsc::Sender<Event>,
}

impl TimerManager {
    pub fn new(event_tx: mpsc::Sender<Event>) -> Self {
        Self {
            timers: HashMap::new(),
            event_tx,
        }
    }

    /// Set a timer that will fire after the given duration.
    ///
    /// If a timer with the same ID already exists, it is cancelled first.
    pub fn set_timer(&mut self, id: TimerId, duration: Duration) {
        self.cancel_timer(id);

        let event_tx = self.event_tx.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(duration).await;
            trace!(timer = ?id, "Timer fired");
            // The receiver is gone only during shutdown.
            let _ = event_tx.send(timer_event(id)).await;
        });

        self.timers.insert(id, handle);
        debug!(timer = ?id, ?duration, "Timer set");
    }

    /// Cancel a timer. No-op if it does not exist or already fired.
    pub fn cancel_timer(&mut self, id: TimerId) {
        if let Some(handle) = self.timers.remove(&id) {
            handle.abort();
            debug!(timer = ?id, "Timer cancelled");
        }
    }

    /// Cancel all timers. Called during shutdown.
    pub fn cancel_all(&mut self) {
        for (id, handle) in self.timers.drain() {
            handle.abort();
            trace!(timer = ?id, "Timer cancelled (shutdown)");
        }
    }

    /// Number of timers set and not cancelled. Fired timers count until
    /// replaced or cancelled.
    pub fn active_count(&self) -> usize {
        self.timers.len()
    }
}

impl Drop for TimerManager {
    fn drop(&mut self) {
        self.cancel_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use palisade_types::{SequenceNumber, ViewNumber};

    #[tokio::test(start_paused = true)]
    async fn test_timer_fires() {
        let (event_tx, mut event_rx) = mpsc::channel(10);
        let mut manager = TimerManager::new(event_tx);

        manager.set_timer(TimerId::Phase(SequenceNumber(3)), Duration::from_millis(10));

        let event = tokio::time::timeout(Duration::from_millis(100), event_rx.recv())
            .await
            .expect("timeout")
            .expect("channel closed");
        assert!(matches!(
            event,
            Event::PhaseTimeout {
                sequence: SequenceNumber(3)
            }
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timer_cancel() {
        let (event_tx, mut event_rx) = mpsc::channel(10);
        let mut manager = TimerManager::new(event_tx);

        let id = TimerId::ViewChange(ViewNumber(1));
        manager.set_timer(id, Duration::from_millis(50));
        manager.cancel_timer(id);

        let result = tokio::time::timeout(Duration::from_millis(100), event_rx.recv()).await;
        assert!(result.is_err(), "Timer should have been cancelled");
    }

    #[tokio::test(start_paused = true)]
    async fn test_timer_replace() {
        let (event_tx, mut event_rx) = mpsc::channel(10);
        let mut manager = TimerManager::new(event_tx);

        let id = TimerId::ViewChange(ViewNumber(2));
        manager.set_timer(id, Duration::from_millis(100));
        manager.set_timer(id, Duration::from_millis(10));
        assert_eq!(manager.active_count(), 1);

        let event = tokio::time::timeout(Duration::from_millis(50), event_rx.recv())
            .await
            .expect("timeout - timer didn't fire quickly")
            .expect("channel closed");
        assert!(matches!(
            event,
            Event::ViewChangeTimeout {
                view: ViewNumber(2)
            }
        ));

        // The replaced timer never fires.
        let result = tokio::time::timeout(Duration::from_millis(200), event_rx.recv()).await;
        assert!(result.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_all() {
        let (event_tx, mut event_rx) = mpsc::channel(10);
        let mut manager = TimerManager::new(event_tx);

        manager.set_timer(TimerId::Phase(SequenceNumber(1)), Duration::from_millis(50));
        manager.set_timer(TimerId::ViewChange(ViewNumber(1)), Duration::from_millis(50));
        assert_eq!(manager.active_count(), 2);

        manager.cancel_all();
        assert_eq!(manager.active_count(), 0);

        let result = tokio::time::timeout(Duration::from_millis(100), event_rx.recv()).await;
        assert!(result.is_err(), "No timers should have fired");
    }
}
