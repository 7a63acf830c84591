//! Core traits for state machines.

use crate::{Action, Event};
use std::time::Duration;

/// A state machine that processes events.
///
/// Consensus logic is written as a state machine that is:
///
/// - **Synchronous**: No async, no `.await`
/// - **Deterministic**: Same state + event = same actions
/// - **Pure-ish**: Mutates self, but performs no network I/O
///
/// ```ignore
/// impl StateMachine for PbftState {
///     fn handle(&mut self, event: Event) -> Vec<Action> {
///         match event {
///             Event::MessageReceived { message } => self.on_message(message),
///             Event::PhaseTimeout { sequence } => self.on_phase_timeout(sequence),
///             // ...
///         }
///     }
/// }
/// ```
pub trait StateMachine {
    /// Process an event, returning actions to perform.
    ///
    /// # Guarantees
    ///
    /// - **Synchronous**: This method never blocks or awaits
    /// - **Deterministic**: Given the same state and event, always returns the same actions
    /// - **No I/O**: The runner performs all I/O via the returned actions
    ///
    /// Returns a list of actions for the runner to execute: network sends, timer
    /// changes and notifications for the application.
    fn handle(&mut self, event: Event) -> Vec<Action>;

    /// Set the current time.
    ///
    /// Called by the runner before each `handle()` call with the current
    /// wall-clock or virtual time.
    /// `now` is a duration since the Unix epoch.
    fn set_time(&mut self, now: Duration);

    /// Get the current time.
    ///
    /// Returns the time that was last set via `set_time()`.
    fn now(&self) -> Duration;
}
