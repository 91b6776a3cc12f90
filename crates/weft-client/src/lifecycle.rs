//! Host-side session lifecycle owner.
//!
//! Tracks the [`SessionState`] a session is in, validates transitions, and
//! decides what a post-ready connection-state report means: nothing, a
//! scheduled takeover, or a single disconnect. Pure state machine; the
//! client executes the returned action.

use std::time::Duration;

use weft_types::{ClientConfig, DisconnectReason, RemoteState, SessionState};

/// What the client must do in response to a remote-state report.
#[derive(Debug, Clone, PartialEq)]
pub enum LifecycleAction {
    None,
    /// Issue the takeover command after the configured delay.
    ScheduleTakeover(Duration),
    /// Emit a single `disconnected` event and tear the session down.
    Disconnect(DisconnectReason),
}

/// Per-session lifecycle state.
pub struct Lifecycle {
    state: SessionState,
    takeover_on_conflict: bool,
    takeover_delay: Duration,
    /// Set while a takeover is pending for the current conflict episode.
    takeover_scheduled: bool,
    disconnected: bool,
}

impl Lifecycle {
    pub fn new(config: &ClientConfig) -> Self {
        Self {
            state: SessionState::Unauthenticated,
            takeover_on_conflict: config.takeover_on_conflict,
            takeover_delay: config.takeover_delay,
            takeover_scheduled: false,
            disconnected: false,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Move to `to` if the transition table allows it. Invalid transitions
    /// are logged and refused rather than panicking: state reports from the
    /// page can arrive out of order around a teardown.
    pub fn advance(&mut self, to: SessionState) -> bool {
        if !self.state.can_transition(to) {
            tracing::debug!(from = ?self.state, ?to, "lifecycle transition refused");
            return false;
        }
        tracing::info!(from = ?self.state, ?to, "session state changed");
        self.state = to;
        true
    }

    /// Apply the accepted-state policy to a post-ready state report.
    pub fn on_remote_state(&mut self, state: &RemoteState) -> LifecycleAction {
        if state.is_accepted(self.takeover_on_conflict) {
            if *state == RemoteState::Conflict {
                // Accepted only because takeover is enabled. Schedule the
                // takeover once per conflict episode.
                if !self.takeover_scheduled {
                    self.takeover_scheduled = true;
                    return LifecycleAction::ScheduleTakeover(self.takeover_delay);
                }
            } else {
                self.takeover_scheduled = false;
            }
            return LifecycleAction::None;
        }

        if self.disconnected {
            return LifecycleAction::None;
        }
        self.disconnected = true;
        self.advance(SessionState::Disconnected);
        LifecycleAction::Disconnect(DisconnectReason::State(state.clone()))
    }
}
