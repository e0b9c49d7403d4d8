//! Per-turn state machine with the cancel failsafe.
//!
//! The machine never reads a clock: callers pass `Instant`s in and ask for the
//! next deadline, so the live loop can sleep on it and tests can step time by hand.

use serde::Serialize;
use stagecast_core::TurnStatus;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

pub const DEFAULT_CANCEL_GRACE: Duration = Duration::from_millis(1_500);
pub const DEFAULT_CANCEL_FAILSAFE: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    Idle,
    Running,
    Completed,
    Error,
    Cancelled,
}

impl LifecycleState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            LifecycleState::Completed | LifecycleState::Error | LifecycleState::Cancelled
        )
    }
}

impl From<TurnStatus> for LifecycleState {
    fn from(status: TurnStatus) -> Self {
        match status {
            TurnStatus::Running => LifecycleState::Running,
            TurnStatus::Completed => LifecycleState::Completed,
            TurnStatus::Error => LifecycleState::Error,
            TurnStatus::Cancelled => LifecycleState::Cancelled,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LifecycleConfig {
    pub cancel_grace: Duration,
    pub cancel_failsafe: Duration,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            cancel_grace: DEFAULT_CANCEL_GRACE,
            cancel_failsafe: DEFAULT_CANCEL_FAILSAFE,
        }
    }
}

/// What the control surface should show right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Controls {
    pub submit_enabled: bool,
    pub stop_visible: bool,
    pub stop_disabled: bool,
    pub cancel_in_progress: bool,
}

/// Timer outcome reported by `TurnLifecycle::poll`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleEffect {
    CancelInProgress,
    ForcedStop,
}

#[derive(Debug, Clone, Copy)]
struct CancelTimers {
    grace_at: Instant,
    failsafe_at: Instant,
    grace_elapsed: bool,
}

#[derive(Debug)]
pub struct TurnLifecycle {
    config: LifecycleConfig,
    state: LifecycleState,
    turn_id: Option<String>,
    cancel: Option<CancelTimers>,
    forced_stop: bool,
}

impl Default for TurnLifecycle {
    fn default() -> Self {
        Self::new(LifecycleConfig::default())
    }
}

impl TurnLifecycle {
    pub fn new(config: LifecycleConfig) -> Self {
        Self {
            config,
            state: LifecycleState::Idle,
            turn_id: None,
            cancel: None,
            forced_stop: false,
        }
    }

    pub fn config(&self) -> LifecycleConfig {
        self.config
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    pub fn turn_id(&self) -> Option<&str> {
        self.turn_id.as_deref()
    }

    pub fn is_running(&self) -> bool {
        self.state == LifecycleState::Running
    }

    pub fn forced_stop(&self) -> bool {
        self.forced_stop
    }

    pub fn cancel_requested(&self) -> bool {
        self.cancel.is_some()
    }

    /// Starts a turn from idle or any terminal state. Rejected while a turn runs.
    pub fn begin(&mut self, turn_id: &str) -> bool {
        if self.is_running() {
            warn!(
                event = "turn_begin_rejected",
                running_turn = self.turn_id.as_deref().unwrap_or_default(),
                requested_turn = %turn_id
            );
            return false;
        }
        self.state = LifecycleState::Running;
        self.turn_id = Some(turn_id.to_string());
        self.cancel = None;
        self.forced_stop = false;
        true
    }

    /// Arms the grace and failsafe deadlines. A second request while armed is a no-op.
    pub fn request_cancel(&mut self, now: Instant) -> bool {
        if !self.is_running() || self.cancel.is_some() {
            return false;
        }
        self.cancel = Some(CancelTimers {
            grace_at: now + self.config.cancel_grace,
            failsafe_at: now + self.config.cancel_failsafe,
            grace_elapsed: false,
        });
        debug!(
            event = "cancel_armed",
            turn_id = self.turn_id.as_deref().unwrap_or_default()
        );
        true
    }

    /// Applies a terminal status and disarms both timers.
    pub fn finish(&mut self, status: TurnStatus) -> bool {
        if !self.is_running() || !status.is_terminal() {
            return false;
        }
        self.state = status.into();
        self.cancel = None;
        true
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        let timers = self.cancel.as_ref()?;
        if timers.grace_elapsed {
            Some(timers.failsafe_at)
        } else {
            Some(timers.grace_at)
        }
    }

    pub fn poll(&mut self, now: Instant) -> Option<LifecycleEffect> {
        if !self.is_running() {
            return None;
        }
        let timers = self.cancel.as_mut()?;
        if now >= timers.failsafe_at {
            self.cancel = None;
            self.state = LifecycleState::Cancelled;
            self.forced_stop = true;
            warn!(
                event = "cancel_failsafe_fired",
                turn_id = self.turn_id.as_deref().unwrap_or_default()
            );
            return Some(LifecycleEffect::ForcedStop);
        }
        if !timers.grace_elapsed && now >= timers.grace_at {
            timers.grace_elapsed = true;
            return Some(LifecycleEffect::CancelInProgress);
        }
        None
    }

    pub fn controls(&self) -> Controls {
        let running = self.is_running();
        Controls {
            submit_enabled: !running,
            stop_visible: running,
            stop_disabled: running && self.cancel.is_some(),
            cancel_in_progress: running
                && self.cancel.as_ref().is_some_and(|timers| timers.grace_elapsed),
        }
    }
}
