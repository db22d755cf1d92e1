//! Why a task run was told to stop.
use std::{
    fmt,
    sync::{Arc, OnceLock},
};

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use rig_model::TimeoutType;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Signal {
    /// The controller reported that a user aborted the task.
    AbortedByUser,
    /// Too many consecutive heartbeats failed.
    HeartbeatMaxFailed,
    IdleTimeoutExceeded,
    ExecTimeoutExceeded,
    /// A setup or teardown block ran past its own deadline.
    BlockTimeoutExceeded,
}

impl Signal {
    pub fn as_str(&self) -> &'static str {
        match self {
            Signal::AbortedByUser => "aborted_by_user",
            Signal::HeartbeatMaxFailed => "heartbeat_max_failed",
            Signal::IdleTimeoutExceeded => "idle_timeout_exceeded",
            Signal::ExecTimeoutExceeded => "exec_timeout_exceeded",
            Signal::BlockTimeoutExceeded => "block_timeout_exceeded",
        }
    }

    /// Timeout kind reported for this signal, if it is a task timeout.
    pub fn timeout_type(&self) -> Option<TimeoutType> {
        match self {
            Signal::IdleTimeoutExceeded => Some(TimeoutType::Idle),
            Signal::ExecTimeoutExceeded => Some(TimeoutType::Exec),
            _ => None,
        }
    }
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Cancellation carrying the reason it fired.
///
/// The first [`trigger`](StopSignal::trigger) wins: its reason is kept and later triggers are
/// ignored. A [`child`](StopSignal::child) is cancelled with its parent but may also be stopped
/// on its own without affecting the parent.
#[derive(Debug, Clone, Default)]
pub struct StopSignal {
    token: CancellationToken,
    reason: Arc<OnceLock<Signal>>,
    parent: Option<Box<StopSignal>>,
}

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn child(&self) -> Self {
        Self {
            token: self.token.child_token(),
            reason: Arc::new(OnceLock::new()),
            parent: Some(Box::new(self.clone())),
        }
    }

    /// Stop with `signal`. Returns `false` when a reason was already recorded.
    pub fn trigger(&self, signal: Signal) -> bool {
        self.trigger_with(signal, || {})
    }

    /// Stop with `signal`, running `on_first` before waiters are woken if this trigger wins.
    pub fn trigger_with(&self, signal: Signal, on_first: impl FnOnce()) -> bool {
        if self.reason.set(signal).is_err() {
            return false;
        }
        on_first();
        self.token.cancel();
        true
    }

    /// Own reason, else the parent's.
    pub fn reason(&self) -> Option<Signal> {
        self.reason
            .get()
            .copied()
            .or_else(|| self.parent.as_ref().and_then(|p| p.reason()))
    }

    /// Reason recorded on this signal itself, ignoring the parent.
    pub fn own_reason(&self) -> Option<Signal> {
        self.reason.get().copied()
    }

    #[inline]
    pub fn is_triggered(&self) -> bool {
        self.token.is_cancelled()
    }

    pub async fn cancelled(&self) {
        self.token.cancelled().await
    }

    /// Token for one command run; cancelled together with this signal.
    pub fn command_token(&self) -> CancellationToken {
        self.token.child_token()
    }
}

/// Stop signal that can be swapped while shared.
///
/// The heartbeat ticker reports into one of these; the execution loop moves it from the main
/// phase's signal to the teardown blocks' signal.
#[derive(Debug, Clone, Default)]
pub struct StopTarget(Arc<Mutex<StopSignal>>);

impl StopTarget {
    pub fn new(stop: StopSignal) -> Self {
        Self(Arc::new(Mutex::new(stop)))
    }

    pub fn retarget(&self, stop: StopSignal) {
        *self.0.lock() = stop;
    }

    pub fn current(&self) -> StopSignal {
        self.0.lock().clone()
    }

    /// Trigger the current signal. Returns `false` when it already had a reason.
    pub fn trigger(&self, signal: Signal) -> bool {
        self.current().trigger(signal)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_trigger_wins() {
        let stop = StopSignal::new();
        assert!(stop.reason().is_none());
        assert!(stop.trigger(Signal::IdleTimeoutExceeded));
        assert!(!stop.trigger(Signal::AbortedByUser));
        assert!(stop.is_triggered());
        assert_eq!(stop.reason(), Some(Signal::IdleTimeoutExceeded));
    }

    #[test]
    fn on_first_runs_once() {
        let stop = StopSignal::new();
        let mut runs = 0;
        stop.trigger_with(Signal::ExecTimeoutExceeded, || runs += 1);
        stop.trigger_with(Signal::ExecTimeoutExceeded, || runs += 1);
        assert_eq!(runs, 1);
    }

    #[test]
    fn child_follows_parent_but_not_back() {
        let parent = StopSignal::new();
        let child = parent.child();
        child.trigger(Signal::BlockTimeoutExceeded);
        assert!(child.is_triggered());
        assert!(!parent.is_triggered());

        let other = parent.child();
        parent.trigger(Signal::AbortedByUser);
        assert!(other.is_triggered());
        assert_eq!(other.reason(), Some(Signal::AbortedByUser));
        assert_eq!(other.own_reason(), None);
        assert_eq!(child.reason(), Some(Signal::BlockTimeoutExceeded));
    }

    #[test]
    fn target_follows_retarget() {
        let main = StopSignal::new();
        let target = StopTarget::new(main.clone());
        let teardown = StopSignal::new();
        target.retarget(teardown.clone());

        assert!(target.trigger(Signal::AbortedByUser));
        assert!(!target.trigger(Signal::HeartbeatMaxFailed));
        assert!(!main.is_triggered());
        assert_eq!(teardown.reason(), Some(Signal::AbortedByUser));
    }

    #[test]
    fn timeout_kinds() {
        assert_eq!(
            Signal::IdleTimeoutExceeded.timeout_type(),
            Some(TimeoutType::Idle)
        );
        assert_eq!(Signal::AbortedByUser.timeout_type(), None);
        assert_eq!(Signal::HeartbeatMaxFailed.to_string(), "heartbeat_max_failed");
    }
}
