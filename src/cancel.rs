//! Run-level stop signal and cooperative extraction checkpoints.
//!
//! Extraction is never interrupted forcefully. Long-running routines call
//! [`Checkpoint::check`] before and after each expensive step and bail out
//! with [`ExtractError::Timeout`] or [`ExtractError::Cancelled`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::extract::ExtractError;

/// Shared flag that moves a run into drain-and-stop mode.
#[derive(Clone, Debug, Default)]
pub struct StopSignal(Arc<AtomicBool>);

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    #[inline]
    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Deadline plus stop signal for one extraction.
#[derive(Clone, Debug)]
pub struct Checkpoint {
    deadline: Option<Instant>,
    stop: StopSignal,
}

impl Checkpoint {
    /// Checkpoint that expires `timeout` from now.
    pub fn new(timeout: Duration, stop: StopSignal) -> Self {
        Self {
            deadline: Instant::now().checked_add(timeout),
            stop,
        }
    }

    /// Checkpoint that only observes the stop signal.
    pub fn stop_only(stop: StopSignal) -> Self {
        Self {
            deadline: None,
            stop,
        }
    }

    /// Never expires and is never cancelled.
    pub fn unbounded() -> Self {
        Self::stop_only(StopSignal::new())
    }

    #[inline]
    pub fn check(&self) -> Result<(), ExtractError> {
        if self.stop.is_stopped() {
            return Err(ExtractError::Cancelled);
        }
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Err(ExtractError::Timeout),
            _ => Ok(()),
        }
    }

    pub fn stop_signal(&self) -> &StopSignal {
        &self.stop
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unbounded_checkpoint_passes() {
        assert!(Checkpoint::unbounded().check().is_ok());
    }

    #[test]
    fn stop_signal_cancels_checkpoint() {
        let stop = StopSignal::new();
        let cp = Checkpoint::new(Duration::from_secs(60), stop.clone());
        assert!(cp.check().is_ok());
        stop.stop();
        assert!(matches!(cp.check(), Err(ExtractError::Cancelled)));
    }

    #[test]
    fn expired_deadline_times_out() {
        let cp = Checkpoint::new(Duration::ZERO, StopSignal::new());
        assert!(matches!(cp.check(), Err(ExtractError::Timeout)));
    }
}
