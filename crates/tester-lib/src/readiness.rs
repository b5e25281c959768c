//! Readiness watcher
//!
//! Consumes the watch stream of a single canary deployment and decides the
//! cycle outcome. The stream is abandoned as soon as the outcome is known.

use crate::cluster::ReadyCountStream;
use crate::models::CycleOutcome;
use crate::shutdown::ShutdownSignal;
use std::time::Duration;
use tokio::time::{timeout_at, Instant};
use tokio_stream::StreamExt;
use tracing::{debug, warn};

/// Watcher state
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ReadinessState {
    /// Still waiting; carries the last known ready-replica count
    Waiting(i32),
    Resolved(CycleOutcome),
}

/// Pure state machine behind [`ReadinessWatcher`]
#[derive(Debug, Clone)]
pub struct ReadinessTracker {
    target: i32,
    state: ReadinessState,
}

impl ReadinessTracker {
    pub fn new(target: i32) -> Self {
        Self {
            target,
            state: ReadinessState::Waiting(0),
        }
    }

    /// Last ready count seen, or the count the outcome was decided on
    pub fn ready_replicas(&self) -> i32 {
        match self.state {
            ReadinessState::Waiting(n) => n,
            ReadinessState::Resolved(CycleOutcome::TimedOut(n)) => n,
            ReadinessState::Resolved(CycleOutcome::Ready(_)) => self.target,
        }
    }

    /// Apply one event observed `elapsed` after the deployment was submitted
    ///
    /// An absent count leaves the tracked value alone. A present count always
    /// replaces it, including a lower one reported by the cluster.
    pub fn observe(&mut self, ready_replicas: Option<i32>, elapsed: Duration) -> ReadinessState {
        if let ReadinessState::Waiting(current) = self.state {
            let current = ready_replicas.unwrap_or(current);
            self.state = if current == self.target {
                ReadinessState::Resolved(CycleOutcome::Ready(elapsed))
            } else {
                ReadinessState::Waiting(current)
            };
        }
        self.state
    }

    /// The stream ended or failed before the target was reached
    pub fn expire(&mut self) -> CycleOutcome {
        match self.state {
            ReadinessState::Resolved(outcome) => outcome,
            ReadinessState::Waiting(current) => {
                let outcome = CycleOutcome::TimedOut(current);
                self.state = ReadinessState::Resolved(outcome);
                outcome
            }
        }
    }
}

/// How a watch ended
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum WatchVerdict {
    Resolved(CycleOutcome),
    /// Shutdown was requested while waiting
    Cancelled { ready_replicas: i32 },
}

/// Waits for a canary deployment to report all replicas ready
#[derive(Debug, Clone)]
pub struct ReadinessWatcher {
    target: i32,
    timeout: Duration,
}

impl ReadinessWatcher {
    pub fn new(target: i32, timeout: Duration) -> Self {
        Self { target, timeout }
    }

    /// Consume `events` until the outcome is known
    ///
    /// Durations are measured from `submitted_at`. Besides the server closing
    /// the stream, a local deadline of `timeout` from now bounds the wait.
    pub async fn wait(
        &self,
        mut events: ReadyCountStream,
        submitted_at: Instant,
        shutdown: &mut ShutdownSignal,
    ) -> WatchVerdict {
        let deadline = Instant::now() + self.timeout;
        let mut tracker = ReadinessTracker::new(self.target);

        loop {
            let next = tokio::select! {
                biased;
                _ = shutdown.triggered() => {
                    return WatchVerdict::Cancelled {
                        ready_replicas: tracker.ready_replicas(),
                    };
                }
                next = timeout_at(deadline, events.next()) => next,
            };

            match next {
                Err(_) => {
                    debug!(timeout_secs = self.timeout.as_secs_f64(), "Watch deadline reached");
                    return WatchVerdict::Resolved(tracker.expire());
                }
                Ok(None) => {
                    debug!("Watch stream ended");
                    return WatchVerdict::Resolved(tracker.expire());
                }
                Ok(Some(Err(e))) => {
                    warn!(error = %e, ready = tracker.ready_replicas(), "Watch stream failed, treating as timeout");
                    return WatchVerdict::Resolved(tracker.expire());
                }
                Ok(Some(Ok(event))) => {
                    let state = tracker.observe(event.ready_replicas, submitted_at.elapsed());
                    debug!(
                        event_type = event.event_type,
                        deployment = %event.name,
                        ready = tracker.ready_replicas(),
                        target = self.target,
                        "Received deployment event"
                    );
                    if let ReadinessState::Resolved(outcome) = state {
                        return WatchVerdict::Resolved(outcome);
                    }
                }
            }
        }
    }
}
