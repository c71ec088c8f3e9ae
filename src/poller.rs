//! State-convergence polling for fleets of remote resources.
//!
//! The poller drives one transition per target resource and then, when
//! blocking, samples the control plane at a fixed interval until every
//! pending target reports the desired state. Dry-run suppresses the
//! transitions, non-blocking skips the wait entirely, and targets that
//! already satisfy the desired state are excluded from both.

use std::collections::HashMap;
use std::time::Duration;

use thiserror::Error;
use tokio::time::sleep;
use tracing::{debug, info};

use crate::resource::{ResourceClient, ResourceId, TransitionOp};

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// One convergence operation: which resources, towards which state, and how.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ConvergenceRequest<S> {
    /// Resources to drive. Must be non-empty.
    pub target_ids: Vec<ResourceId>,
    /// State every target must reach.
    pub desired_state: S,
    /// Transition command issued to resources not yet in the desired state.
    pub op: TransitionOp,
    /// When true, wait until every pending target reports the desired state.
    pub blocking: bool,
    /// When true, report what would be issued without calling the control
    /// plane's transition endpoint.
    pub dry_run: bool,
}

/// Terminal status of a convergence operation.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ConvergenceOutcome {
    /// Every target already satisfied the desired state; nothing was issued.
    AlreadyConverged,
    /// Dry run: transitions were suppressed.
    DryRun,
    /// Transitions were issued but the caller declined to wait.
    Issued,
    /// Transitions were issued and every target reached the desired state.
    Converged,
}

/// Why a target was excluded from the transition set.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SkipReason {
    /// The resource already reported the desired state.
    AlreadyInDesiredState,
    /// The resource was not in a state the operation accepts (a reboot
    /// targets running resources only).
    NotEligible,
}

/// A target that received no transition, with the state it reported.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SkippedTarget<S> {
    /// Resource identifier.
    pub id: ResourceId,
    /// State observed when the request was planned.
    pub state: S,
    /// Why the transition was not issued.
    pub reason: SkipReason,
}

/// Result of [`ConvergencePoller::converge`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ConvergenceReport<S> {
    /// Terminal status.
    pub outcome: ConvergenceOutcome,
    /// Targets a transition was issued for (or would be, under dry-run).
    pub issued: Vec<ResourceId>,
    /// Targets excluded from the transition set.
    pub skipped: Vec<SkippedTarget<S>>,
}

/// Errors surfaced while converging.
#[derive(Debug, Error)]
pub enum ConvergeError<E>
where
    E: std::error::Error + 'static,
{
    /// Raised when the request names no targets.
    #[error("no target resources were given")]
    EmptyTargets,
    /// Raised when the initial state fetch fails.
    #[error("failed to fetch resource states: {0}")]
    Fetch(#[source] E),
    /// Raised when the control plane omits a requested resource from a
    /// state fetch.
    #[error("control plane returned no state for resource {id}")]
    UnknownResource {
        /// Identifier missing from the response.
        id: ResourceId,
    },
    /// Raised when a transition command is rejected. Aborts the whole
    /// operation; earlier transitions are not rolled back.
    #[error("failed to transition resource {id}: {source}")]
    Transition {
        /// Resource the command targeted.
        id: ResourceId,
        /// Error returned by the client.
        #[source]
        source: E,
    },
    /// Raised when a state sample inside the wait loop fails.
    #[error("failed to poll resource states: {0}")]
    Poll(#[source] E),
    /// Raised when a bounded wait runs out of attempts before convergence.
    #[error("targets did not converge within {attempts} polling attempts")]
    AttemptsExhausted {
        /// Number of samples taken before giving up.
        attempts: u32,
    },
}

/// Drives transitions and waits for a fleet to reach a desired state.
#[derive(Clone, Debug)]
pub struct ConvergencePoller<C> {
    client: C,
    poll_interval: Duration,
    max_attempts: Option<u32>,
}

impl<C> ConvergencePoller<C>
where
    C: ResourceClient,
{
    /// Creates a poller with a 1s interval and an unbounded wait.
    #[must_use]
    pub const fn new(client: C) -> Self {
        Self {
            client,
            poll_interval: DEFAULT_POLL_INTERVAL,
            max_attempts: None,
        }
    }

    /// Overrides the interval between state samples.
    #[must_use]
    pub const fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Bounds the blocking wait to at most `attempts` state samples.
    ///
    /// The default of `None` reproduces the historical behaviour of polling
    /// until convergence with no timeout; tests and cautious callers can
    /// bound it and handle [`ConvergeError::AttemptsExhausted`].
    #[must_use]
    pub const fn with_max_attempts(mut self, attempts: Option<u32>) -> Self {
        self.max_attempts = attempts;
        self
    }

    /// Returns a reference to the underlying client.
    pub const fn client(&self) -> &C {
        &self.client
    }

    /// Executes one convergence request.
    ///
    /// Targets already in the desired state are skipped (a reboot instead
    /// skips targets that are not running). The remaining targets each
    /// receive one transition, then the call either returns immediately
    /// (non-blocking or dry-run) or waits until every pending target
    /// reports the desired state.
    ///
    /// # Errors
    ///
    /// Returns [`ConvergeError`] when the request is empty, when any client
    /// call fails, or when a bounded wait exhausts its attempts. The first
    /// failure aborts the operation; there is no partial-failure recovery.
    pub async fn converge(
        &self,
        request: &ConvergenceRequest<C::State>,
    ) -> Result<ConvergenceReport<C::State>, ConvergeError<C::Error>> {
        if request.target_ids.is_empty() {
            return Err(ConvergeError::EmptyTargets);
        }

        let states = self
            .client
            .fetch_states(&request.target_ids)
            .await
            .map_err(ConvergeError::Fetch)?;

        let mut pending = Vec::new();
        let mut skipped = Vec::new();
        for id in &request.target_ids {
            let current = *states
                .get(id)
                .ok_or_else(|| ConvergeError::UnknownResource { id: id.clone() })?;
            if let Some(reason) = skip_reason(current, request.desired_state, request.op) {
                debug!(id = %id, state = %current, "skipping transition");
                skipped.push(SkippedTarget {
                    id: id.clone(),
                    state: current,
                    reason,
                });
            } else {
                pending.push(id.clone());
            }
        }

        if pending.is_empty() {
            info!("all targets already satisfy the desired state");
            return Ok(ConvergenceReport {
                outcome: ConvergenceOutcome::AlreadyConverged,
                issued: Vec::new(),
                skipped,
            });
        }

        if request.dry_run {
            info!(count = pending.len(), "dry run: transitions suppressed");
            return Ok(ConvergenceReport {
                outcome: ConvergenceOutcome::DryRun,
                issued: pending,
                skipped,
            });
        }

        for id in &pending {
            info!(id = %id, op = ?request.op, "issuing transition");
            self.client
                .transition(id, request.op)
                .await
                .map_err(|source| ConvergeError::Transition {
                    id: id.clone(),
                    source,
                })?;
        }

        if !request.blocking {
            return Ok(ConvergenceReport {
                outcome: ConvergenceOutcome::Issued,
                issued: pending,
                skipped,
            });
        }

        self.wait_for_states(&pending, request.desired_state).await?;
        Ok(ConvergenceReport {
            outcome: ConvergenceOutcome::Converged,
            issued: pending,
            skipped,
        })
    }

    /// Samples `ids` until every one reports `desired`.
    ///
    /// An empty `ids` succeeds vacuously without sampling; the control
    /// plane treats an empty id filter as "everything", so polling with it
    /// would never terminate.
    async fn wait_for_states(
        &self,
        ids: &[ResourceId],
        desired: C::State,
    ) -> Result<(), ConvergeError<C::Error>> {
        if ids.is_empty() {
            return Ok(());
        }

        let mut attempts: u32 = 0;
        loop {
            let states = self
                .client
                .fetch_states(ids)
                .await
                .map_err(ConvergeError::Poll)?;
            if all_match(ids, &states, desired) {
                return Ok(());
            }

            attempts = attempts.saturating_add(1);
            if let Some(max) = self.max_attempts
                && attempts >= max
            {
                return Err(ConvergeError::AttemptsExhausted { attempts });
            }

            debug!(attempt = attempts, "targets not yet converged");
            sleep(self.poll_interval).await;
        }
    }
}

fn skip_reason<S: Copy + Eq>(current: S, desired: S, op: TransitionOp) -> Option<SkipReason> {
    if op == TransitionOp::Reboot {
        // A reboot only makes sense for a resource that is up; the desired
        // state for a reboot is the running state itself.
        (current != desired).then_some(SkipReason::NotEligible)
    } else {
        (current == desired).then_some(SkipReason::AlreadyInDesiredState)
    }
}

fn all_match<S: Copy + Eq>(
    ids: &[ResourceId],
    states: &HashMap<ResourceId, S>,
    desired: S,
) -> bool {
    ids.iter()
        .all(|id| states.get(id).is_some_and(|state| *state == desired))
}
