//! Membership convergence for composite resources.
//!
//! Adding an instance to a load balancer (or removing it) is a convergence
//! problem expressed through member health rather than lifecycle state: the
//! terminal condition is the balancer reporting the single target member as
//! `InService` (add) or `OutOfService` (remove). The interactive yes/no gate
//! lives in the CLI; the request carries the already-answered flag so the
//! flow is driveable non-interactively.

use std::collections::HashMap;
use std::time::Duration;

use thiserror::Error;
use tokio::time::sleep;
use tracing::{debug, info};

use crate::resource::{MemberHealth, MembershipClient, ResourceId, TransitionOp};

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// One membership change: which member, which balancer, which direction.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct MembershipRequest {
    /// Composite resource (load balancer name).
    pub composite: ResourceId,
    /// Member instance to add or remove.
    pub member: ResourceId,
    /// `Register` or `Deregister`.
    pub op: TransitionOp,
    /// When true, wait for the balancer to report the terminal health.
    pub blocking: bool,
    /// When true, skip the transition call.
    pub dry_run: bool,
    /// Whether the caller has confirmed the mutation. Unconfirmed requests
    /// return [`MembershipOutcome::Aborted`] without side effects.
    pub confirmed: bool,
}

/// Terminal status of a membership change.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum MembershipOutcome {
    /// The caller declined the confirmation gate; nothing was issued.
    Aborted,
    /// Dry run: the transition was suppressed.
    DryRun,
    /// The transition was issued but the caller declined to wait.
    Issued,
    /// The balancer reports the member in the terminal health state.
    Converged,
}

/// Errors surfaced while changing membership.
#[derive(Debug, Error)]
pub enum MembershipError<E>
where
    E: std::error::Error + 'static,
{
    /// Raised for ops other than `Register`/`Deregister`.
    #[error("{op:?} is not a membership operation")]
    UnsupportedOp {
        /// The rejected operation.
        op: TransitionOp,
    },
    /// Raised when adding a member that is already registered.
    #[error("{member} is already a member of {composite}")]
    AlreadyMember {
        /// Member instance id.
        member: ResourceId,
        /// Balancer name.
        composite: ResourceId,
    },
    /// Raised when removing a member that is not registered.
    #[error("{member} is not a member of {composite}")]
    NotMember {
        /// Member instance id.
        member: ResourceId,
        /// Balancer name.
        composite: ResourceId,
    },
    /// Raised when a member-health fetch fails.
    #[error("failed to fetch member health: {0}")]
    Fetch(#[source] E),
    /// Raised when the register/deregister call is rejected.
    #[error("failed to change membership of {member}: {source}")]
    Transition {
        /// Member instance id.
        member: ResourceId,
        /// Error returned by the client.
        #[source]
        source: E,
    },
    /// Raised when a bounded wait runs out of attempts.
    #[error("member health did not converge within {attempts} polling attempts")]
    AttemptsExhausted {
        /// Number of samples taken before giving up.
        attempts: u32,
    },
}

/// Drives a single-member registration change and waits for member health.
#[derive(Clone, Debug)]
pub struct MembershipPoller<C> {
    client: C,
    poll_interval: Duration,
    max_attempts: Option<u32>,
}

impl<C> MembershipPoller<C>
where
    C: MembershipClient,
{
    /// Creates a poller with a 2s interval and an unbounded wait.
    #[must_use]
    pub const fn new(client: C) -> Self {
        Self {
            client,
            poll_interval: DEFAULT_POLL_INTERVAL,
            max_attempts: None,
        }
    }

    /// Overrides the interval between health samples.
    #[must_use]
    pub const fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Bounds the blocking wait to at most `attempts` health samples.
    #[must_use]
    pub const fn with_max_attempts(mut self, attempts: Option<u32>) -> Self {
        self.max_attempts = attempts;
        self
    }

    /// Returns a reference to the underlying client.
    pub const fn client(&self) -> &C {
        &self.client
    }

    /// Executes one membership change.
    ///
    /// Pre-checks run before anything mutates: registering an existing
    /// member or deregistering a non-member fails with a lookup-style
    /// error. The confirmation gate is honoured next, then the transition
    /// is issued (unless dry-run) and, when blocking, the balancer is
    /// polled until the member reports the terminal health. A member absent
    /// from the health report counts as `OutOfService`.
    ///
    /// # Errors
    ///
    /// Returns [`MembershipError`] when pre-checks fail, a client call
    /// fails, or a bounded wait exhausts its attempts.
    pub async fn converge(
        &self,
        request: &MembershipRequest,
    ) -> Result<MembershipOutcome, MembershipError<C::Error>> {
        let desired = match request.op {
            TransitionOp::Register => MemberHealth::InService,
            TransitionOp::Deregister => MemberHealth::OutOfService,
            op => return Err(MembershipError::UnsupportedOp { op }),
        };

        let members = self
            .client
            .fetch_member_health(&request.composite, None)
            .await
            .map_err(MembershipError::Fetch)?;
        let is_member = members.contains_key(&request.member);
        match request.op {
            TransitionOp::Register if is_member => {
                return Err(MembershipError::AlreadyMember {
                    member: request.member.clone(),
                    composite: request.composite.clone(),
                });
            }
            TransitionOp::Deregister if !is_member => {
                return Err(MembershipError::NotMember {
                    member: request.member.clone(),
                    composite: request.composite.clone(),
                });
            }
            _ => {}
        }

        if !request.confirmed {
            return Ok(MembershipOutcome::Aborted);
        }
        if request.dry_run {
            info!(member = %request.member, composite = %request.composite,
                "dry run: membership change suppressed");
            return Ok(MembershipOutcome::DryRun);
        }

        info!(member = %request.member, composite = %request.composite, op = ?request.op,
            "issuing membership change");
        self.client
            .member_transition(&request.composite, &request.member, request.op)
            .await
            .map_err(|source| MembershipError::Transition {
                member: request.member.clone(),
                source,
            })?;

        if !request.blocking {
            return Ok(MembershipOutcome::Issued);
        }

        self.wait_for_health(&request.composite, &request.member, desired)
            .await?;
        Ok(MembershipOutcome::Converged)
    }

    async fn wait_for_health(
        &self,
        composite: &ResourceId,
        member: &ResourceId,
        desired: MemberHealth,
    ) -> Result<(), MembershipError<C::Error>> {
        let member_filter = [member.clone()];
        let mut attempts: u32 = 0;
        loop {
            let healths = self
                .client
                .fetch_member_health(composite, Some(&member_filter))
                .await
                .map_err(MembershipError::Fetch)?;
            if reported_health(&healths, member) == desired {
                return Ok(());
            }

            attempts = attempts.saturating_add(1);
            if let Some(max) = self.max_attempts
                && attempts >= max
            {
                return Err(MembershipError::AttemptsExhausted { attempts });
            }

            debug!(member = %member, attempt = attempts, "member health not yet terminal");
            sleep(self.poll_interval).await;
        }
    }
}

/// Reads a member's health from a report, treating absence as out of
/// service. A deregistered member eventually disappears from the balancer's
/// report entirely; the wait must still terminate.
fn reported_health(healths: &HashMap<ResourceId, MemberHealth>, member: &ResourceId) -> MemberHealth {
    healths
        .get(member)
        .copied()
        .unwrap_or(MemberHealth::OutOfService)
}

/// Percentage of members a balancer reports as `InService`.
///
/// # Errors
///
/// Returns [`HealthRateError::NoMembers`] when the report is empty; a
/// balancer with no members has no meaningful rate.
pub fn health_rate(
    healths: &HashMap<ResourceId, MemberHealth>,
) -> Result<u32, HealthRateError> {
    let total = u32::try_from(healths.len()).unwrap_or(u32::MAX);
    if total == 0 {
        return Err(HealthRateError::NoMembers);
    }
    let healthy = healths
        .values()
        .filter(|health| **health == MemberHealth::InService)
        .count();
    let healthy_count = u64::from(u32::try_from(healthy).unwrap_or(total));
    let rate = healthy_count * 100 / u64::from(total);
    Ok(u32::try_from(rate).unwrap_or(100))
}

/// Errors raised by [`health_rate`].
#[derive(Clone, Copy, Debug, Error, Eq, PartialEq)]
pub enum HealthRateError {
    /// The balancer reports no members at all.
    #[error("no members are attached to this load balancer")]
    NoMembers,
}

#[cfg(test)]
mod tests;
