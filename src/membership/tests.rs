//! Tests for membership convergence against a scripted fake balancer.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use crate::resource::{
    ClientError, ClientFuture, MemberHealth, MembershipClient, ResourceId, TransitionOp,
};

use super::{
    HealthRateError, MembershipError, MembershipOutcome, MembershipPoller, MembershipRequest,
    health_rate,
};

/// Scripted balancer double. Each health fetch consumes the next queued
/// report; the final report repeats once the queue is drained.
struct FakeBalancer {
    reports: Mutex<VecDeque<HashMap<ResourceId, MemberHealth>>>,
    transitions: Mutex<Vec<(ResourceId, ResourceId, TransitionOp)>>,
}

impl FakeBalancer {
    fn scripted(reports: Vec<HashMap<ResourceId, MemberHealth>>) -> Self {
        Self {
            reports: Mutex::new(VecDeque::from(reports)),
            transitions: Mutex::new(Vec::new()),
        }
    }

    fn next_report(&self) -> HashMap<ResourceId, MemberHealth> {
        let mut queue = self
            .reports
            .lock()
            .unwrap_or_else(|err| panic!("reports lock: {err}"));
        if queue.len() > 1 {
            queue
                .pop_front()
                .unwrap_or_else(|| panic!("report queue underflow"))
        } else {
            queue.front().cloned().unwrap_or_default()
        }
    }

    fn recorded_transitions(&self) -> Vec<(ResourceId, ResourceId, TransitionOp)> {
        self.transitions
            .lock()
            .unwrap_or_else(|err| panic!("transitions lock: {err}"))
            .clone()
    }
}

impl MembershipClient for FakeBalancer {
    type Error = ClientError;

    fn fetch_member_health<'a>(
        &'a self,
        _composite: &'a ResourceId,
        members: Option<&'a [ResourceId]>,
    ) -> ClientFuture<'a, HashMap<ResourceId, MemberHealth>, ClientError> {
        Box::pin(async move {
            let report = self.next_report();
            Ok(members.map_or_else(
                || report.clone(),
                |filter| {
                    filter
                        .iter()
                        .filter_map(|id| report.get(id).map(|health| (id.clone(), *health)))
                        .collect()
                },
            ))
        })
    }

    fn member_transition<'a>(
        &'a self,
        composite: &'a ResourceId,
        member: &'a ResourceId,
        op: TransitionOp,
    ) -> ClientFuture<'a, (), ClientError> {
        Box::pin(async move {
            self.transitions
                .lock()
                .unwrap_or_else(|err| panic!("transitions lock: {err}"))
                .push((composite.clone(), member.clone(), op));
            Ok(())
        })
    }
}

fn report(entries: &[(&str, MemberHealth)]) -> HashMap<ResourceId, MemberHealth> {
    entries
        .iter()
        .map(|(id, health)| (ResourceId::from(*id), *health))
        .collect()
}

fn add_request(member: &str) -> MembershipRequest {
    MembershipRequest {
        composite: ResourceId::from("LB1"),
        member: ResourceId::from(member),
        op: TransitionOp::Register,
        blocking: true,
        dry_run: false,
        confirmed: true,
    }
}

fn fast_poller(client: FakeBalancer) -> MembershipPoller<FakeBalancer> {
    MembershipPoller::new(client).with_poll_interval(Duration::from_millis(1))
}

#[tokio::test]
async fn add_fails_before_transition_when_already_a_member() {
    let client = FakeBalancer::scripted(vec![report(&[("i-x", MemberHealth::InService)])]);
    let poller = fast_poller(client);

    let err = poller
        .converge(&add_request("i-x"))
        .await
        .expect_err("expected error");

    assert!(
        matches!(&err, MembershipError::AlreadyMember { member, .. } if member.as_str() == "i-x"),
        "unexpected error: {err}"
    );
    assert!(poller.client().recorded_transitions().is_empty());
}

#[tokio::test]
async fn remove_fails_when_not_a_member() {
    let client = FakeBalancer::scripted(vec![report(&[("i-other", MemberHealth::InService)])]);
    let poller = fast_poller(client);
    let mut req = add_request("i-x");
    req.op = TransitionOp::Deregister;

    let err = poller.converge(&req).await.expect_err("expected error");
    assert!(
        matches!(err, MembershipError::NotMember { .. }),
        "unexpected error: {err}"
    );
}

#[tokio::test]
async fn unconfirmed_request_aborts_without_side_effects() {
    let client = FakeBalancer::scripted(vec![report(&[])]);
    let poller = fast_poller(client);
    let mut req = add_request("i-x");
    req.confirmed = false;

    let outcome = poller
        .converge(&req)
        .await
        .unwrap_or_else(|err| panic!("converge: {err}"));

    assert_eq!(outcome, MembershipOutcome::Aborted);
    assert!(poller.client().recorded_transitions().is_empty());
}

#[tokio::test]
async fn dry_run_suppresses_the_membership_change() {
    let client = FakeBalancer::scripted(vec![report(&[])]);
    let poller = fast_poller(client);
    let mut req = add_request("i-x");
    req.dry_run = true;

    let outcome = poller
        .converge(&req)
        .await
        .unwrap_or_else(|err| panic!("converge: {err}"));

    assert_eq!(outcome, MembershipOutcome::DryRun);
    assert!(poller.client().recorded_transitions().is_empty());
}

#[tokio::test]
async fn add_waits_until_the_balancer_reports_in_service() {
    let client = FakeBalancer::scripted(vec![
        report(&[]),
        report(&[("i-x", MemberHealth::OutOfService)]),
        report(&[("i-x", MemberHealth::OutOfService)]),
        report(&[("i-x", MemberHealth::InService)]),
    ]);
    let poller = fast_poller(client);

    let outcome = poller
        .converge(&add_request("i-x"))
        .await
        .unwrap_or_else(|err| panic!("converge: {err}"));

    assert_eq!(outcome, MembershipOutcome::Converged);
    assert_eq!(
        poller.client().recorded_transitions(),
        vec![(
            ResourceId::from("LB1"),
            ResourceId::from("i-x"),
            TransitionOp::Register
        )]
    );
}

#[tokio::test]
async fn remove_treats_a_vanished_member_as_out_of_service() {
    let client = FakeBalancer::scripted(vec![
        report(&[("i-x", MemberHealth::InService)]),
        // After deregistration the balancer forgets the member entirely.
        report(&[]),
    ]);
    let poller = fast_poller(client);
    let mut req = add_request("i-x");
    req.op = TransitionOp::Deregister;

    let outcome = poller
        .converge(&req)
        .await
        .unwrap_or_else(|err| panic!("converge: {err}"));

    assert_eq!(outcome, MembershipOutcome::Converged);
}

#[tokio::test]
async fn non_blocking_returns_issued() {
    let client = FakeBalancer::scripted(vec![report(&[])]);
    let poller = fast_poller(client);
    let mut req = add_request("i-x");
    req.blocking = false;

    let outcome = poller
        .converge(&req)
        .await
        .unwrap_or_else(|err| panic!("converge: {err}"));

    assert_eq!(outcome, MembershipOutcome::Issued);
}

#[tokio::test]
async fn lifecycle_op_is_rejected() {
    let client = FakeBalancer::scripted(vec![report(&[])]);
    let poller = fast_poller(client);
    let mut req = add_request("i-x");
    req.op = TransitionOp::Reboot;

    let err = poller.converge(&req).await.expect_err("expected error");
    assert!(matches!(
        err,
        MembershipError::UnsupportedOp {
            op: TransitionOp::Reboot
        }
    ));
}

#[tokio::test]
async fn bounded_wait_exhausts_attempts() {
    let client = FakeBalancer::scripted(vec![
        report(&[]),
        report(&[("i-x", MemberHealth::OutOfService)]),
    ]);
    let poller = fast_poller(client).with_max_attempts(Some(2));

    let err = poller
        .converge(&add_request("i-x"))
        .await
        .expect_err("expected error");
    assert!(
        matches!(err, MembershipError::AttemptsExhausted { attempts: 2 }),
        "unexpected error: {err}"
    );
}

#[test]
fn health_rate_uses_the_corrected_formula() {
    let healths = report(&[
        ("i-1", MemberHealth::InService),
        ("i-2", MemberHealth::InService),
        ("i-3", MemberHealth::OutOfService),
        ("i-4", MemberHealth::OutOfService),
    ]);
    // 2 of 4 in service is 50%, with no off-by-one on the healthy count.
    assert_eq!(health_rate(&healths), Ok(50));
}

#[test]
fn health_rate_of_fully_healthy_balancer_is_100() {
    let healths = report(&[("i-1", MemberHealth::InService)]);
    assert_eq!(health_rate(&healths), Ok(100));
}

#[test]
fn health_rate_rejects_an_empty_balancer() {
    assert_eq!(health_rate(&report(&[])), Err(HealthRateError::NoMembers));
}
