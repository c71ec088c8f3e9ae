//! Core library for the `imgr` and `elbmgr` command-line tools.
//!
//! The crate exposes a control-plane abstraction ([`ResourceClient`],
//! [`MembershipClient`]), a state-convergence poller that drives a fleet of
//! remote resources towards a desired state, AWS implementations over the
//! EC2 and classic ELB APIs, and the named instance-group configuration the
//! CLIs resolve targets through.

pub mod aws;
pub mod groups;
pub mod membership;
pub mod poller;
pub mod resource;

pub use aws::{DEFAULT_REGION, Ec2Client, ElbClient, IdentityDocument, IdentitySource};
pub use groups::{Groups, GroupsError};
pub use membership::{
    HealthRateError, MembershipError, MembershipOutcome, MembershipPoller, MembershipRequest,
    health_rate,
};
pub use poller::{
    ConvergeError, ConvergenceOutcome, ConvergencePoller, ConvergenceReport, ConvergenceRequest,
    SkipReason, SkippedTarget,
};
pub use resource::{
    ClientError, ClientFuture, InstanceState, MemberHealth, MembershipClient, Resource,
    ResourceClient, ResourceId, TransitionOp,
};
