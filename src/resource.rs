//! Control-plane abstraction for remotely managed resources.
//!
//! A [`ResourceClient`] adapts a provider API to the minimal contract the
//! convergence poller needs: fetch resources, sample lifecycle states, and
//! issue transition commands. A [`MembershipClient`] covers composite
//! resources (load balancers) whose members report a health state distinct
//! from the member's own lifecycle state.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;

use thiserror::Error;

/// Opaque identifier for a remote resource (instance id or balancer name).
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct ResourceId(String);

impl ResourceId {
    /// Wraps an identifier string.
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Returns the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl From<String> for ResourceId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for ResourceId {
    fn from(value: &str) -> Self {
        Self(value.to_owned())
    }
}

impl AsRef<str> for ResourceId {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Snapshot of a remote resource as reported by the control plane.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Resource<S> {
    /// Provider identifier.
    pub id: ResourceId,
    /// Lifecycle state at fetch time.
    pub state: S,
    /// Display tags (for example the EC2 `Name` tag). Display only.
    pub tags: HashMap<String, String>,
}

impl<S> Resource<S> {
    /// Returns the `Name` tag when present, falling back to the id.
    #[must_use]
    pub fn display_name(&self) -> &str {
        self.tags
            .get("Name")
            .map_or_else(|| self.id.as_str(), String::as_str)
    }
}

/// Lifecycle states a compute instance can occupy.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum InstanceState {
    /// Instance is being provisioned.
    Pending,
    /// Instance is up.
    Running,
    /// Instance is on its way to termination.
    ShuttingDown,
    /// Instance no longer exists as a running resource.
    Terminated,
    /// Instance is powering down.
    Stopping,
    /// Instance is powered off.
    Stopped,
}

impl InstanceState {
    /// Returns the provider's lower-case name for the state.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::ShuttingDown => "shutting-down",
            Self::Terminated => "terminated",
            Self::Stopping => "stopping",
            Self::Stopped => "stopped",
        }
    }
}

impl fmt::Display for InstanceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Health of a single member as reported by a composite resource.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum MemberHealth {
    /// The balancer routes traffic to the member.
    InService,
    /// The member is registered but not receiving traffic, or absent.
    OutOfService,
}

impl fmt::Display for MemberHealth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::InService => "InService",
            Self::OutOfService => "OutOfService",
        })
    }
}

/// State-transition commands understood by the control plane.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TransitionOp {
    /// Power an instance on.
    Start,
    /// Power an instance off.
    Stop,
    /// Restart a running instance.
    Reboot,
    /// Add a member to a composite resource.
    Register,
    /// Remove a member from a composite resource.
    Deregister,
}

impl TransitionOp {
    /// Present-participle label used in progress output.
    #[must_use]
    pub const fn progress_label(self) -> &'static str {
        match self {
            Self::Start => "Starting",
            Self::Stop => "Stopping",
            Self::Reboot => "Rebooting",
            Self::Register => "Registering",
            Self::Deregister => "Deregistering",
        }
    }
}

/// Errors raised by control-plane clients.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum ClientError {
    /// Credentials are missing or were rejected by the provider.
    #[error("authentication failed: {0}")]
    Auth(String),
    /// A named resource or group does not exist.
    #[error("lookup failed: {0}")]
    Lookup(String),
    /// The control plane could not be reached.
    #[error("control plane unreachable: {0}")]
    Connectivity(String),
    /// The control plane rejected the requested transition.
    #[error("transition rejected: {0}")]
    Transition(String),
    /// Uncategorised provider response.
    #[error("provider error: {0}")]
    Provider(String),
}

/// Future returned by client operations.
pub type ClientFuture<'a, T, E> = Pin<Box<dyn Future<Output = Result<T, E>> + Send + 'a>>;

/// Minimal interface the convergence poller requires of a control plane.
///
/// Implementations are polymorphic over the state enumeration via
/// [`ResourceClient::State`]; the compute client uses [`InstanceState`].
pub trait ResourceClient {
    /// Lifecycle state enumeration for this resource kind.
    type State: Copy + Eq + Send + Sync + fmt::Display;
    /// Error type returned by the client.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Fetches full snapshots for the given identifiers.
    ///
    /// Fails with a lookup error when any identifier does not exist.
    fn fetch_resources<'a>(
        &'a self,
        ids: &'a [ResourceId],
    ) -> ClientFuture<'a, Vec<Resource<Self::State>>, Self::Error>;

    /// Samples the current state of the given identifiers.
    ///
    /// An empty input must yield an empty mapping without contacting the
    /// control plane; it is never "fetch all".
    fn fetch_states<'a>(
        &'a self,
        ids: &'a [ResourceId],
    ) -> ClientFuture<'a, HashMap<ResourceId, Self::State>, Self::Error>;

    /// Issues a state-transition command for a single resource.
    ///
    /// Completion is asynchronous from the control plane's point of view;
    /// callers observe progress through [`ResourceClient::fetch_states`].
    fn transition<'a>(
        &'a self,
        id: &'a ResourceId,
        op: TransitionOp,
    ) -> ClientFuture<'a, (), Self::Error>;
}

/// Interface for composite resources whose members report a health state.
pub trait MembershipClient {
    /// Error type returned by the client.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Fetches per-member health for a composite resource.
    ///
    /// When `members` is `None` the health of all current members is
    /// returned. A requested member missing from the result is treated as
    /// [`MemberHealth::OutOfService`] by callers.
    fn fetch_member_health<'a>(
        &'a self,
        composite: &'a ResourceId,
        members: Option<&'a [ResourceId]>,
    ) -> ClientFuture<'a, HashMap<ResourceId, MemberHealth>, Self::Error>;

    /// Registers or deregisters a member of a composite resource.
    ///
    /// Only [`TransitionOp::Register`] and [`TransitionOp::Deregister`] are
    /// meaningful here; other ops are rejected.
    fn member_transition<'a>(
        &'a self,
        composite: &'a ResourceId,
        member: &'a ResourceId,
        op: TransitionOp,
    ) -> ClientFuture<'a, (), Self::Error>;
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case(InstanceState::Pending, "pending")]
    #[case(InstanceState::Running, "running")]
    #[case(InstanceState::ShuttingDown, "shutting-down")]
    #[case(InstanceState::Terminated, "terminated")]
    #[case(InstanceState::Stopping, "stopping")]
    #[case(InstanceState::Stopped, "stopped")]
    fn instance_state_display_matches_provider_names(
        #[case] state: InstanceState,
        #[case] expected: &str,
    ) {
        assert_eq!(state.to_string(), expected);
    }

    #[test]
    fn display_name_prefers_name_tag() {
        let mut tags = HashMap::new();
        tags.insert(String::from("Name"), String::from("web-1"));
        let resource = Resource {
            id: ResourceId::from("i-abc"),
            state: InstanceState::Running,
            tags,
        };
        assert_eq!(resource.display_name(), "web-1");
    }

    #[test]
    fn display_name_falls_back_to_id() {
        let resource = Resource {
            id: ResourceId::from("i-abc"),
            state: InstanceState::Running,
            tags: HashMap::new(),
        };
        assert_eq!(resource.display_name(), "i-abc");
    }
}
