//! EC2 implementation of the compute-instance control plane.

use std::collections::{HashMap, HashSet};

use aws_sdk_ec2::Client;
use aws_sdk_ec2::types::InstanceStateName;

use crate::resource::{
    ClientError, ClientFuture, InstanceState, Resource, ResourceClient, ResourceId, TransitionOp,
};

use super::error::classify_sdk_error;

/// Compute-instance client backed by the EC2 API.
#[derive(Clone, Debug)]
pub struct Ec2Client {
    inner: Client,
}

impl Ec2Client {
    /// Wraps an already-loaded SDK configuration.
    #[must_use]
    pub fn new(config: &aws_config::SdkConfig) -> Self {
        Self {
            inner: Client::new(config),
        }
    }

    /// Loads SDK configuration and constructs a client in one step.
    pub async fn connect(region: Option<String>) -> Self {
        Self::new(&super::sdk_config(region).await)
    }

    async fn describe(&self, ids: &[ResourceId]) -> Result<Vec<Resource<InstanceState>>, ClientError> {
        let response = self
            .inner
            .describe_instances()
            .set_instance_ids(Some(ids.iter().map(ResourceId::to_string).collect()))
            .send()
            .await
            .map_err(|err| classify_sdk_error("describe instances", err))?;

        let mut resources = Vec::new();
        for reservation in response.reservations() {
            for instance in reservation.instances() {
                let Some(id) = instance.instance_id() else {
                    continue;
                };
                let state = instance
                    .state()
                    .and_then(aws_sdk_ec2::types::InstanceState::name)
                    .and_then(instance_state)
                    .ok_or_else(|| {
                        ClientError::Provider(format!("instance {id} reported no usable state"))
                    })?;
                let tags = instance
                    .tags()
                    .iter()
                    .filter_map(|tag| {
                        Some((tag.key()?.to_owned(), tag.value().unwrap_or_default().to_owned()))
                    })
                    .collect();
                resources.push(Resource {
                    id: ResourceId::new(id),
                    state,
                    tags,
                });
            }
        }

        ensure_all_present(ids, resources.iter().map(|resource| &resource.id))?;
        Ok(resources)
    }
}

impl ResourceClient for Ec2Client {
    type State = InstanceState;
    type Error = ClientError;

    fn fetch_resources<'a>(
        &'a self,
        ids: &'a [ResourceId],
    ) -> ClientFuture<'a, Vec<Resource<InstanceState>>, ClientError> {
        Box::pin(async move {
            if ids.is_empty() {
                return Ok(Vec::new());
            }
            self.describe(ids).await
        })
    }

    fn fetch_states<'a>(
        &'a self,
        ids: &'a [ResourceId],
    ) -> ClientFuture<'a, HashMap<ResourceId, InstanceState>, ClientError> {
        Box::pin(async move {
            // An empty id filter means "every instance" to the API; the
            // contract here is an empty result with no network call.
            if ids.is_empty() {
                return Ok(HashMap::new());
            }

            let response = self
                .inner
                .describe_instance_status()
                .include_all_instances(true)
                .set_instance_ids(Some(ids.iter().map(ResourceId::to_string).collect()))
                .send()
                .await
                .map_err(|err| classify_sdk_error("describe instance status", err))?;

            let mut states = HashMap::new();
            for status in response.instance_statuses() {
                let Some(id) = status.instance_id() else {
                    continue;
                };
                if let Some(state) = status
                    .instance_state()
                    .and_then(aws_sdk_ec2::types::InstanceState::name)
                    .and_then(instance_state)
                {
                    states.insert(ResourceId::new(id), state);
                }
            }
            Ok(states)
        })
    }

    fn transition<'a>(
        &'a self,
        id: &'a ResourceId,
        op: TransitionOp,
    ) -> ClientFuture<'a, (), ClientError> {
        Box::pin(async move {
            match op {
                TransitionOp::Start => self
                    .inner
                    .start_instances()
                    .instance_ids(id.as_str())
                    .send()
                    .await
                    .map(|_| ())
                    .map_err(|err| classify_sdk_error("start instance", err)),
                TransitionOp::Stop => self
                    .inner
                    .stop_instances()
                    .instance_ids(id.as_str())
                    .send()
                    .await
                    .map(|_| ())
                    .map_err(|err| classify_sdk_error("stop instance", err)),
                TransitionOp::Reboot => self
                    .inner
                    .reboot_instances()
                    .instance_ids(id.as_str())
                    .send()
                    .await
                    .map(|_| ())
                    .map_err(|err| classify_sdk_error("reboot instance", err)),
                TransitionOp::Register | TransitionOp::Deregister => Err(ClientError::Transition(
                    format!("{op:?} is not a compute-instance transition"),
                )),
            }
        })
    }
}

fn instance_state(name: &InstanceStateName) -> Option<InstanceState> {
    match name {
        InstanceStateName::Pending => Some(InstanceState::Pending),
        InstanceStateName::Running => Some(InstanceState::Running),
        InstanceStateName::ShuttingDown => Some(InstanceState::ShuttingDown),
        InstanceStateName::Terminated => Some(InstanceState::Terminated),
        InstanceStateName::Stopping => Some(InstanceState::Stopping),
        InstanceStateName::Stopped => Some(InstanceState::Stopped),
        _ => None,
    }
}

fn ensure_all_present<'a>(
    requested: &[ResourceId],
    returned: impl Iterator<Item = &'a ResourceId>,
) -> Result<(), ClientError> {
    let seen: HashSet<&ResourceId> = returned.collect();
    let missing: Vec<&str> = requested
        .iter()
        .filter(|id| !seen.contains(id))
        .map(ResourceId::as_str)
        .collect();
    if missing.is_empty() {
        Ok(())
    } else {
        Err(ClientError::Lookup(format!(
            "instances not found: {}",
            missing.join(", ")
        )))
    }
}
