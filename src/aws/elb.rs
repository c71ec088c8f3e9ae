//! Classic Elastic Load Balancing implementation of the membership client.

use std::collections::HashMap;

use aws_sdk_elasticloadbalancing::Client;
use aws_sdk_elasticloadbalancing::types::Instance as ElbInstance;

use crate::resource::{
    ClientError, ClientFuture, MemberHealth, MembershipClient, ResourceId, TransitionOp,
};

use super::error::classify_sdk_error;

/// Load-balancer client backed by the classic ELB API.
#[derive(Clone, Debug)]
pub struct ElbClient {
    inner: Client,
}

impl ElbClient {
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

    /// Lists the names of every load balancer in the region.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError`] when the API call fails.
    pub async fn load_balancer_names(&self) -> Result<Vec<String>, ClientError> {
        let response = self
            .inner
            .describe_load_balancers()
            .send()
            .await
            .map_err(|err| classify_sdk_error("describe load balancers", err))?;
        Ok(response
            .load_balancer_descriptions()
            .iter()
            .filter_map(|description| description.load_balancer_name().map(str::to_owned))
            .collect())
    }

    /// Lists the member instance ids of a named load balancer.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Lookup`] when the balancer does not exist.
    pub async fn members(&self, name: &ResourceId) -> Result<Vec<ResourceId>, ClientError> {
        let response = self
            .inner
            .describe_load_balancers()
            .load_balancer_names(name.as_str())
            .send()
            .await
            .map_err(|err| classify_sdk_error("describe load balancer", err))?;

        let description = response
            .load_balancer_descriptions()
            .first()
            .ok_or_else(|| ClientError::Lookup(format!("load balancer {name} was not found")))?;
        Ok(description
            .instances()
            .iter()
            .filter_map(|instance| instance.instance_id().map(ResourceId::new))
            .collect())
    }

    /// Lists the balancers a given instance is registered with.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError`] when the API call fails.
    pub async fn registered_with(&self, instance: &ResourceId) -> Result<Vec<String>, ClientError> {
        let response = self
            .inner
            .describe_load_balancers()
            .send()
            .await
            .map_err(|err| classify_sdk_error("describe load balancers", err))?;

        Ok(response
            .load_balancer_descriptions()
            .iter()
            .filter(|description| {
                description
                    .instances()
                    .iter()
                    .any(|member| member.instance_id() == Some(instance.as_str()))
            })
            .filter_map(|description| description.load_balancer_name().map(str::to_owned))
            .collect())
    }
}

impl MembershipClient for ElbClient {
    type Error = ClientError;

    fn fetch_member_health<'a>(
        &'a self,
        composite: &'a ResourceId,
        members: Option<&'a [ResourceId]>,
    ) -> ClientFuture<'a, HashMap<ResourceId, MemberHealth>, ClientError> {
        Box::pin(async move {
            let filter = members.map(|ids| {
                ids.iter()
                    .map(|id| ElbInstance::builder().instance_id(id.as_str()).build())
                    .collect()
            });
            let response = self
                .inner
                .describe_instance_health()
                .load_balancer_name(composite.as_str())
                .set_instances(filter)
                .send()
                .await
                .map_err(|err| classify_sdk_error("describe instance health", err))?;

            let mut healths = HashMap::new();
            for state in response.instance_states() {
                let Some(id) = state.instance_id() else {
                    continue;
                };
                healths.insert(ResourceId::new(id), member_health(state.state()));
            }
            Ok(healths)
        })
    }

    fn member_transition<'a>(
        &'a self,
        composite: &'a ResourceId,
        member: &'a ResourceId,
        op: TransitionOp,
    ) -> ClientFuture<'a, (), ClientError> {
        Box::pin(async move {
            let instance = ElbInstance::builder().instance_id(member.as_str()).build();
            match op {
                TransitionOp::Register => self
                    .inner
                    .register_instances_with_load_balancer()
                    .load_balancer_name(composite.as_str())
                    .instances(instance)
                    .send()
                    .await
                    .map(|_| ())
                    .map_err(|err| classify_sdk_error("register instance", err)),
                TransitionOp::Deregister => self
                    .inner
                    .deregister_instances_from_load_balancer()
                    .load_balancer_name(composite.as_str())
                    .instances(instance)
                    .send()
                    .await
                    .map(|_| ())
                    .map_err(|err| classify_sdk_error("deregister instance", err)),
                other => Err(ClientError::Transition(format!(
                    "{other:?} is not a membership transition"
                ))),
            }
        })
    }
}

/// The classic ELB API reports health as a free-form string (`InService`,
/// `OutOfService`, `Unknown`); anything other than in-service is treated as
/// out of service.
fn member_health(state: Option<&str>) -> MemberHealth {
    if state == Some("InService") {
        MemberHealth::InService
    } else {
        MemberHealth::OutOfService
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use crate::resource::MemberHealth;

    use super::member_health;

    #[rstest]
    #[case(Some("InService"), MemberHealth::InService)]
    #[case(Some("OutOfService"), MemberHealth::OutOfService)]
    #[case(Some("Unknown"), MemberHealth::OutOfService)]
    #[case(None, MemberHealth::OutOfService)]
    fn health_strings_collapse_to_the_two_value_enum(
        #[case] raw: Option<&str>,
        #[case] expected: MemberHealth,
    ) {
        assert_eq!(member_health(raw), expected);
    }
}
