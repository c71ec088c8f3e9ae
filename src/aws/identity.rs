//! Host identity from the EC2 instance metadata service.
//!
//! Used when no explicit instance id is given: `whoami`, `elb-joined`, and
//! the defaulted targets of `elb-add`/`elb-remove`. Lookups use a fixed
//! retry budget (3 attempts, 3s timeouts); callers do not retry further.

use std::time::Duration;

use aws_config::imds;
use serde::Deserialize;

use crate::resource::{ClientError, ResourceId};

const IMDS_MAX_ATTEMPTS: u32 = 3;
const IMDS_TIMEOUT: Duration = Duration::from_secs(3);

const INSTANCE_ID_PATH: &str = "/latest/meta-data/instance-id";
const IDENTITY_DOCUMENT_PATH: &str = "/latest/dynamic/instance-identity/document";

/// The subset of the instance identity document the tools consume.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct IdentityDocument {
    /// This host's instance id.
    pub instance_id: String,
    /// Region the host runs in.
    pub region: String,
}

/// Reads identity facts from the instance metadata service.
#[derive(Clone, Debug)]
pub struct IdentitySource {
    client: imds::Client,
}

impl IdentitySource {
    /// Builds a source with the fixed retry budget.
    #[must_use]
    pub fn new() -> Self {
        let client = imds::Client::builder()
            .max_attempts(IMDS_MAX_ATTEMPTS)
            .connect_timeout(IMDS_TIMEOUT)
            .read_timeout(IMDS_TIMEOUT)
            .build();
        Self { client }
    }

    /// Returns this host's instance id.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Connectivity`] when the metadata service does
    /// not answer; off-EC2 hosts have no identity to report.
    pub async fn instance_id(&self) -> Result<ResourceId, ClientError> {
        let value = self.fetch(INSTANCE_ID_PATH).await?;
        Ok(ResourceId::new(value.trim()))
    }

    /// Returns the parsed identity document (instance id and region).
    ///
    /// # Errors
    ///
    /// Returns [`ClientError`] when the metadata service does not answer or
    /// the document is malformed.
    pub async fn identity_document(&self) -> Result<IdentityDocument, ClientError> {
        let raw = self.raw_identity_document().await?;
        parse_identity_document(&raw)
    }

    /// Returns the identity document exactly as the service serves it.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Connectivity`] when the metadata service does
    /// not answer.
    pub async fn raw_identity_document(&self) -> Result<String, ClientError> {
        self.fetch(IDENTITY_DOCUMENT_PATH).await
    }

    async fn fetch(&self, path: &str) -> Result<String, ClientError> {
        let value = self.client.get(path).await.map_err(|err| {
            ClientError::Connectivity(format!("instance metadata service: {err}"))
        })?;
        Ok(AsRef::<str>::as_ref(&value).to_owned())
    }
}

impl Default for IdentitySource {
    fn default() -> Self {
        Self::new()
    }
}

pub(crate) fn parse_identity_document(raw: &str) -> Result<IdentityDocument, ClientError> {
    serde_json::from_str(raw)
        .map_err(|err| ClientError::Provider(format!("malformed identity document: {err}")))
}
