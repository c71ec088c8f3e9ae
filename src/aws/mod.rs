//! AWS implementations of the control-plane clients.
//!
//! `ec2` adapts the EC2 instance lifecycle API to [`crate::ResourceClient`],
//! `elb` adapts the classic Elastic Load Balancing API to
//! [`crate::MembershipClient`], and `identity` reads this host's identity
//! from the instance metadata service.

mod error;

pub mod ec2;
pub mod elb;
pub mod identity;

pub use ec2::Ec2Client;
pub use elb::ElbClient;
pub use identity::{IdentityDocument, IdentitySource};

use aws_config::{BehaviorVersion, Region, SdkConfig};

/// Region used when the caller gives none.
pub const DEFAULT_REGION: &str = "us-east-1";

/// Loads shared SDK configuration, optionally pinning a region.
pub async fn sdk_config(region: Option<String>) -> SdkConfig {
    let mut loader = aws_config::defaults(BehaviorVersion::latest());
    if let Some(name) = region {
        loader = loader.region(Region::new(name));
    }
    loader.load().await
}
