//! Cloud adapters for cloud-prepare.
//!
//! Each provider implements [`GatewayProvider`](cloud_prepare_gateway::GatewayProvider)
//! over a narrow client trait (`Ec2Api`, `ComputeApi`, `AzureNetworkApi`,
//! `OpenStackApi`). SDK bindings implement those traits; the adapters only
//! hold the reconciliation logic.

#![deny(missing_docs)]

pub mod aws;
pub mod azure;
pub mod gcp;
pub mod generic;
pub mod rhos;

pub use aws::{AwsCloud, AwsGatewayProvider, Ec2Api};
pub use azure::{AzureGatewayProvider, AzureNetworkApi};
pub use gcp::{ComputeApi, GcpGatewayProvider};
pub use generic::GenericGatewayProvider;
pub use rhos::{OpenStackApi, RhosGatewayProvider};

use cloud_prepare_common::{ApiError, Error};

/// Wrap a collaborator error with the provider, operation and resource it concerns
pub(crate) fn wrap(
    provider: &'static str,
    operation: &str,
    resource: &str,
) -> impl FnOnce(ApiError) -> Error {
    let operation = operation.to_string();
    let resource = resource.to_string();
    move |source| Error::provider(provider, operation, resource, source)
}
