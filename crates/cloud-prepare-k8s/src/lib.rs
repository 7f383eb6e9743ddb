//! Kubernetes collaborators for cloud-prepare: node labeling and machine sets

pub mod client;
pub mod machineset;
pub mod nodes;

pub use client::create_client;
pub use machineset::{
    KubeMachineSetDeployer, MachineSet, MachineSetDeployer, MachineSetTemplate, MachineSetVars,
    MACHINE_API_NAMESPACE,
};
pub use nodes::{gateway_candidates, KubeNodeClient, NodeClient, NodeInfo};

#[cfg(any(test, feature = "test-utils"))]
pub use machineset::MockMachineSetDeployer;
#[cfg(any(test, feature = "test-utils"))]
pub use nodes::MockNodeClient;
