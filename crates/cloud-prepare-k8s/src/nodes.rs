//! Node listing and gateway labeling.
//!
//! Label changes are read-modify-write `replace` calls. A concurrent update
//! makes the API server answer 409, in which case the node is re-read and the
//! change applied again under [`RetryPolicy::on_conflict`].

use std::collections::BTreeMap;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Node;
use kube::api::{Api, ListParams, PostParams};
use kube::Client;
#[cfg(any(test, feature = "test-utils"))]
use mockall::automock;
use tracing::{debug, info};

use cloud_prepare_common::retry::{retry_with_backoff, RetryPolicy};
use cloud_prepare_common::{
    Result, GATEWAY_LABEL, GATEWAY_LABEL_SELECTOR, GATEWAY_LABEL_VALUE, ZONE_LABEL,
};

/// Label selector matching nodes without the gateway label
pub const NON_GATEWAY_SELECTOR: &str = "!submariner.io/gateway";

/// Label selector matching worker nodes
pub const WORKER_SELECTOR: &str = "node-role.kubernetes.io/worker";

/// Label selector matching worker nodes that are not gateways yet
pub const NON_GATEWAY_WORKER_SELECTOR: &str = "node-role.kubernetes.io/worker,!submariner.io/gateway";

const CONTROL_PLANE_TAINTS: &[&str] = &[
    "node-role.kubernetes.io/master",
    "node-role.kubernetes.io/control-plane",
];

/// The parts of a Node the gateway logic looks at
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct NodeInfo {
    /// Node name
    pub name: String,
    /// Node labels
    pub labels: BTreeMap<String, String>,
    /// Value of `topology.kubernetes.io/zone`
    pub zone: Option<String>,
    /// True when the node carries a NoSchedule control-plane taint
    pub control_plane: bool,
}

impl NodeInfo {
    /// Extract node info from a Kubernetes Node
    pub fn from_node(node: &Node) -> Self {
        let labels = node.metadata.labels.clone().unwrap_or_default();
        let control_plane = node
            .spec
            .as_ref()
            .and_then(|s| s.taints.as_ref())
            .map(|taints| {
                taints
                    .iter()
                    .any(|t| t.effect == "NoSchedule" && CONTROL_PLANE_TAINTS.contains(&t.key.as_str()))
            })
            .unwrap_or(false);

        Self {
            name: node.metadata.name.clone().unwrap_or_default(),
            zone: labels.get(ZONE_LABEL).cloned(),
            labels,
            control_plane,
        }
    }

    /// True when the node carries `submariner.io/gateway=true`
    pub fn is_gateway(&self) -> bool {
        self.labels.get(GATEWAY_LABEL).map(String::as_str) == Some(GATEWAY_LABEL_VALUE)
    }
}

/// Node operations needed by gateway providers
#[cfg_attr(any(test, feature = "test-utils"), automock)]
#[async_trait]
pub trait NodeClient: Send + Sync {
    /// List nodes matching a label selector
    async fn list_nodes(&self, label_selector: &str) -> Result<Vec<NodeInfo>>;

    /// List nodes carrying `submariner.io/gateway=true`
    async fn list_gateway_nodes(&self) -> Result<Vec<NodeInfo>>;

    /// Set the gateway label on a node
    async fn add_gateway_label(&self, node: &str) -> Result<()>;

    /// Remove the gateway label from a node
    async fn remove_gateway_label(&self, node: &str) -> Result<()>;

    /// Remove the gateway label from every node that has it, returning how many were changed
    async fn remove_gateway_label_from_all(&self) -> Result<usize>;
}

/// [`NodeClient`] backed by the Kubernetes API
pub struct KubeNodeClient {
    api: Api<Node>,
    retry: RetryPolicy,
}

impl KubeNodeClient {
    /// Create a node client
    pub fn new(client: Client) -> Self {
        Self {
            api: Api::all(client),
            retry: RetryPolicy::on_conflict(),
        }
    }

    async fn update_labels<F>(&self, name: &str, mutate: F) -> Result<()>
    where
        F: Fn(&mut BTreeMap<String, String>) + Send + Sync,
    {
        let operation = format!("update labels of node {name}");
        let api = &self.api;
        let mutate = &mutate;
        retry_with_backoff(&self.retry, &operation, || async move {
            let mut node = api.get(name).await?;
            mutate(node.metadata.labels.get_or_insert_with(BTreeMap::new));
            api.replace(name, &PostParams::default(), &node).await?;
            Ok(())
        })
        .await
    }
}

#[async_trait]
impl NodeClient for KubeNodeClient {
    async fn list_nodes(&self, label_selector: &str) -> Result<Vec<NodeInfo>> {
        let nodes = self
            .api
            .list(&ListParams::default().labels(label_selector))
            .await?;
        Ok(nodes.items.iter().map(NodeInfo::from_node).collect())
    }

    async fn list_gateway_nodes(&self) -> Result<Vec<NodeInfo>> {
        self.list_nodes(GATEWAY_LABEL_SELECTOR).await
    }

    async fn add_gateway_label(&self, node: &str) -> Result<()> {
        self.update_labels(node, |labels| {
            labels.insert(GATEWAY_LABEL.to_string(), GATEWAY_LABEL_VALUE.to_string());
        })
        .await?;
        info!(node = %node, "Labeled node as gateway");
        Ok(())
    }

    async fn remove_gateway_label(&self, node: &str) -> Result<()> {
        self.update_labels(node, |labels| {
            labels.remove(GATEWAY_LABEL);
        })
        .await?;
        info!(node = %node, "Removed gateway label from node");
        Ok(())
    }

    async fn remove_gateway_label_from_all(&self) -> Result<usize> {
        let nodes = self.list_nodes(GATEWAY_LABEL).await?;
        for node in &nodes {
            match self.remove_gateway_label(&node.name).await {
                Ok(()) => {}
                Err(e) if e.is_not_found() => {
                    debug!(node = %node.name, "Node disappeared before its label was removed");
                }
                Err(e) => return Err(e),
            }
        }
        Ok(nodes.len())
    }
}

/// Keep only nodes that may become gateways: not control plane, not already labeled
pub fn gateway_candidates(nodes: Vec<NodeInfo>) -> Vec<NodeInfo> {
    nodes
        .into_iter()
        .filter(|n| !n.control_plane && !n.is_gateway())
        .collect()
}
