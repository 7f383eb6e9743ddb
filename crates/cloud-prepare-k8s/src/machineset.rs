//! OpenShift `MachineSet` deployment.
//!
//! Dedicated gateways on OpenShift are machine sets rendered from the
//! per-cloud templates in `templates/` and applied with server-side apply,
//! so re-applying the same zone is a no-op.

use async_trait::async_trait;
use kube::api::{Api, DeleteParams, DynamicObject, ListParams, Patch, PatchParams};
use kube::discovery::ApiResource;
use kube::Client;
use minijinja::{Environment, UndefinedBehavior};
#[cfg(any(test, feature = "test-utils"))]
use mockall::automock;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info};

use cloud_prepare_common::{Error, Result, GATEWAY_NODE_TAG};

use crate::client::FIELD_MANAGER;

/// Namespace holding machine sets on OpenShift
pub const MACHINE_API_NAMESPACE: &str = "openshift-machine-api";

const MACHINE_SET_GROUP: &str = "machine.openshift.io";
const MACHINE_SET_VERSION: &str = "v1beta1";
const MACHINE_SET_KIND: &str = "MachineSet";

/// `ApiResource` for `machine.openshift.io/v1beta1` `MachineSet`
pub fn machine_set_resource() -> ApiResource {
    ApiResource {
        group: MACHINE_SET_GROUP.to_string(),
        version: MACHINE_SET_VERSION.to_string(),
        api_version: format!("{MACHINE_SET_GROUP}/{MACHINE_SET_VERSION}"),
        kind: MACHINE_SET_KIND.to_string(),
        plural: "machinesets".to_string(),
    }
}

// =============================================================================
// MachineSet value
// =============================================================================

/// A rendered machine set manifest
#[derive(Debug, Clone, PartialEq)]
pub struct MachineSet {
    /// `metadata.name`
    pub name: String,
    /// `metadata.namespace`
    pub namespace: String,
    /// Full manifest
    pub manifest: Value,
}

impl MachineSet {
    /// Parse a manifest, requiring name and namespace
    pub fn from_manifest(manifest: Value) -> Result<Self> {
        let meta = manifest.get("metadata");
        let field = |key: &str| {
            meta.and_then(|m| m.get(key))
                .and_then(Value::as_str)
                .map(str::to_string)
                .ok_or_else(|| {
                    Error::serialization_for_kind(MACHINE_SET_KIND, format!("missing metadata.{key}"))
                })
        };
        Ok(Self {
            name: field("name")?,
            namespace: field("namespace")?,
            manifest,
        })
    }

    /// Parse a YAML manifest
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let manifest: Value = serde_yaml::from_str(yaml)
            .map_err(|e| Error::serialization_for_kind(MACHINE_SET_KIND, e.to_string()))?;
        Self::from_manifest(manifest)
    }

    /// Image of the first disk (`spec.template.spec.providerSpec.value.disks[0].image`)
    pub fn disk_image(&self) -> Option<&str> {
        self.manifest
            .pointer("/spec/template/spec/providerSpec/value/disks/0/image")
            .and_then(Value::as_str)
    }
}

// =============================================================================
// Templates
// =============================================================================

/// Machine set template per cloud
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MachineSetTemplate {
    /// AWS gateway machine set
    Aws,
    /// GCP gateway machine set
    Gcp,
    /// Azure gateway machine set
    Azure,
}

impl MachineSetTemplate {
    fn name(&self) -> &'static str {
        match self {
            MachineSetTemplate::Aws => "aws-machineset.yaml",
            MachineSetTemplate::Gcp => "gcp-machineset.yaml",
            MachineSetTemplate::Azure => "azure-machineset.yaml",
        }
    }

    fn source(&self) -> &'static str {
        match self {
            MachineSetTemplate::Aws => include_str!("../templates/aws-machineset.yaml"),
            MachineSetTemplate::Gcp => include_str!("../templates/gcp-machineset.yaml"),
            MachineSetTemplate::Azure => include_str!("../templates/azure-machineset.yaml"),
        }
    }

    /// Render the template and parse the result
    pub fn render(&self, vars: &MachineSetVars) -> Result<MachineSet> {
        let yaml = render_template(self.name(), self.source(), vars)?;
        MachineSet::from_yaml(&yaml)
    }
}

/// Render `source` with undefined variables treated as errors
fn render_template<S: Serialize>(name: &str, source: &str, ctx: S) -> Result<String> {
    let mut env = Environment::new();
    env.set_undefined_behavior(UndefinedBehavior::Strict);
    env.add_template(name, source)
        .map_err(|e| Error::template(name, e.to_string()))?;
    env.get_template(name)
        .and_then(|t| t.render(ctx))
        .map_err(|e| Error::template(name, e.to_string()))
}

/// Variables available to machine set templates
#[derive(Debug, Clone, Default, Serialize)]
pub struct MachineSetVars {
    /// Machine set name
    pub name: String,
    /// Cluster infra ID
    pub infra_id: String,
    /// Region
    pub region: String,
    /// Zone (AWS availability zone, GCP zone, Azure zone number)
    pub zone: String,
    /// Instance type or VM size
    pub instance_type: String,
    /// AMI ID or disk image
    pub image: String,
    /// Security group attached to the instance
    pub security_group: Option<String>,
    /// Subnet name the instance is placed in
    pub subnet: Option<String>,
    /// GCP project
    pub project_id: Option<String>,
    /// Network tag marking gateway instances
    pub gateway_node_tag: String,
    /// Assign a public IP
    pub public_ip: bool,
}

impl MachineSetVars {
    /// Variables with the defaults shared by every template
    pub fn new(name: impl Into<String>, infra_id: impl Into<String>, region: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            infra_id: infra_id.into(),
            region: region.into(),
            gateway_node_tag: GATEWAY_NODE_TAG.to_string(),
            public_ip: true,
            ..Default::default()
        }
    }
}

// =============================================================================
// Deployer
// =============================================================================

/// Machine set operations needed by dedicated gateway providers
#[cfg_attr(any(test, feature = "test-utils"), automock)]
#[async_trait]
pub trait MachineSetDeployer: Send + Sync {
    /// Create or update a machine set
    async fn deploy(&self, machine_set: &MachineSet) -> Result<()>;

    /// Delete a machine set; an absent machine set is not an error
    async fn delete(&self, namespace: &str, name: &str) -> Result<()>;

    /// List machine sets whose name contains `name_contains`
    async fn list(&self, namespace: &str, name_contains: &str) -> Result<Vec<MachineSet>>;

    /// Disk image used by the cluster's worker machine sets
    async fn worker_image(&self, namespace: &str, infra_id: &str) -> Result<String>;
}

/// [`MachineSetDeployer`] backed by the Kubernetes API
pub struct KubeMachineSetDeployer {
    client: Client,
    resource: ApiResource,
}

impl KubeMachineSetDeployer {
    /// Create a deployer
    pub fn new(client: Client) -> Self {
        Self {
            client,
            resource: machine_set_resource(),
        }
    }

    fn api(&self, namespace: &str) -> Api<DynamicObject> {
        Api::namespaced_with(self.client.clone(), namespace, &self.resource)
    }
}

#[async_trait]
impl MachineSetDeployer for KubeMachineSetDeployer {
    async fn deploy(&self, machine_set: &MachineSet) -> Result<()> {
        let obj: DynamicObject = serde_json::from_value(machine_set.manifest.clone())?;
        self.api(&machine_set.namespace)
            .patch(
                &machine_set.name,
                &PatchParams::apply(FIELD_MANAGER).force(),
                &Patch::Apply(&obj),
            )
            .await?;
        info!(machine_set = %machine_set.name, "Applied machine set");
        Ok(())
    }

    async fn delete(&self, namespace: &str, name: &str) -> Result<()> {
        match self.api(namespace).delete(name, &DeleteParams::default()).await {
            Ok(_) => {
                info!(machine_set = %name, "Deleted machine set");
                Ok(())
            }
            Err(kube::Error::Api(ae)) if ae.code == 404 => {
                debug!(machine_set = %name, "Machine set already gone");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn list(&self, namespace: &str, name_contains: &str) -> Result<Vec<MachineSet>> {
        let list = self.api(namespace).list(&ListParams::default()).await?;
        list.items
            .into_iter()
            .filter(|ms| {
                ms.metadata
                    .name
                    .as_deref()
                    .is_some_and(|n| n.contains(name_contains))
            })
            .map(|ms| MachineSet::from_manifest(serde_json::to_value(ms)?))
            .collect()
    }

    async fn worker_image(&self, namespace: &str, infra_id: &str) -> Result<String> {
        let workers = self.list(namespace, &format!("{infra_id}-worker")).await?;
        workers
            .iter()
            .find_map(|ms| ms.disk_image().map(str::to_string))
            .ok_or_else(|| Error::not_found("worker machine set image", infra_id))
    }
}
