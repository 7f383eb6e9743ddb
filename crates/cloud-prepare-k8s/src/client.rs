//! Kubernetes client construction

use std::path::Path;
use std::time::Duration;

use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, Config};

use cloud_prepare_common::{Error, Result};

/// Default connection timeout for kube clients
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
/// Default read timeout for kube clients
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(30);

/// Field manager used for server-side apply
pub const FIELD_MANAGER: &str = "cloud-prepare";

/// Create a kube client from an optional kubeconfig path.
///
/// Without a path the config is inferred (in-cluster, then `KUBECONFIG`,
/// then `~/.kube/config`).
pub async fn create_client(kubeconfig: Option<&Path>) -> Result<Client> {
    let mut config = match kubeconfig {
        Some(path) => {
            let kubeconfig = Kubeconfig::read_from(path)
                .map_err(|e| Error::config(format!("failed to read kubeconfig: {e}")))?;
            Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
                .await
                .map_err(|e| Error::config(format!("failed to load kubeconfig: {e}")))?
        }
        None => Config::infer()
            .await
            .map_err(|e| Error::config(format!("failed to infer kube config: {e}")))?,
    };
    config.connect_timeout = Some(DEFAULT_CONNECT_TIMEOUT);
    config.read_timeout = Some(DEFAULT_READ_TIMEOUT);

    Client::try_from(config).map_err(|e| Error::config(format!("failed to create client: {e}")))
}
