//! Command line interface

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::{Args, Parser, Subcommand};
use tracing::{info, warn};

use cloud_prepare_common::telemetry::LogFormat;
use cloud_prepare_common::{
    CloudConfig, GatewayDeployRequest, PortSpec, ProviderConfig, TracingReporter,
    DEFAULT_NATT_PORT, DEFAULT_VXLAN_PORT,
};
use cloud_prepare_gateway::{CloudPorts, DeployOutcome, GatewayLifecycleManager, GatewayProvider};
use cloud_prepare_k8s::{create_client, KubeNodeClient};
use cloud_prepare_providers::GenericGatewayProvider;

/// cloud-prepare - prepare a cluster for cross-cluster networking
#[derive(Parser, Debug)]
#[command(name = "cloud-prepare", version, about, long_about = None)]
pub struct Cli {
    /// Path to the kubeconfig; inferred when unset
    #[arg(long, global = true)]
    pub kubeconfig: Option<PathBuf>,

    /// Log line format: text or json
    #[arg(long, global = true, default_value = "text")]
    pub log_format: LogFormat,

    /// Cluster configuration file, validated before the command runs
    ///
    /// The file is only checked: it must parse and name the generic provider.
    /// Cloud providers need an SDK client and are used as a library.
    #[arg(long, global = true, env = "CLOUD_PREPARE_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Commands {
    /// Open the internal ports between cluster nodes
    OpenPorts(PortArgs),
    /// Remove the rules added by open-ports
    ClosePorts,
    /// Make sure the requested number of gateways exists
    Deploy(DeployArgs),
    /// Remove gateways, their public rules and the internal rules
    Cleanup,
}

/// Ports to open between nodes
#[derive(Args, Debug, Clone, PartialEq, Eq)]
pub struct PortArgs {
    /// Ports like 4800/udp, comma separated or repeated
    #[arg(long = "port", value_delimiter = ',', default_values_t = [PortSpec::udp(DEFAULT_VXLAN_PORT)])]
    pub ports: Vec<PortSpec>,
}

/// Gateway deployment arguments
#[derive(Args, Debug, Clone, PartialEq, Eq)]
pub struct DeployArgs {
    /// Number of gateways the cluster should have
    #[arg(long, default_value_t = 1)]
    pub gateways: usize,

    /// Public ports to open on gateways
    #[arg(long = "public-port", value_delimiter = ',', default_values_t = [PortSpec::udp(DEFAULT_NATT_PORT)])]
    pub public_ports: Vec<PortSpec>,

    /// Create dedicated instances instead of labeling worker nodes
    #[arg(long)]
    pub dedicated: bool,

    /// Gateways must not get a public IP
    #[arg(long)]
    pub air_gapped: bool,
}

impl DeployArgs {
    /// The deploy request these arguments describe
    pub fn request(&self) -> GatewayDeployRequest {
        let mut request = GatewayDeployRequest::new(self.gateways)
            .with_public_ports(self.public_ports.iter().copied());
        if self.dedicated {
            request = request.dedicated();
        }
        if self.air_gapped {
            request = request.air_gapped();
        }
        request
    }
}

impl Cli {
    /// Run the command against the current cluster
    pub async fn run(self) -> anyhow::Result<()> {
        if let Some(path) = &self.config {
            let config = check_config(path)?;
            info!(infra_id = %config.infra_id, "Validated cluster configuration");
        }

        let client = create_client(self.kubeconfig.as_deref())
            .await
            .context("connecting to the cluster")?;
        let provider = GenericGatewayProvider::new(KubeNodeClient::new(client));
        let manager = GatewayLifecycleManager::new(provider, Arc::new(TracingReporter));
        execute(&self.command, &manager).await
    }
}

/// Load `path` and make sure it can be driven from the command line
pub fn check_config(path: &Path) -> anyhow::Result<CloudConfig> {
    let config = CloudConfig::load(path)?;
    if config.provider != ProviderConfig::Generic {
        bail!(
            "provider {} needs a cloud API client; use the cloud-prepare-providers library",
            config.provider.name()
        );
    }
    Ok(config)
}

/// Run one command through a lifecycle manager
pub async fn execute<P: GatewayProvider>(
    command: &Commands,
    manager: &GatewayLifecycleManager<P>,
) -> anyhow::Result<()> {
    match command {
        Commands::OpenPorts(args) => manager.open_ports(&args.ports).await?,
        Commands::ClosePorts => manager.close_ports().await?,
        Commands::Deploy(args) => match manager.deploy(&args.request()).await? {
            DeployOutcome::NoOp => info!("Gateways already in place"),
            DeployOutcome::ScaledUp { created } => {
                info!(created = created.len(), "Gateways deployed");
            }
            DeployOutcome::ScaleDownRejected { current, desired } => {
                warn!(current, desired, "Scale down is not supported, gateways were left in place");
            }
        },
        Commands::Cleanup => manager.cleanup().await?,
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use cloud_prepare_common::{NoopReporter, GATEWAY_LABEL, GATEWAY_LABEL_VALUE};
    use cloud_prepare_k8s::{MockNodeClient, NodeInfo};
    use mockall::predicate::eq;
    use rstest::rstest;
    use std::io::Write;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("cloud-prepare").chain(args.iter().copied())).unwrap()
    }

    fn manager(nodes: MockNodeClient) -> GatewayLifecycleManager<GenericGatewayProvider<MockNodeClient>> {
        GatewayLifecycleManager::new(GenericGatewayProvider::new(nodes), Arc::new(NoopReporter))
    }

    fn gateway(name: &str) -> NodeInfo {
        let mut node = NodeInfo {
            name: name.to_string(),
            ..Default::default()
        };
        node.labels
            .insert(GATEWAY_LABEL.to_string(), GATEWAY_LABEL_VALUE.to_string());
        node
    }

    #[test]
    fn test_cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[rstest]
    #[case(&["open-ports"], vec![PortSpec::udp(4800)])]
    #[case(&["open-ports", "--port", "4800/udp,8080/tcp"], vec![PortSpec::udp(4800), PortSpec::tcp(8080)])]
    #[case(&["open-ports", "--port", "4490/udp", "--port", "4500/udp"], vec![PortSpec::udp(4490), PortSpec::udp(4500)])]
    fn test_open_ports_parses_port_list(#[case] args: &[&str], #[case] expected: Vec<PortSpec>) {
        assert_eq!(parse(args).command, Commands::OpenPorts(PortArgs { ports: expected }));
    }

    #[test]
    fn test_bad_port_is_rejected() {
        assert!(Cli::try_parse_from(["cloud-prepare", "open-ports", "--port", "4800"]).is_err());
    }

    #[test]
    fn test_deploy_flags_build_request() {
        let cli = parse(&["deploy", "--gateways", "2", "--dedicated", "--air-gapped", "--log-format", "json"]);
        assert_eq!(cli.log_format, LogFormat::Json);
        let Commands::Deploy(args) = cli.command else {
            panic!("expected deploy");
        };
        let request = args.request();
        assert_eq!(request.desired_gateway_count, 2);
        assert!(request.use_dedicated_nodes);
        assert!(request.air_gapped);
        assert_eq!(request.public_ports, vec![PortSpec::udp(4500)]);
    }

    fn config_file(yaml: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(yaml.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_generic_config_passes_the_check() {
        let file = config_file("infraId: kind-1\n");
        let config = check_config(file.path()).unwrap();
        assert_eq!(config.infra_id, "kind-1");
    }

    #[rstest]
    #[case("infraId: abc\nregion: us-east-1\nprovider:\n  type: aws\n", "needs a cloud API client")]
    #[case("infraId: ''\n", "must not be empty")]
    fn test_config_check_rejects(#[case] yaml: &str, #[case] expected: &str) {
        let file = config_file(yaml);
        let err = check_config(file.path()).unwrap_err();
        assert!(err.to_string().contains(expected), "{err}");
    }

    #[tokio::test]
    async fn test_scale_down_leaves_gateways_and_succeeds() {
        let mut nodes = MockNodeClient::new();
        nodes
            .expect_list_gateway_nodes()
            .returning(|| Ok(vec![gateway("worker-0"), gateway("worker-1")]));
        nodes.expect_remove_gateway_label().never();

        let command = parse(&["deploy", "--gateways", "1"]).command;
        execute(&command, &manager(nodes)).await.unwrap();
    }

    #[tokio::test]
    async fn test_cleanup_unlabels_gateways() {
        let mut nodes = MockNodeClient::new();
        nodes
            .expect_list_gateway_nodes()
            .returning(|| Ok(vec![gateway("worker-0")]));
        nodes
            .expect_remove_gateway_label()
            .with(eq("worker-0"))
            .times(1)
            .returning(|_| Ok(()));
        nodes
            .expect_remove_gateway_label_from_all()
            .returning(|| Ok(0));

        execute(&Commands::Cleanup, &manager(nodes)).await.unwrap();
    }
}
