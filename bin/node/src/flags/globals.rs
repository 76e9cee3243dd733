//! Global arguments for the CLI.

use clap::Parser;
use marlin_cli::{LogArgs, MetricsArgs, NetworkArgs, init_tracing_subscriber};
use tracing_subscriber::EnvFilter;

/// Global arguments for the CLI.
#[derive(Parser, Default, Clone, Debug)]
pub struct GlobalArgs {
    /// Logging arguments.
    #[command(flatten)]
    pub log_args: LogArgs,
    /// Network selection.
    #[command(flatten)]
    pub network: NetworkArgs,
    /// Prometheus CLI arguments.
    #[command(flatten)]
    pub metrics: MetricsArgs,
}

impl GlobalArgs {
    /// Installs the tracing subscriber at the requested verbosity.
    pub fn init_tracing(&self, filter: Option<impl Into<EnvFilter>>) -> anyhow::Result<()> {
        init_tracing_subscriber(self.log_args.v, filter)?;
        Ok(())
    }

    /// Starts the Prometheus exporter and registers the node's metrics, if enabled.
    pub fn init_metrics(&self) -> anyhow::Result<()> {
        self.metrics.init_metrics()?;
        if self.metrics.enabled {
            marlin_import::Metrics::init();
            marlin_sync::Metrics::init();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use marlin_genesis::Network;

    #[test]
    fn test_defaults() {
        let args = GlobalArgs::try_parse_from(["marlin"]).unwrap();
        assert_eq!(args.network.network, Network::Mainnet);
        assert_eq!(args.log_args.v, 0);
        assert!(!args.metrics.enabled);
    }

    #[test]
    fn test_network_by_chain_id() {
        let args = GlobalArgs::try_parse_from(["marlin", "--network", "17000"]).unwrap();
        assert_eq!(args.network.network, Network::Holesky);
        assert_eq!(args.network.config().unwrap().chain_id, 17000);
    }

    #[test]
    fn test_metrics_flags() {
        let args =
            GlobalArgs::try_parse_from(["marlin", "--metrics.enabled", "--metrics.port", "9191"])
                .unwrap();
        assert!(args.metrics.enabled);
        assert_eq!(args.metrics.port, 9191);
    }
}
