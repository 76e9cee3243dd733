//! Flags shared by every subcommand.

use crate::{CliResult, init_prometheus_server};
use clap::{ArgAction, Args};
use marlin_genesis::{ChainConfig, Network};
use std::{
    net::{IpAddr, Ipv4Addr},
    path::PathBuf,
};

/// Logging flags.
#[derive(Args, Debug, Clone, Default)]
pub struct LogArgs {
    /// Verbosity level: `-v` for debug, `-vv` for trace. `RUST_LOG` takes precedence.
    #[arg(short = 'v', long = "verbosity", action = ArgAction::Count, global = true)]
    pub v: u8,
}

/// Prometheus flags.
#[derive(Args, Debug, Clone)]
pub struct MetricsArgs {
    /// Serve metrics over HTTP.
    #[arg(long = "metrics.enabled", global = true, env = "MARLIN_METRICS_ENABLED")]
    pub enabled: bool,
    /// Port of the metrics server.
    #[arg(
        long = "metrics.port",
        global = true,
        default_value_t = 9090,
        env = "MARLIN_METRICS_PORT"
    )]
    pub port: u16,
    /// Address of the metrics server.
    #[arg(
        long = "metrics.addr",
        global = true,
        default_value_t = IpAddr::V4(Ipv4Addr::UNSPECIFIED),
        env = "MARLIN_METRICS_ADDR"
    )]
    pub addr: IpAddr,
}

impl Default for MetricsArgs {
    fn default() -> Self {
        Self { enabled: false, port: 9090, addr: IpAddr::V4(Ipv4Addr::UNSPECIFIED) }
    }
}

impl MetricsArgs {
    /// Starts the exporter if enabled.
    pub fn init_metrics(&self) -> CliResult<()> {
        if self.enabled {
            init_prometheus_server(self.addr, self.port)?;
        }
        Ok(())
    }
}

/// Network selection flags.
#[derive(Args, Debug, Clone, Default)]
pub struct NetworkArgs {
    /// Network name or chain id.
    #[arg(long, short = 'n', global = true, default_value = "mainnet", env = "MARLIN_NETWORK")]
    pub network: Network,
    /// JSON chain configuration that replaces the built-in registry entry.
    #[arg(long = "chain-config", global = true, env = "MARLIN_CHAIN_CONFIG")]
    pub chain_config: Option<PathBuf>,
}

impl NetworkArgs {
    /// Loads the chain configuration.
    pub fn config(&self) -> CliResult<ChainConfig> {
        Ok(ChainConfig::load(self.network, self.chain_config.as_deref())?)
    }
}
