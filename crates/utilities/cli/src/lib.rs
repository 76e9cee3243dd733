//! Utilities shared by marlin binaries: tracing and metrics bootstrap, common flags and the
//! runtime entrypoint.

#![cfg_attr(not(test), warn(unused_crate_dependencies))]
#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]

pub mod backtrace;

mod error;
pub use error::{CliError, CliResult, PrometheusError};

mod flags;
pub use flags::{LogArgs, MetricsArgs, NetworkArgs};

mod prometheus;
pub use prometheus::init_prometheus_server;

mod runtime;
pub use runtime::{run_until_ctrl_c, tokio_runtime};

mod log;
pub use log::init_tracing_subscriber;

mod styles;
pub use styles::cli_styles;
