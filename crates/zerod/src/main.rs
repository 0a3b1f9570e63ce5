//! zerod — the zeroscale agent daemon.
//!
//! One process per node. The manager node executes scale decisions; worker
//! nodes forward intents to it over the control plane. All behavior is
//! driven by a single YAML config file:
//!
//! ```text
//! zerod -config /etc/zeroscale/config.yml
//! ```
//!
//! Exits 0 on clean shutdown and 1 on any fatal initialization error.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::info;

use zeroscale_cluster::resolve_node_info;
use zeroscale_monitor::CgroupReader;
use zeroscale_runtime::{ContainerRuntime, DockerRuntime};

use zerod::agent;
use zerod::config::Config;

#[derive(Parser)]
#[command(name = "zerod", about = "zeroscale agent")]
struct Cli {
    /// Path to the configuration file.
    #[arg(long, short)]
    config: PathBuf,
}

/// The documented invocation is `zerod -config <path>`. Clap reads a
/// single-dash `-config` as bundled short flags, so normalize that one
/// spelling to `--config` before parsing; `--config` and `-c` stay valid.
fn normalize_config_flag(arg: String) -> String {
    if arg == "-config" {
        "--config".to_string()
    } else {
        arg
    }
}

fn cli_args() -> impl Iterator<Item = String> {
    std::env::args().map(normalize_config_flag)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,zerod=debug,zeroscale=debug".parse().unwrap()),
        )
        .init();

    let cli = Cli::parse_from(cli_args());
    let config = Config::load(&cli.config)?;

    let node = Arc::new(resolve_node_info(
        &config.managers,
        &config.workers,
        config.keep_alive,
    )?);
    let runtime: Arc<dyn ContainerRuntime> = Arc::new(DockerRuntime::connect()?);

    let cancel = CancellationToken::new();
    let root = cancel.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install CTRL+C handler");
        info!("shutdown signal received");
        root.cancel();
    });

    agent::run(config, node, runtime, CgroupReader::default(), cancel).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_dash_config_parses() {
        let args = ["zerod", "-config", "/etc/zeroscale/config.yml"]
            .iter()
            .map(|a| normalize_config_flag(a.to_string()));
        let cli = Cli::parse_from(args);
        assert_eq!(cli.config, PathBuf::from("/etc/zeroscale/config.yml"));
    }

    #[test]
    fn long_and_short_forms_still_parse() {
        let cli = Cli::parse_from(["zerod", "--config", "a.yml"]);
        assert_eq!(cli.config, PathBuf::from("a.yml"));

        let cli = Cli::parse_from(["zerod", "-c", "b.yml"]);
        assert_eq!(cli.config, PathBuf::from("b.yml"));
    }

    #[test]
    fn other_arguments_pass_through_untouched() {
        assert_eq!(normalize_config_flag("--config".to_string()), "--config");
        assert_eq!(normalize_config_flag("-c".to_string()), "-c");
        assert_eq!(
            normalize_config_flag("/path/-config".to_string()),
            "/path/-config"
        );
    }
}
