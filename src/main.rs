use std::path::PathBuf;
use std::process::ExitCode;

use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use wharf_proxy::config::DEFAULT_CONFIG;
use wharf_proxy::{Proxy, ProxyConfig};

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config_path = std::env::args()
        .nth(1)
        .map_or_else(|| PathBuf::from("velocity.toml"), PathBuf::from);

    if !config_path.exists() {
        if let Err(e) = std::fs::write(&config_path, DEFAULT_CONFIG) {
            error!("could not write default configuration: {e}");
            return ExitCode::FAILURE;
        }
        info!("wrote default configuration to {}", config_path.display());
    }

    // A config that cannot be read or parsed is the one startup error
    // with its own exit code.
    let config = match ProxyConfig::load(&config_path) {
        Ok(config) => config,
        Err(e) => {
            error!("invalid configuration: {e:#}");
            return ExitCode::FAILURE;
        }
    };

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("failed to start runtime: {e}");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run(config_path, config)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("fatal: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(config_path: PathBuf, config: ProxyConfig) -> anyhow::Result<()> {
    let proxy = Proxy::bind(config_path, config, ()).await?;
    let shared = proxy.shared();

    let accept_loop = tokio::spawn(proxy.run());

    #[cfg(unix)]
    {
        let shared = shared.clone();
        tokio::spawn(async move {
            let Ok(mut hups) =
                tokio::signal::unix::signal(tokio::signal::unix::SignalKind::hangup())
            else {
                return;
            };

            while hups.recv().await.is_some() {
                if let Err(e) = shared.reload() {
                    tracing::warn!("reload failed, keeping previous configuration: {e:#}");
                }
            }
        });
    }

    tokio::signal::ctrl_c().await?;
    info!("shutting down");

    shared.shutdown().await;
    accept_loop.await??;

    Ok(())
}
