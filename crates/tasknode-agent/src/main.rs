use clap::Parser;
use tasknode_agent::Agent;
use tasknode_core::TaskNodeConfig;
use tracing::info;

/// Used when `RUST_LOG` is unset: every workspace crate at info.
const DEFAULT_LOG_FILTER: &str = "tasknode=info,tasknode_agent=info,tasknode_rpc=info,\
tasknode_scheduler=info,tasknode_exec=info,tasknode_store=info,tasknode_cron=info,\
tasknode_core=info";

#[derive(Parser, Debug)]
#[command(name = "tasknode", version, about = "Job execution node agent")]
struct Cli {
    /// Path to the TOML config file.
    #[arg(short, long, env = "TASKNODE_CONFIG")]
    config: Option<String>,

    /// Validate the configuration, print it and exit.
    #[arg(long)]
    check: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| DEFAULT_LOG_FILTER.into()),
        )
        .init();

    let cli = Cli::parse();

    if cli.check {
        let config = TaskNodeConfig::load(cli.config.as_deref())?;
        config.validate()?;
        println!("{}", serde_json::to_string_pretty(&config)?);
        return Ok(());
    }

    let config = TaskNodeConfig::load(cli.config.as_deref()).unwrap_or_else(|e| {
        tracing::warn!("Config load failed ({}), using defaults", e);
        TaskNodeConfig::default()
    });
    config.validate()?;

    let agent = Agent::start(config).await?;
    info!(addr = %agent.local_addr(), "listening");

    wait_for_signal().await;
    info!("shutdown signal received");
    agent.shutdown().await;
    Ok(())
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut term = match signal(SignalKind::terminate()) {
        Ok(s) => s,
        Err(e) => {
            tracing::warn!(error = %e, "cannot listen for SIGTERM");
            let _ = tokio::signal::ctrl_c().await;
            return;
        }
    };
    let mut hup = signal(SignalKind::hangup()).ok();
    let mut quit = signal(SignalKind::quit()).ok();

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = term.recv() => {}
        Some(_) = recv_opt(&mut hup) => {}
        Some(_) = recv_opt(&mut quit) => {}
    }
}

#[cfg(unix)]
async fn recv_opt(sig: &mut Option<tokio::signal::unix::Signal>) -> Option<()> {
    match sig {
        Some(s) => s.recv().await,
        None => std::future::pending().await,
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    let _ = tokio::signal::ctrl_c().await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_subscriber::EnvFilter;

    #[test]
    fn default_filter_covers_every_crate() {
        for target in [
            "tasknode_agent",
            "tasknode_rpc",
            "tasknode_scheduler",
            "tasknode_exec",
            "tasknode_store",
            "tasknode_cron",
            "tasknode_core",
        ] {
            assert!(DEFAULT_LOG_FILTER.contains(&format!("{target}=info")), "{target}");
        }
        EnvFilter::try_new(DEFAULT_LOG_FILTER).unwrap();
    }
}
