use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio::net::TcpListener;
use tracing::{info, warn, Level};
use tracing_subscriber::EnvFilter;

use aegis::config::load_config;
use aegis::metrics::serve_metrics;
use aegis::pidfile::PidFile;
use aegis::server::{Server, ServerContext};

#[derive(Debug, Parser)]
#[command(name = "aegis", version, about = "MySQL read/write splitting proxy")]
struct Args {
    /// Path to the TOML configuration file
    #[arg(long = "conf", default_value = "aegis.conf")]
    conf: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(Level::INFO.into())
                .from_env_lossy(),
        )
        .init();

    let args = Args::parse();
    let config = load_config(&args.conf)
        .with_context(|| format!("failed to load {}", args.conf.display()))?;
    info!(path = %args.conf.display(), "Loaded configuration");

    let mut pidfile = PidFile::create(&config.server.pidfile)?;

    let addr = config.server.addr.clone();
    let ctx = Arc::new(ServerContext::from_config(config)?);
    info!(
        master = %ctx.config.backend.addr,
        slaves = %ctx.config.backend.readers_display(),
        version = %ctx.version,
        commit = %ctx.commit_id,
        "Backends configured"
    );

    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to listen on {}", addr))?;

    let server = Server::new(ctx.clone());
    let shutdown = server.shutdown_token();

    if let Some(ref metrics_addr) = ctx.config.server.metrics_addr {
        let metrics_listener = TcpListener::bind(metrics_addr)
            .await
            .with_context(|| format!("failed to listen on {}", metrics_addr))?;
        tokio::spawn(serve_metrics(
            metrics_listener,
            ctx.metrics.clone(),
            shutdown.clone(),
        ));
    }
    tokio::spawn(async move {
        if let Err(e) = shutdown_signal().await {
            warn!(error = %e, "Failed to install signal handlers");
            return;
        }
        shutdown.cancel();
    });

    server.serve(listener).await;

    ctx.close().await;
    pidfile.remove();
    info!("Aegis stopped");
    Ok(())
}

/// Resolve on SIGINT, SIGTERM or SIGQUIT
#[cfg(unix)]
async fn shutdown_signal() -> std::io::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut term = signal(SignalKind::terminate())?;
    let mut quit = signal(SignalKind::quit())?;
    tokio::select! {
        r = tokio::signal::ctrl_c() => r?,
        _ = term.recv() => {}
        _ = quit.recv() => {}
    }
    info!("Received shutdown signal");
    Ok(())
}

#[cfg(not(unix))]
async fn shutdown_signal() -> std::io::Result<()> {
    tokio::signal::ctrl_c().await?;
    info!("Received shutdown signal");
    Ok(())
}
