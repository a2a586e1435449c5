//! secure-net host binary.
//!
//! Runs an echo server on the configured TCP (optionally TLS) listener, with
//! a per-client-IP connection cap on top of the server-wide limit, plus
//! optional `/health` endpoints over HTTP and a Unix domain socket and an
//! optional TCP readiness endpoint. Every
//! server runs under a guard that re-runs it with backoff after a fatal error
//! until a stop signal arrives.
//!
//! ```text
//! secure-net --config secure-net.toml
//! ```

use std::net::IpAddr;
use std::path::PathBuf;
use std::sync::Arc;

use axum::routing::get;
use axum::Router;
use clap::Parser;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::task::JoinSet;

use secure_net::config::{self, AppConfig};
use secure_net::http::{HttpOptions, HttpServer, UdsOptions, UdsServer};
use secure_net::lifecycle::{signals, Shutdown};
use secure_net::net::BoxStream;
use secure_net::observability::{logging, metrics};
use secure_net::resilience::{with_guard, GuardConfig};
use secure_net::sync::KeyedSemaphore;
use secure_net::tcp::{ConnContext, ReadinessOptions, ReadinessServer, ServerOptions, TcpServer};

#[derive(Parser)]
#[command(name = "secure-net")]
#[command(about = "Echo server demonstrating the secure-net server framework", long_about = None)]
struct Cli {
    /// Path to a TOML configuration file. Defaults apply when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => config::load_config(path)?,
        None => AppConfig::default(),
    };

    logging::init_logging(&config.observability)?;
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "secure-net starting");

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => {
                if let Err(e) = metrics::init_metrics(addr) {
                    tracing::error!(error = %e, "Failed to install metrics exporter");
                }
            }
            Err(e) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                error = %e,
                "Failed to parse metrics address"
            ),
        }
    }

    let shutdown = Arc::new(Shutdown::new());
    signals::spawn_signal_handler(Arc::clone(&shutdown));

    let mut servers = JoinSet::new();

    let per_client = (config.tcp.per_client_limit > 0).then(|| {
        Arc::new(KeyedSemaphore::new(
            config.tcp.per_client_limit,
            config.tcp.per_client_size_hint,
        ))
    });
    let tcp = TcpServer::new(
        ServerOptions::from_config(&config.tcp)?,
        move |ctx: ConnContext, conn: BoxStream| echo(ctx, conn, per_client.clone()),
    );
    servers.spawn(with_guard(
        shutdown.subscribe(),
        guard_config(&config, &config.tcp.tag),
        move |signal| {
            let tcp = tcp.clone();
            async move { tcp.serve(signal).await }
        },
    ));

    if let Some(http_config) = &config.http {
        let http = HttpServer::new(HttpOptions::from_config(http_config)?, status_router());
        servers.spawn(with_guard(
            shutdown.subscribe(),
            guard_config(&config, &http_config.tag),
            move |signal| {
                let http = http.clone();
                async move { http.serve(signal).await }
            },
        ));
    }

    if let Some(uds_config) = &config.uds {
        let uds = UdsServer::new(UdsOptions::from_config(uds_config), status_router());
        servers.spawn(with_guard(
            shutdown.subscribe(),
            guard_config(&config, &uds_config.tag),
            move |signal| {
                let uds = uds.clone();
                async move { uds.serve(signal).await }
            },
        ));
    }

    if let Some(readiness_config) = &config.readiness {
        let readiness = ReadinessServer::new(ReadinessOptions::from_config(readiness_config));
        servers.spawn(with_guard(
            shutdown.subscribe(),
            guard_config(&config, &readiness_config.tag),
            move |signal| {
                let readiness = readiness.clone();
                async move { readiness.serve(signal).await }
            },
        ));
    }

    while let Some(res) = servers.join_next().await {
        if let Err(e) = res {
            tracing::error!(error = %e, "Server task panicked");
        }
    }

    tracing::info!("Shutdown complete");
    Ok(())
}

fn guard_config(config: &AppConfig, tag: &str) -> GuardConfig {
    GuardConfig {
        tag: tag.to_string(),
        backoff: config.retry.clone(),
        retry_on_success: false,
    }
}

fn status_router() -> Router {
    Router::new().route("/health", get(|| async { "ok" }))
}

/// Echo every byte back until the client closes or the server shuts down.
async fn echo(
    ctx: ConnContext,
    mut conn: BoxStream,
    per_client: Option<Arc<KeyedSemaphore<IpAddr>>>,
) -> std::io::Result<()> {
    let _permit = match per_client {
        Some(sems) => match sems.get(&ctx.peer_addr().ip()).acquire_owned(ctx.shutdown()).await {
            Ok(permit) => Some(permit),
            Err(_) => return Ok(()),
        },
        None => None,
    };

    if let Some(peer) = ctx.tls_peer() {
        tracing::info!(tls_peer = %peer, "Client authenticated");
    }

    let mut buf = vec![0u8; 4096];
    loop {
        let n = tokio::select! {
            n = conn.read(&mut buf) => n?,
            _ = ctx.cancelled() => return Ok(()),
        };
        if n == 0 {
            return Ok(());
        }
        conn.write_all(&buf[..n]).await?;
    }
}
