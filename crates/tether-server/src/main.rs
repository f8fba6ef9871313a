mod config;
mod provision;

use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use provision::FileCredentialSource;
use tether_domain::{SessionRegistry, SessionRemoved};

#[tokio::main]
async fn main() {
    let config = match config::ServiceConfig::from_env() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    };

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.log_level)),
        )
        .init();

    info!("Starting tether-server");
    info!("Configuration: {:?}", config);

    let credentials = match FileCredentialSource::load(&config.devices_file) {
        Ok(source) => Arc::new(source),
        Err(e) => {
            error!(file = %config.devices_file, error = %e, "Failed to load devices file");
            std::process::exit(1);
        }
    };

    let (removal_tx, removal_rx) = mpsc::unbounded_channel();
    let registry = Arc::new(SessionRegistry::new(credentials, removal_tx));

    let dispatcher_config = config.dispatcher_config();
    info!(
        response_pool_size = dispatcher_config.response_pool_size,
        request_timeout_secs = dispatcher_config.default_timeout.as_secs(),
        "Downlink dispatcher configured"
    );

    let token = CancellationToken::new();
    let mut join_set = JoinSet::new();

    {
        let ctx = token.clone();
        join_set.spawn(async move { drain_removals(ctx, removal_rx).await });
    }
    {
        let ctx = token.clone();
        let registry = registry.clone();
        let interval = Duration::from_secs(config.report_interval_secs);
        join_set.spawn(async move { report_sessions(ctx, registry, interval).await });
    }

    {
        let signal_token = token.clone();
        tokio::spawn(async move {
            shutdown_signal().await;
            info!("Received shutdown signal");
            signal_token.cancel();
        });
    }

    let mut exit_code = 0;
    while let Some(result) = join_set.join_next().await {
        match result {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                if !token.is_cancelled() {
                    error!("Service task error: {:#}", e);
                    exit_code = 1;
                    token.cancel();
                }
            }
            Err(e) => {
                error!("Service task panicked: {}", e);
                exit_code = 1;
                token.cancel();
            }
        }
    }

    info!("tether-server stopped");
    std::process::exit(exit_code);
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = match signal(SignalKind::terminate()) {
            Ok(stream) => stream,
            Err(e) => {
                error!("Error setting up SIGTERM handler: {}", e);
                let _ = tokio::signal::ctrl_c().await;
                return;
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Error setting up signal handler: {}", e);
        }
    }
}

/// Drains session-removal events so the secure-channel layer can drop any
/// connection state it still holds for the departed credential identity.
async fn drain_removals(
    ctx: CancellationToken,
    mut removal_rx: mpsc::UnboundedReceiver<SessionRemoved>,
) -> Result<()> {
    loop {
        tokio::select! {
            _ = ctx.cancelled() => break,
            event = removal_rx.recv() => {
                match event {
                    Some(removed) => {
                        info!(
                            identity = %removed.identity,
                            endpoint = %removed.security.endpoint,
                            "Session removed, invalidating connection state"
                        );
                    }
                    None => {
                        warn!("Removal channel closed");
                        break;
                    }
                }
            }
        }
    }
    Ok(())
}

async fn report_sessions(
    ctx: CancellationToken,
    registry: Arc<SessionRegistry>,
    interval: Duration,
) -> Result<()> {
    loop {
        tokio::select! {
            _ = ctx.cancelled() => break,
            _ = tokio::time::sleep(interval) => {
                let active = registry.all_security_infos().await.len();
                info!(active_sessions = active, "Session report");
            }
        }
    }
    Ok(())
}
