mod actions;
mod analytics_queue;
mod bootstrap;
mod driver;
mod health;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::Utc;
use leavewatch_core::config::{AppConfig, LoadOptions};
use leavewatch_slack::approval_dispatcher;
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

fn init_logging(config: &AppConfig) {
    use leavewatch_core::config::LogFormat::*;

    // RUST_LOG wins over the configured level when set.
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.logging.level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    match config.logging.format {
        Compact => {
            tracing_subscriber::fmt().with_target(false).with_env_filter(filter).compact().init();
        }
        Pretty => {
            tracing_subscriber::fmt().with_target(false).with_env_filter(filter).pretty().init();
        }
        Json => {
            tracing_subscriber::fmt().with_target(false).with_env_filter(filter).json().init();
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    run().await
}

pub async fn run() -> Result<()> {
    let config = AppConfig::load(LoadOptions::default())?;
    init_logging(&config);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let app = bootstrap::bootstrap_with_config(config, shutdown_rx.clone()).await?;

    let signing_secret = app.config.slack.signing_secret.clone();
    if signing_secret.is_none() {
        tracing::warn!(
            event_name = "system.server.no_signing_secret",
            correlation_id = "bootstrap",
            "slack.signing_secret unset; approval buttons will be refused"
        );
    }
    let dispatcher = Arc::new(approval_dispatcher(Arc::clone(&app.service)));
    let router = health::router(app.db_pool.clone()).merge(actions::router(
        actions::ActionsState::new(signing_secret, dispatcher, Arc::clone(&app.slack)),
    ));

    let address = format!("{}:{}", app.config.server.bind_address, app.config.server.health_check_port);
    let listener = tokio::net::TcpListener::bind(&address).await?;
    tracing::info!(
        event_name = "system.http.start",
        correlation_id = "bootstrap",
        bind_address = %address,
        "http endpoints started"
    );
    let mut http_shutdown = shutdown_rx.clone();
    let http = tokio::spawn(async move {
        let serve = axum::serve(listener, router).with_graceful_shutdown(async move {
            let _ = http_shutdown.wait_for(|stopping| *stopping).await;
        });
        if let Err(error) = serve.await {
            tracing::error!(
                event_name = "system.http.error",
                correlation_id = "bootstrap",
                error = %error,
                "http server terminated unexpectedly"
            );
        }
    });

    let poll = tokio::spawn(driver::run_poll_loop(
        Arc::clone(&app.service),
        Duration::from_secs(app.config.scheduler.poll_interval_secs.max(1)),
        Some(driver::initial_cursor(Utc::now())),
        shutdown_rx.clone(),
    ));
    let sweep = tokio::spawn(driver::run_sweep_loop(
        Arc::clone(&app.service),
        Duration::from_secs(app.config.scheduler.sweep_interval_secs.max(1)),
        shutdown_rx,
    ));

    tracing::info!(
        event_name = "system.server.started",
        correlation_id = "bootstrap",
        leave_channel_id = %app.config.slack.leave_channel_id,
        "leavewatch-server started"
    );
    tokio::signal::ctrl_c().await?;
    tracing::info!(
        event_name = "system.server.stopping",
        correlation_id = "shutdown",
        "leavewatch-server stopping"
    );

    let _ = shutdown_tx.send(true);
    let grace = Duration::from_secs(app.config.server.graceful_shutdown_secs);
    let analytics_writer = app.analytics_writer;
    let drained = tokio::time::timeout(grace, async move {
        let _ = tokio::join!(http, poll, sweep);
        if let Some(writer) = analytics_writer {
            let _ = writer.await;
        }
    })
    .await;
    if drained.is_err() {
        tracing::warn!(
            event_name = "system.server.shutdown_timeout",
            correlation_id = "shutdown",
            grace_secs = grace.as_secs(),
            "shutdown grace period elapsed with tasks still running"
        );
    }

    app.db_pool.close().await;
    Ok(())
}
