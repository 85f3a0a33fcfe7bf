//! `assetsync watch`: stream routed events as JSON lines.

use std::sync::Arc;
use std::time::Duration;

use assetsync_config::{Config, profile_to_sync_config, url_to_sync_config};
use assetsync_core::{
    ConnectionState, CoreError, DashboardSync, HandlerResult, MemoryQueryCache,
    PerformanceTelemetry, RoutedEvent, SyncConfig, TOPIC_CONNECTION, TOPIC_LATENCY,
};
use serde_json::{Value, json};
use tracing::{debug, info, warn};

use crate::cli::{GlobalOpts, WatchArgs};
use crate::error::CliError;

pub async fn handle(args: WatchArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let cfg = super::load_config(global)?;
    let sync_config = resolve_sync_config(&args, global, &cfg)?;
    debug!(config = ?sync_config, "Resolved sync config");

    let cache = Arc::new(MemoryQueryCache::new());
    let sync = DashboardSync::connect_ws(&sync_config, cache)?;

    let printers: Vec<_> = sync_config
        .channels
        .iter()
        .map(|channel| sync.subscribe(channel, print_event))
        .collect();
    let taps = [
        sync.router().subscribe(TOPIC_CONNECTION, log_connection),
        sync.router().subscribe(TOPIC_LATENCY, log_latency),
    ];

    let outcome = watch_until_done(&sync, Duration::from_secs(args.stats_interval)).await;

    let telemetry = Arc::clone(sync.telemetry());
    drop(printers);
    drop(taps);
    sync.shutdown().await;
    print_stats(&telemetry)?;
    outcome
}

/// Run until Ctrl-C or until the connection gives up.
async fn watch_until_done(sync: &DashboardSync, stats_every: Duration) -> Result<(), CliError> {
    let mut status = sync.connection().watch_status();
    status.mark_changed();

    let mut stats = tokio::time::interval_at(tokio::time::Instant::now() + stats_every, stats_every);
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            result = &mut ctrl_c => {
                result?;
                info!("Interrupted, disconnecting");
                return Ok(());
            }
            changed = status.changed() => {
                if changed.is_err() {
                    return Err(CoreError::ConnectionClosed.into());
                }
                let current = *status.borrow_and_update();
                if current.state == ConnectionState::Failed {
                    return Err(CliError::ReconnectExhausted {
                        attempts: current.attempt_count,
                    });
                }
            }
            _ = stats.tick() => print_stats(sync.telemetry())?,
        }
    }
}

/// Profile (or bare `--url`) plus flag overrides.
fn resolve_sync_config(
    args: &WatchArgs,
    global: &GlobalOpts,
    cfg: &Config,
) -> Result<SyncConfig, CliError> {
    let profile_name = cfg.active_profile_name(global.profile.as_deref());

    let mut sync_config = if let Some(profile) = cfg.profiles.get(&profile_name) {
        let mut profile = profile.clone();
        if let Some(url) = args.url.as_deref() {
            url.clone_into(&mut profile.url);
        }
        profile_to_sync_config(&profile, &cfg.defaults)?
    } else if let Some(url) = args.url.as_deref() {
        url_to_sync_config(url, &cfg.defaults)?
    } else if global.profile.is_some() {
        return Err(CliError::ProfileNotFound {
            name: profile_name,
            available: cfg.profile_names().join(", "),
        });
    } else {
        return Err(CliError::NoConfig {
            path: config_location(global),
        });
    };

    if !args.channels.is_empty() {
        sync_config.channels.clone_from(&args.channels);
    }
    if sync_config.channels.is_empty() {
        warn!("No channels configured; only connection events will be logged");
    }
    Ok(sync_config)
}

fn config_location(global: &GlobalOpts) -> String {
    global
        .config
        .clone()
        .unwrap_or_else(assetsync_config::config_path)
        .display()
        .to_string()
}

#[allow(clippy::unnecessary_wraps)]
fn print_event(event: &RoutedEvent) -> HandlerResult {
    println!("{}", json!({ "topic": event.topic, "data": event.data }));
    Ok(())
}

#[allow(clippy::unnecessary_wraps)]
fn log_connection(event: &RoutedEvent) -> HandlerResult {
    match event.data.get("status").and_then(Value::as_str) {
        Some("failed") => warn!(event = %event.data, "Connection failed"),
        Some("reconnecting") => warn!(event = %event.data, "Connection lost, reconnecting"),
        _ => info!(event = %event.data, "Connection status"),
    }
    Ok(())
}

#[allow(clippy::unnecessary_wraps)]
fn log_latency(event: &RoutedEvent) -> HandlerResult {
    debug!(latency_ms = %event.data["latencyMs"], "Heartbeat");
    Ok(())
}

fn print_stats(telemetry: &PerformanceTelemetry) -> Result<(), CliError> {
    let snapshot = serde_json::to_value(telemetry.snapshot())?;
    println!("{}", json!({ "telemetry": snapshot }));
    Ok(())
}
