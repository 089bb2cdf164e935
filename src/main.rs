#![allow(clippy::print_stdout)] // Console host reports to the terminal

use anyhow::Result;
use permission_monitor::capability::settings_url;
use permission_monitor::config::Config;
use permission_monitor::{
    telemetry, CapabilityState, DisplayHandle, LifecycleBridge, LifecycleEvent, PermissionMonitor,
    PollingController, ProbeSet, Snapshot, StartOutcome,
};
use tokio::sync::mpsc;

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::load()?;
    telemetry::init(&config.telemetry)?;
    tracing::info!("permission-monitor starting");

    let monitor = PermissionMonitor::spawn(ProbeSet::platform(&config), config.request.clone());
    let subscription = monitor.subscribe(|change| {
        let old = change
            .old
            .map_or_else(|| "unknown".to_owned(), |state| state.to_string());
        println!("  {}: {} -> {}", change.kind, old, change.new);
    })?;

    let snapshot = monitor.check_all().await?;
    print_snapshot(&snapshot);

    let polling = PollingController::new(monitor.clone());
    let console = DisplayHandle::next();
    for kind in snapshot.missing() {
        if polling.start_polling(kind, console, config.polling.interval())
            == StartOutcome::Started
        {
            println!("Watching {kind} every {:?}", config.polling.interval());
        }
    }

    let (lifecycle_tx, lifecycle_rx) = mpsc::channel(8);
    let bridge = LifecycleBridge::new(monitor.clone(), config.lifecycle.recheck_delay());
    let bridge_task = bridge.spawn(lifecycle_rx);
    lifecycle_tx.send(LifecycleEvent::ForegroundEntered).await?;

    println!("\nMonitoring permissions. Press Ctrl+C to exit.\n");
    tokio::signal::ctrl_c().await?;
    tracing::info!("shutdown signal received");

    lifecycle_tx.send(LifecycleEvent::ForegroundExited).await?;
    drop(lifecycle_tx);
    let _ = bridge_task.await;

    polling.stop_polling(console);
    monitor.unsubscribe(subscription);
    monitor.shutdown();

    print_snapshot(&monitor.snapshot());
    Ok(())
}

fn print_snapshot(snapshot: &Snapshot) {
    println!("Permissions:");
    for (kind, state) in snapshot.iter() {
        let marker = match state {
            CapabilityState::Granted => "✓",
            CapabilityState::NotGranted => "✗",
            CapabilityState::Undetermined => "?",
        };
        match (state, settings_url(kind)) {
            (CapabilityState::Granted, _) | (_, None) => println!("  {marker} {kind}: {state}"),
            (_, Some(url)) => println!("  {marker} {kind}: {state} ({url})"),
        }
    }
}
