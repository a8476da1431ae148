//! Network controller: interface state machines, persistence and failover

pub mod adapter;
pub mod addr;
pub mod error;
pub mod failover;
pub mod interface;
pub mod ipc;
pub mod manager;
pub mod state;
pub mod status;
pub mod store;

use crate::config::Config;
use adapter::nmcli::NmcliAdapter;
use adapter::runner::{CommandRunner, RemoteHost};
use anyhow::{Context, Result};
use failover::{FailoverMonitor, FailoverPolicy};
use interface::{Credentials, InterfaceContext};
use manager::InterfaceManager;
use state::ConnectivitySnapshot;
use status::StatusSink;
use std::sync::Arc;
use store::ConfigStore;
use tokio::net::UnixListener;
use tokio::signal;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

fn build_adapter(config: &Config) -> NmcliAdapter {
    let interfaces = &config.interfaces;
    let runner = if config.remote_host.enabled {
        let host = RemoteHost {
            hostname: config.remote_host.hostname.clone(),
            port: config.remote_host.port,
            ssh_key: config.remote_host.ssh_key.clone(),
        };
        tracing::info!(host = %host.hostname, port = host.port, "Running commands on remote host");
        CommandRunner::remote(host, interfaces.use_sudo, interfaces.command_timeout())
    } else {
        CommandRunner::local(interfaces.use_sudo, interfaces.command_timeout())
    };
    let ap_device = config.ap.use_dedicated_ap.then(|| config.ap.device.clone());
    NmcliAdapter::new(runner, config.global.dry_run, ap_device)
}

/// Run the daemon until SIGINT or a `Shutdown` request
pub async fn run_daemon(config: Config) -> Result<()> {
    tracing::info!(
        dry_run = config.global.dry_run,
        store = %config.global.store_path.display(),
        "Initializing network controller"
    );

    let adapter = Arc::new(build_adapter(&config));
    let sink = StatusSink::default();
    let status_log = tokio::spawn(status::log_status_events(sink.subscribe()));
    let cancel = CancellationToken::new();
    let (connectivity_tx, connectivity_rx) = watch::channel(ConnectivitySnapshot::default());

    let store = ConfigStore::open(&config.global.store_path).context("Failed to open configuration store")?;
    let ctx = InterfaceContext {
        retry_pause: config.interfaces.retry_pause(),
        connection_wait: config.interfaces.connection_wait(),
        cancel: cancel.clone(),
    };

    let manager = InterfaceManager::discover(adapter, &config, sink, ctx, store, connectivity_rx)
        .await
        .context("Failed to enumerate network devices")?;
    manager
        .initialise()
        .await
        .context("Failed to persist initial configuration")?;
    let manager = Arc::new(manager);

    let policy = FailoverPolicy {
        grace: config.interfaces.grace_period(),
        ap_always_on: config.interfaces.ap_always_on,
        rescue: Credentials::new(&config.ap.ssid, &config.ap.passphrase),
    };
    let monitor = FailoverMonitor::new(manager.clone(), policy, connectivity_tx);
    let failover_handle = tokio::spawn(monitor.run(config.interfaces.update_period(), cancel.clone()));

    let socket_path = &config.global.control_socket;
    let _ = std::fs::remove_file(socket_path);
    let listener = UnixListener::bind(socket_path)
        .with_context(|| format!("Failed to bind control socket {}", socket_path.display()))?;
    tracing::info!(path = %socket_path.display(), "IPC server listening");
    let ipc_handle = tokio::spawn(ipc::run_ipc_server(listener, manager.clone(), cancel.clone()));

    let web_handle = config.server.enabled.then(|| {
        let manager = manager.clone();
        let server = config.server.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if let Err(e) = crate::web::run_server(manager, &server, cancel.clone()).await {
                tracing::error!(error = %e, "HTTP API stopped");
                cancel.cancel();
            }
        })
    });

    tokio::select! {
        _ = signal::ctrl_c() => tracing::info!("Received SIGINT, shutting down"),
        _ = cancel.cancelled() => {}
    }
    cancel.cancel();

    tracing::info!("Cleaning up...");
    let _ = failover_handle.await;
    let _ = ipc_handle.await;
    if let Some(handle) = web_handle {
        let _ = handle.await;
    }
    drop(manager);
    status_log.abort();
    let _ = std::fs::remove_file(socket_path);

    Ok(())
}

/// Print current status (for CLI)
pub async fn print_status(socket_path: &str) -> Result<()> {
    match ipc::get_status(socket_path).await {
        Ok((status, connectivity)) => {
            println!("Network Status");
            println!("==============");
            println!("Connected: {}", connectivity.connected);
            if let Some(secs) = connectivity.disconnected_for_secs {
                println!("Disconnected for: {}s", secs);
            }
            if let Some(device) = &connectivity.ap_device {
                println!(
                    "Access point: {} ({})",
                    device,
                    if connectivity.ap_active { "active" } else { "inactive" }
                );
            }
            println!("Interfaces:");
            for (device, snapshot) in &status {
                println!(
                    "  - {} [{}] {}{}{}",
                    device,
                    snapshot.connection_type,
                    if snapshot.is_error { "ERROR: " } else { "" },
                    snapshot.message,
                    if snapshot.update_pending { " (update pending)" } else { "" }
                );
            }
        }
        Err(e) => {
            eprintln!("Failed to get status: {}", e);
            eprintln!("Is the daemon running?");
        }
    }
    Ok(())
}

/// Ask the daemon to re-apply every interface (for CLI)
pub async fn request_reload(socket_path: &str) -> Result<()> {
    let report = ipc::reload(socket_path).await?;
    for device in &report.applied {
        println!("{}: reloaded", device);
    }
    for (device, error) in &report.failed {
        println!("{}: {}", device, error);
    }
    if !report.is_ok() {
        anyhow::bail!("{} interface(s) failed to reload", report.failed.len());
    }
    Ok(())
}
