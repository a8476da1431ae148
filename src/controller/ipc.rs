//! Control socket: line-delimited JSON over a Unix domain socket

use super::adapter::CommandAdapter;
use super::manager::InterfaceManager;
use super::state::{ApplyReport, ConnectivitySnapshot, StatusSnapshot};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio_util::sync::CancellationToken;

/// Request from a client
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum IpcRequest {
    GetStatus,
    GetConnectivity,
    Reload,
    Shutdown,
}

/// Response to a client
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum IpcResponse {
    Status(BTreeMap<String, StatusSnapshot>),
    Connectivity(ConnectivitySnapshot),
    Reloaded(ApplyReport),
    Ok,
    Error(String),
}

/// Serve clients until `shutdown` fires; a `Shutdown` request fires it
pub async fn run_ipc_server<A: CommandAdapter>(
    listener: UnixListener,
    manager: Arc<InterfaceManager<A>>,
    shutdown: CancellationToken,
) {
    loop {
        let accepted = tokio::select! {
            _ = shutdown.cancelled() => break,
            accepted = listener.accept() => accepted,
        };
        match accepted {
            Ok((stream, _)) => {
                let manager = manager.clone();
                let shutdown = shutdown.clone();
                tokio::spawn(async move {
                    if let Err(e) = handle_client(stream, manager, shutdown).await {
                        tracing::warn!(error = %e, "IPC client error");
                    }
                });
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to accept IPC connection");
            }
        }
    }
}

async fn handle_client<A: CommandAdapter>(
    stream: UnixStream,
    manager: Arc<InterfaceManager<A>>,
    shutdown: CancellationToken,
) -> Result<()> {
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);
    let mut line = String::new();

    loop {
        line.clear();
        if reader.read_line(&mut line).await? == 0 {
            break;
        }

        let response = match serde_json::from_str::<IpcRequest>(&line) {
            Ok(request) => dispatch(request, &manager, &shutdown).await,
            Err(e) => IpcResponse::Error(format!("Invalid request: {}", e)),
        };

        let json = serde_json::to_string(&response)? + "\n";
        writer.write_all(json.as_bytes()).await?;
    }

    Ok(())
}

async fn dispatch<A: CommandAdapter>(
    request: IpcRequest,
    manager: &InterfaceManager<A>,
    shutdown: &CancellationToken,
) -> IpcResponse {
    match request {
        IpcRequest::GetStatus => IpcResponse::Status(manager.get_status().await),
        IpcRequest::GetConnectivity => IpcResponse::Connectivity(manager.connectivity()),
        IpcRequest::Reload => {
            tracing::info!("Reload requested over control socket");
            IpcResponse::Reloaded(manager.reload_all().await)
        }
        IpcRequest::Shutdown => {
            tracing::info!("Shutdown requested over control socket");
            shutdown.cancel();
            IpcResponse::Ok
        }
    }
}

/// Send one request and read its response (client side)
pub async fn request(socket_path: &str, request: &IpcRequest) -> Result<IpcResponse> {
    let stream = UnixStream::connect(socket_path)
        .await
        .with_context(|| format!("Failed to connect to {}", socket_path))?;
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);

    let json = serde_json::to_string(request)? + "\n";
    writer.write_all(json.as_bytes()).await?;

    let mut line = String::new();
    reader.read_line(&mut line).await?;

    let response: IpcResponse = serde_json::from_str(&line).context("Malformed response from daemon")?;
    if let IpcResponse::Error(e) = response {
        anyhow::bail!("Daemon error: {}", e);
    }
    Ok(response)
}

pub async fn get_status(socket_path: &str) -> Result<(BTreeMap<String, StatusSnapshot>, ConnectivitySnapshot)> {
    let status = match request(socket_path, &IpcRequest::GetStatus).await? {
        IpcResponse::Status(status) => status,
        _ => anyhow::bail!("Unexpected response"),
    };
    let connectivity = match request(socket_path, &IpcRequest::GetConnectivity).await? {
        IpcResponse::Connectivity(connectivity) => connectivity,
        _ => anyhow::bail!("Unexpected response"),
    };
    Ok((status, connectivity))
}

pub async fn reload(socket_path: &str) -> Result<ApplyReport> {
    match request(socket_path, &IpcRequest::Reload).await? {
        IpcResponse::Reloaded(report) => Ok(report),
        _ => anyhow::bail!("Unexpected response"),
    }
}
