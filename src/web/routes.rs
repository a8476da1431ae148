//! API handlers

use crate::controller::adapter::CommandAdapter;
use crate::controller::error::InterfaceError;
use crate::controller::manager::InterfaceManager;
use crate::controller::state::{
    ApplyReport, ConfigDocument, ConnectivitySnapshot, InterfaceKind, InterfaceRecord, StatusSnapshot,
};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

type Shared<A> = State<Arc<InterfaceManager<A>>>;

#[derive(Debug, Serialize)]
pub struct ApiResponse {
    success: bool,
    message: String,
}

#[derive(Debug, Serialize)]
pub struct InterfaceEntry {
    device: String,
    #[serde(rename = "type")]
    kind: InterfaceKind,
}

#[derive(Debug, Serialize)]
pub struct ConfigChange {
    changed: bool,
}

/// Interface errors rendered as JSON with a matching status code
pub struct ApiError(InterfaceError);

impl From<InterfaceError> for ApiError {
    fn from(e: InterfaceError) -> Self {
        Self(e)
    }
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match &self.0 {
            InterfaceError::DeviceNotFound(_) | InterfaceError::UnknownParameter { .. } => StatusCode::NOT_FOUND,
            InterfaceError::NotWritable(_) => StatusCode::METHOD_NOT_ALLOWED,
            InterfaceError::InvalidConnectionType { .. }
            | InterfaceError::MissingCredentials(_)
            | InterfaceError::ConfigurationIncomplete { .. }
            | InterfaceError::KindMismatch { .. }
            | InterfaceError::InvalidValue { .. } => StatusCode::BAD_REQUEST,
            InterfaceError::ExternalCommand(_) | InterfaceError::Cancelled | InterfaceError::Persist(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self.0, "API request failed");
        }
        let body = ApiResponse {
            success: false,
            message: self.0.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

type ApiResult<T> = Result<Json<T>, ApiError>;

pub async fn api_status<A: CommandAdapter>(State(manager): Shared<A>) -> Json<BTreeMap<String, StatusSnapshot>> {
    Json(manager.get_status().await)
}

pub async fn api_connectivity<A: CommandAdapter>(State(manager): Shared<A>) -> Json<ConnectivitySnapshot> {
    Json(manager.connectivity())
}

pub async fn api_interfaces<A: CommandAdapter>(State(manager): Shared<A>) -> Json<Vec<InterfaceEntry>> {
    Json(
        manager
            .visible_devices()
            .into_iter()
            .map(|(device, kind)| InterfaceEntry { device, kind })
            .collect(),
    )
}

pub async fn get_config<A: CommandAdapter>(State(manager): Shared<A>) -> Json<ConfigDocument> {
    Json(manager.get_config().await)
}

pub async fn load_config<A: CommandAdapter>(
    State(manager): Shared<A>,
    Json(document): Json<ConfigDocument>,
) -> ApiResult<ApplyReport> {
    Ok(Json(manager.load_config(&document).await?))
}

pub async fn get_interface_config<A: CommandAdapter>(
    State(manager): Shared<A>,
    Path(device): Path<String>,
) -> ApiResult<InterfaceRecord> {
    Ok(Json(manager.get_interface_config(&device).await?))
}

pub async fn load_interface_config<A: CommandAdapter>(
    State(manager): Shared<A>,
    Path(device): Path<String>,
    Json(record): Json<InterfaceRecord>,
) -> ApiResult<ConfigChange> {
    let changed = manager.load_interface_config(&device, &record).await?;
    Ok(Json(ConfigChange { changed }))
}

pub async fn get_param<A: CommandAdapter>(
    State(manager): Shared<A>,
    Path((device, name)): Path<(String, String)>,
) -> ApiResult<Value> {
    Ok(Json(manager.get_param(&device, &name).await?))
}

pub async fn set_param<A: CommandAdapter>(
    State(manager): Shared<A>,
    Path((device, name)): Path<(String, String)>,
    Json(value): Json<Value>,
) -> ApiResult<ApiResponse> {
    manager.set_param(&device, &name, value).await?;
    Ok(Json(ApiResponse {
        success: true,
        message: format!("{} updated, applying on next refresh", name),
    }))
}

pub async fn api_parameters<A: CommandAdapter>(
    State(manager): Shared<A>,
    Path(device): Path<String>,
) -> ApiResult<Vec<&'static str>> {
    Ok(Json(manager.parameter_names(&device).await?))
}

pub async fn api_reload<A: CommandAdapter>(State(manager): Shared<A>) -> Json<ApplyReport> {
    Json(manager.reload_all().await)
}

pub async fn api_scan<A: CommandAdapter>(
    State(manager): Shared<A>,
    Path(device): Path<String>,
) -> ApiResult<BTreeSet<String>> {
    Ok(Json(manager.scan(&device).await?))
}
