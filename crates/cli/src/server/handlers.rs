use std::net::SocketAddr;

use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{ConnectInfo, Path, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Json, Response};
use srd_protocol::{DeviceEntry, DeviceTarget, ErrorBody, ParseTargetIdError, SessionInfo, TargetId};
use tracing::{debug, info, warn};

use super::{AppState, bridge};

/// Error response for the JSON and WebSocket endpoints.
#[derive(Debug)]
pub enum ApiError {
	Relay(srd_runtime::Error),
	BadTarget(ParseTargetIdError),
}

impl From<srd_runtime::Error> for ApiError {
	fn from(err: srd_runtime::Error) -> Self {
		ApiError::Relay(err)
	}
}

impl ApiError {
	fn status(&self) -> StatusCode {
		match self {
			ApiError::BadTarget(_) => StatusCode::BAD_REQUEST,
			ApiError::Relay(srd_runtime::Error::TargetNotFound(_)) => StatusCode::NOT_FOUND,
			ApiError::Relay(srd_runtime::Error::UpstreamUnavailable { .. }) => StatusCode::SERVICE_UNAVAILABLE,
			ApiError::Relay(_) => StatusCode::INTERNAL_SERVER_ERROR,
		}
	}

	fn message(&self) -> String {
		match self {
			ApiError::Relay(err) => err.to_string(),
			ApiError::BadTarget(err) => err.to_string(),
		}
	}
}

impl IntoResponse for ApiError {
	fn into_response(self) -> Response {
		let status = self.status();
		let message = self.message();
		if status.is_server_error() {
			warn!(target = "srd.server", status = status.as_u16(), error = %message, "request failed");
		} else {
			debug!(target = "srd.server", status = status.as_u16(), error = %message, "request rejected");
		}
		(status, Json(ErrorBody::new(message))).into_response()
	}
}

pub async fn list_targets(State(state): State<AppState>, headers: HeaderMap) -> Result<Json<Vec<DeviceTarget>>, ApiError> {
	let mut targets = state.relay.list_targets().await?;
	if let Some(host) = request_host(&headers) {
		for target in &mut targets {
			link_target(target, host);
		}
	}
	Ok(Json(targets))
}

pub async fn list_devices(State(state): State<AppState>) -> Result<Json<Vec<DeviceEntry>>, ApiError> {
	Ok(Json(state.relay.list_devices().await?))
}

pub async fn list_sessions(State(state): State<AppState>) -> Json<Vec<SessionInfo>> {
	Json(state.relay.sessions())
}

/// Opens the upstream side before accepting the upgrade, so a missing target
/// or an unreachable proxy is answered with a plain HTTP error.
pub async fn devtools_socket(
	State(state): State<AppState>,
	Path(target): Path<String>,
	ConnectInfo(peer): ConnectInfo<SocketAddr>,
	ws: WebSocketUpgrade,
) -> Result<Response, ApiError> {
	let target: TargetId = target.parse().map_err(ApiError::BadTarget)?;
	let pending = state.relay.open_session(&target, peer.to_string()).await?;
	let session = pending.id();

	let response = ws
		.on_failed_upgrade(move |err| {
			warn!(target = "srd.server", %session, error = %err, "websocket upgrade failed");
		})
		.on_upgrade(move |socket| async move {
			let end = pending.run(bridge::client(socket)).await;
			info!(target = "srd.server", %session, %peer, %end, "inspector disconnected");
		});
	Ok(response)
}

fn request_host(headers: &HeaderMap) -> Option<&str> {
	headers
		.get(header::HOST)
		.and_then(|value| value.to_str().ok())
		.filter(|host| !host.is_empty())
}

/// Points a target at this server, as seen by the requesting client.
fn link_target(target: &mut DeviceTarget, host: &str) {
	let path = format!("{host}/devtools/page/{}", target.id);
	target.devtools_frontend_url = Some(format!("/Main.html?ws={path}"));
	target.web_socket_debugger_url = Some(format!("ws://{path}"));
}
