// handlers.rs

use crate::{
    commands,
    devices::Field,
    docs,
    error::{AppError, ErrorBody, ResultCode},
    methods::Method,
    models::{
        ActionRequest, ActionResponse, AppState, ClientMessage, DeviceEvent, DeviceResult,
        DeviceStatus, DeviceUpdate, ErrorString, ParameterQuery, ParameterValue,
    },
    protocols, utils,
};
use axum::{
    Json, Router,
    extract::{
        Path, Query, State, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;
use uuid::Uuid;
use validator::Validate;

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/devices", get(list_devices).post(add_device))
        .route(
            "/api/devices/{id}",
            get(get_device).put(update_device).delete(remove_device),
        )
        .route("/api/devices/{id}/actions", post(do_action))
        .route(
            "/api/devices/{id}/parameters/{key}",
            get(get_parameter).put(set_parameter),
        )
        .route("/api/all-off", post(all_off))
        .route("/api/errors/{code}", get(error_string))
        .route("/ws/client", get(handle_client_ws_upgrade))
        .route("/metrics", get(render_metrics))
        .merge(SwaggerUi::new("/docs").url("/api-doc/openapi.json", docs::ApiDoc::openapi()))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn status_of(state: &AppState, id: i32) -> Result<DeviceStatus, AppError> {
    let device = state.manager.device(id).ok_or(AppError::DeviceNotFound)?;
    Ok(DeviceStatus::of(&device).await)
}

#[utoipa::path(
    get,
    path = "/api/devices",
    tag = "devices",
    responses((status = 200, description = "All configured devices", body = [DeviceStatus]))
)]
pub async fn list_devices(State(state): State<Arc<AppState>>) -> Json<Vec<DeviceStatus>> {
    let mut devices = Vec::new();
    for id in state.manager.ids() {
        if let Some(device) = state.manager.device(id) {
            devices.push(DeviceStatus::of(&device).await);
        }
    }
    Json(devices)
}

#[utoipa::path(
    post,
    path = "/api/devices",
    tag = "devices",
    responses((status = 201, description = "Empty device created", body = DeviceStatus))
)]
pub async fn add_device(
    State(state): State<Arc<AppState>>,
) -> Result<(StatusCode, Json<DeviceStatus>), AppError> {
    let id = commands::add_device(&state.manager).await;
    Ok((StatusCode::CREATED, Json(status_of(&state, id).await?)))
}

#[utoipa::path(
    get,
    path = "/api/devices/{id}",
    tag = "devices",
    params(("id" = i32, Path, description = "Device id")),
    responses(
        (status = 200, body = DeviceStatus),
        (status = 404, body = ErrorBody)
    )
)]
pub async fn get_device(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i32>,
) -> Result<Json<DeviceStatus>, AppError> {
    Ok(Json(status_of(&state, id).await?))
}

#[utoipa::path(
    put,
    path = "/api/devices/{id}",
    tag = "devices",
    params(("id" = i32, Path, description = "Device id")),
    request_body = DeviceUpdate,
    responses(
        (status = 200, body = DeviceStatus),
        (status = 400, body = ErrorBody),
        (status = 404, body = ErrorBody)
    )
)]
pub async fn update_device(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i32>,
    Json(update): Json<DeviceUpdate>,
) -> Result<Json<DeviceStatus>, AppError> {
    update.validate()?;
    if state.manager.device(id).is_none() {
        return Err(AppError::DeviceNotFound);
    }
    if let Some(protocol) = &update.protocol {
        if protocols::resolve(protocol, "").is_none() {
            return Err(AppError::UnknownProtocol(protocol.clone()));
        }
    }

    let fields = [
        (Field::Name, &update.name),
        (Field::Vendor, &update.vendor),
        (Field::Protocol, &update.protocol),
        (Field::Model, &update.model),
    ];
    for (field, value) in fields {
        if let Some(value) = value {
            state.manager.set_field(id, field, value).await;
        }
    }
    if let Some(controller) = update.preferred_controller {
        state.manager.set_preferred_controller(id, Some(controller)).await;
    }
    Ok(Json(status_of(&state, id).await?))
}

#[utoipa::path(
    delete,
    path = "/api/devices/{id}",
    tag = "devices",
    params(("id" = i32, Path, description = "Device id")),
    responses(
        (status = 204, description = "Device removed"),
        (status = 404, body = ErrorBody)
    )
)]
pub async fn remove_device(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i32>,
) -> Result<StatusCode, AppError> {
    if commands::remove_device(&state.manager, id).await {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(AppError::DeviceNotFound)
    }
}

/// Runs one action. The outcome is always carried as a result code in the
/// body, mirroring the numeric command surface.
#[utoipa::path(
    post,
    path = "/api/devices/{id}/actions",
    tag = "devices",
    params(("id" = i32, Path, description = "Device id")),
    request_body = ActionRequest,
    responses(
        (status = 200, body = ActionResponse),
        (status = 400, body = ErrorBody)
    )
)]
pub async fn do_action(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i32>,
    Json(request): Json<ActionRequest>,
) -> Result<Json<ActionResponse>, AppError> {
    request.validate()?;
    let Some(method) = Method::from_name(&request.method) else {
        let code = ResultCode::MethodNotSupported;
        return Ok(Json(ActionResponse {
            code: code.code(),
            message: code.message().to_string(),
            state_value: None,
        }));
    };

    let response = match state.manager.do_action(id, method, request.level).await {
        Ok(actuation) => ActionResponse {
            code: ResultCode::Success.code(),
            message: ResultCode::Success.message().to_string(),
            state_value: actuation.state_value,
        },
        Err(e) => {
            let code = e.result_code();
            ActionResponse {
                code: code.code(),
                message: code.message().to_string(),
                state_value: None,
            }
        }
    };
    Ok(Json(response))
}

#[utoipa::path(
    post,
    path = "/api/all-off",
    tag = "devices",
    responses((status = 200, description = "One result per device able to turn off", body = [DeviceResult]))
)]
pub async fn all_off(State(state): State<Arc<AppState>>) -> Json<Vec<DeviceResult>> {
    let results = commands::all_off(&state.manager)
        .await
        .into_iter()
        .map(|(device_id, code)| DeviceResult { device_id, code })
        .collect();
    Json(results)
}

#[utoipa::path(
    get,
    path = "/api/devices/{id}/parameters/{key}",
    tag = "devices",
    params(
        ("id" = i32, Path, description = "Device id"),
        ("key" = String, Path, description = "Parameter name"),
        ParameterQuery
    ),
    responses(
        (status = 200, body = ParameterValue),
        (status = 404, body = ErrorBody)
    )
)]
pub async fn get_parameter(
    State(state): State<Arc<AppState>>,
    Path((id, key)): Path<(i32, String)>,
    Query(query): Query<ParameterQuery>,
) -> Result<Json<ParameterValue>, AppError> {
    if state.manager.device(id).is_none() {
        return Err(AppError::DeviceNotFound);
    }
    let default = query.default.unwrap_or_default();
    let value = commands::argument(&state.manager, id, &key, &default).await;
    Ok(Json(ParameterValue { value }))
}

#[utoipa::path(
    put,
    path = "/api/devices/{id}/parameters/{key}",
    tag = "devices",
    params(
        ("id" = i32, Path, description = "Device id"),
        ("key" = String, Path, description = "Parameter name")
    ),
    request_body = ParameterValue,
    responses(
        (status = 204, description = "Parameter stored"),
        (status = 400, body = ErrorBody),
        (status = 404, body = ErrorBody)
    )
)]
pub async fn set_parameter(
    State(state): State<Arc<AppState>>,
    Path((id, key)): Path<(i32, String)>,
    Json(body): Json<ParameterValue>,
) -> Result<StatusCode, AppError> {
    body.validate()?;
    if commands::set_argument(&state.manager, id, &key, &body.value).await {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(AppError::DeviceNotFound)
    }
}

#[utoipa::path(
    get,
    path = "/api/errors/{code}",
    tag = "devices",
    params(("code" = i32, Path, description = "Result code")),
    responses((status = 200, body = ErrorString))
)]
pub async fn error_string(Path(code): Path<i32>) -> Json<ErrorString> {
    Json(ErrorString {
        code,
        message: commands::error_string(code).to_string(),
    })
}

async fn render_metrics(State(state): State<Arc<AppState>>) -> Response {
    match &state.metrics {
        Some(handle) => handle.render().into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

pub async fn handle_client_ws_upgrade(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> Response {
    if state.clients.len() >= state.max_connections {
        warn!(limit = state.max_connections, "Client rejected, connection limit reached");
        return (StatusCode::SERVICE_UNAVAILABLE, "Too many clients").into_response();
    }
    info!("Client connection attempt");
    ws.on_upgrade(|socket| handle_client(socket, state))
}

async fn handle_client(socket: WebSocket, state: Arc<AppState>) {
    let (mut sender, mut receiver) = socket.split();
    let client_id = Uuid::new_v4();
    state.clients.insert(client_id, Utc::now());
    info!(%client_id, "Client connected");

    let mut events = state.manager.events().subscribe();
    let (reply_tx, mut reply_rx) = mpsc::channel::<DeviceEvent>(16);

    let mut send_task = tokio::spawn(async move {
        loop {
            let event = tokio::select! {
                received = events.recv() => match received {
                    Ok(event) => event,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(%client_id, skipped, "Client lagging behind events");
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
                Some(event) = reply_rx.recv() => event,
            };
            let text = match serde_json::to_string(&event) {
                Ok(text) => text,
                Err(e) => {
                    error!("Failed to encode event: {}", e);
                    continue;
                }
            };
            if sender.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
    });

    let mut recv_task = tokio::spawn({
        let state = Arc::clone(&state);
        async move {
            while let Some(Ok(msg)) = receiver.next().await {
                let Message::Text(text) = msg else {
                    continue;
                };
                match serde_json::from_str::<ClientMessage>(text.as_str()) {
                    Ok(ClientMessage::Action {
                        device_id,
                        method,
                        level,
                    }) => {
                        let code = match Method::from_name(&method) {
                            Some(method) => commands::execute(
                                &state.manager,
                                device_id,
                                method.bit().bits(),
                                level,
                            )
                            .await,
                            None => ResultCode::MethodNotSupported.code(),
                        };
                        if code != ResultCode::Success.code() {
                            let reply = DeviceEvent::Error {
                                device_id: Some(device_id),
                                message: commands::error_string(code).to_string(),
                                code,
                            };
                            if reply_tx.send(reply).await.is_err() {
                                break;
                            }
                        }
                    }
                    Err(e) => {
                        error!("Invalid message format: {}", e);
                        let reply = DeviceEvent::Error {
                            device_id: None,
                            message: format!("Invalid message: {}", e),
                            code: ResultCode::Unknown.code(),
                        };
                        if reply_tx.send(reply).await.is_err() {
                            break;
                        }
                    }
                }
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    };

    utils::cleanup_client_connection(client_id, &state).await;
}
