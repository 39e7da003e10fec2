//! HTTP control surface.
//!
//! # Endpoints
//!
//! ### `GET /status`
//! Connectivity state, indicator signal and broker session flag.
//!
//! ### `GET /params`, `GET|PUT|DELETE /params/{name}`
//! Parameter store access. `PUT` takes the raw value as the request body.
//!
//! ### `GET|PUT /provisioning/{field}`
//! Provisioning fields (`wifi-ssid`, `mqtt-host`, `command`, ...). Writing
//! `command` with `restart-wifi` or `restart-mqtt` drives the lifecycle.
//!
//! ### `POST /sim/wifi/{up|down}`, `POST /sim/broker/drop`
//! Connectivity faults.
//!
//! ### `POST /sim/deliver`, `GET /sim/published`, `GET /sim/subscriptions`
//! Broker traffic.

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use nodelink_core::{
    ConnectivityState, LifecycleManager, ParamError, ParamType, ParamValue, ParameterStore,
    ProvisioningField, ProvisioningInterface,
};
use serde::{Deserialize, Serialize};
use tracing::error;

use crate::sim::{
    ProvisioningWriteError, PublishedMessage, SimBroker, SimIndicator, SimProvisioning, SimWifi,
};

/// Shared state of all handlers.
#[derive(Clone)]
pub struct AppState {
    pub manager: Arc<LifecycleManager>,
    pub params: Arc<ParameterStore>,
    pub provisioning: Arc<SimProvisioning>,
    pub indicator: Arc<SimIndicator>,
    pub wifi: Arc<SimWifi>,
    pub broker: Arc<SimBroker>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusResponse {
    pub state: ConnectivityState,
    pub link_signal: bool,
    pub network_signal: bool,
    pub broker_connected: bool,
    pub ssid: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ParamEntry {
    pub name: String,
    #[serde(rename = "type")]
    pub param_type: ParamType,
    pub value: ParamValue,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DeliverRequest {
    pub topic: String,
    #[serde(default)]
    pub payload: String,
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/status", get(get_status))
        .route("/params", get(list_params))
        .route(
            "/params/:name",
            get(get_param).put(put_param).delete(delete_param),
        )
        .route(
            "/provisioning/:field",
            get(get_provisioning).put(put_provisioning),
        )
        .nest("/sim", sim_routes())
        .with_state(state)
}

fn sim_routes() -> Router<AppState> {
    Router::new()
        .route("/wifi/up", post(wifi_up))
        .route("/wifi/down", post(wifi_down))
        .route("/broker/drop", post(broker_drop))
        .route("/deliver", post(deliver))
        .route("/published", get(published))
        .route("/subscriptions", get(subscriptions))
}

fn param_status(e: &ParamError) -> StatusCode {
    if e.is_fatal() {
        error!(error = %e, "parameter store fault");
        StatusCode::INTERNAL_SERVER_ERROR
    } else {
        StatusCode::BAD_REQUEST
    }
}

/// GET /status
async fn get_status(State(state): State<AppState>) -> Json<StatusResponse> {
    let (link_signal, network_signal) = state.indicator.signal();
    Json(StatusResponse {
        state: state.manager.state(),
        link_signal,
        network_signal,
        broker_connected: state.broker.is_connected(),
        ssid: state.wifi.ssid(),
    })
}

/// GET /params
async fn list_params(State(state): State<AppState>) -> Result<Json<Vec<ParamEntry>>, StatusCode> {
    let mut entries = Vec::new();
    for parameter in state.params.parameters() {
        let value = state
            .params
            .get_value(parameter.name())
            .map_err(|e| param_status(&e))?;
        entries.push(ParamEntry {
            name: parameter.name().to_string(),
            param_type: parameter.param_type(),
            value,
        });
    }
    Ok(Json(entries))
}

/// GET /params/{name}
async fn get_param(
    Path(name): Path<String>,
    State(state): State<AppState>,
) -> Result<String, StatusCode> {
    if !state.params.contains(&name).map_err(|e| param_status(&e))? {
        return Err(StatusCode::NOT_FOUND);
    }
    state.params.get(&name).map_err(|e| param_status(&e))
}

/// PUT /params/{name}
async fn put_param(
    Path(name): Path<String>,
    State(state): State<AppState>,
    body: String,
) -> StatusCode {
    match state.params.set(&name, &body) {
        Ok(()) => StatusCode::NO_CONTENT,
        Err(e) => param_status(&e),
    }
}

/// DELETE /params/{name}
async fn delete_param(Path(name): Path<String>, State(state): State<AppState>) -> StatusCode {
    match state.params.unset(&name) {
        Ok(true) => StatusCode::NO_CONTENT,
        Ok(false) => StatusCode::NOT_FOUND,
        Err(e) => param_status(&e),
    }
}

/// GET /provisioning/{field}
async fn get_provisioning(
    Path(field): Path<String>,
    State(state): State<AppState>,
) -> Result<String, StatusCode> {
    let field: ProvisioningField = field.parse().map_err(|_| StatusCode::NOT_FOUND)?;
    Ok(state.provisioning.read(field))
}

/// PUT /provisioning/{field}
async fn put_provisioning(
    Path(field): Path<String>,
    State(state): State<AppState>,
    body: String,
) -> StatusCode {
    let Ok(field) = field.parse::<ProvisioningField>() else {
        return StatusCode::NOT_FOUND;
    };
    match state.provisioning.write(field, &body) {
        Ok(()) => StatusCode::NO_CONTENT,
        Err(ProvisioningWriteError::ReadOnly) => StatusCode::METHOD_NOT_ALLOWED,
        Err(ProvisioningWriteError::Params(e)) => param_status(&e),
    }
}

/// POST /sim/wifi/up
async fn wifi_up(State(state): State<AppState>) -> StatusCode {
    state.wifi.set_reachable(true);
    StatusCode::ACCEPTED
}

/// POST /sim/wifi/down
async fn wifi_down(State(state): State<AppState>) -> StatusCode {
    state.wifi.set_reachable(false);
    StatusCode::ACCEPTED
}

/// POST /sim/broker/drop
async fn broker_drop(State(state): State<AppState>) -> StatusCode {
    if state.broker.drop_session() {
        StatusCode::ACCEPTED
    } else {
        StatusCode::CONFLICT
    }
}

/// POST /sim/deliver
async fn deliver(State(state): State<AppState>, Json(request): Json<DeliverRequest>) -> StatusCode {
    if state
        .broker
        .deliver(&request.topic, request.payload.as_bytes())
    {
        StatusCode::ACCEPTED
    } else {
        StatusCode::UNPROCESSABLE_ENTITY
    }
}

/// GET /sim/published
async fn published(State(state): State<AppState>) -> Json<Vec<PublishedMessage>> {
    Json(state.broker.published())
}

/// GET /sim/subscriptions
async fn subscriptions(State(state): State<AppState>) -> Json<Vec<String>> {
    Json(state.broker.subscriptions())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::{Method, Request};
    use nodelink_core::{system_parameters, Collaborators, MemoryBackend};
    use nodelink_runtime::{DeviceHost, EventQueue, NodeConfig};
    use pretty_assertions::assert_eq;
    use std::time::Duration;
    use tower::ServiceExt;

    use crate::device::Thermostat;

    fn test_state() -> (AppState, EventQueue) {
        let thermostat = Arc::new(Thermostat::new());
        let mut parameters = system_parameters("sim-test");
        parameters.extend(thermostat.parameters());
        let store =
            ParameterStore::with_parameters(MemoryBackend::new("sim"), 8, parameters).unwrap();
        store.init().unwrap();
        let params = Arc::new(store);

        let queue = EventQueue::new(16);
        let provisioning = Arc::new(SimProvisioning::new(Arc::clone(&params), queue.sender()));
        let indicator = Arc::new(SimIndicator::new(Arc::clone(&provisioning)));
        let wifi = Arc::new(SimWifi::new(queue.sender(), Duration::from_millis(10)));
        let broker = Arc::new(SimBroker::new(queue.sender(), Duration::from_millis(10)));
        let host = Arc::new(DeviceHost::new(
            thermostat,
            broker.clone(),
            Arc::clone(&params),
            &NodeConfig::default(),
        ));

        let manager = Arc::new(LifecycleManager::new(
            Arc::clone(&params),
            Collaborators {
                indicator: indicator.clone(),
                provisioning: provisioning.clone(),
                wifi: wifi.clone(),
                broker: broker.clone(),
                application: host,
            },
        ));

        let state = AppState {
            manager,
            params,
            provisioning,
            indicator,
            wifi,
            broker,
        };
        (state, queue)
    }

    async fn send(app: Router, method: Method, uri: &str, body: &str) -> (StatusCode, String) {
        let response = app
            .oneshot(
                Request::builder()
                    .method(method)
                    .uri(uri)
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, String::from_utf8(bytes.to_vec()).unwrap())
    }

    #[tokio::test]
    async fn test_status_starts_disconnected() {
        let (state, _queue) = test_state();
        let (status, body) = send(create_router(state), Method::GET, "/status", "").await;

        assert_eq!(status, StatusCode::OK);
        let response: StatusResponse = serde_json::from_str(&body).unwrap();
        assert_eq!(response.state, ConnectivityState::Disconnected);
        assert!(!response.broker_connected);
    }

    #[tokio::test]
    async fn test_param_roundtrip_over_http() {
        let (state, _queue) = test_state();
        let app = create_router(state.clone());

        let (status, _) = send(app.clone(), Method::PUT, "/params/setpoint", "22.5").await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        assert_eq!(state.params.get_double("setpoint").unwrap(), 22.5);

        let (status, body) = send(app.clone(), Method::GET, "/params/setpoint", "").await;
        assert_eq!((status, body.as_str()), (StatusCode::OK, "22.5"));

        let (status, _) = send(app.clone(), Method::PUT, "/params/setpoint", "warm").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = send(app.clone(), Method::DELETE, "/params/setpoint", "").await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        let (status, _) = send(app, Method::GET, "/params/setpoint", "").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_list_params_is_typed() {
        let (state, _queue) = test_state();
        let (status, body) = send(create_router(state), Method::GET, "/params", "").await;

        assert_eq!(status, StatusCode::OK);
        let entries: Vec<serde_json::Value> = serde_json::from_str(&body).unwrap();
        let port = entries.iter().find(|e| e["name"] == "mqtt_port").unwrap();
        assert_eq!(port["type"], "long");
        assert_eq!(port["value"], 1883);
    }

    #[tokio::test]
    async fn test_provisioning_fields() {
        let (state, _queue) = test_state();
        let app = create_router(state.clone());

        let (status, _) =
            send(app.clone(), Method::PUT, "/provisioning/mqtt-host", "broker.lab").await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        assert_eq!(state.params.get("mqtt_host").unwrap(), "broker.lab");

        let (status, body) =
            send(app.clone(), Method::GET, "/provisioning/mqtt-client-id", "").await;
        assert_eq!((status, body.as_str()), (StatusCode::OK, "sim-test"));

        let (status, _) =
            send(app.clone(), Method::PUT, "/provisioning/connection-status", "x").await;
        assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);

        let (status, _) = send(app, Method::GET, "/provisioning/bogus", "").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_drop_without_session_conflicts() {
        let (state, _queue) = test_state();
        let (status, _) = send(create_router(state), Method::POST, "/sim/broker/drop", "").await;
        assert_eq!(status, StatusCode::CONFLICT);
    }
}
