use axum::{
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use lab_core::validation::expect_object;
use lab_core::{is_falsy, ValidationError, LIVE_DATA_OPTIONS};
use lab_store::{LabStore, StoreError};
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{error, info, warn};

/// Shared handler state. The single lock serializes every mutation together
/// with its disk write. Those writes are blocking `std::fs` calls made on the
/// runtime thread under the write guard; collections stay small enough for
/// that. Move them to `spawn_blocking` before putting real load on it.
pub struct HubState {
    store: RwLock<LabStore>,
}

impl HubState {
    pub fn new(store: LabStore) -> Self {
        Self {
            store: RwLock::new(store),
        }
    }
}

pub fn router(hub: Arc<HubState>) -> Router {
    Router::new()
        .route("/api/test_mapping", get(list_test_mapping).post(replace_test_mapping))
        .route("/api/models", get(list_models).post(post_models))
        .route(
            "/api/model_config/:file",
            get(get_model_config).post(set_model_config),
        )
        .route("/api/run_test", post(run_test))
        .route("/api/test_chamber", get(list_sensors).post(add_sensor))
        .route("/api/cabinet_sensors", get(list_sensors).post(add_sensor))
        .route("/api/test_run_history", get(list_history))
        .route("/api/test_run_notes", post(set_run_notes))
        .route("/api/last_run", get(get_last_run))
        .route("/api/live_data_options", get(live_data_options))
        .route("/api/app_config", get(get_app_config))
        .route("/api/update_app_config", post(update_app_config))
        .route("/api/load_all", post(load_all))
        .route("/api/export_all", get(export_all))
        .route("/health", get(|| async { "ok" }))
        .with_state(hub)
}

#[derive(Debug)]
pub struct ApiError(StoreError);

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        ApiError(err)
    }
}

impl From<ValidationError> for ApiError {
    fn from(err: ValidationError) -> Self {
        ApiError(StoreError::Validation(err))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = if self.0.is_client_error() {
            warn!(event = "request_rejected", error = %self.0);
            StatusCode::BAD_REQUEST
        } else {
            error!(event = "store_error", error = %self.0);
            StatusCode::INTERNAL_SERVER_ERROR
        };
        let body = json!({"status": "error", "message": self.0.to_string()});
        (status, Json(body)).into_response()
    }
}

type ApiResult = Result<Json<Value>, ApiError>;

fn success() -> Json<Value> {
    Json(json!({"status": "success"}))
}

/// An empty body reads as `null`, matching clients that post nothing.
fn parse_body(body: &Bytes) -> Result<Value, ApiError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(Value::Null);
    }
    serde_json::from_slice(body)
        .map_err(|err| ValidationError::MalformedBody(err.to_string()).into())
}

async fn list_test_mapping(State(hub): State<Arc<HubState>>) -> Json<Value> {
    let store = hub.store.read().await;
    Json(Value::Array(store.test_configurations().to_vec()))
}

async fn replace_test_mapping(State(hub): State<Arc<HubState>>, body: Bytes) -> ApiResult {
    let mut items = parse_body(&body)?;
    if is_falsy(&items) {
        items = Value::Array(Vec::new());
    }
    hub.store.write().await.replace_test_configurations(&items)?;
    Ok(success())
}

async fn list_models(State(hub): State<Arc<HubState>>) -> Json<Value> {
    let store = hub.store.read().await;
    Json(json!(store.models()))
}

/// A list replaces every model; anything else is added as one model.
async fn post_models(State(hub): State<Arc<HubState>>, body: Bytes) -> ApiResult {
    let payload = parse_body(&body)?;
    let mut store = hub.store.write().await;
    if payload.is_array() {
        store.replace_models(&payload)?;
    } else {
        store.add_model(&payload)?;
    }
    Ok(success())
}

async fn get_model_config(
    State(hub): State<Arc<HubState>>,
    Path(file): Path<String>,
) -> Json<Value> {
    Json(hub.store.read().await.model_config(&file))
}

async fn set_model_config(
    State(hub): State<Arc<HubState>>,
    Path(file): Path<String>,
    body: Bytes,
) -> ApiResult {
    let config = parse_body(&body)?;
    hub.store.write().await.set_model_config(&file, config)?;
    Ok(success())
}

async fn run_test(State(hub): State<Arc<HubState>>, body: Bytes) -> ApiResult {
    let request = parse_body(&body)?;
    let entry = hub.store.write().await.record_run(&request)?;
    info!(
        event = "run_recorded",
        file = %entry["file"],
        config_idx = %entry["config_idx"],
        user = %entry["user"]
    );
    Ok(success())
}

async fn list_sensors(State(hub): State<Arc<HubState>>) -> Json<Value> {
    let store = hub.store.read().await;
    Json(json!(store.sensors()))
}

async fn add_sensor(State(hub): State<Arc<HubState>>, body: Bytes) -> ApiResult {
    let sensor = parse_body(&body)?;
    hub.store.write().await.add_sensor(&sensor)?;
    Ok(success())
}

async fn list_history(State(hub): State<Arc<HubState>>) -> Json<Value> {
    let store = hub.store.read().await;
    Json(json!(store.history()))
}

async fn set_run_notes(State(hub): State<Arc<HubState>>, body: Bytes) -> ApiResult {
    let payload = parse_body(&body)?;
    let request = expect_object(&payload, "run notes")?;
    let index = request.get("index").cloned().unwrap_or(Value::Null);
    let notes = request
        .get("notes")
        .cloned()
        .unwrap_or_else(|| Value::String(String::new()));
    hub.store.write().await.set_run_notes(&index, notes)?;
    Ok(success())
}

async fn get_last_run(State(hub): State<Arc<HubState>>) -> Json<Value> {
    let store = hub.store.read().await;
    Json(Value::Object(store.last_run().clone()))
}

async fn live_data_options() -> Json<Value> {
    Json(json!(LIVE_DATA_OPTIONS))
}

async fn get_app_config(State(hub): State<Arc<HubState>>) -> Json<Value> {
    let store = hub.store.read().await;
    Json(Value::Object(store.app_config().clone()))
}

/// Returns the merged config itself rather than a status envelope.
async fn update_app_config(State(hub): State<Arc<HubState>>, body: Bytes) -> ApiResult {
    let patch = parse_body(&body)?;
    let merged = hub.store.write().await.update_app_config(&patch)?;
    info!(event = "app_config_updated", keys = merged.len());
    Ok(Json(Value::Object(merged)))
}

async fn load_all(State(hub): State<Arc<HubState>>, body: Bytes) -> ApiResult {
    let payload = parse_body(&body)?;
    let summary = hub.store.write().await.load_all(&payload)?;
    info!(event = "bulk_load", replaced = ?summary.replaced);
    Ok(success())
}

async fn export_all(State(hub): State<Arc<HubState>>) -> ApiResult {
    let bundle = hub.store.read().await.export_all();
    let value = serde_json::to_value(bundle)
        .map_err(|err| StoreError::Serialization(err.to_string()))?;
    Ok(Json(value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Method, Request};
    use chrono::DateTime;
    use tempfile::TempDir;
    use tower::ServiceExt;

    fn hub(dir: &TempDir) -> Arc<HubState> {
        let store = LabStore::open(dir.path()).expect("open store");
        Arc::new(HubState::new(store))
    }

    fn body(value: Value) -> Bytes {
        Bytes::from(serde_json::to_vec(&value).expect("encode body"))
    }

    async fn read<R: IntoResponse>(response: R) -> (StatusCode, Value) {
        let response = response.into_response();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("read body");
        let value = serde_json::from_slice(&bytes).expect("json body");
        (status, value)
    }

    #[tokio::test]
    async fn models_post_list_replaces_and_object_appends() {
        let dir = TempDir::new().expect("temp dir");
        let hub = hub(&dir);

        let (status, value) = read(
            post_models(
                State(hub.clone()),
                body(json!([{"name": "A", "file": "a.pkl", "description": "first"}])),
            )
            .await,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(value, json!({"status": "success"}));

        read(
            post_models(
                State(hub.clone()),
                body(json!({"name": "B", "file": "b.pkl", "description": "second"})),
            )
            .await,
        )
        .await;

        let (_, models) = read(list_models(State(hub.clone())).await).await;
        assert_eq!(models.as_array().map(Vec::len), Some(2));
        assert_eq!(models[1]["file"], "b.pkl");
    }

    #[tokio::test]
    async fn models_post_with_missing_field_is_400_and_unchanged() {
        let dir = TempDir::new().expect("temp dir");
        let hub = hub(&dir);

        let (status, value) = read(
            post_models(
                State(hub.clone()),
                body(json!([{"name": "A", "file": "a.pkl"}])),
            )
            .await,
        )
        .await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(value["status"], "error");
        assert!(value["message"]
            .as_str()
            .expect("message")
            .contains("description"));
        let (_, models) = read(list_models(State(hub.clone())).await).await;
        assert_eq!(models[0]["file"], "model1.pkl");
    }

    #[tokio::test]
    async fn malformed_json_is_a_client_error() {
        let dir = TempDir::new().expect("temp dir");
        let hub = hub(&dir);

        let (status, value) = read(
            add_sensor(State(hub.clone()), Bytes::from_static(b"{\"unique_id\": ")).await,
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(value["message"]
            .as_str()
            .expect("message")
            .starts_with("Invalid JSON body"));
    }

    #[tokio::test]
    async fn duplicate_sensor_is_rejected() {
        let dir = TempDir::new().expect("temp dir");
        let hub = hub(&dir);

        let (status, value) = read(
            add_sensor(State(hub.clone()), body(json!({"unique_id": "TEST_SEN_0002"}))).await,
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(value["message"], "Unique ID already exists: TEST_SEN_0002");

        let (_, sensors) = read(list_sensors(State(hub.clone())).await).await;
        assert_eq!(sensors.as_array().map(Vec::len), Some(2));
    }

    #[tokio::test]
    async fn test_mapping_empty_body_clears_list() {
        let dir = TempDir::new().expect("temp dir");
        let hub = hub(&dir);

        read(
            replace_test_mapping(
                State(hub.clone()),
                body(json!([{"test_connection": "A1", "device_sensor": "TEST_SEN_0001"}])),
            )
            .await,
        )
        .await;
        let (_, mapping) = read(list_test_mapping(State(hub.clone())).await).await;
        assert_eq!(mapping[0]["test_connection"], "A1");

        let (status, _) = read(replace_test_mapping(State(hub.clone()), Bytes::new()).await).await;
        assert_eq!(status, StatusCode::OK);
        let (_, mapping) = read(list_test_mapping(State(hub.clone())).await).await;
        assert_eq!(mapping, json!([]));

        let (status, _) =
            read(replace_test_mapping(State(hub.clone()), body(json!({}))).await).await;
        assert_eq!(status, StatusCode::OK);

        let (status, _) =
            read(replace_test_mapping(State(hub.clone()), body(json!({"a": 1}))).await).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn model_config_round_trips_by_file_key() {
        let dir = TempDir::new().expect("temp dir");
        let hub = hub(&dir);

        let (_, empty) = read(
            get_model_config(State(hub.clone()), Path("model1.pkl".to_string())).await,
        )
        .await;
        assert_eq!(empty, json!({}));

        read(
            set_model_config(
                State(hub.clone()),
                Path("model1.pkl".to_string()),
                body(json!({"channels": [1, 2]})),
            )
            .await,
        )
        .await;
        let (_, config) = read(
            get_model_config(State(hub.clone()), Path("model1.pkl".to_string())).await,
        )
        .await;
        assert_eq!(config, json!({"channels": [1, 2]}));
    }

    #[tokio::test]
    async fn run_test_appends_history_and_notes_target_latest() {
        let dir = TempDir::new().expect("temp dir");
        let hub = hub(&dir);

        let (status, _) = read(
            run_test(
                State(hub.clone()),
                body(json!({"file": "model1.pkl", "config_idx": 0})),
            )
            .await,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        read(
            run_test(
                State(hub.clone()),
                body(json!({"file": "model2.pkl", "config_idx": 1, "user": "Lee"})),
            )
            .await,
        )
        .await;

        let (_, history) = read(list_history(State(hub.clone())).await).await;
        assert_eq!(history.as_array().map(Vec::len), Some(2));
        assert_eq!(history[0]["user"], "Emma Wagner");
        let timestamp = history[0]["timestamp"].as_str().expect("timestamp");
        DateTime::parse_from_rfc3339(timestamp).expect("rfc3339 timestamp");

        let (status, _) = read(
            set_run_notes(State(hub.clone()), body(json!({"index": 0, "notes": "ok"}))).await,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let (_, history) = read(list_history(State(hub.clone())).await).await;
        assert_eq!(history[1]["notes"], "ok");
        assert!(history[0].get("notes").is_none());

        let (_, last_run) = read(get_last_run(State(hub.clone())).await).await;
        assert_eq!(last_run, json!({"file": "model2.pkl", "config_idx": 1}));
    }

    #[tokio::test]
    async fn run_test_and_notes_reject_bad_input() {
        let dir = TempDir::new().expect("temp dir");
        let hub = hub(&dir);

        let (status, value) =
            read(run_test(State(hub.clone()), body(json!({"file": "model1.pkl"}))).await).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(value["message"]
            .as_str()
            .expect("message")
            .contains("config_idx"));

        let (status, _) = read(
            set_run_notes(State(hub.clone()), body(json!({"index": 0, "notes": "x"}))).await,
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn app_config_update_returns_merged_object() {
        let dir = TempDir::new().expect("temp dir");
        let hub = hub(&dir);

        let (status, merged) =
            read(update_app_config(State(hub.clone()), body(json!({"foo": "bar"}))).await).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            merged,
            json!({"test_chamber_page_name": "Test Chamber", "foo": "bar"})
        );

        let (_, config) = read(get_app_config(State(hub.clone())).await).await;
        assert_eq!(config, merged);
    }

    #[tokio::test]
    async fn load_all_then_export_all_matches() {
        let dir = TempDir::new().expect("temp dir");
        let hub = hub(&dir);
        let payload = json!({
            "models": [{"name": "Boiler", "file": "boiler.pkl", "description": "V7"}],
            "sensors": [{"unique_id": "X"}],
            "mapping": [{"test_connection": "A1", "device_sensor": "X"}],
            "modelConfigs": [{"file": "boiler.pkl", "config": {"gain": 3}}]
        });

        let (status, _) = read(load_all(State(hub.clone()), body(payload.clone())).await).await;
        assert_eq!(status, StatusCode::OK);

        let (_, exported) = read(export_all(State(hub.clone())).await).await;
        assert_eq!(exported, payload);
    }

    #[tokio::test]
    async fn live_data_options_lists_four_tags() {
        let (_, options) = read(live_data_options().await).await;
        assert_eq!(options.as_array().map(Vec::len), Some(4));
    }

    async fn send(app: &Router, method: Method, uri: &str, payload: Option<Value>) -> Response {
        let body = match payload {
            Some(value) => Body::from(serde_json::to_vec(&value).expect("encode body")),
            None => Body::empty(),
        };
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(body)
            .expect("build request");
        app.clone().oneshot(request).await.expect("route request")
    }

    #[tokio::test]
    async fn cabinet_sensors_alias_shares_the_test_chamber_list() {
        let dir = TempDir::new().expect("temp dir");
        let app = router(hub(&dir));

        let response = send(
            &app,
            Method::POST,
            "/api/cabinet_sensors",
            Some(json!({"unique_id": "TEST_SEN_0003", "name": "Flow"})),
        )
        .await;
        let (status, value) = read(response).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(value, json!({"status": "success"}));

        let (_, sensors) = read(send(&app, Method::GET, "/api/test_chamber", None).await).await;
        assert_eq!(sensors[2]["unique_id"], "TEST_SEN_0003");

        let response = send(
            &app,
            Method::POST,
            "/api/test_chamber",
            Some(json!({"unique_id": "TEST_SEN_0003"})),
        )
        .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn model_config_route_captures_file_key() {
        let dir = TempDir::new().expect("temp dir");
        let app = router(hub(&dir));

        let response = send(
            &app,
            Method::POST,
            "/api/model_config/model1.pkl",
            Some(json!({"gain": 4})),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);

        let (status, config) =
            read(send(&app, Method::GET, "/api/model_config/model1.pkl", None).await).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(config, json!({"gain": 4}));

        let (_, other) =
            read(send(&app, Method::GET, "/api/model_config/model2.pkl", None).await).await;
        assert_eq!(other, json!({}));
    }

    #[tokio::test]
    async fn run_notes_route_amends_latest_run() {
        let dir = TempDir::new().expect("temp dir");
        let app = router(hub(&dir));

        for idx in 0..2 {
            let response = send(
                &app,
                Method::POST,
                "/api/run_test",
                Some(json!({"file": "model1.pkl", "config_idx": idx})),
            )
            .await;
            assert_eq!(response.status(), StatusCode::OK);
        }
        let response = send(
            &app,
            Method::POST,
            "/api/test_run_notes",
            Some(json!({"index": 0, "notes": "fan noise"})),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);

        let (_, history) =
            read(send(&app, Method::GET, "/api/test_run_history", None).await).await;
        assert_eq!(history[1]["notes"], "fan noise");
        assert_eq!(history[1]["config_idx"], 1);
        assert!(history[0].get("notes").is_none());
    }

    #[tokio::test]
    async fn health_and_method_bindings() {
        let dir = TempDir::new().expect("temp dir");
        let app = router(hub(&dir));

        let response = send(&app, Method::GET, "/health", None).await;
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("read body");
        assert_eq!(&bytes[..], b"ok");

        let response = send(&app, Method::GET, "/api/run_test", None).await;
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
        let response = send(&app, Method::POST, "/api/test_run_history", None).await;
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);

        let (status, options) =
            read(send(&app, Method::GET, "/api/live_data_options", None).await).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(options.as_array().map(Vec::len), Some(4));
    }
}
