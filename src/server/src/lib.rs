use std::collections::HashMap;
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tracing::debug;

use sketchd_common::error::SketchError;
use sketchd_sketch::Manager;

/// Envelope is the uniform response shape: exactly one of result and error
/// is set.
#[derive(Debug, Serialize, Deserialize)]
pub struct Envelope {
    pub result: Option<serde_json::Value>,
    pub error: Option<String>,
}

impl Envelope {
    fn ok(result: serde_json::Value) -> Self {
        Self {
            result: Some(result),
            error: None,
        }
    }

    fn err(message: String) -> Self {
        Self {
            result: None,
            error: Some(message),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct ValuesBody {
    #[serde(default)]
    values: Vec<String>,
}

/// router builds the request surface over the catalog: resource paths are
/// "{family}/{name}", responses are enveloped.
pub fn router(manager: Arc<Manager>) -> Router {
    Router::new()
        .route("/", get(list_sketches))
        .route(
            "/:family/:name",
            get(query_sketch)
                .post(create_sketch)
                .put(add_to_sketch)
                .delete(delete_sketch),
        )
        .with_state(manager)
}

async fn list_sketches(State(manager): State<Arc<Manager>>) -> Response {
    let mut names: Vec<String> = manager
        .list()
        .await
        .into_iter()
        .map(|key| key.to_string())
        .collect();
    names.sort();

    ok_response(serde_json::json!(names))
}

async fn create_sketch(
    State(manager): State<Arc<Manager>>,
    Path((family, name)): Path<(String, String)>,
    body: Bytes,
) -> Response {
    let properties = match parse_properties(&body) {
        Ok(properties) => properties,
        Err(resp) => return resp,
    };

    debug!("create {}/{}", family, name);
    match manager.create(&name, &family, properties).await {
        Ok(()) => ok_response(serde_json::Value::Null),
        Err(e) => error_response(e),
    }
}

async fn add_to_sketch(
    State(manager): State<Arc<Manager>>,
    Path((family, name)): Path<(String, String)>,
    body: Bytes,
) -> Response {
    let values = match parse_values(&body) {
        Ok(values) => values,
        Err(resp) => return resp,
    };

    match manager.add(&name, &family, values).await {
        Ok(()) => ok_response(serde_json::Value::Null),
        Err(e) => error_response(e),
    }
}

async fn query_sketch(
    State(manager): State<Arc<Manager>>,
    Path((family, name)): Path<(String, String)>,
    body: Bytes,
) -> Response {
    let values = match parse_values(&body) {
        Ok(values) => values,
        Err(resp) => return resp,
    };

    match manager.query(&name, &family, values).await {
        Ok(result) => match serde_json::to_value(&result) {
            Ok(value) => ok_response(value),
            Err(e) => error_response(SketchError::serialization(e)),
        },
        Err(e) => error_response(e),
    }
}

async fn delete_sketch(
    State(manager): State<Arc<Manager>>,
    Path((family, name)): Path<(String, String)>,
) -> Response {
    match manager.delete(&name, &family).await {
        Ok(()) => ok_response(serde_json::Value::Null),
        Err(e) => error_response(e),
    }
}

/// parse_properties reads the create body: a JSON object whose numeric
/// members become construction options. Non-numeric members are ignored.
fn parse_properties(body: &Bytes) -> Result<HashMap<String, f64>, Response> {
    if body.is_empty() {
        return Ok(HashMap::new());
    }

    let raw: HashMap<String, serde_json::Value> =
        serde_json::from_slice(body).map_err(bad_request)?;
    Ok(raw
        .into_iter()
        .filter_map(|(k, v)| v.as_f64().map(|n| (k, n)))
        .collect())
}

fn parse_values(body: &Bytes) -> Result<Vec<String>, Response> {
    if body.is_empty() {
        return Ok(Vec::new());
    }

    let parsed: ValuesBody = serde_json::from_slice(body).map_err(bad_request)?;
    Ok(parsed.values)
}

fn ok_response(result: serde_json::Value) -> Response {
    (StatusCode::OK, Json(Envelope::ok(result))).into_response()
}

fn bad_request(err: impl std::fmt::Display) -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(Envelope::err(err.to_string())),
    )
        .into_response()
}

fn error_response(err: SketchError) -> Response {
    let status = match &err {
        SketchError::NotFound(..) => StatusCode::NOT_FOUND,
        e if e.is_user() => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, Json(Envelope::err(err.to_string()))).into_response()
}
