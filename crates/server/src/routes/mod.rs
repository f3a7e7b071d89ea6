use axum::{
    body::Bytes,
    extract::{Query, State},
    http::{header, HeaderMap, Method, StatusCode, Uri},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::{json, Value};
use shared::ErrorBody;
use std::collections::HashMap;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::error::AppError;
use crate::state::AppState;

mod boards;
mod comments;
mod health;
pub mod path;
mod sessions;
mod topics;
mod users;
mod votes;

use path::{normalise_path, Route, PATH_HEADERS};

pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // Health check
        .route("/health", get(health::health_check))
        // Everything else goes through the resource dispatcher
        .fallback(handle)
        // Middleware
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// JSON reply with the headers every response carries
#[derive(Debug, Clone, PartialEq)]
pub struct Reply {
    pub status: StatusCode,
    pub body: Value,
}

impl Reply {
    pub fn new(status: StatusCode, body: impl Serialize) -> Self {
        let body = serde_json::to_value(body)
            .unwrap_or_else(|e| json!({ "error": format!("Failed to encode response: {}", e) }));
        Self { status, body }
    }

    pub fn ok(body: impl Serialize) -> Self {
        Self::new(StatusCode::OK, body)
    }

    pub fn created(body: impl Serialize) -> Self {
        Self::new(StatusCode::CREATED, body)
    }

    pub fn not_found(message: &str) -> Self {
        Self::new(StatusCode::NOT_FOUND, ErrorBody::new(message))
    }
}

impl IntoResponse for Reply {
    fn into_response(self) -> Response {
        (
            self.status,
            [
                (header::CONTENT_TYPE, "application/json"),
                (header::CACHE_CONTROL, "no-store"),
            ],
            self.body.to_string(),
        )
            .into_response()
    }
}

/// Transport-neutral view of an inbound request
#[derive(Debug, Clone)]
pub struct RouterRequest {
    pub method: Method,
    /// Places the path may be found, most authoritative first
    pub candidates: Vec<String>,
    pub query: HashMap<String, String>,
    pub body: Bytes,
}

impl RouterRequest {
    pub fn from_parts(method: Method, uri: &Uri, headers: &HeaderMap, body: Bytes) -> Self {
        let mut candidates = vec![uri.to_string()];
        for name in PATH_HEADERS {
            if let Some(value) = headers.get(name).and_then(|value| value.to_str().ok()) {
                candidates.push(value.to_string());
            }
        }

        let query = Query::<HashMap<String, String>>::try_from_uri(uri)
            .map(|Query(query)| query)
            .unwrap_or_default();

        Self {
            method,
            candidates,
            query,
            body,
        }
    }

    /// Parse the body. An empty body reads as `{}`.
    pub fn json<T: DeserializeOwned + Default>(&self) -> Result<T, AppError> {
        if self.body.iter().all(u8::is_ascii_whitespace) {
            return Ok(T::default());
        }
        serde_json::from_slice(&self.body).map_err(AppError::MalformedPayload)
    }
}

async fn handle(
    State(state): State<AppState>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Reply {
    dispatch(&state, RouterRequest::from_parts(method, &uri, &headers, body)).await
}

/// Route a request to its resource operation and wrap the result
pub async fn dispatch(state: &AppState, request: RouterRequest) -> Reply {
    let path = normalise_path(&request.candidates, &state.config.router.mount_prefix);
    let route = Route::parse(&path);
    tracing::debug!("{} {:?} resolved to {:?}", request.method, path, route);

    route_request(state, &route, &request)
        .await
        .unwrap_or_else(AppError::into_reply)
}

async fn route_request(
    state: &AppState,
    route: &Route,
    request: &RouterRequest,
) -> Result<Reply, AppError> {
    let store = state.store.as_ref();
    let id = route.id.as_deref();

    match (route.resource.as_deref(), &request.method) {
        (None | Some("sessions"), &Method::GET) => sessions::load(store, id, &request.query).await,
        (None | Some("sessions"), &Method::POST) => sessions::create(store, request.json()?).await,
        (Some("topics"), &Method::POST) => topics::create(store, request.json()?).await,
        (Some("topics"), &Method::PATCH) => topics::update(store, id, request.json()?).await,
        (Some("votes"), &Method::POST) => votes::cast(store, request.json()?).await,
        (Some("votes"), &Method::DELETE) => votes::retract(store, id).await,
        (Some("users"), &Method::POST) => users::register(store, request.json()?).await,
        (Some("comments"), &Method::POST) => comments::create(store, request.json()?).await,
        (Some("boards"), &Method::PATCH) => boards::update(store, id, request.json()?).await,
        _ => Ok(Reply::not_found("Not Found")),
    }
}

/// A path id that must be present for the operation
fn required_id<'a>(id: Option<&'a str>, message: &str) -> Result<&'a str, AppError> {
    id.filter(|id| !id.trim().is_empty())
        .ok_or_else(|| AppError::Validation(message.to_string()))
}
