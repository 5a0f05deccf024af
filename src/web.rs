use crate::engine::TurnReply;
use crate::illustration::ImageBackend;
use crate::service::EscapeRoom;
use crate::sessions::generate_session_id;
use axum::{
    Json, Router,
    extract::State,
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use cookie::{Cookie, SameSite};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal;
use tower_http::compression::CompressionLayer;
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tracing::info;

pub const SESSION_COOKIE: &str = "escape_session";
const MAX_INPUT_CHARS: usize = 500;

#[derive(Debug)]
pub enum WebError {
    Io(std::io::Error),
    Addr(std::net::AddrParseError),
}

impl fmt::Display for WebError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WebError::Io(err) => write!(f, "io error: {err}"),
            WebError::Addr(err) => write!(f, "invalid listen address: {err}"),
        }
    }
}

impl std::error::Error for WebError {}

impl From<std::io::Error> for WebError {
    fn from(value: std::io::Error) -> Self {
        WebError::Io(value)
    }
}

impl From<std::net::AddrParseError> for WebError {
    fn from(value: std::net::AddrParseError) -> Self {
        WebError::Addr(value)
    }
}

pub fn parse_addr(addr: &str) -> Result<SocketAddr, WebError> {
    Ok(addr.parse()?)
}

pub async fn serve<B>(service: Arc<EscapeRoom<B>>, addr: SocketAddr) -> Result<(), WebError>
where
    B: ImageBackend + 'static,
{
    let store = service.store().clone();
    let router = build_router(service);
    info!(%addr, "Binding HTTP listener");
    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    store.snapshot().await;
    info!("HTTP server exited");
    Ok(())
}

#[derive(Debug)]
struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let payload = json!({ "error": self.message });
        (self.status, Json(payload)).into_response()
    }
}

fn build_router<B>(state: Arc<EscapeRoom<B>>) -> Router
where
    B: ImageBackend + 'static,
{
    Router::new()
        .route("/api/turn", post(api_turn::<B>))
        .route("/api/session/reset", post(api_reset::<B>))
        .route("/api/elements", get(api_elements::<B>))
        .route("/api/themes", get(api_themes::<B>))
        .route("/healthz", get(health))
        .with_state(state)
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().include_headers(true))
                .on_response(DefaultOnResponse::new().include_headers(true)),
        )
        .layer(CompressionLayer::new())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = signal::ctrl_c().await;
    };
    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        if let Ok(mut stream) = signal(SignalKind::terminate()) {
            let _ = stream.recv().await;
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

async fn health() -> impl IntoResponse {
    Json(json!({ "status": "ok", "service": "escape-room-web" }))
}

#[derive(Debug, Deserialize)]
struct TurnRequest {
    input: String,
}

async fn api_turn<B: ImageBackend + 'static>(
    State(state): State<Arc<EscapeRoom<B>>>,
    headers: HeaderMap,
    Json(request): Json<TurnRequest>,
) -> Result<Response, ApiError> {
    if request.input.chars().count() > MAX_INPUT_CHARS {
        return Err(ApiError::bad_request(format!(
            "Input is limited to {MAX_INPUT_CHARS} characters"
        )));
    }
    let (session_id, issued) = match session_from_headers(&headers) {
        Some(id) => (id, false),
        None => (generate_session_id(), true),
    };
    let reply = state.handle_turn(&session_id, &request.input).await;
    Ok(turn_response(&reply, issued.then_some(session_id.as_str())))
}

fn turn_response(reply: &TurnReply, new_session: Option<&str>) -> Response {
    match new_session {
        Some(id) => ([(header::SET_COOKIE, session_cookie(id))], Json(reply.view())).into_response(),
        None => Json(reply.view()).into_response(),
    }
}

async fn api_reset<B: ImageBackend + 'static>(
    State(state): State<Arc<EscapeRoom<B>>>,
    headers: HeaderMap,
) -> impl IntoResponse {
    let removed = session_from_headers(&headers)
        .map(|id| state.reset_session(&id))
        .unwrap_or(false);
    let expired = Cookie::build((SESSION_COOKIE, ""))
        .path("/")
        .max_age(cookie::time::Duration::ZERO)
        .build();
    (
        [(header::SET_COOKIE, expired.to_string())],
        Json(json!({ "reset": removed })),
    )
}

#[derive(Debug, Serialize, Deserialize)]
struct ElementsPayload {
    elements: Vec<String>,
}

async fn api_elements<B: ImageBackend + 'static>(
    State(state): State<Arc<EscapeRoom<B>>>,
) -> Json<ElementsPayload> {
    let elements = state
        .catalog()
        .element_names()
        .into_iter()
        .map(str::to_string)
        .collect();
    Json(ElementsPayload { elements })
}

#[derive(Debug, Serialize, Deserialize)]
struct ThemeSummary {
    number: usize,
    name: String,
    description: String,
    rooms: usize,
}

async fn api_themes<B: ImageBackend + 'static>(
    State(state): State<Arc<EscapeRoom<B>>>,
) -> Json<Vec<ThemeSummary>> {
    let themes = state
        .catalog()
        .themes()
        .iter()
        .enumerate()
        .map(|(idx, theme)| ThemeSummary {
            number: idx + 1,
            name: theme.name().to_string(),
            description: theme.description().to_string(),
            rooms: theme.rooms().len(),
        })
        .collect();
    Json(themes)
}

fn session_from_headers(headers: &HeaderMap) -> Option<String> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|raw| Cookie::split_parse(raw.to_string()))
        .filter_map(Result::ok)
        .find(|cookie| cookie.name() == SESSION_COOKIE && !cookie.value().is_empty())
        .map(|cookie| cookie.value().to_string())
}

fn session_cookie(id: &str) -> String {
    Cookie::build((SESSION_COOKIE, id.to_string()))
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax)
        .build()
        .to_string()
}
