//! Mind Cycle Server - habit, journal and community backend
//!
//! A wellness tracking service using:
//! - Sled embedded database for guest-scope records
//! - A remote document store (or an in-process one) for account records
//! - Gemini generateContent for journal insights and support chat
//! - Axum for the HTTP API

use axum::{
    extract::{FromRequestParts, Path, State},
    http::{request::Parts, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, patch, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::{net::SocketAddr, sync::Arc};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

mod advisory;
mod config;
mod models;
mod records;
mod slices;
mod storage;

use advisory::{Advisor, ChatMessage, ChatMode, ChatReply, GeminiClient};
use config::AppConfig;
use models::{Habit, JournalEntry, LogKind, Post, Stored};
use records::{RecordError, RecordService, Session};
use slices::{AppStore, SessionRegistry, SliceState};
use storage::{
    CloudStore, DocumentClient, GuestStore, HttpDocumentClient, MemoryDocumentClient, Payload,
};

// ============================================================================
// APPLICATION STATE
// ============================================================================

/// Shared application state
pub struct AppState {
    /// Live per-session stores
    registry: SessionRegistry,
    /// Chat advisor
    advisor: Advisor,
    /// Server start time
    started_at: std::time::Instant,
}

impl AppState {
    pub fn new(records: RecordService, advisor: Advisor) -> Self {
        Self {
            registry: SessionRegistry::new(records, advisor.clone()),
            advisor,
            started_at: std::time::Instant::now(),
        }
    }

    /// Store of an open session. Data routes never open one implicitly.
    fn store(&self, session: &Session) -> ApiResult<Arc<AppStore>> {
        self.registry.store_for(session).ok_or_else(|| {
            ApiError::NotFound(format!(
                "no open {} session for {}",
                if session.is_guest { "guest" } else { "account" },
                session.owner_id
            ))
        })
    }
}

// ============================================================================
// ERRORS
// ============================================================================

#[derive(Debug)]
enum ApiError {
    BadRequest(String),
    NotFound(String),
    Record(RecordError),
}

impl From<RecordError> for ApiError {
    fn from(err: RecordError) -> Self {
        ApiError::Record(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::Record(err @ RecordError::NotFound { .. }) => {
                (StatusCode::NOT_FOUND, err.to_string())
            }
            ApiError::Record(RecordError::Backend(msg)) => (StatusCode::BAD_GATEWAY, msg),
        };
        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

// ============================================================================
// SESSION EXTRACTION
// ============================================================================

const HEADER_OWNER_ID: &str = "x-owner-id";
const HEADER_GUEST: &str = "x-guest";

/// Caller session taken from the `x-owner-id` and `x-guest` headers
struct SessionHeaders(Session);

#[axum::async_trait]
impl<S> FromRequestParts<S> for SessionHeaders
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let owner_id = parts
            .headers
            .get(HEADER_OWNER_ID)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .ok_or_else(|| ApiError::BadRequest(format!("missing {} header", HEADER_OWNER_ID)))?;

        let is_guest = parts
            .headers
            .get(HEADER_GUEST)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.trim().eq_ignore_ascii_case("true") || v.trim() == "1")
            .unwrap_or(false);

        Ok(SessionHeaders(Session {
            owner_id: owner_id.to_string(),
            is_guest,
        }))
    }
}

// ============================================================================
// API TYPES
// ============================================================================

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: String,
    version: String,
    uptime_seconds: u64,
    active_sessions: usize,
    advisory_enabled: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OpenSessionRequest {
    owner_id: Option<String>,
    #[serde(default)]
    is_guest: bool,
}

#[derive(Debug, Serialize)]
struct SessionResponse {
    session: Session,
    habits: SliceState<Habit>,
    journal: SliceState<JournalEntry>,
    posts: SliceState<Post>,
}

impl SessionResponse {
    fn from_store(store: &AppStore) -> Self {
        Self {
            session: store.session().clone(),
            habits: store.habits.state().snapshot(),
            journal: store.journal.state().snapshot(),
            posts: store.community.state().snapshot(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct LogRequest {
    #[serde(rename = "type")]
    kind: LogKind,
    notes: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CommentRequest {
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatRequest {
    #[serde(default)]
    history: Vec<ChatMessage>,
    message: String,
}

#[derive(Debug, Serialize)]
struct Deleted {
    id: String,
}

// ============================================================================
// HTTP HANDLERS
// ============================================================================

/// Health check endpoint
async fn health_check(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: state.started_at.elapsed().as_secs(),
        active_sessions: state.registry.session_count(),
        advisory_enabled: state.advisor.is_available(),
    })
}

/// Open a session and load its slices
async fn open_session(
    State(state): State<Arc<AppState>>,
    Json(request): Json<OpenSessionRequest>,
) -> ApiResult<(StatusCode, Json<SessionResponse>)> {
    let owner_id = match request.owner_id.filter(|id| !id.trim().is_empty()) {
        Some(id) => id,
        None if request.is_guest => format!("guest-{}", chrono::Utc::now().timestamp_millis()),
        None => return Err(ApiError::BadRequest("ownerId is required".to_string())),
    };
    let session = Session {
        owner_id,
        is_guest: request.is_guest,
    };

    let store = state.registry.open(session).await;
    Ok((StatusCode::CREATED, Json(SessionResponse::from_store(&store))))
}

/// Current slice state of an open session
async fn get_session(
    State(state): State<Arc<AppState>>,
    Path(owner_id): Path<String>,
) -> ApiResult<Json<SessionResponse>> {
    let store = state
        .registry
        .get(&owner_id)
        .ok_or_else(|| ApiError::NotFound(format!("no open session for {}", owner_id)))?;
    Ok(Json(SessionResponse::from_store(&store)))
}

/// Clear the recorded error on every slice of an open session
async fn clear_session_errors(
    State(state): State<Arc<AppState>>,
    Path(owner_id): Path<String>,
) -> ApiResult<Json<SessionResponse>> {
    let store = state
        .registry
        .get(&owner_id)
        .ok_or_else(|| ApiError::NotFound(format!("no open session for {}", owner_id)))?;
    store.habits.state().clear_error();
    store.journal.state().clear_error();
    store.community.state().clear_error();
    Ok(Json(SessionResponse::from_store(&store)))
}

/// Tear down a session's in-memory state
async fn close_session(
    State(state): State<Arc<AppState>>,
    Path(owner_id): Path<String>,
) -> ApiResult<StatusCode> {
    if state.registry.close(&owner_id) {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::NotFound(format!("no open session for {}", owner_id)))
    }
}

async fn list_habits(
    State(state): State<Arc<AppState>>,
    SessionHeaders(session): SessionHeaders,
) -> ApiResult<Json<Vec<Stored<Habit>>>> {
    Ok(Json(state.store(&session)?.habits.fetch().await?))
}

async fn create_habit(
    State(state): State<Arc<AppState>>,
    SessionHeaders(session): SessionHeaders,
    Json(habit): Json<Habit>,
) -> ApiResult<(StatusCode, Json<Stored<Habit>>)> {
    let created = state.store(&session)?.habits.add(habit).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

async fn update_habit(
    State(state): State<Arc<AppState>>,
    SessionHeaders(session): SessionHeaders,
    Path(id): Path<String>,
    Json(patch): Json<Payload>,
) -> ApiResult<Json<Stored<Habit>>> {
    Ok(Json(state.store(&session)?.habits.update(&id, patch).await?))
}

async fn delete_habit(
    State(state): State<Arc<AppState>>,
    SessionHeaders(session): SessionHeaders,
    Path(id): Path<String>,
) -> ApiResult<Json<Deleted>> {
    let id = state.store(&session)?.habits.delete(&id).await?;
    Ok(Json(Deleted { id }))
}

async fn log_habit(
    State(state): State<Arc<AppState>>,
    SessionHeaders(session): SessionHeaders,
    Path(id): Path<String>,
    Json(request): Json<LogRequest>,
) -> ApiResult<Json<Stored<Habit>>> {
    let habit = state
        .store(&session)?
        .habits
        .log(&id, request.kind, request.notes)
        .await?;
    Ok(Json(habit))
}

async fn list_journal(
    State(state): State<Arc<AppState>>,
    SessionHeaders(session): SessionHeaders,
) -> ApiResult<Json<Vec<Stored<JournalEntry>>>> {
    Ok(Json(state.store(&session)?.journal.fetch().await?))
}

async fn create_journal_entry(
    State(state): State<Arc<AppState>>,
    SessionHeaders(session): SessionHeaders,
    Json(entry): Json<JournalEntry>,
) -> ApiResult<(StatusCode, Json<Stored<JournalEntry>>)> {
    let created = state.store(&session)?.journal.add(entry).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

async fn update_journal_entry(
    State(state): State<Arc<AppState>>,
    SessionHeaders(session): SessionHeaders,
    Path(id): Path<String>,
    Json(patch): Json<Payload>,
) -> ApiResult<Json<Stored<JournalEntry>>> {
    Ok(Json(state.store(&session)?.journal.update(&id, patch).await?))
}

async fn delete_journal_entry(
    State(state): State<Arc<AppState>>,
    SessionHeaders(session): SessionHeaders,
    Path(id): Path<String>,
) -> ApiResult<Json<Deleted>> {
    let id = state.store(&session)?.journal.delete(&id).await?;
    Ok(Json(Deleted { id }))
}

async fn list_posts(
    State(state): State<Arc<AppState>>,
    SessionHeaders(session): SessionHeaders,
) -> ApiResult<Json<Vec<Stored<Post>>>> {
    Ok(Json(state.store(&session)?.community.fetch_posts().await?))
}

async fn create_post(
    State(state): State<Arc<AppState>>,
    SessionHeaders(session): SessionHeaders,
    Json(post): Json<Post>,
) -> ApiResult<(StatusCode, Json<Stored<Post>>)> {
    if post.title.trim().is_empty() || post.content.trim().is_empty() {
        return Err(ApiError::BadRequest("post title and content are required".to_string()));
    }
    let created = state.store(&session)?.community.add_post(post).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

async fn add_comment(
    State(state): State<Arc<AppState>>,
    SessionHeaders(session): SessionHeaders,
    Path(id): Path<String>,
    Json(request): Json<CommentRequest>,
) -> ApiResult<Json<Stored<Post>>> {
    let content = request.content.trim();
    if content.is_empty() {
        return Err(ApiError::BadRequest("comment content is empty".to_string()));
    }
    let post = state
        .store(&session)?
        .community
        .add_comment(&id, content)
        .await?;
    Ok(Json(post))
}

async fn like_post(
    State(state): State<Arc<AppState>>,
    SessionHeaders(session): SessionHeaders,
    Path(id): Path<String>,
) -> ApiResult<Json<Stored<Post>>> {
    Ok(Json(state.store(&session)?.community.like_post(&id).await?))
}

async fn unlike_post(
    State(state): State<Arc<AppState>>,
    SessionHeaders(session): SessionHeaders,
    Path(id): Path<String>,
) -> ApiResult<Json<Stored<Post>>> {
    Ok(Json(state.store(&session)?.community.unlike_post(&id).await?))
}

async fn chat(state: &AppState, mode: ChatMode, request: ChatRequest) -> ApiResult<Json<ChatReply>> {
    state
        .advisor
        .chat_reply(mode, &request.history, &request.message)
        .await
        .map(Json)
        .ok_or_else(|| ApiError::BadRequest("message is empty".to_string()))
}

async fn support_chat(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ChatRequest>,
) -> ApiResult<Json<ChatReply>> {
    chat(&state, ChatMode::Support, request).await
}

async fn panic_chat(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ChatRequest>,
) -> ApiResult<Json<ChatReply>> {
    chat(&state, ChatMode::Panic, request).await
}

// ============================================================================
// ROUTER
// ============================================================================

fn router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers(Any);

    Router::new()
        // Health check
        .route("/health", get(health_check))
        // Session lifecycle
        .route("/api/sessions", post(open_session))
        .route(
            "/api/sessions/:owner_id",
            get(get_session).delete(close_session),
        )
        .route(
            "/api/sessions/:owner_id/errors",
            axum::routing::delete(clear_session_errors),
        )
        // Habits
        .route("/api/habits", get(list_habits).post(create_habit))
        .route("/api/habits/:id", patch(update_habit).delete(delete_habit))
        .route("/api/habits/:id/logs", post(log_habit))
        // Journal
        .route("/api/journal", get(list_journal).post(create_journal_entry))
        .route(
            "/api/journal/:id",
            patch(update_journal_entry).delete(delete_journal_entry),
        )
        // Community
        .route("/api/posts", get(list_posts).post(create_post))
        .route("/api/posts/:id/comments", post(add_comment))
        .route("/api/posts/:id/likes", post(like_post).delete(unlike_post))
        // Chat
        .route("/api/chat/support", post(support_chat))
        .route("/api/chat/panic", post(panic_chat))
        .with_state(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

// ============================================================================
// MAIN
// ============================================================================

fn build_advisor(config: &AppConfig) -> Advisor {
    match config.gemini.clone().map(GeminiClient::new) {
        Some(Ok(client)) => {
            info!("Gemini configured from environment");
            Advisor::new(Arc::new(client))
        }
        Some(Err(e)) => {
            warn!("Gemini client unavailable ({}) - insights will use placeholders", e);
            Advisor::disabled()
        }
        None => {
            warn!("GEMINI_API_KEY not set - insights will use placeholders");
            Advisor::disabled()
        }
    }
}

fn build_cloud_store(config: &AppConfig) -> anyhow::Result<CloudStore> {
    let client: Arc<dyn DocumentClient> = match &config.cloud {
        Some(cloud) => {
            info!("Cloud store: {}", cloud.base_url);
            Arc::new(HttpDocumentClient::new(&cloud.base_url, cloud.token.clone())?)
        }
        None => {
            warn!("CLOUD_STORE_URL not set - account records are kept in memory only");
            Arc::new(MemoryDocumentClient::new())
        }
    };
    Ok(CloudStore::new(client))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "mindcycle_server=info,tower_http=info".into()),
        )
        .init();

    // Load environment variables
    dotenvy::dotenv().ok();

    let config = AppConfig::from_env()?;

    info!("Initializing guest storage at: {}", config.storage.path);
    let guest = GuestStore::open(config.storage.clone())?;
    info!("Guest storage initialized successfully");

    let cloud = build_cloud_store(&config)?;
    let records = RecordService::new(Arc::new(guest), Arc::new(cloud));
    let state = Arc::new(AppState::new(records, build_advisor(&config)));

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));

    info!("Mind Cycle server v{} starting", env!("CARGO_PKG_VERSION"));
    info!("   Listening on: http://{}", addr);
    info!("   Health check: http://{}/health", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router(state)).await?;
    Ok(())
}
