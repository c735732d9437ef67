use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{delete, get, post, put};
use axum::{Json, Router};
use chrono::{Local, NaiveDate};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::deadlines;
use crate::error::TurnError;
use crate::profile::{Deadlines, ProfileFields, ProfileStore, UserProfile};
use crate::runtime::BackendRuntime;
use crate::sentiment::EmotionLabel;
use crate::session::{ReplySource, Session, SessionController, SessionState, Turn, TurnOutcome};
use crate::wellness;

type SharedSession = Arc<tokio::sync::Mutex<Session>>;

const EXPIRY_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

struct SessionEntry {
    session: SharedSession,
    last_active: Instant,
}

pub struct ServerState {
    pub controller: Arc<SessionController>,
    pub store: Arc<dyn ProfileStore>,
    pub deadline_window_days: i64,
    /// Zero keeps sessions until they are closed.
    session_idle_timeout: Duration,
    sessions: Mutex<HashMap<String, SessionEntry>>,
}

impl ServerState {
    pub fn new(runtime: &BackendRuntime) -> Self {
        Self {
            controller: runtime.controller.clone(),
            store: runtime.store.clone(),
            deadline_window_days: runtime.config.deadline_window_days,
            session_idle_timeout: runtime.config.session_idle_timeout(),
            sessions: Mutex::new(HashMap::new()),
        }
    }

    fn lock_sessions(
        &self,
    ) -> Result<std::sync::MutexGuard<'_, HashMap<String, SessionEntry>>, (StatusCode, String)>
    {
        self.sessions
            .lock()
            .map_err(|e| internal_error(anyhow!("Session table lock poisoned: {}", e)))
    }

    fn insert_session(&self, session: Session) -> Result<(), (StatusCode, String)> {
        let id = session.id().to_string();
        let entry = SessionEntry {
            session: Arc::new(tokio::sync::Mutex::new(session)),
            last_active: Instant::now(),
        };
        self.lock_sessions()?.insert(id, entry);
        Ok(())
    }

    /// Look up a session and mark it as used.
    fn touch_session(&self, session_id: &str) -> Result<SharedSession, (StatusCode, String)> {
        let mut sessions = self.lock_sessions()?;
        let entry = sessions
            .get_mut(session_id)
            .ok_or_else(|| session_not_found(session_id))?;
        entry.last_active = Instant::now();
        Ok(entry.session.clone())
    }

    /// Drop sessions idle past the timeout. Sessions with a turn in flight
    /// are kept. Returns how many were removed.
    pub fn expire_idle_sessions(&self) -> Result<usize, (StatusCode, String)> {
        if self.session_idle_timeout.is_zero() {
            return Ok(0);
        }
        let timeout = self.session_idle_timeout;
        let mut sessions = self.lock_sessions()?;
        let before = sessions.len();
        sessions.retain(|id, entry| {
            let keep = entry.last_active.elapsed() < timeout || entry.session.try_lock().is_err();
            if !keep {
                tracing::info!("Expired idle session {}", id);
            }
            keep
        });
        Ok(before - sessions.len())
    }
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
}

#[derive(Debug, Serialize)]
struct SessionView {
    id: String,
    user_id: Option<String>,
    state: SessionState,
    turn_count: usize,
}

impl From<&Session> for SessionView {
    fn from(session: &Session) -> Self {
        Self {
            id: session.id().to_string(),
            user_id: session.user_id().map(str::to_string),
            state: session.state(),
            turn_count: session.turns().len(),
        }
    }
}

#[derive(Debug, Serialize)]
struct CloseSessionResponse {
    closed: bool,
}

#[derive(Debug, Deserialize)]
struct SendMessageRequest {
    content: String,
}

#[derive(Debug, Serialize)]
struct TurnResponse {
    turn: Turn,
    emotion: EmotionLabel,
    fallback: bool,
    failure: Option<String>,
    summary_updated: bool,
    reminder: Option<String>,
    motivation: Option<&'static str>,
    campus_resource: Option<&'static str>,
}

impl From<TurnOutcome> for TurnResponse {
    fn from(outcome: TurnOutcome) -> Self {
        let failure = match &outcome.reply_source {
            ReplySource::Oracle => None,
            ReplySource::Fallback(failure) => Some(failure.to_string()),
        };
        Self {
            fallback: failure.is_some(),
            failure,
            summary_updated: outcome.summary.is_updated(),
            turn: outcome.turn,
            emotion: outcome.emotion,
            reminder: outcome.reminder,
            motivation: outcome.motivation,
            campus_resource: outcome.campus_resource,
        }
    }
}

#[derive(Debug, Deserialize)]
struct RecordDeadlineRequest {
    task: String,
    due: String,
}

#[derive(Debug, Deserialize)]
struct ReminderQuery {
    today: Option<String>,
}

#[derive(Debug, Serialize)]
struct ReminderResponse {
    upcoming: Vec<String>,
    text: String,
}

#[derive(Debug, Serialize)]
struct MotivationResponse {
    quote: &'static str,
}

pub fn router(state: Arc<ServerState>) -> Router {
    let api = Router::new()
        .route("/health", get(health))
        .route("/sessions", post(create_session))
        .route("/sessions/:id", delete(close_session))
        .route("/sessions/:id/profile", put(save_profile))
        .route("/sessions/:id/messages", post(submit_message))
        .route("/sessions/:id/turns", get(list_turns))
        .route("/profiles/:user_id", get(get_profile))
        .route("/profiles/:user_id/deadlines", put(record_deadline))
        .route("/profiles/:user_id/reminder", get(get_reminder))
        .route("/motivation", get(get_motivation))
        .with_state(state);

    Router::new().nest("/v1", api)
}

pub async fn serve_backend(runtime: BackendRuntime) -> Result<()> {
    let bind_addr = std::env::var("COMPANION_BACKEND_BIND")
        .unwrap_or_else(|_| "127.0.0.1:8787".to_string())
        .parse::<SocketAddr>()
        .context("Invalid COMPANION_BACKEND_BIND (expected host:port)")?;

    let state = Arc::new(ServerState::new(&runtime));
    if !state.session_idle_timeout.is_zero() {
        spawn_session_sweeper(state.clone());
    }
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(bind_addr)
        .await
        .with_context(|| format!("Failed to bind backend server to {}", bind_addr))?;
    tracing::info!("Companion backend listening on http://{}", bind_addr);
    axum::serve(listener, app)
        .await
        .context("Backend server failed")?;
    Ok(())
}

fn spawn_session_sweeper(state: Arc<ServerState>) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(EXPIRY_SWEEP_INTERVAL);
        loop {
            ticker.tick().await;
            if let Err((_, message)) = state.expire_idle_sessions() {
                tracing::error!("Session sweep failed: {}", message);
            }
        }
    });
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

async fn create_session(
    State(state): State<Arc<ServerState>>,
) -> Result<Json<SessionView>, (StatusCode, String)> {
    state.expire_idle_sessions()?;
    let session = Session::new();
    let view = SessionView::from(&session);
    state.insert_session(session)?;
    tracing::info!("Opened session {}", view.id);
    Ok(Json(view))
}

async fn close_session(
    State(state): State<Arc<ServerState>>,
    Path(session_id): Path<String>,
) -> Result<Json<CloseSessionResponse>, (StatusCode, String)> {
    match state.lock_sessions()?.remove(&session_id) {
        Some(_) => {
            tracing::info!("Closed session {}", session_id);
            Ok(Json(CloseSessionResponse { closed: true }))
        }
        None => Err(session_not_found(&session_id)),
    }
}

async fn save_profile(
    State(state): State<Arc<ServerState>>,
    Path(session_id): Path<String>,
    Json(fields): Json<ProfileFields>,
) -> Result<Json<SessionView>, (StatusCode, String)> {
    let handle = require_session(&state, &session_id)?;
    let mut session = handle.try_lock().map_err(|_| busy(&session_id))?;
    state
        .controller
        .save_profile(&mut session, &fields)
        .map_err(turn_error)?;
    Ok(Json(SessionView::from(&*session)))
}

async fn submit_message(
    State(state): State<Arc<ServerState>>,
    Path(session_id): Path<String>,
    Json(request): Json<SendMessageRequest>,
) -> Result<Json<TurnResponse>, (StatusCode, String)> {
    let handle = require_session(&state, &session_id)?;
    let mut session = handle.try_lock().map_err(|_| busy(&session_id))?;
    let outcome = state
        .controller
        .submit(&mut session, &request.content)
        .await
        .map_err(turn_error)?;
    Ok(Json(TurnResponse::from(outcome)))
}

async fn list_turns(
    State(state): State<Arc<ServerState>>,
    Path(session_id): Path<String>,
) -> Result<Json<Vec<Turn>>, (StatusCode, String)> {
    let handle = require_session(&state, &session_id)?;
    let session = handle.lock().await;
    Ok(Json(session.turns().to_vec()))
}

async fn get_profile(
    State(state): State<Arc<ServerState>>,
    Path(user_id): Path<String>,
) -> Result<Json<UserProfile>, (StatusCode, String)> {
    let record = state.store.get_record(&user_id).map_err(store_error)?;
    if record.is_empty() {
        return Err(not_found(format!("profile '{}' not found", user_id)));
    }
    Ok(Json(UserProfile::from_record(record)))
}

async fn record_deadline(
    State(state): State<Arc<ServerState>>,
    Path(user_id): Path<String>,
    Json(request): Json<RecordDeadlineRequest>,
) -> Result<Json<Deadlines>, (StatusCode, String)> {
    let due = deadlines::parse_due_date(&request.due).map_err(turn_error)?;
    let profile = deadlines::record_deadline(state.store.as_ref(), &user_id, &request.task, due)
        .map_err(turn_error)?;
    Ok(Json(profile.deadlines))
}

async fn get_reminder(
    State(state): State<Arc<ServerState>>,
    Path(user_id): Path<String>,
    Query(query): Query<ReminderQuery>,
) -> Result<Json<ReminderResponse>, (StatusCode, String)> {
    let today = match query.today.as_deref() {
        Some(raw) => deadlines::parse_due_date(raw).map_err(turn_error)?,
        None => Local::now().date_naive(),
    };
    let profile = state.store.get(&user_id).map_err(store_error)?;
    Ok(Json(reminder_for(&profile, today, state.deadline_window_days)))
}

async fn get_motivation() -> Json<MotivationResponse> {
    Json(MotivationResponse {
        quote: wellness::daily_motivation(),
    })
}

fn reminder_for(profile: &UserProfile, today: NaiveDate, window_days: i64) -> ReminderResponse {
    let upcoming = deadlines::upcoming(profile, today, window_days);
    ReminderResponse {
        text: deadlines::reminder_text(&upcoming),
        upcoming,
    }
}

fn require_session(
    state: &ServerState,
    session_id: &str,
) -> Result<SharedSession, (StatusCode, String)> {
    state.touch_session(session_id)
}

fn turn_error(error: TurnError) -> (StatusCode, String) {
    match error {
        TurnError::Validation(_) => (StatusCode::UNPROCESSABLE_ENTITY, error.to_string()),
        TurnError::StoreUnavailable(_) => (StatusCode::SERVICE_UNAVAILABLE, error.to_string()),
    }
}

fn store_error(error: anyhow::Error) -> (StatusCode, String) {
    turn_error(TurnError::store(error))
}

fn busy(session_id: &str) -> (StatusCode, String) {
    (
        StatusCode::CONFLICT,
        format!("session '{}' is waiting for a reply", session_id),
    )
}

fn session_not_found(session_id: &str) -> (StatusCode, String) {
    not_found(format!("session '{}' not found", session_id))
}

fn not_found(message: String) -> (StatusCode, String) {
    (StatusCode::NOT_FOUND, message)
}

fn internal_error(error: anyhow::Error) -> (StatusCode, String) {
    (StatusCode::INTERNAL_SERVER_ERROR, error.to_string())
}
