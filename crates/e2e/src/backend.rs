//! In-process stand-in for the studio backend.
//!
//! Serves the draft, set-log, personal-record and history endpoints plus the
//! `/api/ws` hub on an ephemeral port. State is inspectable from tests, and
//! failure injection (`fail_pushes`) lets tests exercise the retry path.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicI64, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::Router;
use chrono::{DateTime, Utc};
use futures_util::{SinkExt, StreamExt};
use liftlog_api_types::{
    ApiError, ClientEvent, DraftQuery, DraftResponse, ExerciseHistory, ExerciseHistoryResponse,
    HistorySet, LogSetRequest, LogSetResponse, OkResponse, PersonalRecord,
    PersonalRecordCheckRequest, PersonalRecordsResponse, SaveDraftRequest, ServerEvent,
};
use serde::Deserialize;
use tokio::sync::broadcast;
use tower_http::trace::TraceLayer;
use tracing::debug;

/// A draft as the backend stored it, envelope timestamp included.
#[derive(Debug, Clone)]
pub struct StoredDraft {
    pub request: SaveDraftRequest,
    pub updated_at: DateTime<Utc>,
}

struct StudioState {
    draft: Mutex<Option<StoredDraft>>,
    next_set_id: AtomicI64,
    logged_sets: Mutex<Vec<LogSetRequest>>,
    fail_pushes: AtomicU32,
    draft_posts: AtomicU32,
    draft_gets: Mutex<Vec<DraftQuery>>,
    history: Mutex<HashMap<i64, Vec<HistorySet>>>,
    records: Mutex<Vec<PersonalRecord>>,
    client_events: Mutex<Vec<ClientEvent>>,
    hub: broadcast::Sender<String>,
}

impl StudioState {
    fn new() -> Self {
        let (hub, _) = broadcast::channel(64);
        Self {
            draft: Mutex::new(None),
            next_set_id: AtomicI64::new(101),
            logged_sets: Mutex::new(Vec::new()),
            fail_pushes: AtomicU32::new(0),
            draft_posts: AtomicU32::new(0),
            draft_gets: Mutex::new(Vec::new()),
            history: Mutex::new(HashMap::new()),
            records: Mutex::new(Vec::new()),
            client_events: Mutex::new(Vec::new()),
            hub,
        }
    }
}

/// Handle to a running fake backend.
pub struct FakeStudio {
    state: Arc<StudioState>,
    base_url: String,
}

impl FakeStudio {
    /// Binds an ephemeral port and serves the studio API on it.
    pub async fn spawn() -> Self {
        let state = Arc::new(StudioState::new());
        let app = router(state.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind fake studio");
        let addr = listener.local_addr().expect("fake studio addr");
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });
        Self {
            state,
            base_url: format!("http://{addr}"),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Makes the next `count` draft saves answer with a 500.
    pub fn fail_pushes(&self, count: u32) {
        self.state.fail_pushes.store(count, Ordering::SeqCst);
    }

    /// Number of draft saves attempted so far, failed ones included.
    pub fn draft_posts(&self) -> u32 {
        self.state.draft_posts.load(Ordering::SeqCst)
    }

    /// Query carried by every draft read so far, in arrival order.
    pub fn draft_gets(&self) -> Vec<DraftQuery> {
        self.state
            .draft_gets
            .lock()
            .expect("studio state poisoned")
            .clone()
    }

    pub fn draft(&self) -> Option<StoredDraft> {
        self.state.draft.lock().expect("studio state poisoned").clone()
    }

    /// Installs a draft directly, bypassing the save endpoint.
    pub fn seed_draft(&self, request: SaveDraftRequest, updated_at: DateTime<Utc>) {
        *self.state.draft.lock().expect("studio state poisoned") =
            Some(StoredDraft { request, updated_at });
    }

    pub fn logged_sets(&self) -> Vec<LogSetRequest> {
        self.state
            .logged_sets
            .lock()
            .expect("studio state poisoned")
            .clone()
    }

    pub fn set_history(&self, exercise_id: i64, sets: Vec<HistorySet>) {
        self.state
            .history
            .lock()
            .expect("studio state poisoned")
            .insert(exercise_id, sets);
    }

    pub fn set_records(&self, records: Vec<PersonalRecord>) {
        *self.state.records.lock().expect("studio state poisoned") = records;
    }

    /// Every client event any socket has delivered, in arrival order.
    pub fn client_events(&self) -> Vec<ClientEvent> {
        self.state
            .client_events
            .lock()
            .expect("studio state poisoned")
            .clone()
    }
}

fn router(state: Arc<StudioState>) -> Router {
    Router::new()
        .route(
            "/api/workouts/draft",
            get(get_draft).post(save_draft).delete(delete_draft),
        )
        .route("/api/workouts/sets", post(log_set))
        .route("/api/workouts/personal-records", post(personal_records))
        .route("/api/exercises/history", get(exercise_history))
        .route("/api/ws", get(ws_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ── HTTP handlers ────────────────────────────────────────────────────────────

async fn get_draft(
    State(state): State<Arc<StudioState>>,
    Query(query): Query<DraftQuery>,
) -> Response {
    state
        .draft_gets
        .lock()
        .expect("studio state poisoned")
        .push(query);
    let draft = state.draft.lock().expect("studio state poisoned");
    match draft.as_ref() {
        Some(stored) => {
            let start_time = stored
                .request
                .session_data
                .get("startTime")
                .and_then(|value| value.as_str())
                .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
                .map(|parsed| parsed.with_timezone(&Utc))
                .unwrap_or(stored.updated_at);
            Json(DraftResponse {
                session_data: stored.request.session_data.clone(),
                training_id: stored.request.training_id,
                workout_plan_id: stored.request.workout_plan_id,
                start_time,
                updated_at: stored.updated_at,
            })
            .into_response()
        }
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

async fn save_draft(
    State(state): State<Arc<StudioState>>,
    Json(request): Json<SaveDraftRequest>,
) -> Response {
    state.draft_posts.fetch_add(1, Ordering::SeqCst);
    let inject_failure = state
        .fail_pushes
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| {
            if left > 0 { Some(left - 1) } else { None }
        })
        .is_ok();
    if inject_failure {
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ApiError {
                error: "draft store unavailable".to_string(),
            }),
        )
            .into_response();
    }
    *state.draft.lock().expect("studio state poisoned") = Some(StoredDraft {
        request,
        updated_at: Utc::now(),
    });
    Json(OkResponse { ok: true }).into_response()
}

async fn delete_draft(State(state): State<Arc<StudioState>>) -> Json<OkResponse> {
    *state.draft.lock().expect("studio state poisoned") = None;
    Json(OkResponse { ok: true })
}

async fn log_set(
    State(state): State<Arc<StudioState>>,
    Json(request): Json<LogSetRequest>,
) -> Json<LogSetResponse> {
    let id = state.next_set_id.fetch_add(1, Ordering::SeqCst);
    state
        .logged_sets
        .lock()
        .expect("studio state poisoned")
        .push(request);
    Json(LogSetResponse {
        id,
        performed_at: Utc::now(),
    })
}

async fn personal_records(
    State(state): State<Arc<StudioState>>,
    Json(request): Json<PersonalRecordCheckRequest>,
) -> Json<PersonalRecordsResponse> {
    let requested: HashSet<i64> = request.sets.iter().map(|set| set.exercise_id).collect();
    let records = state
        .records
        .lock()
        .expect("studio state poisoned")
        .iter()
        .filter(|record| requested.contains(&record.exercise_id))
        .cloned()
        .collect();
    Json(PersonalRecordsResponse { records })
}

#[derive(Debug, Deserialize)]
struct HistoryQuery {
    #[serde(default)]
    ids: String,
}

async fn exercise_history(
    State(state): State<Arc<StudioState>>,
    Query(query): Query<HistoryQuery>,
) -> Json<ExerciseHistoryResponse> {
    let history = state.history.lock().expect("studio state poisoned");
    let exercises = query
        .ids
        .split(',')
        .filter_map(|raw| raw.trim().parse::<i64>().ok())
        .map(|exercise_id| ExerciseHistory {
            exercise_id,
            recent_sets: history.get(&exercise_id).cloned().unwrap_or_default(),
        })
        .collect();
    Json(ExerciseHistoryResponse { exercises })
}

// ── Realtime hub ─────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct WsQuery {
    #[serde(default)]
    token: String,
}

async fn ws_handler(
    State(state): State<Arc<StudioState>>,
    Query(query): Query<WsQuery>,
    ws: WebSocketUpgrade,
) -> Response {
    if query.token.is_empty() {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    ws.on_upgrade(move |socket| client_connection(socket, state))
}

async fn client_connection(socket: WebSocket, state: Arc<StudioState>) {
    let (mut outgoing, mut incoming) = socket.split();
    let mut hub_rx = state.hub.subscribe();
    loop {
        tokio::select! {
            frame = incoming.next() => {
                match frame {
                    Some(Ok(Message::Text(text))) => handle_client_frame(text.as_str(), &state),
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    Some(Ok(_)) => {}
                }
            }
            relayed = hub_rx.recv() => {
                match relayed {
                    Ok(text) => {
                        if outgoing.send(Message::Text(text.into())).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        debug!(skipped, "ws hub receiver lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        }
    }
}

/// Records the event, then relays it. Updates and finishes are broadcast to
/// every connection, the sender's own included; a sync request is answered
/// with the stored draft replayed as an update from its author.
fn handle_client_frame(text: &str, state: &StudioState) {
    let Ok(event) = serde_json::from_str::<ClientEvent>(text) else {
        debug!(frame = text, "dropping unparseable client frame");
        return;
    };
    state
        .client_events
        .lock()
        .expect("studio state poisoned")
        .push(event.clone());
    match event {
        ClientEvent::SyncRequest { .. } => {
            let draft = state.draft.lock().expect("studio state poisoned");
            if let Some(reply) = draft.as_ref().and_then(draft_update_event) {
                broadcast_event(state, &reply);
            }
        }
        other => {
            if let Some(received) = other.into_received() {
                broadcast_event(state, &received);
            }
        }
    }
}

fn broadcast_event(state: &StudioState, event: &ServerEvent) {
    if let Ok(text) = serde_json::to_string(event) {
        let _ = state.hub.send(text);
    }
}

fn draft_update_event(stored: &StoredDraft) -> Option<ServerEvent> {
    let workout_plan_id = stored.request.workout_plan_id?;
    let sets_data = stored
        .request
        .session_data
        .get("setsData")
        .cloned()
        .unwrap_or_else(|| serde_json::Value::Object(Default::default()));
    Some(ServerEvent::UpdateReceived {
        workout_plan_id,
        training_id: stored.request.training_id,
        device_id: stored.request.device_id.clone(),
        sets_data,
    })
}
