use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use liftlog_api_client::{push_draft_with_retry, ApiClient, ApiClientError, RetryPolicy};
use liftlog_api_types::{
    ClientEvent, CompletedSet, DraftQuery, DraftResponse, HistorySet, LogSetRequest,
    LogSetResponse, PersonalRecord, PersonalRecordCheckRequest, SaveDraftRequest, ServerEvent,
};
use liftlog_cache::WorkoutCache;
use liftlog_core::resolve::{is_abandoned, resolve, Candidate, Reconcile};
use liftlog_core::validate::validate_session;
use liftlog_core::{
    DeviceId, SessionSignature, SetKey, SetPatch, SyncStatus, WorkoutPlan, WorkoutSession,
};

use crate::config::EngineConfig;
use crate::handle::LifecycleEvent;

pub(crate) type PushOutcome = Result<(), ApiClientError>;

/// Where the session lifecycle currently stands. `Terminated` is only ever
/// observed mid-teardown; a finished engine settles back on `Idle`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Phase {
    #[default]
    Idle,
    Active {
        minimized: bool,
    },
    Terminated,
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("session already active")]
    SessionActive,
    #[error("no active session")]
    NoActiveSession,
    #[error("unknown plan exercise {plan_exercise_id}")]
    UnknownPlanExercise { plan_exercise_id: i64 },
    #[error("set numbers start at 1")]
    InvalidSetNumber,
    #[error("set {key} has no weight and reps to log")]
    SetNotLoggable { key: SetKey },
    #[error(transparent)]
    Api(#[from] ApiClientError),
    #[error("session engine is gone")]
    Closed,
}

/// Point-in-time view of the engine, published through a watch channel after
/// every state change.
#[derive(Debug, Clone, Default)]
pub struct EngineSnapshot {
    pub active_workout: Option<WorkoutSession>,
    pub minimized: bool,
    pub sync: SyncStatus,
    /// Recent performances per exercise id, newest first, for pre-filling
    /// empty set inputs.
    pub placeholders: HashMap<i64, Vec<HistorySet>>,
}

/// What a finished session amounted to.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkoutSummary {
    /// Sum of weight x reps over completed sets.
    pub total_volume: f64,
    pub duration: chrono::Duration,
    pub sets_logged: usize,
    pub personal_records: Vec<PersonalRecord>,
}

#[derive(Debug, Default)]
struct EngineState {
    phase: Phase,
    session: Option<WorkoutSession>,
    placeholders: HashMap<i64, Vec<HistorySet>>,
    sync: SyncStatus,
}

pub(crate) struct EngineChannels {
    pub outbound_tx: mpsc::Sender<ClientEvent>,
    pub signature_tx: watch::Sender<Option<SessionSignature>>,
    pub snapshot_tx: watch::Sender<EngineSnapshot>,
    pub push_done_tx: mpsc::Sender<PushOutcome>,
}

/// The session engine. Owned by a single task; all mutation goes through the
/// command loop in [`crate::scheduler`], so every operation here takes
/// `&mut self` without further locking.
pub struct Engine {
    state: EngineState,
    cache: Arc<WorkoutCache>,
    api: Arc<ApiClient>,
    policy: RetryPolicy,
    device_id: DeviceId,
    outbound_tx: mpsc::Sender<ClientEvent>,
    signature_tx: watch::Sender<Option<SessionSignature>>,
    snapshot_tx: watch::Sender<EngineSnapshot>,
    push_done_tx: mpsc::Sender<PushOutcome>,
    push_task: Option<JoinHandle<()>>,
    push_in_flight: bool,
    push_dirty: bool,
    abandon_after: chrono::Duration,
    autosave_interval: Duration,
}

impl Engine {
    pub(crate) fn new(
        config: &EngineConfig,
        cache: Arc<WorkoutCache>,
        api: Arc<ApiClient>,
        device_id: DeviceId,
        channels: EngineChannels,
    ) -> Self {
        Self {
            state: EngineState::default(),
            cache,
            api,
            policy: RetryPolicy {
                max_attempts: config.sync.max_attempts,
                base_delay: Duration::from_millis(config.sync.base_delay_ms),
            },
            device_id,
            outbound_tx: channels.outbound_tx,
            signature_tx: channels.signature_tx,
            snapshot_tx: channels.snapshot_tx,
            push_done_tx: channels.push_done_tx,
            push_task: None,
            push_in_flight: false,
            push_dirty: false,
            abandon_after: chrono::Duration::hours(config.session.abandon_after_hours),
            autosave_interval: Duration::from_secs(config.session.autosave_interval_secs),
        }
    }

    pub(crate) fn autosave_interval(&self) -> Duration {
        self.autosave_interval
    }

    pub(crate) fn has_active_session(&self) -> bool {
        self.state.session.is_some()
    }

    pub fn snapshot(&self) -> EngineSnapshot {
        EngineSnapshot {
            active_workout: self.state.session.clone(),
            minimized: matches!(self.state.phase, Phase::Active { minimized: true }),
            sync: self.state.sync.clone(),
            placeholders: self.state.placeholders.clone(),
        }
    }

    // ── Lifecycle operations ──────────────────────────────────────────────

    /// Begin a fresh session from a plan. Exactly one session can run at a
    /// time; starting over an active one is rejected.
    pub async fn start_session(
        &mut self,
        plan: &WorkoutPlan,
        training_id: Option<i64>,
    ) -> Result<(), EngineError> {
        if !matches!(self.state.phase, Phase::Idle) {
            return Err(EngineError::SessionActive);
        }

        let session = WorkoutSession::begin(plan, training_id, Utc::now());
        info!("starting session '{}' (plan {})", session.name, plan.id);

        self.state.placeholders = self.fetch_placeholders(&session).await;
        self.activate(session);
        self.persist_cycle();
        self.notify_update();
        self.publish();
        Ok(())
    }

    /// Resume whatever survives from a previous run: the cached copy, the
    /// remote draft, or neither. Invalid or abandoned records are purged from
    /// their own store before the two are compared, so a bad draft can never
    /// take a healthy cached session down with it.
    pub async fn resume(&mut self) -> Result<(), EngineError> {
        if !matches!(self.state.phase, Phase::Idle) {
            return Err(EngineError::SessionActive);
        }
        let now = Utc::now();

        let mut local = match self.cache.read() {
            Ok(session) => session,
            Err(e) => {
                warn!("could not read cached session: {e:#}");
                None
            }
        };
        if let Some(session) = &local {
            if is_abandoned(session, now, self.abandon_after) {
                info!(
                    "purging abandoned cached session ({}h old)",
                    session.elapsed(now).num_hours()
                );
                if let Err(e) = self.cache.write(None) {
                    warn!("failed to clear cached session: {e:#}");
                }
                local = None;
            }
        }

        let mut remote = self.fetch_remote(&self.draft_query()).await;
        if let Some(session) = &remote {
            // The cache validates on read; the draft store gets the same
            // treatment here before either candidate can win resolution.
            if let Err(errors) = validate_session(session) {
                warn!(
                    "purging structurally invalid remote draft: {}",
                    join_errors(&errors)
                );
                if let Err(e) = self.api.delete_draft(&self.draft_query()).await {
                    warn!("failed to delete invalid draft: {e}");
                }
                remote = None;
            }
        }
        if let Some(session) = &remote {
            if is_abandoned(session, now, self.abandon_after) {
                info!(
                    "purging abandoned remote draft ({}h old)",
                    session.elapsed(now).num_hours()
                );
                if let Err(e) = self.api.delete_draft(&self.draft_query()).await {
                    warn!("failed to delete abandoned draft: {e}");
                }
                remote = None;
            }
        }

        let Some(resolution) = resolve(local.map(Candidate::local), remote.map(Candidate::remote))
        else {
            debug!("no session to resume");
            return Ok(());
        };

        let mut session = resolution.winner;
        if let Err(errors) = validate_session(&session) {
            warn!(
                "resolved session failed validation, discarding both copies: {}",
                join_errors(&errors)
            );
            if let Err(e) = self.cache.write(None) {
                warn!("failed to clear cached session: {e:#}");
            }
            if let Err(e) = self.api.delete_draft(&self.draft_query()).await {
                warn!("failed to delete remote draft: {e}");
            }
            return Ok(());
        }
        session.order_exercises();

        info!(
            "resuming session '{}' from {:?}",
            session.name, resolution.source
        );
        self.state.placeholders = self.fetch_placeholders(&session).await;
        self.activate(session);

        // The cache always converges on the winner; the draft store is only
        // rewritten when an older remote copy lost to the local one.
        self.write_local();
        if resolution.reconcile == Reconcile::OverwriteRemote {
            self.spawn_push();
        }
        self.publish();
        Ok(())
    }

    /// Submit every filled-but-unlogged set, compute the summary, and tear the
    /// session down. The first submission failure aborts the finish with the
    /// session left running.
    pub async fn finish_session(&mut self) -> Result<WorkoutSummary, EngineError> {
        if self.state.session.is_none() {
            return Err(EngineError::NoActiveSession);
        }

        loop {
            let next = self
                .state
                .session
                .as_ref()
                .and_then(|s| s.pending_log_keys().into_iter().next());
            let Some(key) = next else { break };
            self.submit_set(key).await?;
        }

        let personal_records = self.check_records().await;

        let session = self
            .state
            .session
            .as_ref()
            .ok_or(EngineError::NoActiveSession)?;
        let summary = WorkoutSummary {
            total_volume: session.total_volume(),
            duration: session.elapsed(Utc::now()),
            sets_logged: session.sets_data.values().filter(|r| r.id.is_some()).count(),
            personal_records,
        };
        info!(
            "finishing session: {:.1} total volume across {} logged sets",
            summary.total_volume, summary.sets_logged
        );

        self.teardown(true).await;
        Ok(summary)
    }

    /// Discard the session without submitting anything.
    pub async fn cancel_session(&mut self) -> Result<(), EngineError> {
        if self.state.session.is_none() {
            return Err(EngineError::NoActiveSession);
        }
        info!("cancelling session");
        self.teardown(true).await;
        Ok(())
    }

    pub fn set_minimized(&mut self, minimized: bool) {
        if let Phase::Active { minimized: current } = &mut self.state.phase {
            if *current == minimized {
                return;
            }
            *current = minimized;
            if minimized {
                // Leaving the workout screen is a natural save point.
                self.persist_cycle();
            }
            self.publish();
        }
    }

    pub fn handle_lifecycle(&mut self, event: LifecycleEvent) {
        if self.state.session.is_none() {
            return;
        }
        match event {
            LifecycleEvent::EnteredBackground => debug!("app backgrounded, saving session"),
            LifecycleEvent::Terminating => info!("app terminating, saving session"),
            LifecycleEvent::ConnectivityRestored => info!("connectivity restored, syncing session"),
        }
        self.persist_cycle();
    }

    // ── Set operations ────────────────────────────────────────────────────

    /// Apply one field edit to a set. With no active session this is a no-op.
    /// The local cache is rewritten before this returns, so an edit survives
    /// a crash in the very next instant.
    pub fn update_set(&mut self, key: SetKey, patch: SetPatch) -> Result<(), EngineError> {
        let Some(session) = self.state.session.as_mut() else {
            debug!("ignoring set update with no active session");
            return Ok(());
        };
        if key.set_number == 0 {
            return Err(EngineError::InvalidSetNumber);
        }
        if session.exercise_id_for(key.plan_exercise_id).is_none() {
            return Err(EngineError::UnknownPlanExercise {
                plan_exercise_id: key.plan_exercise_id,
            });
        }

        session.apply(key, patch, Utc::now());
        self.write_local();
        self.spawn_push();
        self.notify_update();
        self.publish();
        Ok(())
    }

    /// Record one set on the backend performance log. Errors surface to the
    /// caller once; there is no hidden retry for set logging.
    pub async fn log_set(&mut self, key: SetKey) -> Result<(), EngineError> {
        if self.state.session.is_none() {
            return Err(EngineError::NoActiveSession);
        }
        self.submit_set(key).await?;
        self.spawn_push();
        self.notify_update();
        self.publish();
        Ok(())
    }

    async fn submit_set(&mut self, key: SetKey) -> Result<(), EngineError> {
        let Some(session) = self.state.session.as_ref() else {
            return Err(EngineError::NoActiveSession);
        };
        let Some(exercise_id) = session.exercise_id_for(key.plan_exercise_id) else {
            return Err(EngineError::UnknownPlanExercise {
                plan_exercise_id: key.plan_exercise_id,
            });
        };
        let Some((weight, reps)) = session
            .sets_data
            .get(&key)
            .and_then(|r| r.performed_weight.zip(r.performed_reps))
        else {
            return Err(EngineError::SetNotLoggable { key });
        };

        let request = LogSetRequest {
            exercise_id,
            plan_exercise_id: key.plan_exercise_id,
            set_number: key.set_number,
            weight,
            reps,
            workout_plan_id: Some(session.workout_plan_id),
            training_id: session.training_id,
        };
        let logged = self.api.log_set(&request).await?;
        debug!("logged set {key} as {}", logged.id);

        self.absorb_logged_set(key, weight, reps, &logged);
        self.write_local();
        Ok(())
    }

    /// Merge the backend's id and instant into the set and refresh the
    /// recent-performance index for its exercise.
    fn absorb_logged_set(&mut self, key: SetKey, weight: f64, reps: u32, logged: &LogSetResponse) {
        let Some(session) = self.state.session.as_mut() else {
            return;
        };
        let record = session.set_mut(key);
        record.id = Some(logged.id);
        record.performed_at = Some(logged.performed_at);
        record.is_completed = true;
        session.touch(Utc::now());
        let exercise_id = session.exercise_id_for(key.plan_exercise_id);

        if let Some(exercise_id) = exercise_id {
            let recent = self.state.placeholders.entry(exercise_id).or_default();
            recent.insert(
                0,
                HistorySet {
                    weight,
                    reps,
                    performed_at: logged.performed_at,
                },
            );
            recent.truncate(3);
        }
    }

    // ── Realtime events ───────────────────────────────────────────────────

    /// React to an event from another device. Events for a different session
    /// than the one running here are ignored outright.
    pub async fn handle_server_event(&mut self, event: ServerEvent) {
        let Some(session) = self.state.session.as_ref() else {
            return;
        };
        if event.signature() != session.signature() {
            debug!("ignoring realtime event for a different session");
            return;
        }

        match event {
            ServerEvent::UpdateReceived { device_id, .. } => {
                info!("update from device {device_id}, refreshing from draft store");
                self.refresh_from_remote().await;
            }
            ServerEvent::FinishedReceived { device_id, .. } => {
                info!("session finished on device {device_id}, clearing local state");
                self.teardown(false).await;
            }
        }
    }

    /// Replace the in-memory session with the authoritative draft copy.
    /// Concurrent edits made here since the other device's write are lost;
    /// last write wins at record granularity.
    async fn refresh_from_remote(&mut self) {
        let Some(signature) = self.state.session.as_ref().map(|s| s.signature()) else {
            return;
        };
        let Some(mut session) = self.fetch_remote(&self.signature_query(signature)).await else {
            warn!("draft store had no usable session, keeping current state");
            return;
        };
        if let Err(errors) = validate_session(&session) {
            warn!(
                "remote session failed validation, keeping current state: {}",
                join_errors(&errors)
            );
            return;
        }
        session.order_exercises();

        // Backends are free to ignore the query filters, so the answer is
        // checked against the running session either way.
        if session.signature() != signature {
            warn!("draft store now holds a different session, keeping current state");
            return;
        }

        self.state.session = Some(session);
        self.write_local();
        self.publish();
    }

    // ── Draft sync ────────────────────────────────────────────────────────

    /// Write the cache and kick off a remote push. One push runs at a time;
    /// changes made while one is in flight coalesce into a single follow-up.
    pub(crate) fn persist_cycle(&mut self) {
        if self.state.session.is_none() {
            return;
        }
        self.write_local();
        self.spawn_push();
    }

    fn write_local(&self) {
        if let Err(e) = self.cache.write(self.state.session.as_ref()) {
            warn!("failed to persist active session: {e:#}");
        }
    }

    fn spawn_push(&mut self) {
        let Some(session) = self.state.session.as_ref() else {
            return;
        };
        if self.push_in_flight {
            self.push_dirty = true;
            return;
        }
        let request = match draft_request(session, &self.device_id) {
            Ok(request) => request,
            Err(e) => {
                warn!("could not serialize session for draft push: {e}");
                return;
            }
        };

        let api = self.api.clone();
        let policy = self.policy.clone();
        let done = self.push_done_tx.clone();
        self.push_in_flight = true;
        self.push_task = Some(tokio::spawn(async move {
            let outcome = push_draft_with_retry(&api, &request, &policy).await;
            let _ = done.send(outcome).await;
        }));
    }

    /// Absorb the outcome of a background push.
    pub(crate) fn finish_push(&mut self, outcome: PushOutcome) {
        self.push_in_flight = false;
        self.push_task = None;
        if self.state.session.is_none() {
            // Outcome of a push that raced teardown.
            self.push_dirty = false;
            return;
        }

        match outcome {
            Ok(()) => self.state.sync = SyncStatus::ok(Utc::now()),
            Err(e) => {
                warn!("draft push failed: {e}");
                self.state.sync = SyncStatus::failed(e.to_string());
            }
        }
        if self.push_dirty {
            self.push_dirty = false;
            self.spawn_push();
        }
        self.publish();
    }

    // ── Internals ─────────────────────────────────────────────────────────

    fn activate(&mut self, session: WorkoutSession) {
        self.state.phase = Phase::Active { minimized: false };
        self.state.sync = SyncStatus::default();
        let _ = self.signature_tx.send(Some(session.signature()));
        self.state.session = Some(session);
    }

    /// Clear every store and go back to idle. `notify` controls whether peers
    /// hear a finished event; a teardown triggered *by* a peer stays silent.
    /// Remote failures are logged only: termination completes locally
    /// regardless.
    async fn teardown(&mut self, notify: bool) {
        self.state.phase = Phase::Terminated;
        let session = self.state.session.take();

        // A push still in flight must not resurrect the draft after delete.
        if let Some(task) = self.push_task.take() {
            task.abort();
        }
        self.push_in_flight = false;
        self.push_dirty = false;

        if let Err(e) = self.cache.write(None) {
            warn!("failed to clear cached session: {e:#}");
        }
        if let Err(e) = self.api.delete_draft(&self.draft_query()).await {
            warn!("failed to delete remote draft: {e}");
        }

        if notify {
            if let Some(session) = &session {
                self.notify(ClientEvent::Finished {
                    workout_plan_id: session.workout_plan_id,
                    training_id: session.training_id,
                    device_id: self.device_id.to_string(),
                });
            }
        }

        let _ = self.signature_tx.send(None);
        self.state.placeholders.clear();
        self.state.sync = SyncStatus::default();
        self.state.phase = Phase::Idle;
        self.publish();
    }

    async fn fetch_remote(&self, query: &DraftQuery) -> Option<WorkoutSession> {
        match self.api.get_draft(query).await {
            Ok(Some(draft)) => draft_session(draft),
            Ok(None) => None,
            Err(e) => {
                warn!("could not fetch remote draft: {e}");
                None
            }
        }
    }

    /// Recent history for every exercise in the plan. Best effort: a failure
    /// just means empty placeholders.
    async fn fetch_placeholders(&self, session: &WorkoutSession) -> HashMap<i64, Vec<HistorySet>> {
        let ids: Vec<i64> = session
            .plan_exercises
            .iter()
            .map(|pe| pe.exercise_id)
            .collect();
        if ids.is_empty() {
            return HashMap::new();
        }
        match self.api.exercise_history(&ids).await {
            Ok(history) => history
                .exercises
                .into_iter()
                .map(|h| (h.exercise_id, h.recent_sets))
                .collect(),
            Err(e) => {
                debug!("exercise history unavailable: {e}");
                HashMap::new()
            }
        }
    }

    /// Best-effort personal record check over the completed sets.
    async fn check_records(&self) -> Vec<PersonalRecord> {
        let Some(session) = self.state.session.as_ref() else {
            return Vec::new();
        };
        let sets: Vec<CompletedSet> = session
            .sets_data
            .values()
            .filter(|r| r.is_completed)
            .filter_map(|r| {
                let exercise_id = session.exercise_id_for(r.plan_exercise_id)?;
                Some(CompletedSet {
                    exercise_id,
                    weight: r.performed_weight?,
                    reps: r.performed_reps?,
                })
            })
            .collect();
        if sets.is_empty() {
            return Vec::new();
        }

        match self
            .api
            .check_personal_records(&PersonalRecordCheckRequest { sets })
            .await
        {
            Ok(resp) => resp.records,
            Err(e) => {
                warn!("personal record check failed: {e}");
                Vec::new()
            }
        }
    }

    fn draft_query(&self) -> DraftQuery {
        DraftQuery {
            device_id: Some(self.device_id.to_string()),
            ..Default::default()
        }
    }

    /// Query pinned to the running session, for re-pulls after a peer's edit.
    fn signature_query(&self, signature: SessionSignature) -> DraftQuery {
        DraftQuery {
            device_id: Some(self.device_id.to_string()),
            training_id: signature.training_id,
            workout_plan_id: Some(signature.workout_plan_id),
        }
    }

    fn notify(&self, event: ClientEvent) {
        if let Err(e) = self.outbound_tx.try_send(event) {
            debug!("realtime event dropped: {e}");
        }
    }

    fn notify_update(&self) {
        let Some(session) = self.state.session.as_ref() else {
            return;
        };
        let sets_data = match serde_json::to_value(&session.sets_data) {
            Ok(value) => value,
            Err(e) => {
                warn!("could not serialize sets for realtime update: {e}");
                return;
            }
        };
        self.notify(ClientEvent::Update {
            workout_plan_id: session.workout_plan_id,
            training_id: session.training_id,
            device_id: self.device_id.to_string(),
            sets_data,
        });
    }

    fn publish(&self) {
        self.snapshot_tx.send_replace(self.snapshot());
    }
}

fn draft_request(
    session: &WorkoutSession,
    device_id: &DeviceId,
) -> serde_json::Result<SaveDraftRequest> {
    Ok(SaveDraftRequest {
        device_id: device_id.to_string(),
        training_id: session.training_id,
        workout_plan_id: Some(session.workout_plan_id),
        session_data: serde_json::to_value(session)?,
    })
}

/// Decode the session inside a draft envelope. The envelope's `updatedAt` is
/// the server-side write instant and can postdate the embedded `lastUpdated`;
/// the later of the two is what conflict resolution compares.
fn draft_session(draft: DraftResponse) -> Option<WorkoutSession> {
    match serde_json::from_value::<WorkoutSession>(draft.session_data) {
        Ok(mut session) => {
            session.touch(draft.updated_at);
            Some(session)
        }
        Err(e) => {
            warn!("ignoring malformed remote draft: {e}");
            None
        }
    }
}

fn join_errors(errors: &[liftlog_core::validate::ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use liftlog_core::testing;

    struct TestEngine {
        engine: Engine,
        cache: Arc<WorkoutCache>,
        outbound_rx: mpsc::Receiver<ClientEvent>,
    }

    /// Engine wired to an unroutable backend: every HTTP call fails fast,
    /// which exercises all the best-effort paths.
    fn offline_engine() -> TestEngine {
        let dir = tempfile::tempdir().unwrap();
        let cache = Arc::new(WorkoutCache::open_path(&dir.keep().join("cache.db")).unwrap());

        let mut api = ApiClient::new("http://127.0.0.1:1", Duration::from_millis(250)).unwrap();
        api.set_auth("studio-key".to_string());

        let (outbound_tx, outbound_rx) = mpsc::channel(64);
        let (signature_tx, _signature_rx) = watch::channel(None);
        let (snapshot_tx, _snapshot_rx) = watch::channel(EngineSnapshot::default());
        let (push_done_tx, _push_done_rx) = mpsc::channel(8);

        let mut config = EngineConfig::default();
        config.sync.base_delay_ms = 1;

        let engine = Engine::new(
            &config,
            cache.clone(),
            Arc::new(api),
            DeviceId::from("dev-test".to_string()),
            EngineChannels {
                outbound_tx,
                signature_tx,
                snapshot_tx,
                push_done_tx,
            },
        );
        TestEngine {
            engine,
            cache,
            outbound_rx,
        }
    }

    fn drain(rx: &mut mpsc::Receiver<ClientEvent>) -> Vec<ClientEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    fn key(plan_exercise_id: i64, set_number: u32) -> SetKey {
        SetKey {
            plan_exercise_id,
            set_number,
        }
    }

    #[tokio::test]
    async fn test_start_rejects_second_session() {
        let mut rig = offline_engine();
        rig.engine
            .start_session(&testing::plan(), None)
            .await
            .unwrap();
        let err = rig
            .engine
            .start_session(&testing::plan(), None)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::SessionActive));
    }

    #[tokio::test]
    async fn test_start_announces_update() {
        let mut rig = offline_engine();
        rig.engine
            .start_session(&testing::plan(), Some(9))
            .await
            .unwrap();

        let events = drain(&mut rig.outbound_rx);
        assert_eq!(events.len(), 1);
        match &events[0] {
            ClientEvent::Update {
                workout_plan_id,
                training_id,
                device_id,
                ..
            } => {
                assert_eq!(*workout_plan_id, 42);
                assert_eq!(*training_id, Some(9));
                assert_eq!(device_id, "dev-test");
            }
            other => panic!("expected update, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_update_set_without_session_is_noop() {
        let mut rig = offline_engine();
        rig.engine
            .update_set(key(7, 1), SetPatch::Weight(Some(50.0)))
            .unwrap();
        assert!(rig.engine.snapshot().active_workout.is_none());
        assert!(rig.cache.read().unwrap().is_none());
    }

    #[tokio::test]
    async fn test_update_set_persists_before_returning() {
        let mut rig = offline_engine();
        rig.engine
            .start_session(&testing::plan(), None)
            .await
            .unwrap();
        rig.engine
            .update_set(key(7, 1), SetPatch::Weight(Some(52.5)))
            .unwrap();

        let cached = rig.cache.read().unwrap().unwrap();
        let record = cached.sets_data.get(&key(7, 1)).unwrap();
        assert_eq!(record.performed_weight, Some(52.5));
        assert!(!record.is_completed);
    }

    #[tokio::test]
    async fn test_update_set_rejects_unknown_exercise() {
        let mut rig = offline_engine();
        rig.engine
            .start_session(&testing::plan(), None)
            .await
            .unwrap();

        let err = rig
            .engine
            .update_set(key(999, 1), SetPatch::Weight(Some(50.0)))
            .unwrap_err();
        assert!(matches!(
            err,
            EngineError::UnknownPlanExercise {
                plan_exercise_id: 999
            }
        ));

        let err = rig
            .engine
            .update_set(key(7, 0), SetPatch::Weight(Some(50.0)))
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidSetNumber));
    }

    #[tokio::test]
    async fn test_log_set_requires_active_session() {
        let mut rig = offline_engine();
        let err = rig.engine.log_set(key(7, 1)).await.unwrap_err();
        assert!(matches!(err, EngineError::NoActiveSession));
    }

    #[tokio::test]
    async fn test_log_set_requires_weight_and_reps() {
        let mut rig = offline_engine();
        rig.engine
            .start_session(&testing::plan(), None)
            .await
            .unwrap();
        rig.engine
            .update_set(key(7, 1), SetPatch::Weight(Some(50.0)))
            .unwrap();

        let err = rig.engine.log_set(key(7, 1)).await.unwrap_err();
        assert!(matches!(err, EngineError::SetNotLoggable { .. }));
    }

    #[tokio::test]
    async fn test_log_set_surfaces_api_error_and_keeps_session() {
        let mut rig = offline_engine();
        rig.engine
            .start_session(&testing::plan(), None)
            .await
            .unwrap();
        rig.engine
            .update_set(key(7, 1), SetPatch::Weight(Some(50.0)))
            .unwrap();
        rig.engine
            .update_set(key(7, 1), SetPatch::Reps(Some(10)))
            .unwrap();

        let err = rig.engine.log_set(key(7, 1)).await.unwrap_err();
        assert!(matches!(err, EngineError::Api(_)));

        let snapshot = rig.engine.snapshot();
        let session = snapshot.active_workout.unwrap();
        assert!(session.sets_data.get(&key(7, 1)).unwrap().id.is_none());
    }

    #[tokio::test]
    async fn test_finish_aborts_on_submission_failure() {
        let mut rig = offline_engine();
        rig.engine
            .start_session(&testing::plan(), None)
            .await
            .unwrap();
        rig.engine
            .update_set(key(7, 1), SetPatch::Weight(Some(50.0)))
            .unwrap();
        rig.engine
            .update_set(key(7, 1), SetPatch::Reps(Some(10)))
            .unwrap();
        rig.engine
            .update_set(key(7, 1), SetPatch::Completed(true))
            .unwrap();

        let err = rig.engine.finish_session().await.unwrap_err();
        assert!(matches!(err, EngineError::Api(_)));

        // Session intact, nothing cleared.
        assert!(rig.engine.snapshot().active_workout.is_some());
        assert!(rig.cache.read().unwrap().is_some());
    }

    #[tokio::test]
    async fn test_finish_empty_session() {
        let mut rig = offline_engine();
        rig.engine
            .start_session(&testing::plan(), None)
            .await
            .unwrap();

        let summary = rig.engine.finish_session().await.unwrap();
        assert_eq!(summary.total_volume, 0.0);
        assert_eq!(summary.sets_logged, 0);
        assert!(summary.personal_records.is_empty());

        assert!(rig.engine.snapshot().active_workout.is_none());
        assert!(rig.cache.read().unwrap().is_none());
    }

    #[tokio::test]
    async fn test_cancel_clears_stores_and_notifies() {
        let mut rig = offline_engine();
        rig.engine
            .start_session(&testing::plan(), None)
            .await
            .unwrap();
        rig.engine
            .update_set(key(7, 1), SetPatch::Weight(Some(50.0)))
            .unwrap();
        rig.engine.cancel_session().await.unwrap();

        assert!(rig.engine.snapshot().active_workout.is_none());
        assert!(rig.cache.read().unwrap().is_none());

        let events = drain(&mut rig.outbound_rx);
        assert!(matches!(
            events.last(),
            Some(ClientEvent::Finished { workout_plan_id: 42, .. })
        ));
    }

    #[tokio::test]
    async fn test_cancel_without_session_errors() {
        let mut rig = offline_engine();
        let err = rig.engine.cancel_session().await.unwrap_err();
        assert!(matches!(err, EngineError::NoActiveSession));
    }

    #[tokio::test]
    async fn test_finished_received_tears_down_silently() {
        let mut rig = offline_engine();
        rig.engine
            .start_session(&testing::plan(), None)
            .await
            .unwrap();
        drain(&mut rig.outbound_rx);

        rig.engine
            .handle_server_event(ServerEvent::FinishedReceived {
                workout_plan_id: 42,
                training_id: None,
                device_id: "dev-other".to_string(),
            })
            .await;

        assert!(rig.engine.snapshot().active_workout.is_none());
        assert!(rig.cache.read().unwrap().is_none());
        // No finished echo back to the channel.
        assert!(drain(&mut rig.outbound_rx).is_empty());
    }

    #[tokio::test]
    async fn test_event_for_other_session_is_ignored() {
        let mut rig = offline_engine();
        rig.engine
            .start_session(&testing::plan(), None)
            .await
            .unwrap();

        rig.engine
            .handle_server_event(ServerEvent::FinishedReceived {
                workout_plan_id: 999,
                training_id: None,
                device_id: "dev-other".to_string(),
            })
            .await;
        assert!(rig.engine.snapshot().active_workout.is_some());

        // Same plan under a different training is a different session.
        rig.engine
            .handle_server_event(ServerEvent::FinishedReceived {
                workout_plan_id: 42,
                training_id: Some(5),
                device_id: "dev-other".to_string(),
            })
            .await;
        assert!(rig.engine.snapshot().active_workout.is_some());
    }

    #[tokio::test]
    async fn test_set_minimized_roundtrip() {
        let mut rig = offline_engine();
        rig.engine
            .start_session(&testing::plan(), None)
            .await
            .unwrap();

        rig.engine.set_minimized(true);
        assert!(rig.engine.snapshot().minimized);
        rig.engine.set_minimized(false);
        assert!(!rig.engine.snapshot().minimized);
    }

    #[tokio::test]
    async fn test_minimize_without_session_is_noop() {
        let mut rig = offline_engine();
        rig.engine.set_minimized(true);
        assert!(!rig.engine.snapshot().minimized);
    }

    #[tokio::test]
    async fn test_push_failure_marks_sync_status() {
        let mut rig = offline_engine();
        rig.engine
            .start_session(&testing::plan(), None)
            .await
            .unwrap();

        rig.engine.finish_push(Err(ApiClientError::Server {
            status: 503,
            body: "overloaded".to_string(),
        }));
        let sync = rig.engine.snapshot().sync;
        assert!(!sync.synced);
        assert!(sync.last_sync.is_none());
        assert!(sync.error.unwrap().contains("503"));

        rig.engine.finish_push(Ok(()));
        let sync = rig.engine.snapshot().sync;
        assert!(sync.synced);
        assert!(sync.last_sync.is_some());
        assert!(sync.error.is_none());
    }

    #[tokio::test]
    async fn test_resume_with_nothing_stays_idle() {
        let mut rig = offline_engine();
        rig.engine.resume().await.unwrap();
        assert!(rig.engine.snapshot().active_workout.is_none());
    }

    #[tokio::test]
    async fn test_resume_from_cache() {
        let mut rig = offline_engine();
        let mut session = testing::session_started_at(Utc::now() - chrono::Duration::hours(1));
        testing::completed_set(&mut session, 7, 1, 50.0, 10);
        rig.cache.write(Some(&session)).unwrap();

        rig.engine.resume().await.unwrap();
        let resumed = rig.engine.snapshot().active_workout.unwrap();
        assert_eq!(resumed.signature(), session.signature());
        assert_eq!(
            resumed.sets_data.get(&key(7, 1)).unwrap().performed_weight,
            Some(50.0)
        );
    }

    #[tokio::test]
    async fn test_resume_purges_abandoned_cache() {
        let mut rig = offline_engine();
        let session = testing::session_started_at(Utc::now() - chrono::Duration::hours(49));
        rig.cache.write(Some(&session)).unwrap();

        rig.engine.resume().await.unwrap();
        assert!(rig.engine.snapshot().active_workout.is_none());
        assert!(rig.cache.read().unwrap().is_none());
    }

    #[tokio::test]
    async fn test_resume_keeps_session_at_threshold_edge() {
        let mut rig = offline_engine();
        let session = testing::session_started_at(Utc::now() - chrono::Duration::hours(47));
        rig.cache.write(Some(&session)).unwrap();

        rig.engine.resume().await.unwrap();
        assert!(rig.engine.snapshot().active_workout.is_some());
    }

    #[tokio::test]
    async fn test_resume_while_active_is_rejected() {
        let mut rig = offline_engine();
        rig.engine
            .start_session(&testing::plan(), None)
            .await
            .unwrap();
        let err = rig.engine.resume().await.unwrap_err();
        assert!(matches!(err, EngineError::SessionActive));
    }
}
