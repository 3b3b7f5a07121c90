//! Shared API types for the liftlog studio backend.
//!
//! This crate is the **single source of truth** for the request/response types
//! of the draft store, set logging, personal-record, and exercise-history
//! endpoints, plus the realtime channel messages. TypeScript types are
//! auto-generated via `ts-rs` and consumed by the studio frontend.
//!
//! To regenerate TypeScript types:
//!   cargo test -p liftlog-api-types -- export_typescript --nocapture

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ts_rs::TS;

use liftlog_core::SessionSignature;

// Re-export the replicated aggregate for convenience
pub use liftlog_core::workout::{
    PlanExercise, SetKey, SetRecord, WorkoutPlan, WorkoutSession,
};

// ─── Draft store ─────────────────────────────────────────────────────────────

/// Body of `POST /api/workouts/draft` — the full session plus its key fields.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct SaveDraftRequest {
    pub device_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub training_id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workout_plan_id: Option<i64>,
    /// Full WorkoutSession JSON.
    #[ts(type = "any")]
    pub session_data: serde_json::Value,
}

/// Query key for `GET`/`DELETE /api/workouts/draft`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct DraftQuery {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub training_id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workout_plan_id: Option<i64>,
}

/// `GET /api/workouts/draft` body when a draft exists.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct DraftResponse {
    /// Full WorkoutSession JSON.
    #[ts(type = "any")]
    pub session_data: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub training_id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workout_plan_id: Option<i64>,
    #[ts(type = "string")]
    pub start_time: DateTime<Utc>,
    /// Server-side instant of the last draft write.
    #[ts(type = "string")]
    pub updated_at: DateTime<Utc>,
}

// ─── Set logging ─────────────────────────────────────────────────────────────

/// Body of `POST /api/workouts/sets` — one completed set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct LogSetRequest {
    /// Base exercise the set was performed on.
    pub exercise_id: i64,
    pub plan_exercise_id: i64,
    pub set_number: u32,
    pub weight: f64,
    pub reps: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workout_plan_id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub training_id: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct LogSetResponse {
    /// Durable id assigned to the logged set.
    pub id: i64,
    /// Canonical instant recorded by the backend.
    #[ts(type = "string")]
    pub performed_at: DateTime<Utc>,
}

// ─── Personal records ────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct CompletedSet {
    pub exercise_id: i64,
    pub weight: f64,
    pub reps: u32,
}

/// Body of `POST /api/workouts/personal-records`.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct PersonalRecordCheckRequest {
    pub sets: Vec<CompletedSet>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct PersonalRecord {
    pub exercise_id: i64,
    /// "weight" or "volume".
    pub record_type: String,
    pub value: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct PersonalRecordsResponse {
    pub records: Vec<PersonalRecord>,
}

// ─── Exercise history ────────────────────────────────────────────────────────

/// One past performance of an exercise, used for placeholder values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct HistorySet {
    pub weight: f64,
    pub reps: u32,
    #[ts(type = "string")]
    pub performed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct ExerciseHistory {
    pub exercise_id: i64,
    /// Most recent first, at most three entries.
    pub recent_sets: Vec<HistorySet>,
}

/// `GET /api/exercises/history?ids=7,8` body.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct ExerciseHistoryResponse {
    pub exercises: Vec<ExerciseHistory>,
}

// ─── Misc ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct OkResponse {
    pub ok: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct ApiError {
    pub error: String,
}

// ─── Realtime channel ────────────────────────────────────────────────────────

/// Events a device sends over the realtime channel.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[serde(tag = "type", rename_all = "kebab-case")]
#[ts(export)]
pub enum ClientEvent {
    /// Sent on connect while a session is active: asks for the current state.
    #[serde(rename_all = "camelCase")]
    SyncRequest {
        workout_plan_id: i64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        training_id: Option<i64>,
        device_id: String,
    },
    /// Sent after every successful local mutation.
    #[serde(rename_all = "camelCase")]
    Update {
        workout_plan_id: i64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        training_id: Option<i64>,
        device_id: String,
        /// The session's `setsData` JSON object.
        #[ts(type = "any")]
        sets_data: serde_json::Value,
    },
    /// Sent once on finish or cancel.
    #[serde(rename_all = "camelCase")]
    Finished {
        workout_plan_id: i64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        training_id: Option<i64>,
        device_id: String,
    },
}

/// Events a device receives — the broadcast form of another device's
/// [`ClientEvent`], still carrying the originating device id.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[serde(tag = "type", rename_all = "kebab-case")]
#[ts(export)]
pub enum ServerEvent {
    #[serde(rename_all = "camelCase")]
    UpdateReceived {
        workout_plan_id: i64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        training_id: Option<i64>,
        device_id: String,
        #[ts(type = "any")]
        sets_data: serde_json::Value,
    },
    #[serde(rename_all = "camelCase")]
    FinishedReceived {
        workout_plan_id: i64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        training_id: Option<i64>,
        device_id: String,
    },
}

impl ClientEvent {
    pub fn device_id(&self) -> &str {
        match self {
            ClientEvent::SyncRequest { device_id, .. }
            | ClientEvent::Update { device_id, .. }
            | ClientEvent::Finished { device_id, .. } => device_id,
        }
    }

    pub fn signature(&self) -> SessionSignature {
        match self {
            ClientEvent::SyncRequest {
                workout_plan_id,
                training_id,
                ..
            }
            | ClientEvent::Update {
                workout_plan_id,
                training_id,
                ..
            }
            | ClientEvent::Finished {
                workout_plan_id,
                training_id,
                ..
            } => SessionSignature {
                workout_plan_id: *workout_plan_id,
                training_id: *training_id,
            },
        }
    }

    /// The broadcast form other devices observe, if this event has one.
    pub fn into_received(self) -> Option<ServerEvent> {
        match self {
            ClientEvent::Update {
                workout_plan_id,
                training_id,
                device_id,
                sets_data,
            } => Some(ServerEvent::UpdateReceived {
                workout_plan_id,
                training_id,
                device_id,
                sets_data,
            }),
            ClientEvent::Finished {
                workout_plan_id,
                training_id,
                device_id,
            } => Some(ServerEvent::FinishedReceived {
                workout_plan_id,
                training_id,
                device_id,
            }),
            ClientEvent::SyncRequest { .. } => None,
        }
    }
}

impl ServerEvent {
    pub fn device_id(&self) -> &str {
        match self {
            ServerEvent::UpdateReceived { device_id, .. }
            | ServerEvent::FinishedReceived { device_id, .. } => device_id,
        }
    }

    pub fn signature(&self) -> SessionSignature {
        match self {
            ServerEvent::UpdateReceived {
                workout_plan_id,
                training_id,
                ..
            }
            | ServerEvent::FinishedReceived {
                workout_plan_id,
                training_id,
                ..
            } => SessionSignature {
                workout_plan_id: *workout_plan_id,
                training_id: *training_id,
            },
        }
    }
}

// ─── TypeScript generation ───────────────────────────────────────────────────
