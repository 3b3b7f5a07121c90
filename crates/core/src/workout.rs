use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use thiserror::Error;

/// The in-progress workout record — the aggregate replicated between the
/// in-memory state, the local cache, and the remote draft store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkoutSession {
    /// Identifier of the plan being executed; doubles as the session identity.
    pub workout_plan_id: i64,
    /// Present when the session was launched from a scheduled group training.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub training_id: Option<i64>,
    pub name: String,
    /// Ordered exercise prescriptions; immutable once the session has started.
    pub plan_exercises: Vec<PlanExercise>,
    /// Instant the session began. Never changes; drives elapsed time and
    /// abandonment detection.
    pub start_time: DateTime<Utc>,
    /// Recorded sets, keyed by `"planExerciseId-setNumber"`.
    #[serde(default)]
    pub sets_data: BTreeMap<SetKey, SetRecord>,
    /// Instant of the most recent mutation; the sole conflict tiebreaker.
    pub last_updated: DateTime<Utc>,
}

impl WorkoutSession {
    /// Build a fresh session from a plan, with exercises in deterministic order.
    pub fn begin(plan: &WorkoutPlan, training_id: Option<i64>, now: DateTime<Utc>) -> Self {
        let mut session = Self {
            workout_plan_id: plan.id,
            training_id,
            name: plan.name.clone(),
            plan_exercises: plan.exercises.clone(),
            start_time: now,
            sets_data: BTreeMap::new(),
            last_updated: now,
        };
        session.order_exercises();
        session
    }

    /// Identity of the logical session: two candidates with the same signature
    /// describe the same workout, possibly at different points in time.
    pub fn signature(&self) -> SessionSignature {
        SessionSignature {
            workout_plan_id: self.workout_plan_id,
            training_id: self.training_id,
        }
    }

    /// Sort exercises by block, then position within the block.
    pub fn order_exercises(&mut self) {
        self.plan_exercises
            .sort_by_key(|pe| (pe.block, pe.position));
    }

    /// Advance `last_updated`, keeping it monotonically non-decreasing.
    pub fn touch(&mut self, now: DateTime<Utc>) {
        self.last_updated = self.last_updated.max(now);
    }

    /// The set record under `key`, created empty on first access.
    pub fn set_mut(&mut self, key: SetKey) -> &mut SetRecord {
        self.sets_data
            .entry(key)
            .or_insert_with(|| SetRecord::empty(key))
    }

    /// Apply one field mutation to the set under `key`, creating the record if
    /// absent, and refresh `last_updated`. Marking a set completed stamps
    /// `performed_at` if it has not been stamped yet.
    pub fn apply(&mut self, key: SetKey, patch: SetPatch, now: DateTime<Utc>) {
        let record = self.set_mut(key);
        match patch {
            SetPatch::Weight(weight) => record.performed_weight = weight,
            SetPatch::Reps(reps) => record.performed_reps = reps,
            SetPatch::Completed(done) => {
                record.is_completed = done;
                if done && record.performed_at.is_none() {
                    record.performed_at = Some(now);
                }
            }
        }
        self.touch(now);
    }

    /// Σ weight × reps over completed sets that carry both values.
    pub fn total_volume(&self) -> f64 {
        self.sets_data
            .values()
            .filter(|record| record.is_completed)
            .filter_map(SetRecord::volume)
            .sum()
    }

    pub fn elapsed(&self, now: DateTime<Utc>) -> Duration {
        now - self.start_time
    }

    /// Keys of sets that still need to be logged to the backend at finish
    /// time, in plan-exercise order, set numbers ascending.
    pub fn pending_log_keys(&self) -> Vec<SetKey> {
        self.plan_exercises
            .iter()
            .flat_map(|pe| {
                self.sets_data
                    .values()
                    .filter(move |record| record.plan_exercise_id == pe.id)
            })
            .filter(|record| record.needs_logging())
            .map(SetRecord::key)
            .collect()
    }

    /// Base exercise id for a plan exercise, if the plan contains it.
    pub fn exercise_id_for(&self, plan_exercise_id: i64) -> Option<i64> {
        self.plan_exercises
            .iter()
            .find(|pe| pe.id == plan_exercise_id)
            .map(|pe| pe.exercise_id)
    }
}

/// One exercise prescription within a plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanExercise {
    /// Plan-exercise id (unique within the plan).
    pub id: i64,
    /// Base exercise this prescription refers to.
    pub exercise_id: i64,
    pub name: String,
    pub target_sets: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_reps: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rest_seconds: Option<u32>,
    /// Block index; exercises sharing a block form a superset.
    #[serde(default)]
    pub block: u32,
    /// Position within the block.
    #[serde(default)]
    pub position: u32,
}

/// A workout plan as supplied by the catalog service, consumed read-only
/// when a session starts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkoutPlan {
    pub id: i64,
    pub name: String,
    pub exercises: Vec<PlanExercise>,
}

/// Identity of a logical session: plan plus optional scheduled training.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionSignature {
    pub workout_plan_id: i64,
    pub training_id: Option<i64>,
}

/// Composite key addressing one set: plan exercise plus set number.
/// Renders as `"7-1"` and serializes through that form so it can key JSON maps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SetKey {
    pub plan_exercise_id: i64,
    pub set_number: u32,
}

impl fmt::Display for SetKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.plan_exercise_id, self.set_number)
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid set key: {0:?}")]
pub struct ParseSetKeyError(String);

impl FromStr for SetKey {
    type Err = ParseSetKeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // rsplit keeps a leading minus on the exercise part intact
        let (exercise, set) = s
            .rsplit_once('-')
            .ok_or_else(|| ParseSetKeyError(s.to_string()))?;
        let plan_exercise_id = exercise
            .parse()
            .map_err(|_| ParseSetKeyError(s.to_string()))?;
        let set_number = set.parse().map_err(|_| ParseSetKeyError(s.to_string()))?;
        Ok(Self {
            plan_exercise_id,
            set_number,
        })
    }
}

impl Serialize for SetKey {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for SetKey {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// One recorded set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetRecord {
    pub plan_exercise_id: i64,
    pub set_number: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub performed_weight: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub performed_reps: Option<u32>,
    #[serde(default)]
    pub is_completed: bool,
    /// Stamped when the set is first marked completed; replaced by the
    /// backend's canonical instant once the set is durably logged.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub performed_at: Option<DateTime<Utc>>,
    /// Assigned by the backend once the set is durably logged; absent until then.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
}

impl SetRecord {
    pub fn empty(key: SetKey) -> Self {
        Self {
            plan_exercise_id: key.plan_exercise_id,
            set_number: key.set_number,
            performed_weight: None,
            performed_reps: None,
            is_completed: false,
            performed_at: None,
            id: None,
        }
    }

    pub fn key(&self) -> SetKey {
        SetKey {
            plan_exercise_id: self.plan_exercise_id,
            set_number: self.set_number,
        }
    }

    /// Completed with both weight and reps recorded.
    pub fn is_filled(&self) -> bool {
        self.is_completed && self.performed_weight.is_some() && self.performed_reps.is_some()
    }

    /// Filled but not yet durably logged to the backend.
    pub fn needs_logging(&self) -> bool {
        self.is_filled() && self.id.is_none()
    }

    /// weight × reps, when both are present.
    pub fn volume(&self) -> Option<f64> {
        Some(self.performed_weight? * f64::from(self.performed_reps?))
    }
}

/// A single-field mutation of a set record, as issued by the UI.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SetPatch {
    Weight(Option<f64>),
    Reps(Option<u32>),
    Completed(bool),
}

/// Outcome of the most recent remote sync. In-memory only, never persisted.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SyncStatus {
    pub synced: bool,
    pub last_sync: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

impl SyncStatus {
    pub fn ok(now: DateTime<Utc>) -> Self {
        Self {
            synced: true,
            last_sync: Some(now),
            error: None,
        }
    }

    pub fn failed(error: String) -> Self {
        Self {
            synced: false,
            last_sync: None,
            error: Some(error),
        }
    }
}
