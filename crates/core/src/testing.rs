use chrono::{DateTime, TimeZone, Utc};

use crate::workout::{PlanExercise, SetKey, SetPatch, WorkoutPlan, WorkoutSession};

/// Plan exercise with the given identity and ordering, 3 target sets.
pub fn exercise(id: i64, exercise_id: i64, name: &str, block: u32, position: u32) -> PlanExercise {
    PlanExercise {
        id,
        exercise_id,
        name: name.to_string(),
        target_sets: 3,
        target_reps: Some(10),
        rest_seconds: Some(90),
        block,
        position,
    }
}

/// Default two-exercise plan (id 42, "Push Day": bench press 7, incline press 8).
pub fn plan() -> WorkoutPlan {
    WorkoutPlan {
        id: 42,
        name: "Push Day".to_string(),
        exercises: vec![
            exercise(7, 70, "Bench Press", 1, 1),
            exercise(8, 80, "Incline Press", 1, 2),
        ],
    }
}

/// Session begun from [`plan`] at a fixed instant.
pub fn session() -> WorkoutSession {
    session_started_at(Utc.with_ymd_and_hms(2026, 3, 14, 9, 30, 0).unwrap())
}

/// Session begun from [`plan`] at the given instant.
pub fn session_started_at(start: DateTime<Utc>) -> WorkoutSession {
    WorkoutSession::begin(&plan(), None, start)
}

/// Record a completed set with both values in place.
pub fn completed_set(
    session: &mut WorkoutSession,
    plan_exercise_id: i64,
    set_number: u32,
    weight: f64,
    reps: u32,
) {
    let key = SetKey {
        plan_exercise_id,
        set_number,
    };
    let now = session.last_updated;
    session.apply(key, SetPatch::Weight(Some(weight)), now);
    session.apply(key, SetPatch::Reps(Some(reps)), now);
    session.apply(key, SetPatch::Completed(true), now);
}
