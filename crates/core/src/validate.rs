use crate::workout::{SetKey, WorkoutSession};
use thiserror::Error;

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ValidationError {
    #[error("missing required field: {field}")]
    MissingField { field: String },
    #[error("invalid workout plan id: {id}")]
    InvalidPlanId { id: i64 },
    #[error("session has no plan exercises")]
    NoExercises,
    #[error("set key {key} does not match its record ({plan_exercise_id}, {set_number})")]
    KeyMismatch {
        key: SetKey,
        plan_exercise_id: i64,
        set_number: u32,
    },
    #[error("invalid set number {set_number} for plan exercise {plan_exercise_id}")]
    InvalidSetNumber {
        plan_exercise_id: i64,
        set_number: u32,
    },
    #[error("set references unknown plan exercise {plan_exercise_id}")]
    UnknownPlanExercise { plan_exercise_id: i64 },
}

/// Structural validation of a session record loaded from the local cache or
/// the remote draft store, composed from independent validators. Callers
/// treat any failure as "record absent" and purge the source.
pub fn validate_session(session: &WorkoutSession) -> Result<(), Vec<ValidationError>> {
    let validators: &[fn(&WorkoutSession) -> Vec<ValidationError>] = &[
        validate_identity,
        validate_exercises,
        validate_sets,
    ];

    let errors: Vec<ValidationError> = validators.iter().flat_map(|v| v(session)).collect();

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn validate_identity(session: &WorkoutSession) -> Vec<ValidationError> {
    let mut errors = Vec::new();
    if session.workout_plan_id <= 0 {
        errors.push(ValidationError::InvalidPlanId {
            id: session.workout_plan_id,
        });
    }
    if session.name.is_empty() {
        errors.push(ValidationError::MissingField {
            field: "name".to_string(),
        });
    }
    errors
}

fn validate_exercises(session: &WorkoutSession) -> Vec<ValidationError> {
    if session.plan_exercises.is_empty() {
        vec![ValidationError::NoExercises]
    } else {
        vec![]
    }
}

fn validate_sets(session: &WorkoutSession) -> Vec<ValidationError> {
    session
        .sets_data
        .iter()
        .flat_map(|(key, record)| {
            let mut errors = Vec::new();
            if *key != record.key() {
                errors.push(ValidationError::KeyMismatch {
                    key: *key,
                    plan_exercise_id: record.plan_exercise_id,
                    set_number: record.set_number,
                });
            }
            if record.set_number == 0 {
                errors.push(ValidationError::InvalidSetNumber {
                    plan_exercise_id: record.plan_exercise_id,
                    set_number: record.set_number,
                });
            }
            if session.exercise_id_for(record.plan_exercise_id).is_none() {
                errors.push(ValidationError::UnknownPlanExercise {
                    plan_exercise_id: record.plan_exercise_id,
                });
            }
            errors
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing;
    use crate::workout::{SetPatch, SetRecord};
    use chrono::Utc;

    #[test]
    fn test_valid_session() {
        let mut session = testing::session();
        testing::completed_set(&mut session, 7, 1, 50.0, 10);
        assert!(validate_session(&session).is_ok());
    }

    #[test]
    fn test_invalid_plan_id() {
        let mut session = testing::session();
        session.workout_plan_id = 0;
        let errs = validate_session(&session).unwrap_err();
        assert!(errs
            .iter()
            .any(|e| matches!(e, ValidationError::InvalidPlanId { id: 0 })));
    }

    #[test]
    fn test_empty_name() {
        let mut session = testing::session();
        session.name = String::new();
        let errs = validate_session(&session).unwrap_err();
        assert!(errs
            .iter()
            .any(|e| matches!(e, ValidationError::MissingField { field } if field == "name")));
    }

    #[test]
    fn test_no_exercises() {
        let mut session = testing::session();
        session.plan_exercises.clear();
        let errs = validate_session(&session).unwrap_err();
        assert!(errs
            .iter()
            .any(|e| matches!(e, ValidationError::NoExercises)));
    }

    #[test]
    fn test_key_mismatch() {
        let mut session = testing::session();
        let key = SetKey {
            plan_exercise_id: 7,
            set_number: 1,
        };
        let mut record = SetRecord::empty(key);
        record.set_number = 2; // disagrees with the key it is stored under
        session.sets_data.insert(key, record);

        let errs = validate_session(&session).unwrap_err();
        assert!(errs
            .iter()
            .any(|e| matches!(e, ValidationError::KeyMismatch { .. })));
    }

    #[test]
    fn test_set_number_zero() {
        let mut session = testing::session();
        let key = SetKey {
            plan_exercise_id: 7,
            set_number: 0,
        };
        session.sets_data.insert(key, SetRecord::empty(key));
        let errs = validate_session(&session).unwrap_err();
        assert!(errs
            .iter()
            .any(|e| matches!(e, ValidationError::InvalidSetNumber { .. })));
    }

    #[test]
    fn test_unknown_plan_exercise() {
        let mut session = testing::session();
        session.apply(
            SetKey {
                plan_exercise_id: 999,
                set_number: 1,
            },
            SetPatch::Weight(Some(40.0)),
            Utc::now(),
        );
        let errs = validate_session(&session).unwrap_err();
        assert!(errs.iter().any(|e| matches!(
            e,
            ValidationError::UnknownPlanExercise {
                plan_exercise_id: 999
            }
        )));
    }

    #[test]
    fn test_errors_accumulate() {
        let mut session = testing::session();
        session.workout_plan_id = -1;
        session.name = String::new();
        session.plan_exercises.clear();
        let errs = validate_session(&session).unwrap_err();
        assert!(errs.len() >= 3);
    }
}
