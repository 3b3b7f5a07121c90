use anyhow::{Context, Result};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::PathBuf;
use std::sync::Mutex;
use tracing::warn;

use liftlog_core::validate::validate_session;
use liftlog_core::{DeviceId, WorkoutSession};

/// Schema for the on-device cache.
///
/// `active_workout` holds at most one row: a single session is active at a
/// time, so slot 0 is the only key. `device_identity` persists the stable
/// device id across restarts.
const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS active_workout (
    slot INTEGER PRIMARY KEY CHECK (slot = 0),
    payload TEXT NOT NULL,
    saved_at TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS device_identity (
    slot INTEGER PRIMARY KEY CHECK (slot = 0),
    device_id TEXT NOT NULL,
    created_at TEXT NOT NULL
);
";

/// Local SQLite cache for the active workout session.
/// Thread-safe: wraps the connection in a Mutex so it can be shared via
/// `Arc<WorkoutCache>`.
pub struct WorkoutCache {
    conn: Mutex<Connection>,
}

impl WorkoutCache {
    /// Open (or create) the cache at the default path.
    /// `~/.local/share/liftlog/cache.db`
    pub fn open() -> Result<Self> {
        let path = default_cache_path()?;
        Self::open_path(&path)
    }

    /// Open (or create) the cache at a specific path.
    pub fn open_path(path: &PathBuf) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("create dir for {}", path.display()))?;
        }
        let conn =
            Connection::open(path).with_context(|| format!("open cache {}", path.display()))?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.conn.lock().expect("cache mutex poisoned")
    }

    // ── Active session slot ────────────────────────────────────────────

    /// Read the cached active session.
    ///
    /// A payload that no longer parses, or that fails structural validation,
    /// is treated as absent: the slot is purged and `None` is returned.
    pub fn read(&self) -> Result<Option<WorkoutSession>> {
        let payload: Option<String> = self
            .conn()
            .query_row(
                "SELECT payload FROM active_workout WHERE slot = 0",
                [],
                |row| row.get(0),
            )
            .optional()?;
        let Some(payload) = payload else {
            return Ok(None);
        };

        let session: WorkoutSession = match serde_json::from_str(&payload) {
            Ok(session) => session,
            Err(e) => {
                warn!("discarding unreadable cached session: {e}");
                self.clear()?;
                return Ok(None);
            }
        };
        if let Err(errors) = validate_session(&session) {
            let detail = errors
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join("; ");
            warn!("discarding structurally invalid cached session: {detail}");
            self.clear()?;
            return Ok(None);
        }
        Ok(Some(session))
    }

    /// Replace the cached session, or clear the slot with `None`.
    pub fn write(&self, session: Option<&WorkoutSession>) -> Result<()> {
        match session {
            Some(session) => {
                let payload = serde_json::to_string(session)?;
                self.conn().execute(
                    "INSERT INTO active_workout (slot, payload, saved_at) \
                     VALUES (0, ?1, datetime('now')) \
                     ON CONFLICT(slot) DO UPDATE SET \
                      payload=excluded.payload, saved_at=datetime('now')",
                    params![payload],
                )?;
            }
            None => self.clear()?,
        }
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        self.conn().execute("DELETE FROM active_workout", [])?;
        Ok(())
    }

    // ── Device identity ────────────────────────────────────────────────

    /// The stable id of this device, generated on first use and persisted.
    pub fn device_id(&self) -> Result<DeviceId> {
        let existing: Option<String> = self
            .conn()
            .query_row(
                "SELECT device_id FROM device_identity WHERE slot = 0",
                [],
                |row| row.get(0),
            )
            .optional()?;
        if let Some(id) = existing {
            return Ok(DeviceId::from(id));
        }

        let id = DeviceId::generate();
        self.conn().execute(
            "INSERT INTO device_identity (slot, device_id, created_at) \
             VALUES (0, ?1, datetime('now'))",
            params![id.as_str()],
        )?;
        Ok(id)
    }
}

fn default_cache_path() -> Result<PathBuf> {
    let home = std::env::var("HOME")
        .or_else(|_| std::env::var("USERPROFILE"))
        .context("Could not determine home directory")?;
    Ok(PathBuf::from(home)
        .join(".local")
        .join("share")
        .join("liftlog")
        .join("cache.db"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use liftlog_core::testing;
    use liftlog_core::workout::{SetKey, SetPatch};

    fn test_cache() -> WorkoutCache {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.keep().join("cache.db");
        WorkoutCache::open_path(&path).unwrap()
    }

    fn row_count(cache: &WorkoutCache) -> i64 {
        cache
            .conn()
            .query_row("SELECT COUNT(*) FROM active_workout", [], |row| row.get(0))
            .unwrap()
    }

    #[test]
    fn test_open_and_schema() {
        let cache = test_cache();
        assert!(cache.read().unwrap().is_none());
    }

    #[test]
    fn test_write_read_roundtrip() {
        let cache = test_cache();
        let mut session = testing::session();
        testing::completed_set(&mut session, 7, 1, 50.0, 10);

        cache.write(Some(&session)).unwrap();
        let restored = cache.read().unwrap().unwrap();
        assert_eq!(restored, session);
    }

    #[test]
    fn test_second_write_replaces_slot() {
        let cache = test_cache();
        let mut session = testing::session();
        cache.write(Some(&session)).unwrap();

        session.apply(
            SetKey {
                plan_exercise_id: 7,
                set_number: 1,
            },
            SetPatch::Weight(Some(52.5)),
            session.last_updated,
        );
        cache.write(Some(&session)).unwrap();

        assert_eq!(row_count(&cache), 1);
        let restored = cache.read().unwrap().unwrap();
        assert_eq!(restored, session);
    }

    #[test]
    fn test_write_none_clears_slot() {
        let cache = test_cache();
        cache.write(Some(&testing::session())).unwrap();
        cache.write(None).unwrap();
        assert!(cache.read().unwrap().is_none());
        assert_eq!(row_count(&cache), 0);
    }

    #[test]
    fn test_unreadable_payload_is_purged() {
        let cache = test_cache();
        cache
            .conn()
            .execute(
                "INSERT INTO active_workout (slot, payload, saved_at) \
                 VALUES (0, 'not json', datetime('now'))",
                [],
            )
            .unwrap();

        assert!(cache.read().unwrap().is_none());
        assert_eq!(row_count(&cache), 0);
    }

    #[test]
    fn test_invalid_session_is_purged() {
        let cache = test_cache();
        let mut json = serde_json::to_value(testing::session()).unwrap();
        json["workoutPlanId"] = serde_json::json!(-5);
        cache
            .conn()
            .execute(
                "INSERT INTO active_workout (slot, payload, saved_at) \
                 VALUES (0, ?1, datetime('now'))",
                params![json.to_string()],
            )
            .unwrap();

        assert!(cache.read().unwrap().is_none());
        assert_eq!(row_count(&cache), 0);
    }

    #[test]
    fn test_device_id_is_stable() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.keep().join("cache.db");

        let first = {
            let cache = WorkoutCache::open_path(&path).unwrap();
            let id = cache.device_id().unwrap();
            assert_eq!(cache.device_id().unwrap(), id);
            id
        };

        let reopened = WorkoutCache::open_path(&path).unwrap();
        assert_eq!(reopened.device_id().unwrap(), first);
    }
}
