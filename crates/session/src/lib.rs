//! Active workout session engine.
//!
//! One session runs at a time. Every edit lands in the local SQLite cache
//! before the call returns, then flows outward: a debounced draft push to the
//! studio backend (with bounded retry) and a realtime event to the user's
//! other devices. On startup [`WorkoutHandle::resume`] reconciles whatever
//! the cache and the draft store still hold, newest copy winning.

pub mod config;
pub mod engine;
pub mod handle;
mod scheduler;

pub use config::{load_config, EngineConfig};
pub use engine::{EngineError, EngineSnapshot, Phase, WorkoutSummary};
pub use handle::{spawn_engine, EngineRuntime, LifecycleEvent, WorkoutHandle};
