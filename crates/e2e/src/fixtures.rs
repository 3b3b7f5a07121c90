//! Engine fixtures: spawn a real engine wired to a [`FakeStudio`].

use std::path::PathBuf;

use liftlog_session::{spawn_engine, EngineConfig, EngineRuntime, WorkoutHandle};
use tempfile::TempDir;

use crate::backend::FakeStudio;

/// One device: a running engine with its own cache file.
pub struct Device {
    pub runtime: EngineRuntime,
    pub cache_path: PathBuf,
    _data_dir: TempDir,
}

impl Device {
    pub fn handle(&self) -> &WorkoutHandle {
        &self.runtime.handle
    }
}

/// A studio plus a single attached device.
pub struct TestRig {
    pub studio: FakeStudio,
    pub device: Device,
}

pub async fn rig() -> TestRig {
    let studio = FakeStudio::spawn().await;
    let device = attach(&studio).await;
    TestRig { studio, device }
}

pub async fn attach(studio: &FakeStudio) -> Device {
    attach_with(studio, |_| {}).await
}

/// Spawns an engine against `studio`, with test-friendly timings. The tweak
/// closure runs last, so it can override anything including the cache path.
pub async fn attach_with(studio: &FakeStudio, tweak: impl FnOnce(&mut EngineConfig)) -> Device {
    let data_dir = tempfile::tempdir().expect("tempdir");
    let mut config = EngineConfig::default();
    config.server.url = studio.base_url().to_string();
    config.server.api_key = "studio-key".to_string();
    config.cache.path = Some(data_dir.path().join("cache.db"));
    config.sync.base_delay_ms = 20;
    // Keep the autosave tick out of the way; tests drive persistence directly.
    config.session.autosave_interval_secs = 3600;
    tweak(&mut config);
    let cache_path = config.cache.path.clone().expect("cache path configured");
    let runtime = spawn_engine(config).expect("spawn engine");
    Device {
        runtime,
        cache_path,
        _data_dir: data_dir,
    }
}
