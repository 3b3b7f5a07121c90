use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::sync::{mpsc, oneshot, watch};

use liftlog_api_client::ApiClient;
use liftlog_cache::WorkoutCache;
use liftlog_core::{SetKey, SetPatch, WorkoutPlan};
use liftlog_realtime::{run_realtime, RealtimeOptions};

use crate::config::EngineConfig;
use crate::engine::{Engine, EngineChannels, EngineError, EngineSnapshot, WorkoutSummary};
use crate::scheduler::run_engine;

/// App lifecycle notifications forwarded into the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleEvent {
    EnteredBackground,
    Terminating,
    ConnectivityRestored,
}

pub(crate) enum Command {
    Start {
        plan: WorkoutPlan,
        training_id: Option<i64>,
        reply: oneshot::Sender<Result<(), EngineError>>,
    },
    UpdateSet {
        key: SetKey,
        patch: SetPatch,
        reply: oneshot::Sender<Result<(), EngineError>>,
    },
    LogSet {
        key: SetKey,
        reply: oneshot::Sender<Result<(), EngineError>>,
    },
    Finish {
        reply: oneshot::Sender<Result<WorkoutSummary, EngineError>>,
    },
    Cancel {
        reply: oneshot::Sender<Result<(), EngineError>>,
    },
    Resume {
        reply: oneshot::Sender<Result<(), EngineError>>,
    },
    SetMinimized {
        minimized: bool,
    },
    Lifecycle {
        event: LifecycleEvent,
    },
}

/// Cloneable handle to a running session engine.
///
/// Operations are applied in call order: the engine processes one command at
/// a time, so an `update_set` that returned has already been written to the
/// local cache.
#[derive(Clone)]
pub struct WorkoutHandle {
    command_tx: mpsc::Sender<Command>,
    snapshot_rx: watch::Receiver<EngineSnapshot>,
}

impl WorkoutHandle {
    pub async fn start_session(
        &self,
        plan: WorkoutPlan,
        training_id: Option<i64>,
    ) -> Result<(), EngineError> {
        let (reply, rx) = oneshot::channel();
        self.command_tx
            .send(Command::Start {
                plan,
                training_id,
                reply,
            })
            .await
            .map_err(|_| EngineError::Closed)?;
        rx.await.map_err(|_| EngineError::Closed)?
    }

    pub async fn update_set(&self, key: SetKey, patch: SetPatch) -> Result<(), EngineError> {
        let (reply, rx) = oneshot::channel();
        self.command_tx
            .send(Command::UpdateSet { key, patch, reply })
            .await
            .map_err(|_| EngineError::Closed)?;
        rx.await.map_err(|_| EngineError::Closed)?
    }

    pub async fn log_set(&self, key: SetKey) -> Result<(), EngineError> {
        let (reply, rx) = oneshot::channel();
        self.command_tx
            .send(Command::LogSet { key, reply })
            .await
            .map_err(|_| EngineError::Closed)?;
        rx.await.map_err(|_| EngineError::Closed)?
    }

    pub async fn finish_session(&self) -> Result<WorkoutSummary, EngineError> {
        let (reply, rx) = oneshot::channel();
        self.command_tx
            .send(Command::Finish { reply })
            .await
            .map_err(|_| EngineError::Closed)?;
        rx.await.map_err(|_| EngineError::Closed)?
    }

    pub async fn cancel_session(&self) -> Result<(), EngineError> {
        let (reply, rx) = oneshot::channel();
        self.command_tx
            .send(Command::Cancel { reply })
            .await
            .map_err(|_| EngineError::Closed)?;
        rx.await.map_err(|_| EngineError::Closed)?
    }

    pub async fn resume(&self) -> Result<(), EngineError> {
        let (reply, rx) = oneshot::channel();
        self.command_tx
            .send(Command::Resume { reply })
            .await
            .map_err(|_| EngineError::Closed)?;
        rx.await.map_err(|_| EngineError::Closed)?
    }

    /// Fire-and-forget: flip the minimized flag.
    pub fn set_minimized(&self, minimized: bool) {
        let _ = self.command_tx.try_send(Command::SetMinimized { minimized });
    }

    /// Fire-and-forget lifecycle notification.
    pub fn lifecycle(&self, event: LifecycleEvent) {
        let _ = self.command_tx.try_send(Command::Lifecycle { event });
    }

    /// The engine state as of the last published change.
    pub fn snapshot(&self) -> EngineSnapshot {
        self.snapshot_rx.borrow().clone()
    }

    /// Watch stream of engine state changes.
    pub fn watch(&self) -> watch::Receiver<EngineSnapshot> {
        self.snapshot_rx.clone()
    }
}

/// A running session engine plus its realtime channel.
pub struct EngineRuntime {
    pub handle: WorkoutHandle,
    auth_tx: watch::Sender<Option<String>>,
    shutdown_tx: watch::Sender<bool>,
}

impl EngineRuntime {
    /// Install (or clear) the credential the realtime channel connects with.
    /// The HTTP client keeps the key it was configured with.
    pub fn set_auth(&self, token: Option<String>) {
        let _ = self.auth_tx.send(token);
    }

    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }
}

/// Open the cache, wire up the channels, and spawn the engine loop and the
/// realtime connection. Must be called from within a tokio runtime.
pub fn spawn_engine(config: EngineConfig) -> Result<EngineRuntime> {
    let cache = match &config.cache.path {
        Some(path) => WorkoutCache::open_path(path)?,
        None => WorkoutCache::open()?,
    };
    let cache = Arc::new(cache);
    let device_id = cache.device_id()?;

    let mut api = ApiClient::new(&config.server.url, Duration::from_secs(30))?;
    if !config.server.api_key.is_empty() {
        api.set_auth(config.server.api_key.clone());
    }
    let api = Arc::new(api);

    let (command_tx, command_rx) = mpsc::channel(64);
    let (outbound_tx, outbound_rx) = mpsc::channel(64);
    let (inbound_tx, inbound_rx) = mpsc::channel(64);
    let (push_done_tx, push_done_rx) = mpsc::channel(8);
    let (signature_tx, signature_rx) = watch::channel(None);
    let (snapshot_tx, snapshot_rx) = watch::channel(EngineSnapshot::default());
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let initial_auth = (!config.server.api_key.is_empty()).then(|| config.server.api_key.clone());
    let (auth_tx, auth_rx) = watch::channel(initial_auth);

    tokio::spawn(run_realtime(
        RealtimeOptions::new(config.realtime_url()),
        device_id.clone(),
        auth_rx,
        signature_rx,
        outbound_rx,
        inbound_tx,
        shutdown_rx.clone(),
    ));

    let engine = Engine::new(
        &config,
        cache,
        api,
        device_id,
        EngineChannels {
            outbound_tx,
            signature_tx,
            snapshot_tx,
            push_done_tx,
        },
    );
    tokio::spawn(run_engine(
        engine,
        command_rx,
        inbound_rx,
        push_done_rx,
        shutdown_rx,
    ));

    Ok(EngineRuntime {
        handle: WorkoutHandle {
            command_tx,
            snapshot_rx,
        },
        auth_tx,
        shutdown_tx,
    })
}
