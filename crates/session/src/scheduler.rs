use tokio::sync::{mpsc, watch};
use tracing::{debug, info};

use liftlog_api_types::ServerEvent;

use crate::engine::{Engine, PushOutcome};
use crate::handle::Command;

/// Run the engine loop: applies commands in arrival order, absorbs realtime
/// events and background push outcomes, and autosaves the active session on a
/// fixed cadence.
pub(crate) async fn run_engine(
    mut engine: Engine,
    mut command_rx: mpsc::Receiver<Command>,
    mut inbound_rx: mpsc::Receiver<ServerEvent>,
    mut push_done_rx: mpsc::Receiver<PushOutcome>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut autosave = tokio::time::interval_at(
        tokio::time::Instant::now() + engine.autosave_interval(),
        engine.autosave_interval(),
    );
    autosave.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    let mut realtime_open = true;

    loop {
        tokio::select! {
            command = command_rx.recv() => {
                match command {
                    Some(command) => apply_command(&mut engine, command).await,
                    None => {
                        info!("all handles dropped, session engine stopping");
                        break;
                    }
                }
            }

            event = inbound_rx.recv(), if realtime_open => {
                match event {
                    Some(event) => engine.handle_server_event(event).await,
                    None => realtime_open = false,
                }
            }

            outcome = push_done_rx.recv() => {
                if let Some(outcome) = outcome {
                    engine.finish_push(outcome);
                }
            }

            _ = autosave.tick() => {
                if engine.has_active_session() {
                    debug!("autosave tick");
                    engine.persist_cycle();
                }
            }

            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    info!("session engine shutting down");
                    break;
                }
            }
        }
    }
}

async fn apply_command(engine: &mut Engine, command: Command) {
    match command {
        Command::Start {
            plan,
            training_id,
            reply,
        } => {
            let _ = reply.send(engine.start_session(&plan, training_id).await);
        }
        Command::UpdateSet { key, patch, reply } => {
            let _ = reply.send(engine.update_set(key, patch));
        }
        Command::LogSet { key, reply } => {
            let _ = reply.send(engine.log_set(key).await);
        }
        Command::Finish { reply } => {
            let _ = reply.send(engine.finish_session().await);
        }
        Command::Cancel { reply } => {
            let _ = reply.send(engine.cancel_session().await);
        }
        Command::Resume { reply } => {
            let _ = reply.send(engine.resume().await);
        }
        Command::SetMinimized { minimized } => engine.set_minimized(minimized),
        Command::Lifecycle { event } => engine.handle_lifecycle(event),
    }
}
