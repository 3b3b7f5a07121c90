use chrono::{DateTime, Duration, Utc};

use crate::workout::WorkoutSession;

/// Where a candidate record was loaded from. Attached only during load,
/// never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    LocalCache,
    RemoteDraft,
}

/// A session record tagged with its provenance, as discovered at startup.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub session: WorkoutSession,
    pub source: Source,
}

impl Candidate {
    pub fn local(session: WorkoutSession) -> Self {
        Self {
            session,
            source: Source::LocalCache,
        }
    }

    pub fn remote(session: WorkoutSession) -> Self {
        Self {
            session,
            source: Source::RemoteDraft,
        }
    }
}

/// Follow-up write required to converge the losing store on the winner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reconcile {
    None,
    /// Local won; push the winner to the remote draft store.
    OverwriteRemote,
    /// Remote won; write the winner to the local cache.
    OverwriteLocal,
}

/// Outcome of resolution: the surviving record, where it came from, and the
/// write needed to bring the other store in line.
#[derive(Debug, Clone)]
pub struct Resolution {
    pub winner: WorkoutSession,
    pub source: Source,
    pub reconcile: Reconcile,
}

/// Pick the surviving record from the local and remote candidates.
///
/// A lone candidate wins outright. When both exist and describe the same
/// logical session, the greater `last_updated` wins and the loser's store is
/// overwritten. When they describe different sessions, the newer one wins and
/// the other is simply discarded. An exact timestamp tie keeps the local copy
/// with nothing to reconcile. The outcome never depends on argument order.
pub fn resolve(local: Option<Candidate>, remote: Option<Candidate>) -> Option<Resolution> {
    match (local, remote) {
        (None, None) => None,
        (Some(local), None) => Some(Resolution {
            winner: local.session,
            source: Source::LocalCache,
            reconcile: Reconcile::None,
        }),
        (None, Some(remote)) => Some(Resolution {
            winner: remote.session,
            source: Source::RemoteDraft,
            reconcile: Reconcile::None,
        }),
        (Some(local), Some(remote)) => {
            let same_session = local.session.signature() == remote.session.signature();
            if remote.session.last_updated > local.session.last_updated {
                Some(Resolution {
                    winner: remote.session,
                    source: Source::RemoteDraft,
                    reconcile: if same_session {
                        Reconcile::OverwriteLocal
                    } else {
                        Reconcile::None
                    },
                })
            } else if local.session.last_updated > remote.session.last_updated {
                Some(Resolution {
                    winner: local.session,
                    source: Source::LocalCache,
                    reconcile: if same_session {
                        Reconcile::OverwriteRemote
                    } else {
                        Reconcile::None
                    },
                })
            } else {
                Some(Resolution {
                    winner: local.session,
                    source: Source::LocalCache,
                    reconcile: Reconcile::None,
                })
            }
        }
    }
}

/// Whether a session is too old to resume. Strictly greater: a session at
/// exactly the threshold is still live.
pub fn is_abandoned(session: &WorkoutSession, now: DateTime<Utc>, threshold: Duration) -> bool {
    now - session.start_time > threshold
}
