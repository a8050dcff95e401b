//! The path store correlates dispatched commands with their eventual
//! results. Every command hop inserts a path keyed by cmd_id; a result
//! walks the same key back. A path is destroyed by its final result or by
//! expiry, whichever comes first, and whichever loses is dropped — the
//! originator sees exactly one final result either way.

use super::ResultSink;
use crate::runloop::TimerId;
use message::MsgType;
use models::MsgConversion;
use std::collections::HashMap;
use std::time::Instant;
use uuid::Uuid;

/// Whether the path forwards a result back toward an inbound hop (`In`) or
/// awaits a final result from downstream on behalf of a local sender
/// (`Out`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PathKind {
    In,
    Out,
}

pub(crate) struct PathEntry {
    pub kind: PathKind,
    pub cmd_id: Uuid,
    pub original_cmd_type: MsgType,
    pub original_cmd_name: String,
    /// Where matched results are delivered.
    pub sink: ResultSink,
    /// Result-direction conversion declared by the edge, if any.
    pub result_conversion: Option<MsgConversion>,
    pub deadline: Instant,
    /// The runloop timer armed for the deadline.
    pub timer: Option<TimerId>,
    /// Set when a final result has been forwarded through this path.
    pub last_result_seen: bool,
    /// The remote this command was forwarded through, when it left the app.
    pub remote_uri: Option<String>,
}

#[derive(Default)]
pub(crate) struct PathStore {
    entries: HashMap<Uuid, PathEntry>,
}

pub(crate) enum MatchOutcome {
    /// No pending path: the result is late, duplicate, or unsolicited.
    Unmatched,
    /// Forward the result to `sink`. `timer` is returned for cancellation
    /// when the path was consumed by a final result.
    Forward {
        sink: ResultSink,
        conversion: Option<MsgConversion>,
        timer: Option<TimerId>,
        consumed: bool,
    },
}

impl PathStore {
    pub fn insert(&mut self, entry: PathEntry) {
        if let Some(stale) = self.entries.insert(entry.cmd_id, entry) {
            tracing::warn!(cmd_id = %stale.cmd_id, "replacing a pending path for a reused cmd_id");
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Match a result against its pending path. A final result consumes the
    /// path; streaming results leave it pending.
    pub fn match_result(&mut self, cmd_id: &Uuid, is_final: bool) -> MatchOutcome {
        let Some(entry) = self.entries.get_mut(cmd_id) else {
            return MatchOutcome::Unmatched;
        };

        if !is_final {
            return MatchOutcome::Forward {
                sink: entry.sink.clone(),
                conversion: entry.result_conversion.clone(),
                timer: None,
                consumed: false,
            };
        }

        let mut entry = self.entries.remove(cmd_id).unwrap();
        debug_assert!(!entry.last_result_seen);
        entry.last_result_seen = true;

        MatchOutcome::Forward {
            sink: entry.sink,
            conversion: entry.result_conversion,
            timer: entry.timer,
            consumed: true,
        }
    }

    /// Remove and return the path for `cmd_id`, if still pending. Used by
    /// expiry: the caller synthesizes the timeout result exactly once.
    pub fn expire(&mut self, cmd_id: &Uuid) -> Option<PathEntry> {
        self.entries.remove(cmd_id)
    }

    /// Remove and return every path which is overdue at `now`.
    pub fn sweep(&mut self, now: Instant) -> Vec<PathEntry> {
        let overdue: Vec<Uuid> = self
            .entries
            .values()
            .filter(|entry| entry.deadline <= now)
            .map(|entry| entry.cmd_id)
            .collect();

        overdue
            .into_iter()
            .filter_map(|cmd_id| self.entries.remove(&cmd_id))
            .collect()
    }

    /// Remove and return every path whose command crossed `remote_uri`.
    pub fn drain_remote(&mut self, remote_uri: &str) -> Vec<PathEntry> {
        self.drain_where(|entry| entry.remote_uri.as_deref() == Some(remote_uri))
    }

    /// Remove and return every pending path. Used by the close flow to
    /// synthesize AppClosed results.
    pub fn drain_all(&mut self) -> Vec<PathEntry> {
        self.drain_where(|_| true)
    }

    fn drain_where(&mut self, predicate: impl Fn(&PathEntry) -> bool) -> Vec<PathEntry> {
        let matched: Vec<Uuid> = self
            .entries
            .values()
            .filter(|entry| predicate(entry))
            .map(|entry| entry.cmd_id)
            .collect();

        matched
            .into_iter()
            .filter_map(|cmd_id| self.entries.remove(&cmd_id))
            .collect()
    }
}
