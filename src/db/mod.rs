//! The persistent call-history database (spec §3, §4.2, §4.3).
//!
//! One JSON file holds the mapping `remote_uri -> ordered call records`.
//! Saves are atomic (write to a temp file in the same directory, then
//! rename over the target) per the Design Notes' recommendation; loads
//! treat a missing or corrupt file as an empty database.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{HubError, Result};

const SECONDS_PER_DAY: f64 = 24.0 * 60.0 * 60.0;

/// One call against a URI. `length == 0` iff the record is still open
/// (call in progress); a record is mutated exactly twice in its lifetime:
/// appended open at `call_confirmed`, finalised at `call_disconnected`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CallRecord {
    pub start: f64,
    pub end: f64,
    pub length: f64,
}

impl CallRecord {
    pub fn open(start: f64) -> Self {
        CallRecord { start, end: 0.0, length: 0.0 }
    }

    pub fn is_open(&self) -> bool {
        self.end == 0.0 && self.length == 0.0
    }

    pub fn close(&mut self, end: f64) {
        self.end = end;
        self.length = end - self.start;
    }
}

/// Wall-clock "now", in seconds since the epoch.
pub fn now_secs() -> f64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs_f64()
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct PersistedDb {
    calls_from_start_end_length: HashMap<String, Vec<CallRecord>>,
}

/// The in-memory, hub-owned call-history database. Mutated and persisted
/// synchronously from within the hub loop; no lock is needed (spec §5).
#[derive(Debug)]
pub struct CallDatabase {
    path: PathBuf,
    inner: PersistedDb,
}

/// `get_stats`'s four counters (spec §4.2).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CallStats {
    pub total_calls: u64,
    pub total_seconds: f64,
    pub last24_calls: u64,
    pub last24_seconds: f64,
}

impl CallDatabase {
    /// Load the file at `path`, treating absence or corruption as an empty
    /// database (spec §7: `DBLoadError` is non-fatal).
    pub fn load(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref().to_path_buf();
        let inner = match std::fs::read_to_string(&path) {
            Ok(contents) => serde_json::from_str(&contents).unwrap_or_else(|e| {
                warn!(path = %path.display(), error = %e, "call database corrupt, starting empty");
                PersistedDb::default()
            }),
            Err(e) => {
                if e.kind() != std::io::ErrorKind::NotFound {
                    let err = HubError::DbLoad(e);
                    warn!(path = %path.display(), error = %err, "failed to read call database, starting empty");
                }
                PersistedDb::default()
            }
        };
        CallDatabase { path, inner }
    }

    /// Atomically overwrite the database file (write-to-temp, then rename).
    pub fn save(&self) -> Result<()> {
        let tmp_path = self.path.with_extension("tmp");
        let json = serde_json::to_string_pretty(&self.inner)
            .expect("CallDatabase is always serializable");
        std::fs::write(&tmp_path, json).map_err(HubError::DbSave)?;
        std::fs::rename(&tmp_path, &self.path).map_err(HubError::DbSave)
    }

    pub fn save_to(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let tmp_path = path.with_extension("tmp");
        let json = serde_json::to_string_pretty(&self.inner)
            .expect("CallDatabase is always serializable");
        std::fs::write(&tmp_path, json).map_err(HubError::DbSave)?;
        std::fs::rename(&tmp_path, path).map_err(HubError::DbSave)
    }

    pub fn uris(&self) -> impl Iterator<Item = &str> {
        self.inner.calls_from_start_end_length.keys().map(String::as_str)
    }

    /// Append a new open record for `remote_uri` at `start`.
    pub fn open_call(&mut self, remote_uri: &str, start: f64) {
        self.inner
            .calls_from_start_end_length
            .entry(remote_uri.to_string())
            .or_default()
            .push(CallRecord::open(start));
    }

    /// Close `remote_uri`'s most recent record at `end`, iff it is open.
    /// A no-op if the URI is unknown or its last record is already closed
    /// (matches `original_source`: disconnecting a call that was never
    /// confirmed for that URI is silently ignored).
    pub fn close_last_open_call(&mut self, remote_uri: &str, end: f64) {
        if let Some(records) = self.inner.calls_from_start_end_length.get_mut(remote_uri) {
            if let Some(last) = records.last_mut() {
                if last.is_open() {
                    last.close(end);
                }
            }
        }
    }

    /// spec §4.2: counts and sums only closed records (`length > 0`); of
    /// those, records starting within the last 24h also count toward the
    /// last24 totals. A URI with no records returns all zeros.
    pub fn get_stats(&self, remote_uri: &str, now: f64) -> CallStats {
        let mut stats = CallStats { total_calls: 0, total_seconds: 0.0, last24_calls: 0, last24_seconds: 0.0 };
        let Some(records) = self.inner.calls_from_start_end_length.get(remote_uri) else {
            return stats;
        };
        for record in records {
            if record.length > 0.0 {
                stats.total_calls += 1;
                stats.total_seconds += record.length;
                if record.start > now - SECONDS_PER_DAY {
                    stats.last24_calls += 1;
                    stats.last24_seconds += record.length;
                }
            }
        }
        stats
    }
}
