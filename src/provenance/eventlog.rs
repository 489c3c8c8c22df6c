//! SW-015: Append-only JSONL provenance event log, one file per stack.

use crate::core::types::{ProvenanceEvent, TimestampedEvent};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

/// Current time as an ISO 8601 UTC timestamp.
pub fn now_iso8601() -> String {
    let secs = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs();
    format_epoch(secs)
}

/// Format seconds since the Unix epoch as `YYYY-MM-DDTHH:MM:SSZ`.
pub fn format_epoch(secs: u64) -> String {
    let (y, m, d) = civil_from_days((secs / 86_400) as i64);
    let t = secs % 86_400;
    format!(
        "{:04}-{:02}-{:02}T{:02}:{:02}:{:02}Z",
        y,
        m,
        d,
        t / 3600,
        (t % 3600) / 60,
        t % 60
    )
}

// Days since 1970-01-01 to a proleptic Gregorian date (era-based).
fn civil_from_days(days: i64) -> (i64, u32, u32) {
    let z = days + 719_468;
    let era = z.div_euclid(146_097);
    let doe = z.rem_euclid(146_097);
    let yoe = (doe - doe / 1460 + doe / 36_524 - doe / 146_096) / 365;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let d = (doy - (153 * mp + 2) / 5 + 1) as u32;
    let m = (if mp < 10 { mp + 3 } else { mp - 9 }) as u32;
    let y = yoe + era * 400 + i64::from(m <= 2);
    (y, m, d)
}

/// Generate a run ID.
pub fn generate_run_id() -> String {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    format!("r-{:012x}", nanos & 0xFFFF_FFFF_FFFF)
}

/// Derive the event log path for a stack.
pub fn event_log_path(state_dir: &Path, stack: &str) -> PathBuf {
    state_dir.join(stack).join("events.jsonl")
}

/// Append an event to a stack's event log.
pub fn append_event(state_dir: &Path, stack: &str, event: ProvenanceEvent) -> Result<(), String> {
    append_to(&event_log_path(state_dir, stack), event)
}

fn append_to(path: &Path, event: ProvenanceEvent) -> Result<(), String> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| format!("cannot create state dir: {}", e))?;
    }

    let te = TimestampedEvent {
        ts: now_iso8601(),
        event,
    };
    let json = serde_json::to_string(&te).map_err(|e| format!("JSON serialize error: {}", e))?;

    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| format!("cannot open event log {}: {}", path.display(), e))?;

    writeln!(file, "{}", json).map_err(|e| format!("write error: {}", e))
}

/// Read every event of a stack's log. A missing log is empty.
pub fn read_events(state_dir: &Path, stack: &str) -> Result<Vec<TimestampedEvent>, String> {
    let path = event_log_path(state_dir, stack);
    if !path.exists() {
        return Ok(Vec::new());
    }
    let content = std::fs::read_to_string(&path)
        .map_err(|e| format!("cannot read {}: {}", path.display(), e))?;
    content
        .lines()
        .filter(|l| !l.trim().is_empty())
        .enumerate()
        .map(|(i, line)| {
            serde_json::from_str(line)
                .map_err(|e| format!("{}:{}: invalid event: {}", path.display(), i + 1, e))
        })
        .collect()
}

/// Event sink for one apply. Disabled logs accept and drop events.
#[derive(Debug, Clone)]
pub struct EventLog {
    path: Option<PathBuf>,
}

impl EventLog {
    pub fn open(state_dir: &Path, stack: &str) -> Self {
        Self {
            path: Some(event_log_path(state_dir, stack)),
        }
    }

    pub fn disabled() -> Self {
        Self { path: None }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn record(&self, event: ProvenanceEvent) -> Result<(), String> {
        match &self.path {
            Some(path) => append_to(path, event),
            None => Ok(()),
        }
    }
}
