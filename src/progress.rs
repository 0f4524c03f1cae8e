//! Session and batch progress reporting.
//!
//! Two sinks: [`SessionProgress`] receives the ordered status strings of one
//! document's session ("opened", "validated", ...), and
//! [`BatchProgressReporter`] receives a cumulative [`BatchSnapshot`] after
//! every finished document. Output goes to **stderr** so stdout remains
//! parseable for scripts.

use serde::Serialize;
use std::io::Write;
use std::path::Path;

/// Cumulative batch statistics, emitted after every document.
#[derive(Clone, Debug, Default, Serialize, PartialEq)]
pub struct BatchSnapshot {
    pub total: usize,
    pub processed: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// Rolling average processing time per document.
    pub average_ms: f64,
    /// Most recent error messages, newest last.
    pub recent_errors: Vec<String>,
    /// Distinct `document:linkId` keys changed so far.
    pub unique_hyperlinks_changed: usize,
    /// File name of the document that produced this snapshot.
    pub last_document: String,
    pub last_status: String,
}

/// Receives textual status updates from one session, in order.
pub trait SessionProgress: Send + Sync {
    fn status(&self, path: &Path, message: &str);
}

/// Receives batch statistics after every document.
pub trait BatchProgressReporter: Send + Sync {
    fn report(&self, snapshot: &BatchSnapshot);
}

/// Human-friendly progress on stderr.
pub struct StderrProgress;

impl SessionProgress for StderrProgress {
    fn status(&self, path: &Path, message: &str) {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        let line = format!("  {}  {}\n", name, message);
        let _ = std::io::stderr().lock().write_all(line.as_bytes());
    }
}

impl BatchProgressReporter for StderrProgress {
    fn report(&self, snapshot: &BatchSnapshot) {
        let line = format!(
            "[{} / {}] {} {}  ok {}  failed {}  links changed {}  avg {:.0} ms\n",
            format_number(snapshot.processed as u64),
            format_number(snapshot.total as u64),
            snapshot.last_document,
            snapshot.last_status,
            snapshot.succeeded,
            snapshot.failed,
            format_number(snapshot.unique_hyperlinks_changed as u64),
            snapshot.average_ms
        );
        let _ = std::io::stderr().lock().write_all(line.as_bytes());
        let _ = std::io::stderr().lock().flush();
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

impl SessionProgress for JsonProgress {
    fn status(&self, path: &Path, message: &str) {
        let obj = serde_json::json!({
            "event": "status",
            "document": path.display().to_string(),
            "message": message,
        });
        if let Ok(line) = serde_json::to_string(&obj) {
            let _ = writeln!(std::io::stderr().lock(), "{}", line);
        }
    }
}

impl BatchProgressReporter for JsonProgress {
    fn report(&self, snapshot: &BatchSnapshot) {
        let mut obj = serde_json::json!({ "event": "progress" });
        if let (Some(map), Ok(serde_json::Value::Object(fields))) =
            (obj.as_object_mut(), serde_json::to_value(snapshot))
        {
            map.extend(fields);
        }
        if let Ok(line) = serde_json::to_string(&obj) {
            let _ = writeln!(std::io::stderr().lock(), "{}", line);
            let _ = std::io::stderr().lock().flush();
        }
    }
}

/// No-op reporter when progress is disabled.
pub struct NoProgress;

impl SessionProgress for NoProgress {
    fn status(&self, _path: &Path, _message: &str) {}
}

impl BatchProgressReporter for NoProgress {
    fn report(&self, _snapshot: &BatchSnapshot) {}
}

fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + (s.len() - 1) / 3);
    let chars: Vec<char> = s.chars().rev().collect();
    for (i, c) in chars.iter().enumerate() {
        if i > 0 && i % 3 == 0 {
            result.push(',');
        }
        result.push(*c);
    }
    result.chars().rev().collect()
}

/// Progress mode for the CLI: off, human (stderr), or JSON (stderr).
#[derive(Clone, Copy, Debug, Eq, PartialEq, clap::ValueEnum)]
pub enum ProgressMode {
    Off,
    Human,
    Json,
}

impl ProgressMode {
    /// Default: human progress when stderr is a TTY, otherwise off.
    pub fn default_for_tty() -> Self {
        if atty::is(atty::Stream::Stderr) {
            ProgressMode::Human
        } else {
            ProgressMode::Off
        }
    }

    pub fn batch_reporter(&self) -> Box<dyn BatchProgressReporter> {
        match self {
            ProgressMode::Off => Box::new(NoProgress),
            ProgressMode::Human => Box::new(StderrProgress),
            ProgressMode::Json => Box::new(JsonProgress),
        }
    }

    /// Per-session status lines are only shown in JSON mode; the human
    /// reporter prints one line per finished document instead.
    pub fn session_progress(&self) -> Box<dyn SessionProgress> {
        match self {
            ProgressMode::Json => Box::new(JsonProgress),
            ProgressMode::Off | ProgressMode::Human => Box::new(NoProgress),
        }
    }
}
