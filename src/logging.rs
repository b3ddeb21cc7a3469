//! Structured logging for the argument graph engine.
//!
//! Every record is one JSON object per line:
//! 1. Multi-level granularity (TRACE → FATAL), filtered by `LOG_LEVEL`
//! 2. Domain categories for filtering, selected by `LOG_DOMAINS`
//! 3. Run-scoped files under `$LOG_DIR/<run_id>/` for later audit
//!
//! Records are echoed on stderr; stdout belongs to the service responses.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::fs::{create_dir_all, File};
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::process;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, OnceLock};
use std::time::Instant;

use crate::IssueId;

// =============================================================================
// Log Levels
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Trace = 0,
    Debug = 1,
    Info = 2,
    Warn = 3,
    Error = 4,
    Fatal = 5,
}

impl Level {
    pub fn from_env() -> Self {
        match std::env::var("LOG_LEVEL").as_deref() {
            Ok("trace") => Level::Trace,
            Ok("debug") => Level::Debug,
            Ok("info") => Level::Info,
            Ok("warn") => Level::Warn,
            Ok("error") => Level::Error,
            Ok("fatal") => Level::Fatal,
            _ => Level::Info,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Level::Trace => "trace",
            Level::Debug => "debug",
            Level::Info => "info",
            Level::Warn => "warn",
            Level::Error => "error",
            Level::Fatal => "fatal",
        }
    }
}

// =============================================================================
// Log Domains (categories for filtering)
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Domain {
    Graph,    // Position and argument insertion
    Belief,   // Program compilation, marginals
    Solver,   // Inference engine calls
    Market,   // Prices and bids
    Store,    // Persistence commits and loads
    Registry, // Issue lifecycle
    System,   // Startup, shutdown
    Profile,  // Timing scopes
    Audit,    // Revision trail
}

impl Domain {
    pub fn as_str(&self) -> &'static str {
        match self {
            Domain::Graph => "graph",
            Domain::Belief => "belief",
            Domain::Solver => "solver",
            Domain::Market => "market",
            Domain::Store => "store",
            Domain::Registry => "registry",
            Domain::System => "system",
            Domain::Profile => "profile",
            Domain::Audit => "audit",
        }
    }

    pub fn is_enabled(&self) -> bool {
        match std::env::var("LOG_DOMAINS").as_deref() {
            Ok("all") | Err(_) => true,
            Ok(domains) => domains.split(',').any(|d| d.trim() == self.as_str()),
        }
    }
}

// =============================================================================
// Run context
// =============================================================================

static LOG_SEQ: AtomicU64 = AtomicU64::new(0);
static RUN_CONTEXT: OnceLock<RunContext> = OnceLock::new();

fn next_seq() -> u64 {
    LOG_SEQ.fetch_add(1, Ordering::SeqCst)
}

#[derive(Debug)]
struct RunContext {
    run_id: String,
    events: Option<Mutex<BufWriter<File>>>,
    trace: Option<Mutex<BufWriter<File>>>,
}

fn open_log_file(path: PathBuf) -> Option<Mutex<BufWriter<File>>> {
    match File::create(&path) {
        Ok(file) => Some(Mutex::new(BufWriter::new(file))),
        Err(err) => {
            eprintln!("[log] failed to create {}: {}", path.display(), err);
            None
        }
    }
}

fn ensure_run_context() -> &'static RunContext {
    RUN_CONTEXT.get_or_init(|| {
        let run_id = std::env::var("RUN_ID")
            .unwrap_or_else(|_| format!("r-{}-{}", ts_epoch_ms(), process::id()));
        let base = std::env::var("LOG_DIR").unwrap_or_else(|_| "out/runs".to_string());
        let mut run_dir = PathBuf::from(base);
        run_dir.push(&run_id);
        if let Err(err) = create_dir_all(&run_dir) {
            eprintln!("[log] failed to create run dir: {}", err);
        }

        let _ = std::fs::write(
            run_dir.join("manifest.json"),
            json!({
                "run_id": run_id,
                "ts": ts_now(),
                "pid": process::id(),
                "log_dir": run_dir.to_string_lossy(),
            })
            .to_string(),
        );

        RunContext {
            events: open_log_file(run_dir.join("events.jsonl")),
            trace: open_log_file(run_dir.join("trace.jsonl")),
            run_id,
        }
    })
}

fn write_line(writer: &Option<Mutex<BufWriter<File>>>, line: &str) {
    if let Some(writer) = writer {
        if let Ok(mut w) = writer.lock() {
            let _ = writeln!(w, "{}", line);
            let _ = w.flush();
        }
    }
}

// =============================================================================
// Core logging functions
// =============================================================================

/// RFC3339 timestamp with milliseconds
pub fn ts_now() -> String {
    Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

/// Epoch milliseconds
pub fn ts_epoch_ms() -> u64 {
    Utc::now().timestamp_millis() as u64
}

/// Emit a structured log entry
pub fn log(level: Level, domain: Domain, event: &str, fields: Map<String, Value>) {
    if level < Level::from_env() || !domain.is_enabled() {
        return;
    }
    emit_record(level, domain.as_str(), event, fields);
}

fn emit_record(level: Level, component: &str, event: &str, mut fields: Map<String, Value>) {
    let ctx = ensure_run_context();

    let msg = fields.remove("msg").unwrap_or(Value::String(String::new()));
    let mut entry = Map::new();
    entry.insert("ts".to_string(), json!(ts_now()));
    entry.insert("run_id".to_string(), json!(ctx.run_id.clone()));
    entry.insert("seq".to_string(), json!(next_seq()));
    entry.insert("lvl".to_string(), json!(level.as_str().to_uppercase()));
    entry.insert("component".to_string(), json!(component));
    entry.insert("event".to_string(), json!(event));
    entry.insert("msg".to_string(), msg);
    if let Some(issue) = fields.remove("issue") {
        entry.insert("issue".to_string(), issue);
    }
    entry.insert("data".to_string(), Value::Object(fields));

    let line = Value::Object(entry).to_string();
    match level {
        Level::Trace | Level::Debug => write_line(&ctx.trace, &line),
        _ => write_line(&ctx.events, &line),
    }
    eprintln!("{}", line);
}

// =============================================================================
// Graph mutations
// =============================================================================

pub fn log_position_added(
    issue: IssueId,
    position_id: u64,
    duplicate_of: Option<u64>,
    revision: u64,
) {
    log(
        Level::Info,
        Domain::Graph,
        "position_added",
        obj(&[
            ("issue", json!(issue)),
            ("position_id", json!(position_id)),
            ("duplicate_of", json!(duplicate_of)),
            ("revision", json!(revision)),
        ]),
    );
}

pub fn log_argument_added(
    issue: IssueId,
    argument_id: u64,
    conclusion_id: u64,
    premise_ids: &[u64],
    supports_conclusion: bool,
    revision: u64,
) {
    log(
        Level::Info,
        Domain::Graph,
        "argument_added",
        obj(&[
            ("issue", json!(issue)),
            ("argument_id", json!(argument_id)),
            ("conclusion_id", json!(conclusion_id)),
            ("premise_ids", json!(premise_ids)),
            ("pro", Value::Bool(supports_conclusion)),
            ("revision", json!(revision)),
        ]),
    );
}

/// One record per revision bump, so the trail can be replayed against storage.
pub fn log_revision_committed(issue: IssueId, revision: u64, cause: &str) {
    log(
        Level::Info,
        Domain::Audit,
        "revision_committed",
        obj(&[
            ("issue", json!(issue)),
            ("revision", json!(revision)),
            ("cause", v_str(cause)),
        ]),
    );
}

pub fn log_capacity_rejected(issue: IssueId, limit: &str, max: usize, requested: usize) {
    log(
        Level::Warn,
        Domain::Graph,
        "capacity_rejected",
        obj(&[
            ("issue", json!(issue)),
            ("limit", v_str(limit)),
            ("max", json!(max)),
            ("requested", json!(requested)),
        ]),
    );
}

// =============================================================================
// Belief computation
// =============================================================================

pub fn log_beliefs_updated(issue: IssueId, terms: usize, statements: usize, solver: &str) {
    log(
        Level::Debug,
        Domain::Belief,
        "beliefs_updated",
        obj(&[
            ("issue", json!(issue)),
            ("terms", json!(terms)),
            ("statements", json!(statements)),
            ("solver", v_str(solver)),
        ]),
    );
}

pub fn log_circular_argument(issue: IssueId, argument_id: u64, conclusion_id: u64) {
    log(
        Level::Warn,
        Domain::Belief,
        "circular_argument_skipped",
        obj(&[
            ("issue", json!(issue)),
            ("argument_id", json!(argument_id)),
            ("conclusion_id", json!(conclusion_id)),
        ]),
    );
}

/// Solver failures keep the previous marginals; the mutation itself stands.
pub fn log_solver_failure(issue: IssueId, solver: &str, error: &str) {
    log(
        Level::Warn,
        Domain::Solver,
        "solver_failed",
        obj(&[
            ("issue", json!(issue)),
            ("solver", v_str(solver)),
            ("msg", v_str("keeping previous marginals")),
            ("error", v_str(error)),
        ]),
    );
}

pub fn log_price_recorded(issue: IssueId, position_id: u64, price: f64) {
    log(
        Level::Info,
        Domain::Market,
        "price_recorded",
        obj(&[
            ("issue", json!(issue)),
            ("position_id", json!(position_id)),
            ("price", v_num(price)),
        ]),
    );
}

// =============================================================================
// Registry and storage
// =============================================================================

pub fn log_issue_event(event: &str, issue: IssueId, name: &str) {
    log(
        Level::Info,
        Domain::Registry,
        event,
        obj(&[("issue", json!(issue)), ("name", v_str(name))]),
    );
}

pub fn log_commit(issue: Option<IssueId>, changes: usize) {
    log(
        Level::Debug,
        Domain::Store,
        "commit",
        obj(&[("issue", json!(issue)), ("changes", json!(changes))]),
    );
}

pub fn log_storage_failure(issue: Option<IssueId>, error: &str, conflict: bool) {
    let level = if conflict { Level::Fatal } else { Level::Error };
    log(
        level,
        Domain::Store,
        if conflict { "transaction_conflict" } else { "commit_failed" },
        obj(&[
            ("issue", json!(issue)),
            ("error", v_str(error)),
            ("conflict", Value::Bool(conflict)),
        ]),
    );
}

// =============================================================================
// Utility Functions
// =============================================================================

pub fn obj(pairs: &[(&str, Value)]) -> Map<String, Value> {
    let mut map = Map::new();
    for (k, v) in pairs {
        map.insert((*k).to_string(), v.clone());
    }
    map
}

pub fn v_str(s: &str) -> Value {
    Value::String(s.to_string())
}

pub fn v_num(n: f64) -> Value {
    json!(n)
}

// =============================================================================
// Profiling Scope
// =============================================================================

/// Profiling scope that emits structured timing on drop.
pub struct ProfileScope {
    label: &'static str,
    context: Map<String, Value>,
    started: Instant,
}

impl ProfileScope {
    pub fn with_context(label: &'static str, fields: &[(&str, Value)]) -> Self {
        Self {
            label,
            context: obj(fields),
            started: Instant::now(),
        }
    }
}

impl Drop for ProfileScope {
    fn drop(&mut self) {
        let elapsed_ms = self.started.elapsed().as_secs_f64() * 1000.0;
        let mut fields = std::mem::take(&mut self.context);
        fields.insert("label".to_string(), v_str(self.label));
        fields.insert("elapsed_ms".to_string(), v_num(elapsed_ms));
        log(Level::Trace, Domain::Profile, "profile", fields);
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_ordering() {
        assert!(Level::Trace < Level::Debug);
        assert!(Level::Debug < Level::Info);
        assert!(Level::Info < Level::Warn);
        assert!(Level::Warn < Level::Error);
        assert!(Level::Error < Level::Fatal);
    }

    #[test]
    fn test_obj_helper() {
        let m = obj(&[("key", v_str("value")), ("num", v_num(42.0))]);
        assert_eq!(m.get("key").unwrap(), "value");
        assert_eq!(m.get("num").unwrap(), 42.0);
    }

    #[test]
    fn test_seq_increments() {
        let s1 = next_seq();
        let s2 = next_seq();
        assert!(s2 > s1);
    }

    #[test]
    fn test_domain_names_are_snake_case() {
        for d in [Domain::Graph, Domain::Belief, Domain::Solver, Domain::Registry, Domain::Audit] {
            let encoded = serde_json::to_string(&d).unwrap();
            assert_eq!(encoded, format!("\"{}\"", d.as_str()));
        }
    }
}
