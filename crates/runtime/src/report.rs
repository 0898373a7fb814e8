//! At-exit report for compiled Tern programs
//!
//! Dumps runtime counters when the main context closes, controlled by the
//! `TERN_REPORT` env var:
//! - Unset or `0` → no report, zero cost
//! - `1` → human-readable to stderr
//! - `json` → JSON to stderr (needs the `report-json` feature; falls back
//!   to the human form without it)

use std::sync::atomic::Ordering;

use tern_core::stats::{
    CONTEXTS_COMPLETED, CONTEXTS_SPAWNED, MESSAGES_RECEIVED, MESSAGES_SENT, StatsSnapshot,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReportFormat {
    Human,
    Json,
}

fn format_from_env() -> Option<ReportFormat> {
    match std::env::var("TERN_REPORT").ok()?.as_str() {
        "" | "0" => None,
        "json" => Some(ReportFormat::Json),
        _ => Some(ReportFormat::Human),
    }
}

/// Emit the report for a closing context if `TERN_REPORT` asks for one.
pub fn emit(snapshot: &StatsSnapshot) {
    match format_from_env() {
        None => {}
        Some(ReportFormat::Human) => human(snapshot),
        Some(ReportFormat::Json) => json(snapshot),
    }
}

fn human(snapshot: &StatsSnapshot) {
    eprintln!("tern runtime report");
    eprintln!("  uptime:            {:?}", snapshot.uptime);
    eprintln!("  allocated bytes:   {}", snapshot.allocated_bytes);
    eprintln!("  peak heap bytes:   {}", snapshot.peak_heap_bytes);
    eprintln!("  collections:       {}", snapshot.collections);
    eprintln!("  copied bytes:      {}", snapshot.copied_bytes);
    eprintln!(
        "  contexts:          {} spawned / {} completed",
        CONTEXTS_SPAWNED.load(Ordering::Relaxed),
        CONTEXTS_COMPLETED.load(Ordering::Relaxed)
    );
    eprintln!(
        "  messages:          {} sent / {} received",
        MESSAGES_SENT.load(Ordering::Relaxed),
        MESSAGES_RECEIVED.load(Ordering::Relaxed)
    );
}

#[cfg(feature = "report-json")]
fn json(snapshot: &StatsSnapshot) {
    let value = serde_json::json!({
        "uptime_ms": snapshot.uptime.as_millis() as u64,
        "allocated_bytes": snapshot.allocated_bytes,
        "peak_heap_bytes": snapshot.peak_heap_bytes,
        "collections": snapshot.collections,
        "copied_bytes": snapshot.copied_bytes,
        "contexts_spawned": CONTEXTS_SPAWNED.load(Ordering::Relaxed),
        "contexts_completed": CONTEXTS_COMPLETED.load(Ordering::Relaxed),
        "messages_sent": MESSAGES_SENT.load(Ordering::Relaxed),
        "messages_received": MESSAGES_RECEIVED.load(Ordering::Relaxed),
    });
    eprintln!("{value}");
}

#[cfg(not(feature = "report-json"))]
fn json(snapshot: &StatsSnapshot) {
    human(snapshot);
}
