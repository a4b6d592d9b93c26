#![allow(dead_code)]

use chrono::{DateTime, Duration, Utc};
use kiosk_proto::history::{HistoryLedger, ViewRecord};
use tempfile::TempDir;

/// A ledger in a throwaway directory. Keep the `TempDir` alive for as long
/// as the ledger is used.
pub fn temp_ledger() -> (TempDir, HistoryLedger) {
    let dir = tempfile::tempdir().expect("tempdir");
    let ledger = HistoryLedger::new(dir.path().join("history.tsv"));
    (dir, ledger)
}

pub async fn seed_view(ledger: &HistoryLedger, video_id: &str, at: DateTime<Utc>) {
    let url = format!("https://youtu.be/{}", video_id);
    ledger
        .append(&ViewRecord::new(video_id, "youtube", url, at))
        .await
        .expect("append should succeed");
}

pub fn hours_ago(now: DateTime<Utc>, hours: i64) -> DateTime<Utc> {
    now - Duration::hours(hours)
}
