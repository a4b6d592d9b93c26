//! View history ledger.
//!
//! Append-only, tab-separated, one row per confirmed play:
//!
//!   timestamp  video_id  platform  original_url
//!
//! `timestamp` is RFC 3339 UTC with microseconds. Rows are only ever
//! appended, so file order is arrival order. The rate limiter counts rows
//! inside its window; the dashboard lists the newest ones.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

const LEDGER_HEADER: &str = "timestamp\tvideo_id\tplatform\toriginal_url\n";

/// One confirmed play.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ViewRecord {
    pub timestamp: DateTime<Utc>,
    pub video_id: String,
    pub platform: String,
    pub original_url: String,
}

impl ViewRecord {
    pub fn new(
        video_id: impl Into<String>,
        platform: impl Into<String>,
        original_url: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            timestamp,
            video_id: video_id.into(),
            platform: platform.into(),
            original_url: original_url.into(),
        }
    }
}

/// File-backed ledger. Cheap to clone; every call goes to disk.
#[derive(Debug, Clone)]
pub struct HistoryLedger {
    path: PathBuf,
}

impl HistoryLedger {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn append(&self, record: &ViewRecord) -> anyhow::Result<()> {
        let exists = tokio::fs::try_exists(&self.path).await.unwrap_or(false);
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut f = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        if !exists {
            f.write_all(LEDGER_HEADER.as_bytes()).await?;
        }
        f.write_all(encode_row(record).as_bytes()).await?;
        f.flush().await?;
        info!(
            "[history] recorded {}:{} at {}",
            record.platform, record.video_id, record.timestamp
        );
        Ok(())
    }

    /// Number of views with `timestamp >= since`.
    pub async fn count_since(&self, since: DateTime<Utc>) -> anyhow::Result<usize> {
        let records = self.load_all().await?;
        Ok(records.iter().filter(|r| r.timestamp >= since).count())
    }

    /// Up to `limit` views, newest first.
    pub async fn recent(&self, limit: usize) -> anyhow::Result<Vec<ViewRecord>> {
        let mut records = self.load_all().await?;
        records.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        records.truncate(limit);
        Ok(records)
    }

    async fn load_all(&self) -> anyhow::Result<Vec<ViewRecord>> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        Ok(content
            .lines()
            .filter(|l| !l.starts_with("timestamp\t"))
            .filter_map(|line| {
                let row = parse_row(line);
                if row.is_none() && !line.trim().is_empty() {
                    debug!("[history] skipping malformed row: {:?}", line);
                }
                row
            })
            .collect())
    }
}

fn encode_row(r: &ViewRecord) -> String {
    format!(
        "{}\t{}\t{}\t{}\n",
        r.timestamp.to_rfc3339_opts(SecondsFormat::Micros, true),
        ledger_esc(&r.video_id),
        ledger_esc(&r.platform),
        ledger_esc(&r.original_url),
    )
}

fn ledger_esc(s: &str) -> String {
    s.replace(['\t', '\n'], " ").replace('\r', "")
}

fn parse_row(line: &str) -> Option<ViewRecord> {
    let cols: Vec<&str> = line.splitn(4, '\t').collect();
    if cols.len() < 3 {
        return None;
    }
    let timestamp = DateTime::parse_from_rfc3339(cols[0].trim())
        .ok()?
        .with_timezone(&Utc);
    Some(ViewRecord {
        timestamp,
        video_id: cols[1].trim().to_string(),
        platform: cols[2].trim().to_string(),
        original_url: cols.get(3).map(|s| s.trim().to_string()).unwrap_or_default(),
    })
}
