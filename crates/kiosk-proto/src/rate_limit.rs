//! Sliding-window viewing quota.
//!
//! There is no limiter state: every check recounts the ledger against the
//! window as currently configured, so a settings change applies to the very
//! next scan.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::history::{HistoryLedger, ViewRecord};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RateWindow {
    pub max_videos: u32,
    pub period_hours: f64,
}

impl RateWindow {
    /// Start of the trailing window ending at `now`. Saturates at the
    /// earliest representable instant for windows longer than chrono can
    /// subtract.
    pub fn window_start(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        // `as` saturates, so an oversized period becomes i64::MAX micros.
        let micros = (self.period_hours * 3600.0 * 1_000_000.0).round() as i64;
        now.checked_sub_signed(Duration::microseconds(micros))
            .unwrap_or(DateTime::<Utc>::MIN_UTC)
    }

    /// Whether another play fits given `count` plays already in the window.
    pub fn admits(&self, count: usize) -> bool {
        (count as u64) < u64::from(self.max_videos)
    }
}

/// True when one more play is allowed at `now`.
pub async fn allow(
    window: &RateWindow,
    ledger: &HistoryLedger,
    now: DateTime<Utc>,
) -> anyhow::Result<bool> {
    let since = window.window_start(now);
    let count = ledger.count_since(since).await?;
    tracing::debug!(
        "[rate] {} of {} views since {}",
        count,
        window.max_videos,
        since
    );
    Ok(window.admits(count))
}

/// Append a confirmed play. Only call once the player accepted the video.
pub async fn record(
    ledger: &HistoryLedger,
    video_id: &str,
    platform: &str,
    original_url: &str,
    now: DateTime<Utc>,
) -> anyhow::Result<ViewRecord> {
    let rec = ViewRecord::new(video_id, platform, original_url, now);
    ledger.append(&rec).await?;
    Ok(rec)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_window_start() {
        let now = Utc::now();
        let w = RateWindow {
            max_videos: 3,
            period_hours: 1.5,
        };
        assert_eq!(now - w.window_start(now), Duration::minutes(90));
    }

    #[test]
    fn test_huge_window_saturates() {
        let now = Utc::now();
        let w = RateWindow {
            max_videos: 3,
            period_hours: 1e12,
        };
        assert_eq!(w.window_start(now), DateTime::<Utc>::MIN_UTC);
    }

    #[test]
    fn test_admits_is_strictly_less_than() {
        let w = RateWindow {
            max_videos: 2,
            period_hours: 24.0,
        };
        assert!(w.admits(0));
        assert!(w.admits(1));
        assert!(!w.admits(2));
        assert!(!w.admits(5));
    }
}
