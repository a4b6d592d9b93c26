//! What the rest of the daemon needs from the media players.
//!
//! [`crate::mpv::MpvController`] is the real implementation; tests drive the
//! dispatcher and the background loops through fakes.
use async_trait::async_trait;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PlaybackError {
    #[error("no displays are running")]
    NoDisplays,
    #[error("display {display} unreachable: {reason}")]
    Unreachable { display: usize, reason: String },
    #[error("display {display} rejected command: {reason}")]
    Rejected { display: usize, reason: String },
}

/// How a successful `load_and_play` ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayOutcome {
    /// Every display accepted the file; not waiting for it to finish.
    Started,
    /// The primary display played the file and went back to idle.
    Completed,
    /// Still not idle when the wait ceiling passed.
    NotConfirmed,
}

#[async_trait]
pub trait Player: Send + Sync {
    fn display_count(&self) -> usize;

    /// Load `path` on every display, in display order, stopping at the
    /// first display that fails. With `wait`, block until the primary
    /// display is idle again.
    async fn load_and_play(&self, path: &Path, wait: bool) -> Result<PlayOutcome, PlaybackError>;

    /// `idle-active` of one display. Any channel failure reads as "not idle".
    async fn is_idle(&self, display: usize) -> bool;

    /// Best-effort on-screen text on every display.
    async fn show_text(&self, text: &str, duration: Duration);

    /// Best-effort: put the baseline screen back on every display.
    async fn restore_baseline(&self);

    /// True once any managed player process has exited.
    fn has_exited(&self) -> bool;
}
