/// Scan dispatcher: the single consumer of the scan queue.
///
/// Every input source (scanner, web form, direct link) pushes a `ScanEvent`
/// into one bounded channel. The dispatcher takes the newest event only,
/// then runs it through
///
/// ```text
///   recognize → rate check → success cue → fetch → play → record
/// ```
///
/// Any step failing abandons that event alone; only a dead player process
/// stops the loop.
use chrono::Utc;
use kiosk_proto::config::Config;
use kiosk_proto::debug_log::DebugLog;
use kiosk_proto::history::HistoryLedger;
use kiosk_proto::rate_limit;
use kiosk_proto::recognizer::{ParsedVideo, RecognizerRegistry};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::feedback::Feedback;
use crate::fetch::Fetcher;
use crate::player::{PlayOutcome, PlaybackError, Player};

pub const SCAN_QUEUE_CAPACITY: usize = 64;
const QUEUE_POLL: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanSource {
    Scanner,
    WebForm,
    DirectLink,
}

/// A raw URL from one of the inputs, consumed at most once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanEvent {
    pub url: String,
    pub source: ScanSource,
}

impl ScanEvent {
    pub fn new(url: impl Into<String>, source: ScanSource) -> Self {
        Self {
            url: url.into(),
            source,
        }
    }
}

pub fn scan_queue() -> (mpsc::Sender<ScanEvent>, mpsc::Receiver<ScanEvent>) {
    mpsc::channel(SCAN_QUEUE_CAPACITY)
}

/// A recognized video and the local file it will play from.
#[derive(Debug, Clone)]
pub struct PlaybackRequest {
    pub video: ParsedVideo,
    pub media: PathBuf,
}

/// Why one event was abandoned.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("unsupported or invalid URL")]
    Unrecognized,
    #[error("rate limit exceeded")]
    RateLimitExceeded,
    #[error("rate check failed: {0:#}")]
    RateCheck(anyhow::Error),
    #[error("fetch failed: {0:#}")]
    Fetch(anyhow::Error),
    #[error("playback failed: {0}")]
    Playback(#[from] PlaybackError),
    /// Played, but the ledger write failed.
    #[error("could not record view: {0:#}")]
    Record(anyhow::Error),
}

impl PipelineError {
    /// The short line shown on the debug overlay.
    pub fn status_line(&self) -> &'static str {
        match self {
            Self::Unrecognized => "Error: Invalid or unsupported URL",
            Self::RateLimitExceeded => "Error: Rate limit exceeded",
            Self::RateCheck(_) => "Error: Could not check rate limit",
            Self::Fetch(_) => "Error: Download failed",
            Self::Playback(_) => "Error: Playback failed",
            Self::Record(_) => "Error: Could not record view",
        }
    }

    /// Whether the scanning user hears the error cue. A failed ledger
    /// write happens after the video already played.
    pub fn cues_error(&self) -> bool {
        !matches!(self, Self::Record(_))
    }
}

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("media player exited unexpectedly")]
    PlayerExited,
}

pub struct Dispatcher {
    config_path: PathBuf,
    registry: RecognizerRegistry,
    player: Arc<dyn Player>,
    fetcher: Arc<dyn Fetcher>,
    feedback: Arc<dyn Feedback>,
    debug_log: DebugLog,
    events: mpsc::Receiver<ScanEvent>,
}

impl Dispatcher {
    pub fn new(
        config_path: PathBuf,
        registry: RecognizerRegistry,
        player: Arc<dyn Player>,
        fetcher: Arc<dyn Fetcher>,
        feedback: Arc<dyn Feedback>,
        debug_log: DebugLog,
        events: mpsc::Receiver<ScanEvent>,
    ) -> Self {
        Self {
            config_path,
            registry,
            player,
            fetcher,
            feedback,
            debug_log,
            events,
        }
    }

    /// Run until the player dies (error) or every sender is gone (Ok).
    pub async fn run(mut self) -> Result<(), DispatchError> {
        info!("Ready. Scan a QR code to play a video.");
        loop {
            if self.player.has_exited() {
                error!("mpv exited unexpectedly");
                return Err(DispatchError::PlayerExited);
            }

            let first = match tokio::time::timeout(QUEUE_POLL, self.events.recv()).await {
                Err(_) => continue,
                Ok(None) => {
                    info!("Scan queue closed, dispatcher stopping");
                    return Ok(());
                }
                Ok(Some(event)) => event,
            };
            let event = self.drain_latest(first);
            self.handle(&event).await;
        }
    }

    /// Replace, don't queue: anything still waiting supersedes `first`.
    fn drain_latest(&mut self, first: ScanEvent) -> ScanEvent {
        let mut latest = first;
        while let Ok(next) = self.events.try_recv() {
            debug!("Dropping superseded scan: {}", latest.url);
            latest = next;
        }
        latest
    }

    async fn handle(&self, event: &ScanEvent) {
        let preview: String = event.url.chars().take(60).collect();
        self.debug_log.append(format!("Scanned: {}", preview));
        info!("Scan from {:?}: {}", event.source, preview);

        match self.process(event).await {
            Ok(PlayOutcome::Started) => self.debug_log.append("Playing"),
            Ok(PlayOutcome::Completed) => self.debug_log.append("Playback complete"),
            Ok(PlayOutcome::NotConfirmed) => self.debug_log.append("Playback not confirmed"),
            Err(e) => {
                match &e {
                    PipelineError::Unrecognized => debug!("Ignoring {}: {}", preview, e),
                    PipelineError::RateLimitExceeded => info!("Skipping {}: {}", preview, e),
                    PipelineError::Record(_) => error!("{}", e),
                    _ => info!("Giving up on {}: {}", preview, e),
                }
                self.debug_log.append(e.status_line());
                if e.cues_error() {
                    self.feedback.error();
                }
            }
        }
    }

    /// One full pass of the pipeline for one event.
    pub async fn process(&self, event: &ScanEvent) -> Result<PlayOutcome, PipelineError> {
        let video = self
            .registry
            .recognize(&event.url)
            .ok_or(PipelineError::Unrecognized)?;

        // Fresh read: settings may have changed since the last scan.
        let config = Config::load_from(&self.config_path).map_err(PipelineError::RateCheck)?;
        let ledger = HistoryLedger::new(config.paths.history_file.clone());
        let allowed = rate_limit::allow(&config.rate_window(), &ledger, Utc::now())
            .await
            .map_err(PipelineError::RateCheck)?;
        if !allowed {
            return Err(PipelineError::RateLimitExceeded);
        }

        self.feedback.success();
        self.debug_log.append("Downloading...");
        info!("Downloading: {}", video.original_url());

        let media = self
            .fetcher
            .fetch(&video, &config.paths.cache_dir)
            .await
            .map_err(PipelineError::Fetch)?;
        let request = PlaybackRequest { video, media };

        let name = request
            .media
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        self.debug_log.append(format!("Playing: {}", name));
        info!("Playing: {}", name);

        // Several displays: fire and forget, the idle supervisor restores
        // the baseline. One display: block until it is idle again.
        let wait = self.player.display_count() <= 1;
        let outcome = self.player.load_and_play(&request.media, wait).await?;
        if outcome == PlayOutcome::NotConfirmed {
            warn!("Playback of {} not confirmed finished", name);
        }

        rate_limit::record(
            &ledger,
            request.video.video_id(),
            request.video.platform(),
            request.video.original_url(),
            Utc::now(),
        )
        .await
        .map_err(PipelineError::Record)?;

        Ok(outcome)
    }
}
