//! Periodic push of the debug log to the players' on-screen text.

use kiosk_proto::config::Config;
use kiosk_proto::debug_log::DebugLog;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::player::Player;

pub const OVERLAY_INTERVAL: Duration = Duration::from_secs(2);
/// Longer than the interval so the text never flickers off between pushes.
pub const OVERLAY_DURATION: Duration = Duration::from_secs(30);

pub struct OverlayFeed {
    config_path: PathBuf,
    debug_log: DebugLog,
    player: Arc<dyn Player>,
}

impl OverlayFeed {
    pub fn new(config_path: PathBuf, debug_log: DebugLog, player: Arc<dyn Player>) -> Self {
        Self {
            config_path,
            debug_log,
            player,
        }
    }

    /// One update. Returns whether text was pushed.
    pub async fn tick(&self) -> bool {
        // Re-read every time; debug mode is toggled from the settings page.
        let enabled = match Config::load_from(&self.config_path) {
            Ok(config) => config.display.debug_mode,
            Err(e) => {
                debug!("Overlay: could not read config: {}", e);
                return false;
            }
        };
        if !enabled {
            return false;
        }
        let lines = self.debug_log.snapshot();
        if lines.is_empty() {
            return false;
        }
        self.player.show_text(&lines.join("\n"), OVERLAY_DURATION).await;
        true
    }

    pub async fn run(self) {
        let mut ticker = tokio::time::interval(OVERLAY_INTERVAL);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            self.tick().await;
        }
    }
}
