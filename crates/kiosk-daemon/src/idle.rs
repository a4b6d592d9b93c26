//! Puts the baseline screen back after a video ends.

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use crate::player::Player;

pub const IDLE_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Edge detector over successive idle observations of the primary display.
///
/// Fires once per playing→idle transition. The baseline image is itself
/// loaded content and reads as "not idle", so showing it re-arms the
/// tracker without triggering another restore.
#[derive(Debug, Default)]
pub struct IdleTracker {
    was_playing: bool,
}

impl IdleTracker {
    /// Feed one observation; true when the baseline should be restored now.
    pub fn observe(&mut self, idle: bool) -> bool {
        if idle && self.was_playing {
            self.was_playing = false;
            return true;
        }
        if !idle {
            self.was_playing = true;
        }
        false
    }
}

pub struct IdleSupervisor {
    player: Arc<dyn Player>,
    tracker: IdleTracker,
    interval: Duration,
}

impl IdleSupervisor {
    pub fn new(player: Arc<dyn Player>) -> Self {
        Self {
            player,
            tracker: IdleTracker::default(),
            interval: IDLE_POLL_INTERVAL,
        }
    }

    /// One poll. Returns whether the baseline was restored.
    pub async fn tick(&mut self) -> bool {
        let idle = self.player.is_idle(0).await;
        if !self.tracker.observe(idle) {
            return false;
        }
        info!("Playback finished, restoring baseline screen");
        self.player.restore_baseline().await;
        true
    }

    pub async fn run(mut self) {
        debug!("Idle supervisor polling every {:?}", self.interval);
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            self.tick().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::player::{PlayOutcome, PlaybackError};
    use async_trait::async_trait;
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    #[test]
    fn test_restore_fires_once_per_edge() {
        let mut tracker = IdleTracker::default();
        let fired: Vec<bool> = [false, false, true, true, true]
            .iter()
            .map(|&idle| tracker.observe(idle))
            .collect();
        assert_eq!(fired, vec![false, false, true, false, false]);
    }

    #[test]
    fn test_idle_from_start_never_fires() {
        let mut tracker = IdleTracker::default();
        assert!(!tracker.observe(true));
        assert!(!tracker.observe(true));
    }

    #[test]
    fn test_each_playback_gets_its_own_restore() {
        let mut tracker = IdleTracker::default();
        let seq = [false, true, false, false, true, true];
        let count = seq.iter().filter(|&&idle| tracker.observe(idle)).count();
        assert_eq!(count, 2);
    }

    /// Replays a scripted sequence of idle answers.
    struct ScriptedPlayer {
        answers: Mutex<Vec<bool>>,
        restores: AtomicUsize,
    }

    #[async_trait]
    impl Player for ScriptedPlayer {
        fn display_count(&self) -> usize {
            1
        }

        async fn load_and_play(&self, _: &Path, _: bool) -> Result<PlayOutcome, PlaybackError> {
            Ok(PlayOutcome::Started)
        }

        async fn is_idle(&self, display: usize) -> bool {
            assert_eq!(display, 0, "only the primary display is polled");
            let mut answers = self.answers.lock().unwrap();
            if answers.is_empty() {
                true
            } else {
                answers.remove(0)
            }
        }

        async fn show_text(&self, _: &str, _: Duration) {}

        async fn restore_baseline(&self) {
            self.restores.fetch_add(1, Ordering::SeqCst);
        }

        fn has_exited(&self) -> bool {
            false
        }
    }

    #[tokio::test]
    async fn test_supervisor_restores_on_edge() {
        let player = Arc::new(ScriptedPlayer {
            answers: Mutex::new(vec![false, false, true, true, true]),
            restores: AtomicUsize::new(0),
        });
        let mut supervisor = IdleSupervisor::new(player.clone());
        let mut fired = Vec::new();
        for _ in 0..5 {
            fired.push(supervisor.tick().await);
        }
        assert_eq!(fired, vec![false, false, true, false, false]);
        assert_eq!(player.restores.load(Ordering::SeqCst), 1);
    }
}
