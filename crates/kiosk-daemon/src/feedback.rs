//! Audible cues for the person at the scanner.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;
use tracing::debug;

pub const SUCCESS_SOUND: &str = "success.mp3";
pub const ERROR_SOUND: &str = "error.mp3";

/// Fire-and-forget; implementations must not block or fail.
pub trait Feedback: Send + Sync {
    fn success(&self);
    fn error(&self);
}

/// Plays short clips through a throwaway audio-only mpv.
pub struct SoundCues {
    player: PathBuf,
    sounds_dir: PathBuf,
}

impl SoundCues {
    pub fn new(player: PathBuf, sounds_dir: PathBuf) -> Self {
        Self { player, sounds_dir }
    }

    fn play(&self, name: &str) {
        let path = self.sounds_dir.join(name);
        if !path.exists() {
            debug!("Sound file not found: {}", path.display());
            return;
        }
        if let Err(e) = spawn_detached(&self.player, &path) {
            debug!("Could not play sound {}: {}", path.display(), e);
        }
    }
}

/// Must run inside the runtime; the child is reaped by a spawned task.
fn spawn_detached(player: &Path, clip: &Path) -> std::io::Result<()> {
    let mut child = Command::new(player)
        .arg("--no-video")
        .arg("--really-quiet")
        .arg(clip)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()?;
    tokio::spawn(async move {
        if let Err(e) = child.wait().await {
            debug!("Sound player wait failed: {}", e);
        }
    });
    Ok(())
}

impl Feedback for SoundCues {
    fn success(&self) {
        self.play(SUCCESS_SOUND);
    }

    fn error(&self) {
        self.play(ERROR_SOUND);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_missing_sounds_are_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let cues = SoundCues::new(PathBuf::from("mpv"), dir.path().join("none"));
        cues.success();
        cues.error();
    }

    #[tokio::test]
    async fn test_unrunnable_player_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(ERROR_SOUND), b"").unwrap();
        let cues = SoundCues::new(dir.path().join("no-such-mpv"), dir.path().to_path_buf());
        cues.error();
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_cue_runs_audio_only_player() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("args.txt");
        let player = dir.path().join("fake-mpv");
        std::fs::write(
            &player,
            format!("#!/bin/sh\necho \"$@\" > {}\n", out.display()),
        )
        .unwrap();
        std::fs::set_permissions(&player, std::fs::Permissions::from_mode(0o755)).unwrap();
        std::fs::write(dir.path().join(SUCCESS_SOUND), b"").unwrap();

        let cues = SoundCues::new(player, dir.path().to_path_buf());
        cues.success();

        let mut args = String::new();
        for _ in 0..100 {
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            if let Ok(s) = std::fs::read_to_string(&out) {
                if !s.is_empty() {
                    args = s;
                    break;
                }
            }
        }
        let clip = dir.path().join(SUCCESS_SOUND);
        assert_eq!(
            args.trim(),
            format!("--no-video --really-quiet {}", clip.display())
        );
    }
}
