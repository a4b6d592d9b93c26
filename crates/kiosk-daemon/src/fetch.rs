//! yt-dlp wrapper for fetching videos into the local cache.

use anyhow::{Context, Result};
use async_trait::async_trait;
use kiosk_proto::platform;
use kiosk_proto::recognizer::ParsedVideo;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tracing::{debug, info, warn};

/// Cap on resolution keeps downloads short on kiosk hardware.
const FORMAT_SELECTOR: &str = "best[height<=720]/best";

/// Given a recognized video, produce a playable local file.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, video: &ParsedVideo, cache_dir: &Path) -> Result<PathBuf>;
}

pub struct YtDlpFetcher {
    binary: PathBuf,
}

impl YtDlpFetcher {
    pub fn new(binary: PathBuf) -> Self {
        Self { binary }
    }

    /// Locate yt-dlp the usual way, falling back to the bare name so a
    /// missing binary surfaces as a fetch failure instead of a startup one.
    pub fn discover() -> Self {
        let binary = platform::find_yt_dlp_binary().unwrap_or_else(|| {
            warn!("yt-dlp not found; fetches will fail until it is installed");
            PathBuf::from("yt-dlp")
        });
        Self::new(binary)
    }
}

/// `<platform>_<id>`, the file stem every cached copy is stored under.
pub fn cache_stem(video: &ParsedVideo) -> String {
    format!("{}_{}", video.platform(), video.video_id())
}

#[async_trait]
impl Fetcher for YtDlpFetcher {
    async fn fetch(&self, video: &ParsedVideo, cache_dir: &Path) -> Result<PathBuf> {
        let stem = cache_stem(video);
        if let Some(hit) = find_cached(cache_dir, &stem).await? {
            info!("Cache hit: {}", hit.display());
            return Ok(hit);
        }

        tokio::fs::create_dir_all(cache_dir)
            .await
            .with_context(|| format!("Failed to create cache dir {}", cache_dir.display()))?;

        let output_template = format!("{}/{}.%(ext)s", cache_dir.display(), stem);
        info!("Fetching {} to {}", video.original_url(), output_template);

        let mut child = Command::new(&self.binary)
            .arg("--no-progress")
            .arg("--newline")
            .arg("--no-playlist")
            .arg("-f")
            .arg(FORMAT_SELECTOR)
            .arg("-o")
            .arg(&output_template)
            .arg(video.original_url())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            // A fetch abandoned at shutdown must not keep writing to the cache.
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("Failed to spawn {}", self.binary.display()))?;

        if let Some(stdout) = child.stdout.take() {
            let mut lines = BufReader::new(stdout).lines();
            tokio::spawn(async move {
                while let Ok(Some(line)) = lines.next_line().await {
                    debug!("yt-dlp: {}", line);
                }
            });
        }

        if let Some(stderr) = child.stderr.take() {
            let mut lines = BufReader::new(stderr).lines();
            tokio::spawn(async move {
                while let Ok(Some(line)) = lines.next_line().await {
                    warn!("yt-dlp stderr: {}", line);
                }
            });
        }

        let status = child.wait().await.context("Failed to wait for yt-dlp")?;
        if !status.success() {
            anyhow::bail!("yt-dlp exited with status: {:?}", status.code());
        }

        let file = find_cached(cache_dir, &stem)
            .await?
            .with_context(|| format!("Downloaded file not found for: {}", stem))?;
        info!("Fetch complete: {}", file.display());
        Ok(file)
    }
}

/// Leftovers from an interrupted download share the stem but are not playable.
fn is_partial(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("part" | "ytdl" | "temp")
    ) || path
        .file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| n.contains(".part"))
}

async fn find_cached(cache_dir: &Path, stem: &str) -> Result<Option<PathBuf>> {
    let mut entries = match tokio::fs::read_dir(cache_dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };

    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if is_partial(&path) {
            continue;
        }
        if path.file_stem().and_then(|n| n.to_str()) == Some(stem) {
            return Ok(Some(path));
        }
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use kiosk_proto::recognizer::RecognizerRegistry;

    fn video() -> ParsedVideo {
        RecognizerRegistry::with_defaults()
            .recognize("https://youtu.be/dQw4w9WgXcQ")
            .unwrap()
    }

    #[test]
    fn test_cache_stem() {
        assert_eq!(cache_stem(&video()), "youtube_dQw4w9WgXcQ");
    }

    #[test]
    fn test_partial_files() {
        assert!(is_partial(Path::new("/c/youtube_x.mp4.part")));
        assert!(is_partial(Path::new("/c/youtube_x.ytdl")));
        assert!(is_partial(Path::new("/c/youtube_x.part-Frag3")));
        assert!(!is_partial(Path::new("/c/youtube_x.mp4")));
    }

    #[tokio::test]
    async fn test_cached_file_skips_download() {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::write(dir.path().join("youtube_dQw4w9WgXcQ.mp4.part"), b"x")
            .await
            .unwrap();
        let cached = dir.path().join("youtube_dQw4w9WgXcQ.mp4");
        tokio::fs::write(&cached, b"video").await.unwrap();

        // A binary that cannot run proves nothing was spawned.
        let fetcher = YtDlpFetcher::new(dir.path().join("no-such-yt-dlp"));
        let got = fetcher.fetch(&video(), dir.path()).await.unwrap();
        assert_eq!(got, cached);
        assert_eq!(fetcher.fetch(&video(), dir.path()).await.unwrap(), cached);
    }

    #[tokio::test]
    async fn test_missing_binary_is_a_fetch_error() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = YtDlpFetcher::new(dir.path().join("no-such-yt-dlp"));
        let err = fetcher.fetch(&video(), &dir.path().join("cache")).await;
        assert!(err.is_err());
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn test_abandoned_fetch_kills_downloader() {
        use std::os::unix::fs::PermissionsExt;
        use std::time::Duration;

        let dir = tempfile::tempdir().unwrap();
        let pid_file = dir.path().join("pid");
        let script = dir.path().join("slow-yt-dlp");
        std::fs::write(
            &script,
            format!("#!/bin/sh\necho $$ > {}\nexec sleep 30\n", pid_file.display()),
        )
        .unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

        let cache = dir.path().join("cache");
        let task = tokio::spawn(async move {
            let fetcher = YtDlpFetcher::new(script);
            fetcher.fetch(&video(), &cache).await
        });

        let mut pid = None;
        for _ in 0..100 {
            tokio::time::sleep(Duration::from_millis(20)).await;
            if let Ok(s) = std::fs::read_to_string(&pid_file) {
                if let Ok(p) = s.trim().parse::<u32>() {
                    pid = Some(p);
                    break;
                }
            }
        }
        let pid = pid.expect("downloader started");

        task.abort();
        let _ = task.await;

        // Killed means gone, or a zombie nobody has reaped yet.
        let mut alive = true;
        for _ in 0..100 {
            match std::fs::read_to_string(format!("/proc/{}/stat", pid)) {
                Err(_) => alive = false,
                Ok(stat) => {
                    let state = stat.rsplit(')').next().and_then(|r| r.split_whitespace().next());
                    alive = state != Some("Z");
                }
            }
            if !alive {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(!alive, "yt-dlp kept running after its fetch was dropped");
    }

    #[tokio::test]
    async fn test_missing_cache_dir_is_a_miss() {
        let dir = tempfile::tempdir().unwrap();
        let found = find_cached(&dir.path().join("absent"), "youtube_x").await.unwrap();
        assert!(found.is_none());
    }
}
