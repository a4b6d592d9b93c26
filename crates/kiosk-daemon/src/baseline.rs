//! The image shown while nothing is playing.

use anyhow::Context;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

pub const GENERATED_NAME: &str = "idle.ppm";
const WIDTH: usize = 1920;
const HEIGHT: usize = 1080;

/// Black frame with a white right-pointing "play" triangle in the middle,
/// as a binary PPM (mpv scales it to the output).
pub fn render_play_screen(width: usize, height: usize) -> Vec<u8> {
    let header = format!("P6\n{} {}\n255\n", width, height);
    let mut out = Vec::with_capacity(header.len() + width * height * 3);
    out.extend_from_slice(header.as_bytes());

    let (cx, cy) = (width as i64 / 2, height as i64 / 2);
    let size = (width.min(height) / 4) as i64;
    let left = cx - size;

    for y in 0..height as i64 {
        let dy = (y - cy).abs();
        // Row span of the triangle (left edge vertical, tip at (cx + size, cy)).
        let right = if dy <= size { left + 2 * (size - dy) } else { left - 1 };
        for x in 0..width as i64 {
            let lit = x >= left && x <= right;
            let v = if lit { 0xff } else { 0x00 };
            out.extend_from_slice(&[v, v, v]);
        }
    }
    out
}

/// The configured image if it exists, otherwise the generated one under
/// `data_dir` (written on first use).
pub async fn resolve(configured: Option<&Path>, data_dir: &Path) -> anyhow::Result<PathBuf> {
    if let Some(path) = configured {
        if path.exists() {
            return Ok(path.to_path_buf());
        }
        warn!(
            "Baseline image {} not found, using generated screen",
            path.display()
        );
    }

    let generated = data_dir.join(GENERATED_NAME);
    if generated.exists() {
        return Ok(generated);
    }

    tokio::fs::create_dir_all(data_dir)
        .await
        .with_context(|| format!("Failed to create {}", data_dir.display()))?;
    tokio::fs::write(&generated, render_play_screen(WIDTH, HEIGHT))
        .await
        .with_context(|| format!("Failed to write {}", generated.display()))?;
    info!("Created idle screen image at {}", generated.display());
    Ok(generated)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pixel(img: &[u8], header_len: usize, width: usize, x: usize, y: usize) -> u8 {
        img[header_len + (y * width + x) * 3]
    }

    #[test]
    fn test_render_shape() {
        let (w, h) = (192, 108);
        let img = render_play_screen(w, h);
        let header = "P6\n192 108\n255\n";
        assert!(img.starts_with(header.as_bytes()));
        assert_eq!(img.len(), header.len() + w * h * 3);

        let hl = header.len();
        // size = 27, centre (96, 54): left edge at x = 69, tip at x = 123.
        assert_eq!(pixel(&img, hl, w, 0, 0), 0x00);
        assert_eq!(pixel(&img, hl, w, 96, 54), 0xff);
        assert_eq!(pixel(&img, hl, w, 123, 54), 0xff);
        assert_eq!(pixel(&img, hl, w, 124, 54), 0x00);
        assert_eq!(pixel(&img, hl, w, 68, 54), 0x00);
        // Narrows towards the top corner.
        assert_eq!(pixel(&img, hl, w, 69, 27), 0xff);
        assert_eq!(pixel(&img, hl, w, 70, 27), 0x00);
        assert_eq!(pixel(&img, hl, w, 69, 26), 0x00);
    }

    #[tokio::test]
    async fn test_resolve_prefers_existing_configured_image() {
        let dir = tempfile::tempdir().unwrap();
        let custom = dir.path().join("custom.png");
        tokio::fs::write(&custom, b"png").await.unwrap();

        let got = resolve(Some(&custom), dir.path()).await.unwrap();
        assert_eq!(got, custom);
        assert!(!dir.path().join(GENERATED_NAME).exists());
    }

    #[tokio::test]
    async fn test_resolve_generates_once() {
        let dir = tempfile::tempdir().unwrap();
        let data = dir.path().join("data");
        let missing = dir.path().join("missing.png");

        let got = resolve(Some(&missing), &data).await.unwrap();
        assert_eq!(got, data.join(GENERATED_NAME));
        let bytes = tokio::fs::read(&got).await.unwrap();
        assert!(bytes.starts_with(b"P6\n1920 1080\n255\n"));

        tokio::fs::write(&got, b"kept").await.unwrap();
        let again = resolve(None, &data).await.unwrap();
        assert_eq!(tokio::fs::read(&again).await.unwrap(), b"kept");
    }
}
