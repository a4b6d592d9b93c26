use std::path::{Path, PathBuf};
use std::sync::OnceLock;

/// Data directory override set once at startup (`--data-dir`).
static DATA_DIR_OVERRIDE: OnceLock<PathBuf> = OnceLock::new();

/// Point `data_dir()` somewhere else for the rest of the process.
/// Only the first call has any effect.
pub fn set_data_dir(path: PathBuf) {
    let _ = DATA_DIR_OVERRIDE.set(path);
}

pub fn data_dir() -> PathBuf {
    if let Some(dir) = DATA_DIR_OVERRIDE.get() {
        return dir.clone();
    }
    // ~/.local/share/kiosk/ (XDG standard) rather than platform-specific
    // application folders; the kiosk only targets Linux boxes.
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("/tmp"))
        .join(".local")
        .join("share")
        .join("kiosk")
}

pub fn config_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".config")
        .join("kiosk")
}

pub fn temp_dir() -> PathBuf {
    std::env::temp_dir()
}

pub fn cache_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(temp_dir)
        .join(".cache")
        .join("kiosk")
}

/// Base address for the mpv control sockets. Per-display sockets are
/// derived from it with [`mpv_socket_for_display`].
pub fn default_mpv_socket() -> PathBuf {
    temp_dir().join("kiosk-mpv.sock")
}

/// Socket path for display `index` of a connector list.
///
/// `/tmp/kiosk-mpv.sock` becomes `/tmp/kiosk-mpv-0.sock`,
/// `/tmp/kiosk-mpv-1.sock`, ...; a base without an extension just gets
/// `-<index>` appended.
pub fn mpv_socket_for_display(base: &Path, index: usize) -> PathBuf {
    let base_str = base.to_string_lossy();
    match (base.file_stem(), base.extension()) {
        (Some(stem), Some(ext)) => base.with_file_name(format!(
            "{}-{}.{}",
            stem.to_string_lossy(),
            index,
            ext.to_string_lossy()
        )),
        _ => PathBuf::from(format!("{}-{}", base_str, index)),
    }
}

pub fn mpv_binary_name() -> &'static str {
    "mpv"
}

fn yt_dlp_binary_names() -> &'static [&'static str] {
    &["yt-dlp"]
}

fn find_beside_exe(names: &[&str]) -> Option<PathBuf> {
    let current_exe = std::env::current_exe().ok()?;
    let dir = current_exe.parent()?;
    for name in names {
        let p = dir.join(name);
        if p.exists() {
            return Some(p);
        }
        let p = dir.join("external").join(name);
        if p.exists() {
            return Some(p);
        }
    }
    None
}

fn find_on_path(names: &[&str]) -> Option<PathBuf> {
    let path = std::env::var("PATH").ok()?;
    for dir in path.split(':') {
        for name in names {
            let p = PathBuf::from(dir).join(name);
            if p.exists() {
                return Some(p);
            }
        }
    }
    None
}

/// Find the mpv binary. Checks `MPV_PATH`, then beside the current exe,
/// then PATH.
pub fn find_mpv_binary() -> Option<PathBuf> {
    if let Ok(p) = std::env::var("MPV_PATH") {
        let path = PathBuf::from(p);
        if path.exists() {
            return Some(path);
        }
    }
    find_beside_exe(&[mpv_binary_name()]).or_else(|| find_on_path(&[mpv_binary_name()]))
}

/// Find yt-dlp for fetching videos.
///
/// Searches in order:
/// 1. YT_DLP_PATH environment variable
/// 2. Beside current executable
/// 3. PATH
pub fn find_yt_dlp_binary() -> Option<PathBuf> {
    if let Ok(path) = std::env::var("YT_DLP_PATH") {
        let p = PathBuf::from(path);
        if p.exists() {
            return Some(p);
        }
    }

    if let Some(p) = find_beside_exe(yt_dlp_binary_names()) {
        return Some(p);
    }

    find_on_path(yt_dlp_binary_names())
}
