use kiosk_proto::config::Config;
use std::path::PathBuf;

#[test]
fn first_load_writes_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("config.toml");

    let config = Config::load_from(&path).unwrap();
    assert_eq!(config, Config::default());
    assert!(path.exists(), "defaults should be persisted on first load");
}

#[test]
fn save_then_load_returns_same_config() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.toml");

    let mut config = Config::default();
    config.limits.max_videos = 5;
    config.limits.period_hours = 12.5;
    config.scanner.device_path = Some("/dev/input/event0".to_string());
    config.http.port = 9000;
    config.display.debug_mode = true;
    config.display.connectors = "0.HDMI-A-1,1.HDMI-A-2".to_string();
    config.display.baseline_image = Some(PathBuf::from("/srv/kiosk/idle.png"));
    config.save_to(&path).unwrap();

    // A fresh load, as after a restart.
    let loaded = Config::load_from(&path).unwrap();
    assert_eq!(loaded, config);
    assert_eq!(loaded.display_connectors().len(), 2);
}

#[test]
fn invalid_config_is_not_saved() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.toml");

    let mut config = Config::default();
    config.limits.max_videos = 0;
    assert!(config.save_to(&path).is_err());
    assert!(!path.exists());
}

#[test]
fn hand_edited_invalid_limits_are_rejected_on_load() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.toml");

    std::fs::write(&path, "[limits]\nmax_videos = 0\n").unwrap();
    assert!(Config::load_from(&path).is_err());

    std::fs::write(&path, "[limits]\nperiod_hours = 0.0\n").unwrap();
    assert!(Config::load_from(&path).is_err());

    std::fs::write(&path, "[limits]\nperiod_hours = 1e12\n").unwrap();
    assert!(Config::load_from(&path).is_err());
}

#[test]
fn readers_never_see_a_half_written_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.toml");

    let mut config = Config::default();
    config.limits.max_videos = 5;
    config.save_to(&path).unwrap();

    let reader = {
        let path = path.clone();
        std::thread::spawn(move || {
            for _ in 0..500 {
                let loaded = Config::load_from(&path).expect("every read parses");
                assert!(
                    matches!(loaded.limits.max_videos, 5 | 6),
                    "read a truncated file: {:?}",
                    loaded.limits
                );
            }
        })
    };

    for i in 0..500 {
        config.limits.max_videos = 5 + (i % 2);
        config.save_to(&path).unwrap();
    }
    reader.join().unwrap();

    assert!(!path.with_extension("toml.tmp").exists());
}
