/// Barcode/QR scanner listener.
///
/// USB scanners present themselves as keyboards. We read raw
/// `struct input_event` records straight from `/dev/input/eventN`, turn key
/// presses into characters with a US-QWERTY table and push every completed
/// line (terminated by Enter) onto the scan queue.
///
/// Runs on a blocking thread; a missing device or read error ends the
/// listener but not the service.
use std::io::Read;
use std::path::{Path, PathBuf};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::core::{ScanEvent, ScanSource};

const SYS_INPUT: &str = "/sys/class/input";
const DEV_INPUT: &str = "/dev/input";

const EV_KEY: u16 = 1;
const KEY_LEFTSHIFT: u16 = 42;
const KEY_RIGHTSHIFT: u16 = 54;
const KEY_ENTER: u16 = 28;
const KEY_KPENTER: u16 = 96;

/// `struct input_event`: a `timeval` followed by type (u16), code (u16), value (i32).
#[cfg(target_pointer_width = "64")]
const TIMEVAL_SIZE: usize = 16;
#[cfg(not(target_pointer_width = "64"))]
const TIMEVAL_SIZE: usize = 8;
const EVENT_SIZE: usize = TIMEVAL_SIZE + 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct InputEvent {
    kind: u16,
    code: u16,
    value: i32,
}

fn parse_event(buf: &[u8; EVENT_SIZE]) -> InputEvent {
    let b = &buf[TIMEVAL_SIZE..];
    InputEvent {
        kind: u16::from_ne_bytes([b[0], b[1]]),
        code: u16::from_ne_bytes([b[2], b[3]]),
        value: i32::from_ne_bytes([b[4], b[5], b[6], b[7]]),
    }
}

/// US-QWERTY character for a key code, `None` for keys we don't map.
pub fn key_char(code: u16, shift: bool) -> Option<char> {
    let (normal, shifted) = match code {
        2 => ('1', '!'),
        3 => ('2', '@'),
        4 => ('3', '#'),
        5 => ('4', '$'),
        6 => ('5', '%'),
        7 => ('6', '^'),
        8 => ('7', '&'),
        9 => ('8', '*'),
        10 => ('9', '('),
        11 => ('0', ')'),
        12 => ('-', '_'),
        13 => ('=', '+'),
        16 => ('q', 'Q'),
        17 => ('w', 'W'),
        18 => ('e', 'E'),
        19 => ('r', 'R'),
        20 => ('t', 'T'),
        21 => ('y', 'Y'),
        22 => ('u', 'U'),
        23 => ('i', 'I'),
        24 => ('o', 'O'),
        25 => ('p', 'P'),
        26 => ('[', '{'),
        27 => (']', '}'),
        30 => ('a', 'A'),
        31 => ('s', 'S'),
        32 => ('d', 'D'),
        33 => ('f', 'F'),
        34 => ('g', 'G'),
        35 => ('h', 'H'),
        36 => ('j', 'J'),
        37 => ('k', 'K'),
        38 => ('l', 'L'),
        39 => (';', ':'),
        40 => ('\'', '"'),
        41 => ('`', '~'),
        43 => ('\\', '|'),
        44 => ('z', 'Z'),
        45 => ('x', 'X'),
        46 => ('c', 'C'),
        47 => ('v', 'V'),
        48 => ('b', 'B'),
        49 => ('n', 'N'),
        50 => ('m', 'M'),
        51 => (',', '<'),
        52 => ('.', '>'),
        53 => ('/', '?'),
        57 => (' ', ' '),
        _ => return None,
    };
    Some(if shift { shifted } else { normal })
}

/// Accumulates key events into lines.
#[derive(Debug, Default)]
pub struct KeyDecoder {
    buffer: String,
    shift: bool,
}

impl KeyDecoder {
    /// Feed one `EV_KEY` event (value 1 = press, 0 = release, 2 = repeat).
    /// Returns a completed, non-empty line on Enter.
    pub fn feed(&mut self, code: u16, value: i32) -> Option<String> {
        match code {
            KEY_LEFTSHIFT | KEY_RIGHTSHIFT => {
                self.shift = value != 0;
                None
            }
            _ if value != 1 => None,
            KEY_ENTER | KEY_KPENTER => {
                if self.buffer.is_empty() {
                    None
                } else {
                    Some(std::mem::take(&mut self.buffer))
                }
            }
            _ => {
                if let Some(c) = key_char(code, self.shift) {
                    self.buffer.push(c);
                }
                None
            }
        }
    }
}

/// Read events until EOF or error, sending each decoded line.
/// Stops early (Ok) once the scan queue is gone.
fn pump<R: Read>(mut reader: R, tx: &mpsc::Sender<ScanEvent>) -> std::io::Result<()> {
    let mut decoder = KeyDecoder::default();
    let mut buf = [0u8; EVENT_SIZE];
    loop {
        match reader.read_exact(&mut buf) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(()),
            Err(e) => return Err(e),
        }
        let event = parse_event(&buf);
        if event.kind != EV_KEY {
            continue;
        }
        if let Some(line) = decoder.feed(event.code, event.value) {
            debug!("Scanner line: {}", line);
            if tx.blocking_send(ScanEvent::new(line, ScanSource::Scanner)).is_err() {
                return Ok(());
            }
        }
    }
}

// ── device selection ──────────────────────────────────────────────────────────

fn event_nodes(sys_root: &Path) -> Vec<(u32, String)> {
    let Ok(entries) = std::fs::read_dir(sys_root) else {
        return Vec::new();
    };
    let mut nodes: Vec<(u32, String)> = entries
        .flatten()
        .filter_map(|e| {
            let name = e.file_name().to_string_lossy().into_owned();
            let n = name.strip_prefix("event")?.parse().ok()?;
            Some((n, name))
        })
        .collect();
    nodes.sort();
    nodes
}

fn has_key_events(caps_ev: &str) -> bool {
    // Space-separated hex words, most significant first; EV_KEY is bit 1 of the last.
    caps_ev
        .split_whitespace()
        .last()
        .and_then(|w| u64::from_str_radix(w, 16).ok())
        .is_some_and(|bits| bits & (1 << EV_KEY) != 0)
}

/// First input device whose name looks like a scanner, else the first that
/// emits key events.
pub fn detect_device(sys_root: &Path, dev_root: &Path) -> Option<PathBuf> {
    let nodes = event_nodes(sys_root);

    for (_, node) in &nodes {
        let name = std::fs::read_to_string(sys_root.join(node).join("device/name"))
            .unwrap_or_default()
            .to_lowercase();
        if ["scanner", "barcode", "qr"].iter().any(|k| name.contains(k)) {
            info!("Scanner detected: {} ({})", name.trim(), node);
            return Some(dev_root.join(node));
        }
    }

    for (_, node) in &nodes {
        let caps = std::fs::read_to_string(sys_root.join(node).join("device/capabilities/ev"))
            .unwrap_or_default();
        if has_key_events(&caps) {
            info!("No named scanner, falling back to key device {}", node);
            return Some(dev_root.join(node));
        }
    }
    None
}

// ── exclusive grab ────────────────────────────────────────────────────────────

#[cfg(target_os = "linux")]
fn grab(file: &std::fs::File) -> std::io::Result<()> {
    use std::os::unix::io::AsRawFd;
    const EVIOCGRAB: u64 = 0x4004_4590;
    // SAFETY: EVIOCGRAB takes an int argument by value on a valid evdev fd.
    let rc = unsafe { libc::ioctl(file.as_raw_fd(), EVIOCGRAB as _, 1 as libc::c_int) };
    if rc < 0 {
        return Err(std::io::Error::last_os_error());
    }
    Ok(())
}

#[cfg(not(target_os = "linux"))]
fn grab(_file: &std::fs::File) -> std::io::Result<()> {
    Err(std::io::Error::new(
        std::io::ErrorKind::Unsupported,
        "exclusive grab needs Linux evdev",
    ))
}

fn listen(configured: Option<String>, tx: mpsc::Sender<ScanEvent>) {
    let device = match configured {
        Some(path) => PathBuf::from(path),
        None => match detect_device(Path::new(SYS_INPUT), Path::new(DEV_INPUT)) {
            Some(path) => path,
            None => {
                error!("No scanner device found. Connect a USB barcode/QR scanner.");
                return;
            }
        },
    };

    let file = match std::fs::File::open(&device) {
        Ok(f) => f,
        Err(e) => {
            warn!("Could not open scanner device {}: {}", device.display(), e);
            return;
        }
    };
    if let Err(e) = grab(&file) {
        warn!(
            "Could not grab {} exclusively, keystrokes may leak to the console: {}",
            device.display(),
            e
        );
    }

    info!("Scanner listener started on {}", device.display());
    match pump(file, &tx) {
        Ok(()) => info!("Scanner listener stopped"),
        Err(e) => error!("Scanner device error: {}", e),
    }
}

/// Start the listener on a blocking thread.
pub fn spawn(device: Option<String>, tx: mpsc::Sender<ScanEvent>) -> tokio::task::JoinHandle<()> {
    tokio::task::spawn_blocking(move || listen(device, tx))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn raw(kind: u16, code: u16, value: i32) -> Vec<u8> {
        let mut out = vec![0u8; TIMEVAL_SIZE];
        out.extend_from_slice(&kind.to_ne_bytes());
        out.extend_from_slice(&code.to_ne_bytes());
        out.extend_from_slice(&value.to_ne_bytes());
        out
    }

    fn tap(code: u16) -> Vec<u8> {
        [raw(EV_KEY, code, 1), raw(EV_KEY, code, 0), raw(0, 0, 0)].concat()
    }

    #[test]
    fn test_decoder_shift_and_enter() {
        let mut d = KeyDecoder::default();
        assert_eq!(d.feed(35, 1), None); // h
        assert_eq!(d.feed(35, 0), None);
        assert_eq!(d.feed(KEY_LEFTSHIFT, 1), None);
        assert_eq!(d.feed(39, 1), None); // :
        assert_eq!(d.feed(KEY_LEFTSHIFT, 0), None);
        assert_eq!(d.feed(53, 1), None); // /
        assert_eq!(d.feed(KEY_ENTER, 1), Some("h:/".to_string()));
        // Buffer was consumed.
        assert_eq!(d.feed(KEY_KPENTER, 1), None);
    }

    #[test]
    fn test_decoder_ignores_repeats_and_unknown_keys() {
        let mut d = KeyDecoder::default();
        d.feed(30, 1);
        d.feed(30, 2);
        d.feed(1, 1); // Esc
        d.feed(KEY_ENTER, 0);
        assert_eq!(d.feed(KEY_ENTER, 1), Some("a".to_string()));
    }

    #[test]
    fn test_pump_turns_events_into_scans() {
        // "yo" Enter, then a lone Enter, then "Q" with right shift.
        let mut bytes = [tap(21), tap(24), tap(KEY_ENTER), tap(KEY_KPENTER)].concat();
        bytes.extend(raw(EV_KEY, KEY_RIGHTSHIFT, 1));
        bytes.extend(tap(16));
        bytes.extend(raw(EV_KEY, KEY_RIGHTSHIFT, 0));
        bytes.extend(tap(KEY_ENTER));
        // Trailing partial record is treated as end of stream.
        bytes.extend_from_slice(&[0u8; 5]);

        let (tx, mut rx) = mpsc::channel(8);
        pump(Cursor::new(bytes), &tx).unwrap();

        let got: Vec<ScanEvent> = std::iter::from_fn(|| rx.try_recv().ok()).collect();
        assert_eq!(
            got,
            vec![
                ScanEvent::new("yo", ScanSource::Scanner),
                ScanEvent::new("Q", ScanSource::Scanner),
            ]
        );
    }

    #[test]
    fn test_pump_stops_when_queue_closed() {
        let bytes = [tap(30), tap(KEY_ENTER), tap(31), tap(KEY_ENTER)].concat();
        let (tx, rx) = mpsc::channel(8);
        drop(rx);
        assert!(pump(Cursor::new(bytes), &tx).is_ok());
    }

    fn fake_node(sys: &Path, node: &str, name: &str, ev: &str) {
        let dev = sys.join(node).join("device");
        std::fs::create_dir_all(dev.join("capabilities")).unwrap();
        std::fs::write(dev.join("name"), format!("{}\n", name)).unwrap();
        std::fs::write(dev.join("capabilities/ev"), format!("{}\n", ev)).unwrap();
    }

    #[test]
    fn test_detect_prefers_named_scanner() {
        let dir = tempfile::tempdir().unwrap();
        fake_node(dir.path(), "event0", "AT Translated Set 2 keyboard", "120013");
        fake_node(dir.path(), "event11", "Power Button", "3");
        fake_node(dir.path(), "event3", "Netum Barcode Scanner", "120013");

        let got = detect_device(dir.path(), Path::new("/dev/input"));
        assert_eq!(got, Some(PathBuf::from("/dev/input/event3")));
    }

    #[test]
    fn test_detect_falls_back_to_key_device() {
        let dir = tempfile::tempdir().unwrap();
        fake_node(dir.path(), "event10", "Video Bus", "3");
        fake_node(dir.path(), "event2", "Lid Switch", "21");
        fake_node(dir.path(), "event4", "USB Keyboard", "120013");

        // Numeric order: event4 comes before event10, which also reports keys.
        let got = detect_device(dir.path(), Path::new("/dev/input"));
        assert_eq!(got, Some(PathBuf::from("/dev/input/event4")));
    }

    #[test]
    fn test_detect_nothing() {
        let dir = tempfile::tempdir().unwrap();
        fake_node(dir.path(), "event1", "Lid Switch", "21");
        assert_eq!(detect_device(dir.path(), Path::new("/dev/input")), None);
        assert_eq!(detect_device(&dir.path().join("absent"), Path::new("/dev/input")), None);
    }

    #[test]
    fn test_capability_bits() {
        assert!(has_key_events("120013"));
        assert!(has_key_events("0 3"));
        assert!(!has_key_events("21"));
        assert!(!has_key_events(""));
    }
}
