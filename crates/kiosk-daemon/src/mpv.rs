/// mpv IPC driver and the multi-display controller built on it.
///
/// Architecture:
///
/// ```text
///   MpvController::start()
///         │   one idle mpv per display, each with its own socket
///         │
///         ├── display 0: MpvHandle ── writer_task  ← MpvRequest via mpsc → socket
///         │                        └─ reader_task  ← JSON lines from socket
///         │                                            ├── response (request_id) → oneshot
///         │                                            └── event                 → dropped
///         └── display 1: ...
/// ```
///
/// Display 0 is the primary: completion waits and idle polling look at it
/// only. Loads go to every display in order and stop at the first failure,
/// so later displays may never see a file an earlier one rejected.
use async_trait::async_trait;
use kiosk_proto::platform;
use kiosk_proto::protocol::{IpcMessage, IpcRequest, IpcResponse, MpvCommand};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;
use tokio::process::Child;
use tokio::sync::{mpsc, oneshot, Mutex};
use tracing::{debug, info, warn};

use crate::player::{PlayOutcome, PlaybackError, Player};

// ── global request-id counter ─────────────────────────────────────────────────

static NEXT_REQ_ID: AtomicU64 = AtomicU64::new(1);

const IPC_TIMEOUT: Duration = Duration::from_secs(5);
const SOCKET_POLL_ATTEMPTS: u32 = 50;
const SOCKET_POLL_INTERVAL: Duration = Duration::from_millis(100);
const SHUTDOWN_WAIT: Duration = Duration::from_secs(5);

// ── channel errors ────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum IpcError {
    /// Socket gone, write failed, timed out.
    #[error("{0}")]
    Channel(String),
    /// mpv answered with something other than "success".
    #[error("mpv error: {0}")]
    Rejected(String),
}

impl IpcError {
    fn into_playback(self, display: usize) -> PlaybackError {
        match self {
            IpcError::Channel(reason) => PlaybackError::Unreachable { display, reason },
            IpcError::Rejected(reason) => PlaybackError::Rejected { display, reason },
        }
    }
}

type PendingMap = Arc<Mutex<HashMap<u64, oneshot::Sender<Result<IpcResponse, IpcError>>>>>;

struct PendingRequest {
    req_id: u64,
    payload: String, // serialised JSON line (already has '\n')
    reply: oneshot::Sender<Result<IpcResponse, IpcError>>,
}

// ── public handle ─────────────────────────────────────────────────────────────

/// Cloneable handle to one player's writer task.
#[derive(Clone)]
pub struct MpvHandle {
    tx: mpsc::Sender<PendingRequest>,
    pending: PendingMap,
    timeout: Duration,
}

impl MpvHandle {
    pub async fn connect(socket_path: &Path) -> anyhow::Result<Self> {
        let stream = UnixStream::connect(socket_path).await?;
        Ok(Self::start_io_tasks(stream))
    }

    fn start_io_tasks(stream: UnixStream) -> Self {
        let (read_half, write_half) = stream.into_split();
        let reader = BufReader::new(read_half);

        // pending map: req_id → reply channel.  Shared between writer (inserts) and reader (resolves).
        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));

        let (cmd_tx, cmd_rx) = mpsc::channel::<PendingRequest>(64);

        tokio::spawn(writer_task(write_half, cmd_rx, pending.clone()));
        tokio::spawn(reader_task(reader, pending.clone()));

        Self {
            tx: cmd_tx,
            pending,
            timeout: IPC_TIMEOUT,
        }
    }

    #[cfg(test)]
    fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    #[cfg(test)]
    async fn pending_len(&self) -> usize {
        self.pending.lock().await.len()
    }

    pub async fn send(&self, command: &MpvCommand) -> Result<IpcResponse, IpcError> {
        let req_id = NEXT_REQ_ID.fetch_add(1, Ordering::Relaxed);
        let payload = IpcRequest {
            command: command.to_args(),
            request_id: req_id,
        }
        .encode()
        .map_err(|e| IpcError::Channel(format!("encode: {}", e)))?;

        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(PendingRequest {
                req_id,
                payload,
                reply: reply_tx,
            })
            .await
            .map_err(|_| IpcError::Channel("mpv writer task gone".to_string()))?;

        match tokio::time::timeout(self.timeout, reply_rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(IpcError::Channel(format!(
                "mpv reply channel dropped req={}",
                req_id
            ))),
            Err(_) => {
                // mpv may never answer; don't leave the slot behind.
                self.pending.lock().await.remove(&req_id);
                Err(IpcError::Channel(format!("mpv IPC timeout for req={}", req_id)))
            }
        }
    }
}

// ── reader task ───────────────────────────────────────────────────────────────

async fn reader_task<R>(mut reader: BufReader<R>, pending: PendingMap)
where
    R: tokio::io::AsyncRead + Unpin,
{
    let mut line = String::new();
    loop {
        line.clear();
        match reader.read_line(&mut line).await {
            Ok(0) => {
                debug!("mpv reader: connection closed");
                fail_all(&pending, "mpv IPC connection closed").await;
                break;
            }
            Ok(_) => {
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }
                match IpcMessage::decode(trimmed) {
                    Ok(IpcMessage::Response(resp)) => {
                        let Some(req_id) = resp.request_id else {
                            continue;
                        };
                        let mut map = pending.lock().await;
                        if let Some(tx) = map.remove(&req_id) {
                            let result = if resp.is_success() {
                                debug!("mpv reader: response req={} ok", req_id);
                                Ok(resp)
                            } else {
                                debug!("mpv reader: response req={} err={}", req_id, resp.error);
                                Err(IpcError::Rejected(resp.error.clone()))
                            };
                            let _ = tx.send(result);
                        } else {
                            debug!("mpv reader: response for unknown req={}", req_id);
                        }
                    }
                    Ok(IpcMessage::Event(val)) => {
                        debug!("mpv reader: event {}", val);
                    }
                    Err(e) => {
                        debug!("mpv reader: invalid json '{}': {}", trimmed, e);
                    }
                }
            }
            Err(e) => {
                warn!("mpv reader: read error: {}", e);
                fail_all(&pending, &format!("mpv IPC read error: {}", e)).await;
                break;
            }
        }
    }
}

async fn fail_all(pending: &PendingMap, reason: &str) {
    let mut map = pending.lock().await;
    for (_, tx) in map.drain() {
        let _ = tx.send(Err(IpcError::Channel(reason.to_string())));
    }
}

// ── writer task ───────────────────────────────────────────────────────────────

async fn writer_task<W>(mut writer: W, mut rx: mpsc::Receiver<PendingRequest>, pending: PendingMap)
where
    W: tokio::io::AsyncWrite + Unpin,
{
    while let Some(req) = rx.recv().await {
        if req.reply.is_closed() {
            debug!("mpv writer: req={} abandoned before send", req.req_id);
            continue;
        }
        // Register reply channel before writing so reader can match it
        {
            let mut map = pending.lock().await;
            map.insert(req.req_id, req.reply);
        }
        debug!("mpv writer: send req={} payload={}", req.req_id, req.payload.trim());
        if let Err(e) = writer.write_all(req.payload.as_bytes()).await {
            warn!("mpv writer: write error: {}", e);
            let mut map = pending.lock().await;
            if let Some(tx) = map.remove(&req.req_id) {
                let _ = tx.send(Err(IpcError::Channel(format!("mpv write error: {}", e))));
            }
            break;
        }
    }
    debug!("mpv writer: task exiting");
}

// ── display targets ───────────────────────────────────────────────────────────

/// Player lifecycle as seen from the controller.
///
///   Stopped -> Starting -> Idle -> Playing -> Idle -> ... -> Stopped
///
/// The baseline image is loaded content, so it reads as `Playing`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisplayState {
    Stopped,
    Starting,
    Idle,
    Playing,
}

/// Per-display lifecycle, shared so startup progress is visible before the
/// controller exists.
#[derive(Debug, Clone, Default)]
pub struct StateBoard(Arc<std::sync::Mutex<Vec<DisplayState>>>);

impl StateBoard {
    /// `count` displays, all `Stopped`.
    pub fn new(count: usize) -> Self {
        Self(Arc::new(std::sync::Mutex::new(vec![
            DisplayState::Stopped;
            count
        ])))
    }

    pub fn snapshot(&self) -> Vec<DisplayState> {
        self.0.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn set(&self, idx: usize, state: DisplayState) {
        let mut states = self.0.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(slot) = states.get_mut(idx) {
            if *slot != state {
                debug!("mpv[{}]: {:?} -> {:?}", idx, *slot, state);
                *slot = state;
            }
        }
    }

    fn set_all(&self, state: DisplayState) {
        let count = self.0.lock().unwrap_or_else(|e| e.into_inner()).len();
        for idx in 0..count {
            self.set(idx, state);
        }
    }
}

/// One physical output and the control channel of the player driving it.
pub struct DisplayTarget {
    pub connector: Option<String>,
    pub socket_path: PathBuf,
    handle: MpvHandle,
}

impl DisplayTarget {
    pub fn new(connector: Option<String>, socket_path: PathBuf, handle: MpvHandle) -> Self {
        Self {
            connector,
            socket_path,
            handle,
        }
    }

    fn label(&self) -> &str {
        self.connector.as_deref().unwrap_or("default")
    }
}

/// What to launch.
#[derive(Debug, Clone)]
pub struct LaunchSpec {
    pub binary: PathBuf,
    /// Base socket address; per-display sockets are derived from it.
    pub socket_base: PathBuf,
    /// DRM connectors, one player each. Empty = one player on the default output.
    pub connectors: Vec<String>,
}

impl LaunchSpec {
    /// `(connector, socket)` for every player to start.
    pub fn plan(&self) -> Vec<(Option<String>, PathBuf)> {
        if self.connectors.is_empty() {
            return vec![(None, self.socket_base.clone())];
        }
        self.connectors
            .iter()
            .enumerate()
            .map(|(i, c)| {
                (
                    Some(c.clone()),
                    platform::mpv_socket_for_display(&self.socket_base, i),
                )
            })
            .collect()
    }
}

pub fn launch_args(socket: &Path, connector: Option<&str>) -> Vec<String> {
    let mut args = vec![
        "--idle=yes".to_string(),
        "--no-osc".to_string(),
        "--no-input-default-bindings".to_string(),
        "--fs".to_string(),
        "--image-display-duration=inf".to_string(),
    ];
    if let Some(conn) = connector {
        args.push("--vo=drm".to_string());
        args.push(format!("--drm-connector={}", conn));
    }
    args.push(format!("--input-ipc-server={}", socket.display()));
    args.push("--osd-align-y=bottom".to_string());
    args.push("--osd-font-size=18".to_string());
    args
}

/// Polling knobs for `load_and_play(.., wait = true)`.
#[derive(Debug, Clone, Copy)]
pub struct WaitPolicy {
    pub poll_interval: Duration,
    /// How long to wait for the primary display to leave idle after a load.
    pub start_grace: Duration,
    /// Give up waiting for the return to idle after this long.
    pub ceiling: Duration,
}

impl Default for WaitPolicy {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(500),
            start_grace: Duration::from_secs(10),
            ceiling: Duration::from_secs(3600),
        }
    }
}

// ── controller ────────────────────────────────────────────────────────────────

/// Owns every player process and its control channel.
pub struct MpvController {
    displays: Vec<DisplayTarget>,
    /// Locked only for `try_wait`/`take`, never across an await.
    processes: std::sync::Mutex<Vec<Child>>,
    states: StateBoard,
    baseline: PathBuf,
    /// Bumped on every baseline restore. A wait that sees it move knows
    /// its video already ended and was replaced.
    baseline_generation: AtomicU64,
    wait: WaitPolicy,
}

impl MpvController {
    /// Launch one idle player per display and connect to each. All or
    /// nothing: if any display fails, the ones already started are killed.
    pub async fn start(spec: &LaunchSpec, baseline: PathBuf) -> anyhow::Result<Self> {
        Self::start_tracked(spec, baseline, StateBoard::new(spec.plan().len())).await
    }

    /// `start`, reporting each display's progress on `states`.
    pub async fn start_tracked(
        spec: &LaunchSpec,
        baseline: PathBuf,
        states: StateBoard,
    ) -> anyhow::Result<Self> {
        let plan = spec.plan();
        let mut displays = Vec::with_capacity(plan.len());
        let mut processes: Vec<Child> = Vec::with_capacity(plan.len());

        for (idx, (connector, socket_path)) in plan.into_iter().enumerate() {
            states.set(idx, DisplayState::Starting);
            match launch_one(&spec.binary, connector.as_deref(), &socket_path).await {
                Ok((child, handle)) => {
                    states.set(idx, DisplayState::Idle);
                    processes.push(child);
                    displays.push(DisplayTarget::new(connector, socket_path, handle));
                }
                Err(e) => {
                    warn!(
                        "mpv: failed to start display {}: {}",
                        connector.as_deref().unwrap_or("default"),
                        e
                    );
                    for child in processes.iter_mut() {
                        let _ = child.start_kill();
                    }
                    for child in processes.iter_mut() {
                        let _ = tokio::time::timeout(SHUTDOWN_WAIT, child.wait()).await;
                    }
                    states.set_all(DisplayState::Stopped);
                    return Err(e);
                }
            }
        }

        info!("mpv: {} display(s) ready", displays.len());
        Ok(Self {
            displays,
            processes: std::sync::Mutex::new(processes),
            states,
            baseline,
            baseline_generation: AtomicU64::new(0),
            wait: WaitPolicy::default(),
        })
    }

    /// Controller over already-connected channels, with no processes of
    /// its own to supervise.
    #[cfg(test)]
    pub fn from_targets(displays: Vec<DisplayTarget>, baseline: PathBuf) -> Self {
        let states = StateBoard::new(displays.len());
        states.set_all(DisplayState::Idle);
        Self {
            displays,
            processes: std::sync::Mutex::new(Vec::new()),
            states,
            baseline,
            baseline_generation: AtomicU64::new(0),
            wait: WaitPolicy::default(),
        }
    }

    #[cfg(test)]
    pub fn with_wait_policy(mut self, wait: WaitPolicy) -> Self {
        self.wait = wait;
        self
    }

    pub fn display_states(&self) -> Vec<DisplayState> {
        self.states.snapshot()
    }

    fn baseline_restored_since(&self, generation: u64) -> bool {
        self.baseline_generation.load(Ordering::SeqCst) != generation
    }

    /// Wait for the primary display to finish the file loaded at
    /// `generation`. The idle supervisor may see the end first and put the
    /// baseline up, which counts as finished too.
    async fn wait_until_idle(&self, generation: u64) -> PlayOutcome {
        let started = tokio::time::Instant::now();

        // A fresh load can still read idle for a moment.
        while started.elapsed() < self.wait.start_grace {
            if self.baseline_restored_since(generation) {
                debug!("mpv: baseline restored during start grace");
                return PlayOutcome::Completed;
            }
            if !self.is_idle(0).await {
                break;
            }
            tokio::time::sleep(self.wait.poll_interval).await;
        }

        while started.elapsed() < self.wait.ceiling {
            if self.baseline_restored_since(generation) {
                debug!("mpv: baseline restored, playback finished");
                return PlayOutcome::Completed;
            }
            if self.is_idle(0).await {
                return PlayOutcome::Completed;
            }
            tokio::time::sleep(self.wait.poll_interval).await;
        }
        warn!("mpv: playback not confirmed within {:?}", self.wait.ceiling);
        PlayOutcome::NotConfirmed
    }

    /// Terminate every player and wait (bounded) for each to exit.
    pub async fn shutdown(&self) {
        let children = {
            let mut guard = self.processes.lock().unwrap_or_else(|e| e.into_inner());
            std::mem::take(&mut *guard)
        };
        for (i, mut child) in children.into_iter().enumerate() {
            terminate(&mut child);
            match tokio::time::timeout(SHUTDOWN_WAIT, child.wait()).await {
                Ok(Ok(status)) => info!("mpv[{}]: exited with {}", i, status),
                Ok(Err(e)) => warn!("mpv[{}]: wait failed: {}", i, e),
                Err(_) => {
                    warn!("mpv[{}]: did not exit in {:?}, killing", i, SHUTDOWN_WAIT);
                    let _ = child.kill().await;
                }
            }
        }
        for target in &self.displays {
            let _ = tokio::fs::remove_file(&target.socket_path).await;
        }
        self.states.set_all(DisplayState::Stopped);
    }
}

async fn launch_one(
    binary: &Path,
    connector: Option<&str>,
    socket_path: &Path,
) -> anyhow::Result<(Child, MpvHandle)> {
    let _ = tokio::fs::remove_file(socket_path).await;

    info!(
        "mpv: spawning player for {} on {}",
        connector.unwrap_or("default display"),
        socket_path.display()
    );
    let mut child = tokio::process::Command::new(binary)
        .args(launch_args(socket_path, connector))
        .stdin(std::process::Stdio::null())
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| anyhow::anyhow!("could not run {}: {}", binary.display(), e))?;

    // Wait for socket to appear
    for _ in 0..SOCKET_POLL_ATTEMPTS {
        if socket_path.exists() {
            break;
        }
        if let Ok(Some(status)) = child.try_wait() {
            anyhow::bail!("mpv exited during startup with {}", status);
        }
        tokio::time::sleep(SOCKET_POLL_INTERVAL).await;
    }
    if !socket_path.exists() {
        let _ = child.kill().await;
        anyhow::bail!("mpv IPC socket {} did not appear", socket_path.display());
    }
    tokio::time::sleep(Duration::from_millis(200)).await;

    match MpvHandle::connect(socket_path).await {
        Ok(handle) => {
            info!("mpv: connected to {}", socket_path.display());
            Ok((child, handle))
        }
        Err(e) => {
            let _ = child.kill().await;
            Err(e)
        }
    }
}

#[cfg(target_os = "linux")]
fn terminate(child: &mut Child) {
    match child.id() {
        // SAFETY: plain kill(2) on a pid we spawned and have not reaped.
        Some(pid) => unsafe {
            libc::kill(pid as libc::pid_t, libc::SIGTERM);
        },
        None => {
            let _ = child.start_kill();
        }
    }
}

#[cfg(not(target_os = "linux"))]
fn terminate(child: &mut Child) {
    let _ = child.start_kill();
}

fn resolve_media_path(path: &Path) -> String {
    std::fs::canonicalize(path)
        .unwrap_or_else(|_| path.to_path_buf())
        .to_string_lossy()
        .into_owned()
}

#[async_trait]
impl Player for MpvController {
    fn display_count(&self) -> usize {
        self.displays.len()
    }

    async fn load_and_play(&self, path: &Path, wait: bool) -> Result<PlayOutcome, PlaybackError> {
        if self.displays.is_empty() {
            return Err(PlaybackError::NoDisplays);
        }
        let generation = self.baseline_generation.load(Ordering::SeqCst);
        let cmd = MpvCommand::load_file(resolve_media_path(path));
        for (i, target) in self.displays.iter().enumerate() {
            if let Err(e) = target.handle.send(&cmd).await {
                warn!("mpv[{}]: loadfile on {} failed: {}", i, target.label(), e);
                return Err(e.into_playback(i));
            }
            self.states.set(i, DisplayState::Playing);
        }

        if !wait {
            return Ok(PlayOutcome::Started);
        }
        Ok(self.wait_until_idle(generation).await)
    }

    async fn is_idle(&self, idx: usize) -> bool {
        let Some(target) = self.displays.get(idx) else {
            return false;
        };
        match target.handle.send(&MpvCommand::idle_active()).await {
            Ok(resp) => {
                let idle = resp.data_bool() == Some(true);
                self.states.set(
                    idx,
                    if idle {
                        DisplayState::Idle
                    } else {
                        DisplayState::Playing
                    },
                );
                idle
            }
            Err(e) => {
                debug!("mpv[{}]: idle-active query failed: {}", idx, e);
                false
            }
        }
    }

    async fn show_text(&self, text: &str, duration: Duration) {
        let cmd = MpvCommand::ShowText {
            text: text.to_string(),
            duration_ms: duration.as_millis() as u64,
        };
        for (i, target) in self.displays.iter().enumerate() {
            if let Err(e) = target.handle.send(&cmd).await {
                debug!("mpv[{}]: show-text failed: {}", i, e);
            }
        }
    }

    async fn restore_baseline(&self) {
        self.baseline_generation.fetch_add(1, Ordering::SeqCst);
        let cmd = MpvCommand::load_file(resolve_media_path(&self.baseline));
        for (i, target) in self.displays.iter().enumerate() {
            match target.handle.send(&cmd).await {
                Ok(_) => self.states.set(i, DisplayState::Playing),
                Err(e) => debug!("mpv[{}]: baseline load failed: {}", i, e),
            }
        }
    }

    fn has_exited(&self) -> bool {
        let mut processes = self.processes.lock().unwrap_or_else(|e| e.into_inner());
        processes
            .iter_mut()
            .any(|child| matches!(child.try_wait(), Ok(Some(_))))
    }
}

// ── tests ─────────────────────────────────────────────────────────────────────
