use crate::core::{ScanEvent, ScanSource};
use axum::{
    extract::{Path, Query, RawQuery, State},
    http::StatusCode,
    response::{Html, IntoResponse, Json, Redirect, Response},
    routing::{get, post},
    Form, Router,
};
use html_escape::{encode_double_quoted_attribute as attr, encode_text as text};
use kiosk_proto::config::Config;
use kiosk_proto::debug_log::DebugLog;
use kiosk_proto::history::{HistoryLedger, ViewRecord};
use kiosk_proto::protocol::StatusSnapshot;
use serde::Deserialize;
use std::path::PathBuf;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

const RECENT_VIEWS: usize = 50;

#[derive(Clone)]
pub struct HttpState {
    config_path: PathBuf,
    scan_tx: mpsc::Sender<ScanEvent>,
    debug_log: DebugLog,
}

impl HttpState {
    pub fn new(config_path: PathBuf, scan_tx: mpsc::Sender<ScanEvent>, debug_log: DebugLog) -> Self {
        Self {
            config_path,
            scan_tx,
            debug_log,
        }
    }

    fn load_config(&self) -> Result<Config, Response> {
        Config::load_from(&self.config_path).map_err(|e| {
            error!("HTTP: could not load config: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, "config unavailable").into_response()
        })
    }

    async fn recent_views(&self, config: &Config) -> Vec<ViewRecord> {
        HistoryLedger::new(config.paths.history_file.clone())
            .recent(RECENT_VIEWS)
            .await
            .unwrap_or_else(|e| {
                warn!("HTTP: could not read history: {}", e);
                Vec::new()
            })
    }

    /// Push onto the scan queue. Never waits: a full queue means the
    /// dispatcher is busy and the request is refused.
    fn enqueue(&self, url: &str, source: ScanSource) -> Result<(), StatusCode> {
        let url = url.trim();
        if url.is_empty() {
            return Err(StatusCode::BAD_REQUEST);
        }
        match self.scan_tx.try_send(ScanEvent::new(url, source)) {
            Ok(()) => {
                info!("HTTP: queued {}", url);
                Ok(())
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!("HTTP: scan queue full, dropping {}", url);
                Err(StatusCode::SERVICE_UNAVAILABLE)
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                error!("HTTP: scan queue closed");
                Err(StatusCode::SERVICE_UNAVAILABLE)
            }
        }
    }
}

pub fn router(state: HttpState) -> Router {
    Router::new()
        .route("/", get(dashboard))
        .route("/settings", get(settings_form).post(save_settings))
        .route("/play", post(play))
        .route("/directplay/*url", get(direct_play))
        .route("/api/state", get(api_state))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub fn start_server(bind_address: String, port: u16, state: HttpState) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let app = router(state);

        let addr = format!("{}:{}", bind_address, port);
        let listener = match TcpListener::bind(&addr).await {
            Ok(l) => l,
            Err(e) => {
                error!("Failed to bind HTTP server to {}: {}", addr, e);
                return;
            }
        };

        info!("Web interface at http://{}", addr);

        if let Err(e) = axum::serve(listener, app).await {
            error!("HTTP server error: {}", e);
        }
    })
}

// ── pages ─────────────────────────────────────────────────────────────────────

const STYLE: &str = "body{font-family:system-ui,sans-serif;max-width:600px;margin:2rem auto;padding:0 1rem}\
h1{font-size:1.5rem}.card{background:#f5f5f5;padding:1rem;border-radius:8px;margin:1rem 0}\
.card h2{margin-top:0;font-size:1rem}table{width:100%;border-collapse:collapse}\
th,td{text-align:left;padding:.5rem;border-bottom:1px solid #ddd}\
form.stack{display:flex;flex-direction:column;gap:1rem}input{padding:.5rem;font-size:1rem}\
.btn{display:inline-block;padding:.5rem 1rem;background:#333;color:#fff;border:none;\
border-radius:4px;text-decoration:none;cursor:pointer}.status{color:#0a0}.error{color:#a00}";

fn page(title: &str, body: &str) -> Html<String> {
    Html(format!(
        "<!DOCTYPE html>\n<html lang=\"en\">\n<head>\n<meta charset=\"UTF-8\">\n\
         <meta name=\"viewport\" content=\"width=device-width, initial-scale=1\">\n\
         <title>Video Kiosk - {}</title>\n<style>{}</style>\n</head>\n<body>\n{}\n</body>\n</html>\n",
        text(title),
        STYLE,
        body
    ))
}

fn local_time(record: &ViewRecord) -> String {
    record
        .timestamp
        .with_timezone(&chrono::Local)
        .format("%Y-%m-%d %H:%M")
        .to_string()
}

#[derive(Deserialize)]
struct DashboardQuery {
    #[serde(default)]
    queued: Option<String>,
}

async fn dashboard(State(state): State<HttpState>, Query(q): Query<DashboardQuery>) -> Response {
    let config = match state.load_config() {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let views = state.recent_views(&config).await;

    let status = if q.queued.is_some() {
        "Video queued for playback."
    } else {
        "Running"
    };

    let rows: String = views
        .iter()
        .map(|v| {
            format!(
                "<tr><td>{}</td><td>{}</td><td>{}</td></tr>\n",
                local_time(v),
                text(&v.video_id),
                text(&v.platform)
            )
        })
        .collect();
    let history = if rows.is_empty() {
        "<p>No views yet.</p>".to_string()
    } else {
        format!(
            "<table>\n<tr><th>Time</th><th>Video ID</th><th>Platform</th></tr>\n{}</table>",
            rows
        )
    };

    let connectors = if config.display.connectors.trim().is_empty() {
        "Default display".to_string()
    } else {
        text(&config.display.connectors).into_owned()
    };

    let body = format!(
        "<h1>Video Kiosk</h1>\n\
         <div class=\"card\"><h2>Status</h2><p class=\"status\">{status}</p></div>\n\
         <div class=\"card\"><h2>Play Video</h2>\n\
         <form method=\"post\" action=\"/play\" style=\"display:flex;gap:.5rem;flex-wrap:wrap\">\n\
         <input type=\"url\" name=\"url\" placeholder=\"Paste YouTube URL...\" required style=\"flex:1;min-width:200px\">\n\
         <button type=\"submit\" class=\"btn\">Play</button></form></div>\n\
         <div class=\"card\"><h2>Current Settings</h2>\n\
         <p><strong>Max videos per period:</strong> {max}</p>\n\
         <p><strong>Period (hours):</strong> {period}</p>\n\
         <p><strong>Scanner device:</strong> {scanner}</p>\n\
         <p><strong>Web port:</strong> {port}</p>\n\
         <p><strong>Displays:</strong> {connectors}</p>\n\
         <p><strong>Debug mode:</strong> {debug}</p>\n\
         <a href=\"/settings\" class=\"btn\">Edit Settings</a></div>\n\
         <div class=\"card\"><h2>Recent Views</h2>\n{history}\n</div>",
        status = status,
        max = config.limits.max_videos,
        period = config.limits.period_hours,
        scanner = text(config.scanner_device().unwrap_or("Auto-detect")),
        port = config.http.port,
        connectors = connectors,
        debug = if config.display.debug_mode { "On" } else { "Off" },
        history = history,
    );
    page("Dashboard", &body).into_response()
}

/// Raw form fields, kept as strings so bad input can be echoed back.
#[derive(Debug, Default, Deserialize)]
struct SettingsForm {
    #[serde(default)]
    max_videos: String,
    #[serde(default)]
    period_hours: String,
    #[serde(default)]
    scanner_device_path: String,
    #[serde(default)]
    web_port: String,
    #[serde(default)]
    debug_mode: Option<String>,
    #[serde(default)]
    display_connectors: String,
}

impl SettingsForm {
    fn from_config(config: &Config) -> Self {
        Self {
            max_videos: config.limits.max_videos.to_string(),
            period_hours: config.limits.period_hours.to_string(),
            scanner_device_path: config.scanner_device().unwrap_or_default().to_string(),
            web_port: config.http.port.to_string(),
            debug_mode: config.display.debug_mode.then(|| "1".to_string()),
            display_connectors: config.display.connectors.clone(),
        }
    }

    /// Apply onto `base`, keeping the fields the form doesn't cover.
    fn apply(&self, mut base: Config) -> Result<Config, String> {
        base.limits.max_videos = self
            .max_videos
            .trim()
            .parse()
            .map_err(|_| format!("Max videos must be a whole number, got '{}'", self.max_videos))?;
        base.limits.period_hours = self
            .period_hours
            .trim()
            .parse()
            .map_err(|_| format!("Period must be a number of hours, got '{}'", self.period_hours))?;
        let port: u16 = self
            .web_port
            .trim()
            .parse()
            .map_err(|_| format!("Port must be between 1 and 65535, got '{}'", self.web_port))?;
        if port == 0 {
            return Err("Port must be between 1 and 65535, got '0'".to_string());
        }
        base.http.port = port;

        let device = self.scanner_device_path.trim();
        base.scanner.device_path = (!device.is_empty()).then(|| device.to_string());
        base.display.debug_mode = self.debug_mode.as_deref() == Some("1");
        base.display.connectors = self.display_connectors.trim().to_string();

        base.validate().map_err(|e| e.to_string())?;
        Ok(base)
    }
}

fn settings_page(form: &SettingsForm, error: Option<&str>) -> Html<String> {
    let error = error
        .map(|e| format!("<p class=\"error\">{}</p>\n", text(e)))
        .unwrap_or_default();
    let checked = if form.debug_mode.as_deref() == Some("1") {
        " checked"
    } else {
        ""
    };
    let body = format!(
        "<h1>Settings</h1>\n{error}\
         <form method=\"post\" class=\"stack\">\n\
         <label for=\"max_videos\">Max videos per period</label>\n\
         <input type=\"number\" id=\"max_videos\" name=\"max_videos\" value=\"{max}\" min=\"1\" required>\n\
         <label for=\"period_hours\">Period (hours)</label>\n\
         <input type=\"number\" id=\"period_hours\" name=\"period_hours\" value=\"{period}\" min=\"0.1\" step=\"0.1\" required>\n\
         <label for=\"scanner_device_path\">Scanner device path (optional, e.g. /dev/input/event0)</label>\n\
         <input type=\"text\" id=\"scanner_device_path\" name=\"scanner_device_path\" value=\"{scanner}\" placeholder=\"Leave empty for auto-detect\">\n\
         <label for=\"web_port\">Web interface port (applies after restart)</label>\n\
         <input type=\"number\" id=\"web_port\" name=\"web_port\" value=\"{port}\" min=\"1\" max=\"65535\">\n\
         <label for=\"display_connectors\">Display connectors (comma-separated, empty for one default display)</label>\n\
         <input type=\"text\" id=\"display_connectors\" name=\"display_connectors\" value=\"{connectors}\" placeholder=\"0.HDMI-A-1,1.HDMI-A-2\">\n\
         <label><input type=\"checkbox\" name=\"debug_mode\" value=\"1\"{checked}> Debug mode (show log at bottom of screen)</label>\n\
         <button type=\"submit\" class=\"btn\">Save</button>\n</form>\n\
         <p><a href=\"/\">&larr; Back to Dashboard</a></p>",
        error = error,
        max = attr(&form.max_videos),
        period = attr(&form.period_hours),
        scanner = attr(&form.scanner_device_path),
        port = attr(&form.web_port),
        connectors = attr(&form.display_connectors),
        checked = checked,
    );
    page("Settings", &body)
}

async fn settings_form(State(state): State<HttpState>) -> Response {
    match state.load_config() {
        Ok(config) => settings_page(&SettingsForm::from_config(&config), None).into_response(),
        Err(resp) => resp,
    }
}

async fn save_settings(State(state): State<HttpState>, Form(form): Form<SettingsForm>) -> Response {
    let current = match state.load_config() {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let updated = match form.apply(current) {
        Ok(c) => c,
        Err(msg) => {
            warn!("HTTP: invalid settings: {}", msg);
            return (StatusCode::BAD_REQUEST, settings_page(&form, Some(&msg))).into_response();
        }
    };
    if let Err(e) = updated.save_to(&state.config_path) {
        error!("HTTP: could not save settings: {}", e);
        let msg = format!("Could not save settings: {}", e);
        return (StatusCode::INTERNAL_SERVER_ERROR, settings_page(&form, Some(&msg))).into_response();
    }
    info!("HTTP: settings saved");
    Redirect::to("/").into_response()
}

#[derive(Deserialize)]
struct PlayForm {
    #[serde(default)]
    url: String,
}

async fn play(State(state): State<HttpState>, Form(form): Form<PlayForm>) -> Redirect {
    match state.enqueue(&form.url, ScanSource::WebForm) {
        Ok(()) => Redirect::to("/?queued=1"),
        Err(_) => Redirect::to("/"),
    }
}

/// `/directplay/<url>`: the path is the URL (percent-decoded by the
/// extractor), and any query string belongs to it too.
async fn direct_play(
    State(state): State<HttpState>,
    Path(url): Path<String>,
    RawQuery(query): RawQuery,
) -> (StatusCode, Html<&'static str>) {
    let mut target = url.trim_start_matches('/').to_string();
    if let Some(q) = query.filter(|q| !q.is_empty()) {
        target.push('?');
        target.push_str(&q);
    }
    match state.enqueue(&target, ScanSource::DirectLink) {
        Ok(()) => (
            StatusCode::OK,
            Html("<!DOCTYPE html><html><body><p>Video queued for playback.</p></body></html>"),
        ),
        Err(StatusCode::BAD_REQUEST) => (
            StatusCode::BAD_REQUEST,
            Html("<!DOCTYPE html><html><body><p>Invalid or missing URL.</p></body></html>"),
        ),
        Err(code) => (
            code,
            Html("<!DOCTYPE html><html><body><p>Busy, try again shortly.</p></body></html>"),
        ),
    }
}

async fn api_state(State(state): State<HttpState>) -> Response {
    let config = match state.load_config() {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let recent_views = state.recent_views(&config).await;
    Json(StatusSnapshot {
        config,
        recent_views,
        debug_lines: state.debug_log.snapshot(),
    })
    .into_response()
}
