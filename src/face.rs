use std::convert::Infallible;
use std::sync::Arc;

use anyhow::{Result, anyhow};
use axum::Json;
use axum::Router;
use axum::extract::State;
use axum::http::{StatusCode, header};
use axum::response::sse::{Event, Sse};
use axum::response::{Html, IntoResponse, Response};
use axum::routing::{get, post};
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio_stream::StreamExt;
use tokio_stream::wrappers::BroadcastStream;
use tracing::{debug, error, info};

use crate::brain::ScriptModel;
use crate::bridge::PageSource;
use crate::config::{Settings, SettingsStore};
use crate::pipeline::Session;
use crate::presenter::{self, ScriptDownload};
use crate::types::KNOWN_MODELS;

/// Events streamed to the panel via SSE.
#[derive(Clone, Debug)]
pub enum PanelEvent {
    Status { message: String },
    ScriptReady { script: String, file_name: String },
    TaskError { message: String },
    Copied,
    Ready,
}

impl PanelEvent {
    fn to_sse_event(&self) -> Event {
        match self {
            PanelEvent::Status { message } => Event::default()
                .event("status")
                .data(serde_json::json!({ "message": message }).to_string()),
            PanelEvent::ScriptReady { script, file_name } => Event::default()
                .event("script_ready")
                .data(serde_json::json!({ "script": script, "fileName": file_name }).to_string()),
            PanelEvent::TaskError { message } => Event::default()
                .event("task_error")
                .data(serde_json::json!({ "message": message }).to_string()),
            PanelEvent::Copied => Event::default().event("copied").data("{}"),
            PanelEvent::Ready => Event::default().event("ready").data("{}"),
        }
    }
}

/// What the panel asks the session loop to do.
#[derive(Debug)]
pub enum PanelCommand {
    Generate { goal: String },
    Copy,
    Download { reply: oneshot::Sender<Option<ScriptDownload>> },
    GetSettings { reply: oneshot::Sender<Settings> },
    SaveSettings {
        settings: Settings,
        reply: oneshot::Sender<Result<(), String>>,
    },
}

#[derive(Clone)]
pub struct AppState {
    pub cmd_tx: mpsc::Sender<PanelCommand>,
    pub event_tx: broadcast::Sender<PanelEvent>,
}

#[derive(Deserialize)]
struct GeneratePayload {
    goal: String,
}

/// Settings as the form sees them. The key itself is never sent back out.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SettingsView {
    has_api_key: bool,
    model: String,
    models: &'static [&'static str],
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SettingsPayload {
    #[serde(default)]
    api_key: Option<String>,
    model: String,
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(index_handler))
        .route("/generate", post(generate_handler))
        .route("/copy", post(copy_handler))
        .route("/script/download", get(download_handler))
        .route("/settings", get(get_settings_handler).post(save_settings_handler))
        .route("/events", get(sse_handler))
        .route("/favicon.ico", get(|| async { StatusCode::NO_CONTENT }))
        .with_state(state)
}

/// Start the panel on `port`, trying the next nine ports if it is taken.
pub async fn start_server(
    port: u16,
) -> Result<(mpsc::Receiver<PanelCommand>, broadcast::Sender<PanelEvent>)> {
    let (cmd_tx, cmd_rx) = mpsc::channel::<PanelCommand>(1);
    let (event_tx, _) = broadcast::channel::<PanelEvent>(64);

    let state = Arc::new(AppState {
        cmd_tx,
        event_tx: event_tx.clone(),
    });
    let app = router(state);

    let mut bound = None;
    for p in port..port.saturating_add(10) {
        if let Ok(l) = tokio::net::TcpListener::bind(("127.0.0.1", p)).await {
            bound = Some((l, p));
            break;
        }
        debug!("port {} in use", p);
    }
    let (listener, port) = bound.ok_or_else(|| {
        anyhow!(
            "could not bind any port in {}..{}; is another panel running?",
            port,
            port.saturating_add(10)
        )
    })?;

    info!("panel running at http://localhost:{}", port);

    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            error!("panel server stopped: {}", e);
        }
    });

    Ok((cmd_rx, event_tx))
}

/// Serve panel commands until every sender is gone.
///
/// Commands are handled one at a time, so at most one generation is in flight.
pub async fn run_session<P: PageSource, M: ScriptModel>(
    mut session: Session<P, M>,
    mut cmd_rx: mpsc::Receiver<PanelCommand>,
    event_tx: broadcast::Sender<PanelEvent>,
    mut store: SettingsStore,
) {
    while let Some(command) = cmd_rx.recv().await {
        match command {
            PanelCommand::Generate { goal } => {
                run_generation(&mut session, &goal, &event_tx).await;
            }
            PanelCommand::Copy => {
                if let Some(script) = session.current_script() {
                    presenter::copy_to_clipboard(script);
                    let _ = event_tx.send(PanelEvent::Copied);
                }
            }
            PanelCommand::Download { reply } => {
                let _ = reply.send(session.current_script().map(ScriptDownload::from));
            }
            PanelCommand::GetSettings { reply } => {
                let _ = reply.send(session.settings().clone());
            }
            PanelCommand::SaveSettings { settings, reply } => {
                let result = store
                    .save_form(settings)
                    .map(|effective| session.apply_settings(effective))
                    .map_err(|e| format!("Failed to save settings: {:#}", e));
                let _ = reply.send(result);
            }
        }
    }
    debug!("panel command channel closed");
}

/// One generation, reported to the panel. Always ends with `Ready`.
pub async fn run_generation<P: PageSource, M: ScriptModel>(
    session: &mut Session<P, M>,
    goal: &str,
    events: &broadcast::Sender<PanelEvent>,
) {
    info!("generating for goal: {}", goal);
    let result = session
        .generate(goal, |stage| {
            let _ = events.send(PanelEvent::Status {
                message: stage.message().to_string(),
            });
        })
        .await;

    match result {
        Ok(script) => {
            info!(file = %script.file_name(), "script ready");
            let _ = events.send(PanelEvent::ScriptReady {
                script: script.text.clone(),
                file_name: script.file_name(),
            });
        }
        Err(e) => {
            error!("generation failed: {}", e);
            let _ = events.send(PanelEvent::TaskError {
                message: e.to_string(),
            });
        }
    }
    let _ = events.send(PanelEvent::Ready);
}

async fn index_handler() -> Html<&'static str> {
    Html(INDEX_HTML)
}

async fn generate_handler(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<GeneratePayload>,
) -> StatusCode {
    debug!("POST /generate");
    match state
        .cmd_tx
        .send(PanelCommand::Generate { goal: payload.goal })
        .await
    {
        Ok(()) => StatusCode::ACCEPTED,
        Err(_) => StatusCode::SERVICE_UNAVAILABLE,
    }
}

async fn copy_handler(State(state): State<Arc<AppState>>) -> StatusCode {
    match state.cmd_tx.send(PanelCommand::Copy).await {
        Ok(()) => StatusCode::ACCEPTED,
        Err(_) => StatusCode::SERVICE_UNAVAILABLE,
    }
}

async fn download_handler(State(state): State<Arc<AppState>>) -> Response {
    let (reply, rx) = oneshot::channel();
    if state.cmd_tx.send(PanelCommand::Download { reply }).await.is_err() {
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    }
    match rx.await {
        Ok(Some(download)) => (
            [
                (header::CONTENT_TYPE, "text/javascript; charset=utf-8".to_string()),
                (header::CONTENT_DISPOSITION, download.content_disposition()),
            ],
            download.content,
        )
            .into_response(),
        Ok(None) => (StatusCode::NOT_FOUND, "No script generated yet.").into_response(),
        Err(_) => StatusCode::SERVICE_UNAVAILABLE.into_response(),
    }
}

async fn get_settings_handler(State(state): State<Arc<AppState>>) -> Response {
    let (reply, rx) = oneshot::channel();
    if state.cmd_tx.send(PanelCommand::GetSettings { reply }).await.is_err() {
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    }
    match rx.await {
        Ok(settings) => Json(SettingsView {
            has_api_key: settings.api_key().is_some(),
            model: settings.model,
            models: KNOWN_MODELS,
        })
        .into_response(),
        Err(_) => StatusCode::SERVICE_UNAVAILABLE.into_response(),
    }
}

async fn save_settings_handler(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<SettingsPayload>,
) -> Response {
    let (reply, rx) = oneshot::channel();
    let settings = Settings {
        api_key: payload.api_key,
        model: payload.model,
    };
    if state
        .cmd_tx
        .send(PanelCommand::SaveSettings { settings, reply })
        .await
        .is_err()
    {
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    }
    match rx.await {
        Ok(Ok(())) => (StatusCode::OK, "Settings saved.").into_response(),
        Ok(Err(message)) => (StatusCode::INTERNAL_SERVER_ERROR, message).into_response(),
        Err(_) => StatusCode::SERVICE_UNAVAILABLE.into_response(),
    }
}

async fn sse_handler(
    State(state): State<Arc<AppState>>,
) -> Sse<impl tokio_stream::Stream<Item = Result<Event, Infallible>>> {
    let rx = state.event_tx.subscribe();
    let stream =
        BroadcastStream::new(rx).filter_map(|result: Result<PanelEvent, _>| match result {
            Ok(event) => Some(Ok::<_, Infallible>(event.to_sse_event())),
            Err(_) => None,
        });
    Sse::new(stream)
}

const INDEX_HTML: &str = r##"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="UTF-8">
<meta name="viewport" content="width=device-width, initial-scale=1.0">
<title>VibeMonkey</title>
<style>
  * { margin: 0; padding: 0; box-sizing: border-box; }
  body {
    background: #0a0a0f;
    color: #e0e0e0;
    font-family: 'Segoe UI', system-ui, -apple-system, sans-serif;
    min-height: 100vh;
  }
  header {
    padding: 20px 32px;
    border-bottom: 1px solid #1a1a2e;
    display: flex;
    align-items: center;
    gap: 12px;
  }
  header h1 { font-size: 20px; font-weight: 600; color: #fff; }
  header .dot {
    width: 8px; height: 8px;
    border-radius: 50%;
    background: #22c55e;
  }
  header .dot.busy { background: #f59e0b; }
  .main {
    max-width: 800px;
    margin: 0 auto;
    padding: 24px 32px;
    display: flex;
    flex-direction: column;
    gap: 16px;
  }
  textarea, input, select {
    background: #111118;
    border: 1px solid #222;
    border-radius: 8px;
    padding: 12px 16px;
    color: #fff;
    font-size: 15px;
    outline: none;
  }
  textarea { min-height: 90px; resize: vertical; }
  textarea:focus, input:focus, select:focus { border-color: #6366f1; }
  pre {
    background: #111118;
    border-left: 3px solid #3b82f6;
    border-radius: 8px;
    padding: 14px;
    font-family: 'Cascadia Code', 'Fira Code', monospace;
    font-size: 13px;
    white-space: pre-wrap;
    min-height: 120px;
  }
  pre.error { border-left-color: #ef4444; color: #fca5a5; }
  .row { display: flex; gap: 8px; align-items: center; }
  #result-actions { display: none; }
  #result-actions.visible { display: flex; }
  button {
    background: #6366f1;
    color: #fff;
    border: none;
    border-radius: 8px;
    padding: 10px 20px;
    font-size: 15px;
    font-weight: 600;
    cursor: pointer;
  }
  button:hover { background: #4f46e5; }
  button:disabled { background: #333; cursor: not-allowed; }
  details { border-top: 1px solid #1a1a2e; padding-top: 12px; }
  summary { cursor: pointer; color: #aaa; margin-bottom: 12px; }
  #status { color: #86efac; font-size: 13px; }
</style>
</head>
<body>
  <header>
    <div class="dot" id="status-dot"></div>
    <h1>VibeMonkey</h1>
  </header>
  <div class="main">
    <textarea id="user-prompt" placeholder="Describe what you want to change on this page..."></textarea>
    <div class="row"><button id="generate-button">Generate Script</button></div>
    <pre id="result-code">Your userscript will appear here.</pre>
    <div class="row" id="result-actions">
      <button id="copy-button">Copy</button>
      <button id="save-button">Save</button>
    </div>
    <details>
      <summary>Settings</summary>
      <div class="row">
        <input type="password" id="api-key" placeholder="Gemini API key (leave blank to keep)" style="flex:1" />
        <select id="model-select"></select>
        <button id="settings-button">Save settings</button>
      </div>
      <p id="status"></p>
    </details>
  </div>
<script>
  const prompt = document.getElementById('user-prompt');
  const generateBtn = document.getElementById('generate-button');
  const result = document.getElementById('result-code');
  const actions = document.getElementById('result-actions');
  const dot = document.getElementById('status-dot');
  const apiKey = document.getElementById('api-key');
  const modelSelect = document.getElementById('model-select');
  const status = document.getElementById('status');

  function setLoading(b) {
    generateBtn.disabled = b;
    generateBtn.textContent = b ? 'Generating...' : 'Generate Script';
    dot.className = b ? 'dot busy' : 'dot';
  }

  function show(text, isError) {
    result.textContent = text;
    result.className = isError ? 'error' : '';
  }

  generateBtn.addEventListener('click', async () => {
    setLoading(true);
    actions.classList.remove('visible');
    const res = await fetch('/generate', {
      method: 'POST',
      headers: {'Content-Type': 'application/json'},
      body: JSON.stringify({goal: prompt.value}),
    });
    if (!res.ok) { show('Error: the generator is not running.', true); setLoading(false); }
  });

  document.getElementById('copy-button').addEventListener('click', () => {
    fetch('/copy', {method: 'POST'});
  });

  document.getElementById('save-button').addEventListener('click', () => {
    window.location.href = '/script/download';
  });

  document.getElementById('settings-button').addEventListener('click', async () => {
    const body = {model: modelSelect.value};
    if (apiKey.value.trim() !== '') body.apiKey = apiKey.value.trim();
    const res = await fetch('/settings', {
      method: 'POST',
      headers: {'Content-Type': 'application/json'},
      body: JSON.stringify(body),
    });
    status.textContent = await res.text();
    apiKey.value = '';
    setTimeout(() => { status.textContent = ''; }, 2000);
  });

  async function loadSettings() {
    const s = await (await fetch('/settings')).json();
    modelSelect.innerHTML = '';
    const models = s.models.includes(s.model) ? s.models : [s.model, ...s.models];
    for (const m of models) {
      const opt = document.createElement('option');
      opt.value = m; opt.textContent = m;
      modelSelect.appendChild(opt);
    }
    modelSelect.value = s.model;
    apiKey.placeholder = s.hasApiKey ? 'API key set (leave blank to keep)' : 'Gemini API key';
  }

  const es = new EventSource('/events');
  es.addEventListener('status', e => show(JSON.parse(e.data).message, false));
  es.addEventListener('script_ready', e => {
    const d = JSON.parse(e.data);
    show(d.script, false);
    document.getElementById('save-button').title = d.fileName;
    actions.classList.add('visible');
  });
  es.addEventListener('task_error', e => show(JSON.parse(e.data).message, true));
  es.addEventListener('copied', () => { status.textContent = 'Copied!'; });
  es.addEventListener('ready', () => setLoading(false));

  loadSettings();
</script>
</body>
</html>
"##;

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    use crate::config::EnvOverrides;
    use crate::pipeline::tests::{GOOD_REPLY, harness};

    fn test_router() -> (Router, mpsc::Receiver<PanelCommand>) {
        let (cmd_tx, cmd_rx) = mpsc::channel(1);
        let (event_tx, _) = broadcast::channel(8);
        (router(Arc::new(AppState { cmd_tx, event_tx })), cmd_rx)
    }

    #[tokio::test]
    async fn test_generate_forwards_goal() {
        let (app, mut rx) = test_router();
        let request = Request::post("/generate")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(r#"{"goal": "hide ads"}"#))
            .unwrap();

        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);
        match rx.recv().await {
            Some(PanelCommand::Generate { goal }) => assert_eq!(goal, "hide ads"),
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_download_serves_attachment() {
        let (app, mut rx) = test_router();
        tokio::spawn(async move {
            if let Some(PanelCommand::Download { reply }) = rx.recv().await {
                let _ = reply.send(Some(ScriptDownload {
                    file_name: "Red_Links.user.js".into(),
                    content: "// ==UserScript==".into(),
                }));
            }
        });

        let request = Request::get("/script/download").body(Body::empty()).unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[header::CONTENT_DISPOSITION],
            "attachment; filename=\"Red_Links.user.js\""
        );
    }

    #[tokio::test]
    async fn test_download_before_any_script() {
        let (app, mut rx) = test_router();
        tokio::spawn(async move {
            if let Some(PanelCommand::Download { reply }) = rx.recv().await {
                let _ = reply.send(None);
            }
        });

        let request = Request::get("/script/download").body(Body::empty()).unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_settings_view_hides_key() {
        let (app, mut rx) = test_router();
        tokio::spawn(async move {
            if let Some(PanelCommand::GetSettings { reply }) = rx.recv().await {
                let _ = reply.send(Settings {
                    api_key: Some("secret".into()),
                    model: "gemini-1.5-pro".into(),
                });
            }
        });

        let request = Request::get("/settings").body(Body::empty()).unwrap();
        let response = app.oneshot(request).await.unwrap();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["hasApiKey"], true);
        assert_eq!(body["model"], "gemini-1.5-pro");
        assert!(!String::from_utf8_lossy(&bytes).contains("secret"));
    }

    #[tokio::test]
    async fn test_closed_loop_is_unavailable() {
        let (app, rx) = test_router();
        drop(rx);
        let request = Request::post("/copy").body(Body::empty()).unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    fn drain(rx: &mut broadcast::Receiver<PanelEvent>) -> Vec<PanelEvent> {
        std::iter::from_fn(|| rx.try_recv().ok()).collect()
    }

    fn store_in(dir: &tempfile::TempDir, env_key: Option<&str>) -> SettingsStore {
        let env = EnvOverrides {
            api_key: env_key.map(String::from),
            model: None,
        };
        SettingsStore::open(dir.path().join("settings.json"), env).unwrap()
    }

    #[tokio::test]
    async fn test_successful_generation_reports_script_then_ready() {
        let mut h = harness(Some("https://example.com/"), Ok(GOOD_REPLY), Some("key"));
        let (event_tx, mut events) = broadcast::channel(16);

        run_generation(&mut h.session, "highlight all links red", &event_tx).await;

        let events = drain(&mut events);
        assert_eq!(events.len(), 4, "{events:?}");
        assert!(matches!(&events[0], PanelEvent::Status { message } if message == "Getting page context..."));
        assert!(matches!(&events[1], PanelEvent::Status { message } if message == "Generating script..."));
        match &events[2] {
            PanelEvent::ScriptReady { script, file_name } => {
                assert!(script.starts_with("// ==UserScript=="));
                assert_eq!(file_name, "Red_Links.user.js");
            }
            other => panic!("expected ScriptReady, got {other:?}"),
        }
        assert!(matches!(events[3], PanelEvent::Ready));
    }

    #[tokio::test]
    async fn test_invalid_script_reports_error_then_ready() {
        let reply = "// ==UserScript==\n// @name Nope\n// ==/UserScript==\n(function() {})();";
        let mut h = harness(Some("https://example.com/"), Ok(reply), Some("key"));
        let (event_tx, mut events) = broadcast::channel(16);

        run_generation(&mut h.session, "do it", &event_tx).await;

        let events = drain(&mut events);
        assert!(!events.iter().any(|e| matches!(e, PanelEvent::ScriptReady { .. })));
        let n = events.len();
        assert!(n >= 2, "{events:?}");
        match &events[n - 2] {
            PanelEvent::TaskError { message } => {
                assert!(message.contains("not a valid userscript"), "{message}");
            }
            other => panic!("expected TaskError, got {other:?}"),
        }
        assert!(matches!(events[n - 1], PanelEvent::Ready));
    }

    #[tokio::test]
    async fn test_session_loop_serves_download_after_generation() {
        let dir = tempfile::tempdir().unwrap();
        let h = harness(Some("https://example.com/"), Ok(GOOD_REPLY), Some("key"));
        let (cmd_tx, cmd_rx) = mpsc::channel(1);
        let (event_tx, mut events) = broadcast::channel(16);
        let worker = tokio::spawn(run_session(h.session, cmd_rx, event_tx, store_in(&dir, None)));

        let (reply, rx) = oneshot::channel();
        cmd_tx.send(PanelCommand::Download { reply }).await.unwrap();
        assert!(rx.await.unwrap().is_none());

        cmd_tx
            .send(PanelCommand::Generate { goal: "red links".into() })
            .await
            .unwrap();
        let (reply, rx) = oneshot::channel();
        cmd_tx.send(PanelCommand::Download { reply }).await.unwrap();
        let download = rx.await.unwrap().unwrap();
        assert_eq!(download.file_name, "Red_Links.user.js");

        drop(cmd_tx);
        worker.await.unwrap();
        let events = drain(&mut events);
        assert!(matches!(events.last(), Some(PanelEvent::Ready)));
    }

    #[tokio::test]
    async fn test_session_loop_saves_settings_without_env_key() {
        let dir = tempfile::tempdir().unwrap();
        let mut h = harness(Some("https://example.com/"), Ok(GOOD_REPLY), None);
        let store = store_in(&dir, Some("ENVSECRET"));
        h.session.apply_settings(store.effective());
        let (cmd_tx, cmd_rx) = mpsc::channel(1);
        let (event_tx, _) = broadcast::channel(16);
        let worker = tokio::spawn(run_session(h.session, cmd_rx, event_tx, store));

        let (reply, rx) = oneshot::channel();
        cmd_tx
            .send(PanelCommand::SaveSettings {
                settings: Settings {
                    api_key: None,
                    model: "gemini-1.5-pro".into(),
                },
                reply,
            })
            .await
            .unwrap();
        assert_eq!(rx.await.unwrap(), Ok(()));

        let (reply, rx) = oneshot::channel();
        cmd_tx.send(PanelCommand::GetSettings { reply }).await.unwrap();
        let current = rx.await.unwrap();
        assert_eq!(current.api_key(), Some("ENVSECRET"));
        assert_eq!(current.model, "gemini-1.5-pro");

        drop(cmd_tx);
        worker.await.unwrap();
        let on_disk = std::fs::read_to_string(dir.path().join("settings.json")).unwrap();
        assert!(!on_disk.contains("ENVSECRET"), "{on_disk}");
        assert!(on_disk.contains("gemini-1.5-pro"));
    }
}
