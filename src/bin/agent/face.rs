use std::convert::Infallible;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Context, Result};
use autoglm_agent::{StatusSink, StopHandle};
use axum::Json;
use axum::Router;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::Html;
use axum::response::sse::{Event, Sse};
use axum::routing::{get, post};
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc};
use tokio_stream::StreamExt;
use tokio_stream::wrappers::BroadcastStream;
use tracing::{error, info};

/// Events streamed to the page via SSE.
#[derive(Clone, Debug, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum AgentEvent {
    Status { text: String },
    TaskRunning { running: bool },
    TaskEnd { outcome: String, steps: u32 },
    Rejected { message: String },
    Ready,
}

impl AgentEvent {
    fn name(&self) -> &'static str {
        match self {
            AgentEvent::Status { .. } => "status",
            AgentEvent::TaskRunning { .. } => "task_running",
            AgentEvent::TaskEnd { .. } => "task_end",
            AgentEvent::Rejected { .. } => "rejected",
            AgentEvent::Ready => "ready",
        }
    }

    fn to_sse_event(&self) -> Event {
        let data = serde_json::to_string(self).unwrap_or_else(|_| "{}".into());
        Event::default().event(self.name()).data(data)
    }
}

/// Status sink that fans out to every open page.
pub struct WebStatus {
    events: broadcast::Sender<AgentEvent>,
}

impl WebStatus {
    pub fn new(events: broadcast::Sender<AgentEvent>) -> Self {
        Self { events }
    }
}

impl StatusSink for WebStatus {
    fn update_status(&self, text: &str) {
        info!(status = text);
        // No subscribers is fine.
        let _ = self.events.send(AgentEvent::Status {
            text: text.to_string(),
        });
    }

    fn set_task_running(&self, running: bool) {
        let _ = self.events.send(AgentEvent::TaskRunning { running });
    }
}

#[derive(Clone)]
struct AppState {
    cmd_tx: mpsc::Sender<String>,
    event_tx: broadcast::Sender<AgentEvent>,
    stop: StopHandle,
    /// Set when a goal is accepted, cleared by the command loop once it ends.
    busy: Arc<AtomicBool>,
}

#[derive(Deserialize)]
struct CommandPayload {
    command: String,
}

/// Serve the UI on the first free port in `port..port + 10`.
/// Returns the queue of goals submitted from the page. The caller clears
/// `busy` after each goal it takes from the queue has ended.
pub async fn start_server(
    port: u16,
    event_tx: broadcast::Sender<AgentEvent>,
    stop: StopHandle,
    busy: Arc<AtomicBool>,
) -> Result<mpsc::Receiver<String>> {
    // One slot: a second goal is refused while one is queued or running.
    let (cmd_tx, cmd_rx) = mpsc::channel::<String>(1);

    let state = Arc::new(AppState {
        cmd_tx,
        event_tx,
        stop,
        busy,
    });

    let app = Router::new()
        .route("/", get(index_handler))
        .route("/command", post(command_handler))
        .route("/stop", post(stop_handler))
        .route("/events", get(sse_handler))
        .route("/favicon.ico", get(|| async { StatusCode::NO_CONTENT }))
        .with_state(state);

    let mut bound = None;
    for p in port..port.saturating_add(10) {
        if let Ok(listener) = tokio::net::TcpListener::bind(("127.0.0.1", p)).await {
            bound = Some((listener, p));
            break;
        }
    }
    let (listener, port) = bound.with_context(|| {
        format!(
            "could not bind any port in {port}..{}",
            port.saturating_add(10)
        )
    })?;

    info!("web UI running at http://localhost:{port}");

    tokio::spawn(async move {
        if let Err(err) = axum::serve(listener, app).await {
            error!(error = %err, "web server stopped");
        }
    });

    Ok(cmd_rx)
}

async fn index_handler() -> Html<&'static str> {
    Html(INDEX_HTML)
}

async fn command_handler(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<CommandPayload>,
) -> (StatusCode, &'static str) {
    let goal = payload.command.trim().to_string();
    if goal.is_empty() {
        return (StatusCode::BAD_REQUEST, "empty goal");
    }
    if state.busy.swap(true, Ordering::SeqCst) {
        return (StatusCode::CONFLICT, "a task is already running");
    }
    info!(%goal, "goal submitted");
    match state.cmd_tx.try_send(goal) {
        Ok(()) => (StatusCode::ACCEPTED, "ok"),
        Err(_) => {
            state.busy.store(false, Ordering::SeqCst);
            (StatusCode::SERVICE_UNAVAILABLE, "agent is shutting down")
        }
    }
}

async fn stop_handler(State(state): State<Arc<AppState>>) -> &'static str {
    info!("stop requested from the web UI");
    state.stop.request_stop();
    "ok"
}

async fn sse_handler(
    State(state): State<Arc<AppState>>,
) -> Sse<impl tokio_stream::Stream<Item = Result<Event, Infallible>>> {
    let rx = state.event_tx.subscribe();
    let stream = BroadcastStream::new(rx).filter_map(|result| match result {
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
<title>Phone Agent</title>
<style>
  * { margin: 0; padding: 0; box-sizing: border-box; }
  body { background: #0b0d12; color: #e0e0e0; font-family: system-ui, sans-serif;
         height: 100vh; display: flex; flex-direction: column; }
  header { padding: 20px 28px; border-bottom: 1px solid #1c2030; display: flex; gap: 12px; align-items: center; }
  header h1 { font-size: 18px; color: #fff; }
  #dot { width: 8px; height: 8px; border-radius: 50%; background: #22c55e; }
  #dot.busy { background: #f59e0b; }
  main { flex: 1; display: flex; flex-direction: column; gap: 12px; max-width: 760px;
         width: 100%; margin: 0 auto; padding: 20px 28px; overflow: hidden; }
  #log { flex: 1; overflow-y: auto; display: flex; flex-direction: column; gap: 6px; }
  .entry { padding: 8px 12px; border-radius: 6px; font-size: 14px; background: #12151d; border-left: 3px solid #3b82f6; }
  .entry.goal { border-color: #6366f1; }
  .entry.end { border-color: #22c55e; color: #86efac; }
  .entry.error { border-color: #ef4444; color: #fca5a5; }
  form { display: flex; gap: 8px; }
  input { flex: 1; background: #12151d; border: 1px solid #222; border-radius: 6px; padding: 10px 14px; color: #fff; font-size: 15px; }
  button { border: none; border-radius: 6px; padding: 10px 20px; font-weight: 600; color: #fff; background: #6366f1; cursor: pointer; }
  button#stop { background: #ef4444; }
  button:disabled { background: #333; cursor: not-allowed; }
</style>
</head>
<body>
  <header><div id="dot"></div><h1>Phone Agent</h1></header>
  <main>
    <div id="log"></div>
    <form id="form">
      <input id="goal" placeholder="What should the phone do?" autofocus />
      <button id="send" type="submit">Run</button>
      <button id="stop" type="button" disabled>Stop</button>
    </form>
  </main>
<script>
  const log = document.getElementById('log');
  const goal = document.getElementById('goal');
  const send = document.getElementById('send');
  const stop = document.getElementById('stop');
  const dot = document.getElementById('dot');

  function add(cls, text) {
    const div = document.createElement('div');
    div.className = 'entry ' + cls;
    div.textContent = text;
    log.appendChild(div);
    log.scrollTop = log.scrollHeight;
  }

  function setBusy(busy) {
    goal.disabled = busy;
    send.disabled = busy;
    stop.disabled = !busy;
    dot.className = busy ? 'busy' : '';
  }

  document.getElementById('form').addEventListener('submit', async e => {
    e.preventDefault();
    const text = goal.value.trim();
    if (!text) return;
    goal.value = '';
    add('goal', 'Goal: ' + text);
    setBusy(true);
    const res = await fetch('/command', {
      method: 'POST',
      headers: {'Content-Type': 'application/json'},
      body: JSON.stringify({command: text}),
    });
    if (!res.ok) { add('error', await res.text()); setBusy(false); }
  });

  stop.addEventListener('click', () => fetch('/stop', {method: 'POST'}));

  const es = new EventSource('/events');
  es.addEventListener('status', e => add('', JSON.parse(e.data).text));
  es.addEventListener('task_running', e => setBusy(JSON.parse(e.data).running));
  es.addEventListener('task_end', e => {
    const d = JSON.parse(e.data);
    add(d.outcome === 'failed' ? 'error' : 'end', 'Task ' + d.outcome + ' after ' + d.steps + ' steps');
  });
  es.addEventListener('rejected', e => add('error', JSON.parse(e.data).message));
  es.addEventListener('ready', () => setBusy(false));
</script>
</body>
</html>
"##;
