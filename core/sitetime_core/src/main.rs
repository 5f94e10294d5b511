use anyhow::Context;
use axum::{
    extract::State,
    http::{HeaderValue, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use clap::Parser;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sitetime_core::{
    BrowserEvent, Command, Reply, Request, Sender, SqliteStore, SystemClock, TabMirror, Tracker,
    TrackerConfig,
};
use std::{
    net::{IpAddr, SocketAddr},
    path::PathBuf,
    sync::Arc,
    time::Duration,
};
use tokio::sync::Mutex;
use tower_http::cors::CorsLayer;
use tracing::{error, info};

const DEFAULT_PORT: u16 = 17700;

#[derive(Parser, Debug)]
#[command(name = "sitetime_core", version)]
struct Args {
    /// Listen address.
    ///
    /// Accepts:
    /// - ip:port (recommended), e.g. 127.0.0.1:17700
    /// - ip (implies port 17700), e.g. 127.0.0.1
    #[arg(long, default_value = "127.0.0.1:17700")]
    listen: String,

    /// SQLite database path.
    #[arg(long, default_value = "./data/sitetime.db")]
    db: PathBuf,

    /// Seconds without user activity after which accrual pauses.
    #[arg(long, default_value_t = 60)]
    idle_pause_seconds: i64,

    /// Lead time of the break warning (seconds).
    #[arg(long, default_value_t = 10)]
    break_warning_seconds: i64,

    /// Tick period in milliseconds.
    #[arg(long, default_value_t = 1000)]
    tick_ms: u64,
}

#[derive(Clone)]
struct AppState {
    tracker: Arc<Mutex<Tracker>>,
}

/// `{ok: false, error}` with a status code.
#[derive(Debug)]
struct ApiError {
    status: StatusCode,
    code: &'static str,
}

impl ApiError {
    fn bad_request(code: &'static str) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            code,
        }
    }

    fn storage(err: impl std::fmt::Display) -> Self {
        error!("tracker storage failed: {err}");
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            code: "storage_error",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({"ok": false, "error": self.code}))).into_response()
    }
}

#[derive(Serialize)]
struct CommandsResponse {
    ok: bool,
    commands: Vec<Command>,
}

#[derive(Serialize)]
struct MessageResponse {
    reply: Reply,
    commands: Vec<Command>,
}

#[derive(Deserialize)]
struct MessageEnvelope {
    #[serde(default)]
    sender: Sender,
    message: Value,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "sitetime_core=info,tower_http=info".into()),
        )
        .init();

    let args = Args::parse();

    if let Some(parent) = args.db.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let store = SqliteStore::open(&args.db)?;

    let config = TrackerConfig {
        idle_pause_ms: args.idle_pause_seconds.max(1) * 1000,
        break_warning_ms: args.break_warning_seconds.max(0) * 1000,
    };
    let tracker = Tracker::new(
        Box::new(store),
        TabMirror::new(),
        Box::new(SystemClock),
        config,
    );
    let state = AppState {
        tracker: Arc::new(Mutex::new(tracker)),
    };

    tokio::spawn(run_ticks(
        state.tracker.clone(),
        Duration::from_millis(args.tick_ms.max(50)),
    ));

    let cors = CorsLayer::new()
        .allow_origin(HeaderValue::from_static("*"))
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([axum::http::header::CONTENT_TYPE]);

    let app = Router::new()
        .route("/health", get(health))
        .route("/event", post(post_event))
        .route("/message", post(post_message))
        .route("/commands", get(get_commands))
        .with_state(state)
        .layer(cors);

    let addr = parse_listen(&args.listen)?;
    info!("Core listening on http://{addr}");
    info!("DB: {}", args.db.display());

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

async fn run_ticks(tracker: Arc<Mutex<Tracker>>, period: Duration) {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    loop {
        interval.tick().await;
        let mut tracker = tracker.lock().await;
        if let Err(err) = tracker.tick() {
            error!("tick failed: {err}");
        }
    }
}

/// `ip:port`, bare `ip` (default port) or `localhost[:port]`.
fn parse_listen(input: &str) -> anyhow::Result<SocketAddr> {
    let input = input.trim();
    if let Ok(addr) = input.parse::<SocketAddr>() {
        return Ok(addr);
    }
    // A colon inside the host part means a bare IPv6 address.
    let (host, port) = match input.rsplit_once(':') {
        Some((host, port)) if !host.contains(':') => {
            let port = port
                .parse::<u16>()
                .with_context(|| format!("invalid --listen {input:?}: bad port"))?;
            (host, port)
        }
        _ => (input, DEFAULT_PORT),
    };
    let ip = if host.eq_ignore_ascii_case("localhost") {
        IpAddr::from([127, 0, 0, 1])
    } else {
        host.parse::<IpAddr>().with_context(|| {
            format!("invalid --listen {input:?}: expected ip, ip:port or localhost[:port]")
        })?
    };
    Ok(SocketAddr::new(ip, port))
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        error!("ctrl-c handler failed: {err}");
    }
    info!("shutting down");
}

async fn health() -> Json<Value> {
    Json(json!({
        "ok": true,
        "data": {"service": env!("CARGO_PKG_NAME"), "version": env!("CARGO_PKG_VERSION")},
    }))
}

async fn post_event(
    State(state): State<AppState>,
    Json(payload): Json<Value>,
) -> Result<Json<CommandsResponse>, ApiError> {
    let event: BrowserEvent =
        serde_json::from_value(payload).map_err(|_| ApiError::bad_request("invalid_event"))?;
    let mut tracker = state.tracker.lock().await;
    tracker.handle_event(event).map_err(ApiError::storage)?;
    Ok(Json(CommandsResponse {
        ok: true,
        commands: tracker.drain_commands(),
    }))
}

async fn post_message(
    State(state): State<AppState>,
    Json(payload): Json<Value>,
) -> Result<Json<MessageResponse>, ApiError> {
    let envelope: MessageEnvelope =
        serde_json::from_value(payload).map_err(|_| ApiError::bad_request("invalid_json"))?;
    let request: Request = serde_json::from_value(envelope.message)
        .map_err(|_| ApiError::bad_request("invalid_message"))?;
    let mut tracker = state.tracker.lock().await;
    let reply = tracker
        .handle_message(request, &envelope.sender)
        .map_err(ApiError::storage)?;
    Ok(Json(MessageResponse {
        reply,
        commands: tracker.drain_commands(),
    }))
}

async fn get_commands(State(state): State<AppState>) -> Json<CommandsResponse> {
    let mut tracker = state.tracker.lock().await;
    Json(CommandsResponse {
        ok: true,
        commands: tracker.drain_commands(),
    })
}
