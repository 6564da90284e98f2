use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::extract::State;
use axum::http::StatusCode;
use axum::middleware::from_fn;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use clap::Parser;
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tower_http::trace::{DefaultMakeSpan, DefaultOnFailure, DefaultOnResponse, TraceLayer};
use tracing::{Level, error, info, warn};

mod metrics;

use cleverkeys_engine::facade::EngineInit;
use cleverkeys_engine::geometry::{KeyLayout, KeySlot};
use cleverkeys_engine::{CleverKeysEngine, EngineConfig, Gesture, GesturePoint, PredictConfig};

#[derive(Parser, Debug)]
#[command(name = "cleverkeys-server")]
#[command(about = "HTTP server for neural swipe-typing prediction")]
struct Params {
    #[arg(long = "tokenizer", required = true)]
    tokenizer_path: PathBuf,

    #[arg(long = "lexicon", required = true)]
    lexicon_path: PathBuf,

    #[arg(long = "enhanced-lexicon")]
    enhanced_lexicon_path: Option<PathBuf>,

    #[arg(long = "encoder", required = true)]
    encoder_model_path: PathBuf,

    #[arg(long = "decoder", required = true)]
    decoder_model_path: PathBuf,

    #[arg(long = "layout", required = true)]
    layout_path: PathBuf,

    /// Host interface to bind to.
    #[arg(long = "host", default_value = "127.0.0.1")]
    host: String,

    /// TCP port to listen on.
    #[arg(long = "port", default_value_t = 8080)]
    port: u16,
}

#[derive(Clone)]
struct AppState {
    engine: Arc<CleverKeysEngine>,
}

#[derive(Debug, Deserialize)]
struct PredictRequest {
    points: Vec<(f32, f32, u64)>,
    bbox: (f32, f32),
    #[serde(default)]
    config: Option<PredictConfig>,
}

#[derive(Debug, Serialize)]
struct PredictResponseItem {
    word: String,
    score: i32,
    confidence: f32,
}

#[derive(Debug, Serialize)]
struct PredictResponse {
    predictions: Vec<PredictResponseItem>,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

struct AppError {
    status: StatusCode,
    message: String,
}

impl AppError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }

    fn internal(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: message.into(),
        }
    }
}

impl From<cleverkeys_engine::PredictionError> for AppError {
    fn from(err: cleverkeys_engine::PredictionError) -> Self {
        use cleverkeys_engine::PredictionError::*;
        match err {
            InvalidGesture(_) => AppError::bad_request(err.to_string()),
            Cancelled => AppError::bad_request(err.to_string()),
            NotInitialized | Encoder(_) | Decoder(_) | Internal(_) => {
                AppError::internal(err.to_string())
            }
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = Json(ErrorBody {
            error: self.message,
        });
        (self.status, body).into_response()
    }
}

#[tokio::main]
async fn main() {
    cleverkeys_engine::logging::init();

    if let Err(err) = run().await {
        error!(error = ?err, "cleverkeys-server failed");
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let params = Params::parse();

    if let Err(err) = metrics::init() {
        warn!(error = ?err, "metrics disabled (init failed)");
    }

    let addr: SocketAddr = format!("{}:{}", params.host, params.port)
        .parse()
        .context("invalid host/port bind address")?;

    let layout = load_layout(&params.layout_path)
        .with_context(|| format!("failed to load layout from '{}'", params.layout_path.display()))?;

    let engine = CleverKeysEngine::init(EngineInit {
        tokenizer_path: &params.tokenizer_path,
        primary_lexicon_path: &params.lexicon_path,
        enhanced_lexicon_path: params.enhanced_lexicon_path.as_deref(),
        encoder_model_path: &params.encoder_model_path,
        decoder_model_path: &params.decoder_model_path,
        layout,
        engine_config: EngineConfig::default(),
    })
    .context("failed to initialize cleverkeys engine")?;

    let state = AppState {
        engine: Arc::new(engine),
    };

    let app = Router::new()
        .route("/healthz", get(healthz))
        .route("/metrics", get(metrics::prometheus_metrics))
        .route("/v1/predict", post(predict))
        .route("/v1/stats", get(stats))
        .route_layer(from_fn(metrics::track_http_metrics))
        .with_state(state)
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(
                    DefaultMakeSpan::new()
                        .level(Level::INFO)
                        .include_headers(false),
                )
                .on_response(DefaultOnResponse::new().level(Level::INFO))
                .on_failure(DefaultOnFailure::new().level(Level::ERROR)),
        );

    let listener = TcpListener::bind(addr).await.context("bind failed")?;
    info!(%addr, "listening");
    axum::serve(listener, app).await.context("server error")?;

    Ok(())
}

async fn healthz() -> &'static str {
    "ok"
}

async fn stats(State(state): State<AppState>) -> Json<cleverkeys_engine::stats::Stats> {
    Json(state.engine.stats())
}

async fn predict(
    State(state): State<AppState>,
    Json(request): Json<PredictRequest>,
) -> std::result::Result<Json<PredictResponse>, AppError> {
    if request.points.is_empty() {
        return Err(AppError::bad_request("gesture has no points"));
    }

    let points = request
        .points
        .into_iter()
        .map(|(x, y, t_ms)| GesturePoint { x, y, t_ms })
        .collect();
    let gesture = Gesture::new(points, request.bbox);
    let config = request.config.unwrap_or_default();

    let engine = Arc::clone(&state.engine);
    let predictions = tokio::task::spawn_blocking(move || engine.predict(&gesture, &config))
        .await
        .map_err(|err| AppError::internal(format!("predict task panicked: {err}")))??;

    if let Some(top) = predictions.first() {
        metrics::observe_predict_confidence(top.confidence);
    }

    Ok(Json(PredictResponse {
        predictions: predictions
            .into_iter()
            .map(|p| PredictResponseItem {
                word: p.word,
                score: p.score_i32,
                confidence: p.confidence,
            })
            .collect(),
    }))
}

#[derive(Debug, Deserialize)]
struct KeySlotFile {
    ch: char,
    cx: f32,
    cy: f32,
    half_w: f32,
    half_h: f32,
}

fn load_layout(path: &PathBuf) -> Result<KeyLayout> {
    let text = std::fs::read_to_string(path)?;
    let raw: Vec<KeySlotFile> = serde_json::from_str(&text).context("invalid layout JSON")?;
    let keys = raw
        .into_iter()
        .map(|s| KeySlot {
            ch: s.ch,
            cx: s.cx,
            cy: s.cy,
            half_w: s.half_w,
            half_h: s.half_h,
        })
        .collect();
    Ok(KeyLayout::new(keys))
}
