// src/bin/cleverkeys-cli.rs

use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use serde::Deserialize;

use cleverkeys_engine::facade::EngineInit;
use cleverkeys_engine::geometry::{KeyLayout, KeySlot};
use cleverkeys_engine::{CleverKeysEngine, EngineConfig, Gesture, GesturePoint, PredictConfig};

fn main() -> Result<()> {
    cleverkeys_engine::logging::init();

    let params = Params::parse();

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

    let gesture = load_gesture(&params.gesture_path)
        .with_context(|| format!("failed to load gesture from '{}'", params.gesture_path.display()))?;

    let config = PredictConfig {
        beam_width: params.beam_width,
        ..Default::default()
    };

    let predictions = engine
        .predict(&gesture, &config)
        .context("prediction failed")?;

    for (rank, prediction) in predictions.iter().enumerate() {
        println!("{:>2}. {:<20} score={}", rank + 1, prediction.word, prediction.score_i32);
    }

    Ok(())
}

/// A gesture replayed from a JSON file, for offline testing against recorded swipes.
#[derive(Debug, Deserialize)]
struct GestureFile {
    points: Vec<(f32, f32, u64)>,
    bbox: (f32, f32),
}

fn load_gesture(path: &PathBuf) -> Result<Gesture> {
    let text = fs::read_to_string(path)?;
    let raw: GestureFile = serde_json::from_str(&text).context("invalid gesture JSON")?;
    let points = raw
        .points
        .into_iter()
        .map(|(x, y, t_ms)| GesturePoint { x, y, t_ms })
        .collect();
    Ok(Gesture::new(points, raw.bbox))
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
    let text = fs::read_to_string(path)?;
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

/// CLI parameters for `cleverkeys-cli`.
#[derive(Parser, Debug)]
#[command(name = "cleverkeys-cli")]
#[command(about = "Replay a recorded swipe gesture through the CleverKeys decoder")]
struct Params {
    /// Path to the tokenizer JSON file (`char -> token id`).
    #[arg(long = "tokenizer", required = true)]
    tokenizer_path: PathBuf,

    /// Path to the primary word-frequency lexicon.
    #[arg(long = "lexicon", required = true)]
    lexicon_path: PathBuf,

    /// Path to an optional enhanced word-frequency lexicon, layered on top of the primary one.
    #[arg(long = "enhanced-lexicon")]
    enhanced_lexicon_path: Option<PathBuf>,

    /// Path to the encoder ONNX model.
    #[arg(long = "encoder", required = true)]
    encoder_model_path: PathBuf,

    /// Path to the decoder ONNX model.
    #[arg(long = "decoder", required = true)]
    decoder_model_path: PathBuf,

    /// Path to a JSON key layout file.
    #[arg(long = "layout", required = true)]
    layout_path: PathBuf,

    /// Path to a JSON gesture replay file.
    #[arg(long = "gesture", required = true)]
    gesture_path: PathBuf,

    /// Beam search width.
    #[arg(long = "beam-width", default_value_t = 8)]
    beam_width: usize,
}
