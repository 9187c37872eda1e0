//! ONNX Runtime backend via the `ort` crate.
//!
//! ## Model I/O
//!
//! | Name        | Shape                  | DType | Direction |
//! |-------------|------------------------|-------|-----------|
//! | `primary`   | `[1, 2, window+cache]` | f32   | in        |
//! | `sidechain` | `[1, 2, window+cache]` | f32   | in        |
//! | `rhythm`    | `[1]`                  | f32   | in (opt)  |
//! | `harmony`   | `[1]`                  | f32   | in (opt)  |
//! | `sync`      | `[1]`                  | f32   | in (opt)  |
//! | first out   | `[1, 2, window]`       | f32   | out       |
//!
//! Names are matched case-insensitively; when an export uses other names the
//! first two inputs are taken positionally as primary and sidechain. The
//! output may have any shape as long as it holds `2 * window` elements in
//! channel-major order.

use std::path::PathBuf;

use ndarray::{Array1, Array3};
use ort::session::builder::{GraphOptimizationLevel, SessionBuilder};
use ort::session::{Session, SessionInputValue};
use ort::value::Value;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::buffering::StereoWindow;
use crate::error::{MorpherError, Result};
use crate::inference::{InferenceRequest, MorphModel};

/// Settings for [`OnnxMorphModel`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OnnxMorphModelConfig {
    pub model_path: PathBuf,
    /// Output frames per inference.
    pub window: usize,
    /// Trailing context frames appended to each input window.
    pub cache: usize,
    /// ONNX Runtime intra-op threads. `None` picks from available cores.
    #[serde(default)]
    pub intra_threads: Option<usize>,
}

/// Morph network loaded into an ONNX Runtime session.
pub struct OnnxMorphModel {
    session: Session,
    config: OnnxMorphModelConfig,
    primary_name: String,
    sidechain_name: String,
    rhythm_name: Option<String>,
    harmony_name: Option<String>,
    sync_name: Option<String>,
}

impl OnnxMorphModel {
    /// Load the network at `config.model_path`.
    ///
    /// # Errors
    /// `MorpherError::ModelNotFound` if the file is missing, or
    /// `MorpherError::OnnxSession` if ONNX Runtime rejects it.
    pub fn new(config: OnnxMorphModelConfig) -> Result<Self> {
        let path = config.model_path.clone();
        if !path.exists() {
            return Err(MorpherError::ModelNotFound { path });
        }

        let intra_threads = config.intra_threads.unwrap_or_else(|| {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(2)
                .clamp(1, 4)
        });

        info!(path = ?path, intra_threads, "loading morph model");

        let session = SessionBuilder::new()
            .map_err(|e| MorpherError::OnnxSession(e.to_string()))?
            .with_intra_threads(intra_threads)
            .map_err(|e| MorpherError::OnnxSession(e.to_string()))?
            .with_optimization_level(GraphOptimizationLevel::All)
            .map_err(|e| MorpherError::OnnxSession(e.to_string()))?
            .commit_from_file(&path)
            .map_err(|e| MorpherError::OnnxSession(e.to_string()))?;

        let input_names: Vec<String> = session
            .inputs()
            .iter()
            .map(|outlet| outlet.name().to_string())
            .collect();
        info!("  inputs: {:?}", input_names);

        let primary_name = resolve_name(&input_names, &["primary", "source", "input", "x"])
            .or_else(|| input_names.first().cloned())
            .ok_or_else(|| MorpherError::OnnxSession("morph model has no inputs".into()))?;
        let sidechain_name = resolve_name(&input_names, &["sidechain", "target", "condition"])
            .or_else(|| {
                input_names
                    .iter()
                    .find(|name| **name != primary_name)
                    .cloned()
            })
            .ok_or_else(|| {
                MorpherError::OnnxSession("morph model needs a sidechain input".into())
            })?;

        let rhythm_name = resolve_name(&input_names, &["rhythm"]);
        let harmony_name = resolve_name(&input_names, &["harmony"]);
        let sync_name = resolve_name(&input_names, &["sync", "link"]);

        Ok(Self {
            session,
            config,
            primary_name,
            sidechain_name,
            rhythm_name,
            harmony_name,
            sync_name,
        })
    }

    /// `[1, 2, len]` tensor with the left channel first.
    fn channel_major(window: &StereoWindow) -> Result<Array3<f32>> {
        let len = window.len();
        let mut data = Vec::with_capacity(2 * len);
        data.extend_from_slice(&window.left[..len]);
        data.extend_from_slice(&window.right[..len]);
        Array3::<f32>::from_shape_vec((1, 2, len), data)
            .map_err(|e| MorpherError::OnnxSession(e.to_string()))
    }

    fn run(&mut self, request: &InferenceRequest) -> Result<StereoWindow> {
        let primary_val = Value::from_array(Self::channel_major(&request.primary)?)
            .map_err(|e: ort::Error| MorpherError::OnnxSession(e.to_string()))?;
        let sidechain_val = Value::from_array(Self::channel_major(&request.sidechain)?)
            .map_err(|e: ort::Error| MorpherError::OnnxSession(e.to_string()))?;

        let mut input_values: Vec<(String, SessionInputValue<'_>)> = vec![
            (self.primary_name.clone(), primary_val.into()),
            (self.sidechain_name.clone(), sidechain_val.into()),
        ];

        for (name, value) in [
            (&self.rhythm_name, request.rhythm),
            (&self.harmony_name, request.harmony),
            (&self.sync_name, request.sync),
        ] {
            if let Some(name) = name {
                let scalar = Value::from_array(Array1::<f32>::from_elem(1, value))
                    .map_err(|e: ort::Error| MorpherError::OnnxSession(e.to_string()))?;
                input_values.push((name.clone(), scalar.into()));
            }
        }

        let outputs = self
            .session
            .run(input_values)
            .map_err(|e| MorpherError::OnnxSession(e.to_string()))?;

        let (_, data) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| MorpherError::OnnxSession(e.to_string()))?;

        let window = self.config.window;
        if data.len() != 2 * window {
            return Err(MorpherError::Inference(format!(
                "model produced {} samples, expected {}",
                data.len(),
                2 * window
            )));
        }

        Ok(StereoWindow::from_channels(
            data[..window].to_vec(),
            data[window..].to_vec(),
        ))
    }
}

fn resolve_name(candidates: &[String], preferred: &[&str]) -> Option<String> {
    preferred.iter().find_map(|needle| {
        candidates
            .iter()
            .find(|name| name.eq_ignore_ascii_case(needle))
            .cloned()
    })
}

impl MorphModel for OnnxMorphModel {
    fn name(&self) -> &str {
        "onnx"
    }

    fn warm_up(&mut self) -> Result<()> {
        let dummy = InferenceRequest::with_input_len(self.config.window + self.config.cache);
        let out = self.run(&dummy)?;
        debug!(frames = out.len(), "onnx warm-up pass complete");
        Ok(())
    }

    fn infer(&mut self, request: &InferenceRequest) -> Result<StereoWindow> {
        self.run(request)
    }

    fn reset(&mut self) {
        debug!("OnnxMorphModel::reset: stateless");
    }
}
