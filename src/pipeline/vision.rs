//! Vision-model inference backend.
//!
//! The classifier is split at its explanation target layer: a convolutional
//! backbone (the `FeatureExtractor` seam; ONNX Runtime in production) emits
//! the final activation map, and a pooled linear `ClassifierHead` turns it
//! into class logits. Splitting there keeps one source of truth for the
//! head, so the gradients used for class activation mapping are exactly the
//! gradients of the logits actually served.
//!
//! Model artifact layout (one directory):
//! - `model.onnx`: backbone exported with the target-layer activation as
//!   its single output, NCHW `[1, K, h, w]`
//! - `head.json`: classifier parameters from the training checkpoint
//!   (`classifier.weight` `[C, K]`, `classifier.bias` `[C]`), possibly
//!   prefixed with the training wrapper's `model.` namespace

use std::collections::HashMap;
use std::path::Path;

use ndarray::{s, Array1, Array2, Array4};

use super::backend::{InferenceBackend, InferenceError, InferenceOutput, RiskPolicy};
use super::gradcam::{CamCapture, ExplainError};
use super::overlay;
use super::preprocess::NormalizedImage;
use crate::models::{RiskLevel, TestType};

/// Backbone file name inside the model directory.
pub const MODEL_FILE: &str = "model.onnx";
/// Classifier head checkpoint inside the model directory.
pub const HEAD_FILE: &str = "head.json";

/// Produces the target-layer activation map for a model input tensor.
pub trait FeatureExtractor: Send + Sync {
    /// Run the backbone. Input and output are NCHW with batch size 1.
    fn extract(&self, input: &Array4<f32>) -> Result<Array4<f32>, InferenceError>;
}

// ═══════════════════════════════════════════════════════════
// Classifier head
// ═══════════════════════════════════════════════════════════

/// Global-average-pool + linear classifier over the backbone's activation
/// map. Weight is `[classes, channels]`.
#[derive(Debug, Clone)]
pub struct ClassifierHead {
    weight: Array2<f32>,
    bias: Array1<f32>,
}

impl ClassifierHead {
    pub fn new(weight: Array2<f32>, bias: Array1<f32>) -> Result<Self, InferenceError> {
        let (classes, channels) = weight.dim();
        if classes == 0 || channels == 0 {
            return Err(InferenceError::ModelLoad(
                "classifier weight matrix is empty".into(),
            ));
        }
        if bias.len() != classes {
            return Err(InferenceError::ModelLoad(format!(
                "classifier bias has {} entries for {} classes",
                bias.len(),
                classes
            )));
        }
        Ok(Self { weight, bias })
    }

    /// Load head parameters from a checkpoint file.
    pub fn load(path: &Path) -> Result<Self, InferenceError> {
        let bytes = std::fs::read(path).map_err(|e| {
            InferenceError::ModelLoad(format!("checkpoint read {}: {e}", path.display()))
        })?;
        Self::from_checkpoint_bytes(&bytes)
    }

    /// Parse checkpoint JSON. Checkpoints saved through the training wrapper
    /// namespace every parameter as `model.*`; both spellings are accepted.
    pub fn from_checkpoint_bytes(bytes: &[u8]) -> Result<Self, InferenceError> {
        let raw: HashMap<String, serde_json::Value> = serde_json::from_slice(bytes)
            .map_err(|e| InferenceError::ModelLoad(format!("checkpoint parse: {e}")))?;

        let mut params = HashMap::with_capacity(raw.len());
        for (key, value) in raw {
            let name = key
                .strip_prefix("model.")
                .map(str::to_string)
                .unwrap_or(key);
            params.insert(name, value);
        }

        let weight_rows: Vec<Vec<f32>> = take_param(&mut params, "classifier.weight")?;
        let bias: Vec<f32> = take_param(&mut params, "classifier.bias")?;

        let classes = weight_rows.len();
        let channels = weight_rows.first().map(Vec::len).unwrap_or(0);
        if weight_rows.iter().any(|row| row.len() != channels) {
            return Err(InferenceError::ModelLoad(
                "classifier.weight rows have uneven lengths".into(),
            ));
        }

        let flat: Vec<f32> = weight_rows.into_iter().flatten().collect();
        let weight = Array2::from_shape_vec((classes, channels), flat)
            .map_err(|e| InferenceError::ModelLoad(e.to_string()))?;
        Self::new(weight, Array1::from_vec(bias))
    }

    pub fn num_classes(&self) -> usize {
        self.weight.dim().0
    }

    pub fn feature_dim(&self) -> usize {
        self.weight.dim().1
    }

    /// Logits for a pooled feature vector.
    pub fn forward(&self, pooled: &Array1<f32>) -> Result<Array1<f32>, InferenceError> {
        if pooled.len() != self.feature_dim() {
            return Err(InferenceError::Numerical(format!(
                "backbone produced {} channels, head expects {}",
                pooled.len(),
                self.feature_dim()
            )));
        }
        Ok(self.weight.dot(pooled) + &self.bias)
    }

    /// Gradient of one class logit w.r.t. the activation map.
    ///
    /// For a pool+linear head the derivative at every spatial position of
    /// channel `k` is `weight[class, k] / (h * w)`.
    pub fn logit_gradient(
        &self,
        class: usize,
        (channels, height, width): (usize, usize, usize),
    ) -> Result<Array4<f32>, ExplainError> {
        if class >= self.num_classes() {
            return Err(ExplainError::Forward(format!(
                "target class {class} outside classifier range {}",
                self.num_classes()
            )));
        }
        if channels != self.feature_dim() {
            return Err(ExplainError::Forward(format!(
                "activation has {channels} channels, head expects {}",
                self.feature_dim()
            )));
        }

        let scale = 1.0 / (height * width) as f32;
        let mut gradients = Array4::<f32>::zeros((1, channels, height, width));
        for channel in 0..channels {
            gradients
                .slice_mut(s![0, channel, .., ..])
                .fill(self.weight[[class, channel]] * scale);
        }
        Ok(gradients)
    }
}

fn take_param<T: serde::de::DeserializeOwned>(
    params: &mut HashMap<String, serde_json::Value>,
    name: &str,
) -> Result<T, InferenceError> {
    let value = params
        .remove(name)
        .ok_or_else(|| InferenceError::ModelLoad(format!("checkpoint missing {name}")))?;
    serde_json::from_value(value)
        .map_err(|e| InferenceError::ModelLoad(format!("checkpoint {name}: {e}")))
}

// ═══════════════════════════════════════════════════════════
// Capture — explicit activation/gradient snapshot
// ═══════════════════════════════════════════════════════════

/// Run one forward pass and compute the target-class gradients, returning
/// everything the class activation map needs as a single value. No state
/// survives on the model between calls.
pub fn capture<F: FeatureExtractor + ?Sized>(
    extractor: &F,
    head: &ClassifierHead,
    input: &Array4<f32>,
    target_class: usize,
) -> Result<CamCapture, ExplainError> {
    let activations = extractor
        .extract(input)
        .map_err(|e| ExplainError::Forward(e.to_string()))?;

    let (_, channels, height, width) = activations.dim();
    if channels == 0 || height == 0 || width == 0 {
        return Err(ExplainError::ActivationNotCaptured);
    }

    let gradients = head.logit_gradient(target_class, (channels, height, width))?;
    CamCapture::new(activations, gradients)
}

// ═══════════════════════════════════════════════════════════
// Vision backend
// ═══════════════════════════════════════════════════════════

/// CNN classifier backend: backbone + pooled linear head, with class
/// activation overlays for every prediction.
pub struct VisionBackend<F: FeatureExtractor> {
    extractor: F,
    head: ClassifierHead,
    model_name: String,
    class_labels: Vec<&'static str>,
    class_risk: Vec<RiskLevel>,
}

impl<F: FeatureExtractor> VisionBackend<F> {
    /// Binary breast-cancer classifier: class 0 Benign -> LOW, class 1
    /// Malignant -> HIGH.
    pub fn breast_cancer(extractor: F, head: ClassifierHead) -> Self {
        Self {
            extractor,
            head,
            model_name: "BREAST_CANCER".to_string(),
            class_labels: vec!["Benign", "Malignant"],
            class_risk: vec![RiskLevel::Low, RiskLevel::High],
        }
    }

    pub fn class_label(&self, class_index: usize) -> Option<&'static str> {
        self.class_labels.get(class_index).copied()
    }

    fn forward(&self, image: &NormalizedImage) -> Result<(Array4<f32>, usize, f32), InferenceError> {
        let input = to_model_tensor(image);
        let features = self.extractor.extract(&input)?;

        let (batch, channels, height, width) = features.dim();
        if batch != 1 || channels == 0 || height == 0 || width == 0 {
            return Err(InferenceError::Numerical(format!(
                "backbone produced unusable feature shape [{batch}, {channels}, {height}, {width}]"
            )));
        }

        let mut pooled = Array1::<f32>::zeros(channels);
        let spatial = (height * width) as f32;
        for channel in 0..channels {
            pooled[channel] = self.features_channel_sum(&features, channel) / spatial;
        }

        let logits = self.head.forward(&pooled)?;
        let probabilities = softmax(&logits)?;

        let (class_index, confidence) = probabilities
            .iter()
            .copied()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(&b.1))
            .ok_or_else(|| InferenceError::Numerical("empty probability vector".into()))?;

        Ok((features, class_index, confidence))
    }

    fn features_channel_sum(&self, features: &Array4<f32>, channel: usize) -> f32 {
        features.slice(s![0, channel, .., ..]).sum()
    }
}

impl<F: FeatureExtractor> InferenceBackend for VisionBackend<F> {
    fn name(&self) -> &'static str {
        "VISION"
    }

    fn infer(
        &self,
        _test_type: TestType,
        image: Option<&NormalizedImage>,
    ) -> Result<InferenceOutput, InferenceError> {
        let image = image.ok_or(InferenceError::ImageRequired)?;
        let (features, class_index, confidence) = self.forward(image)?;

        tracing::debug!(
            "vision backend predicted {} ({confidence:.3})",
            self.class_label(class_index).unwrap_or("?")
        );

        Ok(InferenceOutput {
            model_name: self.model_name.clone(),
            risk_score: confidence,
            class_index,
            confidence,
            risk: RiskPolicy::ClassMap(self.class_risk.clone()),
            raw_activations: Some(features),
        })
    }

    fn explain(
        &self,
        image: &NormalizedImage,
        class_index: usize,
    ) -> Result<Option<Vec<u8>>, ExplainError> {
        let input = to_model_tensor(image);
        let snapshot = capture(&self.extractor, &self.head, &input, class_index)?;
        let cam = snapshot.class_activation_map();
        let png = overlay::render(image, &cam)?;
        Ok(Some(png))
    }
}

/// Stack the single grayscale channel to the 3-channel NCHW layout the
/// classifier was trained with.
pub(crate) fn to_model_tensor(image: &NormalizedImage) -> Array4<f32> {
    let (height, width) = image.pixels.dim();
    let mut tensor = Array4::<f32>::zeros((1, 3, height, width));
    for channel in 0..3 {
        tensor
            .slice_mut(s![0, channel, .., ..])
            .assign(&image.pixels);
    }
    tensor
}

fn softmax(logits: &Array1<f32>) -> Result<Vec<f32>, InferenceError> {
    if logits.iter().any(|v| !v.is_finite()) {
        return Err(InferenceError::Numerical(
            "non-finite logits from classifier head".into(),
        ));
    }
    let max = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let exps: Vec<f32> = logits.iter().map(|v| (v - max).exp()).collect();
    let sum: f32 = exps.iter().sum();
    if !sum.is_finite() || sum <= 0.0 {
        return Err(InferenceError::Numerical(
            "softmax denominator collapsed".into(),
        ));
    }
    Ok(exps.into_iter().map(|e| e / sum).collect())
}

// ═══════════════════════════════════════════════════════════
// ONNX backbone — behind `onnx-model` feature
// ═══════════════════════════════════════════════════════════

#[cfg(feature = "onnx-model")]
mod onnx {
    use std::path::Path;
    use std::sync::Mutex;

    use ndarray::Array4;
    use ort::session::Session;

    use super::{FeatureExtractor, InferenceError};

    /// Backbone inference via ONNX Runtime.
    ///
    /// Uses interior mutability (Mutex) because `ort::Session::run` requires
    /// `&mut self` but `FeatureExtractor` exposes `&self` for shared usage
    /// from the process-wide model cache.
    pub struct OnnxFeatureExtractor {
        session: Mutex<Session>,
    }

    impl OnnxFeatureExtractor {
        pub fn load(model_path: &Path) -> Result<Self, InferenceError> {
            if !model_path.exists() {
                return Err(InferenceError::ModelLoad(format!(
                    "model not found: {}",
                    model_path.display()
                )));
            }

            let session = Session::builder()
                .map_err(|e: ort::Error| InferenceError::ModelLoad(e.to_string()))?
                .with_intra_threads(2)
                .map_err(|e: ort::Error| InferenceError::ModelLoad(e.to_string()))?
                .commit_from_file(model_path)
                .map_err(|e: ort::Error| {
                    InferenceError::ModelLoad(format!("ONNX load failed: {e}"))
                })?;

            tracing::info!("ONNX backbone loaded from {}", model_path.display());

            Ok(Self {
                session: Mutex::new(session),
            })
        }
    }

    impl FeatureExtractor for OnnxFeatureExtractor {
        fn extract(&self, input: &Array4<f32>) -> Result<Array4<f32>, InferenceError> {
            use ort::value::TensorRef;

            let tensor = TensorRef::from_array_view(input)
                .map_err(|e| InferenceError::Numerical(e.to_string()))?;

            let mut session = self
                .session
                .lock()
                .map_err(|_| InferenceError::Numerical("Session lock poisoned".to_string()))?;

            let outputs = session
                .run(ort::inputs![tensor])
                .map_err(|e| InferenceError::Numerical(format!("ONNX inference failed: {e}")))?;

            let (shape, data) = outputs[0]
                .try_extract_tensor::<f32>()
                .map_err(|e| InferenceError::Numerical(format!("Output extraction: {e}")))?;

            if shape.len() != 4 || shape[0] != 1 {
                return Err(InferenceError::Numerical(format!(
                    "unexpected feature shape: {shape:?}, expected [1, K, h, w]"
                )));
            }

            let dims = (
                shape[0] as usize,
                shape[1] as usize,
                shape[2] as usize,
                shape[3] as usize,
            );
            Array4::from_shape_vec(dims, data.to_vec())
                .map_err(|e| InferenceError::Numerical(e.to_string()))
        }
    }
}

#[cfg(feature = "onnx-model")]
pub use onnx::OnnxFeatureExtractor;

/// Resolve (and memoize) the ONNX vision backend for a model directory.
///
/// The session and head are loaded once per process and shared read-only
/// across requests; only the per-call capture state is request-local.
#[cfg(feature = "onnx-model")]
pub fn cached_onnx_backend(
    model_dir: &Path,
) -> Result<std::sync::Arc<VisionBackend<OnnxFeatureExtractor>>, InferenceError> {
    use std::path::PathBuf;
    use std::sync::{Arc, Mutex, OnceLock};

    type Cache = Mutex<HashMap<PathBuf, Arc<VisionBackend<OnnxFeatureExtractor>>>>;
    static CACHE: OnceLock<Cache> = OnceLock::new();

    let cache = CACHE.get_or_init(|| Mutex::new(HashMap::new()));
    let mut loaded = cache
        .lock()
        .map_err(|_| InferenceError::ModelLoad("model cache lock poisoned".into()))?;

    if let Some(backend) = loaded.get(model_dir) {
        return Ok(backend.clone());
    }

    let extractor = OnnxFeatureExtractor::load(&model_dir.join(MODEL_FILE))?;
    let head = ClassifierHead::load(&model_dir.join(HEAD_FILE))?;
    let backend = Arc::new(VisionBackend::breast_cancer(extractor, head));
    loaded.insert(model_dir.to_path_buf(), backend.clone());
    Ok(backend)
}
