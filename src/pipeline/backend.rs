//! Inference backend contract and the rule-based stub.
//!
//! Backend choice is an explicit configuration decision (`BackendConfig`),
//! never implied by which service function a caller happens to invoke. Both
//! variants speak the same `InferenceOutput` contract, so the lifecycle layer
//! is indifferent to which one is wired in.

#[cfg(feature = "onnx-model")]
use std::path::PathBuf;
use std::sync::Arc;

use ndarray::Array4;
use thiserror::Error;

use super::gradcam::ExplainError;
use super::preprocess::NormalizedImage;
use crate::models::{RiskLevel, TestType};

#[derive(Error, Debug)]
pub enum InferenceError {
    #[error("Model load failed: {0}")]
    ModelLoad(String),

    #[error("Inference failed: {0}")]
    Numerical(String),

    #[error("Backend requires an input image")]
    ImageRequired,
}

/// How a backend's output maps onto the domain's 3-level risk taxonomy.
///
/// Backends either name the level outright or ship a class-index table.
/// There is deliberately no score-threshold fallback: any threshold policy
/// must arrive versioned with the model that owns it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RiskPolicy {
    Direct(RiskLevel),
    ClassMap(Vec<RiskLevel>),
}

/// Uniform backend output consumed by the lifecycle layer.
#[derive(Debug, Clone)]
pub struct InferenceOutput {
    pub model_name: String,
    /// Risk score in [0,1].
    pub risk_score: f32,
    /// Index of the winning class.
    pub class_index: usize,
    /// Softmax probability of the winning class, in [0,1].
    pub confidence: f32,
    pub risk: RiskPolicy,
    /// Target-layer activation map (NCHW), for backends that expose one.
    pub raw_activations: Option<Array4<f32>>,
}

/// Strategy seam over the available inference engines.
pub trait InferenceBackend: Send + Sync {
    fn name(&self) -> &'static str;

    /// Score one test. Backends that ignore the image accept `None`.
    fn infer(
        &self,
        test_type: TestType,
        image: Option<&NormalizedImage>,
    ) -> Result<InferenceOutput, InferenceError>;

    /// Render a class-activation overlay (PNG bytes) for the given class.
    /// Backends without spatial activations return `Ok(None)`.
    fn explain(
        &self,
        image: &NormalizedImage,
        class_index: usize,
    ) -> Result<Option<Vec<u8>>, ExplainError> {
        let _ = (image, class_index);
        Ok(None)
    }
}

/// Allow `Box<dyn InferenceBackend>` wherever `&impl InferenceBackend` is used.
impl InferenceBackend for Box<dyn InferenceBackend> {
    fn name(&self) -> &'static str {
        (**self).name()
    }

    fn infer(
        &self,
        test_type: TestType,
        image: Option<&NormalizedImage>,
    ) -> Result<InferenceOutput, InferenceError> {
        (**self).infer(test_type, image)
    }

    fn explain(
        &self,
        image: &NormalizedImage,
        class_index: usize,
    ) -> Result<Option<Vec<u8>>, ExplainError> {
        (**self).explain(image, class_index)
    }
}

/// Fixed-score backend used when no trained model is installed.
///
/// Keeps the whole workflow exercisable on machines without the model
/// artifact: TB cases come back flagged, everything else benign.
pub struct RuleStubBackend;

impl InferenceBackend for RuleStubBackend {
    fn name(&self) -> &'static str {
        "RULE_STUB"
    }

    fn infer(
        &self,
        test_type: TestType,
        _image: Option<&NormalizedImage>,
    ) -> Result<InferenceOutput, InferenceError> {
        let (risk_score, confidence, level) = match test_type {
            TestType::Tb => (0.82, 0.91, RiskLevel::High),
            _ => (0.12, 0.95, RiskLevel::Low),
        };
        Ok(InferenceOutput {
            model_name: test_type.as_str().to_string(),
            risk_score,
            class_index: 0,
            confidence,
            risk: RiskPolicy::Direct(level),
            raw_activations: None,
        })
    }
}

/// Which inference engine a deployment runs.
#[derive(Debug, Clone)]
pub enum BackendConfig {
    /// Rule-based stub; no model artifact required.
    RuleStub,
    /// ONNX vision classifier loaded from `model_dir`.
    #[cfg(feature = "onnx-model")]
    Onnx { model_dir: PathBuf },
}

impl BackendConfig {
    /// Resolve the configured backend. ONNX sessions are cached per process;
    /// repeated resolution is cheap.
    pub fn backend(&self) -> Result<Arc<dyn InferenceBackend>, InferenceError> {
        match self {
            BackendConfig::RuleStub => Ok(Arc::new(RuleStubBackend)),
            #[cfg(feature = "onnx-model")]
            BackendConfig::Onnx { model_dir } => {
                Ok(super::vision::cached_onnx_backend(model_dir)?)
            }
        }
    }
}
