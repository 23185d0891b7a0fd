//! Gradient-weighted class activation mapping.
//!
//! The capture step returns an explicit `CamCapture` value holding the
//! forward activations and the gradients of the chosen class logit with
//! respect to them. All state is threaded through this object; nothing is
//! parked on the model between calls, so a shared model cache can serve
//! concurrent requests without cross-contaminating their heatmaps.

use ndarray::{s, Array2, Array4};
use thiserror::Error;

use super::preprocess::NORM_EPSILON;

#[derive(Error, Debug)]
pub enum ExplainError {
    #[error("No activations captured from the target layer")]
    ActivationNotCaptured,

    #[error("Activation/gradient shape mismatch: {activations:?} vs {gradients:?}")]
    ShapeMismatch {
        activations: Vec<usize>,
        gradients: Vec<usize>,
    },

    #[error("Forward pass failed during capture: {0}")]
    Forward(String),

    #[error("Overlay encoding failed: {0}")]
    Encode(String),
}

/// Captured tensors for one explanation: target-layer activations and the
/// gradients of the target class logit w.r.t. them, both NCHW with N=1.
#[derive(Debug, Clone)]
pub struct CamCapture {
    activations: Array4<f32>,
    gradients: Array4<f32>,
}

impl CamCapture {
    pub fn new(activations: Array4<f32>, gradients: Array4<f32>) -> Result<Self, ExplainError> {
        let (batch, channels, height, width) = activations.dim();
        if batch == 0 || channels == 0 || height == 0 || width == 0 {
            return Err(ExplainError::ActivationNotCaptured);
        }
        if activations.dim() != gradients.dim() {
            return Err(ExplainError::ShapeMismatch {
                activations: activations.shape().to_vec(),
                gradients: gradients.shape().to_vec(),
            });
        }
        Ok(Self {
            activations,
            gradients,
        })
    }

    /// Spatial shape `(height, width)` of the captured layer.
    pub fn spatial_dim(&self) -> (usize, usize) {
        let (_, _, height, width) = self.activations.dim();
        (height, width)
    }

    /// Compute the class activation map, normalized to [0,1].
    ///
    /// Per-channel importance is the spatial mean of the gradient; the map is
    /// the importance-weighted sum of activation channels with negative
    /// contributions floored at zero, then min-max scaled (epsilon-guarded).
    pub fn class_activation_map(&self) -> Array2<f32> {
        let (_, channels, height, width) = self.activations.dim();
        let mut cam = Array2::<f32>::zeros((height, width));

        for channel in 0..channels {
            let gradient = self.gradients.slice(s![0, channel, .., ..]);
            let weight = gradient.mean().unwrap_or(0.0);
            let activation = self.activations.slice(s![0, channel, .., ..]);
            cam.scaled_add(weight, &activation);
        }

        cam.mapv_inplace(|v| v.max(0.0));

        let min = cam.iter().copied().fold(f32::INFINITY, f32::min);
        cam.mapv_inplace(|v| v - min);
        let max = cam.iter().copied().fold(f32::NEG_INFINITY, f32::max);
        cam.mapv_inplace(|v| v / (max + NORM_EPSILON));
        cam
    }
}
