use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::enums::RiskLevel;

/// Persisted output of one AI run. Exactly one per test; immutable once
/// written except for the heatmap, which is filled in by the explainability
/// step after the row exists.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AiInferenceResult {
    pub id: Uuid,
    pub test_id: Uuid,
    pub model_name: String,
    /// Model risk score in [0,1].
    pub risk_score: f32,
    pub risk_level: RiskLevel,
    /// Softmax probability of the predicted class, in [0,1].
    pub confidence: f32,
    /// PNG-encoded class-activation overlay, when the backend produces one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub heatmap_png: Option<Vec<u8>>,
    pub generated_at: DateTime<Utc>,
}

impl AiInferenceResult {
    pub fn new(
        test_id: Uuid,
        model_name: String,
        risk_score: f32,
        risk_level: RiskLevel,
        confidence: f32,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            test_id,
            model_name,
            risk_score,
            risk_level,
            confidence,
            heatmap_png: None,
            generated_at: Utc::now(),
        }
    }
}
