use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Clinical context entered alongside a test: symptoms, vitals and a
/// snapshot of the patient's history at entry time. Optional step between
/// upload and the AI run; at most one per test.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClinicalContext {
    pub id: Uuid,
    pub test_id: Uuid,
    pub symptoms: serde_json::Value,
    pub vitals: Option<serde_json::Value>,
    pub history_snapshot: serde_json::Value,
    pub entered_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

impl ClinicalContext {
    pub fn new(
        test_id: Uuid,
        symptoms: serde_json::Value,
        vitals: Option<serde_json::Value>,
        entered_by: Option<Uuid>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            test_id,
            symptoms,
            vitals,
            history_snapshot: serde_json::Value::Object(Default::default()),
            entered_by,
            created_at: Utc::now(),
        }
    }
}
