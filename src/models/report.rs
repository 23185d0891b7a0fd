use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::enums::RiskLevel;

/// A generated case report (PDF bytes from the report collaborator).
/// One per test.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiagnosticReport {
    pub id: Uuid,
    pub test_id: Uuid,
    #[serde(skip)]
    pub report_pdf: Vec<u8>,
    pub final_risk_level: RiskLevel,
    pub doctor_signed: bool,
    pub generated_at: DateTime<Utc>,
}

impl DiagnosticReport {
    pub fn new(test_id: Uuid, report_pdf: Vec<u8>, final_risk_level: RiskLevel) -> Self {
        Self {
            id: Uuid::new_v4(),
            test_id,
            report_pdf,
            final_risk_level,
            doctor_signed: false,
            generated_at: Utc::now(),
        }
    }
}
