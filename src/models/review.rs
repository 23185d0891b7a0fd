use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::enums::ReviewDecision;

/// A doctor's verdict on a referral. One per referral; immutable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DoctorReview {
    pub id: Uuid,
    pub referral_id: Uuid,
    pub doctor_id: Uuid,
    pub decision: ReviewDecision,
    pub notes: String,
    pub reviewed_at: DateTime<Utc>,
}

impl DoctorReview {
    pub fn new(referral_id: Uuid, doctor_id: Uuid, decision: ReviewDecision, notes: String) -> Self {
        Self {
            id: Uuid::new_v4(),
            referral_id,
            doctor_id,
            decision,
            notes,
            reviewed_at: Utc::now(),
        }
    }
}
