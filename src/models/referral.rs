use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::enums::{ReferralStatus, Urgency};

/// A practitioner's request for a doctor to review an AI-flagged case.
/// One per test; terminal at CLOSED.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Referral {
    pub id: Uuid,
    pub test_id: Uuid,
    pub referred_by: Option<Uuid>,
    pub referred_to: Option<Uuid>,
    pub urgency: Urgency,
    pub reason: String,
    pub status: ReferralStatus,
    pub created_at: DateTime<Utc>,
}

impl Referral {
    pub fn new(
        test_id: Uuid,
        referred_by: Option<Uuid>,
        referred_to: Option<Uuid>,
        urgency: Urgency,
        reason: String,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            test_id,
            referred_by,
            referred_to,
            urgency,
            reason,
            status: ReferralStatus::Pending,
            created_at: Utc::now(),
        }
    }
}
