//! Lifecycle operations over the diagnostic workflow.
//!
//! Test path: UPLOADED -> AI_DONE -> REFERRED -> CLOSED.
//! Referral path: PENDING -> REVIEWED -> CLOSED.
//!
//! Every operation runs synchronously against one connection. Guards are
//! checked up front, but the database has the final word: unique indexes
//! arbitrate once-per-test creation and compare-and-swap status updates
//! arbitrate concurrent transitions. The loser gets `InvalidTransition`,
//! never a silent overwrite.

pub mod referral_lifecycle;
pub mod test_lifecycle;

pub use referral_lifecycle::*;
pub use test_lifecycle::*;

use thiserror::Error;
use uuid::Uuid;

use crate::db::DatabaseError;
use crate::pipeline::backend::InferenceError;
use crate::pipeline::preprocess::PreprocessError;
use crate::pipeline::risk::RiskMapError;
use crate::report::ReportError;

#[derive(Error, Debug)]
pub enum WorkflowError {
    #[error("Invalid transition for {entity} ({event} from {from}): {reason}")]
    InvalidTransition {
        entity: &'static str,
        from: String,
        event: &'static str,
        reason: &'static str,
    },

    #[error("Duplicate {entity}: one already exists for this case")]
    DuplicateResult { entity: &'static str },

    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: Uuid },

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Preprocessing error: {0}")]
    Preprocess(#[from] PreprocessError),

    #[error("Inference error: {0}")]
    Inference(#[from] InferenceError),

    #[error("Risk mapping error: {0}")]
    Risk(#[from] RiskMapError),

    #[error("Report error: {0}")]
    Report(#[from] ReportError),
}

impl WorkflowError {
    pub(crate) fn invalid(
        entity: &'static str,
        from: impl Into<String>,
        event: &'static str,
        reason: &'static str,
    ) -> Self {
        Self::InvalidTransition {
            entity,
            from: from.into(),
            event,
            reason,
        }
    }

    /// Map a repository error onto the duplicate-entity variant when it is a
    /// uniqueness violation, passing everything else through.
    pub(crate) fn on_insert(entity: &'static str, err: DatabaseError) -> Self {
        if err.is_unique_violation() {
            Self::DuplicateResult { entity }
        } else {
            Self::Database(err)
        }
    }
}
