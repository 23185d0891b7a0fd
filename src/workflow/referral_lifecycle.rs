//! Doctor-side operations: review and closure of referrals.

use rusqlite::Connection;
use uuid::Uuid;

use super::WorkflowError;
use crate::db::repository;
use crate::models::{DoctorReview, Referral, ReferralStatus, ReviewDecision, TestStatus};

const ENTITY_REFERRAL: &str = "referral";

#[derive(Debug, Clone)]
pub struct ReviewRequest {
    pub doctor_id: Uuid,
    pub decision: ReviewDecision,
    pub notes: String,
}

/// Record the doctor's verdict and move the referral PENDING -> REVIEWED.
/// One review per referral, enforced by the unique index.
pub fn review(
    conn: &Connection,
    referral_id: &Uuid,
    request: ReviewRequest,
) -> Result<DoctorReview, WorkflowError> {
    let referral = require_referral(conn, referral_id)?;
    if referral.status != ReferralStatus::Pending {
        return Err(WorkflowError::invalid(
            ENTITY_REFERRAL,
            referral.status.as_str(),
            "review",
            "status must be PENDING",
        ));
    }

    let review = DoctorReview::new(
        *referral_id,
        request.doctor_id,
        request.decision,
        request.notes,
    );

    let tx = conn
        .unchecked_transaction()
        .map_err(crate::db::DatabaseError::from)?;
    repository::insert_review(&tx, &review)
        .map_err(|e| WorkflowError::on_insert("doctor_review", e))?;
    if !repository::update_referral_status(
        &tx,
        referral_id,
        ReferralStatus::Pending,
        ReferralStatus::Reviewed,
    )? {
        return Err(WorkflowError::invalid(
            ENTITY_REFERRAL,
            ReferralStatus::Pending.as_str(),
            "review",
            "concurrent status change",
        ));
    }
    tx.commit().map_err(crate::db::DatabaseError::from)?;

    tracing::info!(
        "referral {referral_id} reviewed: {}",
        review.decision
    );
    Ok(review)
}

/// Close a reviewed referral and close the owning test with it. Closing a
/// PENDING referral is not permitted; review comes first.
pub fn close(conn: &Connection, referral_id: &Uuid) -> Result<Referral, WorkflowError> {
    let mut referral = require_referral(conn, referral_id)?;
    if referral.status != ReferralStatus::Reviewed {
        return Err(WorkflowError::invalid(
            ENTITY_REFERRAL,
            referral.status.as_str(),
            "close",
            "status must be REVIEWED",
        ));
    }

    let tx = conn
        .unchecked_transaction()
        .map_err(crate::db::DatabaseError::from)?;
    if !repository::update_referral_status(
        &tx,
        referral_id,
        ReferralStatus::Reviewed,
        ReferralStatus::Closed,
    )? {
        return Err(WorkflowError::invalid(
            ENTITY_REFERRAL,
            ReferralStatus::Reviewed.as_str(),
            "close",
            "concurrent status change",
        ));
    }
    // Closing the referral is what closes the test.
    if !repository::update_test_status(
        &tx,
        &referral.test_id,
        TestStatus::Referred,
        TestStatus::Closed,
    )? {
        return Err(WorkflowError::invalid(
            "diagnostic_test",
            TestStatus::Referred.as_str(),
            "close",
            "concurrent status change",
        ));
    }
    tx.commit().map_err(crate::db::DatabaseError::from)?;

    referral.status = ReferralStatus::Closed;
    tracing::info!("referral {referral_id} closed");
    Ok(referral)
}

fn require_referral(conn: &Connection, referral_id: &Uuid) -> Result<Referral, WorkflowError> {
    repository::get_referral(conn, referral_id)?.ok_or(WorkflowError::NotFound {
        entity: ENTITY_REFERRAL,
        id: *referral_id,
    })
}
