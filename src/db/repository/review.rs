use std::str::FromStr;

use rusqlite::{params, Connection};
use uuid::Uuid;

use super::{parse_timestamp, parse_uuid};
use crate::db::DatabaseError;
use crate::models::{DoctorReview, ReviewDecision};

pub fn insert_review(conn: &Connection, review: &DoctorReview) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO doctor_reviews (id, referral_id, doctor_id, decision, notes, reviewed_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            review.id.to_string(),
            review.referral_id.to_string(),
            review.doctor_id.to_string(),
            review.decision.as_str(),
            review.notes,
            review.reviewed_at.to_rfc3339(),
        ],
    )?;
    Ok(())
}

pub fn get_review_for_referral(
    conn: &Connection,
    referral_id: &Uuid,
) -> Result<Option<DoctorReview>, DatabaseError> {
    let mut stmt = conn.prepare(
        "SELECT id, referral_id, doctor_id, decision, notes, reviewed_at
         FROM doctor_reviews WHERE referral_id = ?1",
    )?;

    let result = stmt.query_row(params![referral_id.to_string()], |row| {
        Ok(ReviewRow {
            id: row.get::<_, String>(0)?,
            referral_id: row.get::<_, String>(1)?,
            doctor_id: row.get::<_, String>(2)?,
            decision: row.get::<_, String>(3)?,
            notes: row.get::<_, String>(4)?,
            reviewed_at: row.get::<_, String>(5)?,
        })
    });

    match result {
        Ok(row) => Ok(Some(review_from_row(row)?)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

struct ReviewRow {
    id: String,
    referral_id: String,
    doctor_id: String,
    decision: String,
    notes: String,
    reviewed_at: String,
}

fn review_from_row(row: ReviewRow) -> Result<DoctorReview, DatabaseError> {
    Ok(DoctorReview {
        id: parse_uuid("doctor_reviews.id", &row.id)?,
        referral_id: parse_uuid("doctor_reviews.referral_id", &row.referral_id)?,
        doctor_id: parse_uuid("doctor_reviews.doctor_id", &row.doctor_id)?,
        decision: ReviewDecision::from_str(&row.decision)?,
        notes: row.notes,
        reviewed_at: parse_timestamp("doctor_reviews.reviewed_at", &row.reviewed_at)?,
    })
}
