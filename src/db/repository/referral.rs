use std::str::FromStr;

use rusqlite::{params, Connection};
use uuid::Uuid;

use super::{parse_opt_uuid, parse_timestamp, parse_uuid};
use crate::db::DatabaseError;
use crate::models::{Referral, ReferralStatus, Urgency};

pub fn insert_referral(conn: &Connection, referral: &Referral) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO referrals (id, test_id, referred_by, referred_to, urgency, reason,
         status, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            referral.id.to_string(),
            referral.test_id.to_string(),
            referral.referred_by.map(|id| id.to_string()),
            referral.referred_to.map(|id| id.to_string()),
            referral.urgency.as_str(),
            referral.reason,
            referral.status.as_str(),
            referral.created_at.to_rfc3339(),
        ],
    )?;
    Ok(())
}

pub fn get_referral(conn: &Connection, id: &Uuid) -> Result<Option<Referral>, DatabaseError> {
    query_one(conn, "id = ?1", &id.to_string())
}

pub fn get_referral_for_test(
    conn: &Connection,
    test_id: &Uuid,
) -> Result<Option<Referral>, DatabaseError> {
    query_one(conn, "test_id = ?1", &test_id.to_string())
}

/// Pending worklist for a doctor, oldest first.
pub fn list_pending_for_doctor(
    conn: &Connection,
    doctor_id: &Uuid,
) -> Result<Vec<Referral>, DatabaseError> {
    let mut stmt = conn.prepare(
        "SELECT id, test_id, referred_by, referred_to, urgency, reason, status, created_at
         FROM referrals WHERE referred_to = ?1 AND status = ?2 ORDER BY created_at",
    )?;

    let rows = stmt.query_map(
        params![doctor_id.to_string(), ReferralStatus::Pending.as_str()],
        row_mapper,
    )?;

    let mut referrals = Vec::new();
    for row in rows {
        referrals.push(referral_from_row(row?)?);
    }
    Ok(referrals)
}

/// Compare-and-swap status update; false means the expected status no longer
/// holds and the transition was lost.
pub fn update_referral_status(
    conn: &Connection,
    id: &Uuid,
    from: ReferralStatus,
    to: ReferralStatus,
) -> Result<bool, DatabaseError> {
    let rows = conn.execute(
        "UPDATE referrals SET status = ?3 WHERE id = ?1 AND status = ?2",
        params![id.to_string(), from.as_str(), to.as_str()],
    )?;
    Ok(rows == 1)
}

fn query_one(
    conn: &Connection,
    predicate: &str,
    value: &str,
) -> Result<Option<Referral>, DatabaseError> {
    let sql = format!(
        "SELECT id, test_id, referred_by, referred_to, urgency, reason, status, created_at
         FROM referrals WHERE {predicate}"
    );
    let mut stmt = conn.prepare(&sql)?;

    let result = stmt.query_row(params![value], row_mapper);

    match result {
        Ok(row) => Ok(Some(referral_from_row(row)?)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

fn row_mapper(row: &rusqlite::Row<'_>) -> rusqlite::Result<ReferralRow> {
    Ok(ReferralRow {
        id: row.get::<_, String>(0)?,
        test_id: row.get::<_, String>(1)?,
        referred_by: row.get::<_, Option<String>>(2)?,
        referred_to: row.get::<_, Option<String>>(3)?,
        urgency: row.get::<_, String>(4)?,
        reason: row.get::<_, String>(5)?,
        status: row.get::<_, String>(6)?,
        created_at: row.get::<_, String>(7)?,
    })
}

struct ReferralRow {
    id: String,
    test_id: String,
    referred_by: Option<String>,
    referred_to: Option<String>,
    urgency: String,
    reason: String,
    status: String,
    created_at: String,
}

fn referral_from_row(row: ReferralRow) -> Result<Referral, DatabaseError> {
    Ok(Referral {
        id: parse_uuid("referrals.id", &row.id)?,
        test_id: parse_uuid("referrals.test_id", &row.test_id)?,
        referred_by: parse_opt_uuid("referrals.referred_by", row.referred_by)?,
        referred_to: parse_opt_uuid("referrals.referred_to", row.referred_to)?,
        urgency: Urgency::from_str(&row.urgency)?,
        reason: row.reason,
        status: ReferralStatus::from_str(&row.status)?,
        created_at: parse_timestamp("referrals.created_at", &row.created_at)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::open_memory_database;
    use crate::db::repository::insert_test;
    use crate::models::{DiagnosticTest, TestType};

    #[test]
    fn one_referral_per_test_enforced() {
        let conn = open_memory_database().unwrap();
        let test = DiagnosticTest::new(Uuid::new_v4(), None, TestType::Tb);
        insert_test(&conn, &test).unwrap();

        let first = Referral::new(test.id, None, None, Urgency::High, "AI flagged".into());
        insert_referral(&conn, &first).unwrap();

        let second = Referral::new(test.id, None, None, Urgency::Routine, "again".into());
        let err = insert_referral(&conn, &second).unwrap_err();
        assert!(err.is_unique_violation());
    }

    #[test]
    fn pending_worklist_filters_by_doctor_and_status() {
        let conn = open_memory_database().unwrap();
        let doctor = Uuid::new_v4();

        let test_a = DiagnosticTest::new(Uuid::new_v4(), None, TestType::Tb);
        insert_test(&conn, &test_a).unwrap();
        let for_doctor =
            Referral::new(test_a.id, None, Some(doctor), Urgency::High, "case a".into());
        insert_referral(&conn, &for_doctor).unwrap();

        let test_b = DiagnosticTest::new(Uuid::new_v4(), None, TestType::Tb);
        insert_test(&conn, &test_b).unwrap();
        let other =
            Referral::new(test_b.id, None, Some(Uuid::new_v4()), Urgency::Routine, "case b".into());
        insert_referral(&conn, &other).unwrap();

        let pending = list_pending_for_doctor(&conn, &doctor).unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, for_doctor.id);

        // Reviewed referrals drop off the worklist.
        assert!(update_referral_status(
            &conn,
            &for_doctor.id,
            ReferralStatus::Pending,
            ReferralStatus::Reviewed
        )
        .unwrap());
        assert!(list_pending_for_doctor(&conn, &doctor).unwrap().is_empty());
    }
}
