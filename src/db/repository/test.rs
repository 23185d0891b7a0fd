use std::str::FromStr;

use rusqlite::{params, Connection};
use uuid::Uuid;

use super::{parse_opt_uuid, parse_timestamp, parse_uuid};
use crate::db::DatabaseError;
use crate::models::{DiagnosticTest, TestStatus, TestType};

pub fn insert_test(conn: &Connection, test: &DiagnosticTest) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO diagnostic_tests (id, patient_id, practitioner_id, test_type, status,
         raw_image, image_filename, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            test.id.to_string(),
            test.patient_id.to_string(),
            test.practitioner_id.map(|id| id.to_string()),
            test.test_type.as_str(),
            test.status.as_str(),
            test.raw_image,
            test.image_filename,
            test.created_at.to_rfc3339(),
        ],
    )?;
    Ok(())
}

pub fn get_test(conn: &Connection, id: &Uuid) -> Result<Option<DiagnosticTest>, DatabaseError> {
    let mut stmt = conn.prepare(
        "SELECT id, patient_id, practitioner_id, test_type, status,
         raw_image, image_filename, created_at
         FROM diagnostic_tests WHERE id = ?1",
    )?;

    let result = stmt.query_row(params![id.to_string()], |row| {
        Ok(TestRow {
            id: row.get::<_, String>(0)?,
            patient_id: row.get::<_, String>(1)?,
            practitioner_id: row.get::<_, Option<String>>(2)?,
            test_type: row.get::<_, String>(3)?,
            status: row.get::<_, String>(4)?,
            raw_image: row.get::<_, Option<Vec<u8>>>(5)?,
            image_filename: row.get::<_, Option<String>>(6)?,
            created_at: row.get::<_, String>(7)?,
        })
    });

    match result {
        Ok(row) => Ok(Some(test_from_row(row)?)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Attach (or replace) the raw image on a test. Returns false when the test
/// does not exist.
pub fn attach_image(
    conn: &Connection,
    id: &Uuid,
    image: &[u8],
    filename: &str,
) -> Result<bool, DatabaseError> {
    let rows = conn.execute(
        "UPDATE diagnostic_tests SET raw_image = ?2, image_filename = ?3 WHERE id = ?1",
        params![id.to_string(), image, filename],
    )?;
    Ok(rows == 1)
}

/// Compare-and-swap status update. The WHERE clause carries the expected
/// current status; a zero-row outcome means another writer got there first
/// (or the test is gone) and the caller must treat the transition as lost.
pub fn update_test_status(
    conn: &Connection,
    id: &Uuid,
    from: TestStatus,
    to: TestStatus,
) -> Result<bool, DatabaseError> {
    let rows = conn.execute(
        "UPDATE diagnostic_tests SET status = ?3 WHERE id = ?1 AND status = ?2",
        params![id.to_string(), from.as_str(), to.as_str()],
    )?;
    Ok(rows == 1)
}

struct TestRow {
    id: String,
    patient_id: String,
    practitioner_id: Option<String>,
    test_type: String,
    status: String,
    raw_image: Option<Vec<u8>>,
    image_filename: Option<String>,
    created_at: String,
}

fn test_from_row(row: TestRow) -> Result<DiagnosticTest, DatabaseError> {
    Ok(DiagnosticTest {
        id: parse_uuid("diagnostic_tests.id", &row.id)?,
        patient_id: parse_uuid("diagnostic_tests.patient_id", &row.patient_id)?,
        practitioner_id: parse_opt_uuid("diagnostic_tests.practitioner_id", row.practitioner_id)?,
        test_type: TestType::from_str(&row.test_type)?,
        status: TestStatus::from_str(&row.status)?,
        raw_image: row.raw_image,
        image_filename: row.image_filename,
        created_at: parse_timestamp("diagnostic_tests.created_at", &row.created_at)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::open_memory_database;

    #[test]
    fn insert_and_get_round_trip() {
        let conn = open_memory_database().unwrap();
        let test = DiagnosticTest::new(Uuid::new_v4(), None, TestType::Tb);
        insert_test(&conn, &test).unwrap();

        let loaded = get_test(&conn, &test.id).unwrap().unwrap();
        assert_eq!(loaded.id, test.id);
        assert_eq!(loaded.test_type, TestType::Tb);
        assert_eq!(loaded.status, TestStatus::Uploaded);
        assert!(loaded.raw_image.is_none());
    }

    #[test]
    fn get_missing_returns_none() {
        let conn = open_memory_database().unwrap();
        assert!(get_test(&conn, &Uuid::new_v4()).unwrap().is_none());
    }

    #[test]
    fn attach_image_stores_blob_and_hint() {
        let conn = open_memory_database().unwrap();
        let test = DiagnosticTest::new(Uuid::new_v4(), None, TestType::BreastCancer);
        insert_test(&conn, &test).unwrap();

        assert!(attach_image(&conn, &test.id, &[1, 2, 3], "scan.png").unwrap());
        let loaded = get_test(&conn, &test.id).unwrap().unwrap();
        assert_eq!(loaded.raw_image.as_deref(), Some(&[1u8, 2, 3][..]));
        assert_eq!(loaded.image_filename.as_deref(), Some("scan.png"));
    }

    #[test]
    fn status_cas_rejects_stale_expectation() {
        let conn = open_memory_database().unwrap();
        let test = DiagnosticTest::new(Uuid::new_v4(), None, TestType::Tb);
        insert_test(&conn, &test).unwrap();

        assert!(update_test_status(&conn, &test.id, TestStatus::Uploaded, TestStatus::AiDone).unwrap());
        // Second writer expecting UPLOADED loses.
        assert!(!update_test_status(&conn, &test.id, TestStatus::Uploaded, TestStatus::AiDone).unwrap());
        let loaded = get_test(&conn, &test.id).unwrap().unwrap();
        assert_eq!(loaded.status, TestStatus::AiDone);
    }
}
