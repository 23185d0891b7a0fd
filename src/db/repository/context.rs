use rusqlite::{params, Connection};
use uuid::Uuid;

use super::{parse_json, parse_opt_uuid, parse_timestamp, parse_uuid};
use crate::db::DatabaseError;
use crate::models::ClinicalContext;

pub fn insert_context(conn: &Connection, ctx: &ClinicalContext) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO clinical_contexts (id, test_id, symptoms, vitals, history_snapshot,
         entered_by, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            ctx.id.to_string(),
            ctx.test_id.to_string(),
            ctx.symptoms.to_string(),
            ctx.vitals.as_ref().map(|v| v.to_string()),
            ctx.history_snapshot.to_string(),
            ctx.entered_by.map(|id| id.to_string()),
            ctx.created_at.to_rfc3339(),
        ],
    )?;
    Ok(())
}

pub fn get_context_for_test(
    conn: &Connection,
    test_id: &Uuid,
) -> Result<Option<ClinicalContext>, DatabaseError> {
    let mut stmt = conn.prepare(
        "SELECT id, test_id, symptoms, vitals, history_snapshot, entered_by, created_at
         FROM clinical_contexts WHERE test_id = ?1",
    )?;

    let result = stmt.query_row(params![test_id.to_string()], |row| {
        Ok(ContextRow {
            id: row.get::<_, String>(0)?,
            test_id: row.get::<_, String>(1)?,
            symptoms: row.get::<_, String>(2)?,
            vitals: row.get::<_, Option<String>>(3)?,
            history_snapshot: row.get::<_, String>(4)?,
            entered_by: row.get::<_, Option<String>>(5)?,
            created_at: row.get::<_, String>(6)?,
        })
    });

    match result {
        Ok(row) => Ok(Some(context_from_row(row)?)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

struct ContextRow {
    id: String,
    test_id: String,
    symptoms: String,
    vitals: Option<String>,
    history_snapshot: String,
    entered_by: Option<String>,
    created_at: String,
}

fn context_from_row(row: ContextRow) -> Result<ClinicalContext, DatabaseError> {
    Ok(ClinicalContext {
        id: parse_uuid("clinical_contexts.id", &row.id)?,
        test_id: parse_uuid("clinical_contexts.test_id", &row.test_id)?,
        symptoms: parse_json("clinical_contexts.symptoms", &row.symptoms)?,
        vitals: row
            .vitals
            .map(|v| parse_json("clinical_contexts.vitals", &v))
            .transpose()?,
        history_snapshot: parse_json("clinical_contexts.history_snapshot", &row.history_snapshot)?,
        entered_by: parse_opt_uuid("clinical_contexts.entered_by", row.entered_by)?,
        created_at: parse_timestamp("clinical_contexts.created_at", &row.created_at)?,
    })
}
