use std::str::FromStr;

use rusqlite::{params, Connection};
use uuid::Uuid;

use super::{parse_timestamp, parse_uuid};
use crate::db::DatabaseError;
use crate::models::{AiInferenceResult, RiskLevel};

pub fn insert_result(conn: &Connection, result: &AiInferenceResult) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO ai_inference_results (id, test_id, model_name, risk_score, risk_level,
         confidence, heatmap_png, generated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            result.id.to_string(),
            result.test_id.to_string(),
            result.model_name,
            result.risk_score,
            result.risk_level.as_str(),
            result.confidence,
            result.heatmap_png,
            result.generated_at.to_rfc3339(),
        ],
    )?;
    Ok(())
}

pub fn get_result_for_test(
    conn: &Connection,
    test_id: &Uuid,
) -> Result<Option<AiInferenceResult>, DatabaseError> {
    let mut stmt = conn.prepare(
        "SELECT id, test_id, model_name, risk_score, risk_level, confidence, heatmap_png, generated_at
         FROM ai_inference_results WHERE test_id = ?1",
    )?;

    let result = stmt.query_row(params![test_id.to_string()], |row| {
        Ok(ResultRow {
            id: row.get::<_, String>(0)?,
            test_id: row.get::<_, String>(1)?,
            model_name: row.get::<_, String>(2)?,
            risk_score: row.get::<_, f64>(3)?,
            risk_level: row.get::<_, String>(4)?,
            confidence: row.get::<_, f64>(5)?,
            heatmap_png: row.get::<_, Option<Vec<u8>>>(6)?,
            generated_at: row.get::<_, String>(7)?,
        })
    });

    match result {
        Ok(row) => Ok(Some(result_from_row(row)?)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Fill the heatmap column on an existing result. Separate from insertion:
/// the overlay is rendered after the result row is committed, and its
/// failure must not take the result down with it.
pub fn set_heatmap(conn: &Connection, result_id: &Uuid, png: &[u8]) -> Result<bool, DatabaseError> {
    let rows = conn.execute(
        "UPDATE ai_inference_results SET heatmap_png = ?2 WHERE id = ?1",
        params![result_id.to_string(), png],
    )?;
    Ok(rows == 1)
}

struct ResultRow {
    id: String,
    test_id: String,
    model_name: String,
    risk_score: f64,
    risk_level: String,
    confidence: f64,
    heatmap_png: Option<Vec<u8>>,
    generated_at: String,
}

fn result_from_row(row: ResultRow) -> Result<AiInferenceResult, DatabaseError> {
    Ok(AiInferenceResult {
        id: parse_uuid("ai_inference_results.id", &row.id)?,
        test_id: parse_uuid("ai_inference_results.test_id", &row.test_id)?,
        model_name: row.model_name,
        risk_score: row.risk_score as f32,
        risk_level: RiskLevel::from_str(&row.risk_level)?,
        confidence: row.confidence as f32,
        heatmap_png: row.heatmap_png,
        generated_at: parse_timestamp("ai_inference_results.generated_at", &row.generated_at)?,
    })
}
