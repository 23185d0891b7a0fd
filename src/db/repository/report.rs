use std::str::FromStr;

use rusqlite::{params, Connection};
use uuid::Uuid;

use super::{parse_timestamp, parse_uuid};
use crate::db::DatabaseError;
use crate::models::{DiagnosticReport, RiskLevel};

pub fn insert_report(conn: &Connection, report: &DiagnosticReport) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO diagnostic_reports (id, test_id, report_pdf, final_risk_level,
         doctor_signed, generated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            report.id.to_string(),
            report.test_id.to_string(),
            report.report_pdf,
            report.final_risk_level.as_str(),
            report.doctor_signed as i32,
            report.generated_at.to_rfc3339(),
        ],
    )?;
    Ok(())
}

pub fn get_report_for_test(
    conn: &Connection,
    test_id: &Uuid,
) -> Result<Option<DiagnosticReport>, DatabaseError> {
    let mut stmt = conn.prepare(
        "SELECT id, test_id, report_pdf, final_risk_level, doctor_signed, generated_at
         FROM diagnostic_reports WHERE test_id = ?1",
    )?;

    let result = stmt.query_row(params![test_id.to_string()], |row| {
        Ok(ReportRow {
            id: row.get::<_, String>(0)?,
            test_id: row.get::<_, String>(1)?,
            report_pdf: row.get::<_, Vec<u8>>(2)?,
            final_risk_level: row.get::<_, String>(3)?,
            doctor_signed: row.get::<_, i32>(4)?,
            generated_at: row.get::<_, String>(5)?,
        })
    });

    match result {
        Ok(row) => Ok(Some(report_from_row(row)?)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

struct ReportRow {
    id: String,
    test_id: String,
    report_pdf: Vec<u8>,
    final_risk_level: String,
    doctor_signed: i32,
    generated_at: String,
}

fn report_from_row(row: ReportRow) -> Result<DiagnosticReport, DatabaseError> {
    Ok(DiagnosticReport {
        id: parse_uuid("diagnostic_reports.id", &row.id)?,
        test_id: parse_uuid("diagnostic_reports.test_id", &row.test_id)?,
        report_pdf: row.report_pdf,
        final_risk_level: RiskLevel::from_str(&row.final_risk_level)?,
        doctor_signed: row.doctor_signed != 0,
        generated_at: parse_timestamp("diagnostic_reports.generated_at", &row.generated_at)?,
    })
}
