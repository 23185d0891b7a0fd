//! Practitioner-side operations: create, upload, context entry, AI run,
//! referral, report generation.

use rusqlite::Connection;
use uuid::Uuid;

use super::WorkflowError;
use crate::db::repository;
use crate::models::{
    AiInferenceResult, ClinicalContext, DiagnosticReport, DiagnosticTest, Referral, TestStatus,
    TestType, Urgency,
};
use crate::pipeline::backend::InferenceBackend;
use crate::pipeline::{map_risk, preprocess};
use crate::report::ReportGenerator;

const ENTITY_TEST: &str = "diagnostic_test";

#[derive(Debug, Clone)]
pub struct CreateTestRequest {
    pub patient_id: Uuid,
    pub practitioner_id: Option<Uuid>,
    pub test_type: TestType,
}

/// Outcome of an AI run. `heatmap_error` reports the documented partial
/// completion mode: the result row exists but the overlay could not be
/// rendered or saved.
#[derive(Debug)]
pub struct AiRunOutcome {
    pub result: AiInferenceResult,
    pub heatmap_error: Option<String>,
}

/// Create a test in UPLOADED.
pub fn create_test(
    conn: &Connection,
    request: CreateTestRequest,
) -> Result<DiagnosticTest, WorkflowError> {
    let test = DiagnosticTest::new(request.patient_id, request.practitioner_id, request.test_type);
    repository::insert_test(conn, &test)?;
    tracing::info!("created {} test {}", test.test_type, test.id);
    Ok(test)
}

/// Attach (or replace) the raw diagnostic image. Only allowed before the AI
/// run: results must stay traceable to the exact bytes they scored.
pub fn attach_image(
    conn: &Connection,
    test_id: &Uuid,
    image: &[u8],
    filename: &str,
) -> Result<(), WorkflowError> {
    let test = require_test(conn, test_id)?;
    if test.status != TestStatus::Uploaded {
        return Err(WorkflowError::invalid(
            ENTITY_TEST,
            test.status.as_str(),
            "attach_image",
            "image is frozen once the AI run has happened",
        ));
    }
    repository::attach_image(conn, test_id, image, filename)?;
    Ok(())
}

/// Record symptoms/vitals context. Optional, at most once per test, and only
/// before the AI run.
pub fn enter_context(
    conn: &Connection,
    test_id: &Uuid,
    symptoms: serde_json::Value,
    vitals: Option<serde_json::Value>,
    entered_by: Option<Uuid>,
) -> Result<ClinicalContext, WorkflowError> {
    let test = require_test(conn, test_id)?;
    if test.status != TestStatus::Uploaded {
        return Err(WorkflowError::invalid(
            ENTITY_TEST,
            test.status.as_str(),
            "enter_context",
            "context entry closes at the AI run",
        ));
    }

    let context = ClinicalContext::new(*test_id, symptoms, vitals, entered_by);
    repository::insert_context(conn, &context)
        .map_err(|e| WorkflowError::on_insert("clinical_context", e))?;
    Ok(context)
}

/// Run AI inference on a test: preprocess the uploaded image, score it with
/// the configured backend, map the risk level and persist the result, moving
/// the test UPLOADED -> AI_DONE.
///
/// Decode and model failures abort before anything is written. The
/// explainability overlay runs after the result commits; its failure is
/// surfaced on the outcome without rolling the result back.
pub fn run_ai(
    conn: &Connection,
    backend: &dyn InferenceBackend,
    test_id: &Uuid,
) -> Result<AiRunOutcome, WorkflowError> {
    let test = require_test(conn, test_id)?;

    // Re-running AI on a scored test is a duplicate, not a bad transition:
    // checked before the status guard so the caller sees the real cause.
    if repository::get_result_for_test(conn, test_id)?.is_some() {
        return Err(WorkflowError::DuplicateResult {
            entity: "ai_inference_result",
        });
    }
    if test.status != TestStatus::Uploaded {
        return Err(WorkflowError::invalid(
            ENTITY_TEST,
            test.status.as_str(),
            "run_ai",
            "status must be UPLOADED",
        ));
    }
    let Some(image_bytes) = test.raw_image.as_deref() else {
        return Err(WorkflowError::invalid(
            ENTITY_TEST,
            test.status.as_str(),
            "run_ai",
            "no image attached",
        ));
    };

    let image = preprocess::prepare(image_bytes, test.image_filename.as_deref())?;
    let output = backend.infer(test.test_type, Some(&image))?;
    let risk_level = map_risk(&output)?;

    let mut result = AiInferenceResult::new(
        *test_id,
        output.model_name.clone(),
        output.risk_score,
        risk_level,
        output.confidence,
    );

    let tx = conn.unchecked_transaction().map_err(crate::db::DatabaseError::from)?;
    repository::insert_result(&tx, &result)
        .map_err(|e| WorkflowError::on_insert("ai_inference_result", e))?;
    if !repository::update_test_status(&tx, test_id, TestStatus::Uploaded, TestStatus::AiDone)? {
        return Err(WorkflowError::invalid(
            ENTITY_TEST,
            TestStatus::Uploaded.as_str(),
            "run_ai",
            "concurrent status change",
        ));
    }
    tx.commit().map_err(crate::db::DatabaseError::from)?;

    tracing::info!(
        "test {test_id} scored {} ({:.2}) by {}",
        risk_level,
        output.confidence,
        backend.name()
    );

    // Overlay rendering is best-effort once the result row exists.
    let heatmap_error = match backend.explain(&image, output.class_index) {
        Ok(Some(png)) => {
            repository::set_heatmap(conn, &result.id, &png)?;
            result.heatmap_png = Some(png);
            None
        }
        Ok(None) => None,
        Err(e) => {
            tracing::warn!("heatmap generation failed for test {test_id}: {e}");
            Some(e.to_string())
        }
    };

    Ok(AiRunOutcome {
        result,
        heatmap_error,
    })
}

#[derive(Debug, Clone)]
pub struct ReferralRequest {
    pub referred_to: Option<Uuid>,
    pub urgency: Urgency,
    pub reason: String,
}

/// Refer an AI-scored test to a doctor: creates the PENDING referral and
/// moves the test AI_DONE -> REFERRED.
pub fn refer(
    conn: &Connection,
    test_id: &Uuid,
    referred_by: Option<Uuid>,
    request: ReferralRequest,
) -> Result<Referral, WorkflowError> {
    let test = require_test(conn, test_id)?;
    if test.status != TestStatus::AiDone {
        return Err(WorkflowError::invalid(
            ENTITY_TEST,
            test.status.as_str(),
            "refer",
            "status must be AI_DONE",
        ));
    }

    let referral = Referral::new(
        *test_id,
        referred_by,
        request.referred_to,
        request.urgency,
        request.reason,
    );

    let tx = conn.unchecked_transaction().map_err(crate::db::DatabaseError::from)?;
    repository::insert_referral(&tx, &referral)
        .map_err(|e| WorkflowError::on_insert("referral", e))?;
    if !repository::update_test_status(&tx, test_id, TestStatus::AiDone, TestStatus::Referred)? {
        return Err(WorkflowError::invalid(
            ENTITY_TEST,
            TestStatus::AiDone.as_str(),
            "refer",
            "concurrent status change",
        ));
    }
    tx.commit().map_err(crate::db::DatabaseError::from)?;

    tracing::info!(
        "test {test_id} referred ({}) to {:?}",
        referral.urgency,
        referral.referred_to
    );
    Ok(referral)
}

/// Produce and persist the case report from the AI result.
pub fn generate_report(
    conn: &Connection,
    generator: &dyn ReportGenerator,
    test_id: &Uuid,
) -> Result<DiagnosticReport, WorkflowError> {
    let test = require_test(conn, test_id)?;
    let result =
        repository::get_result_for_test(conn, test_id)?.ok_or(WorkflowError::NotFound {
            entity: "ai_inference_result",
            id: *test_id,
        })?;

    let pdf = generator.generate(&test, &result)?;
    let report = DiagnosticReport::new(*test_id, pdf, result.risk_level);
    repository::insert_report(conn, &report)
        .map_err(|e| WorkflowError::on_insert("diagnostic_report", e))?;
    Ok(report)
}

pub(crate) fn require_test(
    conn: &Connection,
    test_id: &Uuid,
) -> Result<DiagnosticTest, WorkflowError> {
    repository::get_test(conn, test_id)?.ok_or(WorkflowError::NotFound {
        entity: ENTITY_TEST,
        id: *test_id,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::open_memory_database;
    use crate::models::RiskLevel;
    use crate::pipeline::backend::RuleStubBackend;
    use image::{DynamicImage, GrayImage, ImageOutputFormat};
    use std::io::Cursor;

    fn png_fixture() -> Vec<u8> {
        let img = GrayImage::from_fn(64, 64, |x, y| image::Luma([((x * 3 + y) % 256) as u8]));
        let mut cursor = Cursor::new(Vec::new());
        DynamicImage::ImageLuma8(img)
            .write_to(&mut cursor, ImageOutputFormat::Png)
            .unwrap();
        cursor.into_inner()
    }

    fn uploaded_tb_test(conn: &Connection) -> DiagnosticTest {
        let test = create_test(
            conn,
            CreateTestRequest {
                patient_id: Uuid::new_v4(),
                practitioner_id: Some(Uuid::new_v4()),
                test_type: TestType::Tb,
            },
        )
        .unwrap();
        attach_image(conn, &test.id, &png_fixture(), "scan.png").unwrap();
        test
    }

    #[test]
    fn scenario_a_tb_rule_stub() {
        let conn = open_memory_database().unwrap();
        let test = uploaded_tb_test(&conn);

        let outcome = run_ai(&conn, &RuleStubBackend, &test.id).unwrap();
        assert_eq!(outcome.result.risk_score, 0.82);
        assert_eq!(outcome.result.risk_level, RiskLevel::High);
        assert_eq!(outcome.result.confidence, 0.91);
        assert!(outcome.heatmap_error.is_none());

        let reloaded = require_test(&conn, &test.id).unwrap();
        assert_eq!(reloaded.status, TestStatus::AiDone);
    }

    #[test]
    fn run_ai_twice_is_a_duplicate() {
        let conn = open_memory_database().unwrap();
        let test = uploaded_tb_test(&conn);

        run_ai(&conn, &RuleStubBackend, &test.id).unwrap();
        let err = run_ai(&conn, &RuleStubBackend, &test.id).unwrap_err();
        assert!(matches!(err, WorkflowError::DuplicateResult { .. }));
    }

    #[test]
    fn run_ai_requires_an_image() {
        let conn = open_memory_database().unwrap();
        let test = create_test(
            &conn,
            CreateTestRequest {
                patient_id: Uuid::new_v4(),
                practitioner_id: None,
                test_type: TestType::Tb,
            },
        )
        .unwrap();

        let err = run_ai(&conn, &RuleStubBackend, &test.id).unwrap_err();
        assert!(matches!(err, WorkflowError::InvalidTransition { .. }));
    }

    #[test]
    fn run_ai_aborts_before_persisting_on_decode_failure() {
        let conn = open_memory_database().unwrap();
        let test = create_test(
            &conn,
            CreateTestRequest {
                patient_id: Uuid::new_v4(),
                practitioner_id: None,
                test_type: TestType::Tb,
            },
        )
        .unwrap();
        let mut corrupt = png_fixture();
        corrupt.truncate(32);
        attach_image(&conn, &test.id, &corrupt, "scan.png").unwrap();

        let err = run_ai(&conn, &RuleStubBackend, &test.id).unwrap_err();
        assert!(matches!(err, WorkflowError::Preprocess(_)));
        // Nothing persisted, status unchanged: the run can be retried.
        assert!(repository::get_result_for_test(&conn, &test.id).unwrap().is_none());
        assert_eq!(require_test(&conn, &test.id).unwrap().status, TestStatus::Uploaded);
    }

    #[test]
    fn refer_from_uploaded_is_invalid() {
        let conn = open_memory_database().unwrap();
        let test = uploaded_tb_test(&conn);

        let err = refer(
            &conn,
            &test.id,
            None,
            ReferralRequest {
                referred_to: None,
                urgency: Urgency::High,
                reason: "AI flagged".into(),
            },
        )
        .unwrap_err();
        assert!(matches!(err, WorkflowError::InvalidTransition { .. }));
    }

    #[test]
    fn second_referral_is_a_duplicate() {
        let conn = open_memory_database().unwrap();
        let test = uploaded_tb_test(&conn);
        run_ai(&conn, &RuleStubBackend, &test.id).unwrap();

        let request = ReferralRequest {
            referred_to: Some(Uuid::new_v4()),
            urgency: Urgency::High,
            reason: "AI flagged".into(),
        };
        refer(&conn, &test.id, None, request.clone()).unwrap();

        // Force the test back to AI_DONE to isolate the uniqueness check
        // from the status guard.
        conn.execute(
            "UPDATE diagnostic_tests SET status = 'AI_DONE' WHERE id = ?1",
            [test.id.to_string()],
        )
        .unwrap();
        let err = refer(&conn, &test.id, None, request).unwrap_err();
        assert!(matches!(err, WorkflowError::DuplicateResult { .. }));
    }

    #[test]
    fn image_is_frozen_after_ai_run() {
        let conn = open_memory_database().unwrap();
        let test = uploaded_tb_test(&conn);
        run_ai(&conn, &RuleStubBackend, &test.id).unwrap();

        let err = attach_image(&conn, &test.id, &png_fixture(), "retake.png").unwrap_err();
        assert!(matches!(err, WorkflowError::InvalidTransition { .. }));
    }

    #[test]
    fn context_entry_is_single_shot() {
        let conn = open_memory_database().unwrap();
        let test = uploaded_tb_test(&conn);

        enter_context(
            &conn,
            &test.id,
            serde_json::json!({ "cough_weeks": 3 }),
            None,
            None,
        )
        .unwrap();
        let stored = repository::get_context_for_test(&conn, &test.id)
            .unwrap()
            .unwrap();
        assert_eq!(stored.symptoms["cough_weeks"], 3);

        let err = enter_context(&conn, &test.id, serde_json::json!({}), None, None).unwrap_err();
        assert!(matches!(err, WorkflowError::DuplicateResult { .. }));
    }

    #[test]
    fn report_generates_once_from_ai_result() {
        let conn = open_memory_database().unwrap();
        let test = uploaded_tb_test(&conn);
        run_ai(&conn, &RuleStubBackend, &test.id).unwrap();

        let report =
            generate_report(&conn, &crate::report::PdfReportGenerator, &test.id).unwrap();
        assert_eq!(report.final_risk_level, RiskLevel::High);
        assert!(report.report_pdf.starts_with(b"%PDF"));
        assert!(!report.doctor_signed);

        let stored = repository::get_report_for_test(&conn, &test.id)
            .unwrap()
            .unwrap();
        assert_eq!(stored.id, report.id);
        assert_eq!(stored.report_pdf, report.report_pdf);

        let err =
            generate_report(&conn, &crate::report::PdfReportGenerator, &test.id).unwrap_err();
        assert!(matches!(err, WorkflowError::DuplicateResult { .. }));
    }

    #[test]
    fn report_requires_an_ai_result() {
        let conn = open_memory_database().unwrap();
        let test = uploaded_tb_test(&conn);
        let err =
            generate_report(&conn, &crate::report::PdfReportGenerator, &test.id).unwrap_err();
        assert!(matches!(err, WorkflowError::NotFound { .. }));
    }

    #[test]
    fn missing_test_is_not_found() {
        let conn = open_memory_database().unwrap();
        let err = run_ai(&conn, &RuleStubBackend, &Uuid::new_v4()).unwrap_err();
        assert!(matches!(err, WorkflowError::NotFound { .. }));
    }
}
