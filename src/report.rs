//! Case report collaborator.
//!
//! The workflow only depends on the `ReportGenerator` seam; the bundled
//! implementation renders a one-page PDF via `printpdf` from the risk level,
//! confidence and heatmap availability. Anything richer (letterheads,
//! signatures, localization) belongs to the consuming application.

use std::io::BufWriter;

use printpdf::*;
use thiserror::Error;

use crate::models::{AiInferenceResult, DiagnosticTest};

#[derive(Error, Debug)]
pub enum ReportError {
    #[error("PDF generation failed: {0}")]
    Pdf(String),
}

pub trait ReportGenerator: Send + Sync {
    fn generate(
        &self,
        test: &DiagnosticTest,
        result: &AiInferenceResult,
    ) -> Result<Vec<u8>, ReportError>;
}

/// Minimal A4 report: case identifiers, AI verdict, disclaimer.
pub struct PdfReportGenerator;

impl ReportGenerator for PdfReportGenerator {
    fn generate(
        &self,
        test: &DiagnosticTest,
        result: &AiInferenceResult,
    ) -> Result<Vec<u8>, ReportError> {
        let (doc, page1, layer1) =
            PdfDocument::new("AI-Assisted Diagnostic Report", Mm(210.0), Mm(297.0), "Layer 1");
        let layer = doc.get_page(page1).get_layer(layer1);
        let font = doc
            .add_builtin_font(BuiltinFont::Helvetica)
            .map_err(|e| ReportError::Pdf(format!("font error: {e}")))?;
        let bold = doc
            .add_builtin_font(BuiltinFont::HelveticaBold)
            .map_err(|e| ReportError::Pdf(format!("font error: {e}")))?;

        let mut y = Mm(280.0);
        layer.use_text("AI-Assisted Diagnostic Report", 16.0, Mm(20.0), y, &bold);
        y -= Mm(14.0);

        let lines = [
            format!("Case: {}", test.id),
            format!("Patient: {}", test.patient_id),
            format!("Test type: {}", test.test_type),
            format!("Risk level: {}", result.risk_level),
            format!("Confidence: {:.2}", result.confidence),
            format!("Model: {}", result.model_name),
        ];
        for line in &lines {
            layer.use_text(line, 11.0, Mm(20.0), y, &font);
            y -= Mm(6.0);
        }

        if result.heatmap_png.is_some() {
            y -= Mm(4.0);
            layer.use_text(
                "An activation overlay is attached to this case record.",
                10.0,
                Mm(20.0),
                y,
                &font,
            );
        }

        y -= Mm(14.0);
        layer.use_text("Disclaimer:", 11.0, Mm(20.0), y, &bold);
        y -= Mm(6.0);
        layer.use_text(
            "AI output is assistive and must be reviewed by a doctor.",
            10.0,
            Mm(20.0),
            y,
            &font,
        );

        let mut buf = BufWriter::new(Vec::new());
        doc.save(&mut buf)
            .map_err(|e| ReportError::Pdf(format!("save error: {e}")))?;
        buf.into_inner()
            .map_err(|e| ReportError::Pdf(format!("buffer error: {e}")))
    }
}
