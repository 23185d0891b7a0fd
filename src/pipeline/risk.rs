//! Backend output -> domain risk level.
//!
//! Pure and deterministic: the same backend output always maps to the same
//! level. The stub path names its level directly; the binary vision
//! classifier ships a two-entry class table (Benign -> LOW, Malignant ->
//! HIGH) and therefore never emits MODERATE. The two policies are kept
//! independent on purpose.

use thiserror::Error;

use super::backend::{InferenceOutput, RiskPolicy};
use crate::models::RiskLevel;

#[derive(Error, Debug)]
pub enum RiskMapError {
    #[error("Class index {index} outside mapping table of {len} classes")]
    UnmappedClass { index: usize, len: usize },
}

pub fn map_risk(output: &InferenceOutput) -> Result<RiskLevel, RiskMapError> {
    match &output.risk {
        RiskPolicy::Direct(level) => Ok(*level),
        RiskPolicy::ClassMap(table) => {
            table
                .get(output.class_index)
                .copied()
                .ok_or(RiskMapError::UnmappedClass {
                    index: output.class_index,
                    len: table.len(),
                })
        }
    }
}
