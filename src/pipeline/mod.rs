pub mod backend;
pub mod dicom;
pub mod gradcam;
pub mod overlay;
pub mod preprocess;
pub mod risk;
pub mod vision;

pub use backend::{BackendConfig, InferenceBackend, InferenceError, InferenceOutput, RiskPolicy};
pub use gradcam::{CamCapture, ExplainError};
pub use preprocess::{NormalizedImage, PreprocessError, MODEL_INPUT_SIZE};
pub use risk::map_risk;
