use std::path::PathBuf;

/// Application-level constants
pub const APP_NAME: &str = "CareFlow";
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default tracing filter when RUST_LOG is unset
pub fn default_log_filter() -> &'static str {
    "info,careflow=debug"
}

/// Get the application data directory
pub fn app_data_dir() -> PathBuf {
    let home = dirs::home_dir().expect("Cannot determine home directory");
    home.join("CareFlow")
}

/// Get the models directory (ONNX artifacts)
pub fn models_dir() -> PathBuf {
    app_data_dir().join("models")
}

/// Get the breast-cancer vision model directory
/// (expects `model.onnx` + `head.json`, see `pipeline::vision`)
pub fn vision_model_dir() -> PathBuf {
    models_dir().join("breast-cancer-b0")
}
