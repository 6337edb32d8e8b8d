/// `scripting/config.rs` — engine configuration
///
/// Loaded from the same JSON settings format the rest of the application
/// uses. Every field has a default so partial files are accepted.
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::error::ScriptError;

pub const DEFAULT_ERROR_LOG_FILE: &str = "script_error_log.txt";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Script run once per open under the `Sandbox` execution tag.
    pub sandbox_script: Option<String>,
    /// Directory that receives the script error log.
    pub log_directory: PathBuf,
    /// File name of the error log inside `log_directory`.
    pub error_log_file_name: String,
    /// Keep `package.loadlib` and the C module searchers.
    pub allow_native_libraries: bool,
    /// Send "Executing ..." lines to the host trace for every dispatch.
    pub trace_dispatch: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sandbox_script: None,
            log_directory: PathBuf::from("."),
            error_log_file_name: DEFAULT_ERROR_LOG_FILE.to_string(),
            allow_native_libraries: false,
            trace_dispatch: true,
        }
    }
}

impl EngineConfig {
    pub fn from_json_str(json: &str) -> Result<Self, ScriptError> {
        serde_json::from_str(json).map_err(|e| ScriptError::Config(e.to_string()))
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ScriptError> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Self::from_json_str(&text)
    }

    /// Full path of the append-only error log.
    pub fn error_log_path(&self) -> PathBuf {
        self.log_directory.join(&self.error_log_file_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_keeps_defaults() {
        let cfg = EngineConfig::from_json_str(r#"{ "sandbox_script": "x = 1" }"#).unwrap();
        assert_eq!(cfg.sandbox_script.as_deref(), Some("x = 1"));
        assert_eq!(cfg.error_log_file_name, DEFAULT_ERROR_LOG_FILE);
        assert!(!cfg.allow_native_libraries);
    }

    #[test]
    fn log_path_joins_directory_and_file() {
        let cfg = EngineConfig {
            log_directory: PathBuf::from("/var/log/world"),
            ..Default::default()
        };
        assert_eq!(cfg.error_log_path(), PathBuf::from("/var/log/world/script_error_log.txt"));
    }

    #[test]
    fn malformed_json_is_config_error() {
        let err = EngineConfig::from_json_str("{ nope").unwrap_err();
        assert!(matches!(err, ScriptError::Config(_)));
    }

    #[test]
    fn load_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scripting.json");
        std::fs::write(&path, r#"{ "allow_native_libraries": true }"#).unwrap();
        let cfg = EngineConfig::load(&path).unwrap();
        assert!(cfg.allow_native_libraries);
    }
}
