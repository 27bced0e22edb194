use std::path::Path;

use bilifetch_core::models::settings::AppSettings;

use crate::error::{Error, Result};

/// A missing file yields defaults. A file that exists but does not parse is an error.
pub fn load_settings(path: &Path) -> Result<AppSettings> {
    let raw = match std::fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!("no settings at {}, using defaults", path.display());
            return Ok(AppSettings::default());
        }
        Err(e) => return Err(Error::filesystem(path, e)),
    };

    serde_json::from_str::<AppSettings>(&raw)
        .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let settings = load_settings(&dir.path().join("absent.json")).unwrap();
        assert_eq!(settings.browser.pool_size, 2);
    }

    #[test]
    fn malformed_file_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "{ not json").unwrap();
        assert!(matches!(load_settings(&path), Err(Error::Config(_))));
    }

    #[test]
    fn partial_file_keeps_given_values() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(
            &path,
            r#"{ "browser": { "pool_size": 5 }, "logging": { "format": "json" } }"#,
        )
        .unwrap();

        let loaded = load_settings(&path).unwrap();
        assert_eq!(loaded.browser.pool_size, 5);
        assert_eq!(loaded.logging.format, "json");
        assert_eq!(loaded.logging.level, "info");
    }
}
