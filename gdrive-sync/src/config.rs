//! Run configuration: an optional JSON settings file, overridden by
//! `GDRIVE_SYNC_*` environment variables, overridden by CLI flags.

use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::sync::orchestrator::{DEFAULT_BATCH_SIZE, OrchestratorConfig};
use crate::sync::paths::sanitize_path;

pub const DEFAULT_SETTINGS_FILE: &str = "settings.json";
pub const DEFAULT_CREDENTIALS_FILE: &str = "credentials.json";
pub const DEFAULT_TOKEN_FILE: &str = "token.json";
pub const DEFAULT_PAGE_SIZE: u32 = 100;
const MAX_PAGE_SIZE: u32 = 1000;

pub const ENV_CONFIG: &str = "GDRIVE_SYNC_CONFIG";
const ENV_APPLICATION_NAME: &str = "GDRIVE_SYNC_APPLICATION_NAME";
const ENV_CREDENTIALS_PATH: &str = "GDRIVE_SYNC_CREDENTIALS_PATH";
const ENV_TOKEN_PATH: &str = "GDRIVE_SYNC_TOKEN_PATH";
const ENV_FOLDER_ID: &str = "GDRIVE_SYNC_FOLDER_ID";
const ENV_DESTINATION: &str = "GDRIVE_SYNC_DESTINATION";
const ENV_FORCE_DOWNLOADS: &str = "GDRIVE_SYNC_FORCE_DOWNLOADS";
const ENV_INCLUDE_TOP_FOLDER: &str = "GDRIVE_SYNC_INCLUDE_TOP_FOLDER";
const ENV_BATCH_SIZE: &str = "GDRIVE_SYNC_BATCH_SIZE";
const ENV_PAGE_SIZE: &str = "GDRIVE_SYNC_PAGE_SIZE";
const ENV_DOWNLOAD_TIMEOUT: &str = "GDRIVE_SYNC_DOWNLOAD_TIMEOUT_SECS";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read settings file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("invalid settings file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("missing required setting `{0}`")]
    Missing(&'static str),
    #[error("invalid value for `{field}`: {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// Validated settings for one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncConfig {
    pub application_name: String,
    pub credentials_path: PathBuf,
    pub token_path: PathBuf,
    pub remote_folder_id: String,
    pub destination_path: PathBuf,
    pub force_downloads: bool,
    pub include_top_folder: bool,
    pub batch_size: usize,
    pub page_size: u32,
    pub download_timeout: Option<Duration>,
}

impl SyncConfig {
    pub fn orchestrator_config(&self) -> OrchestratorConfig {
        OrchestratorConfig {
            batch_size: self.batch_size,
            download_timeout: self.download_timeout,
        }
    }
}

/// Flags given on the command line; they win over every other source.
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub force: bool,
    pub folder_id: Option<String>,
    pub destination: Option<String>,
}

/// Settings before validation. Every field is optional so the sources can
/// be layered.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RawSettings {
    pub application_name: Option<String>,
    pub credentials_path: Option<String>,
    pub token_path: Option<String>,
    pub remote_folder_id: Option<String>,
    pub destination_path: Option<String>,
    pub force_downloads: Option<bool>,
    pub include_top_folder: Option<bool>,
    pub batch_size: Option<usize>,
    pub page_size: Option<u32>,
    pub download_timeout_secs: Option<u64>,
}

/// Loads the full configuration from the process environment.
pub fn load(config_path: Option<&Path>, cli: &CliOverrides) -> Result<SyncConfig, ConfigError> {
    let env = |name: &str| std::env::var(name).ok();
    let mut raw = RawSettings::discover(config_path, &env)?;
    raw.apply_env(&env)?;
    raw.apply_cli(cli);
    raw.validate(dirs::home_dir().as_deref())
}

/// Token cache path from the same sources, without requiring the rest of the
/// settings to be valid.
pub fn load_token_path(config_path: Option<&Path>) -> Result<PathBuf, ConfigError> {
    let env = |name: &str| std::env::var(name).ok();
    let mut raw = RawSettings::discover(config_path, &env)?;
    raw.apply_env(&env)?;
    Ok(raw.token_path(dirs::home_dir().as_deref()))
}

impl RawSettings {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// An explicit path must exist; the default `settings.json` is optional.
    pub fn discover(
        explicit: Option<&Path>,
        env: &dyn Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        if let Some(path) = explicit {
            return Self::from_file(path);
        }
        if let Some(path) = env(ENV_CONFIG).filter(|value| !value.trim().is_empty()) {
            return Self::from_file(Path::new(&path));
        }
        let fallback = Path::new(DEFAULT_SETTINGS_FILE);
        if fallback.is_file() {
            tracing::debug!("using {DEFAULT_SETTINGS_FILE} from the working directory");
            return Self::from_file(fallback);
        }
        Ok(Self::default())
    }

    pub fn apply_env(&mut self, env: &dyn Fn(&str) -> Option<String>) -> Result<(), ConfigError> {
        let text = |name: &str| env(name).filter(|value| !value.trim().is_empty());

        if let Some(value) = text(ENV_APPLICATION_NAME) {
            self.application_name = Some(value);
        }
        if let Some(value) = text(ENV_CREDENTIALS_PATH) {
            self.credentials_path = Some(value);
        }
        if let Some(value) = text(ENV_TOKEN_PATH) {
            self.token_path = Some(value);
        }
        if let Some(value) = text(ENV_FOLDER_ID) {
            self.remote_folder_id = Some(value);
        }
        if let Some(value) = text(ENV_DESTINATION) {
            self.destination_path = Some(value);
        }
        if let Some(value) = text(ENV_FORCE_DOWNLOADS) {
            self.force_downloads = Some(parse_bool("force_downloads", &value)?);
        }
        if let Some(value) = text(ENV_INCLUDE_TOP_FOLDER) {
            self.include_top_folder = Some(parse_bool("include_top_folder", &value)?);
        }
        if let Some(value) = text(ENV_BATCH_SIZE) {
            self.batch_size = Some(parse_number("batch_size", &value)?);
        }
        if let Some(value) = text(ENV_PAGE_SIZE) {
            self.page_size = Some(parse_number("page_size", &value)?);
        }
        if let Some(value) = text(ENV_DOWNLOAD_TIMEOUT) {
            self.download_timeout_secs = Some(parse_number("download_timeout_secs", &value)?);
        }
        Ok(())
    }

    pub fn apply_cli(&mut self, cli: &CliOverrides) {
        if cli.force {
            self.force_downloads = Some(true);
        }
        if let Some(folder_id) = &cli.folder_id {
            self.remote_folder_id = Some(folder_id.clone());
        }
        if let Some(destination) = &cli.destination {
            self.destination_path = Some(destination.clone());
        }
    }

    /// Token cache location; all `--logout` needs.
    pub fn token_path(&self, home: Option<&Path>) -> PathBuf {
        resolve_path(self.token_path.as_deref().unwrap_or(DEFAULT_TOKEN_FILE), home)
    }

    pub fn validate(self, home: Option<&Path>) -> Result<SyncConfig, ConfigError> {
        let token_path = self.token_path(home);
        let application_name = required("application_name", self.application_name)?;
        let remote_folder_id = required("remote_folder_id", self.remote_folder_id)?;
        let destination = required("destination_path", self.destination_path)?;

        let batch_size = self.batch_size.unwrap_or(DEFAULT_BATCH_SIZE);
        if batch_size == 0 {
            return Err(ConfigError::Invalid {
                field: "batch_size",
                reason: "must be at least 1".into(),
            });
        }
        let page_size = self.page_size.unwrap_or(DEFAULT_PAGE_SIZE);
        if !(1..=MAX_PAGE_SIZE).contains(&page_size) {
            return Err(ConfigError::Invalid {
                field: "page_size",
                reason: format!("must be between 1 and {MAX_PAGE_SIZE}"),
            });
        }
        let download_timeout = match self.download_timeout_secs {
            Some(0) => {
                return Err(ConfigError::Invalid {
                    field: "download_timeout_secs",
                    reason: "must be greater than zero".into(),
                });
            }
            Some(secs) => Some(Duration::from_secs(secs)),
            None => None,
        };

        let destination_path = resolve_path(&destination, home);
        let sanitized = sanitize_path(&destination_path);
        if sanitized != destination_path {
            tracing::warn!(
                original = %destination_path.display(),
                sanitized = %sanitized.display(),
                "destination path contains invalid characters, using sanitized path"
            );
        }

        Ok(SyncConfig {
            application_name,
            credentials_path: resolve_path(
                self.credentials_path.as_deref().unwrap_or(DEFAULT_CREDENTIALS_FILE),
                home,
            ),
            token_path,
            remote_folder_id,
            destination_path: sanitized,
            force_downloads: self.force_downloads.unwrap_or(false),
            include_top_folder: self.include_top_folder.unwrap_or(true),
            batch_size,
            page_size,
            download_timeout,
        })
    }
}

fn required(field: &'static str, value: Option<String>) -> Result<String, ConfigError> {
    value
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .ok_or(ConfigError::Missing(field))
}

fn resolve_path(value: &str, home: Option<&Path>) -> PathBuf {
    match home {
        Some(home) => expand_with_home(value, home),
        None => PathBuf::from(value),
    }
}

fn expand_with_home(value: &str, home: &Path) -> PathBuf {
    if value == "~" {
        return home.to_path_buf();
    }
    if let Some(rest) = value.strip_prefix("~/") {
        return home.join(rest);
    }
    PathBuf::from(value)
}

fn parse_bool(field: &'static str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(ConfigError::Invalid {
            field,
            reason: format!("expected a boolean, got {other:?}"),
        }),
    }
}

fn parse_number<T: std::str::FromStr>(field: &'static str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse::<T>().map_err(|_| ConfigError::Invalid {
        field,
        reason: format!("expected a non-negative integer, got {value:?}"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env_of(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> + use<> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name: &str| map.get(name).cloned()
    }

    fn minimal() -> RawSettings {
        RawSettings {
            application_name: Some("Drive Mirror".into()),
            remote_folder_id: Some("folder-1".into()),
            destination_path: Some("/data/mirror".into()),
            ..RawSettings::default()
        }
    }

    #[test]
    fn applies_defaults() {
        let config = minimal().validate(None).unwrap();

        assert_eq!(config.credentials_path, PathBuf::from("credentials.json"));
        assert_eq!(config.token_path, PathBuf::from("token.json"));
        assert!(!config.force_downloads);
        assert!(config.include_top_folder);
        assert_eq!(config.batch_size, 5);
        assert_eq!(config.page_size, 100);
        assert_eq!(config.download_timeout, None);
    }

    #[test]
    fn names_missing_fields() {
        let mut raw = minimal();
        raw.remote_folder_id = None;
        assert!(matches!(
            raw.validate(None),
            Err(ConfigError::Missing("remote_folder_id"))
        ));

        let mut raw = minimal();
        raw.application_name = Some("   ".into());
        assert!(matches!(
            raw.validate(None),
            Err(ConfigError::Missing("application_name"))
        ));
    }

    #[test]
    fn rejects_out_of_range_numbers() {
        let mut raw = minimal();
        raw.batch_size = Some(0);
        assert!(matches!(
            raw.validate(None),
            Err(ConfigError::Invalid { field: "batch_size", .. })
        ));

        let mut raw = minimal();
        raw.page_size = Some(5000);
        assert!(matches!(
            raw.validate(None),
            Err(ConfigError::Invalid { field: "page_size", .. })
        ));
    }

    #[test]
    fn environment_overrides_file_values() {
        let mut raw = minimal();
        raw.batch_size = Some(3);
        let env = env_of(&[
            ("GDRIVE_SYNC_BATCH_SIZE", "8"),
            ("GDRIVE_SYNC_FORCE_DOWNLOADS", "yes"),
            ("GDRIVE_SYNC_INCLUDE_TOP_FOLDER", "off"),
            ("GDRIVE_SYNC_DOWNLOAD_TIMEOUT_SECS", "30"),
            ("GDRIVE_SYNC_FOLDER_ID", "env-folder"),
            ("GDRIVE_SYNC_TOKEN_PATH", ""),
        ]);

        raw.apply_env(&env).unwrap();
        let config = raw.validate(None).unwrap();

        assert_eq!(config.batch_size, 8);
        assert!(config.force_downloads);
        assert!(!config.include_top_folder);
        assert_eq!(config.download_timeout, Some(Duration::from_secs(30)));
        assert_eq!(config.remote_folder_id, "env-folder");
        assert_eq!(config.token_path, PathBuf::from("token.json"));
    }

    #[test]
    fn malformed_environment_values_are_errors() {
        let mut raw = minimal();
        let err = raw
            .apply_env(&env_of(&[("GDRIVE_SYNC_FORCE_DOWNLOADS", "maybe")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { field: "force_downloads", .. }));

        let err = raw
            .apply_env(&env_of(&[("GDRIVE_SYNC_PAGE_SIZE", "-1")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { field: "page_size", .. }));
    }

    #[test]
    fn cli_flags_win_over_environment() {
        let mut raw = minimal();
        raw.apply_env(&env_of(&[("GDRIVE_SYNC_DESTINATION", "/env/dest")]))
            .unwrap();
        raw.apply_cli(&CliOverrides {
            force: true,
            folder_id: Some("cli-folder".into()),
            destination: Some("/cli/dest".into()),
        });
        let config = raw.validate(None).unwrap();

        assert!(config.force_downloads);
        assert_eq!(config.remote_folder_id, "cli-folder");
        assert_eq!(config.destination_path, PathBuf::from("/cli/dest"));
    }

    #[test]
    fn expands_home_and_sanitizes_destination() {
        let mut raw = minimal();
        raw.destination_path = Some("~/Drive\u{7}Mirror".into());
        raw.token_path = Some("~/.config/gdrive-sync/token.json".into());
        let home = Path::new("/home/alex");

        let config = raw.validate(Some(home)).unwrap();

        assert_eq!(config.destination_path, PathBuf::from("/home/alex/DriveMirror"));
        assert_eq!(
            config.token_path,
            PathBuf::from("/home/alex/.config/gdrive-sync/token.json")
        );
    }

    #[test]
    fn reads_settings_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(
            &path,
            r#"{
                "application_name": "Drive Mirror",
                "remote_folder_id": "abc",
                "destination_path": "/data",
                "include_top_folder": false,
                "page_size": 250
            }"#,
        )
        .unwrap();

        let raw = RawSettings::discover(Some(&path), &env_of(&[])).unwrap();
        assert_eq!(raw.remote_folder_id.as_deref(), Some("abc"));
        assert_eq!(raw.include_top_folder, Some(false));
        assert_eq!(raw.page_size, Some(250));
    }

    #[test]
    fn config_path_can_come_from_environment() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("custom.json");
        std::fs::write(&path, r#"{ "application_name": "From Env" }"#).unwrap();
        let env = env_of(&[("GDRIVE_SYNC_CONFIG", path.to_str().unwrap())]);

        let raw = RawSettings::discover(None, &env).unwrap();
        assert_eq!(raw.application_name.as_deref(), Some("From Env"));
    }

    #[test]
    fn settings_file_errors_name_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("absent.json");
        assert!(matches!(
            RawSettings::from_file(&missing),
            Err(ConfigError::Read { .. })
        ));

        let bad = dir.path().join("bad.json");
        std::fs::write(&bad, r#"{ "unknown_key": 1 }"#).unwrap();
        let err = RawSettings::from_file(&bad).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { ref path, .. } if path == &bad));
    }
}
