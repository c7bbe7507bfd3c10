use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use thiserror::Error;

use super::OAuthState;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("token cache is not valid JSON: {0}")]
    Format(#[from] serde_json::Error),
}

/// JSON token cache on the local filesystem.
pub struct TokenStorage {
    path: PathBuf,
}

impl TokenStorage {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn has_token(&self) -> bool {
        self.path.is_file()
    }

    /// `None` when nothing has been cached yet.
    pub fn load(&self) -> Result<Option<OAuthState>, StorageError> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        Ok(Some(serde_json::from_str(&raw)?))
    }

    pub fn save(&self, state: &OAuthState) -> Result<(), StorageError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let payload = serde_json::to_vec_pretty(state)?;
        let mut staged = self.path.clone().into_os_string();
        staged.push(".tmp");
        let staged = PathBuf::from(staged);

        let mut file = OpenOptions::new()
            .create(true)
            .truncate(true)
            .write(true)
            .open(&staged)?;
        file.write_all(&payload)?;
        file.sync_all()?;
        drop(file);

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&staged, fs::Permissions::from_mode(0o600))?;
        }

        fs::rename(&staged, &self.path)?;
        Ok(())
    }

    pub fn delete(&self) -> Result<(), StorageError> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state() -> OAuthState {
        OAuthState {
            access_token: "access".into(),
            refresh_token: Some("refresh".into()),
            expires_at: Some(1_700_000_000),
            scope: Some("https://www.googleapis.com/auth/drive.readonly".into()),
            token_type: Some("Bearer".into()),
        }
    }

    #[test]
    fn saves_and_loads_state() {
        let dir = tempfile::tempdir().unwrap();
        let storage = TokenStorage::new(dir.path().join("nested/token.json"));

        assert!(!storage.has_token());
        assert_eq!(storage.load().unwrap(), None);

        storage.save(&state()).unwrap();
        assert!(storage.has_token());
        assert_eq!(storage.load().unwrap(), Some(state()));
    }

    #[cfg(unix)]
    #[test]
    fn cache_is_private_to_the_user() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().unwrap();
        let storage = TokenStorage::new(dir.path().join("token.json"));
        storage.save(&state()).unwrap();

        let mode = fs::metadata(storage.path()).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn delete_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let storage = TokenStorage::new(dir.path().join("token.json"));
        storage.save(&state()).unwrap();

        storage.delete().unwrap();
        storage.delete().unwrap();
        assert!(!storage.has_token());
    }

    #[test]
    fn corrupt_cache_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("token.json");
        fs::write(&path, "not json").unwrap();

        let err = TokenStorage::new(path).load().unwrap_err();
        assert!(matches!(err, StorageError::Format(_)));
    }

    #[test]
    fn state_from_token_computes_expiry() {
        let token: gdrive_core::OAuthToken = serde_json::from_value(serde_json::json!({
            "access_token": "a",
            "token_type": "Bearer",
            "expires_in": 3600
        }))
        .unwrap();

        let state = OAuthState::from_oauth_token(&token);
        let expires_at = state.expires_at.unwrap();
        let now = crate::storage::now_unix();
        assert!(expires_at > now + 3500 && expires_at <= now + 3600);
        assert_eq!(state.token_type.as_deref(), Some("Bearer"));
    }
}
