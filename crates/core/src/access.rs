use crate::config::AccessConfig;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const ACCESS_FILE_NAME: &str = ".access";

#[derive(Debug, Error)]
pub enum AccessError {
    #[error("access code rejected")]
    Rejected,
    #[error("failed to persist access code to `{path}`: {source}")]
    Persist { path: PathBuf, source: io::Error },
}

impl AccessError {
    pub fn user_message(&self) -> String {
        match self {
            Self::Rejected => "访问密码错误".to_string(),
            Self::Persist { .. } => self.to_string(),
        }
    }
}

/// Shared-secret gate in front of the studio. Without a configured password
/// everything is open. Accepted secrets are remembered per project directory.
#[derive(Clone, Debug)]
pub struct AccessGate {
    password: Option<String>,
    remembered: PathBuf,
}

impl AccessGate {
    pub fn new(config: &AccessConfig, project_dir: impl AsRef<Path>) -> Self {
        Self {
            password: config
                .password
                .clone()
                .filter(|password| !password.is_empty()),
            remembered: project_dir.as_ref().join(ACCESS_FILE_NAME),
        }
    }

    pub fn is_open(&self) -> bool {
        self.password.is_none()
    }

    pub fn check(&self, secret: &str) -> bool {
        match &self.password {
            None => true,
            Some(password) => password == secret.trim(),
        }
    }

    /// True when no password is configured or the remembered one still matches.
    pub fn is_unlocked(&self) -> bool {
        if self.is_open() {
            return true;
        }
        fs::read_to_string(&self.remembered)
            .map(|stored| self.check(&stored))
            .unwrap_or(false)
    }

    pub fn unlock(&self, secret: &str) -> Result<(), AccessError> {
        if !self.check(secret) {
            return Err(AccessError::Rejected);
        }
        if self.is_open() {
            return Ok(());
        }
        if let Some(parent) = self.remembered.parent() {
            fs::create_dir_all(parent).map_err(|source| AccessError::Persist {
                path: self.remembered.clone(),
                source,
            })?;
        }
        fs::write(&self.remembered, secret.trim()).map_err(|source| AccessError::Persist {
            path: self.remembered.clone(),
            source,
        })
    }

    pub fn forget(&self) -> io::Result<()> {
        match fs::remove_file(&self.remembered) {
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn locked(dir: &Path) -> AccessGate {
        AccessGate::new(
            &AccessConfig {
                password: Some("fallen-angels".into()),
            },
            dir,
        )
    }

    #[test]
    fn open_without_password() {
        let dir = tempdir().unwrap();
        let gate = AccessGate::new(&AccessConfig::default(), dir.path());
        assert!(gate.is_open());
        assert!(gate.is_unlocked());
        gate.unlock("anything").unwrap();
        assert!(!dir.path().join(ACCESS_FILE_NAME).exists());
    }

    #[test]
    fn accepted_secret_is_remembered() {
        let dir = tempdir().unwrap();
        let gate = locked(dir.path());
        assert!(!gate.is_unlocked());
        assert!(matches!(gate.unlock("wrong"), Err(AccessError::Rejected)));

        gate.unlock("fallen-angels\n").unwrap();
        assert!(locked(dir.path()).is_unlocked());

        gate.forget().unwrap();
        assert!(!gate.is_unlocked());
        gate.forget().unwrap();
    }
}
