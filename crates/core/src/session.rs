use crate::config::StudioConfig;
use crate::logging::{LogLevel, LogRecord, LogSink};
use crate::model::EntropyOutOfRange;
use crate::workflow::Workflow;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const SESSION_FILE_NAME: &str = "session.json";

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("failed to prepare project directory `{path}`: {source}")]
    CreateDir { path: PathBuf, source: io::Error },
    #[error("failed to read session `{path}`: {source}")]
    Read { path: PathBuf, source: io::Error },
    #[error("failed to write session `{path}`: {source}")]
    Write { path: PathBuf, source: io::Error },
    #[error("session `{path}` is not valid: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("failed to serialize session `{path}`: {source}")]
    Serialize {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("invalid studio defaults: {0}")]
    Defaults(#[from] EntropyOutOfRange),
}

/// Persists the whole workflow as pretty JSON inside a project directory.
#[derive(Clone, Debug)]
pub struct SessionStore {
    dir: PathBuf,
}

impl SessionStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path(&self) -> PathBuf {
        self.dir.join(SESSION_FILE_NAME)
    }

    pub fn exists(&self) -> bool {
        self.path().is_file()
    }

    /// Loads the saved session, or a fresh one seeded from `defaults` when none
    /// exists yet. A session saved mid-generation is repaired before it is
    /// returned.
    pub fn load(
        &self,
        defaults: &StudioConfig,
        sink: &dyn LogSink,
    ) -> Result<Workflow, SessionError> {
        let path = self.path();
        let contents = match fs::read_to_string(&path) {
            Ok(contents) => contents,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                return Workflow::from_config(defaults).map_err(SessionError::from)
            }
            Err(source) => return Err(SessionError::Read { path, source }),
        };
        let mut workflow: Workflow = serde_json::from_str(&contents)
            .map_err(|source| SessionError::Parse { path: path.clone(), source })?;
        if workflow.recover_interrupted() {
            sink.log(LogRecord::new(
                LogLevel::Warn,
                format!("{} 中有未完成的生成任务，已回退", path.display()),
            ));
        }
        Ok(workflow)
    }

    /// Writes to a temporary file in the project directory and renames it
    /// over the session, so a crash mid-write leaves the old session intact.
    pub fn save(&self, workflow: &Workflow) -> Result<(), SessionError> {
        fs::create_dir_all(&self.dir).map_err(|source| SessionError::CreateDir {
            path: self.dir.clone(),
            source,
        })?;
        let path = self.path();
        let write_err = |source: io::Error| SessionError::Write {
            path: path.clone(),
            source,
        };

        let mut file = tempfile::NamedTempFile::new_in(&self.dir).map_err(write_err)?;
        serde_json::to_writer_pretty(&mut file, workflow).map_err(|source| {
            SessionError::Serialize {
                path: path.clone(),
                source,
            }
        })?;
        file.flush().map_err(write_err)?;
        file.persist(&path).map_err(|err| write_err(err.error))?;
        Ok(())
    }

    pub fn clear(&self) -> Result<(), SessionError> {
        let path = self.path();
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(SessionError::Write { path, source }),
        }
    }
}
