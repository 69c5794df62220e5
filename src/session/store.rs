//! On-disk persistence of sessions.
//!
//! Every session lives in `<root>/<name>/` with a pretty-printed JSON state
//! document next to its raw, processed and logs subfolders. Saves go through
//! a temporary file and a rename so a crash mid-write never leaves a
//! truncated document behind.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

use super::{Session, SessionConfig, SessionFolders};

pub const STATE_FILE: &str = "session_state.json";

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("invalid session name '{0}'")]
    InvalidName(String),

    #[error("session '{name}' not found")]
    NotFound { name: String },

    #[error("session document {} is malformed: {source}", .path.display())]
    Malformed {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("I/O error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to encode session: {0}")]
    Encode(#[from] serde_json::Error),
}

impl StoreError {
    fn io(path: &Path, source: std::io::Error) -> Self {
        StoreError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Outcome of [`SessionStore::create_or_merge`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MergeSummary {
    /// A new session document was created
    pub created: bool,
    /// Brands added by this call
    pub added: usize,
    /// Brands in the session after the call
    pub total: usize,
}

/// One row of `brandscout list`
#[derive(Debug, Clone, Serialize)]
pub struct SessionListing {
    pub name: String,
    pub total: usize,
    pub summarized: usize,
    pub failed: usize,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct SessionStore {
    root: PathBuf,
}

impl SessionStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn session_dir(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    pub fn state_path(&self, name: &str) -> PathBuf {
        self.session_dir(name).join(STATE_FILE)
    }

    pub fn folders_for(&self, name: &str) -> SessionFolders {
        SessionFolders::new(self.session_dir(name))
    }

    /// Log folder of session `name`; `None` for names the store would
    /// reject, or when `existing` is set and no session is stored yet.
    pub fn logs_dir(&self, name: &str, existing: bool) -> Option<PathBuf> {
        if validate_name(name).is_err() || (existing && !self.exists(name)) {
            return None;
        }
        Some(self.folders_for(name).logs)
    }

    pub fn exists(&self, name: &str) -> bool {
        self.state_path(name).is_file()
    }

    /// Create a session, or merge `brands` into the stored one with the same
    /// name. A stored session keeps its settings and item states; only
    /// brands it does not know yet are appended.
    pub fn create_or_merge(
        &self,
        config: SessionConfig,
        brands: &[String],
    ) -> Result<(Session, MergeSummary), StoreError> {
        validate_name(&config.name)?;

        if self.exists(&config.name) {
            match self.load(&config.name) {
                Ok(mut session) => {
                    let added = session.add_brands(brands);
                    if added > 0 {
                        self.save(&mut session)?;
                    }
                    tracing::info!(
                        session = %config.name,
                        added,
                        "Merged brands into existing session"
                    );
                    let summary = MergeSummary {
                        created: false,
                        added,
                        total: session.items.len(),
                    };
                    return Ok((session, summary));
                }
                Err(err) => {
                    tracing::warn!(
                        session = %config.name,
                        error = %err,
                        "Existing session unreadable, creating a new one"
                    );
                }
            }
        }

        let mut session = Session::new(config);
        let added = session.add_brands(brands);
        self.save(&mut session)?;
        tracing::info!(session = %session.name(), brands = added, "Created session");

        let summary = MergeSummary {
            created: true,
            added,
            total: session.items.len(),
        };
        Ok((session, summary))
    }

    pub fn load(&self, name: &str) -> Result<Session, StoreError> {
        validate_name(name)?;
        let path = self.state_path(name);
        if !path.is_file() {
            return Err(StoreError::NotFound {
                name: name.to_string(),
            });
        }

        let contents = fs::read_to_string(&path).map_err(|e| StoreError::io(&path, e))?;
        let mut session: Session =
            serde_json::from_str(&contents).map_err(|source| StoreError::Malformed {
                path: path.clone(),
                source,
            })?;
        session.refresh_counters();
        Ok(session)
    }

    /// Persist the full session, refreshing its counters first
    pub fn save(&self, session: &mut Session) -> Result<(), StoreError> {
        validate_name(session.name())?;
        session.refresh_counters();

        let folders = self.folders_for(session.name());
        for dir in folders.all() {
            fs::create_dir_all(dir).map_err(|e| StoreError::io(dir, e))?;
        }

        let contents = serde_json::to_string_pretty(session)?;
        let path = self.state_path(session.name());
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, contents).map_err(|e| StoreError::io(&tmp, e))?;
        fs::rename(&tmp, &path).map_err(|e| StoreError::io(&path, e))?;

        tracing::debug!(session = %session.name(), path = %path.display(), "Checkpoint saved");
        Ok(())
    }

    /// Every readable session under the root, newest first
    pub fn list(&self) -> Result<Vec<SessionListing>, StoreError> {
        if !self.root.is_dir() {
            return Ok(Vec::new());
        }

        let entries = fs::read_dir(&self.root).map_err(|e| StoreError::io(&self.root, e))?;
        let mut listings = Vec::new();
        for entry in entries.flatten() {
            if !entry.path().is_dir() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().to_string();
            if !self.exists(&name) {
                continue;
            }
            match self.load(&name) {
                Ok(session) => listings.push(SessionListing {
                    name,
                    total: session.total,
                    summarized: session.completed_count,
                    failed: session.failed_count,
                    created_at: session.config.created_at,
                    completed_at: session.completed_at,
                }),
                Err(err) => {
                    tracing::warn!(session = %name, error = %err, "Skipping unreadable session");
                }
            }
        }

        listings.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(listings)
    }
}

/// Session names double as folder names
fn validate_name(name: &str) -> Result<(), StoreError> {
    let trimmed = name.trim();
    if trimmed.is_empty()
        || trimmed != name
        || name == "."
        || name == ".."
        || name.contains(['/', '\\'])
    {
        return Err(StoreError::InvalidName(name.to_string()));
    }
    Ok(())
}
