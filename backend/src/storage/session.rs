use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use uuid::Uuid;

const STAGING_PREFIX: &str = ".staging-";
const TRASH_PREFIX: &str = ".trash-";
const MAX_USER_ID_LEN: usize = 64;

type LockMap = Arc<Mutex<HashMap<String, Arc<AsyncMutex<()>>>>>;

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("Invalid user id: {0:?}")]
    InvalidUserId(String),
    #[error("Session storage error: {0}")]
    Io(#[from] io::Error),
}

/// Per-user upload and prediction directories.
///
/// Holding a `Session` holds the user's lock, so a second request with the
/// same id waits until this one has dropped it.
pub struct Session {
    pub user_id: String,
    pub upload_dir: PathBuf,
    pub prediction_dir: PathBuf,
    _lock: UserLock,
}

/// A held per-user lock. On drop the lock is released and the user's map
/// entry is removed unless another request is already waiting on it.
struct UserLock {
    user_id: String,
    locks: LockMap,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for UserLock {
    fn drop(&mut self) {
        drop(self.guard.take());
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        let idle = locks
            .get(&self.user_id)
            .is_some_and(|lock| Arc::strong_count(lock) == 1);
        if idle {
            locks.remove(&self.user_id);
        }
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("user_id", &self.user_id)
            .field("upload_dir", &self.upload_dir)
            .field("prediction_dir", &self.prediction_dir)
            .finish()
    }
}

#[derive(Clone)]
pub struct SessionStore {
    uploads_root: PathBuf,
    predictions_root: PathBuf,
    locks: LockMap,
}

impl SessionStore {
    pub fn new(uploads_root: impl Into<PathBuf>, predictions_root: impl Into<PathBuf>) -> Self {
        Self {
            uploads_root: uploads_root.into(),
            predictions_root: predictions_root.into(),
            locks: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn uploads_root(&self) -> &Path {
        &self.uploads_root
    }

    pub fn validate_user_id(user_id: &str) -> Result<(), SessionError> {
        let valid = !user_id.is_empty()
            && user_id.len() <= MAX_USER_ID_LEN
            && !user_id.starts_with('.')
            && user_id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'));
        if valid {
            Ok(())
        } else {
            Err(SessionError::InvalidUserId(user_id.to_string()))
        }
    }

    /// Waits for the user's lock, then replaces both session directories
    /// with fresh empty ones. Anything a previous session left is gone.
    pub async fn open(&self, user_id: &str) -> Result<Session, SessionError> {
        Self::validate_user_id(user_id)?;

        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
            locks
                .entry(user_id.to_string())
                .or_insert_with(|| Arc::new(AsyncMutex::new(())))
                .clone()
        };
        let lock = UserLock {
            user_id: user_id.to_string(),
            locks: Arc::clone(&self.locks),
            guard: Some(lock.lock_owned().await),
        };

        let upload_dir = swap_in_fresh_dir(&self.uploads_root, user_id)?;
        let prediction_dir = swap_in_fresh_dir(&self.predictions_root, user_id)?;
        log::info!("Reset session folders for user {}", user_id);

        Ok(Session {
            user_id: user_id.to_string(),
            upload_dir,
            prediction_dir,
            _lock: lock,
        })
    }

    #[cfg(test)]
    fn tracked_users(&self) -> usize {
        self.locks.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Removes staging/trash directories an interrupted reset left behind.
    pub fn sweep_stale(&self) -> io::Result<usize> {
        let mut removed = 0;
        for root in [&self.uploads_root, &self.predictions_root] {
            if !root.exists() {
                continue;
            }
            for entry in fs::read_dir(root)? {
                let entry = entry?;
                let name = entry.file_name();
                let name = name.to_string_lossy();
                if name.starts_with(STAGING_PREFIX) || name.starts_with(TRASH_PREFIX) {
                    fs::remove_dir_all(entry.path())?;
                    removed += 1;
                }
            }
        }
        if removed > 0 {
            log::info!("Removed {} stale session directories", removed);
        }
        Ok(removed)
    }
}

fn swap_in_fresh_dir(root: &Path, user_id: &str) -> io::Result<PathBuf> {
    fs::create_dir_all(root)?;
    let target = root.join(user_id);
    let staging = root.join(format!("{STAGING_PREFIX}{user_id}-{}", Uuid::new_v4()));
    fs::create_dir(&staging)?;

    let trash = if target.exists() {
        let trash = root.join(format!("{TRASH_PREFIX}{user_id}-{}", Uuid::new_v4()));
        fs::rename(&target, &trash)?;
        Some(trash)
    } else {
        None
    };

    fs::rename(&staging, &target)?;

    if let Some(trash) = trash {
        if let Err(e) = fs::remove_dir_all(&trash) {
            log::warn!("Failed to remove old session dir {}: {}", trash.display(), e);
        }
    }
    Ok(target)
}
