/// Cross-process locking for token refresh coordination
use crate::error::Result;
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};

/// File-lock manager shared by every process that refreshes the same tokens
///
/// The in-process single-flight in [`TokenRefresher`](crate::refresh::TokenRefresher)
/// only covers threads of one process. When several processes share a
/// persistent store (a [`FileTokenStore`](crate::store::FileTokenStore) or the
/// keyring), a refresh also takes an exclusive lock here so a refresh token
/// is never redeemed twice.
#[derive(Debug, Clone)]
pub struct RefreshLockManager {
    lock_dir: PathBuf,
}

impl RefreshLockManager {
    pub fn new(lock_dir: PathBuf) -> Result<Self> {
        fs::create_dir_all(&lock_dir)?;
        Ok(Self { lock_dir })
    }

    /// Lock manager under the per-user runtime directory for `app_name`
    ///
    /// Uses `$XDG_RUNTIME_DIR` when set, otherwise the temp directory.
    pub fn for_app(app_name: &str) -> Result<Self> {
        let mut lock_dir = match std::env::var("XDG_RUNTIME_DIR") {
            Ok(runtime_dir) => PathBuf::from(runtime_dir).join("shelfmark-locks"),
            Err(_) => std::env::temp_dir().join(format!("shelfmark-locks-{}", user_tag())),
        };
        lock_dir.push(sanitize(app_name));
        Self::new(lock_dir)
    }

    pub fn lock_dir(&self) -> &Path {
        &self.lock_dir
    }

    /// Block until the exclusive lock for `key` is held
    ///
    /// Released when the returned guard drops.
    pub fn acquire(&self, key: &str) -> Result<RefreshLock> {
        let file = self.open_lock_file(key)?;
        file.lock_exclusive()?;
        Ok(RefreshLock { file: Some(file) })
    }

    /// Take the lock only if nobody else holds it
    pub fn try_acquire(&self, key: &str) -> Result<Option<RefreshLock>> {
        let file = self.open_lock_file(key)?;
        match file.try_lock_exclusive() {
            Ok(()) => Ok(Some(RefreshLock { file: Some(file) })),
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn open_lock_file(&self, key: &str) -> Result<File> {
        fs::create_dir_all(&self.lock_dir)?;
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(self.lock_path(key))?;
        Ok(file)
    }

    fn lock_path(&self, key: &str) -> PathBuf {
        self.lock_dir.join(format!("{}.lock", sanitize(key)))
    }
}

fn sanitize(key: &str) -> String {
    key.replace(['/', '\\', ':', '*', '?', '"', '<', '>', '|'], "_")
}

fn user_tag() -> String {
    std::env::var("USER")
        .or_else(|_| std::env::var("USERNAME"))
        .unwrap_or_else(|_| "unknown".to_string())
}

/// RAII guard for a refresh lock
pub struct RefreshLock {
    file: Option<File>,
}

impl Drop for RefreshLock {
    fn drop(&mut self) {
        // The lock file itself stays; deleting it would race with a waiter
        // that already opened it.
        if let Some(file) = self.file.take() {
            let _ = file.unlock();
        }
    }
}
