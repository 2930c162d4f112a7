// SPDX-License-Identifier: GPL-3.0-only

use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use lun_contracts::{ConnectorError, Result};
use lun_types::{LunId, Operation};
use tokio::time::{Instant, sleep};
use tracing::{debug, info, warn};

use crate::config::LockConfig;

static NEXT_TOKEN: AtomicU64 = AtomicU64::new(1);

fn sanitize_name(value: &str) -> String {
    value
        .chars()
        .map(|character| {
            if character.is_ascii_alphanumeric() || character == '-' || character == '_' {
                character.to_ascii_lowercase()
            } else {
                '_'
            }
        })
        .collect()
}

/// Cross-process lock per LUN, backed by marker files created with `O_EXCL`.
///
/// Connect and disconnect of the same LUN share one marker, so they never
/// interleave. The marker body records the holder's operation, pid and a
/// per-acquire token.
#[derive(Debug, Clone)]
pub struct LunLockManager {
    dir: PathBuf,
    prefix: String,
    timeout: Duration,
    poll_interval: Duration,
}

/// Held lock; the marker is removed on drop while it still carries this
/// holder's body.
#[derive(Debug)]
pub struct LunLockGuard {
    path: PathBuf,
    body: String,
}

impl Drop for LunLockGuard {
    fn drop(&mut self) {
        match fs::read_to_string(&self.path) {
            Ok(body) if body == self.body => {}
            Ok(body) => {
                warn!(
                    path = %self.path.display(),
                    holder = body.trim(),
                    "lun lock was taken over, leaving marker in place"
                );
                return;
            }
            Err(error) if error.kind() == io::ErrorKind::NotFound => {
                warn!(path = %self.path.display(), "lun lock was already removed");
                return;
            }
            Err(error) => {
                warn!(path = %self.path.display(), %error, "failed to read lun lock");
                return;
            }
        }

        match fs::remove_file(&self.path) {
            Ok(()) => debug!(path = %self.path.display(), "released lun lock"),
            Err(error) if error.kind() == io::ErrorKind::NotFound => {}
            Err(error) => warn!(path = %self.path.display(), %error, "failed to release lun lock"),
        }
    }
}

impl LunLockManager {
    pub fn new(config: &LockConfig) -> Self {
        Self {
            dir: config.dir.clone(),
            prefix: config.prefix.clone(),
            timeout: config.timeout(),
            poll_interval: config.poll_interval(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn lock_path(&self, lun: &LunId) -> PathBuf {
        self.dir
            .join(format!("{}{}", self.prefix, sanitize_name(lun.as_str())))
    }

    /// Create the lock directory and drop markers left by a previous run.
    ///
    /// Only call this before any operation starts; live markers are
    /// indistinguishable from stale ones.
    pub fn prepare(&self) -> Result<usize> {
        fs::create_dir_all(&self.dir)?;
        self.sweep_stale()
    }

    pub fn sweep_stale(&self) -> Result<usize> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(error) if error.kind() == io::ErrorKind::NotFound => return Ok(0),
            Err(error) => return Err(error.into()),
        };

        let mut removed = 0;
        for entry in entries {
            let entry = entry?;
            let name = entry.file_name();
            if !name.to_string_lossy().starts_with(&self.prefix) {
                continue;
            }
            match fs::remove_file(entry.path()) {
                Ok(()) => removed += 1,
                Err(error) if error.kind() == io::ErrorKind::NotFound => {}
                Err(error) => return Err(error.into()),
            }
        }

        if removed > 0 {
            info!(dir = %self.dir.display(), removed, "swept stale lun locks");
        }
        Ok(removed)
    }

    /// Take the lock of `lun`, polling until the configured timeout.
    ///
    /// On timeout the marker is assumed to belong to a dead holder: it is
    /// removed so the next attempt can proceed, and this attempt fails.
    pub async fn acquire(&self, lun: &LunId, operation: Operation) -> Result<LunLockGuard> {
        let path = self.lock_path(lun);
        let deadline = Instant::now() + self.timeout;

        loop {
            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(mut file) => {
                    let token = NEXT_TOKEN.fetch_add(1, Ordering::Relaxed);
                    let body = format!("{operation} {} {token}\n", std::process::id());
                    if let Err(error) = file.write_all(body.as_bytes()) {
                        drop(file);
                        let _ = fs::remove_file(&path);
                        return Err(error.into());
                    }
                    debug!(%lun, %operation, token, "acquired lun lock");
                    return Ok(LunLockGuard { path, body });
                }
                Err(error) if error.kind() == io::ErrorKind::AlreadyExists => {
                    if Instant::now() >= deadline {
                        let holder = fs::read_to_string(&path).unwrap_or_default();
                        warn!(%lun, %operation, holder = holder.trim(), "lun lock timed out, removing marker");
                        if let Err(error) = fs::remove_file(&path)
                            && error.kind() != io::ErrorKind::NotFound
                        {
                            return Err(error.into());
                        }
                        return Err(ConnectorError::LockTimeout(lun.to_string()));
                    }
                    sleep(self.poll_interval).await;
                }
                Err(error) if error.kind() == io::ErrorKind::NotFound => {
                    fs::create_dir_all(&self.dir)?;
                }
                Err(error) => return Err(error.into()),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    fn manager(dir: &Path, timeout_ms: u64) -> LunLockManager {
        LunLockManager {
            dir: dir.to_path_buf(),
            prefix: "lun-lock-".to_string(),
            timeout: Duration::from_millis(timeout_ms),
            poll_interval: Duration::from_millis(10),
        }
    }

    fn lun(value: &str) -> LunId {
        LunId::new(value).expect("lun")
    }

    #[tokio::test]
    async fn marker_lives_as_long_as_guard() {
        let dir = tempfile::tempdir().expect("tempdir");
        let manager = manager(dir.path(), 500);
        let marker = dir.path().join("lun-lock-6a0b1c2d00000003");

        let guard = manager
            .acquire(&lun("6A0B1C2D00000003"), Operation::Connect)
            .await
            .expect("acquire");
        let body = fs::read_to_string(&marker).expect("marker");
        assert!(body.starts_with("connect "));

        drop(guard);
        assert!(!marker.exists());
    }

    #[tokio::test]
    async fn same_lun_is_serialized() {
        let dir = tempfile::tempdir().expect("tempdir");
        let manager = Arc::new(manager(dir.path(), 5_000));
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let mut tasks = tokio::task::JoinSet::new();
        for operation in [Operation::Connect, Operation::Disconnect, Operation::Connect] {
            let manager = manager.clone();
            let active = active.clone();
            let peak = peak.clone();
            tasks.spawn(async move {
                let _guard = manager
                    .acquire(&lun("6a0b1c2d00000003"), operation)
                    .await
                    .expect("acquire");
                let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                sleep(Duration::from_millis(30)).await;
                active.fetch_sub(1, Ordering::SeqCst);
            });
        }
        while let Some(result) = tasks.join_next().await {
            result.expect("task");
        }

        assert_eq!(peak.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn timeout_removes_abandoned_marker() {
        let dir = tempfile::tempdir().expect("tempdir");
        let manager = manager(dir.path(), 50);
        let _held = manager
            .acquire(&lun("6a0b1c2d00000003"), Operation::Disconnect)
            .await
            .expect("first");

        let error = manager
            .acquire(&lun("6a0b1c2d00000003"), Operation::Connect)
            .await
            .expect_err("timeout");
        assert!(matches!(error, ConnectorError::LockTimeout(_)));

        let _retry = manager
            .acquire(&lun("6a0b1c2d00000003"), Operation::Connect)
            .await
            .expect("marker was cleared");
    }

    #[tokio::test]
    async fn stale_guard_keeps_successor_marker() {
        let dir = tempfile::tempdir().expect("tempdir");
        let manager = manager(dir.path(), 50);
        let lun = lun("6a0b1c2d00000003");

        let abandoned = manager.acquire(&lun, Operation::Connect).await.expect("first holder");
        let error = manager
            .acquire(&lun, Operation::Disconnect)
            .await
            .expect_err("timeout");
        assert!(matches!(error, ConnectorError::LockTimeout(_)));

        let current = manager.acquire(&lun, Operation::Connect).await.expect("successor");
        drop(abandoned);
        assert!(dir.path().join("lun-lock-6a0b1c2d00000003").exists());

        let error = manager
            .acquire(&lun, Operation::Disconnect)
            .await
            .expect_err("successor still holds the lock");
        assert!(matches!(error, ConnectorError::LockTimeout(_)));
        drop(current);
    }

    #[test]
    fn sweep_removes_only_lock_markers() {
        let dir = tempfile::tempdir().expect("tempdir");
        fs::write(dir.path().join("lun-lock-aaaa"), "connect 1").expect("marker");
        fs::write(dir.path().join("unrelated"), "keep").expect("other");

        let removed = manager(dir.path(), 50).prepare().expect("prepare");

        assert_eq!(removed, 1);
        assert!(dir.path().join("unrelated").exists());
    }
}
