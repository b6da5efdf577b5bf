//! Single-writer lock file, adapted from `port_file.rs`'s PID-liveness
//! pattern. `spec.md`'s non-goal "multi-writer coordination (a single
//! kernel owns the workspace)" implies something detects the common
//! mistake of pointing two kernel processes at the same workspace; this is
//! that detector, not a coordination protocol — a stale or foreign lock is
//! logged as a warning, never turned into a hard failure.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::fs;

#[derive(Debug, Serialize, Deserialize)]
struct LockFileContent {
    pid: u32,
    port: u16,
    started_at: DateTime<Utc>,
}

/// Held for the lifetime of a running kernel. Dropping it without calling
/// [`WorkspaceLock::release`] leaves the lock file on disk; the next
/// process to start against this workspace will see it, notice the PID is
/// dead, and clean it up itself.
pub struct WorkspaceLock {
    path: PathBuf,
}

impl WorkspaceLock {
    /// Writes `<workspace_root>/openspec/.kernel.lock`. If a lock already
    /// exists and its PID is still alive, returns the live lock's contents
    /// instead of overwriting it so the caller can warn and continue
    /// (spec.md explicitly does not ask us to refuse to start).
    pub async fn acquire(workspace_root: &Path, port: u16) -> std::io::Result<WorkspaceLockOutcome> {
        let path = lock_path(workspace_root);
        let dir = path
            .parent()
            .ok_or_else(|| std::io::Error::other("workspace root has no parent for .openspec dir"))?;
        fs::create_dir_all(dir).await?;

        if let Some(existing) = read_lock_content(&path).await {
            if is_process_running(existing.pid) && existing.pid != std::process::id() {
                return Ok(WorkspaceLockOutcome::AlreadyLocked { owner_pid: existing.pid });
            }
            tracing::warn!(
                pid = existing.pid,
                "removing stale workspace lock at {:?}",
                path
            );
        }

        let content = LockFileContent {
            pid: std::process::id(),
            port,
            started_at: Utc::now(),
        };
        let serialized = serde_json::to_string(&content)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        fs::write(&path, serialized).await?;

        Ok(WorkspaceLockOutcome::Acquired(Self { path }))
    }

    pub async fn release(self) {
        let _ = fs::remove_file(&self.path).await;
    }
}

pub enum WorkspaceLockOutcome {
    Acquired(WorkspaceLock),
    AlreadyLocked { owner_pid: u32 },
}

fn lock_path(workspace_root: &Path) -> PathBuf {
    workspace_root.join("openspec").join(".kernel.lock")
}

async fn read_lock_content(path: &Path) -> Option<LockFileContent> {
    let raw = fs::read_to_string(path).await.ok()?;
    serde_json::from_str(&raw).ok()
}

#[cfg(unix)]
fn is_process_running(pid: u32) -> bool {
    let pid = pid as libc::pid_t;
    let result = unsafe { libc::kill(pid, 0) };
    if result == 0 {
        return true;
    }
    matches!(
        std::io::Error::last_os_error().raw_os_error(),
        Some(code) if code == libc::EPERM
    )
}

#[cfg(windows)]
fn is_process_running(pid: u32) -> bool {
    use windows_sys::Win32::{
        Foundation::CloseHandle,
        System::Threading::{
            GetExitCodeProcess, OpenProcess, PROCESS_QUERY_LIMITED_INFORMATION, STILL_ACTIVE,
        },
    };

    unsafe {
        let handle = OpenProcess(PROCESS_QUERY_LIMITED_INFORMATION, 0, pid);
        if handle == 0 {
            return false;
        }
        let mut code: u32 = 0;
        let ok = GetExitCodeProcess(handle, &mut code) != 0;
        CloseHandle(handle);
        ok && code == STILL_ACTIVE
    }
}

#[cfg(not(any(unix, windows)))]
fn is_process_running(_: u32) -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn acquire_then_release_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let outcome = WorkspaceLock::acquire(dir.path(), 5700).await.unwrap();
        let lock = match outcome {
            WorkspaceLockOutcome::Acquired(lock) => lock,
            WorkspaceLockOutcome::AlreadyLocked { .. } => panic!("expected a fresh lock"),
        };
        assert!(dir.path().join("openspec/.kernel.lock").exists());
        lock.release().await;
        assert!(!dir.path().join("openspec/.kernel.lock").exists());
    }

    #[tokio::test]
    async fn stale_lock_from_a_dead_pid_is_reclaimed() {
        let dir = tempfile::tempdir().unwrap();
        let stale_path = lock_path(dir.path());
        tokio::fs::create_dir_all(stale_path.parent().unwrap())
            .await
            .unwrap();
        let fake = LockFileContent {
            pid: u32::MAX,
            port: 1,
            started_at: Utc::now(),
        };
        tokio::fs::write(&stale_path, serde_json::to_string(&fake).unwrap())
            .await
            .unwrap();

        let outcome = WorkspaceLock::acquire(dir.path(), 5700).await.unwrap();
        assert!(matches!(outcome, WorkspaceLockOutcome::Acquired(_)));
    }
}
