//! Worktree coordination: per-directory exclusive access with git
//! worktree isolation for contending sessions.
//!
//! At most one session owns a main directory at a time; later sessions
//! get an isolated `git worktree` on their own branch. All git access is
//! via subprocess.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::process::Command;

use sb_domain::config::WorktreesConfig;
use sb_domain::error::{Error, Result};

/// A session's hold on a working directory.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorktreeInfo {
    pub path: String,
    pub branch: String,
    pub base_commit: String,
    pub isolated: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fork_parent: Option<WorktreeForkParent>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorktreeForkParent {
    pub session_id: String,
    pub commit: String,
}

/// git status summary for `worktree.getStatus`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorktreeStatus {
    pub path: String,
    pub branch: String,
    pub dirty: bool,
    pub changed_files: Vec<String>,
}

pub struct WorktreeCoordinator {
    config: WorktreesConfig,
    /// main directory → owning session.
    owners: Mutex<HashMap<PathBuf, String>>,
    /// session → its worktree info.
    held: Mutex<HashMap<String, WorktreeInfo>>,
}

impl WorktreeCoordinator {
    pub fn new(config: WorktreesConfig) -> Arc<Self> {
        Arc::new(Self {
            config,
            owners: Mutex::new(HashMap::new()),
            held: Mutex::new(HashMap::new()),
        })
    }

    /// Acquire a directory for a session: the main directory when free,
    /// an isolated worktree otherwise.
    pub async fn acquire(&self, session_id: &str, directory: &str) -> Result<WorktreeInfo> {
        if let Some(existing) = self.held.lock().get(session_id) {
            return Ok(existing.clone());
        }

        let dir = PathBuf::from(directory);
        let branch = current_branch(&dir).await?;
        let base_commit = head_commit(&dir).await?;

        let main_free = {
            let mut owners = self.owners.lock();
            if owners.contains_key(&dir) {
                false
            } else {
                owners.insert(dir.clone(), session_id.to_owned());
                true
            }
        };

        let info = if main_free {
            WorktreeInfo {
                path: directory.to_owned(),
                branch,
                base_commit,
                isolated: false,
                fork_parent: None,
            }
        } else {
            if !self.config.isolate_on_contention {
                return Err(Error::Conflict(format!(
                    "directory {directory} is held by another session"
                )));
            }
            let owner = self.owners.lock().get(&dir).cloned().unwrap_or_default();
            let short = &session_id[session_id.len().saturating_sub(8)..];
            let wt_branch = format!("{}{short}", self.config.branch_prefix);
            let wt_path = dir.join(&self.config.worktree_dir).join(short);
            git(
                &dir,
                &[
                    "worktree",
                    "add",
                    "-b",
                    &wt_branch,
                    wt_path.to_str().unwrap_or_default(),
                    "HEAD",
                ],
            )
            .await?;
            WorktreeInfo {
                path: wt_path.display().to_string(),
                branch: wt_branch,
                base_commit: base_commit.clone(),
                isolated: true,
                fork_parent: Some(WorktreeForkParent {
                    session_id: owner,
                    commit: base_commit,
                }),
            }
        };

        self.held
            .lock()
            .insert(session_id.to_owned(), info.clone());
        tracing::debug!(
            session_id,
            path = %info.path,
            isolated = info.isolated,
            "worktree acquired"
        );
        Ok(info)
    }

    pub fn get(&self, session_id: &str) -> Option<WorktreeInfo> {
        self.held.lock().get(session_id).cloned()
    }

    pub fn list(&self) -> Vec<(String, WorktreeInfo)> {
        self.held
            .lock()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    pub async fn status(&self, session_id: &str) -> Result<WorktreeStatus> {
        let info = self
            .get(session_id)
            .ok_or_else(|| Error::NotFound(format!("no worktree held by {session_id}")))?;
        let dir = PathBuf::from(&info.path);
        let porcelain = git(&dir, &["status", "--porcelain"]).await?;
        let changed_files: Vec<String> = porcelain
            .lines()
            .filter_map(|line| line.get(3..))
            .map(str::to_owned)
            .collect();
        Ok(WorktreeStatus {
            path: info.path,
            branch: info.branch,
            dirty: !changed_files.is_empty(),
            changed_files,
        })
    }

    /// Stage everything and commit; returns the new commit hash.
    pub async fn commit(&self, session_id: &str, message: &str) -> Result<String> {
        let info = self
            .get(session_id)
            .ok_or_else(|| Error::NotFound(format!("no worktree held by {session_id}")))?;
        let dir = PathBuf::from(&info.path);
        git(&dir, &["add", "-A"]).await?;
        git(&dir, &["commit", "-m", message]).await?;
        head_commit(&dir).await
    }

    /// Merge an isolated worktree's branch back into the main directory.
    pub async fn merge(&self, session_id: &str) -> Result<String> {
        let info = self
            .get(session_id)
            .ok_or_else(|| Error::NotFound(format!("no worktree held by {session_id}")))?;
        if !info.isolated {
            return Err(Error::InvalidOperation(
                "session holds the main directory; nothing to merge".into(),
            ));
        }
        // The main checkout is the worktree's parent repo.
        let main_dir = PathBuf::from(&info.path)
            .ancestors()
            .nth(3)
            .map(Path::to_path_buf)
            .ok_or_else(|| Error::InvalidOperation("cannot locate main checkout".into()))?;
        git(&main_dir, &["merge", "--no-ff", &info.branch]).await?;
        head_commit(&main_dir).await
    }

    /// Release the session's hold; isolated worktrees are pruned.
    pub async fn release(&self, session_id: &str) -> Result<()> {
        let Some(info) = self.held.lock().remove(session_id) else {
            return Ok(());
        };
        if info.isolated {
            let path = PathBuf::from(&info.path);
            if let Some(main_dir) = path.ancestors().nth(3) {
                let _ = git(
                    main_dir,
                    &["worktree", "remove", "--force", &info.path],
                )
                .await;
            }
        } else {
            self.owners
                .lock()
                .retain(|_, owner| owner != session_id);
        }
        tracing::debug!(session_id, path = %info.path, "worktree released");
        Ok(())
    }
}

// ── git subprocess helpers ─────────────────────────────────────────

async fn git(dir: &Path, args: &[&str]) -> Result<String> {
    let output = Command::new("git")
        .args(args)
        .current_dir(dir)
        .output()
        .await
        .map_err(|e| Error::Other(format!("git spawn failed: {e}")))?;
    if !output.status.success() {
        return Err(Error::Other(format!(
            "git {} failed: {}",
            args.first().unwrap_or(&""),
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }
    Ok(String::from_utf8_lossy(&output.stdout).trim().to_owned())
}

async fn current_branch(dir: &Path) -> Result<String> {
    git(dir, &["rev-parse", "--abbrev-ref", "HEAD"]).await
}

async fn head_commit(dir: &Path) -> Result<String> {
    git(dir, &["rev-parse", "HEAD"]).await
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn init_repo() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path();
        for args in [
            vec!["init", "-b", "main"],
            vec!["config", "user.email", "test@test"],
            vec!["config", "user.name", "test"],
        ] {
            git(path, &args).await.unwrap();
        }
        std::fs::write(path.join("README.md"), "hello\n").unwrap();
        git(path, &["add", "-A"]).await.unwrap();
        git(path, &["commit", "-m", "init"]).await.unwrap();
        dir
    }

    #[tokio::test]
    async fn first_session_gets_main_directory() {
        let repo = init_repo().await;
        let coordinator = WorktreeCoordinator::new(WorktreesConfig::default());
        let info = coordinator
            .acquire("sess_a", repo.path().to_str().unwrap())
            .await
            .unwrap();
        assert!(!info.isolated);
        assert_eq!(info.branch, "main");
        assert!(info.fork_parent.is_none());
    }

    #[tokio::test]
    async fn second_session_gets_isolated_worktree() {
        let repo = init_repo().await;
        let coordinator = WorktreeCoordinator::new(WorktreesConfig::default());
        let dir = repo.path().to_str().unwrap();

        let first = coordinator.acquire("sess_a", dir).await.unwrap();
        let second = coordinator.acquire("sess_b", dir).await.unwrap();

        assert!(!first.isolated);
        assert!(second.isolated);
        assert_ne!(first.path, second.path);
        assert!(second.branch.starts_with("switchboard/"));
        assert_eq!(
            second.fork_parent.as_ref().unwrap().session_id,
            "sess_a"
        );
        assert!(Path::new(&second.path).exists());
    }

    #[tokio::test]
    async fn acquire_is_idempotent_per_session() {
        let repo = init_repo().await;
        let coordinator = WorktreeCoordinator::new(WorktreesConfig::default());
        let dir = repo.path().to_str().unwrap();
        let a = coordinator.acquire("sess_a", dir).await.unwrap();
        let b = coordinator.acquire("sess_a", dir).await.unwrap();
        assert_eq!(a.path, b.path);
    }

    #[tokio::test]
    async fn status_and_commit_roundtrip() {
        let repo = init_repo().await;
        let coordinator = WorktreeCoordinator::new(WorktreesConfig::default());
        let dir = repo.path().to_str().unwrap();
        coordinator.acquire("sess_a", dir).await.unwrap();

        std::fs::write(repo.path().join("new.txt"), "data\n").unwrap();
        let status = coordinator.status("sess_a").await.unwrap();
        assert!(status.dirty);
        assert_eq!(status.changed_files, vec!["new.txt"]);

        let commit = coordinator.commit("sess_a", "add new.txt").await.unwrap();
        assert_eq!(commit.len(), 40);

        let clean = coordinator.status("sess_a").await.unwrap();
        assert!(!clean.dirty);
    }

    #[tokio::test]
    async fn release_frees_main_directory() {
        let repo = init_repo().await;
        let coordinator = WorktreeCoordinator::new(WorktreesConfig::default());
        let dir = repo.path().to_str().unwrap();
        coordinator.acquire("sess_a", dir).await.unwrap();
        coordinator.release("sess_a").await.unwrap();

        let next = coordinator.acquire("sess_b", dir).await.unwrap();
        assert!(!next.isolated);
    }
}
