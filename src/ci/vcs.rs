//! Version-control backend.
//!
//! The engine only needs a handful of queries against a local clone. [`GitCli`]
//! answers them by running `git` in the clone's directory.

use std::ffi::OsStr;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use crate::error::CommandError;

#[async_trait]
pub trait Vcs: Send + Sync {
    /// URL of the clone's `origin` remote.
    async fn remote_url(&self, repo: &Path) -> Result<String, CommandError>;

    /// Update the clone from its remote.
    async fn fetch(&self, repo: &Path) -> Result<(), CommandError>;

    /// Abbreviated commit id for `reference`, `len` characters long (or the
    /// backend's canonical length when `None`).
    async fn short_id(
        &self,
        repo: &Path,
        reference: &str,
        len: Option<usize>,
    ) -> Result<String, CommandError>;

    /// Check out `commit` into `work_tree` without moving any branch.
    async fn checkout_detached(
        &self,
        repo: &Path,
        work_tree: &Path,
        commit: &str,
    ) -> Result<(), CommandError>;

    /// Discard any modification in `work_tree` relative to `commit`.
    async fn reset_hard(
        &self,
        repo: &Path,
        work_tree: &Path,
        commit: &str,
    ) -> Result<(), CommandError>;

    /// One-line human description of `commit`.
    async fn describe(&self, repo: &Path, commit: &str) -> Result<String, CommandError>;

    /// Read a configuration value. `Ok(None)` when the key is unset.
    async fn config_value(
        &self,
        repo: &Path,
        work_tree: &Path,
        key: &str,
    ) -> Result<Option<String>, CommandError>;
}

/// [`Vcs`] backed by the `git` command line.
#[derive(Debug, Clone)]
pub struct GitCli {
    program: PathBuf,
}

impl GitCli {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    /// Index file for a checkout, kept next to the work tree so builds of
    /// the same clone never contend on the shared index.
    fn index_file(work_tree: &Path) -> PathBuf {
        work_tree.with_file_name("index")
    }

    async fn git<I, S>(
        &self,
        repo: &Path,
        index: Option<&Path>,
        args: I,
    ) -> Result<String, CommandError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let args: Vec<_> = args.into_iter().map(|a| a.as_ref().to_owned()).collect();
        let command = std::iter::once(self.program.as_os_str())
            .chain(args.iter().map(|a| a.as_os_str()))
            .map(|a| a.to_string_lossy())
            .collect::<Vec<_>>()
            .join(" ");

        let mut cmd = Command::new(&self.program);
        cmd.args(&args).current_dir(repo);
        if let Some(index) = index {
            cmd.env("GIT_INDEX_FILE", index);
        }

        debug!(repo = %repo.display(), %command, "running git");
        let output = cmd.output().await.map_err(|source| CommandError::Io {
            command: command.clone(),
            source,
        })?;

        if !output.status.success() {
            return Err(CommandError::Failed {
                command,
                code: output.status.code(),
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim_end().to_string(),
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout)
            .trim_end_matches('\n')
            .to_string())
    }
}

impl Default for GitCli {
    fn default() -> Self {
        Self::new("git")
    }
}

#[async_trait]
impl Vcs for GitCli {
    async fn remote_url(&self, repo: &Path) -> Result<String, CommandError> {
        self.git(repo, None, ["remote", "get-url", "origin"]).await
    }

    async fn fetch(&self, repo: &Path) -> Result<(), CommandError> {
        self.git(repo, None, ["fetch"]).await.map(drop)
    }

    async fn short_id(
        &self,
        repo: &Path,
        reference: &str,
        len: Option<usize>,
    ) -> Result<String, CommandError> {
        let short = match len {
            Some(len) => format!("--short={len}"),
            None => "--short".to_string(),
        };
        self.git(repo, None, ["rev-parse", "--verify", short.as_str(), reference])
            .await
    }

    async fn checkout_detached(
        &self,
        repo: &Path,
        work_tree: &Path,
        commit: &str,
    ) -> Result<(), CommandError> {
        let index = Self::index_file(work_tree);
        self.git(
            repo,
            Some(&index),
            [
                OsStr::new("--work-tree"),
                work_tree.as_os_str(),
                OsStr::new("checkout"),
                OsStr::new("--detach"),
                OsStr::new(commit),
            ],
        )
        .await
        .map(drop)
    }

    async fn reset_hard(
        &self,
        repo: &Path,
        work_tree: &Path,
        commit: &str,
    ) -> Result<(), CommandError> {
        let index = Self::index_file(work_tree);
        self.git(
            repo,
            Some(&index),
            [
                OsStr::new("--work-tree"),
                work_tree.as_os_str(),
                OsStr::new("reset"),
                OsStr::new("--hard"),
                OsStr::new(commit),
            ],
        )
        .await
        .map(drop)
    }

    async fn describe(&self, repo: &Path, commit: &str) -> Result<String, CommandError> {
        self.git(repo, None, ["show-branch", "--no-name", "--", commit])
            .await
    }

    async fn config_value(
        &self,
        repo: &Path,
        work_tree: &Path,
        key: &str,
    ) -> Result<Option<String>, CommandError> {
        let result = self
            .git(
                repo,
                None,
                [
                    OsStr::new("--work-tree"),
                    work_tree.as_os_str(),
                    OsStr::new("config"),
                    OsStr::new(key),
                ],
            )
            .await;

        match result {
            Ok(value) => Ok(Some(value)),
            // git config exits 1 when the key is not set
            Err(e) if e.code() == Some(1) => Ok(None),
            Err(e) => Err(e),
        }
    }
}
