use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, OnceLock};

use chrono::{DateTime, Utc};
use tokio::sync::Notify;
use tracing::info;

use super::pipeline;
use super::project::Project;
use crate::models::{BuildStatus, BuildSummary};

/// One build of one resolved commit.
///
/// Status moves `NotStarted → InProgress → Finished | Failed` and never back.
/// Only the pipeline task writes the log, and it does so before publishing
/// the terminal status: a reader that sees `Finished` or `Failed` also sees
/// the complete log.
pub struct Build {
    project: Arc<Project>,
    commit: String,
    description: String,
    path: PathBuf,
    code_path: PathBuf,
    files_path: PathBuf,
    status: AtomicU8,
    log: OnceLock<String>,
    started_at: OnceLock<DateTime<Utc>>,
    finished_at: OnceLock<DateTime<Utc>>,
    done: Notify,
}

impl Build {
    pub(crate) fn new(
        project: Arc<Project>,
        commit: &str,
        description: String,
        path: PathBuf,
    ) -> Self {
        Self {
            project,
            commit: commit.to_string(),
            description,
            code_path: path.join("code"),
            files_path: path.join("files"),
            path,
            status: AtomicU8::new(BuildStatus::NotStarted.as_u8()),
            log: OnceLock::new(),
            started_at: OnceLock::new(),
            finished_at: OnceLock::new(),
            done: Notify::new(),
        }
    }

    pub fn project(&self) -> &Arc<Project> {
        &self.project
    }

    /// Resolved commit id this build is for.
    pub fn commit(&self) -> &str {
        &self.commit
    }

    /// One-line description of the commit.
    pub fn description(&self) -> &str {
        &self.description
    }

    /// Working directory holding `code/` and `files/`.
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn code_path(&self) -> &Path {
        &self.code_path
    }

    /// Artifact directory. Only meaningful once the status is `Finished`.
    pub fn files_path(&self) -> &Path {
        &self.files_path
    }

    pub fn status(&self) -> BuildStatus {
        BuildStatus::from_u8(self.status.load(Ordering::Acquire))
    }

    /// The build log, empty until the build reaches a terminal status.
    pub fn log(&self) -> &str {
        if self.status().is_terminal() {
            self.log.get().map(String::as_str).unwrap_or_default()
        } else {
            ""
        }
    }

    /// Launch the pipeline if the build has not been started yet.
    ///
    /// Returns immediately. Exactly one call ever wins and returns `true`;
    /// every other call, concurrent or later, is a no-op. Must be called
    /// from within a Tokio runtime.
    pub fn start_build(self: &Arc<Self>) -> bool {
        let won = self
            .status
            .compare_exchange(
                BuildStatus::NotStarted.as_u8(),
                BuildStatus::InProgress.as_u8(),
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok();
        if !won {
            return false;
        }

        let _ = self.started_at.set(Utc::now());
        info!(project = %self.project.name, commit = %self.commit, "starting build");
        tokio::spawn(pipeline::run(Arc::clone(self)));
        true
    }

    /// Publish the outcome. Called once, by the pipeline.
    pub(crate) fn finish(&self, status: BuildStatus, log: String) {
        debug_assert!(status.is_terminal());
        let _ = self.log.set(log);
        let _ = self.finished_at.set(Utc::now());
        self.status.store(status.as_u8(), Ordering::Release);
        self.done.notify_waiters();
    }

    /// Wait until the build reaches a terminal status.
    ///
    /// Never returns for a build nobody starts.
    pub async fn wait(&self) -> BuildStatus {
        loop {
            let notified = self.done.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let status = self.status();
            if status.is_terminal() {
                return status;
            }
            notified.await;
        }
    }

    /// Names of the produced artifacts, sorted. `None` unless `Finished`.
    pub async fn artifacts(&self) -> std::io::Result<Option<Vec<String>>> {
        if self.status() != BuildStatus::Finished {
            return Ok(None);
        }

        let mut names = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.files_path).await?;
        while let Some(entry) = entries.next_entry().await? {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
        names.sort();
        Ok(Some(names))
    }

    pub fn summary(&self) -> BuildSummary {
        let status = self.status();
        BuildSummary {
            project_name: self.project.name.clone(),
            project_url: self.project.url.clone(),
            commit_id: self.commit.clone(),
            commit_summary: self.description.clone(),
            status,
            build_log: status.is_terminal().then(|| self.log().to_string()),
            started_at: self.started_at.get().copied(),
            finished_at: status
                .is_terminal()
                .then(|| self.finished_at.get().copied())
                .flatten(),
        }
    }
}

impl std::fmt::Debug for Build {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Build")
            .field("project", &self.project.name)
            .field("commit", &self.commit)
            .field("status", &self.status())
            .finish_non_exhaustive()
    }
}
