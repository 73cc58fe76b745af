//! The build engine.
//!
//! # Overview
//!
//! - [`Ci`]: process-wide registry of opened projects. Constructed once at
//!   startup and shared (it is cheap to clone).
//! - [`Project`]: one local clone. Resolves references and owns the
//!   registry of builds, one per resolved commit.
//! - [`Build`]: one build of one commit. Starting it is idempotent; the
//!   pipeline runs on its own task and publishes the log before the
//!   terminal status.
//!
//! On disk every build lives in `<clone>/rocketci/<commit>/` with a `code/`
//! checkout and a `files/` artifact directory. Both existing at start is
//! taken as a build from an earlier process lifetime.

mod build;
mod pipeline;
mod project;
pub mod targets;
pub mod toolchain;
pub mod vcs;

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::OnceCell;
use tracing::info;

use crate::config::CiConfig;
use crate::error::{CiError, Result};

pub use build::Build;
pub use project::{Project, Resolved};
pub use targets::{parse_targets, Target, TargetError};
pub use toolchain::{BuildRequest, CommandOutput, GoToolchain, ToolCommand, Toolchain};
pub use vcs::{GitCli, Vcs};

/// Map whose values are initialised at most once, outside the map lock.
///
/// The lock only guards the insert-if-absent of the cell; the (slow)
/// initialiser runs without it, and concurrent callers for the same key
/// await the same cell. A failed initialisation leaves nothing behind once
/// no other caller holds the cell: while one does, it retries on that cell
/// and later callers must join it rather than start a second initialiser.
pub(crate) struct OnceMap<T> {
    cells: Mutex<HashMap<String, Arc<OnceCell<Arc<T>>>>>,
}

impl<T> OnceMap<T> {
    pub(crate) fn new() -> Self {
        Self {
            cells: Mutex::new(HashMap::new()),
        }
    }

    pub(crate) async fn get_or_try_init<F, Fut, E>(&self, key: &str, init: F) -> Result<Arc<T>, E>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<T, E>>,
    {
        let cell = {
            let mut cells = self.cells.lock().expect("registry lock poisoned");
            Arc::clone(cells.entry(key.to_string()).or_default())
        };

        let result = cell
            .get_or_try_init(|| async { init().await.map(Arc::new) })
            .await
            .map(Arc::clone);

        if result.is_err() {
            let mut cells = self.cells.lock().expect("registry lock poisoned");
            // Every clone of a cell is taken under this lock, so a count of
            // two (the map's and ours) means no caller is still waiting on it.
            if let Some(existing) = cells.get(key) {
                if Arc::ptr_eq(existing, &cell)
                    && !existing.initialized()
                    && Arc::strong_count(existing) == 2
                {
                    cells.remove(key);
                }
            }
        }

        result
    }

    pub(crate) fn len(&self) -> usize {
        let cells = self.cells.lock().expect("registry lock poisoned");
        cells.values().filter(|cell| cell.initialized()).count()
    }
}

/// Registry of opened projects.
#[derive(Clone)]
pub struct Ci {
    inner: Arc<CiInner>,
}

struct CiInner {
    config: CiConfig,
    vcs: Arc<dyn Vcs>,
    toolchain: Arc<dyn Toolchain>,
    projects: OnceMap<Project>,
}

impl Ci {
    /// Registry using `git` and `go` as configured.
    pub fn new(config: CiConfig) -> Self {
        let vcs = Arc::new(GitCli::new(&config.git));
        let toolchain = Arc::new(GoToolchain::new(&config.go));
        Self::with_backends(config, vcs, toolchain)
    }

    pub fn with_backends(
        config: CiConfig,
        vcs: Arc<dyn Vcs>,
        toolchain: Arc<dyn Toolchain>,
    ) -> Self {
        Self {
            inner: Arc::new(CiInner {
                config,
                vcs,
                toolchain,
                projects: OnceMap::new(),
            }),
        }
    }

    pub fn config(&self) -> &CiConfig {
        &self.inner.config
    }

    /// Open project `name`, or return the already opened handle.
    ///
    /// Callers must reject empty names and names starting with `.` first.
    pub async fn project(&self, name: &str) -> Result<Arc<Project>> {
        let inner = &self.inner;
        inner
            .projects
            .get_or_try_init(name, || async {
                let path = inner.config.project_path(name);
                let project = Project::open(
                    name,
                    &path,
                    Arc::clone(&inner.vcs),
                    Arc::clone(&inner.toolchain),
                    &inner.config.targets_key,
                )
                .await?;
                info!(project = %name, url = %project.url, "opened project");
                Ok::<_, CiError>(project)
            })
            .await
    }

    /// Number of projects opened so far.
    pub fn project_count(&self) -> usize {
        self.inner.projects.len()
    }
}
