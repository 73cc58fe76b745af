use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, info, warn};

use super::build::Build;
use super::toolchain::Toolchain;
use super::vcs::Vcs;
use super::OnceMap;
use crate::config::BUILDS_DIR;
use crate::error::{CiError, Result};

/// An opened local clone.
///
/// Opened at most once per name and kept for the lifetime of the process.
/// Every [`Build`] holds a reference back to its project.
pub struct Project {
    pub name: String,
    /// URL of the `origin` remote, read once when the project is opened.
    pub url: String,
    path: PathBuf,
    targets_key: String,
    vcs: Arc<dyn Vcs>,
    toolchain: Arc<dyn Toolchain>,
    builds: OnceMap<Build>,
}

/// Outcome of resolving a reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolved {
    /// Canonical short commit id.
    pub id: String,
    /// Whether the reference was already an immutable commit id prefix.
    pub immutable: bool,
}

impl Project {
    pub(crate) async fn open(
        name: &str,
        path: &Path,
        vcs: Arc<dyn Vcs>,
        toolchain: Arc<dyn Toolchain>,
        targets_key: &str,
    ) -> Result<Self> {
        let not_found = |source| CiError::ProjectNotFound {
            name: name.to_string(),
            path: path.to_path_buf(),
            source,
        };

        let path = std::path::absolute(path).map_err(not_found)?;
        tokio::fs::metadata(&path).await.map_err(not_found)?;

        let url = vcs
            .remote_url(&path)
            .await
            .map_err(|source| CiError::RemoteQuery {
                name: name.to_string(),
                source,
            })?;

        Ok(Self {
            name: name.to_string(),
            url,
            path,
            targets_key: targets_key.to_string(),
            vcs,
            toolchain,
            builds: OnceMap::new(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub(crate) fn vcs(&self) -> &dyn Vcs {
        self.vcs.as_ref()
    }

    pub(crate) fn toolchain(&self) -> &dyn Toolchain {
        self.toolchain.as_ref()
    }

    pub(crate) fn targets_key(&self) -> &str {
        &self.targets_key
    }

    /// Refresh the clone from its remote.
    pub async fn fetch(&self) -> Result<(), crate::error::CommandError> {
        self.vcs.fetch(&self.path).await
    }

    /// Resolve `reference` to a canonical commit id.
    ///
    /// A reference that already is a commit id prefix is resolved locally.
    /// Anything else (branch, tag, unknown prefix) triggers one fetch first;
    /// a failed fetch is logged and resolution continues with local state.
    pub async fn resolve(&self, reference: &str) -> Result<Resolved> {
        let exact = self
            .vcs
            .short_id(&self.path, reference, Some(reference.len()))
            .await;

        let immutable = matches!(&exact, Ok(id) if id == reference);
        if !immutable {
            debug!(project = %self.name, %reference, "refreshing before resolving");
            if let Err(e) = self.fetch().await {
                warn!(project = %self.name, error = %e, "fetch failed, resolving with local state");
            }
        }

        let id = self
            .vcs
            .short_id(&self.path, reference, None)
            .await
            .map_err(|source| CiError::UnknownReference {
                reference: reference.to_string(),
                source,
            })?;

        debug!(project = %self.name, %reference, %id, immutable, "resolved reference");
        Ok(Resolved { id, immutable })
    }

    /// The build for resolved commit `id`, created on first request.
    pub async fn get_build(self: &Arc<Self>, id: &str) -> Result<Arc<Build>> {
        self.builds
            .get_or_try_init(id, || async {
                let dir = self.path.join(BUILDS_DIR).join(id);
                tokio::fs::create_dir_all(&dir)
                    .await
                    .map_err(|source| CiError::BuildDir {
                        path: dir.clone(),
                        source,
                    })?;

                let description = self.vcs.describe(&self.path, id).await.map_err(|source| {
                    CiError::Describe {
                        commit: id.to_string(),
                        source,
                    }
                })?;

                info!(project = %self.name, commit = %id, "new build");
                Ok::<_, CiError>(Build::new(Arc::clone(self), id, description, dir))
            })
            .await
    }

    /// Number of builds created for this project.
    pub fn build_count(&self) -> usize {
        self.builds.len()
    }
}

impl std::fmt::Debug for Project {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Project")
            .field("name", &self.name)
            .field("url", &self.url)
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}
