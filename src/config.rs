//! Runtime configuration loaded from environment variables.

use std::path::PathBuf;

/// Default VCS config key holding a project's target matrix.
pub const DEFAULT_TARGETS_KEY: &str = "rocketci.targets";

/// Directory inside each clone that holds one subdirectory per built commit.
pub const BUILDS_DIR: &str = "rocketci";

#[derive(Clone, Debug)]
pub struct CiConfig {
    /// Directory containing `<project>.git` clones.
    pub root: PathBuf,
    /// Reference that a bare project URL redirects to.
    pub default_branch: String,
    /// VCS config key read for the target matrix.
    pub targets_key: String,
    /// Program used for version control.
    pub git: String,
    /// Program used to build.
    pub go: String,
}

impl CiConfig {
    /// Configuration rooted at `root` with every other setting at its default.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            default_branch: "master".to_string(),
            targets_key: DEFAULT_TARGETS_KEY.to_string(),
            git: "git".to_string(),
            go: "go".to_string(),
        }
    }

    /// Load configuration from environment variables.
    ///
    /// - `ROCKET_CI_ROOT` - projects directory (default: platform data dir)
    /// - `ROCKET_CI_DEFAULT_BRANCH` - default: `master`
    /// - `ROCKET_CI_TARGETS_KEY` - default: `rocketci.targets`
    /// - `ROCKET_CI_GIT` / `ROCKET_CI_GO` - program names
    pub fn from_env() -> anyhow::Result<Self> {
        let root = match std::env::var_os("ROCKET_CI_ROOT") {
            Some(root) => PathBuf::from(root),
            None => default_root()?,
        };

        let mut config = Self::new(root);
        if let Ok(branch) = std::env::var("ROCKET_CI_DEFAULT_BRANCH") {
            config.default_branch = branch;
        }
        if let Ok(key) = std::env::var("ROCKET_CI_TARGETS_KEY") {
            config.targets_key = key;
        }
        if let Ok(git) = std::env::var("ROCKET_CI_GIT") {
            config.git = git;
        }
        if let Ok(go) = std::env::var("ROCKET_CI_GO") {
            config.go = go;
        }
        Ok(config)
    }

    pub fn with_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.root = root.into();
        self
    }

    /// Path of the clone for project `name`.
    pub fn project_path(&self, name: &str) -> PathBuf {
        self.root.join(format!("{name}.git"))
    }
}

fn default_root() -> anyhow::Result<PathBuf> {
    let dirs = directories::ProjectDirs::from("", "", "rocket-ci")
        .ok_or_else(|| anyhow::anyhow!("Could not determine data directory"))?;
    Ok(dirs.data_dir().join("projects"))
}
