//! In-memory stand-ins for git and the Go toolchain.

#![allow(dead_code)]

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use rocket_ci::ci::{BuildRequest, Ci, CommandOutput, GoToolchain, ToolCommand, Toolchain, Vcs};
use rocket_ci::config::CiConfig;
use rocket_ci::error::CommandError;
use tempfile::TempDir;
use tokio::sync::Semaphore;

pub const MAIN_COMMIT: &str = "abc1234def567890abc1234def567890abc12345";
pub const FEATURE_COMMIT: &str = "fedcba9876543210fedcba9876543210fedcba98";

fn failed(command: &str, stderr: &str) -> CommandError {
    CommandError::Failed {
        command: command.to_string(),
        code: Some(128),
        status: "exit status: 128".to_string(),
        stderr: stderr.to_string(),
    }
}

/// Repository with a `main` branch and `v1.0` tag on [`MAIN_COMMIT`].
pub struct FakeVcs {
    local: Mutex<HashMap<String, String>>,
    /// References that only become visible after a fetch.
    remote: Mutex<HashMap<String, String>>,
    targets: Mutex<Option<String>>,
    pub fetches: AtomicUsize,
    pub checkouts: AtomicUsize,
    pub fail_fetch: AtomicBool,
    pub fail_remote: AtomicBool,
    pub fail_describe: AtomicBool,
    pub fail_checkout: AtomicBool,
    /// First `describe` fails after a short delay, the second is slow.
    pub flaky_describe: AtomicBool,
    pub describes: AtomicUsize,
}

impl FakeVcs {
    pub fn new() -> Self {
        let local = HashMap::from([
            ("main".to_string(), MAIN_COMMIT.to_string()),
            ("v1.0".to_string(), MAIN_COMMIT.to_string()),
        ]);
        Self {
            local: Mutex::new(local),
            remote: Mutex::new(HashMap::new()),
            targets: Mutex::new(None),
            fetches: AtomicUsize::new(0),
            checkouts: AtomicUsize::new(0),
            fail_fetch: AtomicBool::new(false),
            fail_remote: AtomicBool::new(false),
            fail_describe: AtomicBool::new(false),
            fail_checkout: AtomicBool::new(false),
            flaky_describe: AtomicBool::new(false),
            describes: AtomicUsize::new(0),
        }
    }

    pub fn with_targets(self, matrix: &str) -> Self {
        *self.targets.lock().unwrap() = Some(matrix.to_string());
        self
    }

    /// Make `name` resolvable, but only after the next fetch.
    pub fn push_remote(&self, name: &str, commit: &str) {
        self.remote
            .lock()
            .unwrap()
            .insert(name.to_string(), commit.to_string());
    }

    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    fn full_id(&self, reference: &str) -> Option<String> {
        let local = self.local.lock().unwrap();
        if let Some(id) = local.get(reference) {
            return Some(id.clone());
        }
        if reference.len() < 4 || !reference.chars().all(|c| c.is_ascii_hexdigit()) {
            return None;
        }
        let mut matches: Vec<&String> = local
            .values()
            .filter(|id| id.starts_with(reference))
            .collect();
        matches.sort();
        matches.dedup();
        match matches.as_slice() {
            [id] => Some((*id).clone()),
            _ => None,
        }
    }
}

#[async_trait]
impl Vcs for FakeVcs {
    async fn remote_url(&self, _repo: &Path) -> Result<String, CommandError> {
        if self.fail_remote.load(Ordering::SeqCst) {
            return Err(failed("git remote get-url origin", "error: No such remote 'origin'"));
        }
        Ok("https://example.com/demo.git".to_string())
    }

    async fn fetch(&self, _repo: &Path) -> Result<(), CommandError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        if self.fail_fetch.load(Ordering::SeqCst) {
            return Err(failed("git fetch", "fatal: unable to access remote"));
        }
        let remote = std::mem::take(&mut *self.remote.lock().unwrap());
        self.local.lock().unwrap().extend(remote);
        Ok(())
    }

    async fn short_id(
        &self,
        _repo: &Path,
        reference: &str,
        len: Option<usize>,
    ) -> Result<String, CommandError> {
        let full = self
            .full_id(reference)
            .ok_or_else(|| failed("git rev-parse", "fatal: Needed a single revision"))?;
        let len = len.unwrap_or(7).clamp(4, full.len());
        Ok(full[..len].to_string())
    }

    async fn checkout_detached(
        &self,
        _repo: &Path,
        work_tree: &Path,
        _commit: &str,
    ) -> Result<(), CommandError> {
        self.checkouts.fetch_add(1, Ordering::SeqCst);
        if self.fail_checkout.load(Ordering::SeqCst) {
            return Err(failed("git checkout", "fatal: reference is not a tree"));
        }
        std::fs::write(work_tree.join("main.go"), "package main\n").map_err(|source| {
            CommandError::Io {
                command: "git checkout".to_string(),
                source,
            }
        })
    }

    async fn reset_hard(
        &self,
        _repo: &Path,
        _work_tree: &Path,
        _commit: &str,
    ) -> Result<(), CommandError> {
        Ok(())
    }

    async fn describe(&self, _repo: &Path, commit: &str) -> Result<String, CommandError> {
        let call = self.describes.fetch_add(1, Ordering::SeqCst);
        if self.fail_describe.load(Ordering::SeqCst) {
            return Err(failed("git show-branch", "fatal: bad sha1 reference"));
        }
        if self.flaky_describe.load(Ordering::SeqCst) {
            match call {
                0 => {
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    return Err(failed("git show-branch", "fatal: unable to read tree"));
                }
                1 => tokio::time::sleep(Duration::from_millis(300)).await,
                _ => {}
            }
        }
        Ok(format!("[{commit}] Add feature"))
    }

    async fn config_value(
        &self,
        _repo: &Path,
        _work_tree: &Path,
        _key: &str,
    ) -> Result<Option<String>, CommandError> {
        Ok(self.targets.lock().unwrap().clone())
    }
}

/// Go toolchain whose `run` writes a placeholder artifact instead of compiling.
pub struct FakeToolchain {
    go: GoToolchain,
    pub runs: AtomicUsize,
    pub commands: Mutex<Vec<ToolCommand>>,
    /// Exit code every run reports, `None` for success.
    pub exit_code: Mutex<Option<i32>>,
    pub spawn_error: AtomicBool,
    /// When set, each run waits for a permit before doing anything.
    pub gate: Option<Arc<Semaphore>>,
}

impl FakeToolchain {
    pub fn new() -> Self {
        Self {
            go: GoToolchain::default(),
            runs: AtomicUsize::new(0),
            commands: Mutex::new(Vec::new()),
            exit_code: Mutex::new(None),
            spawn_error: AtomicBool::new(false),
            gate: None,
        }
    }

    pub fn failing(code: i32) -> Self {
        let toolchain = Self::new();
        *toolchain.exit_code.lock().unwrap() = Some(code);
        toolchain
    }

    pub fn gated(gate: Arc<Semaphore>) -> Self {
        Self {
            gate: Some(gate),
            ..Self::new()
        }
    }

    pub fn run_count(&self) -> usize {
        self.runs.load(Ordering::SeqCst)
    }

    pub fn commands(&self) -> Vec<ToolCommand> {
        self.commands.lock().unwrap().clone()
    }
}

#[async_trait]
impl Toolchain for FakeToolchain {
    fn command(&self, request: &BuildRequest) -> ToolCommand {
        self.go.command(request)
    }

    async fn run(&self, command: &ToolCommand) -> std::io::Result<CommandOutput> {
        if let Some(gate) = &self.gate {
            gate.acquire().await.expect("gate closed").forget();
        }
        self.runs.fetch_add(1, Ordering::SeqCst);
        self.commands.lock().unwrap().push(command.clone());

        if self.spawn_error.load(Ordering::SeqCst) {
            return Err(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "No such file or directory",
            ));
        }

        if let Some(code) = *self.exit_code.lock().unwrap() {
            return Ok(CommandOutput {
                code: Some(code),
                status: format!("exit status: {code}"),
                output: "./main.go:3:2: undefined: missing\n".to_string(),
            });
        }

        let output = command
            .args
            .iter()
            .position(|arg| arg == "-o")
            .and_then(|i| command.args.get(i + 1))
            .expect("go build always passes -o");
        std::fs::write(output, format!("artifact for {}\n", command))?;

        Ok(CommandOutput {
            code: Some(0),
            status: "exit status: 0".to_string(),
            output: String::new(),
        })
    }
}

pub struct Harness {
    pub ci: Ci,
    pub vcs: Arc<FakeVcs>,
    pub toolchain: Arc<FakeToolchain>,
    pub root: TempDir,
}

impl Harness {
    /// A projects root containing a `demo` clone.
    pub fn new(vcs: FakeVcs, toolchain: FakeToolchain) -> Self {
        let root = tempfile::tempdir().expect("Failed to create temp dir");
        std::fs::create_dir(root.path().join("demo.git")).expect("Failed to create clone dir");

        let vcs = Arc::new(vcs);
        let toolchain = Arc::new(toolchain);
        let ci = Ci::with_backends(
            CiConfig::new(root.path()),
            Arc::clone(&vcs) as Arc<dyn Vcs>,
            Arc::clone(&toolchain) as Arc<dyn Toolchain>,
        );
        Self {
            ci,
            vcs,
            toolchain,
            root,
        }
    }

    pub fn default_setup() -> Self {
        Self::new(FakeVcs::new(), FakeToolchain::new())
    }

    /// On-disk directory of the build for `commit` in project `demo`.
    pub fn build_dir(&self, commit: &str) -> std::path::PathBuf {
        self.root
            .path()
            .join("demo.git")
            .join(rocket_ci::config::BUILDS_DIR)
            .join(commit)
    }
}
