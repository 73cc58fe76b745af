//! Build toolchain invocation.
//!
//! A [`Toolchain`] turns a [`BuildRequest`] into a concrete [`ToolCommand`]
//! and runs it. Command derivation is pure so the environment for any target
//! can be inspected without a toolchain installed.

use std::fmt;
use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tracing::debug;

/// Everything the pipeline decided about one target build.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildRequest {
    /// Checked-out source tree.
    pub code_dir: PathBuf,
    /// Path of the artifact to produce.
    pub output: PathBuf,
    /// Target OS, empty for host default.
    pub os: String,
    /// Target architecture, empty for host default.
    pub arch: String,
    pub tags: Vec<String>,
    pub native_interop: bool,
    /// Cross compiler for native-interop builds, when one is needed.
    pub compiler: Option<String>,
}

/// A fully specified external command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolCommand {
    pub program: String,
    pub args: Vec<String>,
    pub dir: PathBuf,
    /// Overrides applied on top of the inherited environment.
    pub env: Vec<(String, String)>,
}

impl ToolCommand {
    pub fn env_value(&self, key: &str) -> Option<&str> {
        self.env
            .iter()
            .rev()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

fn quote(arg: &str) -> String {
    if arg.is_empty() || arg.contains(char::is_whitespace) {
        format!("'{arg}'")
    } else {
        arg.to_string()
    }
}

impl fmt::Display for ToolCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (key, value) in &self.env {
            write!(f, "{key}={} ", quote(value))?;
        }
        f.write_str(&quote(&self.program))?;
        for arg in &self.args {
            write!(f, " {}", quote(arg))?;
        }
        Ok(())
    }
}

/// Result of a command that ran to completion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code, `None` when killed by a signal.
    pub code: Option<i32>,
    /// Human-readable exit status, e.g. `exit status: 2`.
    pub status: String,
    /// Standard output and standard error, interleaved by line.
    pub output: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

#[async_trait]
pub trait Toolchain: Send + Sync {
    fn command(&self, request: &BuildRequest) -> ToolCommand;

    /// Run `command`. An `Err` means the process could not be run at all;
    /// a non-zero exit is reported through [`CommandOutput::code`].
    async fn run(&self, command: &ToolCommand) -> std::io::Result<CommandOutput> {
        run_combined(command).await
    }
}

/// Spawn `command`, collecting stdout and stderr into one buffer in arrival order.
pub async fn run_combined(command: &ToolCommand) -> std::io::Result<CommandOutput> {
    debug!(dir = %command.dir.display(), %command, "running toolchain");

    let mut child = Command::new(&command.program)
        .args(&command.args)
        .envs(command.env.iter().map(|(k, v)| (k, v)))
        .current_dir(&command.dir)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()?;

    let stdout = child.stdout.take().map(|s| BufReader::new(s).lines());
    let stderr = child.stderr.take().map(|s| BufReader::new(s).lines());
    let (Some(mut stdout), Some(mut stderr)) = (stdout, stderr) else {
        return Err(std::io::Error::other("child output was not captured"));
    };

    let mut output = String::new();
    let (mut out_open, mut err_open) = (true, true);
    while out_open || err_open {
        tokio::select! {
            line = stdout.next_line(), if out_open => match line? {
                Some(line) => { output.push_str(&line); output.push('\n'); }
                None => out_open = false,
            },
            line = stderr.next_line(), if err_open => match line? {
                Some(line) => { output.push_str(&line); output.push('\n'); }
                None => err_open = false,
            },
        }
    }

    let status = child.wait().await?;
    Ok(CommandOutput {
        code: status.code(),
        status: status.to_string(),
        output,
    })
}

/// The Go toolchain: `go build` with `GOOS`/`GOARCH`/cgo environment.
#[derive(Debug, Clone)]
pub struct GoToolchain {
    program: String,
}

impl GoToolchain {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl Default for GoToolchain {
    fn default() -> Self {
        Self::new("go")
    }
}

#[async_trait]
impl Toolchain for GoToolchain {
    fn command(&self, request: &BuildRequest) -> ToolCommand {
        let mut env = Vec::new();
        if !request.os.is_empty() {
            env.push(("GOOS".to_string(), request.os.clone()));
        }
        if !request.arch.is_empty() {
            env.push(("GOARCH".to_string(), request.arch.clone()));
        }
        if request.native_interop {
            env.push(("CGO_ENABLED".to_string(), "1".to_string()));
            if let Some(cc) = &request.compiler {
                env.push(("CC".to_string(), cc.clone()));
            }
        } else {
            env.push(("CGO_ENABLED".to_string(), "0".to_string()));
        }

        ToolCommand {
            program: self.program.clone(),
            args: vec![
                "build".to_string(),
                "-o".to_string(),
                request.output.to_string_lossy().into_owned(),
                "-tags".to_string(),
                request.tags.join(","),
            ],
            dir: request.code_dir.clone(),
            env,
        }
    }
}
