//! Target matrix parsing and per-target naming.
//!
//! A project's matrix is one config string of space-separated descriptors:
//!
//! ```text
//! linux:amd64 windows:amd64(prod) linux:arm64(native-interop,prod)
//! ```
//!
//! An empty string means a single host-native build.

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use thiserror::Error;

/// Tag that switches a target to a native-interop build instead of being passed through.
pub const NATIVE_INTEROP_TAG: &str = "native-interop";

static TARGET_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\w+):(\w+)(?:\(([\w-]+(?:,[\w-]+)*)\))?$").expect("valid regex")
});

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TargetError {
    #[error("invalid target {0:?}")]
    InvalidTarget(String),

    #[error("unknown OS {0:?} for native-interop build")]
    UnsupportedOs(String),

    #[error("unknown architecture {0:?} for native-interop build")]
    UnsupportedArch(String),
}

/// One cross-compilation configuration. Empty `os`/`arch` mean host default.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Target {
    pub os: String,
    pub arch: String,
    pub tags: Vec<String>,
    pub native_interop: bool,
}

impl Target {
    /// Artifact file name for `project` built for this target.
    pub fn artifact_name(&self, project: &str) -> String {
        let mut name = project.to_string();
        for part in [&self.os, &self.arch] {
            if !part.is_empty() {
                name.push('-');
                name.push_str(part);
            }
        }
        if !self.tags.is_empty() {
            name.push('-');
            name.push_str(&self.tags.join("-"));
        }
        if self.os == "windows" {
            name.push_str(".exe");
        }
        name
    }

    /// Cross compiler for a native-interop build, e.g. `x86_64-w64-mingw32-gcc`.
    ///
    /// `None` when interop is off or when OS or architecture is the host default.
    pub fn interop_compiler(&self) -> Result<Option<String>, TargetError> {
        if !self.native_interop {
            return Ok(None);
        }

        let arch = match self.arch.as_str() {
            "" => None,
            "amd64" => Some("x86_64"),
            "386" => Some("i686"),
            "arm64" => Some("aarch64"),
            other => return Err(TargetError::UnsupportedArch(other.to_string())),
        };

        let os = match self.os.as_str() {
            "" => None,
            "linux" => Some("unknown-linux-gnu"),
            "windows" => Some("w64-mingw32"),
            other => return Err(TargetError::UnsupportedOs(other.to_string())),
        };

        Ok(arch.zip(os).map(|(arch, os)| format!("{arch}-{os}-gcc")))
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let os = if self.os.is_empty() { "host" } else { &self.os };
        let arch = if self.arch.is_empty() { "host" } else { &self.arch };
        write!(f, "{os}/{arch}")?;
        if !self.tags.is_empty() {
            write!(f, "({})", self.tags.join(","))?;
        }
        if self.native_interop {
            f.write_str(" [native-interop]")?;
        }
        Ok(())
    }
}

/// Parse a target matrix. Never returns an empty list.
pub fn parse_targets(config: &str) -> Result<Vec<Target>, TargetError> {
    let config = config.trim();
    if config.is_empty() {
        return Ok(vec![Target::default()]);
    }

    config.split_whitespace().map(parse_target).collect()
}

fn parse_target(token: &str) -> Result<Target, TargetError> {
    let caps = TARGET_RE
        .captures(token)
        .ok_or_else(|| TargetError::InvalidTarget(token.to_string()))?;

    let mut target = Target {
        os: caps[1].to_string(),
        arch: caps[2].to_string(),
        ..Target::default()
    };

    if let Some(tags) = caps.get(3) {
        for tag in tags.as_str().split(',') {
            if tag == NATIVE_INTEROP_TAG {
                target.native_interop = true;
            } else if !target.tags.iter().any(|t| t == tag) {
                target.tags.push(tag.to_string());
            }
        }
    }

    Ok(target)
}
