use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The lifecycle state of a build.
///
/// - `NotStarted`: Build exists but nothing has run yet
/// - `InProgress`: The pipeline task is running
/// - `Finished`: Every target built, artifacts are servable
/// - `Failed`: Something went wrong, see the build log
///
/// Status only ever moves forward; `Finished` and `Failed` are terminal.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum BuildStatus {
    #[serde(rename = "Not started")]
    NotStarted,
    #[serde(rename = "In progress")]
    InProgress,
    Finished,
    Failed,
}

impl BuildStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Finished | Self::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotStarted => "Not started",
            Self::InProgress => "In progress",
            Self::Finished => "Finished",
            Self::Failed => "Failed",
        }
    }

    pub(crate) fn as_u8(self) -> u8 {
        match self {
            Self::NotStarted => 0,
            Self::InProgress => 1,
            Self::Finished => 2,
            Self::Failed => 3,
        }
    }

    pub(crate) fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::NotStarted,
            1 => Self::InProgress,
            2 => Self::Finished,
            _ => Self::Failed,
        }
    }
}

impl std::fmt::Display for BuildStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Point-in-time snapshot of a build.
///
/// `build_log` is only present once the build reached a terminal status.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BuildSummary {
    #[serde(rename = "projectName")]
    pub project_name: String,
    #[serde(rename = "projectURL")]
    pub project_url: String,
    #[serde(rename = "commit")]
    pub commit_id: String,
    #[serde(rename = "commitSummary")]
    pub commit_summary: String,
    pub status: BuildStatus,
    #[serde(rename = "buildLog", default, skip_serializing_if = "Option::is_none")]
    pub build_log: Option<String>,
    #[serde(rename = "startedAt", default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(rename = "finishedAt", default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}
