//! The build pipeline: recovery check, checkout, then each target in order.

use std::io::ErrorKind;
use std::sync::Arc;

use tracing::{info, warn};

use super::build::Build;
use super::targets::parse_targets;
use super::toolchain::BuildRequest;
use crate::error::PipelineError;
use crate::models::BuildStatus;

/// Run the whole pipeline for `build` and publish its outcome.
pub(crate) async fn run(build: Arc<Build>) {
    let mut log = String::new();

    let status = match execute(&build, &mut log).await {
        Ok(status) => status,
        Err(e) => {
            warn!(
                project = %build.project().name,
                commit = %build.commit(),
                error = %e,
                "build failed"
            );
            if !log.is_empty() && !log.ends_with('\n') {
                log.push('\n');
            }
            log.push_str(&e.to_string());
            log.push('\n');
            BuildStatus::Failed
        }
    };

    if status == BuildStatus::Failed {
        match tokio::fs::remove_dir_all(build.files_path()).await {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => warn!(
                path = %build.files_path().display(),
                error = %e,
                "failed to remove artifacts of failed build"
            ),
        }
    }

    info!(project = %build.project().name, commit = %build.commit(), %status, "build done");
    build.finish(status, log);
}

async fn execute(build: &Build, log: &mut String) -> Result<BuildStatus, PipelineError> {
    if let Some(status) = recover(build).await? {
        info!(
            project = %build.project().name,
            commit = %build.commit(),
            %status,
            "recovered build from an earlier run"
        );
        log.push_str(&format!(
            "build directory already present, recovered status: {status}\n"
        ));
        return Ok(status);
    }

    let project = build.project();
    let vcs = project.vcs();
    let code = build.code_path();

    vcs.checkout_detached(project.path(), code, build.commit())
        .await
        .map_err(PipelineError::Vcs)?;
    vcs.reset_hard(project.path(), code, build.commit())
        .await
        .map_err(PipelineError::Vcs)?;

    let matrix = vcs
        .config_value(project.path(), code, project.targets_key())
        .await
        .map_err(PipelineError::Vcs)?
        .unwrap_or_default();
    let targets = parse_targets(&matrix)?;

    let toolchain = project.toolchain();
    for target in &targets {
        let request = BuildRequest {
            code_dir: code.to_path_buf(),
            output: build.files_path().join(target.artifact_name(&project.name)),
            os: target.os.clone(),
            arch: target.arch.clone(),
            tags: target.tags.clone(),
            native_interop: target.native_interop,
            compiler: target.interop_compiler()?,
        };
        let command = toolchain.command(&request);

        info!(project = %project.name, commit = %build.commit(), %target, "building target");
        log.push_str(&command.to_string());
        log.push('\n');

        let output = toolchain
            .run(&command)
            .await
            .map_err(|e| PipelineError::system(format!("failed to run {}", command.program), e))?;
        log.push_str(&output.output);

        if !output.success() {
            return Err(PipelineError::Toolchain {
                command: command.to_string(),
                status: output.status,
            });
        }
    }

    Ok(BuildStatus::Finished)
}

/// Decide from the build directories whether an earlier run got here first.
///
/// Creates `code/` and `files/`. When `code/` already existed the earlier
/// run is trusted: `Finished` if `files/` also existed, `Failed` otherwise.
/// Stale state is never rebuilt.
async fn recover(build: &Build) -> Result<Option<BuildStatus>, PipelineError> {
    let code = tokio::fs::create_dir(build.code_path()).await;
    let files = tokio::fs::create_dir(build.files_path()).await;

    match (code, files) {
        (Err(e), files) if e.kind() == ErrorKind::AlreadyExists => {
            let status = match files {
                Err(e) if e.kind() == ErrorKind::AlreadyExists => BuildStatus::Finished,
                _ => BuildStatus::Failed,
            };
            Ok(Some(status))
        }
        (Err(e), _) => Err(PipelineError::system(
            format!("cannot create {}", build.code_path().display()),
            e,
        )),
        (Ok(()), Err(e)) => Err(PipelineError::system(
            format!("cannot create {}", build.files_path().display()),
            e,
        )),
        (Ok(()), Ok(())) => Ok(None),
    }
}
