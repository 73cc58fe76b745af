use std::path::{Component, PathBuf};
use std::sync::Arc;

use axum::{
    extract::{FromRequest, Multipart, Path, Request, State},
    http::{header, StatusCode, Uri},
    response::{IntoResponse, Response},
    Form, Json,
};
use serde::{Deserialize, Serialize};
use tower::ServiceExt;
use tower_http::services::ServeFile;

use crate::ci::{Build, Ci, Project};
use crate::models::BuildStatus;

// ============================================================
// Error Handling
// ============================================================

type ApiError = (StatusCode, String);

/// Log why a lookup failed and answer 404.
///
/// Unknown projects, unknown references and build setup failures all look
/// the same to the client; the reason only goes to the server log.
fn not_found(e: impl std::fmt::Display) -> ApiError {
    tracing::warn!("Not found: {}", e);
    (StatusCode::NOT_FOUND, "Not found".to_string())
}

fn plain_not_found() -> ApiError {
    (StatusCode::NOT_FOUND, "Not found".to_string())
}

// ============================================================
// Boundary validation
// ============================================================

fn valid_project_name(name: &str) -> bool {
    !name.is_empty() && !name.starts_with('.')
}

fn valid_reference(reference: &str) -> bool {
    !reference.is_empty() && !reference.starts_with('-')
}

/// Relative artifact path, or `None` if it could escape the files directory.
fn artifact_path(path: &str) -> Option<PathBuf> {
    let path = std::path::Path::new(path);
    let mut clean = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Normal(part) => clean.push(part),
            Component::CurDir => {}
            _ => return None,
        }
    }
    (!clean.as_os_str().is_empty()).then_some(clean)
}

/// `uri` with its reference segment (the second one) replaced by `commit`.
fn canonical_location(uri: &Uri, commit: &str) -> String {
    let mut segments: Vec<&str> = uri.path().splitn(4, '/').collect();
    if segments.len() >= 3 {
        segments[2] = commit;
    }
    let mut location = segments.join("/");
    if let Some(query) = uri.query() {
        location.push('?');
        location.push_str(query);
    }
    location
}

fn redirect(status: StatusCode, location: String) -> Response {
    (status, [(header::LOCATION, location)]).into_response()
}

async fn open_project(ci: &Ci, name: &str) -> Result<Arc<Project>, ApiError> {
    if !valid_project_name(name) {
        return Err(plain_not_found());
    }
    ci.project(name).await.map_err(not_found)
}

/// Either the build for a reference, or a redirect to its canonical URL.
enum Lookup {
    Build(Arc<Build>),
    Moved(Response),
}

/// Resolve `reference` and start its build.
///
/// A full or over-long commit id is answered with a redirect to the
/// canonical short id, so every commit has one URL.
async fn lookup_build(
    ci: &Ci,
    project: &str,
    reference: &str,
    uri: &Uri,
) -> Result<Lookup, ApiError> {
    let project = open_project(ci, project).await?;
    if !valid_reference(reference) {
        return Err(plain_not_found());
    }

    let resolved = project.resolve(reference).await.map_err(not_found)?;
    if resolved.immutable && resolved.id != reference {
        let location = canonical_location(uri, &resolved.id);
        return Ok(Lookup::Moved(redirect(StatusCode::TEMPORARY_REDIRECT, location)));
    }

    let build = project.get_build(&resolved.id).await.map_err(not_found)?;
    build.start_build();
    Ok(Lookup::Build(build))
}

// ============================================================
// Projects
// ============================================================

pub async fn project_root(
    State(ci): State<Ci>,
    Path(project): Path<String>,
    uri: Uri,
) -> Result<Response, ApiError> {
    open_project(&ci, &project).await?;

    let mut location = format!(
        "{}/{}",
        uri.path().trim_end_matches('/'),
        ci.config().default_branch
    );
    if let Some(query) = uri.query() {
        location.push('?');
        location.push_str(query);
    }
    Ok(redirect(StatusCode::MOVED_PERMANENTLY, location))
}

// ============================================================
// Webhook
// ============================================================

/// Push notification body. Only the commit the push moved to matters.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WebhookPayload {
    #[serde(default, alias = "After")]
    pub after: String,
}

async fn webhook_payload(request: Request) -> Result<WebhookPayload, ApiError> {
    let content_type = request
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(';').next())
        .map(|value| value.trim().to_ascii_lowercase());

    match content_type.as_deref() {
        Some("application/json") => Json::<WebhookPayload>::from_request(request, &())
            .await
            .map(|Json(payload)| payload)
            .map_err(|e| (StatusCode::BAD_REQUEST, e.body_text())),
        Some("application/x-www-form-urlencoded") => {
            Form::<WebhookPayload>::from_request(request, &())
                .await
                .map(|Form(payload)| payload)
                .map_err(|e| (StatusCode::BAD_REQUEST, e.body_text()))
        }
        Some("multipart/form-data") => multipart_payload(request).await,
        _ => Err((
            StatusCode::UNSUPPORTED_MEDIA_TYPE,
            "Expected a JSON or form body".to_string(),
        )),
    }
}

/// First `after` field of a multipart form. Other fields are skipped.
async fn multipart_payload(request: Request) -> Result<WebhookPayload, ApiError> {
    let mut multipart = Multipart::from_request(request, &())
        .await
        .map_err(|e| (StatusCode::BAD_REQUEST, e.body_text()))?;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| (StatusCode::BAD_REQUEST, e.body_text()))?
    {
        if matches!(field.name(), Some("after" | "After")) {
            let after = field
                .text()
                .await
                .map_err(|e| (StatusCode::BAD_REQUEST, e.body_text()))?;
            return Ok(WebhookPayload { after });
        }
    }
    Ok(WebhookPayload::default())
}

pub async fn webhook(
    State(ci): State<Ci>,
    Path(project): Path<String>,
    request: Request,
) -> Result<Response, ApiError> {
    let project = open_project(&ci, &project).await?;
    let payload = webhook_payload(request).await?;

    if !valid_reference(&payload.after) {
        tracing::debug!(project = %project.name, "webhook without usable reference ignored");
        return Ok(StatusCode::NO_CONTENT.into_response());
    }

    let resolved = project.resolve(&payload.after).await.map_err(not_found)?;
    let build = project.get_build(&resolved.id).await.map_err(not_found)?;
    if build.start_build() {
        tracing::info!(project = %project.name, commit = %resolved.id, "build triggered by webhook");
    }
    Ok((StatusCode::ACCEPTED, Json(build.summary())).into_response())
}

// ============================================================
// Builds
// ============================================================

pub async fn build_status(
    State(ci): State<Ci>,
    Path((project, reference)): Path<(String, String)>,
    uri: Uri,
) -> Result<Response, ApiError> {
    match lookup_build(&ci, &project, &reference, &uri).await? {
        Lookup::Moved(response) => Ok(response),
        Lookup::Build(build) => Ok(Json(build.summary()).into_response()),
    }
}

pub async fn list_files(
    State(ci): State<Ci>,
    Path((project, reference)): Path<(String, String)>,
    uri: Uri,
) -> Result<Response, ApiError> {
    let build = match lookup_build(&ci, &project, &reference, &uri).await? {
        Lookup::Moved(response) => return Ok(response),
        Lookup::Build(build) => build,
    };

    build
        .artifacts()
        .await
        .map_err(not_found)?
        .map(|names| Json(names).into_response())
        .ok_or_else(plain_not_found)
}

pub async fn serve_file(
    State(ci): State<Ci>,
    Path((project, reference, path)): Path<(String, String, String)>,
    request: Request,
) -> Result<Response, ApiError> {
    let uri = request.uri().clone();
    let build = match lookup_build(&ci, &project, &reference, &uri).await? {
        Lookup::Moved(response) => return Ok(response),
        Lookup::Build(build) => build,
    };

    if build.status() != BuildStatus::Finished {
        return Err(plain_not_found());
    }
    let relative = artifact_path(&path).ok_or_else(plain_not_found)?;

    let response = ServeFile::new(build.files_path().join(relative))
        .oneshot(request)
        .await
        .map(IntoResponse::into_response)
        .unwrap_or_else(|never| match never {});
    Ok(response)
}
