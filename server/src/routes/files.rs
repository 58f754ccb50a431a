//! Upload and tokenized download endpoints. Downloads are gated by the signed
//! token alone so generated links work from anywhere; uploads require the
//! bearer token like every other route.

use aidesk_core::CoreErr;
use aidesk_core::artifacts::ArtifactSource;
use aidesk_core::artifacts::NewArtifact;
use aidesk_protocol::FileDescriptor;
use axum::Json;
use axum::extract::Multipart;
use axum::extract::Path;
use axum::extract::Query;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::http::header;
use axum::response::IntoResponse;
use axum::response::Response;
use serde::Deserialize;

use crate::auth::authenticate;
use crate::error::ApiError;
use crate::state::AppState;

#[derive(Deserialize)]
pub struct DownloadQuery {
    token: String,
}

pub async fn upload_image(
    state: State<AppState>,
    headers: HeaderMap,
    multipart: Multipart,
) -> Result<Json<FileDescriptor>, ApiError> {
    upload(state, headers, multipart, "image").await
}

pub async fn upload_file(
    state: State<AppState>,
    headers: HeaderMap,
    multipart: Multipart,
) -> Result<Json<FileDescriptor>, ApiError> {
    upload(state, headers, multipart, "file").await
}

async fn upload(
    State(state): State<AppState>,
    headers: HeaderMap,
    mut multipart: Multipart,
    kind: &str,
) -> Result<Json<FileDescriptor>, ApiError> {
    let principal = authenticate(state.resolver.as_ref(), &headers).await?;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| CoreErr::Validation(format!("malformed multipart body: {e}")))?
    {
        if field.name() != Some("file") {
            continue;
        }
        let filename = field
            .file_name()
            .map(str::to_string)
            .ok_or_else(|| CoreErr::Validation("file part needs a filename".to_string()))?;
        let bytes = field
            .bytes()
            .await
            .map_err(|e| CoreErr::Validation(format!("failed to read upload: {e}")))?;

        let record = state
            .chat
            .artifacts
            .register(NewArtifact {
                kind: kind.to_string(),
                filename,
                source: ArtifactSource::Bytes(bytes.to_vec()),
                team_id: principal.team_id,
                project_id: None,
                session_id: None,
            })
            .await?;
        let url = state.chat.artifacts.download_url(&record);
        return Ok(Json(descriptor(record, Some(url))));
    }
    Err(CoreErr::Validation("multipart body had no `file` part".to_string()).into())
}

pub async fn download(
    State(state): State<AppState>,
    Path(file_id): Path<String>,
    Query(query): Query<DownloadQuery>,
) -> Result<Response, ApiError> {
    serve(&state, &file_id, &query.token, true).await
}

pub async fn preview(
    State(state): State<AppState>,
    Path(file_id): Path<String>,
    Query(query): Query<DownloadQuery>,
) -> Result<Response, ApiError> {
    serve(&state, &file_id, &query.token, false).await
}

async fn serve(
    state: &AppState,
    file_id: &str,
    token: &str,
    as_attachment: bool,
) -> Result<Response, ApiError> {
    let (path, content_type, filename) = state
        .chat
        .artifacts
        .resolve_for_download(file_id, token)
        .await?;
    let bytes = tokio::fs::read(&path)
        .await
        .map_err(|_| CoreErr::NotFound(file_id.to_string()))?;

    let disposition = if as_attachment {
        format!("attachment; filename=\"{}\"", filename.replace('"', ""))
    } else {
        "inline".to_string()
    };
    Ok((
        [
            (header::CONTENT_TYPE, content_type),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        bytes,
    )
        .into_response())
}

pub(super) fn descriptor(
    record: aidesk_core::store::FileRecord,
    url: Option<String>,
) -> FileDescriptor {
    FileDescriptor {
        file_id: record.file_id,
        kind: record.kind,
        filename: record.filename,
        content_type: record.content_type,
        size_bytes: record.size_bytes.max(0) as u64,
        created_at: record.created_at,
        url,
    }
}
