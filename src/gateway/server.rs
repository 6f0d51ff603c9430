//! HTTP server
//!
//! Thin marshalling layer: every handler checks its arguments, calls the
//! file bridge or an executor, and wraps the outcome in the JSON envelope.

use std::convert::Infallible;
use std::future::Future;
use std::sync::Arc;

use axum::{
    body::Body,
    extract::{multipart::Field, DefaultBodyLimit, Multipart, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Form, Router,
};
use futures_util::StreamExt;
use tempfile::TempPath;
use tokio::io::AsyncWriteExt;
use tokio_util::io::ReaderStream;
use tracing::{info, warn};

use super::types::*;
use crate::config::ServerConfig;
use crate::error::BridgeError;
use crate::exec::{CommandExecutor, StreamingExecutor};
use crate::sftp::{FileSystemBridge, Listing, NewItemKind};
use crate::ssh::Session;

/// Shared handler state
#[derive(Clone)]
pub struct AppState {
    pub session: Arc<Session>,
    pub files: Arc<FileSystemBridge>,
    pub commands: Arc<CommandExecutor>,
}

impl AppState {
    pub fn new(session: Arc<Session>) -> Self {
        Self {
            files: Arc::new(FileSystemBridge::new(session.clone())),
            commands: Arc::new(CommandExecutor::new(session.clone())),
            session,
        }
    }
}

/// Route table. `max_upload_bytes` caps every request body, uploads included.
pub fn router(state: AppState, max_upload_bytes: usize) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/ajax/list/", get(list_dir))
        .route("/ajax/file/", get(read_file))
        .route("/ajax/save/", post(save_file))
        .route("/ajax/delete/", post(delete_path))
        .route("/ajax/new_item/", post(new_item))
        .route("/ajax/upload/", post(upload))
        .route("/ajax/rename/", post(rename))
        .route("/ajax/sqlite/", get(sqlite_preview))
        .route("/download/", get(download))
        .route("/terminal/execute/", post(execute))
        .route("/terminal/stream/", post(stream_command))
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .with_state(state)
}

/// Bind and serve until `shutdown` resolves.
pub async fn serve(
    config: &ServerConfig,
    state: AppState,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> std::io::Result<()> {
    let app = router(state, config.max_upload_bytes);

    let listener = tokio::net::TcpListener::bind((config.bind.as_str(), config.port)).await?;
    info!("Server listening on http://{}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;

    info!("Server stopped");
    Ok(())
}

// ============================================================================
// Handlers
// ============================================================================

async fn health(State(state): State<AppState>) -> ApiOk<HealthStatus> {
    ApiOk(HealthStatus {
        connected: state.session.is_connected(),
        session: state.session.state(),
    })
}

async fn list_dir(
    State(state): State<AppState>,
    Query(query): Query<PathQuery>,
) -> ApiResult<Listing> {
    let path = query.path.unwrap_or_else(|| "/".to_string());
    Ok(ApiOk(state.files.list(&path).await?))
}

async fn read_file(
    State(state): State<AppState>,
    Query(query): Query<PathQuery>,
) -> ApiResult<FileContent> {
    let path = required(query.path, "No path provided")?;
    let content = state.files.read_text(&path).await?;
    Ok(ApiOk(FileContent { content }))
}

async fn save_file(
    State(state): State<AppState>,
    Form(form): Form<SaveForm>,
) -> ApiResult<MessageResponse> {
    let path = required(form.path, "No path provided")?;
    state.files.write_text(&path, &form.content).await?;
    Ok(ApiOk(MessageResponse::new("File saved")))
}

async fn delete_path(
    State(state): State<AppState>,
    Form(form): Form<PathForm>,
) -> ApiResult<MessageResponse> {
    let path = required(form.path, "No path provided")?;
    state.files.delete(&path).await?;
    Ok(ApiOk(MessageResponse::new("Deleted")))
}

async fn new_item(
    State(state): State<AppState>,
    Form(form): Form<NewItemForm>,
) -> ApiResult<MessageResponse> {
    let parent = required(form.parent_path, "Missing parameters")?;
    let name = required(form.name, "Missing parameters")?;

    state.files.create_entry(&parent, &name, form.kind).await?;
    let message = match form.kind {
        NewItemKind::File => "File created",
        NewItemKind::Folder => "Folder created",
    };
    Ok(ApiOk(MessageResponse::new(message)))
}

async fn upload(State(state): State<AppState>, mut multipart: Multipart) -> ApiResult<MessageResponse> {
    let mut parent = None;
    let mut staged: Option<(TempPath, String)> = None;

    while let Some(mut field) = multipart.next_field().await.map_err(bad_upload)? {
        let name = field.name().map(str::to_owned);
        let file_name = field.file_name().map(str::to_owned);

        match (name.as_deref(), file_name) {
            (Some("parent_path"), _) => parent = Some(field.text().await.map_err(bad_upload)?),
            // One file per request; later ones are ignored
            (_, Some(file_name)) if staged.is_none() => {
                let local = stage_upload(&mut field).await?;
                staged = Some((local, file_name));
            }
            _ => {}
        }
    }

    let parent = required(parent, "No parent path provided")?;
    let Some((local, file_name)) = staged else {
        return Err(ApiError(BridgeError::invalid("No file provided")));
    };

    state.files.upload(&parent, local, &file_name).await?;
    Ok(ApiOk(MessageResponse::new("File uploaded")))
}

/// Spool one multipart field to a local temp file
async fn stage_upload(field: &mut Field<'_>) -> Result<TempPath, ApiError> {
    let staging = tempfile::Builder::new()
        .prefix("vps-explorer-upload-")
        .tempfile()
        .map_err(BridgeError::from)?;
    let (file, path) = staging.into_parts();
    let mut file = tokio::fs::File::from_std(file);

    while let Some(chunk) = field.chunk().await.map_err(bad_upload)? {
        file.write_all(&chunk).await.map_err(BridgeError::from)?;
    }
    file.flush().await.map_err(BridgeError::from)?;

    Ok(path)
}

fn bad_upload(err: axum::extract::multipart::MultipartError) -> ApiError {
    ApiError(BridgeError::invalid(format!("Invalid upload: {}", err)))
}

async fn rename(
    State(state): State<AppState>,
    Form(form): Form<RenameForm>,
) -> ApiResult<RenameResponse> {
    let old_path = required(form.old_path, "Missing parameters")?;
    let new_name = required(form.new_name, "Missing parameters")?;

    let new_path = state.files.rename(&old_path, &new_name).await?;
    Ok(ApiOk(RenameResponse {
        message: "Renamed successfully".to_string(),
        new_path,
    }))
}

async fn sqlite_preview(
    State(state): State<AppState>,
    Query(query): Query<PathQuery>,
) -> ApiResult<PreviewResponse> {
    let path = required(query.path, "No path provided")?;
    let data = state.files.preview_database(&path).await?;
    Ok(ApiOk(PreviewResponse { data }))
}

/// Raw bytes, not an envelope: failures are plain text with a real status code.
async fn download(State(state): State<AppState>, Query(query): Query<DownloadQuery>) -> Response {
    let inline = query.is_inline();
    let Some(path) = query.path.filter(|p| !p.is_empty()) else {
        return (StatusCode::BAD_REQUEST, "No path provided").into_response();
    };

    match send_artifact(&state, &path, inline).await {
        Ok(response) => response,
        Err(e) => {
            warn!("Download of {} failed: {}", path, e);
            let status = match e {
                BridgeError::InvalidArgument(_) => StatusCode::BAD_REQUEST,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            };
            (status, e.to_string()).into_response()
        }
    }
}

async fn send_artifact(state: &AppState, path: &str, inline: bool) -> Result<Response, BridgeError> {
    let artifact = state.files.download(path).await?;

    let file = tokio::fs::File::open(&artifact.local_file).await?;
    let length = file.metadata().await?.len();

    let content_type = if artifact.is_archive {
        "application/zip".to_string()
    } else {
        mime_guess::from_path(&artifact.suggested_name)
            .first_or_octet_stream()
            .to_string()
    };
    let disposition = content_disposition(&artifact.suggested_name, inline);

    // The staging file must outlive the body
    let staged = artifact.local_file;
    let body = Body::from_stream(ReaderStream::new(file).map(move |chunk| {
        let _staged = &staged;
        chunk
    }));

    Ok((
        [
            (header::CONTENT_TYPE, content_type),
            (header::CONTENT_LENGTH, length.to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        body,
    )
        .into_response())
}

/// `attachment`/`inline` disposition with an ASCII fallback name and, when the
/// real name is not plain ASCII, an RFC 5987 `filename*`.
fn content_disposition(name: &str, inline: bool) -> String {
    let kind = if inline { "inline" } else { "attachment" };
    let fallback: String = name
        .chars()
        .map(|c| {
            if (c.is_ascii_graphic() || c == ' ') && c != '"' && c != '\\' {
                c
            } else {
                '_'
            }
        })
        .collect();

    if fallback == name {
        format!("{}; filename=\"{}\"", kind, name)
    } else {
        format!(
            "{}; filename=\"{}\"; filename*=UTF-8''{}",
            kind,
            fallback,
            urlencoding::encode(name)
        )
    }
}

async fn execute(
    State(state): State<AppState>,
    Form(form): Form<CommandForm>,
) -> ApiResult<ExecuteResponse> {
    let command = required(form.command, "No command provided")?;
    let result = state.commands.run_once(&command, true).await?;
    Ok(ApiOk(ExecuteResponse {
        output: result.output_markup,
        exit_status: result.exit_status,
    }))
}

/// Chunked `text/html` body. Only a missing command or a disconnected session
/// gets the envelope; a refused channel and later failures arrive inline.
async fn stream_command(
    State(state): State<AppState>,
    Form(form): Form<CommandForm>,
) -> Result<Response, ApiError> {
    let command = required(form.command, "No command provided")?;
    let executor = StreamingExecutor::start(&state.session, &command).await?;
    info!("Streaming command: {}", command);

    let body = Body::from_stream(
        executor
            .into_stream()
            .map(|chunk| Ok::<_, Infallible>(chunk.markup)),
    );

    Ok((
        [
            (header::CONTENT_TYPE, "text/html; charset=utf-8"),
            (header::CACHE_CONTROL, "no-cache"),
        ],
        body,
    )
        .into_response())
}
