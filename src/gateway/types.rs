//! Request and response records for the HTTP gateway
//!
//! Every envelope endpoint answers HTTP 200 with either
//! `{"status": "ok", ...}` or `{"status": "error", "message": ...}`.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::error::BridgeError;
use crate::sftp::{DatabasePreview, NewItemKind};
use crate::ssh::SessionState;

// ============================================================================
// Requests
// ============================================================================

/// `?path=` on read-only endpoints
#[derive(Debug, Default, Deserialize)]
pub struct PathQuery {
    pub path: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct DownloadQuery {
    pub path: Option<String>,
    pub inline: Option<String>,
}

impl DownloadQuery {
    pub fn is_inline(&self) -> bool {
        self.inline.as_deref() == Some("1")
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct SaveForm {
    pub path: Option<String>,
    /// An absent body saves an empty file
    #[serde(default)]
    pub content: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct PathForm {
    pub path: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct NewItemForm {
    pub parent_path: Option<String>,
    pub name: Option<String>,
    #[serde(rename = "type", default = "default_item_kind")]
    pub kind: NewItemKind,
}

fn default_item_kind() -> NewItemKind {
    NewItemKind::File
}

#[derive(Debug, Default, Deserialize)]
pub struct RenameForm {
    pub old_path: Option<String>,
    pub new_name: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct CommandForm {
    pub command: Option<String>,
}

/// Take a required argument, treating an empty value as missing.
pub fn required(value: Option<String>, message: &str) -> Result<String, ApiError> {
    match value {
        Some(v) if !v.is_empty() => Ok(v),
        _ => Err(ApiError(BridgeError::invalid(message))),
    }
}

// ============================================================================
// Responses
// ============================================================================

#[derive(Debug, Serialize)]
struct Envelope<T> {
    status: &'static str,
    #[serde(flatten)]
    body: T,
}

/// Successful envelope around a response record
pub struct ApiOk<T>(pub T);

impl<T: Serialize> IntoResponse for ApiOk<T> {
    fn into_response(self) -> Response {
        Json(Envelope {
            status: "ok",
            body: self.0,
        })
        .into_response()
    }
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    message: String,
}

/// Error envelope. Still HTTP 200: the browser reads `status`, not the code.
#[derive(Debug)]
pub struct ApiError(pub BridgeError);

impl From<BridgeError> for ApiError {
    fn from(err: BridgeError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Envelope {
            status: "error",
            body: ErrorBody {
                message: self.0.to_string(),
            },
        };
        (StatusCode::OK, Json(body)).into_response()
    }
}

pub type ApiResult<T> = Result<ApiOk<T>, ApiError>;

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: String,
}

impl MessageResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct FileContent {
    pub content: String,
}

#[derive(Debug, Serialize)]
pub struct RenameResponse {
    pub message: String,
    pub new_path: String,
}

#[derive(Debug, Serialize)]
pub struct ExecuteResponse {
    pub output: String,
    pub exit_status: Option<u32>,
}

#[derive(Debug, Serialize)]
pub struct PreviewResponse {
    pub data: DatabasePreview,
}

#[derive(Debug, Serialize)]
pub struct HealthStatus {
    pub connected: bool,
    pub session: SessionState,
}
