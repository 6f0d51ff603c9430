//! HTTP gateway
//!
//! Maps the browser-facing routes onto the file bridge and the command
//! executors of a single shared session.

mod server;
mod types;

pub use server::{router, serve, AppState};
pub use types::{ApiError, ApiOk, ApiResult};
