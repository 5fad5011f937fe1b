//! HTTP handlers.

pub mod auth;
pub mod files;
pub mod sandboxes;

pub use auth::{get_api_key, login, me, regenerate_api_key, register};
pub use files::get_sandbox_file;
pub use sandboxes::{create_sandbox, delete_sandbox, list_sandboxes};
