//! Published result files.
//!
//! Artifacts produced inside a sandbox are copied to
//! `{results_root}/{sandbox_id}/{relative_path}` on the host and served at
//! stable capability URLs. The directory tree is the index; per-file
//! creation time is the file's mtime.

pub mod error;
pub mod publisher;

pub use error::{PublishError, PublishResult};
pub use publisher::FilePublisher;
