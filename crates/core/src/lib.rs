//! Core configuration and shared constants for the cinderbox sandbox broker.
//!
//! This crate defines the configuration model consumed by every other crate:
//! - Server bind address
//! - Registry persistence location
//! - Container image and execution limits
//! - Published-results location and TTL
//! - Reaper cadence and inactivity threshold
//! - Session-token signing configuration

pub mod apikey;
pub mod config;

pub use apikey::generate_api_key;
pub use config::AppConfig;

/// Directory inside every sandbox container where produced artifacts land.
pub const RESULTS_DIR: &str = "/app/results";

/// Fixed path the coordinator writes user code to before executing it.
pub const SCRIPT_PATH: &str = "/app/script.py";

/// Label applied to every container this broker creates, used to recognize
/// our containers among everything else the runtime hosts.
pub const CONTAINER_LABEL: &str = "cinderbox.sandbox";
