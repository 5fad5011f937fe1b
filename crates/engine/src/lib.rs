//! Sandbox orchestration engine.
//!
//! The [`Coordinator`] owns per-sandbox locks and the in-memory install
//! table, routes execution and file operations to the container driver,
//! publishes produced artifacts, and keeps the registry's last-used clocks
//! current. The [`Reaper`] enforces inactivity teardown on a fixed cadence.
//! [`tools`] is the typed operation surface shared by REST and MCP.

pub mod coordinator;
pub mod error;
pub mod install;
pub mod locks;
pub mod reaper;
pub mod tools;

pub use coordinator::{Coordinator, ExecutionResult, InstallStart, TerminalResult};
pub use error::{EngineError, EngineResult};
pub use install::{InstallRecord, InstallState, InstallTable};
pub use locks::SandboxLocks;
pub use reaper::Reaper;
