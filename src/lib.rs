#![warn(clippy::pedantic)]
#![allow(clippy::missing_docs_in_private_items)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::cast_possible_truncation)]

//! Uptime Watcher core monitoring engine
//!
//! Schedules periodic health checks against user-configured endpoints,
//! executes them with bounded concurrency and deterministic retry/backoff,
//! persists results durably, and publishes typed state-change events.
//!
//! The engine is single-node, single-process, and authoritative for its
//! local store. Hosts (a UI process, a CLI, a test harness) talk to it
//! through [`host::HostApi`] and the public event stream; everything else
//! is internal.

pub mod cache;
pub mod checks;
pub mod config;
pub mod core;
pub mod events;
pub mod host;
pub mod managers;
pub mod ops;
pub mod orchestrator;
pub mod registry;
pub mod scheduler;
pub mod storage;
pub mod utils;

pub use config::EngineConfig;
pub use host::{ApiResponse, HostApi};
pub use orchestrator::{EngineBootstrap, UptimeOrchestrator};
pub use utils::{EngineError, EngineResult, ErrorCode};
