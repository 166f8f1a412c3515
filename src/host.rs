//! Host interface
//!
//! The narrow outward-facing surface: typed request handlers returning
//! `{ok, data | error}` responses plus an event-stream subscription. No
//! transport policy: a UI process, CLI, or test harness calls these
//! in-process and layers its own bridge on top.

pub mod api;
pub mod response;

pub use api::{HandlerRegistry, HostApi};
pub use response::ApiResponse;
