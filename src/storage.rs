//! Persistence: storage engine and per-aggregate repositories
//!
//! One mutex-guarded SQLite connection, transactions with savepoint
//! nesting, and repositories exposing the dual method pattern: public
//! `async` methods own their transaction (wrapped by the operational
//! hook), `*_internal` methods run synchronously inside a caller's
//! transaction.

pub mod engine;
pub mod history_repo;
pub mod mapper;
pub mod monitor_repo;
pub mod schema;
pub mod settings_repo;
pub mod site_repo;

pub use engine::StorageEngine;
pub use history_repo::HistoryRepository;
pub use monitor_repo::MonitorRepository;
pub use schema::SCHEMA_VERSION;
pub use settings_repo::SettingsRepository;
pub use site_repo::SiteRepository;
