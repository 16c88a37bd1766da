//! DepSentry - Dependency Freshness Mirror
//!
//! DepSentry periodically mirrors an organization's repositories and their
//! declared package dependencies into a local store, annotating each
//! dependency with whether it is outdated relative to the latest published
//! release.
//!
//! ## Core Features
//!
//! - **Activity gating**: repositories without recent commits are skipped
//!   to stay within upstream API rate limits
//! - **Fault isolation**: one repository or dependency failing never halts
//!   a pass
//! - **Idempotent reconciliation**: every create-or-update is safe to
//!   repeat; the next scheduled pass is the retry mechanism
//! - **Configuration Management**: YAML-based configuration with XDG
//!   compliance
//!
//! ## Modules
//!
//! - [`config`]: Configuration management and parsing
//! - [`sync`]: The synchronization engine (gating, reconciliation)
//! - [`store`]: Durable store interface and SQLite backend

pub mod config;
pub mod daemon;
pub mod error;
pub mod github;
pub mod manifest;
pub mod registry;
pub mod store;
pub mod sync;

pub use config::Config;
pub use daemon::Daemon;
pub use error::SyncError;
pub use github::HostingClient;
pub use registry::RegistryClient;
pub use store::{SqliteStore, Store};
pub use sync::{PassSummary, SyncEngine};
