//! pingwarden - LAN presence monitor
//!
//! Continuously discovers hosts on a local network, detects presence and
//! identity transitions, and fans out notifications.
//!
//! # Architecture
//!
//! The library is organized into several modules:
//!
//! - [`config`] - Process configuration and store-backed runtime settings
//! - [`scanner`] - Target resolution, neighbor snapshots and host probing
//! - [`detector`] - Transition classification and host-record merging
//! - [`notify`] - Notification events, dispatch, and delivery channels
//! - [`scheduler`] - Background scan and DNS-ingestion loops
//! - [`ingest`] - AdGuard Home query-log ingestion and burst detection
//! - [`ratelimit`] - Per-client token-bucket rate limiting
//! - [`store`] - Persistent storage behind the `Store` trait
//! - [`vendor`] - MAC vendor lookup from a local OUI file
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use pingwarden::config::Config;
//! use pingwarden::notify::NotificationDispatcher;
//! use pingwarden::scanner::SystemNeighborTable;
//! use pingwarden::scheduler::{ScanScheduler, SchedulerContext};
//! use pingwarden::store::SqliteStore;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::from_env()?;
//!     let store = Arc::new(SqliteStore::open(&config.database.sqlite_path)?);
//!     let scheduler = ScanScheduler::new(
//!         SchedulerContext {
//!             store,
//!             neighbors: Arc::new(SystemNeighborTable::new()),
//!             dispatcher: Arc::new(NotificationDispatcher::default()),
//!             targets_spec: config.scan.targets.clone(),
//!         },
//!         config.join_timeout(),
//!     );
//!     scheduler.start();
//!     // ... run until shutdown, then:
//!     scheduler.stop().await;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod detector;
pub mod error;
pub mod ingest;
pub mod models;
pub mod notify;
pub mod ratelimit;
pub mod scanner;
pub mod scheduler;
pub mod store;
pub mod vendor;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::{Config, Settings};
    pub use crate::error::{Error, Result};
    pub use crate::models::{HostRecord, HostStatus, ProbeResult, ScanRun, ScanStats};
    pub use crate::notify::{EventKind, NotificationDispatcher, TransitionEvent};
    pub use crate::scheduler::{ScanScheduler, SchedulerContext};
    pub use crate::store::{SqliteStore, Store};
}

// Direct re-exports for convenience
pub use error::{Error, Result};
pub use models::{HostRecord, HostStatus, ProbeResult, ScanStats};
