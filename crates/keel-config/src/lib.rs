//! # keel-config
//!
//! Project configuration for Keel, read from `.keel/keel.toml`.
//!
//! - [`KeelConfig`] covers the log location and rotation, retention,
//!   accepted schema majors, orphan grace period, and the handlers the
//!   router starts with.
//! - [`ConfigManager`] reloads the file and records every effective change
//!   as a `system.config_change` event, so configuration history replays
//!   like everything else.
//!
//! ## Quick Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use keel_config::{ConfigManager, KeelConfig};
//! use keel_router::EventRouter;
//!
//! let path = KeelConfig::path_for_project(".");
//! let manager = ConfigManager::open(&path).unwrap();
//! let config = manager.current();
//!
//! let router = Arc::new(EventRouter::new());
//! let handlers = config.install_handlers(&router).unwrap();
//! let writer = config.writer();
//! writer.add_observer(router.clone());
//!
//! // Later, after someone edits keel.toml:
//! if let Some(event) = manager.reload(&writer, "operator").unwrap() {
//!     println!("config changed: {}", event.payload["changed"]);
//! }
//! # handlers.flush().unwrap();
//! ```

pub mod config;
pub mod error;
pub mod handlers;
pub mod manager;

pub use config::{
    ActionsConfig, HandlerConfig, HandlerKind, KeelConfig, LogConfig, SchemaConfig, CONFIG_FILE,
    KEEL_DIR,
};
pub use error::ConfigError;
pub use handlers::InstalledHandlers;
pub use manager::{content_hash, ConfigManager};
