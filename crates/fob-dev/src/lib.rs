//! Fob dev server - HMR serving, Node worker supervision and build event
//! coordination.
//!
//! # Architecture
//!
//! - [`coordinator`] - Turns build pipeline events into server and worker actions
//! - [`hmr`] - HMR server: WebSocket clients, HTTP routes, pending-request queue
//! - [`server`] - axum server for the build output, sources and HMR
//! - [`runner`] - Supervised Node worker that live-patches or restarts
//! - [`registry`] - One server per port, one runner per build instance
//! - [`config`] - Options loaded from defaults, `fob.dev.json` and the environment
//! - [`error`] - Error types with actionable hints
//! - [`logger`] - Structured logging with tracing
//!
//! # Example
//!
//! ```rust,no_run
//! use fob_dev::{BuildEventCoordinator, DevOptions, DevServerRegistry, logger};
//! use std::path::Path;
//! use std::sync::Arc;
//!
//! # async fn run() -> fob_dev::error::Result<()> {
//! logger::init_logger(false, false, false);
//! let options = DevOptions::load(Path::new("."), None)?;
//! let coordinator = BuildEventCoordinator::new(options, Arc::new(DevServerRegistry::new()));
//! // Forward every pipeline event to `coordinator.report(&event).await?`
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod coordinator;
pub mod error;
pub mod events;
pub mod hmr;
pub mod logger;
pub mod registry;
pub mod runner;
pub mod server;

pub use config::DevOptions;
pub use coordinator::BuildEventCoordinator;
pub use error::{ConfigError, DevError, Result};
pub use events::{BuildEvent, BuildProgress, GraphSnapshot};
pub use hmr::{HmrServer, HmrServerOptions};
pub use registry::DevServerRegistry;
pub use runner::{NodeRunner, NodeRunnerOptions, WorkerPolicy, WorkerState};
pub use server::{BuildStatus, DevServer, ServerConfig, ServerKind};
