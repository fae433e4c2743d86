//! # MemoGarden Core
//!
//! A personal knowledge/activity substrate combining:
//! - An immutable, append-only fact store ("Soil") — notes, messages,
//!   tool calls, and the audit trail itself.
//! - A mutable, hash-chained entity store ("Core") — artifacts, labels,
//!   operators, agents, and a time-decaying relation graph between them.
//! - A context subsystem — per-owner LRU container windows, a scope
//!   state machine, and a view stream.
//! - An artifact delta engine — line-oriented edits with hash-based
//!   optimistic locking and commit history.
//! - A verb dispatcher and audit wrapper — one typed entry point per
//!   verb, every call bracketed by `Action`/`ActionResult` facts.
//!
//! ## Quick Start
//!
//! ```
//! use memogarden_core::{MemoGarden, MemoGardenConfig};
//! use memogarden_core::dispatcher::Op;
//! use memogarden_core::audit;
//!
//! let garden = MemoGarden::new(MemoGardenConfig::default());
//! garden.init();
//!
//! let envelope = audit::run(&garden, "alice", Op::Create {
//!     entity_type: "Entity".to_string(),
//!     data: None,
//! }, false);
//! assert!(envelope.ok);
//! ```
pub mod artifact;
pub mod audit;
pub mod config;
pub mod context;
pub mod core;
pub mod dispatcher;
pub mod entity;
pub mod error;
pub mod events;
pub mod search;
pub mod soil;
pub mod transaction;
pub mod uid;

#[cfg(feature = "http")]
pub mod http;

pub use audit::Envelope;
pub use config::MemoGardenConfig;
pub use core::MemoGarden;
pub use error::{CoreError, CoreResult, ErrorCode};

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::audit::{self, Envelope};
    pub use crate::config::MemoGardenConfig;
    pub use crate::core::MemoGarden;
    pub use crate::dispatcher::Op;
    pub use crate::error::{CoreError, CoreResult, ErrorCode};
}

/// Initialize the logging system.
///
/// Call once at startup. The log level is controlled via the
/// `MEMOGARDEN_LOG` environment variable (`error`, `warn`, `info`,
/// `debug`, `trace`); defaults to `info`.
pub fn init_logging() {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_env("MEMOGARDEN_LOG").unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();
}
