//! Unified intelligence search service.
//!
//! Answers a query by fanning out to a local knowledge tier and every
//! healthy remote tool at once (see the `unified-search` crate), then keeps
//! what it found:
//!
//! - **storage**: results are deduplicated and written to a content store and
//!   an entity graph by a background worker
//! - **versioning**: explicit content versions with similarity-gated creation,
//!   diffs, rollback and retention
//! - **builder**: patterns, trends, cross-entity connections and quality
//!   scores over stored intelligence
//! - **server**: the `/unified-search` HTTP API over all of the above
//!
//! [`AppContext`] wires the pieces together from an [`IntelConfig`].

pub mod app_dirs;
pub mod builder;
pub mod config;
pub mod context;
pub mod error;
pub mod server;
pub mod storage;
pub mod versioning;

pub use builder::{IntelligenceBuilder, IntelligenceReport};
pub use config::IntelConfig;
pub use context::AppContext;
pub use error::{IntelError, Result};
pub use storage::{IntelligenceRecord, IntelligenceStorageManager, OperationId, OperationStatus};
pub use versioning::{Version, VersionHistoryManager, VersionOutcome};
