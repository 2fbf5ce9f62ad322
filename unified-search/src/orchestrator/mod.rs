//! Search orchestrator: cache, concurrent local/remote fan-out, merge, rank.
//!
//! [`SearchOrchestrator`] is the entry point. [`merge`] holds the hash-keyed
//! dedup and ranking used both per query and by [`SearchResults::merge_with`].
//!
//! [`SearchResults::merge_with`]: crate::types::SearchResults::merge_with

pub mod merge;
pub mod search;

pub use search::{ResultSink, SearchMode, SearchOrchestrator};
