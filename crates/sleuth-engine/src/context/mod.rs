//! Keeps the collaborator agent's working memory bounded.
//!
//! [`tokens`] prices each message, [`blocks`] groups messages into units
//! that are never split (a tool call travels with its replies), and
//! [`compaction`] folds the older blocks into one summary message once the
//! whole list outgrows its budget.

pub mod blocks;
pub mod compaction;
pub mod tokens;

pub use compaction::{CompactingAgent, CompactionConfig, Compactor};
pub use tokens::{EstimatingCounter, TokenCounter};
