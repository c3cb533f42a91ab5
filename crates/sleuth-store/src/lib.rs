//! SQLite-backed round/session ledger and event log.

pub mod database;
pub mod error;
pub mod events;
pub mod ledger;
pub mod row_helpers;
pub mod rounds;
pub mod schema;
pub mod sessions;

pub use database::Database;
pub use error::StoreError;
pub use events::{EventRecorder, EventRepo, EventRow};
pub use ledger::Ledger;
pub use rounds::{NewRound, RoundRepo, RoundRow, StepRow};
pub use sessions::{SessionRepo, SessionRow};
