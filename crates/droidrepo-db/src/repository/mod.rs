//! Data access for repositories and their apps.
//!
//! Every function takes a `&mut SqliteConnection` so callers decide the transaction boundary.
//! Functions that open their own transaction run as a savepoint when called inside another one.

pub mod apps;
pub mod repos;

pub use apps::{AppStore, CompatibilityChecker};
pub use repos::RepositoryStore;
