//! SQLite persistence for droidrepo.
//!
//! Repositories, their preferences and sub-collections, apps, versions and localized files are
//! stored with diesel. The data access types ([`RepositoryStore`], [`AppStore`]) work on a plain
//! `&mut SqliteConnection`, so several of them can share one transaction opened through
//! [`Database::transaction`].

pub mod connection;
pub mod error;
pub mod migration;
pub mod models;
pub mod repository;
pub mod schema;

pub use connection::{Database, DbConnection};
pub use diesel::{result::Error as DieselError, Connection, SqliteConnection};
pub use error::{DbError, Result};
pub use models::{
    app::{App, Version},
    repository::{InitialRepository, Mirror, NewRepository, Repository, RepositoryPreferences},
};
pub use repository::{AppStore, CompatibilityChecker, RepositoryStore};
