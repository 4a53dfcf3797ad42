//! Repository index synchronization for droidrepo.
//!
//! The updaters fetch a repository's signed entry point, verify it and store either a diff or
//! the full index. [`RepoManager`] ties them to the configuration, adds new repositories and
//! dispatches updates between the index formats.

pub mod compatibility;
pub mod error;
pub mod repo_manager;
pub mod updater;
pub mod uri;

#[cfg(test)]
pub(crate) mod test_utils;

pub use compatibility::DeviceCompatibilityChecker;
pub use error::{CoreError, CoreResult, UpdateError};
pub use repo_manager::{FetchedRepository, RepoManager};
pub use updater::{IndexUpdateResult, IndexUpdater, IndexV1Updater, IndexV2Updater, UpdaterContext};
