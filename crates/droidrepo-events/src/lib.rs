mod event;
mod sink;

use std::sync::Arc;

pub use event::*;
pub use sink::*;

/// Identifier of a running download.
pub type OperationId = u64;

/// Database identifier of a repository.
pub type RepoId = i64;

/// Shared handle to an event sink.
pub type EventSinkHandle = Arc<dyn EventSink>;
