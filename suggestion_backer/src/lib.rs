#![deny(warnings)]
#![deny(clippy::all)]
#![allow(clippy::new_without_default)]
#![allow(clippy::too_many_arguments)]

//! Holds the presentation state for one in-flight query: what's already been
//! shown, what's still outstanding, and how it should be mixed into an
//! ordered snapshot (spec §4.6, §4.7).

mod backer;
mod session_cache;

pub use backer::{
    BackerListener, MoreSourceEntry, MoreSourceStatus, Snapshot, SnapshotRow, SourceSuggestionBacker,
};
pub use session_cache::SessionCache;
