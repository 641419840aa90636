#![deny(warnings)]
#![deny(clippy::all)]
#![allow(clippy::too_many_arguments)]

//! Shared data model for the suggestion aggregator: the types every other
//! crate in the workspace passes across its API boundary, plus the tunable
//! [`SuggestionConfig`] (spec §3, §6).

mod config;
mod result;
mod shortcut;
mod source_identifier;
mod stats;
mod suggestion;

pub use config::SuggestionConfig;
pub use result::{SuggestionResult, SuggestionStatus};
pub use shortcut::{ClickLogEntry, ShortcutRecord};
pub use source_identifier::SourceIdentifier;
pub use stats::{SessionStats, SourceEvent, SourceEventKind, SourceStat};
pub use suggestion::{LaunchIntent, Suggestion, SuggestionBuilder, SuggestionFormat, NEVER_SHORTCUT};
