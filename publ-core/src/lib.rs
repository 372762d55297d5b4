//! # publ-core
//!
//! Core library for the Publ publishing system.
//!
//! This crate holds the content model: header parsing for entry files, the
//! in-memory content index and the indexer that keeps it current, path
//! aliases, categories, markdown rendering and template lookup.

pub mod cards;
pub mod category;
pub mod config;
pub mod entry;
pub mod headers;
pub mod html;
pub mod index;
pub mod indexer;
pub mod markdown;
pub mod models;
pub mod path_alias;
pub mod scan;
pub mod slug;
pub mod template;

pub use cards::CardData;
pub use category::Category;
pub use config::Config;
pub use entry::{Entry, User};
pub use headers::Message;
pub use index::ContentIndex;
pub use indexer::Indexer;
pub use markdown::{ItemCounter, MarkdownArgs};
pub use models::{CategoryRecord, EntryRecord, EntryType, PathAliasRecord, PublishStatus};
pub use path_alias::Redirect;
pub use scan::{ScanError, ScanOutcome};
pub use template::{Template, TemplateCache};
