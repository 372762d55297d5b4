//! CLI command implementations.

pub mod alias;
pub mod category;
pub mod entry;
pub mod scan;
pub mod serve;

pub use alias::resolve_alias;
pub use category::show_category;
pub use entry::show_entry;
pub use scan::scan_content;
pub use serve::serve;

use anyhow::{Context, Result};
use chrono::{DateTime, FixedOffset, Utc};
use publ_core::Config;

/// Current time in the site's configured offset
pub(crate) fn site_now(config: &Config) -> Result<DateTime<FixedOffset>> {
    let tz = config.timezone().context("Invalid timezone in configuration")?;
    Ok(Utc::now().with_timezone(&tz))
}
