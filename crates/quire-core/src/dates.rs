//! Date field handling
//!
//! Date fields accept the shortcuts `today`, `yesterday` and `tomorrow`,
//! which are resolved to an ISO date when the edit is committed. Everything
//! else is stored verbatim and handed to the external date parser.

use chrono::{Days, NaiveDate};
use serde::{Deserialize, Serialize};

/// Date format stored for resolved shortcuts
pub const ISO_DATE_FORMAT: &str = "%Y-%m-%d";

/// Result of parsing a free-form date string
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StructuredDate {
    pub year: Option<i32>,
    pub month: Option<u32>,
    pub day: Option<u32>,
    /// Order of the components in the source string, e.g. `ymd` or `dmy`
    pub order: String,
}

/// Resolve a relative-date shortcut against `today`.
///
/// Returns `None` when the value isn't a shortcut.
pub fn resolve_shortcut(value: &str, today: NaiveDate) -> Option<String> {
    let date = match value.trim().to_lowercase().as_str() {
        "today" => today,
        "yesterday" => today.checked_sub_days(Days::new(1))?,
        "tomorrow" => today.checked_add_days(Days::new(1))?,
        _ => return None,
    };
    Some(date.format(ISO_DATE_FORMAT).to_string())
}
