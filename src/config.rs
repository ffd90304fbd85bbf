//! Conversion settings.
//!
//! Every field has a default matching the PG&E NBT export conventions, so the
//! converter runs without any configuration. A JSON file may override any
//! subset of fields:
//! ```json
//! {
//!   "generation_marker": "USCA-XXPG",
//!   "vintage_ranges": { "27": [2027, 2035] }
//! }
//! ```

use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;

use crate::vintage::YearRange;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Substring of the `RIN` value marking a generation charge.
    pub generation_marker: String,
    /// Substring of the `RIN` value marking a delivery charge.
    pub delivery_marker: String,
    /// Filename phrase identifying the floating (rolling) vintage.
    pub floating_phrase: String,
    /// Known vintage labels and the calendar years they cover.
    pub vintage_ranges: BTreeMap<String, YearRange>,
    /// Range used when the vintage is neither known nor numeric.
    pub fallback_range: YearRange,
    /// Glob patterns for plain CSV inputs. Archived inputs use the same
    /// patterns with [`Settings::archive_extension`] appended.
    pub input_patterns: Vec<String>,
    pub archive_extension: String,
    /// Subdirectory of the output root holding the all-years files.
    pub archive_subdir: String,
    /// Inputs larger than this many bytes get progress logging.
    pub large_file_threshold: u64,
    pub progress_interval: usize,
    /// Number of leading rows logged at debug level for inspection.
    pub sample_rows: usize,
}

impl Default for Settings {
    fn default() -> Self {
        let vintage_ranges = [
            ("00", YearRange::new(2025, 2026)),
            ("23", YearRange::new(2023, 2031)),
            ("24", YearRange::new(2024, 2032)),
            ("25", YearRange::new(2025, 2033)),
            ("26", YearRange::new(2026, 2034)),
        ]
        .into_iter()
        .map(|(label, range)| (label.to_string(), range))
        .collect();

        Self {
            generation_marker: "USCA-XXPG".to_string(),
            delivery_marker: "USCA-PGXX".to_string(),
            floating_phrase: "Floating Vintage".to_string(),
            vintage_ranges,
            fallback_range: YearRange::new(2025, 2033),
            input_patterns: vec![
                "*PG&E*NBT*EEC*Values*Vintage*.csv".to_string(),
                "*PG&E*NBT*EEC*Values*Floating*Vintage*.csv".to_string(),
                "20??.csv".to_string(),
            ],
            archive_extension: ".zip".to_string(),
            archive_subdir: "archives".to_string(),
            large_file_threshold: 100 * 1024 * 1024,
            progress_interval: 100_000,
            sample_rows: 5,
        }
    }
}

impl Settings {
    /// Loads settings from a JSON file at `path`, defaulting absent fields.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read settings file {}", path.display()))?;
        let settings = serde_json::from_str(&content)
            .with_context(|| format!("invalid settings file {}", path.display()))?;
        Ok(settings)
    }

    /// Loads from `path` when given, otherwise returns the defaults.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load(path),
            None => Ok(Self::default()),
        }
    }
}
