//! Vintage inference from source filenames.
//!
//! A vintage is the rate-schedule generation a file belongs to. It decides
//! both the label used in output filenames (`NBT<label>`) and the calendar
//! years whose records are kept.

use anyhow::Result;
use regex::Regex;
use serde::Deserialize;
use std::fmt;

use crate::config::Settings;

const FLOATING_LABEL: &str = "00";

/// Vintage identifier resolved from a filename.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Vintage {
    /// Rolling vintage, labelled `00`.
    Floating,
    /// Two-digit vintage code, e.g. `23` for NBT23.
    Numbered(String),
    Unknown,
}

impl Vintage {
    fn from_code(code: &str) -> Self {
        if code == FLOATING_LABEL {
            Vintage::Floating
        } else {
            Vintage::Numbered(code.to_string())
        }
    }

    /// Label used in output filenames.
    pub fn label(&self) -> &str {
        match self {
            Vintage::Floating => FLOATING_LABEL,
            Vintage::Numbered(code) => code,
            Vintage::Unknown => "unknown",
        }
    }

    pub fn is_unknown(&self) -> bool {
        matches!(self, Vintage::Unknown)
    }
}

impl fmt::Display for Vintage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NBT{}", self.label())
    }
}

/// Inclusive calendar-year span.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(from = "(i32, i32)")]
pub struct YearRange {
    pub start: i32,
    pub end: i32,
}

impl YearRange {
    pub const fn new(start: i32, end: i32) -> Self {
        Self { start, end }
    }

    pub fn contains(&self, year: i32) -> bool {
        (self.start..=self.end).contains(&year)
    }
}

impl From<(i32, i32)> for YearRange {
    fn from((start, end): (i32, i32)) -> Self {
        Self::new(start, end)
    }
}

impl fmt::Display for YearRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.start, self.end)
    }
}

enum Matcher {
    /// Literal phrase; a hit yields the floating vintage.
    Phrase(String),
    /// Regex whose first capture group is the two-digit code.
    Capture(Regex),
}

/// One filename rule. Rules are tried in order and the first match wins.
pub struct VintageRule {
    pub name: &'static str,
    matcher: Matcher,
}

impl VintageRule {
    pub fn apply(&self, filename: &str) -> Option<Vintage> {
        match &self.matcher {
            Matcher::Phrase(phrase) => filename
                .contains(phrase.as_str())
                .then_some(Vintage::Floating),
            Matcher::Capture(re) => re
                .captures(filename)
                .and_then(|caps| caps.get(1))
                .map(|code| Vintage::from_code(code.as_str())),
        }
    }
}

/// Resolves vintages and their year ranges.
pub struct VintageResolver {
    rules: Vec<VintageRule>,
    settings: Settings,
}

impl VintageResolver {
    pub fn new(settings: &Settings) -> Result<Self> {
        let rules = vec![
            VintageRule {
                name: "floating-phrase",
                matcher: Matcher::Phrase(settings.floating_phrase.clone()),
            },
            VintageRule {
                name: "program-code",
                matcher: Matcher::Capture(Regex::new(r"(?i)NBT\s*(\d{2})")?),
            },
            VintageRule {
                name: "year-vintage",
                matcher: Matcher::Capture(Regex::new(r"20(\d{2})\s*Vintage")?),
            },
            VintageRule {
                name: "bare-year",
                matcher: Matcher::Capture(Regex::new(r"20(\d{2})")?),
            },
        ];

        Ok(Self {
            rules,
            settings: settings.clone(),
        })
    }

    pub fn rules(&self) -> &[VintageRule] {
        &self.rules
    }

    /// Returns the vintage of the first matching rule, or [`Vintage::Unknown`].
    pub fn resolve(&self, filename: &str) -> Vintage {
        self.rules
            .iter()
            .find_map(|rule| rule.apply(filename))
            .unwrap_or(Vintage::Unknown)
    }

    /// Calendar years covered by `vintage`.
    ///
    /// Table entries win; other numeric codes get a nine-year window from
    /// `2000 + code`; anything else gets the fallback range.
    pub fn year_range(&self, vintage: &Vintage) -> YearRange {
        let label = vintage.label();
        if let Some(range) = self.settings.vintage_ranges.get(label) {
            return *range;
        }

        match label.parse::<i32>() {
            Ok(code) => YearRange::new(2000 + code, 2000 + code + 8),
            Err(_) => self.settings.fallback_range,
        }
    }
}
