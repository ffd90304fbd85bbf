//! CSV row parsing for PG&E NBT rate exports.
//!
//! Header names are normalized once per file into a [`RowSchema`]; each data
//! row is then turned into a [`RateRecord`] with its calendar year, dedup key
//! and [`RateType`].

use anyhow::{Context, Result, anyhow, bail};
use chrono::{DateTime, Datelike, NaiveDate, NaiveTime, TimeDelta, Utc};
use csv::StringRecord;
use serde::{Serialize, Serializer};
use std::collections::HashMap;
use std::fmt;

pub const DATE_START: &str = "DateStart";
pub const TIME_START: &str = "TimeStart";
pub const VALUE: &str = "Value";
pub const RIN: &str = "RIN";

const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";
/// Last year that still formats as four digits.
const MAX_YEAR: i32 = 9999;
const BOM: char = '\u{feff}';

/// One hourly price interval, serialized as `{start, end, price}`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RateRecord {
    #[serde(serialize_with = "serialize_timestamp")]
    pub start: DateTime<Utc>,
    #[serde(serialize_with = "serialize_timestamp")]
    pub end: DateTime<Utc>,
    pub price: f64,
}

impl RateRecord {
    /// Builds the interval `[start, start + 1h)`.
    ///
    /// # Errors
    ///
    /// Fails when the end falls past year 9999.
    pub fn new(start: DateTime<Utc>, price: f64) -> Result<Self> {
        let end = start
            .checked_add_signed(TimeDelta::hours(1))
            .filter(|end| end.year() <= MAX_YEAR)
            .ok_or_else(|| anyhow!("interval starting {start} ends out of range"))?;

        Ok(Self { start, end, price })
    }

    /// Key identifying the time slot: `"<start>_<end>"`.
    pub fn key(&self) -> String {
        format!(
            "{}_{}",
            format_timestamp(&self.start),
            format_timestamp(&self.end)
        )
    }
}

pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.format(TIMESTAMP_FORMAT).to_string()
}

fn serialize_timestamp<S: Serializer>(
    ts: &DateTime<Utc>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    serializer.collect_str(&ts.format(TIMESTAMP_FORMAT))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RateType {
    Generation,
    Delivery,
}

impl RateType {
    pub const ALL: [RateType; 2] = [RateType::Generation, RateType::Delivery];

    pub fn as_str(&self) -> &'static str {
        match self {
            RateType::Generation => "generation",
            RateType::Delivery => "delivery",
        }
    }
}

impl fmt::Display for RateType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Maps `RIN` codes to rate types by substring.
#[derive(Debug, Clone)]
pub struct RateClassifier {
    pub generation_marker: String,
    pub delivery_marker: String,
}

impl RateClassifier {
    pub fn new(generation_marker: impl Into<String>, delivery_marker: impl Into<String>) -> Self {
        Self {
            generation_marker: generation_marker.into(),
            delivery_marker: delivery_marker.into(),
        }
    }

    /// Delivery unless the code carries the generation marker.
    pub fn classify(&self, rin: Option<&str>) -> RateType {
        match rin {
            Some(code) if code.contains(self.generation_marker.as_str()) => RateType::Generation,
            Some(code) if code.contains(self.delivery_marker.as_str()) => RateType::Delivery,
            _ => RateType::Delivery,
        }
    }
}

/// Strips byte-order marks and surrounding whitespace from a header name.
pub fn clean_header(name: &str) -> String {
    name.replace(BOM, "").trim().to_string()
}

/// Column lookup built from a normalized header row.
#[derive(Debug, Clone)]
pub struct RowSchema {
    names: Vec<String>,
    index: HashMap<String, usize>,
}

impl RowSchema {
    pub fn from_headers(headers: &StringRecord) -> Self {
        let names: Vec<String> = headers.iter().map(clean_header).collect();
        let mut index = HashMap::with_capacity(names.len());
        for (i, name) in names.iter().enumerate() {
            // last occurrence of a duplicated header wins
            index.insert(name.clone(), i);
        }
        Self { names, index }
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn get<'r>(&self, row: &'r StringRecord, field: &str) -> Option<&'r str> {
        self.index.get(field).and_then(|&i| row.get(i))
    }

    fn require<'r>(&self, row: &'r StringRecord, field: &str) -> Result<&'r str> {
        self.get(row, field)
            .ok_or_else(|| anyhow!("missing field {field}"))
    }
}

/// A successfully parsed row.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedRow {
    pub record: RateRecord,
    pub year: i32,
    pub key: String,
    pub rate_type: RateType,
}

/// Parses a data row against `schema`.
///
/// # Errors
///
/// Fails when `DateStart`, `TimeStart` or `Value` is missing or does not
/// parse, when the price is not finite, or when the interval falls outside
/// years 0 to 9999.
pub fn parse_row(
    schema: &RowSchema,
    row: &StringRecord,
    classifier: &RateClassifier,
) -> Result<ParsedRow> {
    let date = parse_date(schema.require(row, DATE_START)?)?;
    let time = parse_time(schema.require(row, TIME_START)?)?;
    let price = parse_price(schema.require(row, VALUE)?)?;

    let start = date.and_time(time).and_utc();
    let record = RateRecord::new(start, price)?;
    let rate_type = classifier.classify(schema.get(row, RIN).filter(|v| !v.is_empty()));

    Ok(ParsedRow {
        year: start.year(),
        key: record.key(),
        record,
        rate_type,
    })
}

/// Splits `s` on `sep` into exactly three integers.
fn split_triplet(s: &str, sep: char, field: &str) -> Result<[u32; 3]> {
    let parts: Vec<&str> = s.trim().split(sep).collect();
    let &[a, b, c] = parts.as_slice() else {
        bail!("{field} {s:?}: expected three {sep}-separated parts");
    };

    let parse = |p: &str| {
        p.trim()
            .parse::<u32>()
            .with_context(|| format!("{field} {s:?}: invalid number {p:?}"))
    };
    Ok([parse(a)?, parse(b)?, parse(c)?])
}

/// Parses `MM/DD/YYYY`.
fn parse_date(s: &str) -> Result<NaiveDate> {
    let [month, day, year] = split_triplet(s, '/', DATE_START)?;
    let year = i32::try_from(year)
        .ok()
        .filter(|y| *y <= MAX_YEAR)
        .ok_or_else(|| anyhow!("{DATE_START} {s:?}: year out of range"))?;
    NaiveDate::from_ymd_opt(year, month, day)
        .ok_or_else(|| anyhow!("{DATE_START} {s:?}: not a calendar date"))
}

/// Parses `HH:MM:SS`.
fn parse_time(s: &str) -> Result<NaiveTime> {
    let [hour, minute, second] = split_triplet(s, ':', TIME_START)?;
    NaiveTime::from_hms_opt(hour, minute, second)
        .ok_or_else(|| anyhow!("{TIME_START} {s:?}: not a valid time"))
}

fn parse_price(s: &str) -> Result<f64> {
    let price: f64 = s
        .trim()
        .parse()
        .with_context(|| format!("{VALUE} {s:?}: invalid decimal"))?;
    if !price.is_finite() {
        bail!("{VALUE} {s:?}: price must be finite");
    }
    Ok(price)
}
