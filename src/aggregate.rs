//! Per-year, per-rate-type collection of parsed records.

use std::collections::BTreeMap;

use crate::parser::{ParsedRow, RateRecord, RateType};
use crate::vintage::YearRange;

/// Year → (slot key → record). A later record for the same slot replaces
/// the earlier one.
#[derive(Debug, Default, Clone)]
pub struct YearBuckets {
    years: BTreeMap<i32, BTreeMap<String, RateRecord>>,
}

impl YearBuckets {
    pub fn insert(&mut self, year: i32, key: String, record: RateRecord) {
        self.years.entry(year).or_default().insert(key, record);
    }

    pub fn is_empty(&self) -> bool {
        self.years.values().all(BTreeMap::is_empty)
    }

    pub fn years(&self) -> impl Iterator<Item = i32> + '_ {
        self.years.keys().copied()
    }

    pub fn year_len(&self, year: i32) -> usize {
        self.years.get(&year).map_or(0, BTreeMap::len)
    }

    /// Records of one year, sorted by start.
    pub fn records_for_year(&self, year: i32) -> Vec<&RateRecord> {
        let mut records: Vec<&RateRecord> = self
            .years
            .get(&year)
            .map(|slots| slots.values().collect())
            .unwrap_or_default();
        records.sort_by_key(|r| r.start);
        records
    }

    /// Records of every year, sorted by start.
    pub fn all_records(&self) -> Vec<&RateRecord> {
        let mut records: Vec<&RateRecord> =
            self.years.values().flat_map(BTreeMap::values).collect();
        records.sort_by_key(|r| r.start);
        records
    }
}

/// Result of offering one row to an [`Aggregator`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Stored(RateType),
    OutOfRange,
}

/// Generation and delivery buckets for one input, bounded by a year range.
#[derive(Debug, Clone)]
pub struct Aggregator {
    range: YearRange,
    generation: YearBuckets,
    delivery: YearBuckets,
}

impl Aggregator {
    pub fn new(range: YearRange) -> Self {
        Self {
            range,
            generation: YearBuckets::default(),
            delivery: YearBuckets::default(),
        }
    }

    pub fn range(&self) -> YearRange {
        self.range
    }

    /// Stores `row` under its rate type and year, unless the year is outside
    /// the active range.
    pub fn add(&mut self, row: ParsedRow) -> Admission {
        if !self.range.contains(row.year) {
            return Admission::OutOfRange;
        }

        let rate_type = row.rate_type;
        self.bucket_mut(rate_type).insert(row.year, row.key, row.record);
        Admission::Stored(rate_type)
    }

    pub fn bucket(&self, rate_type: RateType) -> &YearBuckets {
        match rate_type {
            RateType::Generation => &self.generation,
            RateType::Delivery => &self.delivery,
        }
    }

    fn bucket_mut(&mut self, rate_type: RateType) -> &mut YearBuckets {
        match rate_type {
            RateType::Generation => &mut self.generation,
            RateType::Delivery => &mut self.delivery,
        }
    }

    /// Years holding records of either rate type, ascending.
    pub fn years(&self) -> Vec<i32> {
        let mut years: Vec<i32> = self.generation.years().chain(self.delivery.years()).collect();
        years.sort_unstable();
        years.dedup();
        years
    }
}
