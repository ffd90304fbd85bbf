use serde::Serialize;
use std::path::PathBuf;
use tracing::debug;

use crate::aggregate::{Admission, Aggregator};
use crate::parser::RateType;

/// Counters for one converted input.
#[derive(Debug, Default, Clone, Serialize)]
pub struct ConversionStats {
    pub source: String,
    pub vintage: String,
    pub rows: usize,
    pub skipped_rows: usize,
    pub out_of_range_rows: usize,

    // counted on insertion, overwrites included
    pub generation_rows: usize,
    pub delivery_rows: usize,

    pub files_written: Vec<PathBuf>,

    // set when reading stopped early
    pub error_message: Option<String>,
}

impl ConversionStats {
    pub fn new(source: &str, vintage: &str) -> Self {
        Self {
            source: source.to_string(),
            vintage: vintage.to_string(),
            ..Self::default()
        }
    }

    pub fn record_skip(&mut self) {
        self.rows += 1;
        self.skipped_rows += 1;
    }

    pub fn record(&mut self, admission: Admission) {
        self.rows += 1;
        match admission {
            Admission::Stored(RateType::Generation) => self.generation_rows += 1,
            Admission::Stored(RateType::Delivery) => self.delivery_rows += 1,
            Admission::OutOfRange => self.out_of_range_rows += 1,
        }
    }

    pub fn with_error(mut self, message: &str) -> Self {
        self.error_message = Some(message.to_string());
        self
    }
}

/// Outcome of a whole directory run.
#[derive(Debug, Default, Serialize)]
pub struct RunSummary {
    pub inputs_found: usize,
    pub skipped_archives: usize,
    pub conversions: Vec<ConversionStats>,
}

impl RunSummary {
    pub fn files_written(&self) -> usize {
        self.conversions.iter().map(|c| c.files_written.len()).sum()
    }
}

/// Logs the per-year generation/delivery distribution at debug level.
pub fn log_distribution(aggregator: &Aggregator) {
    for year in aggregator.years() {
        debug!(
            year,
            generation = aggregator.bucket(RateType::Generation).year_len(year),
            delivery = aggregator.bucket(RateType::Delivery).year_len(year),
            "Rate type distribution"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_counts() {
        let mut stats = ConversionStats::new("2025.csv", "25");
        stats.record(Admission::Stored(RateType::Generation));
        stats.record(Admission::Stored(RateType::Delivery));
        stats.record(Admission::Stored(RateType::Delivery));
        stats.record(Admission::OutOfRange);
        stats.record_skip();

        assert_eq!(stats.rows, 5);
        assert_eq!(stats.generation_rows, 1);
        assert_eq!(stats.delivery_rows, 2);
        assert_eq!(stats.out_of_range_rows, 1);
        assert_eq!(stats.skipped_rows, 1);
    }

    #[test]
    fn test_with_error() {
        let stats = ConversionStats::new("a.csv", "unknown").with_error("boom");
        assert_eq!(stats.error_message.as_deref(), Some("boom"));
        assert_eq!(stats.vintage, "unknown");
    }

    #[test]
    fn test_serializes_to_json() {
        let stats = ConversionStats::new("a.csv", "23");
        let json = serde_json::to_value(&stats).unwrap();
        assert_eq!(json["source"], "a.csv");
        assert_eq!(json["rows"], 0);
        assert!(json["error_message"].is_null());
    }

    #[test]
    fn test_summary_counts_files() {
        let mut a = ConversionStats::new("a.csv", "23");
        a.files_written = vec![PathBuf::from("x.json"), PathBuf::from("y.json")];
        let summary = RunSummary {
            inputs_found: 2,
            skipped_archives: 1,
            conversions: vec![a, ConversionStats::new("b.csv", "24")],
        };
        assert_eq!(summary.files_written(), 2);
    }
}
