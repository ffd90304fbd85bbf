//! Conversion pipeline: discovery, extraction, parsing, aggregation, output.

use anyhow::{Context, Result, bail};
use csv::{ReaderBuilder, StringRecord};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use tracing::{debug, error, info, warn};

use crate::aggregate::Aggregator;
use crate::config::Settings;
use crate::discovery::{InputKind, InputMatcher, discover_inputs, extract_csv};
use crate::output::{print_json, write_feed, write_records};
use crate::parser::{ParsedRow, RIN, RateClassifier, RateRecord, RowSchema, parse_row};
use crate::stats::{ConversionStats, RunSummary, log_distribution};
use crate::vintage::VintageResolver;

/// Streams the data rows of the CSV at `path` through [`parse_row`].
///
/// `on_row` receives the 1-based row number, the raw record, the header
/// schema and the parse result. Rows that are not valid UTF-8 are reported
/// as parse failures; other CSV errors stop the stream.
fn stream_rows<F>(path: &Path, classifier: &RateClassifier, mut on_row: F) -> Result<()>
where
    F: FnMut(usize, &StringRecord, &RowSchema, Result<ParsedRow>),
{
    let mut reader = ReaderBuilder::new()
        .flexible(true)
        .from_path(path)
        .with_context(|| format!("failed to open {}", path.display()))?;
    let schema = RowSchema::from_headers(reader.headers()?);
    debug!(headers = ?schema.names(), "Normalized header");

    let mut record = StringRecord::new();
    let mut row_number = 0;

    loop {
        match reader.read_record(&mut record) {
            Ok(true) => {
                row_number += 1;
                let parsed = parse_row(&schema, &record, classifier);
                on_row(row_number, &record, &schema, parsed);
            }
            Ok(false) => break,
            Err(e) if matches!(e.kind(), csv::ErrorKind::Utf8 { .. }) => {
                row_number += 1;
                on_row(row_number, &record, &schema, Err(e.into()));
            }
            Err(e) => {
                return Err(e).with_context(|| format!("failed to read {}", path.display()));
            }
        }
    }

    Ok(())
}

/// Directory converter holding the resolved settings.
pub struct Converter {
    settings: Settings,
    resolver: VintageResolver,
    matcher: InputMatcher,
    classifier: RateClassifier,
}

impl Converter {
    pub fn new(settings: Settings) -> Result<Self> {
        let resolver = VintageResolver::new(&settings)?;
        let matcher = InputMatcher::new(&settings.input_patterns, &settings.archive_extension)?;
        let classifier = RateClassifier::new(
            settings.generation_marker.as_str(),
            settings.delivery_marker.as_str(),
        );

        Ok(Self {
            settings,
            resolver,
            matcher,
            classifier,
        })
    }

    /// Converts every input found in `input_dir` into `output_dir`.
    ///
    /// Archive and read failures are logged and skipped. Output failures
    /// abort the run.
    #[tracing::instrument(
        skip_all,
        fields(input_dir = %input_dir.display(), output_dir = %output_dir.display())
    )]
    pub fn run(&self, input_dir: &Path, output_dir: &Path) -> Result<RunSummary> {
        fs::create_dir_all(output_dir).with_context(|| {
            format!("failed to create output directory {}", output_dir.display())
        })?;

        let inputs = discover_inputs(input_dir, &self.matcher)?;
        let mut summary = RunSummary {
            inputs_found: inputs.len(),
            ..RunSummary::default()
        };

        if inputs.is_empty() {
            warn!("No matching CSV or ZIP files found");
            for pattern in self.matcher.patterns() {
                let archived = format!("{pattern}{}", self.settings.archive_extension);
                info!(pattern, "Looking for files matching");
                info!(pattern = %archived, "Looking for files matching");
            }
            return Ok(summary);
        }

        info!(count = inputs.len(), "Found files to process");

        let scratch = tempfile::tempdir().context("failed to create scratch directory")?;

        for (index, input) in inputs.iter().enumerate() {
            let csv_path = match input.kind {
                InputKind::Plain => {
                    info!(path = %input.path.display(), "Processing regular file");
                    input.path.clone()
                }
                InputKind::Archived => {
                    let target = scratch.path().join(index.to_string());
                    match extract_csv(&input.path, &target) {
                        Ok(path) => {
                            info!(path = %path.display(), "Processing extracted file");
                            path
                        }
                        Err(e) => {
                            let message = format!("{e:#}");
                            warn!(
                                path = %input.path.display(),
                                error = %message,
                                "Skipping zip file"
                            );
                            summary.skipped_archives += 1;
                            continue;
                        }
                    }
                }
            };

            let stats = self.convert_file(&csv_path, &input.base_name, output_dir)?;
            summary.conversions.push(stats);
        }

        print_json(&summary)?;
        info!(
            inputs = summary.inputs_found,
            converted = summary.conversions.len(),
            skipped_archives = summary.skipped_archives,
            files_written = summary.files_written(),
            "Conversion finished"
        );

        Ok(summary)
    }

    /// Converts one CSV file. The vintage is resolved from `source_name`,
    /// the input's name before any extraction.
    #[tracing::instrument(skip_all, fields(source = %source_name))]
    pub fn convert_file(
        &self,
        csv_path: &Path,
        source_name: &str,
        output_dir: &Path,
    ) -> Result<ConversionStats> {
        let vintage = self.resolver.resolve(source_name);
        if vintage.is_unknown() {
            warn!("Could not extract vintage year from filename");
        } else {
            info!(%vintage, "Resolved vintage");
        }

        let mut aggregator = Aggregator::new(self.resolver.year_range(&vintage));
        info!(range = %aggregator.range(), "Generating data for years");
        let mut stats = ConversionStats::new(source_name, vintage.label());

        if let Err(e) = self.read_into(csv_path, &mut aggregator, &mut stats) {
            let message = format!("{e:#}");
            error!(path = %csv_path.display(), error = %message, "Error processing CSV file");
            stats = stats.with_error(&message);
        }

        info!(
            rows = stats.rows,
            generation = stats.generation_rows,
            delivery = stats.delivery_rows,
            skipped = stats.skipped_rows,
            out_of_range = stats.out_of_range_rows,
            range = %aggregator.range(),
            "Processed rows"
        );
        log_distribution(&aggregator);

        stats.files_written = write_feed(
            output_dir,
            &self.settings.archive_subdir,
            vintage.label(),
            &aggregator,
        )?;

        Ok(stats)
    }

    fn read_into(
        &self,
        csv_path: &Path,
        aggregator: &mut Aggregator,
        stats: &mut ConversionStats,
    ) -> Result<()> {
        let size = fs::metadata(csv_path)
            .with_context(|| format!("failed to stat {}", csv_path.display()))?
            .len();
        let large = size > self.settings.large_file_threshold;
        if large {
            let size_mib = size as f64 / (1024.0 * 1024.0);
            warn!(size_mib, "Large file detected, using progress reporting");
        }

        let sample_rows = self.settings.sample_rows;
        let interval = self.settings.progress_interval;

        stream_rows(csv_path, &self.classifier, |n, record, schema, parsed| {
            if n <= sample_rows {
                debug!(row = n, values = ?record, rin = ?schema.get(record, RIN), "Sample row");
            }

            match parsed {
                Ok(row) => stats.record(aggregator.add(row)),
                Err(e) => {
                    warn!(row = n, values = ?record, error = %e, "Could not parse row");
                    stats.record_skip();
                }
            }

            if large && interval > 0 && n % interval == 0 {
                info!(rows = n, "Processed rows so far");
            }
        })
    }
}

/// Converts one CSV into a single JSON array without vintage filtering or
/// rate-type split. Returns the number of records written.
#[tracing::instrument(skip_all, fields(input = %input.display(), output = %output.display()))]
pub fn convert_single(input: &Path, output: &Path, settings: &Settings) -> Result<usize> {
    if !input.exists() {
        bail!(
            "could not find CSV file {}; make sure it is in the current directory",
            input.display()
        );
    }

    let classifier = RateClassifier::new(
        settings.generation_marker.as_str(),
        settings.delivery_marker.as_str(),
    );
    let mut slots: BTreeMap<String, RateRecord> = BTreeMap::new();

    stream_rows(input, &classifier, |n, record, _, parsed| match parsed {
        Ok(row) => {
            slots.insert(row.key, row.record);
        }
        Err(e) => warn!(row = n, values = ?record, error = %e, "Could not parse row"),
    })?;

    let mut records: Vec<&RateRecord> = slots.values().collect();
    records.sort_by_key(|r| r.start);
    write_records(output, &records)?;

    let shown = fs::canonicalize(output).unwrap_or_else(|_| output.to_path_buf());
    info!(entries = records.len(), path = %shown.display(), "Successfully converted");

    Ok(records.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    const HEADER: &str = "\u{feff}RIN,DateStart,TimeStart,Value\n";

    fn converter() -> Converter {
        Converter::new(Settings::default()).unwrap()
    }

    fn read_json(path: &Path) -> serde_json::Value {
        serde_json::from_str(&fs::read_to_string(path).unwrap()).unwrap()
    }

    #[test]
    fn test_convert_file_filters_and_counts() {
        let dir = tempdir().unwrap();
        let csv = dir.path().join("input.csv");
        fs::write(
            &csv,
            format!(
                "{HEADER}USCA-XXPG,01/01/2025,00:00:00,0.1\n\
                 USCA-PGXX,01/01/2025,00:00:00,0.2\n\
                 USCA-PGXX,01/01/2022,00:00:00,0.3\n\
                 USCA-PGXX,bad,00:00:00,0.4\n"
            ),
        )
        .unwrap();
        let out = dir.path().join("output");

        let stats = converter()
            .convert_file(&csv, "PG&E NBT23 EEC Values Vintage.csv", &out)
            .unwrap();

        assert_eq!(stats.vintage, "23");
        assert_eq!(stats.rows, 4);
        assert_eq!(stats.generation_rows, 1);
        assert_eq!(stats.delivery_rows, 1);
        assert_eq!(stats.out_of_range_rows, 1);
        assert_eq!(stats.skipped_rows, 1);
        assert_eq!(stats.files_written.len(), 4);
        assert!(out.join("2025/NBT23-delivery-feed-in-rates.json").exists());
        assert!(!out.join("2022").exists());
    }

    #[test]
    fn test_convert_file_unknown_vintage_uses_fallback() {
        let dir = tempdir().unwrap();
        let csv = dir.path().join("rates.csv");
        fs::write(
            &csv,
            format!(
                "{HEADER}USCA-PGXX,06/01/2033,00:00:00,0.1\n\
                 USCA-PGXX,06/01/2034,00:00:00,0.1\n"
            ),
        )
        .unwrap();
        let out = dir.path().join("output");

        let stats = converter().convert_file(&csv, "rates.csv", &out).unwrap();

        assert_eq!(stats.vintage, "unknown");
        assert_eq!(stats.out_of_range_rows, 1);
        let archive = read_json(&out.join("archives/NBTunknown-delivery-feed-in-rates.json"));
        assert_eq!(archive.as_array().unwrap().len(), 1);
    }

    #[test]
    fn test_convert_file_missing_input_is_not_fatal() {
        let dir = tempdir().unwrap();
        let out = dir.path().join("output");

        let stats = converter()
            .convert_file(&dir.path().join("missing.csv"), "2025.csv", &out)
            .unwrap();

        assert!(stats.error_message.is_some());
        assert!(stats.files_written.is_empty());
    }

    #[test]
    fn test_invalid_utf8_row_is_skipped() {
        let dir = tempdir().unwrap();
        let csv = dir.path().join("2025.csv");
        let mut bytes = HEADER.as_bytes().to_vec();
        bytes.extend_from_slice(b"USCA-PGXX,01/01/2025,00:00:00,\xff\xfe\n");
        bytes.extend_from_slice(b"USCA-PGXX,01/01/2025,01:00:00,0.5\n");
        fs::write(&csv, bytes).unwrap();

        let stats = converter()
            .convert_file(&csv, "2025.csv", &dir.path().join("output"))
            .unwrap();

        assert_eq!(stats.skipped_rows, 1);
        assert_eq!(stats.delivery_rows, 1);
        assert!(stats.error_message.is_none());
    }

    #[test]
    fn test_large_file_path_reports_progress() {
        let dir = tempdir().unwrap();
        let csv = dir.path().join("2025.csv");
        fs::write(
            &csv,
            format!(
                "{HEADER}USCA-PGXX,01/01/2025,00:00:00,0.1\n\
                 USCA-PGXX,01/01/2025,01:00:00,0.2\n\
                 USCA-XXPG,01/01/2025,02:00:00,0.3\n"
            ),
        )
        .unwrap();
        let settings = Settings {
            large_file_threshold: 0,
            progress_interval: 1,
            sample_rows: 2,
            ..Settings::default()
        };

        let stats = Converter::new(settings)
            .unwrap()
            .convert_file(&csv, "2025.csv", &dir.path().join("output"))
            .unwrap();

        assert_eq!(stats.rows, 3);
        assert_eq!(stats.delivery_rows, 2);
        assert_eq!(stats.generation_rows, 1);
        assert!(stats.error_message.is_none());
    }

    #[test]
    fn test_convert_single() {
        let dir = tempdir().unwrap();
        let csv = dir.path().join("2025.csv");
        fs::write(
            &csv,
            format!(
                "{HEADER}USCA-PGXX,01/01/2019,02:00:00,0.3\n\
                 USCA-XXPG,01/01/2019,01:00:00,0.1\n\
                 USCA-PGXX,01/01/2019,01:00:00,0.2\n\
                 USCA-PGXX,x,01:00:00,0.2\n"
            ),
        )
        .unwrap();
        let out = dir.path().join("feed-in-rates.json");

        let count = convert_single(&csv, &out, &Settings::default()).unwrap();

        assert_eq!(count, 2);
        let json = read_json(&out);
        assert_eq!(json[0]["start"], "2019-01-01T01:00:00Z");
        assert_eq!(json[0]["price"], 0.2);
        assert_eq!(json[1]["start"], "2019-01-01T02:00:00Z");
    }

    #[test]
    fn test_convert_single_missing_input() {
        let dir = tempdir().unwrap();
        let err = convert_single(
            &dir.path().join("2025.csv"),
            &dir.path().join("out.json"),
            &Settings::default(),
        )
        .unwrap_err();
        assert!(err.to_string().contains("could not find CSV file"));
    }
}
