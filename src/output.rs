//! JSON feed output.
//!
//! Writes one all-years file per rate type into the archive subdirectory and
//! one file per rate type and year into `<root>/<year>/`.

use anyhow::{Context, Result};
use serde::Serialize;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::aggregate::Aggregator;
use crate::parser::{RateRecord, RateType};

/// Logs any serializable value as pretty-printed JSON at debug level.
pub fn print_json(value: &impl Serialize) -> Result<()> {
    debug!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// `NBT<vintage>-<ratetype>-feed-in-rates.json`
pub fn feed_file_name(vintage: &str, rate_type: RateType) -> String {
    format!("NBT{vintage}-{rate_type}-feed-in-rates.json")
}

/// Writes `records` as a pretty-printed JSON array.
pub fn write_records(path: &Path, records: &[&RateRecord]) -> Result<()> {
    let file =
        File::create(path).with_context(|| format!("failed to create {}", path.display()))?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer_pretty(&mut writer, records)
        .with_context(|| format!("failed to write {}", path.display()))?;
    writer.flush()?;
    Ok(())
}

fn create_dir(dir: &Path) -> Result<()> {
    fs::create_dir_all(dir)
        .with_context(|| format!("failed to create directory {}", dir.display()))
}

fn write_logged(path: PathBuf, records: &[&RateRecord], scope: &str) -> Result<PathBuf> {
    write_records(&path, records)?;
    let shown = fs::canonicalize(&path).unwrap_or_else(|_| path.clone());
    info!(
        path = %shown.display(),
        entries = records.len(),
        scope,
        "Feed file saved"
    );
    Ok(path)
}

/// Writes every non-empty bucket of `aggregator` under `root`.
///
/// Returns the written paths, archive files first.
///
/// # Errors
///
/// Any directory or file error is returned; nothing is retried.
pub fn write_feed(
    root: &Path,
    archive_subdir: &str,
    vintage: &str,
    aggregator: &Aggregator,
) -> Result<Vec<PathBuf>> {
    let archive_dir = root.join(archive_subdir);
    create_dir(&archive_dir)?;

    let mut written = Vec::new();

    for rate_type in RateType::ALL {
        let bucket = aggregator.bucket(rate_type);
        if bucket.is_empty() {
            debug!(%rate_type, "No records, skipping archive file");
            continue;
        }

        let path = archive_dir.join(feed_file_name(vintage, rate_type));
        written.push(write_logged(path, &bucket.all_records(), "all")?);
    }

    for year in aggregator.years() {
        let year_dir = root.join(year.to_string());
        create_dir(&year_dir)?;

        for rate_type in RateType::ALL {
            let records = aggregator.bucket(rate_type).records_for_year(year);
            if records.is_empty() {
                continue;
            }

            let path = year_dir.join(feed_file_name(vintage, rate_type));
            written.push(write_logged(path, &records, &year.to_string())?);
        }
    }

    Ok(written)
}
