//! Input discovery and archive extraction.
//!
//! Inputs are regular files in one directory whose names match the plain
//! glob patterns, or the same patterns followed by the archive extension.
//! When both `X.csv` and `X.csv.zip` exist only the archive is used.

use anyhow::{Context, Result, bail};
use glob::Pattern;
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{self, BufReader};
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use zip::ZipArchive;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputKind {
    Plain,
    Archived,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredInput {
    pub path: PathBuf,
    /// File name with any archive extension stripped.
    pub base_name: String,
    pub kind: InputKind,
}

/// Filename matcher for plain and archived inputs.
#[derive(Debug, Clone)]
pub struct InputMatcher {
    patterns: Vec<Pattern>,
    archive_extension: String,
}

impl InputMatcher {
    pub fn new(patterns: &[String], archive_extension: &str) -> Result<Self> {
        let patterns = patterns
            .iter()
            .map(|p| Pattern::new(p).with_context(|| format!("invalid input pattern {p:?}")))
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            patterns,
            archive_extension: archive_extension.to_string(),
        })
    }

    pub fn patterns(&self) -> impl Iterator<Item = &str> {
        self.patterns.iter().map(Pattern::as_str)
    }

    fn matches_plain(&self, name: &str) -> bool {
        self.patterns.iter().any(|p| p.matches(name))
    }

    /// Returns the base name and kind of `file_name`, or `None` if it is not
    /// an input.
    pub fn classify(&self, file_name: &str) -> Option<(String, InputKind)> {
        if let Some(base) = file_name.strip_suffix(self.archive_extension.as_str()) {
            if self.matches_plain(base) {
                return Some((base.to_string(), InputKind::Archived));
            }
        }

        self.matches_plain(file_name)
            .then(|| (file_name.to_string(), InputKind::Plain))
    }
}

/// Lists inputs in `dir` (non-recursive), ordered by base name.
pub fn discover_inputs(dir: &Path, matcher: &InputMatcher) -> Result<Vec<DiscoveredInput>> {
    let mut found: BTreeMap<String, DiscoveredInput> = BTreeMap::new();

    let entries =
        fs::read_dir(dir).with_context(|| format!("failed to read directory {}", dir.display()))?;

    for entry in entries {
        let entry = entry?;
        let path = entry.path();
        if !path.is_file() {
            continue;
        }

        let Some(file_name) = entry.file_name().to_str().map(str::to_string) else {
            continue;
        };
        let Some((base_name, kind)) = matcher.classify(&file_name) else {
            continue;
        };

        let plain_shadowed = kind == InputKind::Plain
            && found
                .get(&base_name)
                .is_some_and(|existing| existing.kind == InputKind::Archived);
        if plain_shadowed {
            debug!(base_name, "Archive takes precedence over plain file");
            continue;
        }

        found.insert(
            base_name.clone(),
            DiscoveredInput {
                path,
                base_name,
                kind,
            },
        );
    }

    Ok(found.into_values().collect())
}

fn is_csv_name(name: &str) -> bool {
    name.to_ascii_lowercase().ends_with(".csv")
}

/// Extracts the first `.csv` entry of the zip archive at `archive_path` into
/// `scratch_dir` and returns the extracted path.
///
/// # Errors
///
/// Fails if the archive cannot be read, holds no CSV entry, or the entry
/// name would escape `scratch_dir`.
pub fn extract_csv(archive_path: &Path, scratch_dir: &Path) -> Result<PathBuf> {
    let file = File::open(archive_path)
        .with_context(|| format!("failed to open {}", archive_path.display()))?;
    let mut archive = ZipArchive::new(BufReader::new(file))
        .with_context(|| format!("{} is not a valid zip archive", archive_path.display()))?;

    for i in 0..archive.len() {
        let mut entry = archive.by_index(i)?;
        if !entry.is_file() || !is_csv_name(entry.name()) {
            continue;
        }

        let name = entry.name().to_string();
        let Some(relative) = entry.enclosed_name() else {
            bail!("unsafe entry name {name:?} in {}", archive_path.display());
        };
        let target = scratch_dir.join(relative);

        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut out = File::create(&target)
            .with_context(|| format!("failed to create {}", target.display()))?;
        io::copy(&mut entry, &mut out)
            .with_context(|| format!("failed to extract {name} from {}", archive_path.display()))?;

        info!(entry = %name, archive = %archive_path.display(), "Extracted CSV from archive");
        return Ok(target);
    }

    bail!("no CSV files found in zip archive {}", archive_path.display())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Settings;
    use std::io::{Cursor, Write};
    use tempfile::tempdir;
    use zip::CompressionMethod;
    use zip::write::SimpleFileOptions;

    fn matcher() -> InputMatcher {
        let settings = Settings::default();
        InputMatcher::new(&settings.input_patterns, &settings.archive_extension).unwrap()
    }

    fn zip_bytes(entries: &[(&str, &str)]) -> Vec<u8> {
        let mut buf = Vec::new();
        {
            let mut zip = zip::ZipWriter::new(Cursor::new(&mut buf));
            let options = SimpleFileOptions::default().compression_method(CompressionMethod::Stored);
            for (name, content) in entries {
                zip.start_file(*name, options).unwrap();
                zip.write_all(content.as_bytes()).unwrap();
            }
            zip.finish().unwrap();
        }
        buf
    }

    #[test]
    fn test_classify() {
        let m = matcher();
        assert_eq!(
            m.classify("PG&E NBT23 EEC Values Vintage.csv"),
            Some(("PG&E NBT23 EEC Values Vintage.csv".into(), InputKind::Plain))
        );
        assert_eq!(
            m.classify("PG&E NBT EEC Values Floating Vintage.csv.zip"),
            Some((
                "PG&E NBT EEC Values Floating Vintage.csv".into(),
                InputKind::Archived
            ))
        );
        assert_eq!(
            m.classify("2025.csv"),
            Some(("2025.csv".into(), InputKind::Plain))
        );
        assert_eq!(
            m.classify("2025.csv.zip"),
            Some(("2025.csv".into(), InputKind::Archived))
        );
        assert_eq!(m.classify("1999.csv"), None);
        assert_eq!(m.classify("20255.csv"), None);
        assert_eq!(m.classify("notes.txt"), None);
        assert_eq!(m.classify("PG&E NBT23 EEC Values Vintage.xlsx"), None);
    }

    #[test]
    fn test_discover_prefers_archive() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("2025.csv"), "").unwrap();
        fs::write(dir.path().join("2025.csv.zip"), "").unwrap();
        fs::write(dir.path().join("2024.csv"), "").unwrap();
        fs::write(dir.path().join("readme.md"), "").unwrap();
        fs::create_dir(dir.path().join("2023.csv")).unwrap();

        let inputs = discover_inputs(dir.path(), &matcher()).unwrap();

        assert_eq!(inputs.len(), 2);
        assert_eq!(inputs[0].base_name, "2024.csv");
        assert_eq!(inputs[0].kind, InputKind::Plain);
        assert_eq!(inputs[1].base_name, "2025.csv");
        assert_eq!(inputs[1].kind, InputKind::Archived);
        assert_eq!(inputs[1].path, dir.path().join("2025.csv.zip"));
    }

    #[test]
    fn test_discover_is_not_recursive() {
        let dir = tempdir().unwrap();
        fs::create_dir(dir.path().join("nested")).unwrap();
        fs::write(dir.path().join("nested/2025.csv"), "").unwrap();

        assert!(discover_inputs(dir.path(), &matcher()).unwrap().is_empty());
    }

    #[test]
    fn test_discover_missing_dir_fails() {
        let dir = tempdir().unwrap();
        assert!(discover_inputs(&dir.path().join("missing"), &matcher()).is_err());
    }

    #[test]
    fn test_extract_first_csv() {
        let dir = tempdir().unwrap();
        let scratch = tempdir().unwrap();
        let archive = dir.path().join("2025.csv.zip");
        fs::write(
            &archive,
            zip_bytes(&[("README.txt", "x"), ("data/first.CSV", "a,b"), ("second.csv", "c,d")]),
        )
        .unwrap();

        let extracted = extract_csv(&archive, scratch.path()).unwrap();

        assert_eq!(extracted, scratch.path().join("data/first.CSV"));
        assert_eq!(fs::read_to_string(extracted).unwrap(), "a,b");
    }

    #[test]
    fn test_extract_without_csv_fails() {
        let dir = tempdir().unwrap();
        let archive = dir.path().join("2025.csv.zip");
        fs::write(&archive, zip_bytes(&[("README.txt", "x")])).unwrap();

        let err = extract_csv(&archive, dir.path()).unwrap_err();
        assert!(err.to_string().contains("no CSV files"));
    }

    #[test]
    fn test_extract_corrupt_archive_fails() {
        let dir = tempdir().unwrap();
        let archive = dir.path().join("2025.csv.zip");
        fs::write(&archive, b"definitely not a zip").unwrap();

        assert!(extract_csv(&archive, dir.path()).is_err());
    }
}
