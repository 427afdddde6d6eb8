use std::collections::HashSet;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;

use chrono::NaiveDate;

use crate::error::Result;

/// Fold every per-source capture file into its dated global archive and
/// clear the capture directory.
///
/// Archive rows are deduplicated on the full row line, stricter than the
/// capture files' link key: a row differing in any field (even only
/// `save_date`) is new. Each processed capture file is deleted, whether or
/// not any of its rows were appended; one unreadable file is logged and
/// skipped without stopping the rest.
pub fn archive_day(capture_dir: &Path, archive_dir: &Path, date: NaiveDate) -> Result<()> {
    if !capture_dir.exists() {
        return Ok(());
    }
    std::fs::create_dir_all(archive_dir)?;

    let date_str = date.format("%Y-%m-%d").to_string();

    let mut captures: Vec<_> = std::fs::read_dir(capture_dir)?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.extension().is_some_and(|ext| ext == "csv"))
        .collect();
    captures.sort();

    for path in captures {
        match archive_one(&path, archive_dir, &date_str) {
            Ok(appended) => {
                tracing::debug!("Archived {} rows from {}", appended, path.display());
            }
            Err(e) => {
                tracing::warn!("Failed to archive {}: {}", path.display(), e);
            }
        }
    }

    Ok(())
}

fn archive_one(capture_path: &Path, archive_dir: &Path, date_str: &str) -> Result<usize> {
    let content = std::fs::read_to_string(capture_path)?;

    let identifier = capture_path
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_default();
    let target = archive_dir.join(format!("{identifier}_{date_str}.csv"));

    let mut existing: HashSet<String> = if target.exists() {
        std::fs::read_to_string(&target)?
            .lines()
            .map(str::to_string)
            .collect()
    } else {
        HashSet::new()
    };

    let mut out = String::new();
    let mut appended = 0usize;
    for row in content.lines().skip(1) {
        if existing.insert(row.to_string()) {
            out.push_str(row);
            out.push('\n');
            appended += 1;
        }
    }

    // Open in append mode even for zero rows: the archive file marks the
    // capture as processed.
    let mut file = OpenOptions::new().create(true).append(true).open(&target)?;
    file.write_all(out.as_bytes())?;

    // The capture's data is subsumed once processed; remove it
    // unconditionally.
    std::fs::remove_file(capture_path)?;
    Ok(appended)
}
