use std::collections::HashSet;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::error::Result;
use crate::models::{FeedItem, CAPTURE_HEADER};

/// Per-source capture files: append-only, tab-delimited, one row per item,
/// no two rows sharing a `link`.
pub struct CaptureStore {
    dir: PathBuf,
}

impl CaptureStore {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    pub fn file_path(&self, identifier: &str) -> PathBuf {
        self.dir.join(format!("{identifier}.csv"))
    }

    /// Raw response body dump next to the capture file, for diagnosis.
    pub fn dump_path(&self, identifier: &str) -> PathBuf {
        self.dir.join(format!("{identifier}.xml"))
    }

    /// Append the items whose `link` has not been captured yet, in order.
    /// Duplicate links within `items` collapse to the first occurrence.
    /// Returns how many rows were appended; an unchanged feed appends
    /// zero. With no items at all this is a no-op that touches no files.
    pub fn append_new(&self, identifier: &str, items: &[FeedItem]) -> Result<usize> {
        if items.is_empty() {
            return Ok(0);
        }

        let path = self.file_path(identifier);
        let mut seen = existing_links(&path)?;
        let fresh: Vec<&FeedItem> = items
            .iter()
            .filter(|item| seen.insert(item.link.clone()))
            .collect();

        if fresh.is_empty() {
            return Ok(0);
        }

        let had_file = path.exists();
        let mut out = String::new();
        if !had_file {
            out.push_str(CAPTURE_HEADER);
            out.push('\n');
        }
        for item in &fresh {
            out.push_str(&item.to_row());
            out.push('\n');
        }

        let mut file = OpenOptions::new().create(true).append(true).open(&path)?;
        file.write_all(out.as_bytes())?;
        Ok(fresh.len())
    }
}

fn existing_links(path: &Path) -> Result<HashSet<String>> {
    if !path.exists() {
        return Ok(HashSet::new());
    }
    let content = std::fs::read_to_string(path)?;
    Ok(content
        .lines()
        .skip(1) // header
        .map(|line| FeedItem::from_row(line).link)
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn item(link: &str, title: &str) -> FeedItem {
        FeedItem {
            title: title.to_string(),
            link: link.to_string(),
            description: String::new(),
            pub_date: String::new(),
            save_date: "2024-01-01 12:00:00".to_string(),
        }
    }

    #[test]
    fn test_first_append_writes_header_and_rows() {
        let dir = tempdir().unwrap();
        let store = CaptureStore::new(dir.path().to_path_buf());

        let added = store
            .append_new("src", &[item("A", "one"), item("B", "two")])
            .unwrap();
        assert_eq!(added, 2);

        let content = std::fs::read_to_string(store.file_path("src")).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], CAPTURE_HEADER);
        assert!(lines[1].starts_with("one\tA"));
    }

    #[test]
    fn test_reappend_is_idempotent() {
        let dir = tempdir().unwrap();
        let store = CaptureStore::new(dir.path().to_path_buf());
        let items = [item("A", "one"), item("B", "two")];

        store.append_new("src", &items).unwrap();
        let before = std::fs::read_to_string(store.file_path("src")).unwrap();

        let added = store.append_new("src", &items).unwrap();
        assert_eq!(added, 0);
        let after = std::fs::read_to_string(store.file_path("src")).unwrap();
        assert_eq!(before, after);
    }

    #[test]
    fn test_within_batch_duplicate_links_collapse() {
        let dir = tempdir().unwrap();
        let store = CaptureStore::new(dir.path().to_path_buf());

        let added = store
            .append_new("src", &[item("A", "first"), item("A", "second")])
            .unwrap();
        assert_eq!(added, 1);

        let content = std::fs::read_to_string(store.file_path("src")).unwrap();
        assert!(content.contains("first\tA"));
        assert!(!content.contains("second"));
    }

    #[test]
    fn test_empty_link_items_collapse_like_any_value() {
        let dir = tempdir().unwrap();
        let store = CaptureStore::new(dir.path().to_path_buf());

        let added = store
            .append_new("src", &[item("", "a"), item("", "b")])
            .unwrap();
        assert_eq!(added, 1);

        // A later run adds no second empty-link row either.
        let added = store.append_new("src", &[item("", "c")]).unwrap();
        assert_eq!(added, 0);
    }

    #[test]
    fn test_no_items_touches_nothing() {
        let dir = tempdir().unwrap();
        let store = CaptureStore::new(dir.path().to_path_buf());

        assert_eq!(store.append_new("src", &[]).unwrap(), 0);
        assert!(!store.file_path("src").exists());
    }

    #[test]
    fn test_new_items_append_without_second_header() {
        let dir = tempdir().unwrap();
        let store = CaptureStore::new(dir.path().to_path_buf());

        store.append_new("src", &[item("A", "one")]).unwrap();
        let added = store.append_new("src", &[item("B", "two")]).unwrap();
        assert_eq!(added, 1);

        let content = std::fs::read_to_string(store.file_path("src")).unwrap();
        assert_eq!(content.matches("title\tlink").count(), 1);
        assert_eq!(content.lines().count(), 3);
    }
}
