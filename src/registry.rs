use std::path::PathBuf;

use crate::error::Result;
use crate::models::Source;

const SOURCES_HEADER: &str = "url\tdescription\tproxy";

/// The ordered source table backing the pipeline.
///
/// The table is tab-delimited with a `url  description  proxy` header.
/// The pipeline only reads it; `upsert` exists for the `add` command and
/// any external configuration UI.
pub struct SourceRegistry {
    path: PathBuf,
}

impl SourceRegistry {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    /// Load all sources in table order. A missing table is "nothing to
    /// do": an empty list, not an error. Rows without a url are skipped.
    pub fn load(&self) -> Result<Vec<Source>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }

        let content = std::fs::read_to_string(&self.path)?;
        let sources = content
            .lines()
            .skip(1) // header
            .filter_map(parse_row)
            .collect();
        Ok(sources)
    }

    /// Insert or update a source keyed by url (last write wins), then
    /// rewrite the whole table with its header.
    pub fn upsert(&self, url: &str, description: &str, proxy: &str) -> Result<()> {
        let mut sources = self.load()?;

        match sources.iter_mut().find(|s| s.url == url) {
            Some(existing) => {
                existing.description = description.to_string();
                existing.proxy = proxy.to_string();
            }
            None => sources.push(Source {
                url: url.to_string(),
                description: description.to_string(),
                proxy: proxy.to_string(),
            }),
        }

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let mut table = String::from(SOURCES_HEADER);
        table.push('\n');
        for source in &sources {
            table.push_str(&format!(
                "{}\t{}\t{}\n",
                flatten(&source.url),
                flatten(&source.description),
                flatten(&source.proxy)
            ));
        }
        std::fs::write(&self.path, table)?;
        Ok(())
    }
}

fn parse_row(line: &str) -> Option<Source> {
    let mut cols = line.split('\t');
    let url = cols.next().unwrap_or("").trim();
    if url.is_empty() {
        return None;
    }
    Some(Source {
        url: url.to_string(),
        description: cols.next().unwrap_or("").to_string(),
        proxy: cols.next().unwrap_or("").trim().to_string(),
    })
}

fn flatten(field: &str) -> String {
    field.replace(['\t', '\n', '\r'], " ")
}
