use crate::config::Config;
use crate::error::Result;
use crate::feed::{parse_feed, source_identifier, FeedFetcher};
use crate::models::{BatchReport, Source, SourceOutcome};
use crate::registry::SourceRegistry;
use crate::store::CaptureStore;

/// Run one fetch batch: every configured source, strictly one after
/// another. A source's failure is recorded and the batch moves on; only
/// top-level setup (client, capture directory) can abort.
pub async fn run_fetch(config: &Config) -> Result<BatchReport> {
    let mut report = BatchReport::default();

    let sources_path = config.sources_path();
    if !sources_path.exists() {
        println!("Source table not found: {}", sources_path.display());
        return Ok(report);
    }

    let sources = SourceRegistry::new(sources_path).load()?;
    if sources.is_empty() {
        println!("No sources configured");
        return Ok(report);
    }

    std::fs::create_dir_all(config.capture_dir())?;
    let fetcher = FeedFetcher::new(config.fetch_timeout_secs);
    let store = CaptureStore::new(config.capture_dir());

    for source in &sources {
        println!("Fetching: {}", source.url);
        let identifier = source_identifier(&source.url);
        let outcome = process_source(&fetcher, &store, source, &identifier).await;

        match &outcome {
            SourceOutcome::Added(n) => {
                println!(
                    "Added {} new items to: {}",
                    n,
                    store.file_path(&identifier).display()
                );
            }
            SourceOutcome::NoNewItems => {
                println!("No new items for: {}", store.file_path(&identifier).display());
            }
            SourceOutcome::NoItems => {
                tracing::debug!("No items extracted from {}", source.url);
            }
            SourceOutcome::Failed(reason) => {
                println!("Failed to fetch {}: {}", source.url, reason);
            }
        }

        report.record(&source.url, outcome);
    }

    tracing::info!(
        "Batch finished: {} sources, {} new items, {} failures",
        report.outcomes.len(),
        report.added(),
        report.failures()
    );
    Ok(report)
}

async fn process_source(
    fetcher: &FeedFetcher,
    store: &CaptureStore,
    source: &Source,
    identifier: &str,
) -> SourceOutcome {
    let raw = match fetcher.fetch(source).await {
        Ok(raw) => raw,
        Err(e) => return SourceOutcome::Failed(e.to_string()),
    };

    // Dump the raw body for diagnosis whatever the parse does with it.
    let dump_path = store.dump_path(identifier);
    if let Err(e) = std::fs::write(&dump_path, &raw) {
        tracing::warn!("Failed to write {}: {}", dump_path.display(), e);
    } else {
        tracing::debug!("Saved XML to: {}", dump_path.display());
    }

    let items = parse_feed(&raw);
    if items.is_empty() {
        return SourceOutcome::NoItems;
    }

    match store.append_new(identifier, &items) {
        Ok(0) => SourceOutcome::NoNewItems,
        Ok(added) => SourceOutcome::Added(added),
        Err(e) => SourceOutcome::Failed(format!("persist failed: {e}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_missing_source_table_is_empty_report() {
        let dir = tempdir().unwrap();
        let config = Config {
            data_dir: dir.path().to_path_buf(),
            ..Config::default()
        };

        let report = run_fetch(&config).await.unwrap();
        assert!(report.outcomes.is_empty());
        // Nothing to do must not create the capture directory.
        assert!(!config.capture_dir().exists());
    }

    #[tokio::test]
    async fn test_empty_source_table_is_empty_report() {
        let dir = tempdir().unwrap();
        let config = Config {
            data_dir: dir.path().to_path_buf(),
            ..Config::default()
        };
        std::fs::write(config.sources_path(), "url\tdescription\tproxy\n").unwrap();

        let report = run_fetch(&config).await.unwrap();
        assert!(report.outcomes.is_empty());
    }
}
