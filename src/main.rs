use std::path::PathBuf;

use chrono::Local;
use clap::{Parser, Subcommand};

mod config;
mod error;
mod feed;
mod models;
mod pipeline;
mod registry;
mod scheduler;
mod store;

use config::Config;
use error::Result;
use registry::SourceRegistry;

#[derive(Parser)]
#[command(name = "neurofeed", version, about = "RSS/Atom ingestion pipeline")]
struct Cli {
    /// Override the configured data directory.
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Fetch every configured feed once and append new items
    Fetch,
    /// Fold capture files into the dated global archive
    Archive,
    /// Stay resident: fetch on interval boundaries, archive at midnight
    Run,
    /// Add a feed source, or update it if the URL is already configured
    Add {
        url: String,
        #[arg(long, default_value = "")]
        description: String,
        /// Per-source HTTP proxy URL
        #[arg(long, default_value = "")]
        proxy: String,
    },
    /// List configured feed sources
    Sources,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging (only show warnings and errors by default)
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::WARN.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let mut config = Config::load()?;
    if let Some(data_dir) = cli.data_dir {
        config.data_dir = data_dir;
    }

    match cli.command {
        Command::Fetch => {
            let report = pipeline::run_fetch(&config).await?;
            println!(
                "Done: {} sources, {} new items, {} failures",
                report.outcomes.len(),
                report.added(),
                report.failures()
            );
        }
        Command::Archive => {
            store::archive_day(
                &config.capture_dir(),
                &config.archive_dir(),
                Local::now().date_naive(),
            )?;
        }
        Command::Run => {
            scheduler::run(&config).await?;
        }
        Command::Add {
            url,
            description,
            proxy,
        } => {
            let url = normalize_url(&url);
            SourceRegistry::new(config.sources_path()).upsert(&url, &description, &proxy)?;
            println!("Saved source: {url}");
        }
        Command::Sources => {
            for source in SourceRegistry::new(config.sources_path()).load()? {
                println!("{}", source.url);
            }
        }
    }

    Ok(())
}

/// Scheme-less input gets `http://` before it lands in the source table.
fn normalize_url(url: &str) -> String {
    if url.starts_with("http://") || url.starts_with("https://") {
        url.to_string()
    } else {
        format!("http://{url}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_url() {
        assert_eq!(normalize_url("example.com/rss"), "http://example.com/rss");
        assert_eq!(normalize_url("http://example.com/rss"), "http://example.com/rss");
        assert_eq!(normalize_url("https://example.com/rss"), "https://example.com/rss");
    }
}
