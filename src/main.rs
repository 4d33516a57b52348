//! vodbox - decode a video source and query its spiders
//!
//! Given a source URL the CLI decodes it and prints the recognised config.
//! When the payload is a site catalog its sources are registered and listed,
//! and `--search` fans a keyword out across every searchable source.

use vodbox::core::config::{CliArgs, Config};
use vodbox::core::Logger;
use vodbox::source::{SiteCatalog, SourcePipeline};

use anyhow::{Context, Result};
use clap::Parser;
use std::time::Duration;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    let args = CliArgs::parse();

    // Load configuration (handles CLI args, env vars, and config file)
    let config = match Config::load(&args) {
        Ok(cfg) => cfg,
        Err(e) => {
            // Print error to stderr since logging isn't initialized yet
            eprintln!("Failed to load configuration: {}", e);
            return Err(e.into());
        }
    };

    let _logger = match Logger::init(&config.logging) {
        Ok(logger) => logger,
        Err(e) => {
            eprintln!("Failed to initialize logging: {}", e);
            return Err(e);
        }
    };

    info!("Starting vodbox v{}", vodbox::VERSION);
    info!(
        cache_dir = ?config.plugins.cache_dir,
        entry_prefix = %config.plugins.entry_prefix,
        "Plugin configuration"
    );

    let Some(url) = args.url.as_deref() else {
        anyhow::bail!("no source URL given, see --help");
    };

    let pipeline = SourcePipeline::from_config(&config).context("Failed to create source pipeline")?;
    let timeout = Duration::from_secs(config.sources.default_timeout);

    let payload = pipeline
        .fetch_payload(url, timeout)
        .await
        .with_context(|| format!("Failed to decode {}", url))?;

    if let Ok(catalog) = SiteCatalog::parse(&payload.text, &config.plugins.entry_prefix) {
        info!(url = %url, sites = catalog.sources.len(), "Payload is a site catalog");
        pipeline.register_catalog(url, catalog);
        for source in pipeline.sources() {
            println!(
                "{}\t{}\t{:?}\t{}",
                source.key,
                source.name,
                source.kind,
                if source.searchable { "searchable" } else { "-" }
            );
        }
    } else {
        match pipeline.parse_config(url, &payload.text, url) {
            Some(source_config) => println!("{:#?}", source_config),
            None => println!("{}", payload.text),
        }
    }

    if let Some(keyword) = args.search.as_deref() {
        let hits = pipeline.search_all(keyword, false).await;
        info!(keyword = %keyword, sources = hits.len(), "Search finished");
        println!("{}", serde_json::to_string_pretty(&hits)?);
    }

    Ok(())
}
