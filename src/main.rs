use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;

use fhirsite::config::Config;
use fhirsite::server::{self, AppState};

#[derive(Parser, Debug)]
#[command(name = "fhirsite", about = "Podcast feed relay and catalog search for the FHIR site")]
struct Args {
    /// Configuration file (missing file means defaults)
    #[arg(long, value_name = "FILE", default_value = "fhirsite.toml")]
    config: PathBuf,

    /// Override the listen address from the config file
    #[arg(long, value_name = "ADDR")]
    bind: Option<String>,

    /// Fetch the podcast feed once, print a summary and exit
    #[arg(long)]
    check_feed: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let mut config = Config::load(&args.config)
        .with_context(|| format!("Failed to load config: {}", args.config.display()))?;
    if let Some(bind) = args.bind {
        config.bind_addr = bind;
    }
    config.validate().context("Invalid configuration")?;

    let state = AppState::from_config(&config)?;

    if args.check_feed {
        let snapshot = state
            .feed
            .get()
            .await
            .with_context(|| format!("Failed to fetch {}", config.feed_url))?;
        println!(
            "{}: {} episodes",
            snapshot.podcast.title,
            snapshot.podcast.episodes.len()
        );
        for episode in &snapshot.podcast.episodes {
            let media = if episode.enclosure.is_some() {
                "audio"
            } else {
                "no audio"
            };
            println!("  {} ({}, {})", episode.title, episode.pub_date, media);
        }
        return Ok(());
    }

    server::serve(&config, state).await
}
