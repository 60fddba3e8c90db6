extern crate octocrab;
extern crate tokio;
#[macro_use]
extern crate serde_derive;

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Parser;
use http::header::USER_AGENT;
use indicatif::ProgressBar;
use log::{error, info};
use octocrab::Octocrab;
use tokio::fs::OpenOptions;

pub mod commits;
pub mod filters;
pub mod repositories;

use commits::RetryPolicy;
use filters::KeywordScreen;
use repositories::{Collector, GithubHost, SearchQuery, SortOrder, Termination};

/// Collect popular single-language repositories into a CSV table.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// Language used both in the search query and the majority-language filter
    #[arg(long, default_value = "javascript")]
    language: String,

    /// Minimum star count in the search query
    #[arg(long, default_value_t = 10)]
    min_stars: u32,

    /// Minimum fork count in the search query
    #[arg(long, default_value_t = 10)]
    min_forks: u32,

    /// Minimum number of commits on the default branch
    #[arg(long, default_value_t = 10)]
    min_commits: u64,

    /// Search page size (github caps this at 100)
    #[arg(long, default_value_t = 100)]
    per_page: u8,

    /// Stop once this many repositories have been accepted
    #[arg(long, default_value_t = 100)]
    target_count: usize,

    /// Search sort key (size, stars, forks, updated)
    #[arg(long, default_value = "size")]
    sort: String,

    /// Sort ascending instead of descending
    #[arg(long, default_value_t = false)]
    ascending: bool,

    /// Output CSV file
    #[arg(long, default_value = "filtered_repositories.csv")]
    output: PathBuf,

    /// Timeout applied to every api call, in seconds
    #[arg(long, default_value_t = 30)]
    timeout_secs: u64,

    /// Maximum attempts for the commit-count probe
    #[arg(long, default_value_t = 5)]
    max_attempts: u32,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    let token = std::env::var("GITHUB_TOKEN").context("GITHUB_TOKEN env variable is required")?;
    let octocrab = Octocrab::builder()
        .personal_token(token)
        .add_header(USER_AGENT, "repo_harvester".to_string())
        .build()?;

    let cancelled = Arc::new(AtomicBool::new(false));
    let ctrl = cancelled.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            ctrl.store(true, Ordering::Relaxed);
        }
    });

    let query = SearchQuery {
        language: args.language.clone(),
        min_stars: args.min_stars,
        min_forks: args.min_forks,
        exclude_archived: true,
        page_size: args.per_page,
        sort_key: args.sort.clone(),
        order: if args.ascending {
            SortOrder::Ascending
        } else {
            SortOrder::Descending
        },
    };
    let retry = RetryPolicy {
        max_attempts: args.max_attempts,
        ..RetryPolicy::default()
    };
    let host = GithubHost::new(&octocrab, retry, Duration::from_secs(args.timeout_secs));
    let collector = Collector::new(
        host,
        query,
        args.target_count,
        args.min_commits,
        KeywordScreen::default(),
        cancelled,
    );

    info!(
        "Collecting up to {} {} repositories...",
        args.target_count, args.language
    );
    let progress = ProgressBar::new(args.target_count as u64);
    let (records, termination) = collector.run(&progress).await;
    progress.finish();

    let mut writer = csv_async::AsyncSerializer::from_writer(
        OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&args.output)
            .await?,
    );
    for record in &records {
        writer.serialize(record).await?;
    }
    writer.flush().await?;

    info!(
        "Collected {} repositories into {}",
        records.len(),
        args.output.display()
    );
    match termination {
        Termination::Success => info!("Target count reached."),
        Termination::ExhaustedSource => {
            info!("Search results exhausted before reaching the target count.")
        }
        Termination::Cancelled => info!("Interrupted; partial results written."),
        Termination::UpstreamError => {
            error!("Search request failed; partial results written.");
            bail!(
                "aborted after upstream search failure ({} records written)",
                records.len()
            );
        }
    }
    Ok(())
}
