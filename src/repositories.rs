use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use indicatif::ProgressBar;
use log::{info, warn};
use octocrab::models::Repository;
use octocrab::{Octocrab, Page};

use crate::commits::{resolve_commit_count, CommitCountError, RetryPolicy};
use crate::filters::{is_majority, CandidateScreen};

// Github rejects larger pages on the search endpoint.
pub const MAX_PAGE_SIZE: u8 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    Ascending,
    Descending,
}

impl SortOrder {
    pub fn as_str(self) -> &'static str {
        match self {
            SortOrder::Ascending => "asc",
            SortOrder::Descending => "desc",
        }
    }
}

/// Immutable search parameters. The page cursor lives in the collector loop.
#[derive(Debug, Clone)]
pub struct SearchQuery {
    pub language: String,
    pub min_stars: u32,
    pub min_forks: u32,
    pub exclude_archived: bool,
    pub page_size: u8,
    pub sort_key: String,
    pub order: SortOrder,
}

impl SearchQuery {
    /// Renders the github search syntax, e.g.
    /// `language:javascript stars:>10 forks:>10 archived:false`.
    pub fn query_string(&self) -> String {
        let mut query = format!(
            "language:{} stars:>{} forks:>{}",
            self.language, self.min_stars, self.min_forks
        );
        if self.exclude_archived {
            query.push_str(" archived:false");
        }
        query
    }
}

/// One search result, extracted verbatim from a page of results.
#[derive(Debug, Clone)]
pub struct RepositoryCandidate {
    pub owner: String,
    pub name: String,
    pub html_url: String,
    pub stars: u32,
    pub forks: u32,
    pub size: u32,
    pub description: Option<String>,
    pub default_branch: String,
}

impl RepositoryCandidate {
    /// None when the item lacks the fields every later step depends on.
    pub fn from_search_item(repo: &Repository) -> Option<Self> {
        let owner = repo.owner.as_ref()?.login.clone();
        let html_url = repo.html_url.as_ref()?.to_string();
        Some(Self {
            owner,
            name: repo.name.clone(),
            html_url,
            stars: repo.stargazers_count.unwrap_or(0),
            forks: repo.forks_count.unwrap_or(0),
            size: repo.size.unwrap_or(0),
            description: repo.description.clone(),
            default_branch: repo
                .default_branch
                .clone()
                .unwrap_or_else(|| "main".to_string()),
        })
    }
}

/// Output row; field order is the CSV column order.
#[derive(Debug, Serialize)]
pub struct AcceptedRecord {
    pub name: String,
    pub url: String,
    pub stars: u32,
    pub forks: u32,
    pub commits: u64,
    pub size: u32,
}

impl AcceptedRecord {
    fn from_candidate(candidate: &RepositoryCandidate, commits: u64) -> Self {
        Self {
            name: candidate.name.clone(),
            url: candidate.html_url.clone(),
            stars: candidate.stars,
            forks: candidate.forks,
            commits,
            size: candidate.size,
        }
    }
}

/// Why the collector loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// The target count was reached.
    Success,
    /// A page came back empty; the search has no more results.
    ExhaustedSource,
    /// The search request itself failed. Partial results are kept.
    UpstreamError,
    /// Ctrl-C. Partial results are kept.
    Cancelled,
}

enum FilterOutcome {
    Accepted(AcceptedRecord),
    Rejected(&'static str),
    /// A sub-request failed, so eligibility is unknown rather than denied.
    Indeterminate(String),
}

/// The requests the collector loop makes, one seam per endpoint, so the loop
/// can run against scripted pages without the network.
#[allow(async_fn_in_trait)]
pub trait RepositoryHost {
    /// One page of search results, already extracted to candidates.
    async fn search_page(
        &self,
        query: &SearchQuery,
        page: u32,
    ) -> Result<Vec<RepositoryCandidate>>;

    /// Language name to byte count for the candidate.
    async fn language_breakdown(
        &self,
        candidate: &RepositoryCandidate,
    ) -> Result<HashMap<String, u64>>;

    /// Number of commits on the candidate's default branch.
    async fn commit_count(&self, candidate: &RepositoryCandidate)
        -> Result<u64, CommitCountError>;
}

pub async fn perform_search(
    octocrab: &Octocrab,
    query: &SearchQuery,
    page: u32,
) -> octocrab::Result<Page<Repository>> {
    octocrab
        .search()
        .repositories(&query.query_string())
        .sort(query.sort_key.as_str())
        .order(query.order.as_str())
        .page(page)
        .per_page(query.page_size.min(MAX_PAGE_SIZE))
        .send()
        .await
}

/// Production host backed by the github api, with one uniform timeout across
/// all calls and the bounded retry policy on the commit-count probe.
pub struct GithubHost<'a> {
    octocrab: &'a Octocrab,
    retry: RetryPolicy,
    timeout: Duration,
}

impl<'a> GithubHost<'a> {
    pub fn new(octocrab: &'a Octocrab, retry: RetryPolicy, timeout: Duration) -> Self {
        Self {
            octocrab,
            retry,
            timeout,
        }
    }
}

impl RepositoryHost for GithubHost<'_> {
    async fn search_page(
        &self,
        query: &SearchQuery,
        page: u32,
    ) -> Result<Vec<RepositoryCandidate>> {
        let search = perform_search(self.octocrab, query, page);
        let search_page = match tokio::time::timeout(self.timeout, search).await {
            Ok(result) => result?,
            Err(_) => anyhow::bail!("search request timed out"),
        };
        let mut candidates = Vec::with_capacity(search_page.items.len());
        for item in &search_page.items {
            match RepositoryCandidate::from_search_item(item) {
                Some(candidate) => candidates.push(candidate),
                None => warn!("Skipping search item without owner or url: {}", item.name),
            }
        }
        Ok(candidates)
    }

    async fn language_breakdown(
        &self,
        candidate: &RepositoryCandidate,
    ) -> Result<HashMap<String, u64>> {
        let route = format!("/repos/{}/{}/languages", candidate.owner, candidate.name);
        let request = self
            .octocrab
            .get::<HashMap<String, u64>, _, _>(&route, None::<&()>);
        match tokio::time::timeout(self.timeout, request).await {
            Ok(Ok(languages)) => Ok(languages),
            Ok(Err(error)) => Err(error.into()),
            Err(_) => Err(anyhow::anyhow!("request timed out")),
        }
    }

    async fn commit_count(
        &self,
        candidate: &RepositoryCandidate,
    ) -> Result<u64, CommitCountError> {
        resolve_commit_count(
            self.octocrab,
            &candidate.owner,
            &candidate.name,
            &candidate.default_branch,
            &self.retry,
            self.timeout,
        )
        .await
    }
}

/// Drives pagination against the search endpoint and accumulates accepted
/// records until one of the `Termination` conditions fires.
pub struct Collector<H, S> {
    host: H,
    query: SearchQuery,
    target_count: usize,
    min_commits: u64,
    screen: S,
    cancelled: Arc<AtomicBool>,
}

impl<H: RepositoryHost, S: CandidateScreen> Collector<H, S> {
    pub fn new(
        host: H,
        query: SearchQuery,
        target_count: usize,
        min_commits: u64,
        screen: S,
        cancelled: Arc<AtomicBool>,
    ) -> Self {
        Self {
            host,
            query,
            target_count,
            min_commits,
            screen,
            cancelled,
        }
    }

    pub async fn run(&self, progress: &ProgressBar) -> (Vec<AcceptedRecord>, Termination) {
        let mut records = Vec::new();
        let mut page = 1u32;
        let termination = loop {
            if self.cancelled.load(Ordering::Relaxed) {
                break Termination::Cancelled;
            }
            if records.len() >= self.target_count {
                break Termination::Success;
            }

            info!("Fetching search page {}...", page);
            let candidates = match self.host.search_page(&self.query, page).await {
                Ok(candidates) => candidates,
                Err(error) => {
                    warn!("Search request for page {} failed: {}", page, error);
                    break Termination::UpstreamError;
                }
            };
            if candidates.is_empty() {
                break Termination::ExhaustedSource;
            }

            let mut accepted = 0u32;
            let mut rejected = 0u32;
            let mut indeterminate = 0u32;
            for candidate in &candidates {
                // Once the target is reached mid-page the rest of the page is skipped.
                if records.len() >= self.target_count {
                    break;
                }
                if self.cancelled.load(Ordering::Relaxed) {
                    break;
                }
                match self.evaluate(candidate).await {
                    FilterOutcome::Accepted(record) => {
                        info!(
                            "Accepted {}/{} ({} commits)",
                            candidate.owner, candidate.name, record.commits
                        );
                        records.push(record);
                        accepted += 1;
                        progress.inc(1);
                    }
                    FilterOutcome::Rejected(reason) => {
                        info!("Rejected {}/{}: {}", candidate.owner, candidate.name, reason);
                        rejected += 1;
                    }
                    FilterOutcome::Indeterminate(reason) => {
                        warn!(
                            "Could not evaluate {}/{}, skipping: {}",
                            candidate.owner, candidate.name, reason
                        );
                        indeterminate += 1;
                    }
                }
            }
            info!(
                "Page {}: {} accepted, {} rejected, {} indeterminate; {} of {} collected",
                page,
                accepted,
                rejected,
                indeterminate,
                records.len(),
                self.target_count
            );
            page += 1;
        };
        (records, termination)
    }

    /// Predicate chain, cheapest first so the local heuristic spares the two
    /// network probes for candidates it already rules out.
    async fn evaluate(&self, candidate: &RepositoryCandidate) -> FilterOutcome {
        if !self.screen.keep(candidate) {
            return FilterOutcome::Rejected("dataset heuristic");
        }

        let languages = match self.host.language_breakdown(candidate).await {
            Ok(languages) => languages,
            Err(error) => {
                return FilterOutcome::Indeterminate(format!("language breakdown: {}", error))
            }
        };
        if !is_majority(&languages, &self.query.language) {
            return FilterOutcome::Rejected("below majority-language threshold");
        }

        let commits = match self.host.commit_count(candidate).await {
            Ok(commits) => commits,
            Err(error) => return FilterOutcome::Indeterminate(error.to_string()),
        };
        if commits < self.min_commits {
            return FilterOutcome::Rejected("too few commits");
        }

        FilterOutcome::Accepted(AcceptedRecord::from_candidate(candidate, commits))
    }
}
