use std::time::Duration;

use log::warn;
use octocrab::{Octocrab, Page};
use rand::Rng;
use serde::Deserialize;
use thiserror::Error;
use url::Url;

#[derive(Debug, Error)]
pub enum CommitCountError {
    #[error("commit listing for {repo} failed after {attempts} attempts: {last_error}")]
    RetriesExhausted {
        repo: String,
        attempts: u32,
        last_error: String,
    },
    #[error("pagination link for {repo} carries no readable page number: {url}")]
    MalformedPagination { repo: String, url: Url },
}

/// Bounded exponential backoff for the commit-count probe.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_jitter: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_secs(1),
            max_jitter: Duration::from_millis(500),
        }
    }
}

impl RetryPolicy {
    /// Delay before jitter for a 0-based attempt number.
    fn backoff(&self, attempt: u32) -> Duration {
        self.base_delay * 2u32.saturating_pow(attempt)
    }

    fn delay(&self, attempt: u32) -> Duration {
        let jitter_ms = rand::thread_rng().gen_range(0..=self.max_jitter.as_millis() as u64);
        self.backoff(attempt) + Duration::from_millis(jitter_ms)
    }
}

/// One entry of the commits listing; only its presence matters, the count
/// comes from the pagination links.
#[derive(Debug, Deserialize)]
pub struct CommitItem {}

/// Number of commits on `branch`, derived from the commits listing requested
/// one commit per page: the `rel="last"` page number equals the commit count.
/// Transport failures are retried under `policy`; exhaustion yields a typed
/// error, never a hang.
pub async fn resolve_commit_count(
    octocrab: &Octocrab,
    owner: &str,
    name: &str,
    branch: &str,
    policy: &RetryPolicy,
    timeout: Duration,
) -> Result<u64, CommitCountError> {
    let repo = format!("{}/{}", owner, name);
    let route = format!("/repos/{}/commits", repo);
    let mut attempts = 0u32;
    loop {
        let params = [("sha", branch), ("per_page", "1")];
        let request = octocrab.get::<Page<CommitItem>, _, _>(&route, Some(&params));
        let last_error = match tokio::time::timeout(timeout, request).await {
            Ok(Ok(listing)) => {
                let last = listing
                    .last
                    .as_ref()
                    .and_then(|uri| Url::parse(&uri.to_string()).ok());
                return commit_count(&repo, last.as_ref(), listing.items.len());
            }
            Ok(Err(error)) => error.to_string(),
            Err(_) => "request timed out".to_string(),
        };
        attempts += 1;
        if attempts >= policy.max_attempts {
            return Err(CommitCountError::RetriesExhausted {
                repo,
                attempts,
                last_error,
            });
        }
        let pause = policy.delay(attempts - 1);
        warn!(
            "Commit listing for {} failed ({}); retrying in {:?}",
            repo, last_error, pause
        );
        tokio::time::sleep(pause).await;
    }
}

fn commit_count(
    repo: &str,
    last: Option<&Url>,
    items_on_page: usize,
) -> Result<u64, CommitCountError> {
    match last {
        Some(url) => match page_number(url) {
            Some(pages) => Ok(u64::from(pages)),
            None => Err(CommitCountError::MalformedPagination {
                repo: repo.to_string(),
                url: url.clone(),
            }),
        },
        // No pagination links: the single returned page is the whole history.
        None => Ok(items_on_page as u64),
    }
}

/// Reads the `page` query parameter out of a pagination link.
fn page_number(url: &Url) -> Option<u32> {
    url.query_pairs()
        .find(|(key, _)| key == "page")
        .and_then(|(_, value)| value.parse().ok())
}
