use std::collections::HashMap;

use crate::repositories::RepositoryCandidate;

// Substring match on purpose: over-rejection ("database" hits "data") is
// cheaper than letting data-dump repositories into the sample.
const DATASET_MARKERS: &[&str] = &["dataset", "data-set", "data"];

/// Local pre-filter applied before any per-candidate network call.
pub trait CandidateScreen {
    /// Returns false when the candidate should be dropped without further checks.
    fn keep(&self, candidate: &RepositoryCandidate) -> bool;
}

/// Rejects candidates whose name or description mentions a dataset marker.
pub struct KeywordScreen {
    markers: Vec<String>,
}

impl KeywordScreen {
    pub fn new(markers: &[&str]) -> Self {
        Self {
            markers: markers.iter().map(|m| m.to_lowercase()).collect(),
        }
    }
}

impl Default for KeywordScreen {
    fn default() -> Self {
        Self::new(DATASET_MARKERS)
    }
}

impl CandidateScreen for KeywordScreen {
    fn keep(&self, candidate: &RepositoryCandidate) -> bool {
        let name = candidate.name.to_lowercase();
        let description = candidate
            .description
            .as_deref()
            .unwrap_or("")
            .to_lowercase();
        !self
            .markers
            .iter()
            .any(|m| name.contains(m) || description.contains(m))
    }
}

/// Fraction of bytes written in `target` over all languages github detected
/// for the repository. An empty breakdown counts as 0.
pub fn majority_fraction(languages: &HashMap<String, u64>, target: &str) -> f64 {
    let total: u64 = languages.values().sum();
    if total == 0 {
        return 0.0;
    }
    let target_bytes: u64 = languages
        .iter()
        .filter(|(language, _)| language.eq_ignore_ascii_case(target))
        .map(|(_, bytes)| *bytes)
        .sum();
    target_bytes as f64 / total as f64
}

/// A repository qualifies when at least half of its bytes are in the target
/// language. Exactly half still qualifies.
pub fn is_majority(languages: &HashMap<String, u64>, target: &str) -> bool {
    majority_fraction(languages, target) >= 0.5
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(name: &str, description: Option<&str>) -> RepositoryCandidate {
        RepositoryCandidate {
            owner: "octocat".to_string(),
            name: name.to_string(),
            html_url: format!("https://github.com/octocat/{}", name),
            stars: 42,
            forks: 7,
            size: 1024,
            description: description.map(str::to_string),
            default_branch: "main".to_string(),
        }
    }

    fn languages(pairs: &[(&str, u64)]) -> HashMap<String, u64> {
        pairs
            .iter()
            .map(|(language, bytes)| (language.to_string(), *bytes))
            .collect()
    }

    #[test]
    fn rejects_dataset_marker_in_name() {
        let screen = KeywordScreen::default();
        assert!(!screen.keep(&candidate("my-data-viz", None)));
    }

    #[test]
    fn rejects_dataset_marker_in_description() {
        let screen = KeywordScreen::default();
        assert!(!screen.keep(&candidate("viz", Some("a JS dataset tool"))));
    }

    // Documents the known over-rejection of the substring heuristic: "data"
    // also hits names that merely contain it.
    #[test]
    fn rejects_substring_hits_inside_larger_words() {
        let screen = KeywordScreen::default();
        assert!(!screen.keep(&candidate("data-structures-js", None)));
        assert!(!screen.keep(&candidate("tiny-database", None)));
    }

    #[test]
    fn keeps_unmarked_candidate() {
        let screen = KeywordScreen::default();
        assert!(screen.keep(&candidate("triangle-renderer", Some("a webgl toy"))));
    }

    #[test]
    fn keeps_candidate_without_description() {
        let screen = KeywordScreen::default();
        assert!(screen.keep(&candidate("triangle-renderer", None)));
    }

    #[test]
    fn majority_by_byte_fraction() {
        let breakdown = languages(&[("JavaScript", 600), ("Python", 400)]);
        assert!(is_majority(&breakdown, "javascript"));

        let breakdown = languages(&[("JavaScript", 400), ("Python", 600)]);
        assert!(!is_majority(&breakdown, "javascript"));
    }

    #[test]
    fn exact_half_still_qualifies() {
        let breakdown = languages(&[("JavaScript", 500), ("Python", 500)]);
        assert_eq!(majority_fraction(&breakdown, "javascript"), 0.5);
        assert!(is_majority(&breakdown, "javascript"));
    }

    #[test]
    fn language_names_compare_case_insensitively() {
        let breakdown = languages(&[("JavaScript", 1000)]);
        assert!(is_majority(&breakdown, "JAVASCRIPT"));
    }

    #[test]
    fn empty_breakdown_never_qualifies() {
        let breakdown = HashMap::new();
        assert_eq!(majority_fraction(&breakdown, "javascript"), 0.0);
        assert!(!is_majority(&breakdown, "javascript"));
    }
}
