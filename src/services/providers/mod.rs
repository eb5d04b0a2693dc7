//! External metadata providers and the scoring aggregator
//!
//! Each provider answers `search` with at most five candidates and may
//! support a direct `get_by_id` lookup. Provider failures are isolated:
//! one provider erroring never aborts an enrichment pass.

pub mod audible;
pub mod audnexus;
pub mod googlebooks;
pub mod openlibrary;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::services::identifier::Identification;

pub use audible::AudibleProvider;
pub use audnexus::AudnexusProvider;
pub use googlebooks::GoogleBooksProvider;
pub use openlibrary::OpenLibraryProvider;

/// How many candidates a provider may return per search
pub const MAX_CANDIDATES: usize = 5;

/// Per-request timeout for provider calls
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// A metadata source queried during enrichment
#[async_trait]
pub trait MetadataProvider: Send + Sync {
    /// Short provider name, also used as the result `source`
    fn name(&self) -> &'static str;

    /// Search for candidates matching a title (and optionally an author)
    async fn search(&self, query: &str, author: Option<&str>) -> Result<Vec<Identification>>;

    /// Direct lookup by an external identifier, for providers that have one
    async fn get_by_id(&self, _id: &str) -> Result<Option<Identification>> {
        Ok(None)
    }
}

/// Fans a seed identification out to every enabled provider and folds the
/// candidates into a single highest-confidence result.
pub struct Aggregator {
    providers: Vec<Arc<dyn MetadataProvider>>,
}

impl Aggregator {
    pub fn new(providers: Vec<Arc<dyn MetadataProvider>>) -> Self {
        Self { providers }
    }

    /// Build the provider list from configuration, in priority order.
    /// Audnexus is lookup-only and rides along whenever Audible is enabled.
    pub fn from_config(config: &Config) -> Self {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .expect("reqwest client");

        let mut providers: Vec<Arc<dyn MetadataProvider>> = Vec::new();
        for name in &config.metadata_providers {
            match name.as_str() {
                "openlibrary" => providers.push(Arc::new(OpenLibraryProvider::new(client.clone()))),
                "googlebooks" => providers.push(Arc::new(GoogleBooksProvider::new(client.clone()))),
                "audible" => providers.push(Arc::new(AudibleProvider::new(client.clone()))),
                "audnexus" => {}
                other => warn!(provider = other, "Unknown metadata provider, skipping"),
            }
        }
        if config
            .metadata_providers
            .iter()
            .any(|p| p == "audible" || p == "audnexus")
        {
            providers.push(Arc::new(AudnexusProvider::new(
                client,
                config.audnexus_url.clone(),
            )));
        }

        info!(
            providers = ?providers.iter().map(|p| p.name()).collect::<Vec<_>>(),
            "Metadata providers configured"
        );
        Self { providers }
    }

    /// Raw multi-provider search, used by the review surface to offer
    /// alternative candidates to an operator.
    pub async fn search_all(&self, query: &str, author: Option<&str>) -> Vec<Identification> {
        let mut results = Vec::new();
        for provider in &self.providers {
            match provider.search(query, author).await {
                Ok(mut candidates) => {
                    candidates.truncate(MAX_CANDIDATES);
                    results.extend(candidates);
                }
                Err(e) => warn!(provider = provider.name(), error = %e, "Provider search failed"),
            }
        }
        results
    }

    /// Enrich a seed identification against every provider: the best
    /// candidate wins, title and author replaced only above the high-trust
    /// score.
    ///
    /// Providers are queried in registration order; a later provider must
    /// strictly beat the running maximum to take over, so ties always go
    /// to the first registered.
    pub async fn enrich(&self, seed: Identification) -> Identification {
        let query = match seed.title.as_deref().filter(|t| !t.is_empty()) {
            Some(t) => t.to_string(),
            None => {
                warn!("No title to search for, skipping enrichment");
                return seed;
            }
        };
        let author = seed.author.clone();

        let mut best = seed.clone();
        let mut highest_score: u8 = 0;

        for provider in &self.providers {
            let candidates = match provider.search(&query, author.as_deref()).await {
                Ok(c) => c,
                Err(e) => {
                    warn!(provider = provider.name(), error = %e, "Provider search failed");
                    continue;
                }
            };

            for candidate in candidates.into_iter().take(MAX_CANDIDATES) {
                let score = match_score(&seed, &candidate);
                debug!(
                    provider = provider.name(),
                    candidate = ?candidate.title,
                    score,
                    "Scored candidate"
                );
                if score > highest_score {
                    highest_score = score;
                    merge_candidate(&mut best, &candidate, score);
                }
            }
        }

        best.confidence = highest_score;
        info!(
            confidence = best.confidence,
            title = ?best.title,
            author = ?best.author,
            "Enrichment complete"
        );
        best
    }

    /// Direct external-id lookup, bypassing fuzzy scoring. Confidence is
    /// fixed at 100: the operator asserted the identity.
    pub async fn lookup(&self, provider_name: &str, id: &str) -> Result<Option<Identification>> {
        for provider in &self.providers {
            if provider.name() == provider_name {
                let mut result = provider.get_by_id(id).await?;
                if let Some(ref mut found) = result {
                    found.confidence = 100;
                }
                return Ok(result);
            }
        }
        Ok(None)
    }
}

/// Fuzzy similarity between seed and candidate, 0-100. Title ratio alone,
/// or averaged with the author ratio when both sides have an author.
pub fn match_score(seed: &Identification, candidate: &Identification) -> u8 {
    let (seed_title, candidate_title) = match (&seed.title, &candidate.title) {
        (Some(s), Some(c)) => (s.to_lowercase(), c.to_lowercase()),
        _ => return 0,
    };

    let title_ratio = rapidfuzz::fuzz::ratio(seed_title.chars(), candidate_title.chars()) * 100.0;

    let score = match (&seed.author, &candidate.author) {
        (Some(sa), Some(ca)) if !sa.is_empty() && !ca.is_empty() => {
            let author_ratio =
                rapidfuzz::fuzz::ratio(sa.to_lowercase().chars(), ca.to_lowercase().chars())
                    * 100.0;
            (title_ratio + author_ratio) / 2.0
        }
        _ => title_ratio,
    };

    score.round().clamp(0.0, 100.0) as u8
}

/// Threshold above which provider title/author replace the working ones
/// (provider data is trusted to be better formatted past this point).
const TRUST_TITLE_SCORE: u8 = 90;

/// Fold a new best candidate into the running result: non-empty metadata
/// fields overwrite, title/author only above the trust threshold.
fn merge_candidate(best: &mut Identification, candidate: &Identification, score: u8) {
    let overwrite = |target: &mut Option<String>, value: &Option<String>| {
        if let Some(v) = value.as_deref().filter(|v| !v.is_empty()) {
            *target = Some(v.to_string());
        }
    };

    overwrite(&mut best.description, &candidate.description);
    overwrite(&mut best.year, &candidate.year);
    overwrite(&mut best.isbn, &candidate.isbn);
    overwrite(&mut best.asin, &candidate.asin);
    overwrite(&mut best.cover_url, &candidate.cover_url);
    overwrite(&mut best.narrator, &candidate.narrator);
    overwrite(&mut best.publisher, &candidate.publisher);
    overwrite(&mut best.external_id, &candidate.external_id);
    for (k, v) in &candidate.extra {
        best.extra.insert(k.clone(), v.clone());
    }

    if score > TRUST_TITLE_SCORE {
        overwrite(&mut best.title, &candidate.title);
        overwrite(&mut best.author, &candidate.author);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::identifier::source;
    use pretty_assertions::assert_eq;

    struct FakeProvider {
        name: &'static str,
        candidates: Vec<Identification>,
    }

    #[async_trait]
    impl MetadataProvider for FakeProvider {
        fn name(&self) -> &'static str {
            self.name
        }

        async fn search(&self, _query: &str, _author: Option<&str>) -> Result<Vec<Identification>> {
            Ok(self.candidates.clone())
        }
    }

    struct FailingProvider;

    #[async_trait]
    impl MetadataProvider for FailingProvider {
        fn name(&self) -> &'static str {
            "failing"
        }

        async fn search(&self, _query: &str, _author: Option<&str>) -> Result<Vec<Identification>> {
            anyhow::bail!("connection refused")
        }
    }

    fn seed(title: &str, author: Option<&str>) -> Identification {
        let mut id = Identification::from_source(source::MERGED);
        id.title = Some(title.to_string());
        id.author = author.map(String::from);
        id
    }

    fn candidate(name: &str, title: &str, author: &str) -> Identification {
        let mut id = Identification::from_source(name);
        id.title = Some(title.to_string());
        id.author = Some(author.to_string());
        id
    }

    #[test]
    fn identical_title_and_author_score_100() {
        let s = seed("Dune", Some("Frank Herbert"));
        let c = candidate("x", "Dune", "Frank Herbert");
        assert_eq!(match_score(&s, &c), 100);
    }

    #[test]
    fn author_mismatch_drags_the_average_down() {
        let s = seed("Dune", Some("Frank Herbert"));
        let c = candidate("x", "Dune", "Brian Herbert");
        let score = match_score(&s, &c);
        assert!(score < 100, "score was {score}");
        assert!(score > 50, "score was {score}");
    }

    #[test]
    fn missing_candidate_title_scores_zero() {
        let s = seed("Dune", None);
        let mut c = Identification::default();
        c.author = Some("Frank Herbert".to_string());
        assert_eq!(match_score(&s, &c), 0);
    }

    #[tokio::test]
    async fn enrich_without_title_is_a_no_op() {
        let aggregator = Aggregator::new(vec![Arc::new(FakeProvider {
            name: "x",
            candidates: vec![candidate("x", "Dune", "Frank Herbert")],
        })]);

        let empty = Identification::default();
        let result = aggregator.enrich(empty.clone()).await;
        assert_eq!(result, empty);
    }

    #[tokio::test]
    async fn best_candidate_contributes_metadata_fields() {
        let mut c = candidate("prov", "Dune", "Frank Herbert");
        c.description = Some("A desert planet epic".to_string());
        c.year = Some("1965".to_string());

        let aggregator = Aggregator::new(vec![Arc::new(FakeProvider {
            name: "prov",
            candidates: vec![c],
        })]);

        let s = seed("dune unabridged", Some("frank herbert"));
        let result = aggregator.enrich(s).await;

        assert!(result.confidence > 0);
        assert_eq!(result.description.as_deref(), Some("A desert planet epic"));
        assert_eq!(result.year.as_deref(), Some("1965"));
    }

    #[tokio::test]
    async fn low_scoring_candidate_keeps_seed_title() {
        let mut c = candidate("prov", "Completely Different Book", "Somebody Else");
        c.description = Some("unrelated".to_string());

        let aggregator = Aggregator::new(vec![Arc::new(FakeProvider {
            name: "prov",
            candidates: vec![c],
        })]);

        let s = seed("Dune", Some("Frank Herbert"));
        let result = aggregator.enrich(s).await;

        assert_eq!(result.title.as_deref(), Some("Dune"));
        assert_eq!(result.author.as_deref(), Some("Frank Herbert"));
        // The (low-scoring) best candidate still contributed metadata.
        assert_eq!(result.description.as_deref(), Some("unrelated"));
    }

    #[tokio::test]
    async fn exact_match_above_trust_threshold_takes_provider_formatting() {
        let mut c = candidate("prov", "Dune", "Frank Herbert");
        c.description = Some("A desert planet epic".to_string());

        let aggregator = Aggregator::new(vec![Arc::new(FakeProvider {
            name: "prov",
            candidates: vec![c],
        })]);

        let s = seed("dune", Some("frank herbert"));
        let result = aggregator.enrich(s).await;

        assert_eq!(result.confidence, 100);
        assert_eq!(result.title.as_deref(), Some("Dune"));
        assert_eq!(result.author.as_deref(), Some("Frank Herbert"));
    }

    #[tokio::test]
    async fn provider_failure_does_not_abort_the_pass() {
        let good = FakeProvider {
            name: "good",
            candidates: vec![candidate("good", "Dune", "Frank Herbert")],
        };

        let aggregator =
            Aggregator::new(vec![Arc::new(FailingProvider), Arc::new(good)]);

        let result = aggregator.enrich(seed("Dune", Some("Frank Herbert"))).await;
        assert_eq!(result.confidence, 100);
    }

    #[tokio::test]
    async fn ties_go_to_the_first_registered_provider() {
        let mut first = candidate("first", "Dune", "Frank Herbert");
        first.isbn = Some("111".to_string());
        let mut second = candidate("second", "Dune", "Frank Herbert");
        second.isbn = Some("222".to_string());

        let aggregator = Aggregator::new(vec![
            Arc::new(FakeProvider {
                name: "first",
                candidates: vec![first],
            }),
            Arc::new(FakeProvider {
                name: "second",
                candidates: vec![second],
            }),
        ]);

        let result = aggregator.enrich(seed("Dune", Some("Frank Herbert"))).await;
        assert_eq!(result.isbn.as_deref(), Some("111"));
    }

    #[tokio::test]
    async fn no_candidates_leaves_seed_untouched_with_zero_confidence() {
        let aggregator = Aggregator::new(vec![Arc::new(FakeProvider {
            name: "empty",
            candidates: vec![],
        })]);

        let s = seed("Dune", Some("Frank Herbert"));
        let result = aggregator.enrich(s.clone()).await;
        assert_eq!(result.confidence, 0);
        assert_eq!(result.title, s.title);
        assert_eq!(result.author, s.author);
    }
}
