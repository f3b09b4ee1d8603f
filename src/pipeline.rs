// End-to-end search: fetch, normalize, rank, post-filter

use std::sync::Arc;
use thiserror::Error;

use crate::cache::{FileResponseCache, ResponseCache};
use crate::client::{ClientError, FlightApi, SerpApiClient};
use crate::config::{ConfigError, SearchConfig};
use crate::fetcher::{FetchError, FlightFetcher};
use crate::filters::apply_post_filters;
use crate::models::{FlightResult, ParsedQuery};
use crate::processor::{sort_results, FlightResultProcessor};
use crate::usage::{FileUsageTracker, UsageTracker};

#[derive(Error, Debug)]
pub enum SearchError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Client error: {0}")]
    Client(#[from] ClientError),

    #[error(transparent)]
    Fetch(#[from] FetchError),
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SearchOutcome {
    // Ranked, filtered rows ready for export
    pub results: Vec<FlightResult>,
    pub quota_exhausted: bool,
    pub api_calls: u32,
    pub cache_hits: u32,
}

pub struct FlightSearch {
    fetcher: FlightFetcher,
    processor: FlightResultProcessor,
}

impl FlightSearch {
    pub fn new(fetcher: FlightFetcher, processor: FlightResultProcessor) -> Self {
        Self { fetcher, processor }
    }

    /// Wire the HTTP client and the file-backed cache and usage counter from `config`.
    pub fn from_config(config: &SearchConfig) -> Result<Self, SearchError> {
        let api: Arc<dyn FlightApi> = Arc::new(SerpApiClient::new(&config.api)?);
        let cache: Arc<dyn ResponseCache> = Arc::new(FileResponseCache::new(
            config.cache.path.clone(),
            config.cache.ttl(),
        ));
        let usage: Arc<dyn UsageTracker> = Arc::new(FileUsageTracker::new(config.usage_path.clone()));

        Ok(Self::new(
            FlightFetcher::new(api, cache, usage, config),
            FlightResultProcessor::new(&config.api.currency),
        ))
    }

    pub fn from_env() -> Result<Self, SearchError> {
        let config = SearchConfig::from_env()?;
        Self::from_config(&config)
    }

    /// Run one interpreted query.
    ///
    /// Results are ranked before post-filtering, so the preferred partition and
    /// the rest each stay in ranking order. Quota exhaustion yields a partial
    /// outcome; only a fatal upstream error is returned as `Err`.
    pub async fn run(&self, query: &ParsedQuery) -> Result<SearchOutcome, SearchError> {
        tracing::info!(
            summary = %query.query_summary,
            combinations = query.combinations.len(),
            post_filters = query.post_filters.len(),
            "starting flight search"
        );

        let report = self
            .fetcher
            .fetch_all(&query.combinations, &query.post_filters)
            .await?;

        let normalized = self.processor.process(&report.responses);
        let ranked = sort_results(normalized, query.ranking_preference);
        let results = apply_post_filters(ranked, &query.post_filters);

        tracing::info!(
            results = results.len(),
            api_calls = report.api_calls,
            cache_hits = report.cache_hits,
            skipped = report.skipped,
            quota_exhausted = report.quota_exhausted,
            "flight search complete"
        );

        Ok(SearchOutcome {
            results,
            quota_exhausted: report.quota_exhausted,
            api_calls: report.api_calls,
            cache_hits: report.cache_hits,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::mock_server::{MockFlightApi, MockReply};
    use crate::models::{Leg, PostFilter, SearchCombination, SortKey};
    use crate::params::build_params;
    use crate::test_support::helpers::{group_json, response_json, Harness};

    fn query(combinations: Vec<SearchCombination>, post_filters: Vec<PostFilter>) -> ParsedQuery {
        ParsedQuery {
            combinations,
            ranking_preference: SortKey::Price,
            query_summary: "Austin to Los Angeles".to_string(),
            post_filters,
        }
    }

    fn search(harness: &Harness) -> FlightSearch {
        FlightSearch::new(harness.fetcher(), FlightResultProcessor::new("USD"))
    }

    async fn two_group_api() -> MockFlightApi {
        let api = MockFlightApi::new();
        api.add_reply(
            &[("type", "1")],
            MockReply::Json(response_json(
                vec![group_json("Frontier", "F9 100", "2026-03-10 06:30", "2026-03-10 08:12", 188, None)],
                vec![group_json("Delta", "DL 200", "2026-03-10 09:00", "2026-03-10 10:40", 231, None)],
            )),
        )
        .await;
        api
    }

    #[tokio::test]
    async fn test_round_trip_from_empty_cache() {
        let harness = Harness::with_api(two_group_api().await);
        let combo = SearchCombination::round_trip("AUS", "LAX", "2026-03-10", "2026-03-12");
        let q = query(vec![combo.clone()], vec![]);

        let outcome = search(&harness).run(&q).await.unwrap();

        assert_eq!(outcome.results.len(), 2);
        assert_eq!(outcome.results[0].flight_numbers, "F9 100");
        assert!(!outcome.quota_exhausted);
        // primary plus outbound-only and return-only legs
        assert_eq!(outcome.api_calls, 3);
        assert_eq!(harness.usage_count(), 3);
        assert_eq!(harness.cache.len(), 3);
        assert!(harness
            .cache
            .lookup(&build_params(&combo, &harness.config.api))
            .is_some());
    }

    #[tokio::test]
    async fn test_rerun_within_ttl_is_served_from_cache() {
        let harness = Harness::with_api(two_group_api().await);
        let q = query(
            vec![SearchCombination::round_trip("AUS", "LAX", "2026-03-10", "2026-03-12")],
            vec![],
        );
        let search = search(&harness);

        let first = search.run(&q).await.unwrap();
        let usage = harness.usage_count();
        let second = search.run(&q).await.unwrap();

        assert_eq!(harness.usage_count(), usage);
        assert_eq!(second.api_calls, 0);
        assert_eq!(second.cache_hits, 3);
        assert_eq!(first.results, second.results);
    }

    #[tokio::test]
    async fn test_preferred_airline_leads_ranked_results() {
        let api = MockFlightApi::new();
        api.add_reply(
            &[("type", "2")],
            MockReply::Json(response_json(
                vec![
                    group_json("Delta", "DL 1", "2026-03-10 06:00", "2026-03-10 09:00", 120, None),
                    group_json("Frontier", "F9 2", "2026-03-10 07:00", "2026-03-10 10:00", 150, None),
                ],
                vec![group_json("United", "UA 3", "2026-03-10 08:00", "2026-03-10 11:00", 90, None)],
            )),
        )
        .await;
        let harness = Harness::with_api(api);
        let q = query(
            vec![SearchCombination::new("AUS", "LAX", "2026-03-10")],
            vec![PostFilter::prefer_airline("Frontier", Leg::Any)],
        );

        let outcome = search(&harness).run(&q).await.unwrap();

        let order: Vec<&str> = outcome.results.iter().map(|r| r.airline.as_str()).collect();
        assert_eq!(order, vec!["Frontier", "United", "Delta"]);
        assert!(outcome.results[0].preferred);
        assert!(outcome.results[1..].iter().all(|r| !r.preferred));
        // One-way queries never trigger the preference dual-fetch
        assert_eq!(harness.api.request_count(), 1);
    }

    #[tokio::test]
    async fn test_fatal_upstream_error_surfaces_as_err() {
        let api = MockFlightApi::with_default(MockReply::Fatal("Invalid API key".to_string()));
        let harness = Harness::with_api(api);
        let q = query(vec![SearchCombination::new("AUS", "LAX", "2026-03-10")], vec![]);

        let result = search(&harness).run(&q).await;
        assert!(matches!(
            result,
            Err(SearchError::Fetch(FetchError::FatalUpstream(_)))
        ));
    }

    #[tokio::test]
    async fn test_arrival_deadline_drops_late_itineraries() {
        let api = MockFlightApi::new();
        api.add_reply(
            &[("type", "2")],
            MockReply::Json(response_json(
                vec![
                    group_json("Delta", "DL 1", "2026-03-30 05:00", "2026-03-30 08:00", 120, None),
                    group_json("Delta", "DL 2", "2026-03-30 06:00", "2026-03-30 09:00", 110, None),
                ],
                vec![],
            )),
        )
        .await;
        let harness = Harness::with_api(api);
        let q = query(
            vec![SearchCombination::new("AUS", "LAX", "2026-03-30")],
            vec![PostFilter::arrival_before("2026-03-30T08:00", Leg::Outbound)],
        );

        let outcome = search(&harness).run(&q).await.unwrap();
        assert_eq!(outcome.results.len(), 1);
        assert_eq!(outcome.results[0].flight_numbers, "DL 1");
    }

    #[test]
    fn test_from_config_builds_live_components() {
        let dir = tempfile::TempDir::new().unwrap();
        let config = crate::test_support::helpers::test_config(&dir);
        assert!(FlightSearch::from_config(&config).is_ok());
    }
}
