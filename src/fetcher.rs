// Sequential fetch driver: quota check, cache lookup, upstream call, cache store,
// return-leg enrichment, split-ticket legs and preferred-airline dual fetches.
// One upstream call at a time, with a fixed delay between combinations.

use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;
use thiserror::Error;

use crate::cache::ResponseCache;
use crate::client::{classify_upstream_error, ApiError, FlightApi};
use crate::config::{ApiConfig, QuotaConfig, SearchConfig};
use crate::models::{FilterType, PostFilter, SearchCombination};
use crate::params::{airline_code, build_params, one_way_legs, return_leg_params, SearchParams};
use crate::serp::{FetchedResponse, FlightGroup, IndependentPair, RawResponse, RouteKey};
use crate::usage::UsageTracker;

#[derive(Error, Debug)]
pub enum FetchError {
    // Terminal: the remaining batch was abandoned
    #[error("Fatal upstream error: {0}")]
    FatalUpstream(String),
}

#[derive(Debug, Default)]
pub struct FetchReport {
    pub responses: Vec<FetchedResponse>,
    // Set once the monthly limit stopped further calls
    pub quota_exhausted: bool,
    pub api_calls: u32,
    pub cache_hits: u32,
    pub skipped: u32,
}

// Result of one cache-checked, quota-checked call
enum Lookup {
    Cached(RawResponse),
    Fetched(RawResponse),
    QuotaExceeded,
    Failed(ApiError),
}

enum CombinationOutcome {
    Done(RawResponse),
    Skipped,
    QuotaExceeded,
}

pub fn route_key(combo: &SearchCombination) -> RouteKey {
    RouteKey {
        departure_id: combo.departure_id.clone(),
        arrival_id: combo.arrival_id.clone(),
        outbound_date: combo.outbound_date.clone(),
        return_date: combo.return_date.clone(),
    }
}

pub struct FlightFetcher {
    api: Arc<dyn FlightApi>,
    cache: Arc<dyn ResponseCache>,
    usage: Arc<dyn UsageTracker>,
    api_config: ApiConfig,
    quota: QuotaConfig,
    use_cache: bool,
}

impl FlightFetcher {
    pub fn new(
        api: Arc<dyn FlightApi>,
        cache: Arc<dyn ResponseCache>,
        usage: Arc<dyn UsageTracker>,
        config: &SearchConfig,
    ) -> Self {
        Self {
            api,
            cache,
            usage,
            api_config: config.api.clone(),
            quota: config.quota.clone(),
            use_cache: config.cache.enabled,
        }
    }

    /// Fetch every combination in order and collect the raw responses.
    ///
    /// Quota exhaustion ends the batch early with whatever was gathered.
    /// An authentication failure abandons the batch and is returned as `Err`.
    pub async fn fetch_all(
        &self,
        combinations: &[SearchCombination],
        post_filters: &[PostFilter],
    ) -> Result<FetchReport, FetchError> {
        let mut report = FetchReport::default();
        let total = combinations.len();

        for (i, combo) in combinations.iter().enumerate() {
            if i > 0 {
                self.pause().await;
            }

            match self.fetch_combination(combo, i + 1, total, &mut report).await? {
                CombinationOutcome::QuotaExceeded => {
                    tracing::warn!(
                        limit = self.quota.monthly_limit,
                        remaining_combinations = total - i,
                        "monthly search limit reached, stopping"
                    );
                    return Ok(report);
                }
                CombinationOutcome::Skipped => continue,
                CombinationOutcome::Done(response) => {
                    report.responses.push(FetchedResponse::Bundled {
                        trip_type: combo.trip_type,
                        response,
                    });
                    if combo.is_round_trip() {
                        let pair = self.fetch_independent_pair(combo, None, &mut report).await?;
                        report.responses.push(FetchedResponse::IndependentPair(pair));
                    }
                }
            }
        }

        self.fetch_preferred_airlines(combinations, post_filters, &mut report)
            .await?;

        Ok(report)
    }

    async fn pause(&self) {
        let delay = self.quota.call_delay();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }

    async fn fetch_combination(
        &self,
        combo: &SearchCombination,
        index: usize,
        total: usize,
        report: &mut FetchReport,
    ) -> Result<CombinationOutcome, FetchError> {
        let used = self.usage.current_count();
        let limit = self.quota.monthly_limit;
        if used >= limit {
            report.quota_exhausted = true;
            return Ok(CombinationOutcome::QuotaExceeded);
        }
        if limit - used <= self.quota.warning_margin {
            tracing::warn!(remaining = limit - used, limit, "few upstream searches left this month");
        }

        let route = combo.route_label();
        tracing::info!(index, total, route = %route, "searching");

        let params = build_params(combo, &self.api_config);
        let mut response = match self.lookup_or_fetch(&params, report).await {
            Lookup::Cached(response) => {
                tracing::info!(index, flights = response.group_count(), "served from cache");
                response
            }
            Lookup::Fetched(response) => {
                tracing::info!(
                    index,
                    flights = response.group_count(),
                    usage = self.usage.current_count(),
                    limit,
                    "flight options found"
                );
                response
            }
            Lookup::QuotaExceeded => return Ok(CombinationOutcome::QuotaExceeded),
            Lookup::Failed(e) if e.is_fatal() => {
                tracing::error!(index, route = %route, error = %e, "fatal upstream error, aborting batch");
                return Err(FetchError::FatalUpstream(e.to_string()));
            }
            Lookup::Failed(e) => {
                tracing::warn!(index, route = %route, error = %e, "search failed, skipping combination");
                report.skipped += 1;
                return Ok(CombinationOutcome::Skipped);
            }
        };

        if combo.is_round_trip() {
            self.enrich_return_legs(&mut response, &params, report)
                .await?;
        }

        Ok(CombinationOutcome::Done(response))
    }

    // Cache first, then quota, then the upstream. Quota is re-checked before every call.
    async fn lookup_or_fetch(&self, params: &SearchParams, report: &mut FetchReport) -> Lookup {
        if self.use_cache {
            if let Some(cached) = self.cache.lookup(params) {
                match serde_json::from_value::<RawResponse>(cached) {
                    Ok(response) => {
                        report.cache_hits += 1;
                        return Lookup::Cached(response);
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "cached payload does not decode, refetching");
                    }
                }
            }
        }

        if self.usage.current_count() >= self.quota.monthly_limit {
            report.quota_exhausted = true;
            return Lookup::QuotaExceeded;
        }

        let payload: Value = match self.api.search(params).await {
            Ok(payload) => payload,
            Err(e) => return Lookup::Failed(e),
        };
        if let Some(message) = payload.get("error").and_then(Value::as_str) {
            return Lookup::Failed(classify_upstream_error(200, message));
        }

        // The call went through, so it counts against the quota whatever the payload holds
        report.api_calls += 1;
        self.record_usage();

        let response = match serde_json::from_value::<RawResponse>(payload.clone()) {
            Ok(response) => response,
            Err(e) => return Lookup::Failed(ApiError::DeserializationError(e.to_string())),
        };
        if self.use_cache {
            self.cache.store(params, &payload);
        }
        Lookup::Fetched(response)
    }

    fn record_usage(&self) {
        match self.usage.increment() {
            Ok(count) => tracing::debug!(count, limit = self.quota.monthly_limit, "usage recorded"),
            Err(e) => tracing::error!(error = %e, "failed to persist usage counter"),
        }
    }

    // Attach return-leg detail to the leading groups in place.
    // A missing token or an empty lookup leaves the group as it is.
    async fn enrich_return_legs(
        &self,
        response: &mut RawResponse,
        base: &SearchParams,
        report: &mut FetchReport,
    ) -> Result<(), FetchError> {
        for group in response.groups_mut().take(self.quota.enrich_top_n) {
            let Some(token) = group.departure_token.clone() else {
                continue;
            };
            let params = return_leg_params(base, &token);
            match self.lookup_or_fetch(&params, report).await {
                Lookup::Cached(found) | Lookup::Fetched(found) => {
                    if let Some(first) = found.into_groups().into_iter().next() {
                        group.attach_return_leg(first.into());
                    }
                }
                Lookup::QuotaExceeded => {
                    tracing::warn!("monthly search limit reached during return-leg enrichment");
                    break;
                }
                Lookup::Failed(e) if e.is_fatal() => {
                    tracing::error!(error = %e, "fatal upstream error during return-leg enrichment");
                    return Err(FetchError::FatalUpstream(e.to_string()));
                }
                Lookup::Failed(e) => {
                    tracing::debug!(error = %e, "return-leg lookup failed, leaving group without it");
                }
            }
        }
        Ok(())
    }

    async fn fetch_one_way_groups(
        &self,
        params: &SearchParams,
        report: &mut FetchReport,
    ) -> Result<Vec<FlightGroup>, FetchError> {
        match self.lookup_or_fetch(params, report).await {
            Lookup::Cached(response) | Lookup::Fetched(response) => Ok(response.into_groups()),
            Lookup::QuotaExceeded => Ok(Vec::new()),
            Lookup::Failed(e) if e.is_fatal() => {
                tracing::error!(error = %e, "fatal upstream error during one-way search");
                Err(FetchError::FatalUpstream(e.to_string()))
            }
            Lookup::Failed(e) => {
                tracing::warn!(error = %e, "one-way search failed");
                Ok(Vec::new())
            }
        }
    }

    // Outbound-only and return-only searches for building split-ticket itineraries
    async fn fetch_independent_pair(
        &self,
        combo: &SearchCombination,
        forced_airline: Option<&str>,
        report: &mut FetchReport,
    ) -> Result<IndependentPair, FetchError> {
        let (outbound_params, return_params) =
            one_way_legs(combo, &self.api_config, forced_airline);
        let outbound_groups = self.fetch_one_way_groups(&outbound_params, report).await?;
        let return_groups = self.fetch_one_way_groups(&return_params, report).await?;

        Ok(IndependentPair {
            route: route_key(combo),
            outbound_groups,
            return_groups,
            forced_airline: forced_airline.map(str::to_string),
        })
    }

    // One targeted one-way pair per (route, dates) and preferred airline, so the
    // airline survives upstream pagination. One delay per route, not per airline.
    async fn fetch_preferred_airlines(
        &self,
        combinations: &[SearchCombination],
        post_filters: &[PostFilter],
        report: &mut FetchReport,
    ) -> Result<(), FetchError> {
        let airlines: Vec<String> = post_filters
            .iter()
            .filter(|f| f.filter_type == FilterType::AtLeastOneLegAirline)
            .map(|f| airline_code(&f.value))
            .collect();
        if airlines.is_empty() {
            return Ok(());
        }

        let mut seen: HashSet<RouteKey> = HashSet::new();
        for combo in combinations.iter().filter(|c| c.is_round_trip()) {
            if !seen.insert(route_key(combo)) {
                continue;
            }
            if report.quota_exhausted {
                tracing::warn!("monthly search limit reached, skipping preferred-airline searches");
                return Ok(());
            }

            self.pause().await;
            for code in &airlines {
                tracing::info!(route = %combo.route_label(), airline = %code, "dual-fetch for preferred airline");
                let pair = self
                    .fetch_independent_pair(combo, Some(code), report)
                    .await?;
                tracing::info!(
                    outbound = pair.outbound_groups.len(),
                    inbound = pair.return_groups.len(),
                    "dual-fetch complete"
                );
                report.responses.push(FetchedResponse::IndependentPair(pair));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::ResponseCache;
    use crate::client::mock_server::{MockFlightApi, MockReply};
    use crate::models::Leg;
    use crate::test_support::helpers::{group_json, response_json, Harness};
    use std::fs;
    use std::time::Duration;

    fn bundled_groups(report: &FetchReport) -> Vec<&FlightGroup> {
        report
            .responses
            .iter()
            .filter_map(|r| match r {
                FetchedResponse::Bundled { response, .. } => Some(response),
                _ => None,
            })
            .flat_map(|r| r.groups())
            .collect()
    }

    #[tokio::test]
    async fn test_one_way_combination_fetches_once() {
        let api = MockFlightApi::new();
        api.add_reply(
            &[("departure_id", "AUS")],
            MockReply::Json(response_json(
                vec![group_json("Frontier", "F9 100", "2026-03-10 06:30", "2026-03-10 08:12", 89, None)],
                vec![],
            )),
        )
        .await;
        let harness = Harness::with_api(api);
        let fetcher = harness.fetcher();

        let combos = vec![SearchCombination::new("AUS", "LAX", "2026-03-10")];
        let report = fetcher.fetch_all(&combos, &[]).await.unwrap();

        assert_eq!(report.responses.len(), 1);
        assert_eq!(bundled_groups(&report).len(), 1);
        assert_eq!(report.api_calls, 1);
        assert_eq!(harness.api.request_count(), 1);
        assert_eq!(harness.usage_count(), 1);
    }

    #[tokio::test]
    async fn test_cache_hit_skips_upstream_and_quota() {
        let harness = Harness::new();
        let fetcher = harness.fetcher();
        let combos = vec![SearchCombination::new("AUS", "LAX", "2026-03-10")];

        fetcher.fetch_all(&combos, &[]).await.unwrap();
        assert_eq!(harness.usage_count(), 1);

        let report = fetcher.fetch_all(&combos, &[]).await.unwrap();
        assert_eq!(report.cache_hits, 1);
        assert_eq!(report.api_calls, 0);
        assert_eq!(harness.api.request_count(), 1);
        assert_eq!(harness.usage_count(), 1);
    }

    #[tokio::test]
    async fn test_disabled_cache_always_calls_upstream() {
        let mut harness = Harness::new();
        harness.config.cache.enabled = false;
        let fetcher = harness.fetcher();
        let combos = vec![SearchCombination::new("AUS", "LAX", "2026-03-10")];

        fetcher.fetch_all(&combos, &[]).await.unwrap();
        fetcher.fetch_all(&combos, &[]).await.unwrap();

        assert_eq!(harness.api.request_count(), 2);
        assert_eq!(harness.usage_count(), 2);
        assert!(harness.cache.is_empty());
    }

    #[tokio::test]
    async fn test_quota_exhausted_stops_batch_without_error() {
        let harness = Harness::new();
        let month = crate::usage::current_month();
        fs::write(
            &harness.config.usage_path,
            format!(r#"{{"month": "{}", "count": 250}}"#, month),
        )
        .unwrap();
        let fetcher = harness.fetcher();

        let combos = vec![
            SearchCombination::new("AUS", "LAX", "2026-03-10"),
            SearchCombination::new("AUS", "LAX", "2026-03-11"),
        ];
        let report = fetcher.fetch_all(&combos, &[]).await.unwrap();

        assert!(report.quota_exhausted);
        assert!(report.responses.is_empty());
        assert_eq!(harness.api.request_count(), 0);
    }

    #[tokio::test]
    async fn test_quota_runs_out_mid_batch() {
        let mut harness = Harness::new();
        harness.config.quota.monthly_limit = 1;
        let fetcher = harness.fetcher();

        let combos = vec![
            SearchCombination::new("AUS", "LAX", "2026-03-10"),
            SearchCombination::new("AUS", "LAX", "2026-03-11"),
        ];
        let report = fetcher.fetch_all(&combos, &[]).await.unwrap();

        assert!(report.quota_exhausted);
        assert_eq!(report.responses.len(), 1);
        assert_eq!(harness.api.request_count(), 1);
    }

    #[tokio::test]
    async fn test_fatal_error_aborts_remaining_batch() {
        let api = MockFlightApi::new();
        api.add_reply(
            &[("outbound_date", "2026-03-10")],
            MockReply::Fatal("Invalid API key.".to_string()),
        )
        .await;
        let harness = Harness::with_api(api);
        let fetcher = harness.fetcher();

        let combos = vec![
            SearchCombination::new("AUS", "LAX", "2026-03-10"),
            SearchCombination::new("AUS", "LAX", "2026-03-11"),
        ];
        let result = fetcher.fetch_all(&combos, &[]).await;

        assert!(matches!(result, Err(FetchError::FatalUpstream(_))));
        assert_eq!(harness.api.request_count(), 1);
        assert_eq!(harness.usage_count(), 0);
    }

    #[tokio::test]
    async fn test_error_field_in_payload_is_classified() {
        let api = MockFlightApi::new();
        api.add_reply(
            &[("outbound_date", "2026-03-10")],
            MockReply::Json(serde_json::json!({"error": "Invalid API key. Your API key should be here"})),
        )
        .await;
        let harness = Harness::with_api(api);

        let combos = vec![SearchCombination::new("AUS", "LAX", "2026-03-10")];
        let result = harness.fetcher().fetch_all(&combos, &[]).await;
        assert!(matches!(result, Err(FetchError::FatalUpstream(_))));
    }

    #[tokio::test]
    async fn test_transient_error_skips_only_that_combination() {
        let api = MockFlightApi::new();
        api.add_reply(
            &[("outbound_date", "2026-03-10")],
            MockReply::Transient("Google Flights hasn't returned any results".to_string()),
        )
        .await;
        api.add_reply(
            &[("outbound_date", "2026-03-11")],
            MockReply::Json(response_json(
                vec![group_json("Delta", "DL 1", "2026-03-11 07:00", "2026-03-11 09:00", 150, None)],
                vec![],
            )),
        )
        .await;
        let harness = Harness::with_api(api);

        let combos = vec![
            SearchCombination::new("AUS", "LAX", "2026-03-10"),
            SearchCombination::new("AUS", "LAX", "2026-03-11"),
        ];
        let report = harness.fetcher().fetch_all(&combos, &[]).await.unwrap();

        assert_eq!(report.skipped, 1);
        assert_eq!(report.responses.len(), 1);
        assert_eq!(harness.usage_count(), 1);
    }

    #[tokio::test]
    async fn test_malformed_payload_is_transient() {
        let api = MockFlightApi::new();
        api.add_reply(
            &[("outbound_date", "2026-03-10")],
            MockReply::Json(serde_json::json!({"best_flights": [{"flights": [{"airline": "Delta"}]}]})),
        )
        .await;
        let harness = Harness::with_api(api);

        let combos = vec![
            SearchCombination::new("AUS", "LAX", "2026-03-10"),
            SearchCombination::new("AUS", "LAX", "2026-03-11"),
        ];
        let report = harness.fetcher().fetch_all(&combos, &[]).await.unwrap();

        assert_eq!(report.skipped, 1);
        assert_eq!(report.responses.len(), 1);
        // Both calls reached the upstream
        assert_eq!(harness.usage_count(), 2);
    }

    #[tokio::test]
    async fn test_round_trip_enriches_top_five_groups() {
        let api = MockFlightApi::new();
        for i in 0..7 {
            let token = format!("tok-{}", i);
            api.add_reply(
                &[("departure_token", token.as_str())],
                MockReply::Json(response_json(
                    vec![group_json("Frontier", &format!("F9 9{}", i), "2026-03-12 18:00", "2026-03-12 23:10", 0, None)],
                    vec![],
                )),
            )
            .await;
        }
        let groups: Vec<_> = (0..7)
            .map(|i| {
                let token = format!("tok-{}", i);
                group_json(
                    "Frontier",
                    &format!("F9 {}", i),
                    "2026-03-10 06:30",
                    "2026-03-10 08:12",
                    100 + i,
                    Some(token.as_str()),
                )
            })
            .collect();
        api.add_reply(
            &[("type", "1")],
            MockReply::Json(response_json(groups[..3].to_vec(), groups[3..].to_vec())),
        )
        .await;
        let harness = Harness::with_api(api);

        let combos = vec![SearchCombination::round_trip("AUS", "LAX", "2026-03-10", "2026-03-12")];
        let report = harness.fetcher().fetch_all(&combos, &[]).await.unwrap();

        let groups = bundled_groups(&report);
        assert_eq!(groups.len(), 7);
        let enriched = groups.iter().filter(|g| g.return_leg.is_some()).count();
        assert_eq!(enriched, 5);
        assert!(groups[5].return_leg.is_none());
        assert_eq!(
            groups[0].return_leg.as_ref().unwrap().flights[0].flight_number,
            "F9 90"
        );

        // primary + 5 return lookups + 2 one-way legs
        assert_eq!(harness.api.request_count(), 8);
        assert_eq!(harness.usage_count(), 8);
    }

    #[tokio::test]
    async fn test_cached_primary_still_enriches_from_cache() {
        let api = MockFlightApi::new();
        api.add_reply(
            &[("departure_token", "tok-0")],
            MockReply::Json(response_json(
                vec![group_json("Frontier", "F9 90", "2026-03-12 18:00", "2026-03-12 23:10", 0, None)],
                vec![],
            )),
        )
        .await;
        api.add_reply(
            &[("type", "1")],
            MockReply::Json(response_json(
                vec![group_json("Frontier", "F9 1", "2026-03-10 06:30", "2026-03-10 08:12", 120, Some("tok-0"))],
                vec![],
            )),
        )
        .await;
        let harness = Harness::with_api(api);
        let fetcher = harness.fetcher();
        let combos = vec![SearchCombination::round_trip("AUS", "LAX", "2026-03-10", "2026-03-12")];

        fetcher.fetch_all(&combos, &[]).await.unwrap();
        let calls = harness.api.request_count();

        let report = fetcher.fetch_all(&combos, &[]).await.unwrap();
        assert_eq!(harness.api.request_count(), calls);
        assert_eq!(report.api_calls, 0);
        // primary, return lookup and both one-way legs
        assert_eq!(report.cache_hits, 4);
        assert!(bundled_groups(&report)[0].return_leg.is_some());
    }

    #[tokio::test]
    async fn test_independent_legs_strip_airline_filters() {
        let harness = Harness::new();
        let mut combo = SearchCombination::round_trip("AUS", "LAX", "2026-03-10", "2026-03-12");
        combo.include_airlines = Some("F9".to_string());

        let report = harness.fetcher().fetch_all(&[combo], &[]).await.unwrap();

        assert_eq!(report.responses.len(), 2);
        assert!(matches!(
            report.responses[1],
            FetchedResponse::IndependentPair(IndependentPair { forced_airline: None, .. })
        ));

        let one_way: Vec<SearchParams> = harness
            .api
            .requests()
            .await
            .into_iter()
            .filter(|p| p.get("type") == Some("2"))
            .collect();
        assert_eq!(one_way.len(), 2);
        assert!(one_way.iter().all(|p| p.get("include_airlines").is_none()));
        assert_eq!(one_way[1].get("departure_id"), Some("LAX"));
        assert_eq!(one_way[1].get("outbound_date"), Some("2026-03-12"));
    }

    #[tokio::test]
    async fn test_dual_fetch_once_per_route() {
        let harness = Harness::new();
        let mut nonstop = SearchCombination::round_trip("AUS", "LAX", "2026-03-10", "2026-03-12");
        nonstop.stops = 1;
        let combos = vec![
            SearchCombination::round_trip("AUS", "LAX", "2026-03-10", "2026-03-12"),
            nonstop,
            SearchCombination::round_trip("AUS", "LAX", "2026-03-11", "2026-03-13"),
            SearchCombination::new("AUS", "SFO", "2026-03-10"),
        ];
        let filters = vec![
            PostFilter::prefer_airline("Frontier", Leg::Any),
            PostFilter::arrival_before("2026-03-30T08:00", Leg::Any),
        ];

        let report = harness.fetcher().fetch_all(&combos, &filters).await.unwrap();

        let forced: Vec<&IndependentPair> = report
            .responses
            .iter()
            .filter_map(|r| match r {
                FetchedResponse::IndependentPair(p) if p.forced_airline.is_some() => Some(p),
                _ => None,
            })
            .collect();
        assert_eq!(forced.len(), 2);
        assert!(forced.iter().all(|p| p.forced_airline.as_deref() == Some("F9")));

        let forced_requests = harness
            .api
            .requests()
            .await
            .into_iter()
            .filter(|p| p.get("include_airlines") == Some("F9"))
            .count();
        assert_eq!(forced_requests, 4);
    }

    #[tokio::test]
    async fn test_no_dual_fetch_without_airline_preference() {
        let harness = Harness::new();
        let combos = vec![SearchCombination::round_trip("AUS", "LAX", "2026-03-10", "2026-03-12")];
        let filters = vec![PostFilter::arrival_before("2026-03-30T08:00", Leg::Outbound)];

        let report = harness.fetcher().fetch_all(&combos, &filters).await.unwrap();
        assert_eq!(report.responses.len(), 2);
        assert_eq!(harness.api.request_count(), 3);
    }

    #[tokio::test]
    async fn test_quota_rechecked_before_enrichment_calls() {
        let api = MockFlightApi::new();
        api.add_reply(
            &[("type", "1"), ("departure_token", "tok-0")],
            MockReply::Json(response_json(vec![], vec![])),
        )
        .await;
        api.add_reply(
            &[("type", "1")],
            MockReply::Json(response_json(
                vec![
                    group_json("Frontier", "F9 1", "2026-03-10 06:30", "2026-03-10 08:12", 120, Some("tok-0")),
                    group_json("Frontier", "F9 2", "2026-03-10 09:30", "2026-03-10 11:12", 130, Some("tok-1")),
                ],
                vec![],
            )),
        )
        .await;
        let mut harness = Harness::with_api(api);
        harness.config.quota.monthly_limit = 2;

        let combos = vec![SearchCombination::round_trip("AUS", "LAX", "2026-03-10", "2026-03-12")];
        let report = harness.fetcher().fetch_all(&combos, &[]).await.unwrap();

        // primary + first return lookup, then nothing more
        assert_eq!(harness.api.request_count(), 2);
        assert!(report.quota_exhausted);
        assert_eq!(harness.usage_count(), 2);
        assert!(harness.cache.stats().store_count >= 2);
    }

    fn return_reply(flight_number: &str) -> MockReply {
        MockReply::Json(response_json(
            vec![group_json("Frontier", flight_number, "2026-03-12 18:00", "2026-03-12 23:10", 0, None)],
            vec![],
        ))
    }

    #[tokio::test(start_paused = true)]
    async fn test_delay_between_combinations_and_once_per_dual_fetch_route() {
        let mut harness = Harness::new();
        harness.config.quota.call_delay_ms = 200;
        let mut nonstop = SearchCombination::round_trip("AUS", "LAX", "2026-03-10", "2026-03-12");
        nonstop.stops = 1;
        let combos = vec![
            SearchCombination::round_trip("AUS", "LAX", "2026-03-10", "2026-03-12"),
            nonstop,
            SearchCombination::round_trip("AUS", "LAX", "2026-03-11", "2026-03-13"),
        ];
        let filters = vec![
            PostFilter::prefer_airline("Frontier", Leg::Any),
            PostFilter::prefer_airline("Spirit", Leg::Any),
        ];

        let start = tokio::time::Instant::now();
        harness.fetcher().fetch_all(&combos, &filters).await.unwrap();
        let elapsed = start.elapsed();

        // Two gaps between combinations plus one per distinct route, none per airline
        assert!(elapsed >= Duration::from_millis(800), "elapsed {:?}", elapsed);
        assert!(elapsed < Duration::from_millis(1000), "elapsed {:?}", elapsed);
        // Both airlines were still fetched for both routes
        let forced = harness
            .api
            .requests()
            .await
            .into_iter()
            .filter(|p| p.get("include_airlines").is_some())
            .count();
        assert_eq!(forced, 8);
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_delay_before_first_combination() {
        let mut harness = Harness::new();
        harness.config.quota.call_delay_ms = 200;
        let combos = vec![SearchCombination::new("AUS", "LAX", "2026-03-10")];
        let filters = vec![PostFilter::prefer_airline("Frontier", Leg::Any)];

        let start = tokio::time::Instant::now();
        harness.fetcher().fetch_all(&combos, &filters).await.unwrap();

        assert!(start.elapsed() < Duration::from_millis(200));
        assert_eq!(harness.api.request_count(), 1);
    }

    #[tokio::test]
    async fn test_fatal_return_leg_lookup_aborts_batch() {
        let api = MockFlightApi::new();
        api.add_reply(
            &[("departure_token", "tok-0")],
            MockReply::Fatal("Invalid API key.".to_string()),
        )
        .await;
        api.add_reply(
            &[("type", "1")],
            MockReply::Json(response_json(
                vec![group_json("Frontier", "F9 1", "2026-03-10 06:30", "2026-03-10 08:12", 120, Some("tok-0"))],
                vec![],
            )),
        )
        .await;
        let harness = Harness::with_api(api);
        let combos = vec![
            SearchCombination::round_trip("AUS", "LAX", "2026-03-10", "2026-03-12"),
            SearchCombination::round_trip("AUS", "LAX", "2026-03-11", "2026-03-13"),
        ];

        let result = harness.fetcher().fetch_all(&combos, &[]).await;

        assert!(matches!(result, Err(FetchError::FatalUpstream(_))));
        // primary + the failing return lookup; nothing after
        assert_eq!(harness.api.request_count(), 2);
        assert_eq!(harness.usage_count(), 1);
    }

    #[tokio::test]
    async fn test_fatal_one_way_leg_aborts_batch() {
        let api = MockFlightApi::new();
        api.add_reply(&[("type", "2")], MockReply::Fatal("Invalid API key.".to_string()))
            .await;
        let harness = Harness::with_api(api);
        let combos = vec![
            SearchCombination::round_trip("AUS", "LAX", "2026-03-10", "2026-03-12"),
            SearchCombination::round_trip("AUS", "LAX", "2026-03-11", "2026-03-13"),
        ];

        let result = harness.fetcher().fetch_all(&combos, &[]).await;

        assert!(matches!(result, Err(FetchError::FatalUpstream(_))));
        // primary + outbound-only leg; the return-only leg is never sent
        assert_eq!(harness.api.request_count(), 2);
    }

    #[tokio::test]
    async fn test_fatal_dual_fetch_aborts_batch() {
        let api = MockFlightApi::new();
        api.add_reply(
            &[("include_airlines", "F9")],
            MockReply::Fatal("Invalid API key.".to_string()),
        )
        .await;
        let harness = Harness::with_api(api);
        let combos = vec![
            SearchCombination::round_trip("AUS", "LAX", "2026-03-10", "2026-03-12"),
            SearchCombination::round_trip("AUS", "SFO", "2026-03-10", "2026-03-12"),
        ];
        let filters = vec![PostFilter::prefer_airline("Frontier", Leg::Any)];

        let result = harness.fetcher().fetch_all(&combos, &filters).await;

        assert!(matches!(result, Err(FetchError::FatalUpstream(_))));
        // two primaries, four plain one-way legs, then the first forced leg
        assert_eq!(harness.api.request_count(), 7);
    }

    #[tokio::test]
    async fn test_group_without_token_is_left_unenriched() {
        let api = MockFlightApi::new();
        api.add_reply(&[("departure_token", "tok-0")], return_reply("F9 90")).await;
        api.add_reply(&[("departure_token", "tok-2")], return_reply("F9 92")).await;
        api.add_reply(
            &[("type", "1")],
            MockReply::Json(response_json(
                vec![
                    group_json("Frontier", "F9 0", "2026-03-10 06:30", "2026-03-10 08:12", 120, Some("tok-0")),
                    group_json("Frontier", "F9 1", "2026-03-10 09:30", "2026-03-10 11:12", 130, None),
                    group_json("Frontier", "F9 2", "2026-03-10 12:30", "2026-03-10 14:12", 140, Some("tok-2")),
                ],
                vec![],
            )),
        )
        .await;
        let harness = Harness::with_api(api);
        let combos = vec![SearchCombination::round_trip("AUS", "LAX", "2026-03-10", "2026-03-12")];

        let report = harness.fetcher().fetch_all(&combos, &[]).await.unwrap();

        let groups = bundled_groups(&report);
        assert_eq!(groups.len(), 3);
        assert!(groups[1].return_leg.is_none());
        assert_eq!(
            groups[0].return_leg.as_ref().unwrap().flights[0].flight_number,
            "F9 90"
        );
        assert_eq!(
            groups[2].return_leg.as_ref().unwrap().flights[0].flight_number,
            "F9 92"
        );

        let token_requests = harness
            .api
            .requests()
            .await
            .into_iter()
            .filter(|p| p.get("departure_token").is_some())
            .count();
        assert_eq!(token_requests, 2);
        // primary + two return lookups + two one-way legs
        assert_eq!(harness.api.request_count(), 5);
    }
}
