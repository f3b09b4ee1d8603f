// Main library file for the flight search core

// Query inputs, typed upstream payloads and flat results
pub mod config;
pub mod models;
pub mod params;
pub mod serp;

// Quota and response persistence
pub mod cache;
pub mod usage;

// Upstream access and orchestration
pub mod client;
pub mod fetcher;

// Normalization, ranking and post-filtering
pub mod filters;
pub mod pipeline;
pub mod processor;

mod test_support;

// Re-export key types for convenience
pub use cache::{cache_key, CacheStatsReport, FileResponseCache, ResponseCache};
pub use client::{ApiError, ClientError, FlightApi, SerpApiClient};
pub use config::{ApiConfig, CacheConfig, ConfigError, QuotaConfig, SearchConfig};
pub use fetcher::{FetchError, FetchReport, FlightFetcher};
pub use filters::apply_post_filters;
pub use models::{
    FilterType, FlightResult, ItineraryType, Leg, ParsedQuery, PostFilter, SearchCombination,
    SortKey, TripType,
};
pub use pipeline::{FlightSearch, SearchError, SearchOutcome};
pub use processor::{sort_results, FlightResultProcessor};
pub use serp::{FetchedResponse, FlightGroup, IndependentPair, RawResponse};
pub use usage::{FileUsageTracker, UsageError, UsageTracker};
