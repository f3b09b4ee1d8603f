// Canonical upstream query parameters built from a search combination

use serde::Serialize;
use std::collections::BTreeMap;

use crate::config::ApiConfig;
use crate::models::{SearchCombination, TripType};

pub const API_KEY_PARAM: &str = "api_key";

// Grouping codes the upstream rejects, mapped to the airports they cover
const GROUPING_CODES: &[(&str, &str)] = &[
    ("WAS", "DCA,IAD,BWI"),
    ("NYC", "JFK,EWR,LGA"),
    ("CHI", "ORD,MDW"),
    ("YTO", "YYZ,YTZ"),
    ("BJS", "PEK,PKX"),
    ("SEA", "SEA"),
];

// Carrier names the interpreter tends to emit, mapped to IATA codes
const AIRLINE_CODES: &[(&str, &str)] = &[
    ("spirit", "NK"),
    ("frontier", "F9"),
    ("southwest", "WN"),
    ("allegiant", "G4"),
    ("sun country", "SY"),
    ("breeze", "MX"),
    ("avelo", "XP"),
    ("jetblue", "B6"),
    ("alaska", "AS"),
    ("hawaiian", "HA"),
    ("united", "UA"),
    ("american", "AA"),
    ("delta", "DL"),
    ("british airways", "BA"),
    ("lufthansa", "LH"),
];

// Parameters sorted by name. Two maps with the same entries serialize identically.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SearchParams(BTreeMap<String, String>);

impl SearchParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, key: &str, value: impl Into<String>) {
        self.0.insert(key.to_string(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn remove(&mut self, key: &str) -> Option<String> {
        self.0.remove(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &String)> {
        self.0.iter()
    }

    // Same parameters without the credential, used for cache keys
    pub fn without_credentials(&self) -> BTreeMap<&str, &str> {
        self.0
            .iter()
            .filter(|(k, _)| k.as_str() != API_KEY_PARAM)
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect()
    }
}

impl FromIterator<(String, String)> for SearchParams {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        SearchParams(iter.into_iter().collect())
    }
}

// Expand each comma-separated code; unknown codes pass through untouched
pub fn expand_airports(codes: &str) -> String {
    let mut expanded: Vec<String> = Vec::new();
    for code in codes.split(',').map(str::trim).filter(|c| !c.is_empty()) {
        let upper = code.to_uppercase();
        match GROUPING_CODES.iter().find(|(group, _)| *group == upper) {
            Some((_, airports)) => {
                for airport in airports.split(',') {
                    if !expanded.iter().any(|a| a == airport) {
                        expanded.push(airport.to_string());
                    }
                }
            }
            None => {
                if !expanded.iter().any(|a| a == code) {
                    expanded.push(code.to_string());
                }
            }
        }
    }
    if expanded.is_empty() {
        return codes.to_string();
    }
    expanded.join(",")
}

// Keep only "dep_start,dep_end". Arrival windows are enforced by post-filters
// because the upstream drops valid nonstop and overnight itineraries with them.
pub fn departure_only(window: &str) -> String {
    let parts: Vec<&str> = window.split(',').map(str::trim).collect();
    if parts.len() >= 2 {
        format!("{},{}", parts[0], parts[1])
    } else {
        window.to_string()
    }
}

pub fn airline_code(name: &str) -> String {
    let lowered = name.trim().to_lowercase();
    AIRLINE_CODES
        .iter()
        .find(|(airline, _)| *airline == lowered)
        .map(|(_, code)| code.to_string())
        .unwrap_or_else(|| name.trim().to_uppercase().chars().take(2).collect())
}

pub fn build_params(combo: &SearchCombination, api: &ApiConfig) -> SearchParams {
    let mut params = SearchParams::new();
    params.set("engine", api.engine.as_str());
    params.set(API_KEY_PARAM, api.api_key.as_str());
    params.set("departure_id", expand_airports(&combo.departure_id));
    params.set("arrival_id", expand_airports(&combo.arrival_id));
    params.set("outbound_date", combo.outbound_date.as_str());
    params.set("type", u8::from(combo.trip_type).to_string());
    params.set("travel_class", combo.travel_class.to_string());
    params.set("adults", combo.adults.to_string());
    params.set("children", combo.children.to_string());
    params.set("stops", combo.stops.to_string());
    params.set("sort_by", combo.sort_by.to_string());
    params.set("bags", combo.bags.to_string());
    params.set("currency", api.currency.as_str());
    params.set("hl", api.language.as_str());
    params.set("gl", api.country.as_str());
    if api.deep_search {
        params.set("deep_search", "true");
    }

    if let Some(return_date) = &combo.return_date {
        params.set("return_date", return_date.as_str());
    }

    // Upstream treats these as mutually exclusive; include wins
    if let Some(include) = &combo.include_airlines {
        params.set("include_airlines", include.as_str());
    } else if let Some(exclude) = &combo.exclude_airlines {
        params.set("exclude_airlines", exclude.as_str());
    }

    if let Some(max_price) = combo.max_price {
        params.set("max_price", max_price.to_string());
    }
    if let Some(max_duration) = combo.max_duration {
        params.set("max_duration", max_duration.to_string());
    }

    if let Some(window) = &combo.outbound_times {
        params.set("outbound_times", departure_only(window));
    }
    if let Some(window) = &combo.return_times {
        params.set("return_times", departure_only(window));
    }

    params
}

// Secondary lookup for the return leg of one outbound group
pub fn return_leg_params(base: &SearchParams, departure_token: &str) -> SearchParams {
    let mut params = base.clone();
    params.set("departure_token", departure_token);
    params
}

// Outbound-only and return-only one-way searches for a round-trip combination.
// Airline filters are dropped unless `forced_airline` pins one.
pub fn one_way_legs(
    combo: &SearchCombination,
    api: &ApiConfig,
    forced_airline: Option<&str>,
) -> (SearchParams, SearchParams) {
    let mut base = build_params(combo, api);
    base.remove("include_airlines");
    base.remove("exclude_airlines");
    if let Some(code) = forced_airline {
        base.set("include_airlines", code);
    }
    base.set("type", u8::from(TripType::OneWay).to_string());

    let mut outbound = base.clone();
    outbound.remove("return_date");
    outbound.remove("return_times");

    let mut inbound = base;
    inbound.set("departure_id", expand_airports(&combo.arrival_id));
    inbound.set("arrival_id", expand_airports(&combo.departure_id));
    if let Some(return_date) = &combo.return_date {
        inbound.set("outbound_date", return_date.as_str());
    }
    inbound.remove("return_date");
    inbound.remove("return_times");
    inbound.remove("outbound_times");
    if let Some(window) = &combo.return_times {
        inbound.set("outbound_times", departure_only(window));
    }

    (outbound, inbound)
}
