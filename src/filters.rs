// Post-filters for constraints the upstream cannot express
// Airline preference is soft (reorders), arrival deadlines are hard (remove).

use chrono::{NaiveDate, NaiveDateTime};

use crate::models::{FilterType, FlightResult, Leg, PostFilter};

const DATETIME_FORMATS: [&str; 4] = [
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d %H:%M",
];

// ISO-8601-ish local timestamps as produced upstream and by the query interpreter.
// A bare date means midnight.
pub fn parse_timestamp(value: &str) -> Option<NaiveDateTime> {
    let value = value.trim();
    DATETIME_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(value, format).ok())
        .or_else(|| {
            NaiveDate::parse_from_str(value, "%Y-%m-%d")
                .ok()
                .and_then(|date| date.and_hms_opt(0, 0, 0))
        })
}

fn airline_matches(result: &FlightResult, needle: &str, leg: Leg) -> bool {
    let outbound = result.airline.to_lowercase().contains(needle);
    let inbound = result
        .return_airline
        .as_deref()
        .map_or(false, |airline| airline.to_lowercase().contains(needle));
    match leg {
        Leg::Outbound => outbound,
        Leg::Return => inbound,
        Leg::Any => outbound || inbound,
    }
}

// An arrival that cannot be parsed never fails the check
fn arrives_by(arrival: Option<&str>, deadline: NaiveDateTime) -> bool {
    match arrival.filter(|a| !a.is_empty()).map(|a| (a, parse_timestamp(a))) {
        Some((_, Some(arrived))) => arrived <= deadline,
        Some((raw, None)) => {
            tracing::debug!(arrival = raw, "unparseable arrival time, keeping result");
            true
        }
        None => true,
    }
}

fn within_deadline(result: &FlightResult, deadline: NaiveDateTime, leg: Leg) -> bool {
    let outbound = || arrives_by(Some(result.arrive_time.as_str()), deadline);
    let inbound = || arrives_by(result.return_arrive_time.as_deref(), deadline);
    match leg {
        Leg::Outbound => outbound(),
        Leg::Return => inbound(),
        Leg::Any => outbound() && inbound(),
    }
}

fn prefer_airline(results: Vec<FlightResult>, filter: &PostFilter) -> Vec<FlightResult> {
    let needle = filter.value.to_lowercase();
    let (mut preferred, others): (Vec<_>, Vec<_>) = results
        .into_iter()
        .partition(|r| airline_matches(r, &needle, filter.leg));
    for result in &mut preferred {
        result.preferred = true;
    }

    tracing::info!(
        airline = %filter.value,
        leg = %filter.leg,
        preferred = preferred.len(),
        other = others.len(),
        "applied airline preference"
    );
    preferred.extend(others);
    preferred
}

fn arrival_before(results: Vec<FlightResult>, filter: &PostFilter) -> Vec<FlightResult> {
    let Some(deadline) = parse_timestamp(&filter.value) else {
        tracing::warn!(value = %filter.value, "invalid arrival deadline, skipping filter");
        return results;
    };

    let before = results.len();
    let kept: Vec<FlightResult> = results
        .into_iter()
        .filter(|r| within_deadline(r, deadline, filter.leg))
        .collect();

    tracing::info!(
        deadline = %filter.value,
        leg = %filter.leg,
        before,
        after = kept.len(),
        removed = before - kept.len(),
        "applied arrival deadline"
    );
    kept
}

/// Apply post-filters in order.
///
/// `at_least_one_leg_airline` moves matching results to the front and flags them,
/// keeping relative order inside both partitions. `arrival_before` removes results
/// whose arrival on the scoped leg is strictly after the deadline.
pub fn apply_post_filters(results: Vec<FlightResult>, filters: &[PostFilter]) -> Vec<FlightResult> {
    filters
        .iter()
        .fold(results, |results, filter| match filter.filter_type {
            FilterType::AtLeastOneLegAirline => prefer_airline(results, filter),
            FilterType::ArrivalBefore => arrival_before(results, filter),
        })
}
