// Result normalization: nested flight groups into flat, deduplicated FlightResult rows

use std::collections::HashSet;

use crate::models::{FlightResult, ItineraryType, SortKey, TripType};
use crate::serp::{FetchedResponse, FlightGroup, FlightSegment, IndependentPair, Layover};

// Split-ticket pairing is capped at this many groups per side
const INDEPENDENT_TOP_N: usize = 3;

const DEFAULT_TRAVEL_CLASS: &str = "Economy";

pub fn fmt_duration(minutes: u32) -> String {
    format!("{}h {:02}m", minutes / 60, minutes % 60)
}

// "1h 35m at DEN (overnight)"
pub fn describe_layover(layover: &Layover) -> String {
    let location = layover
        .id
        .as_deref()
        .or(layover.name.as_deref())
        .unwrap_or("?");
    let overnight = if layover.overnight { " (overnight)" } else { "" };
    format!("{} at {}{}", fmt_duration(layover.duration), location, overnight)
}

// First-seen order, empties and repeats dropped
fn join_distinct<'a>(items: impl Iterator<Item = &'a str>, separator: &str) -> String {
    let mut seen: Vec<&str> = Vec::new();
    for item in items {
        if !item.is_empty() && !seen.contains(&item) {
            seen.push(item);
        }
    }
    seen.join(separator)
}

fn non_empty(value: String) -> Option<String> {
    if value.is_empty() {
        None
    } else {
        Some(value)
    }
}

// Flattened view of one directional leg
#[derive(Debug, Clone, PartialEq)]
struct LegSummary {
    origin: String,
    destination: String,
    airline: String,
    flight_numbers: String,
    depart_time: String,
    arrive_time: String,
    stops: u32,
    layover_info: String,
    airplane: String,
    legroom: String,
    extensions: String,
    travel_class: String,
}

impl LegSummary {
    // None for a leg without segments
    fn from_segments(segments: &[FlightSegment], layovers: &[Layover]) -> Option<Self> {
        let first = segments.first()?;
        let last = segments.last()?;

        let flight_numbers: Vec<&str> = segments
            .iter()
            .map(|s| s.flight_number.as_str())
            .filter(|n| !n.is_empty())
            .collect();
        let layover_info: Vec<String> = layovers.iter().map(describe_layover).collect();

        Some(Self {
            origin: first.departure_airport.id.clone(),
            destination: last.arrival_airport.id.clone(),
            airline: join_distinct(segments.iter().map(|s| s.airline.as_str()), ", "),
            flight_numbers: flight_numbers.join(" / "),
            depart_time: first.departure_airport.time.clone(),
            arrive_time: last.arrival_airport.time.clone(),
            stops: (segments.len() - 1) as u32,
            layover_info: layover_info.join("; "),
            airplane: join_distinct(segments.iter().map(|s| s.airplane.as_str()), ", "),
            legroom: join_distinct(segments.iter().map(|s| s.legroom.as_str()), ", "),
            extensions: join_distinct(
                segments
                    .iter()
                    .flat_map(|s| s.extensions.iter().map(String::as_str)),
                ", ",
            ),
            travel_class: first
                .travel_class
                .clone()
                .unwrap_or_else(|| DEFAULT_TRAVEL_CLASS.to_string()),
        })
    }
}

fn emissions_kg(group: &FlightGroup) -> Option<f64> {
    let grams = group.carbon_emissions.as_ref()?.this_flight?;
    Some((grams as f64 / 100.0).round() / 10.0)
}

pub struct FlightResultProcessor {
    currency: String,
}

impl FlightResultProcessor {
    pub fn new(currency: &str) -> Self {
        Self {
            currency: currency.to_string(),
        }
    }

    /// Flatten every fetched unit and drop repeats.
    ///
    /// The first occurrence of a dedup key wins, so overlapping combinations and
    /// cache replays never produce duplicate rows.
    pub fn process(&self, responses: &[FetchedResponse]) -> Vec<FlightResult> {
        let mut seen = HashSet::new();
        let mut results = Vec::new();
        let mut duplicates = 0usize;

        for response in responses {
            let flattened: Vec<FlightResult> = match response {
                FetchedResponse::Bundled {
                    trip_type,
                    response,
                } => {
                    let itinerary_type = match trip_type {
                        TripType::RoundTrip => ItineraryType::RoundTrip,
                        _ => ItineraryType::OneWay,
                    };
                    tracing::debug!(
                        itinerary_type = %itinerary_type,
                        groups = response.group_count(),
                        "flattening bundled response"
                    );
                    response
                        .groups()
                        .filter_map(|group| self.flatten_group(group, itinerary_type))
                        .collect()
                }
                FetchedResponse::IndependentPair(pair) => self.pair_independent(pair),
            };

            for result in flattened {
                if seen.insert(result.dedup_key()) {
                    results.push(result);
                } else {
                    duplicates += 1;
                }
            }
        }

        tracing::debug!(results = results.len(), duplicates, "normalized flight results");
        results
    }

    fn flatten_group(&self, group: &FlightGroup, itinerary_type: ItineraryType) -> Option<FlightResult> {
        let outbound = LegSummary::from_segments(&group.flights, &group.layovers)?;
        let return_leg = group.return_leg.as_ref();
        let inbound = return_leg.and_then(|leg| LegSummary::from_segments(&leg.flights, &leg.layovers));
        let return_extensions = return_leg
            .map(|leg| join_distinct(leg.extensions.iter().map(String::as_str), ", "))
            .and_then(non_empty);

        Some(FlightResult {
            itinerary_type,
            origin: outbound.origin,
            destination: outbound.destination,
            airline: outbound.airline,
            flight_numbers: outbound.flight_numbers,
            depart_time: outbound.depart_time,
            arrive_time: outbound.arrive_time,
            return_depart_time: inbound.as_ref().map(|l| l.depart_time.clone()),
            return_arrive_time: inbound.as_ref().map(|l| l.arrive_time.clone()),
            stops: outbound.stops,
            return_stops: inbound.as_ref().map(|l| l.stops),
            layover_info: outbound.layover_info,
            return_layover_info: inbound
                .as_ref()
                .and_then(|l| non_empty(l.layover_info.clone())),
            total_duration_mins: group.total_duration,
            return_total_duration_mins: return_leg.and_then(|leg| leg.total_duration),
            price: group.price.unwrap_or(0),
            outbound_price: group.price,
            return_price: None,
            total_price: group.price,
            currency: self.currency.clone(),
            travel_class: outbound.travel_class,
            emissions_kg: emissions_kg(group),
            airplane: outbound.airplane,
            return_airplane: inbound.as_ref().and_then(|l| non_empty(l.airplane.clone())),
            legroom: outbound.legroom,
            return_legroom: inbound.as_ref().and_then(|l| non_empty(l.legroom.clone())),
            extensions: outbound.extensions,
            return_flight_numbers: inbound
                .as_ref()
                .and_then(|l| non_empty(l.flight_numbers.clone())),
            return_airline: inbound.and_then(|l| non_empty(l.airline)),
            return_extensions,
            preferred: false,
        })
    }

    // Cross product of the leading outbound and return groups, priced as two tickets
    fn pair_independent(&self, pair: &IndependentPair) -> Vec<FlightResult> {
        let outbound: Vec<(&FlightGroup, LegSummary)> = pair
            .outbound_groups
            .iter()
            .take(INDEPENDENT_TOP_N)
            .filter_map(|g| LegSummary::from_segments(&g.flights, &g.layovers).map(|l| (g, l)))
            .collect();
        let inbound: Vec<(&FlightGroup, LegSummary)> = pair
            .return_groups
            .iter()
            .take(INDEPENDENT_TOP_N)
            .filter_map(|g| LegSummary::from_segments(&g.flights, &g.layovers).map(|l| (g, l)))
            .collect();

        let mut results = Vec::with_capacity(outbound.len() * inbound.len());
        for (out_group, out_leg) in &outbound {
            for (ret_group, ret_leg) in &inbound {
                let outbound_price = out_group.price.unwrap_or(0);
                let return_price = ret_group.price.unwrap_or(0);
                let total = outbound_price + return_price;
                let emissions = match (emissions_kg(out_group), emissions_kg(ret_group)) {
                    (Some(a), Some(b)) => Some(((a + b) * 10.0).round() / 10.0),
                    _ => None,
                };

                results.push(FlightResult {
                    itinerary_type: ItineraryType::IndependentOneWay,
                    origin: out_leg.origin.clone(),
                    destination: out_leg.destination.clone(),
                    airline: out_leg.airline.clone(),
                    flight_numbers: out_leg.flight_numbers.clone(),
                    depart_time: out_leg.depart_time.clone(),
                    arrive_time: out_leg.arrive_time.clone(),
                    return_depart_time: Some(ret_leg.depart_time.clone()),
                    return_arrive_time: Some(ret_leg.arrive_time.clone()),
                    stops: out_leg.stops,
                    return_stops: Some(ret_leg.stops),
                    layover_info: out_leg.layover_info.clone(),
                    return_layover_info: non_empty(ret_leg.layover_info.clone()),
                    total_duration_mins: out_group.total_duration,
                    return_total_duration_mins: Some(ret_group.total_duration),
                    price: total,
                    outbound_price: Some(outbound_price),
                    return_price: Some(return_price),
                    total_price: Some(total),
                    currency: self.currency.clone(),
                    travel_class: out_leg.travel_class.clone(),
                    emissions_kg: emissions,
                    airplane: out_leg.airplane.clone(),
                    return_airplane: non_empty(ret_leg.airplane.clone()),
                    legroom: out_leg.legroom.clone(),
                    return_legroom: non_empty(ret_leg.legroom.clone()),
                    extensions: out_leg.extensions.clone(),
                    return_flight_numbers: Some(ret_leg.flight_numbers.clone()),
                    return_airline: Some(ret_leg.airline.clone()),
                    return_extensions: non_empty(ret_leg.extensions.clone()),
                    preferred: false,
                });
            }
        }

        tracing::debug!(
            departure = %pair.route.departure_id,
            arrival = %pair.route.arrival_id,
            outbound_date = %pair.route.outbound_date,
            forced_airline = pair.forced_airline.as_deref().unwrap_or("-"),
            itineraries = results.len(),
            "paired split-ticket legs"
        );
        results
    }
}

// Stable: ties keep their normalized order
pub fn sort_results(mut results: Vec<FlightResult>, key: SortKey) -> Vec<FlightResult> {
    match key {
        SortKey::Price => results.sort_by_key(|r| r.effective_price()),
        SortKey::Duration => results.sort_by_key(|r| r.combined_duration_mins()),
        SortKey::DepartureTime => results.sort_by(|a, b| a.depart_time.cmp(&b.depart_time)),
        SortKey::ArrivalTime => results.sort_by(|a, b| a.arrive_time.cmp(&b.arrive_time)),
    }
    results
}
