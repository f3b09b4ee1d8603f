// Data structures for the upstream flight search JSON response
// Only the airports on a segment are mandatory; everything else may be absent upstream.

use serde::{Deserialize, Serialize};

use crate::models::TripType;

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct RawResponse {
    #[serde(default)]
    pub best_flights: Vec<FlightGroup>,
    #[serde(default)]
    pub other_flights: Vec<FlightGroup>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RawResponse {
    // Groups in upstream order: best first, then the rest
    pub fn groups(&self) -> impl Iterator<Item = &FlightGroup> {
        self.best_flights.iter().chain(self.other_flights.iter())
    }

    pub fn groups_mut(&mut self) -> impl Iterator<Item = &mut FlightGroup> {
        self.best_flights
            .iter_mut()
            .chain(self.other_flights.iter_mut())
    }

    pub fn group_count(&self) -> usize {
        self.best_flights.len() + self.other_flights.len()
    }

    pub fn into_groups(self) -> Vec<FlightGroup> {
        let mut groups = self.best_flights;
        groups.extend(self.other_flights);
        groups
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct FlightGroup {
    #[serde(default)]
    pub flights: Vec<FlightSegment>,
    #[serde(default)]
    pub layovers: Vec<Layover>,
    #[serde(default)]
    pub total_duration: u32,
    #[serde(default)]
    pub price: Option<u32>,
    #[serde(default)]
    pub carbon_emissions: Option<CarbonEmissions>,
    // Continuation token for the return-leg lookup
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub departure_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub return_leg: Option<ReturnLeg>,
}

impl FlightGroup {
    pub fn attach_return_leg(&mut self, leg: ReturnLeg) {
        self.return_leg = Some(leg);
    }
}

// Return-leg detail attached to an outbound group after enrichment
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct ReturnLeg {
    pub flights: Vec<FlightSegment>,
    #[serde(default)]
    pub layovers: Vec<Layover>,
    #[serde(default)]
    pub total_duration: Option<u32>,
    #[serde(default)]
    pub extensions: Vec<String>,
}

impl From<FlightGroup> for ReturnLeg {
    fn from(group: FlightGroup) -> Self {
        let extensions = group
            .flights
            .iter()
            .flat_map(|segment| segment.extensions.iter().cloned())
            .collect();
        ReturnLeg {
            flights: group.flights,
            layovers: group.layovers,
            total_duration: Some(group.total_duration),
            extensions,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct FlightSegment {
    pub departure_airport: AirportTime,
    pub arrival_airport: AirportTime,
    #[serde(default)]
    pub duration: u32,
    #[serde(default)]
    pub airline: String,
    #[serde(default)]
    pub flight_number: String,
    #[serde(default)]
    pub airplane: String,
    #[serde(default)]
    pub legroom: String,
    #[serde(default)]
    pub travel_class: Option<String>,
    #[serde(default)]
    pub extensions: Vec<String>,
    #[serde(default)]
    pub overnight: bool,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct AirportTime {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    // "2026-03-10 06:30"
    #[serde(default)]
    pub time: String,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct Layover {
    #[serde(default)]
    pub duration: u32,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub overnight: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct CarbonEmissions {
    // Grams
    #[serde(default)]
    pub this_flight: Option<u64>,
}

// Route identity of a split-ticket unit
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RouteKey {
    pub departure_id: String,
    pub arrival_id: String,
    pub outbound_date: String,
    pub return_date: Option<String>,
}

// Outbound-only and return-only search results for the same route,
// later paired into split-ticket itineraries
#[derive(Debug, Clone, PartialEq)]
pub struct IndependentPair {
    pub route: RouteKey,
    pub outbound_groups: Vec<FlightGroup>,
    pub return_groups: Vec<FlightGroup>,
    // Set when the pair came from a preference dual-fetch
    pub forced_airline: Option<String>,
}

// One unit of fetcher output handed to the normalizer
#[derive(Debug, Clone, PartialEq)]
pub enum FetchedResponse {
    Bundled {
        trip_type: TripType,
        response: RawResponse,
    },
    IndependentPair(IndependentPair),
}
