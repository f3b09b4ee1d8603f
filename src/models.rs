// Typed query inputs (produced by the query interpreter) and flat result records

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// Upstream trip type codes: 1=round-trip, 2=one-way, 3=multi-city
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum TripType {
    RoundTrip,
    OneWay,
    MultiCity,
}

impl Default for TripType {
    fn default() -> Self {
        TripType::RoundTrip
    }
}

impl TryFrom<u8> for TripType {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(TripType::RoundTrip),
            2 => Ok(TripType::OneWay),
            3 => Ok(TripType::MultiCity),
            other => Err(format!("unknown trip type code {}", other)),
        }
    }
}

impl From<TripType> for u8 {
    fn from(value: TripType) -> Self {
        match value {
            TripType::RoundTrip => 1,
            TripType::OneWay => 2,
            TripType::MultiCity => 3,
        }
    }
}

fn default_one() -> u32 {
    1
}

fn default_sort_by() -> u8 {
    2
}

fn default_class() -> u8 {
    1
}

// One upstream search. Date ranges and airport alternatives are already
// expanded into separate combinations by the interpreter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchCombination {
    // Comma-separated airport codes, grouping codes allowed ("NYC", "AUS,SAT")
    pub departure_id: String,
    pub arrival_id: String,
    // YYYY-MM-DD
    pub outbound_date: String,
    #[serde(default)]
    pub return_date: Option<String>,
    #[serde(rename = "type", default)]
    pub trip_type: TripType,
    // 1=economy, 2=premium economy, 3=business, 4=first
    #[serde(default = "default_class")]
    pub travel_class: u8,
    #[serde(default = "default_one")]
    pub adults: u32,
    #[serde(default)]
    pub children: u32,
    // 0=any, 1=nonstop, 2=one stop or fewer, 3=two stops or fewer
    #[serde(default)]
    pub stops: u8,
    #[serde(default)]
    pub include_airlines: Option<String>,
    #[serde(default)]
    pub exclude_airlines: Option<String>,
    #[serde(default)]
    pub max_price: Option<u32>,
    #[serde(default)]
    pub max_duration: Option<u32>,
    #[serde(default)]
    pub bags: u32,
    #[serde(default = "default_sort_by")]
    pub sort_by: u8,
    // "dep_start,dep_end" or "dep_start,dep_end,arr_start,arr_end"
    #[serde(default)]
    pub outbound_times: Option<String>,
    #[serde(default)]
    pub return_times: Option<String>,
}

impl SearchCombination {
    pub fn new(departure_id: &str, arrival_id: &str, outbound_date: &str) -> Self {
        Self {
            departure_id: departure_id.to_string(),
            arrival_id: arrival_id.to_string(),
            outbound_date: outbound_date.to_string(),
            return_date: None,
            trip_type: TripType::OneWay,
            travel_class: default_class(),
            adults: 1,
            children: 0,
            stops: 0,
            include_airlines: None,
            exclude_airlines: None,
            max_price: None,
            max_duration: None,
            bags: 0,
            sort_by: default_sort_by(),
            outbound_times: None,
            return_times: None,
        }
    }

    pub fn round_trip(
        departure_id: &str,
        arrival_id: &str,
        outbound_date: &str,
        return_date: &str,
    ) -> Self {
        Self {
            return_date: Some(return_date.to_string()),
            trip_type: TripType::RoundTrip,
            ..Self::new(departure_id, arrival_id, outbound_date)
        }
    }

    // Round-trip enrichment and split-ticket searches only apply when a return date exists
    pub fn is_round_trip(&self) -> bool {
        self.trip_type == TripType::RoundTrip && self.return_date.is_some()
    }

    pub fn route_label(&self) -> String {
        match &self.return_date {
            Some(ret) => format!(
                "{} -> {} on {} (return {})",
                self.departure_id, self.arrival_id, self.outbound_date, ret
            ),
            None => format!(
                "{} -> {} on {}",
                self.departure_id, self.arrival_id, self.outbound_date
            ),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterType {
    AtLeastOneLegAirline,
    ArrivalBefore,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Leg {
    Outbound,
    Return,
    #[default]
    Any,
}

impl fmt::Display for Leg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Leg::Outbound => write!(f, "outbound"),
            Leg::Return => write!(f, "return"),
            Leg::Any => write!(f, "any"),
        }
    }
}

// Constraint the upstream cannot express natively, applied after collection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostFilter {
    pub filter_type: FilterType,
    pub value: String,
    #[serde(default)]
    pub leg: Leg,
}

impl PostFilter {
    pub fn prefer_airline(value: &str, leg: Leg) -> Self {
        Self {
            filter_type: FilterType::AtLeastOneLegAirline,
            value: value.to_string(),
            leg,
        }
    }

    pub fn arrival_before(value: &str, leg: Leg) -> Self {
        Self {
            filter_type: FilterType::ArrivalBefore,
            value: value.to_string(),
            leg,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortKey {
    #[default]
    Price,
    Duration,
    DepartureTime,
    ArrivalTime,
}

// Lenient: the interpreter writes free-ish text such as "cheapest price" or "earliest departure"
impl FromStr for SortKey {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let pref = s.to_lowercase();
        Ok(if pref.contains("duration") {
            SortKey::Duration
        } else if pref.contains("depart") {
            SortKey::DepartureTime
        } else if pref.contains("arriv") {
            SortKey::ArrivalTime
        } else {
            SortKey::Price
        })
    }
}

fn deserialize_sort_key<'de, D>(deserializer: D) -> Result<SortKey, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    Ok(raw.parse().unwrap_or_default())
}

// Full interpreter output for one query
#[derive(Debug, Clone, Deserialize)]
pub struct ParsedQuery {
    pub combinations: Vec<SearchCombination>,
    #[serde(default, deserialize_with = "deserialize_sort_key")]
    pub ranking_preference: SortKey,
    #[serde(default)]
    pub query_summary: String,
    #[serde(default)]
    pub post_filters: Vec<PostFilter>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItineraryType {
    RoundTrip,
    OneWay,
    // Two separately priced one-way tickets
    IndependentOneWay,
}

impl fmt::Display for ItineraryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ItineraryType::RoundTrip => write!(f, "round_trip"),
            ItineraryType::OneWay => write!(f, "one_way"),
            ItineraryType::IndependentOneWay => write!(f, "independent_one_way"),
        }
    }
}

// Identity of a result for deduplication
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DedupKey {
    pub itinerary_type: ItineraryType,
    pub flight_numbers: String,
    pub depart_time: String,
    pub return_flight_numbers: Option<String>,
    pub return_depart_time: Option<String>,
}

// Flat itinerary candidate, one row in the exported sheet
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlightResult {
    pub itinerary_type: ItineraryType,
    pub origin: String,
    pub destination: String,
    pub airline: String,
    pub flight_numbers: String,
    // "2026-03-10 06:30"
    pub depart_time: String,
    pub arrive_time: String,
    pub return_depart_time: Option<String>,
    pub return_arrive_time: Option<String>,
    pub stops: u32,
    pub return_stops: Option<u32>,
    pub layover_info: String,
    pub return_layover_info: Option<String>,
    pub total_duration_mins: u32,
    pub return_total_duration_mins: Option<u32>,
    pub price: u32,
    pub outbound_price: Option<u32>,
    pub return_price: Option<u32>,
    pub total_price: Option<u32>,
    pub currency: String,
    pub travel_class: String,
    pub emissions_kg: Option<f64>,
    pub airplane: String,
    pub return_airplane: Option<String>,
    pub legroom: String,
    pub return_legroom: Option<String>,
    pub extensions: String,
    pub return_flight_numbers: Option<String>,
    pub return_airline: Option<String>,
    pub return_extensions: Option<String>,
    pub preferred: bool,
}

impl FlightResult {
    pub fn dedup_key(&self) -> DedupKey {
        DedupKey {
            itinerary_type: self.itinerary_type,
            flight_numbers: self.flight_numbers.clone(),
            depart_time: self.depart_time.clone(),
            return_flight_numbers: self.return_flight_numbers.clone(),
            return_depart_time: self.return_depart_time.clone(),
        }
    }

    pub fn effective_price(&self) -> u32 {
        self.total_price.unwrap_or(self.price)
    }

    pub fn combined_duration_mins(&self) -> u32 {
        self.total_duration_mins + self.return_total_duration_mins.unwrap_or(0)
    }
}
