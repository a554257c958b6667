use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde_json::{Map, Value, json};
use uuid::Uuid;

use wayfinder_core::error::CallError;

use crate::cache::{CacheClass, classify_query};

const POI_CATEGORIES: [&str; 6] = [
    "museum",
    "food",
    "nature",
    "shopping",
    "nightlife",
    "landmark",
];
const WEATHER_UNITS: [&str; 2] = ["metric", "imperial"];
const BOOKING_ITEM_TYPES: [&str; 3] = ["flight", "accommodation", "activity"];
const MAX_SEARCH_RESULTS: u64 = 20;
const MAX_FORECAST_DAYS: u64 = 16;
const MAX_POI_RADIUS_KM: f64 = 50.0;

/// The closed set of provider tools. Dispatch is by variant — there is no
/// runtime property probing and no way to register a tool the pipeline does
/// not know.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolKind {
    DestinationSearch,
    LodgingSearch,
    PoiSearch,
    WeatherForecast,
    BookingCreate,
}

/// Static description of one tool: wire name, provider domain (the prefix
/// of its error codes), and whether invoking it changes the world.
#[derive(Debug, Clone, Copy)]
pub struct ToolSpec {
    pub kind: ToolKind,
    pub name: &'static str,
    pub domain: &'static str,
    pub side_effecting: bool,
}

impl ToolSpec {
    /// JSON schema for discovery listings. Kept next to the validator so
    /// the two cannot drift apart unnoticed.
    pub fn input_schema(&self) -> Value {
        match self.kind {
            ToolKind::DestinationSearch => json!({
                "type": "object",
                "properties": {
                    "query": { "type": "string", "description": "Free-text destination query" },
                    "max_results": { "type": "integer", "minimum": 1, "maximum": MAX_SEARCH_RESULTS },
                    "region": { "type": "string" },
                },
                "required": ["query"],
            }),
            ToolKind::LodgingSearch => json!({
                "type": "object",
                "properties": {
                    "destination": { "type": "string" },
                    "check_in": { "type": "string", "format": "date" },
                    "check_out": { "type": "string", "format": "date" },
                    "guests": { "type": "integer", "minimum": 1 },
                    "max_price": { "type": "number", "minimum": 0 },
                },
                "required": ["destination", "check_in", "check_out"],
            }),
            ToolKind::PoiSearch => json!({
                "type": "object",
                "properties": {
                    "location": { "type": "string" },
                    "category": { "type": "string", "enum": POI_CATEGORIES },
                    "radius_km": { "type": "number", "exclusiveMinimum": 0, "maximum": MAX_POI_RADIUS_KM },
                },
                "required": ["location"],
            }),
            ToolKind::WeatherForecast => json!({
                "type": "object",
                "properties": {
                    "location": { "type": "string" },
                    "days": { "type": "integer", "minimum": 1, "maximum": MAX_FORECAST_DAYS },
                    "units": { "type": "string", "enum": WEATHER_UNITS },
                },
                "required": ["location"],
            }),
            ToolKind::BookingCreate => json!({
                "type": "object",
                "properties": {
                    "plan_id": { "type": "string", "format": "uuid" },
                    "item_type": { "type": "string", "enum": BOOKING_ITEM_TYPES },
                    "item_ref": { "type": "object", "description": "Provider record to book" },
                },
                "required": ["plan_id", "item_type", "item_ref"],
            }),
        }
    }

    /// Validate raw params against this tool's schema. First failure wins;
    /// rejections name the offending field and cause no side effect.
    pub fn validate(&self, params: &Value) -> Result<(), CallError> {
        let map = params
            .as_object()
            .ok_or_else(|| CallError::validation("params must be a JSON object"))?;
        match self.kind {
            ToolKind::DestinationSearch => {
                require_text(map, "query")?;
                optional_int_range(map, "max_results", 1, MAX_SEARCH_RESULTS)?;
                optional_text(map, "region")?;
                Ok(())
            }
            ToolKind::LodgingSearch => {
                require_text(map, "destination")?;
                let check_in = require_date(map, "check_in")?;
                let check_out = require_date(map, "check_out")?;
                if check_out <= check_in {
                    return Err(CallError::validation_field(
                        "check_out",
                        "check_out must be after check_in",
                    ));
                }
                optional_int_min(map, "guests", 1)?;
                optional_number_min(map, "max_price", 0.0)?;
                Ok(())
            }
            ToolKind::PoiSearch => {
                require_text(map, "location")?;
                optional_enum(map, "category", &POI_CATEGORIES)?;
                if let Some(radius) = optional_number_min(map, "radius_km", 0.0)? {
                    if radius == 0.0 || radius > MAX_POI_RADIUS_KM {
                        return Err(CallError::validation_field(
                            "radius_km",
                            format!("radius_km must be in (0, {MAX_POI_RADIUS_KM}]"),
                        ));
                    }
                }
                Ok(())
            }
            ToolKind::WeatherForecast => {
                require_text(map, "location")?;
                optional_int_range(map, "days", 1, MAX_FORECAST_DAYS)?;
                optional_enum(map, "units", &WEATHER_UNITS)?;
                Ok(())
            }
            ToolKind::BookingCreate => {
                let plan_id = require_text(map, "plan_id")?;
                if Uuid::parse_str(&plan_id).is_err() {
                    return Err(CallError::validation_field(
                        "plan_id",
                        "plan_id must be a UUID",
                    ));
                }
                let item_type = require_text(map, "item_type")?;
                if !BOOKING_ITEM_TYPES.contains(&item_type.as_str()) {
                    return Err(CallError::validation_field(
                        "item_type",
                        format!("item_type must be one of {BOOKING_ITEM_TYPES:?}"),
                    ));
                }
                match map.get("item_ref") {
                    Some(Value::Object(_)) => Ok(()),
                    _ => Err(CallError::validation_field(
                        "item_ref",
                        "item_ref must be an object",
                    )),
                }
            }
        }
    }

    /// How long a response from this tool stays fresh. Side-effecting tools
    /// are never cached, so their class is irrelevant in practice.
    pub fn cache_class(&self, params: &Value) -> CacheClass {
        match self.kind {
            ToolKind::DestinationSearch => params
                .get("query")
                .and_then(Value::as_str)
                .map(classify_query)
                .unwrap_or(CacheClass::Default),
            ToolKind::LodgingSearch => CacheClass::PriceSensitive,
            ToolKind::PoiSearch => CacheClass::SemiStatic,
            ToolKind::WeatherForecast => {
                let days = params.get("days").and_then(Value::as_u64).unwrap_or(1);
                if days <= 2 {
                    CacheClass::Realtime
                } else {
                    CacheClass::TimeSensitive
                }
            }
            ToolKind::BookingCreate => CacheClass::Default,
        }
    }
}

/// The typed tool map. Everything the pipeline can invoke is registered
/// here at construction; lookups by wire name.
pub struct ToolRegistry {
    tools: BTreeMap<&'static str, ToolSpec>,
}

impl ToolRegistry {
    /// The standard travel tool surface.
    pub fn standard() -> Self {
        let specs = [
            ToolSpec {
                kind: ToolKind::DestinationSearch,
                name: "destination_search",
                domain: "search",
                side_effecting: false,
            },
            ToolSpec {
                kind: ToolKind::LodgingSearch,
                name: "lodging_search",
                domain: "lodging",
                side_effecting: false,
            },
            ToolSpec {
                kind: ToolKind::PoiSearch,
                name: "poi_search",
                domain: "poi",
                side_effecting: false,
            },
            ToolSpec {
                kind: ToolKind::WeatherForecast,
                name: "weather_forecast",
                domain: "weather",
                side_effecting: false,
            },
            ToolSpec {
                kind: ToolKind::BookingCreate,
                name: "booking_create",
                domain: "booking",
                side_effecting: true,
            },
        ];
        ToolRegistry {
            tools: specs.into_iter().map(|spec| (spec.name, spec)).collect(),
        }
    }

    pub fn get(&self, name: &str) -> Option<&ToolSpec> {
        self.tools.get(name)
    }

    /// Discovery listing in the session-transport shape.
    pub fn listing(&self) -> Value {
        json!({
            "tools": self
                .tools
                .values()
                .map(|spec| json!({ "name": spec.name, "inputSchema": spec.input_schema() }))
                .collect::<Vec<_>>()
        })
    }
}

fn require_text(map: &Map<String, Value>, field: &str) -> Result<String, CallError> {
    match map.get(field) {
        Some(Value::String(text)) if !text.trim().is_empty() => Ok(text.clone()),
        Some(Value::String(_)) => Err(CallError::validation_field(
            field,
            format!("{field} must not be empty"),
        )),
        Some(_) => Err(CallError::validation_field(
            field,
            format!("{field} must be a string"),
        )),
        None => Err(CallError::validation_field(
            field,
            format!("{field} is required"),
        )),
    }
}

fn optional_text(map: &Map<String, Value>, field: &str) -> Result<Option<String>, CallError> {
    match map.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(text)) => Ok(Some(text.clone())),
        Some(_) => Err(CallError::validation_field(
            field,
            format!("{field} must be a string"),
        )),
    }
}

fn require_date(map: &Map<String, Value>, field: &str) -> Result<NaiveDate, CallError> {
    let raw = require_text(map, field)?;
    NaiveDate::parse_from_str(&raw, "%Y-%m-%d").map_err(|_| {
        CallError::validation_field(field, format!("{field} must be a YYYY-MM-DD date"))
    })
}

fn optional_int_range(
    map: &Map<String, Value>,
    field: &str,
    min: u64,
    max: u64,
) -> Result<Option<u64>, CallError> {
    match map.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(value) => match value.as_u64() {
            Some(n) if (min..=max).contains(&n) => Ok(Some(n)),
            _ => Err(CallError::validation_field(
                field,
                format!("{field} must be an integer in [{min}, {max}]"),
            )),
        },
    }
}

fn optional_int_min(
    map: &Map<String, Value>,
    field: &str,
    min: u64,
) -> Result<Option<u64>, CallError> {
    match map.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(value) => match value.as_u64() {
            Some(n) if n >= min => Ok(Some(n)),
            _ => Err(CallError::validation_field(
                field,
                format!("{field} must be an integer >= {min}"),
            )),
        },
    }
}

fn optional_number_min(
    map: &Map<String, Value>,
    field: &str,
    min: f64,
) -> Result<Option<f64>, CallError> {
    match map.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(value) => match value.as_f64() {
            Some(n) if n.is_finite() && n >= min => Ok(Some(n)),
            _ => Err(CallError::validation_field(
                field,
                format!("{field} must be a number >= {min}"),
            )),
        },
    }
}

fn optional_enum(
    map: &Map<String, Value>,
    field: &str,
    allowed: &[&str],
) -> Result<Option<String>, CallError> {
    match optional_text(map, field)? {
        None => Ok(None),
        Some(text) if allowed.contains(&text.as_str()) => Ok(Some(text)),
        Some(_) => Err(CallError::validation_field(
            field,
            format!("{field} must be one of {allowed:?}"),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(name: &str) -> ToolSpec {
        *ToolRegistry::standard().get(name).expect("registered tool")
    }

    #[test]
    fn registry_lists_every_tool_with_a_schema() {
        let registry = ToolRegistry::standard();
        let listing = registry.listing();
        let tools = listing["tools"].as_array().unwrap();
        assert_eq!(tools.len(), 5);
        for tool in tools {
            assert!(tool["name"].is_string());
            assert_eq!(tool["inputSchema"]["type"], "object");
        }
    }

    #[test]
    fn unknown_names_are_not_registered() {
        assert!(ToolRegistry::standard().get("teleport").is_none());
    }

    #[test]
    fn search_requires_a_query() {
        let spec = spec("destination_search");
        assert!(spec.validate(&json!({"query": "onsen towns"})).is_ok());

        let err = spec.validate(&json!({})).unwrap_err();
        assert_eq!(err.code(), "validation_failed");
        match err {
            CallError::Validation { field, .. } => assert_eq!(field.as_deref(), Some("query")),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn search_bounds_max_results() {
        let spec = spec("destination_search");
        assert!(spec.validate(&json!({"query": "x", "max_results": 20})).is_ok());
        assert!(spec.validate(&json!({"query": "x", "max_results": 0})).is_err());
        assert!(spec.validate(&json!({"query": "x", "max_results": 21})).is_err());
        assert!(spec.validate(&json!({"query": "x", "max_results": "many"})).is_err());
    }

    #[test]
    fn lodging_checks_date_order() {
        let spec = spec("lodging_search");
        let ok = json!({
            "destination": "Kyoto",
            "check_in": "2026-10-03",
            "check_out": "2026-10-07",
        });
        assert!(spec.validate(&ok).is_ok());

        let inverted = json!({
            "destination": "Kyoto",
            "check_in": "2026-10-07",
            "check_out": "2026-10-03",
        });
        assert!(spec.validate(&inverted).is_err());

        let malformed = json!({
            "destination": "Kyoto",
            "check_in": "next tuesday",
            "check_out": "2026-10-03",
        });
        assert!(spec.validate(&malformed).is_err());
    }

    #[test]
    fn poi_rejects_unknown_categories_and_wild_radii() {
        let spec = spec("poi_search");
        assert!(spec.validate(&json!({"location": "Nara", "category": "food"})).is_ok());
        assert!(spec.validate(&json!({"location": "Nara", "category": "casinos"})).is_err());
        assert!(spec.validate(&json!({"location": "Nara", "radius_km": 0})).is_err());
        assert!(spec.validate(&json!({"location": "Nara", "radius_km": 51})).is_err());
    }

    #[test]
    fn booking_requires_a_well_formed_reference() {
        let spec = spec("booking_create");
        let ok = json!({
            "plan_id": Uuid::now_v7().to_string(),
            "item_type": "accommodation",
            "item_ref": {"provider": "lodging", "offer_id": "abc"},
        });
        assert!(spec.validate(&ok).is_ok());
        assert!(spec.side_effecting);

        let bad_id = json!({
            "plan_id": "not-a-uuid",
            "item_type": "accommodation",
            "item_ref": {},
        });
        assert!(spec.validate(&bad_id).is_err());

        let bad_ref = json!({
            "plan_id": Uuid::now_v7().to_string(),
            "item_type": "flight",
            "item_ref": "PNR123",
        });
        assert!(spec.validate(&bad_ref).is_err());
    }

    #[test]
    fn cache_classes_track_tool_semantics() {
        assert_eq!(
            spec("lodging_search").cache_class(&json!({})),
            CacheClass::PriceSensitive
        );
        assert_eq!(
            spec("poi_search").cache_class(&json!({})),
            CacheClass::SemiStatic
        );
        assert_eq!(
            spec("weather_forecast").cache_class(&json!({"days": 1})),
            CacheClass::Realtime
        );
        assert_eq!(
            spec("weather_forecast").cache_class(&json!({"days": 7})),
            CacheClass::TimeSensitive
        );
        assert_eq!(
            spec("destination_search").cache_class(&json!({"query": "hotel prices"})),
            CacheClass::PriceSensitive
        );
    }
}
