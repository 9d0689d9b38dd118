//! Output formatting for the command-line tool

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::core::location::Location;
use crate::core::provider::ProviderState;

/// Output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text
    #[default]
    Text,
    /// One JSON object per line
    Json,
    /// Comma-separated values
    Csv,
}

/// CSV header matching [`format_location`]
pub const CSV_HEADER: &str =
    "timestamp,valid,latitude,longitude,altitude,speed,course,hdop,vdop,quality,satellites";

#[derive(Serialize)]
struct Event<'a, T: Serialize> {
    event: &'static str,
    provider: &'a str,
    #[serde(flatten)]
    body: T,
}

#[derive(Serialize)]
struct StateBody {
    state: ProviderState,
    at: DateTime<Utc>,
}

fn csv_number(value: f64) -> String {
    if value.is_finite() {
        value.to_string()
    } else {
        String::new()
    }
}

/// Render a location
pub fn format_location(provider: &str, location: &Location, format: OutputFormat) -> String {
    match format {
        OutputFormat::Text => format!("[{provider}] {location}"),
        OutputFormat::Json => serde_json::to_string(&Event {
            event: "location",
            provider,
            body: location,
        })
        .unwrap_or_default(),
        OutputFormat::Csv => {
            let c = &location.coordinates;
            format!(
                "{},{},{},{},{},{},{},{},{},{},{}",
                location.timestamp.to_rfc3339(),
                location.valid,
                csv_number(c.latitude),
                csv_number(c.longitude),
                csv_number(c.altitude),
                csv_number(location.speed),
                csv_number(location.course),
                csv_number(c.horizontal_accuracy),
                csv_number(c.vertical_accuracy),
                location.fix_quality,
                location.satellites.map(|s| s.to_string()).unwrap_or_default(),
            )
        }
    }
}

/// Render a state change; `None` for formats that only carry locations
pub fn format_state(provider: &str, state: ProviderState, format: OutputFormat) -> Option<String> {
    match format {
        OutputFormat::Text => Some(format!("[{provider}] state: {state}")),
        OutputFormat::Json => serde_json::to_string(&Event {
            event: "state",
            provider,
            body: StateBody {
                state,
                at: Utc::now(),
            },
        })
        .ok(),
        OutputFormat::Csv => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::location::QualifiedCoordinates;

    fn sample() -> Location {
        Location {
            coordinates: QualifiedCoordinates {
                latitude: 37.5,
                longitude: -122.25,
                ..QualifiedCoordinates::unknown()
            },
            speed: 1.0,
            valid: true,
            ..Location::invalid()
        }
    }

    #[test]
    fn test_csv_blanks_unknown_values() {
        let line = format_location("p", &sample(), OutputFormat::Csv);
        let fields: Vec<&str> = line.split(',').collect();
        assert_eq!(fields.len(), CSV_HEADER.split(',').count());
        assert_eq!(fields[1], "true");
        assert_eq!(fields[2], "37.5");
        assert_eq!(fields[4], "");
    }

    #[test]
    fn test_json_location() {
        let line = format_location("p", &sample(), OutputFormat::Json);
        let value: serde_json::Value = serde_json::from_str(&line).unwrap();
        assert_eq!(value["event"], "location");
        assert_eq!(value["provider"], "p");
        assert_eq!(value["valid"], true);
    }

    #[test]
    fn test_state_output() {
        assert_eq!(
            format_state("p", ProviderState::Available, OutputFormat::Text).unwrap(),
            "[p] state: available"
        );
        let json = format_state("p", ProviderState::OutOfService, OutputFormat::Json).unwrap();
        assert!(json.contains("\"state\":\"out_of_service\""));
        assert!(format_state("p", ProviderState::Available, OutputFormat::Csv).is_none());
    }
}
