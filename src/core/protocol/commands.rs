//! Receiver control sentences
//!
//! Sentences written to the receiver after connecting (output selection)
//! and on demand (restart to re-acquire a fix). Each chipset dialect
//! ignores the other's commands, so all dialects can be sent blindly.

use serde::{Deserialize, Serialize};

use super::checksum::create_sentence;
use crate::core::location::Location;

/// GPS week 0 began 1999-08-21T23:59:47Z (Unix milliseconds)
pub const GPS_EPOCH_MS: i64 = 935_279_987_000;

/// Milliseconds in one GPS week
pub const MS_PER_WEEK: i64 = 604_800_000;

/// Receiver command dialects
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReceiverDialect {
    /// SiRF chipsets (`$PSRF1xx`)
    Sirf,
    /// Garmin receivers (`$PGRMx`)
    Garmin,
}

impl ReceiverDialect {
    /// Every known dialect
    pub const ALL: [ReceiverDialect; 2] = [Self::Sirf, Self::Garmin];

    /// Sentence bodies enabling RMC, GGA and GSA at 1 Hz and disabling
    /// everything else
    fn configuration_bodies(self) -> &'static [&'static str] {
        match self {
            // PSRF103,<msg>,<mode 0=set>,<rate s>,<checksum 1=on>
            Self::Sirf => &[
                "PSRF103,00,00,01,01", // GGA
                "PSRF103,02,00,01,01", // GSA
                "PSRF103,04,00,01,01", // RMC
                "PSRF103,01,00,00,01", // GLL
                "PSRF103,03,00,00,01", // GSV
                "PSRF103,05,00,00,01", // VTG
                "PSRF103,06,00,00,01",
                "PSRF103,07,00,00,01",
                "PSRF103,08,00,00,01",
                "PSRF103,09,00,00,01", // ZDA
                "PSRF103,10,00,00,01",
            ],
            // PGRMO,<sentence>,<mode 0=off 1=on 2=all off>
            Self::Garmin => &[
                "PGRMO,,2",
                "PGRMO,GPGGA,1",
                "PGRMO,GPGSA,1",
                "PGRMO,GPRMC,1",
            ],
        }
    }

    /// Framed configuration sentences for this dialect
    pub fn configuration(self) -> Vec<String> {
        self.configuration_bodies()
            .iter()
            .map(|body| create_sentence(body))
            .collect()
    }
}

/// Receiver restart used to re-acquire a fix
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Reacquire {
    /// Restart keeping almanac and ephemeris, no seed position
    WarmStart,
    /// Restart seeded with the last known position and GPS time
    HotStart {
        /// Decimal degrees
        latitude: f64,
        /// Decimal degrees
        longitude: f64,
        /// Metres, 0 when unknown
        altitude: f64,
        /// GPS week number
        week: i64,
        /// Seconds into the GPS week
        time_of_week: i64,
    },
}

impl Reacquire {
    /// Pick hot start when `last_fix` is a valid location, else warm start
    pub fn for_last_fix(last_fix: Option<&Location>) -> Self {
        let Some(location) = last_fix.filter(|l| l.is_valid()) else {
            return Self::WarmStart;
        };

        let (week, time_of_week) = gps_time(location.timestamp.timestamp_millis());
        let c = &location.coordinates;

        Self::HotStart {
            latitude: c.latitude,
            longitude: c.longitude,
            altitude: if c.altitude.is_finite() { c.altitude } else { 0.0 },
            week,
            time_of_week,
        }
    }

    /// Framed `PSRF104` sentence
    pub fn sentence(&self) -> String {
        match self {
            Self::WarmStart => create_sentence("PSRF104,0,0,0,0,0,0,12,2"),
            Self::HotStart {
                latitude,
                longitude,
                altitude,
                week,
                time_of_week,
            } => create_sentence(&format!(
                "PSRF104,{latitude},{longitude},{altitude},0,{time_of_week},{week},12,3"
            )),
        }
    }
}

/// Convert Unix milliseconds to (GPS week, seconds into week)
pub fn gps_time(unix_ms: i64) -> (i64, i64) {
    let since_epoch = unix_ms - GPS_EPOCH_MS;
    (
        since_epoch.div_euclid(MS_PER_WEEK),
        since_epoch.rem_euclid(MS_PER_WEEK) / 1000,
    )
}
