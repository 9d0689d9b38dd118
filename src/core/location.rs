//! Typed location records
//!
//! A [`Location`] is the immutable, unit-converted view of a published
//! [`GpsSnapshot`]. Unknown numeric values are `NaN`, never errors.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::assembler::GpsSnapshot;

/// Metres per second in one knot
pub const MS_PER_KNOT: f64 = 0.514_444_444;

/// Mean Earth radius in metres
pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// GPS fix quality, as reported by GGA
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum FixQuality {
    /// No fix
    #[default]
    Invalid,
    /// Standard GPS fix
    Gps,
    /// Differential GPS fix
    Dgps,
    /// Precise positioning service fix
    Pps,
    /// Real-time kinematic
    Rtk,
    /// Float RTK
    FloatRtk,
    /// Dead reckoning
    Estimated,
    /// Manual input
    Manual,
    /// Simulator
    Simulation,
}

impl FixQuality {
    /// Whether a location may be reported for this fix.
    /// Consumer receivers only report 0 to 3; other values are not trusted.
    pub fn is_usable(self) -> bool {
        matches!(self, Self::Gps | Self::Dgps | Self::Pps)
    }
}

impl From<u8> for FixQuality {
    fn from(v: u8) -> Self {
        match v {
            1 => Self::Gps,
            2 => Self::Dgps,
            3 => Self::Pps,
            4 => Self::Rtk,
            5 => Self::FloatRtk,
            6 => Self::Estimated,
            7 => Self::Manual,
            8 => Self::Simulation,
            _ => Self::Invalid,
        }
    }
}

impl fmt::Display for FixQuality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Invalid => "no fix",
            Self::Gps => "GPS",
            Self::Dgps => "DGPS",
            Self::Pps => "PPS",
            Self::Rtk => "RTK",
            Self::FloatRtk => "float RTK",
            Self::Estimated => "estimated",
            Self::Manual => "manual",
            Self::Simulation => "simulation",
        };
        f.write_str(name)
    }
}

/// Position with accuracy proxies
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct QualifiedCoordinates {
    /// Signed decimal degrees, south negative
    pub latitude: f64,
    /// Signed decimal degrees, west negative
    pub longitude: f64,
    /// Metres above mean sea level
    pub altitude: f64,
    /// Horizontal dilution of precision
    pub horizontal_accuracy: f64,
    /// Vertical dilution of precision
    pub vertical_accuracy: f64,
}

impl QualifiedCoordinates {
    /// All values unknown
    pub fn unknown() -> Self {
        Self {
            latitude: f64::NAN,
            longitude: f64::NAN,
            altitude: f64::NAN,
            horizontal_accuracy: f64::NAN,
            vertical_accuracy: f64::NAN,
        }
    }

    /// Whether latitude and longitude are known
    pub fn has_position(&self) -> bool {
        self.latitude.is_finite() && self.longitude.is_finite()
    }

    /// Great-circle distance to `other` in metres (haversine).
    /// `NaN` if either position is unknown.
    pub fn distance(&self, other: &QualifiedCoordinates) -> f64 {
        let (lat1, lat2) = (self.latitude.to_radians(), other.latitude.to_radians());
        let d_lat = lat2 - lat1;
        let d_lon = (other.longitude - self.longitude).to_radians();

        let h = (d_lat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (d_lon / 2.0).sin().powi(2);
        2.0 * EARTH_RADIUS_M * h.sqrt().atan2((1.0 - h).sqrt())
    }

    /// Initial bearing towards `other`, degrees clockwise from true north
    /// in `[0, 360)`. `NaN` if either position is unknown.
    pub fn azimuth_to(&self, other: &QualifiedCoordinates) -> f64 {
        let (lat1, lat2) = (self.latitude.to_radians(), other.latitude.to_radians());
        let d_lon = (other.longitude - self.longitude).to_radians();

        let y = d_lon.sin() * lat2.cos();
        let x = lat1.cos() * lat2.sin() - lat1.sin() * lat2.cos() * d_lon.cos();
        y.atan2(x).to_degrees().rem_euclid(360.0)
    }
}

/// A location report
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Location {
    /// Position and accuracy
    pub coordinates: QualifiedCoordinates,
    /// Ground speed in metres per second
    pub speed: f64,
    /// Course over ground in degrees
    pub course: f64,
    /// UTC time of the fix
    pub timestamp: DateTime<Utc>,
    /// Fix quality
    pub fix_quality: FixQuality,
    /// Satellites used
    pub satellites: Option<u8>,
    /// Whether this location carries a usable fix
    pub valid: bool,
}

impl Location {
    /// Convert a published snapshot
    pub fn from_snapshot(snapshot: &GpsSnapshot) -> Self {
        let coordinates = QualifiedCoordinates {
            latitude: snapshot.latitude_degrees(),
            longitude: snapshot.longitude_degrees(),
            altitude: snapshot.altitude_m(),
            horizontal_accuracy: snapshot.hdop(),
            vertical_accuracy: snapshot.vdop(),
        };
        let fix_quality = snapshot.fix_quality();

        Self {
            valid: fix_quality.is_usable() && coordinates.has_position(),
            coordinates,
            speed: snapshot.speed_knots() * MS_PER_KNOT,
            course: snapshot.course_deg(),
            timestamp: snapshot.timestamp().unwrap_or_else(Utc::now),
            fix_quality,
            satellites: snapshot.satellites(),
        }
    }

    /// Placeholder delivered when no fix arrived in time
    pub fn invalid() -> Self {
        Self {
            coordinates: QualifiedCoordinates::unknown(),
            speed: f64::NAN,
            course: f64::NAN,
            timestamp: Utc::now(),
            fix_quality: FixQuality::Invalid,
            satellites: None,
            valid: false,
        }
    }

    /// Whether this location carries a usable fix
    pub fn is_valid(&self) -> bool {
        self.valid
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.valid {
            return write!(f, "{} no valid fix", self.timestamp.format("%Y-%m-%dT%H:%M:%SZ"));
        }
        let c = &self.coordinates;
        write!(
            f,
            "{} lat={:.6} lon={:.6} alt={:.1}m speed={:.2}m/s course={:.1} hdop={:.1} ({})",
            self.timestamp.format("%Y-%m-%dT%H:%M:%S%.3fZ"),
            c.latitude,
            c.longitude,
            c.altitude,
            self.speed,
            self.course,
            c.horizontal_accuracy,
            self.fix_quality,
        )
    }
}
