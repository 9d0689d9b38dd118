//! NMEA 0183 sentence decoder
//!
//! Only the three sentence formatters that carry location data are decoded:
//! - RMC: Recommended Minimum (position, speed, course, date/time)
//! - GGA: Fix Data (fix quality, satellites, altitude)
//! - GSA: DOP and Active Satellites (dilution of precision)
//!
//! Any talker is accepted (`GP`, `GN`, `GL`, ...). Every other sentence,
//! including proprietary `$P...` ones, is dropped after comparing its
//! address field, without tokenizing it.
//!
//! Decoded fields are kept as the raw tokens the receiver sent. Numeric
//! interpretation happens later and never fails hard.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::checksum::{self, SENTENCE_START};
use super::framing::DELIMITER;

/// Sentence formatters the decoder understands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SentenceKind {
    /// Recommended minimum navigation information
    Rmc,
    /// Fix data
    Gga,
    /// DOP and active satellites
    Gsa,
}

impl SentenceKind {
    /// All decodable kinds
    pub const ALL: [SentenceKind; 3] = [Self::Rmc, Self::Gga, Self::Gsa];

    /// Identify a framed sentence by its address field.
    ///
    /// `sentence` must start at the `$`. Only the five address characters
    /// are inspected.
    pub fn identify(sentence: &[u8]) -> Option<Self> {
        let address = sentence.strip_prefix(&[SENTENCE_START])?.get(..6)?;
        let (talker, rest) = address.split_at(2);

        // Proprietary sentences use 'P' as talker prefix
        if talker[0] == b'P' || !talker.iter().all(u8::is_ascii_uppercase) {
            return None;
        }
        if rest[3] != DELIMITER {
            return None;
        }

        match &rest[..3] {
            b"RMC" => Some(Self::Rmc),
            b"GGA" => Some(Self::Gga),
            b"GSA" => Some(Self::Gsa),
            _ => None,
        }
    }

    /// Three-letter sentence formatter
    pub fn formatter(self) -> &'static str {
        match self {
            Self::Rmc => "RMC",
            Self::Gga => "GGA",
            Self::Gsa => "GSA",
        }
    }

    fn bit(self) -> u8 {
        match self {
            Self::Rmc => 0b001,
            Self::Gga => 0b010,
            Self::Gsa => 0b100,
        }
    }
}

impl fmt::Display for SentenceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.formatter())
    }
}

/// Small set of [`SentenceKind`]s
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct KindSet(u8);

impl KindSet {
    /// No kinds
    pub const EMPTY: KindSet = KindSet(0);
    /// Every decodable kind
    pub const COMPLETE: KindSet = KindSet(0b111);

    /// Add a kind
    pub fn insert(&mut self, kind: SentenceKind) {
        self.0 |= kind.bit();
    }

    /// Whether `kind` is present
    pub fn contains(self, kind: SentenceKind) -> bool {
        self.0 & kind.bit() != 0
    }

    /// Whether every kind is present
    pub fn is_complete(self) -> bool {
        self == Self::COMPLETE
    }

    /// Whether no kind is present
    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Union of both sets
    #[must_use]
    pub fn union(self, other: KindSet) -> KindSet {
        KindSet(self.0 | other.0)
    }

    /// Iterate the contained kinds
    pub fn iter(self) -> impl Iterator<Item = SentenceKind> {
        SentenceKind::ALL.into_iter().filter(move |k| self.contains(*k))
    }
}

impl FromIterator<SentenceKind> for KindSet {
    fn from_iter<I: IntoIterator<Item = SentenceKind>>(iter: I) -> Self {
        let mut set = KindSet::EMPTY;
        for kind in iter {
            set.insert(kind);
        }
        set
    }
}

/// Fields carried by an RMC sentence
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PositionFix {
    /// UTC time, `hhmmss[.sss]`
    pub time: Option<String>,
    /// Latitude, `ddmm.mmmm`
    pub latitude: Option<String>,
    /// `N` or `S`
    pub latitude_hemisphere: Option<char>,
    /// Longitude, `dddmm.mmmm`
    pub longitude: Option<String>,
    /// `E` or `W`
    pub longitude_hemisphere: Option<char>,
    /// Speed over ground in knots
    pub speed: Option<String>,
    /// Course over ground in degrees; absent tokens leave the previous value
    pub course: Option<String>,
    /// UTC date, `ddmmyy`; only six-character tokens are accepted
    pub date: Option<String>,
}

/// Fields carried by a GGA sentence
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AltitudeFix {
    /// Fix quality indicator
    pub quality: Option<String>,
    /// Satellites used in the solution
    pub satellites: Option<String>,
    /// Altitude above mean sea level in metres
    pub altitude: Option<String>,
}

/// Fields carried by a GSA sentence
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DilutionOfPrecision {
    /// Position dilution of precision
    pub pdop: Option<String>,
    /// Horizontal dilution of precision
    pub hdop: Option<String>,
    /// Vertical dilution of precision
    pub vdop: Option<String>,
}

/// One decoded sentence
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PartialRecord {
    /// From RMC
    Position(PositionFix),
    /// From GGA
    Altitude(AltitudeFix),
    /// From GSA
    Dilution(DilutionOfPrecision),
}

impl PartialRecord {
    /// Sentence kind this record came from
    pub fn kind(&self) -> SentenceKind {
        match self {
            Self::Position(_) => SentenceKind::Rmc,
            Self::Altitude(_) => SentenceKind::Gga,
            Self::Dilution(_) => SentenceKind::Gsa,
        }
    }

    fn empty(kind: SentenceKind) -> Self {
        match kind {
            SentenceKind::Rmc => Self::Position(PositionFix::default()),
            SentenceKind::Gga => Self::Altitude(AltitudeFix::default()),
            SentenceKind::Gsa => Self::Dilution(DilutionOfPrecision::default()),
        }
    }

    /// Store the token at `index`. Indices a kind does not use are ignored.
    fn set_token(&mut self, index: usize, token: &str) {
        let value = || (!token.is_empty()).then(|| token.to_string());
        let hemisphere = || token.chars().next();

        match self {
            Self::Position(fix) => match index {
                1 => fix.time = value(),
                3 => fix.latitude = value(),
                4 => fix.latitude_hemisphere = hemisphere(),
                5 => fix.longitude = value(),
                6 => fix.longitude_hemisphere = hemisphere(),
                7 => fix.speed = value(),
                8 => fix.course = value(),
                9 if token.len() == 6 => fix.date = value(),
                _ => {}
            },
            Self::Altitude(fix) => match index {
                6 => fix.quality = value(),
                7 => fix.satellites = value(),
                9 => fix.altitude = value(),
                _ => {}
            },
            Self::Dilution(dop) => match index {
                15 => dop.pdop = value(),
                16 => dop.hdop = value(),
                17 => dop.vdop = value(),
                _ => {}
            },
        }
    }
}

/// Stateless sentence decoder
#[derive(Debug, Clone, Copy, Default)]
pub struct SentenceDecoder;

impl SentenceDecoder {
    /// Identify, verify and decode one framed sentence.
    ///
    /// Returns `None` for unsupported sentences and for any sentence whose
    /// checksum is missing or wrong.
    pub fn decode(sentence: &[u8]) -> Option<PartialRecord> {
        let kind = SentenceKind::identify(sentence)?;
        Self::decode_as(kind, sentence)
    }

    /// Verify and decode a sentence already identified as `kind`
    pub fn decode_as(kind: SentenceKind, sentence: &[u8]) -> Option<PartialRecord> {
        let body = checksum::verify(sentence)?;
        let mut record = PartialRecord::empty(kind);

        for (index, token) in body.split(|&b| b == DELIMITER).enumerate() {
            // Non-ASCII bytes in a checksummed sentence leave the field unset
            let token = std::str::from_utf8(token).unwrap_or_default();
            record.set_token(index, token);
        }

        Some(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::protocol::checksum::create_sentence;

    #[test]
    fn test_identify() {
        assert_eq!(SentenceKind::identify(b"$GPRMC,1"), Some(SentenceKind::Rmc));
        assert_eq!(SentenceKind::identify(b"$GNGGA,1"), Some(SentenceKind::Gga));
        assert_eq!(SentenceKind::identify(b"$GLGSA,1"), Some(SentenceKind::Gsa));
        assert_eq!(SentenceKind::identify(b"$GPGSV,3,2"), None);
        assert_eq!(SentenceKind::identify(b"$PSRFTXT,Version"), None);
        assert_eq!(SentenceKind::identify(b"$PGRMC,1"), None);
        assert_eq!(SentenceKind::identify(b"$GPRMCX,1"), None);
        assert_eq!(SentenceKind::identify(b"GPRMC,1,2"), None);
        assert_eq!(SentenceKind::identify(b"$GP"), None);
    }

    #[test]
    fn test_rmc_parse() {
        let sentence =
            b"$GPRMC,063605.000,A,3746.0188,N,12226.1276,W,0.40,130.67,140207,,*10\r\n";
        let Some(PartialRecord::Position(fix)) = SentenceDecoder::decode(sentence) else {
            panic!("RMC should decode");
        };

        assert_eq!(fix.time.as_deref(), Some("063605.000"));
        assert_eq!(fix.latitude.as_deref(), Some("3746.0188"));
        assert_eq!(fix.latitude_hemisphere, Some('N'));
        assert_eq!(fix.longitude.as_deref(), Some("12226.1276"));
        assert_eq!(fix.longitude_hemisphere, Some('W'));
        assert_eq!(fix.speed.as_deref(), Some("0.40"));
        assert_eq!(fix.course.as_deref(), Some("130.67"));
        assert_eq!(fix.date.as_deref(), Some("140207"));
    }

    #[test]
    fn test_rmc_bad_checksum() {
        let sentence =
            b"$GPRMC,063605.000,A,3746.0188,N,12226.1276,W,0.40,130.67,140207,,*FF\r\n";
        assert_eq!(SentenceDecoder::decode(sentence), None);
    }

    #[test]
    fn test_gga_parse() {
        let sentence =
            b"$GPGGA,063606.000,3746.0183,N,12226.1274,W,1,05,2.1,55.1,M,-25.3,M,,0000*5C\r\n";
        let Some(PartialRecord::Altitude(fix)) = SentenceDecoder::decode(sentence) else {
            panic!("GGA should decode");
        };

        assert_eq!(fix.quality.as_deref(), Some("1"));
        assert_eq!(fix.satellites.as_deref(), Some("05"));
        assert_eq!(fix.altitude.as_deref(), Some("55.1"));
    }

    #[test]
    fn test_gga_without_altitude() {
        let sentence = create_sentence("GPGGA,063606.000,,,,,0,00,,,M,,M,,");
        let Some(PartialRecord::Altitude(fix)) = SentenceDecoder::decode(sentence.as_bytes())
        else {
            panic!("GGA should decode");
        };
        assert_eq!(fix.quality.as_deref(), Some("0"));
        assert_eq!(fix.altitude, None);
    }

    #[test]
    fn test_gsa_parse() {
        let sentence = b"$GPGSA,A,3,23,16,13,27,25,,,,,,,,4.1,2.1,3.6*37\r\n";
        let Some(PartialRecord::Dilution(dop)) = SentenceDecoder::decode(sentence) else {
            panic!("GSA should decode");
        };

        assert_eq!(dop.pdop.as_deref(), Some("4.1"));
        assert_eq!(dop.hdop.as_deref(), Some("2.1"));
        assert_eq!(dop.vdop.as_deref(), Some("3.6"));
    }

    #[test]
    fn test_multi_constellation_talker() {
        let sentence = create_sentence("GNRMC,120000.00,A,5130.0000,N,00007.5000,W,1.5,90.0,010124,,,A");
        let record = SentenceDecoder::decode(sentence.as_bytes());
        assert_eq!(record.map(|r| r.kind()), Some(SentenceKind::Rmc));
    }

    #[test]
    fn test_short_date_is_ignored() {
        let sentence = create_sentence("GPRMC,063605.000,A,3746.0188,N,12226.1276,W,0.40,,1402,,");
        let Some(PartialRecord::Position(fix)) = SentenceDecoder::decode(sentence.as_bytes())
        else {
            panic!("RMC should decode");
        };
        assert_eq!(fix.date, None);
        assert_eq!(fix.course, None);
    }

    #[test]
    fn test_corrupt_sentences_discarded() {
        // Wrong checksum
        let bad = b"$GPRMC,190350.000,A,3746.0164,N,12226.1176,W,0.45,210.68,031006,,*15\r\n";
        assert_eq!(SentenceDecoder::decode(bad), None);

        // Two sentences merged together
        let merged = b"$GPGGA,063606.000,3746.0183,N,12226.1274,W,1,05,2.1,55.1,3,23,16,13,27,25,,,,,,,,4.1,2.1,3.6*37\r\n";
        assert_eq!(SentenceDecoder::decode(merged), None);

        // Proprietary text without checksum
        let sirf = b"$PSRFTXT,Baud rate: 38400  System clock: 1058.797MHz\r\n";
        assert_eq!(SentenceDecoder::decode(sirf), None);
    }

    #[test]
    fn test_kind_set() {
        let mut set = KindSet::EMPTY;
        assert!(set.is_empty());
        set.insert(SentenceKind::Rmc);
        set.insert(SentenceKind::Gsa);
        assert!(set.contains(SentenceKind::Rmc));
        assert!(!set.contains(SentenceKind::Gga));
        assert!(!set.is_complete());
        assert_eq!(set.iter().count(), 2);

        let all: KindSet = SentenceKind::ALL.into_iter().collect();
        assert!(all.is_complete());
        assert!(set.union(all).is_complete());
    }
}
