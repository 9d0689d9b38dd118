//! Record assembly
//!
//! Merges decoded sentences into one working [`GpsSnapshot`] and decides
//! when a snapshot is complete enough to publish. [`NmeaParser`] couples
//! the receive buffer, framer, decoder and assembler into a single
//! `parse(chunk)` step driven by the session read loop.

use chrono::{DateTime, NaiveDate, NaiveTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use tracing::trace;

use super::location::FixQuality;
use super::protocol::framing::{RawBuffer, SentenceFramer, BUFFER_CAPACITY};
use super::protocol::nmea::{KindSet, PartialRecord, PositionFix, SentenceDecoder, SentenceKind};

/// Merged point-in-time record.
///
/// Fields hold the receiver's tokens verbatim; the accessors interpret them
/// lazily and yield `NaN`/`None` for anything malformed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GpsSnapshot {
    time: Option<String>,
    date: Option<String>,
    latitude: Option<String>,
    latitude_hemisphere: Option<char>,
    longitude: Option<String>,
    longitude_hemisphere: Option<char>,
    speed: Option<String>,
    course: Option<String>,
    quality: Option<String>,
    satellites: Option<String>,
    altitude: Option<String>,
    pdop: Option<String>,
    hdop: Option<String>,
    vdop: Option<String>,
}

impl GpsSnapshot {
    /// Merge one decoded sentence, overwriting only the fields its type
    /// produces. Course and date are kept when the sentence left them empty.
    pub fn apply(&mut self, record: &PartialRecord) {
        match record {
            PartialRecord::Position(fix) => {
                self.time.clone_from(&fix.time);
                self.latitude.clone_from(&fix.latitude);
                self.latitude_hemisphere = fix.latitude_hemisphere;
                self.longitude.clone_from(&fix.longitude);
                self.longitude_hemisphere = fix.longitude_hemisphere;
                self.speed.clone_from(&fix.speed);
                if fix.course.is_some() {
                    self.course.clone_from(&fix.course);
                }
                if fix.date.is_some() {
                    self.date.clone_from(&fix.date);
                }
            }
            PartialRecord::Altitude(fix) => {
                self.quality.clone_from(&fix.quality);
                self.satellites.clone_from(&fix.satellites);
                self.altitude.clone_from(&fix.altitude);
            }
            PartialRecord::Dilution(dop) => {
                self.pdop.clone_from(&dop.pdop);
                self.hdop.clone_from(&dop.hdop);
                self.vdop.clone_from(&dop.vdop);
            }
        }
    }

    /// Fill the course and date that a newer position sentence of the same
    /// pass left empty, taking them from an older one
    fn backfill(&mut self, fix: &PositionFix, gaps: &mut CarryGaps) {
        if gaps.course && fix.course.is_some() {
            self.course.clone_from(&fix.course);
            gaps.course = false;
        }
        if gaps.date && fix.date.is_some() {
            self.date.clone_from(&fix.date);
            gaps.date = false;
        }
    }

    /// Raw latitude token and hemisphere
    pub fn latitude_token(&self) -> (Option<&str>, Option<char>) {
        (self.latitude.as_deref(), self.latitude_hemisphere)
    }

    /// Raw longitude token and hemisphere
    pub fn longitude_token(&self) -> (Option<&str>, Option<char>) {
        (self.longitude.as_deref(), self.longitude_hemisphere)
    }

    /// Raw speed token (knots)
    pub fn speed_token(&self) -> Option<&str> {
        self.speed.as_deref()
    }

    /// Raw course token (degrees)
    pub fn course_token(&self) -> Option<&str> {
        self.course.as_deref()
    }

    /// Raw altitude token (metres)
    pub fn altitude_token(&self) -> Option<&str> {
        self.altitude.as_deref()
    }

    /// Raw HDOP and VDOP tokens
    pub fn dilution_tokens(&self) -> (Option<&str>, Option<&str>) {
        (self.hdop.as_deref(), self.vdop.as_deref())
    }

    /// Raw fix quality token
    pub fn quality_token(&self) -> Option<&str> {
        self.quality.as_deref()
    }

    /// Latitude in signed decimal degrees
    pub fn latitude_degrees(&self) -> f64 {
        to_degrees(self.latitude.as_deref(), self.latitude_hemisphere)
    }

    /// Longitude in signed decimal degrees
    pub fn longitude_degrees(&self) -> f64 {
        to_degrees(self.longitude.as_deref(), self.longitude_hemisphere)
    }

    /// Altitude in metres
    pub fn altitude_m(&self) -> f64 {
        parse_float(self.altitude.as_deref())
    }

    /// Speed over ground in knots
    pub fn speed_knots(&self) -> f64 {
        parse_float(self.speed.as_deref())
    }

    /// Course over ground in degrees
    pub fn course_deg(&self) -> f64 {
        parse_float(self.course.as_deref())
    }

    /// Position dilution of precision
    pub fn pdop(&self) -> f64 {
        parse_float(self.pdop.as_deref())
    }

    /// Horizontal dilution of precision
    pub fn hdop(&self) -> f64 {
        parse_float(self.hdop.as_deref())
    }

    /// Vertical dilution of precision
    pub fn vdop(&self) -> f64 {
        parse_float(self.vdop.as_deref())
    }

    /// Satellites used in the fix
    pub fn satellites(&self) -> Option<u8> {
        self.satellites.as_deref()?.parse().ok()
    }

    /// Whether a GGA sentence has reported a fix quality yet
    pub fn has_quality(&self) -> bool {
        self.quality.is_some()
    }

    /// Fix quality; unknown or malformed is [`FixQuality::Invalid`]
    pub fn fix_quality(&self) -> FixQuality {
        self.quality
            .as_deref()
            .and_then(|q| q.parse::<u8>().ok())
            .map(FixQuality::from)
            .unwrap_or_default()
    }

    /// UTC timestamp from RMC date and time
    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        let date = parse_date(self.date.as_deref()?)?;
        let time = parse_time(self.time.as_deref()?)?;
        Some(Utc.from_utc_datetime(&date.and_time(time)))
    }
}

fn parse_float(token: Option<&str>) -> f64 {
    token
        .and_then(|t| t.trim().parse::<f64>().ok())
        .unwrap_or(f64::NAN)
}

/// `ddmm.mmmm` / `dddmm.mmmm` to signed decimal degrees
fn to_degrees(token: Option<&str>, hemisphere: Option<char>) -> f64 {
    let sign = match hemisphere {
        Some('N' | 'E') => 1.0,
        Some('S' | 'W') => -1.0,
        _ => return f64::NAN,
    };

    let value = parse_float(token);
    let degrees = (value / 100.0).floor();
    let minutes = value - degrees * 100.0;

    if !(0.0..60.0).contains(&minutes) {
        return f64::NAN;
    }

    sign * (degrees + minutes / 60.0)
}

/// Parse time from `hhmmss[.sss]`
fn parse_time(s: &str) -> Option<NaiveTime> {
    if s.len() < 6 || !s.is_char_boundary(2) || !s.is_char_boundary(4) {
        return None;
    }

    let hours: u32 = s[0..2].parse().ok()?;
    let minutes: u32 = s[2..4].parse().ok()?;
    let seconds: f64 = s[4..].parse().ok()?;

    let secs = seconds.floor() as u32;
    let millis = ((seconds - seconds.floor()) * 1000.0).round() as u32;

    NaiveTime::from_hms_milli_opt(hours, minutes, secs, millis.min(999))
}

/// Parse date from `ddmmyy`; years are taken as 20yy
fn parse_date(s: &str) -> Option<NaiveDate> {
    if s.len() != 6 || !s.is_ascii() {
        return None;
    }

    let day: u32 = s[0..2].parse().ok()?;
    let month: u32 = s[2..4].parse().ok()?;
    let year: i32 = s[4..6].parse().ok()?;

    NaiveDate::from_ymd_opt(2000 + year, month, day)
}

/// Carry-over fields still owed by the newest position sentence of a pass
#[derive(Debug, Clone, Copy, Default)]
struct CarryGaps {
    course: bool,
    date: bool,
}

impl CarryGaps {
    fn of(fix: &PositionFix) -> Self {
        Self {
            course: fix.course.is_none(),
            date: fix.date.is_none(),
        }
    }

    fn is_open(self) -> bool {
        self.course || self.date
    }
}

/// When the assembler hands out a snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PublishPolicy {
    /// Publish once RMC, GGA and GSA have each contributed since the last
    /// publish
    #[default]
    FullCycle,
    /// Publish whenever a pass decoded RMC; altitude and dilution carry over
    /// from earlier passes
    Position,
}

/// Merges partial records into a working snapshot
#[derive(Debug, Default)]
pub struct RecordAssembler {
    working: GpsSnapshot,
    since_publish: KindSet,
    policy: PublishPolicy,
}

impl RecordAssembler {
    /// Create an assembler with the given publish policy
    pub fn new(policy: PublishPolicy) -> Self {
        Self {
            policy,
            ..Default::default()
        }
    }

    /// Merge one decoded sentence into the working snapshot
    pub fn apply(&mut self, record: &PartialRecord) {
        self.working.apply(record);
        self.since_publish.insert(record.kind());
    }

    fn backfill(&mut self, fix: &PositionFix, gaps: &mut CarryGaps) {
        self.working.backfill(fix, gaps);
    }

    /// Return a copy of the working snapshot if the publish policy is
    /// satisfied. The working snapshot keeps its fields for the next cycle.
    ///
    /// `pass` is the set of kinds decoded in the parse pass just finished.
    pub fn take_snapshot_if_complete(&mut self, pass: KindSet) -> Option<GpsSnapshot> {
        let ready = match self.policy {
            PublishPolicy::FullCycle => self.since_publish.is_complete(),
            PublishPolicy::Position => pass.contains(SentenceKind::Rmc),
        };

        if !ready {
            return None;
        }

        self.since_publish = KindSet::EMPTY;
        Some(self.working.clone())
    }

    /// Forget which kinds contributed since the last publish
    pub fn reset_cycle(&mut self) {
        self.since_publish = KindSet::EMPTY;
    }

    /// Current working snapshot
    pub fn working(&self) -> &GpsSnapshot {
        &self.working
    }

    /// Publish policy in use
    pub fn policy(&self) -> PublishPolicy {
        self.policy
    }
}

/// Result of one parse pass
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseOutcome {
    /// Too little buffered data to bother scanning
    NothingToProcess,
    /// A pass ran
    Parsed {
        /// Kinds decoded successfully this pass
        kinds: KindSet,
        /// Snapshot published by this pass, if the policy was satisfied
        snapshot: Option<GpsSnapshot>,
    },
}

impl ParseOutcome {
    /// Whether this pass decoded a position sentence
    pub fn has_position(&self) -> bool {
        matches!(self, Self::Parsed { kinds, .. } if kinds.contains(SentenceKind::Rmc))
    }

    /// Published snapshot, if any
    pub fn snapshot(&self) -> Option<&GpsSnapshot> {
        match self {
            Self::Parsed { snapshot, .. } => snapshot.as_ref(),
            Self::NothingToProcess => None,
        }
    }
}

/// Parser counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ParseStats {
    /// Sentences decoded and merged
    pub decoded: u64,
    /// Supported sentences discarded for a bad or missing checksum
    pub rejected: u64,
    /// Buffer overflows that discarded unparsed data
    pub overflows: u64,
}

/// Streaming NMEA parser
#[derive(Debug)]
pub struct NmeaParser {
    buffer: RawBuffer,
    assembler: RecordAssembler,
    stats: ParseStats,
}

impl NmeaParser {
    /// Create a parser with the default buffer and publish policy
    pub fn new() -> Self {
        Self::with_config(BUFFER_CAPACITY, PublishPolicy::default())
    }

    /// Create a parser with an explicit buffer capacity and publish policy
    pub fn with_config(capacity: usize, policy: PublishPolicy) -> Self {
        Self {
            buffer: RawBuffer::new(capacity),
            assembler: RecordAssembler::new(policy),
            stats: ParseStats::default(),
        }
    }

    /// Append a chunk and run one parse pass.
    ///
    /// Sentences are decoded newest-first; only the first successful decode
    /// of each kind counts, and the pass stops early once all kinds are in.
    /// Course and date the newest RMC left empty come from the newest older
    /// RMC of the same pass that has them, so the result does not depend on
    /// how the stream was chunked.
    pub fn parse(&mut self, chunk: &[u8]) -> ParseOutcome {
        if self.buffer.append(chunk) {
            self.stats.overflows += 1;
            trace!("receive buffer overflow, unparsed data dropped");
        }

        let data = self.buffer.as_slice();
        if !SentenceFramer::worth_scanning(data) {
            return ParseOutcome::NothingToProcess;
        }

        let mut kinds = KindSet::EMPTY;
        let mut gaps = CarryGaps::default();
        let mut frames = SentenceFramer::scan(data);
        let tail = frames.tail();

        for span in frames.by_ref() {
            let sentence = &data[span];
            let Some(kind) = SentenceKind::identify(sentence) else {
                continue;
            };
            if kinds.contains(kind) {
                if kind == SentenceKind::Rmc && gaps.is_open() {
                    if let Some(PartialRecord::Position(fix)) =
                        SentenceDecoder::decode_as(kind, sentence)
                    {
                        self.assembler.backfill(&fix, &mut gaps);
                    }
                }
                if kinds.is_complete() && !gaps.is_open() {
                    break;
                }
                continue;
            }

            match SentenceDecoder::decode_as(kind, sentence) {
                Some(record) => {
                    if let PartialRecord::Position(fix) = &record {
                        gaps = CarryGaps::of(fix);
                    }
                    self.assembler.apply(&record);
                    kinds.insert(kind);
                    self.stats.decoded += 1;
                }
                None => {
                    self.stats.rejected += 1;
                    trace!(%kind, "discarding sentence with bad checksum");
                }
            }

            if kinds.is_complete() && !gaps.is_open() {
                break;
            }
        }

        match tail {
            Some(offset) => self.buffer.retain_from(offset),
            None => self.buffer.clear(),
        }

        let snapshot = if kinds.is_empty() {
            None
        } else {
            self.assembler.take_snapshot_if_complete(kinds)
        };

        ParseOutcome::Parsed { kinds, snapshot }
    }

    /// Drop buffered bytes and the partial publish cycle.
    /// Merged fields are kept so carried-over values survive a reconnect.
    pub fn flush(&mut self) {
        self.buffer.clear();
        self.assembler.reset_cycle();
    }

    /// Working snapshot
    pub fn working(&self) -> &GpsSnapshot {
        self.assembler.working()
    }

    /// Counters since creation
    pub fn stats(&self) -> ParseStats {
        self.stats
    }

    /// Receive buffer capacity
    pub fn capacity(&self) -> usize {
        self.buffer.capacity()
    }
}

impl Default for NmeaParser {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{Rng, SeedableRng};

    const RMC: &[u8] =
        b"$GPRMC,063605.000,A,3746.0188,N,12226.1276,W,0.40,130.67,140207,,*10\r\n";
    const GGA: &[u8] =
        b"$GPGGA,063606.000,3746.0183,N,12226.1274,W,1,05,2.1,55.1,M,-25.3,M,,0000*5C\r\n";
    const GSA: &[u8] = b"$GPGSA,A,3,23,16,13,27,25,,,,,,,,4.1,2.1,3.6*37\r\n";

    const BATCH: &str = concat!(
        "$GPGSV,3,1,11,23,67,353,35,20,58,177,26,16,44,074,34,13,41,308,29*76\r\n",
        "$GPGSV,3,2,11,25,36,049,,27,25,246,32,04,16,292,,01,14,093,*70\r\n",
        "$GPGSV,3,3,11,31,05,054,,03,02,128,,08,00,236,*4A\r\n",
        "$GPRMC,063559.998,A,3746.0171,N,12226.1277,W,0.50,149.79,140207,,*15\r\n",
        "$PSRFTXT,Version:GSW3.1.1TO_3.1.00.07-C23P1.00\r\n",
        "$PSRFTXT,Version2:F-GPS-03-0510032\r\n",
        "$PSRFTXT,WAAS Enable\r\n",
        "$PSRFTXT,TOW:  282973\r\n",
        "$PSRFTXT,WK:   1414\r\n",
        "$PSRFTXT,POS:  -2707674 -4260780 3885049\r\n",
        "$PSRFTXT,CLK:  94976\r\n",
        "$PSRFTXT,CHNL: 12\r\n",
        "$PSRFTXT,Baud rate: 38400  System clock: 1058.797MHz\r\n",
        "$GPGGA,063601.002,3746.0171,N,12226.1278,W,1,05,2.1,59.7,M,-25.3,M,,0000*52\r\n",
        "$GPGSA,A,3,23,16,13,27,,,,,,,,,6.0,2.8,5.3*39\r\n",
        "$GPRMC,063601.002,A,3746.0171,N,12226.1278,W,0.47,305.20,140207,,*1E\r\n",
        "$PSRFTXT,Version:GSW3.1.1TO_3.1.00.07-C23P1.00\r\n",
        "$GPRMC,063601.002,A,3745.1313,N,12226.6666,W,0.47,305.20,140207,,*EE\r\n",
    );

    /// Newest RMC leaves course and date empty
    const GAPPED: &str = concat!(
        "$GPRMC,063559.998,A,3746.0171,N,12226.1277,W,0.50,149.79,140207,,*15\r\n",
        "$PSRFTXT,TOW:  282973\r\n",
        "$PSRFTXT,WK:   1414\r\n",
        "$GPGGA,063601.002,3746.0171,N,12226.1278,W,1,05,2.1,59.7,M,-25.3,M,,0000*52\r\n",
        "$GPGSA,A,3,23,16,13,27,,,,,,,,,6.0,2.8,5.3*39\r\n",
        "$GPRMC,063601.002,A,3746.0171,N,12226.1278,W,0.47,,,,*04\r\n",
        "$PSRFTXT,CHNL: 12\r\n",
    );

    fn assert_batch_result(snapshot: &GpsSnapshot) {
        assert_eq!(snapshot.latitude_token(), (Some("3746.0171"), Some('N')));
        assert_eq!(snapshot.longitude_token(), (Some("12226.1278"), Some('W')));
        assert_eq!(snapshot.speed_token(), Some("0.47"));
        assert_eq!(snapshot.course_token(), Some("305.20"));
        assert_eq!(snapshot.altitude_token(), Some("59.7"));
        assert_eq!(snapshot.dilution_tokens(), (Some("2.8"), Some("5.3")));
    }

    #[test]
    fn test_single_rmc() {
        let mut parser = NmeaParser::new();
        let outcome = parser.parse(RMC);
        assert!(outcome.has_position());

        let snapshot = parser.working();
        assert_eq!(snapshot.latitude_token(), (Some("3746.0188"), Some('N')));
        assert_eq!(snapshot.longitude_token(), (Some("12226.1276"), Some('W')));
        assert_eq!(snapshot.speed_token(), Some("0.40"));
        assert_eq!(snapshot.course_token(), Some("130.67"));
    }

    #[test]
    fn test_bad_checksum_decodes_nothing() {
        let sentence =
            b"$GPRMC,063605.000,A,3746.0188,N,12226.1276,W,0.40,130.67,140207,,*FF\r\n";
        let mut parser = NmeaParser::new();
        let outcome = parser.parse(sentence);

        assert_eq!(
            outcome,
            ParseOutcome::Parsed {
                kinds: KindSet::EMPTY,
                snapshot: None
            }
        );
        assert_eq!(parser.working(), &GpsSnapshot::default());
        assert_eq!(parser.stats().rejected, 1);
    }

    #[test]
    fn test_corrupt_sentences_contribute_nothing() {
        let inputs: [&[u8]; 4] = [
            b"$GPRMC,190350.000,A,3746.0164,N,12226.1176,W,0.45,210.68,031006,,*15\r\n",
            b"GPGGA,190353.000,3746.0164,N,12226.1176,W,1,08,1.0,67.5,M,-25.3,M,,0000*56\r\n",
            b"1171,W,1,08,1.0,68.8,M,-25.3,M,,0000*5C\r\n",
            b"$GPGGA,063606.000,3746.0183,N,12226.1274,W,1,05,2.1,55.1,3,23,16,13,27,25,,,,,,,,4.1,2.1,3.6*37\r\n",
        ];

        for input in inputs {
            let mut parser = NmeaParser::new();
            let outcome = parser.parse(input);
            assert!(!outcome.has_position());
            assert_eq!(parser.working(), &GpsSnapshot::default());
        }
    }

    #[test]
    fn test_corruption_does_not_poison_followers() {
        let mut parser = NmeaParser::new();
        parser.parse(b"$GPRMC,190350.000,A,3746.0164,N,12226.11");
        parser.parse(GSA);
        assert_eq!(parser.working().dilution_tokens(), (Some("2.1"), Some("3.6")));
    }

    #[test]
    fn test_throwaway_sentences() {
        let mut parser = NmeaParser::new();
        let gsv = b"$GPGSV,3,2,09,19,32,069,27,10,25,288,25,03,14,043,30,23,12,143,16*70\r\n";
        assert_eq!(
            parser.parse(gsv),
            ParseOutcome::Parsed {
                kinds: KindSet::EMPTY,
                snapshot: None
            }
        );

        let mut parser = NmeaParser::new();
        let sirf = b"$PSRFTXT,Baud rate: 38400  System clock: 1058.797MHz\r\n";
        assert!(!parser.parse(sirf).has_position());
        assert_eq!(parser.stats().rejected, 0);
    }

    #[test]
    fn test_nothing_to_process() {
        let mut parser = NmeaParser::new();
        assert_eq!(parser.parse(b"$GPRMC,0636"), ParseOutcome::NothingToProcess);
    }

    #[test]
    fn test_duplicate_kind_keeps_valid_one() {
        let mut stream = RMC.to_vec();
        stream.extend_from_slice(
            b"$GPRMC,063606.000,A,3746.9999,N,12226.9999,W,9.99,999.99,140207,,*00\r\n",
        );

        let mut parser = NmeaParser::new();
        let outcome = parser.parse(&stream);

        assert!(outcome.has_position());
        assert_eq!(parser.working().latitude_token(), (Some("3746.0188"), Some('N')));
        assert_eq!(parser.working().speed_token(), Some("0.40"));
    }

    #[test]
    fn test_newest_valid_sentence_wins() {
        let older = b"$GPRMC,063559.998,A,3746.0171,N,12226.1277,W,0.50,149.79,140207,,*15\r\n";
        let mut stream = older.to_vec();
        stream.extend_from_slice(RMC);

        let mut parser = NmeaParser::new();
        parser.parse(&stream);
        assert_eq!(parser.working().speed_token(), Some("0.40"));
        assert_eq!(parser.stats().decoded, 1);
    }

    #[test]
    fn test_full_cycle_publish() {
        let mut parser = NmeaParser::new();

        let outcome = parser.parse(RMC);
        assert!(outcome.snapshot().is_none());
        let outcome = parser.parse(GGA);
        assert!(outcome.snapshot().is_none());
        let outcome = parser.parse(GSA);
        let snapshot = outcome.snapshot().expect("all kinds contributed");
        assert_eq!(snapshot.altitude_token(), Some("55.1"));

        // Next cycle starts empty
        let outcome = parser.parse(RMC);
        assert!(outcome.snapshot().is_none());
    }

    #[test]
    fn test_altitude_carries_over() {
        let mut parser = NmeaParser::with_config(BUFFER_CAPACITY, PublishPolicy::Position);

        let mut first = GGA.to_vec();
        first.extend_from_slice(GSA);
        first.extend_from_slice(RMC);
        let snapshot = parser.parse(&first).snapshot().cloned().expect("published");
        assert_eq!(snapshot.altitude_token(), Some("55.1"));

        let later = b"$GPRMC,063601.002,A,3746.0171,N,12226.1278,W,0.47,305.20,140207,,*1E\r\n";
        let snapshot = parser.parse(later).snapshot().cloned().expect("published");
        assert_eq!(snapshot.speed_token(), Some("0.47"));
        assert_eq!(snapshot.altitude_token(), Some("55.1"));
        assert_eq!(snapshot.dilution_tokens(), (Some("2.1"), Some("3.6")));
    }

    #[test]
    fn test_position_policy_waits_for_rmc() {
        let mut parser = NmeaParser::with_config(BUFFER_CAPACITY, PublishPolicy::Position);
        assert!(parser.parse(GGA).snapshot().is_none());
        assert!(parser.parse(RMC).snapshot().is_some());
    }

    #[test]
    fn test_batch_in_chunks() {
        let input = BATCH.as_bytes();
        let mut parser = NmeaParser::new();
        let mut kinds = KindSet::EMPTY;

        for chunk in input.chunks(35) {
            if let ParseOutcome::Parsed { kinds: pass, .. } = parser.parse(chunk) {
                kinds = kinds.union(pass);
            }
        }

        assert!(kinds.is_complete());
        assert_batch_result(parser.working());
    }

    #[test]
    fn test_batch_whole() {
        let mut parser = NmeaParser::new();
        let outcome = parser.parse(BATCH.as_bytes());

        assert!(outcome.snapshot().is_some());
        assert_batch_result(parser.working());
    }

    fn assert_chunking_is_idempotent(input: &[u8]) -> GpsSnapshot {
        let mut whole = NmeaParser::new();
        whole.parse(input);

        let mut rng = rand::rngs::StdRng::seed_from_u64(0x6e6d_6561);
        for _ in 0..50 {
            let mut parser = NmeaParser::new();
            let mut offset = 0;
            while offset < input.len() {
                let size = rng.gen_range(1..=48).min(input.len() - offset);
                parser.parse(&input[offset..offset + size]);
                offset += size;
            }
            assert_eq!(parser.working(), whole.working());
        }
        whole.working().clone()
    }

    #[test]
    fn test_random_chunking_is_idempotent() {
        let snapshot = assert_chunking_is_idempotent(BATCH.as_bytes());
        assert_batch_result(&snapshot);
    }

    #[test]
    fn test_empty_course_carries_over_in_any_chunking() {
        let snapshot = assert_chunking_is_idempotent(GAPPED.as_bytes());
        assert_eq!(snapshot.speed_token(), Some("0.47"));
        assert_eq!(snapshot.course_token(), Some("149.79"));
        assert!(snapshot.timestamp().is_some());

        // Whole-buffer feed: the older RMC only lends course and date
        let mut parser = NmeaParser::new();
        let outcome = parser.parse(GAPPED.as_bytes());
        assert!(outcome.snapshot().is_some());
        assert_eq!(parser.working().latitude_token(), (Some("3746.0171"), Some('N')));
        assert_eq!(parser.working().longitude_token(), (Some("12226.1278"), Some('W')));
        assert_eq!(parser.stats().decoded, 3);
    }

    #[test]
    fn test_carry_over_survives_across_passes() {
        let mut parser = NmeaParser::with_config(BUFFER_CAPACITY, PublishPolicy::Position);
        parser.parse(RMC);
        let snapshot = parser
            .parse(b"$GPRMC,063601.002,A,3746.0171,N,12226.1278,W,0.47,,,,*04\r\n")
            .snapshot()
            .cloned()
            .expect("published");
        assert_eq!(snapshot.course_token(), Some("130.67"));
        assert_eq!(snapshot.speed_token(), Some("0.47"));
    }

    #[test]
    fn test_flush_discards_partial_sentence() {
        let mut parser = NmeaParser::new();
        parser.parse(&RMC[..50]);
        parser.flush();
        let outcome = parser.parse(&RMC[50..]);
        assert!(!outcome.has_position());
    }

    #[test]
    fn test_accessors_tolerate_garbage() {
        let mut snapshot = GpsSnapshot::default();
        assert!(snapshot.latitude_degrees().is_nan());
        assert!(snapshot.timestamp().is_none());
        assert_eq!(snapshot.fix_quality(), FixQuality::Invalid);

        let record = SentenceDecoder::decode(
            crate::core::protocol::checksum::create_sentence(
                "GPRMC,9x,A,37x6.0188,N,12226.1276,Q,abc,,140207,,",
            )
            .as_bytes(),
        )
        .expect("checksum is valid");
        snapshot.apply(&record);

        assert!(snapshot.latitude_degrees().is_nan());
        assert!(snapshot.longitude_degrees().is_nan());
        assert!(snapshot.speed_knots().is_nan());
        assert!(snapshot.course_deg().is_nan());
        assert!(snapshot.timestamp().is_none());
    }
}
