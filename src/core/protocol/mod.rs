//! NMEA 0183 protocol support
//!
//! - Checksum calculation and outgoing sentence construction
//! - Sentence framing over a chunked byte stream
//! - Decoding of the position, altitude and dilution sentences
//! - Receiver configuration and restart commands

pub mod checksum;
pub mod commands;
pub mod framing;
pub mod nmea;

pub use checksum::{create_sentence, xor_checksum};
pub use commands::{gps_time, Reacquire, ReceiverDialect};
pub use framing::{RawBuffer, SentenceFramer, BUFFER_CAPACITY, MAX_SENTENCE_LENGTH};
pub use nmea::{
    AltitudeFix, DilutionOfPrecision, KindSet, PartialRecord, PositionFix, SentenceDecoder,
    SentenceKind,
};
