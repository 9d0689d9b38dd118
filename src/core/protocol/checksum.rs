//! NMEA checksum calculation
//!
//! The checksum is the XOR of every byte between the leading `$` and the
//! `*` marker (both exclusive), transmitted as two uppercase hex digits.

/// Sentence start marker
pub const SENTENCE_START: u8 = b'$';
/// Checksum marker
pub const CHECKSUM_MARKER: u8 = b'*';

/// XOR of all bytes
pub fn xor_checksum(data: &[u8]) -> u8 {
    data.iter().fold(0u8, |acc, &b| acc ^ b)
}

/// Decode one ASCII hex digit (either case)
fn hex_value(digit: u8) -> Option<u8> {
    match digit {
        b'0'..=b'9' => Some(digit - b'0'),
        b'A'..=b'F' => Some(digit - b'A' + 10),
        b'a'..=b'f' => Some(digit - b'a' + 10),
        _ => None,
    }
}

/// Parse a two-digit hex checksum
pub fn parse_checksum(digits: &[u8]) -> Option<u8> {
    match digits {
        [hi, lo] => Some(hex_value(*hi)? << 4 | hex_value(*lo)?),
        _ => None,
    }
}

/// Verify a framed sentence
///
/// `sentence` starts at the `$` and may carry trailing `\r\n`. Returns the
/// body (bytes between `$` and `*`) when the transmitted checksum matches.
/// Sentences without a `*HH` suffix are rejected.
pub fn verify(sentence: &[u8]) -> Option<&[u8]> {
    let rest = sentence.strip_prefix(&[SENTENCE_START])?;
    let star = rest.iter().rposition(|&b| b == CHECKSUM_MARKER)?;
    let body = &rest[..star];
    let digits = rest.get(star + 1..star + 3)?;

    // Anything after the digits must be line termination only
    if !rest[star + 3..].iter().all(|&b| b == b'\r' || b == b'\n') {
        return None;
    }

    let expected = parse_checksum(digits)?;
    (xor_checksum(body) == expected).then_some(body)
}

/// Build an outgoing sentence: `$<body>*HH\r\n`
pub fn create_sentence(body: &str) -> String {
    format!("${}*{:02X}\r\n", body, xor_checksum(body.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_xor() {
        assert_eq!(xor_checksum(&[0x01, 0x02, 0x03]), 0x00);
        assert_eq!(xor_checksum(&[0xFF, 0x00]), 0xFF);
        assert_eq!(xor_checksum(&[]), 0x00);
    }

    #[test]
    fn test_create_sentence() {
        assert_eq!(
            create_sentence("PSRF103,01,00,00,01"),
            "$PSRF103,01,00,00,01*25\r\n"
        );
    }

    #[test]
    fn test_verify_valid_sentence() {
        let sentence =
            b"$GPRMC,063605.000,A,3746.0188,N,12226.1276,W,0.40,130.67,140207,,*10\r\n";
        let body = verify(sentence).expect("checksum should match");
        assert!(body.starts_with(b"GPRMC,"));
        assert!(body.ends_with(b",,"));
    }

    #[test]
    fn test_verify_bad_checksum() {
        let sentence =
            b"$GPRMC,063605.000,A,3746.0188,N,12226.1276,W,0.40,130.67,140207,,*FF\r\n";
        assert!(verify(sentence).is_none());
    }

    #[test]
    fn test_verify_lowercase_digits() {
        let body = "GPGSA,A,3,14,22,,,,,,,,,,,2.1,1.4,1.6";
        let lower = format!("${}*{:02x}\r\n", body, xor_checksum(body.as_bytes()));
        assert!(verify(lower.as_bytes()).is_some());
    }

    #[test]
    fn test_verify_rejects_missing_parts() {
        assert!(verify(b"GPGGA,1,2*00\r\n").is_none());
        assert!(verify(b"$GPGGA,1,2\r\n").is_none());
        assert!(verify(b"$GPGGA,1,2*0\r\n").is_none());
        assert!(verify(b"$GPGGA,1,2*0G\r\n").is_none());
        assert!(verify(b"$GPGGA,1,2*00junk\r\n").is_none());
    }

    #[test]
    fn test_parse_checksum() {
        assert_eq!(parse_checksum(b"10"), Some(0x10));
        assert_eq!(parse_checksum(b"fF"), Some(0xFF));
        assert_eq!(parse_checksum(b"1"), None);
        assert_eq!(parse_checksum(b"123"), None);
    }
}
