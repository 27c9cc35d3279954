//! Line parser for the comma-delimited telemetry source.
//!
//! Field order on disk: `id, timestamp, temperature, position, pressure,
//! humidity, velocity, status, battery_level`. Columns past the ninth are
//! ignored.

use crate::error::{SyncError, SyncResult};
use crate::models::TelemetryRecord;

const DELIMITER: char = ',';
const FIELD_COUNT: usize = 9;

/// Result of parsing a block of text: the accepted records in file order and
/// how many non-blank lines were rejected.
#[derive(Debug, Default)]
pub struct ParsedBatch {
    pub records: Vec<TelemetryRecord>,
    pub malformed: usize,
}

/// Parses one line. Blank lines are the caller's concern; here they are
/// simply too short.
pub fn parse_line(line_no: usize, line: &str) -> SyncResult<TelemetryRecord> {
    let line = line.strip_suffix('\r').unwrap_or(line);
    let parts: Vec<&str> = line.split(DELIMITER).collect();
    if parts.len() < FIELD_COUNT {
        return Err(SyncError::MalformedRecord {
            line: line_no,
            reason: format!("expected {FIELD_COUNT} fields, found {}", parts.len()),
        });
    }

    let id = parse_id(parts[0]).ok_or_else(|| SyncError::MalformedRecord {
        line: line_no,
        reason: format!("id '{}' is not an integer", parts[0]),
    })?;

    Ok(TelemetryRecord {
        id,
        timestamp: parts[1].to_string(),
        temperature: lenient_number(parts[2]),
        position: parts[3].to_string(),
        pressure: lenient_number(parts[4]),
        humidity: lenient_number(parts[5]),
        velocity: lenient_number(parts[6]),
        status: parts[7].to_string(),
        battery_level: lenient_number(parts[8]),
    })
}

/// Parses every line of `text`, skipping whitespace-only lines silently and
/// counting (but otherwise ignoring) malformed ones. `first_line_no` is the
/// 1-based number of the first line in `text`, used only for diagnostics.
pub fn parse_lines(text: &str, first_line_no: usize) -> ParsedBatch {
    let mut batch = ParsedBatch::default();
    for (offset, line) in text.split('\n').enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        match parse_line(first_line_no + offset, line) {
            Ok(record) => batch.records.push(record),
            Err(err) => {
                log::debug!("skipping line: {err}");
                batch.malformed += 1;
            }
        }
    }
    batch
}

/// Leading integer digits, optionally signed, the way a lenient integer
/// parse reads `"12abc"` as 12. No digits at all means no id.
fn parse_id(raw: &str) -> Option<i64> {
    let trimmed = raw.trim();
    let (sign_len, rest) = match trimmed.as_bytes().first() {
        Some(b'-') | Some(b'+') => (1, &trimmed[1..]),
        _ => (0, trimmed),
    };
    let digits = leading_digits(rest.as_bytes());
    if digits == 0 {
        return None;
    }
    trimmed[..sign_len + digits].parse().ok()
}

/// Numeric columns never reject a line. The longest numeric prefix is read,
/// so `"20.5C"` is 20.5, and a field with no numeric prefix becomes NaN.
fn lenient_number(raw: &str) -> f64 {
    let text = raw.trim_start();
    let bytes = text.as_bytes();

    let mut end = usize::from(matches!(bytes.first(), Some(b'+' | b'-')));
    if text[end..].starts_with("Infinity") {
        return if bytes[0] == b'-' {
            f64::NEG_INFINITY
        } else {
            f64::INFINITY
        };
    }

    let int_digits = leading_digits(&bytes[end..]);
    end += int_digits;
    let mut frac_digits = 0;
    if bytes.get(end) == Some(&b'.') {
        frac_digits = leading_digits(&bytes[end + 1..]);
        if int_digits + frac_digits > 0 {
            end += 1 + frac_digits;
        }
    }
    if int_digits + frac_digits == 0 {
        return f64::NAN;
    }

    if matches!(bytes.get(end), Some(b'e' | b'E')) {
        let mut exp_end = end + 1;
        if matches!(bytes.get(exp_end), Some(b'+' | b'-')) {
            exp_end += 1;
        }
        let exp_digits = leading_digits(&bytes[exp_end..]);
        if exp_digits > 0 {
            end = exp_end + exp_digits;
        }
    }

    text[..end].parse().unwrap_or(f64::NAN)
}

fn leading_digits(bytes: &[u8]) -> usize {
    bytes.iter().take_while(|b| b.is_ascii_digit()).count()
}
