//! Wall-clock validity and the compact UTC timestamp format used by
//! temporary image names.

/// Epochs before 2021-01-01T00:00:00Z mean the clock was never synced.
pub const VALID_EPOCH_MIN: u64 = 1_609_459_200;

const DAYS_PER_ERA: i64 = 146_097;
const EPOCH_CIVIL_DAY: i64 = 719_468;

/// Parse a `YYYYMMDDTHHMMSSZ` timestamp into a UTC epoch.
///
/// Returns `None` for anything that is not exactly 16 characters of the
/// expected shape or that encodes an out-of-range field.
pub fn parse_utc_timestamp(ts: &str) -> Option<u64> {
    let bytes = ts.as_bytes();
    if bytes.len() != 16 || bytes[8] != b'T' || bytes[15] != b'Z' {
        return None;
    }
    for (i, b) in bytes.iter().enumerate() {
        if i == 8 || i == 15 {
            continue;
        }
        if !b.is_ascii_digit() {
            return None;
        }
    }

    let num = |range: core::ops::Range<usize>| -> u64 {
        ts[range].bytes().fold(0u64, |acc, b| acc * 10 + (b - b'0') as u64)
    };

    let year = num(0..4);
    let month = num(4..6);
    let day = num(6..8);
    let hour = num(9..11);
    let minute = num(11..13);
    let second = num(13..15);

    if year < 1970 || !(1..=12).contains(&month) || !(1..=31).contains(&day) {
        return None;
    }
    if hour > 23 || minute > 59 || second > 59 {
        return None;
    }

    let days = days_from_civil(year as i64, month, day);
    Some(days as u64 * 86_400 + hour * 3_600 + minute * 60 + second)
}

// Howard Hinnant's civil-date algorithm, restricted to years >= 1970.
fn days_from_civil(year: i64, month: u64, day: u64) -> i64 {
    let y = if month <= 2 { year - 1 } else { year };
    let era = y.div_euclid(400);
    let yoe = (y - era * 400) as u64;
    let mp = if month > 2 { month - 3 } else { month + 9 };
    let doy = (153 * mp + 2) / 5 + day - 1;
    let doe = yoe * 365 + yoe / 4 - yoe / 100 + doy;
    era * DAYS_PER_ERA + doe as i64 - EPOCH_CIVIL_DAY
}
