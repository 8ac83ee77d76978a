//! Merchant-side references and gateway timestamps.

use chrono::{DateTime, Duration, FixedOffset, Offset, Utc};
use rand::Rng;

/// Base-32 alphabet without look-alike characters (0, 1, I, L, O).
const REFERENCE_ALPHABET: &[u8] = b"ABCDEFGHJKMNPQRSTUVWXYZ23456789";

const BILL_PREFIX: &str = "BILL";
const TXN_PREFIX: &str = "GIKITU";
const SUFFIX_LEN: usize = 3;

/// Gateway timestamp layout, `YYYYMMDDHHMMSS`.
const GATEWAY_TIME_FORMAT: &str = "%Y%m%d%H%M%S";

pub fn random_suffix(len: usize) -> String {
    let mut rng = rand::thread_rng();
    (0..len)
        .map(|_| REFERENCE_ALPHABET[rng.gen_range(0..REFERENCE_ALPHABET.len())] as char)
        .collect()
}

/// `BILL` + unix seconds + 3 random characters.
pub fn bill_reference(now: DateTime<Utc>) -> String {
    format!("{}{}{}", BILL_PREFIX, now.timestamp(), random_suffix(SUFFIX_LEN))
}

/// `GIKITU` + local date `YYYYMMDD` + 3 random characters.
pub fn txn_reference(now: DateTime<Utc>, offset: FixedOffset) -> String {
    format!(
        "{}{}{}",
        TXN_PREFIX,
        now.with_timezone(&offset).format("%Y%m%d"),
        random_suffix(SUFFIX_LEN)
    )
}

/// Issue and expiry timestamps for a gateway request; expiry is 24 hours later.
pub fn gateway_timestamps(now: DateTime<Utc>, offset: FixedOffset) -> (String, String) {
    let local = now.with_timezone(&offset);
    let expiry = local + Duration::hours(24);
    (
        local.format(GATEWAY_TIME_FORMAT).to_string(),
        expiry.format(GATEWAY_TIME_FORMAT).to_string(),
    )
}

/// Fixed offset from minutes east of UTC, falling back to UTC when out of range.
pub fn offset_from_minutes(minutes: i32) -> FixedOffset {
    FixedOffset::east_opt(minutes.saturating_mul(60)).unwrap_or_else(|| Utc.fix())
}
