//! Request signature verification.
//!
//! Signed requests carry a `timestamp` (`YYYYMMDDHHMMSS`, local time) and a
//! `sign` parameter. The signature is the upper-case hex MD5 of the sorted,
//! decoded `k=v` parameter string (excluding `sign` itself) with
//! `&key=<secret>` appended. The five-minute timestamp window bounds replay.

use chrono::{Local, NaiveDateTime, TimeZone};
use md5::{Digest, Md5};

const TIMESTAMP_FORMAT: &str = "%Y%m%d%H%M%S";
const REPLAY_WINDOW_SECS: i64 = 5 * 60;

/// Why a signature was rejected. The message text is forwarded to HTTP
/// callers inside the error envelope.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SignatureError {
    /// Timestamp outside the replay window, or unparseable.
    #[error("request already expired")]
    Expired,
    /// Recomputed digest did not match the supplied one.
    #[error("signature failed")]
    Mismatch,
}

/// Verify the `sign` parameter against the rest of the parameter set.
pub fn verify(params: &[(String, String)], secret: &str) -> Result<(), SignatureError> {
    let supplied = first(params, "sign").unwrap_or("");
    let timestamp = first(params, "timestamp").unwrap_or("");

    let issued = NaiveDateTime::parse_from_str(timestamp, TIMESTAMP_FORMAT)
        .ok()
        .and_then(|t| Local.from_local_datetime(&t).single())
        .ok_or(SignatureError::Expired)?;
    let age = (Local::now() - issued).num_seconds();
    if age.abs() > REPLAY_WINDOW_SECS {
        return Err(SignatureError::Expired);
    }

    if supplied == compute(params, secret) {
        Ok(())
    } else {
        Err(SignatureError::Mismatch)
    }
}

/// Compute the expected signature for a parameter set. `sign` entries are
/// ignored; everything else participates.
pub fn compute(params: &[(String, String)], secret: &str) -> String {
    let mut signable: Vec<&(String, String)> =
        params.iter().filter(|(k, _)| k != "sign").collect();
    signable.sort_by(|a, b| a.0.cmp(&b.0));

    let mut canonical = String::new();
    for (k, v) in signable {
        if !canonical.is_empty() {
            canonical.push('&');
        }
        canonical.push_str(k);
        canonical.push('=');
        canonical.push_str(v);
    }
    canonical.push_str("&key=");
    canonical.push_str(secret);

    let mut hasher = Md5::new();
    hasher.update(canonical.as_bytes());
    hex::encode_upper(hasher.finalize())
}

fn first<'a>(params: &'a [(String, String)], key: &str) -> Option<&'a str> {
    params
        .iter()
        .find(|(k, _)| k == key)
        .map(|(_, v)| v.as_str())
}
