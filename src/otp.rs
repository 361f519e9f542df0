use chrono::{DateTime, Duration, Utc};
use rand::Rng;

use crate::{errors::ServiceError, models::DeliveryLeg};

pub const OTP_LENGTH: usize = 6;

/// Generates a numeric one-time passcode.
pub fn generate() -> String {
    let mut rng = rand::thread_rng();
    (0..OTP_LENGTH)
        .map(|_| char::from(b'0' + rng.gen_range(0..10)))
        .collect()
}

/// Issues (or re-issues) an OTP on the delivery leg with a fresh TTL and
/// returns its expiry.
pub fn issue(delivery: &mut DeliveryLeg, ttl_secs: u64) -> DateTime<Utc> {
    let expires_at = Utc::now() + Duration::seconds(ttl_secs as i64);
    delivery.otp = Some(generate());
    delivery.otp_expires_at = Some(expires_at);
    expires_at
}

/// Verifies a supplied code against the delivery leg. Expiry is checked before
/// the comparison so an expired code reports `OtpExpired` even when it matches.
pub fn verify(delivery: &DeliveryLeg, supplied: &str, now: DateTime<Utc>) -> Result<(), ServiceError> {
    let (code, expires_at) = match (&delivery.otp, delivery.otp_expires_at) {
        (Some(code), Some(expires_at)) => (code, expires_at),
        _ => {
            return Err(ServiceError::InvalidTransition(
                "no OTP has been issued for this delivery".to_string(),
            ))
        }
    };
    if now >= expires_at {
        return Err(ServiceError::OtpExpired);
    }
    if !constant_time_eq(code, supplied) {
        return Err(ServiceError::OtpMismatch);
    }
    Ok(())
}

/// Exact-string comparison without early exit on the first differing byte.
pub fn constant_time_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.bytes()
        .zip(b.bytes())
        .fold(0u8, |acc, (x, y)| acc | (x ^ y))
        == 0
}
