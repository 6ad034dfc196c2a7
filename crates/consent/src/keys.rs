//! Cache key namespace and TTLs
//!
//! The key formats interoperate with existing deployments and must stay
//! bit-for-bit stable.

/// Access-token lifetime.
pub const TOKEN_TTL_SECS: u64 = 6 * 60 * 60;

/// Cached requester profile lifetime.
pub const REQUESTER_TTL_SECS: u64 = 12 * 60 * 60;

/// Active-requester set lifetime. The set key is additionally scoped to the
/// current day of month, so every grant lapses at day rollover unless
/// renewed.
pub const ACTIVE_SET_TTL_SECS: u64 = 24 * 60 * 60;

pub fn requester_key(requester_id: &str) -> String {
    format!("requester:{}", requester_id)
}

pub fn token_key(patient_id: &str, requester_id: &str) -> String {
    format!("token:{}:{}", patient_id, requester_id)
}

pub fn active_set_key(patient_id: &str, day_of_month: u32) -> String {
    format!("allowed_access:{}:{}", patient_id, day_of_month)
}

/// Today's active-set key for a patient.
pub fn active_set_key_today(patient_id: &str) -> String {
    use chrono::Datelike;
    active_set_key(patient_id, chrono::Utc::now().day())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_namespace_is_stable() {
        assert_eq!(requester_key("req-1"), "requester:req-1");
        assert_eq!(token_key("pat-1", "req-1"), "token:pat-1:req-1");
        assert_eq!(active_set_key("pat-1", 7), "allowed_access:pat-1:7");
    }

    #[test]
    fn test_ttls() {
        assert_eq!(TOKEN_TTL_SECS, 21_600);
        assert_eq!(REQUESTER_TTL_SECS, 43_200);
        assert_eq!(ACTIVE_SET_TTL_SECS, 86_400);
    }
}
