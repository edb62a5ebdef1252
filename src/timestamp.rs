use serde::{Deserialize, Serialize};
use std::ops::Add;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Milliseconds since the Unix epoch.
///
/// Used for the issued-at/expiry fields of fetch instructions, which travel
/// as plain JSON numbers.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UnixMillis(pub u64);

impl UnixMillis {
    pub fn now() -> Self {
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        UnixMillis(millis)
    }

    pub fn is_past(&self) -> bool {
        *self < UnixMillis::now()
    }
}

impl Add<Duration> for UnixMillis {
    type Output = UnixMillis;

    fn add(self, rhs: Duration) -> Self::Output {
        UnixMillis(self.0.saturating_add(rhs.as_millis() as u64))
    }
}

impl From<u64> for UnixMillis {
    fn from(value: u64) -> Self {
        UnixMillis(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expiry_in_the_future_is_not_past() {
        let expiry = UnixMillis::now() + Duration::from_secs(3600);
        assert!(!expiry.is_past());
    }

    #[test]
    fn old_timestamp_is_past() {
        assert!(UnixMillis(1).is_past());
    }

    #[test]
    fn serializes_as_plain_number() {
        let json = serde_json::to_string(&UnixMillis(1234)).unwrap();
        assert_eq!(json, "1234");
    }
}
