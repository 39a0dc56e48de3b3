//! Short-lived access tokens obtained by trading a refresh credential.
//!
//! Only the caching rule lives here; the exchange itself is an HTTP call owned
//! by the client crate.

use chrono::{DateTime, Duration, Utc};

/// Safety margin subtracted from the advertised lifetime, so a token is never
/// presented in the last seconds of its validity.
pub const REFRESH_MARGIN_SECS: i64 = 10;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessToken {
    value: String,
    issued_at: DateTime<Utc>,
    lifetime: Duration,
}

impl AccessToken {
    pub fn new(value: impl Into<String>, issued_at: DateTime<Utc>, lifetime: Duration) -> Self {
        Self {
            value: value.into(),
            issued_at,
            lifetime,
        }
    }

    /// Build from an `expires_in` seconds value as returned by token endpoints.
    ///
    /// `None` when the advertised lifetime does not fit a timestamp.
    pub fn from_expires_in(value: impl Into<String>, issued_at: DateTime<Utc>, expires_in: i64) -> Option<Self> {
        let lifetime = Duration::try_seconds(expires_in.max(0))?;
        issued_at.checked_add_signed(lifetime)?;
        Some(Self::new(value, issued_at, lifetime))
    }

    pub fn value(&self) -> &str {
        &self.value
    }

    pub fn issued_at(&self) -> DateTime<Utc> {
        self.issued_at
    }

    /// Saturates at the representable range instead of overflowing.
    pub fn refresh_deadline(&self) -> DateTime<Utc> {
        let margin = Duration::seconds(REFRESH_MARGIN_SECS);
        match self.issued_at.checked_add_signed(self.lifetime) {
            Some(expiry) => expiry.checked_sub_signed(margin).unwrap_or(DateTime::<Utc>::MIN_UTC),
            None if self.lifetime < Duration::zero() => DateTime::<Utc>::MIN_UTC,
            None => DateTime::<Utc>::MAX_UTC,
        }
    }

    /// Whether the token may still be reused at `now`.
    pub fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        now < self.refresh_deadline()
    }
}
