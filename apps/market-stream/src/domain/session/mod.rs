//! Market Session Gate
//!
//! Answers whether an exchange's regular session is open at a given instant.
//! Used only for an advisory warning before subscribing to equities; it never
//! blocks or delays the subscribe call.
//!
//! Holidays and half days are not modelled.

use chrono::{DateTime, Datelike, NaiveTime, Utc, Weekday};
use chrono_tz::Tz;

const US_EQUITY_OPEN: NaiveTime = match NaiveTime::from_hms_opt(9, 30, 0) {
    Some(time) => time,
    None => panic!("09:30 is a valid time"),
};

const US_EQUITY_CLOSE: NaiveTime = match NaiveTime::from_hms_opt(16, 0, 0) {
    Some(time) => time,
    None => panic!("16:00 is a valid time"),
};

/// Regular trading session of one exchange, in exchange-local time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MarketSession {
    /// Exchange timezone.
    pub timezone: Tz,
    /// Session open (inclusive).
    pub open: NaiveTime,
    /// Session close (exclusive).
    pub close: NaiveTime,
}

impl MarketSession {
    /// US equities regular session: 09:30-16:00 America/New_York, Mon-Fri.
    #[must_use]
    pub const fn us_equities() -> Self {
        Self {
            timezone: chrono_tz::America::New_York,
            open: US_EQUITY_OPEN,
            close: US_EQUITY_CLOSE,
        }
    }

    /// Check whether the session is open at `now`.
    #[must_use]
    pub fn is_open(&self, now: DateTime<Utc>) -> bool {
        let local = now.with_timezone(&self.timezone);

        if matches!(local.weekday(), Weekday::Sat | Weekday::Sun) {
            return false;
        }

        let time = local.time();
        time >= self.open && time < self.close
    }

    /// Human-readable session hours for log output.
    #[must_use]
    pub fn describe(&self) -> String {
        format!(
            "Monday-Friday, {}-{} {}",
            self.open.format("%H:%M"),
            self.close.format("%H:%M"),
            self.timezone.name()
        )
    }
}

impl Default for MarketSession {
    fn default() -> Self {
        Self::us_equities()
    }
}
