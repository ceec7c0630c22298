//! Exchange-local trading clock.
//!
//! Wall-clock time is derived from an anchor plus elapsed [`tokio::time::Instant`]
//! time, so code under `#[tokio::test(start_paused = true)]` sees the clock move
//! exactly as far as the paused runtime advances.

use std::time::Duration;

use chrono::{DateTime, Datelike, LocalResult, NaiveDate, NaiveTime, TimeZone, Utc, Weekday};
use chrono_tz::Tz;
use tokio::time::Instant;

use crate::config::MarketHoursConfig;

#[derive(Debug, Clone)]
pub struct MarketClock {
    tz: Tz,
    anchor: DateTime<Utc>,
    started: Instant,
}

impl MarketClock {
    /// Clock following the system time.
    #[must_use]
    pub fn system(tz: Tz) -> Self {
        Self::anchored(tz, Utc::now())
    }

    /// Clock that reads `at` right now and advances with tokio time.
    #[must_use]
    pub fn anchored(tz: Tz, at: DateTime<Utc>) -> Self {
        Self {
            tz,
            anchor: at,
            started: Instant::now(),
        }
    }

    #[must_use]
    pub const fn timezone(&self) -> Tz {
        self.tz
    }

    #[must_use]
    pub fn now(&self) -> DateTime<Tz> {
        let elapsed = chrono::Duration::from_std(self.started.elapsed())
            .unwrap_or_else(|_| chrono::Duration::zero());
        (self.anchor + elapsed).with_timezone(&self.tz)
    }

    #[must_use]
    pub fn now_utc(&self) -> DateTime<Utc> {
        self.now().with_timezone(&Utc)
    }

    #[must_use]
    pub fn today(&self) -> NaiveDate {
        self.now().date_naive()
    }

    /// Today's date at the given exchange-local time.
    #[must_use]
    pub fn today_at(&self, time: NaiveTime) -> DateTime<Tz> {
        self.local(self.today(), time)
    }

    /// Resolves a local date and time, taking the earlier instant on a DST fold.
    #[must_use]
    pub fn local(&self, date: NaiveDate, time: NaiveTime) -> DateTime<Tz> {
        let naive = date.and_time(time);
        match self.tz.from_local_datetime(&naive) {
            LocalResult::Single(dt) | LocalResult::Ambiguous(dt, _) => dt,
            // Inside a DST gap: interpret the wall time as UTC offset-free.
            LocalResult::None => Utc.from_utc_datetime(&naive).with_timezone(&self.tz),
        }
    }

    /// Time left until `target`, zero if it has passed.
    #[must_use]
    pub fn until(&self, target: DateTime<Tz>) -> Duration {
        (target - self.now()).to_std().unwrap_or(Duration::ZERO)
    }

    #[must_use]
    pub fn has_passed(&self, target: DateTime<Tz>) -> bool {
        self.now() >= target
    }

    /// Whether the exchange is in its regular session right now.
    #[must_use]
    pub fn is_market_open(&self, hours: &MarketHoursConfig) -> bool {
        let now = self.now();
        if matches!(now.weekday(), Weekday::Sat | Weekday::Sun) {
            return false;
        }
        let time = now.time();
        time >= hours.open && time <= hours.close
    }
}
