use chrono::{Local, NaiveDate, NaiveDateTime, Utc};

/// Source of "today" for slot windows and date resolution, and of the
/// timestamps written on sessions.
pub trait Clock: Send + Sync {
    fn today(&self) -> NaiveDate;

    /// UTC wall time, same base as the store's own timestamps.
    fn now(&self) -> NaiveDateTime;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn today(&self) -> NaiveDate {
        Local::now().date_naive()
    }

    fn now(&self) -> NaiveDateTime {
        Utc::now().naive_utc()
    }
}

/// Always answers the same date; `now` is real time so idle sweeps still work.
pub struct FixedClock(pub NaiveDate);

impl Clock for FixedClock {
    fn today(&self) -> NaiveDate {
        self.0
    }

    fn now(&self) -> NaiveDateTime {
        Utc::now().naive_utc()
    }
}
