//! Source of "today" for the reporting window

use chrono::{Local, NaiveDate};

/// Supplies the current date so the window can be computed deterministically
pub trait Clock {
    fn today(&self) -> NaiveDate;
}

/// Wall clock in the local timezone
pub struct SystemClock;

impl Clock for SystemClock {
    fn today(&self) -> NaiveDate {
        Local::now().date_naive()
    }
}

/// Clock pinned to a single date
pub struct FixedClock(pub NaiveDate);

impl Clock for FixedClock {
    fn today(&self) -> NaiveDate {
        self.0
    }
}
