//! Weekday calendar and the window matcher.

use chrono::{DateTime, Datelike, TimeZone, Timelike, Weekday};
use thiserror::Error;

/// Errors raised while building a [`Calendar`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CalendarError {
    #[error("more than one window configured for {0}")]
    DuplicateWeekday(Weekday),

    #[error("hour {hour} for {weekday} is outside 0..24")]
    HourOutOfRange { weekday: Weekday, hour: u32 },
}

/// An autoscaling window for a single weekday.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeWindow {
    pub weekday: Weekday,
    /// First active hour (inclusive).
    pub start_hour: u32,
    /// First inactive hour (exclusive).
    pub end_hour: u32,
    /// Active for the entire day; the hours are ignored.
    pub whole_day: bool,
}

impl TimeWindow {
    /// A window active between `start_hour` and `end_hour`.
    pub fn hours(weekday: Weekday, start_hour: u32, end_hour: u32) -> Self {
        Self {
            weekday,
            start_hour,
            end_hour,
            whole_day: false,
        }
    }

    /// A window active for the whole of `weekday`.
    pub fn whole_day(weekday: Weekday) -> Self {
        Self {
            weekday,
            start_hour: 0,
            end_hour: 0,
            whole_day: true,
        }
    }

    /// Whether `hour` (0..24) falls inside this window.
    pub fn contains_hour(&self, hour: u32) -> bool {
        if self.whole_day {
            return true;
        }

        if self.start_hour < self.end_hour {
            self.start_hour <= hour && hour < self.end_hour
        } else if self.start_hour > self.end_hour {
            hour >= self.start_hour || hour < self.end_hour
        } else {
            // Zero-width window.
            false
        }
    }

    fn validate(&self) -> Result<(), CalendarError> {
        if self.whole_day {
            return Ok(());
        }
        for hour in [self.start_hour, self.end_hour] {
            if hour >= 24 {
                return Err(CalendarError::HourOutOfRange {
                    weekday: self.weekday,
                    hour,
                });
            }
        }
        Ok(())
    }
}

/// Per-weekday autoscaling windows, at most one per weekday.
///
/// Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Calendar {
    windows: [Option<TimeWindow>; 7],
}

impl Calendar {
    /// Build a calendar, rejecting duplicate weekdays and invalid hours.
    pub fn new(windows: impl IntoIterator<Item = TimeWindow>) -> Result<Self, CalendarError> {
        let mut slots: [Option<TimeWindow>; 7] = [None; 7];

        for window in windows {
            window.validate()?;
            let slot = &mut slots[slot_index(window.weekday)];
            if slot.is_some() {
                return Err(CalendarError::DuplicateWeekday(window.weekday));
            }
            *slot = Some(window);
        }

        Ok(Self { windows: slots })
    }

    /// Weeknights from 20:00 to 06:00 and all day on weekends.
    pub fn weeknights_and_weekends() -> Self {
        let mut windows: [Option<TimeWindow>; 7] = [None; 7];
        for weekday in [
            Weekday::Mon,
            Weekday::Tue,
            Weekday::Wed,
            Weekday::Thu,
            Weekday::Fri,
        ] {
            windows[slot_index(weekday)] = Some(TimeWindow::hours(weekday, 20, 6));
        }
        for weekday in [Weekday::Sat, Weekday::Sun] {
            windows[slot_index(weekday)] = Some(TimeWindow::whole_day(weekday));
        }
        Self { windows }
    }

    /// The window configured for `weekday`, if any.
    pub fn window(&self, weekday: Weekday) -> Option<&TimeWindow> {
        self.windows[slot_index(weekday)].as_ref()
    }

    /// All configured windows, Monday first.
    pub fn windows(&self) -> impl Iterator<Item = &TimeWindow> {
        self.windows.iter().flatten()
    }

    pub fn is_empty(&self) -> bool {
        self.windows.iter().all(Option::is_none)
    }

    /// Whether reactive autoscaling should run at `now`.
    ///
    /// `now` is evaluated in its own time zone; convert it to the pool's
    /// configured zone before calling.
    pub fn is_active<Tz: TimeZone>(&self, now: &DateTime<Tz>) -> bool {
        match self.window(now.weekday()) {
            Some(window) => window.contains_hour(now.hour()),
            None => false,
        }
    }
}

fn slot_index(weekday: Weekday) -> usize {
    weekday.num_days_from_monday() as usize
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    /// 2024-01-01 is a Monday.
    fn at(day: u32, hour: u32, minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, day, hour, minute, 0).unwrap()
    }

    fn tuesday_overnight() -> Calendar {
        Calendar::new([TimeWindow::hours(Weekday::Tue, 20, 6)]).unwrap()
    }

    #[test]
    fn midnight_wrap_window() {
        let calendar = tuesday_overnight();

        for hour in [20, 23, 0, 5] {
            assert!(calendar.is_active(&at(2, hour, 0)), "hour {hour} should be active");
        }
        for hour in [6, 10, 19] {
            assert!(!calendar.is_active(&at(2, hour, 0)), "hour {hour} should be inactive");
        }
    }

    #[test]
    fn tuesday_late_evening_and_noon() {
        let calendar = tuesday_overnight();
        assert!(calendar.is_active(&at(2, 23, 59)));
        assert!(!calendar.is_active(&at(2, 12, 0)));
    }

    #[test]
    fn same_day_window_is_half_open() {
        let calendar = Calendar::new([TimeWindow::hours(Weekday::Wed, 9, 17)]).unwrap();
        assert!(!calendar.is_active(&at(3, 8, 59)));
        assert!(calendar.is_active(&at(3, 9, 0)));
        assert!(calendar.is_active(&at(3, 16, 59)));
        assert!(!calendar.is_active(&at(3, 17, 0)));
    }

    #[test]
    fn whole_day_ignores_hours() {
        let calendar = Calendar::new([TimeWindow::whole_day(Weekday::Sat)]).unwrap();
        for hour in 0..24 {
            assert!(calendar.is_active(&at(6, hour, 30)));
        }
    }

    #[test]
    fn zero_width_window_is_never_active() {
        let calendar = Calendar::new([TimeWindow::hours(Weekday::Thu, 7, 7)]).unwrap();
        for hour in 0..24 {
            assert!(!calendar.is_active(&at(4, hour, 0)));
        }
    }

    #[test]
    fn weekday_without_window_is_inactive() {
        let calendar = tuesday_overnight();
        // Wednesday 01:00 is not covered: the Tuesday window only matches Tuesdays.
        assert!(!calendar.is_active(&at(3, 1, 0)));
        assert!(!calendar.is_active(&at(1, 22, 0)));
    }

    #[test]
    fn duplicate_weekday_rejected() {
        let err = Calendar::new([
            TimeWindow::hours(Weekday::Mon, 8, 18),
            TimeWindow::whole_day(Weekday::Mon),
        ])
        .unwrap_err();
        assert_eq!(err, CalendarError::DuplicateWeekday(Weekday::Mon));
    }

    #[test]
    fn out_of_range_hour_rejected() {
        let err = Calendar::new([TimeWindow::hours(Weekday::Fri, 20, 24)]).unwrap_err();
        assert_eq!(
            err,
            CalendarError::HourOutOfRange {
                weekday: Weekday::Fri,
                hour: 24
            }
        );
        // Hours are irrelevant for whole-day windows.
        assert!(Calendar::new([TimeWindow {
            weekday: Weekday::Fri,
            start_hour: 99,
            end_hour: 99,
            whole_day: true,
        }])
        .is_ok());
    }

    #[test]
    fn default_calendar_shape() {
        let calendar = Calendar::weeknights_and_weekends();
        assert_eq!(calendar.windows().count(), 7);
        // Monday 21:00 and Sunday 12:00 active, Friday 12:00 not.
        assert!(calendar.is_active(&at(1, 21, 0)));
        assert!(calendar.is_active(&at(7, 12, 0)));
        assert!(!calendar.is_active(&at(5, 12, 0)));
    }

    #[test]
    fn empty_calendar_never_active() {
        let calendar = Calendar::default();
        assert!(calendar.is_empty());
        assert!(!calendar.is_active(&at(6, 12, 0)));
    }

    #[test]
    fn evaluated_in_local_time_zone() {
        let calendar = tuesday_overnight();
        // 2024-01-03 04:00 UTC is Tuesday 21:00 in America/Edmonton (UTC-7).
        let utc = at(3, 4, 0);
        assert!(!calendar.is_active(&utc));
        let local = utc.with_timezone(&chrono_tz::America::Edmonton);
        assert!(calendar.is_active(&local));
    }
}
