use std::fmt;

use chrono::{NaiveDate, NaiveTime};

use crate::calendar::Calendar;
use crate::model::Ms;

pub const FIRST_SLOT_HOUR: u32 = 6;
/// Last hour that still opens slots (22:00 and 22:30).
pub const LAST_SLOT_HOUR: u32 = 22;
pub const SLOT_MINUTES: u32 = 30;
pub const SLOTS_PER_DAY: usize =
    ((LAST_SLOT_HOUR - FIRST_SLOT_HOUR + 1) * (60 / SLOT_MINUTES)) as usize;

/// One point of the display grid on a given day. Never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TimeSlot {
    pub date: NaiveDate,
    pub time: NaiveTime,
}

impl TimeSlot {
    pub fn instant(&self, calendar: &Calendar) -> Ms {
        calendar.at(self.date, self.time)
    }
}

impl fmt::Display for TimeSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.time.format("%H:%M"))
    }
}

/// The fixed half-hour grid for `date`, 06:00 through 22:30.
pub fn generate_daily_grid(date: NaiveDate) -> Vec<TimeSlot> {
    (FIRST_SLOT_HOUR..=LAST_SLOT_HOUR)
        .flat_map(|hour| (0..60).step_by(SLOT_MINUTES as usize).map(move |minute| (hour, minute)))
        .filter_map(|(hour, minute)| NaiveTime::from_hms_opt(hour, minute, 0))
        .map(|time| TimeSlot { date, time })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn grid_has_34_slots() {
        let grid = generate_daily_grid(date(2026, 10, 16));
        assert_eq!(grid.len(), SLOTS_PER_DAY);
        assert_eq!(SLOTS_PER_DAY, 34);
        assert_eq!(grid[0].to_string(), "06:00");
        assert_eq!(grid[1].to_string(), "06:30");
        assert_eq!(grid[32].to_string(), "22:00");
        assert_eq!(grid[33].to_string(), "22:30");
    }

    #[test]
    fn grid_is_sorted_and_evenly_spaced() {
        let grid = generate_daily_grid(date(2024, 2, 29));
        for pair in grid.windows(2) {
            let gap = pair[1].time - pair[0].time;
            assert_eq!(gap.num_minutes(), i64::from(SLOT_MINUTES));
        }
    }

    #[test]
    fn grid_shape_is_date_independent() {
        let a: Vec<NaiveTime> = generate_daily_grid(date(2026, 1, 1)).iter().map(|s| s.time).collect();
        let b: Vec<NaiveTime> = generate_daily_grid(date(2026, 7, 31)).iter().map(|s| s.time).collect();
        assert_eq!(a, b);
    }

    #[test]
    fn slot_instant_uses_calendar_offset() {
        let slot = TimeSlot {
            date: date(1970, 1, 2),
            time: NaiveTime::from_hms_opt(6, 0, 0).unwrap(),
        };
        let utc = Calendar::utc();
        let cet = Calendar::from_offset_minutes(60).unwrap();
        assert_eq!(slot.instant(&utc), 30 * 3_600_000);
        assert_eq!(slot.instant(&cet), 29 * 3_600_000);
    }
}
