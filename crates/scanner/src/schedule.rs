use serde::{Deserialize, Serialize};
use time::{Date, Duration, Month, OffsetDateTime, Time, Weekday};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UpdatePeriod {
    Never,
    Hourly,
    Daily,
    Weekly,
    Monthly,
}

impl Default for UpdatePeriod {
    fn default() -> Self {
        UpdatePeriod::Never
    }
}

/// Parses `HH:MM` (24h).
pub fn parse_start_time(value: &str) -> Option<Time> {
    let (hours, minutes) = value.trim().split_once(':')?;
    let hours: u8 = hours.trim().parse().ok()?;
    let minutes: u8 = minutes.trim().parse().ok()?;
    Time::from_hms(hours, minutes, 0).ok()
}

/// When the next periodic scan is due, or `None` when scans only happen on
/// request.
pub fn next_scan_time(
    now: OffsetDateTime,
    period: UpdatePeriod,
    start_time: Time,
) -> Option<OffsetDateTime> {
    let today_at_start = now.replace_time(start_time);
    match period {
        UpdatePeriod::Never => None,
        UpdatePeriod::Hourly => Some(now + Duration::HOUR),
        UpdatePeriod::Daily => {
            if today_at_start > now {
                Some(today_at_start)
            } else {
                Some(today_at_start + Duration::DAY)
            }
        }
        UpdatePeriod::Weekly => {
            if now.weekday() == Weekday::Monday && today_at_start > now {
                Some(today_at_start)
            } else {
                let days_to_monday = 7 - i64::from(now.weekday().number_days_from_monday());
                Some(today_at_start + Duration::days(days_to_monday))
            }
        }
        UpdatePeriod::Monthly => {
            if now.day() == 1 && today_at_start > now {
                return Some(today_at_start);
            }
            let (year, month) = match now.month() {
                Month::December => (now.year() + 1, Month::January),
                month => (now.year(), month.next()),
            };
            let first = Date::from_calendar_date(year, month, 1).ok()?;
            Some(first.with_time(start_time).assume_offset(now.offset()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(year: i32, month: Month, day: u8, hour: u8, minute: u8) -> OffsetDateTime {
        Date::from_calendar_date(year, month, day)
            .unwrap()
            .with_hms(hour, minute, 0)
            .unwrap()
            .assume_utc()
    }

    fn three_am() -> Time {
        parse_start_time("03:00").unwrap()
    }

    #[test]
    fn start_time_parsing() {
        assert_eq!(parse_start_time("03:30"), Time::from_hms(3, 30, 0).ok());
        assert_eq!(parse_start_time(" 23:59 "), Time::from_hms(23, 59, 0).ok());
        assert_eq!(parse_start_time("24:00"), None);
        assert_eq!(parse_start_time("noon"), None);
        assert_eq!(parse_start_time("7"), None);
    }

    #[test]
    fn never_is_not_scheduled() {
        let now = at(2024, Month::March, 5, 12, 0);
        assert_eq!(next_scan_time(now, UpdatePeriod::Never, three_am()), None);
    }

    #[test]
    fn hourly_adds_an_hour() {
        let now = at(2024, Month::March, 5, 12, 17);
        assert_eq!(
            next_scan_time(now, UpdatePeriod::Hourly, three_am()),
            Some(at(2024, Month::March, 5, 13, 17))
        );
    }

    #[test]
    fn daily_uses_today_while_ahead() {
        let early = at(2024, Month::March, 5, 1, 0);
        assert_eq!(
            next_scan_time(early, UpdatePeriod::Daily, three_am()),
            Some(at(2024, Month::March, 5, 3, 0))
        );
        let late = at(2024, Month::March, 5, 3, 0);
        assert_eq!(
            next_scan_time(late, UpdatePeriod::Daily, three_am()),
            Some(at(2024, Month::March, 6, 3, 0))
        );
    }

    #[test]
    fn weekly_targets_monday() {
        // 2024-03-04 is a Monday.
        let monday_early = at(2024, Month::March, 4, 1, 0);
        assert_eq!(
            next_scan_time(monday_early, UpdatePeriod::Weekly, three_am()),
            Some(at(2024, Month::March, 4, 3, 0))
        );
        let monday_late = at(2024, Month::March, 4, 9, 0);
        assert_eq!(
            next_scan_time(monday_late, UpdatePeriod::Weekly, three_am()),
            Some(at(2024, Month::March, 11, 3, 0))
        );
        let sunday = at(2024, Month::March, 10, 23, 0);
        assert_eq!(
            next_scan_time(sunday, UpdatePeriod::Weekly, three_am()),
            Some(at(2024, Month::March, 11, 3, 0))
        );
    }

    #[test]
    fn monthly_targets_the_first() {
        let first_early = at(2024, Month::March, 1, 2, 0);
        assert_eq!(
            next_scan_time(first_early, UpdatePeriod::Monthly, three_am()),
            Some(at(2024, Month::March, 1, 3, 0))
        );
        let mid_month = at(2024, Month::March, 15, 2, 0);
        assert_eq!(
            next_scan_time(mid_month, UpdatePeriod::Monthly, three_am()),
            Some(at(2024, Month::April, 1, 3, 0))
        );
        let december = at(2024, Month::December, 31, 22, 0);
        assert_eq!(
            next_scan_time(december, UpdatePeriod::Monthly, three_am()),
            Some(at(2025, Month::January, 1, 3, 0))
        );
    }
}
