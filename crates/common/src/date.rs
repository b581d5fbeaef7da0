use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum DatePrecision {
    Year,
    Month,
    Day,
    Hour,
    Minute,
    Second,
}

/// A date of which only the leading components may be known.
///
/// Tag values range from a bare year to full timestamps; components after the
/// first missing one are always absent.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PartialDate {
    year: i32,
    month: Option<u8>,
    day: Option<u8>,
    hour: Option<u8>,
    minute: Option<u8>,
    second: Option<u8>,
}

impl PartialDate {
    pub fn from_year(year: i32) -> Self {
        Self {
            year,
            month: None,
            day: None,
            hour: None,
            minute: None,
            second: None,
        }
    }

    pub fn from_ymd(year: i32, month: u8, day: u8) -> Option<Self> {
        if !(1..=12).contains(&month) || day == 0 || day > days_in_month(year, month) {
            return None;
        }
        Some(Self {
            month: Some(month),
            day: Some(day),
            ..Self::from_year(year)
        })
    }

    /// Accepts `YYYY`, `YYYY-MM`, `YYYY-MM-DD` (or with `/`), optionally
    /// followed by `T` or a space and `HH[:MM[:SS[.fff]]]`, with an optional
    /// trailing `Z` or UTC offset. Returns `None` for anything else.
    pub fn parse(input: &str) -> Option<Self> {
        let input = input.trim();
        if input.is_empty() {
            return None;
        }

        let (date_part, time_part) = match input.find(|c: char| c == 'T' || c == ' ') {
            Some(idx) => (&input[..idx], Some(input[idx + 1..].trim())),
            None => (input, None),
        };

        let separator = if date_part.contains('/') { '/' } else { '-' };
        let mut fields = date_part.split(separator);

        let year_text = fields.next()?;
        if year_text.len() != 4 || !year_text.chars().all(|c| c.is_ascii_digit()) {
            return None;
        }
        let mut date = Self::from_year(year_text.parse().ok()?);

        if let Some(month_text) = fields.next() {
            let month = parse_component(month_text)?;
            if !(1..=12).contains(&month) {
                return None;
            }
            date.month = Some(month);
        }
        if let Some(day_text) = fields.next() {
            let day = parse_component(day_text)?;
            let month = date.month?;
            if day == 0 || day > days_in_month(date.year, month) {
                return None;
            }
            date.day = Some(day);
        }
        if fields.next().is_some() {
            return None;
        }

        let time_part = match time_part {
            Some(value) if !value.is_empty() => value,
            Some(_) => return None,
            None => return Some(date),
        };
        date.day?;

        let time_part = strip_zone(time_part);
        let mut fields = time_part.split(':');
        let hour = parse_component(fields.next()?)?;
        if hour > 23 {
            return None;
        }
        date.hour = Some(hour);
        if let Some(minute_text) = fields.next() {
            let minute = parse_component(minute_text)?;
            if minute > 59 {
                return None;
            }
            date.minute = Some(minute);
        }
        if let Some(second_text) = fields.next() {
            let whole = match second_text.split_once(|c: char| c == '.' || c == ',') {
                Some((whole, fraction)) => {
                    if fraction.is_empty() || !fraction.chars().all(|c| c.is_ascii_digit()) {
                        return None;
                    }
                    whole
                }
                None => second_text,
            };
            let second = parse_component(whole)?;
            if second > 59 {
                return None;
            }
            date.second = Some(second);
        }
        if fields.next().is_some() {
            return None;
        }

        Some(date)
    }

    pub fn year(&self) -> i32 {
        self.year
    }

    pub fn month(&self) -> Option<u8> {
        self.month
    }

    pub fn day(&self) -> Option<u8> {
        self.day
    }

    pub fn precision(&self) -> DatePrecision {
        if self.second.is_some() {
            DatePrecision::Second
        } else if self.minute.is_some() {
            DatePrecision::Minute
        } else if self.hour.is_some() {
            DatePrecision::Hour
        } else if self.day.is_some() {
            DatePrecision::Day
        } else if self.month.is_some() {
            DatePrecision::Month
        } else {
            DatePrecision::Year
        }
    }

    pub fn to_iso8601(&self) -> String {
        let mut out = format!("{:04}", self.year);
        if let Some(month) = self.month {
            out.push_str(&format!("-{:02}", month));
        }
        if let Some(day) = self.day {
            out.push_str(&format!("-{:02}", day));
        }
        if let Some(hour) = self.hour {
            out.push_str(&format!("T{:02}", hour));
        }
        if let Some(minute) = self.minute {
            out.push_str(&format!(":{:02}", minute));
        }
        if let Some(second) = self.second {
            out.push_str(&format!(":{:02}", second));
        }
        out
    }
}

impl std::fmt::Display for PartialDate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_iso8601())
    }
}

fn parse_component(text: &str) -> Option<u8> {
    if text.is_empty() || text.len() > 2 || !text.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    text.parse().ok()
}

fn strip_zone(time: &str) -> &str {
    if let Some(stripped) = time.strip_suffix('Z') {
        return stripped;
    }
    // offsets look like +02:00 / -0500 and always follow the seconds or minutes
    match time.rfind(|c: char| c == '+' || c == '-') {
        Some(idx) if idx > 0 => &time[..idx],
        _ => time,
    }
}

fn days_in_month(year: i32, month: u8) -> u8 {
    match month {
        1 | 3 | 5 | 7 | 8 | 10 | 12 => 31,
        4 | 6 | 9 | 11 => 30,
        2 if (year % 4 == 0 && year % 100 != 0) || year % 400 == 0 => 29,
        2 => 28,
        _ => 0,
    }
}
