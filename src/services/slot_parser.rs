//! Date and time phrases as callers say them ("January 5th at 10am",
//! "tomorrow at 9:30", "03/14/1990") normalized to ledger keys.

use std::sync::OnceLock;

use chrono::{Datelike, Duration, NaiveDate, NaiveTime, Weekday};
use regex::Regex;

use crate::models::SlotKey;

const MONTHS: &str = r"(jan(?:uary)?|feb(?:ruary)?|mar(?:ch)?|apr(?:il)?|may|june?|july?|aug(?:ust)?|sep(?:t(?:ember)?)?|oct(?:ober)?|nov(?:ember)?|dec(?:ember)?)";

#[derive(Debug, Clone, PartialEq)]
pub enum SlotParse {
    Slot(SlotKey),
    DateOnly(NaiveDate),
    TimeOnly(NaiveTime),
    Invalid,
}

/// A calendar date written out in the text, year possibly omitted.
#[derive(Debug, Clone, Copy, PartialEq)]
struct DateMention {
    year: Option<i32>,
    /// The year was said with two digits ("03/14/90").
    short_year: bool,
    month: u32,
    day: u32,
}

/// Result of looking for a full date (with year), as used for dates of birth.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FullDate {
    Valid(NaiveDate),
    /// Something date-shaped that is not a real calendar date or lacks a year.
    Malformed,
    Absent,
}

/// A written date that is not on the calendar ("February 30th") makes the
/// whole phrase `Invalid`, never a bare time.
pub fn parse_slot(text: &str, today: NaiveDate) -> SlotParse {
    let date = parse_date(text, today);
    if date.is_none() && find_date(text).is_some() {
        return SlotParse::Invalid;
    }
    match (date, parse_time(text)) {
        (Some(date), Some(time)) => SlotParse::Slot(SlotKey::new(date, time)),
        (Some(date), None) => SlotParse::DateOnly(date),
        (None, Some(time)) => SlotParse::TimeOnly(time),
        (None, None) => SlotParse::Invalid,
    }
}

/// True when the text writes out a calendar date, valid or not.
pub fn mentions_date(text: &str) -> bool {
    find_date(text).is_some()
}

/// True when the text mentions any date or time, valid or not.
pub fn has_slot_expression(text: &str) -> bool {
    mentions_date(text) || relative_day_re().is_match(text) || weekday_re().is_match(text) || parse_time(text).is_some()
}

/// Resolves an appointment date. Dates without a year resolve to their next
/// occurrence on or after `today`.
pub fn parse_date(text: &str, today: NaiveDate) -> Option<NaiveDate> {
    if let Some(mention) = find_date(text) {
        return match mention.year {
            Some(year) if mention.short_year => NaiveDate::from_ymd_opt(2000 + year, mention.month, mention.day),
            Some(year) => NaiveDate::from_ymd_opt(year, mention.month, mention.day),
            None => {
                let this_year = NaiveDate::from_ymd_opt(today.year(), mention.month, mention.day);
                match this_year {
                    Some(d) if d >= today => Some(d),
                    _ => NaiveDate::from_ymd_opt(today.year() + 1, mention.month, mention.day),
                }
            }
        };
    }

    if let Some(caps) = relative_day_re().captures(text) {
        let word = caps[1].to_lowercase();
        let offset = if word == "today" {
            0
        } else if word.starts_with("day after") {
            2
        } else {
            1
        };
        return Some(today + Duration::days(offset));
    }

    if let Some(caps) = weekday_re().captures(text) {
        let strictly_after = caps
            .get(1)
            .map(|m| m.as_str().trim().eq_ignore_ascii_case("next"))
            .unwrap_or(false);
        let target: Weekday = caps[2].parse().ok()?;
        let mut ahead = (target.num_days_from_monday() as i64
            - today.weekday().num_days_from_monday() as i64)
            .rem_euclid(7);
        if ahead == 0 && strictly_after {
            ahead = 7;
        }
        return Some(today + Duration::days(ahead));
    }

    None
}

/// Bare hours without am/pm are read as clinic hours: 8–11 morning, 1–7 afternoon.
pub fn parse_time(text: &str) -> Option<NaiveTime> {
    static AMPM: OnceLock<Regex> = OnceLock::new();
    static CLOCK: OnceLock<Regex> = OnceLock::new();
    static NOON: OnceLock<Regex> = OnceLock::new();
    static BARE: OnceLock<Regex> = OnceLock::new();

    let ampm = AMPM.get_or_init(|| {
        Regex::new(r"(?i)\b(\d{1,2})(?::(\d{2}))?\s*([ap])\.?\s?m\b\.?").expect("invalid am/pm regex")
    });
    if let Some(caps) = ampm.captures(text) {
        let hour: u32 = caps[1].parse().ok()?;
        let minute: u32 = caps.get(2).map_or(Some(0), |m| m.as_str().parse().ok())?;
        if !(1..=12).contains(&hour) {
            return None;
        }
        let pm = caps[3].eq_ignore_ascii_case("p");
        let hour = match (hour, pm) {
            (12, false) => 0,
            (12, true) => 12,
            (h, true) => h + 12,
            (h, false) => h,
        };
        return NaiveTime::from_hms_opt(hour, minute, 0);
    }

    let clock = CLOCK.get_or_init(|| Regex::new(r"\b(\d{1,2}):(\d{2})\b").expect("invalid clock regex"));
    if let Some(caps) = clock.captures(text) {
        let hour: u32 = caps[1].parse().ok()?;
        let minute: u32 = caps[2].parse().ok()?;
        return NaiveTime::from_hms_opt(hour, minute, 0);
    }

    let noon = NOON.get_or_init(|| Regex::new(r"(?i)\b(noon|midday)\b").expect("invalid noon regex"));
    if noon.is_match(text) {
        return NaiveTime::from_hms_opt(12, 0, 0);
    }

    let bare = BARE.get_or_init(|| {
        Regex::new(r"(?i)\bat\s+(\d{1,2})(?:\s*o'?clock)?(?:\s|$|[.,!?])").expect("invalid bare hour regex")
    });
    if let Some(caps) = bare.captures(text) {
        let hour: u32 = caps[1].parse().ok()?;
        let hour = match hour {
            1..=7 => hour + 12,
            h => h,
        };
        return NaiveTime::from_hms_opt(hour, 0, 0);
    }

    None
}

/// Looks for a date that carries its own year. Used for dates of birth, so a
/// two-digit year is the most recent one not after `today` ("90" is 1990).
pub fn parse_full_date(text: &str, today: NaiveDate) -> FullDate {
    match find_date(text) {
        Some(DateMention {
            year: Some(year),
            short_year,
            month,
            day,
        }) => {
            let year = if short_year { past_century_year(year, today) } else { year };
            NaiveDate::from_ymd_opt(year, month, day)
                .map(FullDate::Valid)
                .unwrap_or(FullDate::Malformed)
        }
        Some(_) => FullDate::Malformed,
        None => FullDate::Absent,
    }
}

fn find_date(text: &str) -> Option<DateMention> {
    static ISO: OnceLock<Regex> = OnceLock::new();
    static NUMERIC: OnceLock<Regex> = OnceLock::new();
    static MONTH_DAY: OnceLock<Regex> = OnceLock::new();
    static DAY_MONTH: OnceLock<Regex> = OnceLock::new();

    let iso = ISO.get_or_init(|| Regex::new(r"\b(\d{4})-(\d{1,2})-(\d{1,2})\b").expect("invalid iso date regex"));
    if let Some(caps) = iso.captures(text) {
        return Some(DateMention {
            year: caps[1].parse().ok(),
            short_year: false,
            month: caps[2].parse().ok()?,
            day: caps[3].parse().ok()?,
        });
    }

    // US order: MM/DD[/YYYY]
    let numeric = NUMERIC.get_or_init(|| {
        Regex::new(r"\b(\d{1,2})/(\d{1,2})(?:/(\d{2}|\d{4}))?\b").expect("invalid numeric date regex")
    });
    if let Some(caps) = numeric.captures(text) {
        return Some(DateMention {
            year: caps.get(3).and_then(|y| y.as_str().parse().ok()),
            short_year: caps.get(3).map_or(false, |y| y.as_str().len() == 2),
            month: caps[1].parse().ok()?,
            day: caps[2].parse().ok()?,
        });
    }

    let month_day = MONTH_DAY.get_or_init(|| {
        Regex::new(&format!(
            r"(?i)\b{MONTHS}\.?\s+(\d{{1,2}})(?:st|nd|rd|th)?\b(?:,?\s+(\d{{4}})\b)?"
        ))
        .expect("invalid month-day regex")
    });
    if let Some(caps) = month_day.captures(text) {
        return Some(DateMention {
            year: caps.get(3).and_then(|y| y.as_str().parse().ok()),
            short_year: false,
            month: month_number(&caps[1])?,
            day: caps[2].parse().ok()?,
        });
    }

    let day_month = DAY_MONTH.get_or_init(|| {
        Regex::new(&format!(
            r"(?i)\b(\d{{1,2}})(?:st|nd|rd|th)?\s+(?:of\s+)?{MONTHS}\b(?:,?\s+(\d{{4}})\b)?"
        ))
        .expect("invalid day-month regex")
    });
    if let Some(caps) = day_month.captures(text) {
        return Some(DateMention {
            year: caps.get(3).and_then(|y| y.as_str().parse().ok()),
            short_year: false,
            month: month_number(&caps[2])?,
            day: caps[1].parse().ok()?,
        });
    }

    None
}

fn relative_day_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)\b(today|day after tomorrow|tomorrow)\b").expect("invalid relative day regex")
    })
}

fn weekday_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)\b(next\s+|this\s+)?(monday|tuesday|wednesday|thursday|friday|saturday|sunday)\b")
            .expect("invalid weekday regex")
    })
}

fn month_number(name: &str) -> Option<u32> {
    let month = match name.get(..3)?.to_lowercase().as_str() {
        "jan" => 1,
        "feb" => 2,
        "mar" => 3,
        "apr" => 4,
        "may" => 5,
        "jun" => 6,
        "jul" => 7,
        "aug" => 8,
        "sep" => 9,
        "oct" => 10,
        "nov" => 11,
        "dec" => 12,
        _ => return None,
    };
    Some(month)
}

fn past_century_year(yy: i32, today: NaiveDate) -> i32 {
    let century = today.year() - today.year().rem_euclid(100);
    if yy <= today.year().rem_euclid(100) {
        century + yy
    } else {
        century - 100 + yy
    }
}
