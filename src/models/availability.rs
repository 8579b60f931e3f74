use std::collections::BTreeMap;
use std::fmt;

use chrono::{NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};

pub const DATE_FORMAT: &str = "%Y-%m-%d";
pub const TIME_FORMAT: &str = "%H:%M";

/// Open slots grouped by date key, each day's times in ascending order.
pub type OpenSlots = BTreeMap<String, Vec<String>>;

/// Ledger key of one appointment opportunity: `YYYY-MM-DD` + `HH:MM`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SlotKey {
    pub date: String,
    pub time: String,
}

impl SlotKey {
    pub fn new(date: NaiveDate, time: NaiveTime) -> Self {
        Self {
            date: date.format(DATE_FORMAT).to_string(),
            time: time.format(TIME_FORMAT).to_string(),
        }
    }

    /// Parses already-normalized keys, rejecting anything the ledger would not store.
    pub fn parse(date: &str, time: &str) -> anyhow::Result<Self> {
        let date = NaiveDate::parse_from_str(date, DATE_FORMAT)
            .map_err(|_| anyhow::anyhow!("invalid date key: {date}"))?;
        let time = parse_time(time)?;
        Ok(Self::new(date, time))
    }

    pub fn naive_date(&self) -> Option<NaiveDate> {
        NaiveDate::parse_from_str(&self.date, DATE_FORMAT).ok()
    }

    /// Spoken form, e.g. "Tuesday, January 5 at 10:00".
    pub fn to_human_readable(&self) -> String {
        match self.naive_date() {
            Some(d) => format!("{} at {}", d.format("%A, %B %-d"), self.time),
            None => format!("{} at {}", self.date, self.time),
        }
    }
}

impl fmt::Display for SlotKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.date, self.time)
    }
}

/// Seed file shape: `{"2026-01-05": {"09:00": true, "09:30": false}}`.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(transparent)]
pub struct AvailabilityFile {
    pub days: BTreeMap<String, BTreeMap<String, bool>>,
}

impl AvailabilityFile {
    pub fn from_json(s: &str) -> anyhow::Result<Self> {
        let file: AvailabilityFile = serde_json::from_str(s)?;
        for (date, times) in &file.days {
            for time in times.keys() {
                SlotKey::parse(date, time)?;
            }
        }
        Ok(file)
    }

    /// Every slot in the file with its free flag, keys normalized.
    pub fn slots(&self) -> anyhow::Result<Vec<(SlotKey, bool)>> {
        let mut out = Vec::new();
        for (date, times) in &self.days {
            for (time, free) in times {
                out.push((SlotKey::parse(date, time)?, *free));
            }
        }
        Ok(out)
    }
}

/// Renders up to `max_days` days with up to `max_times` times each.
pub fn describe_open_slots(open: &OpenSlots, max_days: usize, max_times: usize) -> String {
    open.iter()
        .take(max_days)
        .map(|(date, times)| {
            let day = NaiveDate::parse_from_str(date, DATE_FORMAT)
                .map(|d| d.format("%A, %B %-d").to_string())
                .unwrap_or_else(|_| date.clone());
            let shown: Vec<&str> = times.iter().take(max_times).map(String::as_str).collect();
            format!("{day}: {}", shown.join(", "))
        })
        .collect::<Vec<_>>()
        .join("; ")
}

pub fn parse_time(s: &str) -> anyhow::Result<NaiveTime> {
    let parts: Vec<&str> = s.trim().split(':').collect();
    if parts.len() != 2 {
        return Err(anyhow::anyhow!("invalid time format: {s}"));
    }
    let hour: u32 = parts[0]
        .parse()
        .map_err(|_| anyhow::anyhow!("invalid hour in: {s}"))?;
    let minute: u32 = parts[1]
        .parse()
        .map_err(|_| anyhow::anyhow!("invalid minute in: {s}"))?;
    NaiveTime::from_hms_opt(hour, minute, 0).ok_or_else(|| anyhow::anyhow!("time out of range: {s}"))
}
