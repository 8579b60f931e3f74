use std::sync::OnceLock;

use chrono::{Datelike, NaiveDate};
use regex::Regex;

use crate::models::Confidence;
use crate::services::slot_parser::{self, FullDate};

/// Oldest accepted date of birth, in years before today.
const MAX_AGE_YEARS: i32 = 130;

/// Words that end a name captured after a cue like "my name is".
const NAME_TERMINATORS: &[&str] = &[
    "and", "born", "my", "dob", "date", "birth", "i", "on", "the", "from", "calling", "here",
    "please", "with", "at", "but", "january", "february", "march", "april", "may", "june",
    "july", "august", "september", "october", "november", "december", "monday", "tuesday",
    "wednesday", "thursday", "friday", "saturday", "sunday",
];

/// Capitalised words that are never a bare name.
const NOT_NAMES: &[&str] = &[
    "thank", "thanks", "you", "yes", "no", "hello", "hi", "okay", "ok", "sure", "great", "good",
    "morning", "afternoon", "please", "the", "my", "i",
];

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DobOutcome {
    Valid(NaiveDate),
    /// The caller tried to give a birth date that is not usable.
    Malformed,
    Absent,
}

#[derive(Debug, Clone, PartialEq)]
pub struct IdentityExtraction {
    pub name: Option<(String, Confidence)>,
    pub dob: DobOutcome,
}

impl IdentityExtraction {
    pub fn is_empty(&self) -> bool {
        self.name.is_none() && self.dob == DobOutcome::Absent
    }
}

pub fn extract(utterance: &str, today: NaiveDate) -> IdentityExtraction {
    IdentityExtraction {
        name: extract_name(utterance),
        dob: extract_dob(utterance, today),
    }
}

/// Whether the utterance looks like the caller giving a name or birth date.
pub fn has_identity_signal(utterance: &str) -> bool {
    name_cue_re().is_match(utterance)
        || weak_name_cue_re().is_match(utterance)
        || birth_cue_re().is_match(utterance)
        || slot_parser::mentions_date(utterance)
        || inferred_name(utterance).is_some()
}

pub fn extract_name(utterance: &str) -> Option<(String, Confidence)> {
    if let Some(caps) = name_cue_re().captures(utterance) {
        if let Some(name) = trim_name(&caps[1]) {
            return Some((title_case(&name), Confidence::Explicit));
        }
    }
    if let Some(caps) = weak_name_cue_re().captures(utterance) {
        if let Some(name) = trim_name(&caps[1]) {
            return Some((name, Confidence::Explicit));
        }
    }
    inferred_name(utterance).map(|name| (name, Confidence::Inferred))
}

pub fn extract_dob(utterance: &str, today: NaiveDate) -> DobOutcome {
    match slot_parser::parse_full_date(utterance, today) {
        FullDate::Valid(date) => {
            let oldest = NaiveDate::from_ymd_opt(today.year() - MAX_AGE_YEARS, today.month(), 1);
            if date >= today || oldest.map_or(false, |oldest| date < oldest) {
                DobOutcome::Malformed
            } else {
                DobOutcome::Valid(date)
            }
        }
        FullDate::Malformed => DobOutcome::Malformed,
        FullDate::Absent if birth_cue_re().is_match(utterance) => DobOutcome::Malformed,
        FullDate::Absent => DobOutcome::Absent,
    }
}

fn name_cue_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)\b(?:my name is|my name's|name is|name\s*:|call me)\s+([a-z][a-z'\-]*(?:\s+[a-z][a-z'\-]*){0,5})")
            .expect("invalid name cue regex")
    })
}

/// "I'm" and "this is" only count when followed by capitalised words,
/// otherwise "I'm not sure" would be a name.
fn weak_name_cue_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\b(?i:i'm|i am|im|this is)\s+([A-Z][a-zA-Z'\-]*(?:\s+[A-Z][a-zA-Z'\-]*){0,3})")
            .expect("invalid weak name cue regex")
    })
}

fn birth_cue_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)\b(born|birth|birthday|dob|d\.o\.b)\b").expect("invalid birth cue regex"))
}

fn trim_name(raw: &str) -> Option<String> {
    let words: Vec<&str> = raw
        .split_whitespace()
        .take_while(|w| !NAME_TERMINATORS.contains(&w.to_lowercase().as_str()))
        .take(4)
        .collect();
    if words.is_empty() {
        None
    } else {
        Some(words.join(" "))
    }
}

/// A comma-separated segment made only of 2–4 capitalised words, e.g.
/// "Jane Doe, 03/14/1990".
fn inferred_name(utterance: &str) -> Option<String> {
    utterance
        .split([',', ';', '.', '!', '?'])
        .map(str::trim)
        .find_map(|segment| {
            let words: Vec<&str> = segment.split_whitespace().collect();
            let plausible = (2..=4).contains(&words.len())
                && words.iter().all(|w| {
                    let mut chars = w.chars();
                    chars.next().map_or(false, |c| c.is_uppercase())
                        && chars.all(|c| c.is_alphabetic() || c == '\'' || c == '-')
                        && !NOT_NAMES.contains(&w.to_lowercase().as_str())
                })
                && !slot_parser::has_slot_expression(segment);
            plausible.then(|| words.join(" "))
        })
}

fn title_case(name: &str) -> String {
    name.split_whitespace()
        .map(|w| {
            let mut chars = w.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<String>>()
        .join(" ")
}
