use chrono::{Duration, NaiveDate};

use crate::models::availability::parse_time;
use crate::models::{OpenSlots, SlotKey};

/// Date → time → free/taken, shared by every session.
///
/// `reserve` is the only way a slot changes state during a conversation and
/// must be an atomic check-and-set: of any number of concurrent callers for
/// one free slot exactly one sees `true`.
pub trait AvailabilityLedger: Send + Sync {
    /// Free times for each date in `[from_date, from_date + days)`.
    fn query_open(&self, from_date: NaiveDate, days: u32) -> anyhow::Result<OpenSlots>;

    /// `None` when the ledger has no such slot.
    fn slot_state(&self, slot: &SlotKey) -> anyhow::Result<Option<bool>>;

    fn reserve(&self, slot: &SlotKey) -> anyhow::Result<bool>;

    /// Undo a reservation whose booking record could not be written.
    /// Never used to cancel a committed booking.
    fn release(&self, slot: &SlotKey) -> anyhow::Result<()>;
}

/// Builds a daily grid of slot keys starting at `from`.
pub fn grid(from: NaiveDate, days: u32, times: &[String]) -> anyhow::Result<Vec<SlotKey>> {
    let parsed = times
        .iter()
        .map(|t| parse_time(t))
        .collect::<anyhow::Result<Vec<_>>>()?;

    let mut slots = Vec::with_capacity(days as usize * parsed.len());
    for offset in 0..days {
        let date = from + Duration::days(offset as i64);
        for time in &parsed {
            slots.push(SlotKey::new(date, *time));
        }
    }
    Ok(slots)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_grid_covers_every_day_and_time() {
        let from = NaiveDate::from_ymd_opt(2027, 1, 5).unwrap();
        let times = vec!["09:00".to_string(), "14:30".to_string()];
        let slots = grid(from, 3, &times).unwrap();

        assert_eq!(slots.len(), 6);
        assert_eq!(slots[0], SlotKey::parse("2027-01-05", "09:00").unwrap());
        assert_eq!(slots[5], SlotKey::parse("2027-01-07", "14:30").unwrap());
    }

    #[test]
    fn test_grid_rejects_bad_time() {
        let from = NaiveDate::from_ymd_opt(2027, 1, 5).unwrap();
        assert!(grid(from, 1, &["nine".to_string()]).is_err());
    }
}
