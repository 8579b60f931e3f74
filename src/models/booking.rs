use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use super::SlotKey;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Booking {
    pub id: String,
    pub session_id: String,
    pub patient_name: String,
    pub dob: String,
    pub service_id: String,
    pub service_name: String,
    pub date: String,
    pub time: String,
    pub status: BookingStatus,
    pub price: f64,
    pub created_at: NaiveDateTime,
}

impl Booking {
    pub fn slot(&self) -> SlotKey {
        SlotKey {
            date: self.date.clone(),
            time: self.time.clone(),
        }
    }
}

/// Everything needed to write a booking for a slot that was just reserved.
#[derive(Debug, Clone)]
pub struct BookingRequest {
    pub session_id: String,
    pub patient_name: String,
    pub dob: String,
    pub service_id: String,
    pub service_name: String,
    pub price: f64,
    pub slot: SlotKey,
}

impl BookingRequest {
    pub fn into_booking(self, created_at: NaiveDateTime) -> Booking {
        Booking {
            id: booking_id(&self.slot, &created_at),
            session_id: self.session_id,
            patient_name: self.patient_name,
            dob: self.dob,
            service_id: self.service_id,
            service_name: self.service_name,
            date: self.slot.date,
            time: self.slot.time,
            status: BookingStatus::Confirmed,
            price: self.price,
            created_at,
        }
    }
}

/// `BK-<date><time>-<creation instant>`, e.g. `BK-202701051000-20261016093011123`.
pub fn booking_id(slot: &SlotKey, created_at: &NaiveDateTime) -> String {
    format!(
        "BK-{}{}-{}",
        slot.date.replace('-', ""),
        slot.time.replace(':', ""),
        created_at.format("%Y%m%d%H%M%S%3f"),
    )
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum BookingStatus {
    Confirmed,
}

impl BookingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BookingStatus::Confirmed => "confirmed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "confirmed" => Some(BookingStatus::Confirmed),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_booking_id_is_derived_from_slot_and_instant() {
        let slot = SlotKey::parse("2027-01-05", "10:00").unwrap();
        let created =
            NaiveDateTime::parse_from_str("2026-10-16 09:30:11", "%Y-%m-%d %H:%M:%S").unwrap();
        assert_eq!(
            booking_id(&slot, &created),
            "BK-202701051000-20261016093011000"
        );
    }
}
