use crate::models::{Booking, BookingRequest};

/// Append-only record of confirmed bookings.
pub trait BookingStore: Send + Sync {
    /// Writes the booking for a slot the caller has already reserved.
    fn create(&self, request: BookingRequest) -> anyhow::Result<Booking>;

    fn get(&self, id: &str) -> anyhow::Result<Option<Booking>>;

    fn for_session(&self, session_id: &str) -> anyhow::Result<Vec<Booking>>;
}
