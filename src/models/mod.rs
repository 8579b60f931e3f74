pub mod availability;
pub mod booking;
pub mod intent;
pub mod service;
pub mod session;

pub use availability::{AvailabilityFile, OpenSlots, SlotKey};
pub use booking::{Booking, BookingRequest, BookingStatus};
pub use intent::Intent;
pub use service::Service;
pub use session::{Confidence, ExtractedInfo, Session, SessionMessage, Stage};
