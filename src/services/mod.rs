pub mod bookings;
pub mod catalog;
pub mod classifier;
pub mod clock;
pub mod conversation;
pub mod identity;
pub mod ledger;
pub mod sessions;
pub mod slot_parser;
