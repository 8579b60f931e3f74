use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::Context;
use chrono::{Duration, NaiveDate, NaiveDateTime};
use rusqlite::Connection;

use crate::db::{self, queries};
use crate::models::{AvailabilityFile, Booking, BookingRequest, OpenSlots, Session, SlotKey};
use crate::services::bookings::BookingStore;
use crate::services::ledger::{self, AvailabilityLedger};
use crate::services::sessions::SessionStore;

/// SQLite-backed ledger, booking store and session store sharing one connection.
///
/// Every operation runs under the connection mutex, which is what makes
/// `reserve` a single indivisible check-and-set within this process.
#[derive(Clone)]
pub struct SqliteStore {
    db: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    pub fn new(conn: Connection) -> Self {
        Self {
            db: Arc::new(Mutex::new(conn)),
        }
    }

    pub fn open(path: &str) -> anyhow::Result<Self> {
        Ok(Self::new(db::init_db(path)?))
    }

    fn lock(&self) -> anyhow::Result<MutexGuard<'_, Connection>> {
        self.db
            .lock()
            .map_err(|_| anyhow::anyhow!("database connection lock poisoned"))
    }

    /// Adds a free slot for every `times` entry on each of `days` days from `from`.
    /// Returns how many slots were new.
    pub fn seed_grid(&self, from: NaiveDate, days: u32, times: &[String]) -> anyhow::Result<usize> {
        let slots = ledger::grid(from, days, times)?;
        let db = self.lock()?;
        let mut added = 0;
        for slot in &slots {
            if queries::insert_slot_if_absent(&db, slot, true)? {
                added += 1;
            }
        }
        Ok(added)
    }

    pub fn seed_from_file(&self, path: &str) -> anyhow::Result<usize> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read availability file: {path}"))?;
        let file = AvailabilityFile::from_json(&raw)
            .with_context(|| format!("failed to parse availability file: {path}"))?;
        self.seed_slots(&file.slots()?)
    }

    pub fn seed_slots(&self, slots: &[(SlotKey, bool)]) -> anyhow::Result<usize> {
        let db = self.lock()?;
        let mut added = 0;
        for (slot, free) in slots {
            if queries::insert_slot_if_absent(&db, slot, *free)? {
                added += 1;
            }
        }
        Ok(added)
    }

    pub fn all_bookings(&self) -> anyhow::Result<Vec<Booking>> {
        let db = self.lock()?;
        queries::get_all_bookings(&db)
    }
}

impl AvailabilityLedger for SqliteStore {
    fn query_open(&self, from_date: NaiveDate, days: u32) -> anyhow::Result<OpenSlots> {
        let until = from_date + Duration::days(days as i64);
        let from_key = from_date.format("%Y-%m-%d").to_string();
        let until_key = until.format("%Y-%m-%d").to_string();

        let db = self.lock()?;
        queries::get_open_slots(&db, &from_key, &until_key)
    }

    fn slot_state(&self, slot: &SlotKey) -> anyhow::Result<Option<bool>> {
        let db = self.lock()?;
        queries::get_slot_state(&db, slot)
    }

    fn reserve(&self, slot: &SlotKey) -> anyhow::Result<bool> {
        let db = self.lock()?;
        queries::reserve_slot(&db, slot)
    }

    fn release(&self, slot: &SlotKey) -> anyhow::Result<()> {
        let db = self.lock()?;
        if !queries::release_slot(&db, slot)? {
            tracing::warn!(slot = %slot, "release found nothing to undo");
        }
        Ok(())
    }
}

impl BookingStore for SqliteStore {
    fn create(&self, request: BookingRequest) -> anyhow::Result<Booking> {
        let booking = request.into_booking(queries::now_timestamp());
        let db = self.lock()?;
        queries::create_booking(&db, &booking).context("failed to insert booking")?;
        Ok(booking)
    }

    fn get(&self, id: &str) -> anyhow::Result<Option<Booking>> {
        let db = self.lock()?;
        queries::get_booking_by_id(&db, id)
    }

    fn for_session(&self, session_id: &str) -> anyhow::Result<Vec<Booking>> {
        let db = self.lock()?;
        queries::get_bookings_for_session(&db, session_id)
    }
}

impl SessionStore for SqliteStore {
    fn create(&self) -> anyhow::Result<Session> {
        let session = Session::new(uuid::Uuid::new_v4().to_string(), queries::now_timestamp());
        let db = self.lock()?;
        queries::save_session(&db, &session)?;
        Ok(session)
    }

    fn get(&self, session_id: &str) -> anyhow::Result<Option<Session>> {
        let db = self.lock()?;
        queries::get_session(&db, session_id)
    }

    fn put(&self, session: &Session) -> anyhow::Result<()> {
        let db = self.lock()?;
        queries::save_session(&db, session)
    }

    fn abandon_idle(&self, cutoff: NaiveDateTime) -> anyhow::Result<usize> {
        let db = self.lock()?;
        queries::abandon_idle_sessions(&db, &cutoff)
    }
}
