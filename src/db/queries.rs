use chrono::{NaiveDateTime, SubsecRound, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use crate::models::{
    Booking, BookingStatus, ExtractedInfo, OpenSlots, Session, SessionMessage, SlotKey, Stage,
};

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f";

// ── Slots ──

/// Inserts a slot unless it already exists. Existing slots keep their state,
/// so re-seeding never re-opens a taken slot.
pub fn insert_slot_if_absent(conn: &Connection, slot: &SlotKey, free: bool) -> anyhow::Result<bool> {
    let count = conn.execute(
        "INSERT OR IGNORE INTO slots (date, time, free) VALUES (?1, ?2, ?3)",
        params![slot.date, slot.time, free as i32],
    )?;
    Ok(count > 0)
}

pub fn get_open_slots(conn: &Connection, from_date: &str, until_date: &str) -> anyhow::Result<OpenSlots> {
    let mut stmt = conn.prepare(
        "SELECT date, time FROM slots
         WHERE date >= ?1 AND date < ?2 AND free = 1
         ORDER BY date ASC, time ASC",
    )?;

    let rows = stmt.query_map(params![from_date, until_date], |row| {
        Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
    })?;

    let mut open = OpenSlots::new();
    for row in rows {
        let (date, time) = row?;
        open.entry(date).or_default().push(time);
    }
    Ok(open)
}

pub fn get_slot_state(conn: &Connection, slot: &SlotKey) -> anyhow::Result<Option<bool>> {
    let free = conn
        .query_row(
            "SELECT free FROM slots WHERE date = ?1 AND time = ?2",
            params![slot.date, slot.time],
            |row| row.get::<_, i32>(0),
        )
        .optional()?;
    Ok(free.map(|f| f != 0))
}

/// Compare-and-swap: flips `free → taken` only if the slot is currently free.
pub fn reserve_slot(conn: &Connection, slot: &SlotKey) -> anyhow::Result<bool> {
    let count = conn.execute(
        "UPDATE slots SET free = 0 WHERE date = ?1 AND time = ?2 AND free = 1",
        params![slot.date, slot.time],
    )?;
    Ok(count == 1)
}

/// Compensation for a reservation whose booking write failed.
pub fn release_slot(conn: &Connection, slot: &SlotKey) -> anyhow::Result<bool> {
    let count = conn.execute(
        "UPDATE slots SET free = 1
         WHERE date = ?1 AND time = ?2 AND free = 0
           AND NOT EXISTS (SELECT 1 FROM bookings WHERE date = ?1 AND time = ?2)",
        params![slot.date, slot.time],
    )?;
    Ok(count == 1)
}

// ── Bookings ──

pub fn create_booking(conn: &Connection, booking: &Booking) -> anyhow::Result<()> {
    let created_at = booking.created_at.format(TIMESTAMP_FORMAT).to_string();

    conn.execute(
        "INSERT INTO bookings (id, session_id, patient_name, dob, service_id, service_name, date, time, status, price, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
        params![
            booking.id,
            booking.session_id,
            booking.patient_name,
            booking.dob,
            booking.service_id,
            booking.service_name,
            booking.date,
            booking.time,
            booking.status.as_str(),
            booking.price,
            created_at,
        ],
    )?;
    Ok(())
}

pub fn get_booking_by_id(conn: &Connection, id: &str) -> anyhow::Result<Option<Booking>> {
    let result = conn.query_row(
        "SELECT id, session_id, patient_name, dob, service_id, service_name, date, time, status, price, created_at \
         FROM bookings WHERE id = ?1",
        params![id],
        |row| Ok(parse_booking_row(row)),
    );

    match result {
        Ok(booking) => Ok(Some(booking?)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

pub fn get_bookings_for_session(conn: &Connection, session_id: &str) -> anyhow::Result<Vec<Booking>> {
    let mut stmt = conn.prepare(
        "SELECT id, session_id, patient_name, dob, service_id, service_name, date, time, status, price, created_at
         FROM bookings WHERE session_id = ?1 ORDER BY created_at ASC",
    )?;

    let rows = stmt.query_map(params![session_id], |row| Ok(parse_booking_row(row)))?;

    let mut bookings = vec![];
    for row in rows {
        bookings.push(row??);
    }
    Ok(bookings)
}

pub fn get_all_bookings(conn: &Connection) -> anyhow::Result<Vec<Booking>> {
    let mut stmt = conn.prepare(
        "SELECT id, session_id, patient_name, dob, service_id, service_name, date, time, status, price, created_at
         FROM bookings ORDER BY date ASC, time ASC",
    )?;

    let rows = stmt.query_map([], |row| Ok(parse_booking_row(row)))?;

    let mut bookings = vec![];
    for row in rows {
        bookings.push(row??);
    }
    Ok(bookings)
}

fn parse_booking_row(row: &rusqlite::Row) -> anyhow::Result<Booking> {
    let status_str: String = row.get(8)?;
    let created_at_str: String = row.get(10)?;

    let status = BookingStatus::parse(&status_str)
        .ok_or_else(|| anyhow::anyhow!("unknown booking status: {status_str}"))?;
    let created_at = parse_timestamp(&created_at_str)?;

    Ok(Booking {
        id: row.get(0)?,
        session_id: row.get(1)?,
        patient_name: row.get(2)?,
        dob: row.get(3)?,
        service_id: row.get(4)?,
        service_name: row.get(5)?,
        date: row.get(6)?,
        time: row.get(7)?,
        status,
        price: row.get(9)?,
        created_at,
    })
}

// ── Sessions ──

#[derive(serde::Serialize, serde::Deserialize)]
struct SessionData {
    messages: Vec<SessionMessage>,
    extracted_info: ExtractedInfo,
    #[serde(default)]
    proposed_slot: Option<SlotKey>,
}

pub fn get_session(conn: &Connection, session_id: &str) -> anyhow::Result<Option<Session>> {
    let result = conn
        .query_row(
            "SELECT session_id, data, stage, booking_id, created_at, last_activity
             FROM sessions WHERE session_id = ?1",
            params![session_id],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, Option<String>>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, String>(5)?,
                ))
            },
        )
        .optional()?;

    let Some((session_id, data_json, stage_str, booking_id, created_at_str, last_activity_str)) =
        result
    else {
        return Ok(None);
    };

    let data: SessionData = serde_json::from_str(&data_json)?;
    let stage = Stage::parse(&stage_str)
        .ok_or_else(|| anyhow::anyhow!("unknown session stage: {stage_str}"))?;

    Ok(Some(Session {
        session_id,
        messages: data.messages,
        extracted_info: data.extracted_info,
        stage,
        booking_id,
        proposed_slot: data.proposed_slot,
        created_at: parse_timestamp(&created_at_str)?,
        last_activity: parse_timestamp(&last_activity_str)?,
    }))
}

pub fn save_session(conn: &Connection, session: &Session) -> anyhow::Result<()> {
    let data = SessionData {
        messages: session.messages.clone(),
        extracted_info: session.extracted_info.clone(),
        proposed_slot: session.proposed_slot.clone(),
    };
    let data_json = serde_json::to_string(&data)?;
    let created_at = session.created_at.format(TIMESTAMP_FORMAT).to_string();
    let last_activity = session.last_activity.format(TIMESTAMP_FORMAT).to_string();

    conn.execute(
        "INSERT INTO sessions (session_id, data, stage, booking_id, created_at, last_activity)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)
         ON CONFLICT(session_id) DO UPDATE SET
           data = excluded.data,
           stage = excluded.stage,
           booking_id = excluded.booking_id,
           last_activity = excluded.last_activity",
        params![
            session.session_id,
            data_json,
            session.stage.as_str(),
            session.booking_id,
            created_at,
            last_activity,
        ],
    )?;
    Ok(())
}

/// Marks every non-terminal session idle since before `cutoff` as abandoned.
pub fn abandon_idle_sessions(conn: &Connection, cutoff: &NaiveDateTime) -> anyhow::Result<usize> {
    let cutoff = cutoff.format(TIMESTAMP_FORMAT).to_string();
    let count = conn.execute(
        "UPDATE sessions SET stage = ?1
         WHERE last_activity < ?2 AND stage NOT IN (?3, ?1)",
        params![
            Stage::Abandoned.as_str(),
            cutoff,
            Stage::Confirmed.as_str(),
        ],
    )?;
    Ok(count)
}

/// Current instant at the precision `TIMESTAMP_FORMAT` stores.
pub fn now_timestamp() -> NaiveDateTime {
    Utc::now().naive_utc().trunc_subsecs(3)
}

fn parse_timestamp(s: &str) -> anyhow::Result<NaiveDateTime> {
    NaiveDateTime::parse_from_str(s, TIMESTAMP_FORMAT)
        .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S"))
        .map_err(|e| anyhow::anyhow!("invalid timestamp {s}: {e}"))
}
