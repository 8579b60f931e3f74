use std::sync::Arc;

use chrono::{Duration, NaiveDate};
use serde::Serialize;

use crate::errors::AppError;
use crate::models::availability::describe_open_slots;
use crate::models::{
    Booking, BookingRequest, Confidence, Intent, OpenSlots, Service, Session, SlotKey, Stage,
};
use crate::services::bookings::BookingStore;
use crate::services::catalog::ServiceCatalog;
use crate::services::classifier::IntentClassifier;
use crate::services::clock::Clock;
use crate::services::identity::{self, DobOutcome};
use crate::services::ledger::AvailabilityLedger;
use crate::services::sessions::{SessionLocks, SessionStore};
use crate::services::slot_parser::{self, SlotParse};

const OFFER_MAX_DAYS: usize = 3;
const OFFER_MAX_TIMES: usize = 4;

/// Outcomes recovered inside the turn. The caller is re-prompted and the
/// stage does not advance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "field", rename_all = "snake_case")]
pub enum Reprompt {
    ClassificationAmbiguous,
    SlotUnavailable,
    MalformedIdentity(IdentityField),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IdentityField {
    Name,
    Dob,
}

#[derive(Debug, Clone, Serialize)]
pub struct TurnReply {
    pub session_id: String,
    pub response_text: String,
    pub stage: Stage,
    pub intent: Intent,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reprompt: Option<Reprompt>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub booking: Option<Booking>,
}

/// What one dispatch step decided, before it is recorded on the session.
struct Step {
    text: String,
    reprompt: Option<Reprompt>,
    booking: Option<Booking>,
}

impl Step {
    fn say(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            reprompt: None,
            booking: None,
        }
    }

    fn reprompt(kind: Reprompt, text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            reprompt: Some(kind),
            booking: None,
        }
    }
}

/// Drives each caller from symptoms to a committed booking.
///
/// Holds no conversation state of its own: every turn loads the session,
/// decides, and writes it back. Turns for one session are serialized through
/// [`SessionLocks`]; different sessions only meet at the ledger's `reserve`.
pub struct ConversationOrchestrator {
    catalog: Arc<ServiceCatalog>,
    ledger: Arc<dyn AvailabilityLedger>,
    bookings: Arc<dyn BookingStore>,
    sessions: Arc<dyn SessionStore>,
    classifier: Arc<dyn IntentClassifier>,
    clock: Arc<dyn Clock>,
    locks: SessionLocks,
    clinic_name: String,
    window_days: u32,
}

impl ConversationOrchestrator {
    pub fn new(
        catalog: Arc<ServiceCatalog>,
        ledger: Arc<dyn AvailabilityLedger>,
        bookings: Arc<dyn BookingStore>,
        sessions: Arc<dyn SessionStore>,
        classifier: Arc<dyn IntentClassifier>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            catalog,
            ledger,
            bookings,
            sessions,
            classifier,
            clock,
            locks: SessionLocks::new(),
            clinic_name: "the clinic".to_string(),
            window_days: 7,
        }
    }

    pub fn with_clinic_name(mut self, name: impl Into<String>) -> Self {
        self.clinic_name = name.into();
        self
    }

    pub fn with_window_days(mut self, days: u32) -> Self {
        self.window_days = days.max(1);
        self
    }

    pub fn greeting(&self) -> String {
        format!(
            "Thank you for calling {}. How can I help you today? You can describe your symptoms or ask which services we offer.",
            self.clinic_name
        )
    }

    // ── Session lifecycle ──

    pub fn create_session(&self) -> Result<Session, AppError> {
        let mut session = self.sessions.create()?;
        session.push_message("assistant", &self.greeting());
        self.sessions.put(&session)?;
        tracing::info!(session_id = %session.session_id, "session created");
        Ok(session)
    }

    pub fn get_session(&self, session_id: &str) -> Result<Session, AppError> {
        self.sessions
            .get(session_id)?
            .ok_or_else(|| AppError::UnknownSession(session_id.to_string()))
    }

    /// Explicit restart: gathered fields are dropped, history is kept.
    pub async fn reset(&self, session_id: &str) -> Result<TurnReply, AppError> {
        let _guard = self.locks.acquire(session_id).await;
        let mut session = self.get_session(session_id)?;
        session.restart();
        let text = self.greeting();
        session.push_message("assistant", &text);
        session.last_activity = self.clock.now();
        self.sessions.put(&session)?;

        tracing::info!(session_id, "session reset");
        Ok(TurnReply {
            session_id: session.session_id,
            response_text: text,
            stage: session.stage,
            intent: Intent::Restart,
            reprompt: None,
            booking: None,
        })
    }

    /// Marks the session ABANDONED. Terminal sessions are left as they are.
    pub async fn abandon(&self, session_id: &str) -> Result<Session, AppError> {
        let _guard = self.locks.acquire(session_id).await;
        let mut session = self.get_session(session_id)?;
        if !session.stage.is_terminal() {
            session.stage = Stage::Abandoned;
            session.last_activity = self.clock.now();
            self.sessions.put(&session)?;
            tracing::info!(session_id, "session abandoned");
        }
        Ok(session)
    }

    /// Abandons every session idle for longer than `timeout`.
    pub fn abandon_idle(&self, timeout: Duration) -> Result<usize, AppError> {
        let cutoff = self.clock.now() - timeout;
        let count = self.sessions.abandon_idle(cutoff)?;
        self.locks.prune();
        Ok(count)
    }

    // ── Read-only surface ──

    pub fn list_services(&self) -> &[Service] {
        self.catalog.all()
    }

    pub fn get_service(&self, id: &str) -> Result<&Service, AppError> {
        self.catalog
            .get(id)
            .ok_or_else(|| AppError::NotFound(format!("service {id}")))
    }

    pub fn list_open_slots(&self, from_date: Option<NaiveDate>, days: Option<u32>) -> Result<OpenSlots, AppError> {
        let from = from_date.unwrap_or_else(|| self.clock.today());
        let days = days.unwrap_or(self.window_days);
        if days == 0 || days > 90 {
            return Err(AppError::BadRequest("days must be between 1 and 90".to_string()));
        }
        Ok(self.ledger.query_open(from, days)?)
    }

    pub fn get_booking(&self, id: &str) -> Result<Booking, AppError> {
        self.bookings
            .get(id)?
            .ok_or_else(|| AppError::NotFound(format!("booking {id}")))
    }

    pub fn bookings_for_session(&self, session_id: &str) -> Result<Vec<Booking>, AppError> {
        self.get_session(session_id)?;
        Ok(self.bookings.for_session(session_id)?)
    }

    // ── Turns ──

    /// Runs one caller utterance through the state machine.
    ///
    /// Nothing is written back unless the whole turn succeeds, so a storage
    /// failure leaves the session as it was and the caller can simply retry.
    pub async fn handle_turn(&self, session_id: &str, utterance: &str) -> Result<TurnReply, AppError> {
        let _guard = self.locks.acquire(session_id).await;
        let mut session = self.get_session(session_id)?;

        let intent = self.classifier.classify(utterance, &session);
        let from_stage = session.stage;
        session.push_message("user", utterance);

        let step = self.dispatch(&mut session, intent, utterance)?;

        if let Some(reprompt) = step.reprompt {
            tracing::info!(
                session_id,
                stage = session.stage.as_str(),
                reprompt = ?reprompt,
                "re-prompting caller"
            );
        }
        tracing::info!(
            session_id,
            intent = intent.as_str(),
            from = from_stage.as_str(),
            to = session.stage.as_str(),
            "turn handled"
        );

        session.push_message("assistant", &step.text);
        session.last_activity = self.clock.now();
        if let Err(e) = self.sessions.put(&session) {
            if let Some(booking) = &step.booking {
                tracing::error!(session_id, booking_id = %booking.id, error = %e, "booking committed but session save failed");
            }
            return Err(e.into());
        }

        Ok(TurnReply {
            session_id: session.session_id,
            response_text: step.text,
            stage: session.stage,
            intent,
            reprompt: step.reprompt,
            booking: step.booking,
        })
    }

    fn dispatch(&self, session: &mut Session, intent: Intent, utterance: &str) -> Result<Step, AppError> {
        let step = match (session.stage, intent) {
            (_, Intent::Restart) => {
                session.restart();
                Step::say(format!("No problem, let's start over. {}", self.stage_prompt(session)))
            }
            (Stage::Confirmed, _) => self.restate_booking(session)?,
            (Stage::Abandoned, _) => Step::say(
                "This call has ended. Please call again or say 'start over' to begin a new booking.",
            ),
            (_, Intent::ServiceInquiry) => {
                let listing = self
                    .catalog
                    .all()
                    .iter()
                    .map(Service::summary)
                    .collect::<Vec<_>>()
                    .join("; ");
                Step::say(format!("We offer: {listing}. {}", self.stage_prompt(session)))
            }
            (Stage::Greeting, Intent::Greeting) => Step::say(format!(
                "Hello! You've reached {}. What brings you in today?",
                self.clinic_name
            )),
            (Stage::Greeting | Stage::SymptomIntake | Stage::ServiceProposed, Intent::Symptoms) => {
                self.propose_from_symptoms(session, utterance)
            }
            (Stage::Greeting | Stage::SymptomIntake, Intent::BookAppointment) => {
                match self.catalog.find_by_name(utterance) {
                    Some(service) => self.propose(session, service, false),
                    None => {
                        session.stage = Stage::SymptomIntake;
                        Step::say("Of course. To find the right service, could you tell me what symptoms you're experiencing?")
                    }
                }
            }
            (Stage::ServiceProposed, Intent::Decline) => {
                session.stage = Stage::SymptomIntake;
                Step::say("Understood. Could you tell me a bit more about your symptoms so I can find a better match?")
            }
            (Stage::ServiceProposed, Intent::Confirm) => self.offer_slots(session)?,
            (Stage::ServiceProposed, Intent::ProvideSlot) => {
                session.stage = Stage::SlotSelection;
                self.select_slot(session, utterance)?
            }
            (Stage::SlotSelection, Intent::ProvideSlot) => self.select_slot(session, utterance)?,
            (Stage::SlotSelection, Intent::Confirm) => match session.proposed_slot.clone() {
                Some(slot) => self.try_slot(session, slot)?,
                None => self.ambiguous(session),
            },
            (Stage::IdentityCollection, Intent::ProvideIdentity | Intent::Confirm) => {
                self.collect_identity(session, utterance)?
            }
            _ => self.ambiguous(session),
        };
        Ok(step)
    }

    fn ambiguous(&self, session: &Session) -> Step {
        Step::reprompt(
            Reprompt::ClassificationAmbiguous,
            format!("Sorry, I didn't quite catch that. {}", self.stage_prompt(session)),
        )
    }

    /// The question that moves the current stage forward.
    fn stage_prompt(&self, session: &Session) -> String {
        let info = &session.extracted_info;
        match session.stage {
            Stage::Greeting => "How can I help you today? You can describe your symptoms or ask which services we offer.".to_string(),
            Stage::SymptomIntake => "Could you describe your symptoms in a bit more detail?".to_string(),
            Stage::ServiceProposed => {
                let name = self
                    .selected_service(session)
                    .map(|s| s.name.as_str())
                    .unwrap_or("this service");
                format!("Would you like to book the {name}?")
            }
            Stage::SlotSelection => match &session.proposed_slot {
                Some(slot) => format!(
                    "Which day and time would suit you? The earliest opening is {}.",
                    slot.to_human_readable()
                ),
                None => "Which day and time would suit you? For example, 'January 5th at 10am'.".to_string(),
            },
            Stage::IdentityCollection => match (&info.patient_name, &info.dob) {
                (None, None) => "May I have your full name and date of birth?".to_string(),
                (None, Some(_)) => "May I have your full name?".to_string(),
                (Some(_), None) => "And what is your date of birth?".to_string(),
                (Some(_), Some(_)) => "Shall I confirm the booking?".to_string(),
            },
            Stage::Confirmed => "Your booking is confirmed.".to_string(),
            Stage::Abandoned => "This call has ended.".to_string(),
        }
    }

    fn selected_service(&self, session: &Session) -> Option<&Service> {
        session
            .extracted_info
            .service_id
            .as_deref()
            .and_then(|id| self.catalog.get(id))
    }

    // ── Service matching ──

    fn propose_from_symptoms(&self, session: &mut Session, utterance: &str) -> Step {
        let earlier = session.extracted_info.symptoms.join(" ");
        session.extracted_info.add_symptoms([utterance.trim().to_string()]);

        // Fresh detail decides; earlier turns only help when it matches nothing.
        let found = match self.catalog.best_match(utterance) {
            Some(m) if m.fallback && !earlier.is_empty() => self
                .catalog
                .best_match(&format!("{earlier} {utterance}"))
                .or(Some(m)),
            other => other,
        };

        match found {
            Some(m) => {
                tracing::info!(
                    session_id = %session.session_id,
                    service_id = %m.service.id,
                    score = m.score,
                    fallback = m.fallback,
                    "service matched"
                );
                self.propose(session, m.service, m.fallback)
            }
            None => {
                session.stage = Stage::SymptomIntake;
                Step::say("I'm sorry you're not feeling well. Could you tell me a bit more about your symptoms?")
            }
        }
    }

    fn propose(&self, session: &mut Session, service: &Service, fallback: bool) -> Step {
        session.extracted_info.service_id = Some(service.id.clone());
        session.stage = Stage::ServiceProposed;

        let lead = if fallback {
            format!(
                "I'd suggest starting with our {}; the doctor can refer you on if needed.",
                service.summary()
            )
        } else {
            format!("Based on what you've told me, I'd recommend our {}.", service.summary())
        };
        let mut text = lead;
        if !service.description.is_empty() {
            text.push(' ');
            text.push_str(&service.description);
        }
        text.push_str(" Would you like to book an appointment?");
        Step::say(text)
    }

    // ── Slot negotiation ──

    fn offer_slots(&self, session: &mut Session) -> Result<Step, AppError> {
        session.stage = Stage::SlotSelection;
        let today = self.clock.today();
        let open = self.ledger.query_open(today, self.window_days)?;
        session.proposed_slot = earliest(&open);

        let service = self
            .selected_service(session)
            .map(|s| s.name.clone())
            .unwrap_or_else(|| "appointment".to_string());

        if open.is_empty() {
            return Ok(Step::say(format!(
                "I'm sorry, there are no openings for the {service} in the next {} days. Is there a later date that would work?",
                self.window_days
            )));
        }
        Ok(Step::say(format!(
            "Great, let's book your {service}. Our next openings are {}. {}",
            describe_open_slots(&open, OFFER_MAX_DAYS, OFFER_MAX_TIMES),
            self.stage_prompt(session)
        )))
    }

    fn select_slot(&self, session: &mut Session, utterance: &str) -> Result<Step, AppError> {
        let today = self.clock.today();
        match slot_parser::parse_slot(utterance, today) {
            SlotParse::Slot(slot) => self.try_slot(session, slot),
            SlotParse::DateOnly(date) => self.offer_day(session, date),
            SlotParse::TimeOnly(time) => {
                let day = session.proposed_slot.as_ref().and_then(|s| s.naive_date());
                match day {
                    Some(day) => self.try_slot(session, SlotKey::new(day, time)),
                    None => Ok(Step::reprompt(
                        Reprompt::ClassificationAmbiguous,
                        "Which day would you like that time on?",
                    )),
                }
            }
            SlotParse::Invalid => Ok(Step::reprompt(
                Reprompt::ClassificationAmbiguous,
                format!(
                    "Sorry, I couldn't work out a date and time from that. {}",
                    self.stage_prompt(session)
                ),
            )),
        }
    }

    /// A date without a time: read back that day's free times.
    fn offer_day(&self, session: &mut Session, date: NaiveDate) -> Result<Step, AppError> {
        let day = date.format("%A, %B %-d");
        let open = self.ledger.query_open(date, 1)?;
        match open.values().next().filter(|times| !times.is_empty()) {
            Some(times) => {
                session.proposed_slot = earliest(&open);
                Ok(Step::say(format!(
                    "On {day} we have {}. Which time would you like?",
                    times.join(", ")
                )))
            }
            None => Ok(Step::reprompt(
                Reprompt::SlotUnavailable,
                format!("I'm sorry, we have no openings on {day}. {}", self.reoffer(session)?),
            )),
        }
    }

    /// Validates a concrete slot. A free slot moves the caller on; the slot
    /// is only reserved at commit.
    fn try_slot(&self, session: &mut Session, slot: SlotKey) -> Result<Step, AppError> {
        let when = slot.to_human_readable();
        if slot.naive_date().map_or(true, |d| d < self.clock.today()) {
            return Ok(Step::reprompt(
                Reprompt::SlotUnavailable,
                format!("{when} is in the past. {}", self.reoffer(session)?),
            ));
        }

        match self.ledger.slot_state(&slot)? {
            Some(true) => {
                session.extracted_info.set_slot(&slot);
                session.proposed_slot = None;
                session.stage = Stage::IdentityCollection;

                // Identity may already be known, e.g. after losing a race.
                if session.extracted_info.has_identity() {
                    return self.commit(session);
                }
                Ok(Step::say(format!(
                    "{when} is available. {}",
                    self.stage_prompt(session)
                )))
            }
            Some(false) => Ok(Step::reprompt(
                Reprompt::SlotUnavailable,
                format!("I'm sorry, {when} is already taken. {}", self.reoffer(session)?),
            )),
            None => Ok(Step::reprompt(
                Reprompt::SlotUnavailable,
                format!("We don't have an appointment at {when}. {}", self.reoffer(session)?),
            )),
        }
    }

    /// Re-reads the ledger so a slot that was just taken is never offered again.
    fn reoffer(&self, session: &mut Session) -> Result<String, AppError> {
        session.stage = Stage::SlotSelection;
        let open = self.ledger.query_open(self.clock.today(), self.window_days)?;
        session.proposed_slot = earliest(&open);
        if open.is_empty() {
            return Ok(format!(
                "There are no other openings in the next {} days.",
                self.window_days
            ));
        }
        Ok(format!(
            "Available times are {}. Which would you like?",
            describe_open_slots(&open, OFFER_MAX_DAYS, OFFER_MAX_TIMES)
        ))
    }

    // ── Identity and commit ──

    fn collect_identity(&self, session: &mut Session, utterance: &str) -> Result<Step, AppError> {
        let found = identity::extract(utterance, self.clock.today());
        let info = &mut session.extracted_info;

        if let Some((name, confidence)) = found.name.clone() {
            if !info.offer_patient_name(name, confidence) {
                tracing::debug!(session_id = %session.session_id, "kept earlier, more certain name");
            }
        }

        match found.dob {
            DobOutcome::Valid(date) => {
                info.offer_dob(date.format("%Y-%m-%d").to_string(), Confidence::Explicit);
            }
            DobOutcome::Malformed => {
                let lead = match &info.patient_name {
                    Some(name) if found.name.is_some() => format!("Thanks, {name}. "),
                    _ => String::new(),
                };
                return Ok(Step::reprompt(
                    Reprompt::MalformedIdentity(IdentityField::Dob),
                    format!("{lead}I couldn't understand that date of birth. Could you say it again, for example 'March 14, 1990'?"),
                ));
            }
            DobOutcome::Absent => {}
        }

        if session.extracted_info.has_identity() {
            return self.commit(session);
        }

        let missing = if session.extracted_info.patient_name.is_none() {
            IdentityField::Name
        } else {
            IdentityField::Dob
        };
        let prompt = self.stage_prompt(session);
        if found.is_empty() {
            return Ok(Step::reprompt(
                Reprompt::MalformedIdentity(missing),
                format!("Sorry, I didn't get that. {prompt}"),
            ));
        }
        Ok(Step::say(match &session.extracted_info.patient_name {
            Some(name) => format!("Thank you, {name}. {prompt}"),
            None => format!("Thank you. {prompt}"),
        }))
    }

    /// Reserve, then record. A failed record releases the reservation before
    /// the error is returned, so no slot stays taken without a booking. A turn
    /// retried after its session save failed finds its own booking and
    /// confirms it again.
    fn commit(&self, session: &mut Session) -> Result<Step, AppError> {
        let info = session.extracted_info.clone();
        let Some(slot) = info.slot() else {
            session.stage = Stage::SlotSelection;
            return Ok(self.ambiguous(session));
        };
        let Some(service) = self.selected_service(session).cloned() else {
            session.stage = Stage::SymptomIntake;
            return Ok(Step::say(
                "Before I book, which service would you like? Could you describe your symptoms?",
            ));
        };
        let (Some(patient_name), Some(dob)) = (info.patient_name, info.dob) else {
            return Ok(self.ambiguous(session));
        };

        let already_booked = self
            .bookings
            .for_session(&session.session_id)?
            .into_iter()
            .find(|b| b.slot() == slot);
        if let Some(booking) = already_booked {
            tracing::warn!(session_id = %session.session_id, booking_id = %booking.id, "slot already booked by this session");
            return Ok(self.confirm(session, &service, booking));
        }

        if !self.ledger.reserve(&slot)? {
            tracing::warn!(session_id = %session.session_id, slot = %slot, "slot lost to another caller");
            session.extracted_info.clear_slot();
            let reoffer = self.reoffer(session)?;
            return Ok(Step::reprompt(
                Reprompt::SlotUnavailable,
                format!(
                    "I'm sorry, {} was just taken by another caller. {reoffer}",
                    slot.to_human_readable()
                ),
            ));
        }

        let request = BookingRequest {
            session_id: session.session_id.clone(),
            patient_name,
            dob,
            service_id: service.id.clone(),
            service_name: service.name.clone(),
            price: service.price,
            slot: slot.clone(),
        };

        let booking = match self.bookings.create(request) {
            Ok(booking) => booking,
            Err(e) => {
                tracing::error!(session_id = %session.session_id, slot = %slot, error = %e, "booking write failed, releasing slot");
                if let Err(release_err) = self.ledger.release(&slot) {
                    tracing::error!(slot = %slot, error = %release_err, "compensating release failed");
                }
                return Err(AppError::SlotReservedButBookingFailed {
                    slot: slot.to_string(),
                });
            }
        };

        tracing::info!(session_id = %session.session_id, booking_id = %booking.id, slot = %slot, "booking confirmed");
        Ok(self.confirm(session, &service, booking))
    }

    fn confirm(&self, session: &mut Session, service: &Service, booking: Booking) -> Step {
        session.booking_id = Some(booking.id.clone());
        session.stage = Stage::Confirmed;

        let mut text = format!(
            "You're all set, {}. Your {} is booked for {}. The price is €{:.0} and your booking reference is {}.",
            booking.patient_name,
            service.name,
            booking.slot().to_human_readable(),
            booking.price,
            booking.id
        );
        if let Some(prep) = &service.preparation {
            text.push_str(&format!(" Please note: {prep}"));
        }

        Step {
            text,
            reprompt: None,
            booking: Some(booking),
        }
    }

    fn restate_booking(&self, session: &Session) -> Result<Step, AppError> {
        let booking = match &session.booking_id {
            Some(id) => self.bookings.get(id)?,
            None => None,
        };
        Ok(match booking {
            Some(b) => Step::say(format!(
                "Your {} is booked for {} under reference {}. Say 'start over' if you'd like to book something else.",
                b.service_name,
                b.slot().to_human_readable(),
                b.id
            )),
            None => Step::say("Your booking is confirmed. Say 'start over' if you'd like to book something else."),
        })
    }
}

fn earliest(open: &OpenSlots) -> Option<SlotKey> {
    open.iter().find_map(|(date, times)| {
        times.first().map(|time| SlotKey {
            date: date.clone(),
            time: time.clone(),
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::SqliteStore;
    use crate::services::classifier::RuleClassifier;
    use crate::services::clock::FixedClock;
    use std::sync::atomic::{AtomicBool, Ordering};

    // A Friday.
    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 10, 16).unwrap()
    }

    fn slot(date: &str, time: &str) -> SlotKey {
        SlotKey::parse(date, time).unwrap()
    }

    fn desk_with(store: SqliteStore, bookings: Arc<dyn BookingStore>) -> ConversationOrchestrator {
        let catalog = Arc::new(ServiceCatalog::builtin());
        let store = Arc::new(store);
        ConversationOrchestrator::new(
            Arc::clone(&catalog),
            store.clone(),
            bookings,
            store,
            Arc::new(RuleClassifier::new(catalog)),
            Arc::new(FixedClock(today())),
        )
        .with_clinic_name("MedCare Clinic")
    }

    fn seeded_store() -> SqliteStore {
        let store = SqliteStore::open(":memory:").unwrap();
        store
            .seed_slots(&[
                (slot("2026-10-19", "09:00"), true),
                (slot("2026-10-19", "10:00"), true),
                (slot("2026-10-20", "14:00"), true),
                (slot("2027-01-05", "10:00"), true),
                (slot("2027-01-05", "11:00"), false),
            ])
            .unwrap();
        store
    }

    fn desk() -> (ConversationOrchestrator, SqliteStore) {
        let store = seeded_store();
        (desk_with(store.clone(), Arc::new(store.clone())), store)
    }

    struct FailingBookings;

    impl BookingStore for FailingBookings {
        fn create(&self, _request: BookingRequest) -> anyhow::Result<Booking> {
            anyhow::bail!("disk full")
        }

        fn get(&self, _id: &str) -> anyhow::Result<Option<Booking>> {
            Ok(None)
        }

        fn for_session(&self, _session_id: &str) -> anyhow::Result<Vec<Booking>> {
            Ok(vec![])
        }
    }

    /// Session store whose saves can be made to fail.
    struct FlakySessions {
        inner: SqliteStore,
        fail_puts: AtomicBool,
    }

    impl SessionStore for FlakySessions {
        fn create(&self) -> anyhow::Result<Session> {
            SessionStore::create(&self.inner)
        }

        fn get(&self, session_id: &str) -> anyhow::Result<Option<Session>> {
            SessionStore::get(&self.inner, session_id)
        }

        fn put(&self, session: &Session) -> anyhow::Result<()> {
            if self.fail_puts.load(Ordering::SeqCst) {
                anyhow::bail!("database is locked");
            }
            SessionStore::put(&self.inner, session)
        }

        fn abandon_idle(&self, cutoff: chrono::NaiveDateTime) -> anyhow::Result<usize> {
            SessionStore::abandon_idle(&self.inner, cutoff)
        }
    }

    /// Drives a session up to IDENTITY_COLLECTION for the given slot.
    async fn to_identity(desk: &ConversationOrchestrator, when: &str) -> String {
        let id = desk.create_session().unwrap().session_id;
        desk.handle_turn(&id, "I have heart problems").await.unwrap();
        desk.handle_turn(&id, "yes please").await.unwrap();
        let reply = desk.handle_turn(&id, when).await.unwrap();
        assert_eq!(reply.stage, Stage::IdentityCollection, "{}", reply.response_text);
        id
    }

    #[tokio::test]
    async fn test_full_scripted_conversation_books_once() {
        let (desk, store) = desk();
        let id = desk.create_session().unwrap().session_id;

        let reply = desk.handle_turn(&id, "I have heart problems").await.unwrap();
        assert_eq!(reply.intent, Intent::Symptoms);
        assert_eq!(reply.stage, Stage::ServiceProposed);
        assert!(reply.response_text.contains("Cardiology"));

        let reply = desk.handle_turn(&id, "yes").await.unwrap();
        assert_eq!(reply.stage, Stage::SlotSelection);
        assert!(reply.response_text.contains("Monday, October 19"));

        let reply = desk.handle_turn(&id, "January 5th at 10:00 AM").await.unwrap();
        assert_eq!(reply.stage, Stage::IdentityCollection);
        let session = desk.get_session(&id).unwrap();
        assert_eq!(session.extracted_info.date.as_deref(), Some("2027-01-05"));
        assert_eq!(session.extracted_info.time.as_deref(), Some("10:00"));

        let reply = desk
            .handle_turn(&id, "My name is Jane Doe, born March 14, 1990")
            .await
            .unwrap();
        assert_eq!(reply.stage, Stage::Confirmed);
        let booking = reply.booking.unwrap();
        assert_eq!(booking.patient_name, "Jane Doe");
        assert_eq!(booking.dob, "1990-03-14");
        assert_eq!(booking.service_id, "cardiology_consultation");
        assert_eq!(booking.slot(), slot("2027-01-05", "10:00"));

        assert_eq!(store.all_bookings().unwrap().len(), 1);
        assert_eq!(store.slot_state(&slot("2027-01-05", "10:00")).unwrap(), Some(false));
        let session = desk.get_session(&id).unwrap();
        assert_eq!(session.stage, Stage::Confirmed);
        assert_eq!(session.booking_id.as_deref(), Some(booking.id.as_str()));
    }

    #[tokio::test]
    async fn test_taken_slot_keeps_slot_selection() {
        let (desk, store) = desk();
        let id = desk.create_session().unwrap().session_id;
        desk.handle_turn(&id, "I have heart problems").await.unwrap();
        desk.handle_turn(&id, "yes").await.unwrap();

        // Someone else takes it between offer and selection.
        assert!(store.reserve(&slot("2026-10-19", "09:00")).unwrap());

        let reply = desk.handle_turn(&id, "Monday at 9am").await.unwrap();
        assert_eq!(reply.stage, Stage::SlotSelection);
        assert_eq!(reply.reprompt, Some(Reprompt::SlotUnavailable));
        assert!(reply.response_text.contains("already taken"));
        // The re-offer comes from a fresh query.
        let session = desk.get_session(&id).unwrap();
        assert_eq!(session.proposed_slot, Some(slot("2026-10-19", "10:00")));
        assert!(session.extracted_info.date.is_none());
    }

    #[tokio::test]
    async fn test_race_lost_at_commit_returns_to_slot_selection() {
        let (desk, store) = desk();
        let id = to_identity(&desk, "Monday at 10am").await;

        assert!(store.reserve(&slot("2026-10-19", "10:00")).unwrap());

        let reply = desk
            .handle_turn(&id, "My name is Jane Doe, born 1990-03-14")
            .await
            .unwrap();
        assert_eq!(reply.stage, Stage::SlotSelection);
        assert_eq!(reply.reprompt, Some(Reprompt::SlotUnavailable));
        assert!(reply.booking.is_none());
        let offered = reply.response_text.split("Available times").nth(1).unwrap();
        assert!(!offered.contains("10:00"));

        // Identity survives; picking another slot commits straight away.
        let reply = desk.handle_turn(&id, "Tuesday at 2pm").await.unwrap();
        assert_eq!(reply.stage, Stage::Confirmed);
        assert_eq!(reply.booking.unwrap().patient_name, "Jane Doe");
    }

    #[tokio::test]
    async fn test_two_sessions_racing_for_one_slot() {
        let (desk, store) = desk();
        let a = to_identity(&desk, "Monday at 9am").await;
        let b = to_identity(&desk, "Monday at 9am").await;

        let ra = desk.handle_turn(&a, "My name is Ann Lee, born 1980-01-02").await.unwrap();
        let rb = desk.handle_turn(&b, "My name is Bob Ray, born 1981-02-03").await.unwrap();

        let confirmed = [&ra, &rb].iter().filter(|r| r.stage == Stage::Confirmed).count();
        assert_eq!(confirmed, 1);
        assert_eq!(store.all_bookings().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_corrected_dob_keeps_name() {
        let (desk, _store) = desk();
        let id = to_identity(&desk, "Monday at 9am").await;

        let reply = desk
            .handle_turn(&id, "My name is Jane Doe, born 1990-02-30")
            .await
            .unwrap();
        assert_eq!(reply.stage, Stage::IdentityCollection);
        assert_eq!(
            reply.reprompt,
            Some(Reprompt::MalformedIdentity(IdentityField::Dob))
        );
        let session = desk.get_session(&id).unwrap();
        assert_eq!(session.extracted_info.patient_name.as_deref(), Some("Jane Doe"));
        assert!(session.extracted_info.dob.is_none());

        let reply = desk.handle_turn(&id, "It's March 14, 1990").await.unwrap();
        assert_eq!(reply.stage, Stage::Confirmed);
        let booking = reply.booking.unwrap();
        assert_eq!(booking.patient_name, "Jane Doe");
        assert_eq!(booking.dob, "1990-03-14");
    }

    #[tokio::test]
    async fn test_identity_across_turns() {
        let (desk, _store) = desk();
        let id = to_identity(&desk, "Monday at 9am").await;

        let reply = desk.handle_turn(&id, "my name is jane doe").await.unwrap();
        assert_eq!(reply.stage, Stage::IdentityCollection);
        assert!(reply.response_text.contains("date of birth"));

        let reply = desk.handle_turn(&id, "03/14/1990").await.unwrap();
        assert_eq!(reply.stage, Stage::Confirmed);
        assert_eq!(reply.booking.unwrap().patient_name, "Jane Doe");
    }

    #[tokio::test]
    async fn test_failed_booking_write_releases_slot() {
        let store = seeded_store();
        let desk = desk_with(store.clone(), Arc::new(FailingBookings));
        let id = to_identity(&desk, "Monday at 9am").await;

        let err = desk
            .handle_turn(&id, "My name is Jane Doe, born 1990-03-14")
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::SlotReservedButBookingFailed { .. }));
        assert_eq!(store.slot_state(&slot("2026-10-19", "09:00")).unwrap(), Some(true));

        // Nothing from the failed turn was saved.
        let session = desk.get_session(&id).unwrap();
        assert_eq!(session.stage, Stage::IdentityCollection);
        assert!(session.extracted_info.patient_name.is_none());
    }

    #[tokio::test]
    async fn test_retry_after_failed_session_save_keeps_one_booking() {
        let store = seeded_store();
        let catalog = Arc::new(ServiceCatalog::builtin());
        let sessions = Arc::new(FlakySessions {
            inner: store.clone(),
            fail_puts: AtomicBool::new(false),
        });
        let desk = ConversationOrchestrator::new(
            Arc::clone(&catalog),
            Arc::new(store.clone()),
            Arc::new(store.clone()),
            sessions.clone(),
            Arc::new(RuleClassifier::new(catalog)),
            Arc::new(FixedClock(today())),
        );
        let id = to_identity(&desk, "Monday at 9am").await;

        sessions.fail_puts.store(true, Ordering::SeqCst);
        let err = desk
            .handle_turn(&id, "My name is Jane Doe, born 1990-03-14")
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Storage(_)));
        assert_eq!(desk.get_session(&id).unwrap().stage, Stage::IdentityCollection);

        sessions.fail_puts.store(false, Ordering::SeqCst);
        let reply = desk
            .handle_turn(&id, "My name is Jane Doe, born 1990-03-14")
            .await
            .unwrap();
        assert_eq!(reply.stage, Stage::Confirmed);
        assert_eq!(reply.reprompt, None);

        let bookings = store.all_bookings().unwrap();
        assert_eq!(bookings.len(), 1);
        assert_eq!(reply.booking.unwrap().id, bookings[0].id);
        assert_eq!(desk.get_session(&id).unwrap().booking_id, Some(bookings[0].id.clone()));
    }

    #[tokio::test]
    async fn test_impossible_date_reprompts_in_slot_selection() {
        let (desk, _store) = desk();
        let id = desk.create_session().unwrap().session_id;
        desk.handle_turn(&id, "I have heart problems").await.unwrap();
        desk.handle_turn(&id, "yes").await.unwrap();

        let reply = desk.handle_turn(&id, "February 30th at 10am").await.unwrap();
        assert_eq!(reply.stage, Stage::SlotSelection);
        assert_eq!(reply.reprompt, Some(Reprompt::ClassificationAmbiguous));
        let session = desk.get_session(&id).unwrap();
        assert!(session.extracted_info.date.is_none());
        assert!(session.extracted_info.time.is_none());
    }

    #[tokio::test]
    async fn test_unknown_input_reprompts_without_advancing() {
        let (desk, _store) = desk();
        let id = desk.create_session().unwrap().session_id;
        desk.handle_turn(&id, "I have heart problems").await.unwrap();
        desk.handle_turn(&id, "yes").await.unwrap();

        let reply = desk.handle_turn(&id, "hmm let me think").await.unwrap();
        assert_eq!(reply.stage, Stage::SlotSelection);
        assert_eq!(reply.reprompt, Some(Reprompt::ClassificationAmbiguous));
    }

    #[tokio::test]
    async fn test_date_only_lists_that_day() {
        let (desk, _store) = desk();
        let id = desk.create_session().unwrap().session_id;
        desk.handle_turn(&id, "I have heart problems").await.unwrap();
        desk.handle_turn(&id, "yes").await.unwrap();

        let reply = desk.handle_turn(&id, "what about Monday").await.unwrap();
        assert_eq!(reply.stage, Stage::SlotSelection);
        assert!(reply.response_text.contains("09:00, 10:00"));

        let reply = desk.handle_turn(&id, "10:00 then").await.unwrap();
        assert_eq!(reply.stage, Stage::IdentityCollection);
        let session = desk.get_session(&id).unwrap();
        assert_eq!(session.extracted_info.slot(), Some(slot("2026-10-19", "10:00")));
    }

    #[tokio::test]
    async fn test_yes_in_slot_selection_takes_earliest() {
        let (desk, _store) = desk();
        let id = desk.create_session().unwrap().session_id;
        desk.handle_turn(&id, "I have heart problems").await.unwrap();
        desk.handle_turn(&id, "yes").await.unwrap();

        let reply = desk.handle_turn(&id, "yes that works").await.unwrap();
        assert_eq!(reply.stage, Stage::IdentityCollection);
        let session = desk.get_session(&id).unwrap();
        assert_eq!(session.extracted_info.slot(), Some(slot("2026-10-19", "09:00")));
    }

    #[tokio::test]
    async fn test_decline_goes_back_to_intake() {
        let (desk, _store) = desk();
        let id = desk.create_session().unwrap().session_id;
        desk.handle_turn(&id, "I have heart problems").await.unwrap();

        let reply = desk.handle_turn(&id, "no, something else").await.unwrap();
        assert_eq!(reply.stage, Stage::SymptomIntake);

        let reply = desk.handle_turn(&id, "actually it's a rash on my arm").await.unwrap();
        assert_eq!(reply.stage, Stage::ServiceProposed);
        let session = desk.get_session(&id).unwrap();
        assert_eq!(session.extracted_info.service_id.as_deref(), Some("dermatology"));
        assert_eq!(session.extracted_info.symptoms.len(), 2);
    }

    #[tokio::test]
    async fn test_service_inquiry_keeps_stage() {
        let (desk, _store) = desk();
        let id = desk.create_session().unwrap().session_id;
        let reply = desk.handle_turn(&id, "What services do you offer?").await.unwrap();
        assert_eq!(reply.stage, Stage::Greeting);
        assert!(reply.response_text.contains("Blood Analysis"));
    }

    #[tokio::test]
    async fn test_restart_clears_extracted_info() {
        let (desk, _store) = desk();
        let id = desk.create_session().unwrap().session_id;
        desk.handle_turn(&id, "I have heart problems").await.unwrap();

        let reply = desk.handle_turn(&id, "can we start over").await.unwrap();
        assert_eq!(reply.stage, Stage::Greeting);
        let session = desk.get_session(&id).unwrap();
        assert!(session.extracted_info.service_id.is_none());
        assert!(session.extracted_info.symptoms.is_empty());
    }

    #[tokio::test]
    async fn test_unknown_session_is_an_error() {
        let (desk, _store) = desk();
        let err = desk.handle_turn("nope", "hello").await.unwrap_err();
        assert!(matches!(err, AppError::UnknownSession(_)));
    }

    #[tokio::test]
    async fn test_abandoned_session_stays_abandoned() {
        let (desk, _store) = desk();
        let id = desk.create_session().unwrap().session_id;
        desk.abandon(&id).await.unwrap();

        let reply = desk.handle_turn(&id, "I have heart problems").await.unwrap();
        assert_eq!(reply.stage, Stage::Abandoned);
        assert!(reply.response_text.contains("ended"));
    }

    #[tokio::test]
    async fn test_confirmed_session_restates_booking() {
        let (desk, _store) = desk();
        let id = to_identity(&desk, "Monday at 9am").await;
        let booked = desk
            .handle_turn(&id, "My name is Jane Doe, born 1990-03-14")
            .await
            .unwrap()
            .booking
            .unwrap();

        let reply = desk.handle_turn(&id, "thanks, bye").await.unwrap();
        assert_eq!(reply.stage, Stage::Confirmed);
        assert!(reply.response_text.contains(&booked.id));
        assert!(reply.booking.is_none());
    }

    #[tokio::test]
    async fn test_booking_a_named_service_directly() {
        let (desk, _store) = desk();
        let id = desk.create_session().unwrap().session_id;
        let reply = desk
            .handle_turn(&id, "I'd like to book a blood analysis")
            .await
            .unwrap();
        assert_eq!(reply.stage, Stage::ServiceProposed);
        let session = desk.get_session(&id).unwrap();
        assert_eq!(session.extracted_info.service_id.as_deref(), Some("blood_analysis"));
    }

    #[test]
    fn test_list_open_slots_validates_days() {
        let (desk, _store) = desk();
        assert!(matches!(
            desk.list_open_slots(None, Some(0)),
            Err(AppError::BadRequest(_))
        ));
        let open = desk.list_open_slots(None, None).unwrap();
        assert_eq!(open.len(), 2);
    }
}
