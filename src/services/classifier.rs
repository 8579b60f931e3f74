//! Rule-based intent classification.
//!
//! The orchestrator only sees the [`IntentClassifier`] trait, so a
//! model-backed classifier can replace [`RuleClassifier`] without touching
//! the state machine.

use std::collections::HashSet;
use std::sync::Arc;

use regex::Regex;

use crate::models::{Intent, Session, Stage};
use crate::services::catalog::{tokenize, ServiceCatalog};
use crate::services::{identity, slot_parser};

/// Maps an utterance plus session context to one discrete intent.
/// Must be deterministic and free of side effects.
pub trait IntentClassifier: Send + Sync {
    fn classify(&self, utterance: &str, session: &Session) -> Intent;
}

/// Words that signal a complaint even when no catalog tag matches.
const SYMPTOM_WORDS: &[&str] = &[
    "pain", "hurt", "hurting", "ache", "aching", "problem", "issue", "sick", "ill", "feel",
    "feeling", "symptom", "sore", "dizzy", "bleeding", "swollen", "worried", "unwell",
];

/// Cue patterns compiled once per classifier.
struct Cues {
    restart: Regex,
    affirm: Regex,
    negative: Regex,
    inquiry: Regex,
    book: Regex,
    greeting: Regex,
}

impl Cues {
    fn new() -> Self {
        Self {
            restart: Regex::new(r"(?i)\b(start over|start again|restart|begin again|from the (?:top|beginning))\b")
                .expect("Invalid restart regex"),
            affirm: Regex::new(
                r"(?i)^\s*(yes|yeah|yep|yup|sure|ok|okay|correct|right|perfect|fine|absolutely|confirm|please do|go ahead|sounds good|that works|that's right|that is right|book it)\b",
            )
            .expect("Invalid affirm regex"),
            negative: Regex::new(
                r"(?i)^\s*(no|nope|nah)\b|\b(not really|don't want|do not want|something else|different service|not that|wrong service)\b",
            )
            .expect("Invalid negative regex"),
            inquiry: Regex::new(
                r"(?i)\b(what services|which services|services do you|what do you (?:offer|have)|list (?:of )?(?:your )?services|how much|price|prices|cost|what kind of)\b",
            )
            .expect("Invalid inquiry regex"),
            book: Regex::new(r"(?i)\b(book|booking|appointment|schedule|reserve|see (?:a|the) doctor)\b")
                .expect("Invalid book regex"),
            greeting: Regex::new(r"(?i)^\s*(hi|hello|hey|good (?:morning|afternoon|evening)|greetings)\b")
                .expect("Invalid greeting regex"),
        }
    }
}

pub struct RuleClassifier {
    catalog: Arc<ServiceCatalog>,
    symptom_vocabulary: HashSet<String>,
    cues: Cues,
}

impl RuleClassifier {
    pub fn new(catalog: Arc<ServiceCatalog>) -> Self {
        let mut symptom_vocabulary = catalog.tag_vocabulary();
        symptom_vocabulary.extend(SYMPTOM_WORDS.iter().map(|w| w.to_string()));
        Self {
            catalog,
            symptom_vocabulary,
            cues: Cues::new(),
        }
    }

    fn mentions_symptoms(&self, utterance: &str) -> bool {
        tokenize(utterance)
            .iter()
            .any(|t| self.symptom_vocabulary.contains(t))
    }

    fn classify_intake(&self, utterance: &str, stage: Stage) -> Intent {
        let c = &self.cues;
        if c.book.is_match(utterance) && self.catalog.find_by_name(utterance).is_some() {
            return Intent::BookAppointment;
        }
        if self.mentions_symptoms(utterance) {
            return Intent::Symptoms;
        }
        if c.inquiry.is_match(utterance) {
            return Intent::ServiceInquiry;
        }
        if c.book.is_match(utterance) {
            return Intent::BookAppointment;
        }
        if c.greeting.is_match(utterance) {
            return Intent::Greeting;
        }
        // Once we've asked what's wrong, any free text is an answer.
        if stage == Stage::SymptomIntake && !c.affirm.is_match(utterance) && !c.negative.is_match(utterance) {
            return Intent::Symptoms;
        }
        Intent::Unknown
    }

    fn classify_proposal(&self, utterance: &str) -> Intent {
        let c = &self.cues;
        if c.negative.is_match(utterance) {
            Intent::Decline
        } else if slot_parser::has_slot_expression(utterance) {
            Intent::ProvideSlot
        } else if c.affirm.is_match(utterance) || c.book.is_match(utterance) {
            Intent::Confirm
        } else if c.inquiry.is_match(utterance) {
            Intent::ServiceInquiry
        } else if self.mentions_symptoms(utterance) {
            Intent::Symptoms
        } else {
            Intent::Unknown
        }
    }

    fn classify_slot(&self, utterance: &str) -> Intent {
        let c = &self.cues;
        if slot_parser::has_slot_expression(utterance) {
            Intent::ProvideSlot
        } else if c.affirm.is_match(utterance) {
            Intent::Confirm
        } else if c.inquiry.is_match(utterance) {
            Intent::ServiceInquiry
        } else {
            Intent::Unknown
        }
    }

    fn classify_identity(&self, utterance: &str) -> Intent {
        let c = &self.cues;
        if identity::has_identity_signal(utterance) {
            Intent::ProvideIdentity
        } else if c.affirm.is_match(utterance) {
            Intent::Confirm
        } else if c.inquiry.is_match(utterance) {
            Intent::ServiceInquiry
        } else {
            Intent::Unknown
        }
    }
}

impl IntentClassifier for RuleClassifier {
    fn classify(&self, utterance: &str, session: &Session) -> Intent {
        let utterance = utterance.trim();
        if utterance.is_empty() {
            return Intent::Unknown;
        }
        if self.cues.restart.is_match(utterance) {
            return Intent::Restart;
        }

        match session.stage {
            Stage::Greeting | Stage::SymptomIntake => self.classify_intake(utterance, session.stage),
            Stage::ServiceProposed => self.classify_proposal(utterance),
            Stage::SlotSelection => self.classify_slot(utterance),
            Stage::IdentityCollection => self.classify_identity(utterance),
            Stage::Confirmed | Stage::Abandoned => Intent::Unknown,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn classifier() -> RuleClassifier {
        RuleClassifier::new(Arc::new(ServiceCatalog::builtin()))
    }

    fn at(stage: Stage) -> Session {
        let now = NaiveDate::from_ymd_opt(2026, 10, 16)
            .unwrap()
            .and_hms_opt(9, 0, 0)
            .unwrap();
        let mut session = Session::new("s".to_string(), now);
        session.stage = stage;
        session
    }

    #[test]
    fn test_heart_problems_at_greeting_is_symptoms() {
        let c = classifier();
        assert_eq!(
            c.classify("I have heart problems", &at(Stage::Greeting)),
            Intent::Symptoms
        );
    }

    #[test]
    fn test_yes_depends_on_stage() {
        let c = classifier();
        assert_eq!(c.classify("yes", &at(Stage::Greeting)), Intent::Unknown);
        assert_eq!(c.classify("yes", &at(Stage::ServiceProposed)), Intent::Confirm);
        assert_eq!(c.classify("yes", &at(Stage::SlotSelection)), Intent::Confirm);
        assert_eq!(c.classify("yes", &at(Stage::IdentityCollection)), Intent::Confirm);
        assert_eq!(c.classify("yes", &at(Stage::Confirmed)), Intent::Unknown);
    }

    #[test]
    fn test_greeting_and_inquiry() {
        let c = classifier();
        assert_eq!(c.classify("Hello there", &at(Stage::Greeting)), Intent::Greeting);
        assert_eq!(
            c.classify("What services do you offer?", &at(Stage::Greeting)),
            Intent::ServiceInquiry
        );
        assert_eq!(
            c.classify("how much does it cost", &at(Stage::SlotSelection)),
            Intent::ServiceInquiry
        );
    }

    #[test]
    fn test_booking_a_named_service() {
        let c = classifier();
        assert_eq!(
            c.classify("I'd like to book a dermatology consultation", &at(Stage::Greeting)),
            Intent::BookAppointment
        );
        assert_eq!(
            c.classify("I want to make an appointment", &at(Stage::Greeting)),
            Intent::BookAppointment
        );
    }

    #[test]
    fn test_free_text_during_intake_is_symptoms() {
        let c = classifier();
        assert_eq!(
            c.classify("my knee clicks when I walk", &at(Stage::SymptomIntake)),
            Intent::Symptoms
        );
        assert_eq!(
            c.classify("my knee clicks when I walk", &at(Stage::Greeting)),
            Intent::Unknown
        );
    }

    #[test]
    fn test_proposal_responses() {
        let c = classifier();
        let s = at(Stage::ServiceProposed);
        assert_eq!(c.classify("no, something else", &s), Intent::Decline);
        assert_eq!(c.classify("tomorrow at 10am", &s), Intent::ProvideSlot);
        assert_eq!(c.classify("please book that", &s), Intent::Confirm);
    }

    #[test]
    fn test_slot_and_identity_stages() {
        let c = classifier();
        assert_eq!(
            c.classify("January 5th at 10:00 AM", &at(Stage::SlotSelection)),
            Intent::ProvideSlot
        );
        assert_eq!(
            c.classify("whenever", &at(Stage::SlotSelection)),
            Intent::Unknown
        );
        assert_eq!(
            c.classify("My name is Jane Doe", &at(Stage::IdentityCollection)),
            Intent::ProvideIdentity
        );
        assert_eq!(
            c.classify("1990-03-14", &at(Stage::IdentityCollection)),
            Intent::ProvideIdentity
        );
    }

    #[test]
    fn test_restart_at_any_stage() {
        let c = classifier();
        for stage in [Stage::SlotSelection, Stage::Confirmed, Stage::Abandoned] {
            assert_eq!(c.classify("let's start over", &at(stage)), Intent::Restart);
        }
    }

    #[test]
    fn test_empty_is_unknown() {
        assert_eq!(classifier().classify("   ", &at(Stage::Greeting)), Intent::Unknown);
    }
}
