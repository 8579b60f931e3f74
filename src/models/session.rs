use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use super::SlotKey;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Stage {
    Greeting,
    SymptomIntake,
    ServiceProposed,
    SlotSelection,
    IdentityCollection,
    Confirmed,
    Abandoned,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Greeting => "GREETING",
            Stage::SymptomIntake => "SYMPTOM_INTAKE",
            Stage::ServiceProposed => "SERVICE_PROPOSED",
            Stage::SlotSelection => "SLOT_SELECTION",
            Stage::IdentityCollection => "IDENTITY_COLLECTION",
            Stage::Confirmed => "CONFIRMED",
            Stage::Abandoned => "ABANDONED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "GREETING" => Some(Stage::Greeting),
            "SYMPTOM_INTAKE" => Some(Stage::SymptomIntake),
            "SERVICE_PROPOSED" => Some(Stage::ServiceProposed),
            "SLOT_SELECTION" => Some(Stage::SlotSelection),
            "IDENTITY_COLLECTION" => Some(Stage::IdentityCollection),
            "CONFIRMED" => Some(Stage::Confirmed),
            "ABANDONED" => Some(Stage::Abandoned),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Stage::Confirmed | Stage::Abandoned)
    }
}

/// How sure the extractor was about a field. Ordered: an `Inferred` value
/// never replaces an `Explicit` one.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum Confidence {
    Inferred,
    Explicit,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ExtractedInfo {
    pub service_id: Option<String>,
    pub date: Option<String>,
    pub time: Option<String>,
    pub patient_name: Option<String>,
    pub dob: Option<String>,
    #[serde(default)]
    pub symptoms: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub patient_name_confidence: Option<Confidence>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dob_confidence: Option<Confidence>,
}

impl ExtractedInfo {
    pub fn slot(&self) -> Option<SlotKey> {
        match (&self.date, &self.time) {
            (Some(date), Some(time)) => Some(SlotKey {
                date: date.clone(),
                time: time.clone(),
            }),
            _ => None,
        }
    }

    pub fn set_slot(&mut self, slot: &SlotKey) {
        self.date = Some(slot.date.clone());
        self.time = Some(slot.time.clone());
    }

    pub fn clear_slot(&mut self) {
        self.date = None;
        self.time = None;
    }

    /// Accepts `name` unless a more confident value is already held.
    /// Returns whether the field changed.
    pub fn offer_patient_name(&mut self, name: String, confidence: Confidence) -> bool {
        if accepts(self.patient_name_confidence, confidence) {
            self.patient_name = Some(name);
            self.patient_name_confidence = Some(confidence);
            return true;
        }
        false
    }

    pub fn offer_dob(&mut self, dob: String, confidence: Confidence) -> bool {
        if accepts(self.dob_confidence, confidence) {
            self.dob = Some(dob);
            self.dob_confidence = Some(confidence);
            return true;
        }
        false
    }

    pub fn add_symptoms<I: IntoIterator<Item = String>>(&mut self, symptoms: I) {
        for symptom in symptoms {
            if !self.symptoms.contains(&symptom) {
                self.symptoms.push(symptom);
            }
        }
    }

    pub fn has_identity(&self) -> bool {
        self.patient_name.is_some() && self.dob.is_some()
    }
}

fn accepts(held: Option<Confidence>, offered: Confidence) -> bool {
    held.map_or(true, |held| offered >= held)
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionMessage {
    pub role: String,
    pub content: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub session_id: String,
    pub messages: Vec<SessionMessage>,
    pub extracted_info: ExtractedInfo,
    pub stage: Stage,
    pub booking_id: Option<String>,
    /// Earliest slot read back to the caller; a bare "yes" in SLOT_SELECTION takes it.
    #[serde(default)]
    pub proposed_slot: Option<SlotKey>,
    pub created_at: NaiveDateTime,
    pub last_activity: NaiveDateTime,
}

impl Session {
    pub fn new(session_id: String, now: NaiveDateTime) -> Self {
        Self {
            session_id,
            messages: vec![],
            extracted_info: ExtractedInfo::default(),
            stage: Stage::Greeting,
            booking_id: None,
            proposed_slot: None,
            created_at: now,
            last_activity: now,
        }
    }

    pub fn push_message(&mut self, role: &str, content: &str) {
        self.messages.push(SessionMessage {
            role: role.to_string(),
            content: content.to_string(),
        });
    }

    /// Explicit restart: everything gathered so far is dropped, history is kept.
    pub fn restart(&mut self) {
        self.extracted_info = ExtractedInfo::default();
        self.stage = Stage::Greeting;
        self.booking_id = None;
        self.proposed_slot = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_round_trips_through_str() {
        for stage in [
            Stage::Greeting,
            Stage::SymptomIntake,
            Stage::ServiceProposed,
            Stage::SlotSelection,
            Stage::IdentityCollection,
            Stage::Confirmed,
            Stage::Abandoned,
        ] {
            assert_eq!(Stage::parse(stage.as_str()), Some(stage));
        }
        assert_eq!(Stage::parse("bogus"), None);
    }

    #[test]
    fn test_inferred_name_does_not_overwrite_explicit() {
        let mut info = ExtractedInfo::default();
        assert!(info.offer_patient_name("Jane Doe".into(), Confidence::Explicit));
        assert!(!info.offer_patient_name("Thank You".into(), Confidence::Inferred));
        assert_eq!(info.patient_name.as_deref(), Some("Jane Doe"));
    }

    #[test]
    fn test_explicit_correction_replaces_explicit() {
        let mut info = ExtractedInfo::default();
        info.offer_dob("1990-03-14".into(), Confidence::Explicit);
        assert!(info.offer_dob("1990-04-14".into(), Confidence::Explicit));
        assert_eq!(info.dob.as_deref(), Some("1990-04-14"));
    }

    #[test]
    fn test_symptoms_accumulate_without_duplicates() {
        let mut info = ExtractedInfo::default();
        info.add_symptoms(vec!["chest".to_string(), "pain".to_string()]);
        info.add_symptoms(vec!["pain".to_string(), "dizzy".to_string()]);
        assert_eq!(info.symptoms, vec!["chest", "pain", "dizzy"]);
    }
}
