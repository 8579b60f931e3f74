use std::collections::HashSet;

use anyhow::Context;

use crate::models::Service;

/// Words that appear in many service names and identify none of them.
const GENERIC_NAME_WORDS: &[&str] = &[
    "consultation",
    "analysis",
    "checkup",
    "practice",
    "visit",
    "appointment",
];

/// Read-only list of offered services, in load order.
#[derive(Debug, Clone)]
pub struct ServiceCatalog {
    services: Vec<Service>,
    default_service_id: Option<String>,
}

/// Outcome of matching a symptom description against service tags.
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceMatch<'a> {
    pub service: &'a Service,
    pub score: usize,
    /// Caller tokens that hit a tag of the chosen service.
    pub matched: Vec<String>,
    /// True when nothing scored and the general-practice default was used.
    pub fallback: bool,
}

impl ServiceCatalog {
    pub fn new(services: Vec<Service>) -> anyhow::Result<Self> {
        let mut seen = HashSet::new();
        for service in &services {
            anyhow::ensure!(!service.id.is_empty(), "service with empty id");
            anyhow::ensure!(
                seen.insert(service.id.clone()),
                "duplicate service id: {}",
                service.id
            );
        }
        Ok(Self {
            services,
            default_service_id: None,
        })
    }

    pub fn from_json(s: &str) -> anyhow::Result<Self> {
        let services: Vec<Service> = serde_json::from_str(s)?;
        Self::new(services)
    }

    pub fn from_json_file(path: &str) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read services file: {path}"))?;
        Self::from_json(&raw).with_context(|| format!("failed to parse services file: {path}"))
    }

    /// Sets the general-practice fallback. Unknown ids are ignored with a warning.
    pub fn with_default(mut self, id: Option<&str>) -> Self {
        self.default_service_id = match id {
            Some(id) if self.get(id).is_some() => Some(id.to_string()),
            Some(id) => {
                tracing::warn!(service_id = id, "default service not in catalog, no fallback");
                None
            }
            None => None,
        };
        self
    }

    pub fn all(&self) -> &[Service] {
        &self.services
    }

    pub fn get(&self, id: &str) -> Option<&Service> {
        self.services.iter().find(|s| s.id == id)
    }

    pub fn default_service(&self) -> Option<&Service> {
        self.default_service_id.as_deref().and_then(|id| self.get(id))
    }

    /// Every tag token across the catalog.
    pub fn tag_vocabulary(&self) -> HashSet<String> {
        self.services
            .iter()
            .flat_map(|s| s.tags.iter())
            .flat_map(|t| tokenize(t))
            .collect()
    }

    /// Scores each service by how many distinct caller tokens hit its tags and
    /// returns the best. Ties go to the service listed first. With no score
    /// above zero the default service is returned, flagged as a fallback.
    pub fn best_match(&self, description: &str) -> Option<ServiceMatch<'_>> {
        let tokens: HashSet<String> = tokenize(description).into_iter().collect();

        let mut best: Option<ServiceMatch<'_>> = None;
        for service in &self.services {
            let tags: HashSet<String> = service.tags.iter().flat_map(|t| tokenize(t)).collect();
            let mut matched: Vec<String> = tokens.intersection(&tags).cloned().collect();
            matched.sort();
            let score = matched.len();

            if score > 0 && best.as_ref().map_or(true, |b| score > b.score) {
                best = Some(ServiceMatch {
                    service,
                    score,
                    matched,
                    fallback: false,
                });
            }
        }

        best.or_else(|| {
            self.default_service().map(|service| ServiceMatch {
                service,
                score: 0,
                matched: vec![],
                fallback: true,
            })
        })
    }

    /// A service the caller named outright, e.g. "I need a blood analysis".
    pub fn find_by_name(&self, utterance: &str) -> Option<&Service> {
        let lowered = utterance.to_lowercase();
        let tokens: HashSet<String> = tokenize(utterance).into_iter().collect();

        self.services.iter().find(|service| {
            if lowered.contains(&service.name.to_lowercase())
                || lowered.contains(&service.id.replace('_', " "))
            {
                return true;
            }
            let distinctive: Vec<String> = tokenize(&service.name)
                .into_iter()
                .filter(|w| !GENERIC_NAME_WORDS.contains(&w.as_str()))
                .collect();
            !distinctive.is_empty() && distinctive.iter().all(|w| tokens.contains(w))
        })
    }

    pub fn builtin() -> Self {
        let services = vec![
            service(
                "cardiology_consultation",
                "Cardiology Consultation",
                120.0,
                45,
                &["heart", "cardiac", "chest", "palpitations", "hypertension", "arrhythmia"],
                "Expert consultation for cardiac issues, heart problems and chest pain.",
                Some("Bring any previous ECG results and a list of current medication."),
            ),
            service(
                "gastroenterology",
                "Gastroenterology Consultation",
                110.0,
                40,
                &["stomach", "digestive", "gastro", "abdominal", "belly", "nausea", "bloating", "bowel"],
                "Digestive system consultation for stomach and intestinal issues.",
                None,
            ),
            service(
                "blood_analysis",
                "Blood Analysis",
                50.0,
                20,
                &["blood", "test", "analysis", "screening", "cholesterol", "anemia"],
                "Comprehensive blood test and health screening.",
                Some("Fast for 8 hours before the appointment; water is fine."),
            ),
            service(
                "dermatology",
                "Dermatology Consultation",
                100.0,
                30,
                &["skin", "rash", "rashes", "acne", "itch", "itching", "mole", "eczema"],
                "Consultation for skin conditions such as rashes, acne and moles.",
                None,
            ),
            service(
                "general_practice",
                "General Practice",
                80.0,
                30,
                &["general", "checkup", "fever", "cold", "flu", "cough", "headache", "tired"],
                "General health concerns and checkups.",
                None,
            ),
        ];

        Self {
            services,
            default_service_id: Some("general_practice".to_string()),
        }
    }
}

fn service(
    id: &str,
    name: &str,
    price: f64,
    duration_minutes: u32,
    tags: &[&str],
    description: &str,
    preparation: Option<&str>,
) -> Service {
    Service {
        id: id.to_string(),
        name: name.to_string(),
        price,
        duration_minutes,
        tags: tags.iter().map(|t| t.to_string()).collect(),
        description: description.to_string(),
        preparation: preparation.map(|p| p.to_string()),
    }
}

/// Lowercased alphanumeric words with a trailing plural `s` dropped
/// ("problems" → "problem", but "stress" stays).
pub fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(|w| {
            if w.len() > 3 && w.ends_with('s') && !w.ends_with("ss") {
                w[..w.len() - 1].to_string()
            } else {
                w.to_string()
            }
        })
        .collect()
}
