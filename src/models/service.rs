use serde::{Deserialize, Serialize};

/// An offered service. Immutable once the catalog is loaded.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Service {
    pub id: String,
    pub name: String,
    /// Price in EUR.
    pub price: f64,
    pub duration_minutes: u32,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preparation: Option<String>,
}

impl Service {
    pub fn summary(&self) -> String {
        format!(
            "{} ({} min, €{:.0})",
            self.name, self.duration_minutes, self.price
        )
    }
}
