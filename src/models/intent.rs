use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    Greeting,
    Symptoms,
    ServiceInquiry,
    BookAppointment,
    ProvideSlot,
    ProvideIdentity,
    Confirm,
    Decline,
    Restart,
    Unknown,
}

impl Intent {
    pub fn as_str(&self) -> &'static str {
        match self {
            Intent::Greeting => "greeting",
            Intent::Symptoms => "symptoms",
            Intent::ServiceInquiry => "service_inquiry",
            Intent::BookAppointment => "book_appointment",
            Intent::ProvideSlot => "provide_slot",
            Intent::ProvideIdentity => "provide_identity",
            Intent::Confirm => "confirm",
            Intent::Decline => "decline",
            Intent::Restart => "restart",
            Intent::Unknown => "unknown",
        }
    }
}
