use std::env;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub port: u16,
    pub database_url: String,
    pub clinic_name: String,
    pub services_path: Option<String>,
    pub availability_path: Option<String>,
    pub slot_times: Vec<String>,
    pub seed_days: u32,
    pub open_slot_window_days: u32,
    pub default_service_id: Option<String>,
    pub session_timeout_minutes: i64,
}

impl AppConfig {
    pub fn from_env() -> Self {
        Self {
            port: env::var("PORT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(3000),
            database_url: env::var("DATABASE_URL").unwrap_or_else(|_| "clinicdesk.db".to_string()),
            clinic_name: env::var("CLINIC_NAME").unwrap_or_else(|_| "MedCare Clinic".to_string()),
            services_path: env::var("SERVICES_PATH").ok().filter(|v| !v.is_empty()),
            availability_path: env::var("AVAILABILITY_PATH").ok().filter(|v| !v.is_empty()),
            slot_times: env::var("SLOT_TIMES")
                .map(|v| split_list(&v))
                .unwrap_or_else(|_| default_slot_times()),
            seed_days: env::var("SEED_DAYS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(14),
            open_slot_window_days: env::var("OPEN_SLOT_WINDOW_DAYS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(7),
            default_service_id: match env::var("DEFAULT_SERVICE_ID") {
                Ok(v) if v.is_empty() => None,
                Ok(v) => Some(v),
                Err(_) => Some("general_practice".to_string()),
            },
            session_timeout_minutes: env::var("SESSION_TIMEOUT_MINUTES")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(30),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            port: 3000,
            database_url: ":memory:".to_string(),
            clinic_name: "MedCare Clinic".to_string(),
            services_path: None,
            availability_path: None,
            slot_times: default_slot_times(),
            seed_days: 14,
            open_slot_window_days: 7,
            default_service_id: Some("general_practice".to_string()),
            session_timeout_minutes: 30,
        }
    }
}

fn default_slot_times() -> Vec<String> {
    ["09:00", "09:30", "10:00", "10:30", "11:00", "14:00", "14:30", "15:00"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn split_list(v: &str) -> Vec<String> {
    v.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}
