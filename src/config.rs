use crate::infection::DEFAULT_INFECTION_THRESHOLD;

#[derive(Debug, Clone)]
pub struct Config {
    pub sqlite_path: String,
    pub busy_timeout_ms: u64,
    /// Flag count at which a survivor is declared infected.
    pub infection_threshold: u32,
    /// Lock the inventory in the same atomic step that marks a survivor infected.
    pub cascade_lockout: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            sqlite_path: "./zssn.sqlite".to_string(),
            busy_timeout_ms: 5000,
            infection_threshold: DEFAULT_INFECTION_THRESHOLD,
            cascade_lockout: true,
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            sqlite_path: std::env::var("SQLITE_PATH").unwrap_or(defaults.sqlite_path),
            busy_timeout_ms: std::env::var("SQLITE_BUSY_MS").ok().and_then(|v| v.parse().ok()).unwrap_or(defaults.busy_timeout_ms),
            infection_threshold: std::env::var("INFECTION_THRESHOLD")
                .ok()
                .and_then(|v| v.parse().ok())
                .filter(|n: &u32| *n > 0)
                .unwrap_or(defaults.infection_threshold),
            cascade_lockout: std::env::var("CASCADE_LOCKOUT")
                .map(|v| matches!(v.to_lowercase().as_str(), "1" | "true" | "yes"))
                .unwrap_or(defaults.cascade_lockout),
        }
    }
}
