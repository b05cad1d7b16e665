//! User settings model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Theme mode options
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Theme {
    /// Follow system preference
    #[default]
    System,
    /// Light theme
    Light,
    /// Dark theme
    Dark,
}

/// Scalar per-user preferences.
///
/// No version counter; replicas reconcile by last-writer-wins on
/// `updated_at`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    pub theme: Theme,
    /// Hour of day `[0, 23]` at which "today" rolls over
    pub day_cut_hour: u8,
    pub updated_at: DateTime<Utc>,
}

impl Settings {
    /// Reject out-of-range values before they reach storage or the wire.
    pub fn validate(&self) -> Result<(), String> {
        if self.day_cut_hour > 23 {
            return Err(format!(
                "dayCutHour must be in [0, 23], got {}",
                self.day_cut_hour
            ));
        }
        Ok(())
    }
}

impl Default for Settings {
    fn default() -> Self {
        // Epoch timestamp so any explicitly saved copy wins LWW.
        Self {
            theme: Theme::System,
            day_cut_hour: 4,
            updated_at: DateTime::UNIX_EPOCH,
        }
    }
}

/// Partial change applied by `SaveSettings`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SettingsChange {
    pub theme: Option<Theme>,
    pub day_cut_hour: Option<u8>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn theme_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&Theme::Dark).unwrap(), "\"dark\"");
        assert_eq!(serde_json::to_string(&Theme::System).unwrap(), "\"system\"");
    }

    #[test]
    fn default_settings_lose_lww_to_any_saved_copy() {
        let settings = Settings::default();
        assert_eq!(settings.theme, Theme::System);
        assert_eq!(settings.updated_at, DateTime::UNIX_EPOCH);
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn validate_rejects_out_of_range_hour() {
        let settings = Settings {
            day_cut_hour: 24,
            ..Settings::default()
        };
        assert!(settings.validate().is_err());
    }
}
