pub mod dashboard;
pub mod invoices;
pub mod settings;

use anyhow::Result;
use tracing::debug;

use crate::db::Database;
use crate::models::Settings;
use crate::services::openai::OpenAiClient;
use crate::services::record_store::{RecordStore, SaveOutcome};
use crate::services::secrets::resolve_api_key;
use crate::services::state::AppState;

/// Everything a command needs: the opened database and the loaded settings.
pub struct AppContext {
    pub db: Database,
    pub settings: Settings,
    pub api_key_override: Option<String>,
}

impl AppContext {
    pub fn state(&self) -> AppState<&Database> {
        AppState::new(RecordStore::new(&self.db))
    }

    pub fn api_key(&self) -> Result<String> {
        let (key, source) = resolve_api_key(self.api_key_override.as_deref(), self.settings.ai_api_key.as_deref())?;
        debug!("Using API key {}", source.describe());
        Ok(key)
    }

    pub fn ai_client(&self) -> Result<OpenAiClient> {
        Ok(OpenAiClient::from_settings(&self.settings, &self.api_key()?))
    }
}

pub fn report_save(outcome: SaveOutcome) {
    match outcome {
        SaveOutcome::Saved => {}
        SaveOutcome::SavedWithoutImages => {
            println!("Warning: Local storage is full. Invoice history saved, but images were removed to save space.");
        }
        SaveOutcome::Failed => {
            println!("Warning: Invoices could not be saved. The last change was not stored.");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context(override_key: Option<&str>) -> AppContext {
        AppContext {
            db: Database::open_in_memory().unwrap(),
            settings: Settings::default(),
            api_key_override: override_key.map(str::to_string),
        }
    }

    #[test]
    fn test_api_key_prefers_override() {
        assert_eq!(context(Some("sk-env")).api_key().unwrap(), "sk-env");
    }

    #[test]
    fn test_api_key_missing_points_at_settings() {
        let err = context(None).api_key().unwrap_err();
        assert!(err.to_string().contains("CALIPSO_API_KEY"));
    }
}
