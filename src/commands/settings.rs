use anyhow::{anyhow, Result};
use clap::{Args, Subcommand};
use std::str::FromStr;
use tracing::warn;

use crate::commands::AppContext;
use crate::db::Database;
use crate::models::Settings;
use crate::services::secrets::{describe_stored, protect_api_key, KeySource};

#[derive(Subcommand)]
pub enum SettingsCommand {
    /// Print the current settings
    Show,
    /// Change one or more settings
    Set(SettingsArgs),
    /// Check the configured API key against the AI service
    TestKey,
}

#[derive(Args, Default)]
pub struct SettingsArgs {
    /// API key for the AI service (stored in the keychain or encrypted)
    #[arg(long)]
    pub api_key: Option<String>,
    /// Model used for extraction and summaries
    #[arg(long)]
    pub model: Option<String>,
    /// Base URL of an OpenAI-compatible API
    #[arg(long)]
    pub base_url: Option<String>,
    /// Storage capacity for the invoice collection, in bytes
    #[arg(long)]
    pub quota_bytes: Option<usize>,
    /// Directory exports are written to
    #[arg(long)]
    pub export_dir: Option<String>,
    /// Default VAT rate used to estimate a missing tax amount (e.g. 0.21)
    #[arg(long)]
    pub tax_rate: Option<f64>,
}

fn parsed_setting<T: FromStr>(db: &Database, key: &str, default: T) -> T {
    match db.get_setting(key).ok().flatten() {
        Some(raw) => raw.parse().unwrap_or_else(|_| {
            warn!("Ignoring invalid setting {}={}", key, raw);
            default
        }),
        None => default,
    }
}

pub fn load_settings(db: &Database) -> Settings {
    let defaults = Settings::default();
    Settings {
        ai_api_key: db.get_setting("ai_api_key").ok().flatten(),
        ai_model: db
            .get_setting("ai_model")
            .ok()
            .flatten()
            .unwrap_or(defaults.ai_model),
        ai_base_url: db
            .get_setting("ai_base_url")
            .ok()
            .flatten()
            .unwrap_or(defaults.ai_base_url),
        storage_quota_bytes: parsed_setting(db, "storage_quota_bytes", defaults.storage_quota_bytes),
        export_dir: db.get_setting("export_dir").ok().flatten(),
        tax_rate: parsed_setting(db, "tax_rate", defaults.tax_rate),
    }
}

pub fn save_settings(db: &Database, payload: &SettingsArgs) -> Result<()> {
    if let Some(rate) = payload.tax_rate {
        if !(0.0..1.0).contains(&rate) {
            return Err(anyhow!("Tax rate must be a fraction between 0 and 1, got {}", rate));
        }
        db.set_setting("tax_rate", &rate.to_string())?;
    }
    if let Some(quota) = payload.quota_bytes {
        if quota == 0 {
            return Err(anyhow!("Storage quota must be greater than zero"));
        }
        db.set_setting("storage_quota_bytes", &quota.to_string())?;
    }
    if let Some(value) = &payload.model {
        db.set_setting("ai_model", value)?;
    }
    if let Some(value) = &payload.base_url {
        db.set_setting("ai_base_url", value)?;
    }
    if let Some(value) = &payload.export_dir {
        db.set_setting("export_dir", value)?;
    }
    if let Some(api_key) = &payload.api_key {
        if !api_key.trim().is_empty() {
            let protected = protect_api_key(api_key.trim())?;
            db.set_setting("ai_api_key", &protected)?;
        }
    }
    Ok(())
}

pub async fn run(ctx: &AppContext, command: SettingsCommand) -> Result<()> {
    match command {
        SettingsCommand::Show => {
            let s = &ctx.settings;
            let key_state = match &ctx.api_key_override {
                Some(key) if !key.trim().is_empty() => KeySource::Override.describe(),
                _ => describe_stored(s.ai_api_key.as_deref()),
            };
            println!("API key:        {}", key_state);
            println!("Model:          {}", s.ai_model);
            println!("Base URL:       {}", s.ai_base_url);
            println!("Storage quota:  {} bytes", s.storage_quota_bytes);
            println!("Export dir:     {}", s.export_dir.as_deref().unwrap_or("."));
            println!("Tax rate:       {}", s.tax_rate);
        }
        SettingsCommand::Set(payload) => {
            save_settings(&ctx.db, &payload)?;
            println!("Settings saved");
        }
        SettingsCommand::TestKey => {
            let client = ctx.ai_client()?;
            if client.test_key().await? {
                println!("API key is valid");
            } else {
                return Err(anyhow!("API key was rejected by {}", ctx.settings.ai_base_url));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_when_nothing_stored() {
        let db = Database::open_in_memory().unwrap();
        let settings = load_settings(&db);
        assert_eq!(settings.ai_model, "gpt-4o-mini");
        assert_eq!(settings.storage_quota_bytes, 5 * 1024 * 1024);
        assert_eq!(settings.tax_rate, 0.21);
        assert!(settings.ai_api_key.is_none());
    }

    #[test]
    fn test_save_then_load() {
        let db = Database::open_in_memory().unwrap();
        let payload = SettingsArgs {
            model: Some("gpt-4o".to_string()),
            quota_bytes: Some(1024),
            tax_rate: Some(0.1),
            export_dir: Some("/tmp/exports".to_string()),
            ..Default::default()
        };
        save_settings(&db, &payload).unwrap();

        let settings = load_settings(&db);
        assert_eq!(settings.ai_model, "gpt-4o");
        assert_eq!(settings.storage_quota_bytes, 1024);
        assert_eq!(settings.tax_rate, 0.1);
        assert_eq!(settings.export_dir.as_deref(), Some("/tmp/exports"));
    }

    #[test]
    fn test_invalid_values_are_rejected_or_ignored() {
        let db = Database::open_in_memory().unwrap();
        let payload = SettingsArgs {
            tax_rate: Some(21.0),
            ..Default::default()
        };
        assert!(save_settings(&db, &payload).is_err());

        db.set_setting("storage_quota_bytes", "lots").unwrap();
        assert_eq!(load_settings(&db).storage_quota_bytes, 5 * 1024 * 1024);
    }
}
