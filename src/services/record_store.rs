use serde_json::Value;
use tracing::{debug, error, warn};

use crate::db::{KeyValueStore, StorageError};
use crate::models::InvoiceRecord;

pub const STORAGE_KEY: &str = "calipso_invoices_v1";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveOutcome {
    Saved,
    /// The full collection did not fit; it was written with every image removed.
    SavedWithoutImages,
    /// Nothing was written. The records only live in memory.
    Failed,
}

/// Whole-collection persistence under a single key.
pub struct RecordStore<S> {
    backend: S,
    key: String,
}

impl<S: KeyValueStore> RecordStore<S> {
    pub fn new(backend: S) -> Self {
        Self::with_key(backend, STORAGE_KEY)
    }

    pub fn with_key(backend: S, key: &str) -> Self {
        RecordStore {
            backend,
            key: key.to_string(),
        }
    }

    pub fn backend(&self) -> &S {
        &self.backend
    }

    /// Returns the stored collection. Missing or unreadable content yields an
    /// empty collection.
    pub fn load(&self) -> Vec<InvoiceRecord> {
        let raw = match self.backend.get(&self.key) {
            Ok(Some(raw)) => raw,
            Ok(None) => return Vec::new(),
            Err(err) => {
                error!("Failed to read invoices from storage: {}", err);
                return Vec::new();
            }
        };

        let entries = match serde_json::from_str::<Value>(&raw) {
            Ok(Value::Array(entries)) => entries,
            Ok(_) => {
                warn!("Stored invoices are not a list, ignoring them");
                return Vec::new();
            }
            Err(err) => {
                error!("Failed to load invoices from storage: {}", err);
                return Vec::new();
            }
        };

        let total = entries.len();
        let records: Vec<InvoiceRecord> = entries
            .into_iter()
            .filter_map(|entry| match serde_json::from_value(entry) {
                Ok(record) => Some(record),
                Err(err) => {
                    warn!("Skipping unreadable stored invoice: {}", err);
                    None
                }
            })
            .collect();
        debug!("Loaded {} of {} stored invoices", records.len(), total);
        records
    }

    pub fn save(&self, records: &[InvoiceRecord]) -> SaveOutcome {
        match self.write(records) {
            Ok(()) => SaveOutcome::Saved,
            Err(StorageError::QuotaExceeded { required, capacity }) => {
                warn!(
                    "Storage full ({} of {} bytes). Attempting to save without images to preserve history metadata.",
                    required, capacity
                );
                let light: Vec<InvoiceRecord> = records
                    .iter()
                    .cloned()
                    .map(|mut record| {
                        record.original_image = None;
                        record
                    })
                    .collect();

                match self.write(&light) {
                    Ok(()) => {
                        warn!("Invoice history saved, but images were removed to save space");
                        SaveOutcome::SavedWithoutImages
                    }
                    Err(retry_err) => {
                        error!("Even lightweight save failed: {}", retry_err);
                        SaveOutcome::Failed
                    }
                }
            }
            Err(err) => {
                error!("Failed to save invoices: {}", err);
                SaveOutcome::Failed
            }
        }
    }

    fn write(&self, records: &[InvoiceRecord]) -> Result<(), StorageError> {
        let serialized = serde_json::to_string(records)?;
        self.backend.set(&self.key, &serialized)
    }
}
