use anyhow::{anyhow, Result};
use std::path::{Path, PathBuf};
use tracing::info;

use crate::db::KeyValueStore;
use crate::models::{DashboardMetrics, InvoiceRecord, InvoiceStatus};
use crate::services::export::build_artifact;
use crate::services::record_store::{RecordStore, SaveOutcome};

/// Owns the invoice collection (newest first) and persists it after every change.
pub struct AppState<S> {
    store: RecordStore<S>,
    invoices: Vec<InvoiceRecord>,
}

#[derive(Debug)]
pub struct ExportResult {
    pub path: PathBuf,
    pub exported: usize,
    pub saved: SaveOutcome,
}

impl<S: KeyValueStore> AppState<S> {
    pub fn new(store: RecordStore<S>) -> Self {
        let invoices = store.load();
        info!("Loaded {} invoices", invoices.len());
        AppState { store, invoices }
    }

    pub fn invoices(&self) -> &[InvoiceRecord] {
        &self.invoices
    }

    pub fn get(&self, id: &str) -> Option<&InvoiceRecord> {
        self.invoices.iter().find(|inv| inv.id == id)
    }

    /// Case-insensitive match on supplier or invoice number. An empty query
    /// matches everything.
    pub fn search(&self, query: &str) -> Vec<InvoiceRecord> {
        let query = query.trim().to_lowercase();
        if query.is_empty() {
            return self.invoices.clone();
        }
        self.invoices
            .iter()
            .filter(|inv| {
                inv.supplier_name.to_lowercase().contains(&query)
                    || inv.invoice_number.to_lowercase().contains(&query)
            })
            .cloned()
            .collect()
    }

    pub fn add(&mut self, record: InvoiceRecord) -> SaveOutcome {
        info!("Adding invoice {} from {}", record.invoice_number, record.supplier_name);
        self.invoices.insert(0, record);
        self.persist()
    }

    pub fn delete(&mut self, id: &str) -> Result<SaveOutcome> {
        let before = self.invoices.len();
        self.invoices.retain(|inv| inv.id != id);
        if self.invoices.len() == before {
            return Err(anyhow!("Invoice not found: {}", id));
        }
        Ok(self.persist())
    }

    pub fn metrics(&self) -> DashboardMetrics {
        DashboardMetrics {
            total_processed: self.invoices.len(),
            total_net_amount: self.invoices.iter().map(|inv| inv.subtotal).sum(),
            total_vat_amount: self.invoices.iter().map(|inv| inv.tax_amount).sum(),
            pending_export: self
                .invoices
                .iter()
                .filter(|inv| inv.status != InvoiceStatus::Exported)
                .count(),
        }
    }

    /// Writes the searched view as a spreadsheet into `dir`, then marks the
    /// whole collection as exported. Returns `None` without touching anything
    /// when the view is empty.
    pub fn export(&mut self, query: &str, dir: &Path, date: &str) -> Result<Option<ExportResult>> {
        let view = self.search(query);
        let artifact = match build_artifact(&view, date) {
            Some(artifact) => artifact,
            None => return Ok(None),
        };

        let path = artifact.write_to(dir)?;
        for inv in self.invoices.iter_mut() {
            inv.status = InvoiceStatus::Exported;
        }
        let saved = self.persist();

        Ok(Some(ExportResult {
            path,
            exported: view.len(),
            saved,
        }))
    }

    fn persist(&self) -> SaveOutcome {
        self.store.save(&self.invoices)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;

    fn record(id: &str, number: &str, supplier: &str, status: InvoiceStatus) -> InvoiceRecord {
        InvoiceRecord {
            id: id.to_string(),
            invoice_number: number.to_string(),
            supplier_name: supplier.to_string(),
            date: "2024-01-10".to_string(),
            items: vec![],
            subtotal: 100.0,
            tax_rate: 0.21,
            tax_amount: 21.0,
            total: 121.0,
            status,
            original_image: None,
        }
    }

    fn seeded(db: &Database) -> AppState<&Database> {
        let mut state = AppState::new(RecordStore::new(db));
        state.add(record("a", "F-100", "Acme Corp", InvoiceStatus::Processed));
        state.add(record("b", "0042", "Globex", InvoiceStatus::Draft));
        state.add(record("c", "X-9", "Initech", InvoiceStatus::Exported));
        state
    }

    #[test]
    fn test_add_keeps_newest_first_and_persists() {
        let db = Database::open_in_memory().unwrap();
        let state = seeded(&db);
        let ids: Vec<_> = state.invoices().iter().map(|i| i.id.as_str()).collect();
        assert_eq!(ids, vec!["c", "b", "a"]);

        let reloaded = AppState::new(RecordStore::new(&db));
        assert_eq!(reloaded.invoices(), state.invoices());
    }

    #[test]
    fn test_search_matches_supplier_or_number() {
        let db = Database::open_in_memory().unwrap();
        let state = seeded(&db);

        assert_eq!(state.search("acme").len(), 1);
        assert_eq!(state.search("0042")[0].id, "b");
        assert_eq!(state.search("").len(), 3);
        assert!(state.search("nothing").is_empty());
    }

    #[test]
    fn test_delete() {
        let db = Database::open_in_memory().unwrap();
        let mut state = seeded(&db);

        assert_eq!(state.delete("b").unwrap(), SaveOutcome::Saved);
        assert!(state.get("b").is_none());
        assert!(state.delete("b").is_err());
        assert_eq!(AppState::new(RecordStore::new(&db)).invoices().len(), 2);
    }

    #[test]
    fn test_metrics() {
        let db = Database::open_in_memory().unwrap();
        let metrics = seeded(&db).metrics();
        assert_eq!(metrics.total_processed, 3);
        assert_eq!(metrics.total_net_amount, 300.0);
        assert_eq!(metrics.total_vat_amount, 63.0);
        assert_eq!(metrics.pending_export, 2);
    }

    #[test]
    fn test_export_marks_whole_collection() {
        let db = Database::open_in_memory().unwrap();
        let mut state = seeded(&db);
        let dir = tempfile::tempdir().unwrap();

        let result = state.export("globex", dir.path(), "2024-02-01").unwrap().unwrap();
        assert_eq!(result.exported, 1);
        assert_eq!(result.saved, SaveOutcome::Saved);
        assert!(result.path.ends_with("calipso_export_2024-02-01.xls"));
        assert!(state.invoices().iter().all(|i| i.status == InvoiceStatus::Exported));

        let reloaded = AppState::new(RecordStore::new(&db));
        assert!(reloaded.invoices().iter().all(|i| i.status == InvoiceStatus::Exported));
    }

    #[test]
    fn test_export_with_empty_view_is_noop() {
        let db = Database::open_in_memory().unwrap();
        let mut state = seeded(&db);
        let dir = tempfile::tempdir().unwrap();

        assert!(state.export("no such supplier", dir.path(), "2024-02-01").unwrap().is_none());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
        assert_eq!(state.metrics().pending_export, 2);
    }
}
