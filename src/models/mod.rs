use serde::{Deserialize, Serialize};

use crate::services::analytics::IconKind;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvoiceItem {
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub quantity: f64,
    #[serde(default)]
    pub unit_price: f64,
    #[serde(default)]
    pub total: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InvoiceStatus {
    Draft,
    Processed,
    Exported,
}

impl InvoiceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InvoiceStatus::Draft => "Draft",
            InvoiceStatus::Processed => "Processed",
            InvoiceStatus::Exported => "Exported",
        }
    }
}

/// One captured invoice. Field names on disk follow the camelCase document
/// layout of the persisted collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvoiceRecord {
    pub id: String,
    pub invoice_number: String,
    pub supplier_name: String,
    pub date: String,
    #[serde(default)]
    pub items: Vec<InvoiceItem>,
    pub subtotal: f64,
    pub tax_rate: f64,
    pub tax_amount: f64,
    pub total: f64,
    pub status: InvoiceStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_image: Option<String>,
}

/// Extraction result before the user has verified it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DraftInvoice {
    pub invoice_number: String,
    pub supplier_name: String,
    pub date: String,
    pub items: Vec<InvoiceItem>,
    pub subtotal: f64,
    pub tax_amount: f64,
    pub total: f64,
    pub completeness: f64,
}

impl Default for DraftInvoice {
    fn default() -> Self {
        DraftInvoice {
            invoice_number: String::new(),
            supplier_name: UNKNOWN_SUPPLIER.to_string(),
            date: String::new(),
            items: Vec::new(),
            subtotal: 0.0,
            tax_amount: 0.0,
            total: 0.0,
            completeness: 0.0,
        }
    }
}

pub const UNKNOWN_SUPPLIER: &str = "Unknown";

/// Image bytes read from disk, kept as base64 text.
#[derive(Debug, Clone, PartialEq)]
pub struct ImagePayload {
    pub mime_type: String,
    pub base64_data: String,
}

impl ImagePayload {
    pub fn data_url(&self) -> String {
        format!("data:{};base64,{}", self.mime_type, self.base64_data)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    pub ai_api_key: Option<String>,
    pub ai_model: String,
    pub ai_base_url: String,
    pub storage_quota_bytes: usize,
    pub export_dir: Option<String>,
    pub tax_rate: f64,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            ai_api_key: None,
            ai_model: "gpt-4o-mini".to_string(),
            ai_base_url: "https://api.openai.com/v1".to_string(),
            storage_quota_bytes: 5 * 1024 * 1024,
            export_dir: None,
            tax_rate: 0.21,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardMetrics {
    pub total_processed: usize,
    pub total_net_amount: f64,
    pub total_vat_amount: f64,
    pub pending_export: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChartSeries {
    pub months: Vec<String>,
    pub net: Vec<f64>,
    pub vat: Vec<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatMetric {
    pub label: String,
    pub value: String,
    pub change: f64,
    pub icon_name: IconKind,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RevenuePoint {
    pub date: String,
    pub revenue: f64,
    pub profit: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransactionStatus {
    Completed,
    Pending,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecentTransaction {
    pub id: String,
    pub user: String,
    pub avatar: String,
    pub date: String,
    pub amount: String,
    pub status: TransactionStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DashboardSnapshot {
    pub metrics: Vec<StatMetric>,
    pub revenue: Vec<RevenuePoint>,
    pub transactions: Vec<RecentTransaction>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_uses_camel_case_keys() {
        let record = InvoiceRecord {
            id: "a".to_string(),
            invoice_number: "0042".to_string(),
            supplier_name: "Acme".to_string(),
            date: "2024-03-01".to_string(),
            items: vec![],
            subtotal: 10.0,
            tax_rate: 0.21,
            tax_amount: 2.1,
            total: 12.1,
            status: InvoiceStatus::Processed,
            original_image: None,
        };

        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["invoiceNumber"], "0042");
        assert_eq!(json["supplierName"], "Acme");
        assert_eq!(json["taxAmount"], 2.1);
        assert_eq!(json["status"], "Processed");
        assert!(json.get("originalImage").is_none());
    }

    #[test]
    fn test_status_serialization() {
        assert_eq!(serde_json::to_string(&InvoiceStatus::Exported).unwrap(), "\"Exported\"");
        let status: InvoiceStatus = serde_json::from_str("\"Draft\"").unwrap();
        assert_eq!(status, InvoiceStatus::Draft);
    }

    #[test]
    fn test_default_draft_is_unknown_supplier() {
        let draft = DraftInvoice::default();
        assert_eq!(draft.supplier_name, "Unknown");
        assert_eq!(draft.tax_amount, 0.0);
    }
}
