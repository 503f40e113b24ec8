use base64::{engine::general_purpose, Engine as _};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{info, warn};

use crate::models::{DraftInvoice, ImagePayload, InvoiceRecord, InvoiceStatus};
use crate::services::openai::InvoiceExtractor;
use crate::utils::{now_millis, round2};

#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("Please upload an image file (JPG, PNG): {0}")]
    UnsupportedFile(String),
    #[error("Failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to analyze invoice: {0}. Please try again or enter details manually.")]
    Extraction(String),
    #[error("Please fill in required field: {0}")]
    MissingField(&'static str),
    #[error("Amount is not a valid number: {0}")]
    InvalidAmount(&'static str),
}

const IMAGE_TYPES: &[(&str, &str)] = &[
    ("jpg", "image/jpeg"),
    ("jpeg", "image/jpeg"),
    ("png", "image/png"),
    ("webp", "image/webp"),
    ("gif", "image/gif"),
    ("bmp", "image/bmp"),
    ("heic", "image/heic"),
    ("heif", "image/heif"),
];

pub fn image_mime(path: &Path) -> Option<&'static str> {
    let ext = path.extension()?.to_str()?;
    IMAGE_TYPES
        .iter()
        .find(|(known, _)| known.eq_ignore_ascii_case(ext))
        .map(|(_, mime)| *mime)
}

pub fn read_image(path: &Path) -> Result<ImagePayload, CaptureError> {
    let mime_type = image_mime(path).ok_or_else(|| CaptureError::UnsupportedFile(path.display().to_string()))?;
    let bytes = std::fs::read(path).map_err(|source| CaptureError::Io {
        path: path.display().to_string(),
        source,
    })?;
    Ok(ImagePayload {
        mime_type: mime_type.to_string(),
        base64_data: general_purpose::STANDARD.encode(bytes),
    })
}

/// Decodes a stored `data:<mime>;base64,<payload>` image back to bytes.
pub fn decode_data_url(data_url: &str) -> Option<Vec<u8>> {
    let (_, payload) = data_url.split_once(";base64,")?;
    general_purpose::STANDARD.decode(payload).ok()
}

/// Images directly inside `dir`, in name order.
pub fn scan_images(dir: &Path) -> Vec<PathBuf> {
    let mut entries = walkdir::WalkDir::new(dir)
        .max_depth(1)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.path().is_file())
        .filter(|e| image_mime(e.path()).is_some())
        .map(|e| e.path().to_path_buf())
        .collect::<Vec<_>>();
    entries.sort();
    entries
}

pub async fn analyze<E>(extractor: &E, path: &Path) -> Result<(DraftInvoice, ImagePayload), CaptureError>
where
    E: InvoiceExtractor + ?Sized,
{
    let image = read_image(path)?;
    info!("Analyzing {}", path.display());
    let draft = extractor
        .extract(&image)
        .await
        .map_err(|e| CaptureError::Extraction(e.to_string()))?;
    Ok((draft, image))
}

/// Values the user typed over the extracted ones.
#[derive(Debug, Clone, Default)]
pub struct DraftEdits {
    pub invoice_number: Option<String>,
    pub supplier_name: Option<String>,
    pub date: Option<String>,
    pub subtotal: Option<f64>,
    pub tax_amount: Option<f64>,
    pub total: Option<f64>,
}

impl DraftEdits {
    pub fn apply(&self, draft: &mut DraftInvoice) {
        if let Some(value) = &self.invoice_number {
            draft.invoice_number = value.trim().to_string();
        }
        if let Some(value) = &self.supplier_name {
            draft.supplier_name = value.trim().to_string();
        }
        if let Some(value) = &self.date {
            draft.date = value.trim().to_string();
        }
        if let Some(value) = self.subtotal {
            draft.subtotal = value;
        }
        if let Some(value) = self.tax_amount {
            draft.tax_amount = value;
        }
        if let Some(value) = self.total {
            draft.total = value;
        }
    }
}

/// Turns a verified draft into a stored record.
///
/// When the draft has a subtotal but no tax, the tax is estimated at
/// `tax_rate` and the total recomputed, unless the user set either value.
/// A user-entered total that disagrees with `subtotal + tax` is kept.
pub fn finalize(
    mut draft: DraftInvoice,
    edits: &DraftEdits,
    image: Option<&ImagePayload>,
    tax_rate: f64,
) -> Result<InvoiceRecord, CaptureError> {
    edits.apply(&mut draft);

    if draft.subtotal > 0.0 && draft.tax_amount == 0.0 && edits.tax_amount.is_none() {
        let estimated_vat = round2(draft.subtotal * tax_rate);
        draft.tax_amount = estimated_vat;
        if edits.total.is_none() {
            draft.total = round2(draft.subtotal + estimated_vat);
        }
    }

    let amounts = [
        ("subtotal", draft.subtotal),
        ("tax", draft.tax_amount),
        ("total", draft.total),
    ];
    if let Some((name, _)) = amounts.iter().find(|(_, value)| !value.is_finite()) {
        return Err(CaptureError::InvalidAmount(*name));
    }
    let items_finite = draft
        .items
        .iter()
        .all(|item| item.quantity.is_finite() && item.unit_price.is_finite() && item.total.is_finite());
    if !items_finite {
        return Err(CaptureError::InvalidAmount("line item"));
    }

    if draft.supplier_name.trim().is_empty() {
        return Err(CaptureError::MissingField("supplier"));
    }
    if draft.date.trim().is_empty() {
        return Err(CaptureError::MissingField("date"));
    }
    if draft.total == 0.0 {
        return Err(CaptureError::MissingField("total"));
    }

    let expected = round2(draft.subtotal + draft.tax_amount);
    if (draft.total - expected).abs() > 0.01 {
        warn!(
            "Total {:.2} differs from subtotal + tax {:.2}; keeping the entered total",
            draft.total, expected
        );
    }

    let invoice_number = if draft.invoice_number.is_empty() {
        format!("INV-{}", now_millis())
    } else {
        draft.invoice_number
    };

    Ok(InvoiceRecord {
        id: uuid::Uuid::new_v4().to_string(),
        invoice_number,
        supplier_name: draft.supplier_name,
        date: draft.date,
        items: draft.items,
        subtotal: draft.subtotal,
        tax_rate,
        tax_amount: draft.tax_amount,
        total: draft.total,
        status: InvoiceStatus::Processed,
        original_image: image.map(ImagePayload::data_url),
    })
}
