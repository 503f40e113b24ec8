use anyhow::{anyhow, Result};
use std::path::{Path, PathBuf};
use tracing::info;

use crate::models::InvoiceRecord;
use crate::utils::{escape_html, format_decimal};

pub const EXPORT_MIME: &str = "application/vnd.ms-excel";

const COLUMNS: [&str; 6] = ["Date", "Supplier", "Invoice Number", "Net Amount", "VAT Amount", "Total"];
const TEXT_CELL: &str = r#"<td style="mso-number-format:'@'">"#;
const AMOUNT_CELL: &str = r#"<td style="mso-number-format:'0.00'">"#;

/// A generated spreadsheet file, ready to be written out.
#[derive(Debug, Clone, PartialEq)]
pub struct ExportArtifact {
    pub filename: String,
    pub mime_type: &'static str,
    pub content: String,
}

impl ExportArtifact {
    pub fn write_to(&self, dir: &Path) -> Result<PathBuf> {
        std::fs::create_dir_all(dir).map_err(|e| anyhow!("Export dir {}: {}", dir.display(), e))?;
        let path = dir.join(&self.filename);
        std::fs::write(&path, self.content.as_bytes())
            .map_err(|e| anyhow!("Write export {}: {}", path.display(), e))?;
        info!("Exported {} bytes to {}", self.content.len(), path.display());
        Ok(path)
    }
}

pub fn export_filename(date: &str) -> String {
    format!("calipso_export_{}.xls", date)
}

/// `None` when there is nothing to export.
pub fn build_artifact(records: &[InvoiceRecord], date: &str) -> Option<ExportArtifact> {
    if records.is_empty() {
        return None;
    }
    Some(ExportArtifact {
        filename: export_filename(date),
        mime_type: EXPORT_MIME,
        content: encode_table(records),
    })
}

fn encode_row(record: &InvoiceRecord) -> String {
    let mut row = String::from("      <tr>\n");
    row.push_str(&format!("        <td>{}</td>\n", escape_html(&record.date)));
    row.push_str(&format!("        <td>{}</td>\n", escape_html(&record.supplier_name)));
    row.push_str(&format!(
        "        {}{}</td>\n",
        TEXT_CELL,
        escape_html(&record.invoice_number)
    ));
    for amount in [record.subtotal, record.tax_amount, record.total] {
        row.push_str(&format!("        {}{}</td>\n", AMOUNT_CELL, format_decimal(amount)));
    }
    row.push_str("      </tr>\n");
    row
}

/// HTML table with Office hints that spreadsheet software opens as a sheet.
pub fn encode_table(records: &[InvoiceRecord]) -> String {
    let header = COLUMNS
        .iter()
        .map(|name| format!("          <th>{}</th>\n", name))
        .collect::<String>();
    let rows = records.iter().map(encode_row).collect::<String>();

    format!(
        r#"<html xmlns:o="urn:schemas-microsoft-com:office:office" xmlns:x="urn:schemas-microsoft-com:office:excel" xmlns="http://www.w3.org/TR/REC-html40">
<head>
  <!--[if gte mso 9]>
  <xml>
    <x:ExcelWorkbook>
      <x:ExcelWorksheets>
        <x:ExcelWorksheet>
          <x:Name>Invoices</x:Name>
          <x:WorksheetOptions>
            <x:DisplayGridlines/>
          </x:WorksheetOptions>
        </x:ExcelWorksheet>
      </x:ExcelWorksheets>
    </x:ExcelWorkbook>
  </xml>
  <![endif]-->
  <meta http-equiv="content-type" content="text/plain; charset=UTF-8"/>
</head>
<body>
  <table>
    <thead>
      <tr style="background-color: #cccccc; font-weight: bold;">
{}      </tr>
    </thead>
    <tbody>
{}    </tbody>
  </table>
</body>
</html>
"#,
        header, rows
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::InvoiceStatus;

    fn record(number: &str, supplier: &str, subtotal: f64) -> InvoiceRecord {
        InvoiceRecord {
            id: number.to_string(),
            invoice_number: number.to_string(),
            supplier_name: supplier.to_string(),
            date: "2024-07-15".to_string(),
            items: vec![],
            subtotal,
            tax_rate: 0.21,
            tax_amount: 0.0,
            total: subtotal,
            status: InvoiceStatus::Processed,
            original_image: None,
        }
    }

    #[test]
    fn test_empty_input_produces_nothing() {
        assert!(build_artifact(&[], "2024-07-15").is_none());
    }

    #[test]
    fn test_filename_embeds_date() {
        let artifact = build_artifact(&[record("1", "Acme", 1.0)], "2024-07-15").unwrap();
        assert_eq!(artifact.filename, "calipso_export_2024-07-15.xls");
        assert_eq!(artifact.mime_type, "application/vnd.ms-excel");
    }

    #[test]
    fn test_amounts_have_two_decimals() {
        let html = encode_table(&[record("1", "Acme", 1234.5)]);
        assert!(html.contains(r#"<td style="mso-number-format:'0.00'">1234.50</td>"#));
        assert!(!html.contains(">1234.5<"));
        assert!(html.contains(r#"<td style="mso-number-format:'0.00'">0.00</td>"#));
    }

    #[test]
    fn test_invoice_number_is_text_cell() {
        let html = encode_table(&[record("000123", "Acme", 1.0)]);
        assert!(html.contains(r#"<td style="mso-number-format:'@'">000123</td>"#));
    }

    #[test]
    fn test_header_columns_in_order() {
        let html = encode_table(&[record("1", "Acme", 1.0)]);
        let positions: Vec<usize> = COLUMNS
            .iter()
            .map(|c| html.find(&format!("<th>{}</th>", c)).unwrap())
            .collect();
        let mut sorted = positions.clone();
        sorted.sort();
        assert_eq!(positions, sorted);
        assert!(html.contains("<x:Name>Invoices</x:Name>"));
        assert!(html.contains("xmlns:x=\"urn:schemas-microsoft-com:office:excel\""));
    }

    #[test]
    fn test_rows_keep_input_order_and_escape_text() {
        let html = encode_table(&[record("2", "B & Sons", 1.0), record("1", "<Acme>", 1.0)]);
        let first = html.find("B &amp; Sons").unwrap();
        let second = html.find("&lt;Acme&gt;").unwrap();
        assert!(first < second);
        assert_eq!(html.matches("<tr>").count(), 2);
    }

    #[test]
    fn test_write_to_creates_file() {
        let dir = tempfile::tempdir().unwrap();
        let artifact = build_artifact(&[record("1", "Acme", 1.0)], "2024-07-15").unwrap();
        let path = artifact.write_to(&dir.path().join("out")).unwrap();
        assert_eq!(std::fs::read_to_string(path).unwrap(), artifact.content);
    }
}
