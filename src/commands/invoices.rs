use anyhow::{anyhow, Result};
use clap::Args;
use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};
use tracing::{error, info};

use crate::commands::{report_save, AppContext};
use crate::db::KeyValueStore;
use crate::models::{DraftInvoice, InvoiceRecord};
use crate::services::capture::{analyze, decode_data_url, finalize, scan_images, DraftEdits};
use crate::services::openai::InvoiceExtractor;
use crate::services::state::AppState;
use crate::utils::{format_decimal, today_iso};

#[derive(Args)]
pub struct CaptureArgs {
    /// Invoice image, or a directory of images to capture one by one
    pub path: PathBuf,
    /// Override the extracted invoice number
    #[arg(long)]
    pub number: Option<String>,
    /// Override the extracted supplier name
    #[arg(long)]
    pub supplier: Option<String>,
    /// Override the extracted date (YYYY-MM-DD)
    #[arg(long)]
    pub date: Option<String>,
    /// Override the extracted net amount
    #[arg(long)]
    pub subtotal: Option<f64>,
    /// Override the extracted VAT amount
    #[arg(long)]
    pub tax: Option<f64>,
    /// Override the extracted total
    #[arg(long)]
    pub total: Option<f64>,
    /// Show the extracted draft without saving it
    #[arg(long)]
    pub dry_run: bool,
}

impl CaptureArgs {
    fn edits(&self) -> DraftEdits {
        DraftEdits {
            invoice_number: self.number.clone(),
            supplier_name: self.supplier.clone(),
            date: self.date.clone(),
            subtotal: self.subtotal,
            tax_amount: self.tax,
            total: self.total,
        }
    }
}

fn print_draft(path: &Path, draft: &DraftInvoice) {
    println!("{}", path.display());
    println!("  Invoice number: {}", draft.invoice_number);
    println!("  Supplier:       {}", draft.supplier_name);
    println!("  Date:           {}", draft.date);
    println!("  Net amount:     {}", format_decimal(draft.subtotal));
    println!("  VAT amount:     {}", format_decimal(draft.tax_amount));
    println!("  Total:          {}", format_decimal(draft.total));
    println!("  Line items:     {}", draft.items.len());
    println!("  Completeness:   {:.0}%", draft.completeness * 100.0);
}

/// Per-run choices applied to every captured file.
pub struct CapturePlan {
    pub edits: DraftEdits,
    pub dry_run: bool,
    pub tax_rate: f64,
}

async fn capture_one<S, E>(state: &mut AppState<S>, extractor: &E, path: &Path, plan: &CapturePlan) -> Result<()>
where
    S: KeyValueStore,
    E: InvoiceExtractor + ?Sized,
{
    let (draft, image) = analyze(extractor, path).await?;
    print_draft(path, &draft);
    if plan.dry_run {
        return Ok(());
    }

    let record = finalize(draft, &plan.edits, Some(&image), plan.tax_rate)?;
    let id = record.id.clone();
    report_save(state.add(record));
    println!("Saved invoice {}", id);
    Ok(())
}

/// Captures `paths` in order into one collection and returns how many failed.
pub async fn capture_paths<S, E>(state: &mut AppState<S>, extractor: &E, paths: &[PathBuf], plan: &CapturePlan) -> usize
where
    S: KeyValueStore,
    E: InvoiceExtractor + ?Sized,
{
    let mut failed = 0;
    for path in paths {
        if let Err(err) = capture_one(state, extractor, path, plan).await {
            error!("Capture failed for {}: {}", path.display(), err);
            println!("{}: {}", path.display(), err);
            failed += 1;
        }
    }
    info!("Captured {} of {} images", paths.len() - failed, paths.len());
    failed
}

pub async fn capture(ctx: &AppContext, args: CaptureArgs) -> Result<()> {
    let paths = if args.path.is_dir() {
        scan_images(&args.path)
    } else {
        vec![args.path.clone()]
    };
    if paths.is_empty() {
        return Err(anyhow!("No images found in {}", args.path.display()));
    }

    let client = ctx.ai_client()?;
    let plan = CapturePlan {
        edits: args.edits(),
        dry_run: args.dry_run,
        tax_rate: ctx.settings.tax_rate,
    };
    let mut state = ctx.state();
    let failed = capture_paths(&mut state, &client, &paths, &plan).await;
    if failed > 0 {
        return Err(anyhow!("{} of {} captures failed", failed, paths.len()));
    }
    Ok(())
}

fn print_row(inv: &InvoiceRecord) {
    println!(
        "{:<10}  {:<24}  {:<14}  {:>10}  {:>10}  {:>10}  {:<9}  {}",
        inv.date,
        inv.supplier_name,
        inv.invoice_number,
        format_decimal(inv.subtotal),
        format_decimal(inv.tax_amount),
        format_decimal(inv.total),
        inv.status.as_str(),
        inv.id
    );
}

pub fn list(ctx: &AppContext, search: Option<String>) -> Result<()> {
    let state = ctx.state();
    let invoices = state.search(search.as_deref().unwrap_or(""));
    if invoices.is_empty() {
        println!("No invoices found");
        return Ok(());
    }
    println!(
        "{:<10}  {:<24}  {:<14}  {:>10}  {:>10}  {:>10}  {:<9}  ID",
        "Date", "Supplier", "Number", "Net", "VAT", "Total", "Status"
    );
    for inv in &invoices {
        print_row(inv);
    }
    Ok(())
}

pub fn show(ctx: &AppContext, id: &str, save_image: Option<PathBuf>) -> Result<()> {
    let state = ctx.state();
    let inv = state.get(id).ok_or_else(|| anyhow!("Invoice not found: {}", id))?;

    println!("ID:             {}", inv.id);
    println!("Invoice number: {}", inv.invoice_number);
    println!("Supplier:       {}", inv.supplier_name);
    println!("Date:           {}", inv.date);
    println!("Status:         {}", inv.status.as_str());
    println!("Net amount:     {}", format_decimal(inv.subtotal));
    println!("VAT ({:.0}%):      {}", inv.tax_rate * 100.0, format_decimal(inv.tax_amount));
    println!("Total:          {}", format_decimal(inv.total));
    for item in &inv.items {
        println!(
            "  {} x {} @ {} = {}",
            item.quantity,
            item.description,
            format_decimal(item.unit_price),
            format_decimal(item.total)
        );
    }

    match (&inv.original_image, save_image) {
        (None, _) => println!("Image not available"),
        (Some(_), None) => println!("Image: stored"),
        (Some(data_url), Some(target)) => {
            let bytes = decode_data_url(data_url).ok_or_else(|| anyhow!("Stored image is corrupt"))?;
            std::fs::write(&target, bytes)?;
            println!("Image written to {}", target.display());
        }
    }
    Ok(())
}

fn confirm(prompt: &str) -> Result<bool> {
    print!("{} [y/N] ", prompt);
    std::io::stdout().flush()?;
    let mut answer = String::new();
    std::io::stdin().lock().read_line(&mut answer)?;
    Ok(matches!(answer.trim().to_lowercase().as_str(), "y" | "yes"))
}

pub fn delete(ctx: &AppContext, id: &str, yes: bool) -> Result<()> {
    let mut state = ctx.state();
    if state.get(id).is_none() {
        return Err(anyhow!("Invoice not found: {}", id));
    }
    if !yes && !confirm("Are you sure you want to delete this invoice?")? {
        println!("Cancelled");
        return Ok(());
    }
    report_save(state.delete(id)?);
    println!("Deleted invoice {}", id);
    Ok(())
}

pub fn export(ctx: &AppContext, search: Option<String>, out: Option<PathBuf>, open: bool) -> Result<()> {
    let dir = out
        .or_else(|| ctx.settings.export_dir.as_ref().map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from("."));

    let mut state = ctx.state();
    let result = state
        .export(search.as_deref().unwrap_or(""), &dir, &today_iso())?
        .ok_or_else(|| anyhow!("No invoices to export"))?;

    report_save(result.saved);
    println!("Exported {} invoices to {}", result.exported, result.path.display());
    if open {
        open::that(&result.path).map_err(|e| anyhow!("Failed to open {}: {}", result.path.display(), e))?;
    }
    Ok(())
}
