use anyhow::{anyhow, Result};
use chrono::{Datelike, NaiveDate, Utc};

use crate::commands::AppContext;
use crate::models::{ChartSeries, DashboardSnapshot, InvoiceRecord, TransactionStatus};
use crate::services::analytics::{format_change, generate_executive_summary};
use crate::utils::format_decimal;

const CHART_MONTHS: u32 = 6;
const RECENT_LIMIT: usize = 5;
const BAR_WIDTH: usize = 30;

/// Net and VAT sums per month, oldest first, ending at `current_year_month`.
pub fn build_chart_series(
    records: &[InvoiceRecord],
    current_year_month: &str,
    months: u32,
) -> Result<ChartSeries> {
    let base_date = NaiveDate::parse_from_str(&format!("{}-01", current_year_month), "%Y-%m-%d")
        .map_err(|e| anyhow!("Invalid month {}: {}", current_year_month, e))?;

    let mut series = ChartSeries {
        months: Vec::new(),
        net: Vec::new(),
        vat: Vec::new(),
    };

    for offset in (0..months).rev() {
        let date = base_date
            .checked_sub_months(chrono::Months::new(offset))
            .ok_or_else(|| anyhow!("Invalid date"))?;
        let ym = format!("{}-{:02}", date.year(), date.month());
        let in_month = records.iter().filter(|inv| inv.date.starts_with(&ym));
        let (net, vat) = in_month.fold((0.0, 0.0), |(net, vat), inv| {
            (net + inv.subtotal, vat + inv.tax_amount)
        });
        series.months.push(ym);
        series.net.push(net);
        series.vat.push(vat);
    }

    Ok(series)
}

fn bar(value: f64, max: f64) -> String {
    if max <= 0.0 || value <= 0.0 {
        return String::new();
    }
    let len = ((value / max) * BAR_WIDTH as f64).round() as usize;
    "#".repeat(len.max(1))
}

fn status_label(status: TransactionStatus) -> &'static str {
    match status {
        TransactionStatus::Completed => "completed",
        TransactionStatus::Pending => "pending",
        TransactionStatus::Failed => "failed",
    }
}

pub fn run(ctx: &AppContext, year_month: Option<String>) -> Result<()> {
    let now = Utc::now();
    let current_year_month = year_month.unwrap_or_else(|| format!("{}-{:02}", now.year(), now.month()));

    let state = ctx.state();
    let metrics = state.metrics();
    println!("Invoices processed:   {}", metrics.total_processed);
    println!("Net amount:           {}", format_decimal(metrics.total_net_amount));
    println!("VAT amount:           {}", format_decimal(metrics.total_vat_amount));
    println!("Pending export:       {}", metrics.pending_export);

    let series = build_chart_series(state.invoices(), &current_year_month, CHART_MONTHS)?;
    let max = series.net.iter().cloned().fold(0.0, f64::max);
    println!();
    println!("Net per month");
    for ((month, net), vat) in series.months.iter().zip(&series.net).zip(&series.vat) {
        println!(
            "  {}  {:>12}  vat {:>10}  {}",
            month,
            format_decimal(*net),
            format_decimal(*vat),
            bar(*net, max)
        );
    }

    println!();
    println!("Recent activity");
    let recent = &state.invoices()[..state.invoices().len().min(RECENT_LIMIT)];
    if recent.is_empty() {
        println!("  No invoices yet");
    }
    for inv in recent {
        println!(
            "  {}  {:<24}  {:>12}  {}",
            inv.date,
            inv.supplier_name,
            format_decimal(inv.total),
            inv.status.as_str()
        );
    }

    let snapshot = DashboardSnapshot::sample();
    println!();
    println!("Analytics");
    for metric in &snapshot.metrics {
        println!(
            "  {} {:<16} {:>12}  {}",
            metric.icon_name.glyph(),
            metric.label,
            metric.value,
            format_change(metric.change)
        );
    }
    for tx in &snapshot.transactions {
        println!("  {:<18} {:<14} {:>10}  {}", tx.user, tx.date, tx.amount, status_label(tx.status));
    }
    Ok(())
}

pub async fn insights(ctx: &AppContext) -> Result<()> {
    let client = ctx.ai_client()?;
    let summary = generate_executive_summary(&client, &DashboardSnapshot::sample()).await?;
    println!("{}", summary);
    Ok(())
}
