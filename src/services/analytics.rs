use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use tracing::error;

use crate::models::{DashboardSnapshot, RecentTransaction, RevenuePoint, StatMetric, TransactionStatus};
use crate::services::openai::InsightGenerator;

pub const SUMMARY_FALLBACK: &str = "Unable to generate summary at this time.";

/// Icon tag carried by a metric. Unknown tags fall back to `Activity`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum IconKind {
    Dashboard,
    Analytics,
    Users,
    Settings,
    DollarSign,
    Activity,
    CreditCard,
    Briefcase,
    TrendingUp,
    TrendingDown,
    Sparkles,
}

const ICON_TABLE: &[(IconKind, &str, &str)] = &[
    (IconKind::Dashboard, "Dashboard", "▦"),
    (IconKind::Analytics, "Analytics", "▥"),
    (IconKind::Users, "Users", "☺"),
    (IconKind::Settings, "Settings", "⚙"),
    (IconKind::DollarSign, "DollarSign", "$"),
    (IconKind::Activity, "Activity", "∿"),
    (IconKind::CreditCard, "CreditCard", "▭"),
    (IconKind::Briefcase, "Briefcase", "▣"),
    (IconKind::TrendingUp, "TrendingUp", "↗"),
    (IconKind::TrendingDown, "TrendingDown", "↘"),
    (IconKind::Sparkles, "Sparkles", "✦"),
];

impl IconKind {
    pub fn from_tag(tag: &str) -> IconKind {
        ICON_TABLE
            .iter()
            .find(|(_, name, _)| *name == tag)
            .map(|(kind, _, _)| *kind)
            .unwrap_or(IconKind::Activity)
    }

    pub fn tag(&self) -> &'static str {
        self.entry().1
    }

    pub fn glyph(&self) -> &'static str {
        self.entry().2
    }

    fn entry(&self) -> &'static (IconKind, &'static str, &'static str) {
        ICON_TABLE
            .iter()
            .find(|(kind, _, _)| kind == self)
            .unwrap_or(&ICON_TABLE[5])
    }
}

impl From<String> for IconKind {
    fn from(tag: String) -> Self {
        IconKind::from_tag(&tag)
    }
}

impl From<IconKind> for String {
    fn from(kind: IconKind) -> Self {
        kind.tag().to_string()
    }
}

impl DashboardSnapshot {
    /// Fixed demo data for the analytics view.
    pub fn sample() -> Self {
        let metric = |label: &str, value: &str, change: f64, icon: IconKind| StatMetric {
            label: label.to_string(),
            value: value.to_string(),
            change,
            icon_name: icon,
        };
        let point = |date: &str, revenue: f64, profit: f64| RevenuePoint {
            date: date.to_string(),
            revenue,
            profit,
        };
        let tx = |id: &str, user: &str, date: &str, amount: &str, status: TransactionStatus| RecentTransaction {
            id: id.to_string(),
            user: user.to_string(),
            avatar: format!("https://i.pravatar.cc/150?u={}", id),
            date: date.to_string(),
            amount: amount.to_string(),
            status,
        };

        DashboardSnapshot {
            metrics: vec![
                metric("Total Revenue", "$45,231.89", 20.1, IconKind::DollarSign),
                metric("Subscriptions", "+2,350", 180.1, IconKind::Users),
                metric("Sales", "+12,234", 19.0, IconKind::CreditCard),
                metric("Active Now", "+573", -2.4, IconKind::Activity),
            ],
            revenue: vec![
                point("Jan", 4000.0, 2400.0),
                point("Feb", 3000.0, 1398.0),
                point("Mar", 5000.0, 3800.0),
                point("Apr", 4780.0, 3908.0),
                point("May", 5890.0, 4800.0),
                point("Jun", 6390.0, 3800.0),
            ],
            transactions: vec![
                tx("t1", "Olivia Martin", "Today, 10:42", "$1,999.00", TransactionStatus::Completed),
                tx("t2", "Jackson Lee", "Today, 09:15", "$39.00", TransactionStatus::Pending),
                tx("t3", "Isabella Nguyen", "Yesterday", "$299.00", TransactionStatus::Completed),
                tx("t4", "William Kim", "Yesterday", "$99.00", TransactionStatus::Failed),
                tx("t5", "Sofia Davis", "2 days ago", "$39.00", TransactionStatus::Completed),
            ],
        }
    }
}

pub fn format_change(change: f64) -> String {
    if change > 0.0 {
        format!("+{}%", change)
    } else {
        format!("{}%", change)
    }
}

pub fn summary_prompt(snapshot: &DashboardSnapshot) -> String {
    let metrics_summary = snapshot
        .metrics
        .iter()
        .map(|m| format!("{}: {} ({})", m.label, m.value, format_change(m.change)))
        .collect::<Vec<_>>()
        .join(", ");
    let latest_transactions = snapshot
        .transactions
        .iter()
        .take(3)
        .map(|t| format!("{} paid {} ({:?})", t.user, t.amount, t.status))
        .collect::<Vec<_>>()
        .join(", ");

    format!(
        r#"You are an AI business analyst for a SaaS dashboard.
Analyze the following current data snapshot:

Key Metrics: {}
Recent Activity Sample: {}

Provide a concise, professional executive summary (max 3 sentences) highlighting performance, potential risks, or actionable insights.
Do not use markdown formatting like bolding or headers, just plain text suitable for a notification card.
Tone: Professional, Insightful, Direct."#,
        metrics_summary, latest_transactions
    )
}

pub async fn generate_executive_summary<G>(generator: &G, snapshot: &DashboardSnapshot) -> Result<String>
where
    G: InsightGenerator + ?Sized,
{
    let prompt = summary_prompt(snapshot);
    match generator.summarize(&prompt).await {
        Ok(text) if text.trim().is_empty() => Ok(SUMMARY_FALLBACK.to_string()),
        Ok(text) => Ok(text.trim().to_string()),
        Err(err) => {
            error!("Insight generation failed: {}", err);
            Err(anyhow!("Failed to fetch insights."))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct CannedGenerator {
        reply: Result<String, String>,
        prompts: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl InsightGenerator for CannedGenerator {
        async fn summarize(&self, prompt: &str) -> Result<String> {
            self.prompts.lock().unwrap().push(prompt.to_string());
            self.reply.clone().map_err(|e| anyhow!(e))
        }
    }

    fn canned(reply: Result<&str, &str>) -> CannedGenerator {
        CannedGenerator {
            reply: reply.map(str::to_string).map_err(str::to_string),
            prompts: Mutex::new(Vec::new()),
        }
    }

    #[test]
    fn test_unknown_icon_tag_falls_back_to_activity() {
        assert_eq!(IconKind::from_tag("Rocket"), IconKind::Activity);
        assert_eq!(IconKind::from_tag("Users"), IconKind::Users);
        assert_eq!(IconKind::DollarSign.glyph(), "$");
    }

    #[test]
    fn test_icon_tag_serde() {
        let metric: StatMetric = serde_json::from_str(
            r#"{"label": "Sales", "value": "1", "change": 2.0, "iconName": "Nope"}"#,
        )
        .unwrap();
        assert_eq!(metric.icon_name, IconKind::Activity);

        let json = serde_json::to_value(IconKind::CreditCard).unwrap();
        assert_eq!(json, "CreditCard");
    }

    #[test]
    fn test_summary_prompt_lists_metrics_and_three_transactions() {
        let prompt = summary_prompt(&DashboardSnapshot::sample());
        assert!(prompt.contains("Total Revenue: $45,231.89 (+20.1%)"));
        assert!(prompt.contains("Active Now: +573 (-2.4%)"));
        assert!(prompt.contains("Olivia Martin paid $1,999.00 (Completed)"));
        assert!(prompt.contains("Isabella Nguyen"));
        assert!(!prompt.contains("William Kim"));
    }

    #[tokio::test]
    async fn test_summary_is_trimmed() {
        let generator = canned(Ok("  Revenue is up.  \n"));
        let summary = generate_executive_summary(&generator, &DashboardSnapshot::sample())
            .await
            .unwrap();
        assert_eq!(summary, "Revenue is up.");
        assert_eq!(generator.prompts.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_empty_summary_uses_fallback() {
        let generator = canned(Ok(""));
        let summary = generate_executive_summary(&generator, &DashboardSnapshot::sample())
            .await
            .unwrap();
        assert_eq!(summary, SUMMARY_FALLBACK);
    }

    #[tokio::test]
    async fn test_generator_failure_is_reported() {
        let generator = canned(Err("401 Unauthorized"));
        let err = generate_executive_summary(&generator, &DashboardSnapshot::sample())
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Failed to fetch insights.");
    }
}
