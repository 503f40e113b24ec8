use anyhow::{anyhow, Result};
use chrono::{NaiveDate, Utc};

pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// Calendar date in UTC, used for export file names.
pub fn today_iso() -> String {
    Utc::now().format("%Y-%m-%d").to_string()
}

/// Two decimals, independent of locale.
pub fn format_decimal(value: f64) -> String {
    format!("{:.2}", value)
}

pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

pub fn parse_decimal(value: &str) -> Result<f64> {
    let cleaned: String = value
        .trim()
        .chars()
        .filter(|c| !c.is_whitespace() && !matches!(c, '$' | '€' | '£'))
        .collect();
    let normalized = match (cleaned.rfind(','), cleaned.rfind('.')) {
        // 1.234,56
        (Some(comma), Some(dot)) if comma > dot => cleaned.replace('.', "").replace(',', "."),
        // 1,234.56
        (Some(_), Some(_)) => cleaned.replace(',', ""),
        _ => cleaned.replace(',', "."),
    };
    let parsed = normalized
        .parse::<f64>()
        .map_err(|e| anyhow!("Parse decimal '{}': {}", value, e))?;
    if !parsed.is_finite() {
        return Err(anyhow!("Parse decimal '{}': not a finite amount", value));
    }
    Ok(parsed)
}

pub fn normalize_date(value: Option<String>) -> Option<String> {
    let raw = value?.trim().to_string();
    if raw.is_empty() {
        return None;
    }

    let formats = ["%Y-%m-%d", "%d.%m.%Y", "%d/%m/%Y", "%Y/%m/%d", "%Y.%m.%d"];
    for fmt in formats.iter() {
        if let Ok(date) = NaiveDate::parse_from_str(&raw, fmt) {
            return Some(date.format("%Y-%m-%d").to_string());
        }
    }
    Some(raw)
}

pub fn escape_html(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_decimal_pads_to_two_places() {
        assert_eq!(format_decimal(1234.5), "1234.50");
        assert_eq!(format_decimal(0.0), "0.00");
        assert_eq!(format_decimal(7.0), "7.00");
    }

    #[test]
    fn test_parse_decimal_variants() {
        assert_eq!(parse_decimal("12.50").unwrap(), 12.5);
        assert_eq!(parse_decimal("12,50").unwrap(), 12.5);
        assert_eq!(parse_decimal("1.234,56").unwrap(), 1234.56);
        assert_eq!(parse_decimal("1,234.56").unwrap(), 1234.56);
        assert_eq!(parse_decimal(" $ 99 ").unwrap(), 99.0);
        assert!(parse_decimal("n/a").is_err());
    }

    #[test]
    fn test_parse_decimal_rejects_non_finite() {
        assert!(parse_decimal("NaN").is_err());
        assert!(parse_decimal("inf").is_err());
        assert!(parse_decimal("-Infinity").is_err());
        assert!(parse_decimal("1e999").is_err());
    }

    #[test]
    fn test_normalize_date() {
        assert_eq!(normalize_date(Some("01.03.2024".into())).as_deref(), Some("2024-03-01"));
        assert_eq!(normalize_date(Some("2024/03/01".into())).as_deref(), Some("2024-03-01"));
        assert_eq!(normalize_date(Some("March 2024".into())).as_deref(), Some("March 2024"));
        assert_eq!(normalize_date(Some("  ".into())), None);
        assert_eq!(normalize_date(None), None);
    }

    #[test]
    fn test_today_iso_is_utc_date() {
        let before = Utc::now().date_naive().to_string();
        let today = today_iso();
        let after = Utc::now().date_naive().to_string();
        assert!(today == before || today == after);
        assert_eq!(today.len(), 10);
    }

    #[test]
    fn test_round2() {
        assert_eq!(round2(21.004), 21.0);
        assert_eq!(round2(2.1049), 2.1);
    }

    #[test]
    fn test_escape_html() {
        assert_eq!(escape_html("A&B <Ltd>"), "A&amp;B &lt;Ltd&gt;");
    }
}
