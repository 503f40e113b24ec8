use anyhow::{anyhow, Result};
use async_trait::async_trait;
use jsonschema::JSONSchema;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::models::{DraftInvoice, ImagePayload, InvoiceItem, Settings, UNKNOWN_SUPPLIER};
use crate::utils::{normalize_date, parse_decimal, round2};

/// Remote capability that reads an invoice image into draft fields.
#[async_trait]
pub trait InvoiceExtractor: Send + Sync {
    async fn extract(&self, image: &ImagePayload) -> Result<DraftInvoice>;
}

/// Remote capability that turns a prompt into a short plain-text summary.
#[async_trait]
pub trait InsightGenerator: Send + Sync {
    async fn summarize(&self, prompt: &str) -> Result<String>;
}

#[derive(Serialize)]
struct ChatRequest {
    model: String,
    temperature: f32,
    messages: Vec<Message>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<ResponseFormat>,
}

#[derive(Serialize)]
struct Message {
    role: String,
    content: MessageContent,
}

#[derive(Serialize)]
#[serde(untagged)]
enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentPart {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
}

#[derive(Serialize)]
struct ImageUrl {
    url: String,
}

#[derive(Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    format_type: String,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

impl Message {
    fn system(text: &str) -> Self {
        Message {
            role: "system".to_string(),
            content: MessageContent::Text(text.to_string()),
        }
    }

    fn user(text: &str) -> Self {
        Message {
            role: "user".to_string(),
            content: MessageContent::Text(text.to_string()),
        }
    }

    fn user_with_image(text: &str, image: &ImagePayload) -> Self {
        Message {
            role: "user".to_string(),
            content: MessageContent::Parts(vec![
                ContentPart::Text { text: text.to_string() },
                ContentPart::ImageUrl {
                    image_url: ImageUrl { url: image.data_url() },
                },
            ]),
        }
    }
}

/// Client for an OpenAI-compatible chat completions endpoint.
#[derive(Clone)]
pub struct OpenAiClient {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
}

impl OpenAiClient {
    pub fn new(api_key: &str, base_url: &str, model: &str) -> Self {
        OpenAiClient {
            client: reqwest::Client::new(),
            api_key: api_key.to_string(),
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
        }
    }

    pub fn from_settings(settings: &Settings, api_key: &str) -> Self {
        Self::new(api_key, &settings.ai_base_url, &settings.ai_model)
    }

    pub async fn test_key(&self) -> Result<bool> {
        let response = self
            .client
            .get(format!("{}/models", self.base_url))
            .bearer_auth(&self.api_key)
            .send()
            .await
            .map_err(|e| anyhow!("Connection failed: {}", e))?;
        Ok(response.status().is_success())
    }

    async fn chat(&self, messages: Vec<Message>, json_mode: bool) -> Result<String> {
        let request = ChatRequest {
            model: self.model.clone(),
            temperature: 0.1,
            messages,
            response_format: json_mode.then(|| ResponseFormat {
                format_type: "json_object".to_string(),
            }),
        };

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow!("AI service error {}: {}", status, body));
        }

        let body: ChatResponse = response.json().await?;
        let content = body
            .choices
            .first()
            .ok_or_else(|| anyhow!("Empty response"))?
            .message
            .content
            .clone()
            .unwrap_or_default()
            .trim()
            .to_string();
        Ok(content)
    }
}

#[async_trait]
impl InvoiceExtractor for OpenAiClient {
    async fn extract(&self, image: &ImagePayload) -> Result<DraftInvoice> {
        let schema = extraction_schema()?;
        let prompt = system_prompt();

        let mut raw = self
            .chat(
                vec![
                    Message::system(prompt),
                    Message::user_with_image("Extract the invoice fields from this image.", image),
                ],
                true,
            )
            .await?;
        let mut value = parse_json(&raw)?;

        if !schema.is_valid(&value) {
            warn!("Extraction result does not match the schema, asking for a repaired version");
            let fix_prompt = format!(
                "Fix this JSON so that it matches the schema exactly. Output JSON only. JSON:\n{}",
                raw
            );
            raw = self
                .chat(vec![Message::system(prompt), Message::user(&fix_prompt)], true)
                .await?;
            value = parse_json(&raw)?;
            if !schema.is_valid(&value) {
                return Err(anyhow!("JSON validation failed"));
            }
        }

        debug!("Extraction response: {}", raw);
        Ok(draft_from_value(&value))
    }
}

#[async_trait]
impl InsightGenerator for OpenAiClient {
    async fn summarize(&self, prompt: &str) -> Result<String> {
        self.chat(vec![Message::user(prompt)], false).await
    }
}

/// Parses a model reply, tolerating a surrounding Markdown code fence.
pub fn parse_json(raw: &str) -> Result<Value> {
    let trimmed = raw.trim();
    let body = match trimmed.strip_prefix("```") {
        Some(rest) => {
            let rest = rest.strip_prefix("json").unwrap_or(rest);
            rest.strip_suffix("```").unwrap_or(rest).trim()
        }
        None => trimmed,
    };
    serde_json::from_str::<Value>(body).map_err(|e| anyhow!("Invalid JSON: {}", e))
}

pub fn extraction_schema() -> Result<JSONSchema> {
    let amount = json!({"type": ["number", "string", "null"]});
    let schema = json!({
        "type": "object",
        "properties": {
            "invoiceNumber": {"type": ["string", "number", "null"]},
            "supplierName": {"type": ["string", "null"]},
            "date": {"type": ["string", "null"]},
            "subtotal": amount,
            "taxAmount": amount,
            "total": amount,
            "items": {
                "type": ["array", "null"],
                "items": {
                    "type": "object",
                    "properties": {
                        "description": {"type": ["string", "null"]},
                        "quantity": amount,
                        "unitPrice": amount,
                        "total": amount
                    }
                }
            }
        }
    });

    let compiled = JSONSchema::compile(&schema).map_err(|e| anyhow!("Invalid JSON schema: {}", e))?;
    Ok(compiled)
}

fn field<'a>(value: &'a Value, names: &[&str]) -> Option<&'a Value> {
    names
        .iter()
        .filter_map(|name| value.get(*name))
        .find(|v| !v.is_null())
}

fn text_field(value: &Value, names: &[&str]) -> Option<String> {
    let text = match field(value, names)? {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        _ => return None,
    };
    (!text.is_empty()).then_some(text)
}

fn amount_field(value: &Value, names: &[&str]) -> Option<f64> {
    let amount = match field(value, names)? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => parse_decimal(s).ok(),
        _ => None,
    };
    amount.filter(|a| a.is_finite())
}

/// Builds a draft from whatever the model returned. Missing fields get
/// defaults; nothing here fails.
pub fn draft_from_value(value: &Value) -> DraftInvoice {
    let invoice_number = text_field(value, &["invoiceNumber", "invoice_number"]);
    let supplier_name = text_field(value, &["supplierName", "supplier_name"]);
    let date = normalize_date(text_field(value, &["date", "invoiceDate", "invoice_date"]));
    let subtotal = amount_field(value, &["subtotal", "netAmount", "net_amount"]);
    let tax_amount = amount_field(value, &["taxAmount", "tax_amount", "vatAmount"]);
    let total = amount_field(value, &["total", "totalAmount", "total_amount"]);

    let found = [
        invoice_number.is_some(),
        supplier_name.is_some(),
        date.is_some(),
        subtotal.is_some(),
        tax_amount.is_some(),
        total.is_some(),
    ];
    let completeness = found.iter().filter(|f| **f).count() as f64 / found.len() as f64;

    let items = match field(value, &["items", "lineItems", "line_items"]) {
        Some(Value::Array(entries)) => entries.iter().map(item_from_value).collect(),
        _ => Vec::new(),
    };

    let subtotal_value = subtotal.unwrap_or(0.0);
    let tax_value = tax_amount.unwrap_or(0.0);
    let total_value = match (total, subtotal) {
        (Some(total), _) => total,
        (None, Some(_)) => round2(subtotal_value + tax_value),
        (None, None) => 0.0,
    };

    DraftInvoice {
        invoice_number: invoice_number.unwrap_or_default(),
        supplier_name: supplier_name.unwrap_or_else(|| UNKNOWN_SUPPLIER.to_string()),
        date: date.unwrap_or_default(),
        items,
        subtotal: subtotal_value,
        tax_amount: tax_value,
        total: total_value,
        completeness: round2(completeness),
    }
}

fn item_from_value(value: &Value) -> InvoiceItem {
    let quantity = amount_field(value, &["quantity", "qty"]).unwrap_or(1.0);
    let unit_price = amount_field(value, &["unitPrice", "unit_price", "price"]).unwrap_or(0.0);
    let total = amount_field(value, &["total", "amount"]).unwrap_or_else(|| round2(quantity * unit_price));
    InvoiceItem {
        description: text_field(value, &["description", "name"]).unwrap_or_default(),
        quantity,
        unit_price,
        total,
    }
}

fn system_prompt() -> &'static str {
    r#"You are an invoice extraction system. Read the invoice image and return JSON only.
Fields:
- invoiceNumber (string|null, keep leading zeros)
- supplierName (string|null, the issuing company)
- date (YYYY-MM-DD|null, the issue date)
- subtotal (number|null, net amount before tax)
- taxAmount (number|null, VAT/IVA amount)
- total (number|null, amount due including tax)
- items (array of {description, quantity, unitPrice, total}, may be empty)
Use null for anything you cannot read. Do not guess values.
"#
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_json_strips_code_fence() {
        let value = parse_json("```json\n{\"total\": 12.5}\n```").unwrap();
        assert_eq!(value["total"], 12.5);
        assert!(parse_json("I could not read the invoice").is_err());
    }

    #[test]
    fn test_missing_tax_amount_defaults_to_zero() {
        let value = json!({
            "invoiceNumber": "F-001",
            "supplierName": "Acme",
            "date": "2024-02-10",
            "subtotal": 100.0,
            "total": 100.0,
            "items": []
        });

        let draft = draft_from_value(&value);
        assert_eq!(draft.tax_amount, 0.0);
        assert_eq!(draft.subtotal, 100.0);
        assert_eq!(draft.supplier_name, "Acme");
    }

    #[test]
    fn test_empty_response_gives_defaults() {
        let draft = draft_from_value(&json!({}));
        assert_eq!(draft, DraftInvoice::default());
    }

    #[test]
    fn test_string_amounts_and_dates_are_normalized() {
        let value = json!({
            "invoiceNumber": 42,
            "supplierName": "  Ferretería López ",
            "date": "03.04.2024",
            "subtotal": "1.000,00",
            "taxAmount": "210,00"
        });

        let draft = draft_from_value(&value);
        assert_eq!(draft.invoice_number, "42");
        assert_eq!(draft.supplier_name, "Ferretería López");
        assert_eq!(draft.date, "2024-04-03");
        assert_eq!(draft.subtotal, 1000.0);
        assert_eq!(draft.tax_amount, 210.0);
        assert_eq!(draft.total, 1210.0);
    }

    #[test]
    fn test_non_finite_amounts_fall_back_to_zero() {
        let value = json!({
            "supplierName": "Acme",
            "subtotal": "NaN",
            "taxAmount": "inf",
            "total": 121
        });

        let draft = draft_from_value(&value);
        assert_eq!(draft.subtotal, 0.0);
        assert_eq!(draft.tax_amount, 0.0);
        assert_eq!(draft.total, 121.0);
    }

    #[test]
    fn test_items_get_defaults() {
        let value = json!({
            "items": [
                {"description": "Widget", "quantity": 3, "unitPrice": 2.5},
                {"total": "9.99"}
            ]
        });

        let draft = draft_from_value(&value);
        assert_eq!(draft.items.len(), 2);
        assert_eq!(draft.items[0].total, 7.5);
        assert_eq!(draft.items[1].description, "");
        assert_eq!(draft.items[1].quantity, 1.0);
        assert_eq!(draft.items[1].total, 9.99);
    }

    #[test]
    fn test_completeness_counts_found_fields() {
        let draft = draft_from_value(&json!({"supplierName": "Acme", "total": 10, "date": null}));
        assert_eq!(draft.completeness, 0.33);
    }

    #[test]
    fn test_schema_accepts_partial_and_rejects_wrong_shapes() {
        let schema = extraction_schema().unwrap();
        assert!(schema.is_valid(&json!({"total": "12,00"})));
        assert!(schema.is_valid(&json!({})));
        assert!(!schema.is_valid(&json!({"items": "none"})));
        assert!(!schema.is_valid(&json!(["not", "an", "object"])));
    }

    #[test]
    fn test_vision_request_shape() {
        let image = ImagePayload {
            mime_type: "image/png".to_string(),
            base64_data: "AAAA".to_string(),
        };
        let request = ChatRequest {
            model: "gpt-4o-mini".to_string(),
            temperature: 0.1,
            messages: vec![Message::system("sys"), Message::user_with_image("read", &image)],
            response_format: Some(ResponseFormat {
                format_type: "json_object".to_string(),
            }),
        };

        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["messages"][0]["content"], "sys");
        assert_eq!(json["messages"][1]["content"][0]["type"], "text");
        assert_eq!(json["messages"][1]["content"][1]["type"], "image_url");
        assert_eq!(
            json["messages"][1]["content"][1]["image_url"]["url"],
            "data:image/png;base64,AAAA"
        );
        assert_eq!(json["response_format"]["type"], "json_object");
    }

    #[test]
    fn test_summary_request_omits_response_format() {
        let request = ChatRequest {
            model: "m".to_string(),
            temperature: 0.1,
            messages: vec![Message::user("hi")],
            response_format: None,
        };
        let json = serde_json::to_value(&request).unwrap();
        assert!(json.get("response_format").is_none());
    }
}
