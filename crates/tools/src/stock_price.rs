//! Stock quote lookup via Alpha Vantage's `GLOBAL_QUOTE` endpoint.

use std::time::Duration;

use async_trait::async_trait;
use threadline_config::StockPriceConfig;
use threadline_core::error::ToolError;
use threadline_core::tool::{Tool, ToolResult};
use tracing::{debug, warn};

/// Fallback key accepted by Alpha Vantage for its sample data.
const DEMO_API_KEY: &str = "demo";

pub struct StockPriceTool {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl StockPriceTool {
    pub fn new(base_url: impl Into<String>, api_key: Option<String>, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key
                .filter(|k| !k.is_empty())
                .unwrap_or_else(|| DEMO_API_KEY.to_string()),
        }
    }

    pub fn from_config(config: &StockPriceConfig) -> Self {
        Self::new(
            &config.base_url,
            config.api_key.clone(),
            Duration::from_secs(config.timeout_secs),
        )
    }

    async fn quote(&self, symbol: &str) -> Result<serde_json::Value, String> {
        let response = self
            .client
            .get(format!("{}/query", self.base_url))
            .query(&[
                ("function", "GLOBAL_QUOTE"),
                ("symbol", symbol),
                ("apikey", self.api_key.as_str()),
            ])
            .send()
            .await
            .map_err(|e| e.to_string())?;

        let status = response.status();
        if !status.is_success() {
            return Err(format!("quote service returned HTTP {}", status.as_u16()));
        }
        response
            .json::<serde_json::Value>()
            .await
            .map_err(|e| format!("unreadable quote response: {e}"))
    }
}

fn valid_symbol(symbol: &str) -> bool {
    !symbol.is_empty()
        && symbol.len() <= 12
        && symbol
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | ':'))
}

#[async_trait]
impl Tool for StockPriceTool {
    fn name(&self) -> &str {
        "get_stock_price"
    }

    fn description(&self) -> &str {
        "Fetch the latest stock price for a given symbol (e.g. 'AAPL', 'TSLA') using Alpha Vantage."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "symbol": {
                    "type": "string",
                    "description": "Ticker symbol, e.g. AAPL"
                }
            },
            "required": ["symbol"]
        })
    }

    async fn execute(&self, arguments: serde_json::Value) -> Result<ToolResult, ToolError> {
        let symbol = arguments["symbol"]
            .as_str()
            .map(|s| s.trim().to_ascii_uppercase())
            .ok_or_else(|| ToolError::InvalidArguments("Missing 'symbol' argument".into()))?;
        if !valid_symbol(&symbol) {
            return Err(ToolError::InvalidArguments(format!(
                "'{symbol}' is not a ticker symbol"
            )));
        }

        debug!(symbol = %symbol, "Fetching stock quote");
        match self.quote(&symbol).await {
            Ok(body) => Ok(ToolResult {
                call_id: String::new(),
                success: true,
                output: body.to_string(),
                data: Some(body),
            }),
            Err(reason) => {
                warn!(symbol = %symbol, error = %reason, "Stock quote failed");
                let payload = serde_json::json!({ "error": reason });
                Ok(ToolResult {
                    call_id: String::new(),
                    success: false,
                    output: payload.to_string(),
                    data: Some(payload),
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::serve_once;

    const QUOTE: &str = r#"{"Global Quote": {"01. symbol": "AAPL", "05. price": "189.9800"}}"#;

    #[test]
    fn symbol_validation() {
        assert!(valid_symbol("AAPL"));
        assert!(valid_symbol("BRK.B"));
        assert!(!valid_symbol(""));
        assert!(!valid_symbol("AAPL;DROP"));
        assert!(!valid_symbol("ABCDEFGHIJKLMN"));
    }

    #[test]
    fn missing_key_uses_demo() {
        let tool = StockPriceTool::new("http://x", None, Duration::from_secs(1));
        assert_eq!(tool.api_key, DEMO_API_KEY);
        let tool = StockPriceTool::new("http://x", Some("k".into()), Duration::from_secs(1));
        assert_eq!(tool.api_key, "k");
    }

    #[tokio::test]
    async fn returns_quote_body() {
        let base = serve_once("200 OK", QUOTE).await;
        let tool = StockPriceTool::new(base, Some("key".into()), Duration::from_secs(5));
        let result = tool
            .execute(serde_json::json!({"symbol": "aapl"}))
            .await
            .unwrap();
        assert!(result.success);
        let body: serde_json::Value = serde_json::from_str(&result.output).unwrap();
        assert_eq!(body["Global Quote"]["05. price"], "189.9800");
    }

    #[tokio::test]
    async fn unreachable_service_is_error_payload() {
        let tool = StockPriceTool::new("http://127.0.0.1:9", None, Duration::from_secs(2));
        let result = tool
            .execute(serde_json::json!({"symbol": "MSFT"}))
            .await
            .unwrap();
        assert!(!result.success);
        let payload: serde_json::Value = serde_json::from_str(&result.output).unwrap();
        assert!(payload["error"].is_string());
    }

    #[tokio::test]
    async fn rejects_bad_symbol() {
        let tool = StockPriceTool::new("http://127.0.0.1:9", None, Duration::from_secs(1));
        let result = tool.execute(serde_json::json!({"symbol": "$$$"})).await;
        assert!(matches!(result, Err(ToolError::InvalidArguments(_))));
    }
}
