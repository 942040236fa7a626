//! Web search tool backed by the DuckDuckGo Instant Answer API.
//!
//! Returns the direct answer, abstract and related-topic snippets for a
//! query as plain text. Network or decoding failures become an error result.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use threadline_config::WebSearchConfig;
use threadline_core::error::ToolError;
use threadline_core::tool::{Tool, ToolResult};
use tracing::{debug, warn};

const NO_RESULTS: &str = "No good DuckDuckGo Search Result was found";

pub struct WebSearchTool {
    client: reqwest::Client,
    base_url: String,
    region: String,
}

impl WebSearchTool {
    pub fn new(base_url: impl Into<String>, region: impl Into<String>, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("threadline/", env!("CARGO_PKG_VERSION")))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            region: region.into(),
        }
    }

    pub fn from_config(config: &WebSearchConfig) -> Self {
        Self::new(
            &config.base_url,
            &config.region,
            Duration::from_secs(config.timeout_secs),
        )
    }

    async fn search(&self, query: &str) -> Result<InstantAnswer, String> {
        let response = self
            .client
            .get(format!("{}/", self.base_url))
            .query(&[
                ("q", query),
                ("format", "json"),
                ("no_html", "1"),
                ("skip_disambig", "1"),
                ("kl", self.region.as_str()),
            ])
            .send()
            .await
            .map_err(|e| e.to_string())?;

        let status = response.status();
        if !status.is_success() {
            return Err(format!("search service returned HTTP {}", status.as_u16()));
        }

        // The API labels its JSON as javascript, so decode the text ourselves.
        let body = response.text().await.map_err(|e| e.to_string())?;
        serde_json::from_str(&body).map_err(|e| format!("unreadable search response: {e}"))
    }
}

#[async_trait]
impl Tool for WebSearchTool {
    fn name(&self) -> &str {
        "duckduckgo_search"
    }

    fn description(&self) -> &str {
        "A wrapper around DuckDuckGo Search. Useful for answering questions about current events \
         or facts. Input should be a search query."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "The search query"
                },
                "max_results": {
                    "type": "integer",
                    "description": "Maximum number of snippets to return (default 5)",
                    "default": 5
                }
            },
            "required": ["query"]
        })
    }

    async fn execute(&self, arguments: serde_json::Value) -> Result<ToolResult, ToolError> {
        let query = arguments["query"]
            .as_str()
            .map(str::trim)
            .filter(|q| !q.is_empty())
            .ok_or_else(|| ToolError::InvalidArguments("Missing 'query' argument".into()))?;
        let max_results = arguments["max_results"].as_u64().unwrap_or(5).clamp(1, 10) as usize;

        debug!(query, "Searching DuckDuckGo");
        match self.search(query).await {
            Ok(answer) => {
                let snippets = answer.snippets(max_results);
                let output = if snippets.is_empty() {
                    NO_RESULTS.to_string()
                } else {
                    snippets.join("\n")
                };
                Ok(ToolResult {
                    call_id: String::new(),
                    success: true,
                    output,
                    data: Some(serde_json::json!({ "snippets": snippets })),
                })
            }
            Err(reason) => {
                warn!(query, error = %reason, "Web search failed");
                Ok(ToolResult {
                    call_id: String::new(),
                    success: false,
                    output: serde_json::json!({ "error": reason }).to_string(),
                    data: None,
                })
            }
        }
    }
}

/// The subset of the Instant Answer payload we read.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InstantAnswer {
    #[serde(default)]
    answer: String,
    #[serde(default)]
    abstract_text: String,
    #[serde(default, rename = "AbstractURL")]
    abstract_url: String,
    #[serde(default)]
    definition: String,
    #[serde(default)]
    related_topics: Vec<RelatedTopic>,
}

/// Related topics are either a single entry or a named group of entries.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RelatedTopic {
    Entry {
        #[serde(rename = "Text")]
        text: String,
        #[serde(rename = "FirstURL", default)]
        first_url: String,
    },
    Group {
        #[serde(rename = "Topics")]
        topics: Vec<RelatedTopic>,
    },
}

impl RelatedTopic {
    fn collect_into(&self, out: &mut Vec<String>, limit: usize) {
        match self {
            RelatedTopic::Entry { text, first_url } => {
                if out.len() < limit && !text.is_empty() {
                    out.push(with_source(text, first_url));
                }
            }
            RelatedTopic::Group { topics } => {
                for topic in topics {
                    topic.collect_into(out, limit);
                }
            }
        }
    }
}

fn with_source(text: &str, url: &str) -> String {
    if url.is_empty() {
        text.to_string()
    } else {
        format!("{text} ({url})")
    }
}

impl InstantAnswer {
    fn snippets(&self, limit: usize) -> Vec<String> {
        let mut out = Vec::new();
        if !self.answer.is_empty() {
            out.push(self.answer.clone());
        }
        if !self.abstract_text.is_empty() {
            out.push(with_source(&self.abstract_text, &self.abstract_url));
        }
        if !self.definition.is_empty() {
            out.push(self.definition.clone());
        }
        out.truncate(limit);
        for topic in &self.related_topics {
            topic.collect_into(&mut out, limit);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::serve_once;

    const PAYLOAD: &str = r#"{
        "Heading": "Rust (programming language)",
        "Answer": "",
        "AbstractText": "Rust is a general-purpose programming language.",
        "AbstractURL": "https://en.wikipedia.org/wiki/Rust_(programming_language)",
        "Definition": "",
        "RelatedTopics": [
            {"Text": "Cargo - the Rust package manager", "FirstURL": "https://duckduckgo.com/Cargo"},
            {"Name": "See also", "Topics": [
                {"Text": "Ferris - the Rust mascot", "FirstURL": "https://duckduckgo.com/Ferris"},
                {"Text": "Crates.io", "FirstURL": "https://duckduckgo.com/Crates"}
            ]}
        ]
    }"#;

    #[test]
    fn snippets_flatten_groups_and_respect_limit() {
        let answer: InstantAnswer = serde_json::from_str(PAYLOAD).unwrap();
        let snippets = answer.snippets(3);
        assert_eq!(snippets.len(), 3);
        assert!(snippets[0].starts_with("Rust is a general-purpose"));
        assert!(snippets[0].ends_with("(https://en.wikipedia.org/wiki/Rust_(programming_language))"));
        assert!(snippets[2].starts_with("Ferris"));
    }

    #[test]
    fn empty_payload_has_no_snippets() {
        let answer: InstantAnswer = serde_json::from_str("{}").unwrap();
        assert!(answer.snippets(5).is_empty());
    }

    #[tokio::test]
    async fn execute_against_local_server() {
        let base = serve_once("200 OK", PAYLOAD).await;
        let tool = WebSearchTool::new(base, "us-en", Duration::from_secs(5));
        let result = tool
            .execute(serde_json::json!({"query": "rust language"}))
            .await
            .unwrap();
        assert!(result.success);
        assert!(result.output.contains("Cargo - the Rust package manager"));
    }

    #[tokio::test]
    async fn no_results_message() {
        let base = serve_once("200 OK", r#"{"RelatedTopics": []}"#).await;
        let tool = WebSearchTool::new(base, "us-en", Duration::from_secs(5));
        let result = tool
            .execute(serde_json::json!({"query": "zzzz"}))
            .await
            .unwrap();
        assert!(result.success);
        assert_eq!(result.output, NO_RESULTS);
    }

    #[tokio::test]
    async fn upstream_failure_is_error_payload() {
        let base = serve_once("503 Service Unavailable", "busy").await;
        let tool = WebSearchTool::new(base, "us-en", Duration::from_secs(5));
        let result = tool
            .execute(serde_json::json!({"query": "rust"}))
            .await
            .unwrap();
        assert!(!result.success);
        let payload: serde_json::Value = serde_json::from_str(&result.output).unwrap();
        assert!(payload["error"].as_str().unwrap().contains("503"));
    }

    #[tokio::test]
    async fn missing_query_is_invalid() {
        let tool = WebSearchTool::new("http://127.0.0.1:9", "us-en", Duration::from_secs(1));
        let result = tool.execute(serde_json::json!({"query": "  "})).await;
        assert!(matches!(result, Err(ToolError::InvalidArguments(_))));
    }
}
