//! OpenAI-compatible provider implementation.
//!
//! Works with OpenAI, OpenRouter, Ollama, vLLM and any endpoint exposing
//! `/v1/chat/completions`.
//!
//! Supports:
//! - Chat completions (non-streaming and streaming SSE)
//! - Tool use / function calling, with tool-call deltas reassembled by index
//! - Model listing and health checks

use std::collections::BTreeMap;

use async_trait::async_trait;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use threadline_core::error::ProviderError;
use threadline_core::message::{Message, MessageToolCall, Role};
use threadline_core::provider::*;
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

/// An OpenAI-compatible LLM provider.
pub struct OpenAiCompatProvider {
    name: String,
    base_url: String,
    api_key: String,
    client: reqwest::Client,
}

impl OpenAiCompatProvider {
    /// Create a new OpenAI-compatible provider.
    pub fn new(
        name: impl Into<String>,
        base_url: impl Into<String>,
        api_key: impl Into<String>,
    ) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(120))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            name: name.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            client,
        }
    }

    /// Create an OpenAI provider (convenience constructor).
    pub fn openai(api_key: impl Into<String>) -> Self {
        Self::new("openai", "https://api.openai.com/v1", api_key)
    }

    /// Create an OpenRouter provider (convenience constructor).
    pub fn openrouter(api_key: impl Into<String>) -> Self {
        Self::new("openrouter", "https://openrouter.ai/api/v1", api_key)
    }

    /// Create an Ollama provider (convenience constructor).
    pub fn ollama(base_url: Option<&str>) -> Self {
        Self::new(
            "ollama",
            base_url.unwrap_or("http://localhost:11434/v1"),
            "ollama",
        )
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Build the JSON body for a chat completion request.
    fn request_body(request: &ProviderRequest, stream: bool) -> serde_json::Value {
        let mut body = serde_json::json!({
            "model": request.model,
            "messages": to_api_messages(&request.messages),
            "temperature": request.temperature,
            "stream": stream,
        });

        if stream {
            body["stream_options"] = serde_json::json!({ "include_usage": true });
        }

        if let Some(max_tokens) = request.max_tokens {
            body["max_tokens"] = serde_json::json!(max_tokens);
        }

        if !request.tools.is_empty() {
            body["tools"] = serde_json::json!(to_api_tools(&request.tools));
        }

        if !request.stop.is_empty() {
            body["stop"] = serde_json::json!(request.stop);
        }

        body
    }

    async fn post_chat(
        &self,
        body: &serde_json::Value,
        accept: &str,
    ) -> Result<reqwest::Response, ProviderError> {
        let url = format!("{}/chat/completions", self.base_url);
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .header("Accept", accept)
            .json(body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ProviderError::Timeout(e.to_string())
                } else {
                    ProviderError::Network(e.to_string())
                }
            })?;

        check_status(response).await
    }
}

/// Map non-success HTTP statuses onto provider errors.
async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, ProviderError> {
    let status = response.status().as_u16();
    match status {
        200 => Ok(response),
        429 => {
            let retry_after_secs = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse().ok())
                .unwrap_or(5);
            Err(ProviderError::RateLimited { retry_after_secs })
        }
        401 | 403 => Err(ProviderError::AuthenticationFailed(
            "Invalid API key or insufficient permissions".into(),
        )),
        404 => {
            let body = response.text().await.unwrap_or_default();
            Err(ProviderError::ModelNotFound(body))
        }
        _ => {
            let body = response.text().await.unwrap_or_default();
            warn!(status, body = %body, "Provider returned error");
            Err(ProviderError::ApiError {
                status_code: status,
                message: body,
            })
        }
    }
}

/// Convert our Message types to OpenAI API format.
fn to_api_messages(messages: &[Message]) -> Vec<ApiMessage> {
    messages
        .iter()
        .map(|m| {
            let role = match m.role {
                Role::User => "user",
                Role::Assistant => "assistant",
                Role::System => "system",
                Role::Tool => "tool",
            };
            // Assistant turns that only call tools carry a null content.
            let content = if m.role == Role::Assistant && m.content.is_empty() && m.has_tool_calls()
            {
                None
            } else {
                Some(m.content.clone())
            };
            let tool_calls = (!m.tool_calls.is_empty()).then(|| {
                m.tool_calls
                    .iter()
                    .map(|tc| ApiToolCall {
                        id: tc.id.clone(),
                        r#type: "function".into(),
                        function: ApiFunction {
                            name: tc.name.clone(),
                            arguments: tc.arguments.clone(),
                        },
                    })
                    .collect()
            });

            ApiMessage {
                role: role.into(),
                content,
                tool_calls,
                tool_call_id: m.tool_call_id.clone(),
            }
        })
        .collect()
}

/// Convert tool definitions to OpenAI API format.
fn to_api_tools(tools: &[ToolDefinition]) -> Vec<ApiToolDefinition> {
    tools
        .iter()
        .map(|t| ApiToolDefinition {
            r#type: "function".into(),
            function: ApiToolFunction {
                name: t.name.clone(),
                description: t.description.clone(),
                parameters: t.parameters.clone(),
            },
        })
        .collect()
}

#[async_trait]
impl Provider for OpenAiCompatProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn complete(
        &self,
        request: ProviderRequest,
    ) -> std::result::Result<ProviderResponse, ProviderError> {
        debug!(provider = %self.name, model = %request.model, "Sending completion request");

        let body = Self::request_body(&request, false);
        let response = self.post_chat(&body, "application/json").await?;

        let api_response: ApiResponse =
            response.json().await.map_err(|e| ProviderError::ApiError {
                status_code: 200,
                message: format!("Failed to parse response: {e}"),
            })?;

        let choice = api_response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| ProviderError::ApiError {
                status_code: 200,
                message: "No choices in response".into(),
            })?;

        let mut message = Message::assistant(choice.message.content.unwrap_or_default());
        message.tool_calls = choice
            .message
            .tool_calls
            .unwrap_or_default()
            .into_iter()
            .map(|tc| MessageToolCall {
                id: tc.id,
                name: tc.function.name,
                arguments: tc.function.arguments,
            })
            .collect();

        Ok(ProviderResponse {
            message,
            usage: api_response.usage.map(Usage::from),
            model: api_response.model,
            metadata: serde_json::Map::new(),
        })
    }

    async fn list_models(&self) -> std::result::Result<Vec<String>, ProviderError> {
        let url = format!("{}/models", self.base_url);
        let response = self
            .client
            .get(&url)
            .bearer_auth(&self.api_key)
            .send()
            .await
            .map_err(|e| ProviderError::Network(e.to_string()))?;

        if !response.status().is_success() {
            return Ok(Vec::new());
        }

        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| ProviderError::Network(e.to_string()))?;

        let models = body["data"]
            .as_array()
            .map(|arr| {
                arr.iter()
                    .filter_map(|m| m["id"].as_str().map(String::from))
                    .collect()
            })
            .unwrap_or_default();

        Ok(models)
    }

    async fn health_check(&self) -> std::result::Result<bool, ProviderError> {
        let url = format!("{}/models", self.base_url);
        let response = self
            .client
            .get(&url)
            .bearer_auth(&self.api_key)
            .send()
            .await
            .map_err(|e| ProviderError::Network(e.to_string()))?;

        Ok(response.status().is_success())
    }

    async fn stream(
        &self,
        request: ProviderRequest,
    ) -> std::result::Result<ChunkStream, ProviderError>
    {
        debug!(provider = %self.name, model = %request.model, "Sending streaming request");

        let body = Self::request_body(&request, true);
        let response = self.post_chat(&body, "text/event-stream").await?;

        let (tx, rx) = mpsc::channel(64);
        let provider_name = self.name.clone();

        tokio::spawn(async move {
            let mut byte_stream = response.bytes_stream();
            let mut decoder = SseDecoder::new(provider_name);

            while let Some(next) = byte_stream.next().await {
                let bytes = match next {
                    Ok(b) => b,
                    Err(e) => {
                        let _ = tx
                            .send(Err(ProviderError::StreamInterrupted(e.to_string())))
                            .await;
                        return;
                    }
                };

                for chunk in decoder.feed_bytes(&bytes) {
                    let done = chunk.done;
                    if tx.send(Ok(chunk)).await.is_err() || done {
                        return;
                    }
                }
            }

            // Stream ended without [DONE]
            let _ = tx.send(Ok(decoder.finish(None))).await;
        });

        Ok(rx)
    }
}

/// Incremental decoder for an OpenAI chat-completions SSE body.
///
/// Text deltas are emitted as they arrive. Tool-call fragments are buffered
/// per index and only released on the final (`done`) chunk.
pub struct SseDecoder {
    provider: String,
    buffer: String,
    /// Trailing bytes of a UTF-8 sequence cut off by a read boundary.
    pending: Vec<u8>,
    tool_calls: BTreeMap<u32, ToolCallAccumulator>,
    finished: bool,
}

impl SseDecoder {
    pub fn new(provider: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            buffer: String::new(),
            pending: Vec::new(),
            tool_calls: BTreeMap::new(),
            finished: false,
        }
    }

    /// Feed one network read. A multi-byte character split across reads is
    /// held back until its remaining bytes arrive.
    pub fn feed_bytes(&mut self, bytes: &[u8]) -> Vec<StreamChunk> {
        self.pending.extend_from_slice(bytes);
        let text = match std::str::from_utf8(&self.pending) {
            Ok(text) => text.to_owned(),
            Err(e) if e.error_len().is_none() => {
                let valid = e.valid_up_to();
                let text = String::from_utf8_lossy(&self.pending[..valid]).into_owned();
                self.pending.drain(..valid);
                return self.feed(&text);
            }
            Err(e) => {
                warn!(provider = %self.provider, error = %e, "Invalid UTF-8 in stream body");
                String::from_utf8_lossy(&self.pending).into_owned()
            }
        };
        self.pending.clear();
        self.feed(&text)
    }

    /// Feed raw body text; returns every chunk completed by it.
    pub fn feed(&mut self, text: &str) -> Vec<StreamChunk> {
        let mut out = Vec::new();
        if self.finished {
            return out;
        }
        self.buffer.push_str(text);

        while let Some(line_end) = self.buffer.find('\n') {
            let line: String = self.buffer.drain(..=line_end).collect();
            let line = line.trim_end_matches(['\n', '\r']);

            let Some(data) = line.strip_prefix("data:") else {
                // blank separators, comments, `event:` lines
                continue;
            };
            let data = data.trim();

            if data == "[DONE]" {
                out.push(self.finish(None));
                return out;
            }

            match serde_json::from_str::<StreamResponse>(data) {
                Ok(resp) => {
                    if let Some(chunk) = self.apply(resp) {
                        let done = chunk.done;
                        out.push(chunk);
                        if done {
                            return out;
                        }
                    }
                }
                Err(e) => {
                    trace!(
                        provider = %self.provider,
                        data = %data,
                        error = %e,
                        "Ignoring unparseable SSE chunk"
                    );
                }
            }
        }

        out
    }

    /// Produce the terminal chunk carrying every accumulated tool call.
    pub fn finish(&mut self, usage: Option<Usage>) -> StreamChunk {
        self.finished = true;
        let tool_calls = std::mem::take(&mut self.tool_calls)
            .into_values()
            .map(ToolCallAccumulator::into_tool_call)
            .collect();
        StreamChunk::last(tool_calls, usage)
    }

    fn apply(&mut self, resp: StreamResponse) -> Option<StreamChunk> {
        let mut text = None;

        if let Some(choice) = resp.choices.into_iter().next() {
            for delta in choice.delta.tool_calls.unwrap_or_default() {
                let acc = self.tool_calls.entry(delta.index).or_default();
                if let Some(id) = delta.id {
                    acc.id = id;
                }
                if let Some(func) = delta.function {
                    if let Some(name) = func.name {
                        acc.name = name;
                    }
                    if let Some(args) = func.arguments {
                        acc.arguments.push_str(&args);
                    }
                }
            }
            text = choice.delta.content.filter(|c| !c.is_empty());
        }

        // With stream_options.include_usage the usage chunk is the last one.
        if let Some(usage) = resp.usage {
            let mut last = self.finish(Some(usage.into()));
            last.content = text;
            return Some(last);
        }

        text.map(StreamChunk::text)
    }
}

/// Accumulates incremental tool call deltas into a complete tool call.
#[derive(Debug, Default)]
pub struct ToolCallAccumulator {
    id: String,
    name: String,
    arguments: String,
}

impl ToolCallAccumulator {
    fn into_tool_call(self) -> MessageToolCall {
        MessageToolCall {
            id: self.id,
            name: self.name,
            arguments: self.arguments,
        }
    }
}

// --- OpenAI API types (internal) ---

#[derive(Debug, Serialize, Deserialize)]
struct ApiMessage {
    role: String,
    #[serde(default)]
    content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<ApiToolCall>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiToolCall {
    id: String,
    r#type: String,
    function: ApiFunction,
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiFunction {
    name: String,
    arguments: String,
}

#[derive(Debug, Serialize)]
struct ApiToolDefinition {
    r#type: String,
    function: ApiToolFunction,
}

#[derive(Debug, Serialize)]
struct ApiToolFunction {
    name: String,
    description: String,
    parameters: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    #[serde(default)]
    model: String,
    choices: Vec<ApiChoice>,
    usage: Option<ApiUsage>,
}

#[derive(Debug, Deserialize)]
struct ApiChoice {
    message: ApiMessage,
}

#[derive(Debug, Deserialize)]
struct ApiUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
    total_tokens: u32,
}

impl From<ApiUsage> for Usage {
    fn from(u: ApiUsage) -> Self {
        Usage {
            prompt_tokens: u.prompt_tokens,
            completion_tokens: u.completion_tokens,
            total_tokens: u.total_tokens,
        }
    }
}

/// A single SSE `data: {...}` chunk from a streaming response.
#[derive(Debug, Deserialize)]
struct StreamResponse {
    #[serde(default)]
    choices: Vec<StreamChoice>,
    #[serde(default)]
    usage: Option<ApiUsage>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    delta: StreamDelta,
}

#[derive(Debug, Deserialize)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<StreamToolCallDelta>>,
}

#[derive(Debug, Deserialize)]
struct StreamToolCallDelta {
    index: u32,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    function: Option<StreamFunctionDelta>,
}

#[derive(Debug, Deserialize)]
struct StreamFunctionDelta {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    arguments: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sse(data: &str) -> String {
        format!("data: {data}\n\n")
    }

    #[test]
    fn constructors_trim_base_url() {
        let p = OpenAiCompatProvider::new("custom", "http://localhost:9000/v1/", "k");
        assert_eq!(p.base_url(), "http://localhost:9000/v1");
        assert_eq!(OpenAiCompatProvider::openai("k").name(), "openai");
        assert_eq!(
            OpenAiCompatProvider::ollama(None).base_url(),
            "http://localhost:11434/v1"
        );
    }

    #[test]
    fn request_body_includes_tools_and_stream_options() {
        let request = ProviderRequest::chat("gpt-4o-mini", vec![Message::user("What is AAPL at?")])
            .with_max_tokens(Some(256))
            .with_tools(vec![ToolDefinition {
                name: "get_stock_price".into(),
                description: "Quote lookup".into(),
                parameters: serde_json::json!({"type": "object"}),
            }]);
        let body = OpenAiCompatProvider::request_body(&request, true);
        assert_eq!(body["stream"], true);
        assert_eq!(body["stream_options"]["include_usage"], true);
        assert_eq!(body["max_tokens"], 256);
        assert_eq!(body["tools"][0]["function"]["name"], "get_stock_price");
        assert!(body.get("stop").is_none());

        let body = OpenAiCompatProvider::request_body(&request, false);
        assert!(body.get("stream_options").is_none());
    }

    #[test]
    fn tool_call_only_assistant_message_has_null_content() {
        let mut msg = Message::assistant("");
        msg.tool_calls.push(MessageToolCall {
            id: "call_1".into(),
            name: "calculate".into(),
            arguments: r#"{"expression":"2+2"}"#.into(),
        });
        let api = to_api_messages(&[msg, Message::tool_result("call_1", "calculate", "Result: 4")]);
        assert!(api[0].content.is_none());
        assert_eq!(api[0].tool_calls.as_ref().unwrap()[0].function.name, "calculate");
        assert_eq!(api[1].role, "tool");
        assert_eq!(api[1].tool_call_id.as_deref(), Some("call_1"));
        assert_eq!(api[1].content.as_deref(), Some("Result: 4"));
    }

    #[test]
    fn decoder_emits_text_deltas_in_order() {
        let mut decoder = SseDecoder::new("test");
        let mut body = sse(r#"{"choices":[{"delta":{"role":"assistant","content":""}}]}"#);
        body.push_str(&sse(r#"{"choices":[{"delta":{"content":"Hel"}}]}"#));
        body.push_str(&sse(r#"{"choices":[{"delta":{"content":"lo"}}]}"#));

        let chunks = decoder.feed(&body);
        let texts: Vec<_> = chunks.iter().filter_map(|c| c.content.clone()).collect();
        assert_eq!(texts, vec!["Hel", "lo"]);
        assert!(chunks.iter().all(|c| !c.done));
    }

    #[test]
    fn decoder_handles_lines_split_across_reads() {
        let mut decoder = SseDecoder::new("test");
        assert!(decoder.feed("data: {\"choices\":[{\"delta\":{\"con").is_empty());
        let chunks = decoder.feed("tent\":\"Hi\"}}]}\n\n");
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].content.as_deref(), Some("Hi"));
    }

    #[test]
    fn decoder_keeps_characters_split_across_reads() {
        let body = sse(r#"{"choices":[{"delta":{"content":"café"}}]}"#);
        let bytes = body.as_bytes();
        let cut = bytes.iter().position(|&b| b == 0xC3).unwrap() + 1;

        let mut decoder = SseDecoder::new("test");
        assert!(decoder.feed_bytes(&bytes[..cut]).is_empty());
        let chunks = decoder.feed_bytes(&bytes[cut..]);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].content.as_deref(), Some("café"));
    }

    #[test]
    fn decoder_replaces_invalid_bytes() {
        let mut decoder = SseDecoder::new("test");
        let chunks = decoder.feed_bytes(b"data: {\"choices\":[{\"delta\":{\"content\":\"a\xFFb\"}}]}\n\n");
        assert_eq!(chunks[0].content.as_deref(), Some("a\u{FFFD}b"));
    }

    /// Serve one streaming response, pausing inside the first `é` of `body`.
    async fn serve_split(body: &'static str) -> String {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 4096];
            let _ = socket.read(&mut buf).await;

            let bytes = body.as_bytes();
            let cut = bytes.iter().position(|&b| b == 0xC3).unwrap() + 1;
            let head = format!(
                "HTTP/1.1 200 OK\r\ncontent-type: text/event-stream\r\ncontent-length: {}\r\nconnection: close\r\n\r\n",
                bytes.len()
            );
            socket.write_all(head.as_bytes()).await.unwrap();
            socket.write_all(&bytes[..cut]).await.unwrap();
            socket.flush().await.unwrap();
            tokio::time::sleep(std::time::Duration::from_millis(200)).await;
            socket.write_all(&bytes[cut..]).await.unwrap();
            let _ = socket.shutdown().await;
        });
        format!("http://{addr}")
    }

    #[tokio::test]
    async fn stream_preserves_characters_split_by_the_network() {
        let url = serve_split(
            "data: {\"choices\":[{\"delta\":{\"content\":\"café\"}}]}\n\ndata: [DONE]\n\n",
        )
        .await;
        let provider = OpenAiCompatProvider::new("local", url, "k");
        let mut rx = provider
            .stream(ProviderRequest::chat("m", vec![Message::user("hi")]))
            .await
            .unwrap();

        let mut text = String::new();
        while let Some(chunk) = rx.recv().await {
            let chunk = chunk.unwrap();
            text.push_str(chunk.content.as_deref().unwrap_or_default());
            if chunk.done {
                break;
            }
        }
        assert_eq!(text, "café");
    }

    #[test]
    fn decoder_assembles_tool_calls_by_index() {
        let mut decoder = SseDecoder::new("test");
        let mut body = String::new();
        body.push_str(&sse(
            r#"{"choices":[{"delta":{"tool_calls":[{"index":1,"id":"call_b","function":{"name":"get_stock_price","arguments":""}}]}}]}"#,
        ));
        body.push_str(&sse(
            r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"id":"call_a","function":{"name":"calculate","arguments":"{\"expr"}}]}}]}"#,
        ));
        body.push_str(&sse(
            r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"function":{"arguments":"ession\":\"2+2\"}"}}]}}]}"#,
        ));
        body.push_str(&sse(
            r#"{"choices":[{"delta":{"tool_calls":[{"index":1,"function":{"arguments":"{\"symbol\":\"AAPL\"}"}}]}}]}"#,
        ));
        body.push_str(&sse("[DONE]"));

        let chunks = decoder.feed(&body);
        let last = chunks.last().unwrap();
        assert!(last.done);
        assert_eq!(last.tool_calls.len(), 2);
        assert_eq!(last.tool_calls[0].id, "call_a");
        assert_eq!(last.tool_calls[0].arguments, r#"{"expression":"2+2"}"#);
        assert_eq!(last.tool_calls[1].name, "get_stock_price");
        assert_eq!(last.tool_calls[1].arguments, r#"{"symbol":"AAPL"}"#);
    }

    #[test]
    fn decoder_usage_chunk_finishes_stream() {
        let mut decoder = SseDecoder::new("test");
        let mut body = sse(r#"{"choices":[{"delta":{"content":"4"},"finish_reason":"stop"}]}"#);
        body.push_str(&sse(
            r#"{"choices":[],"usage":{"prompt_tokens":12,"completion_tokens":1,"total_tokens":13}}"#,
        ));
        body.push_str(&sse(r#"{"choices":[{"delta":{"content":"ignored"}}]}"#));

        let chunks = decoder.feed(&body);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[1].usage.as_ref().unwrap().total_tokens, 13);
        assert!(chunks[1].done);
        assert!(decoder.feed(&sse(r#"{"choices":[{"delta":{"content":"late"}}]}"#)).is_empty());
    }

    #[test]
    fn decoder_skips_comments_and_garbage() {
        let mut decoder = SseDecoder::new("test");
        let body = ": keep-alive\n\nevent: message\ndata: not json\n\n";
        assert!(decoder.feed(body).is_empty());
    }

    #[test]
    fn finish_without_done_marker_flushes_tool_calls() {
        let mut decoder = SseDecoder::new("test");
        decoder.feed(&sse(
            r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"id":"call_x","function":{"name":"duckduckgo_search","arguments":"{}"}}]}}]}"#,
        ));
        let last = decoder.finish(None);
        assert!(last.done);
        assert_eq!(last.tool_calls[0].name, "duckduckgo_search");
    }

    #[test]
    fn parses_non_streaming_response() {
        let json = r#"{
            "model": "gpt-4o-mini",
            "choices": [{"message": {"role": "assistant", "content": null,
                "tool_calls": [{"id": "call_1", "type": "function",
                    "function": {"name": "calculate", "arguments": "{\"expression\":\"1+1\"}"}}]}}],
            "usage": {"prompt_tokens": 5, "completion_tokens": 3, "total_tokens": 8}
        }"#;
        let resp: ApiResponse = serde_json::from_str(json).unwrap();
        assert_eq!(resp.choices[0].message.tool_calls.as_ref().unwrap()[0].function.name, "calculate");
        assert!(resp.choices[0].message.content.is_none());
        assert_eq!(Usage::from(resp.usage.unwrap()).total_tokens, 8);
    }
}
