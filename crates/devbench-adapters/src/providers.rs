//! HTTP clients for the hosted model APIs.
//!
//! Each provider gets a request body builder and a response reader over the
//! same `reqwest` client. Failures are classified here: throttling (HTTP 429,
//! 503, 529, or a rate-limit error body) becomes
//! [`ExecutionError::RateLimited`], so nothing downstream inspects message
//! text.

use devbench_core::ApiProvider;
use devbench_core::process::truncate;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde_json::{Value, json};
use std::time::Duration;
use tracing::debug;

use devbench_proto::ExecutionError;

/// Output token limit when the request does not set one.
pub const DEFAULT_MAX_TOKENS: u32 = 4096;

/// Whole-request deadline for provider calls.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(600);

const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Error bodies kept in failure messages.
const BODY_EXCERPT_CHARS: usize = 300;

/// Where a provider lives and how to authenticate.
#[derive(Clone, PartialEq, Eq)]
pub struct ProviderEndpoint {
    pub host: String,
    /// Empty when no key was found; requests then fail as misconfigured.
    pub api_key: String,
}

impl std::fmt::Debug for ProviderEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderEndpoint")
            .field("host", &self.host)
            .field("api_key", &if self.api_key.is_empty() { "<unset>" } else { "<redacted>" })
            .finish()
    }
}

impl ProviderEndpoint {
    pub fn new(host: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            api_key: api_key.into(),
        }
    }

    /// Reads the key and optional host override from the environment.
    pub fn from_env(provider: ApiProvider) -> Self {
        Self::from_lookup(provider, |key| std::env::var(key).ok())
    }

    pub fn from_lookup(provider: ApiProvider, lookup: impl Fn(&str) -> Option<String>) -> Self {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let (key_vars, host_var, default_host) = match provider {
            ApiProvider::Anthropic => (
                &["ANTHROPIC_API_KEY"][..],
                "ANTHROPIC_HOST",
                "https://api.anthropic.com",
            ),
            ApiProvider::Openai | ApiProvider::OpenaiResponses => {
                (&["OPENAI_API_KEY"][..], "OPENAI_HOST", "https://api.openai.com")
            }
            ApiProvider::Google => (
                &["GOOGLE_API_KEY", "GEMINI_API_KEY"][..],
                "GOOGLE_HOST",
                "https://generativelanguage.googleapis.com",
            ),
        };

        Self {
            host: non_empty(host_var).unwrap_or_else(|| default_host.to_string()),
            api_key: key_vars.iter().find_map(|k| non_empty(*k)).unwrap_or_default(),
        }
    }

    pub fn has_key(&self) -> bool {
        !self.api_key.is_empty()
    }
}

/// Environment variable holding the API key for `provider`.
pub fn api_key_var(provider: ApiProvider) -> &'static str {
    match provider {
        ApiProvider::Anthropic => "ANTHROPIC_API_KEY",
        ApiProvider::Openai | ApiProvider::OpenaiResponses => "OPENAI_API_KEY",
        ApiProvider::Google => "GOOGLE_API_KEY",
    }
}

/// One completion call.
#[derive(Debug, Clone, Copy)]
pub struct CompletionRequest<'a> {
    pub system: Option<&'a str>,
    pub prompt: &'a str,
    pub max_tokens: u32,
    pub temperature: f32,
}

impl<'a> CompletionRequest<'a> {
    pub fn new(prompt: &'a str) -> Self {
        Self {
            system: None,
            prompt,
            max_tokens: DEFAULT_MAX_TOKENS,
            temperature: 0.0,
        }
    }

    fn system(&self) -> Option<&'a str> {
        self.system.filter(|s| !s.trim().is_empty())
    }
}

/// A provider's answer with its own usage accounting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completion {
    pub content: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
    /// Model that served the request, as reported by the provider.
    pub model: String,
}

/// Client for one model on one provider.
#[derive(Debug, Clone)]
pub struct ProviderClient {
    provider: ApiProvider,
    model: String,
    endpoint: ProviderEndpoint,
    client: Client,
    timeout: Duration,
}

impl ProviderClient {
    pub fn new(
        provider: ApiProvider,
        model: impl Into<String>,
        endpoint: ProviderEndpoint,
    ) -> Result<Self, ExecutionError> {
        Self::with_timeout(provider, model, endpoint, DEFAULT_REQUEST_TIMEOUT)
    }

    pub fn with_timeout(
        provider: ApiProvider,
        model: impl Into<String>,
        endpoint: ProviderEndpoint,
        timeout: Duration,
    ) -> Result<Self, ExecutionError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ExecutionError::Config(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            provider,
            model: model.into(),
            endpoint,
            client,
            timeout,
        })
    }

    pub fn provider(&self) -> ApiProvider {
        self.provider
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub async fn complete(
        &self,
        request: &CompletionRequest<'_>,
    ) -> Result<Completion, ExecutionError> {
        if !self.endpoint.has_key() {
            return Err(ExecutionError::Config(format!(
                "{} is not set",
                api_key_var(self.provider)
            )));
        }

        let host = self.endpoint.host.trim_end_matches('/');
        let builder = match self.provider {
            ApiProvider::Anthropic => self
                .client
                .post(format!("{host}/v1/messages"))
                .header("x-api-key", &self.endpoint.api_key)
                .header("anthropic-version", ANTHROPIC_VERSION)
                .json(&anthropic_body(&self.model, request)),
            ApiProvider::Openai => self
                .client
                .post(format!("{host}/v1/chat/completions"))
                .bearer_auth(&self.endpoint.api_key)
                .json(&openai_chat_body(&self.model, request)),
            ApiProvider::OpenaiResponses => self
                .client
                .post(format!("{host}/v1/responses"))
                .bearer_auth(&self.endpoint.api_key)
                .json(&openai_responses_body(&self.model, request)),
            ApiProvider::Google => self
                .client
                .post(format!("{host}/v1beta/models/{}:generateContent", self.model))
                .header("x-goog-api-key", &self.endpoint.api_key)
                .json(&google_body(request)),
        };

        debug!(
            provider = %self.provider,
            model = %self.model,
            max_tokens = request.max_tokens,
            "Sending completion request"
        );
        let body = self.send(builder).await?;

        let completion = match self.provider {
            ApiProvider::Anthropic => read_anthropic(&body),
            ApiProvider::Openai => read_openai_chat(&body),
            ApiProvider::OpenaiResponses => read_openai_responses(&body),
            ApiProvider::Google => read_google(&body),
        };
        Ok(Completion {
            model: completion.model.unwrap_or_else(|| self.model.clone()),
            content: completion.content,
            input_tokens: completion.input_tokens,
            output_tokens: completion.output_tokens,
        })
    }

    async fn send(&self, builder: RequestBuilder) -> Result<Value, ExecutionError> {
        let response = builder.send().await.map_err(|e| self.transport_error(&e))?;
        self.read_response(response).await
    }

    fn transport_error(&self, err: &reqwest::Error) -> ExecutionError {
        if err.is_timeout() {
            ExecutionError::Timeout {
                what: format!("{} request", self.provider),
                after: self.timeout,
            }
        } else {
            ExecutionError::Provider {
                provider: self.provider.to_string(),
                message: err.to_string(),
            }
        }
    }

    async fn read_response(&self, response: Response) -> Result<Value, ExecutionError> {
        let status = response.status();
        if status.is_success() {
            return response
                .json()
                .await
                .map_err(|e| ExecutionError::Provider {
                    provider: self.provider.to_string(),
                    message: format!("invalid response body: {e}"),
                });
        }

        let body = response.text().await.unwrap_or_default();
        let message = format!("{status}: {}", truncate(body.trim(), BODY_EXCERPT_CHARS));
        if is_throttled(status, &body) {
            Err(ExecutionError::RateLimited {
                provider: self.provider.to_string(),
                message,
            })
        } else {
            Err(ExecutionError::Provider {
                provider: self.provider.to_string(),
                message,
            })
        }
    }
}

/// Whether a failed response means "slow down" rather than "this request is wrong".
fn is_throttled(status: StatusCode, body: &str) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::SERVICE_UNAVAILABLE
        || status.as_u16() == 529
        || body.contains("rate_limit_error")
        || body.contains("RESOURCE_EXHAUSTED")
}

fn anthropic_body(model: &str, request: &CompletionRequest<'_>) -> Value {
    let mut body = json!({
        "model": model,
        "max_tokens": request.max_tokens,
        "temperature": request.temperature,
        "messages": [{ "role": "user", "content": request.prompt }],
    });
    if let Some(system) = request.system() {
        body["system"] = json!(system);
    }
    body
}

fn chat_messages(request: &CompletionRequest<'_>) -> Vec<Value> {
    let mut messages = Vec::with_capacity(2);
    if let Some(system) = request.system() {
        messages.push(json!({ "role": "system", "content": system }));
    }
    messages.push(json!({ "role": "user", "content": request.prompt }));
    messages
}

fn openai_chat_body(model: &str, request: &CompletionRequest<'_>) -> Value {
    json!({
        "model": model,
        "max_tokens": request.max_tokens,
        "temperature": request.temperature,
        "messages": chat_messages(request),
    })
}

fn openai_responses_body(model: &str, request: &CompletionRequest<'_>) -> Value {
    json!({
        "model": model,
        "input": chat_messages(request),
        "max_output_tokens": request.max_tokens,
        "store": false,
    })
}

fn google_body(request: &CompletionRequest<'_>) -> Value {
    let mut body = json!({
        "contents": [{ "role": "user", "parts": [{ "text": request.prompt }] }],
        "generationConfig": {
            "maxOutputTokens": request.max_tokens,
            "temperature": request.temperature,
        },
    });
    if let Some(system) = request.system() {
        body["systemInstruction"] = json!({ "parts": [{ "text": system }] });
    }
    body
}

#[derive(Debug, Default)]
struct Parsed {
    content: String,
    input_tokens: u64,
    output_tokens: u64,
    model: Option<String>,
}

fn count(value: &Value, pointer: &str) -> u64 {
    value.pointer(pointer).and_then(Value::as_u64).unwrap_or(0)
}

fn model_of(value: &Value) -> Option<String> {
    value.get("model").and_then(Value::as_str).map(str::to_string)
}

/// Concatenates `text` of the items in `items` whose `type` is `kind`.
fn join_texts<'a>(items: impl Iterator<Item = &'a Value>, kind: Option<&str>) -> String {
    items
        .filter(|item| kind.is_none_or(|k| item.get("type").and_then(Value::as_str) == Some(k)))
        .filter_map(|item| item.get("text").and_then(Value::as_str))
        .collect()
}

fn array<'a>(value: Option<&'a Value>) -> impl Iterator<Item = &'a Value> {
    value.and_then(Value::as_array).into_iter().flatten()
}

fn read_anthropic(body: &Value) -> Parsed {
    Parsed {
        content: join_texts(array(body.get("content")), Some("text")),
        input_tokens: count(body, "/usage/input_tokens"),
        output_tokens: count(body, "/usage/output_tokens"),
        model: model_of(body),
    }
}

fn read_openai_chat(body: &Value) -> Parsed {
    Parsed {
        content: body
            .pointer("/choices/0/message/content")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        input_tokens: count(body, "/usage/prompt_tokens"),
        output_tokens: count(body, "/usage/completion_tokens"),
        model: model_of(body),
    }
}

fn read_openai_responses(body: &Value) -> Parsed {
    // Reasoning blocks are skipped; only message output is the answer.
    let messages = array(body.get("output"))
        .filter(|block| block.get("type").and_then(Value::as_str) == Some("message"))
        .flat_map(|block| array(block.get("content")));
    Parsed {
        content: join_texts(messages, Some("output_text")),
        input_tokens: count(body, "/usage/input_tokens"),
        output_tokens: count(body, "/usage/output_tokens"),
        model: model_of(body),
    }
}

fn read_google(body: &Value) -> Parsed {
    Parsed {
        content: join_texts(array(body.pointer("/candidates/0/content/parts")), None),
        input_tokens: count(body, "/usageMetadata/promptTokenCount"),
        output_tokens: count(body, "/usageMetadata/candidatesTokenCount"),
        model: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn client_for(
        provider: ApiProvider,
        model: &str,
        route: &str,
        response: ResponseTemplate,
    ) -> (MockServer, ProviderClient) {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(route))
            .respond_with(response)
            .mount(&server)
            .await;
        let endpoint = ProviderEndpoint::new(server.uri(), "test-key");
        let client = ProviderClient::new(provider, model, endpoint).unwrap();
        (server, client)
    }

    #[test]
    fn test_endpoint_from_lookup() {
        let endpoint = ProviderEndpoint::from_lookup(ApiProvider::Google, |key| match key {
            "GEMINI_API_KEY" => Some("g".to_string()),
            "GOOGLE_HOST" => Some("http://localhost:9".to_string()),
            _ => None,
        });
        assert_eq!(endpoint.api_key, "g");
        assert_eq!(endpoint.host, "http://localhost:9");

        let endpoint = ProviderEndpoint::from_lookup(ApiProvider::OpenaiResponses, |_| None);
        assert!(!endpoint.has_key());
        assert_eq!(endpoint.host, "https://api.openai.com");
        assert!(format!("{endpoint:?}").contains("<unset>"));
    }

    #[test]
    fn test_system_prompt_only_when_present() {
        let mut request = CompletionRequest::new("hi");
        assert!(anthropic_body("m", &request).get("system").is_none());
        assert_eq!(chat_messages(&request).len(), 1);

        request.system = Some("  ");
        assert!(google_body(&request).get("systemInstruction").is_none());

        request.system = Some("be terse");
        assert_eq!(anthropic_body("m", &request)["system"], "be terse");
        assert_eq!(chat_messages(&request)[0]["role"], "system");
        assert_eq!(
            google_body(&request)["systemInstruction"]["parts"][0]["text"],
            "be terse"
        );
    }

    #[tokio::test]
    async fn test_anthropic_completion() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/messages"))
            .and(header("x-api-key", "test-key"))
            .and(header("anthropic-version", ANTHROPIC_VERSION))
            .and(body_partial_json(json!({ "model": "claude-x", "max_tokens": 4096 })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "content": [
                    { "type": "text", "text": "Hello " },
                    { "type": "tool_use", "id": "t" },
                    { "type": "text", "text": "world" }
                ],
                "model": "claude-x-20250101",
                "usage": { "input_tokens": 12, "output_tokens": 15 }
            })))
            .mount(&server)
            .await;
        let client = ProviderClient::new(
            ApiProvider::Anthropic,
            "claude-x",
            ProviderEndpoint::new(server.uri(), "test-key"),
        )
        .unwrap();

        let completion = client.complete(&CompletionRequest::new("Hi")).await.unwrap();
        assert_eq!(completion.content, "Hello world");
        assert_eq!(completion.input_tokens, 12);
        assert_eq!(completion.output_tokens, 15);
        assert_eq!(completion.model, "claude-x-20250101");
    }

    #[tokio::test]
    async fn test_openai_chat_completion() {
        let (_server, client) = client_for(
            ApiProvider::Openai,
            "gpt-x",
            "/v1/chat/completions",
            ResponseTemplate::new(200).set_body_json(json!({
                "model": "gpt-x-2025",
                "choices": [{ "message": { "role": "assistant", "content": "done" } }],
                "usage": { "prompt_tokens": 9, "completion_tokens": 2 }
            })),
        )
        .await;
        let completion = client.complete(&CompletionRequest::new("Hi")).await.unwrap();
        assert_eq!(completion.content, "done");
        assert_eq!((completion.input_tokens, completion.output_tokens), (9, 2));
        assert_eq!(completion.model, "gpt-x-2025");
    }

    #[tokio::test]
    async fn test_openai_responses_skips_reasoning() {
        let (_server, client) = client_for(
            ApiProvider::OpenaiResponses,
            "o-x",
            "/v1/responses",
            ResponseTemplate::new(200).set_body_json(json!({
                "model": "o-x",
                "output": [
                    { "type": "reasoning", "summary": [] },
                    { "type": "message", "content": [
                        { "type": "output_text", "text": "part one, " },
                        { "type": "refusal", "text": "no" },
                        { "type": "output_text", "text": "part two" }
                    ]}
                ],
                "usage": { "input_tokens": 20, "output_tokens": 30 }
            })),
        )
        .await;
        let completion = client.complete(&CompletionRequest::new("Hi")).await.unwrap();
        assert_eq!(completion.content, "part one, part two");
        assert_eq!(completion.output_tokens, 30);
    }

    #[tokio::test]
    async fn test_google_completion_uses_configured_model() {
        let (_server, client) = client_for(
            ApiProvider::Google,
            "gemini-x",
            "/v1beta/models/gemini-x:generateContent",
            ResponseTemplate::new(200).set_body_json(json!({
                "candidates": [{ "content": { "parts": [{ "text": "a" }, { "text": "b" }] } }],
                "usageMetadata": { "promptTokenCount": 4, "candidatesTokenCount": 1 }
            })),
        )
        .await;
        let completion = client.complete(&CompletionRequest::new("Hi")).await.unwrap();
        assert_eq!(completion.content, "ab");
        assert_eq!(completion.model, "gemini-x");
        assert_eq!(completion.input_tokens, 4);
    }

    #[tokio::test]
    async fn test_throttling_is_rate_limited() {
        let (_server, client) = client_for(
            ApiProvider::Anthropic,
            "m",
            "/v1/messages",
            ResponseTemplate::new(429).set_body_string(
                r#"{"type":"error","error":{"type":"rate_limit_error","message":"slow down"}}"#,
            ),
        )
        .await;
        let err = client.complete(&CompletionRequest::new("Hi")).await.unwrap_err();
        assert!(err.is_rate_limited(), "{err}");

        let (_server, client) = client_for(
            ApiProvider::Google,
            "g",
            "/v1beta/models/g:generateContent",
            ResponseTemplate::new(400).set_body_string(r#"{"error":{"status":"RESOURCE_EXHAUSTED"}}"#),
        )
        .await;
        let err = client.complete(&CompletionRequest::new("Hi")).await.unwrap_err();
        assert!(err.is_rate_limited(), "{err}");
    }

    #[tokio::test]
    async fn test_other_failures_are_provider_errors() {
        let (_server, client) = client_for(
            ApiProvider::Openai,
            "m",
            "/v1/chat/completions",
            ResponseTemplate::new(400).set_body_string("bad model"),
        )
        .await;
        let err = client.complete(&CompletionRequest::new("Hi")).await.unwrap_err();
        assert!(
            matches!(&err, ExecutionError::Provider { message, .. } if message.contains("bad model")),
            "{err}"
        );
    }

    #[tokio::test]
    async fn test_missing_key_fails_before_sending() {
        let client = ProviderClient::new(
            ApiProvider::Anthropic,
            "m",
            ProviderEndpoint::new("http://127.0.0.1:9", ""),
        )
        .unwrap();
        let err = client.complete(&CompletionRequest::new("Hi")).await.unwrap_err();
        assert!(matches!(err, ExecutionError::Config(msg) if msg.contains("ANTHROPIC_API_KEY")));
    }
}
