//! Backend for a remote OpenAI-compatible vision chat model.
//!
//! The photo URL is sent as an `image_url` content part together with a
//! prompt that asks for a JSON object `{"items": [...]}`.  The assistant's
//! text is parsed leniently (code fences stripped, bare arrays accepted)
//! and handed to the normalizer like any other raw detection list.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;
use tracing::debug;

use super::{send_json, DetectionBackend, DetectionFuture};
use crate::errors::DetectionError;

/// Default API base URL.
pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

const SYSTEM_PROMPT: &str = "You catalogue the contents of storage totes from photos. \
Respond with a JSON object of the form {\"items\": [...]} where every item has: \
name (short noun phrase), description (one sentence), category (one lowercase word such as \
electronics, kitchen, clothing, sports, books, toys, tools, decorations), quantity (integer >= 1), \
condition (one of new, excellent, good, fair, poor, damaged) and confidence (one of high, medium, low). \
Count identical items once with a quantity. Do not include the tote itself.";

const USER_PROMPT: &str = "List every distinct item visible in this photo.";

#[derive(Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: Vec<Value>,
    response_format: Value,
    temperature: f32,
}

#[derive(Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Deserialize)]
struct ChatResponseMessage {
    content: Option<String>,
}

/// Talks to a vision-capable chat completion API.
pub struct VisionModelBackend {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl VisionModelBackend {
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
    ) -> anyhow::Result<Self> {
        let api_key = api_key.into();
        if api_key.trim().is_empty() {
            anyhow::bail!("ai.api_key is required for the vision-model provider");
        }
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to create HTTP client: {e}"))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
            model: model.into(),
        })
    }

    fn request_body<'a>(&'a self, photo_url: &str) -> ChatCompletionRequest<'a> {
        ChatCompletionRequest {
            model: &self.model,
            messages: vec![
                json!({"role": "system", "content": SYSTEM_PROMPT}),
                json!({
                    "role": "user",
                    "content": [
                        {"type": "text", "text": USER_PROMPT},
                        {"type": "image_url", "image_url": {"url": photo_url}},
                    ]
                }),
            ],
            response_format: json!({"type": "json_object"}),
            temperature: 0.2,
        }
    }
}

/// Extract the item list from the model's reply text.
pub(crate) fn parse_items(content: &str) -> Result<Vec<Value>, DetectionError> {
    let text = strip_code_fence(content);
    let value: Value = serde_json::from_str(text)
        .map_err(|e| DetectionError::MalformedResponse(format!("model reply is not JSON: {e}")))?;
    match value {
        Value::Array(items) => Ok(items),
        Value::Object(mut map) => match map.remove("items") {
            Some(Value::Array(items)) => Ok(items),
            Some(Value::Null) | None => Ok(Vec::new()),
            Some(_) => Err(DetectionError::MalformedResponse(
                "\"items\" is not an array".to_string(),
            )),
        },
        _ => Err(DetectionError::MalformedResponse(
            "model reply is neither an object nor an array".to_string(),
        )),
    }
}

fn strip_code_fence(content: &str) -> &str {
    let trimmed = content.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // Drop an optional language tag on the opening fence.
    let rest = rest.split_once('\n').map(|(_, body)| body).unwrap_or(rest);
    rest.trim_end().trim_end_matches("```").trim()
}

impl DetectionBackend for VisionModelBackend {
    fn name(&self) -> &'static str {
        "vision-model"
    }

    fn endpoint(&self) -> &str {
        &self.base_url
    }

    fn probe_health(&self, timeout: Duration) -> Pin<Box<dyn Future<Output = bool> + Send + '_>> {
        Box::pin(async move {
            let url = format!("{}/models", self.base_url);
            let result = self
                .client
                .get(&url)
                .bearer_auth(&self.api_key)
                .timeout(timeout)
                .send()
                .await;
            match result {
                Ok(response) => response.status().is_success(),
                Err(e) => {
                    debug!(url = %url, error = %e, "Vision model health probe failed");
                    false
                }
            }
        })
    }

    fn analyze(&self, photo_url: &str, timeout: Duration) -> DetectionFuture<'_, Vec<Value>> {
        let photo_url = photo_url.to_string();
        Box::pin(async move {
            let url = format!("{}/chat/completions", self.base_url);
            let request = self
                .client
                .post(&url)
                .bearer_auth(&self.api_key)
                .json(&self.request_body(&photo_url));
            let response: ChatCompletionResponse = send_json(request, &url, timeout).await?;
            let content = response
                .choices
                .into_iter()
                .next()
                .and_then(|choice| choice.message.content)
                .ok_or_else(|| {
                    DetectionError::MalformedResponse("model returned no message".to_string())
                })?;
            parse_items(&content)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::{HeaderMap, StatusCode};
    use axum::routing::{get, post};
    use axum::{Json, Router};

    async fn spawn(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{addr}")
    }

    #[test]
    fn test_parse_items_object() {
        let items = parse_items(r#"{"items":[{"name":"Hammer"}]}"#).unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0]["name"], "Hammer");
    }

    #[test]
    fn test_parse_items_fenced_array() {
        let reply = "```json\n[{\"name\":\"Drill\"},{\"name\":\"Saw\"}]\n```";
        let items = parse_items(reply).unwrap();
        assert_eq!(items.len(), 2);
    }

    #[test]
    fn test_parse_items_missing_list_is_empty() {
        assert!(parse_items("{}").unwrap().is_empty());
    }

    #[test]
    fn test_parse_items_rejects_prose() {
        assert!(matches!(
            parse_items("I see a hammer."),
            Err(DetectionError::MalformedResponse(_))
        ));
        assert!(matches!(
            parse_items(r#"{"items":"hammer"}"#),
            Err(DetectionError::MalformedResponse(_))
        ));
    }

    #[test]
    fn test_empty_api_key_rejected() {
        assert!(VisionModelBackend::new(DEFAULT_BASE_URL, " ", "gpt-4o-mini").is_err());
    }

    #[tokio::test]
    async fn test_analyze_round_trip() {
        let base = spawn(Router::new().route(
            "/chat/completions",
            post(|headers: HeaderMap, Json(body): Json<Value>| async move {
                assert_eq!(headers["authorization"], "Bearer sk-test");
                let image = &body["messages"][1]["content"][1]["image_url"]["url"];
                let reply = json!({"items": [{"name": "Lamp", "sourcePhoto": image}]});
                Json(json!({
                    "choices": [{"message": {"role": "assistant", "content": reply.to_string()}}]
                }))
            }),
        ))
        .await;

        let backend = VisionModelBackend::new(base, "sk-test", "test-model").unwrap();
        let items = backend
            .analyze("http://photos/lamp.jpg", Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(items[0]["name"], "Lamp");
        assert_eq!(items[0]["sourcePhoto"], "http://photos/lamp.jpg");
    }

    #[tokio::test]
    async fn test_health_probe_uses_models_endpoint() {
        let base = spawn(Router::new().route(
            "/models",
            get(|headers: HeaderMap| async move {
                if headers.get("authorization").is_some() {
                    StatusCode::OK
                } else {
                    StatusCode::UNAUTHORIZED
                }
            }),
        ))
        .await;
        let backend = VisionModelBackend::new(base, "sk-test", "test-model").unwrap();
        assert!(backend.probe_health(Duration::from_secs(2)).await);
    }
}
