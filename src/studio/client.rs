//! DashScope-compatible model client.
//!
//! Story segmentation goes through the OpenAI-compatible chat endpoint in
//! JSON-object mode; character analysis and image generation go through
//! the native multimodal generation endpoint. The provider is opaque to
//! this service: each call returns text or an image URL, or fails.

use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, warn};

use super::config::StudioConfig;
use crate::error::ApiError;

const BREAKDOWN_SYSTEM_PROMPT: &str = "You are an assistant that parses stories into storyboard \
    scenes. Your output MUST be a valid JSON object.";

const ANALYZE_PROMPT: &str = "Describe the key visual features of the character in this image in \
    detail. Focus on hairstyle, hair color, face shape, facial features, clothing style and \
    color, and any prominent accessories.";

pub struct StudioClient {
    http: reqwest::Client,
    config: StudioConfig,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: String,
}

#[derive(Debug, Deserialize)]
struct MultiModalResponse {
    output: MultiModalOutput,
}

#[derive(Debug, Deserialize)]
struct MultiModalOutput {
    choices: Vec<MultiModalChoice>,
}

#[derive(Debug, Deserialize)]
struct MultiModalChoice {
    message: MultiModalMessage,
}

#[derive(Debug, Deserialize)]
struct MultiModalMessage {
    /// Content items are maps like `{"text": ...}` or `{"image": ...}`.
    content: Vec<Value>,
}

impl StudioClient {
    pub fn new(config: StudioConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(120))
            .build()
            .context("Failed to create HTTP client")?;
        Ok(Self { http, config })
    }

    /// Split a story into storyboard scenes.
    pub async fn breakdown_story(&self, story: &str) -> Result<Vec<Value>, ApiError> {
        let prompt = format!(
            "Your task is to parse the following user story or report into a sequence of \
             individual scenes. The final output should be a JSON object containing a single \
             key \"scenes\" whose value is the list of scenes in order.\n\
             \n\
             Here is the original text:\n---\n{story}\n---"
        );

        let body = json!({
            "model": self.config.story_model,
            "messages": [
                {"role": "system", "content": BREAKDOWN_SYSTEM_PROMPT},
                {"role": "user", "content": prompt},
            ],
            "response_format": {"type": "json_object"},
        });

        debug!(model = %self.config.story_model, "requesting story breakdown");

        let response: ChatResponse = self
            .post_json(format!("{}/chat/completions", self.config.chat_base_url), &body)
            .await?;

        let content = response
            .choices
            .first()
            .map(|c| c.message.content.as_str())
            .ok_or_else(|| ApiError::Upstream("model returned no choices".into()))?;

        extract_scenes(content)
    }

    /// Describe the character in a base64-encoded image.
    pub async fn analyze_character(&self, image_base64: &str) -> Result<String, ApiError> {
        let image = normalize_data_url(image_base64);

        let body = json!({
            "model": self.config.vision_model,
            "input": {"messages": [{
                "role": "user",
                "content": [
                    {"image": image},
                    {"text": ANALYZE_PROMPT},
                ],
            }]},
        });

        debug!(model = %self.config.vision_model, "requesting character analysis");

        let response: MultiModalResponse = self
            .post_json(self.config.multimodal_url.clone(), &body)
            .await?;
        first_content_field(&response, "text")
    }

    /// Generate an image from a prompt, returning its URL.
    pub async fn generate_image(&self, prompt: &str) -> Result<String, ApiError> {
        let body = json!({
            "model": self.config.image_model,
            "input": {"messages": [{
                "role": "user",
                "content": [{"text": prompt}],
            }]},
            "parameters": {"result_format": "message"},
        });

        debug!(model = %self.config.image_model, "requesting image generation");

        let response: MultiModalResponse = self
            .post_json(self.config.multimodal_url.clone(), &body)
            .await?;
        first_content_field(&response, "image")
    }

    async fn post_json<T: for<'de> Deserialize<'de>>(
        &self,
        url: String,
        body: &Value,
    ) -> Result<T, ApiError> {
        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.config.api_key)
            .json(body)
            .send()
            .await
            .map_err(|e| ApiError::Upstream(format!("model request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            // Provider errors carry {code, message}; keep them in the logs.
            let detail: Value = response.json().await.unwrap_or(Value::Null);
            warn!(%status, %detail, "model API returned an error");
            return Err(ApiError::Upstream(format!(
                "model API returned status {status}"
            )));
        }

        response
            .json()
            .await
            .map_err(|e| ApiError::Upstream(format!("unparseable model response: {e}")))
    }
}

/// Pull the scene list out of the model's JSON reply. The model is asked
/// for `{"scenes": [...]}` but sometimes wraps the list under another key
/// or returns a bare array.
fn extract_scenes(content: &str) -> Result<Vec<Value>, ApiError> {
    let parsed: Value = serde_json::from_str(content)
        .map_err(|_| ApiError::Upstream("model returned invalid JSON".into()))?;

    match parsed {
        Value::Array(scenes) => Ok(scenes),
        Value::Object(map) => map
            .into_iter()
            .find_map(|(_, value)| match value {
                Value::Array(scenes) => Some(scenes),
                _ => None,
            })
            .ok_or_else(|| ApiError::Upstream("model reply had no scene list".into())),
        _ => Err(ApiError::Upstream("model reply had no scene list".into())),
    }
}

fn first_content_field(response: &MultiModalResponse, field: &str) -> Result<String, ApiError> {
    response
        .output
        .choices
        .first()
        .and_then(|c| c.message.content.first())
        .and_then(|item| item.get(field))
        .and_then(|v| v.as_str())
        .map(str::to_string)
        .ok_or_else(|| ApiError::Upstream(format!("model reply had no '{field}' content")))
}

/// The multimodal endpoint wants data URLs; bare base64 gets wrapped.
fn normalize_data_url(image_base64: &str) -> String {
    if image_base64.starts_with("data:image") {
        image_base64.to_string()
    } else {
        let payload = image_base64.rsplit(',').next().unwrap_or(image_base64);
        format!("data:image/png;base64,{payload}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config(base: &str) -> StudioConfig {
        StudioConfig {
            api_key: "sk-test".to_string(),
            chat_base_url: base.to_string(),
            multimodal_url: format!("{base}/multimodal-generation/generation"),
            story_model: "qwen-plus".to_string(),
            vision_model: "qwen3-vl-plus".to_string(),
            image_model: "qwen-image-plus".to_string(),
        }
    }

    #[test]
    fn test_extract_scenes_from_expected_shape() {
        let scenes = extract_scenes(r#"{"scenes": ["a meadow", "a storm"]}"#).unwrap();
        assert_eq!(scenes.len(), 2);
    }

    #[test]
    fn test_extract_scenes_from_other_key() {
        let scenes = extract_scenes(r#"{"shots": [{"n": 1}, {"n": 2}, {"n": 3}]}"#).unwrap();
        assert_eq!(scenes.len(), 3);
    }

    #[test]
    fn test_extract_scenes_from_bare_array() {
        let scenes = extract_scenes(r#"["one", "two"]"#).unwrap();
        assert_eq!(scenes.len(), 2);
    }

    #[test]
    fn test_extract_scenes_rejects_non_list_replies() {
        assert!(matches!(
            extract_scenes(r#"{"error": "too long"}"#),
            Err(ApiError::Upstream(_))
        ));
        assert!(matches!(extract_scenes("not json"), Err(ApiError::Upstream(_))));
    }

    #[test]
    fn test_normalize_data_url() {
        assert_eq!(
            normalize_data_url("data:image/jpeg;base64,abc"),
            "data:image/jpeg;base64,abc"
        );
        assert_eq!(normalize_data_url("abc"), "data:image/png;base64,abc");
        // A stray prefix before the comma is dropped.
        assert_eq!(
            normalize_data_url("base64,abc"),
            "data:image/png;base64,abc"
        );
    }

    #[tokio::test]
    async fn test_breakdown_story_roundtrip() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(body_partial_json(
                serde_json::json!({"model": "qwen-plus", "response_format": {"type": "json_object"}}),
            ))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "choices": [{"message": {"content": "{\"scenes\": [\"dawn\", \"dusk\"]}"}}],
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = StudioClient::new(config(&server.uri())).unwrap();
        let scenes = client.breakdown_story("a tale of two light levels").await.unwrap();
        assert_eq!(scenes, vec![serde_json::json!("dawn"), serde_json::json!("dusk")]);
    }

    #[tokio::test]
    async fn test_generate_image_returns_url() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/multimodal-generation/generation"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "output": {"choices": [{"message": {"content": [
                    {"image": "https://cdn.example.com/img/1.png"},
                ]}}]},
            })))
            .mount(&server)
            .await;

        let client = StudioClient::new(config(&server.uri())).unwrap();
        let url = client.generate_image("a lighthouse at dusk").await.unwrap();
        assert_eq!(url, "https://cdn.example.com/img/1.png");
    }

    #[tokio::test]
    async fn test_provider_error_maps_to_upstream() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/multimodal-generation/generation"))
            .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({
                "code": "InvalidParameter",
                "message": "prompt rejected",
            })))
            .mount(&server)
            .await;

        let client = StudioClient::new(config(&server.uri())).unwrap();
        let result = client.analyze_character("abc").await;
        assert!(matches!(result, Err(ApiError::Upstream(_))));
    }
}
