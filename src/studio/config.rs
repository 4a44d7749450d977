//! Model API configuration.

/// Settings for the DashScope-compatible model API.
#[derive(Debug, Clone)]
pub struct StudioConfig {
    /// API key for the model provider.
    pub api_key: String,

    /// Base URL of the OpenAI-compatible chat endpoint.
    pub chat_base_url: String,

    /// URL of the multimodal generation endpoint.
    pub multimodal_url: String,

    /// Model used for story segmentation.
    pub story_model: String,

    /// Model used for character image analysis.
    pub vision_model: String,

    /// Model used for image generation.
    pub image_model: String,
}

impl StudioConfig {
    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), String> {
        if self.api_key.is_empty() {
            return Err("model API key is required".to_string());
        }
        if !self.chat_base_url.starts_with("https://") && !self.chat_base_url.starts_with("http://")
        {
            return Err("chat_base_url must be a valid HTTP(S) URL".to_string());
        }
        Ok(())
    }
}
