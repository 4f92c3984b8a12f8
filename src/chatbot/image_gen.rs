//! Image generation through Pollinations (no API key).
//!
//! The user's description is first rewritten into a detailed English prompt
//! by the language model, then rendered by the `flux` model.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use rand::Rng;
use tracing::{debug, info, warn};

use crate::chatbot::green_api::check_status;
use crate::chatbot::services::{
    Content, GeneratedImage, ImageGenerator, LanguageModel, LlmMessage, Role,
};
use crate::error::{Error, Result};

const POLLINATIONS_URL: &str = "https://image.pollinations.ai/prompt";
const IMAGE_SIZE: u32 = 1024;
const RENDER_TIMEOUT: Duration = Duration::from_secs(90);
/// Smaller bodies are error pages, not images.
const MIN_IMAGE_BYTES: usize = 1000;

const ENHANCE_INSTRUCTIONS: &str = "You are an expert prompt engineer for AI image generation.
Transform the description below into a detailed prompt for Flux.
Output ONLY the enhanced prompt, in English, under 100 words.
Add style, lighting and composition details, an artistic style (photorealistic, digital art, anime...)
and quality tags such as detailed, high quality, 4k, masterpiece.

Description: ";

pub struct PollinationsClient {
    client: reqwest::Client,
    llm: Arc<dyn LanguageModel>,
    media_dir: PathBuf,
}

impl PollinationsClient {
    pub fn new(llm: Arc<dyn LanguageModel>, media_dir: PathBuf) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(RENDER_TIMEOUT).build()?;
        Ok(Self { client, llm, media_dir })
    }

    /// Falls back to the user's own prompt when the model is unavailable.
    async fn enhance_prompt(&self, prompt: &str, model: Option<&str>) -> String {
        let messages = [LlmMessage {
            role: Role::User,
            content: Content::Text(format!("{ENHANCE_INSTRUCTIONS}{prompt}")),
        }];
        match self.llm.complete(&messages, model).await {
            Ok(enhanced) => {
                let enhanced = strip_quotes(&enhanced);
                if enhanced.is_empty() {
                    prompt.to_string()
                } else {
                    debug!("🎨 Enhanced prompt: {enhanced}");
                    enhanced
                }
            }
            Err(e) => {
                warn!("Prompt enhancement failed: {e}, using original");
                strip_quotes(prompt)
            }
        }
    }
}

fn strip_quotes(s: &str) -> String {
    s.trim().trim_matches(|c| c == '"' || c == '\'').trim().to_string()
}

pub fn random_seed() -> u32 {
    rand::thread_rng().gen_range(1..=999_999)
}

pub fn build_url(prompt: &str, seed: u32) -> String {
    format!(
        "{POLLINATIONS_URL}/{}?width={IMAGE_SIZE}&height={IMAGE_SIZE}&model=flux&seed={seed}&nologo=true",
        urlencoding::encode(prompt.trim())
    )
}

#[async_trait]
impl ImageGenerator for PollinationsClient {
    async fn generate_image(&self, prompt: &str, model: Option<&str>) -> Result<GeneratedImage> {
        let final_prompt = self.enhance_prompt(prompt, model).await;
        let seed = random_seed();
        let url = build_url(&final_prompt, seed);
        info!("🎨 Requesting image from Pollinations (seed {seed})");

        let response = self.client.get(&url).send().await.map_err(Error::from_request)?;
        let response = check_status(response).await?;
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        if !content_type.contains("image") {
            return Err(Error::InvalidInput(format!("not an image: {content_type}")));
        }
        let bytes = response.bytes().await?;
        if bytes.len() < MIN_IMAGE_BYTES {
            return Err(Error::InvalidInput(format!("image too small: {} bytes", bytes.len())));
        }

        let unix = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or_default();
        let path = self.media_dir.join(format!("pollinations_{seed}_{unix}.png"));
        tokio::fs::write(&path, &bytes).await?;
        info!("🎨 Saved {} bytes to {}", bytes.len(), path.display());

        Ok(GeneratedImage { path, prompt: final_prompt, seed })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_url() {
        let url = build_url("  a cat in space, 4k  ", 42);
        assert_eq!(
            url,
            "https://image.pollinations.ai/prompt/a%20cat%20in%20space%2C%204k\
             ?width=1024&height=1024&model=flux&seed=42&nologo=true"
        );
    }

    #[test]
    fn test_build_url_encodes_query_characters() {
        let url = build_url("what? a=b&c", 1);
        assert!(url.contains("/prompt/what%3F%20a%3Db%26c?"));
    }

    #[test]
    fn test_seed_range() {
        for _ in 0..100 {
            let seed = random_seed();
            assert!((1..=999_999).contains(&seed));
        }
    }

    #[test]
    fn test_strip_quotes() {
        assert_eq!(strip_quotes("\"A cat\"\n"), "A cat");
        assert_eq!(strip_quotes("'dog'"), "dog");
    }
}
