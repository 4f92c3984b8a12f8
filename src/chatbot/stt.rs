//! Speech-to-text through an OpenAI-compatible Whisper endpoint, plus a
//! content-addressed result cache.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use sha2::{Digest, Sha256};
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::chatbot::green_api::check_status;
use crate::chatbot::media::ScratchFile;
use crate::chatbot::services::Transcriber;
use crate::config::TranscriptionConfig;
use crate::error::{Error, Result};

/// How long a cached transcription stays valid.
pub const CACHE_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// Upper bound on one ffmpeg conversion.
pub const FFMPEG_TIMEOUT: Duration = Duration::from_secs(60);

pub struct WhisperApiClient {
    client: reqwest::Client,
    config: TranscriptionConfig,
}

#[derive(Deserialize)]
struct TranscriptionResponse {
    #[serde(default)]
    text: String,
}

impl WhisperApiClient {
    pub fn new(config: TranscriptionConfig, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client, config })
    }
}

/// Convert audio to mp3 with ffmpeg. Returns `None` when the input already is
/// mp3 or the conversion fails, in which case the original file is sent.
async fn convert_to_mp3(input: &Path) -> Option<ScratchFile> {
    let is_mp3 = input
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("mp3"));
    if is_mp3 {
        return None;
    }

    let output = ScratchFile::new(input.with_extension("mp3"));
    let mut ffmpeg = Command::new("ffmpeg");
    ffmpeg.arg("-i").arg(input).arg("-y").arg(output.path());
    run_converter(ffmpeg, FFMPEG_TIMEOUT).await.then_some(output)
}

/// Run a conversion command to completion. A timeout kills the child and
/// counts as a failure.
async fn run_converter(mut command: Command, limit: Duration) -> bool {
    command.stdout(Stdio::null()).stderr(Stdio::null()).kill_on_drop(true);
    match tokio::time::timeout(limit, command.status()).await {
        Ok(Ok(s)) if s.success() => true,
        Ok(Ok(s)) => {
            warn!("ffmpeg exited with {s}, sending original audio");
            false
        }
        Ok(Err(e)) => {
            warn!("Failed to run ffmpeg: {e}, sending original audio");
            false
        }
        Err(_) => {
            warn!("ffmpeg timed out after {}s, sending original audio", limit.as_secs_f32());
            false
        }
    }
}

#[async_trait]
impl Transcriber for WhisperApiClient {
    async fn transcribe(&self, path: &Path) -> Result<String> {
        if self.config.api_key.is_empty() {
            return Err(Error::NotConfigured("transcription API key"));
        }

        // Dropping the guard removes the converted file.
        let converted = convert_to_mp3(path).await;
        let upload: PathBuf = converted
            .as_ref()
            .map(|c| c.path().to_path_buf())
            .unwrap_or_else(|| path.to_path_buf());

        let bytes = tokio::fs::read(&upload).await?;
        debug!("🎙️ Transcribing {} ({} bytes)", upload.display(), bytes.len());

        let file_name = upload
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("audio.mp3")
            .to_string();
        let part = Part::bytes(bytes).file_name(file_name);
        let form = Form::new()
            .part("file", part)
            .text("model", self.config.model.clone())
            .text("response_format", "json");

        let response = self
            .client
            .post(format!("{}/audio/transcriptions", self.config.base_url))
            .bearer_auth(&self.config.api_key)
            .multipart(form)
            .send()
            .await
            .map_err(Error::from_request)?;
        let parsed: TranscriptionResponse = check_status(response).await?.json().await?;
        Ok(parsed.text.trim().to_string())
    }

    async fn health(&self) -> Result<String> {
        if self.config.api_key.is_empty() {
            return Err(Error::NotConfigured("transcription API key"));
        }
        let response = self
            .client
            .get(format!("{}/models", self.config.base_url))
            .bearer_auth(&self.config.api_key)
            .timeout(Duration::from_secs(10))
            .send()
            .await
            .map_err(Error::from_request)?;
        check_status(response).await?;
        Ok(format!("{} reachable", self.config.model))
    }
}

struct CacheEntry {
    stored: Instant,
    text: String,
}

/// Wraps a transcriber and caches results by the SHA-256 of the audio bytes.
pub struct CachedTranscriber {
    inner: Arc<dyn Transcriber>,
    ttl: Duration,
    entries: Mutex<HashMap<String, CacheEntry>>,
}

impl CachedTranscriber {
    pub fn new(inner: Arc<dyn Transcriber>) -> Self {
        Self::with_ttl(inner, CACHE_TTL)
    }

    pub fn with_ttl(inner: Arc<dyn Transcriber>, ttl: Duration) -> Self {
        Self { inner, ttl, entries: Mutex::new(HashMap::new()) }
    }

    fn lookup(&self, key: &str) -> Option<String> {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        let now = Instant::now();
        entries.retain(|_, entry| now.saturating_duration_since(entry.stored) < self.ttl);
        entries.get(key).map(|entry| entry.text.clone())
    }

    fn store(&self, key: String, text: &str) {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.insert(key, CacheEntry { stored: Instant::now(), text: text.to_string() });
    }
}

async fn file_digest(path: &Path) -> Result<String> {
    let bytes = tokio::fs::read(path).await?;
    Ok(hex::encode(Sha256::digest(&bytes)))
}

#[async_trait]
impl Transcriber for CachedTranscriber {
    async fn transcribe(&self, path: &Path) -> Result<String> {
        let key = file_digest(path).await?;
        if let Some(text) = self.lookup(&key) {
            info!("🎙️ Transcription cache hit for {}...", &key[..8]);
            return Ok(text);
        }

        let text = self.inner.transcribe(path).await?;
        if !text.is_empty() {
            self.store(key, &text);
        }
        Ok(text)
    }

    async fn health(&self) -> Result<String> {
        self.inner.health().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingTranscriber {
        calls: AtomicUsize,
        reply: String,
    }

    #[async_trait]
    impl Transcriber for CountingTranscriber {
        async fn transcribe(&self, _path: &Path) -> Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.reply.clone())
        }

        async fn health(&self) -> Result<String> {
            Ok("counting".into())
        }
    }

    fn counting(reply: &str) -> Arc<CountingTranscriber> {
        Arc::new(CountingTranscriber { calls: AtomicUsize::new(0), reply: reply.into() })
    }

    #[tokio::test]
    async fn test_cache_hit_by_content() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.ogg");
        let b = dir.path().join("b.ogg");
        std::fs::write(&a, b"same audio").unwrap();
        std::fs::write(&b, b"same audio").unwrap();

        let inner = counting("hello");
        let cached = CachedTranscriber::new(inner.clone());
        assert_eq!(cached.transcribe(&a).await.unwrap(), "hello");
        assert_eq!(cached.transcribe(&b).await.unwrap(), "hello");
        assert_eq!(inner.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_empty_result_not_cached() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.ogg");
        std::fs::write(&a, b"silence").unwrap();

        let inner = counting("");
        let cached = CachedTranscriber::new(inner.clone());
        cached.transcribe(&a).await.unwrap();
        cached.transcribe(&a).await.unwrap();
        assert_eq!(inner.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_expired_entry_is_refetched() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.ogg");
        std::fs::write(&a, b"audio").unwrap();

        let inner = counting("hi");
        let cached = CachedTranscriber::with_ttl(inner.clone(), Duration::ZERO);
        cached.transcribe(&a).await.unwrap();
        cached.transcribe(&a).await.unwrap();
        assert_eq!(inner.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_missing_key_is_not_configured() {
        let client = WhisperApiClient::new(
            TranscriptionConfig {
                api_key: String::new(),
                base_url: "http://127.0.0.1:9".into(),
                model: "whisper-large-v3-turbo".into(),
            },
            Duration::from_secs(1),
        )
        .unwrap();
        let err = client.transcribe(Path::new("/nonexistent.ogg")).await.unwrap_err();
        assert!(matches!(err, Error::NotConfigured(_)));
        let err = client.health().await.unwrap_err();
        assert!(matches!(err, Error::NotConfigured(_)));
    }

    #[tokio::test]
    async fn test_cached_health_delegates() {
        let cached = CachedTranscriber::new(counting("hi"));
        assert_eq!(cached.health().await.unwrap(), "counting");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_converter_success() {
        assert!(run_converter(Command::new("true"), Duration::from_secs(5)).await);
        assert!(!run_converter(Command::new("false"), Duration::from_secs(5)).await);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_stuck_converter_times_out() {
        let mut sleeper = Command::new("sleep");
        sleeper.arg("5");
        let started = Instant::now();
        assert!(!run_converter(sleeper, Duration::from_millis(50)).await);
        assert!(started.elapsed() < Duration::from_secs(4));
    }

    #[tokio::test]
    async fn test_missing_converter_is_a_failure() {
        let missing = Command::new("definitely-not-an-installed-converter");
        assert!(!run_converter(missing, Duration::from_secs(5)).await);
    }
}
