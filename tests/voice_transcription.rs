//! Integration tests for voice transcription against a live provider.
//!
//! These tests require:
//! 1. TRANSCRIPTION_API_KEY set to a key for an OpenAI-compatible transcription API
//! 2. ffmpeg installed for audio conversion
//!
//! Run with: cargo test --features integ_test --test voice_transcription

#[cfg(feature = "integ_test")]
mod tests {
    use std::path::PathBuf;
    use std::sync::Arc;
    use std::time::Duration;

    use greenrelay::chatbot::services::Transcriber;
    use greenrelay::chatbot::{CachedTranscriber, WhisperApiClient};
    use greenrelay::config::TranscriptionConfig;

    fn test_config() -> Option<TranscriptionConfig> {
        let api_key = std::env::var("TRANSCRIPTION_API_KEY").ok().filter(|k| !k.is_empty())?;
        Some(TranscriptionConfig {
            api_key,
            base_url: std::env::var("TRANSCRIPTION_BASE_URL")
                .unwrap_or_else(|_| "https://api.groq.com/openai/v1".to_string()),
            model: "whisper-large-v3-turbo".to_string(),
        })
    }

    /// Path to test audio files
    fn get_test_audio_dir() -> PathBuf {
        PathBuf::from("data/test/audio")
    }

    /// Requires data/test/audio/hello.ogg containing someone saying "hello" or similar.
    #[tokio::test]
    async fn test_transcribe_hello() {
        let Some(config) = test_config() else {
            eprintln!("Skipping test: TRANSCRIPTION_API_KEY not set");
            return;
        };
        let audio_path = get_test_audio_dir().join("hello.ogg");
        if !audio_path.exists() {
            eprintln!("Skipping test: test audio not found at {:?}", audio_path);
            return;
        }

        let client = WhisperApiClient::new(config, Duration::from_secs(60)).expect("client");
        let text = client.transcribe(&audio_path).await.expect("transcription failed").to_lowercase();
        println!("Transcribed: {}", text);

        assert!(
            text.contains("hello") || text.contains("hi") || text.contains("hey"),
            "Expected greeting in transcription, got: {}",
            text
        );
        // the converted mp3 is removed again
        assert!(!audio_path.with_extension("mp3").exists());
    }

    #[tokio::test]
    async fn test_cached_transcription_matches_live_result() {
        let Some(config) = test_config() else {
            eprintln!("Skipping test: TRANSCRIPTION_API_KEY not set");
            return;
        };
        let audio_path = get_test_audio_dir().join("hello.ogg");
        if !audio_path.exists() {
            eprintln!("Skipping test: test audio not found");
            return;
        }

        let client = WhisperApiClient::new(config, Duration::from_secs(60)).expect("client");
        let cached = CachedTranscriber::new(Arc::new(client));
        let first = cached.transcribe(&audio_path).await.expect("first call");
        let second = cached.transcribe(&audio_path).await.expect("second call");
        assert_eq!(first, second);
    }
}
