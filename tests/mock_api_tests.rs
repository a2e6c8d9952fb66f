//! HTTP adapter tests against local mock servers.
//!
//! Every adapter takes a base URL, so these never touch a real endpoint.

use autodub::audio::{encode_wav, AudioClip};
use autodub::error::DubError;
use autodub::synthesize::{OpenAiTts, SpeechSynthesizer};
use autodub::transcribe::{SpeechRecognizer, WhisperClient};
use autodub::translate::{GeminiTranslator, OpenAiTranslator, Translator};
use serde_json::json;
use std::time::Duration;
use tempfile::TempDir;
use wiremock::matchers::{body_partial_json, body_string_contains, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

// ============================================================================
// Whisper
// ============================================================================

mod whisper_tests {
    use super::*;

    fn audio_file(dir: &TempDir) -> std::path::PathBuf {
        let path = dir.path().join("source.wav");
        let clip = AudioClip::silent(500, 16_000);
        std::fs::write(&path, encode_wav(&clip).unwrap()).unwrap();
        path
    }

    fn client(server: &MockServer) -> WhisperClient {
        WhisperClient::new("test-key".to_string())
            .with_base_url(server.uri())
            .with_retry_delay(Duration::from_millis(1))
    }

    fn verbose_json() -> serde_json::Value {
        json!({
            "text": "Hello there. General Kenobi.",
            "duration": 3.2,
            "segments": [
                {"start": 0.0, "end": 1.4, "text": " Hello there.", "avg_logprob": -0.1},
                {"start": 1.6, "end": 1.6, "text": "   "},
                {"start": 1.8, "end": 3.1, "text": " General Kenobi."}
            ]
        })
    }

    #[tokio::test]
    async fn test_transcribe_returns_utterances() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/audio/transcriptions"))
            .and(header("authorization", "Bearer test-key"))
            .and(body_string_contains("verbose_json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(verbose_json()))
            .expect(1)
            .mount(&server)
            .await;

        let dir = TempDir::new().unwrap();
        let utterances = client(&server)
            .transcribe(&audio_file(&dir), Some("en"))
            .await
            .unwrap();

        assert_eq!(utterances.len(), 2);
        assert_eq!(utterances[0].text, "Hello there.");
        assert_eq!(utterances[0].start_ms, 0);
        assert_eq!(utterances[0].end_ms, 1400);
        assert!(utterances[0].confidence.unwrap() > 0.8);
        assert_eq!(utterances[1].start_ms, 1800);
        assert!(utterances[1].confidence.is_none());
    }

    #[tokio::test]
    async fn test_server_error_is_retried() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/audio/transcriptions"))
            .respond_with(ResponseTemplate::new(503).set_body_string("overloaded"))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/audio/transcriptions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(verbose_json()))
            .mount(&server)
            .await;

        let dir = TempDir::new().unwrap();
        let utterances = client(&server)
            .transcribe(&audio_file(&dir), None)
            .await
            .unwrap();
        assert_eq!(utterances.len(), 2);
    }

    #[tokio::test]
    async fn test_client_error_is_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/audio/transcriptions"))
            .respond_with(ResponseTemplate::new(401).set_body_json(json!({
                "error": {"message": "Incorrect API key provided", "type": "invalid_request_error"}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let dir = TempDir::new().unwrap();
        let err = client(&server)
            .transcribe(&audio_file(&dir), None)
            .await
            .unwrap_err();
        assert!(err.is_provider());
        assert!(err.to_string().contains("Incorrect API key"));
    }

    #[tokio::test]
    async fn test_missing_file_fails_before_request() {
        let server = MockServer::start().await;
        let err = client(&server)
            .transcribe(std::path::Path::new("/nonexistent/source.wav"), None)
            .await
            .unwrap_err();
        assert!(matches!(err, DubError::Io(_)));
    }
}

// ============================================================================
// Translators
// ============================================================================

mod translator_tests {
    use super::*;

    #[tokio::test]
    async fn test_gemini_translation() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/models/gemini-2.0-flash:generateContent"))
            .and(query_param("key", "gem-key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "candidates": [{"content": {"parts": [{"text": "  Hola mundo \n"}]}}]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let translator = GeminiTranslator::new("gem-key".to_string()).with_base_url(server.uri());
        let out = translator.translate("Hello world", "en", "es").await.unwrap();
        assert_eq!(out, "Hola mundo");
    }

    #[tokio::test]
    async fn test_gemini_empty_candidate_is_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"candidates": []})))
            .mount(&server)
            .await;

        let translator = GeminiTranslator::new("k".to_string()).with_base_url(server.uri());
        let err = translator.translate("Hello", "en", "es").await.unwrap_err();
        assert!(err.is_provider());
    }

    #[tokio::test]
    async fn test_gemini_http_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429).set_body_string("quota"))
            .mount(&server)
            .await;

        let translator = GeminiTranslator::new("k".to_string()).with_base_url(server.uri());
        let err = translator.translate("Hello", "en", "es").await.unwrap_err();
        assert!(err.to_string().contains("429"));
    }

    #[tokio::test]
    async fn test_openai_chat_translation() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(header("authorization", "Bearer sk-test"))
            .and(body_partial_json(json!({"model": "gpt-4o-mini"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "choices": [{"message": {"role": "assistant", "content": "[[0]] Bonjour\n[[1]] Au revoir"}}]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let translator = OpenAiTranslator::new("sk-test".to_string()).with_base_url(server.uri());
        let out = translator
            .translate("[[0]] Hello\n[[1]] Goodbye", "en", "fr")
            .await
            .unwrap();
        assert!(out.contains("[[1]] Au revoir"));
    }

    #[tokio::test]
    async fn test_openai_chat_error_message() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "error": {"message": "model not found"}
            })))
            .mount(&server)
            .await;

        let translator = OpenAiTranslator::new("sk-test".to_string()).with_base_url(server.uri());
        let err = translator.translate("Hello", "en", "fr").await.unwrap_err();
        assert!(err.to_string().contains("model not found"));
    }
}

// ============================================================================
// Speech synthesis
// ============================================================================

mod tts_tests {
    use super::*;

    #[tokio::test]
    async fn test_synthesize_returns_wav() {
        let server = MockServer::start().await;
        let wav = encode_wav(&AudioClip::silent(250, 24_000)).unwrap();
        Mock::given(method("POST"))
            .and(path("/audio/speech"))
            .and(body_partial_json(json!({"voice": "nova", "response_format": "wav"})))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(wav.clone()))
            .expect(1)
            .mount(&server)
            .await;

        let tts = OpenAiTts::new("sk-test".to_string()).with_base_url(server.uri());
        let bytes = tts.synthesize("Hola", Some("nova")).await.unwrap();
        assert_eq!(bytes, wav);
    }

    #[tokio::test]
    async fn test_synthesize_uses_default_voice() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/audio/speech"))
            .and(body_partial_json(json!({"voice": "echo"})))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![1u8, 2, 3]))
            .expect(1)
            .mount(&server)
            .await;

        let tts = OpenAiTts::new("sk-test".to_string())
            .with_voice("echo")
            .with_base_url(server.uri());
        assert_eq!(tts.synthesize("Hola", None).await.unwrap(), vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_synthesize_http_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/audio/speech"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .mount(&server)
            .await;

        let tts = OpenAiTts::new("sk-test".to_string()).with_base_url(server.uri());
        let err = tts.synthesize("Hola", None).await.unwrap_err();
        assert!(err.is_provider());
        assert!(err.to_string().contains("500"));
    }
}
