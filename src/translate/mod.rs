pub mod chunker;
pub mod gemini;
pub mod openai;

pub use chunker::{ChunkSegment, ChunkerConfig, TranslationChunk, TranslationChunker};
pub use gemini::GeminiTranslator;
pub use openai::OpenAiTranslator;

use crate::config::{Config, TranslatorBackend};
use crate::error::{DubError, Result};
use async_trait::async_trait;
use std::sync::Arc;

#[async_trait]
pub trait Translator: Send + Sync {
    /// Translate `text`. An empty or `auto` source language means "detect".
    async fn translate(&self, text: &str, source_lang: &str, target_lang: &str) -> Result<String>;
    fn name(&self) -> &'static str;
}

/// Build the translator selected in `config`.
pub fn create_translator(config: &Config) -> Result<Arc<dyn Translator>> {
    match config.translator {
        TranslatorBackend::Gemini => {
            let key = config
                .gemini_api_key
                .clone()
                .ok_or_else(|| DubError::Config("GEMINI_API_KEY not set".to_string()))?;
            Ok(Arc::new(
                GeminiTranslator::new(key)
                    .with_model(&config.gemini_model)
                    .with_base_url(&config.gemini_base_url),
            ))
        }
        TranslatorBackend::OpenAi => {
            let key = config
                .openai_api_key
                .clone()
                .ok_or_else(|| DubError::Config("OPENAI_API_KEY not set".to_string()))?;
            Ok(Arc::new(
                OpenAiTranslator::new(key)
                    .with_model(&config.openai_chat_model)
                    .with_base_url(&config.openai_base_url),
            ))
        }
    }
}

/// Build the translation prompt. Tagged chunk input gets instructions to keep the tags.
pub(crate) fn build_prompt(text: &str, source_lang: &str, target_lang: &str) -> String {
    let target = language_code_to_name(target_lang);
    let source = if source_lang.is_empty() || source_lang.eq_ignore_ascii_case("auto") {
        String::new()
    } else {
        format!(" from {}", language_code_to_name(source_lang))
    };

    if chunker::has_segment_tags(text) {
        format!(
            r#"Translate each of the following tagged lines{source} to {target}.
Each line starts with a tag like [[12]]. Keep every tag exactly as written, one translated line per tag.
Return ONLY the tagged translations, nothing else. Earlier lines are context for later ones.

Lines to translate:
{text}"#
        )
    } else {
        format!(
            r#"Translate the following text{source} to {target}.
Return ONLY the translated text, nothing else. Preserve all formatting and line breaks.

Text to translate:
{text}"#
        )
    }
}

/// Convert language code to human-readable name for better prompting.
pub(crate) fn language_code_to_name(code: &str) -> String {
    let name = match code.to_lowercase().as_str() {
        "en" => "English",
        "es" => "Spanish",
        "fr" => "French",
        "de" => "German",
        "it" => "Italian",
        "pt" => "Portuguese",
        "ru" => "Russian",
        "ja" => "Japanese",
        "ko" => "Korean",
        "zh" | "zh-cn" => "Simplified Chinese",
        "zh-tw" => "Traditional Chinese",
        "ar" => "Arabic",
        "hi" => "Hindi",
        "th" => "Thai",
        "vi" => "Vietnamese",
        "id" => "Indonesian",
        "ms" => "Malay",
        "nl" => "Dutch",
        "pl" => "Polish",
        "tr" => "Turkish",
        "uk" => "Ukrainian",
        "sv" => "Swedish",
        // Unknown codes go to the model as-is
        _ => return code.to_string(),
    };
    name.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_prompt_plain() {
        let prompt = build_prompt("Hello, world!", "en", "es");
        assert!(prompt.contains("from English to Spanish"));
        assert!(prompt.contains("Hello, world!"));
        assert!(!prompt.contains("tag"));
    }

    #[test]
    fn test_build_prompt_tagged() {
        let prompt = build_prompt("[[3]] Hello\n[[4]] Goodbye", "auto", "ja");
        assert!(prompt.contains("to Japanese"));
        assert!(!prompt.contains(" from "));
        assert!(prompt.contains("Keep every tag"));
        assert!(prompt.contains("[[4]] Goodbye"));
    }

    #[test]
    fn test_language_code_to_name() {
        assert_eq!(language_code_to_name("en"), "English");
        assert_eq!(language_code_to_name("ZH"), "Simplified Chinese");
        assert_eq!(language_code_to_name("xyz"), "xyz");
    }

    #[test]
    fn test_create_translator_requires_key() {
        let mut config = Config::default();
        assert!(create_translator(&config).is_err());

        config.gemini_api_key = Some("g".to_string());
        assert_eq!(create_translator(&config).unwrap().name(), "gemini");

        config.translator = TranslatorBackend::OpenAi;
        config.openai_api_key = Some("sk".to_string());
        assert_eq!(create_translator(&config).unwrap().name(), "openai");
    }
}
