pub mod openai;

pub use openai::OpenAiTts;

use crate::error::Result;
use async_trait::async_trait;

#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    /// Speak `text`, returning a WAV file's bytes. `voice` overrides the
    /// adapter's default voice.
    async fn synthesize(&self, text: &str, voice: Option<&str>) -> Result<Vec<u8>>;
    fn name(&self) -> &'static str;
}
