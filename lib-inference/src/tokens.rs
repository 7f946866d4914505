//! Centralized token accounting (spec §4.11): tokenizer selection per
//! model family, in-process caching, `validate_prompt`, and
//! `conversation_usage`.

use std::collections::HashMap;
use std::sync::Mutex;

use serde::Serialize;

use crate::InferenceError;

/// A counter over some model family's tokenizer.
trait Tokenizer: Send + Sync {
    fn count_tokens(&self, text: &str) -> usize;
}

struct TiktokenTokenizer(tiktoken_rs::CoreBPE);
impl Tokenizer for TiktokenTokenizer {
    fn count_tokens(&self, text: &str) -> usize {
        self.0.encode_with_special_tokens(text).len()
    }
}

struct HuggingFaceTokenizer(tokenizers::Tokenizer);
impl Tokenizer for HuggingFaceTokenizer {
    fn count_tokens(&self, text: &str) -> usize {
        self.0.encode(text, false).map(|enc| enc.len()).unwrap_or_else(|_| char_fallback(text))
    }
}

struct CharFallbackTokenizer;
impl Tokenizer for CharFallbackTokenizer {
    fn count_tokens(&self, text: &str) -> usize {
        char_fallback(text)
    }
}

/// The final fallback when no tokenizer loads at all (spec §4.11):
/// `len(text) // 4`.
fn char_fallback(text: &str) -> usize {
    text.chars().count() / 4
}

/// Best-effort Ollama model-family → HuggingFace tokenizer repo mapping
/// (spec §9: "a lookup table that may be extended without protocol
/// impact"). Not exhaustive by design.
const OLLAMA_HF_TOKENIZERS: &[(&str, &str)] = &[
    ("llama3", "meta-llama/Meta-Llama-3-8B"),
    ("llama2", "meta-llama/Llama-2-7b-hf"),
    ("mistral", "mistralai/Mistral-7B-v0.1"),
    ("mixtral", "mistralai/Mixtral-8x7B-v0.1"),
    ("qwen", "Qwen/Qwen2-7B"),
    ("gemma", "google/gemma-7b"),
    ("phi3", "microsoft/Phi-3-mini-4k-instruct"),
];

enum ModelFamily {
    OpenAiOrAnthropic,
    Ollama(String),
}

fn family_for_model(model: &str) -> ModelFamily {
    let lower = model.to_ascii_lowercase();
    if lower.starts_with("gpt") || lower.starts_with("o1") || lower.starts_with("text-") || lower.starts_with("claude") {
        return ModelFamily::OpenAiOrAnthropic;
    }
    let family = OLLAMA_HF_TOKENIZERS
        .iter()
        .find(|(prefix, _)| lower.starts_with(prefix))
        .map(|(prefix, _)| prefix.to_string())
        .unwrap_or(lower);
    ModelFamily::Ollama(family)
}

fn load_tokenizer(model: &str) -> std::sync::Arc<dyn Tokenizer> {
    match family_for_model(model) {
        ModelFamily::OpenAiOrAnthropic => match tiktoken_rs::get_bpe_from_model(model).or_else(|_| tiktoken_rs::cl100k_base()) {
            Ok(bpe) => std::sync::Arc::new(TiktokenTokenizer(bpe)),
            Err(_) => std::sync::Arc::new(CharFallbackTokenizer),
        },
        ModelFamily::Ollama(family) => {
            let repo = OLLAMA_HF_TOKENIZERS.iter().find(|(prefix, _)| *prefix == family).map(|(_, repo)| *repo);
            match repo.and_then(|repo| tokenizers::Tokenizer::from_pretrained(repo, None).ok()) {
                Some(tokenizer) => std::sync::Arc::new(HuggingFaceTokenizer(tokenizer)),
                None => std::sync::Arc::new(CharFallbackTokenizer),
            }
        }
    }
}

/// Caches loaded tokenizers per model name for the life of the process
/// (spec §4.11: "cached in-process").
#[derive(Default)]
pub struct TokenizerRegistry {
    cache: Mutex<HashMap<String, std::sync::Arc<dyn Tokenizer>>>,
}

impl TokenizerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn tokenizer_for(&self, model: &str) -> std::sync::Arc<dyn Tokenizer> {
        if let Some(tokenizer) = self.cache.lock().unwrap().get(model) {
            return tokenizer.clone();
        }
        let tokenizer = load_tokenizer(model);
        self.cache.lock().unwrap().insert(model.to_string(), tokenizer.clone());
        tokenizer
    }

    pub fn count_tokens(&self, model: &str, text: &str) -> usize {
        self.tokenizer_for(model).count_tokens(text)
    }

    /// `validate_prompt(prompt, model, context_window, buffer=0.2)` (spec
    /// §4.11): fails if the prompt would leave less than `buffer` of the
    /// context window free.
    pub fn validate_prompt(&self, prompt: &str, model: &str, context_window: usize, buffer: f64) -> Result<usize, InferenceError> {
        let prompt_tokens = self.count_tokens(model, prompt);
        let limit = ((context_window as f64) * (1.0 - buffer)).floor() as usize;
        if prompt_tokens > limit {
            return Err(InferenceError::PromptTooLarge { prompt_tokens, limit, context_window });
        }
        Ok(prompt_tokens)
    }
}

/// `conversation_usage` (spec §4.11): never sums prompt and response
/// tokens, since the prompt already contains the conversation history.
#[derive(Debug, Clone, Serialize)]
pub struct ConversationUsage {
    pub current_prompt_size: usize,
    pub latest_response_tokens: usize,
    pub message_count: usize,
}

pub fn conversation_usage(prompt_tokens: usize, response_tokens: usize, message_count: usize) -> ConversationUsage {
    ConversationUsage { current_prompt_size: prompt_tokens, latest_response_tokens: response_tokens, message_count }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn char_fallback_is_length_over_four() {
        assert_eq!(char_fallback("abcdefgh"), 2);
    }

    #[test]
    fn validate_prompt_rejects_a_prompt_that_blows_the_budget() {
        let registry = TokenizerRegistry::new();
        // A CharFallbackTokenizer family for an unmapped Ollama model keeps
        // this test hermetic (no network fetch of a real tokenizer).
        let long_prompt = "word ".repeat(1000);
        let result = registry.validate_prompt(&long_prompt, "some-unmapped-model", 100, 0.2);
        assert!(result.is_err());
    }

    #[test]
    fn conversation_usage_never_sums_prompt_and_response() {
        let usage = conversation_usage(500, 50, 3);
        assert_eq!(usage.current_prompt_size, 500);
        assert_eq!(usage.latest_response_tokens, 50);
        assert_ne!(usage.current_prompt_size, 550);
    }
}
