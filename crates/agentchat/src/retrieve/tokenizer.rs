//! Token counting for chunking and context budgets

use once_cell::sync::Lazy;
use parking_lot::Mutex;
use tiktoken_rs::{cl100k_base, CoreBPE};

/// Estimate used when the BPE tables are unavailable
const FALLBACK_CHARS_PER_TOKEN: usize = 4;

static CL100K_TOKENIZER: Lazy<Mutex<Option<CoreBPE>>> = Lazy::new(|| Mutex::new(cl100k_base().ok()));

/// Tokenizer family for a model
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TokenizerType {
    Cl100kBase,
    Fallback,
}

impl TokenizerType {
    pub fn from_model_name(model: &str) -> Self {
        let model = model.to_lowercase();
        let known = [
            "gpt-4", "gpt4", "gpt-3.5", "text-embedding", "llama", "mistral", "qwen", "codellama",
            "deepseek", "phi",
        ];
        if known.iter().any(|k| model.contains(k)) {
            Self::Cl100kBase
        } else {
            Self::Fallback
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Tokenizer {
    tokenizer_type: TokenizerType,
}

impl Tokenizer {
    pub fn new(model: &str) -> Self {
        Self::with_type(TokenizerType::from_model_name(model))
    }

    pub fn with_type(tokenizer_type: TokenizerType) -> Self {
        Self { tokenizer_type }
    }

    pub fn count_tokens(&self, text: &str) -> usize {
        if self.tokenizer_type == TokenizerType::Cl100kBase {
            if let Some(ref bpe) = *CL100K_TOKENIZER.lock() {
                return bpe.encode_with_special_tokens(text).len();
            }
        }
        text.len().div_ceil(FALLBACK_CHARS_PER_TOKEN)
    }

    /// Longest prefix of `text` that fits in `max_tokens`
    pub fn truncate_to_tokens(&self, text: &str, max_tokens: usize) -> String {
        if self.tokenizer_type == TokenizerType::Cl100kBase {
            if let Some(ref bpe) = *CL100K_TOKENIZER.lock() {
                let tokens = bpe.encode_with_special_tokens(text);
                if tokens.len() <= max_tokens {
                    return text.to_string();
                }
                if let Ok(decoded) = bpe.decode(tokens[..max_tokens].to_vec()) {
                    return decoded;
                }
            }
        }
        text.chars().take(max_tokens * FALLBACK_CHARS_PER_TOKEN).collect()
    }
}

impl Default for Tokenizer {
    fn default() -> Self {
        Self::with_type(TokenizerType::Cl100kBase)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tokenizer_type_detection() {
        assert_eq!(TokenizerType::from_model_name("gpt-4-32k"), TokenizerType::Cl100kBase);
        assert_eq!(TokenizerType::from_model_name("llama3.2"), TokenizerType::Cl100kBase);
        assert_eq!(TokenizerType::from_model_name("mystery"), TokenizerType::Fallback);
    }

    #[test]
    fn test_count_tokens() {
        let count = Tokenizer::default().count_tokens("Hello, world! This is a test.");
        assert!(count > 0);
        assert!(count < 20);
    }

    #[test]
    fn test_fallback_rounds_up() {
        let tokenizer = Tokenizer::with_type(TokenizerType::Fallback);
        assert_eq!(tokenizer.count_tokens("Hello world"), 3);
        assert_eq!(tokenizer.count_tokens(""), 0);
    }

    #[test]
    fn test_truncate_to_tokens() {
        let tokenizer = Tokenizer::default();
        let text = "This is a long text that should be truncated to fit within the token limit.";
        let truncated = tokenizer.truncate_to_tokens(text, 5);
        assert!(tokenizer.count_tokens(&truncated) <= 5);
        assert!(text.starts_with(&truncated));
    }
}
