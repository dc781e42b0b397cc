use llm::TokenizationError;
use thiserror::Error;

use crate::TokenId;

#[derive(Error, Debug)]
pub enum TokenizerError {
	#[error("tokenization error: {0}")]
	Tokenization(#[from] TokenizationError),

	#[error("invalid phrase: {0}")]
	InvalidPhrase(String),
}

/// The tokenizer of the model that is being generated from, as far as processors need it
pub trait PhraseTokenizer {
	/// The token the model emits when it wants to stop generating
	fn eos_token_id(&self) -> Option<TokenId>;

	/// Tokenize `text` without adding any special (e.g. beginning-of-text) tokens
	fn encode(&self, text: &str) -> Result<Vec<TokenId>, TokenizerError>;
}

impl PhraseTokenizer for dyn llm::Model {
	fn eos_token_id(&self) -> Option<TokenId> {
		Some(self.eot_token_id())
	}

	fn encode(&self, text: &str) -> Result<Vec<TokenId>, TokenizerError> {
		Ok(self.tokenizer().tokenize(text, false)?.into_iter().map(|(_, token_id)| token_id).collect())
	}
}
