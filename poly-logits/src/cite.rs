use std::collections::BTreeSet;

use crate::scores::Scores;
use crate::tokenizer::PhraseTokenizer;
use crate::{LogitsProcessor, ProcessorError, TokenId};

pub const DEFAULT_BOOST_FACTOR: f32 = 1.0;

/// Makes tokens that occur in the prompt more (or, with a negative boost factor, less) likely, optionally along with
/// the end-of-sequence token. Holds no state between steps.
#[derive(Debug, Clone)]
pub struct CiteFromPrompt {
	boost_factor: f32,
	boost_eos: bool,
	eos_token: TokenId,
}

impl CiteFromPrompt {
	pub fn new<T: PhraseTokenizer + ?Sized>(tokenizer: &T, boost_factor: f32, boost_eos: bool) -> Result<CiteFromPrompt, ProcessorError> {
		let eos_token = tokenizer.eos_token_id().ok_or(ProcessorError::MissingEndOfSequenceToken)?;
		Ok(Self::with_eos_token(eos_token, boost_factor, boost_eos))
	}

	pub fn with_eos_token(eos_token: TokenId, boost_factor: f32, boost_eos: bool) -> CiteFromPrompt {
		CiteFromPrompt {
			boost_factor,
			boost_eos,
			eos_token,
		}
	}

	pub fn boost_factor(&self) -> f32 {
		self.boost_factor
	}

	/// Add the boost factor once to every distinct prompt token (and the end-of-sequence token, if enabled)
	pub fn apply<S: Scores + ?Sized>(&self, prompt_tokens: &[TokenId], scores: &mut S) {
		let mut tokens: BTreeSet<TokenId> = prompt_tokens.iter().copied().collect();
		if self.boost_eos {
			tokens.insert(self.eos_token);
		}

		tracing::trace!(n_tokens = tokens.len(), boost_factor = self.boost_factor, "boosting prompt tokens");
		for token in tokens {
			scores.add_score(token, self.boost_factor);
		}
	}
}

impl LogitsProcessor for CiteFromPrompt {
	fn process(&mut self, prompt_tokens: &[TokenId], _past_tokens: &[TokenId], scores: &mut [f32]) {
		self.apply(prompt_tokens, scores);
	}
}
