//! Forcing a phrase at the end of a generated answer.
//!
//! The processors in this module wait until the model wants to stop (its top choice is the end-of-sequence token)
//! and then force a fixed phrase, one token per step, before the model gets to stop. Forcing happens by raising the
//! score of the next phrase token to one above the current maximum, so that the host's own selection step (greedy
//! or sampling) still makes the final choice.
//!
//! Both processors keep per-stream progress and are meant for a single generation run: construct a new instance for
//! every run (or batch of runs). A reused instance starts out with the progress of the previous run.
use crate::context::{scoped, ExecutionContext};
use crate::scores::{BatchLogits, BatchScores, Scores};
use crate::tokenizer::PhraseTokenizer;
use crate::{BatchLogitsProcessor, BatchStep, LogitsProcessor, ProcessorError, TokenId};

/// Progress of forcing a phrase into one generation stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhraseState {
	/// Waiting for the model to predict end-of-sequence
	Idle,

	/// The given number of phrase tokens has been forced so far
	Injecting(usize),

	/// The complete phrase has been forced (or it was empty); nothing left to do
	Done,
}

/// Number of phrase tokens forced into a stream so far. Only ever moves forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PhraseCursor {
	position: usize,
}

impl PhraseCursor {
	pub fn position(&self) -> usize {
		self.position
	}
}

/// The tokens to force, together with the token that triggers forcing them
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Phrase {
	tokens: Vec<TokenId>,
	eos_token: TokenId,
}

impl Phrase {
	pub fn new(tokens: Vec<TokenId>, eos_token: TokenId) -> Phrase {
		Phrase { tokens, eos_token }
	}

	pub fn from_text<T: PhraseTokenizer + ?Sized>(text: &str, tokenizer: &T) -> Result<Phrase, ProcessorError> {
		let eos_token = tokenizer.eos_token_id().ok_or(ProcessorError::MissingEndOfSequenceToken)?;
		let tokens = tokenizer.encode(text)?;
		tracing::debug!(n_tokens = tokens.len(), eos_token, "phrase tokenized: {text:?} => {tokens:?}");
		Ok(Phrase { tokens, eos_token })
	}

	pub fn tokens(&self) -> &[TokenId] {
		&self.tokens
	}

	pub fn eos_token(&self) -> TokenId {
		self.eos_token
	}

	pub fn len(&self) -> usize {
		self.tokens.len()
	}

	pub fn is_empty(&self) -> bool {
		self.tokens.is_empty()
	}

	pub fn state(&self, cursor: &PhraseCursor) -> PhraseState {
		match cursor.position {
			position if position >= self.tokens.len() => PhraseState::Done,
			0 => PhraseState::Idle,
			position => PhraseState::Injecting(position),
		}
	}

	/// Perform one generation step for the stream at `cursor`. Returns the phrase token that was forced, if any.
	///
	/// When idle, nothing happens unless the end-of-sequence token has the highest score. Once triggered, the next
	/// phrase token is forced at every step regardless of the scores, until the phrase is complete. Scores without a
	/// maximum (empty, or all NaN) are left alone and do not advance the cursor.
	pub fn step<S: Scores + ?Sized>(&self, cursor: &mut PhraseCursor, scores: &mut S) -> Option<TokenId> {
		match self.state(cursor) {
			PhraseState::Done => return None,
			PhraseState::Idle => {
				if scores.argmax() != Some(self.eos_token) {
					return None;
				}
			}
			PhraseState::Injecting(_) => {}
		}

		let max_score = scores.max_score()?;
		let token = self.tokens[cursor.position];
		scores.set_score(token, max_score + 1.0);
		cursor.position += 1;
		Some(token)
	}

	/// Report that `token` was forced into a stream (or batch slot) that is now at `cursor`
	fn log_forced(&self, slot: Option<usize>, cursor: &PhraseCursor, token: TokenId) {
		match self.state(cursor) {
			PhraseState::Done => tracing::debug!(?slot, token, "forced last token of phrase"),
			_ if cursor.position == 1 => tracing::debug!(?slot, token, "end of sequence predicted; forcing phrase"),
			_ => tracing::trace!(?slot, token, position = cursor.position, "forced phrase token"),
		}
	}
}

/// Forces a phrase before a single generation stream ends
#[derive(Debug, Clone)]
pub struct ForceLastPhrase {
	phrase: Phrase,
	cursor: PhraseCursor,
}

impl ForceLastPhrase {
	pub fn new<T: PhraseTokenizer + ?Sized>(phrase: &str, tokenizer: &T) -> Result<ForceLastPhrase, ProcessorError> {
		Ok(Self::from_phrase(Phrase::from_text(phrase, tokenizer)?))
	}

	pub fn from_phrase(phrase: Phrase) -> ForceLastPhrase {
		ForceLastPhrase {
			phrase,
			cursor: PhraseCursor::default(),
		}
	}

	pub fn phrase(&self) -> &Phrase {
		&self.phrase
	}

	pub fn cursor(&self) -> PhraseCursor {
		self.cursor
	}

	pub fn state(&self) -> PhraseState {
		self.phrase.state(&self.cursor)
	}

	/// Apply one step to `scores`, returning the forced token (if any)
	pub fn apply<S: Scores + ?Sized>(&mut self, scores: &mut S) -> Option<TokenId> {
		let forced = self.phrase.step(&mut self.cursor, scores)?;
		self.phrase.log_forced(None, &self.cursor, forced);
		Some(forced)
	}
}

impl LogitsProcessor for ForceLastPhrase {
	fn process(&mut self, _prompt_tokens: &[TokenId], _past_tokens: &[TokenId], scores: &mut [f32]) {
		self.apply(scores);
	}
}

/// Forces a phrase before each generation stream in a batch ends. Every slot in the batch has its own progress.
#[derive(Debug, Clone)]
pub struct BatchForceLastPhrase {
	phrase: Phrase,
	cursors: Vec<PhraseCursor>,
}

impl BatchForceLastPhrase {
	pub fn new<T: PhraseTokenizer + ?Sized>(phrase: &str, tokenizer: &T, batch_size: usize) -> Result<BatchForceLastPhrase, ProcessorError> {
		Self::from_phrase(Phrase::from_text(phrase, tokenizer)?, batch_size)
	}

	pub fn from_phrase(phrase: Phrase, batch_size: usize) -> Result<BatchForceLastPhrase, ProcessorError> {
		if batch_size == 0 {
			return Err(ProcessorError::EmptyBatch);
		}

		Ok(BatchForceLastPhrase {
			phrase,
			cursors: vec![PhraseCursor::default(); batch_size],
		})
	}

	pub fn phrase(&self) -> &Phrase {
		&self.phrase
	}

	pub fn batch_size(&self) -> usize {
		self.cursors.len()
	}

	pub fn cursor(&self, slot: usize) -> Option<PhraseCursor> {
		self.cursors.get(slot).copied()
	}

	pub fn state(&self, slot: usize) -> Option<PhraseState> {
		self.cursors.get(slot).map(|cursor| self.phrase.state(cursor))
	}

	/// Apply one step to every slot of `logits`, in slot order. Slots beyond the batch size this processor was
	/// constructed for are left untouched.
	pub fn apply<B: BatchScores + ?Sized>(&mut self, logits: &mut B) {
		let n_slots = logits.batch_size();
		if n_slots > self.cursors.len() {
			tracing::warn!(
				"batch has {n_slots} slots but phrase forcing was set up for {}; ignoring the remaining slots",
				self.cursors.len()
			);
		}

		for (slot, cursor) in self.cursors.iter_mut().enumerate().take(n_slots) {
			let mut scores = logits.slot(slot);
			if let Some(forced) = self.phrase.step(cursor, &mut scores) {
				self.phrase.log_forced(Some(slot), cursor, forced);
			}
		}
	}
}

impl BatchLogitsProcessor for BatchForceLastPhrase {
	fn process_batch(&mut self, step: &BatchStep<'_>, logits: &mut BatchLogits, context: &dyn ExecutionContext) {
		scoped(context, step.stream, || self.apply(logits));
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn states_follow_cursor() {
		let phrase = Phrase::new(vec![4, 5], 0);
		let mut cursor = PhraseCursor::default();
		assert_eq!(phrase.state(&cursor), PhraseState::Idle);
		cursor.position = 1;
		assert_eq!(phrase.state(&cursor), PhraseState::Injecting(1));
		cursor.position = 2;
		assert_eq!(phrase.state(&cursor), PhraseState::Done);
	}

	#[test]
	fn empty_phrase_is_born_done() {
		let phrase = Phrase::new(vec![], 0);
		assert_eq!(phrase.state(&PhraseCursor::default()), PhraseState::Done);
	}

	#[test]
	fn empty_scores_do_not_advance() {
		let phrase = Phrase::new(vec![1, 2], 0);
		let mut cursor = PhraseCursor { position: 1 };
		let mut scores: Vec<f32> = vec![];
		assert_eq!(phrase.step(&mut cursor, &mut scores), None);
		assert_eq!(cursor.position(), 1);
	}

	#[tracing_test::traced_test]
	#[test]
	fn forcing_is_logged_with_slot() {
		let mut single = ForceLastPhrase::from_phrase(Phrase::new(vec![2, 1], 0));
		single.apply(&mut vec![3.0f32, 1.0, 2.0]);
		assert!(logs_contain("slot=None"));
		assert!(logs_contain("end of sequence predicted; forcing phrase"));

		let mut batch = BatchForceLastPhrase::from_phrase(Phrase::new(vec![2, 1], 0), 2).unwrap();
		let mut rows: Vec<Vec<f32>> = vec![vec![0.0, 1.0, 0.0], vec![3.0, 1.0, 2.0]];
		batch.apply(rows.as_mut_slice());
		batch.apply(rows.as_mut_slice());
		assert!(logs_contain("slot=Some(1)"));
		assert!(logs_contain("forced last token of phrase"));
		assert!(!logs_contain("slot=Some(0)"));
	}

	#[test]
	fn single_token_phrase_finishes_on_trigger() {
		let phrase = Phrase::new(vec![2], 0);
		let mut cursor = PhraseCursor::default();
		let mut scores: Vec<f32> = vec![3.0, 1.0, 2.0];
		assert_eq!(phrase.step(&mut cursor, &mut scores), Some(2));
		assert_eq!(scores, vec![3.0, 1.0, 4.0]);
		assert_eq!(phrase.state(&cursor), PhraseState::Done);
	}
}
