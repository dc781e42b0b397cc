use std::collections::HashMap;

use poly_logits::{
	phrase::{ForceLastPhrase, Phrase, PhraseState},
	scores::Scores,
	tokenizer::{PhraseTokenizer, TokenizerError},
	LogitsProcessor, ProcessorError, TokenId,
};
use tracing_test::traced_test;

const EOS: TokenId = 0;
const VOCAB_SIZE: usize = 10;

/// Tokenizes by splitting on whitespace and looking up each word
struct WordTokenizer {
	words: HashMap<&'static str, TokenId>,
	eos: Option<TokenId>,
}

impl WordTokenizer {
	fn new(eos: Option<TokenId>) -> WordTokenizer {
		let words = [("thanks", 5), ("for", 9), ("asking", 2)].into_iter().collect();
		WordTokenizer { words, eos }
	}
}

impl PhraseTokenizer for WordTokenizer {
	fn eos_token_id(&self) -> Option<TokenId> {
		self.eos
	}

	fn encode(&self, text: &str) -> Result<Vec<TokenId>, TokenizerError> {
		text.split_whitespace()
			.map(|word| self.words.get(word).copied().ok_or_else(|| TokenizerError::InvalidPhrase(word.to_string())))
			.collect()
	}
}

/// Scores where `top` has the highest score
fn scores_with_top(top: TokenId, top_score: f32) -> Vec<f32> {
	let mut scores: Vec<f32> = (0..VOCAB_SIZE).map(|i| (i as f32) * 0.1 - 2.0).collect();
	scores[top as usize] = top_score;
	scores
}

/// Deterministic pseudo-random scores in [-50, 50)
fn noisy_scores(step: usize) -> Vec<f32> {
	(0..VOCAB_SIZE).map(|i| ((i * 7919 + step * 104_729) % 1000) as f32 / 10.0 - 50.0).collect()
}

#[traced_test]
#[test]
pub fn test_idle_while_eos_is_not_top() {
	let mut forcer = ForceLastPhrase::from_phrase(Phrase::new(vec![5, 9, 2], EOS));

	for step in 0..100 {
		let top = 1 + (step % (VOCAB_SIZE - 1)) as TokenId;
		let original = scores_with_top(top, 10.0);
		let mut scores = original.clone();
		forcer.process(&[1, 2, 3], &[], &mut scores);
		assert_eq!(scores, original);
		assert_eq!(forcer.cursor().position(), 0);
		assert_eq!(forcer.state(), PhraseState::Idle);
	}
}

#[traced_test]
#[test]
pub fn test_trigger_and_full_injection() {
	let mut forcer = ForceLastPhrase::from_phrase(Phrase::new(vec![5, 9, 2], EOS));

	// The model wants to stop
	let mut scores = scores_with_top(EOS, 3.0);
	assert_eq!(forcer.apply(&mut scores), Some(5));
	assert_eq!(scores[5], 4.0);
	assert_eq!(scores.argmax(), Some(5));
	assert_eq!(forcer.state(), PhraseState::Injecting(1));

	// Next token is forced regardless of what the model prefers
	let mut scores = scores_with_top(7, 2.5);
	assert_eq!(forcer.apply(&mut scores), Some(9));
	assert_eq!(scores[9], 3.5);
	assert_eq!(scores.argmax(), Some(9));
	assert_eq!(forcer.state(), PhraseState::Injecting(2));

	// Also when the model still wants to stop
	let mut scores = scores_with_top(EOS, 8.0);
	assert_eq!(forcer.apply(&mut scores), Some(2));
	assert_eq!(scores[2], 9.0);
	assert_eq!(scores.argmax(), Some(2));
	assert_eq!(forcer.state(), PhraseState::Done);

	// Phrase is complete, the model may stop now
	let original = scores_with_top(EOS, 8.0);
	let mut scores = original.clone();
	assert_eq!(forcer.apply(&mut scores), None);
	assert_eq!(scores, original);
}

#[traced_test]
#[test]
pub fn test_negative_scores() {
	let mut forcer = ForceLastPhrase::from_phrase(Phrase::new(vec![5, 9, 2], EOS));
	let mut scores: Vec<f32> = vec![-1.0, -7.5, -3.0, -4.0, -2.0, -9.0, -6.0, -8.0, -5.0, -10.0];
	forcer.process(&[], &[], &mut scores);
	assert_eq!(scores[5], 0.0);
	assert_eq!(scores.argmax(), Some(5));
}

#[traced_test]
#[test]
pub fn test_empty_phrase_is_noop() {
	let mut forcer = ForceLastPhrase::from_phrase(Phrase::new(vec![], EOS));
	assert_eq!(forcer.state(), PhraseState::Done);

	for step in 0..20 {
		let original = if step % 2 == 0 { scores_with_top(EOS, 5.0) } else { noisy_scores(step) };
		let mut scores = original.clone();
		forcer.process(&[], &[], &mut scores);
		assert_eq!(scores, original);
	}
	assert_eq!(forcer.cursor().position(), 0);
}

#[traced_test]
#[test]
pub fn test_terminal_state_is_idempotent() {
	let mut forcer = ForceLastPhrase::from_phrase(Phrase::new(vec![5, 9], EOS));
	forcer.apply(&mut scores_with_top(EOS, 1.0));
	forcer.apply(&mut noisy_scores(1));
	assert_eq!(forcer.state(), PhraseState::Done);

	for step in 0..50 {
		let original = if step % 3 == 0 { scores_with_top(EOS, 1.0) } else { noisy_scores(step) };
		let mut scores = original.clone();
		assert_eq!(forcer.apply(&mut scores), None);
		assert_eq!(scores, original);
		assert_eq!(forcer.cursor().position(), 2);
	}
}

#[traced_test]
#[test]
pub fn test_forced_score_is_previous_max_plus_one() {
	let phrase = vec![5, 9, 2, 2, 5, 1, 8];
	let mut forcer = ForceLastPhrase::from_phrase(Phrase::new(phrase.clone(), EOS));
	forcer.apply(&mut scores_with_top(EOS, 0.5));

	for step in 1..phrase.len() {
		let mut scores = noisy_scores(step);
		let previous_max = scores.max_score().unwrap();
		let forced = forcer.apply(&mut scores).unwrap();
		assert_eq!(forced, phrase[step]);
		assert_eq!(scores[forced as usize], previous_max + 1.0);
		for (token, score) in scores.iter().enumerate() {
			if token != forced as usize {
				assert!(scores[forced as usize] > *score);
			}
		}
	}
	assert_eq!(forcer.state(), PhraseState::Done);
}

#[traced_test]
#[test]
pub fn test_cursor_stays_within_phrase() {
	let phrase_len = 4;
	let mut forcer = ForceLastPhrase::from_phrase(Phrase::new(vec![3; phrase_len], EOS));
	let mut previous = 0;

	for step in 0..200 {
		let mut scores = if step % 17 == 0 { scores_with_top(EOS, 100.0) } else { noisy_scores(step) };
		forcer.apply(&mut scores);
		let position = forcer.cursor().position();
		assert!(position <= phrase_len);
		assert!(position == previous || position == previous + 1);
		previous = position;
	}
	assert_eq!(forcer.state(), PhraseState::Done);
}

#[traced_test]
#[test]
pub fn test_phrase_from_tokenizer() {
	let tokenizer = WordTokenizer::new(Some(EOS));
	let forcer = ForceLastPhrase::new("thanks for asking", &tokenizer).unwrap();
	assert_eq!(forcer.phrase().tokens(), &[5, 9, 2]);
	assert_eq!(forcer.phrase().eos_token(), EOS);

	let empty = ForceLastPhrase::new("", &tokenizer).unwrap();
	assert!(empty.phrase().is_empty());
	assert_eq!(empty.state(), PhraseState::Done);
}

#[traced_test]
#[test]
pub fn test_construction_errors() {
	let without_eos = WordTokenizer::new(None);
	assert!(matches!(
		ForceLastPhrase::new("thanks", &without_eos),
		Err(ProcessorError::MissingEndOfSequenceToken)
	));

	let tokenizer = WordTokenizer::new(Some(EOS));
	assert!(matches!(
		ForceLastPhrase::new("thanks for nothing", &tokenizer),
		Err(ProcessorError::Tokenizer(TokenizerError::InvalidPhrase(word))) if word == "nothing"
	));
}
