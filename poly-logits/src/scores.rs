use thiserror::Error;

use crate::TokenId;

/// Operations a processor needs from the scores of a single generation stream at one step.
///
/// Token IDs index directly into the vocabulary. Writing to a token ID outside of the vocabulary is a programming
/// error and panics.
pub trait Scores {
	/// Number of entries (the size of the vocabulary)
	fn vocab_size(&self) -> usize;

	/// The highest score, or `None` when there are no (comparable) scores
	fn max_score(&self) -> Option<f32>;

	/// The token with the highest score. When several tokens share the highest score, the lowest token ID wins. NaN
	/// scores never win.
	fn argmax(&self) -> Option<TokenId>;

	/// Overwrite the score of a token
	fn set_score(&mut self, token: TokenId, score: f32);

	/// Add `delta` to the score of a token
	fn add_score(&mut self, token: TokenId, delta: f32);
}

/// Returns the index and value of the first maximum, skipping NaN
fn first_max(values: impl Iterator<Item = f32>) -> Option<(usize, f32)> {
	let mut best: Option<(usize, f32)> = None;
	for (index, value) in values.enumerate() {
		if value.is_nan() {
			continue;
		}
		match best {
			Some((_, best_value)) if value <= best_value => {}
			_ => best = Some((index, value)),
		}
	}
	best
}

impl Scores for [f32] {
	fn vocab_size(&self) -> usize {
		self.len()
	}

	fn max_score(&self) -> Option<f32> {
		first_max(self.iter().copied()).map(|(_, value)| value)
	}

	fn argmax(&self) -> Option<TokenId> {
		first_max(self.iter().copied()).map(|(index, _)| index as TokenId)
	}

	fn set_score(&mut self, token: TokenId, score: f32) {
		self[token as usize] = score;
	}

	fn add_score(&mut self, token: TokenId, delta: f32) {
		self[token as usize] += delta;
	}
}

impl Scores for Vec<f32> {
	fn vocab_size(&self) -> usize {
		self.as_slice().vocab_size()
	}

	fn max_score(&self) -> Option<f32> {
		self.as_slice().max_score()
	}

	fn argmax(&self) -> Option<TokenId> {
		self.as_slice().argmax()
	}

	fn set_score(&mut self, token: TokenId, score: f32) {
		self.as_mut_slice().set_score(token, score)
	}

	fn add_score(&mut self, token: TokenId, delta: f32) {
		self.as_mut_slice().add_score(token, delta)
	}
}

impl<S: Scores + ?Sized> Scores for &mut S {
	fn vocab_size(&self) -> usize {
		(**self).vocab_size()
	}

	fn max_score(&self) -> Option<f32> {
		(**self).max_score()
	}

	fn argmax(&self) -> Option<TokenId> {
		(**self).argmax()
	}

	fn set_score(&mut self, token: TokenId, score: f32) {
		(**self).set_score(token, score)
	}

	fn add_score(&mut self, token: TokenId, delta: f32) {
		(**self).add_score(token, delta)
	}
}

/// Scores for a batch of generation streams, addressable by slot index.
pub trait BatchScores {
	type Slot<'a>: Scores
	where
		Self: 'a;

	/// Number of slots in the batch
	fn batch_size(&self) -> usize;

	/// Scores of the slot at `index`. Panics when `index >= batch_size()`.
	fn slot(&mut self, index: usize) -> Self::Slot<'_>;
}

impl BatchScores for [Vec<f32>] {
	type Slot<'a> = &'a mut [f32]
	where
		Self: 'a;

	fn batch_size(&self) -> usize {
		self.len()
	}

	fn slot(&mut self, index: usize) -> Self::Slot<'_> {
		self[index].as_mut_slice()
	}
}

#[derive(Error, Debug, PartialEq, Eq)]
#[error("expected {expected} scores for shape [{sequences}, {batch_size}, {vocab_size}], got {actual}")]
pub struct ShapeError {
	pub sequences: usize,
	pub batch_size: usize,
	pub vocab_size: usize,
	pub expected: usize,
	pub actual: usize,
}

/// Dense scores for a batch, laid out row-major as `[sequences, batch_size, vocab_size]`. `sequences` is the number
/// of sequences returned per request (1 unless beam search or multiple return sequences are used).
#[derive(Debug, Clone, PartialEq)]
pub struct BatchLogits {
	sequences: usize,
	batch_size: usize,
	vocab_size: usize,
	data: Vec<f32>,
}

impl BatchLogits {
	pub fn new(sequences: usize, batch_size: usize, vocab_size: usize, data: Vec<f32>) -> Result<BatchLogits, ShapeError> {
		let expected = sequences * batch_size * vocab_size;
		if data.len() != expected {
			return Err(ShapeError {
				sequences,
				batch_size,
				vocab_size,
				expected,
				actual: data.len(),
			});
		}

		Ok(BatchLogits {
			sequences,
			batch_size,
			vocab_size,
			data,
		})
	}

	pub fn batch_size(&self) -> usize {
		self.batch_size
	}

	fn offset(&self, sequence: usize, slot: usize) -> usize {
		assert!(sequence < self.sequences, "sequence {sequence} out of range");
		assert!(slot < self.batch_size, "slot {slot} out of range");
		(sequence * self.batch_size + slot) * self.vocab_size
	}

	pub fn row(&self, sequence: usize, slot: usize) -> &[f32] {
		let offset = self.offset(sequence, slot);
		&self.data[offset..offset + self.vocab_size]
	}

	pub fn row_mut(&mut self, sequence: usize, slot: usize) -> &mut [f32] {
		let offset = self.offset(sequence, slot);
		&mut self.data[offset..offset + self.vocab_size]
	}

	/// A view on all sequences of one slot
	pub fn slot_mut(&mut self, slot: usize) -> SlotLogits<'_> {
		assert!(slot < self.batch_size, "slot {slot} out of range");
		SlotLogits { logits: self, slot }
	}
}

impl BatchScores for BatchLogits {
	type Slot<'a> = SlotLogits<'a>
	where
		Self: 'a;

	fn batch_size(&self) -> usize {
		self.batch_size
	}

	fn slot(&mut self, index: usize) -> Self::Slot<'_> {
		self.slot_mut(index)
	}
}

/// The scores of one slot in a [`BatchLogits`], across all of its sequences. The maximum is taken over all sequences
/// and writes apply to every sequence, so a forced token wins in each of them.
#[derive(Debug)]
pub struct SlotLogits<'a> {
	logits: &'a mut BatchLogits,
	slot: usize,
}

impl<'a> SlotLogits<'a> {
	fn values(&self) -> impl Iterator<Item = f32> + '_ {
		(0..self.logits.sequences).flat_map(move |sequence| self.logits.row(sequence, self.slot).iter().copied())
	}
}

impl<'a> Scores for SlotLogits<'a> {
	fn vocab_size(&self) -> usize {
		self.logits.vocab_size
	}

	fn max_score(&self) -> Option<f32> {
		first_max(self.values()).map(|(_, value)| value)
	}

	fn argmax(&self) -> Option<TokenId> {
		first_max(self.values()).map(|(index, _)| (index % self.logits.vocab_size) as TokenId)
	}

	fn set_score(&mut self, token: TokenId, score: f32) {
		for sequence in 0..self.logits.sequences {
			self.logits.row_mut(sequence, self.slot)[token as usize] = score;
		}
	}

	fn add_score(&mut self, token: TokenId, delta: f32) {
		for sequence in 0..self.logits.sequences {
			self.logits.row_mut(sequence, self.slot)[token as usize] += delta;
		}
	}
}
