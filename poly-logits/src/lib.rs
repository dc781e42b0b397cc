pub use llm::TokenId;

pub mod cite;
pub mod config;
pub mod context;
pub mod phrase;
pub mod scores;
pub mod tokenizer;

use context::{ExecutionContext, StreamHandle};
use scores::BatchLogits;
use thiserror::Error;
use tokenizer::TokenizerError;

/// Identifier the host assigns to a request occupying a batch slot
pub type RequestId = u64;

/// Identifier of the client that submitted a request (if the host tracks one)
pub type ClientId = u64;

#[derive(Error, Debug)]
pub enum ProcessorError {
	#[error("tokenizer does not provide an end-of-sequence token")]
	MissingEndOfSequenceToken,

	#[error("tokenizer error: {0}")]
	Tokenizer(#[from] TokenizerError),

	#[error("batch size must be at least one")]
	EmptyBatch,

	#[error("processor {0} cannot be used for batched generation")]
	NotBatchable(&'static str),
}

/// A hook that adjusts the scores of a single generation stream at every step.
pub trait LogitsProcessor: Send {
	/// Adjust `scores` (indexed by token ID) in place before the next token is selected. `prompt_tokens` holds the
	/// prompt that was fed, `past_tokens` the tokens generated so far.
	fn process(&mut self, prompt_tokens: &[TokenId], past_tokens: &[TokenId], scores: &mut [f32]);
}

/// Per-step arguments the host passes along with the scores of a batch. None of these are interpreted by the
/// processors in this crate, but they are part of the callback shape hosts provide.
#[derive(Debug, Clone, Copy)]
pub struct BatchStep<'a> {
	/// Request occupying each slot
	pub request_ids: &'a [RequestId],

	/// Handle to the device stream the scores live on
	pub stream: StreamHandle,

	/// Client that submitted the request in each slot, when known
	pub client_ids: &'a [Option<ClientId>],
}

/// A hook that adjusts the scores of a whole batch of generation streams at every step.
pub trait BatchLogitsProcessor: Send {
	/// Adjust the scores of every slot in `logits` in place. Implementations that touch the scores must do so while
	/// `context` is entered for `step.stream`.
	fn process_batch(&mut self, step: &BatchStep<'_>, logits: &mut BatchLogits, context: &dyn ExecutionContext);
}

/// A processor that does not change the scores in any way
pub struct NullProcessor {}

impl LogitsProcessor for NullProcessor {
	fn process(&mut self, _prompt_tokens: &[TokenId], _past_tokens: &[TokenId], _scores: &mut [f32]) {}
}

impl BatchLogitsProcessor for NullProcessor {
	fn process_batch(&mut self, _step: &BatchStep<'_>, _logits: &mut BatchLogits, _context: &dyn ExecutionContext) {}
}

/// Applies a list of processors one after the other
#[derive(Default)]
pub struct ProcessorChain {
	processors: Vec<Box<dyn LogitsProcessor>>,
}

impl ProcessorChain {
	pub fn new(processors: Vec<Box<dyn LogitsProcessor>>) -> ProcessorChain {
		ProcessorChain { processors }
	}

	pub fn push(&mut self, processor: Box<dyn LogitsProcessor>) {
		self.processors.push(processor);
	}

	pub fn len(&self) -> usize {
		self.processors.len()
	}

	pub fn is_empty(&self) -> bool {
		self.processors.is_empty()
	}
}

impl LogitsProcessor for ProcessorChain {
	fn process(&mut self, prompt_tokens: &[TokenId], past_tokens: &[TokenId], scores: &mut [f32]) {
		for processor in self.processors.iter_mut() {
			processor.process(prompt_tokens, past_tokens, scores);
		}
	}
}

/// Applies a list of batch processors one after the other
#[derive(Default)]
pub struct BatchProcessorChain {
	processors: Vec<Box<dyn BatchLogitsProcessor>>,
}

impl BatchProcessorChain {
	pub fn new(processors: Vec<Box<dyn BatchLogitsProcessor>>) -> BatchProcessorChain {
		BatchProcessorChain { processors }
	}

	pub fn push(&mut self, processor: Box<dyn BatchLogitsProcessor>) {
		self.processors.push(processor);
	}

	pub fn len(&self) -> usize {
		self.processors.len()
	}

	pub fn is_empty(&self) -> bool {
		self.processors.is_empty()
	}
}

impl BatchLogitsProcessor for BatchProcessorChain {
	fn process_batch(&mut self, step: &BatchStep<'_>, logits: &mut BatchLogits, context: &dyn ExecutionContext) {
		for processor in self.processors.iter_mut() {
			processor.process_batch(step, logits, context);
		}
	}
}
