use serde::{Deserialize, Serialize};

use crate::cite::{CiteFromPrompt, DEFAULT_BOOST_FACTOR};
use crate::phrase::{BatchForceLastPhrase, ForceLastPhrase};
use crate::tokenizer::PhraseTokenizer;
use crate::{BatchLogitsProcessor, BatchProcessorChain, LogitsProcessor, ProcessorChain, ProcessorError};

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProcessorConfig {
	/// Force the model to generate a phrase before it stops generating
	ForceLastPhrase { phrase: String },

	/// Boost (or, with a negative factor, suppress) tokens that occur in the prompt
	CiteFromPrompt {
		#[serde(default = "default_boost_factor")]
		boost_factor: f32,

		/// Whether to boost the end-of-sequence token too
		#[serde(default = "default_boost_eos")]
		boost_eos: bool,
	},
}

const fn default_boost_factor() -> f32 {
	DEFAULT_BOOST_FACTOR
}

const fn default_boost_eos() -> bool {
	true
}

impl ProcessorConfig {
	pub fn name(&self) -> &'static str {
		match self {
			ProcessorConfig::ForceLastPhrase { .. } => "force_last_phrase",
			ProcessorConfig::CiteFromPrompt { .. } => "cite_from_prompt",
		}
	}

	/// Construct a fresh processor for a single generation stream
	pub fn build<T: PhraseTokenizer + ?Sized>(&self, tokenizer: &T) -> Result<Box<dyn LogitsProcessor>, ProcessorError> {
		Ok(match self {
			ProcessorConfig::ForceLastPhrase { phrase } => Box::new(ForceLastPhrase::new(phrase, tokenizer)?),
			ProcessorConfig::CiteFromPrompt { boost_factor, boost_eos } => Box::new(CiteFromPrompt::new(tokenizer, *boost_factor, *boost_eos)?),
		})
	}

	/// Construct a fresh processor for a batch of `batch_size` generation streams
	pub fn build_batch<T: PhraseTokenizer + ?Sized>(
		&self,
		tokenizer: &T,
		batch_size: usize,
	) -> Result<Box<dyn BatchLogitsProcessor>, ProcessorError> {
		match self {
			ProcessorConfig::ForceLastPhrase { phrase } => Ok(Box::new(BatchForceLastPhrase::new(phrase, tokenizer, batch_size)?)),
			ProcessorConfig::CiteFromPrompt { .. } => Err(ProcessorError::NotBatchable(self.name())),
		}
	}
}

pub fn build_chain<T: PhraseTokenizer + ?Sized>(configs: &[ProcessorConfig], tokenizer: &T) -> Result<ProcessorChain, ProcessorError> {
	let processors = configs.iter().map(|config| config.build(tokenizer)).collect::<Result<Vec<_>, _>>()?;
	Ok(ProcessorChain::new(processors))
}

pub fn build_batch_chain<T: PhraseTokenizer + ?Sized>(
	configs: &[ProcessorConfig],
	tokenizer: &T,
	batch_size: usize,
) -> Result<BatchProcessorChain, ProcessorError> {
	let processors = configs
		.iter()
		.map(|config| config.build_batch(tokenizer, batch_size))
		.collect::<Result<Vec<_>, _>>()?;
	Ok(BatchProcessorChain::new(processors))
}
