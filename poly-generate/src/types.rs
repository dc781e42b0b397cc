use llm::{InferenceError, TokenId, TokenizationError};
use poly_logits::{scores::ShapeError, ProcessorError};
use serde::Serialize;
use thiserror::Error;

#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
	/// The model selected the end-of-text token
	EndOfText,

	/// The configured maximum number of tokens was generated
	MaxTokens,

	/// The context of the session is full
	ContextFull,
}

#[derive(Serialize, Debug, Clone)]
pub struct Completion {
	pub prompt: String,
	pub text: String,
	pub tokens: Vec<TokenId>,
	pub stop_reason: StopReason,
}

#[derive(Error, Debug)]
pub enum GenerateError {
	#[error("could not load model: {0}")]
	ModelLoad(String),

	#[error("tokenization error: {0}")]
	TokenizationError(#[from] TokenizationError),

	#[error("processor error: {0}")]
	Processor(#[from] ProcessorError),

	#[error("invalid scores: {0}")]
	Shape(#[from] ShapeError),

	// llm::InferenceError is not Send
	#[error("inference error: {0}")]
	InferenceError(String),

	#[error("sampling failed: {0}")]
	Sampling(String),

	#[error("invalid configuration: {0}")]
	Config(#[from] toml::de::Error),

	#[error("i/o error: {0}")]
	Io(#[from] std::io::Error),

	#[error("prompt is empty")]
	EmptyPrompt,

	#[error("no prompts to generate from")]
	NoPrompts,
}

impl From<InferenceError> for GenerateError {
	fn from(e: InferenceError) -> GenerateError {
		GenerateError::InferenceError(e.to_string())
	}
}
