use std::time::Instant;

use llm::{
	InferenceFeedback, InferenceSession, Model, ModelParameters, OutputRequest, Prompt, TokenId, TokenUtf8Buffer,
	TokenizerSource,
};
use poly_logits::{
	config::{build_batch_chain, build_chain},
	context::{HostContext, StreamHandle},
	scores::BatchLogits,
	BatchLogitsProcessor, BatchStep, ClientId, LogitsProcessor, RequestId,
};
use rand::{rngs::StdRng, SeedableRng};

use crate::{
	config::Config,
	sampling::select_token,
	types::{Completion, GenerateError, StopReason},
};

/// Generates completions from a model, applying the configured processors at every step
pub struct Generator {
	model: Box<dyn Model>,
	config: Config,
}

/// A prompt that is being completed
struct Stream {
	prompt: String,
	prompt_tokens: Vec<TokenId>,
	session: InferenceSession,

	/// Scores for the next token
	scores: Vec<f32>,
	tokens: Vec<TokenId>,
	text: String,
	buffer: TokenUtf8Buffer,
	stop_reason: Option<StopReason>,
}

impl Stream {
	fn into_completion(self) -> Completion {
		Completion {
			prompt: self.prompt,
			text: self.text,
			tokens: self.tokens,
			stop_reason: self.stop_reason.unwrap_or(StopReason::MaxTokens),
		}
	}
}

impl Generator {
	pub fn load(config: Config) -> Result<Generator, GenerateError> {
		let model_config = config.model.clone();
		if !model_config.use_gpu && model_config.gpu_layers.is_some() {
			tracing::warn!("gpu_layers set but ignored because use_gpu is not set to true");
		}
		if cfg!(feature = "metal") && model_config.use_gpu && model_config.gpu_layers.is_some() {
			tracing::warn!("gpu_layers set but ignored because with the Metal backend, all layers are run on the GPU");
		}

		let params = ModelParameters {
			prefer_mmap: true,
			context_size: model_config.context_size,
			lora_adapters: None,
			use_gpu: model_config.use_gpu,
			gpu_layers: model_config.gpu_layers,
		};

		let model = llm::load_dynamic(
			Some(model_config.architecture),
			&model_config.model_path,
			TokenizerSource::Embedded,
			params,
			|load_progress| {
				tracing::trace!("loading model: {load_progress:#?}");
			},
		)
		.map_err(|e| GenerateError::ModelLoad(e.to_string()))?;

		tracing::info!(
			model_path = ?model_config.model_path,
			use_gpu = model_config.use_gpu,
			n_processors = config.processors.len(),
			"model loaded"
		);
		Ok(Generator { model, config })
	}

	fn rng(&self) -> StdRng {
		match self.config.generation.seed {
			Some(seed) => StdRng::seed_from_u64(seed),
			None => StdRng::from_entropy(),
		}
	}

	/// Feed the prompt to the session in chunks of `batch_size` tokens and return the scores for the first token
	fn feed_prompt(&self, session: &mut InferenceSession, tokens: &[TokenId]) -> Result<Vec<f32>, GenerateError> {
		session.feed_prompt(
			self.model.as_ref(),
			Prompt::Tokens(tokens),
			&mut OutputRequest::default(),
			|_| -> Result<InferenceFeedback, GenerateError> { Ok(InferenceFeedback::Continue) },
		)?;
		Ok(session.last_logits().to_vec())
	}

	/// Feed a single generated token and return the scores for the token that follows it
	fn feed_token(&self, session: &mut InferenceSession, token: TokenId) -> Vec<f32> {
		self.model.evaluate(session, &[token], &mut OutputRequest::default());
		session.last_logits().to_vec()
	}

	fn start(&self, prompt: &str) -> Result<Stream, GenerateError> {
		let beginning_of_sentence = self.model.bot_token_id().is_some();
		let prompt_tokens: Vec<TokenId> = self
			.model
			.tokenizer()
			.tokenize(prompt, beginning_of_sentence)?
			.into_iter()
			.map(|(_, token_id)| token_id)
			.collect();
		if prompt_tokens.is_empty() {
			return Err(GenerateError::EmptyPrompt);
		}
		tracing::trace!("prompt tokens: {prompt_tokens:?}");

		let mut session = self.model.start_session(self.config.model.session_config());
		let scores = self.feed_prompt(&mut session, &prompt_tokens)?;

		Ok(Stream {
			prompt: prompt.to_string(),
			prompt_tokens,
			session,
			scores,
			tokens: vec![],
			text: String::new(),
			buffer: TokenUtf8Buffer::new(),
			stop_reason: (self.config.generation.max_tokens == 0).then_some(StopReason::MaxTokens),
		})
	}

	/// Select the next token from the (processed) scores of the stream and feed it back to the model
	fn advance(&self, stream: &mut Stream, rng: &mut StdRng) -> Result<(), GenerateError> {
		let token = select_token(&stream.scores, &stream.tokens, self.config.generation.temperature, rng)?;

		if token == self.model.eot_token_id() {
			stream.stop_reason = Some(StopReason::EndOfText);
			return Ok(());
		}

		stream.tokens.push(token);
		if let Some(output) = stream.buffer.push(&self.model.tokenizer().token(token as usize)) {
			tracing::trace!("text: {output}");
			stream.text.push_str(&output);
		}

		if stream.tokens.len() >= self.config.generation.max_tokens {
			stream.stop_reason = Some(StopReason::MaxTokens);
		} else if stream.session.n_past >= self.config.model.context_size {
			tracing::warn!("ending generation because context is full");
			stream.stop_reason = Some(StopReason::ContextFull);
		} else {
			stream.scores = self.feed_token(&mut stream.session, token);
		}
		Ok(())
	}

	/// Complete a single prompt
	pub fn generate(&self, prompt: &str) -> Result<Completion, GenerateError> {
		// Processors keep state for a single run, so every run gets new ones
		let mut processors = build_chain(&self.config.processors, self.model.as_ref())?;
		let mut rng = self.rng();
		let start = Instant::now();

		let mut stream = self.start(prompt)?;
		while stream.stop_reason.is_none() {
			processors.process(&stream.prompt_tokens, &stream.tokens, &mut stream.scores);
			self.advance(&mut stream, &mut rng)?;
		}

		let elapsed = start.elapsed();
		tracing::info!(
			n_tokens = stream.tokens.len(),
			stop_reason = ?stream.stop_reason,
			"completion finished; {:.3} t/s",
			stream.tokens.len() as f64 / elapsed.as_secs_f64()
		);
		Ok(stream.into_completion())
	}

	/// Complete several prompts that advance together, one step for the whole batch at a time
	pub fn generate_batch(&self, prompts: &[String]) -> Result<Vec<Completion>, GenerateError> {
		if prompts.is_empty() {
			return Err(GenerateError::NoPrompts);
		}

		let batch_size = prompts.len();
		let mut processors = build_batch_chain(&self.config.processors, self.model.as_ref(), batch_size)?;
		let mut rng = self.rng();
		let start = Instant::now();

		let mut streams = prompts.iter().map(|prompt| self.start(prompt)).collect::<Result<Vec<_>, _>>()?;
		let vocab_size = streams[0].scores.len();
		let request_ids: Vec<RequestId> = (0..batch_size as RequestId).collect();
		let client_ids: Vec<Option<ClientId>> = vec![None; batch_size];
		let step = BatchStep {
			request_ids: &request_ids,
			stream: StreamHandle::default(),
			client_ids: &client_ids,
		};

		while streams.iter().any(|stream| stream.stop_reason.is_none()) {
			let data = streams.iter().flat_map(|stream| stream.scores.iter().copied()).collect();
			let mut logits = BatchLogits::new(1, batch_size, vocab_size, data)?;

			// Slots of finished streams are masked so that processors leave them (and their own progress) alone
			for (slot, _) in streams.iter().enumerate().filter(|(_, stream)| stream.stop_reason.is_some()) {
				logits.row_mut(0, slot).fill(f32::NAN);
			}
			processors.process_batch(&step, &mut logits, &HostContext);

			for (slot, stream) in streams.iter_mut().enumerate() {
				if stream.stop_reason.is_some() {
					continue;
				}
				stream.scores.copy_from_slice(logits.row(0, slot));
				self.advance(stream, &mut rng)?;
			}
		}

		let n_tokens: usize = streams.iter().map(|stream| stream.tokens.len()).sum();
		tracing::info!(
			batch_size,
			n_tokens,
			"batch completion finished; {:.3} t/s",
			n_tokens as f64 / start.elapsed().as_secs_f64()
		);
		Ok(streams.into_iter().map(Stream::into_completion).collect())
	}
}
