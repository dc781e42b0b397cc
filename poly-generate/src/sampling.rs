use llm::{
	samplers::{
		llm_samplers::{
			samplers::{SampleGreedy, SampleRandDistrib, SampleTemperature},
			types::SamplerChain,
		},
		sample_token,
	},
	TokenId,
};
use rand::Rng;

use crate::types::GenerateError;

/// Samplers for the given temperature. Zero or less always selects the token with the highest score.
pub fn sampler_chain(temperature: f32) -> SamplerChain {
	let mut samplers = SamplerChain::new();
	if temperature <= 0.0 {
		samplers.push_sampler(SampleGreedy::new());
	} else {
		samplers.push_sampler(SampleTemperature::new(temperature));
		samplers.push_sampler(SampleRandDistrib::new());
	}
	samplers
}

/// Select the next token from the (processed) `scores`
pub fn select_token(scores: &[f32], previous_tokens: &[TokenId], temperature: f32, rng: &mut impl Rng) -> Result<TokenId, GenerateError> {
	let samplers = sampler_chain(temperature);
	tracing::trace!("sampler: {samplers:?}");
	sample_token(samplers, rng, previous_tokens, scores.iter().copied()).map_err(|e| GenerateError::Sampling(e.to_string()))
}
