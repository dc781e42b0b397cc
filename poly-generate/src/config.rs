use clap::Parser;
use llm::InferenceSessionConfig;
pub use llm::ModelArchitecture;
use poly_logits::config::ProcessorConfig;
use serde::{Deserialize, Deserializer};
use std::path::{Path, PathBuf};

use crate::types::GenerateError;

/// Accepts the architecture names used in model file listings, e.g. "llama" or "gpt-neox"
fn architecture_from_str<'de, D>(deserializer: D) -> Result<ModelArchitecture, D::Error>
where
	D: Deserializer<'de>,
{
	let name: String = Deserialize::deserialize(deserializer)?;
	match name.to_ascii_lowercase().replace(['-', '_'], "").as_str() {
		"llama" => Ok(ModelArchitecture::Llama),
		"gptneox" => Ok(ModelArchitecture::GptNeoX),
		"gptj" => Ok(ModelArchitecture::GptJ),
		"gpt2" => Ok(ModelArchitecture::Gpt2),
		"mpt" => Ok(ModelArchitecture::Mpt),
		"bloom" => Ok(ModelArchitecture::Bloom),
		_ => Err(serde::de::Error::custom(format!("unsupported model architecture: {name}"))),
	}
}

#[derive(Deserialize, Debug, Clone)]
pub struct ModelConfig {
	#[serde(deserialize_with = "architecture_from_str")]
	pub architecture: ModelArchitecture,

	pub model_path: PathBuf,

	/// Threads used to evaluate each prompt
	#[serde(default = "default_threads_per_session")]
	pub threads_per_session: usize,

	/// Maximum number of tokens (prompt and generated) per stream
	#[serde(default = "default_context_size")]
	pub context_size: usize,

	#[serde(default = "default_use_gpu")]
	pub use_gpu: bool,

	/// Layers to offload when `use_gpu` is set; all layers when not set. Metal always offloads every layer.
	pub gpu_layers: Option<usize>,

	/// Prompts are fed to the model in chunks of this many tokens
	#[serde(default = "default_batch_size")]
	pub batch_size: usize,
}

impl ModelConfig {
	/// Session settings for one stream; `feed_prompt` splits prompts into chunks of `n_batch` tokens
	pub fn session_config(&self) -> InferenceSessionConfig {
		InferenceSessionConfig {
			n_threads: self.threads_per_session,
			n_batch: self.batch_size,
			..InferenceSessionConfig::default()
		}
	}
}

const fn default_use_gpu() -> bool {
	false
}

const fn default_threads_per_session() -> usize {
	8
}

const fn default_context_size() -> usize {
	512
}

const fn default_batch_size() -> usize {
	8
}

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct GenerationConfig {
	/// Maximum number of tokens to generate per prompt (including any forced tokens)
	pub max_tokens: usize,

	/// Temperature (randomness) used for sampling. Zero or less selects the token with the highest score.
	pub temperature: f32,

	/// Seed for sampling; when not set, every run is different
	pub seed: Option<u64>,
}

impl Default for GenerationConfig {
	fn default() -> Self {
		Self {
			max_tokens: 128,
			temperature: 0.0,
			seed: None,
		}
	}
}

#[derive(Deserialize, Debug, Clone)]
pub struct Config {
	pub model: ModelConfig,

	#[serde(default)]
	pub generation: GenerationConfig,

	/// Processors applied to the scores at every step, in order
	#[serde(default)]
	pub processors: Vec<ProcessorConfig>,
}

impl Config {
	pub fn from_file(path: &Path) -> Result<Config, GenerateError> {
		let config_string = std::fs::read_to_string(path)?;
		Ok(toml::from_str(&config_string)?)
	}
}

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
	/// Where to load the config file from
	#[arg(long, short = 'c', default_value = "config.toml")]
	pub config_path: PathBuf,

	/// Generate the prompts as a single batch (always the case when more than one prompt is given)
	#[arg(long, short = 'b')]
	pub batch: bool,

	/// Print each completion as a line of JSON
	#[arg(long)]
	pub json: bool,

	/// Prompts to complete
	#[arg(required = true)]
	pub prompts: Vec<String>,
}
