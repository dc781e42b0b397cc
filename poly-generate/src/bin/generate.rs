use clap::Parser;
use poly_generate::config::{Args, Config};
use poly_generate::generator::Generator;
use tracing_subscriber::EnvFilter;

pub fn main() {
	tracing_subscriber::fmt()
		.with_env_filter(EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new("info")).unwrap())
		.init();

	let args = Args::parse();
	let config = Config::from_file(&args.config_path).expect("read config file");
	let generator = Generator::load(config).expect("load model");

	let completions = if args.batch || args.prompts.len() > 1 {
		generator.generate_batch(&args.prompts)
	} else {
		generator.generate(&args.prompts[0]).map(|completion| vec![completion])
	};

	match completions {
		Ok(completions) => {
			for completion in completions {
				if args.json {
					println!("{}", serde_json::to_string(&completion).unwrap());
				} else {
					println!("{}", completion.text);
				}
			}
		}
		Err(e) => {
			tracing::error!("generation failed: {e}");
			std::process::exit(1);
		}
	}
}
