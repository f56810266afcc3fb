use std::process::ExitCode;

use accent_probe::config::{Config, DEFAULT_CONFIG_FILE};
use accent_probe::pipeline::error::PipelineError;
use accent_probe::pipeline::Pipeline;
use accent_probe::telemetry;
use clap::Parser;
use clap_serde_derive::ClapSerde;
use tracing::error;

/// Exit code for a missing tool or an unreadable configuration.
const EXIT_CONFIGURATION: u8 = 1;
/// Exit code for a run that failed in one of its stages.
const EXIT_PIPELINE: u8 = 2;

#[derive(Parser)]
#[command(author, version, about = "Detect the English accent spoken in a video", long_about = None)]
struct Args {
    /// Public video URL to analyze
    url: String,

    /// Path to the configuration file
    #[arg(short, long, env, default_value = DEFAULT_CONFIG_FILE)]
    config_file: String,

    /// Configuration options
    #[command(flatten)]
    pub opt_config: <Config as ClapSerde>::Opt,
}

fn main() -> ExitCode {
    let args = Args::parse();
    telemetry::init_console();

    let config = match Config::from_toml(&args.config_file) {
        Ok(conf) => conf.merge(args.opt_config),
        Err(_) if args.config_file == DEFAULT_CONFIG_FILE => {
            Config::default().merge(args.opt_config)
        }
        Err(err) => {
            error!("Failed to read configuration file {}: {:#}", args.config_file, err);
            return ExitCode::from(EXIT_CONFIGURATION);
        }
    };

    let mut pipeline = match Pipeline::from_config(&config) {
        Ok(pipeline) => pipeline,
        Err(err) => {
            error!("Failed to load models: {:#}", err);
            return ExitCode::from(EXIT_CONFIGURATION);
        }
    };

    match pipeline.run(&args.url) {
        Ok(report) => {
            println!("{}", report.render());
            ExitCode::SUCCESS
        }
        Err(err @ PipelineError::Configuration(_)) => {
            eprintln!("{}", err);
            ExitCode::from(EXIT_CONFIGURATION)
        }
        Err(err) => {
            eprintln!("{}", err);
            ExitCode::from(EXIT_PIPELINE)
        }
    }
}
