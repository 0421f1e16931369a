use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;

use coffee_leaf_doctor_lib::advice::{AdviceProvider, OpenAiClient};
use coffee_leaf_doctor_lib::chat::{run_chat, seed_history, ChatReply};
use coffee_leaf_doctor_lib::output::{print_json, write_json_file, ErrorReport, Report};
use coffee_leaf_doctor_lib::{Config, DiagnosisError, DiagnosisPipeline};

const DEFAULT_CONFIG: &str = "config.toml";

/// Command-line arguments
#[derive(Parser, Debug)]
#[clap(author, version, about = "Coffee leaf disease diagnosis")]
struct Args {
    /// Image to diagnose, or a conversation history JSON file with --chat
    path: PathBuf,

    /// Treat PATH as a conversation history and answer it
    #[clap(long)]
    chat: bool,

    /// Path to configuration file (defaults to ./config.toml when present)
    #[clap(short, long)]
    config: Option<PathBuf>,

    /// Model file (overwrites config)
    #[clap(short, long)]
    model: Option<PathBuf>,

    /// Skip the language-model advice request
    #[clap(long)]
    no_advice: bool,

    /// Write the opening messages for a follow-up chat to this file
    #[clap(long)]
    history_out: Option<PathBuf>,

    /// Enable debug logging
    #[clap(short, long)]
    debug: bool,
}

fn init_logging(debug: bool) {
    let level = if debug { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .target(env_logger::Target::Stderr)
        .init();
}

fn load_config(args: &Args) -> anyhow::Result<Config> {
    let mut config = match &args.config {
        Some(path) => Config::from_file(path)?,
        None if Path::new(DEFAULT_CONFIG).is_file() => Config::from_file(DEFAULT_CONFIG)?,
        None => {
            log::info!("No {} found, using built-in defaults", DEFAULT_CONFIG);
            Config::default()
        }
    };

    // Override config with command-line arguments
    if let Some(model) = &args.model {
        config.classifier.model_path = model.clone();
    }
    if args.no_advice {
        config.advice.enabled = false;
    }

    config.validate()?;
    Ok(config)
}

fn build_advisor(config: &Config) -> anyhow::Result<Option<Box<dyn AdviceProvider>>> {
    if !config.advice.enabled {
        log::info!("Advice generation disabled");
        return Ok(None);
    }

    let client = OpenAiClient::from_config(&config.advice)
        .context("Failed to set up the advice client")?;
    Ok(Some(Box::new(client)))
}

fn run(args: &Args) -> anyhow::Result<()> {
    let config = load_config(args)?;
    let advisor = build_advisor(&config)?;

    if args.chat {
        let reply = match &advisor {
            Some(advisor) => run_chat(&**advisor, &args.path, config.advice.history_limit),
            None => ChatReply::failed("advice generation is disabled".to_string()),
        };
        print_json(&reply)?;
        return Ok(());
    }

    let pipeline = DiagnosisPipeline::from_config(&config, advisor)
        .with_context(|| format!("Failed to load model {}", config.classifier.model_path.display()))?;

    let report = pipeline.diagnose(&args.path);
    print_json(&report)?;

    if let Some(history_path) = &args.history_out {
        write_history(&report, history_path);
    }

    Ok(())
}

/// Seed a follow-up conversation; failing to do so does not affect the diagnosis
fn write_history(report: &Report, path: &Path) {
    let Some(seed) = report.as_outcome().and_then(seed_history) else {
        log::warn!("No prediction to start a conversation from; {} not written", path.display());
        return;
    };

    match write_json_file(&seed, path) {
        Ok(()) => log::info!("Conversation seed written to {}", path.display()),
        Err(e) => log::warn!("Could not write {}: {}", path.display(), e),
    }
}

/// Error document for failures that stop the process before any diagnosis
fn startup_report(err: &anyhow::Error) -> ErrorReport {
    let kind = err
        .downcast_ref::<DiagnosisError>()
        .map_or("StartupError", DiagnosisError::kind);

    ErrorReport {
        error: err.to_string(),
        details: err.chain().nth(1).map(|cause| cause.to_string()),
        kind: Some(kind.to_string()),
    }
}

fn main() -> ExitCode {
    let args = Args::parse();
    init_logging(args.debug);

    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("{:#}", e);
            if let Err(print_err) = print_json(&startup_report(&e)) {
                log::error!("Could not write error report: {}", print_err);
            }
            ExitCode::FAILURE
        }
    }
}
