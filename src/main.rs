use std::process::ExitCode;

use clap::Parser;
use tracing_indicatif::IndicatifLayer;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};
use tsumiki::{Command, Config, Environment, Pipeline};

#[derive(Parser, Debug, Clone)]
#[command(version, about)]
struct Args {
    #[clap(value_enum, index = 1, default_value = "default")]
    command: Command,
}

fn init_logging() -> anyhow::Result<()> {
    let indicatif_layer = IndicatifLayer::new();

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().with_writer(indicatif_layer.get_stderr_writer()))
        .with(indicatif_layer)
        .try_init()?;

    Ok(())
}

fn main() -> anyhow::Result<ExitCode> {
    let args = Args::parse();
    init_logging()?;

    let config = Config::load_cwd()?;
    let pipeline = Pipeline::new(&config)?;
    let report = pipeline.run(Environment::new(config), args.command)?;

    eprintln!("{report}");

    Ok(if report.is_success() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}
