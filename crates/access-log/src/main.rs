mod cli;

use anyhow::Result;
use clap::Parser;
use cli::{Commands, shutdown_listener};
use ncar_access_log::{
    report::{print_summary, run_report},
    settings::Settings,
};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(
    name = "ncar-access-log",
    about = "Render NCAR OSDF access logs and OSPool transfer failures into flat report files",
    version,
    author,
    after_help = r#"Configuration:
    Configuration can be provided via:
    1. Environment variables with NCAR__ prefix (e.g., NCAR__SEARCH__URL)
    2. .env file in the current directory
    3. Config file with -c option (see example.config.toml)

Examples:
    # Cache access events for the day before 2024-01-02
    ncar-access-log events --date 2024-01-02

    # Five-minute origin buckets with a custom config
    ncar-access-log -c config.toml aggregate --date 2024-01-02

    # Failed OSPool transfers
    ncar-access-log failures --date 2024-01-02"#
)]
pub struct Cli {
    /// Path to the configuration file (TOML format)
    ///
    /// If not provided, defaults and environment variables are used
    #[clap(short = 'c', long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    pub async fn run(self) -> Result<()> {
        let settings = Settings::new(self.config.as_deref())?;
        init_logging(&settings.log_level)?;
        info!("{settings}");

        let (report, date) = self.command.resolve()?;
        let cancel = shutdown_listener()?;

        let summary = run_report(report, &settings, date, &cancel).await?;
        println!("{}", print_summary(&summary));

        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    cli.run().await
}

fn init_logging(log_level: &str) -> Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level)))
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_thread_ids(false)
                .with_thread_names(false),
        )
        .init();

    Ok(())
}
