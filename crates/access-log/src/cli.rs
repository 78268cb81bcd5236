use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::{Args, Subcommand};
use ncar_access_log::{report::ReportKind, window::parse_date};
use tokio::signal;
use tokio_util::sync::CancellationToken;

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Per-event access log of cache traffic for the filtered namespaces
    Events(DateArgs),
    /// Origin traffic summed per five-minute interval and filename
    Aggregate(DateArgs),
    /// Failed OSPool transfers
    Failures(DateArgs),
}

#[derive(Args, Debug)]
pub struct DateArgs {
    /// Report date (YYYY-MM-DD); the window ends at midnight UTC of this day
    #[arg(long, value_name = "DATE")]
    pub date: String,
}

impl Commands {
    pub fn resolve(&self) -> Result<(ReportKind, NaiveDate)> {
        let (report, args) = match self {
            Commands::Events(args) => (ReportKind::Events, args),
            Commands::Aggregate(args) => (ReportKind::Aggregate, args),
            Commands::Failures(args) => (ReportKind::Failures, args),
        };
        Ok((report, parse_date(&args.date)?))
    }
}

/// Token cancelled on SIGTERM or Ctrl-C.
pub fn shutdown_listener() -> Result<CancellationToken> {
    let cancellation_token = CancellationToken::new();
    let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())
        .context("sigterm listener failed")?;
    tokio::spawn({
        let cancellation_token = cancellation_token.clone();
        async move {
            tokio::select! {
                _ = sigterm.recv() => cancellation_token.cancel(),
                _ = signal::ctrl_c() => cancellation_token.cancel(),
            }
        }
    });

    Ok(cancellation_token)
}
