mod cli;
mod config;
mod error;
mod output;

use std::io::IsTerminal;
use std::process;

use clap::Parser;
use tomo_engine::{Downloader, SessionOutcome, SessionReport};
use tracing::{Level, error, info, warn};
use tracing_subscriber::{filter::EnvFilter, fmt, prelude::*};

use crate::cli::Args;
use crate::error::{AppError, Result};
use crate::output::{MeasurementReport, OutputManager};

#[tokio::main]
async fn main() {
    let args = Args::parse();

    if let Err(e) = run(args).await {
        error!("Application error: {}", e);
        eprintln!("Error: {e}");
        process::exit(1);
    }
}

async fn run(args: Args) -> Result<()> {
    init_logging(args.verbose, args.quiet)?;

    let mut engine_config = config::load(args.config.as_deref())?;
    config::apply_overrides(&mut engine_config, &args)?;
    let budget = args
        .time_budget
        .unwrap_or(engine_config.time_budget_seconds);
    let downloader = Downloader::new(engine_config)?;

    let sessions = downloader.run_many(&args.url, &args.ips, budget).await;
    let mut reports = Vec::with_capacity(sessions.len());
    for session in sessions {
        let report = follow_redirects(
            &downloader,
            &args.url,
            session,
            budget,
            args.max_redirects,
        )
        .await;
        reports.push(report);
    }

    let colored = !args.no_color && std::io::stdout().is_terminal();
    let output = OutputManager::new(args.output, colored);
    println!("{}", output.render(&reports)?);

    let failed = reports.iter().filter(|r| r.error.is_some()).count();
    if failed > 0 {
        return Err(AppError::SessionsFailed {
            failed,
            total: reports.len(),
        });
    }
    Ok(())
}

/// Follow the redirects of one session up to `max_redirects` times. The IP
/// override only applied to the first request; a redirect names its own
/// server.
async fn follow_redirects(
    downloader: &Downloader,
    url: &str,
    session: SessionReport,
    budget: f64,
    max_redirects: u32,
) -> MeasurementReport {
    let mut report = MeasurementReport {
        url: url.to_owned(),
        ip_override: session.ip_override,
        redirects: Vec::new(),
        outcome: None,
        error: None,
    };
    let mut current = url.to_owned();
    let mut outcome = session.outcome;

    loop {
        match outcome {
            Ok(SessionOutcome::Redirected {
                redirect_url: Some(location),
                ..
            }) if (report.redirects.len() as u32) < max_redirects => {
                info!(from = %current, to = %location, "Following redirect");
                report.redirects.push(location.clone());
                outcome = downloader.run(&location, None, budget).await;
                current = location;
            }
            Ok(final_outcome) => {
                if matches!(final_outcome, SessionOutcome::Redirected { .. }) {
                    warn!(hops = report.redirects.len(), "Redirect not followed");
                }
                report.outcome = Some(final_outcome);
                return report;
            }
            Err(e) => {
                error!(url = %current, error = %e, "Session failed");
                report.error = Some(e.to_string());
                return report;
            }
        }
    }
}

fn init_logging(verbose: bool, quiet: bool) -> Result<()> {
    let filter = if quiet {
        EnvFilter::new("error")
    } else if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::from_default_env().add_directive(Level::INFO.into())
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(verbose)
                .with_level(true),
        )
        .try_init()
        .map_err(|e| AppError::Logging(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tomo_engine::{DownloadError, EngineConfig};

    fn downloader() -> Downloader {
        Downloader::new(EngineConfig::default()).unwrap()
    }

    #[tokio::test]
    async fn test_redirect_limit_keeps_last_outcome() {
        let session = SessionReport {
            ip_override: Some("10.0.0.1".into()),
            outcome: Ok(SessionOutcome::Redirected {
                status_code: 302,
                redirect_url: Some("http://r2.cache.example/v".into()),
            }),
        };

        let report =
            follow_redirects(&downloader(), "http://cache.example/v", session, 1.0, 0).await;

        assert_eq!(report.ip_override.as_deref(), Some("10.0.0.1"));
        assert!(report.redirects.is_empty());
        assert!(matches!(
            report.outcome,
            Some(SessionOutcome::Redirected { status_code: 302, .. })
        ));
        assert!(report.error.is_none());
    }

    #[tokio::test]
    async fn test_session_error_is_reported() {
        let session = SessionReport {
            ip_override: Some("300.0.0.1".into()),
            outcome: Err(DownloadError::InvalidIpOverride {
                input: "300.0.0.1".into(),
            }),
        };

        let report =
            follow_redirects(&downloader(), "http://cache.example/v", session, 1.0, 10).await;

        assert!(report.outcome.is_none());
        assert_eq!(report.error.as_deref(), Some("invalid IP override `300.0.0.1`"));
    }
}
