use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};
use log::{error, info};
use tokio::sync::broadcast::error::RecvError;

use portal_scraper::config::resolve_config;
use portal_scraper::telemetry::{init_logging, LogFormat};
use portal_scraper::{
    secrets, JobManager, JobParameters, JobStatus, JobStatusResponse, ScraperError, ServiceConfig,
};

#[derive(Debug, Parser)]
#[command(
    name = "portal-scraper",
    version,
    about = "Scrapes student records from the academic portal",
    propagate_version = true
)]
struct Cli {
    /// JSON config file. Defaults apply when omitted.
    #[arg(long, global = true, env = "PORTAL_SCRAPER_CONFIG")]
    config: Option<PathBuf>,

    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run one scraping job and print its final status.
    Scrape(ScrapeArgs),
    /// Validate the configuration and print the effective values.
    CheckConfig,
}

#[derive(Debug, Args)]
struct ScrapeArgs {
    #[arg(long)]
    username: String,

    /// Environment variable holding the portal password.
    #[arg(long, default_value = "PORTAL_PASSWORD")]
    password_env: String,

    /// Academic year, e.g. 2022-23.
    #[arg(long)]
    academic_year: String,

    #[arg(long)]
    skip_attendance: bool,

    #[arg(long)]
    skip_mid_marks: bool,

    #[arg(long)]
    skip_personal_details: bool,

    /// Keep results local instead of uploading them.
    #[arg(long)]
    no_upload: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let format = if cli.json_logs {
        LogFormat::Json
    } else {
        LogFormat::Text
    };
    if let Err(e) = init_logging(format) {
        eprintln!("Failed to initialize logging: {}", e);
    }

    let result = match resolve_config(cli.config.as_deref()) {
        Ok(config) => match &cli.command {
            Commands::Scrape(args) => scrape(&config, args).await,
            Commands::CheckConfig => check_config(&config),
        },
        Err(e) => Err(e.into()),
    };

    match result {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

/// Returns whether the job completed.
async fn scrape(config: &ServiceConfig, args: &ScrapeArgs) -> Result<bool, ScraperError> {
    let password = secrets::resolve_secret(None, None, Some(args.password_env.as_str()))?;
    let params = JobParameters {
        username: args.username.clone(),
        password,
        academic_year: args.academic_year.clone(),
        scrape_attendance: !args.skip_attendance,
        scrape_mid_marks: !args.skip_mid_marks,
        scrape_personal_details: !args.skip_personal_details,
        upload_to_supabase: !args.no_upload,
    };

    let manager = JobManager::from_config(config)?;
    let mut events = manager.subscribe();
    let job_id = manager.submit(params)?;
    info!("Submitted job {}", job_id);

    loop {
        match events.recv().await {
            Ok(event) if event.job_id == job_id => {
                println!(
                    "[{:>5.1}%] {:<9} {}",
                    event.progress * 100.0,
                    event.status.as_str(),
                    event.message
                );
                if event.status.is_terminal() {
                    break;
                }
            }
            Ok(_) => {}
            Err(RecvError::Lagged(skipped)) => {
                info!("Skipped {} progress events", skipped);
                if manager.status(&job_id)?.status.is_terminal() {
                    break;
                }
            }
            Err(RecvError::Closed) => break,
        }
    }

    let job = manager.status(&job_id)?;
    let response = JobStatusResponse::from(job.as_ref());
    match serde_json::to_string_pretty(&response) {
        Ok(json) => println!("{}", json),
        Err(e) => error!("Failed to render job status: {}", e),
    }

    manager.shutdown().await;
    Ok(job.status == JobStatus::Completed)
}

fn check_config(config: &ServiceConfig) -> Result<bool, ScraperError> {
    let json = serde_json::to_string_pretty(config)
        .map_err(|e| ScraperError::Config(e.into()))?;
    println!("{}", json);

    if config.storage.is_configured() {
        match config.storage.resolve_key() {
            Ok(_) => println!("Storage key: resolved"),
            Err(e) => println!("Storage key: {}", e),
        }
    } else {
        println!("Storage: not configured, uploads will fail");
    }
    Ok(true)
}
