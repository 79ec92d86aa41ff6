//! daily-podcast-rs: one pipeline run per invocation, meant for cron or CI.

use chrono::NaiveDate;
use clap::Parser;
use std::path::PathBuf;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use daily_podcast_rs::config::Config;
use daily_podcast_rs::history;
use daily_podcast_rs::pipeline::{run_timestamp, Pipeline};

#[derive(Parser, Debug)]
#[command(name = "daily-podcast-rs", about = "Generate and publish today's podcast episode")]
struct Args {
    /// Path to config.yaml
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Episode date (YYYY-MM-DD) instead of today
    #[arg(long)]
    date: Option<NaiveDate>,

    /// Print the run report for a date (default: today) and exit
    #[arg(long, value_name = "DATE", num_args = 0..=1, default_missing_value = "today")]
    report: Option<String>,

    /// List the dates that have run history and exit
    #[arg(long)]
    list_runs: bool,

    /// Enable verbose (debug) logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize logging (suppress noisy HTTP internals)
    let filter = if args.verbose {
        EnvFilter::new("debug,hyper=info,reqwest=info")
    } else {
        EnvFilter::new("info,hyper=warn,reqwest=warn")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = Config::load(args.config.as_deref());

    if args.list_runs {
        let dates = history::list_available_dates(&config.history.resolved_dir());
        if dates.is_empty() {
            println!("No runs recorded.");
        }
        for date in dates {
            println!("{date}");
        }
        return Ok(());
    }

    if let Some(date) = args.report {
        let date = if date == "today" {
            run_timestamp(config.podcast.utc_offset_hours, None)?
                .format("%Y-%m-%d")
                .to_string()
        } else {
            date
        };
        println!("{}", history::generate_report(&config.history.resolved_dir(), &date));
        return Ok(());
    }

    info!(
        "daily-podcast-rs starting: '{}', {} sources",
        config.podcast.name,
        config.sources.urls.len()
    );

    let now = run_timestamp(config.podcast.utc_offset_hours, args.date)?;
    let pipeline = Pipeline::from_config(config)?;

    match pipeline.run(now).await {
        Ok(summary) => {
            info!(
                "Done: '{}' → {} ({} episodes in feed)",
                summary.episode_title,
                summary.audio_path.display(),
                summary.feed.episodes.len()
            );
            Ok(())
        }
        Err(e) => {
            error!("Run aborted: {e:#}");
            Err(e)
        }
    }
}
