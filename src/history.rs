//! Run history and reporting.
//!
//! Every pipeline run appends one record to `<dir>/<YYYY-MM-DD>.jsonl`.
//! History is best effort: failures to write are logged, never fatal.

use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, error};

fn history_file(dir: &Path, date: &str) -> PathBuf {
    dir.join(format!("{date}.jsonl"))
}

/// Record of a single pipeline run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    pub timestamp: String,
    pub episode_date: String,
    pub audio_file: String,
    pub sources_requested: usize,
    pub sources_failed: usize,
    pub digest_entries: usize,
    pub script_origin: String,
    pub script_chars: usize,
    pub compose_latency_ms: i64,
    pub narrate_latency_ms: i64,
    pub total_latency_ms: i64,
    pub audio_bytes: Option<u64>,
    pub episodes_retained: Option<usize>,
    pub published: bool,
    pub error: Option<String>,
}

/// Append a run record to the history file for its episode date.
pub fn save_record(dir: &Path, record: &RunRecord) {
    if let Err(e) = fs::create_dir_all(dir) {
        error!("Failed to create history dir {}: {e}", dir.display());
        return;
    }

    let path = history_file(dir, &record.episode_date);
    match fs::OpenOptions::new().create(true).append(true).open(&path) {
        Ok(mut file) => match serde_json::to_string(record) {
            Ok(json) => {
                if let Err(e) = writeln!(file, "{json}") {
                    error!("Failed to write history record: {e}");
                } else {
                    debug!("Saved run record to {}", path.display());
                }
            }
            Err(e) => error!("Failed to serialize run record: {e}"),
        },
        Err(e) => error!("Failed to open history file: {e}"),
    }
}

/// Load all run records for a given date.
pub fn load_records(dir: &Path, date: &str) -> Vec<RunRecord> {
    let path = history_file(dir, date);
    let file = match fs::File::open(&path) {
        Ok(f) => f,
        Err(_) => return Vec::new(),
    };

    std::io::BufReader::new(file)
        .lines()
        .map_while(Result::ok)
        .filter(|line| !line.trim().is_empty())
        .filter_map(|line| match serde_json::from_str::<RunRecord>(&line) {
            Ok(record) => Some(record),
            Err(e) => {
                debug!("Skipping malformed history line: {e}");
                None
            }
        })
        .collect()
}

/// List all dates with history records (newest first).
pub fn list_available_dates(dir: &Path) -> Vec<String> {
    let mut dates: Vec<String> = fs::read_dir(dir)
        .into_iter()
        .flatten()
        .filter_map(|entry| {
            let name = entry.ok()?.file_name().to_string_lossy().to_string();
            name.strip_suffix(".jsonl").map(str::to_string)
        })
        .collect();

    dates.sort_by(|a, b| b.cmp(a));
    dates
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        text.to_string()
    } else {
        let head: String = text.chars().take(max_chars.saturating_sub(3)).collect();
        format!("{head}...")
    }
}

/// Generate a Markdown report of the runs on a given date.
pub fn generate_report(dir: &Path, date: &str) -> String {
    let records = load_records(dir, date);

    if records.is_empty() {
        return format!("# Podcast Runs - {date}\n\nNo runs recorded.");
    }

    let published = records.iter().filter(|r| r.published).count();
    let fallbacks = records
        .iter()
        .filter(|r| r.script_origin != "generated")
        .count();
    let avg_compose =
        records.iter().map(|r| r.compose_latency_ms as f64).sum::<f64>() / records.len() as f64;
    let avg_narrate =
        records.iter().map(|r| r.narrate_latency_ms as f64).sum::<f64>() / records.len() as f64;

    let mut lines = vec![
        format!("# Podcast Runs - {date}"),
        String::new(),
        "## Summary".to_string(),
        format!("- **Runs**: {}", records.len()),
        format!("- **Published**: {published}"),
        format!("- **Fallback scripts**: {fallbacks}"),
        format!("- **Avg compose latency**: {avg_compose:.0}ms"),
        format!("- **Avg narrate latency**: {avg_narrate:.0}ms"),
        String::new(),
        "## Run Log".to_string(),
        String::new(),
        "| Time | Sources | Entries | Script | Chars | Result |".to_string(),
        "|------|---------|---------|--------|-------|--------|".to_string(),
    ];

    for r in &records {
        let time_str = r.timestamp.get(11..19).unwrap_or(r.timestamp.as_str());
        let result = match &r.error {
            Some(e) => format!("failed: {}", truncate(e, 40)),
            None if r.published => "published".to_string(),
            None => "-".to_string(),
        };
        lines.push(format!(
            "| {time_str} | {}/{} | {} | {} | {} | {result} |",
            r.sources_requested - r.sources_failed.min(r.sources_requested),
            r.sources_requested,
            r.digest_entries,
            r.script_origin,
            r.script_chars,
        ));
    }

    lines.join("\n")
}
