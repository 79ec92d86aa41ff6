//! One pipeline run: aggregate → compose → narrate → publish.
//!
//! Stages run strictly in order. Only narration and publishing can abort a
//! run; the history record is written either way.

use std::path::PathBuf;
use std::time::Instant;

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, FixedOffset, NaiveDate, TimeZone, Utc};
use tracing::{info, warn};

use crate::aggregator::{Aggregator, SourceStats};
use crate::composer::{Composer, Script};
use crate::config::Config;
use crate::feed::{FeedDocument, FeedPublisher};
use crate::history::{self, RunRecord};
use crate::llm::{ChatCompletionClient, TextGenerator};
use crate::narrator::{synthesizer_from_config, Narrator, SpeechSynthesizer};
use crate::rss::{FeedSource, HttpFeedSource};

pub fn episode_filename(date: &str) -> String {
    format!("episode_{date}.mp3")
}

pub fn episode_title(date: &str, suffix: &str) -> String {
    format!("{date} {suffix}")
}

/// Current time in the configured UTC offset, optionally moved to `date`.
pub fn run_timestamp(utc_offset_hours: i32, date: Option<NaiveDate>) -> Result<DateTime<FixedOffset>> {
    let offset = utc_offset_hours
        .checked_mul(3600)
        .and_then(FixedOffset::east_opt)
        .ok_or_else(|| anyhow!("invalid UTC offset: {utc_offset_hours} hours"))?;
    let now = Utc::now().with_timezone(&offset);

    match date {
        None => Ok(now),
        Some(date) => offset
            .from_local_datetime(&date.and_time(now.time()))
            .single()
            .ok_or_else(|| anyhow!("cannot place {date} in UTC{utc_offset_hours:+}")),
    }
}

#[derive(Debug)]
pub struct RunSummary {
    pub episode_title: String,
    pub audio_path: PathBuf,
    pub script: Script,
    pub sources: SourceStats,
    pub feed: FeedDocument,
}

pub struct Pipeline {
    config: Config,
    source: Box<dyn FeedSource>,
    generator: Box<dyn TextGenerator>,
    synthesizer: Box<dyn SpeechSynthesizer>,
}

impl Pipeline {
    pub fn new(
        config: Config,
        source: Box<dyn FeedSource>,
        generator: Box<dyn TextGenerator>,
        synthesizer: Box<dyn SpeechSynthesizer>,
    ) -> Self {
        Self {
            config,
            source,
            generator,
            synthesizer,
        }
    }

    /// Build a pipeline backed by the real HTTP feed, LLM and TTS clients.
    pub fn from_config(config: Config) -> Result<Self> {
        let source = HttpFeedSource::new(config.sources.timeout_secs)?;
        let generator = ChatCompletionClient::new(config.llm.clone())?;
        let synthesizer = synthesizer_from_config(&config.tts)?;
        if config.llm.resolve_api_key().is_none() {
            warn!(
                "No LLM API key found in {}; every run will use the fallback script",
                config.llm.api_key_env
            );
        }
        Ok(Self::new(config, Box::new(source), Box::new(generator), synthesizer))
    }

    pub async fn run(&self, now: DateTime<FixedOffset>) -> Result<RunSummary> {
        let t_start = Instant::now();
        let date = now.format("%Y-%m-%d").to_string();

        let mut record = RunRecord {
            timestamp: now.to_rfc3339(),
            episode_date: date.clone(),
            audio_file: episode_filename(&date),
            ..Default::default()
        };

        let result = self.run_stages(now, &date, &mut record).await;

        record.total_latency_ms = t_start.elapsed().as_millis() as i64;
        match &result {
            Ok(summary) => {
                record.published = true;
                record.episodes_retained = Some(summary.feed.episodes.len());
            }
            Err(e) => record.error = Some(format!("{e:#}")),
        }
        if self.config.history.enabled {
            history::save_record(&self.config.history.resolved_dir(), &record);
        }

        result
    }

    async fn run_stages(
        &self,
        now: DateTime<FixedOffset>,
        date: &str,
        record: &mut RunRecord,
    ) -> Result<RunSummary> {
        let podcast = &self.config.podcast;

        info!("Fetching {} sources...", self.config.sources.urls.len());
        let (digest, sources) = Aggregator::new(&self.config.sources, self.source.as_ref())
            .collect()
            .await;
        record.sources_requested = sources.requested;
        record.sources_failed = sources.failed;
        record.digest_entries = sources.entries;

        info!("Composing script from {} entries...", digest.len());
        let t_compose = Instant::now();
        let script = Composer::new(&self.config.script, podcast, self.generator.as_ref())
            .compose(&digest)
            .await;
        record.compose_latency_ms = t_compose.elapsed().as_millis() as i64;
        record.script_origin = script.origin.as_str().to_string();
        record.script_chars = script.text.chars().count();
        info!(
            "Script ready ({}, {} chars)",
            script.origin.as_str(),
            record.script_chars
        );

        std::fs::create_dir_all(&podcast.output_dir).with_context(|| {
            format!("failed to create output dir {}", podcast.output_dir.display())
        })?;
        let filename = episode_filename(date);
        let audio_path = podcast.output_dir.join(&filename);

        let t_narrate = Instant::now();
        let audio_bytes = Narrator::new(&self.config.tts.voice, self.synthesizer.as_ref())
            .narrate(&script.text, &audio_path)
            .await?;
        record.narrate_latency_ms = t_narrate.elapsed().as_millis() as i64;
        record.audio_bytes = Some(audio_bytes);

        let title = episode_title(date, &podcast.episode_title_suffix);
        let feed = FeedPublisher::new(podcast)
            .publish(&filename, &title, now)
            .context("failed to update podcast feed")?;

        info!("Published '{title}'");
        Ok(RunSummary {
            episode_title: title,
            audio_path,
            script,
            sources,
            feed,
        })
    }
}
