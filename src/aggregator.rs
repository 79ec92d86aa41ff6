//! Source aggregation: feeds → cleaned, truncated digest.
//!
//! A failing source is logged and skipped. If nothing at all is collected
//! the result is an empty [`Digest`], never an error.

use std::sync::LazyLock;

use regex::Regex;
use tracing::{info, warn};

use crate::config::SourcesConfig;
use crate::rss::{Entry, FeedSource};

static TAG_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<[^>]*>").unwrap());
static NUMERIC_ENTITY_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"&#(?:[xX]([0-9a-fA-F]{1,6})|([0-9]{1,7}));").unwrap());
static WHITESPACE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").unwrap());

/// Formatted `(title, cleaned summary)` blocks in source-then-entry order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Digest {
    entries: Vec<String>,
}

impl Digest {
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn push(&mut self, entry: String) {
        self.entries.push(entry);
    }

    pub fn entries(&self) -> &[String] {
        &self.entries
    }

    /// Entries joined by a blank line.
    pub fn text(&self) -> String {
        self.entries.join("\n\n")
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SourceStats {
    pub requested: usize,
    pub failed: usize,
    pub entries: usize,
}

pub struct Aggregator<'a> {
    config: &'a SourcesConfig,
    source: &'a dyn FeedSource,
}

impl<'a> Aggregator<'a> {
    pub fn new(config: &'a SourcesConfig, source: &'a dyn FeedSource) -> Self {
        Self { config, source }
    }

    pub async fn collect(&self) -> (Digest, SourceStats) {
        let mut digest = Digest::default();
        let mut stats = SourceStats {
            requested: self.config.urls.len(),
            ..Default::default()
        };

        for url in &self.config.urls {
            let entries = match self.source.fetch(url).await {
                Ok(entries) => entries,
                Err(e) => {
                    warn!("Skipping source {url}: {e:#}");
                    stats.failed += 1;
                    continue;
                }
            };

            let taken = entries.len().min(self.config.entries_per_source);
            info!("Source {url}: {} entries, using {taken}", entries.len());

            digest.entries.extend(
                entries
                    .iter()
                    .take(self.config.entries_per_source)
                    .map(|e| format_entry(e, self.config.summary_max_chars)),
            );
        }

        stats.entries = digest.len();
        if digest.is_empty() {
            warn!("No entries collected from {} sources", stats.requested);
        }
        (digest, stats)
    }
}

pub fn format_entry(entry: &Entry, max_chars: usize) -> String {
    let summary = entry.summary.as_deref().unwrap_or_default();
    let cleaned = truncate_chars(&strip_markup(summary), max_chars);
    format!("标题：{}\n内容：{}", strip_markup(&entry.title), cleaned)
}

/// Decode common entities, remove markup tags, and flatten whitespace.
///
/// Entities are decoded first so escaped markup (`&lt;p&gt;`) is removed as
/// a tag too. The result never contains `<` or `>`.
pub fn strip_markup(html: &str) -> String {
    let decoded = decode_entities(html);
    let without_tags = TAG_RE.replace_all(&decoded, " ");
    let no_brackets: String = without_tags
        .chars()
        .filter(|c| *c != '<' && *c != '>')
        .collect();
    WHITESPACE_RE
        .replace_all(&no_brackets, " ")
        .trim()
        .to_string()
}

fn decode_entities(text: &str) -> String {
    let numeric = NUMERIC_ENTITY_RE.replace_all(text, |caps: &regex::Captures| {
        let code = match (caps.get(1), caps.get(2)) {
            (Some(hex), _) => u32::from_str_radix(hex.as_str(), 16).ok(),
            (_, Some(dec)) => dec.as_str().parse::<u32>().ok(),
            _ => None,
        };
        code.and_then(char::from_u32)
            .map(String::from)
            .unwrap_or_default()
    });

    // &amp; last so "&amp;lt;" stays "&lt;"
    numeric
        .replace("&nbsp;", " ")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&amp;", "&")
}

/// Truncate to at most `max_chars` characters without splitting one.
pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => text[..idx].to_string(),
        None => text.to_string(),
    }
}
