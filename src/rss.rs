//! Syndication feed fetching and parsing.
//!
//! Understands RSS 2.0 (`<item>`) and Atom (`<entry>`) documents and keeps
//! only what the digest needs: each entry's title and raw summary markup.

use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use quick_xml::events::Event;
use quick_xml::Reader;
use reqwest::Client;
use tracing::debug;

/// One entry of a source feed. Only lives for the duration of a run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Entry {
    pub title: String,
    pub summary: Option<String>,
}

/// Fetches and parses one feed URL into its entries, in feed order.
#[async_trait]
pub trait FeedSource: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<Vec<Entry>>;
}

pub struct HttpFeedSource {
    client: Client,
}

impl HttpFeedSource {
    pub fn new(timeout_secs: u64) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .user_agent(concat!("daily-podcast-rs/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("failed to build feed HTTP client")?;
        Ok(Self { client })
    }
}

#[async_trait]
impl FeedSource for HttpFeedSource {
    async fn fetch(&self, url: &str) -> Result<Vec<Entry>> {
        let resp = self
            .client
            .get(url)
            .send()
            .await
            .with_context(|| format!("failed to reach {url}"))?;

        if !resp.status().is_success() {
            bail!("{url} returned status {}", resp.status());
        }

        let body = resp
            .text()
            .await
            .with_context(|| format!("failed to read body of {url}"))?;
        debug!("Fetched {} bytes from {url}", body.len());

        parse_feed(&body).with_context(|| format!("failed to parse feed {url}"))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Field {
    Title,
    Summary,
    Content,
}

impl Field {
    fn from_tag(tag: &[u8]) -> Option<Self> {
        match tag {
            b"title" => Some(Self::Title),
            b"description" | b"summary" => Some(Self::Summary),
            // `content:encoded` in RSS, `content` in Atom
            b"encoded" | b"content" => Some(Self::Content),
            _ => None,
        }
    }
}

#[derive(Default)]
struct PartialEntry {
    title: Option<String>,
    summary: Option<String>,
    content: Option<String>,
}

impl PartialEntry {
    fn finish(self) -> Option<Entry> {
        let title = self.title.map(|t| t.trim().to_string()).unwrap_or_default();
        let summary = self
            .summary
            .or(self.content)
            .filter(|s| !s.trim().is_empty());
        if title.is_empty() && summary.is_none() {
            return None;
        }
        Some(Entry { title, summary })
    }

    fn slot(&mut self, field: Field) -> &mut Option<String> {
        match field {
            Field::Title => &mut self.title,
            Field::Summary => &mut self.summary,
            Field::Content => &mut self.content,
        }
    }
}

/// Parse an RSS 2.0 or Atom document into entries.
///
/// Fails if the document is not well-formed or has no `rss`, `feed` or
/// `RDF` root element.
pub fn parse_feed(xml: &str) -> Result<Vec<Entry>> {
    let mut reader = Reader::from_str(xml);

    let mut entries = Vec::new();
    let mut saw_root = false;
    let mut current: Option<PartialEntry> = None;
    // Field being captured plus how many nested same-named tags are open.
    let mut capturing: Option<(Field, usize)> = None;
    let mut text = String::new();

    loop {
        match reader.read_event().context("malformed XML")? {
            Event::Start(e) => {
                let name = e.local_name();
                let tag = name.as_ref();
                if !saw_root {
                    saw_root = matches!(tag, b"rss" | b"feed" | b"RDF");
                    if !saw_root {
                        bail!(
                            "unexpected root element <{}>",
                            String::from_utf8_lossy(tag)
                        );
                    }
                    continue;
                }
                if matches!(tag, b"item" | b"entry") && current.is_none() {
                    current = Some(PartialEntry::default());
                    continue;
                }
                if let Some(f) = Field::from_tag(tag) {
                    if let Some((field, depth)) = capturing.as_mut() {
                        if *field == f {
                            *depth += 1;
                        }
                    } else if current.is_some() {
                        capturing = Some((f, 1));
                        text.clear();
                    }
                }
            }
            Event::End(e) => {
                let name = e.local_name();
                let tag = name.as_ref();
                if let Some((field, depth)) = capturing.as_mut() {
                    if Field::from_tag(tag) == Some(*field) {
                        *depth -= 1;
                        if *depth == 0 {
                            let field = *field;
                            capturing = None;
                            if let Some(entry) = current.as_mut() {
                                let slot = entry.slot(field);
                                if slot.is_none() {
                                    *slot = Some(std::mem::take(&mut text));
                                }
                            }
                            text.clear();
                        }
                    }
                    continue;
                }
                if matches!(tag, b"item" | b"entry") {
                    if let Some(entry) = current.take().and_then(PartialEntry::finish) {
                        entries.push(entry);
                    }
                }
            }
            Event::Text(t) if capturing.is_some() => match t.unescape() {
                Ok(s) => text.push_str(&s),
                // HTML entities such as &nbsp; are not XML; keep them raw
                // and let the digest cleaner decode them.
                Err(_) => text.push_str(&String::from_utf8_lossy(&t)),
            },
            Event::CData(c) if capturing.is_some() => {
                text.push_str(&String::from_utf8_lossy(&c));
            }
            // <br/> and friends inside inline xhtml content separate words
            Event::Empty(_) if capturing.is_some() => text.push(' '),
            Event::Eof => break,
            _ => {}
        }
    }

    if !saw_root {
        bail!("document has no root element");
    }

    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_rss_items_in_order() {
        let xml = r#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0" xmlns:content="http://purl.org/rss/1.0/modules/content/">
  <channel>
    <title>Channel title is not an entry</title>
    <item>
      <title>First &amp; foremost</title>
      <description>&lt;p&gt;Hello&lt;/p&gt;</description>
    </item>
    <item>
      <title><![CDATA[Second]]></title>
      <content:encoded><![CDATA[<p>Body only in content</p>]]></content:encoded>
    </item>
    <item>
      <title>No summary</title>
    </item>
  </channel>
</rss>"#;
        let entries = parse_feed(xml).unwrap();
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].title, "First & foremost");
        assert_eq!(entries[0].summary.as_deref(), Some("<p>Hello</p>"));
        assert_eq!(entries[1].title, "Second");
        assert_eq!(entries[1].summary.as_deref(), Some("<p>Body only in content</p>"));
        assert_eq!(entries[2].summary, None);
    }

    #[test]
    fn description_preferred_over_content() {
        let xml = r#"<rss><channel><item>
            <title>t</title>
            <content:encoded>long body</content:encoded>
            <description>short</description>
        </item></channel></rss>"#;
        let entries = parse_feed(xml).unwrap();
        assert_eq!(entries[0].summary.as_deref(), Some("short"));
    }

    #[test]
    fn parses_atom_entries() {
        let xml = r#"<?xml version="1.0"?>
<feed xmlns="http://www.w3.org/2005/Atom">
  <title>Blog</title>
  <entry>
    <title type="html">Atom one</title>
    <summary>Short &lt;b&gt;summary&lt;/b&gt;</summary>
  </entry>
  <entry>
    <title>Atom two</title>
    <content type="xhtml"><div><p>Inline</p> markup</div></content>
  </entry>
</feed>"#;
        let entries = parse_feed(xml).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].title, "Atom one");
        assert_eq!(entries[0].summary.as_deref(), Some("Short <b>summary</b>"));
        assert_eq!(entries[1].summary.as_deref(), Some("Inline markup"));
    }

    #[test]
    fn empty_inline_elements_separate_words() {
        let xml = r#"<feed><entry>
            <title>t</title>
            <content type="xhtml"><div>one<br/>two<hr/>three</div></content>
        </entry></feed>"#;
        let entries = parse_feed(xml).unwrap();
        assert_eq!(entries[0].summary.as_deref(), Some("one two three"));
    }

    #[test]
    fn html_entities_do_not_abort_parsing() {
        let xml = "<rss><channel><item><title>a&nbsp;b</title></item></channel></rss>";
        let entries = parse_feed(xml).unwrap();
        assert_eq!(entries[0].title, "a&nbsp;b");
    }

    #[test]
    fn rejects_non_feed_documents() {
        assert!(parse_feed("<html><body>nope</body></html>").is_err());
        assert!(parse_feed("").is_err());
        assert!(parse_feed("<rss><channel><item><title>x</item></channel></rss>").is_err());
    }
}
