//! Podcast feed document: load, insert newest episode, evict oldest, save.
//!
//! Episodes are kept as an ordered list (newest first) and the XML is
//! regenerated from scratch on every save:
//!
//! ```text
//! <?xml version="1.0" encoding="UTF-8"?>
//! <rss version="2.0">
//!   <channel>
//!     <title/> <description/> <link/>
//!     <item> <title/> <pubDate/> <enclosure url type length/> </item> ...
//!   </channel>
//! </rss>
//! ```

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use chrono::{DateTime, FixedOffset};
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};
use thiserror::Error;
use tracing::{debug, info};

use crate::config::PodcastConfig;

pub const AUDIO_MIME_TYPE: &str = "audio/mpeg";

#[derive(Debug, Error)]
pub enum FeedError {
    #[error("failed to read {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed feed document: {0}")]
    Malformed(String),
    #[error("failed to serialize feed document: {0}")]
    Serialize(String),
    #[error("failed to write {}: {source}", .path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

fn malformed(reason: impl std::fmt::Display) -> FeedError {
    FeedError::Malformed(reason.to_string())
}

fn serialize_err(reason: impl std::fmt::Display) -> FeedError {
    FeedError::Serialize(reason.to_string())
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Enclosure {
    pub url: String,
    pub mime_type: String,
    /// Declared size. A configured placeholder, not the real file size.
    pub length: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Episode {
    pub title: String,
    /// RFC 2822 date as written to `<pubDate>`.
    pub pub_date: String,
    pub enclosure: Enclosure,
}

impl Episode {
    pub fn new(title: &str, published: DateTime<FixedOffset>, url: String, length: u64) -> Self {
        Self {
            title: title.to_string(),
            pub_date: published.to_rfc2822(),
            enclosure: Enclosure {
                url,
                mime_type: AUDIO_MIME_TYPE.to_string(),
                length,
            },
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FeedDocument {
    pub title: String,
    pub description: String,
    pub link: String,
    /// Newest first.
    pub episodes: Vec<Episode>,
}

impl FeedDocument {
    pub fn new(title: &str, description: &str, link: &str) -> Self {
        Self {
            title: title.to_string(),
            description: description.to_string(),
            link: link.to_string(),
            episodes: Vec::new(),
        }
    }

    /// Insert `episode` as the newest entry and drop the oldest ones beyond
    /// `max_episodes`. Returns what was evicted, oldest last.
    pub fn push_front(&mut self, episode: Episode, max_episodes: usize) -> Vec<Episode> {
        self.episodes.insert(0, episode);
        let keep = max_episodes.max(1);
        if self.episodes.len() > keep {
            self.episodes.split_off(keep)
        } else {
            Vec::new()
        }
    }

    /// Load the document at `path`, or `None` if there is no file yet.
    pub fn load(path: &Path) -> Result<Option<Self>, FeedError> {
        match fs::read_to_string(path) {
            Ok(contents) => Self::parse(&contents).map(Some),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(source) => Err(FeedError::Read {
                path: path.to_path_buf(),
                source,
            }),
        }
    }

    pub fn save(&self, path: &Path) -> Result<(), FeedError> {
        let xml = self.to_xml()?;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|source| FeedError::Write {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        fs::write(path, xml).map_err(|source| FeedError::Write {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn parse(xml: &str) -> Result<Self, FeedError> {
        let mut reader = Reader::from_str(xml);

        let mut stack: Vec<String> = Vec::new();
        let mut doc: Option<FeedDocument> = None;
        let mut item: Option<ItemBuilder> = None;
        let mut text = String::new();

        loop {
            match reader.read_event().map_err(malformed)? {
                Event::Start(e) => {
                    let name = String::from_utf8_lossy(e.local_name().as_ref()).into_owned();
                    match (stack.len(), name.as_str()) {
                        (0, "rss") => {}
                        (0, other) => {
                            return Err(malformed(format!("root element is <{other}>, expected <rss>")))
                        }
                        (1, "channel") if doc.is_none() => doc = Some(FeedDocument::default()),
                        (2, "item") if in_channel(&stack) => item = Some(ItemBuilder::default()),
                        (3, "enclosure") if item.is_some() => {
                            if let Some(item) = item.as_mut() {
                                item.enclosure = Some(read_enclosure(&e)?);
                            }
                        }
                        _ => {}
                    }
                    stack.push(name);
                    text.clear();
                }
                Event::Empty(e) => {
                    if stack.len() == 3 && e.local_name().as_ref() == b"enclosure" {
                        if let Some(item) = item.as_mut() {
                            item.enclosure = Some(read_enclosure(&e)?);
                        }
                    }
                }
                Event::Text(t) => text.push_str(&t.unescape().map_err(malformed)?),
                Event::CData(c) => text.push_str(&String::from_utf8_lossy(&c)),
                Event::End(_) => {
                    let name = stack.pop().unwrap_or_default();
                    match stack.len() {
                        2 if in_channel(&stack) => {
                            if let Some(doc) = doc.as_mut() {
                                let value = text.trim().to_string();
                                match name.as_str() {
                                    "title" => doc.title = value,
                                    "description" => doc.description = value,
                                    "link" => doc.link = value,
                                    "item" => {
                                        if let Some(builder) = item.take() {
                                            doc.episodes.push(builder.finish()?);
                                        }
                                    }
                                    _ => {}
                                }
                            }
                        }
                        3 if item.is_some() && stack[2] == "item" => {
                            if let Some(item) = item.as_mut() {
                                let value = text.trim().to_string();
                                match name.as_str() {
                                    "title" => item.title = value,
                                    "pubDate" => item.pub_date = value,
                                    _ => {}
                                }
                            }
                        }
                        _ => {}
                    }
                    text.clear();
                }
                Event::Eof => break,
                _ => {}
            }
        }

        if !stack.is_empty() {
            return Err(malformed(format!("unclosed <{}>", stack.join("><"))));
        }
        let doc = doc.ok_or_else(|| malformed("missing <rss><channel>"))?;
        debug!("Parsed feed '{}' with {} episodes", doc.title, doc.episodes.len());
        Ok(doc)
    }

    pub fn to_xml(&self) -> Result<String, FeedError> {
        let mut writer = Writer::new_with_indent(Vec::new(), b' ', 2);

        writer
            .write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))
            .map_err(serialize_err)?;
        writer
            .write_event(Event::Start(
                BytesStart::new("rss").with_attributes([("version", "2.0")]),
            ))
            .map_err(serialize_err)?;
        writer
            .write_event(Event::Start(BytesStart::new("channel")))
            .map_err(serialize_err)?;

        write_text_element(&mut writer, "title", &self.title)?;
        write_text_element(&mut writer, "description", &self.description)?;
        write_text_element(&mut writer, "link", &self.link)?;

        for episode in &self.episodes {
            writer
                .write_event(Event::Start(BytesStart::new("item")))
                .map_err(serialize_err)?;
            write_text_element(&mut writer, "title", &episode.title)?;
            write_text_element(&mut writer, "pubDate", &episode.pub_date)?;

            let length = episode.enclosure.length.to_string();
            writer
                .write_event(Event::Empty(BytesStart::new("enclosure").with_attributes([
                    ("url", episode.enclosure.url.as_str()),
                    ("type", episode.enclosure.mime_type.as_str()),
                    ("length", length.as_str()),
                ])))
                .map_err(serialize_err)?;

            writer
                .write_event(Event::End(BytesEnd::new("item")))
                .map_err(serialize_err)?;
        }

        writer
            .write_event(Event::End(BytesEnd::new("channel")))
            .map_err(serialize_err)?;
        writer
            .write_event(Event::End(BytesEnd::new("rss")))
            .map_err(serialize_err)?;

        let mut xml = String::from_utf8(writer.into_inner()).map_err(serialize_err)?;
        xml.push('\n');
        Ok(xml)
    }
}

fn in_channel(stack: &[String]) -> bool {
    stack.get(1).map(String::as_str) == Some("channel")
}

fn write_text_element(
    writer: &mut Writer<Vec<u8>>,
    name: &str,
    value: &str,
) -> Result<(), FeedError> {
    writer
        .write_event(Event::Start(BytesStart::new(name)))
        .map_err(serialize_err)?;
    writer
        .write_event(Event::Text(BytesText::new(value)))
        .map_err(serialize_err)?;
    writer
        .write_event(Event::End(BytesEnd::new(name)))
        .map_err(serialize_err)?;
    Ok(())
}

fn read_enclosure(e: &BytesStart) -> Result<Enclosure, FeedError> {
    let mut enclosure = Enclosure::default();
    for attr in e.attributes() {
        let attr = attr.map_err(malformed)?;
        let value = attr.unescape_value().map_err(malformed)?.into_owned();
        match attr.key.as_ref() {
            b"url" => enclosure.url = value,
            b"type" => enclosure.mime_type = value,
            b"length" => {
                enclosure.length = value
                    .trim()
                    .parse()
                    .map_err(|_| malformed(format!("enclosure length {value:?} is not a number")))?
            }
            _ => {}
        }
    }
    Ok(enclosure)
}

#[derive(Default)]
struct ItemBuilder {
    title: String,
    pub_date: String,
    enclosure: Option<Enclosure>,
}

impl ItemBuilder {
    fn finish(self) -> Result<Episode, FeedError> {
        let enclosure = self
            .enclosure
            .filter(|e| !e.url.is_empty())
            .ok_or_else(|| malformed(format!("item '{}' has no enclosure url", self.title)))?;
        Ok(Episode {
            title: self.title,
            pub_date: self.pub_date,
            enclosure,
        })
    }
}

/// `<base_url>/<filename>` with exactly one slash between them.
pub fn enclosure_url(base_url: &str, filename: &str) -> String {
    format!("{}/{}", base_url.trim_end_matches('/'), filename.trim_start_matches('/'))
}

pub struct FeedPublisher<'a> {
    config: &'a PodcastConfig,
}

impl<'a> FeedPublisher<'a> {
    pub fn new(config: &'a PodcastConfig) -> Self {
        Self { config }
    }

    /// Add an episode for `audio_filename` to the persisted feed and save it.
    pub fn publish(
        &self,
        audio_filename: &str,
        title: &str,
        published: DateTime<FixedOffset>,
    ) -> Result<FeedDocument, FeedError> {
        let path = self.config.feed_path();

        let mut doc = match FeedDocument::load(&path)? {
            Some(doc) => {
                info!("Loaded feed {} ({} episodes)", path.display(), doc.episodes.len());
                doc
            }
            None => {
                info!("No feed at {}, creating a new one", path.display());
                FeedDocument::new(
                    &self.config.name,
                    &self.config.description,
                    &self.config.base_url,
                )
            }
        };
        // The podcast may have been renamed since the feed was created.
        doc.title = self.config.name.clone();

        let episode = Episode::new(
            title,
            published,
            enclosure_url(&self.config.base_url, audio_filename),
            self.config.enclosure_length,
        );
        let evicted = doc.push_front(episode, self.config.max_episodes);
        for old in &evicted {
            info!("Evicted episode '{}' ({})", old.title, old.enclosure.url);
        }

        doc.save(&path)?;
        info!("Feed saved to {} ({} episodes)", path.display(), doc.episodes.len());
        Ok(doc)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn scratch(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "daily-podcast-feed-{}-{name}",
            std::process::id()
        ));
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn config(dir: &Path) -> PodcastConfig {
        PodcastConfig {
            name: "我的车载早报".into(),
            base_url: "https://example.github.io/podcast/".into(),
            output_dir: dir.to_path_buf(),
            ..Default::default()
        }
    }

    fn day(d: u32) -> DateTime<FixedOffset> {
        FixedOffset::east_opt(8 * 3600)
            .unwrap()
            .with_ymd_and_hms(2026, 3, d, 7, 0, 0)
            .unwrap()
    }

    fn publish_day(publisher: &FeedPublisher, d: u32) -> FeedDocument {
        let date = day(d).format("%Y-%m-%d").to_string();
        publisher
            .publish(&format!("episode_{date}.mp3"), &format!("{date} 早间新闻"), day(d))
            .unwrap()
    }

    #[test]
    fn first_publish_creates_skeleton_with_one_episode() {
        let dir = scratch("first");
        let cfg = config(&dir);
        let doc = publish_day(&FeedPublisher::new(&cfg), 1);

        assert_eq!(doc.title, "我的车载早报");
        assert_eq!(doc.description, "AI Generated Podcast");
        assert_eq!(doc.link, "https://example.github.io/podcast/");
        assert_eq!(doc.episodes.len(), 1);

        let ep = &doc.episodes[0];
        assert_eq!(ep.title, "2026-03-01 早间新闻");
        assert!(ep.pub_date.starts_with("Sun,"));
        assert!(ep.pub_date.ends_with("Mar 2026 07:00:00 +0800"));
        assert_eq!(DateTime::parse_from_rfc2822(&ep.pub_date).unwrap(), day(1));
        assert_eq!(
            ep.enclosure.url,
            "https://example.github.io/podcast/episode_2026-03-01.mp3"
        );
        assert_eq!(ep.enclosure.mime_type, "audio/mpeg");
        assert_eq!(ep.enclosure.length, 1_000_000);

        let reloaded = FeedDocument::load(&cfg.feed_path()).unwrap().unwrap();
        assert_eq!(reloaded, doc);
    }

    #[test]
    fn written_xml_has_expected_shape() {
        let dir = scratch("shape");
        let cfg = config(&dir);
        publish_day(&FeedPublisher::new(&cfg), 2);

        let xml = fs::read_to_string(cfg.feed_path()).unwrap();
        assert!(xml.starts_with(r#"<?xml version="1.0" encoding="UTF-8"?>"#));
        assert!(xml.contains(r#"<rss version="2.0">"#));
        assert!(xml.contains(
            r#"<enclosure url="https://example.github.io/podcast/episode_2026-03-02.mp3" type="audio/mpeg" length="1000000"/>"#
        ));
        let title = xml.find("<title>我的车载早报</title>").unwrap();
        let desc = xml.find("<description>").unwrap();
        let link = xml.find("<link>").unwrap();
        let item = xml.find("<item>").unwrap();
        assert!(title < desc && desc < link && link < item);
    }

    #[test]
    fn retention_evicts_the_oldest() {
        let dir = scratch("retention");
        let cfg = config(&dir);
        let publisher = FeedPublisher::new(&cfg);
        for d in 1..=5 {
            assert_eq!(publish_day(&publisher, d).episodes.len(), d as usize);
        }

        let doc = publish_day(&publisher, 6);
        let titles: Vec<&str> = doc.episodes.iter().map(|e| e.title.as_str()).collect();
        assert_eq!(
            titles,
            vec![
                "2026-03-06 早间新闻",
                "2026-03-05 早间新闻",
                "2026-03-04 早间新闻",
                "2026-03-03 早间新闻",
                "2026-03-02 早间新闻",
            ]
        );
    }

    #[test]
    fn oversized_feed_is_trimmed_to_limit() {
        let dir = scratch("oversized");
        let cfg = config(&dir);
        let mut doc = FeedDocument::new("old", "d", "l");
        for i in 0..8 {
            doc.episodes.push(Episode::new(
                &format!("old {i}"),
                day(1),
                format!("https://x/{i}.mp3"),
                1,
            ));
        }
        doc.save(&cfg.feed_path()).unwrap();

        let doc = publish_day(&FeedPublisher::new(&cfg), 9);
        assert_eq!(doc.episodes.len(), 5);
        assert_eq!(doc.episodes[0].title, "2026-03-09 早间新闻");
        assert_eq!(doc.episodes[4].title, "old 3");
    }

    #[test]
    fn channel_title_follows_config() {
        let dir = scratch("rename");
        let mut cfg = config(&dir);
        publish_day(&FeedPublisher::new(&cfg), 1);

        cfg.name = "通勤快报".into();
        cfg.description = "ignored after creation".into();
        let doc = publish_day(&FeedPublisher::new(&cfg), 2);
        assert_eq!(doc.title, "通勤快报");
        assert_eq!(doc.description, "AI Generated Podcast");
        assert_eq!(doc.episodes.len(), 2);
    }

    #[test]
    fn malformed_feed_is_fatal_and_left_alone() {
        let dir = scratch("malformed");
        let cfg = config(&dir);
        let garbage = "<rss><channel><title>broken</channel>";
        fs::write(cfg.feed_path(), garbage).unwrap();

        let err = FeedPublisher::new(&cfg)
            .publish("episode.mp3", "t", day(1))
            .unwrap_err();
        assert!(matches!(err, FeedError::Malformed(_)));
        assert_eq!(fs::read_to_string(cfg.feed_path()).unwrap(), garbage);
    }

    #[test]
    fn parse_rejects_unexpected_structure() {
        assert!(FeedDocument::parse("<feed><title>atom</title></feed>").is_err());
        assert!(FeedDocument::parse("<rss version=\"2.0\"></rss>").is_err());
        assert!(FeedDocument::parse(
            "<rss><channel><title>t</title><item><title>no audio</title></item></channel></rss>"
        )
        .is_err());
        assert!(FeedDocument::parse(
            r#"<rss><channel><item><enclosure url="u" type="audio/mpeg" length="lots"/></item></channel></rss>"#
        )
        .is_err());
    }

    #[test]
    fn text_is_escaped_and_restored() {
        let mut doc = FeedDocument::new("R&D <daily>", "a \"quoted\" feed", "https://x/?a=1&b=2");
        doc.push_front(
            Episode::new("Q&A", day(3), "https://x/a.mp3?x=1&y=2".into(), 42),
            5,
        );
        let xml = doc.to_xml().unwrap();
        assert!(xml.contains("R&amp;D &lt;daily&gt;"));
        assert_eq!(FeedDocument::parse(&xml).unwrap(), doc);
    }

    #[test]
    fn push_front_never_exceeds_limit() {
        let mut doc = FeedDocument::default();
        for i in 0..20 {
            doc.push_front(Episode::new("e", day(1), format!("u{i}"), 1), 5);
            assert!(doc.episodes.len() <= 5);
        }
        assert_eq!(doc.episodes[0].enclosure.url, "u19");
        assert_eq!(doc.episodes[4].enclosure.url, "u15");
    }

    #[test]
    fn enclosure_url_joins_with_single_slash() {
        assert_eq!(enclosure_url("https://a/b", "e.mp3"), "https://a/b/e.mp3");
        assert_eq!(enclosure_url("https://a/b/", "e.mp3"), "https://a/b/e.mp3");
    }
}
