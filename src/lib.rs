//! daily-podcast-rs: turns a handful of news feeds into a daily podcast episode.
//!
//! Pipeline: RSS/Atom sources → digest → LLM script → TTS audio → podcast feed.

pub mod aggregator;
pub mod composer;
pub mod config;
pub mod feed;
pub mod history;
pub mod llm;
pub mod narrator;
pub mod pipeline;
pub mod rss;
pub mod sanitize;
