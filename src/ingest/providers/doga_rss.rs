// src/ingest/providers/doga_rss.rs
use std::borrow::Cow;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use async_trait::async_trait;
use metrics::{counter, histogram};
use once_cell::sync::Lazy;
use quick_xml::{events::Event, Reader};
use regex::{Captures, Regex};
use serde::Deserialize;

use crate::error::FeedError;
use crate::ingest::dates::to_iso_date;
use crate::ingest::types::{FeedEntry, FeedSnapshot, FeedSource};
use crate::ingest::{clean_field, ensure_metrics_described, extract_issue_number, split_category};

static RE_NAMED_ENTITY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"&([A-Za-z][A-Za-z0-9]*);").expect("valid entity regex"));

const XML_ENTITIES: [&str; 5] = ["amp", "lt", "gt", "quot", "apos"];
/// Typographic entities folded to plain ASCII (quotes stay escaped for attribute values).
const ASCII_FOLDS: [(&str, &str); 7] = [
    ("nbsp", " "),
    ("ndash", "-"),
    ("mdash", "-"),
    ("ldquo", "&quot;"),
    ("rdquo", "&quot;"),
    ("lsquo", "&apos;"),
    ("rsquo", "&apos;"),
];

#[derive(Debug, Deserialize)]
struct Rss {
    channel: Option<Channel>,
}

#[derive(Debug, Deserialize)]
struct Channel {
    description: Option<String>,
    #[serde(rename = "pubDate")]
    pub_date: Option<String>,
    #[serde(rename = "lastBuildDate")]
    last_build_date: Option<String>,
    /// Items may be interleaved with other channel children.
    #[serde(rename = "item", default)]
    item: Vec<Item>,
}

#[derive(Debug, Deserialize)]
struct Item {
    title: Option<String>,
    link: Option<String>,
    #[serde(rename = "pubDate")]
    pub_date: Option<String>,
    description: Option<String>,
}

/// Diario Oficial de Galicia RSS summary feed.
pub struct DogaRssSource {
    url: String,
    mode: Mode,
}

enum Mode {
    Fixture(String),
    Http(reqwest::Client),
}

impl DogaRssSource {
    pub fn from_url(url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("doga-analyzer/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(Duration::from_secs(5).min(timeout))
            .timeout(timeout)
            .build()
            .context("building feed http client")?;
        Ok(Self {
            url: url.into(),
            mode: Mode::Http(client),
        })
    }

    /// Serve a fixed document; `url` is what the snapshot reports as its source.
    pub fn from_fixture(xml: &str, url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            mode: Mode::Fixture(xml.to_string()),
        }
    }

    async fn download(&self, client: &reqwest::Client) -> Result<String, FeedError> {
        let fetch_err = |e: reqwest::Error| FeedError::Fetch {
            url: self.url.clone(),
            reason: e.to_string(),
        };
        let resp = client.get(&self.url).send().await.map_err(fetch_err)?;
        let resp = resp.error_for_status().map_err(fetch_err)?;
        resp.text().await.map_err(fetch_err)
    }
}

#[async_trait]
impl FeedSource for DogaRssSource {
    async fn fetch_snapshot(&self) -> Result<FeedSnapshot, FeedError> {
        ensure_metrics_described();
        counter!("feed_fetch_total").increment(1);

        let parsed = match &self.mode {
            Mode::Fixture(xml) => parse_snapshot(xml, &self.url),
            Mode::Http(client) => match self.download(client).await {
                Ok(body) => parse_snapshot(&body, &self.url),
                Err(e) => Err(e),
            },
        };

        if let Err(e) = &parsed {
            tracing::warn!(error = %e, url = %self.url, "feed ingestion failed");
            counter!("feed_errors_total").increment(1);
        }
        parsed
    }

    fn url(&self) -> &str {
        &self.url
    }
}

/// Parse a DOGA RSS document into a snapshot.
pub fn parse_snapshot(xml: &str, source_url: &str) -> Result<FeedSnapshot, FeedError> {
    let t0 = Instant::now();
    let xml_clean = scrub_html_entities_for_xml(xml);
    check_well_formed(&xml_clean)?;

    let rss: Rss =
        quick_xml::de::from_str(&xml_clean).map_err(|e| FeedError::Shape(e.to_string()))?;
    let channel = rss
        .channel
        .ok_or_else(|| FeedError::Shape("missing <channel>".to_string()))?;
    if channel.item.is_empty() {
        return Err(FeedError::Shape("channel has no <item> entries".to_string()));
    }

    let channel_description = channel.description.unwrap_or_default();
    let issue_number = extract_issue_number(&channel_description);
    let publication_date = channel
        .pub_date
        .or(channel.last_build_date)
        .or_else(|| channel.item.iter().find_map(|it| it.pub_date.clone()))
        .map(|d| to_iso_date(&d))
        .unwrap_or_default();

    let entries: Vec<FeedEntry> = channel.item.into_iter().map(entry_from_item).collect();

    let ms = t0.elapsed().as_secs_f64() * 1_000.0;
    histogram!("feed_parse_ms").record(ms);
    counter!("feed_entries_total").increment(entries.len() as u64);
    tracing::debug!(
        entries = entries.len(),
        %issue_number,
        %publication_date,
        parse_ms = ms,
        "feed parsed"
    );

    Ok(FeedSnapshot {
        entries,
        issue_number,
        publication_date,
        source_url: source_url.to_string(),
    })
}

fn entry_from_item(it: Item) -> FeedEntry {
    let description = it.description.unwrap_or_default().trim().to_string();
    let (category, subcategory) = split_category(&description);
    FeedEntry {
        title: clean_field(it.title.as_deref().unwrap_or_default()),
        link: it.link.unwrap_or_default().trim().to_string(),
        publication_date: to_iso_date(it.pub_date.as_deref().unwrap_or_default()),
        description,
        category,
        subcategory,
    }
}

/// Tokenize the whole document once; any syntax error or unbalanced tag is a parse failure.
fn check_well_formed(xml: &str) -> Result<(), FeedError> {
    let mut reader = Reader::from_str(xml);
    let mut depth: usize = 0;
    let mut saw_root = false;
    loop {
        match reader.read_event() {
            Ok(Event::Start(_)) => {
                depth += 1;
                saw_root = true;
            }
            Ok(Event::Empty(_)) => saw_root = true,
            Ok(Event::End(_)) => depth = depth.saturating_sub(1),
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => {
                return Err(FeedError::Parse(format!(
                    "at byte {}: {e}",
                    reader.buffer_position()
                )))
            }
        }
    }
    if !saw_root {
        return Err(FeedError::Parse("document has no root element".to_string()));
    }
    if depth != 0 {
        return Err(FeedError::Parse("unexpected end of document".to_string()));
    }
    Ok(())
}

/// Rewrite HTML named entities into something the XML parser resolves. The five
/// XML entities stay as they are.
fn scrub_html_entities_for_xml(s: &str) -> Cow<'_, str> {
    RE_NAMED_ENTITY.replace_all(s, |caps: &Captures| {
        let name = &caps[1];
        if XML_ENTITIES.contains(&name) {
            return caps[0].to_string();
        }
        if let Some((_, plain)) = ASCII_FOLDS.iter().find(|(n, _)| *n == name) {
            return (*plain).to_string();
        }
        let decoded = html_escape::decode_html_entities(&caps[0]);
        if decoded == &caps[0] {
            // unknown to HTML too: keep it as literal text
            format!("&amp;{name};")
        } else {
            decoded.chars().map(|c| format!("&#{};", u32::from(c))).collect()
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const FEED: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0">
  <channel>
    <title>DOG</title>
    <description>Sumario del Diario núm, 10 de 16/01/2025</description>
    <pubDate>Thu, 16 Jan 2025 00:00:00 +0100</pubDate>
    <item>
      <title>ORDEN de 8 de enero de 2025</title>
      <link>https://www.xunta.gal/dog/a.html</link>
      <pubDate>Thu, 16 Jan 2025 00:00:00 +0100</pubDate>
      <description>I. Disposiciones generales&lt;/br&gt;Consellería de Educación</description>
    </item>
    <item>
      <title>EDICTO&nbsp;judicial</title>
      <link>https://www.xunta.gal/dog/b.html</link>
      <pubDate>not a date</pubDate>
      <description>V. Administración de justicia</description>
    </item>
  </channel>
</rss>"#;

    #[test]
    fn parses_channel_metadata_and_entries() {
        let snap = parse_snapshot(FEED, "https://feed.example/rss").unwrap();
        assert_eq!(snap.issue_number, "10");
        assert_eq!(snap.publication_date, "2025-01-16");
        assert_eq!(snap.source_url, "https://feed.example/rss");
        assert_eq!(snap.entries.len(), 2);

        let a = &snap.entries[0];
        assert_eq!(a.category, "I. Disposiciones generales");
        assert_eq!(a.subcategory, "Consellería de Educación");
        assert_eq!(a.publication_date, "2025-01-16");

        let b = &snap.entries[1];
        assert_eq!(b.title, "EDICTO judicial");
        assert_eq!(b.subcategory, "");
        assert_eq!(b.publication_date, "not a date");
    }

    #[test]
    fn malformed_xml_is_a_parse_error() {
        let err = parse_snapshot("<rss><channel><item></channel></rss>", "u").unwrap_err();
        assert!(matches!(err, FeedError::Parse(_)), "got {err:?}");

        let err = parse_snapshot("<rss><channel>", "u").unwrap_err();
        assert!(matches!(err, FeedError::Parse(_)), "got {err:?}");
    }

    #[test]
    fn missing_channel_or_items_is_a_shape_error() {
        let err = parse_snapshot("<rss version=\"2.0\"></rss>", "u").unwrap_err();
        assert!(matches!(err, FeedError::Shape(_)), "got {err:?}");

        let err = parse_snapshot(
            "<rss><channel><description>x</description></channel></rss>",
            "u",
        )
        .unwrap_err();
        assert!(matches!(err, FeedError::Shape(_)), "got {err:?}");
    }

    #[test]
    fn html_entities_become_xml_safe() {
        let out = scrub_html_entities_for_xml("RESOLUCI&Oacute;N &amp; a&nbsp;b &bogus; &#243;");
        assert_eq!(out, "RESOLUCI&#211;N &amp; a b &amp;bogus; &#243;");
    }

    #[tokio::test]
    async fn fixture_source_reports_its_url() {
        let src = DogaRssSource::from_fixture(FEED, "https://feed.example/rss");
        let snap = src.fetch_snapshot().await.unwrap();
        assert_eq!(src.url(), "https://feed.example/rss");
        assert_eq!(snap.entries.len(), 2);
    }
}
