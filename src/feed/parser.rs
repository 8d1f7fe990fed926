use quick_xml::escape::{resolve_html5_entity, resolve_predefined_entity, unescape_with};
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use serde::Serialize;
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Upper bound on the number of episodes kept from a single fetch.
pub const MAX_EPISODES: usize = 10;

/// SEC-003: Maximum element nesting depth accepted in a feed document.
const MAX_FEED_DEPTH: usize = 64;

// Element depths, counted from the document root (`<rss>` = 1).
const RSS_DEPTH: usize = 1;
const CHANNEL_DEPTH: usize = 2;
const CHANNEL_CHILD_DEPTH: usize = 3;
const ITEM_CHILD_DEPTH: usize = 4;

/// Errors that can occur while parsing a podcast feed.
#[derive(Debug, Error)]
pub enum ParseError {
    /// The document is not well-formed XML.
    #[error("XML parse error: {0}")]
    Xml(String),

    /// The document parsed but has no `<rss><channel>` structure.
    #[error("Document is not an RSS feed")]
    NotRss,

    /// SEC-003: Nesting depth exceeds safety limit.
    #[error("Feed nesting depth exceeds maximum of {0} levels")]
    TooDeep(usize),
}

/// The playable media asset attached to an episode.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Enclosure {
    pub url: String,
    #[serde(rename = "type")]
    pub mime_type: Option<String>,
    pub length: Option<u64>,
}

/// A single podcast episode, in the shape the site renders.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Episode {
    pub title: String,
    /// Description HTML exactly as published in the feed. Never render this unsanitised.
    pub description: String,
    /// Raw `<pubDate>` text.
    pub pub_date: String,
    /// Unix timestamp parsed from `pub_date`, when it is valid RFC 2822.
    pub published: Option<i64>,
    pub link: String,
    pub enclosure: Option<Enclosure>,
    pub guid: String,
    pub duration: Option<String>,
}

/// Channel metadata plus the retained episodes, in feed document order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Podcast {
    pub title: String,
    pub link: String,
    pub episodes: Vec<Episode>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ItemField {
    Title,
    Description,
    ContentEncoded,
    PubDate,
    Link,
    Guid,
    Duration,
}

impl ItemField {
    fn from_name(name: &[u8]) -> Option<Self> {
        match name {
            b"title" => Some(Self::Title),
            b"description" => Some(Self::Description),
            b"content:encoded" => Some(Self::ContentEncoded),
            b"pubDate" => Some(Self::PubDate),
            b"link" => Some(Self::Link),
            b"guid" => Some(Self::Guid),
            b"itunes:duration" => Some(Self::Duration),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Capture {
    ChannelTitle,
    ChannelLink,
    Item(ItemField),
}

#[derive(Debug, Default)]
struct ItemBuilder {
    title: String,
    description: String,
    content_encoded: String,
    pub_date: String,
    link: String,
    guid: String,
    duration: String,
    enclosure: Option<Enclosure>,
}

impl ItemBuilder {
    fn push(&mut self, field: ItemField, text: &str) {
        let target = match field {
            ItemField::Title => &mut self.title,
            ItemField::Description => &mut self.description,
            ItemField::ContentEncoded => &mut self.content_encoded,
            ItemField::PubDate => &mut self.pub_date,
            ItemField::Link => &mut self.link,
            ItemField::Guid => &mut self.guid,
            ItemField::Duration => &mut self.duration,
        };
        target.push_str(text);
    }

    fn build(self) -> Episode {
        let title = match self.title.trim() {
            "" => "Untitled".to_string(),
            t => t.to_string(),
        };
        let description = if self.description.trim().is_empty() {
            self.content_encoded.trim().to_string()
        } else {
            self.description.trim().to_string()
        };
        let pub_date = self.pub_date.trim().to_string();
        let published = chrono::DateTime::parse_from_rfc2822(&pub_date)
            .ok()
            .map(|dt| dt.timestamp());
        let link = self.link.trim().to_string();
        let guid = generate_guid(Some(&self.guid), &link, &title, &pub_date);
        let duration = match self.duration.trim() {
            "" => None,
            d => Some(display_duration(d)),
        };

        Episode {
            title,
            description,
            pub_date,
            published,
            link,
            enclosure: self.enclosure,
            guid,
            duration,
        }
    }
}

/// Parses a podcast RSS document into at most `max_episodes` episodes.
///
/// Items are read in document order and parsing stops as soon as enough
/// items have been collected, so trailing content is never inspected.
/// `max_episodes` is clamped to `1..=MAX_EPISODES`.
///
/// # Errors
///
/// - [`ParseError::Xml`] if the document is not well-formed
/// - [`ParseError::NotRss`] if there is no `<rss><channel>` structure
/// - [`ParseError::TooDeep`] if nesting exceeds the safety limit
///
/// # Security
///
/// SEC-002: `quick-xml` never expands `<!ENTITY>` declarations, so
/// external-entity payloads in a hostile feed are inert.
pub fn parse_podcast(bytes: &[u8], max_episodes: usize) -> Result<Podcast, ParseError> {
    let limit = max_episodes.clamp(1, MAX_EPISODES);

    let mut reader = Reader::from_reader(bytes);
    reader.config_mut().trim_text(true);

    let mut podcast = Podcast::default();
    let mut buf = Vec::new();
    let mut depth: usize = 0;
    let mut saw_rss = false;
    let mut saw_channel = false;
    let mut item: Option<ItemBuilder> = None;
    // The field currently receiving text, and the depth its element opened at
    let mut capture: Option<(Capture, usize)> = None;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => {
                depth += 1;
                if depth > MAX_FEED_DEPTH {
                    return Err(ParseError::TooDeep(MAX_FEED_DEPTH));
                }

                match (depth, e.name().as_ref()) {
                    (RSS_DEPTH, b"rss") => saw_rss = true,
                    (CHANNEL_DEPTH, b"channel") if saw_rss => saw_channel = true,
                    (CHANNEL_CHILD_DEPTH, b"item") if saw_channel => {
                        item = Some(ItemBuilder::default());
                    }
                    (CHANNEL_CHILD_DEPTH, b"title") if saw_channel => {
                        capture = Some((Capture::ChannelTitle, depth));
                    }
                    (CHANNEL_CHILD_DEPTH, b"link") if saw_channel => {
                        capture = Some((Capture::ChannelLink, depth));
                    }
                    (ITEM_CHILD_DEPTH, name) if item.is_some() => {
                        if name == b"enclosure" {
                            if let Some(builder) = item.as_mut() {
                                builder.enclosure = parse_enclosure(&e, &reader);
                            }
                        } else if let Some(field) = ItemField::from_name(name) {
                            capture = Some((Capture::Item(field), depth));
                        }
                    }
                    _ => {}
                }
            }
            Ok(Event::Empty(e)) => {
                // Self-closing elements do not change depth; item children sit one level below
                if depth == CHANNEL_CHILD_DEPTH && e.name().as_ref() == b"enclosure" {
                    if let Some(builder) = item.as_mut() {
                        builder.enclosure = parse_enclosure(&e, &reader);
                    }
                }
            }
            Ok(Event::Text(t)) => {
                if let Some((target, _)) = capture {
                    let text = match t.unescape_with(resolve_entity) {
                        Ok(s) => s.into_owned(),
                        Err(_) => unescape_lenient(&String::from_utf8_lossy(&t)),
                    };
                    append(&mut podcast, item.as_mut(), target, &text);
                }
            }
            Ok(Event::CData(c)) => {
                if let Some((target, _)) = capture {
                    let text = String::from_utf8_lossy(&c).into_owned();
                    append(&mut podcast, item.as_mut(), target, &text);
                }
            }
            Ok(Event::End(e)) => {
                if matches!(capture, Some((_, open_depth)) if open_depth == depth) {
                    capture = None;
                }
                if depth == CHANNEL_CHILD_DEPTH && e.name().as_ref() == b"item" {
                    if let Some(builder) = item.take() {
                        podcast.episodes.push(builder.build());
                        if podcast.episodes.len() >= limit {
                            break;
                        }
                    }
                }
                depth = depth.saturating_sub(1);
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(ParseError::Xml(e.to_string())),
            _ => {}
        }
        buf.clear();
    }

    if !saw_rss || !saw_channel {
        return Err(ParseError::NotRss);
    }

    podcast.title = podcast.title.trim().to_string();
    podcast.link = podcast.link.trim().to_string();
    Ok(podcast)
}

/// XML's predefined entities plus the HTML ones feeds borrow, like `&nbsp;`.
fn resolve_entity(name: &str) -> Option<&'static str> {
    resolve_predefined_entity(name).or_else(|| resolve_html5_entity(name))
}

/// Unescapes each reference on its own, keeping unknown ones as written.
fn unescape_lenient(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut rest = raw;

    while let Some(amp) = rest.find('&') {
        out.push_str(&rest[..amp]);
        let tail = &rest[amp..];
        let end = tail[1..]
            .find(|c: char| c == ';' || c == '&' || c.is_whitespace())
            .map(|i| i + 1);

        match end {
            Some(end) if tail[end..].starts_with(';') => {
                let reference = &tail[..=end];
                match unescape_with(reference, resolve_entity) {
                    Ok(s) => out.push_str(&s),
                    Err(_) => out.push_str(reference),
                }
                rest = &tail[end + 1..];
            }
            _ => {
                out.push('&');
                rest = &tail[1..];
            }
        }
    }

    out.push_str(rest);
    out
}

fn append(podcast: &mut Podcast, item: Option<&mut ItemBuilder>, target: Capture, text: &str) {
    match (target, item) {
        (Capture::ChannelTitle, None) => podcast.title.push_str(text),
        (Capture::ChannelLink, None) => podcast.link.push_str(text),
        (Capture::Item(field), Some(builder)) => builder.push(field, text),
        _ => {}
    }
}

fn parse_enclosure(e: &BytesStart<'_>, reader: &Reader<&[u8]>) -> Option<Enclosure> {
    let mut url = None;
    let mut mime_type = None;
    let mut length = None;

    for attr_result in e.attributes() {
        let attr = match attr_result {
            Ok(attr) => attr,
            Err(e) => {
                tracing::warn!(error = %e, "Skipping malformed enclosure attribute");
                continue;
            }
        };
        let value = match attr.decode_and_unescape_value(reader.decoder()) {
            Ok(v) => v.trim().to_string(),
            Err(e) => {
                tracing::warn!(error = %e, "Skipping undecodable enclosure attribute");
                continue;
            }
        };
        match attr.key.as_ref() {
            b"url" => url = Some(value),
            b"type" if !value.is_empty() => mime_type = Some(value),
            b"length" => length = value.parse::<u64>().ok(),
            _ => {}
        }
    }

    url.filter(|u| !u.is_empty()).map(|url| Enclosure {
        url,
        mime_type,
        length,
    })
}

/// Formats an `<itunes:duration>` value for display.
///
/// Plain second counts become `M:SS` or `H:MM:SS`; anything else
/// (already `HH:MM:SS`, or free text) is passed through trimmed.
pub fn display_duration(raw: &str) -> String {
    let raw = raw.trim();
    match raw.parse::<u64>() {
        Ok(total) => {
            let hours = total / 3600;
            let minutes = (total % 3600) / 60;
            let seconds = total % 60;
            if hours > 0 {
                format!("{hours}:{minutes:02}:{seconds:02}")
            } else {
                format!("{minutes}:{seconds:02}")
            }
        }
        Err(_) => raw.to_string(),
    }
}

/// Uses the feed's own guid when present, otherwise a content hash that is
/// stable across re-fetches and re-orderings of the feed.
fn generate_guid(existing: Option<&str>, link: &str, title: &str, pub_date: &str) -> String {
    if let Some(guid) = existing {
        let trimmed = guid.trim();
        if !trimmed.is_empty() {
            return trimmed.to_string();
        }
    }

    let input = format!("{}|{}|{}", link, title, pub_date);
    let hash = Sha256::digest(input.as_bytes());
    format!("{:x}", hash)
}
