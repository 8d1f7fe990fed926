//! Server-side HTML for the podcast and catalog pages.
//!
//! Pages are built with `maud`, which escapes every interpolated value.
//! Episode descriptions are first flattened to text with
//! [`html_to_paragraphs`] so publisher markup never reaches the page.

use chrono::{DateTime, Utc};
use maud::{html, Markup, DOCTYPE};

use crate::catalog::{CatalogEntry, Section};
use crate::feed::{Episode, FeedSnapshot};
use crate::util::html_to_paragraphs;

/// Shown when the feed cannot be loaded and nothing is cached.
pub const FEED_ERROR_MESSAGE: &str = "We couldn't load the latest episodes right now.";

/// Shown when a catalog search matches nothing.
pub const NO_RESULTS_MESSAGE: &str = "No results found";

/// Wraps a fragment in a minimal standalone document.
pub fn page(title: &str, body: Markup) -> Markup {
    html! {
        (DOCTYPE)
        html lang="en" {
            head {
                meta charset="utf-8";
                meta name="viewport" content="width=device-width, initial-scale=1";
                title { (title) }
            }
            body {
                main { (body) }
            }
        }
    }
}

/// Renders the podcast header and one `<article>` per episode, in feed order.
pub fn render_episode_list(snapshot: &FeedSnapshot) -> Markup {
    let podcast = &snapshot.podcast;

    html! {
        section.podcast {
            @if !podcast.title.is_empty() {
                h1 { (podcast.title) }
            }
            @if snapshot.stale {
                p.stale {
                    "Showing episodes saved "
                    (format_timestamp(snapshot.fetched_at.timestamp()).unwrap_or_default())
                    "."
                }
            }
            @if podcast.episodes.is_empty() {
                p.empty { "No episodes published yet." }
            }
            ol.episodes {
                @for episode in &podcast.episodes {
                    li { (render_episode(episode)) }
                }
            }
        }
    }
}

fn render_episode(episode: &Episode) -> Markup {
    let date = episode
        .published
        .and_then(format_timestamp)
        .unwrap_or_else(|| episode.pub_date.clone());
    let has_date = !date.is_empty();

    html! {
        article class="episode" id=(format!("episode-{}", episode.guid)) {
            h2 {
                @if episode.link.is_empty() {
                    (episode.title)
                } @else {
                    a href=(episode.link) rel="noopener" { (episode.title) }
                }
            }
            @if has_date || episode.duration.is_some() {
                p.meta {
                    @if has_date {
                        time { (date) }
                    }
                    @if let Some(duration) = &episode.duration {
                        @if has_date { " · " }
                        span.duration { (duration) }
                    }
                }
            }
            @for paragraph in html_to_paragraphs(&episode.description) {
                p { (paragraph) }
            }
            @if let Some(enclosure) = &episode.enclosure {
                audio controls preload="none" {
                    source src=(enclosure.url) type=[enclosure.mime_type.as_deref()];
                }
            }
        }
    }
}

/// The fallback shown instead of the episode list when the feed is unavailable.
pub fn render_feed_error(fallback_url: &str) -> Markup {
    html! {
        section class="podcast podcast-error" {
            p { (FEED_ERROR_MESSAGE) }
            p {
                a href=(fallback_url) rel="noopener" { "Listen on our podcast page" }
            }
        }
    }
}

/// Renders a search form, optional tag chips, and the matching entries.
pub fn render_catalog(
    section: Section,
    query: &str,
    active_tag: Option<&str>,
    tags: &[&str],
    results: &[&CatalogEntry],
) -> Markup {
    let path = format!("/{}", section.as_str());

    html! {
        section class=(format!("catalog catalog-{}", section.as_str())) {
            h1 { (section.title()) }
            form method="get" action=(path) role="search" {
                input type="search" name="q" value=(query)
                    placeholder=(format!("Search {}", section.as_str()));
                button type="submit" { "Search" }
            }
            @if !tags.is_empty() {
                ul.tags {
                    @for tag in tags {
                        @let active = active_tag.is_some_and(|t| t.to_lowercase() == tag.to_lowercase());
                        li {
                            a class=[active.then_some("active")]
                                href=(format!("{path}?tag={}", encode_query_value(tag))) {
                                (tag)
                            }
                        }
                    }
                }
            }
            @if results.is_empty() {
                p.no-results { (NO_RESULTS_MESSAGE) }
            } @else {
                ul.results {
                    @for entry in results {
                        (render_catalog_entry(entry))
                    }
                }
            }
        }
    }
}

fn render_catalog_entry(entry: &CatalogEntry) -> Markup {
    html! {
        li {
            h2 { a href=(entry.url) { (entry.title) } }
            @if let Some(category) = &entry.category {
                span.category { (category) }
            }
            p { (entry.description) }
            @for tag in &entry.tags {
                span.tag { (tag) }
            }
        }
    }
}

fn format_timestamp(ts: i64) -> Option<String> {
    DateTime::<Utc>::from_timestamp(ts, 0).map(|dt| dt.format("%b %-d, %Y").to_string())
}

fn encode_query_value(value: &str) -> String {
    url::form_urlencoded::byte_serialize(value.as_bytes()).collect()
}
