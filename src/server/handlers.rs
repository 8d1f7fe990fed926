use axum::extract::{Path, Query, State};
use axum::Json;
use chrono::{DateTime, Utc};
use maud::Markup;
use serde::{Deserialize, Serialize};

use super::error::ApiError;
use super::AppState;
use crate::catalog::{CatalogEntry, SearchQuery, Section};
use crate::feed::{Episode, FeedSnapshot};
use crate::render;

#[derive(Debug, Default, Deserialize)]
pub struct SearchParams {
    #[serde(default)]
    pub q: String,
    pub tag: Option<String>,
}

impl SearchParams {
    fn to_query(&self, section: Section) -> SearchQuery {
        SearchQuery {
            section: Some(section),
            text: self.q.clone(),
            tag: self.tag.clone().filter(|t| !t.trim().is_empty()),
        }
    }
}

/// `Episode` fields keep the feed's camelCase names (`pubDate`); the
/// envelope uses snake_case like the error body.
#[derive(Debug, Serialize)]
pub struct EpisodesResponse {
    pub title: String,
    pub link: String,
    pub fetched_at: DateTime<Utc>,
    pub stale: bool,
    pub episodes: Vec<Episode>,
}

impl From<&FeedSnapshot> for EpisodesResponse {
    fn from(snapshot: &FeedSnapshot) -> Self {
        Self {
            title: snapshot.podcast.title.clone(),
            link: snapshot.podcast.link.clone(),
            fetched_at: snapshot.fetched_at,
            stale: snapshot.stale,
            episodes: snapshot.podcast.episodes.clone(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct CatalogResponse {
    pub section: Section,
    pub query: String,
    pub count: usize,
    pub results: Vec<CatalogEntry>,
}

pub async fn healthz() -> &'static str {
    "ok"
}

pub async fn episodes(State(state): State<AppState>) -> Result<Json<EpisodesResponse>, ApiError> {
    let snapshot = state
        .feed
        .get()
        .await
        .map_err(|e| ApiError::FeedUnavailable {
            message: e.to_string(),
            fallback_url: state.podcast_page_url.to_string(),
        })?;
    Ok(Json(EpisodesResponse::from(&snapshot)))
}

/// Always 200: a failed feed renders the fallback section, not an error page.
pub async fn podcast_page(State(state): State<AppState>) -> Markup {
    let body = match state.feed.get().await {
        Ok(snapshot) => render::render_episode_list(&snapshot),
        Err(e) => {
            tracing::debug!(error = %e, "Rendering podcast fallback");
            render::render_feed_error(&state.podcast_page_url)
        }
    };
    render::page("Podcast", body)
}

pub async fn catalog_search(
    State(state): State<AppState>,
    Path(section): Path<String>,
    Query(params): Query<SearchParams>,
) -> Result<Json<CatalogResponse>, ApiError> {
    let section: Section = section.parse()?;
    let results = state.catalog.search(&params.to_query(section))?;

    Ok(Json(CatalogResponse {
        section,
        query: params.q.trim().to_string(),
        count: results.len(),
        results: results.into_iter().cloned().collect(),
    }))
}

pub async fn resources_page(
    State(state): State<AppState>,
    Query(params): Query<SearchParams>,
) -> Result<Markup, ApiError> {
    catalog_page(&state, Section::Resources, &params)
}

pub async fn tools_page(
    State(state): State<AppState>,
    Query(params): Query<SearchParams>,
) -> Result<Markup, ApiError> {
    catalog_page(&state, Section::Tools, &params)
}

fn catalog_page(
    state: &AppState,
    section: Section,
    params: &SearchParams,
) -> Result<Markup, ApiError> {
    let query = params.to_query(section);
    let results = state.catalog.search(&query)?;
    let tags = state.catalog.tags(section);

    let body = render::render_catalog(
        section,
        params.q.trim(),
        query.tag.as_deref(),
        &tags,
        &results,
    );
    Ok(render::page(section.title(), body))
}
