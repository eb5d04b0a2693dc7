//! Review queue endpoints

use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::services::identifier::Identification;
use crate::services::queue::QueueItem;
use crate::AppState;

use super::ApiError;

#[derive(Serialize)]
struct QueueListResponse {
    items: Vec<QueueItem>,
}

#[derive(Deserialize)]
struct SearchRequest {
    /// Override the search title (defaults to the item's current title)
    title: Option<String>,
    /// Override the search author
    author: Option<String>,
    /// Direct lookup instead of a search: provider name plus external id
    provider: Option<String>,
    id: Option<String>,
}

#[derive(Serialize)]
struct SearchResponse {
    candidates: Vec<Identification>,
}

/// Fields an operator may correct. Absent fields keep their value.
#[derive(Deserialize)]
struct UpdateRequest {
    title: Option<String>,
    author: Option<String>,
    year: Option<String>,
    series: Option<String>,
    series_part: Option<String>,
    narrator: Option<String>,
    asin: Option<String>,
    isbn: Option<String>,
    description: Option<String>,
    cover_url: Option<String>,
}

#[derive(Serialize)]
struct DestinationResponse {
    destination: String,
}

async fn list(State(state): State<AppState>) -> Json<QueueListResponse> {
    Json(QueueListResponse {
        items: state.pipeline.queue().list(),
    })
}

fn find_item(state: &AppState, id: &str) -> Result<QueueItem, ApiError> {
    state.pipeline.queue().get(id).ok_or(ApiError::NotFound)
}

async fn get_item(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<QueueItem>, ApiError> {
    Ok(Json(find_item(&state, &id)?))
}

/// Re-query the metadata providers for an item, or resolve a known
/// external id directly.
async fn search(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<SearchRequest>,
) -> Result<Json<SearchResponse>, ApiError> {
    let item = find_item(&state, &id)?;

    let candidates = match (request.provider, request.id) {
        (Some(provider), Some(external_id)) => state
            .pipeline
            .aggregator()
            .lookup(&provider, &external_id)
            .await?
            .into_iter()
            .collect(),
        _ => {
            state
                .pipeline
                .research_item(&item, request.title, request.author)
                .await
        }
    };

    Ok(Json(SearchResponse { candidates }))
}

async fn update(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<UpdateRequest>,
) -> Result<Json<QueueItem>, ApiError> {
    let item = find_item(&state, &id)?;

    let mut metadata = item.metadata.clone();
    let patch = |target: &mut Option<String>, value: Option<String>| {
        if let Some(v) = value {
            *target = if v.is_empty() { None } else { Some(v) };
        }
    };
    patch(&mut metadata.title, request.title);
    patch(&mut metadata.author, request.author);
    patch(&mut metadata.year, request.year);
    patch(&mut metadata.series, request.series);
    patch(&mut metadata.series_part, request.series_part);
    patch(&mut metadata.narrator, request.narrator);
    patch(&mut metadata.asin, request.asin);
    patch(&mut metadata.isbn, request.isbn);
    patch(&mut metadata.description, request.description);
    patch(&mut metadata.cover_url, request.cover_url);

    state.pipeline.update_item_metadata(&item, metadata)?;
    Ok(Json(find_item(&state, &id)?))
}

/// Where the item would land in the library with its current metadata
async fn preview(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<DestinationResponse>, ApiError> {
    let item = find_item(&state, &id)?;
    let dest = state
        .pipeline
        .organizer()
        .destination_for(&item.metadata)
        .map_err(|e| ApiError::BadRequest(e.to_string()))?;
    Ok(Json(DestinationResponse {
        destination: dest.display().to_string(),
    }))
}

async fn process(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<DestinationResponse>, ApiError> {
    let item = find_item(&state, &id)?;
    info!(id = %id, path = %item.dirpath.display(), "Operator approved queue item");
    let dest = state.pipeline.organize_item(item).await?;
    Ok(Json(DestinationResponse {
        destination: dest.display().to_string(),
    }))
}

async fn reject(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<DestinationResponse>, ApiError> {
    let item = find_item(&state, &id)?;
    info!(id = %id, path = %item.dirpath.display(), "Operator rejected queue item");
    let dest = state.pipeline.reject_item(item).await?;
    Ok(Json(DestinationResponse {
        destination: dest.display().to_string(),
    }))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list))
        .route("/{id}", get(get_item))
        .route("/{id}/search", post(search))
        .route("/{id}/update", post(update))
        .route("/{id}/preview", get(preview))
        .route("/{id}/process", post(process))
        .route("/{id}/reject", post(reject))
}
