//! Google Books volumes search client
//!
//! Works unauthenticated for search. Base URL:
//! https://www.googleapis.com/books/v1

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, info};

use crate::services::identifier::Identification;

use super::{MetadataProvider, MAX_CANDIDATES};

pub struct GoogleBooksProvider {
    client: Client,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct VolumesResponse {
    #[serde(default)]
    items: Vec<Volume>,
}

#[derive(Debug, Deserialize)]
struct Volume {
    id: Option<String>,
    #[serde(rename = "volumeInfo")]
    volume_info: VolumeInfo,
}

#[derive(Debug, Default, Deserialize)]
struct VolumeInfo {
    title: Option<String>,
    #[serde(default)]
    authors: Vec<String>,
    #[serde(rename = "publishedDate")]
    published_date: Option<String>,
    description: Option<String>,
    publisher: Option<String>,
    #[serde(rename = "industryIdentifiers", default)]
    industry_identifiers: Vec<IndustryIdentifier>,
    #[serde(rename = "imageLinks")]
    image_links: Option<ImageLinks>,
}

#[derive(Debug, Deserialize)]
struct IndustryIdentifier {
    #[serde(rename = "type")]
    id_type: String,
    identifier: String,
}

#[derive(Debug, Deserialize)]
struct ImageLinks {
    #[serde(rename = "extraLarge")]
    extra_large: Option<String>,
    large: Option<String>,
    medium: Option<String>,
    thumbnail: Option<String>,
}

impl ImageLinks {
    /// Largest available rendition
    fn best(self) -> Option<String> {
        self.extra_large
            .or(self.large)
            .or(self.medium)
            .or(self.thumbnail)
    }
}

impl GoogleBooksProvider {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            base_url: "https://www.googleapis.com/books/v1".to_string(),
        }
    }
}

fn volume_to_identification(volume: Volume) -> Identification {
    let info = volume.volume_info;
    let mut result = Identification::from_source("googlebooks");
    result.title = info.title;
    result.author = info.authors.into_iter().next();
    // publishedDate is "YYYY" or "YYYY-MM-DD"; keep the year only
    result.year = info
        .published_date
        .and_then(|d| d.get(..4).map(String::from));
    result.description = info.description;
    result.publisher = info.publisher;
    // ISBN-13 preferred over ISBN-10
    result.isbn = info
        .industry_identifiers
        .iter()
        .find(|i| i.id_type == "ISBN_13")
        .or_else(|| {
            info.industry_identifiers
                .iter()
                .find(|i| i.id_type == "ISBN_10")
        })
        .map(|i| i.identifier.clone());
    result.cover_url = info.image_links.and_then(ImageLinks::best);
    result.external_id = volume.id;
    result
}

#[async_trait]
impl MetadataProvider for GoogleBooksProvider {
    fn name(&self) -> &'static str {
        "googlebooks"
    }

    async fn search(&self, query: &str, author: Option<&str>) -> Result<Vec<Identification>> {
        info!(query = %query, "Searching Google Books");

        let q = match author {
            Some(author) => format!("{query}+inauthor:{author}"),
            None => query.to_string(),
        };

        let url = format!("{}/volumes", self.base_url);
        let response = self
            .client
            .get(&url)
            .query(&[("q", q.as_str()), ("maxResults", "5")])
            .send()
            .await
            .context("Failed to search Google Books")?;

        if !response.status().is_success() {
            anyhow::bail!(
                "Google Books search failed with status: {}",
                response.status()
            );
        }

        let body: VolumesResponse = response
            .json()
            .await
            .context("Failed to parse Google Books search results")?;

        let results: Vec<Identification> = body
            .items
            .into_iter()
            .take(MAX_CANDIDATES)
            .map(volume_to_identification)
            .collect();

        debug!(count = results.len(), "Google Books search returned results");
        Ok(results)
    }
}
