//! Audnexus book lookup client
//!
//! Lookup-only aggregation layer over Audible data, keyed by ASIN.
//! Search is not offered so this provider never participates in fuzzy
//! scoring, only in direct ASIN lookups.

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use tracing::info;

use crate::services::identifier::Identification;

use super::MetadataProvider;

pub struct AudnexusProvider {
    client: Client,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct Book {
    title: Option<String>,
    asin: Option<String>,
    #[serde(default)]
    authors: Vec<Person>,
    #[serde(default)]
    narrators: Vec<Person>,
    #[serde(rename = "releaseDate")]
    release_date: Option<String>,
    summary: Option<String>,
    image: Option<String>,
    publisher: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Person {
    name: Option<String>,
}

impl AudnexusProvider {
    pub fn new(client: Client, base_url: String) -> Self {
        Self { client, base_url }
    }
}

fn book_to_identification(book: Book) -> Identification {
    let mut result = Identification::from_source("audnexus");
    result.title = book.title;
    result.asin = book.asin;
    result.author = book.authors.into_iter().find_map(|p| p.name);
    result.narrator = book.narrators.into_iter().find_map(|p| p.name);
    result.year = book.release_date.and_then(|d| d.get(..4).map(String::from));
    result.description = book.summary;
    result.cover_url = book.image;
    result.publisher = book.publisher;
    result
}

#[async_trait]
impl MetadataProvider for AudnexusProvider {
    fn name(&self) -> &'static str {
        "audnexus"
    }

    async fn search(&self, _query: &str, _author: Option<&str>) -> Result<Vec<Identification>> {
        Ok(Vec::new())
    }

    async fn get_by_id(&self, asin: &str) -> Result<Option<Identification>> {
        info!(asin = %asin, "Looking up Audnexus book");

        let url = format!("{}/books/{}", self.base_url, asin);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .context("Failed to look up Audnexus book")?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            anyhow::bail!("Audnexus lookup failed with status: {}", response.status());
        }

        let body: Book = response
            .json()
            .await
            .context("Failed to parse Audnexus book")?;

        Ok(Some(book_to_identification(body)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn book_maps_release_year_and_people() {
        let book: Book = serde_json::from_value(serde_json::json!({
            "title": "Project Hail Mary",
            "asin": "B08G9PRS1K",
            "authors": [{"name": "Andy Weir"}],
            "narrators": [{"name": "Ray Porter"}],
            "releaseDate": "2021-05-04T00:00:00.000Z",
            "summary": "A lone astronaut saves the world",
            "image": "http://x/cover.jpg",
            "publisher": "Audible Studios"
        }))
        .unwrap();

        let id = book_to_identification(book);
        assert_eq!(id.title.as_deref(), Some("Project Hail Mary"));
        assert_eq!(id.author.as_deref(), Some("Andy Weir"));
        assert_eq!(id.narrator.as_deref(), Some("Ray Porter"));
        assert_eq!(id.year.as_deref(), Some("2021"));
        assert_eq!(id.source, "audnexus");
    }
}
