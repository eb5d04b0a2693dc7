//! Open Library search client
//!
//! Free API, no authentication. Base URL: https://openlibrary.org

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, info};

use crate::services::identifier::Identification;

use super::{MetadataProvider, MAX_CANDIDATES};

pub struct OpenLibraryProvider {
    client: Client,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    docs: Vec<Doc>,
}

#[derive(Debug, Deserialize)]
struct Doc {
    title: Option<String>,
    #[serde(default)]
    author_name: Vec<String>,
    first_publish_year: Option<u32>,
    #[serde(default)]
    isbn: Vec<String>,
    /// Work key, e.g. "/works/OL45804W"
    key: Option<String>,
    #[serde(default)]
    id_amazon: Vec<String>,
}

impl OpenLibraryProvider {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            base_url: "https://openlibrary.org".to_string(),
        }
    }
}

fn doc_to_identification(doc: Doc) -> Identification {
    let mut result = Identification::from_source("openlibrary");
    result.title = doc.title;
    result.author = doc.author_name.into_iter().next();
    result.year = doc.first_publish_year.map(|y| y.to_string());
    result.isbn = doc.isbn.into_iter().next();
    result.external_id = doc.key;
    result.asin = doc.id_amazon.into_iter().next();
    result
}

#[async_trait]
impl MetadataProvider for OpenLibraryProvider {
    fn name(&self) -> &'static str {
        "openlibrary"
    }

    async fn search(&self, query: &str, author: Option<&str>) -> Result<Vec<Identification>> {
        info!(query = %query, "Searching Open Library");

        let url = format!("{}/search.json", self.base_url);
        let mut params = vec![("q", query.to_string())];
        if let Some(author) = author {
            params.push(("author", author.to_string()));
        }

        let response = self
            .client
            .get(&url)
            .query(&params)
            .send()
            .await
            .context("Failed to search Open Library")?;

        if !response.status().is_success() {
            anyhow::bail!(
                "Open Library search failed with status: {}",
                response.status()
            );
        }

        let body: SearchResponse = response
            .json()
            .await
            .context("Failed to parse Open Library search results")?;

        let results: Vec<Identification> = body
            .docs
            .into_iter()
            .take(MAX_CANDIDATES)
            .map(doc_to_identification)
            .collect();

        debug!(count = results.len(), "Open Library search returned results");
        Ok(results)
    }
}
