//! Audible catalog API client
//!
//! Uses the public catalog endpoint, no authentication required.
//! Base URL: https://api.audible.com/1.0

use std::collections::HashMap;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use tracing::{debug, info};

use crate::services::identifier::Identification;

use super::{MetadataProvider, MAX_CANDIDATES};

const RESPONSE_GROUPS: &str =
    "media,product_attrs,product_desc,product_extended_attrs,series,contributors";

pub struct AudibleProvider {
    client: Client,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    products: Vec<Product>,
}

#[derive(Debug, Deserialize)]
struct ProductResponse {
    product: Product,
}

#[derive(Debug, Deserialize)]
struct Product {
    title: Option<String>,
    asin: Option<String>,
    #[serde(default)]
    authors: Vec<Contributor>,
    #[serde(default)]
    narrators: Vec<Contributor>,
    issue_date: Option<String>,
    release_date: Option<String>,
    publisher_summary: Option<String>,
    publisher_name: Option<String>,
    /// Keyed by pixel size, e.g. {"500": url, "1024": url}
    #[serde(default)]
    product_images: HashMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct Contributor {
    name: Option<String>,
}

impl AudibleProvider {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            base_url: "https://api.audible.com/1.0".to_string(),
        }
    }
}

/// The catalog endpoint has no author parameter, so the author rides
/// along in the title search.
fn build_title_query(query: &str, author: Option<&str>) -> String {
    match author {
        Some(author) if !author.is_empty() => format!("{} {}", query, author),
        _ => query.to_string(),
    }
}

fn product_to_identification(product: Product) -> Identification {
    let mut result = Identification::from_source("audible");
    result.title = product.title;
    result.asin = product.asin;
    result.author = product.authors.into_iter().find_map(|c| c.name);
    result.narrator = product.narrators.into_iter().find_map(|c| c.name);
    result.year = product
        .issue_date
        .or(product.release_date)
        .and_then(|d| d.get(..4).map(String::from));
    result.description = product.publisher_summary;
    result.publisher = product.publisher_name;
    // Largest image wins
    result.cover_url = product
        .product_images
        .into_iter()
        .filter_map(|(size, url)| size.parse::<u32>().ok().map(|s| (s, url)))
        .max_by_key(|(size, _)| *size)
        .map(|(_, url)| url);
    result
}

#[async_trait]
impl MetadataProvider for AudibleProvider {
    fn name(&self) -> &'static str {
        "audible"
    }

    async fn search(&self, query: &str, author: Option<&str>) -> Result<Vec<Identification>> {
        info!(query = %query, "Searching Audible catalog");

        let title_query = build_title_query(query, author);
        let url = format!("{}/catalog/products", self.base_url);
        let response = self
            .client
            .get(&url)
            .query(&[
                ("title", title_query.as_str()),
                ("num_results", "5"),
                ("products_sort_by", "Relevance"),
                ("response_groups", RESPONSE_GROUPS),
            ])
            .send()
            .await
            .context("Failed to search Audible")?;

        if !response.status().is_success() {
            anyhow::bail!("Audible search failed with status: {}", response.status());
        }

        let body: SearchResponse = response
            .json()
            .await
            .context("Failed to parse Audible search results")?;

        let results: Vec<Identification> = body
            .products
            .into_iter()
            .take(MAX_CANDIDATES)
            .map(product_to_identification)
            .collect();

        debug!(count = results.len(), "Audible search returned results");
        Ok(results)
    }

    async fn get_by_id(&self, asin: &str) -> Result<Option<Identification>> {
        info!(asin = %asin, "Looking up Audible product");

        let url = format!("{}/catalog/products/{}", self.base_url, asin);
        let response = self
            .client
            .get(&url)
            .query(&[("response_groups", RESPONSE_GROUPS)])
            .send()
            .await
            .context("Failed to look up Audible product")?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            anyhow::bail!("Audible lookup failed with status: {}", response.status());
        }

        let body: ProductResponse = response
            .json()
            .await
            .context("Failed to parse Audible product")?;

        Ok(Some(product_to_identification(body.product)))
    }
}
