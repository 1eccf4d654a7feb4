//! Ingest command - load listings from a JSON file

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::time::Instant;

use anyhow::{Context, Result};
use chrono::Utc;
use colored::Colorize;
use serde::Deserialize;
use uuid::Uuid;

use crate::core::listing::{generate_search_text, AttributeValue, Listing};
use crate::core::schema::validate_listing;
use crate::search::embedding::{self, Embedder};
use crate::store::ListingStore;

/// One entry of an ingestion file.
#[derive(Deserialize)]
struct IngestEntry {
    title: String,
    description: String,
    #[serde(default)]
    price: f64,
    location: Option<String>,
    /// Category slug.
    category: Option<String>,
    #[serde(default)]
    attributes: BTreeMap<String, AttributeValue>,
}

pub fn run(db_path: &Path, file: &Path, json: bool) -> Result<()> {
    let started = Instant::now();

    let raw = fs::read_to_string(file)
        .with_context(|| format!("failed to read {}", file.display()))?;
    let entries: Vec<IngestEntry> = serde_json::from_str(&raw)
        .with_context(|| format!("{} is not a valid listing file", file.display()))?;

    let store = ListingStore::open(db_path)?;
    let embedder = embedding::global();

    let mut ingested = 0usize;
    let mut skipped = 0usize;
    let mut without_embedding = 0usize;
    let mut problems: Vec<String> = Vec::new();

    for (index, entry) in entries.into_iter().enumerate() {
        let label = if entry.title.trim().is_empty() {
            format!("entry {}", index + 1)
        } else {
            entry.title.clone()
        };

        let category = match &entry.category {
            Some(slug) => match store.category_by_slug(slug)? {
                Some(category) => Some(category),
                None => {
                    skipped += 1;
                    problems.push(format!("{label}: unknown category slug '{slug}'"));
                    continue;
                }
            },
            None => None,
        };

        let schema = category
            .as_ref()
            .map(|c| c.attribute_schema.as_slice())
            .unwrap_or_default();
        let violations = validate_listing(
            &entry.title,
            &entry.description,
            entry.price,
            &entry.attributes,
            schema,
        );
        if !violations.is_empty() {
            skipped += 1;
            for violation in violations {
                problems.push(format!("{label}: {violation}"));
            }
            continue;
        }

        let search_text = generate_search_text(
            &entry.title,
            &entry.description,
            entry.location.as_deref(),
            &entry.attributes,
        );

        // Best effort: a listing without an embedding still searches
        // lexically, it just never enters semantic ranking.
        let listing_embedding = match embedder.embed(&search_text) {
            Ok(e) => Some(e),
            Err(e) => {
                tracing::warn!("embedding failed for '{label}', storing without one: {e}");
                without_embedding += 1;
                None
            }
        };

        let now = Utc::now();
        store.upsert_listing(&Listing {
            id: Uuid::new_v4().to_string(),
            title: entry.title,
            description: entry.description,
            price: entry.price,
            location: entry.location,
            category_id: category.as_ref().map(|c| c.id.clone()),
            category,
            attributes: entry.attributes,
            embedding: listing_embedding,
            search_text,
            created_at: now,
            updated_at: now,
        })?;
        ingested += 1;
    }

    let duration_ms = started.elapsed().as_millis() as u64;

    if json {
        println!(
            "{}",
            serde_json::json!({
                "ingested": ingested,
                "skipped": skipped,
                "without_embedding": without_embedding,
                "problems": problems,
                "duration_ms": duration_ms,
            })
        );
    } else {
        println!(
            "{} Ingested {} listings in {:.2}s",
            "✓".green().bold(),
            ingested.to_string().cyan(),
            duration_ms as f64 / 1000.0
        );
        if without_embedding > 0 {
            println!(
                "  {} {} stored without an embedding",
                "!".yellow(),
                without_embedding
            );
        }
        if skipped > 0 {
            println!("  {} {} entries skipped", "✗".red(), skipped);
            for problem in &problems {
                println!("     {}", problem.dimmed());
            }
        }
    }

    Ok(())
}
