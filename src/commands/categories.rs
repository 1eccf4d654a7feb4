//! Categories command - list or seed marketplace categories

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::Utc;
use colored::Colorize;
use serde::Deserialize;
use uuid::Uuid;

use crate::core::listing::{AttributeKind, AttributeSpec, Category};
use crate::store::ListingStore;

/// One entry of a category seed file.
#[derive(Deserialize)]
struct SeedCategory {
    name: String,
    slug: String,
    #[serde(default, alias = "attributeSchema")]
    attribute_schema: Vec<AttributeSpec>,
}

pub fn run(db_path: &Path, seed: Option<&Path>, json: bool) -> Result<()> {
    let store = ListingStore::open(db_path)?;

    if let Some(seed) = seed {
        let raw = fs::read_to_string(seed)
            .with_context(|| format!("failed to read {}", seed.display()))?;
        let entries: Vec<SeedCategory> = serde_json::from_str(&raw)
            .with_context(|| format!("{} is not a valid category file", seed.display()))?;

        let mut seeded = 0usize;
        for entry in entries {
            let now = Utc::now();
            // Reseeding keeps ids stable so listings stay attached.
            let (id, created_at) = match store.category_by_slug(&entry.slug)? {
                Some(existing) => (existing.id, existing.created_at),
                None => (Uuid::new_v4().to_string(), now),
            };
            store.upsert_category(&Category {
                id,
                name: entry.name,
                slug: entry.slug,
                attribute_schema: entry.attribute_schema,
                created_at,
                updated_at: now,
            })?;
            seeded += 1;
        }

        if !json {
            println!(
                "{} Seeded {} categories",
                "✓".green().bold(),
                seeded.to_string().cyan()
            );
            println!();
        }
    }

    let categories = store.all_categories()?;

    if json {
        println!("{}", serde_json::to_string_pretty(&categories)?);
        return Ok(());
    }

    if categories.is_empty() {
        println!("{} No categories", "→".dimmed());
        return Ok(());
    }

    for category in &categories {
        println!("{} ({})", category.name.cyan(), category.slug);
        for spec in &category.attribute_schema {
            let kind = match spec.kind {
                AttributeKind::String => "string",
                AttributeKind::Number => "number",
                AttributeKind::Boolean => "boolean",
            };
            let required = if spec.required { " required" } else { "" };
            println!("   {} {}{}", spec.name, kind.dimmed(), required.yellow());
        }
    }

    Ok(())
}
