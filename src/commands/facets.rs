//! Facets command - attribute histograms for a search scope

use std::path::Path;

use anyhow::Result;
use colored::Colorize;

use crate::search::facets::FacetEngine;
use crate::store::ListingStore;

pub fn run(
    db_path: &Path,
    category: Option<&str>,
    query: Option<&str>,
    filters: &[String],
    json: bool,
) -> Result<()> {
    let filters = super::search::parse_filters(filters)?;
    let store = ListingStore::open(db_path)?;

    let category_id = match category {
        None | Some("") | Some("all") => None,
        Some(slug) => store.category_by_slug(slug)?.map(|c| c.id),
    };

    let engine = FacetEngine::new(&store);
    let facets = engine.generate_facets(category_id.as_deref(), &filters, query);

    if json {
        println!("{}", serde_json::to_string_pretty(&facets)?);
        return Ok(());
    }

    if facets.is_empty() {
        println!("{} No facets for this scope", "→".dimmed());
        return Ok(());
    }

    for facet in &facets {
        println!("{}", facet.name.bold());
        for value in &facet.values {
            println!("   {:<24} {}", value.value, value.count.to_string().dimmed());
        }
        println!();
    }

    Ok(())
}
