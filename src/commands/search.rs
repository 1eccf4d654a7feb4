//! Search command - ranked listing search with facets

use std::path::Path;

use anyhow::{anyhow, Result};
use colored::Colorize;

use crate::core::listing::SearchFilters;
use crate::search::embedding::{HIGH_SIMILARITY_THRESHOLD, MEDIUM_SIMILARITY_THRESHOLD};
use crate::search::service::{SearchMethod, SearchRequest, SearchResponse, SearchService};
use crate::store::ListingStore;

pub fn run(
    db_path: &Path,
    query: &str,
    category: Option<&str>,
    filters: &[String],
    page: usize,
    limit: usize,
    method: &str,
    json: bool,
) -> Result<()> {
    let method: SearchMethod = method.parse().map_err(|e: String| anyhow!(e))?;
    let filters = parse_filters(filters)?;

    let store = ListingStore::open(db_path)?;
    let service = SearchService::new(&store);
    let response = service.search(&SearchRequest {
        query: query.to_string(),
        category: category.map(str::to_string),
        filters,
        page,
        limit,
        method,
    })?;

    if json {
        println!("{}", serde_json::to_string_pretty(&response)?);
        return Ok(());
    }

    print_results(&response, query);
    Ok(())
}

/// Parse repeatable `key=value` filter arguments into the OR-within,
/// AND-across filter map.
pub(crate) fn parse_filters(raw: &[String]) -> Result<SearchFilters> {
    let mut filters = SearchFilters::new();
    for entry in raw {
        let (key, value) = entry
            .split_once('=')
            .ok_or_else(|| anyhow!("invalid filter '{entry}', expected key=value"))?;
        filters
            .entry(key.to_string())
            .or_default()
            .push(value.to_string());
    }
    Ok(filters)
}

fn print_results(response: &SearchResponse, query: &str) {
    if response.results.is_empty() {
        println!("{} No results found for: {}", "→".dimmed(), query.cyan());
        return;
    }

    println!(
        "{} {} results for: {} ({} search, {}ms)",
        "→".dimmed(),
        response.pagination.total,
        query.cyan(),
        response.method.as_str(),
        response.processing_time_ms
    );
    println!();

    let offset = (response.pagination.page - 1) * response.pagination.limit;
    for (i, hit) in response.results.iter().enumerate() {
        let score = match hit.similarity {
            Some(s) => {
                let score_str = format!("{s:.2}");
                if s >= HIGH_SIMILARITY_THRESHOLD {
                    score_str.green()
                } else if s >= MEDIUM_SIMILARITY_THRESHOLD {
                    score_str.yellow()
                } else {
                    score_str.dimmed()
                }
            }
            None => "----".dimmed(),
        };

        println!(
            "{}. [{}] {}",
            (offset + i + 1).to_string().bold(),
            score,
            hit.listing.title.cyan()
        );

        let mut details = vec![format!("${:.2}", hit.listing.price)];
        if let Some(ref location) = hit.listing.location {
            details.push(location.clone());
        }
        if let Some(ref category) = hit.listing.category {
            details.push(category.name.clone());
        }
        println!("   {}", details.join(" | ").dimmed());
        println!();
    }

    println!(
        "{} Page {} of {}",
        "→".dimmed(),
        response.pagination.page,
        response.pagination.total_pages
    );
}
