//! Status command - store counts

use std::path::Path;

use anyhow::Result;
use colored::Colorize;

use crate::store::ListingStore;

pub fn run(db_path: &Path, json: bool) -> Result<()> {
    let store = ListingStore::open(db_path)?;
    let stats = store.stats()?;

    if json {
        println!(
            "{}",
            serde_json::json!({
                "listings": stats.listing_count,
                "embedded": stats.embedded_count,
                "categories": stats.category_count,
            })
        );
    } else {
        println!("{}", "Store Status".bold());
        println!();
        println!(
            "  {} {} listings",
            "→".dimmed(),
            stats.listing_count.to_string().cyan()
        );
        println!(
            "  {} {} with embeddings",
            "→".dimmed(),
            stats.embedded_count.to_string().cyan()
        );
        println!(
            "  {} {} categories",
            "→".dimmed(),
            stats.category_count.to_string().cyan()
        );
    }

    Ok(())
}
