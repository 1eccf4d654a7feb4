mod commands;
mod core;
mod search;
mod store;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "bazaar")]
#[command(about = "Marketplace listing search with hybrid semantic + full-text ranking", long_about = None)]
#[command(version)]
struct Cli {
    #[arg(
        long,
        global = true,
        default_value = "bazaar.db",
        help = "Path to the listing database"
    )]
    db: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Ranked listing search with facets and pagination
    Search {
        query: String,
        #[arg(long, help = "Category slug (\"all\" for unscoped)")]
        category: Option<String>,
        #[arg(
            long = "filter",
            value_name = "KEY=VALUE",
            help = "Attribute filter, repeatable"
        )]
        filters: Vec<String>,
        #[arg(long, default_value_t = 1, help = "Result page")]
        page: usize,
        #[arg(long, default_value_t = 6, help = "Results per page")]
        limit: usize,
        #[arg(
            long,
            default_value = "hybrid",
            help = "Search method: hybrid, semantic or text"
        )]
        method: String,
        #[arg(long, help = "JSON output")]
        json: bool,
    },
    /// Show filter facets for a query/category scope
    Facets {
        #[arg(long, help = "Category slug")]
        category: Option<String>,
        #[arg(long, help = "Scope facets to a query")]
        query: Option<String>,
        #[arg(
            long = "filter",
            value_name = "KEY=VALUE",
            help = "Active attribute filter, repeatable"
        )]
        filters: Vec<String>,
        #[arg(long, help = "JSON output")]
        json: bool,
    },
    /// Ingest listings from a JSON file
    Ingest {
        file: PathBuf,
        #[arg(long, help = "JSON output")]
        json: bool,
    },
    /// List categories, optionally seeding them first
    Categories {
        #[arg(long, help = "Seed categories from a JSON file")]
        seed: Option<PathBuf>,
        #[arg(long, help = "JSON output")]
        json: bool,
    },
    /// Listing, embedding and category counts
    Status {
        #[arg(long, help = "JSON output")]
        json: bool,
    },
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Search {
            query,
            category,
            filters,
            page,
            limit,
            method,
            json,
        } => commands::search::run(
            &cli.db,
            &query,
            category.as_deref(),
            &filters,
            page,
            limit,
            &method,
            json,
        ),
        Commands::Facets {
            category,
            query,
            filters,
            json,
        } => commands::facets::run(
            &cli.db,
            category.as_deref(),
            query.as_deref(),
            &filters,
            json,
        ),
        Commands::Ingest { file, json } => commands::ingest::run(&cli.db, &file, json),
        Commands::Categories { seed, json } => {
            commands::categories::run(&cli.db, seed.as_deref(), json)
        }
        Commands::Status { json } => commands::status::run(&cli.db, json),
    }
}
