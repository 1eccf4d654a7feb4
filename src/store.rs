//! SQLite-backed listing repository.
//!
//! Listings and categories live in two tables. The derived search text is
//! mirrored into an FTS5 external-content index for lexical relevance, and
//! attribute bags are stored as JSON so filtering and facet aggregation run
//! as json_extract/json_each expressions directly in SQL. Embeddings are
//! stored as little-endian f32 BLOBs and scored in Rust.

use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use lazy_static::lazy_static;
use parking_lot::Mutex;
use regex::Regex;
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};

use crate::core::listing::{Category, Listing, SearchFilters};
use crate::search::embedding::EMBEDDING_DIM;

lazy_static! {
    static ref FTS_TOKEN_RE: Regex = Regex::new(r"[A-Za-z0-9]+").unwrap();
}

const LISTING_COLUMNS: &str = "l.id, l.title, l.description, l.price, l.location, l.category_id, \
     l.attributes, l.embedding, l.search_text, l.created_at, l.updated_at, \
     c.id, c.name, c.slug, c.attribute_schema, c.created_at, c.updated_at";

/// Listing repository over SQLite.
///
/// The connection sits behind a mutex so the store is `Sync`: the hybrid
/// search runs its semantic and lexical reads from separate threads.
pub struct ListingStore {
    conn: Mutex<Connection>,
}

/// Store-level counts for status reporting.
#[derive(Debug)]
pub struct StoreStats {
    pub listing_count: usize,
    pub embedded_count: usize,
    pub category_count: usize,
}

impl ListingStore {
    /// Open or create the store at `db_path`.
    pub fn open(db_path: &Path) -> Result<Self> {
        let conn = Connection::open(db_path)
            .with_context(|| format!("failed to open listing store at {}", db_path.display()))?;
        init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// In-memory store (for testing).
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    // ===== Categories =====

    pub fn upsert_category(&self, category: &Category) -> Result<()> {
        let schema_json = serde_json::to_string(&category.attribute_schema)?;
        self.conn
            .lock()
            .execute(
                "INSERT INTO categories (id, name, slug, attribute_schema, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 ON CONFLICT(id) DO UPDATE SET
                     name = excluded.name,
                     slug = excluded.slug,
                     attribute_schema = excluded.attribute_schema,
                     updated_at = excluded.updated_at",
                params![
                    category.id,
                    category.name,
                    category.slug,
                    schema_json,
                    category.created_at.timestamp(),
                    category.updated_at.timestamp(),
                ],
            )
            .context("failed to upsert category")?;
        Ok(())
    }

    pub fn category_by_id(&self, id: &str) -> Result<Option<Category>> {
        self.conn
            .lock()
            .query_row(
                "SELECT id, name, slug, attribute_schema, created_at, updated_at
                 FROM categories WHERE id = ?1",
                params![id],
                row_to_category,
            )
            .optional()
            .context("failed to look up category by id")
    }

    pub fn category_by_slug(&self, slug: &str) -> Result<Option<Category>> {
        self.conn
            .lock()
            .query_row(
                "SELECT id, name, slug, attribute_schema, created_at, updated_at
                 FROM categories WHERE slug = ?1",
                params![slug],
                row_to_category,
            )
            .optional()
            .context("failed to look up category by slug")
    }

    pub fn all_categories(&self) -> Result<Vec<Category>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT id, name, slug, attribute_schema, created_at, updated_at
             FROM categories ORDER BY name ASC",
        )?;
        let rows = stmt.query_map([], row_to_category)?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .context("failed to list categories")
    }

    // ===== Listings =====

    pub fn upsert_listing(&self, listing: &Listing) -> Result<()> {
        let attributes_json = serde_json::to_string(&listing.attributes)?;
        let embedding_blob = listing.embedding.as_deref().map(embedding_to_blob);
        self.conn
            .lock()
            .execute(
                "INSERT INTO listings (id, title, description, price, location, category_id,
                                       attributes, embedding, search_text, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
                 ON CONFLICT(id) DO UPDATE SET
                     title = excluded.title,
                     description = excluded.description,
                     price = excluded.price,
                     location = excluded.location,
                     category_id = excluded.category_id,
                     attributes = excluded.attributes,
                     embedding = excluded.embedding,
                     search_text = excluded.search_text,
                     updated_at = excluded.updated_at",
                params![
                    listing.id,
                    listing.title,
                    listing.description,
                    listing.price,
                    listing.location,
                    listing.category_id,
                    attributes_json,
                    embedding_blob,
                    listing.search_text,
                    listing.created_at.timestamp(),
                    listing.updated_at.timestamp(),
                ],
            )
            .context("failed to upsert listing")?;
        Ok(())
    }

    /// Listings in scope for semantic ranking: category and attribute
    /// filters, restricted to rows carrying an embedding of the standard
    /// dimension.
    pub fn semantic_candidates(
        &self,
        category_id: Option<&str>,
        filters: &SearchFilters,
    ) -> Result<Vec<Listing>> {
        let mut sql = format!(
            "SELECT {LISTING_COLUMNS}
             FROM listings l
             LEFT JOIN categories c ON c.id = l.category_id
             WHERE l.embedding IS NOT NULL AND length(l.embedding) = ?"
        );
        let mut args: Vec<Value> = vec![Value::Integer((EMBEDDING_DIM * 4) as i64)];
        push_category_clause(&mut sql, &mut args, category_id);
        push_attribute_filters(&mut sql, &mut args, filters);

        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(args), row_to_listing)?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .context("failed to load semantic candidates")
    }

    /// Full-text relevance query. With a scoreable query the rows carry a
    /// positive relevance score (higher is better), ordered by score then
    /// recency; otherwise an unscored scan ordered by recency alone.
    pub fn text_search(
        &self,
        query: &str,
        category_id: Option<&str>,
        filters: &SearchFilters,
        limit: usize,
    ) -> Result<Vec<(Listing, Option<f64>)>> {
        let Some(match_expr) = fts_match_query(query) else {
            let listings = self.unscored_scan(category_id, filters, limit)?;
            return Ok(listings.into_iter().map(|l| (l, None)).collect());
        };

        let mut sql = format!(
            "SELECT {LISTING_COLUMNS}, -bm25(listing_fts) AS relevance
             FROM listing_fts
             JOIN listings l ON l.rowid = listing_fts.rowid
             LEFT JOIN categories c ON c.id = l.category_id
             WHERE listing_fts MATCH ?"
        );
        let mut args: Vec<Value> = vec![Value::Text(match_expr)];
        push_category_clause(&mut sql, &mut args, category_id);
        push_attribute_filters(&mut sql, &mut args, filters);
        sql.push_str(" ORDER BY relevance DESC, l.created_at DESC LIMIT ?");
        args.push(Value::Integer(limit as i64));

        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(args), |row| {
            let listing = row_to_listing(row)?;
            let relevance: f64 = row.get(17)?;
            Ok((listing, Some(relevance)))
        })?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .context("full-text search failed")
    }

    fn unscored_scan(
        &self,
        category_id: Option<&str>,
        filters: &SearchFilters,
        limit: usize,
    ) -> Result<Vec<Listing>> {
        let mut sql = format!(
            "SELECT {LISTING_COLUMNS}
             FROM listings l
             LEFT JOIN categories c ON c.id = l.category_id
             WHERE 1=1"
        );
        let mut args: Vec<Value> = Vec::new();
        push_category_clause(&mut sql, &mut args, category_id);
        push_attribute_filters(&mut sql, &mut args, filters);
        sql.push_str(" ORDER BY l.created_at DESC LIMIT ?");
        args.push(Value::Integer(limit as i64));

        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(args), row_to_listing)?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .context("listing scan failed")
    }

    /// Repository-native pagination by recency (the empty-query path).
    pub fn recency_page(
        &self,
        category_id: Option<&str>,
        filters: &SearchFilters,
        page: usize,
        limit: usize,
    ) -> Result<(Vec<Listing>, usize)> {
        let mut count_sql = String::from("SELECT COUNT(*) FROM listings l WHERE 1=1");
        let mut count_args: Vec<Value> = Vec::new();
        push_category_clause(&mut count_sql, &mut count_args, category_id);
        push_attribute_filters(&mut count_sql, &mut count_args, filters);

        let mut sql = format!(
            "SELECT {LISTING_COLUMNS}
             FROM listings l
             LEFT JOIN categories c ON c.id = l.category_id
             WHERE 1=1"
        );
        let mut args: Vec<Value> = Vec::new();
        push_category_clause(&mut sql, &mut args, category_id);
        push_attribute_filters(&mut sql, &mut args, filters);
        sql.push_str(" ORDER BY l.created_at DESC LIMIT ? OFFSET ?");
        args.push(Value::Integer(limit as i64));
        args.push(Value::Integer(page_offset(page, limit)));

        let conn = self.conn.lock();
        let total: i64 = conn.query_row(&count_sql, params_from_iter(count_args), |row| row.get(0))?;
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(args), row_to_listing)?;
        let listings = rows
            .collect::<rusqlite::Result<Vec<_>>>()
            .context("recency page failed")?;
        Ok((listings, total as usize))
    }

    /// Repository-native paginated text query: the orchestrator's safety
    /// net when the ranked path fails. Degrades to a recency page when the
    /// query has no scoreable tokens.
    pub fn text_page(
        &self,
        query: &str,
        category_id: Option<&str>,
        filters: &SearchFilters,
        page: usize,
        limit: usize,
    ) -> Result<(Vec<Listing>, usize)> {
        let Some(match_expr) = fts_match_query(query) else {
            return self.recency_page(category_id, filters, page, limit);
        };

        let mut count_sql = String::from(
            "SELECT COUNT(*)
             FROM listing_fts
             JOIN listings l ON l.rowid = listing_fts.rowid
             WHERE listing_fts MATCH ?",
        );
        let mut count_args: Vec<Value> = vec![Value::Text(match_expr.clone())];
        push_category_clause(&mut count_sql, &mut count_args, category_id);
        push_attribute_filters(&mut count_sql, &mut count_args, filters);

        let mut sql = format!(
            "SELECT {LISTING_COLUMNS}, -bm25(listing_fts) AS relevance
             FROM listing_fts
             JOIN listings l ON l.rowid = listing_fts.rowid
             LEFT JOIN categories c ON c.id = l.category_id
             WHERE listing_fts MATCH ?"
        );
        let mut args: Vec<Value> = vec![Value::Text(match_expr)];
        push_category_clause(&mut sql, &mut args, category_id);
        push_attribute_filters(&mut sql, &mut args, filters);
        sql.push_str(" ORDER BY relevance DESC, l.created_at DESC LIMIT ? OFFSET ?");
        args.push(Value::Integer(limit as i64));
        args.push(Value::Integer(page_offset(page, limit)));

        let conn = self.conn.lock();
        let total: i64 = conn.query_row(&count_sql, params_from_iter(count_args), |row| row.get(0))?;
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(args), row_to_listing)?;
        let listings = rows
            .collect::<rusqlite::Result<Vec<_>>>()
            .context("text page failed")?;
        Ok((listings, total as usize))
    }

    // ===== Facet aggregation =====

    /// Grouped-count aggregation over one attribute within a scope. Values
    /// come back stringified; null and empty values are dropped. Ordered by
    /// count descending, value ascending on ties.
    pub fn attribute_counts(
        &self,
        attribute: &str,
        category_id: Option<&str>,
        scope_ids: Option<&[String]>,
        cap: usize,
    ) -> Result<Vec<(String, u64)>> {
        let path = format!("$.{attribute}");
        let mut sql = String::from(
            "SELECT CAST(json_extract(l.attributes, ?) AS TEXT) AS attr_value, COUNT(*) AS cnt
             FROM listings l
             WHERE json_extract(l.attributes, ?) IS NOT NULL
               AND CAST(json_extract(l.attributes, ?) AS TEXT) != ''",
        );
        let mut args: Vec<Value> = vec![
            Value::Text(path.clone()),
            Value::Text(path.clone()),
            Value::Text(path),
        ];
        push_category_clause(&mut sql, &mut args, category_id);
        push_scope_ids(&mut sql, &mut args, scope_ids)?;
        sql.push_str(" GROUP BY attr_value ORDER BY cnt DESC, attr_value ASC LIMIT ?");
        args.push(Value::Integer(cap as i64));

        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(args), |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)? as u64))
        })?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .context("attribute count aggregation failed")
    }

    /// Category histogram (name, count, slug) within an optional id scope,
    /// ordered by count descending.
    pub fn category_counts(
        &self,
        scope_ids: Option<&[String]>,
    ) -> Result<Vec<(String, u64, String)>> {
        let mut sql = String::from(
            "SELECT c.name, COUNT(*) AS cnt, c.slug
             FROM listings l
             JOIN categories c ON c.id = l.category_id
             WHERE 1=1",
        );
        let mut args: Vec<Value> = Vec::new();
        push_scope_ids(&mut sql, &mut args, scope_ids)?;
        sql.push_str(" GROUP BY c.id, c.name, c.slug ORDER BY cnt DESC, c.name ASC");

        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(args), |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, i64>(1)? as u64,
                row.get::<_, String>(2)?,
            ))
        })?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .context("category count aggregation failed")
    }

    // ===== Stats =====

    pub fn stats(&self) -> Result<StoreStats> {
        let conn = self.conn.lock();
        let listing_count: i64 =
            conn.query_row("SELECT COUNT(*) FROM listings", [], |row| row.get(0))?;
        let embedded_count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM listings WHERE embedding IS NOT NULL",
            [],
            |row| row.get(0),
        )?;
        let category_count: i64 =
            conn.query_row("SELECT COUNT(*) FROM categories", [], |row| row.get(0))?;

        Ok(StoreStats {
            listing_count: listing_count as usize,
            embedded_count: embedded_count as usize,
            category_count: category_count as usize,
        })
    }
}

fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS categories (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            slug TEXT NOT NULL UNIQUE,
            attribute_schema TEXT NOT NULL DEFAULT '[]',
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS listings (
            id TEXT PRIMARY KEY,
            title TEXT NOT NULL,
            description TEXT NOT NULL,
            price REAL NOT NULL DEFAULT 0,
            location TEXT,
            category_id TEXT REFERENCES categories(id),
            attributes TEXT NOT NULL DEFAULT '{}',
            embedding BLOB,
            search_text TEXT NOT NULL,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_listings_category ON listings(category_id);
        CREATE INDEX IF NOT EXISTS idx_listings_created ON listings(created_at);

        -- External-content FTS index over the derived search text, kept in
        -- sync by triggers on the listings table.
        CREATE VIRTUAL TABLE IF NOT EXISTS listing_fts USING fts5(
            search_text,
            content='listings',
            content_rowid='rowid'
        );

        CREATE TRIGGER IF NOT EXISTS listings_fts_insert AFTER INSERT ON listings BEGIN
            INSERT INTO listing_fts(rowid, search_text)
            VALUES (new.rowid, new.search_text);
        END;

        CREATE TRIGGER IF NOT EXISTS listings_fts_delete AFTER DELETE ON listings BEGIN
            INSERT INTO listing_fts(listing_fts, rowid, search_text)
            VALUES ('delete', old.rowid, old.search_text);
        END;

        CREATE TRIGGER IF NOT EXISTS listings_fts_update AFTER UPDATE ON listings BEGIN
            INSERT INTO listing_fts(listing_fts, rowid, search_text)
            VALUES ('delete', old.rowid, old.search_text);
            INSERT INTO listing_fts(rowid, search_text)
            VALUES (new.rowid, new.search_text);
        END;
        "#,
    )
    .context("failed to initialize listing store schema")?;
    Ok(())
}

fn push_category_clause(sql: &mut String, args: &mut Vec<Value>, category_id: Option<&str>) {
    if let Some(category_id) = category_id {
        sql.push_str(" AND l.category_id = ?");
        args.push(Value::Text(category_id.to_string()));
    }
}

/// Append one `IN (...)` clause per filtered attribute: OR within an
/// attribute's values, AND across attributes. Matching is against the
/// stringified attribute value.
fn push_attribute_filters(sql: &mut String, args: &mut Vec<Value>, filters: &SearchFilters) {
    for (attribute, values) in filters {
        if values.is_empty() {
            continue;
        }
        let placeholders = vec!["?"; values.len()].join(", ");
        sql.push_str(&format!(
            " AND CAST(json_extract(l.attributes, ?) AS TEXT) IN ({placeholders})"
        ));
        args.push(Value::Text(format!("$.{attribute}")));
        for value in values {
            args.push(Value::Text(value.clone()));
        }
    }
}

fn push_scope_ids(
    sql: &mut String,
    args: &mut Vec<Value>,
    scope_ids: Option<&[String]>,
) -> Result<()> {
    if let Some(ids) = scope_ids {
        sql.push_str(" AND l.id IN (SELECT value FROM json_each(?))");
        args.push(Value::Text(serde_json::to_string(ids)?));
    }
    Ok(())
}

fn page_offset(page: usize, limit: usize) -> i64 {
    (page.saturating_sub(1) * limit) as i64
}

/// Build an FTS5 MATCH expression from free-form query text: alphanumeric
/// tokens, quoted, OR-joined. None when nothing is scoreable.
fn fts_match_query(query: &str) -> Option<String> {
    let tokens: Vec<String> = FTS_TOKEN_RE
        .find_iter(query)
        .map(|m| format!("\"{}\"", m.as_str()))
        .collect();
    if tokens.is_empty() {
        None
    } else {
        Some(tokens.join(" OR "))
    }
}

fn row_to_category(row: &Row) -> rusqlite::Result<Category> {
    let schema_json: String = row.get(3)?;
    Ok(Category {
        id: row.get(0)?,
        name: row.get(1)?,
        slug: row.get(2)?,
        attribute_schema: serde_json::from_str(&schema_json).unwrap_or_default(),
        created_at: timestamp_to_datetime(row.get(4)?),
        updated_at: timestamp_to_datetime(row.get(5)?),
    })
}

fn row_to_listing(row: &Row) -> rusqlite::Result<Listing> {
    let attributes_json: String = row.get(6)?;
    let embedding_blob: Option<Vec<u8>> = row.get(7)?;

    let category = match row.get::<_, Option<String>>(11)? {
        Some(id) => {
            let schema_json: String = row.get(14)?;
            Some(Category {
                id,
                name: row.get(12)?,
                slug: row.get(13)?,
                attribute_schema: serde_json::from_str(&schema_json).unwrap_or_default(),
                created_at: timestamp_to_datetime(row.get(15)?),
                updated_at: timestamp_to_datetime(row.get(16)?),
            })
        }
        None => None,
    };

    Ok(Listing {
        id: row.get(0)?,
        title: row.get(1)?,
        description: row.get(2)?,
        price: row.get(3)?,
        location: row.get(4)?,
        category_id: row.get(5)?,
        category,
        attributes: serde_json::from_str(&attributes_json).unwrap_or_default(),
        embedding: embedding_blob.map(|blob| blob_to_embedding(&blob)),
        search_text: row.get(8)?,
        created_at: timestamp_to_datetime(row.get(9)?),
        updated_at: timestamp_to_datetime(row.get(10)?),
    })
}

fn timestamp_to_datetime(ts: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(ts, 0).unwrap_or(DateTime::UNIX_EPOCH)
}

/// f32 embedding to little-endian BLOB.
fn embedding_to_blob(embedding: &[f32]) -> Vec<u8> {
    let mut blob = Vec::with_capacity(embedding.len() * 4);
    for &val in embedding {
        blob.extend_from_slice(&val.to_le_bytes());
    }
    blob
}

/// Little-endian BLOB back to f32 embedding.
fn blob_to_embedding(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes(chunk.try_into().unwrap()))
        .collect()
}
