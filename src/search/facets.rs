//! Facet derivation: attribute value histograms for the filter sidebar.

use serde::Serialize;

use super::embedding::{self, Embedder};
use super::engine::SearchEngine;
use crate::core::listing::SearchFilters;
use crate::store::ListingStore;

/// Attribute names faceted when no category narrows the scope.
const GENERAL_FACET_KEYS: [&str; 8] = [
    "brand",
    "color",
    "size",
    "material",
    "condition",
    "screenSize",
    "resolution",
    "displayType",
];

/// Value cap per facet driven by a category's attribute schema.
const SCHEMA_FACET_CAP: usize = 20;

/// Value cap per facet on the general fallback list.
const GENERAL_FACET_CAP: usize = 15;

/// Candidate cap for the query sub-search that scopes facet counts.
const FACET_SCOPE_CAP: usize = 1000;

/// One selectable value of a facet with its listing count.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FacetValue {
    pub value: String,
    pub count: u64,
    /// Category facets carry the slug for filter links.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub slug: Option<String>,
}

/// An attribute facet: values sorted by count descending, capped.
#[derive(Debug, Clone, Serialize)]
pub struct Facet {
    pub name: String,
    pub values: Vec<FacetValue>,
}

/// Facet engine over a listing store and an embedding provider.
pub struct FacetEngine<'s> {
    store: &'s ListingStore,
    embedder: &'s dyn Embedder,
}

impl<'s> FacetEngine<'s> {
    /// Engine backed by the process-wide embedding provider.
    pub fn new(store: &'s ListingStore) -> Self {
        Self {
            store,
            embedder: embedding::global(),
        }
    }

    /// Engine with a caller-supplied embedding provider.
    pub fn with_embedder(store: &'s ListingStore, embedder: &'s dyn Embedder) -> Self {
        Self { store, embedder }
    }

    /// Derive facets for the current category/query context.
    ///
    /// The active attribute filters are deliberately left out of the
    /// counting scope: a facet lists what becomes available when the user
    /// changes that selection, so only category and query narrow it.
    /// With a category, one facet per schema attribute in schema order;
    /// without one, the general attribute list plus a category facet.
    /// Facets are a non-critical enhancement, so any failure degrades to
    /// an empty facet list instead of failing the search.
    pub fn generate_facets(
        &self,
        category_id: Option<&str>,
        _filters: &SearchFilters,
        query: Option<&str>,
    ) -> Vec<Facet> {
        match self.derive(category_id, query) {
            Ok(facets) => facets,
            Err(e) => {
                tracing::warn!("facet generation failed, returning no facets: {e}");
                Vec::new()
            }
        }
    }

    fn derive(&self, category_id: Option<&str>, query: Option<&str>) -> anyhow::Result<Vec<Facet>> {
        let scope_ids = self.query_scope(category_id, query);
        let scope_ids = scope_ids.as_deref();

        let mut facets = Vec::new();

        if let Some(category_id) = category_id {
            let schema = self
                .store
                .category_by_id(category_id)?
                .map(|c| c.attribute_schema)
                .unwrap_or_default();
            for spec in &schema {
                let values = self.store.attribute_counts(
                    &spec.name,
                    Some(category_id),
                    scope_ids,
                    SCHEMA_FACET_CAP,
                )?;
                push_facet(&mut facets, &spec.name, values);
            }
        } else {
            for key in GENERAL_FACET_KEYS {
                let values = self
                    .store
                    .attribute_counts(key, None, scope_ids, GENERAL_FACET_CAP)?;
                push_facet(&mut facets, key, values);
            }

            let categories = self.store.category_counts(scope_ids)?;
            if !categories.is_empty() {
                facets.push(Facet {
                    name: "category".to_string(),
                    values: categories
                        .into_iter()
                        .map(|(value, count, slug)| FacetValue {
                            value,
                            count,
                            slug: Some(slug),
                        })
                        .collect(),
                });
            }
        }

        Ok(facets)
    }

    /// Ids from an unfiltered hybrid sub-search over the query, used to
    /// narrow facet counts to listings the query actually matches. A
    /// failed or empty sub-search leaves the scope unrestricted.
    fn query_scope(&self, category_id: Option<&str>, query: Option<&str>) -> Option<Vec<String>> {
        let query = query?.trim();
        if query.is_empty() {
            return None;
        }

        let engine = SearchEngine::with_embedder(self.store, self.embedder);
        match engine.hybrid_search(query, category_id, &SearchFilters::new(), FACET_SCOPE_CAP) {
            Ok(results) if !results.is_empty() => {
                Some(results.into_iter().map(|r| r.listing.id).collect())
            }
            Ok(_) => None,
            Err(e) => {
                tracing::warn!("facet scope sub-search failed, counting without it: {e}");
                None
            }
        }
    }
}

/// Facets with no surviving values are omitted entirely.
fn push_facet(facets: &mut Vec<Facet>, name: &str, values: Vec<(String, u64)>) {
    if values.is_empty() {
        return;
    }
    facets.push(Facet {
        name: name.to_string(),
        values: values
            .into_iter()
            .map(|(value, count)| FacetValue {
                value,
                count,
                slug: None,
            })
            .collect(),
    });
}
