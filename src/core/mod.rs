//! Core domain types: listings, categories, attribute schemas.

pub mod listing;
pub mod schema;

pub use listing::{
    generate_search_text, AttributeKind, AttributeSpec, AttributeValue, Category, Listing,
    SearchFilters,
};
pub use schema::{validate_listing, ListingViolation};
