use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Attribute filters: OR within an attribute's value set, AND across
/// attributes. Values are matched against the stringified attribute value,
/// the same form facet values are reported in.
pub type SearchFilters = BTreeMap<String, Vec<String>>;

/// A scalar attribute value from a listing's attribute bag.
///
/// Attribute bags are free-form JSON objects; the engine only ever groups
/// and stringifies values, so a tagged scalar is all the typing needed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttributeValue {
    Bool(bool),
    Number(f64),
    String(String),
    Null,
}

impl AttributeValue {
    /// Stringified form used for search text. Null and empty strings count
    /// as absent.
    pub fn as_text(&self) -> Option<String> {
        match self {
            Self::String(s) if s.is_empty() => None,
            Self::String(s) => Some(s.clone()),
            Self::Number(n) => Some(n.to_string()),
            Self::Bool(b) => Some(b.to_string()),
            Self::Null => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttributeKind {
    String,
    Number,
    Boolean,
}

/// One entry of a category's attribute schema. Drives ingestion validation
/// and schema-ordered facet derivation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttributeSpec {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: AttributeKind,
    #[serde(default)]
    pub required: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Category {
    pub id: String,
    pub name: String,
    /// URL-safe unique key.
    pub slug: String,
    #[serde(default)]
    pub attribute_schema: Vec<AttributeSpec>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A marketplace listing.
///
/// The embedding is absent until it has been computed successfully; when
/// present its length is always the standard model dimension. Vectors of
/// mismatched length must never be compared.
#[derive(Debug, Clone, Serialize)]
pub struct Listing {
    pub id: String,
    pub title: String,
    pub description: String,
    pub price: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category_id: Option<String>,
    /// Category joined in by the store, when the listing has one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<Category>,
    pub attributes: BTreeMap<String, AttributeValue>,
    #[serde(skip_serializing)]
    pub embedding: Option<Vec<f32>>,
    #[serde(skip_serializing)]
    pub search_text: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Derived search text: title, description, location and attribute values,
/// lower-cased. Computed once at ingestion; both the embedding and the
/// full-text index are built from it.
pub fn generate_search_text(
    title: &str,
    description: &str,
    location: Option<&str>,
    attributes: &BTreeMap<String, AttributeValue>,
) -> String {
    let mut parts: Vec<String> = vec![title.to_string(), description.to_string()];

    if let Some(location) = location {
        if !location.is_empty() {
            parts.push(location.to_string());
        }
    }

    for (name, value) in attributes {
        if let Some(text) = value.as_text() {
            parts.push(format!("{} {}", name, text));
        }
    }

    parts.join(" ").to_lowercase().trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_search_text_lowercases_and_joins() {
        let mut attributes = BTreeMap::new();
        attributes.insert("brand".to_string(), AttributeValue::String("Apple".to_string()));
        attributes.insert("screenSize".to_string(), AttributeValue::Number(6.1));

        let text = generate_search_text(
            "iPhone 13",
            "Lightly used, great battery",
            Some("Berlin"),
            &attributes,
        );

        assert_eq!(
            text,
            "iphone 13 lightly used, great battery berlin brand apple screensize 6.1"
        );
    }

    #[test]
    fn test_search_text_skips_null_and_empty_attributes() {
        let mut attributes = BTreeMap::new();
        attributes.insert("color".to_string(), AttributeValue::Null);
        attributes.insert("size".to_string(), AttributeValue::String(String::new()));

        let text = generate_search_text("Chair", "Wooden chair", None, &attributes);
        assert_eq!(text, "chair wooden chair");
    }

    #[test]
    fn test_attribute_value_untagged_json() {
        let raw = r#"{"brand":"Apple","screenSize":6.1,"refurbished":true,"notes":null}"#;
        let attributes: BTreeMap<String, AttributeValue> = serde_json::from_str(raw).unwrap();

        assert_eq!(attributes["brand"], AttributeValue::String("Apple".to_string()));
        assert_eq!(attributes["screenSize"], AttributeValue::Number(6.1));
        assert_eq!(attributes["refurbished"], AttributeValue::Bool(true));
        assert_eq!(attributes["notes"], AttributeValue::Null);

        let round_trip = serde_json::to_string(&attributes).unwrap();
        let reparsed: BTreeMap<String, AttributeValue> = serde_json::from_str(&round_trip).unwrap();
        assert_eq!(attributes, reparsed);
    }

    #[test]
    fn test_attribute_value_as_text() {
        assert_eq!(AttributeValue::Bool(false).as_text().as_deref(), Some("false"));
        assert_eq!(AttributeValue::Number(42.0).as_text().as_deref(), Some("42"));
        assert_eq!(AttributeValue::Null.as_text(), None);
        assert_eq!(AttributeValue::String(String::new()).as_text(), None);
    }
}
