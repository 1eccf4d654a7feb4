use std::collections::BTreeMap;
use std::fmt;

use super::listing::{AttributeKind, AttributeSpec, AttributeValue};

/// A reason an incoming listing was rejected at ingestion.
#[derive(Debug, Clone, PartialEq)]
pub enum ListingViolation {
    EmptyTitle,
    EmptyDescription,
    NegativePrice(f64),
    UnknownCategory(String),
    MissingAttribute(String),
    TypeMismatch { name: String, expected: AttributeKind },
}

impl fmt::Display for ListingViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptyTitle => write!(f, "Title is required"),
            Self::EmptyDescription => write!(f, "Description is required"),
            Self::NegativePrice(p) => write!(f, "Price must be non-negative (got {})", p),
            Self::UnknownCategory(slug) => write!(f, "Unknown category slug '{}'", slug),
            Self::MissingAttribute(name) => {
                write!(f, "Missing required attribute '{}'", name)
            }
            Self::TypeMismatch { name, expected } => {
                let expected = match expected {
                    AttributeKind::String => "string",
                    AttributeKind::Number => "number",
                    AttributeKind::Boolean => "boolean",
                };
                write!(f, "Attribute '{}' must be a {}", name, expected)
            }
        }
    }
}

/// Validate an incoming listing against its category's attribute schema.
///
/// Required attributes must be present and non-null; present attributes
/// must match the schema type. Attributes outside the schema pass through
/// unchecked.
pub fn validate_listing(
    title: &str,
    description: &str,
    price: f64,
    attributes: &BTreeMap<String, AttributeValue>,
    schema: &[AttributeSpec],
) -> Vec<ListingViolation> {
    let mut violations = Vec::new();

    if title.trim().is_empty() {
        violations.push(ListingViolation::EmptyTitle);
    }
    if description.trim().is_empty() {
        violations.push(ListingViolation::EmptyDescription);
    }
    if price < 0.0 {
        violations.push(ListingViolation::NegativePrice(price));
    }

    for spec in schema {
        match attributes.get(&spec.name) {
            None | Some(AttributeValue::Null) => {
                if spec.required {
                    violations.push(ListingViolation::MissingAttribute(spec.name.clone()));
                }
            }
            Some(value) => {
                let matches = matches!(
                    (spec.kind, value),
                    (AttributeKind::String, AttributeValue::String(_))
                        | (AttributeKind::Number, AttributeValue::Number(_))
                        | (AttributeKind::Boolean, AttributeValue::Bool(_))
                );
                if !matches {
                    violations.push(ListingViolation::TypeMismatch {
                        name: spec.name.clone(),
                        expected: spec.kind,
                    });
                }
            }
        }
    }

    violations
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schema() -> Vec<AttributeSpec> {
        vec![
            AttributeSpec {
                name: "brand".to_string(),
                kind: AttributeKind::String,
                required: true,
            },
            AttributeSpec {
                name: "screenSize".to_string(),
                kind: AttributeKind::Number,
                required: false,
            },
        ]
    }

    #[test]
    fn test_valid_listing_passes() {
        let mut attributes = BTreeMap::new();
        attributes.insert("brand".to_string(), AttributeValue::String("Apple".to_string()));
        attributes.insert("screenSize".to_string(), AttributeValue::Number(6.1));

        let violations = validate_listing("iPhone", "A phone", 300.0, &attributes, &schema());
        assert!(violations.is_empty());
    }

    #[test]
    fn test_missing_required_attribute() {
        let violations = validate_listing("iPhone", "A phone", 300.0, &BTreeMap::new(), &schema());
        assert_eq!(
            violations,
            vec![ListingViolation::MissingAttribute("brand".to_string())]
        );
    }

    #[test]
    fn test_null_counts_as_missing_when_required() {
        let mut attributes = BTreeMap::new();
        attributes.insert("brand".to_string(), AttributeValue::Null);

        let violations = validate_listing("iPhone", "A phone", 300.0, &attributes, &schema());
        assert_eq!(
            violations,
            vec![ListingViolation::MissingAttribute("brand".to_string())]
        );
    }

    #[test]
    fn test_type_mismatch() {
        let mut attributes = BTreeMap::new();
        attributes.insert("brand".to_string(), AttributeValue::String("Apple".to_string()));
        attributes.insert("screenSize".to_string(), AttributeValue::String("big".to_string()));

        let violations = validate_listing("iPhone", "A phone", 300.0, &attributes, &schema());
        assert_eq!(
            violations,
            vec![ListingViolation::TypeMismatch {
                name: "screenSize".to_string(),
                expected: AttributeKind::Number,
            }]
        );
    }

    #[test]
    fn test_empty_fields_and_negative_price() {
        let violations = validate_listing(" ", "", -5.0, &BTreeMap::new(), &[]);
        assert_eq!(
            violations,
            vec![
                ListingViolation::EmptyTitle,
                ListingViolation::EmptyDescription,
                ListingViolation::NegativePrice(-5.0),
            ]
        );
    }
}
