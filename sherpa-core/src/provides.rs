//! `provides` edge inference from tool I/O schemas.
//!
//! A producer tool provides for a consumer when its output fields cover the
//! consumer's inputs. Field names match through a small, closed alias set;
//! types match through a widening lattice. Coverage maps to edge
//! provenance: strict → observed, partial → inferred, optional → template.

use serde::{Deserialize, Serialize};
use sherpa_graphs::EdgeSource;

/// Field type in a tool schema. Closed enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    String,
    Number,
    Integer,
    Boolean,
    Array,
    Object,
    Any,
}

/// One named field of a tool's input or output schema.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchemaField {
    pub name: String,
    pub field_type: FieldType,
    #[serde(default)]
    pub required: bool,
}

impl SchemaField {
    pub fn required(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
            required: true,
        }
    }

    pub fn optional(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
            required: false,
        }
    }
}

/// A tool's declared I/O shape.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToolSchema {
    #[serde(default)]
    pub inputs: Vec<SchemaField>,
    #[serde(default)]
    pub outputs: Vec<SchemaField>,
}

/// How much of the consumer's schema the producer covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Coverage {
    /// All required consumer fields covered.
    Strict,
    /// Some required fields covered.
    Partial,
    /// Only optional fields covered.
    Optional,
}

impl Coverage {
    /// Provenance assigned to the inferred `provides` edge.
    pub fn edge_source(self) -> EdgeSource {
        match self {
            Self::Strict => EdgeSource::Observed,
            Self::Partial => EdgeSource::Inferred,
            Self::Optional => EdgeSource::Template,
        }
    }
}

/// Semantic alias groups: `content ↔ json ↔ text`, `file ↔ path`.
fn canonical_name(name: &str) -> &str {
    match name.to_lowercase().as_str() {
        "content" | "json" | "text" => "content",
        "file" | "path" => "file",
        _ => name,
    }
}

fn names_match(a: &str, b: &str) -> bool {
    a.eq_ignore_ascii_case(b) || canonical_name(a) == canonical_name(b)
}

/// Widening lattice: `integer → number → string`; `any` matches
/// everything; `array ↔ object` is rejected in strict mode.
pub fn type_compatible(producer: FieldType, consumer: FieldType, strict: bool) -> bool {
    use FieldType::{Any, Array, Integer, Number, Object, String as Str};
    match (producer, consumer) {
        (a, b) if a == b => true,
        (Any, _) | (_, Any) => true,
        (Integer, Number | Str) | (Number, Str) => true,
        (Array, Object) | (Object, Array) => !strict,
        _ => false,
    }
}

/// Coverage of `consumer`'s inputs by `producer`'s outputs, or `None` when
/// nothing matches.
pub fn infer_coverage(
    producer: &ToolSchema,
    consumer: &ToolSchema,
    strict: bool,
) -> Option<Coverage> {
    let covered = |field: &SchemaField| {
        producer.outputs.iter().any(|out| {
            names_match(&out.name, &field.name)
                && type_compatible(out.field_type, field.field_type, strict)
        })
    };

    let required: Vec<&SchemaField> =
        consumer.inputs.iter().filter(|f| f.required).collect();
    let optional: Vec<&SchemaField> =
        consumer.inputs.iter().filter(|f| !f.required).collect();

    let required_covered = required.iter().filter(|f| covered(f)).count();
    let optional_covered = optional.iter().filter(|f| covered(f)).count();

    if !required.is_empty() && required_covered == required.len() {
        Some(Coverage::Strict)
    } else if required_covered > 0 {
        Some(Coverage::Partial)
    } else if optional_covered > 0 {
        Some(Coverage::Optional)
    } else {
        None
    }
}

// ── Tests ──────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_required_coverage_is_strict() {
        let producer = ToolSchema {
            inputs: vec![],
            outputs: vec![
                SchemaField::required("order_id", FieldType::String),
                SchemaField::required("total", FieldType::Number),
            ],
        };
        let consumer = ToolSchema {
            inputs: vec![
                SchemaField::required("order_id", FieldType::String),
                SchemaField::required("total", FieldType::Number),
            ],
            outputs: vec![],
        };
        let coverage = infer_coverage(&producer, &consumer, true).unwrap();
        assert_eq!(coverage, Coverage::Strict);
        assert_eq!(coverage.edge_source(), EdgeSource::Observed);
    }

    #[test]
    fn partial_coverage() {
        let producer = ToolSchema {
            inputs: vec![],
            outputs: vec![SchemaField::required("order_id", FieldType::String)],
        };
        let consumer = ToolSchema {
            inputs: vec![
                SchemaField::required("order_id", FieldType::String),
                SchemaField::required("customer", FieldType::Object),
            ],
            outputs: vec![],
        };
        let coverage = infer_coverage(&producer, &consumer, true).unwrap();
        assert_eq!(coverage, Coverage::Partial);
        assert_eq!(coverage.edge_source(), EdgeSource::Inferred);
    }

    #[test]
    fn optional_only_coverage() {
        let producer = ToolSchema {
            inputs: vec![],
            outputs: vec![SchemaField::required("note", FieldType::String)],
        };
        let consumer = ToolSchema {
            inputs: vec![
                SchemaField::required("payload", FieldType::Object),
                SchemaField::optional("note", FieldType::String),
            ],
            outputs: vec![],
        };
        let coverage = infer_coverage(&producer, &consumer, true).unwrap();
        assert_eq!(coverage, Coverage::Optional);
        assert_eq!(coverage.edge_source(), EdgeSource::Template);
    }

    #[test]
    fn no_match_yields_none() {
        let producer = ToolSchema {
            inputs: vec![],
            outputs: vec![SchemaField::required("a", FieldType::String)],
        };
        let consumer = ToolSchema {
            inputs: vec![SchemaField::required("b", FieldType::Number)],
            outputs: vec![],
        };
        assert!(infer_coverage(&producer, &consumer, true).is_none());
    }

    #[test]
    fn aliases_bridge_names() {
        // content ↔ json, file ↔ path, text ↔ content.
        let producer = ToolSchema {
            inputs: vec![],
            outputs: vec![
                SchemaField::required("json", FieldType::Object),
                SchemaField::required("path", FieldType::String),
            ],
        };
        let consumer = ToolSchema {
            inputs: vec![
                SchemaField::required("content", FieldType::Object),
                SchemaField::required("file", FieldType::String),
            ],
            outputs: vec![],
        };
        assert_eq!(
            infer_coverage(&producer, &consumer, true),
            Some(Coverage::Strict)
        );
    }

    #[test]
    fn widening_lattice() {
        assert!(type_compatible(FieldType::Integer, FieldType::Number, true));
        assert!(type_compatible(FieldType::Integer, FieldType::String, true));
        assert!(type_compatible(FieldType::Number, FieldType::String, true));
        assert!(!type_compatible(FieldType::String, FieldType::Integer, true));
        assert!(!type_compatible(FieldType::Number, FieldType::Integer, true));
    }

    #[test]
    fn any_matches_everything() {
        for t in [
            FieldType::String,
            FieldType::Number,
            FieldType::Array,
            FieldType::Object,
        ] {
            assert!(type_compatible(FieldType::Any, t, true));
            assert!(type_compatible(t, FieldType::Any, true));
        }
    }

    #[test]
    fn array_object_strictness() {
        assert!(!type_compatible(FieldType::Array, FieldType::Object, true));
        assert!(type_compatible(FieldType::Array, FieldType::Object, false));
    }
}
