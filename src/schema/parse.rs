//! Schema definition parsing.
//!
//! A definition is a declarative document (JSON or TOML) with a `title`, an
//! optional `description` and an ordered `fields` table. Parsing rejects the
//! first malformed declaration it meets, in field order.

use crate::schema::errors::{SchemaError, SchemaErrorKind, SchemaLoadError};
use crate::schema::model::{
    Constraints, FieldKind, FieldSpec, ItemCount, Pattern, ScalarKind, SchemaModel,
};
use serde::Deserialize;
use serde_json::{Map, Value};
use std::fs;
use std::path::Path;

#[derive(Debug, Deserialize)]
struct RawSchema {
    #[serde(default)]
    title: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    fields: Map<String, Value>,
}

#[derive(Debug, Deserialize)]
struct RawField {
    #[serde(rename = "type", default)]
    field_type: Option<String>,
    #[serde(default)]
    label: Option<String>,
    #[serde(default)]
    required: bool,
    #[serde(default)]
    default: Option<Value>,
    #[serde(default, alias = "min_value")]
    min: Option<f64>,
    #[serde(default, alias = "max_value")]
    max: Option<f64>,
    #[serde(default)]
    min_length: Option<i64>,
    #[serde(default)]
    max_length: Option<i64>,
    #[serde(default)]
    pattern: Option<String>,
    #[serde(default)]
    choices: Option<Vec<Value>>,
    #[serde(default)]
    items: Option<Value>,
    #[serde(default)]
    min_items: Option<i64>,
    #[serde(default)]
    max_items: Option<i64>,
}

/// Where a declaration sits; decides which nesting is allowed and whether a
/// label is mandatory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Level {
    Field,
    Item,
    Property,
}

/// Parse a raw schema definition into a [`SchemaModel`].
pub fn parse(definition: &Value) -> Result<SchemaModel, SchemaError> {
    let raw: RawSchema = serde_json::from_value(definition.clone())
        .map_err(|e| SchemaError::new(SchemaErrorKind::Malformed, "", e.to_string()))?;

    let mut fields = Vec::with_capacity(raw.fields.len());
    for (name, config) in &raw.fields {
        fields.push(parse_field(name, config, name, Level::Field, None)?);
    }

    Ok(SchemaModel {
        title: raw.title,
        description: raw.description,
        fields,
    })
}

/// Load and parse a schema definition file (`.json` or `.toml`).
pub fn load_schema_from_path(path: impl AsRef<Path>) -> Result<SchemaModel, SchemaLoadError> {
    let path = path.as_ref();
    let contents = fs::read_to_string(path).map_err(|source| SchemaLoadError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase);
    let definition: Value = match extension.as_deref() {
        Some("json") => serde_json::from_str(&contents).map_err(|source| SchemaLoadError::Json {
            path: path.to_path_buf(),
            source,
        })?,
        Some("toml") => {
            toml_edit::de::from_str(&contents).map_err(|source| SchemaLoadError::Toml {
                path: path.to_path_buf(),
                source,
            })?
        }
        _ => return Err(SchemaLoadError::UnsupportedFormat(path.to_path_buf())),
    };

    let schema = parse(&definition).map_err(|source| SchemaLoadError::Schema {
        path: path.to_path_buf(),
        source,
    })?;
    tracing::debug!(
        path = %path.display(),
        title = %schema.title,
        fields = schema.fields.len(),
        "loaded schema"
    );
    Ok(schema)
}

fn parse_field(
    name: &str,
    config: &Value,
    path: &str,
    level: Level,
    inherited_label: Option<&str>,
) -> Result<FieldSpec, SchemaError> {
    let raw: RawField = serde_json::from_value(config.clone())
        .map_err(|e| SchemaError::new(SchemaErrorKind::Malformed, path, e.to_string()))?;

    let Some(type_name) = raw
        .field_type
        .as_deref()
        .map(str::trim)
        .filter(|t| !t.is_empty())
    else {
        return Err(SchemaError::new(
            SchemaErrorKind::MissingType,
            path,
            "field must declare a 'type'",
        ));
    };

    let label = match raw.label.as_deref().map(str::trim).filter(|l| !l.is_empty()) {
        Some(label) => label.to_string(),
        None => match inherited_label {
            Some(label) => label.to_string(),
            None => {
                return Err(SchemaError::new(
                    SchemaErrorKind::MissingLabel,
                    path,
                    "field must declare a 'label'",
                ))
            }
        },
    };

    let kind = match type_name {
        "enum" => parse_enum(&raw, path)?,
        "array" if level == Level::Field => parse_array(&raw, name, path, &label)?,
        "array" | "object" => {
            return Err(SchemaError::new(
                SchemaErrorKind::UnsupportedNesting,
                path,
                format!("'{type_name}' is only supported as a top-level array of scalars or objects"),
            ))
        }
        other => match ScalarKind::from_type_name(other) {
            Some(kind) => FieldKind::Scalar {
                kind,
                constraints: parse_constraints(kind, &raw, path)?,
            },
            None => {
                return Err(SchemaError::new(
                    SchemaErrorKind::UnsupportedType,
                    path,
                    format!("unknown field type '{other}'"),
                ))
            }
        },
    };

    let spec = FieldSpec {
        name: name.to_string(),
        label,
        required: raw.required,
        default: raw.default,
        kind,
    };

    if let Some(default) = &spec.default {
        let errors = crate::validate::validate_value(&spec, default, path);
        if let Some(first) = errors.first() {
            return Err(SchemaError::new(
                SchemaErrorKind::InvalidConstraint,
                format!("{path}.default"),
                format!("default violates the field's own constraints: {first}"),
            ));
        }
    }

    Ok(spec)
}

fn parse_constraints(
    kind: ScalarKind,
    raw: &RawField,
    path: &str,
) -> Result<Constraints, SchemaError> {
    let mut constraints = Constraints::default();

    match kind {
        ScalarKind::Number | ScalarKind::Integer => {
            if let (Some(min), Some(max)) = (raw.min, raw.max) {
                if min > max {
                    return Err(SchemaError::new(
                        SchemaErrorKind::InvalidConstraint,
                        path,
                        format!("min {min} is greater than max {max}"),
                    ));
                }
            }
            constraints.min = raw.min;
            constraints.max = raw.max;
        }
        ScalarKind::String => {
            constraints.min_length = length(raw.min_length, path, "min_length")?;
            constraints.max_length = length(raw.max_length, path, "max_length")?;
            check_order(
                constraints.min_length,
                constraints.max_length,
                path,
                "min_length",
                "max_length",
            )?;
            if let Some(source) = &raw.pattern {
                let pattern = Pattern::new(source).map_err(|e| {
                    SchemaError::new(
                        SchemaErrorKind::InvalidConstraint,
                        path,
                        format!("invalid pattern '{source}': {e}"),
                    )
                })?;
                constraints.pattern = Some(pattern);
            }
        }
        ScalarKind::Boolean | ScalarKind::Date => {}
    }

    Ok(constraints)
}

fn parse_enum(raw: &RawField, path: &str) -> Result<FieldKind, SchemaError> {
    match &raw.choices {
        Some(choices) if !choices.is_empty() => Ok(FieldKind::Enum {
            choices: choices.clone(),
        }),
        _ => Err(SchemaError::new(
            SchemaErrorKind::EmptyChoices,
            path,
            "enum field must declare a non-empty 'choices' list",
        )),
    }
}

fn parse_array(
    raw: &RawField,
    name: &str,
    path: &str,
    label: &str,
) -> Result<FieldKind, SchemaError> {
    let count = ItemCount {
        min_items: length(raw.min_items, path, "min_items")?,
        max_items: length(raw.max_items, path, "max_items")?,
    };
    check_order(count.min_items, count.max_items, path, "min_items", "max_items")?;

    let Some(items) = &raw.items else {
        return Err(SchemaError::new(
            SchemaErrorKind::MissingItems,
            path,
            "array field must declare 'items'",
        ));
    };

    let items_path = format!("{path}[]");
    let items_type = items.get("type").and_then(Value::as_str);
    if items_type != Some("object") {
        let item = parse_field(name, items, &items_path, Level::Item, Some(label))?;
        return Ok(FieldKind::ArrayOfScalar {
            items: Box::new(item),
            count,
        });
    }

    let Some(properties) = items.get("properties").and_then(Value::as_object) else {
        return Err(SchemaError::new(
            SchemaErrorKind::MissingItems,
            items_path,
            "object items must declare a 'properties' table",
        ));
    };

    let mut specs = Vec::with_capacity(properties.len());
    for (prop_name, prop_config) in properties {
        let prop_path = format!("{items_path}.{prop_name}");
        specs.push(parse_field(
            prop_name,
            prop_config,
            &prop_path,
            Level::Property,
            None,
        )?);
    }

    Ok(FieldKind::ArrayOfObject {
        properties: specs,
        count,
    })
}

fn length(value: Option<i64>, path: &str, key: &str) -> Result<Option<usize>, SchemaError> {
    match value {
        None => Ok(None),
        Some(n) => usize::try_from(n).map(Some).map_err(|_| {
            SchemaError::new(
                SchemaErrorKind::InvalidConstraint,
                path,
                format!("{key} must be a non-negative integer, got {n}"),
            )
        }),
    }
}

fn check_order(
    min: Option<usize>,
    max: Option<usize>,
    path: &str,
    min_key: &str,
    max_key: &str,
) -> Result<(), SchemaError> {
    match (min, max) {
        (Some(min), Some(max)) if min > max => Err(SchemaError::new(
            SchemaErrorKind::InvalidConstraint,
            path,
            format!("{min_key} {min} is greater than {max_key} {max}"),
        )),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn kind_of(definition: Value) -> SchemaErrorKind {
        parse(&definition).unwrap_err().kind
    }

    #[test]
    fn test_parse_keeps_field_order_and_metadata() {
        let schema = parse(&json!({
            "title": "Invoice",
            "description": "Supplier invoices",
            "fields": {
                "supplier_name": {"type": "string", "label": "Supplier", "required": true},
                "invoice_amount": {"type": "number", "label": "Amount", "min_value": 0.01},
                "status": {"type": "enum", "label": "Status", "choices": ["open", "paid"], "default": "open"}
            }
        }))
        .unwrap();

        assert_eq!(schema.title, "Invoice");
        assert_eq!(schema.description.as_deref(), Some("Supplier invoices"));
        let names: Vec<_> = schema.field_names().collect();
        assert_eq!(names, ["supplier_name", "invoice_amount", "status"]);
        assert_eq!(schema.required_fields().count(), 1);

        let amount = schema.field("invoice_amount").unwrap();
        assert!(matches!(
            &amount.kind,
            FieldKind::Scalar { kind: ScalarKind::Number, constraints } if constraints.min == Some(0.01)
        ));
        assert_eq!(schema.defaults().collect::<Vec<_>>(), [("status", &json!("open"))]);
    }

    #[test]
    fn test_parse_array_of_scalar_inherits_label() {
        let schema = parse(&json!({
            "fields": {
                "serial_numbers": {
                    "type": "array",
                    "label": "Serial numbers",
                    "min_items": 1,
                    "items": {"type": "string", "min_length": 5}
                }
            }
        }))
        .unwrap();

        let field = schema.field("serial_numbers").unwrap();
        match &field.kind {
            FieldKind::ArrayOfScalar { items, count } => {
                assert_eq!(items.label, "Serial numbers");
                assert_eq!(items.min_length(), Some(5));
                assert_eq!(count.min_items, Some(1));
            }
            other => panic!("unexpected kind: {other:?}"),
        }
    }

    #[test]
    fn test_parse_array_of_object() {
        let schema = parse(&json!({
            "fields": {
                "line_items": {
                    "type": "array",
                    "label": "Line items",
                    "items": {
                        "type": "object",
                        "properties": {
                            "description": {"type": "string", "label": "Description"},
                            "quantity": {"type": "integer", "label": "Quantity", "min": 1}
                        }
                    }
                }
            }
        }))
        .unwrap();

        let field = schema.field("line_items").unwrap();
        assert!(field.is_array());
        assert_eq!(
            field.property("quantity").and_then(FieldSpec::scalar_kind),
            Some(ScalarKind::Integer)
        );
    }

    #[test]
    fn test_missing_type_and_label() {
        assert_eq!(
            kind_of(json!({"fields": {"a": {"label": "A"}}})),
            SchemaErrorKind::MissingType
        );
        assert_eq!(
            kind_of(json!({"fields": {"a": {"type": "string"}}})),
            SchemaErrorKind::MissingLabel
        );
    }

    #[test]
    fn test_unknown_type() {
        let err = parse(&json!({"fields": {"a": {"type": "money", "label": "A"}}})).unwrap_err();
        assert_eq!(err.kind, SchemaErrorKind::UnsupportedType);
        assert_eq!(err.path, "a");
    }

    #[test]
    fn test_inverted_constraints() {
        assert_eq!(
            kind_of(json!({"fields": {"n": {"type": "number", "label": "N", "min": 10, "max": 1}}})),
            SchemaErrorKind::InvalidConstraint
        );
        assert_eq!(
            kind_of(json!({"fields": {"s": {"type": "string", "label": "S", "min_length": 5, "max_length": 2}}})),
            SchemaErrorKind::InvalidConstraint
        );
        assert_eq!(
            kind_of(json!({"fields": {"s": {"type": "string", "label": "S", "min_length": -1}}})),
            SchemaErrorKind::InvalidConstraint
        );
        assert_eq!(
            kind_of(json!({"fields": {"s": {"type": "string", "label": "S", "pattern": "("}}})),
            SchemaErrorKind::InvalidConstraint
        );
    }

    #[test]
    fn test_enum_choices_and_default_membership() {
        assert_eq!(
            kind_of(json!({"fields": {"e": {"type": "enum", "label": "E", "choices": []}}})),
            SchemaErrorKind::EmptyChoices
        );
        assert_eq!(
            kind_of(json!({"fields": {"e": {"type": "enum", "label": "E"}}})),
            SchemaErrorKind::EmptyChoices
        );
        let err = parse(&json!({
            "fields": {"e": {"type": "enum", "label": "E", "choices": ["a", "b"], "default": "c"}}
        }))
        .unwrap_err();
        assert_eq!(err.kind, SchemaErrorKind::InvalidConstraint);
        assert_eq!(err.path, "e.default");
    }

    #[test]
    fn test_default_must_satisfy_constraints() {
        let err = parse(&json!({
            "fields": {"code": {"type": "string", "label": "Code", "min_length": 3, "default": "x"}}
        }))
        .unwrap_err();
        assert_eq!(err.kind, SchemaErrorKind::InvalidConstraint);
        assert_eq!(err.path, "code.default");
    }

    #[test]
    fn test_nesting_rules() {
        assert_eq!(
            kind_of(json!({"fields": {"o": {"type": "object", "label": "O", "properties": {}}}})),
            SchemaErrorKind::UnsupportedNesting
        );
        assert_eq!(
            kind_of(json!({"fields": {"a": {"type": "array", "label": "A", "items": {"type": "array", "items": {"type": "string"}}}}})),
            SchemaErrorKind::UnsupportedNesting
        );
        let err = parse(&json!({
            "fields": {"rows": {"type": "array", "label": "Rows", "items": {
                "type": "object",
                "properties": {"tags": {"type": "array", "label": "Tags", "items": {"type": "string"}}}
            }}}
        }))
        .unwrap_err();
        assert_eq!(err.kind, SchemaErrorKind::UnsupportedNesting);
        assert_eq!(err.path, "rows[].tags");
    }

    #[test]
    fn test_array_requires_items() {
        assert_eq!(
            kind_of(json!({"fields": {"a": {"type": "array", "label": "A"}}})),
            SchemaErrorKind::MissingItems
        );
        assert_eq!(
            kind_of(json!({"fields": {"a": {"type": "array", "label": "A", "items": {"type": "object"}}}})),
            SchemaErrorKind::MissingItems
        );
    }

    #[test]
    fn test_malformed_field_config() {
        assert_eq!(
            kind_of(json!({"fields": {"a": "string"}})),
            SchemaErrorKind::Malformed
        );
        assert_eq!(kind_of(json!(["not", "a", "schema"])), SchemaErrorKind::Malformed);
    }

    #[test]
    fn test_load_schema_from_toml_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("invoice.toml");
        fs::write(
            &path,
            r#"
title = "Invoice"

[fields.supplier_name]
type = "string"
label = "Supplier"
required = true

[fields.line_items]
type = "array"
label = "Line items"

[fields.line_items.items]
type = "object"

[fields.line_items.items.properties.quantity]
type = "integer"
label = "Quantity"
"#,
        )
        .unwrap();

        let schema = load_schema_from_path(&path).unwrap();
        assert_eq!(schema.title, "Invoice");
        let names: Vec<_> = schema.field_names().collect();
        assert_eq!(names, ["supplier_name", "line_items"]);
    }

    #[test]
    fn test_load_schema_rejects_unknown_extension() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("schema.yaml");
        fs::write(&path, "title: x").unwrap();
        assert!(matches!(
            load_schema_from_path(&path),
            Err(SchemaLoadError::UnsupportedFormat(_))
        ));
    }
}
