//! Document validation against a [`SchemaModel`].
//!
//! Validation never short-circuits across fields: every declared field is
//! checked and every violation is reported with a path such as
//! `line_items[2].quantity`. Fields the schema does not declare are ignored.

use crate::document::{Document, Fields};
use crate::schema::{Constraints, FieldKind, FieldSpec, ItemCount, ScalarKind, SchemaModel};
use crate::value::{is_blank, is_whole_number, loose_eq, parse_date};
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

/// A single constraint violation. Returned as data, never raised.
#[derive(Error, Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ValidationError {
    #[error("'{label}' is required ({path})")]
    Required { path: String, label: String },

    #[error("'{label}' must be of type {expected} ({path})")]
    TypeMismatch {
        path: String,
        label: String,
        expected: String,
    },

    #[error("'{label}' value {actual} is outside {} ({path})", bounds(.min, .max))]
    OutOfRange {
        path: String,
        label: String,
        min: Option<f64>,
        max: Option<f64>,
        actual: f64,
    },

    #[error("'{label}' length {actual} is outside {} ({path})", length_bounds(.min, .max))]
    LengthViolation {
        path: String,
        label: String,
        min: Option<usize>,
        max: Option<usize>,
        actual: usize,
    },

    #[error("'{label}' does not match pattern '{pattern}' ({path})")]
    PatternMismatch {
        path: String,
        label: String,
        pattern: String,
    },

    #[error("'{label}' must be one of the declared choices ({path})")]
    InvalidChoice {
        path: String,
        label: String,
        choices: Vec<Value>,
    },
}

impl ValidationError {
    pub fn path(&self) -> &str {
        match self {
            ValidationError::Required { path, .. }
            | ValidationError::TypeMismatch { path, .. }
            | ValidationError::OutOfRange { path, .. }
            | ValidationError::LengthViolation { path, .. }
            | ValidationError::PatternMismatch { path, .. }
            | ValidationError::InvalidChoice { path, .. } => path,
        }
    }
}

fn bounds(min: &Option<f64>, max: &Option<f64>) -> String {
    match (*min, *max) {
        (Some(min), Some(max)) => format!("[{min}, {max}]"),
        (Some(min), None) => format!(">= {min}"),
        (None, Some(max)) => format!("<= {max}"),
        (None, None) => "bounds".to_string(),
    }
}

fn length_bounds(min: &Option<usize>, max: &Option<usize>) -> String {
    bounds(&min.map(|n| n as f64), &max.map(|n| n as f64))
}

/// Validate a document against a schema. An empty result means valid.
pub fn validate(document: &Document, schema: &SchemaModel) -> Vec<ValidationError> {
    validate_fields(&document.fields, schema)
}

/// Validate a bare field mapping against a schema.
pub fn validate_fields(fields: &Fields, schema: &SchemaModel) -> Vec<ValidationError> {
    let mut errors = Vec::new();
    for spec in &schema.fields {
        check_field(spec, fields.get(&spec.name), &spec.name, &mut errors);
    }
    errors
}

/// Validate one present value against a field spec, rooted at `path`.
pub fn validate_value(spec: &FieldSpec, value: &Value, path: &str) -> Vec<ValidationError> {
    let mut errors = Vec::new();
    check_field(spec, Some(value), path, &mut errors);
    errors
}

/// Fill absent, non-required fields from their declared defaults.
pub fn apply_defaults(fields: &Fields, schema: &SchemaModel) -> Fields {
    let mut filled = fields.clone();
    for spec in &schema.fields {
        if let Some(default) = &spec.default {
            if !spec.required && filled.get(&spec.name).map_or(true, Value::is_null) {
                filled.insert(spec.name.clone(), default.clone());
            }
        }
    }
    filled
}

fn check_field(
    spec: &FieldSpec,
    value: Option<&Value>,
    path: &str,
    errors: &mut Vec<ValidationError>,
) {
    if is_blank(value) {
        if spec.required {
            errors.push(ValidationError::Required {
                path: path.to_string(),
                label: spec.label.clone(),
            });
            return;
        }
        // Optional blanks pass, except an empty string under a declared minimum length.
        match value {
            Some(Value::String(_)) if spec.min_length().is_some() => {}
            _ => return,
        }
    }
    let Some(value) = value else {
        return;
    };

    match &spec.kind {
        FieldKind::Scalar { kind, constraints } => {
            check_scalar(spec, *kind, constraints, value, path, errors)
        }
        FieldKind::Enum { choices } => {
            if !choices.iter().any(|choice| loose_eq(choice, value)) {
                errors.push(ValidationError::InvalidChoice {
                    path: path.to_string(),
                    label: spec.label.clone(),
                    choices: choices.clone(),
                });
            }
        }
        FieldKind::ArrayOfScalar { items, count } => {
            let Some(array) = as_array(spec, value, path, errors) else {
                return;
            };
            check_count(spec, *count, array.len(), path, errors);
            for (index, item) in array.iter().enumerate() {
                check_field(items, Some(item), &format!("{path}[{index}]"), errors);
            }
        }
        FieldKind::ArrayOfObject { properties, count } => {
            let Some(array) = as_array(spec, value, path, errors) else {
                return;
            };
            check_count(spec, *count, array.len(), path, errors);
            for (index, element) in array.iter().enumerate() {
                let element_path = format!("{path}[{index}]");
                let Some(object) = element.as_object() else {
                    errors.push(ValidationError::TypeMismatch {
                        path: element_path,
                        label: spec.label.clone(),
                        expected: "object".to_string(),
                    });
                    continue;
                };
                for property in properties {
                    check_field(
                        property,
                        object.get(&property.name),
                        &format!("{element_path}.{}", property.name),
                        errors,
                    );
                }
            }
        }
    }
}

fn check_scalar(
    spec: &FieldSpec,
    kind: ScalarKind,
    constraints: &Constraints,
    value: &Value,
    path: &str,
    errors: &mut Vec<ValidationError>,
) {
    let type_ok = match kind {
        ScalarKind::String => value.is_string(),
        ScalarKind::Number => value.is_number(),
        ScalarKind::Integer => is_whole_number(value),
        ScalarKind::Boolean => value.is_boolean(),
        ScalarKind::Date => value.as_str().and_then(parse_date).is_some(),
    };
    if !type_ok {
        errors.push(ValidationError::TypeMismatch {
            path: path.to_string(),
            label: spec.label.clone(),
            expected: kind.as_str().to_string(),
        });
        return;
    }

    match kind {
        ScalarKind::Number | ScalarKind::Integer => {
            let Some(actual) = value.as_f64() else {
                return;
            };
            let below = constraints.min.is_some_and(|min| actual < min);
            let above = constraints.max.is_some_and(|max| actual > max);
            if below || above {
                errors.push(ValidationError::OutOfRange {
                    path: path.to_string(),
                    label: spec.label.clone(),
                    min: constraints.min,
                    max: constraints.max,
                    actual,
                });
            }
        }
        ScalarKind::String => {
            let Some(text) = value.as_str() else {
                return;
            };
            let actual = text.chars().count();
            let short = constraints.min_length.is_some_and(|min| actual < min);
            let long = constraints.max_length.is_some_and(|max| actual > max);
            if short || long {
                errors.push(ValidationError::LengthViolation {
                    path: path.to_string(),
                    label: spec.label.clone(),
                    min: constraints.min_length,
                    max: constraints.max_length,
                    actual,
                });
            }
            if let Some(pattern) = &constraints.pattern {
                if !pattern.is_match(text) {
                    errors.push(ValidationError::PatternMismatch {
                        path: path.to_string(),
                        label: spec.label.clone(),
                        pattern: pattern.as_str().to_string(),
                    });
                }
            }
        }
        ScalarKind::Boolean | ScalarKind::Date => {}
    }
}

fn as_array<'v>(
    spec: &FieldSpec,
    value: &'v Value,
    path: &str,
    errors: &mut Vec<ValidationError>,
) -> Option<&'v Vec<Value>> {
    let array = value.as_array();
    if array.is_none() {
        errors.push(ValidationError::TypeMismatch {
            path: path.to_string(),
            label: spec.label.clone(),
            expected: "array".to_string(),
        });
    }
    array
}

fn check_count(
    spec: &FieldSpec,
    count: ItemCount,
    actual: usize,
    path: &str,
    errors: &mut Vec<ValidationError>,
) {
    let few = count.min_items.is_some_and(|min| actual < min);
    let many = count.max_items.is_some_and(|max| actual > max);
    if few || many {
        errors.push(ValidationError::LengthViolation {
            path: path.to_string(),
            label: spec.label.clone(),
            min: count.min_items,
            max: count.max_items,
            actual,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::parse;
    use serde_json::json;

    fn fields(value: Value) -> Fields {
        match value {
            Value::Object(map) => map,
            other => panic!("expected object, got {other}"),
        }
    }

    fn invoice_schema() -> SchemaModel {
        parse(&json!({
            "title": "Invoice",
            "fields": {
                "supplier_name": {"type": "string", "label": "Supplier", "required": true, "max_length": 20},
                "invoice_number": {"type": "string", "label": "Invoice number", "pattern": "INV-[0-9]+"},
                "invoice_amount": {"type": "number", "label": "Amount", "required": true, "min": 0.01},
                "invoice_date": {"type": "date", "label": "Invoice date"},
                "paid": {"type": "boolean", "label": "Paid"},
                "currency": {"type": "enum", "label": "Currency", "choices": ["EUR", "USD"], "default": "EUR"},
                "serial_numbers": {
                    "type": "array", "label": "Serial numbers", "max_items": 3,
                    "items": {"type": "string", "min_length": 5}
                },
                "line_items": {
                    "type": "array", "label": "Line items",
                    "items": {"type": "object", "properties": {
                        "description": {"type": "string", "label": "Description", "required": true},
                        "quantity": {"type": "integer", "label": "Quantity", "min": 1}
                    }}
                }
            }
        }))
        .unwrap()
    }

    #[test]
    fn test_valid_document_has_no_errors() {
        let doc = fields(json!({
            "supplier_name": "Acme",
            "invoice_number": "INV-42",
            "invoice_amount": 10.5,
            "invoice_date": "2024-03-01",
            "paid": false,
            "currency": "USD",
            "serial_numbers": ["AB123", "CD4567"],
            "line_items": [{"description": "Widget", "quantity": 3}],
            "unknown_extra": {"kept": true}
        }));
        assert!(validate_fields(&doc, &invoice_schema()).is_empty());
    }

    #[test]
    fn test_required_reported_once_alongside_other_errors() {
        let doc = fields(json!({
            "supplier_name": "   ",
            "invoice_amount": "ten",
            "paid": "no"
        }));
        let errors = validate_fields(&doc, &invoice_schema());
        let required: Vec<_> = errors
            .iter()
            .filter(|e| matches!(e, ValidationError::Required { .. }))
            .collect();
        assert_eq!(required.len(), 1);
        assert_eq!(required[0].path(), "supplier_name");
        assert!(errors.iter().any(|e| matches!(
            e,
            ValidationError::TypeMismatch { path, expected, .. } if path == "invoice_amount" && expected == "number"
        )));
        assert!(errors.iter().any(|e| e.path() == "paid"));
    }

    #[test]
    fn test_scalar_constraints() {
        let doc = fields(json!({
            "supplier_name": "A supplier with a very long name",
            "invoice_number": "X-1",
            "invoice_amount": 0,
            "invoice_date": "01/03/2024",
            "currency": "GBP"
        }));
        let errors = validate_fields(&doc, &invoice_schema());
        assert!(errors.iter().any(|e| matches!(e, ValidationError::LengthViolation { path, actual: 32, .. } if path == "supplier_name")));
        assert!(errors.iter().any(|e| matches!(e, ValidationError::PatternMismatch { path, .. } if path == "invoice_number")));
        assert!(errors.iter().any(|e| matches!(e, ValidationError::OutOfRange { path, .. } if path == "invoice_amount")));
        assert!(errors.iter().any(|e| matches!(e, ValidationError::TypeMismatch { path, .. } if path == "invoice_date")));
        assert!(errors.iter().any(|e| matches!(e, ValidationError::InvalidChoice { path, .. } if path == "currency")));
        assert_eq!(errors.len(), 5);
    }

    #[test]
    fn test_array_item_paths() {
        let doc = fields(json!({
            "supplier_name": "Acme",
            "invoice_amount": 1,
            "serial_numbers": ["AB123", "AB1", "CD4567", "EF8901"],
            "line_items": [
                {"description": "Widget", "quantity": 1},
                {"description": "Gadget", "quantity": 0},
                {"quantity": 2.5},
                "not an object"
            ]
        }));
        let errors = validate_fields(&doc, &invoice_schema());
        let paths: Vec<_> = errors.iter().map(ValidationError::path).collect();
        assert_eq!(
            paths,
            [
                "serial_numbers",
                "serial_numbers[1]",
                "line_items[1].quantity",
                "line_items[2].description",
                "line_items[2].quantity",
                "line_items[3]",
            ]
        );
    }

    #[test]
    fn test_integer_accepts_whole_floats() {
        let doc = fields(json!({
            "supplier_name": "Acme",
            "invoice_amount": 1,
            "line_items": [{"description": "Widget", "quantity": 5.0}]
        }));
        assert!(validate_fields(&doc, &invoice_schema()).is_empty());
    }

    #[test]
    fn test_empty_optional_string_with_min_length_is_checked() {
        let schema = parse(&json!({
            "fields": {
                "note": {"type": "string", "label": "Note"},
                "code": {"type": "string", "label": "Code", "min_length": 2}
            }
        }))
        .unwrap();
        let errors = validate_fields(&fields(json!({"note": "", "code": ""})), &schema);
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].path(), "code");
    }

    #[test]
    fn test_apply_defaults_fills_absent_optional_fields() {
        let schema = invoice_schema();
        let filled = apply_defaults(&fields(json!({"supplier_name": "Acme"})), &schema);
        assert_eq!(filled.get("currency"), Some(&json!("EUR")));

        let kept = apply_defaults(&fields(json!({"currency": "USD"})), &schema);
        assert_eq!(kept.get("currency"), Some(&json!("USD")));
    }

    #[test]
    fn test_error_display_names_label_and_path() {
        let err = ValidationError::OutOfRange {
            path: "line_items[0].quantity".to_string(),
            label: "Quantity".to_string(),
            min: Some(1.0),
            max: None,
            actual: 0.0,
        };
        assert_eq!(
            err.to_string(),
            "'Quantity' value 0 is outside >= 1 (line_items[0].quantity)"
        );
    }
}
