//! Structural difference between an original and a corrected document.
//!
//! Arrays are aligned by position: indices present on both sides are
//! compared pairwise, the tail of the longer side is reported as added or
//! removed items. Reordering without a value change therefore shows up as
//! pairwise changes.

use crate::document::Fields;
use crate::schema::{FieldKind, FieldSpec, SchemaModel};
use crate::value::{loose_eq, option_eq, semantic_eq};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use thiserror::Error;

/// One change record. `None` on either side of a `before`/`after` pair means
/// the field or property is absent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Change {
    ScalarChanged {
        field: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        before: Option<Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        after: Option<Value>,
    },
    ArrayItemAdded {
        field: String,
        index: usize,
        value: Value,
    },
    ArrayItemRemoved {
        field: String,
        index: usize,
        value: Value,
    },
    ArrayItemChanged {
        field: String,
        index: usize,
        before: Value,
        after: Value,
    },
    ObjectPropertyChanged {
        field: String,
        index: usize,
        property: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        before: Option<Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        after: Option<Value>,
    },
}

impl Change {
    pub fn field(&self) -> &str {
        match self {
            Change::ScalarChanged { field, .. }
            | Change::ArrayItemAdded { field, .. }
            | Change::ArrayItemRemoved { field, .. }
            | Change::ArrayItemChanged { field, .. }
            | Change::ObjectPropertyChanged { field, .. } => field,
        }
    }
}

/// Ordered sequence of changes.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Diff {
    changes: Vec<Change>,
}

/// Change counts by category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ChangeSummary {
    pub modified: usize,
    pub added: usize,
    pub removed: usize,
    pub total: usize,
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ApplyError {
    #[error("field '{field}' is not an array")]
    NotAnArray { field: String },

    #[error("field '{field}' has no item at index {index}")]
    MissingIndex { field: String, index: usize },

    #[error("field '{field}' item {index} is not an object")]
    NotAnObject { field: String, index: usize },

    #[error("field '{field}' cannot append at index {index} (length {len})")]
    NonContiguousAppend {
        field: String,
        index: usize,
        len: usize,
    },
}

impl Diff {
    pub fn new(changes: Vec<Change>) -> Self {
        Self { changes }
    }

    pub fn changes(&self) -> &[Change] {
        &self.changes
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.changes.len()
    }

    pub fn summary(&self) -> ChangeSummary {
        let mut summary = ChangeSummary::default();
        for change in &self.changes {
            match change {
                Change::ScalarChanged { before: None, .. }
                | Change::ObjectPropertyChanged { before: None, .. }
                | Change::ArrayItemAdded { .. } => summary.added += 1,
                Change::ScalarChanged { after: None, .. }
                | Change::ObjectPropertyChanged { after: None, .. }
                | Change::ArrayItemRemoved { .. } => summary.removed += 1,
                Change::ScalarChanged { .. }
                | Change::ObjectPropertyChanged { .. }
                | Change::ArrayItemChanged { .. } => summary.modified += 1,
            }
        }
        summary.total = summary.modified + summary.added + summary.removed;
        summary
    }

    /// Replay the changes on top of `original`, reconstructing the corrected
    /// field mapping.
    ///
    /// Values that differ only in representation (`10` and `10.0`, a date and
    /// a timestamp on that date) produce no change, so they keep the original's
    /// form. The result is [`equivalent`] to the corrected mapping and exact
    /// everywhere a change was recorded.
    pub fn apply(&self, original: &Fields) -> Result<Fields, ApplyError> {
        let mut fields = original.clone();
        // Removals always form the tail of an array; truncate once per field.
        let mut truncate_at: HashMap<&str, usize> = HashMap::new();

        for change in &self.changes {
            match change {
                Change::ScalarChanged { field, after, .. } => match after {
                    Some(value) => {
                        fields.insert(field.clone(), value.clone());
                    }
                    None => {
                        fields.remove(field);
                    }
                },
                Change::ArrayItemAdded { field, index, value } => {
                    let array = array_mut(&mut fields, field)?;
                    if *index != array.len() {
                        return Err(ApplyError::NonContiguousAppend {
                            field: field.clone(),
                            index: *index,
                            len: array.len(),
                        });
                    }
                    array.push(value.clone());
                }
                Change::ArrayItemRemoved { field, index, .. } => {
                    let len = array_mut(&mut fields, field)?.len();
                    if *index >= len {
                        return Err(ApplyError::MissingIndex {
                            field: field.clone(),
                            index: *index,
                        });
                    }
                    let at = truncate_at.entry(field.as_str()).or_insert(*index);
                    *at = (*at).min(*index);
                }
                Change::ArrayItemChanged {
                    field,
                    index,
                    after,
                    ..
                } => {
                    *item_mut(&mut fields, field, *index)? = after.clone();
                }
                Change::ObjectPropertyChanged {
                    field,
                    index,
                    property,
                    after,
                    ..
                } => {
                    let object = item_mut(&mut fields, field, *index)?
                        .as_object_mut()
                        .ok_or_else(|| ApplyError::NotAnObject {
                            field: field.clone(),
                            index: *index,
                        })?;
                    match after {
                        Some(value) => {
                            object.insert(property.clone(), value.clone());
                        }
                        None => {
                            object.remove(property);
                        }
                    }
                }
            }
        }

        for (field, at) in truncate_at {
            array_mut(&mut fields, field)?.truncate(at);
        }
        Ok(fields)
    }
}

impl<'a> IntoIterator for &'a Diff {
    type Item = &'a Change;
    type IntoIter = std::slice::Iter<'a, Change>;

    fn into_iter(self) -> Self::IntoIter {
        self.changes.iter()
    }
}

fn array_mut<'f>(fields: &'f mut Fields, field: &str) -> Result<&'f mut Vec<Value>, ApplyError> {
    fields
        .get_mut(field)
        .and_then(Value::as_array_mut)
        .ok_or_else(|| ApplyError::NotAnArray {
            field: field.to_string(),
        })
}

fn item_mut<'f>(
    fields: &'f mut Fields,
    field: &str,
    index: usize,
) -> Result<&'f mut Value, ApplyError> {
    array_mut(fields, field)?
        .get_mut(index)
        .ok_or_else(|| ApplyError::MissingIndex {
            field: field.to_string(),
            index,
        })
}

/// Compute the difference between `original` and `corrected`.
///
/// Declared fields come first in schema order, followed by undeclared fields
/// in the order they appear in `original`, then in `corrected`. Inputs are
/// never mutated.
pub fn diff(original: &Fields, corrected: &Fields, schema: &SchemaModel) -> Diff {
    let mut changes = Vec::new();

    for spec in &schema.fields {
        diff_field(
            &spec.name,
            Some(spec),
            original.get(&spec.name),
            corrected.get(&spec.name),
            &mut changes,
        );
    }

    let undeclared = original
        .keys()
        .chain(corrected.keys().filter(|k| !original.contains_key(*k)))
        .filter(|k| schema.field(k).is_none());
    for name in undeclared {
        diff_field(name, None, original.get(name), corrected.get(name), &mut changes);
    }

    tracing::debug!(changes = changes.len(), "computed document diff");
    Diff { changes }
}

/// Whether two mappings agree under the schema's semantic equality.
pub fn equivalent(a: &Fields, b: &Fields, schema: &SchemaModel) -> bool {
    diff(a, b, schema).is_empty()
}

fn diff_field(
    name: &str,
    spec: Option<&FieldSpec>,
    before: Option<&Value>,
    after: Option<&Value>,
    changes: &mut Vec<Change>,
) {
    match (spec.map(|s| &s.kind), before, after) {
        (
            Some(FieldKind::ArrayOfScalar { items, .. }),
            Some(Value::Array(old)),
            Some(Value::Array(new)),
        ) => diff_scalar_array(name, items, old, new, changes),
        (
            Some(FieldKind::ArrayOfObject { properties, .. }),
            Some(Value::Array(old)),
            Some(Value::Array(new)),
        ) => diff_object_array(name, properties, old, new, changes),
        _ => {
            let kind = spec.and_then(FieldSpec::scalar_kind);
            if !option_eq(kind, before, after) {
                changes.push(Change::ScalarChanged {
                    field: name.to_string(),
                    before: before.cloned(),
                    after: after.cloned(),
                });
            }
        }
    }
}

fn diff_scalar_array(
    name: &str,
    items: &FieldSpec,
    old: &[Value],
    new: &[Value],
    changes: &mut Vec<Change>,
) {
    let kind = items.scalar_kind();
    for (index, (before, after)) in old.iter().zip(new).enumerate() {
        let equal = match kind {
            Some(kind) => semantic_eq(kind, before, after),
            None => loose_eq(before, after),
        };
        if !equal {
            changes.push(Change::ArrayItemChanged {
                field: name.to_string(),
                index,
                before: before.clone(),
                after: after.clone(),
            });
        }
    }
    push_tail(name, old, new, changes);
}

fn diff_object_array(
    name: &str,
    properties: &[FieldSpec],
    old: &[Value],
    new: &[Value],
    changes: &mut Vec<Change>,
) {
    for (index, (before, after)) in old.iter().zip(new).enumerate() {
        let (Some(old_obj), Some(new_obj)) = (before.as_object(), after.as_object()) else {
            if !loose_eq(before, after) {
                changes.push(Change::ArrayItemChanged {
                    field: name.to_string(),
                    index,
                    before: before.clone(),
                    after: after.clone(),
                });
            }
            continue;
        };

        let declared = properties.iter().map(|p| (p.name.as_str(), p.scalar_kind()));
        let undeclared = old_obj
            .keys()
            .chain(new_obj.keys().filter(|k| !old_obj.contains_key(*k)))
            .filter(|k| !properties.iter().any(|p| &p.name == *k))
            .map(|k| (k.as_str(), None));

        for (property, kind) in declared.chain(undeclared) {
            let (b, a) = (old_obj.get(property), new_obj.get(property));
            if !option_eq(kind, b, a) {
                changes.push(Change::ObjectPropertyChanged {
                    field: name.to_string(),
                    index,
                    property: property.to_string(),
                    before: b.cloned(),
                    after: a.cloned(),
                });
            }
        }
    }
    push_tail(name, old, new, changes);
}

fn push_tail(name: &str, old: &[Value], new: &[Value], changes: &mut Vec<Change>) {
    let common = old.len().min(new.len());
    for (index, value) in old.iter().enumerate().skip(common) {
        changes.push(Change::ArrayItemRemoved {
            field: name.to_string(),
            index,
            value: value.clone(),
        });
    }
    for (index, value) in new.iter().enumerate().skip(common) {
        changes.push(Change::ArrayItemAdded {
            field: name.to_string(),
            index,
            value: value.clone(),
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

    fn schema() -> SchemaModel {
        parse(&json!({
            "fields": {
                "supplier_name": {"type": "string", "label": "Supplier"},
                "amount": {"type": "number", "label": "Amount"},
                "invoice_date": {"type": "date", "label": "Date"},
                "serial_numbers": {"type": "array", "label": "Serials", "items": {"type": "string", "min_length": 5}},
                "line_items": {"type": "array", "label": "Lines", "items": {"type": "object", "properties": {
                    "description": {"type": "string", "label": "Description"},
                    "quantity": {"type": "integer", "label": "Quantity"}
                }}}
            }
        }))
        .unwrap()
    }

    #[test]
    fn test_identical_documents_have_empty_diff() {
        let doc = fields(json!({
            "supplier_name": "Acme",
            "serial_numbers": ["AB123"],
            "line_items": [{"description": "Widget", "quantity": 3}],
            "extra": [1, 2]
        }));
        assert!(diff(&doc, &doc, &schema()).is_empty());
    }

    #[test]
    fn test_scalar_semantic_equality() {
        let original = fields(json!({"amount": 10, "invoice_date": "2024-03-01"}));
        let corrected = fields(json!({"amount": 10.0, "invoice_date": "2024-03-01T00:00:00Z"}));
        assert!(diff(&original, &corrected, &schema()).is_empty());

        let corrected = fields(json!({"amount": 12, "invoice_date": "2024-03-01"}));
        let result = diff(&original, &corrected, &schema());
        assert_eq!(
            result.changes(),
            [Change::ScalarChanged {
                field: "amount".to_string(),
                before: Some(json!(10)),
                after: Some(json!(12)),
            }]
        );
    }

    #[test]
    fn test_scalar_array_added_item() {
        let original = fields(json!({"serial_numbers": ["AB123"]}));
        let corrected = fields(json!({"serial_numbers": ["AB123", "CD4567"]}));
        let result = diff(&original, &corrected, &schema());
        assert_eq!(
            result.changes(),
            [Change::ArrayItemAdded {
                field: "serial_numbers".to_string(),
                index: 1,
                value: json!("CD4567"),
            }]
        );
    }

    #[test]
    fn test_scalar_array_reorder_is_positional() {
        let original = fields(json!({"serial_numbers": ["AAAAA", "BBBBB", "CCCCC"]}));
        let corrected = fields(json!({"serial_numbers": ["BBBBB", "AAAAA"]}));
        let result = diff(&original, &corrected, &schema());
        assert_eq!(result.len(), 3);
        assert!(matches!(result.changes()[0], Change::ArrayItemChanged { index: 0, .. }));
        assert!(matches!(result.changes()[1], Change::ArrayItemChanged { index: 1, .. }));
        assert!(matches!(result.changes()[2], Change::ArrayItemRemoved { index: 2, .. }));
    }

    #[test]
    fn test_object_array_edit_and_remove() {
        let original = fields(json!({"line_items": [
            {"description": "Widget", "quantity": 3},
            {"description": "Gadget", "quantity": 1}
        ]}));
        let corrected = fields(json!({"line_items": [
            {"description": "Widget", "quantity": 5}
        ]}));
        let result = diff(&original, &corrected, &schema());
        assert_eq!(
            result.changes(),
            [
                Change::ObjectPropertyChanged {
                    field: "line_items".to_string(),
                    index: 0,
                    property: "quantity".to_string(),
                    before: Some(json!(3)),
                    after: Some(json!(5)),
                },
                Change::ArrayItemRemoved {
                    field: "line_items".to_string(),
                    index: 1,
                    value: json!({"description": "Gadget", "quantity": 1}),
                },
            ]
        );
    }

    #[test]
    fn test_absent_array_is_whole_value_change() {
        let original = fields(json!({}));
        let corrected = fields(json!({"serial_numbers": ["AB123"]}));
        let result = diff(&original, &corrected, &schema());
        assert_eq!(
            result.changes(),
            [Change::ScalarChanged {
                field: "serial_numbers".to_string(),
                before: None,
                after: Some(json!(["AB123"])),
            }]
        );
    }

    #[test]
    fn test_undeclared_fields_follow_declared_ones() {
        let original = fields(json!({"note": "a", "supplier_name": "Acme"}));
        let corrected = fields(json!({"supplier_name": "ACME", "tag": true}));
        let result = diff(&original, &corrected, &schema());
        let touched: Vec<_> = result.changes().iter().map(Change::field).collect();
        assert_eq!(touched, ["supplier_name", "note", "tag"]);
    }

    #[test]
    fn test_summary_counts() {
        let original = fields(json!({
            "supplier_name": "Acme",
            "note": "x",
            "serial_numbers": ["AB123", "CD456"],
            "line_items": [{"description": "W", "quantity": 1}]
        }));
        let corrected = fields(json!({
            "supplier_name": "ACME",
            "amount": 3,
            "serial_numbers": ["AB123"],
            "line_items": [{"description": "W", "quantity": 2}, {"description": "V", "quantity": 1}]
        }));
        let summary = diff(&original, &corrected, &schema()).summary();
        assert_eq!(
            summary,
            ChangeSummary {
                modified: 2,
                added: 2,
                removed: 2,
                total: 6
            }
        );
    }

    #[test]
    fn test_apply_reconstructs_corrected() {
        let original = fields(json!({
            "supplier_name": "Acme",
            "serial_numbers": ["AB123", "CD456", "EF789"],
            "line_items": [{"description": "W", "quantity": 1, "sku": "x"}],
            "note": "remove me"
        }));
        let corrected = fields(json!({
            "supplier_name": "Acme Corp",
            "serial_numbers": ["AB123"],
            "line_items": [{"description": "W", "quantity": 4}, {"description": "V", "quantity": 1}],
            "amount": 9.5
        }));
        let result = diff(&original, &corrected, &schema());
        assert_eq!(result.apply(&original).unwrap(), corrected);
    }

    #[test]
    fn test_apply_keeps_original_form_of_equivalent_values() {
        let original = fields(json!({"amount": 10, "invoice_date": "2024-03-01", "supplier_name": "A"}));
        let corrected = fields(json!({
            "amount": 10.0,
            "invoice_date": "2024-03-01T09:00:00Z",
            "supplier_name": "B"
        }));
        let result = diff(&original, &corrected, &schema());
        assert_eq!(result.len(), 1);

        let rebuilt = result.apply(&original).unwrap();
        assert_ne!(rebuilt, corrected);
        assert!(equivalent(&rebuilt, &corrected, &schema()));
        assert_eq!(rebuilt["amount"], json!(10));
        assert_eq!(rebuilt["supplier_name"], json!("B"));
    }

    #[test]
    fn test_diff_serializes_with_type_tags() {
        let result = Diff::new(vec![Change::ArrayItemAdded {
            field: "serial_numbers".to_string(),
            index: 1,
            value: json!("CD4567"),
        }]);
        let encoded = serde_json::to_value(&result).unwrap();
        assert_eq!(
            encoded,
            json!([{"type": "array_item_added", "field": "serial_numbers", "index": 1, "value": "CD4567"}])
        );
    }
}
