use regex::Regex;
use serde_json::Value;
use std::fmt;

/// Scalar value kinds a field may declare.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScalarKind {
    String,
    Number,
    Integer,
    Boolean,
    Date,
}

impl ScalarKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ScalarKind::String => "string",
            ScalarKind::Number => "number",
            ScalarKind::Integer => "integer",
            ScalarKind::Boolean => "boolean",
            ScalarKind::Date => "date",
        }
    }

    pub(crate) fn from_type_name(name: &str) -> Option<Self> {
        match name {
            "string" => Some(ScalarKind::String),
            "number" | "float" => Some(ScalarKind::Number),
            "integer" => Some(ScalarKind::Integer),
            "boolean" => Some(ScalarKind::Boolean),
            "date" => Some(ScalarKind::Date),
            _ => None,
        }
    }
}

impl fmt::Display for ScalarKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A start-anchored regular expression constraint.
#[derive(Debug, Clone)]
pub struct Pattern {
    source: String,
    regex: Regex,
}

impl Pattern {
    pub fn new(source: &str) -> Result<Self, regex::Error> {
        let regex = Regex::new(&format!("^(?:{source})"))?;
        Ok(Self {
            source: source.to_string(),
            regex,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    pub fn is_match(&self, text: &str) -> bool {
        self.regex.is_match(text)
    }
}

impl PartialEq for Pattern {
    fn eq(&self, other: &Self) -> bool {
        self.source == other.source
    }
}

/// Constraints on a scalar value. Only those meaningful for the kind are set.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Constraints {
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub min_length: Option<usize>,
    pub max_length: Option<usize>,
    pub pattern: Option<Pattern>,
}

/// Count constraints on an array field.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ItemCount {
    pub min_items: Option<usize>,
    pub max_items: Option<usize>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FieldKind {
    Scalar {
        kind: ScalarKind,
        constraints: Constraints,
    },
    Enum {
        choices: Vec<Value>,
    },
    /// Items are always `Scalar` or `Enum`.
    ArrayOfScalar {
        items: Box<FieldSpec>,
        count: ItemCount,
    },
    /// Properties are always `Scalar` or `Enum`.
    ArrayOfObject {
        properties: Vec<FieldSpec>,
        count: ItemCount,
    },
}

/// Declaration of a single field, array item or object property.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldSpec {
    pub name: String,
    pub label: String,
    pub required: bool,
    pub default: Option<Value>,
    pub kind: FieldKind,
}

impl FieldSpec {
    /// The scalar kind governing equality, if this spec is a plain scalar.
    pub fn scalar_kind(&self) -> Option<ScalarKind> {
        match &self.kind {
            FieldKind::Scalar { kind, .. } => Some(*kind),
            _ => None,
        }
    }

    pub fn is_array(&self) -> bool {
        matches!(
            self.kind,
            FieldKind::ArrayOfScalar { .. } | FieldKind::ArrayOfObject { .. }
        )
    }

    pub fn min_length(&self) -> Option<usize> {
        match &self.kind {
            FieldKind::Scalar { constraints, .. } => constraints.min_length,
            _ => None,
        }
    }

    pub fn property(&self, name: &str) -> Option<&FieldSpec> {
        match &self.kind {
            FieldKind::ArrayOfObject { properties, .. } => {
                properties.iter().find(|p| p.name == name)
            }
            _ => None,
        }
    }

    /// Short type description used in error messages.
    pub fn type_name(&self) -> &'static str {
        match &self.kind {
            FieldKind::Scalar { kind, .. } => kind.as_str(),
            FieldKind::Enum { .. } => "enum",
            FieldKind::ArrayOfScalar { .. } | FieldKind::ArrayOfObject { .. } => "array",
        }
    }
}

/// Parsed schema: title, description and ordered field declarations.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SchemaModel {
    pub title: String,
    pub description: Option<String>,
    pub fields: Vec<FieldSpec>,
}

impl SchemaModel {
    pub fn field(&self, name: &str) -> Option<&FieldSpec> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|f| f.name.as_str())
    }

    pub fn required_fields(&self) -> impl Iterator<Item = &FieldSpec> {
        self.fields.iter().filter(|f| f.required)
    }

    /// Fields that declare a default, with that default.
    pub fn defaults(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.fields
            .iter()
            .filter_map(|f| f.default.as_ref().map(|d| (f.name.as_str(), d)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pattern_is_start_anchored() {
        let pattern = Pattern::new("[A-Z]{2}").unwrap();
        assert!(pattern.is_match("AB123"));
        assert!(!pattern.is_match("1AB"));
        assert_eq!(pattern.as_str(), "[A-Z]{2}");
    }

    #[test]
    fn test_float_is_number_alias() {
        assert_eq!(ScalarKind::from_type_name("float"), Some(ScalarKind::Number));
        assert_eq!(ScalarKind::from_type_name("datetime"), None);
    }
}
