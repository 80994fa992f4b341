pub mod errors;
pub mod model;
pub mod parse;

pub use errors::{SchemaError, SchemaErrorKind, SchemaLoadError};
pub use model::{
    Constraints, FieldKind, FieldSpec, ItemCount, Pattern, ScalarKind, SchemaModel,
};
pub use parse::{load_schema_from_path, parse};
