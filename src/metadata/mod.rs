//! Scene field metadata.
//!
//! A [`FieldMetadataModel`] holds one scene's field definitions, their enum
//! value sets and their linkage rules. Models are fetched from a
//! [`MetadataSource`](crate::MetadataSource) and held read-only for the
//! duration of a run; [`MetadataCache`] keeps them per process.
//!
//! # Example
//!
//! ```
//! use heddle::{FieldDefinition, FieldMetadataModel};
//!
//! let model = FieldMetadataModel::new(
//!     "scene-1",
//!     vec![FieldDefinition::new("payType", "Payment type")
//!         .required()
//!         .with_enum("1", "Annual")
//!         .with_enum("2", "Monthly")],
//! );
//!
//! assert_eq!(model.enum_values("payType").len(), 2);
//! assert!(model.find_field("missing").is_none());
//! ```

mod cache;
mod model;

pub use cache::MetadataCache;
pub(crate) use model::{lenient_string, lenient_vec};
pub use model::{
    value_to_string, DependencyAction, EnumDependency, EnumValue, FieldDefinition,
    FieldDependency, FieldMetadataModel, LinkageRule,
};
