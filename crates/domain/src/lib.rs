//! Domain entities and invariants.

#![forbid(unsafe_code)]

mod record;
mod role;
mod schema;

pub use record::{EntityRow, GrantState, RelatedEntities};
pub use role::{PUBLIC_ROLE, RoleDefinition, RoleGraph};
pub use schema::{
    FieldDef, FieldKind, GrantMap, RelationField, RelationSort, RelationStrength, Schema,
    SortDirection, TableAction, TableDef,
};
