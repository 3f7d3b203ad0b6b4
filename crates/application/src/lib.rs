//! Application services and ports.

#![forbid(unsafe_code)]

mod duplication_service;
mod entity_access;
mod permission_engine;
mod relation_resolver;
mod reorder_service;
mod role_resolver;
mod row_visibility;
mod store_ports;
mod table_catalog;

pub use duplication_service::{DuplicationOutcome, DuplicationService, RelationCloneOutcome};
pub use entity_access::{
    EntityAccessGuard, FetchManyOutcome, FetchOneOutcome, FetchOptions, FieldDescription,
    Pagination, SearchTerm, TableDescription,
};
pub use permission_engine::PermissionEngine;
pub use relation_resolver::{RelationOptions, RelationRequest, RelationResolver};
pub use reorder_service::ReorderService;
pub use role_resolver::ActorRoleResolver;
pub use row_visibility::{RowVisibilityPredicate, SqlCondition, VisibilityFilter};
pub use store_ports::{
    EntityStore, FilterOperator, NewRow, RelationLink, RowFilter, RowPatch, RowQuery, RowSort,
};
pub use table_catalog::{ManyToOneRelation, OneToManyRelation, TableCatalog, TableRelations};
