use std::collections::BTreeMap;
use std::sync::Arc;

use rowgate_core::{Actor, AppError, AppResult};
use rowgate_domain::{
    EntityRow, FieldKind, GrantState, SortDirection, TableAction, TableDef,
};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::permission_engine::PermissionEngine;
use crate::relation_resolver::{RelationOptions, RelationResolver};
use crate::row_visibility::RowVisibilityPredicate;
use crate::store_ports::{
    EntityStore, FilterOperator, NewRow, RelationLink, RowFilter, RowPatch, RowQuery, RowSort,
};
use crate::table_catalog::{TableCatalog, TableRelations};

/// Fields managed by the system and never accepted from caller payloads.
const SYSTEM_FIELDS: &[&str] = &["id", "ownerId", "granted", "createdAt", "updatedAt"];

/// Default page size for list fetches.
const DEFAULT_PAGE_LIMIT: i64 = 50;

/// One caller-supplied search criterion. The field may be relation-qualified
/// as `RelatedTable.field`.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchTerm {
    /// Field name, optionally qualified.
    pub field: String,
    /// Comparison operator.
    pub operator: FilterOperator,
    /// Comparison value.
    pub value: Value,
}

/// Options for fetch operations.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchOptions {
    /// Maximum rows returned by `fetch_many`.
    pub limit: Option<i64>,
    /// Rows skipped for offset pagination.
    pub offset: Option<i64>,
    /// Sort field, optionally relation-qualified.
    pub order_by: Option<String>,
    /// Sort direction for `order_by`.
    pub order: SortDirection,
    /// Caller-supplied filter criteria, combined with AND.
    pub search: Vec<SearchTerm>,
    /// Relation-loading options.
    pub relations: RelationOptions,
    /// When present, only these data fields survive in returned rows.
    pub field_selection: Option<Vec<String>>,
    /// Include the permission-filtered table description in the outcome.
    pub include_schema: bool,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            limit: None,
            offset: None,
            order_by: None,
            order: SortDirection::Asc,
            search: Vec::new(),
            relations: RelationOptions::default(),
            field_selection: None,
            include_schema: false,
        }
    }
}

/// Pagination envelope of a list fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pagination {
    /// Total rows matching the predicate.
    pub total: u64,
    /// Rows in this page.
    pub count: usize,
    /// Applied limit.
    pub limit: i64,
    /// Applied offset.
    pub offset: i64,
}

/// Permission-filtered description of one declared field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDescription {
    /// Stable kind name.
    pub kind: String,
    /// Relation target table for N:1 fields.
    pub relation_target: Option<String>,
    /// Whether the field has no physical column.
    pub computed: bool,
}

/// Permission-filtered description of a table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableDescription {
    /// Declared table name.
    pub table: String,
    /// Display fields used for compact projection.
    pub display_fields: Vec<String>,
    /// Readable fields.
    pub fields: BTreeMap<String, FieldDescription>,
    /// 1:N collection names mapped to their source table.
    pub collections: BTreeMap<String, String>,
}

/// Result of a single-row fetch.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchOneOutcome {
    /// The visible, field-filtered row with relations attached.
    pub row: EntityRow,
    /// Table description when requested.
    pub schema: Option<TableDescription>,
}

/// Result of a list fetch.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchManyOutcome {
    /// Visible, field-filtered rows with relations attached.
    pub rows: Vec<EntityRow>,
    /// Pagination envelope.
    pub pagination: Pagination,
    /// Table description when requested.
    pub schema: Option<TableDescription>,
}

struct QualifiedField {
    scope: Option<String>,
    field: String,
    numeric: bool,
}

/// Single entry point composing permissions, visibility and relation
/// resolution for reads and simple mutations.
#[derive(Clone)]
pub struct EntityAccessGuard {
    catalog: TableCatalog,
    permissions: PermissionEngine,
    visibility: RowVisibilityPredicate,
    relations: RelationResolver,
    store: Arc<dyn EntityStore>,
}

impl EntityAccessGuard {
    /// Creates the guard.
    #[must_use]
    pub fn new(
        catalog: TableCatalog,
        permissions: PermissionEngine,
        visibility: RowVisibilityPredicate,
        relations: RelationResolver,
        store: Arc<dyn EntityStore>,
    ) -> Self {
        Self {
            catalog,
            permissions,
            visibility,
            relations,
            store,
        }
    }

    /// Fetches one row by id with relations resolved.
    ///
    /// An unknown table or row id is `NotFound`; a visibility denial on an
    /// existing row is `Forbidden`, since existence is confirmed first.
    pub async fn fetch_one(
        &self,
        actor: &Actor,
        table: &str,
        id: Uuid,
        options: &FetchOptions,
    ) -> AppResult<FetchOneOutcome> {
        let table = self.catalog.table(table)?;
        self.permissions
            .require(actor, table.name(), TableAction::Read)?;

        let mut row = self
            .store
            .find_row(table.name(), id)
            .await?
            .ok_or_else(|| {
                AppError::NotFound(format!("row '{id}' does not exist in '{}'", table.name()))
            })?;

        if !self.visibility.can_access_row(actor, table, &row) {
            return Err(AppError::Forbidden(format!(
                "row '{id}' in '{}' is not visible to the actor",
                table.name()
            )));
        }

        self.permissions.filter_fields(actor, table, &mut row);
        self.relations
            .resolve(actor, table, &mut row, &options.relations)
            .await?;
        apply_field_selection(&mut row, options.field_selection.as_deref());

        let schema = self.maybe_describe(actor, table, options)?;
        Ok(FetchOneOutcome { row, schema })
    }

    /// Fetches a page of rows with relations resolved and a pagination
    /// envelope computed from the same predicate.
    pub async fn fetch_many(
        &self,
        actor: &Actor,
        table: &str,
        options: &FetchOptions,
    ) -> AppResult<FetchManyOutcome> {
        let table = self.catalog.table(table)?;
        self.permissions
            .require(actor, table.name(), TableAction::Read)?;

        let limit = options.limit.unwrap_or(DEFAULT_PAGE_LIMIT);
        let offset = options.offset.unwrap_or(0);
        if limit <= 0 || offset < 0 {
            return Err(AppError::Validation(
                "limit must be positive and offset non-negative".to_owned(),
            ));
        }

        let relations = self.catalog.relations_of(table.name())?;
        let mut links: Vec<RelationLink> = Vec::new();

        let mut filters = Vec::with_capacity(options.search.len());
        for term in &options.search {
            let qualified = self.resolve_term(table, &relations, &mut links, &term.field)?;
            let value = if qualified.numeric && term.operator.is_ordering() {
                numeric_comparand(&qualified.field, &term.value)?
            } else {
                term.value.clone()
            };
            filters.push(RowFilter {
                scope: qualified.scope,
                field: qualified.field,
                numeric: qualified.numeric,
                operator: term.operator,
                value,
            });
        }

        let mut sort = Vec::new();
        if let Some(order_by) = &options.order_by {
            let qualified = self.resolve_term(table, &relations, &mut links, order_by)?;
            sort.push(RowSort {
                scope: qualified.scope,
                field: qualified.field,
                numeric: qualified.numeric,
                direction: options.order,
            });
        }

        let query = RowQuery {
            visibility: Some(self.visibility.filter(actor, table)),
            filters,
            links,
            sort,
            limit: Some(limit),
            offset: Some(offset),
        };

        let total = self.store.count_rows(table.name(), &query).await?;
        let mut rows = self.store.query_rows(table.name(), &query).await?;

        for row in &mut rows {
            self.permissions.filter_fields(actor, table, row);
            self.relations
                .resolve(actor, table, row, &options.relations)
                .await?;
            apply_field_selection(row, options.field_selection.as_deref());
        }

        let pagination = Pagination {
            total,
            count: rows.len(),
            limit,
            offset,
        };
        let schema = self.maybe_describe(actor, table, options)?;

        Ok(FetchManyOutcome {
            rows,
            pagination,
            schema,
        })
    }

    /// Creates a row: visibility starts at draft, ownership at the actor.
    pub async fn create(
        &self,
        actor: &Actor,
        table: &str,
        payload: Map<String, Value>,
    ) -> AppResult<EntityRow> {
        let table = self.catalog.table(table)?;
        self.permissions
            .require(actor, table.name(), TableAction::Create)?;

        let data = self.writable_payload(actor, table, payload, TableAction::Create)?;
        self.store
            .insert_row(
                table.name(),
                NewRow {
                    owner_subject: actor.subject().map(str::to_owned),
                    grant_state: GrantState::Draft,
                    data,
                },
            )
            .await
    }

    /// Updates a row after row-level and table-level checks. A `granted`
    /// payload member updates the visibility state; publishing additionally
    /// requires the `publish` table action.
    pub async fn update(
        &self,
        actor: &Actor,
        table: &str,
        id: Uuid,
        mut payload: Map<String, Value>,
    ) -> AppResult<EntityRow> {
        let table = self.catalog.table(table)?;
        self.permissions
            .require(actor, table.name(), TableAction::Update)?;

        let current = self
            .store
            .find_row(table.name(), id)
            .await?
            .ok_or_else(|| {
                AppError::NotFound(format!("row '{id}' does not exist in '{}'", table.name()))
            })?;
        if !self.visibility.can_access_row(actor, table, &current) {
            return Err(AppError::Forbidden(format!(
                "row '{id}' in '{}' is not visible to the actor",
                table.name()
            )));
        }

        let grant_state = match payload.remove("granted") {
            None => None,
            Some(Value::Null) => Some(GrantState::Public),
            Some(Value::String(raw)) => Some(GrantState::parse(Some(raw.as_str()))?),
            Some(_) => {
                return Err(AppError::Validation(
                    "granted must be a string or null".to_owned(),
                ));
            }
        };
        if matches!(grant_state, Some(GrantState::Published(_))) {
            self.permissions
                .require(actor, table.name(), TableAction::Publish)?;
        }

        let data = self.writable_payload(actor, table, payload, TableAction::Update)?;
        self.store
            .update_row(table.name(), id, RowPatch { data, grant_state })
            .await
    }

    /// Deletes a row outright after row-level and table-level checks.
    pub async fn delete(&self, actor: &Actor, table: &str, id: Uuid) -> AppResult<()> {
        let table = self.catalog.table(table)?;
        self.permissions
            .require(actor, table.name(), TableAction::Delete)?;

        let current = self
            .store
            .find_row(table.name(), id)
            .await?
            .ok_or_else(|| {
                AppError::NotFound(format!("row '{id}' does not exist in '{}'", table.name()))
            })?;
        if !self.visibility.can_access_row(actor, table, &current) {
            return Err(AppError::Forbidden(format!(
                "row '{id}' in '{}' is not visible to the actor",
                table.name()
            )));
        }

        self.store.delete_row(table.name(), id).await
    }

    /// Builds the permission-filtered description of a table.
    pub fn describe(&self, actor: &Actor, table: &str) -> AppResult<TableDescription> {
        let table = self.catalog.table(table)?;
        self.permissions
            .require(actor, table.name(), TableAction::Read)?;
        self.describe_table(actor, table)
    }

    fn maybe_describe(
        &self,
        actor: &Actor,
        table: &TableDef,
        options: &FetchOptions,
    ) -> AppResult<Option<TableDescription>> {
        if !options.include_schema {
            return Ok(None);
        }
        self.describe_table(actor, table).map(Some)
    }

    fn describe_table(&self, actor: &Actor, table: &TableDef) -> AppResult<TableDescription> {
        let relations = self.catalog.relations_of(table.name())?;
        let mut fields = BTreeMap::new();
        for field in table.fields().values() {
            if !self.permissions.field_readable(actor, field) {
                continue;
            }
            fields.insert(
                field.name().to_owned(),
                FieldDescription {
                    kind: field.kind().as_str().to_owned(),
                    relation_target: field
                        .kind()
                        .relation()
                        .map(|relation| relation.target_table().to_owned()),
                    computed: field.computed(),
                },
            );
        }

        let collections = relations
            .one_to_many
            .into_iter()
            .map(|(name, relation)| (name, relation.source_table))
            .collect();

        Ok(TableDescription {
            table: table.name().to_owned(),
            display_fields: table.display_fields().to_vec(),
            fields,
            collections,
        })
    }

    /// Resolves a possibly relation-qualified field term, registering the
    /// LEFT JOIN link it needs. Links are deduplicated per related table.
    fn resolve_term(
        &self,
        table: &TableDef,
        relations: &TableRelations,
        links: &mut Vec<RelationLink>,
        raw: &str,
    ) -> AppResult<QualifiedField> {
        match raw.split_once('.') {
            None => {
                let field = table.field(raw).ok_or_else(|| {
                    AppError::Validation(format!(
                        "unknown field '{raw}' on table '{}'",
                        table.name()
                    ))
                })?;
                Ok(QualifiedField {
                    scope: None,
                    field: raw.to_owned(),
                    numeric: matches!(field.kind(), FieldKind::Number),
                })
            }
            Some((related, field_name)) => {
                let related = self.catalog.resolve_table_name(related).map_err(|_| {
                    AppError::Validation(format!("unknown table '{related}' in term '{raw}'"))
                })?;

                let link_relation = relations
                    .many_to_one
                    .values()
                    .find(|relation| relation.target_table == related)
                    .ok_or_else(|| {
                        AppError::Validation(format!(
                            "table '{}' has no relation field targeting '{related}'",
                            table.name()
                        ))
                    })?;

                let related_table = self.catalog.table(related)?;
                let field = related_table.field(field_name).ok_or_else(|| {
                    AppError::Validation(format!(
                        "unknown field '{field_name}' on table '{related}'"
                    ))
                })?;

                if !links.iter().any(|link| link.alias == related) {
                    links.push(RelationLink {
                        alias: related.to_owned(),
                        target_table: related.to_owned(),
                        relation_field: link_relation.field.clone(),
                    });
                }

                Ok(QualifiedField {
                    scope: Some(related.to_owned()),
                    field: field_name.to_owned(),
                    numeric: matches!(field.kind(), FieldKind::Number),
                })
            }
        }
    }

    /// Keeps the writable declared fields of a payload: system fields and
    /// undeclared keys are stripped silently, computed fields never reach
    /// storage, and field-level grants are enforced. Updates additionally
    /// strip ordering columns, which only reordering may assign.
    fn writable_payload(
        &self,
        actor: &Actor,
        table: &TableDef,
        payload: Map<String, Value>,
        action: TableAction,
    ) -> AppResult<Map<String, Value>> {
        let ordering_columns: Vec<&str> = if matches!(action, TableAction::Update) {
            table
                .fields()
                .values()
                .filter_map(|field| field.kind().relation().and_then(|relation| relation.orderable()))
                .collect()
        } else {
            Vec::new()
        };

        let mut data = Map::new();
        for (name, value) in payload {
            if SYSTEM_FIELDS.contains(&name.as_str()) || name.starts_with('_') {
                continue;
            }
            let Some(field) = table.field(&name) else {
                continue;
            };
            if field.computed() {
                continue;
            }
            if ordering_columns.contains(&name.as_str()) {
                continue;
            }
            if !self.permissions.field_writable(actor, field, action) {
                return Err(AppError::Forbidden(format!(
                    "field '{}.{name}' is not writable by the actor",
                    table.name()
                )));
            }
            data.insert(name, value);
        }
        Ok(data)
    }
}

/// Normalizes the comparison value of an ordering filter on a numeric field.
/// String digits are accepted and coerced; anything non-numeric is rejected
/// before it can reach a store as a malformed cast.
fn numeric_comparand(field: &str, value: &Value) -> AppResult<Value> {
    match value {
        Value::Number(_) => Ok(value.clone()),
        Value::String(text) => text
            .trim()
            .parse::<f64>()
            .ok()
            .and_then(serde_json::Number::from_f64)
            .map(Value::Number)
            .ok_or_else(|| {
                AppError::Validation(format!(
                    "field '{field}' is numeric; '{text}' is not a number"
                ))
            }),
        other => Err(AppError::Validation(format!(
            "field '{field}' is numeric; cannot compare it against {other}"
        ))),
    }
}

fn apply_field_selection(row: &mut EntityRow, selection: Option<&[String]>) {
    if let Some(selection) = selection {
        row.retain_fields(|name| selection.iter().any(|kept| kept == name));
    }
}
