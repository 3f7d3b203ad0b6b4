use std::sync::Arc;

use rowgate_core::{Actor, AppError, AppResult};
use rowgate_domain::{
    EntityRow, FieldKind, RelatedEntities, RelationSort, TableAction, TableDef,
};
use serde_json::Value;
use uuid::Uuid;

use crate::permission_engine::PermissionEngine;
use crate::row_visibility::RowVisibilityPredicate;
use crate::store_ports::{EntityStore, RowFilter, RowQuery, RowSort};
use crate::table_catalog::{ManyToOneRelation, OneToManyRelation, TableCatalog};

/// Which relations a caller asked for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelationRequest {
    /// Default policy: readable N:1 relations plus Strong 1:N relations.
    Default,
    /// Every declared relation the actor may read.
    All,
    /// An explicit list of relation names.
    Named(Vec<String>),
}

impl RelationRequest {
    /// Parses the caller-facing relation parameter: absent means the default
    /// policy, `all` means everything, anything else is a comma-separated
    /// name list.
    #[must_use]
    pub fn parse(raw: Option<&str>) -> Self {
        match raw.map(str::trim) {
            None | Some("") => Self::Default,
            Some(value) if value.eq_ignore_ascii_case("all") => Self::All,
            Some(value) => {
                let names: Vec<String> = value
                    .split(',')
                    .map(str::trim)
                    .filter(|name| !name.is_empty())
                    .map(str::to_owned)
                    .collect();
                if names.is_empty() {
                    Self::Default
                } else {
                    Self::Named(names)
                }
            }
        }
    }
}

/// Options for one relation-resolution pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelationOptions {
    /// Requested relation set.
    pub request: RelationRequest,
    /// Project related entities to their compact display form.
    pub compact: bool,
    /// Expand one level of N:1 relations inside loaded 1:N children.
    pub expand_nested: bool,
}

impl Default for RelationOptions {
    fn default() -> Self {
        Self {
            request: RelationRequest::Default,
            compact: false,
            expand_nested: true,
        }
    }
}

/// Loads related entities for a row: N:1 single targets, 1:N collections,
/// and one nested N:1 hop inside loaded children.
#[derive(Clone)]
pub struct RelationResolver {
    catalog: TableCatalog,
    permissions: PermissionEngine,
    visibility: RowVisibilityPredicate,
    store: Arc<dyn EntityStore>,
}

impl RelationResolver {
    /// Creates a relation resolver.
    #[must_use]
    pub fn new(
        catalog: TableCatalog,
        permissions: PermissionEngine,
        visibility: RowVisibilityPredicate,
        store: Arc<dyn EntityStore>,
    ) -> Self {
        Self {
            catalog,
            permissions,
            visibility,
            store,
        }
    }

    /// Resolves the requested relations and attaches them to the row.
    ///
    /// Relations the actor may not traverse, empty collections and absent
    /// targets are omitted silently; only an unknown name in an explicit
    /// request is an error.
    pub async fn resolve(
        &self,
        actor: &Actor,
        table: &TableDef,
        row: &mut EntityRow,
        options: &RelationOptions,
    ) -> AppResult<()> {
        let relations = self.catalog.relations_of(table.name())?;

        let mut many_to_one: Vec<&ManyToOneRelation> = Vec::new();
        let mut one_to_many: Vec<&OneToManyRelation> = Vec::new();

        match &options.request {
            RelationRequest::Named(names) => {
                for name in names {
                    if let Some(relation) = relations.many_to_one.get(name) {
                        if self.readable(actor, &relation.target_table)? {
                            many_to_one.push(relation);
                        }
                    } else if let Some(relation) = relations.one_to_many.get(name) {
                        if self.readable(actor, &relation.source_table)? {
                            one_to_many.push(relation);
                        }
                    } else {
                        return Err(AppError::Validation(format!(
                            "unknown relation '{name}' on table '{}'",
                            table.name()
                        )));
                    }
                }
            }
            RelationRequest::All | RelationRequest::Default => {
                for relation in relations.many_to_one.values() {
                    if self.readable(actor, &relation.target_table)? {
                        many_to_one.push(relation);
                    }
                }
                for relation in relations.one_to_many.values() {
                    // The default policy carries every Strong collection and
                    // leaves filtering to per-row visibility, so a public or
                    // published child loads even when the actor cannot read
                    // the child table wholesale.
                    let wanted = match options.request {
                        RelationRequest::All => self.readable(actor, &relation.source_table)?,
                        _ => relation.strength == rowgate_domain::RelationStrength::Strong,
                    };
                    if wanted {
                        one_to_many.push(relation);
                    }
                }
            }
        }

        for relation in many_to_one {
            if let Some(target) = self
                .load_many_to_one(actor, relation, row, options.compact)
                .await?
            {
                row.attach_relation(relation.field.clone(), RelatedEntities::One(target));
            }
        }

        for relation in one_to_many {
            let children = self
                .load_one_to_many(actor, table, relation, row, options)
                .await?;
            if !children.is_empty() {
                row.attach_relation(relation.name.clone(), RelatedEntities::Many(children));
            }
        }

        Ok(())
    }

    async fn load_many_to_one(
        &self,
        actor: &Actor,
        relation: &ManyToOneRelation,
        source: &EntityRow,
        compact: bool,
    ) -> AppResult<Option<EntityRow>> {
        let Some(foreign_value) = foreign_key_value(source.field(&relation.field)) else {
            return Ok(None);
        };

        let target_table = self.catalog.table(&relation.target_table)?;
        let target = if relation.foreign_key == "id" {
            let Ok(id) = Uuid::parse_str(&foreign_value) else {
                return Ok(None);
            };
            self.store.find_row(target_table.name(), id).await?
        } else {
            let query = RowQuery {
                filters: vec![RowFilter::eq(
                    relation.foreign_key.clone(),
                    Value::String(foreign_value),
                )],
                limit: Some(1),
                ..RowQuery::default()
            };
            self.store
                .query_rows(target_table.name(), &query)
                .await?
                .into_iter()
                .next()
        };

        let Some(mut target) = target else {
            return Ok(None);
        };

        if !self.visibility.can_access_row(actor, target_table, &target) {
            return Ok(None);
        }

        self.permissions.filter_fields(actor, target_table, &mut target);
        if compact {
            target = target.into_compact(target_table.display_fields());
        }

        Ok(Some(target))
    }

    async fn load_one_to_many(
        &self,
        actor: &Actor,
        origin: &TableDef,
        relation: &OneToManyRelation,
        parent: &EntityRow,
        options: &RelationOptions,
    ) -> AppResult<Vec<EntityRow>> {
        let Some(parent_key) = parent_key_value(parent, &relation.foreign_key) else {
            return Ok(Vec::new());
        };

        let child_table = self.catalog.table(&relation.source_table)?;
        let query = RowQuery {
            visibility: Some(self.visibility.filter(actor, child_table)),
            filters: vec![RowFilter::eq(
                relation.source_field.clone(),
                Value::String(parent_key),
            )],
            sort: relation_sorts(child_table, &relation.default_sort),
            ..RowQuery::default()
        };

        let mut children = self.store.query_rows(child_table.name(), &query).await?;
        let nested = if options.expand_nested && !options.compact {
            Some(self.catalog.relations_of(child_table.name())?)
        } else {
            None
        };

        let mut loaded = Vec::with_capacity(children.len());
        for mut child in children.drain(..) {
            self.permissions.filter_fields(actor, child_table, &mut child);

            if options.compact {
                loaded.push(child.into_compact(child_table.display_fields()));
                continue;
            }

            if let Some(nested) = &nested {
                for nested_relation in nested.many_to_one.values() {
                    // Never re-embed the table the expansion started from.
                    if nested_relation.target_table == origin.name() {
                        continue;
                    }
                    if !self.readable(actor, &nested_relation.target_table)? {
                        continue;
                    }
                    if let Some(target) = self
                        .load_many_to_one(actor, nested_relation, &child, false)
                        .await?
                    {
                        child.attach_relation(
                            nested_relation.field.clone(),
                            RelatedEntities::One(target),
                        );
                    }
                }
            }

            loaded.push(child);
        }

        Ok(loaded)
    }

    fn readable(&self, actor: &Actor, table: &str) -> AppResult<bool> {
        self.permissions.can_perform(actor, table, TableAction::Read)
    }
}

fn relation_sorts(child_table: &TableDef, sorts: &[RelationSort]) -> Vec<RowSort> {
    sorts
        .iter()
        .map(|sort| RowSort {
            scope: None,
            field: sort.field().to_owned(),
            numeric: matches!(
                child_table.field(sort.field()).map(|field| field.kind()),
                Some(FieldKind::Number)
            ),
            direction: sort.direction(),
        })
        .collect()
}

/// Extracts a usable foreign-key value; null, empty and zero never trigger a
/// fetch.
fn foreign_key_value(value: Option<&Value>) -> Option<String> {
    match value {
        Some(Value::String(text)) if !text.trim().is_empty() && text != "0" => {
            Some(text.clone())
        }
        Some(Value::Number(number)) if number.as_i64() != Some(0) => Some(number.to_string()),
        _ => None,
    }
}

fn parent_key_value(parent: &EntityRow, foreign_key: &str) -> Option<String> {
    if foreign_key == "id" {
        return Some(parent.id().to_string());
    }
    foreign_key_value(parent.field(foreign_key))
}
