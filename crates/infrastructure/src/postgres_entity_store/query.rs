use std::collections::BTreeMap;

use rowgate_application::{FilterOperator, RowFilter, RowSort, SqlCondition};
use rowgate_domain::SortDirection;
use sqlx::{Postgres, QueryBuilder};

use super::*;

const ROOT_ALIAS: &str = "entity_root";

impl PostgresEntityStore {
    pub(super) async fn find_row_impl(&self, table: &str, id: Uuid) -> AppResult<Option<EntityRow>> {
        let row = sqlx::query_as::<_, StoredRow>(
            r#"
            SELECT id, table_name, owner_subject, granted, created_at, updated_at, data
            FROM entity_rows
            WHERE table_name = $1 AND id = $2
            "#,
        )
        .bind(table)
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|error| {
            AppError::Internal(format!(
                "failed to find row '{id}' in table '{table}': {error}"
            ))
        })?;

        row.map(entity_row_from_stored).transpose()
    }

    pub(super) async fn query_rows_impl(
        &self,
        table: &str,
        query: &RowQuery,
    ) -> AppResult<Vec<EntityRow>> {
        let mut builder: QueryBuilder<'_, Postgres> = QueryBuilder::new(
            "SELECT entity_root.id, entity_root.table_name, entity_root.owner_subject, \
             entity_root.granted, entity_root.created_at, entity_root.updated_at, \
             entity_root.data FROM entity_rows entity_root",
        );

        let scope_aliases = push_links(&mut builder, query);
        push_predicate(&mut builder, table, query, &scope_aliases)?;

        if query.sort.is_empty() {
            builder.push(" ORDER BY entity_root.created_at DESC");
        } else {
            builder.push(" ORDER BY ");
            for (index, sort) in query.sort.iter().enumerate() {
                if index > 0 {
                    builder.push(", ");
                }
                let scope_alias = resolve_scope_alias(&scope_aliases, sort.scope.as_deref())?;
                push_sort_clause(&mut builder, sort, scope_alias);
            }
            builder.push(", entity_root.created_at DESC");
        }

        if let Some(limit) = query.limit {
            builder.push(" LIMIT ");
            builder.push_bind(limit);
        }
        if let Some(offset) = query.offset {
            builder.push(" OFFSET ");
            builder.push_bind(offset);
        }

        let rows = builder
            .build_query_as::<StoredRow>()
            .fetch_all(&self.pool)
            .await
            .map_err(|error| {
                AppError::Internal(format!("failed to query rows of table '{table}': {error}"))
            })?;

        rows.into_iter().map(entity_row_from_stored).collect()
    }

    pub(super) async fn count_rows_impl(&self, table: &str, query: &RowQuery) -> AppResult<u64> {
        let mut builder: QueryBuilder<'_, Postgres> =
            QueryBuilder::new("SELECT COUNT(*) FROM entity_rows entity_root");

        let scope_aliases = push_links(&mut builder, query);
        push_predicate(&mut builder, table, query, &scope_aliases)?;

        let count: i64 = builder
            .build_query_scalar()
            .fetch_one(&self.pool)
            .await
            .map_err(|error| {
                AppError::Internal(format!("failed to count rows of table '{table}': {error}"))
            })?;

        u64::try_from(count).map_err(|error| {
            AppError::Internal(format!("row count of table '{table}' out of range: {error}"))
        })
    }
}

fn push_links(builder: &mut QueryBuilder<'_, Postgres>, query: &RowQuery) -> BTreeMap<String, String> {
    let mut scope_aliases = BTreeMap::new();

    for (index, link) in query.links.iter().enumerate() {
        let table_alias = format!("entity_link_{index}");
        builder.push(" LEFT JOIN entity_rows ");
        builder.push(table_alias.as_str());
        builder.push(" ON ");
        builder.push(table_alias.as_str());
        builder.push(".table_name = ");
        builder.push_bind(link.target_table.clone());
        builder.push(" AND ");
        builder.push(table_alias.as_str());
        builder.push(".id::text = entity_root.data ->> ");
        builder.push_bind(link.relation_field.clone());

        scope_aliases.insert(link.alias.clone(), table_alias);
    }

    scope_aliases
}

fn push_predicate(
    builder: &mut QueryBuilder<'_, Postgres>,
    table: &str,
    query: &RowQuery,
    scope_aliases: &BTreeMap<String, String>,
) -> AppResult<()> {
    builder.push(" WHERE entity_root.table_name = ");
    builder.push_bind(table.to_owned());

    if let Some(visibility) = &query.visibility {
        builder.push(" AND ");
        push_condition(builder, &visibility.to_sql_qualified(ROOT_ALIAS, None))?;
    }

    for filter in &query.filters {
        builder.push(" AND ");
        let scope_alias = resolve_scope_alias(scope_aliases, filter.scope.as_deref())?;
        push_filter_condition(builder, filter, scope_alias);
    }

    Ok(())
}

fn resolve_scope_alias<'a>(
    scope_aliases: &'a BTreeMap<String, String>,
    scope: Option<&str>,
) -> AppResult<&'a str> {
    match scope {
        None => Ok(ROOT_ALIAS),
        Some(scope) => scope_aliases
            .get(scope)
            .map(String::as_str)
            .ok_or_else(|| {
                AppError::Internal(format!("query names an unlinked scope alias '{scope}'"))
            }),
    }
}

/// Interpolates a parameterized condition into the builder, replacing each
/// `?` placeholder with a bound parameter.
fn push_condition(
    builder: &mut QueryBuilder<'_, Postgres>,
    condition: &SqlCondition,
) -> AppResult<()> {
    let pieces: Vec<&str> = condition.fragment().split('?').collect();
    let mut params = condition.params().iter();

    for (index, piece) in pieces.iter().enumerate() {
        builder.push(*piece);
        if index + 1 < pieces.len() {
            let param = params.next().ok_or_else(|| {
                AppError::Internal(
                    "condition fragment names more placeholders than parameters".to_owned(),
                )
            })?;
            match param {
                Value::String(text) => builder.push_bind(text.clone()),
                other => builder.push_bind(other.to_string()),
            };
        }
    }

    if params.next().is_some() {
        return Err(AppError::Internal(
            "condition carries more parameters than placeholders".to_owned(),
        ));
    }

    Ok(())
}

fn push_filter_condition(
    builder: &mut QueryBuilder<'_, Postgres>,
    filter: &RowFilter,
    scope_alias: &str,
) {
    match filter.operator {
        FilterOperator::Eq => {
            builder.push(scope_alias);
            builder.push(".data -> ");
            builder.push_bind(filter.field.clone());
            builder.push(" = ");
            builder.push_bind(filter.value.clone());
        }
        FilterOperator::Neq => {
            builder.push(scope_alias);
            builder.push(".data -> ");
            builder.push_bind(filter.field.clone());
            builder.push(" <> ");
            builder.push_bind(filter.value.clone());
        }
        FilterOperator::Gt
        | FilterOperator::Gte
        | FilterOperator::Lt
        | FilterOperator::Lte => {
            let operator = match filter.operator {
                FilterOperator::Gt => ">",
                FilterOperator::Gte => ">=",
                FilterOperator::Lt => "<",
                FilterOperator::Lte => "<=",
                _ => unreachable!(),
            };

            if filter.numeric {
                builder.push("(");
                builder.push(scope_alias);
                builder.push(".data ->> ");
                builder.push_bind(filter.field.clone());
                builder.push(")::NUMERIC ");
                builder.push(operator);
                builder.push(" (");
                builder.push_bind(filter.value.to_string());
                builder.push(")::NUMERIC");
            } else {
                builder.push(scope_alias);
                builder.push(".data ->> ");
                builder.push_bind(filter.field.clone());
                builder.push(' ');
                builder.push(operator);
                builder.push(' ');
                builder.push_bind(filter.value.as_str().unwrap_or_default().to_owned());
            }
        }
        FilterOperator::Contains => {
            let needle = escape_like(filter.value.as_str().unwrap_or_default());
            builder.push(scope_alias);
            builder.push(".data ->> ");
            builder.push_bind(filter.field.clone());
            builder.push(" ILIKE ");
            builder.push_bind(format!("%{needle}%"));
            builder.push(" ESCAPE '\\'");
        }
        FilterOperator::In => {
            let values = filter.value.as_array().cloned().unwrap_or_default();
            builder.push('(');
            if values.is_empty() {
                builder.push("FALSE");
            }
            for (index, value) in values.iter().enumerate() {
                if index > 0 {
                    builder.push(" OR ");
                }
                builder.push(scope_alias);
                builder.push(".data -> ");
                builder.push_bind(filter.field.clone());
                builder.push(" = ");
                builder.push_bind(value.clone());
            }
            builder.push(')');
        }
    }
}

/// Escapes `LIKE` metacharacters so the needle always matches as a literal
/// substring.
fn escape_like(needle: &str) -> String {
    let mut escaped = String::with_capacity(needle.len());
    for ch in needle.chars() {
        if matches!(ch, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(ch);
    }
    escaped
}

fn push_sort_clause(builder: &mut QueryBuilder<'_, Postgres>, sort: &RowSort, scope_alias: &str) {
    if sort.numeric {
        builder.push("(");
        builder.push(scope_alias);
        builder.push(".data ->> ");
        builder.push_bind(sort.field.clone());
        builder.push(")::NUMERIC");
    } else {
        builder.push(scope_alias);
        builder.push(".data ->> ");
        builder.push_bind(sort.field.clone());
    }

    builder.push(' ');
    match sort.direction {
        SortDirection::Asc => builder.push("ASC"),
        SortDirection::Desc => builder.push("DESC"),
    };
}
