use std::cmp::Ordering;
use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use rowgate_application::{
    EntityStore, FilterOperator, NewRow, RowFilter, RowPatch, RowQuery,
};
use rowgate_core::{AppError, AppResult};
use rowgate_domain::{EntityRow, SortDirection};
use serde_json::Value;
use tokio::sync::RwLock;
use uuid::Uuid;

#[cfg(test)]
mod tests;

/// In-memory entity store implementation.
///
/// Mirrors the query semantics of the PostgreSQL store closely enough to
/// back the service layer in tests: visibility gating, scoped filters
/// resolved through relation links, numeric-aware sorting and pagination.
#[derive(Debug, Default)]
pub struct InMemoryEntityStore {
    rows: RwLock<HashMap<(String, Uuid), EntityRow>>,
}

impl InMemoryEntityStore {
    /// Creates an empty in-memory store.
    #[must_use]
    pub fn new() -> Self {
        Self {
            rows: RwLock::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl EntityStore for InMemoryEntityStore {
    async fn find_row(&self, table: &str, id: Uuid) -> AppResult<Option<EntityRow>> {
        let rows = self.rows.read().await;
        Ok(rows.get(&(table.to_owned(), id)).cloned())
    }

    async fn query_rows(&self, table: &str, query: &RowQuery) -> AppResult<Vec<EntityRow>> {
        let rows = self.rows.read().await;
        let mut matched = matching_rows(&rows, table, query)?;

        sort_rows(&rows, query, &mut matched)?;

        let offset = usize::try_from(query.offset.unwrap_or(0)).unwrap_or(0);
        let mut page: Vec<EntityRow> = matched.into_iter().skip(offset).collect();
        if let Some(limit) = query.limit {
            page.truncate(usize::try_from(limit).unwrap_or(usize::MAX));
        }

        Ok(page)
    }

    async fn count_rows(&self, table: &str, query: &RowQuery) -> AppResult<u64> {
        let rows = self.rows.read().await;
        let matched = matching_rows(&rows, table, query)?;
        Ok(matched.len() as u64)
    }

    async fn insert_row(&self, table: &str, row: NewRow) -> AppResult<EntityRow> {
        let built = build_row(table, row)?;
        let mut rows = self.rows.write().await;
        rows.insert((table.to_owned(), built.id()), built.clone());
        Ok(built)
    }

    async fn insert_rows(&self, table: &str, rows: Vec<NewRow>) -> AppResult<Vec<EntityRow>> {
        // Build every row before touching the map so a bad payload writes
        // nothing at all.
        let built = rows
            .into_iter()
            .map(|row| build_row(table, row))
            .collect::<AppResult<Vec<EntityRow>>>()?;

        let mut stored = self.rows.write().await;
        for row in &built {
            stored.insert((table.to_owned(), row.id()), row.clone());
        }

        Ok(built)
    }

    async fn update_row(&self, table: &str, id: Uuid, patch: RowPatch) -> AppResult<EntityRow> {
        let mut rows = self.rows.write().await;
        let key = (table.to_owned(), id);
        let Some(existing) = rows.get(&key).cloned() else {
            return Err(AppError::NotFound(format!(
                "row '{id}' does not exist in '{table}'"
            )));
        };

        let mut data = existing.data().clone();
        for (name, value) in patch.data {
            data.insert(name, value);
        }

        let granted = match patch.grant_state {
            Some(state) => state.as_stored(),
            None => existing.grant_state().as_stored(),
        };

        let updated = EntityRow::from_stored(
            existing.id(),
            table,
            existing.owner_subject().map(str::to_owned),
            granted.as_deref(),
            existing.created_at(),
            Utc::now(),
            Value::Object(data),
        )?;

        rows.insert(key, updated.clone());
        Ok(updated)
    }

    async fn delete_row(&self, table: &str, id: Uuid) -> AppResult<()> {
        let mut rows = self.rows.write().await;
        if rows.remove(&(table.to_owned(), id)).is_none() {
            return Err(AppError::NotFound(format!(
                "row '{id}' does not exist in '{table}'"
            )));
        }
        Ok(())
    }

    async fn write_positions(
        &self,
        table: &str,
        order_field: &str,
        assignments: &[(Uuid, i64)],
    ) -> AppResult<()> {
        let mut rows = self.rows.write().await;

        // Verify the full set first so a missing row writes nothing.
        for (id, _) in assignments {
            if !rows.contains_key(&(table.to_owned(), *id)) {
                return Err(AppError::Transaction(format!(
                    "row '{id}' disappeared while writing positions in '{table}'"
                )));
            }
        }

        for (id, position) in assignments {
            let key = (table.to_owned(), *id);
            let Some(existing) = rows.get(&key).cloned() else {
                continue;
            };
            let mut data = existing.data().clone();
            data.insert(order_field.to_owned(), Value::from(*position));

            let updated = EntityRow::from_stored(
                existing.id(),
                table,
                existing.owner_subject().map(str::to_owned),
                existing.grant_state().as_stored().as_deref(),
                existing.created_at(),
                Utc::now(),
                Value::Object(data),
            )?;
            rows.insert(key, updated);
        }

        Ok(())
    }
}

fn build_row(table: &str, row: NewRow) -> AppResult<EntityRow> {
    let now = Utc::now();
    EntityRow::from_stored(
        Uuid::new_v4(),
        table,
        row.owner_subject,
        row.grant_state.as_stored().as_deref(),
        now,
        now,
        Value::Object(row.data),
    )
}

fn matching_rows(
    rows: &HashMap<(String, Uuid), EntityRow>,
    table: &str,
    query: &RowQuery,
) -> AppResult<Vec<EntityRow>> {
    let mut matched = Vec::new();

    for ((stored_table, _), row) in rows {
        if stored_table != table {
            continue;
        }
        if let Some(visibility) = &query.visibility
            && !visibility.allows(row)
        {
            continue;
        }
        if row_matches_filters(rows, query, row)? {
            matched.push(row.clone());
        }
    }

    Ok(matched)
}

fn row_matches_filters(
    rows: &HashMap<(String, Uuid), EntityRow>,
    query: &RowQuery,
    row: &EntityRow,
) -> AppResult<bool> {
    for filter in &query.filters {
        let value = scoped_value(rows, query, row, filter.scope.as_deref(), &filter.field)?;
        if !filter_matches(value.as_ref(), filter) {
            return Ok(false);
        }
    }
    Ok(true)
}

/// Resolves a field value through the query's relation links, mirroring the
/// LEFT JOIN the SQL store would emit. A broken or absent link yields no
/// value.
fn scoped_value(
    rows: &HashMap<(String, Uuid), EntityRow>,
    query: &RowQuery,
    row: &EntityRow,
    scope: Option<&str>,
    field: &str,
) -> AppResult<Option<Value>> {
    let Some(scope) = scope else {
        return Ok(row.field(field).cloned());
    };

    let link = query
        .links
        .iter()
        .find(|link| link.alias == scope)
        .ok_or_else(|| {
            AppError::Internal(format!("query names an unlinked scope alias '{scope}'"))
        })?;

    let Some(Value::String(foreign_value)) = row.field(&link.relation_field) else {
        return Ok(None);
    };
    let Ok(target_id) = Uuid::parse_str(foreign_value) else {
        return Ok(None);
    };

    let linked = rows.get(&(link.target_table.clone(), target_id));
    Ok(linked.and_then(|linked| linked.field(field).cloned()))
}

fn filter_matches(value: Option<&Value>, filter: &RowFilter) -> bool {
    match filter.operator {
        FilterOperator::Eq => value == Some(&filter.value),
        FilterOperator::Neq => value.is_some() && value != Some(&filter.value),
        FilterOperator::Gt => compare_ordering(value, filter).is_some_and(Ordering::is_gt),
        FilterOperator::Gte => compare_ordering(value, filter).is_some_and(Ordering::is_ge),
        FilterOperator::Lt => compare_ordering(value, filter).is_some_and(Ordering::is_lt),
        FilterOperator::Lte => compare_ordering(value, filter).is_some_and(Ordering::is_le),
        FilterOperator::Contains => match (value.and_then(Value::as_str), filter.value.as_str()) {
            (Some(haystack), Some(needle)) => haystack
                .to_ascii_lowercase()
                .contains(&needle.to_ascii_lowercase()),
            _ => false,
        },
        FilterOperator::In => match (value, filter.value.as_array()) {
            (Some(value), Some(candidates)) => candidates.contains(value),
            _ => false,
        },
    }
}

fn compare_ordering(value: Option<&Value>, filter: &RowFilter) -> Option<Ordering> {
    let value = value?;
    if filter.numeric {
        let left = as_number(value)?;
        let right = as_number(&filter.value)?;
        left.partial_cmp(&right)
    } else {
        let left = value.as_str()?;
        let right = filter.value.as_str()?;
        Some(left.cmp(right))
    }
}

fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(number) => number.as_f64(),
        Value::String(text) => text.trim().parse().ok(),
        _ => None,
    }
}

fn sort_rows(
    rows: &HashMap<(String, Uuid), EntityRow>,
    query: &RowQuery,
    matched: &mut [EntityRow],
) -> AppResult<()> {
    let mut keyed: Vec<(Uuid, Vec<Option<Value>>)> = Vec::with_capacity(matched.len());
    for row in matched.iter() {
        let mut keys = Vec::with_capacity(query.sort.len());
        for sort in &query.sort {
            keys.push(scoped_value(rows, query, row, sort.scope.as_deref(), &sort.field)?);
        }
        keyed.push((row.id(), keys));
    }
    let keys: HashMap<Uuid, Vec<Option<Value>>> = keyed.into_iter().collect();

    matched.sort_by(|left, right| {
        for (index, sort) in query.sort.iter().enumerate() {
            let left_key = keys.get(&left.id()).and_then(|keys| keys.get(index));
            let right_key = keys.get(&right.id()).and_then(|keys| keys.get(index));
            let ordering = compare_keys(
                left_key.and_then(Option::as_ref),
                right_key.and_then(Option::as_ref),
                sort.numeric,
            );
            let ordering = match sort.direction {
                SortDirection::Asc => ordering,
                SortDirection::Desc => ordering.reverse(),
            };
            if ordering != Ordering::Equal {
                return ordering;
            }
        }

        // Stable fallback matching the SQL store's default ordering.
        right
            .created_at()
            .cmp(&left.created_at())
            .then_with(|| left.id().cmp(&right.id()))
    });

    Ok(())
}

fn compare_keys(left: Option<&Value>, right: Option<&Value>, numeric: bool) -> Ordering {
    match (left, right) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Greater,
        (Some(_), None) => Ordering::Less,
        (Some(left), Some(right)) => {
            if numeric {
                match (as_number(left), as_number(right)) {
                    (Some(left), Some(right)) => {
                        left.partial_cmp(&right).unwrap_or(Ordering::Equal)
                    }
                    _ => Ordering::Equal,
                }
            } else {
                let left = value_sort_text(left);
                let right = value_sort_text(right);
                left.cmp(&right)
            }
        }
    }
}

fn value_sort_text(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}
