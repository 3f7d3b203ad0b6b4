use std::str::FromStr;

use async_trait::async_trait;
use rowgate_core::{AppError, AppResult};
use rowgate_domain::{EntityRow, GrantState, SortDirection};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::row_visibility::VisibilityFilter;

/// Comparison operators accepted in caller-supplied filters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterOperator {
    /// Exact equality.
    Eq,
    /// Inequality.
    Neq,
    /// Greater than.
    Gt,
    /// Greater than or equal.
    Gte,
    /// Less than.
    Lt,
    /// Less than or equal.
    Lte,
    /// Case-insensitive substring match.
    Contains,
    /// Membership in a value list.
    In,
}

impl FilterOperator {
    /// Returns whether the operator compares magnitudes.
    #[must_use]
    pub fn is_ordering(self) -> bool {
        matches!(self, Self::Gt | Self::Gte | Self::Lt | Self::Lte)
    }
}

impl FromStr for FilterOperator {
    type Err = AppError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "eq" => Ok(Self::Eq),
            "neq" => Ok(Self::Neq),
            "gt" => Ok(Self::Gt),
            "gte" => Ok(Self::Gte),
            "lt" => Ok(Self::Lt),
            "lte" => Ok(Self::Lte),
            "contains" => Ok(Self::Contains),
            "in" => Ok(Self::In),
            _ => Err(AppError::Validation(format!(
                "unknown filter operator '{value}'"
            ))),
        }
    }
}

/// One structured filter applied to a row query.
#[derive(Debug, Clone, PartialEq)]
pub struct RowFilter {
    /// Relation link alias scoping the filter, `None` for the root table.
    pub scope: Option<String>,
    /// Field name inside the scoped table's data.
    pub field: String,
    /// Whether comparisons should use numeric semantics.
    pub numeric: bool,
    /// Comparison operator.
    pub operator: FilterOperator,
    /// Comparison value.
    pub value: Value,
}

impl RowFilter {
    /// Creates an unscoped equality filter.
    #[must_use]
    pub fn eq(field: impl Into<String>, value: Value) -> Self {
        Self {
            scope: None,
            field: field.into(),
            numeric: false,
            operator: FilterOperator::Eq,
            value,
        }
    }
}

/// One sort criterion of a row query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowSort {
    /// Relation link alias scoping the sort, `None` for the root table.
    pub scope: Option<String>,
    /// Field name inside the scoped table's data.
    pub field: String,
    /// Whether ordering should use numeric semantics.
    pub numeric: bool,
    /// Sort direction.
    pub direction: SortDirection,
}

/// A LEFT JOIN to a related table, resolved through an N:1 field of the root
/// table and deduplicated per related table across sort/search criteria.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelationLink {
    /// Scope alias referenced by filters and sorts.
    pub alias: String,
    /// Related table joined to.
    pub target_table: String,
    /// N:1 field on the root table holding the foreign key.
    pub relation_field: String,
}

/// Structured inputs for a row query.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RowQuery {
    /// Row visibility filter; `None` skips the visibility gate entirely and
    /// is reserved for internal validation reads.
    pub visibility: Option<VisibilityFilter>,
    /// Filters combined with logical AND.
    pub filters: Vec<RowFilter>,
    /// Relation links backing scoped filters and sorts.
    pub links: Vec<RelationLink>,
    /// Sort criteria, applied in order.
    pub sort: Vec<RowSort>,
    /// Maximum rows returned; `None` means unbounded.
    pub limit: Option<i64>,
    /// Rows skipped for offset pagination.
    pub offset: Option<i64>,
}

/// Payload for inserting one row.
#[derive(Debug, Clone, PartialEq)]
pub struct NewRow {
    /// Owning subject recorded at creation.
    pub owner_subject: Option<String>,
    /// Initial visibility state.
    pub grant_state: GrantState,
    /// Field values.
    pub data: Map<String, Value>,
}

/// Patch applied to an existing row.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RowPatch {
    /// Field values merged into the stored data.
    pub data: Map<String, Value>,
    /// Replacement visibility state, when present.
    pub grant_state: Option<GrantState>,
}

/// Store port consumed by every service.
///
/// Read methods issue independent statements; the multi-row write methods
/// (`insert_rows`, `write_positions`) execute inside a single transaction and
/// roll back fully on any step failure.
#[async_trait]
pub trait EntityStore: Send + Sync {
    /// Finds one row by identity.
    async fn find_row(&self, table: &str, id: Uuid) -> AppResult<Option<EntityRow>>;

    /// Queries rows of a table.
    async fn query_rows(&self, table: &str, query: &RowQuery) -> AppResult<Vec<EntityRow>>;

    /// Counts rows matching a query, ignoring pagination and sort.
    async fn count_rows(&self, table: &str, query: &RowQuery) -> AppResult<u64>;

    /// Inserts one row and returns it with its assigned identity.
    async fn insert_row(&self, table: &str, row: NewRow) -> AppResult<EntityRow>;

    /// Inserts a batch of rows in one transaction.
    async fn insert_rows(&self, table: &str, rows: Vec<NewRow>) -> AppResult<Vec<EntityRow>>;

    /// Merges a patch into one row.
    async fn update_row(&self, table: &str, id: Uuid, patch: RowPatch) -> AppResult<EntityRow>;

    /// Deletes one row outright.
    async fn delete_row(&self, table: &str, id: Uuid) -> AppResult<()>;

    /// Writes explicit ordering positions into a numeric column for a set of
    /// rows, all-or-nothing.
    async fn write_positions(
        &self,
        table: &str,
        order_field: &str,
        assignments: &[(Uuid, i64)],
    ) -> AppResult<()>;
}
