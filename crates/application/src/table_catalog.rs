use std::collections::BTreeMap;
use std::sync::Arc;

use rowgate_core::{AppError, AppResult};
use rowgate_domain::{RelationSort, RelationStrength, Schema, TableDef};

/// One declared N:1 edge of a table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManyToOneRelation {
    /// Field on the owning table holding the foreign key.
    pub field: String,
    /// Target table name.
    pub target_table: String,
    /// Target field joined against, normally `id`.
    pub foreign_key: String,
    /// Relation strength.
    pub strength: RelationStrength,
}

/// One computed 1:N edge: the inverse of a relation field on another table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OneToManyRelation {
    /// Exposed collection name: the relation field's `arrayName`, else the
    /// source table name.
    pub name: String,
    /// Table holding the relation field.
    pub source_table: String,
    /// Relation field on the source table.
    pub source_field: String,
    /// Target field of the edge, normally `id`.
    pub foreign_key: String,
    /// Relation strength.
    pub strength: RelationStrength,
    /// Default ordering for the collection.
    pub default_sort: Vec<RelationSort>,
    /// Column on the source table holding explicit ordering positions.
    pub orderable: Option<String>,
}

/// Both relation directions of a table.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TableRelations {
    /// N:1 edges keyed by field name.
    pub many_to_one: BTreeMap<String, ManyToOneRelation>,
    /// 1:N edges keyed by exposed collection name.
    pub one_to_many: BTreeMap<String, OneToManyRelation>,
}

/// Read-only view over the declared schema.
#[derive(Clone)]
pub struct TableCatalog {
    schema: Arc<Schema>,
}

impl TableCatalog {
    /// Creates a catalog over the loaded schema.
    #[must_use]
    pub fn new(schema: Arc<Schema>) -> Self {
        Self { schema }
    }

    /// Returns the underlying schema.
    #[must_use]
    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// Resolves a case-insensitive table name to its declared form.
    pub fn resolve_table_name(&self, input: &str) -> AppResult<&str> {
        self.schema
            .tables()
            .keys()
            .find(|name| name.eq_ignore_ascii_case(input))
            .map(String::as_str)
            .ok_or_else(|| AppError::NotFound(format!("unknown table '{input}'")))
    }

    /// Returns the table definition for a case-insensitive name.
    pub fn table(&self, input: &str) -> AppResult<&TableDef> {
        let name = self.resolve_table_name(input)?;
        self.schema
            .tables()
            .get(name)
            .ok_or_else(|| AppError::NotFound(format!("unknown table '{input}'")))
    }

    /// Returns both relation directions of a table.
    ///
    /// The 1:N side is computed by scanning every table's relation fields for
    /// ones targeting the requested table.
    pub fn relations_of(&self, input: &str) -> AppResult<TableRelations> {
        let table = self.table(input)?;
        let mut relations = TableRelations::default();

        for field in table.fields().values() {
            if let Some(relation) = field.kind().relation() {
                relations.many_to_one.insert(
                    field.name().to_owned(),
                    ManyToOneRelation {
                        field: field.name().to_owned(),
                        target_table: relation.target_table().to_owned(),
                        foreign_key: relation.foreign_key().to_owned(),
                        strength: relation.strength(),
                    },
                );
            }
        }

        for (source_name, source_table) in self.schema.tables() {
            for field in source_table.fields().values() {
                let Some(relation) = field.kind().relation() else {
                    continue;
                };
                if relation.target_table() != table.name() {
                    continue;
                }

                let exposed = relation
                    .array_name()
                    .unwrap_or(source_name.as_str())
                    .to_owned();
                relations.one_to_many.insert(
                    exposed.clone(),
                    OneToManyRelation {
                        name: exposed,
                        source_table: source_name.clone(),
                        source_field: field.name().to_owned(),
                        foreign_key: relation.foreign_key().to_owned(),
                        strength: relation.strength(),
                        default_sort: relation.default_sort().to_vec(),
                        orderable: relation.orderable().map(str::to_owned),
                    },
                );
            }
        }

        Ok(relations)
    }

    /// Returns the display fields of a table.
    pub fn display_fields_of(&self, input: &str) -> AppResult<Vec<String>> {
        Ok(self.table(input)?.display_fields().to_vec())
    }
}
