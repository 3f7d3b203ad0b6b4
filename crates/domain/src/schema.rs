use std::collections::{BTreeMap, BTreeSet};
use std::str::FromStr;

use rowgate_core::{AppError, AppResult, NonEmptyString};
use serde::Deserialize;

use crate::role::{RoleDefinition, RoleGraph};

/// Actions grantable at table and field level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TableAction {
    /// Allows reading rows of the table.
    Read,
    /// Allows creating rows.
    Create,
    /// Allows updating rows.
    Update,
    /// Allows deleting rows.
    Delete,
    /// Allows changing row visibility to a published state.
    Publish,
}

impl TableAction {
    /// Returns a stable storage value for this action.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Read => "read",
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
            Self::Publish => "publish",
        }
    }
}

impl FromStr for TableAction {
    type Err = AppError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "read" => Ok(Self::Read),
            "create" => Ok(Self::Create),
            "update" => Ok(Self::Update),
            "delete" => Ok(Self::Delete),
            "publish" => Ok(Self::Publish),
            _ => Err(AppError::Validation(format!("unknown action '{value}'"))),
        }
    }
}

/// Whether a 1:N relation is loaded by default and cascades on delete.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RelationStrength {
    /// Included in the default relation-loading policy.
    Strong,
    /// Loaded only on explicit request.
    #[default]
    Weak,
}

/// Sort direction for relation default ordering and query sorts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortDirection {
    /// Ascending order.
    #[default]
    Asc,
    /// Descending order.
    Desc,
}

/// One field/direction pair of a relation's default sort.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelationSort {
    field: NonEmptyString,
    direction: SortDirection,
}

impl RelationSort {
    /// Creates a sort pair.
    pub fn new(field: impl Into<String>, direction: SortDirection) -> AppResult<Self> {
        Ok(Self {
            field: NonEmptyString::new(field)?,
            direction,
        })
    }

    /// Returns the sorted field name.
    #[must_use]
    pub fn field(&self) -> &str {
        self.field.as_str()
    }

    /// Returns the sort direction.
    #[must_use]
    pub fn direction(&self) -> SortDirection {
        self.direction
    }
}

/// Relation metadata carried by an N:1 field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelationField {
    target_table: NonEmptyString,
    foreign_key: NonEmptyString,
    array_name: Option<NonEmptyString>,
    strength: RelationStrength,
    default_sort: Vec<RelationSort>,
    orderable: Option<NonEmptyString>,
}

impl RelationField {
    /// Creates validated relation metadata. The foreign key defaults to `id`.
    pub fn new(
        target_table: impl Into<String>,
        foreign_key: Option<String>,
        array_name: Option<String>,
        strength: RelationStrength,
        default_sort: Vec<RelationSort>,
        orderable: Option<String>,
    ) -> AppResult<Self> {
        Ok(Self {
            target_table: NonEmptyString::new(target_table)?,
            foreign_key: NonEmptyString::new(foreign_key.unwrap_or_else(|| "id".to_owned()))?,
            array_name: array_name.map(NonEmptyString::new).transpose()?,
            strength,
            default_sort,
            orderable: orderable.map(NonEmptyString::new).transpose()?,
        })
    }

    /// Returns the target table name.
    #[must_use]
    pub fn target_table(&self) -> &str {
        self.target_table.as_str()
    }

    /// Returns the target field joined against, normally `id`.
    #[must_use]
    pub fn foreign_key(&self) -> &str {
        self.foreign_key.as_str()
    }

    /// Returns the name under which the inverse collection appears.
    #[must_use]
    pub fn array_name(&self) -> Option<&str> {
        self.array_name.as_ref().map(NonEmptyString::as_str)
    }

    /// Returns the relation strength.
    #[must_use]
    pub fn strength(&self) -> RelationStrength {
        self.strength
    }

    /// Returns the default sort for the inverse collection.
    #[must_use]
    pub fn default_sort(&self) -> &[RelationSort] {
        &self.default_sort
    }

    /// Returns the sibling column holding explicit ordering positions.
    #[must_use]
    pub fn orderable(&self) -> Option<&str> {
        self.orderable.as_ref().map(NonEmptyString::as_str)
    }
}

/// Closed set of field kinds resolved at schema load.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldKind {
    /// UTF-8 string field.
    Text,
    /// Numeric field.
    Number,
    /// Boolean field.
    Boolean,
    /// Date-only string field.
    Date,
    /// Date-time string field.
    DateTime,
    /// Arbitrary JSON field.
    Json,
    /// Many-to-one relation field.
    Relation(RelationField),
}

impl FieldKind {
    /// Returns a stable storage value for the field kind.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Number => "number",
            Self::Boolean => "boolean",
            Self::Date => "date",
            Self::DateTime => "datetime",
            Self::Json => "json",
            Self::Relation(_) => "relation",
        }
    }

    /// Returns relation metadata when the field is an N:1 edge.
    #[must_use]
    pub fn relation(&self) -> Option<&RelationField> {
        match self {
            Self::Relation(relation) => Some(relation),
            _ => None,
        }
    }
}

/// Role-to-actions grant map used at table and field level.
pub type GrantMap = BTreeMap<String, BTreeSet<TableAction>>;

/// Declared field of a table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDef {
    name: NonEmptyString,
    kind: FieldKind,
    grant: Option<GrantMap>,
    computed: bool,
}

impl FieldDef {
    /// Creates a validated field definition.
    pub fn new(
        name: impl Into<String>,
        kind: FieldKind,
        grant: Option<GrantMap>,
        computed: bool,
    ) -> AppResult<Self> {
        Ok(Self {
            name: NonEmptyString::new(name)?,
            kind,
            grant,
            computed,
        })
    }

    /// Returns the field name.
    #[must_use]
    pub fn name(&self) -> &str {
        self.name.as_str()
    }

    /// Returns the field kind.
    #[must_use]
    pub fn kind(&self) -> &FieldKind {
        &self.kind
    }

    /// Returns the field-level grant override, if declared.
    #[must_use]
    pub fn grant(&self) -> Option<&GrantMap> {
        self.grant.as_ref()
    }

    /// Returns whether the field has no physical column.
    #[must_use]
    pub fn computed(&self) -> bool {
        self.computed
    }
}

/// Declared table: fields, table-level grants, display fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableDef {
    name: NonEmptyString,
    fields: BTreeMap<String, FieldDef>,
    grants: GrantMap,
    display_fields: Vec<String>,
}

impl TableDef {
    /// Creates a validated table definition.
    ///
    /// An empty display-field list defaults to `["name"]` when a `name` field
    /// is declared.
    pub fn new(
        name: impl Into<String>,
        fields: BTreeMap<String, FieldDef>,
        grants: GrantMap,
        display_fields: Vec<String>,
    ) -> AppResult<Self> {
        let display_fields = if display_fields.is_empty() && fields.contains_key("name") {
            vec!["name".to_owned()]
        } else {
            display_fields
        };

        Ok(Self {
            name: NonEmptyString::new(name)?,
            fields,
            grants,
            display_fields,
        })
    }

    /// Returns the table name.
    #[must_use]
    pub fn name(&self) -> &str {
        self.name.as_str()
    }

    /// Returns the declared fields.
    #[must_use]
    pub fn fields(&self) -> &BTreeMap<String, FieldDef> {
        &self.fields
    }

    /// Returns a declared field by name.
    #[must_use]
    pub fn field(&self, name: &str) -> Option<&FieldDef> {
        self.fields.get(name)
    }

    /// Returns the table-level grant map.
    #[must_use]
    pub fn grants(&self) -> &GrantMap {
        &self.grants
    }

    /// Returns the display fields used for compact projection.
    #[must_use]
    pub fn display_fields(&self) -> &[String] {
        &self.display_fields
    }
}

/// Immutable schema loaded once at process start.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Schema {
    roles: RoleGraph,
    tables: BTreeMap<String, TableDef>,
}

impl Schema {
    /// Creates a schema with cross-table invariant checks.
    pub fn new(roles: RoleGraph, tables: BTreeMap<String, TableDef>) -> AppResult<Self> {
        for table in tables.values() {
            for field in table.fields().values() {
                let Some(relation) = field.kind().relation() else {
                    continue;
                };

                if !tables.contains_key(relation.target_table()) {
                    return Err(AppError::Validation(format!(
                        "field '{}.{}' targets undeclared table '{}'",
                        table.name(),
                        field.name(),
                        relation.target_table()
                    )));
                }

                if let Some(orderable) = relation.orderable() {
                    let orderable_kind = table.field(orderable).map(FieldDef::kind);
                    if !matches!(orderable_kind, Some(FieldKind::Number)) {
                        return Err(AppError::Validation(format!(
                            "orderable column '{}' of field '{}.{}' must be a declared number field",
                            orderable,
                            table.name(),
                            field.name()
                        )));
                    }
                }
            }
        }

        Ok(Self { roles, tables })
    }

    /// Loads and validates a schema from its JSON document form.
    pub fn from_json_str(raw: &str) -> AppResult<Self> {
        let doc: SchemaDoc = serde_json::from_str(raw)
            .map_err(|error| AppError::Validation(format!("malformed schema document: {error}")))?;
        doc.into_schema()
    }

    /// Returns the role inheritance graph.
    #[must_use]
    pub fn roles(&self) -> &RoleGraph {
        &self.roles
    }

    /// Returns the declared tables.
    #[must_use]
    pub fn tables(&self) -> &BTreeMap<String, TableDef> {
        &self.tables
    }
}

#[derive(Debug, Deserialize)]
struct SchemaDoc {
    #[serde(default)]
    roles: BTreeMap<String, RoleDoc>,
    #[serde(default)]
    tables: BTreeMap<String, TableDoc>,
}

#[derive(Debug, Deserialize)]
struct RoleDoc {
    #[serde(default)]
    description: String,
    #[serde(default)]
    parents: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TableDoc {
    #[serde(default)]
    fields: BTreeMap<String, FieldDoc>,
    #[serde(default)]
    grants: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    display_fields: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FieldDoc {
    #[serde(rename = "type")]
    field_type: String,
    relation: Option<String>,
    foreign_key: Option<String>,
    array_name: Option<String>,
    relationship_strength: Option<String>,
    default_sort: Option<DefaultSortDoc>,
    orderable: Option<String>,
    grant: Option<BTreeMap<String, Vec<String>>>,
    #[serde(default)]
    computed: bool,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum DefaultSortDoc {
    Single(String),
    Pairs(Vec<SortPairDoc>),
}

#[derive(Debug, Deserialize)]
struct SortPairDoc {
    field: String,
    order: Option<String>,
}

impl SchemaDoc {
    fn into_schema(self) -> AppResult<Schema> {
        let roles = self
            .roles
            .into_iter()
            .map(|(name, doc)| (name, RoleDefinition::new(doc.description, doc.parents)))
            .collect();

        let mut tables = BTreeMap::new();
        for (table_name, doc) in self.tables {
            let mut fields = BTreeMap::new();
            for (field_name, field_doc) in doc.fields {
                let field = field_from_doc(&table_name, &field_name, field_doc)?;
                fields.insert(field_name, field);
            }

            let table = TableDef::new(
                table_name.clone(),
                fields,
                grant_map_from_doc(doc.grants)?,
                doc.display_fields,
            )?;
            tables.insert(table_name, table);
        }

        Schema::new(RoleGraph::new(roles), tables)
    }
}

fn field_from_doc(table_name: &str, field_name: &str, doc: FieldDoc) -> AppResult<FieldDef> {
    let has_relation_metadata = doc.relation.is_some()
        || doc.foreign_key.is_some()
        || doc.array_name.is_some()
        || doc.relationship_strength.is_some()
        || doc.default_sort.is_some()
        || doc.orderable.is_some();

    let kind = match doc.field_type.as_str() {
        "relation" => {
            let target = doc.relation.ok_or_else(|| {
                AppError::Validation(format!(
                    "relation field '{table_name}.{field_name}' requires a target table"
                ))
            })?;
            FieldKind::Relation(RelationField::new(
                target,
                doc.foreign_key,
                doc.array_name,
                strength_from_doc(doc.relationship_strength.as_deref())?,
                sort_from_doc(doc.default_sort)?,
                doc.orderable,
            )?)
        }
        "text" => FieldKind::Text,
        "number" => FieldKind::Number,
        "boolean" => FieldKind::Boolean,
        "date" => FieldKind::Date,
        "datetime" => FieldKind::DateTime,
        "json" => FieldKind::Json,
        other => {
            return Err(AppError::Validation(format!(
                "field '{table_name}.{field_name}' has unknown type '{other}'"
            )));
        }
    };

    if !matches!(kind, FieldKind::Relation(_)) && has_relation_metadata {
        return Err(AppError::Validation(format!(
            "field '{table_name}.{field_name}' carries relation metadata but is not a relation"
        )));
    }

    let grant = doc.grant.map(grant_map_from_doc).transpose()?;
    FieldDef::new(field_name, kind, grant, doc.computed)
}

fn strength_from_doc(value: Option<&str>) -> AppResult<RelationStrength> {
    match value {
        None => Ok(RelationStrength::default()),
        Some("Strong") => Ok(RelationStrength::Strong),
        Some("Weak") => Ok(RelationStrength::Weak),
        Some(other) => Err(AppError::Validation(format!(
            "unknown relationship strength '{other}'"
        ))),
    }
}

fn sort_from_doc(doc: Option<DefaultSortDoc>) -> AppResult<Vec<RelationSort>> {
    match doc {
        None => Ok(Vec::new()),
        Some(DefaultSortDoc::Single(field)) => {
            Ok(vec![RelationSort::new(field, SortDirection::Asc)?])
        }
        Some(DefaultSortDoc::Pairs(pairs)) => pairs
            .into_iter()
            .map(|pair| {
                let direction = match pair.order.as_deref() {
                    None | Some("asc") => SortDirection::Asc,
                    Some("desc") => SortDirection::Desc,
                    Some(other) => {
                        return Err(AppError::Validation(format!(
                            "unknown sort order '{other}'"
                        )));
                    }
                };
                RelationSort::new(pair.field, direction)
            })
            .collect(),
    }
}

fn grant_map_from_doc(doc: BTreeMap<String, Vec<String>>) -> AppResult<GrantMap> {
    let mut map = GrantMap::new();
    for (role, actions) in doc {
        let actions = actions
            .iter()
            .map(|action| action.parse())
            .collect::<AppResult<BTreeSet<TableAction>>>()?;
        map.insert(role, actions);
    }
    Ok(map)
}
