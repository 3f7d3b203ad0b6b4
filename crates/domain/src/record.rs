use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use rowgate_core::{AppError, AppResult};
use serde_json::{Map, Value, json};
use uuid::Uuid;

/// Row-level visibility state stored in the `granted` column.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum GrantState {
    /// Visible only to the owning actor.
    Draft,
    /// Visible to actors holding table-level read.
    Shared,
    /// Visible to actors whose role closure contains the named role,
    /// regardless of table-level grants.
    Published(String),
    /// Visible to everyone, including anonymous actors.
    #[default]
    Public,
}

impl GrantState {
    /// Parses the stored `granted` value. `NULL` and the empty string mean
    /// public visibility.
    pub fn parse(raw: Option<&str>) -> AppResult<Self> {
        match raw.map(str::trim) {
            None | Some("") => Ok(Self::Public),
            Some("draft") => Ok(Self::Draft),
            Some("shared") => Ok(Self::Shared),
            Some(other) => match other.strip_prefix("published @") {
                Some(role) if !role.trim().is_empty() => Ok(Self::Published(role.to_owned())),
                _ => Err(AppError::Validation(format!(
                    "unknown granted state '{other}'"
                ))),
            },
        }
    }

    /// Returns the stored column value; public visibility stores `NULL`.
    #[must_use]
    pub fn as_stored(&self) -> Option<String> {
        match self {
            Self::Draft => Some("draft".to_owned()),
            Self::Shared => Some("shared".to_owned()),
            Self::Published(role) => Some(format!("published @{role}")),
            Self::Public => None,
        }
    }
}

/// Related entities attached under one relation name.
#[derive(Debug, Clone, PartialEq)]
pub enum RelatedEntities {
    /// Single N:1 target row.
    One(EntityRow),
    /// 1:N collection.
    Many(Vec<EntityRow>),
}

/// One row of a declared table with its system fields and an ephemeral
/// relation side-map rebuilt per request.
#[derive(Debug, Clone, PartialEq)]
pub struct EntityRow {
    id: Uuid,
    table: String,
    owner_subject: Option<String>,
    grant_state: GrantState,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    data: Map<String, Value>,
    relations: BTreeMap<String, RelatedEntities>,
    compacted: bool,
}

impl EntityRow {
    /// Creates a row from stored parts, parsing the raw `granted` value.
    pub fn from_stored(
        id: Uuid,
        table: impl Into<String>,
        owner_subject: Option<String>,
        granted: Option<&str>,
        created_at: DateTime<Utc>,
        updated_at: DateTime<Utc>,
        data: Value,
    ) -> AppResult<Self> {
        let Value::Object(data) = data else {
            return Err(AppError::Internal(format!(
                "stored row '{id}' holds a non-object data payload"
            )));
        };

        Ok(Self {
            id,
            table: table.into(),
            owner_subject,
            grant_state: GrantState::parse(granted)?,
            created_at,
            updated_at,
            data,
            relations: BTreeMap::new(),
            compacted: false,
        })
    }

    /// Returns the immutable row identity.
    #[must_use]
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Returns the table the row belongs to.
    #[must_use]
    pub fn table(&self) -> &str {
        self.table.as_str()
    }

    /// Returns the owning subject, set at creation.
    #[must_use]
    pub fn owner_subject(&self) -> Option<&str> {
        self.owner_subject.as_deref()
    }

    /// Returns the row visibility state.
    #[must_use]
    pub fn grant_state(&self) -> &GrantState {
        &self.grant_state
    }

    /// Returns the creation timestamp.
    #[must_use]
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Returns the last-update timestamp.
    #[must_use]
    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    /// Returns the non-system field values.
    #[must_use]
    pub fn data(&self) -> &Map<String, Value> {
        &self.data
    }

    /// Returns a single field value.
    #[must_use]
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.data.get(name)
    }

    /// Returns the resolved relation side-map.
    #[must_use]
    pub fn relations(&self) -> &BTreeMap<String, RelatedEntities> {
        &self.relations
    }

    /// Keeps only fields accepted by the predicate. Applying the same
    /// predicate twice is a no-op.
    pub fn retain_fields(&mut self, mut keep: impl FnMut(&str) -> bool) {
        self.data.retain(|name, _| keep(name));
    }

    /// Attaches resolved related entities under a relation name.
    pub fn attach_relation(&mut self, name: impl Into<String>, entries: RelatedEntities) {
        self.relations.insert(name.into(), entries);
    }

    /// Reduces the row to its compact display form: identity, provenance and
    /// the display fields present. Idempotent.
    #[must_use]
    pub fn into_compact(mut self, display_fields: &[String]) -> Self {
        self.data
            .retain(|name, _| display_fields.iter().any(|display| display == name));
        self.relations.clear();
        self.owner_subject = None;
        self.grant_state = GrantState::Public;
        self.compacted = true;
        self
    }

    /// Renders the caller-facing JSON shape.
    ///
    /// Compact rows render only `_table`, `id` and their display fields;
    /// full rows carry the system fields and any resolved `_relations`.
    #[must_use]
    pub fn to_value(&self) -> Value {
        let mut object = Map::new();
        object.insert("_table".to_owned(), json!(self.table));
        object.insert("id".to_owned(), json!(self.id));

        if !self.compacted {
            object.insert("ownerId".to_owned(), json!(self.owner_subject));
            object.insert("granted".to_owned(), json!(self.grant_state.as_stored()));
            object.insert("createdAt".to_owned(), json!(self.created_at));
            object.insert("updatedAt".to_owned(), json!(self.updated_at));
        }

        for (name, value) in &self.data {
            object.insert(name.clone(), value.clone());
        }

        if !self.relations.is_empty() {
            let mut relations = Map::new();
            for (name, entries) in &self.relations {
                let rendered = match entries {
                    RelatedEntities::One(row) => row.to_value(),
                    RelatedEntities::Many(rows) => {
                        Value::Array(rows.iter().map(EntityRow::to_value).collect())
                    }
                };
                relations.insert(name.clone(), rendered);
            }
            object.insert("_relations".to_owned(), Value::Object(relations));
        }

        Value::Object(object)
    }
}
