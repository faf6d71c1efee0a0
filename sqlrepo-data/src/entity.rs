use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

use crate::error::DataError;
use crate::value::{FromValue, Value};

/// Storage kind of a column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Integer,
    Float,
    Text,
    Boolean,
    Timestamp,
}

/// Descriptor of a single column.
#[derive(Debug, Clone)]
pub struct FieldMeta {
    pub name: &'static str,
    pub kind: FieldKind,
    pub nullable: bool,
    pub primary_key: bool,
    /// Assigned by the store on insert (autoincrement identity, server timestamps).
    pub generated: bool,
    pub default: Option<Value>,
}

impl FieldMeta {
    pub fn new(name: &'static str, kind: FieldKind) -> Self {
        Self {
            name,
            kind,
            nullable: false,
            primary_key: false,
            generated: false,
            default: None,
        }
    }

    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    pub fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self
    }

    pub fn generated(mut self) -> Self {
        self.generated = true;
        self
    }

    pub fn default_value(mut self, value: impl Into<Value>) -> Self {
        self.default = Some(value.into());
        self
    }

    /// A value must be supplied on insert.
    pub fn is_required(&self) -> bool {
        !self.nullable && !self.generated && self.default.is_none()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cardinality {
    One,
    Many,
}

/// Descriptor of a relationship to another entity.
///
/// Rows are related when `parent.local_key == child.remote_key`. For a
/// many-to-one relationship `local_key` is the foreign key on the parent;
/// for one-to-many it is the parent's primary key.
#[derive(Debug, Clone)]
pub struct RelationMeta {
    pub name: &'static str,
    pub target: fn() -> &'static EntityMeta,
    pub cardinality: Cardinality,
    pub local_key: &'static str,
    pub remote_key: &'static str,
}

impl RelationMeta {
    pub fn one(
        name: &'static str,
        target: fn() -> &'static EntityMeta,
        local_key: &'static str,
        remote_key: &'static str,
    ) -> Self {
        Self {
            name,
            target,
            cardinality: Cardinality::One,
            local_key,
            remote_key,
        }
    }

    pub fn many(
        name: &'static str,
        target: fn() -> &'static EntityMeta,
        local_key: &'static str,
        remote_key: &'static str,
    ) -> Self {
        Self {
            name,
            target,
            cardinality: Cardinality::Many,
            local_key,
            remote_key,
        }
    }

    pub fn target(&self) -> &'static EntityMeta {
        (self.target)()
    }

    pub fn is_collection(&self) -> bool {
        self.cardinality == Cardinality::Many
    }
}

/// Field and relationship lookup table of one entity type.
///
/// Built once per entity (usually inside a `OnceLock`) and consulted for
/// every filter, load and statement built against that entity.
///
/// ```ignore
/// fn meta() -> &'static EntityMeta {
///     static META: OnceLock<EntityMeta> = OnceLock::new();
///     META.get_or_init(|| {
///         EntityMeta::builder("Book", "books")
///             .field(FieldMeta::new("id", FieldKind::Integer).primary_key().generated())
///             .field(FieldMeta::new("title", FieldKind::Text))
///             .relation(RelationMeta::one("author", Author::meta, "author_id", "id"))
///             .build()
///     })
/// }
/// ```
#[derive(Debug)]
pub struct EntityMeta {
    pub name: &'static str,
    pub table: &'static str,
    fields: Vec<FieldMeta>,
    relations: Vec<RelationMeta>,
    field_index: HashMap<&'static str, usize>,
    relation_index: HashMap<&'static str, usize>,
}

pub struct EntityMetaBuilder {
    name: &'static str,
    table: &'static str,
    fields: Vec<FieldMeta>,
    relations: Vec<RelationMeta>,
}

impl EntityMetaBuilder {
    pub fn field(mut self, field: FieldMeta) -> Self {
        self.fields.retain(|f| f.name != field.name);
        self.fields.push(field);
        self
    }

    pub fn relation(mut self, relation: RelationMeta) -> Self {
        self.relations.retain(|r| r.name != relation.name);
        self.relations.push(relation);
        self
    }

    pub fn build(self) -> EntityMeta {
        let field_index = self
            .fields
            .iter()
            .enumerate()
            .map(|(idx, f)| (f.name, idx))
            .collect();
        let relation_index = self
            .relations
            .iter()
            .enumerate()
            .map(|(idx, r)| (r.name, idx))
            .collect();
        EntityMeta {
            name: self.name,
            table: self.table,
            fields: self.fields,
            relations: self.relations,
            field_index,
            relation_index,
        }
    }
}

impl EntityMeta {
    pub fn builder(name: &'static str, table: &'static str) -> EntityMetaBuilder {
        EntityMetaBuilder {
            name,
            table,
            fields: Vec::new(),
            relations: Vec::new(),
        }
    }

    pub fn fields(&self) -> &[FieldMeta] {
        &self.fields
    }

    pub fn relations(&self) -> &[RelationMeta] {
        &self.relations
    }

    pub fn field(&self, name: &str) -> Option<&FieldMeta> {
        self.field_index.get(name).map(|idx| &self.fields[*idx])
    }

    pub fn relation(&self, name: &str) -> Option<&RelationMeta> {
        self.relation_index.get(name).map(|idx| &self.relations[*idx])
    }

    pub fn require_field(&self, name: &str) -> Result<&FieldMeta, DataError> {
        self.field(name).ok_or_else(|| DataError::field(self.name, name))
    }

    pub fn primary_key(&self) -> Option<&FieldMeta> {
        self.fields.iter().find(|f| f.primary_key)
    }

    pub fn require_primary_key(&self) -> Result<&FieldMeta, DataError> {
        self.primary_key().ok_or_else(|| {
            DataError::configuration(format!("entity {} declares no primary key", self.name))
        })
    }

    pub fn column_names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.fields.iter().map(|f| f.name)
    }
}

/// Column values of one row plus any related rows loaded alongside it.
///
/// This is the wire type between repositories and sessions: sessions
/// return records, entities convert from and into them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Record {
    values: BTreeMap<String, Value>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    related: BTreeMap<String, Vec<Record>>,
}

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_pairs<K, V, I>(pairs: I) -> Self
    where
        K: Into<String>,
        V: Into<Value>,
        I: IntoIterator<Item = (K, V)>,
    {
        Self {
            values: pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
            related: BTreeMap::new(),
        }
    }

    /// Build a record from a JSON object such as a deserialized request body.
    pub fn from_json(json: serde_json::Value) -> Result<Self, DataError> {
        match json {
            serde_json::Value::Object(map) => {
                let mut record = Record::new();
                for (key, value) in map {
                    let value: Value = serde_json::from_value(value).map_err(|e| {
                        DataError::configuration(format!("invalid value for '{key}': {e}"))
                    })?;
                    record.set(key, value);
                }
                Ok(record)
            }
            other => Err(DataError::configuration(format!(
                "expected a JSON object of field values, got {other}"
            ))),
        }
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.values.get(field)
    }

    pub fn contains(&self, field: &str) -> bool {
        self.values.contains_key(field)
    }

    pub fn set(&mut self, field: impl Into<String>, value: impl Into<Value>) {
        self.values.insert(field.into(), value.into());
    }

    pub fn with(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set(field, value);
        self
    }

    pub fn remove(&mut self, field: &str) -> Option<Value> {
        self.values.remove(field)
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Typed access to a column value; a missing column reads as `Null`.
    pub fn extract<T: FromValue>(&self, field: &str) -> Result<T, DataError> {
        T::from_value(self.values.get(field).unwrap_or(&Value::Null), field)
    }

    pub fn set_related(&mut self, relation: impl Into<String>, records: Vec<Record>) {
        self.related.insert(relation.into(), records);
    }

    /// Loaded related records, or `None` when the relationship was not loaded.
    pub fn related(&self, relation: &str) -> Option<&[Record]> {
        self.related.get(relation).map(Vec::as_slice)
    }

    pub fn related_entities<T: Entity>(&self, relation: &str) -> Result<Option<Vec<T>>, DataError> {
        match self.related.get(relation) {
            Some(records) => records
                .iter()
                .map(T::from_record)
                .collect::<Result<Vec<_>, _>>()
                .map(Some),
            None => Ok(None),
        }
    }

    /// For to-one relationships: `Some(None)` when loaded but absent.
    pub fn related_entity<T: Entity>(&self, relation: &str) -> Result<Option<Option<T>>, DataError> {
        match self.related.get(relation) {
            Some(records) => match records.first() {
                Some(record) => T::from_record(record).map(|e| Some(Some(e))),
                None => Ok(Some(None)),
            },
            None => Ok(None),
        }
    }
}

impl<K: Into<String>, V: Into<Value>, const N: usize> From<[(K, V); N]> for Record {
    fn from(pairs: [(K, V); N]) -> Self {
        Record::from_pairs(pairs)
    }
}

/// Build a [`Record`] of field values.
///
/// ```ignore
/// let data = record! { "name" => "Ann", "active" => true };
/// ```
#[macro_export]
macro_rules! record {
    () => {
        $crate::Record::new()
    };
    ( $( $field:expr => $value:expr ),+ $(,)? ) => {
        $crate::Record::new()
            $( .with($field, $crate::Value::from($value)) )+
    };
}

/// A persisted record type with identity and relationships.
///
/// Implemented by hand (or by a derive in downstream code): the metadata
/// table plus conversions to and from [`Record`].
pub trait Entity: Clone + Send + Sync + Unpin + 'static {
    fn meta() -> &'static EntityMeta;

    fn from_record(record: &Record) -> Result<Self, DataError>;

    fn to_record(&self) -> Record;

    /// Assign one column value on an in-memory instance.
    fn set_field(&mut self, field: &str, value: Value) -> Result<(), DataError> {
        Self::meta().require_field(field)?;
        let mut record = self.to_record();
        record.set(field, value);
        *self = Self::from_record(&record)?;
        Ok(())
    }

    fn identity(&self) -> Value {
        let record = self.to_record();
        Self::meta()
            .primary_key()
            .and_then(|pk| record.get(pk.name).cloned())
            .unwrap_or(Value::Null)
    }
}
