//! Scheme Module
//!
//! Declarative description of how a record type is keyed, indexed and laid out.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Serialize;
use serde_json::Value as Json;

use crate::error::{KvError, Result};

/// Separator placed between field values inside a composite index key.
pub const INDEX_SEPARATOR: char = '\u{1f}';

/// Record flattened into field name -> field value.
pub type Fields = BTreeMap<String, Json>;

/// Backing store family a scheme targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreType {
    Redis,
    Memory,
}

/// How an empty caller key is resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrimaryKeyType {
    /// Atomic per-prefix counter
    Sequence,
    /// Taken from `primary_key_field`
    FieldValue,
    /// Fresh random UUID
    Guid,
}

/// How a record is written to the backing store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordLayout {
    /// One envelope blob per record, supports indexes
    Plain,
    /// One hash field per record field, no indexes
    HashTable,
    /// Unordered membership, not supported by this store
    Set,
}

// == Index ==
/// Secondary index over one or more record fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Index {
    pub name: String,
    pub fields: Vec<String>,
    pub allow_duplicates: bool,
}

impl Index {
    pub fn new(name: impl Into<String>, fields: &[&str]) -> Self {
        Self {
            name: name.into(),
            fields: fields.iter().map(|f| f.to_string()).collect(),
            allow_duplicates: false,
        }
    }

    /// Lets several records share an index key; the newest write owns it.
    pub fn allow_duplicates(mut self) -> Self {
        self.allow_duplicates = true;
        self
    }

    /// Builds the composite index key for a record.
    ///
    /// Missing fields contribute an empty segment.
    pub fn key_for(&self, fields: &Fields) -> String {
        self.fields
            .iter()
            .map(|name| fields.get(name).map(stringify).unwrap_or_default())
            .collect::<Vec<_>>()
            .join(&INDEX_SEPARATOR.to_string())
    }

    /// Like `key_for`, but None when every segment is empty.
    ///
    /// A record lacking all indexed fields has nothing to look up by, so it
    /// gets no lookup entry and never collides with other such records.
    pub fn key_if_present(&self, fields: &Fields) -> Option<String> {
        let key = self.key_for(fields);
        key.split(INDEX_SEPARATOR)
            .any(|segment| !segment.is_empty())
            .then_some(key)
    }

    /// Builds the composite index key from raw values, in field order.
    pub fn key_from_values(values: &[&str]) -> String {
        values.join(&INDEX_SEPARATOR.to_string())
    }
}

// == Scheme ==
/// Immutable record definition, shared read-only across writers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Scheme {
    store_type: StoreType,
    primary_key_type: PrimaryKeyType,
    primary_key_field: Option<String>,
    indexes: Vec<Index>,
    layout: RecordLayout,
    key_prefix: String,
    encrypted_fields: Vec<String>,
    version: String,
}

impl Scheme {
    /// Starts a scheme for the given key namespace.
    pub fn builder(key_prefix: impl Into<String>) -> SchemeBuilder {
        SchemeBuilder::new(key_prefix)
    }

    pub fn store_type(&self) -> StoreType {
        self.store_type
    }

    pub fn primary_key_type(&self) -> PrimaryKeyType {
        self.primary_key_type
    }

    pub fn primary_key_field(&self) -> Option<&str> {
        self.primary_key_field.as_deref()
    }

    pub fn indexes(&self) -> &[Index] {
        &self.indexes
    }

    pub fn index(&self, name: &str) -> Option<&Index> {
        self.indexes.iter().find(|i| i.name == name)
    }

    pub fn layout(&self) -> RecordLayout {
        self.layout
    }

    pub fn key_prefix(&self) -> &str {
        &self.key_prefix
    }

    pub fn encrypted_fields(&self) -> &[String] {
        &self.encrypted_fields
    }

    pub fn is_encrypted_field(&self, name: &str) -> bool {
        self.encrypted_fields.iter().any(|f| f == name)
    }

    pub fn version(&self) -> &str {
        &self.version
    }
}

// == Scheme Builder ==
#[derive(Debug, Clone)]
pub struct SchemeBuilder {
    scheme: Scheme,
}

impl SchemeBuilder {
    fn new(key_prefix: impl Into<String>) -> Self {
        Self {
            scheme: Scheme {
                store_type: StoreType::Redis,
                primary_key_type: PrimaryKeyType::Guid,
                primary_key_field: None,
                indexes: Vec::new(),
                layout: RecordLayout::Plain,
                key_prefix: key_prefix.into(),
                encrypted_fields: Vec::new(),
                version: "1".to_string(),
            },
        }
    }

    pub fn store_type(mut self, store_type: StoreType) -> Self {
        self.scheme.store_type = store_type;
        self
    }

    pub fn sequence_key(mut self) -> Self {
        self.scheme.primary_key_type = PrimaryKeyType::Sequence;
        self
    }

    pub fn guid_key(mut self) -> Self {
        self.scheme.primary_key_type = PrimaryKeyType::Guid;
        self
    }

    pub fn field_key(mut self, field: impl Into<String>) -> Self {
        self.scheme.primary_key_type = PrimaryKeyType::FieldValue;
        self.scheme.primary_key_field = Some(field.into());
        self
    }

    pub fn index(mut self, index: Index) -> Self {
        self.scheme.indexes.push(index);
        self
    }

    pub fn layout(mut self, layout: RecordLayout) -> Self {
        self.scheme.layout = layout;
        self
    }

    pub fn encrypted_field(mut self, field: impl Into<String>) -> Self {
        self.scheme.encrypted_fields.push(field.into());
        self
    }

    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.scheme.version = version.into();
        self
    }

    /// Freezes the scheme.
    pub fn build(self) -> Result<Arc<Scheme>> {
        let scheme = self.scheme;
        if scheme.key_prefix.is_empty() {
            return Err(KvError::Scheme("key prefix must not be empty".to_string()));
        }
        if let Some(index) = scheme.indexes.iter().find(|i| i.fields.is_empty()) {
            return Err(KvError::Scheme(format!("index '{}' has no fields", index.name)));
        }
        Ok(Arc::new(scheme))
    }
}

// == Flatten ==
/// Flattens a record into its top-level fields.
pub fn flatten<T: Serialize + ?Sized>(value: &T) -> Result<Fields> {
    match serde_json::to_value(value)? {
        Json::Object(map) => Ok(map.into_iter().collect()),
        other => Err(KvError::Scheme(format!(
            "record must serialize to a map, got {}",
            crate::envelope::kind_of(&other)
        ))),
    }
}

/// Renders a field value for keys: strings verbatim, everything else as JSON.
pub fn stringify(value: &Json) -> String {
    match value {
        Json::String(s) => s.clone(),
        Json::Null => String::new(),
        other => other.to_string(),
    }
}
