//! Scheme Records Module
//!
//! Scheme-aware writes and reads: primary key generation, secondary index
//! staging and the single-transaction commit of a record with its indexes.

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value as Json};
use tracing::{debug, warn};
use uuid::Uuid;

use super::{keys, Store};
use crate::backend::{Backend, Transaction};
use crate::envelope::Value;
use crate::error::{KvError, Result};
use crate::scheme::{flatten, Fields, PrimaryKeyType, RecordLayout, Scheme};

/// Where a record landed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordKey {
    /// Primary key inside the namespace
    pub key: String,
    /// Full backend key, `<prefix>:<key>`
    pub overall: String,
}

impl<B: Backend> Store<B> {
    // == Put Scheme ==
    /// Writes a record according to `scheme`, returning where it landed.
    ///
    /// Without a scheme this is a plain `put`. With one, the scheme prefix
    /// replaces `prefix`, an empty `key` is generated from the primary key
    /// strategy, and the record plus its index entries are committed in one
    /// transaction. Nothing is written if staging or commit fails.
    ///
    /// Hash-table records carry no secondary indexes; declared indexes are
    /// ignored for that layout.
    pub async fn put_scheme<T: Serialize + ?Sized>(
        &self,
        key: &str,
        value: &T,
        scheme: Option<&Scheme>,
        prefix: Option<&str>,
    ) -> Result<RecordKey> {
        let scheme = match scheme {
            Some(scheme) => scheme,
            None => {
                self.put(key, value, prefix).await?;
                return Ok(RecordKey {
                    key: key.to_string(),
                    overall: self.key(key, prefix),
                });
            }
        };

        self.check_scheme(scheme)?;
        let namespace = scheme.key_prefix();
        let fields = flatten(value)?;

        // Sequence keys are drawn only after the unique checks pass, so a
        // rejected write does not consume a number
        let known_key = if key.is_empty() {
            derive_key(scheme, &fields)
        } else {
            Some(key.to_string())
        };
        let known_overall = known_key.as_deref().map(|k| keys::namespaced(namespace, k));
        if let Some(overall) = &known_overall {
            keys::ensure_writable(overall)?;
        }
        if scheme.layout() == RecordLayout::Plain {
            self.check_unique(scheme, &fields, known_overall.as_deref()).await?;
        }

        let key = match known_key {
            Some(key) => key,
            None => {
                let counter = keys::sequence_key(namespace);
                self.shared.backend.incr(&counter).await?.to_string()
            }
        };
        let overall = keys::namespaced(namespace, &key);

        let mut tx = Transaction::new();
        match scheme.layout() {
            RecordLayout::Plain => self.stage_plain(&mut tx, scheme, &fields, &overall).await?,
            RecordLayout::HashTable => self.stage_hash(&mut tx, scheme, fields, &overall).await?,
            RecordLayout::Set => {
                return Err(KvError::Scheme("set layout is not supported".to_string()))
            }
        }

        if let Err(e) = self.shared.backend.commit(tx).await {
            warn!("Scheme write of {} aborted: {}", overall, e);
            if matches!(e, KvError::Transaction { .. }) {
                return Err(e);
            }
            return Err(KvError::Transaction {
                key: overall,
                reason: e.to_string(),
            });
        }

        debug!(
            "Scheme put {} (layout {:?}, version {})",
            overall,
            scheme.layout(),
            scheme.version()
        );
        Ok(RecordKey { key, overall })
    }

    /// Rejects schemes this store cannot apply, before anything is staged.
    fn check_scheme(&self, scheme: &Scheme) -> Result<()> {
        if scheme.store_type() != self.shared.backend.family() {
            return Err(KvError::Scheme(format!(
                "scheme targets {:?} but the store runs on {:?}",
                scheme.store_type(),
                self.shared.backend.family()
            )));
        }
        if scheme.layout() == RecordLayout::Set {
            return Err(KvError::Scheme("set layout is not supported".to_string()));
        }
        if !scheme.encrypted_fields().is_empty() && !self.encryption_enabled() {
            return Err(KvError::Scheme(
                "scheme has encrypted fields but store encryption is off".to_string(),
            ));
        }
        Ok(())
    }

    // == Unique Indexes ==
    /// Fails when a unique index key already belongs to another record.
    ///
    /// `overall` is None for a key not drawn yet, which owns nothing. The
    /// check is a separate read, so it does not close the window against a
    /// concurrent writer claiming the same index key.
    async fn check_unique(&self, scheme: &Scheme, fields: &Fields, overall: Option<&str>) -> Result<()> {
        for index in scheme.indexes().iter().filter(|index| !index.allow_duplicates) {
            let index_key = match index.key_if_present(fields) {
                Some(index_key) => index_key,
                None => continue,
            };
            let lookup = keys::lookup_key(scheme.key_prefix(), &index.name);
            if let Some(owner) = self.shared.backend.hget(&lookup, &index_key).await? {
                if overall.map(str::as_bytes) != Some(owner.as_slice()) {
                    return Err(KvError::Scheme(format!(
                        "index '{}' already maps '{}' to {}",
                        index.name,
                        index_key,
                        String::from_utf8_lossy(&owner)
                    )));
                }
            }
        }
        Ok(())
    }

    // == Staging ==
    async fn stage_plain(
        &self,
        tx: &mut Transaction,
        scheme: &Scheme,
        fields: &Fields,
        overall: &str,
    ) -> Result<()> {
        let record: Map<String, Json> = fields.clone().into_iter().collect();
        let data = self
            .encode(&Value::Structured(Json::Object(record)))
            .await
            .map_err(|e| e.in_context("put", overall))?;
        tx.set(overall, data, None);

        for index in scheme.indexes() {
            if let Some(index_key) = index.key_if_present(fields) {
                let lookup = keys::lookup_key(scheme.key_prefix(), &index.name);
                tx.hset(lookup, vec![(index_key, overall.as_bytes().to_vec())]);
            }
        }
        Ok(())
    }

    async fn stage_hash(
        &self,
        tx: &mut Transaction,
        scheme: &Scheme,
        fields: Fields,
        overall: &str,
    ) -> Result<()> {
        if !scheme.indexes().is_empty() {
            debug!("Hash-table record {} skips {} indexes", overall, scheme.indexes().len());
        }

        let mut entries = Vec::with_capacity(fields.len());
        for (name, value) in fields {
            let mut data = serde_json::to_vec(&value)?;
            if scheme.is_encrypted_field(&name) {
                data = self
                    .encrypt(data)
                    .await
                    .map_err(|e| e.in_context("put", overall))?;
            }
            entries.push((name, data));
        }

        // Replace the whole record so removed fields do not linger
        tx.del(overall);
        if !entries.is_empty() {
            tx.hset(overall, entries);
        }
        Ok(())
    }

    // == Get Scheme ==
    /// Reads a record written with `put_scheme`.
    pub async fn get_scheme<T: DeserializeOwned>(&self, key: &str, scheme: &Scheme) -> Result<Option<T>> {
        let overall = keys::namespaced(scheme.key_prefix(), key);
        let record = match scheme.layout() {
            RecordLayout::Plain => self.read_raw(&overall).await?,
            RecordLayout::HashTable => self.read_hash(&overall, scheme).await?,
            RecordLayout::Set => {
                return Err(KvError::Scheme("set layout is not supported".to_string()))
            }
        };

        match record {
            Some(value) => value
                .into_typed()
                .map(Some)
                .map_err(|e| e.in_context("get", &overall)),
            None => Ok(None),
        }
    }

    async fn read_hash(&self, overall: &str, scheme: &Scheme) -> Result<Option<Value>> {
        let stored = self.shared.backend.hget_all(overall).await?;
        if stored.is_empty() {
            return Ok(None);
        }

        let mut record = Map::with_capacity(stored.len());
        for (name, data) in stored {
            let data = if scheme.is_encrypted_field(&name) {
                self.decrypt(data)
                    .await
                    .map_err(|e| e.in_context("get", overall))?
            } else {
                data
            };
            let value: Json = serde_json::from_slice(&data)
                .map_err(|e| KvError::Serialization(format!("field '{}': {}", name, e)))
                .map_err(|e| e.in_context("get", overall))?;
            record.insert(name, value);
        }
        Ok(Some(Value::Structured(Json::Object(record))))
    }

    // == Index Lookup ==
    /// Resolves an index key to the overall key of the record that owns it.
    pub async fn resolve_index(&self, scheme: &Scheme, index_name: &str, index_key: &str) -> Result<Option<String>> {
        if scheme.layout() != RecordLayout::Plain {
            return Err(KvError::Scheme(format!(
                "{:?} records have no secondary indexes",
                scheme.layout()
            )));
        }
        if scheme.index(index_name).is_none() {
            return Err(KvError::Scheme(format!("unknown index '{}'", index_name)));
        }

        let lookup = keys::lookup_key(scheme.key_prefix(), index_name);
        match self.shared.backend.hget(&lookup, index_key).await? {
            Some(owner) => String::from_utf8(owner)
                .map(Some)
                .map_err(|e| KvError::Serialization(format!("lookup {}: {}", lookup, e))),
            None => Ok(None),
        }
    }

    /// Reads a record through a secondary index.
    ///
    /// Two separate reads: the lookup, then the record. The record may be
    /// deleted in between, in which case this returns `Ok(None)` even though
    /// the index still pointed at it.
    pub async fn get_by_index<T: DeserializeOwned>(
        &self,
        scheme: &Scheme,
        index_name: &str,
        index_key: &str,
    ) -> Result<Option<T>> {
        let overall = match self.resolve_index(scheme, index_name, index_key).await? {
            Some(overall) => overall,
            None => return Ok(None),
        };

        match self.read_raw(&overall).await? {
            Some(value) => value
                .into_typed()
                .map(Some)
                .map_err(|e| e.in_context("get", &overall)),
            None => {
                debug!("Index {} pointed at missing record {}", index_name, overall);
                Ok(None)
            }
        }
    }
}

/// Primary key for an empty caller key, None when it must come from the
/// sequence counter.
fn derive_key(scheme: &Scheme, fields: &Fields) -> Option<String> {
    match scheme.primary_key_type() {
        PrimaryKeyType::Sequence => None,
        PrimaryKeyType::FieldValue => {
            let field = scheme.primary_key_field().and_then(|name| fields.get(name));
            Some(match field {
                Some(Json::String(s)) if !s.is_empty() => s.clone(),
                Some(Json::Number(n)) if n.is_i64() || n.is_u64() => n.to_string(),
                _ => Uuid::new_v4().to_string(),
            })
        }
        PrimaryKeyType::Guid => Some(Uuid::new_v4().to_string()),
    }
}
