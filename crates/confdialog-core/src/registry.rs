//! Host-side property values.
//!
//! The registry caches one value per top-level property, backed by a
//! [`ValueStore`]. Values enter the cache from the store, from schema
//! defaults, or from the embedder ([`PropertyRegistry::set`]); they only
//! reach the store through a fully valid save.
//!
//! # Saving
//!
//! [`PropertyRegistry::submit`] walks a *copy* of the submitted tree with
//! every converter and validator. Only when the walk completes and is valid
//! are the converted values persisted and cached. A rejected or failed
//! save leaves both the cache and the store untouched.

use confdialog_proto::{MessageTree, Schema};
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::{
    error::SessionError,
    storage::{StorageError, ValueStore},
    validation::{Rules, ValidationWalker, WalkOptions},
};

/// Result of a completed save attempt
#[derive(Debug, Clone, PartialEq)]
pub struct SaveReport {
    /// Whether the values were accepted and stored
    pub valid: bool,
    /// Pruned message tree for the dialog
    pub validations: MessageTree,
    /// Converted values as stored; `None` when rejected
    pub values: Option<Value>,
}

/// Cached property values with schema defaults and persistence
pub struct PropertyRegistry<S> {
    schema: Schema,
    rules: Rules,
    store: S,
    storage_key: String,
    values: Map<String, Value>,
}

impl<S: ValueStore> PropertyRegistry<S> {
    /// Load values for every property in `schema`.
    ///
    /// Each property takes its stored value if there is one, otherwise its
    /// schema default. Nested defaults are filled in and converters run
    /// once over the result; their messages are discarded.
    ///
    /// A stored blob that does not parse is logged and ignored.
    ///
    /// # Errors
    ///
    /// - [`SessionError::Storage`] if the store cannot be read
    /// - [`SessionError::SchemaMismatch`] if a converter fails
    pub fn load(
        schema: Schema,
        rules: Rules,
        store: S,
        storage_key: impl Into<String>,
    ) -> Result<Self, SessionError> {
        let storage_key = storage_key.into();
        let stored = match read_stored(&store, &storage_key) {
            Ok(stored) => stored.unwrap_or_default(),
            Err(err @ StorageError::Corrupt { .. }) => {
                warn!(key = %storage_key, reason = %err, "ignoring stored values");
                Map::new()
            },
            Err(err) => return Err(err.into()),
        };

        let mut registry = Self { schema, rules, store, storage_key, values: Map::new() };
        let names: Vec<String> = registry.schema.keys().cloned().collect();
        for name in names {
            let value = stored.get(&name).cloned();
            registry.assign(&name, value);
        }

        if registry.rules.has_converters() {
            let mut values = Value::Object(std::mem::take(&mut registry.values));
            ValidationWalker::new(&registry.rules, WalkOptions::CONVERT_ONLY).walk(&mut values)?;
            registry.values = into_map(values);
        }

        debug!(key = %registry.storage_key, properties = registry.values.len(), "loaded values");
        Ok(registry)
    }

    /// Schema of the properties
    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// Key the values are persisted under
    pub fn storage_key(&self) -> &str {
        &self.storage_key
    }

    /// Cached value of a property
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    /// Cache a value for a property without persisting it.
    ///
    /// `Value::Null` stands for "unset" and falls back to the default.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::SchemaMismatch`] for unknown properties.
    pub fn set(&mut self, name: &str, value: Value) -> Result<(), SessionError> {
        if !self.schema.contains_key(name) {
            return Err(SessionError::SchemaMismatch(format!("unknown property '{name}'")));
        }
        self.assign(name, Some(value).filter(|value| !value.is_null()));
        Ok(())
    }

    /// Set several properties at once.
    ///
    /// Every name is checked before anything is cached, so on error the
    /// cache is unchanged.
    ///
    /// # Errors
    ///
    /// `SchemaMismatch` naming the first unknown property.
    pub fn set_all(&mut self, values: &Map<String, Value>) -> Result<(), SessionError> {
        if let Some(unknown) = values.keys().find(|name| !self.schema.contains_key(*name)) {
            return Err(SessionError::SchemaMismatch(format!("unknown property '{unknown}'")));
        }
        for (name, value) in values {
            self.assign(name, Some(value.clone()).filter(|value| !value.is_null()));
        }
        Ok(())
    }

    /// Restore defaults in the cache.
    ///
    /// With a name, only that property; otherwise every property. Properties
    /// without a default keep their value.
    pub fn reset_value(&mut self, name: Option<&str>) {
        let names: Vec<String> = match name {
            Some(name) => vec![name.to_string()],
            None => self.schema.keys().cloned().collect(),
        };
        for name in names {
            let default = self.schema.get(&name).and_then(|property| property.default.clone());
            if let Some(default) = default {
                self.assign(&name, Some(default));
            }
        }
    }

    /// Cached values of every property
    pub fn values(&self) -> &Map<String, Value> {
        &self.values
    }

    /// Cached values as one tree
    pub fn to_value(&self) -> Value {
        Value::Object(self.values.clone())
    }

    /// Replace the cache with what is currently stored, if anything.
    ///
    /// Picks up saves made by other hosts sharing the store.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Storage`] if the store cannot be read or
    /// holds something unparsable.
    pub fn refresh(&mut self) -> Result<(), SessionError> {
        if let Some(stored) = read_stored(&self.store, &self.storage_key)? {
            self.values = stored;
        }
        Ok(())
    }

    /// Validate, convert and persist a submitted value tree.
    ///
    /// # Errors
    ///
    /// - [`SessionError::SchemaMismatch`] if the tree is not an object, does
    ///   not fit the rules, or a callback fails
    /// - [`SessionError::Storage`] if persisting fails
    ///
    /// Nothing is cached or persisted on error.
    pub fn submit(&mut self, values: &Value) -> Result<SaveReport, SessionError> {
        if !values.is_object() {
            return Err(SessionError::SchemaMismatch("submitted values are not an object".into()));
        }

        let mut converted = values.clone();
        let report = ValidationWalker::new(&self.rules, WalkOptions::FULL).walk(&mut converted)?;
        if !report.valid {
            return Ok(SaveReport { valid: false, validations: report.validations, values: None });
        }

        let serialized = serde_json::to_string(&converted)
            .map_err(|e| SessionError::Protocol(e.to_string()))?;
        self.store.set(&self.storage_key, &serialized)?;
        self.values = into_map(converted.clone());

        Ok(SaveReport { valid: true, validations: report.validations, values: Some(converted) })
    }

    /// Validate and persist the cached values
    ///
    /// # Errors
    ///
    /// See [`PropertyRegistry::submit`].
    pub fn save_current(&mut self) -> Result<SaveReport, SessionError> {
        let values = self.to_value();
        self.submit(&values)
    }

    fn assign(&mut self, name: &str, value: Option<Value>) {
        let Some(property) = self.schema.get(name) else {
            return;
        };
        match value.or_else(|| property.default.clone()) {
            Some(mut value) => {
                property.apply_implied_defaults(&mut value);
                self.values.insert(name.to_string(), value);
            },
            None => {
                self.values.remove(name);
            },
        }
    }
}

impl<S> std::fmt::Debug for PropertyRegistry<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PropertyRegistry")
            .field("storage_key", &self.storage_key)
            .field("properties", &self.schema.keys().collect::<Vec<_>>())
            .field("rules", &self.rules)
            .finish_non_exhaustive()
    }
}

fn read_stored(
    store: &impl ValueStore,
    key: &str,
) -> Result<Option<Map<String, Value>>, StorageError> {
    let Some(text) = store.get(key)? else {
        return Ok(None);
    };
    match serde_json::from_str(&text) {
        Ok(Value::Object(map)) => Ok(Some(map)),
        Ok(_) => Err(StorageError::Corrupt { key: key.to_string(), reason: "not an object".into() }),
        Err(e) => Err(StorageError::Corrupt { key: key.to_string(), reason: e.to_string() }),
    }
}

fn into_map(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}
