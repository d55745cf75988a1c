//! Property schema trees.
//!
//! A schema describes the editable configuration: one [`Property`] per key,
//! with container properties (`object`, `list_object`) carrying a nested
//! schema in `props`. The schema is sent once, inside `Configure`, and is
//! fixed for the lifetime of a dialog session.
//!
//! Validators and converters are deliberately not part of this tree. They
//! live on the host and never cross the channel.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::{ProtocolError, Result};

/// Named child properties, ordered by key
pub type Schema = BTreeMap<String, Property>;

/// Widget/value type of a property
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PropertyType {
    /// Single-line string
    Text,
    /// Number
    Number,
    /// Multi-line string
    Textarea,
    /// One value out of `options`
    Select,
    /// Boolean
    Checkbox,
    /// List of strings
    ListText,
    /// List of numbers
    ListNumber,
    /// Nested object described by `props`
    Object,
    /// List of nested objects described by `props`
    ListObject,
}

impl PropertyType {
    /// Whether this type requires a nested schema
    #[must_use]
    pub const fn is_container(self) -> bool {
        matches!(self, Self::Object | Self::ListObject)
    }
}

/// One selectable value of a `select` property
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectOption {
    /// Display text
    pub label: String,
    /// Stored value
    pub value: Value,
}

/// Schema node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Property {
    /// Value type
    #[serde(rename = "type")]
    pub kind: PropertyType,
    /// Display label
    pub label: String,
    /// Hover help
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tooltip: Option<String>,
    /// Value used when nothing is stored
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    /// Child schema for container types
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub props: Option<Schema>,
    /// Choices for `select`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<Vec<SelectOption>>,
    /// List entries may be added
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub addable: bool,
    /// List entries may be removed
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub removable: bool,
    /// Template for newly added list entries
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_entry: Option<Value>,
    /// Child property whose value labels each entry of a `list_object`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label_entry: Option<String>,
}

impl Property {
    /// Create a property with only a type and label
    pub fn new(kind: PropertyType, label: impl Into<String>) -> Self {
        Self {
            kind,
            label: label.into(),
            tooltip: None,
            default: None,
            props: None,
            options: None,
            addable: false,
            removable: false,
            new_entry: None,
            label_entry: None,
        }
    }

    /// Set the default value
    #[must_use]
    pub fn with_default(mut self, default: Value) -> Self {
        self.default = Some(default);
        self
    }

    /// Set the tooltip
    #[must_use]
    pub fn with_tooltip(mut self, tooltip: impl Into<String>) -> Self {
        self.tooltip = Some(tooltip.into());
        self
    }

    /// Add a child property
    #[must_use]
    pub fn with_prop(mut self, name: impl Into<String>, prop: Property) -> Self {
        self.props.get_or_insert_with(Schema::new).insert(name.into(), prop);
        self
    }

    /// Set the choices of a `select`
    #[must_use]
    pub fn with_options(mut self, options: Vec<SelectOption>) -> Self {
        self.options = Some(options);
        self
    }

    /// Look up a child property
    #[must_use]
    pub fn child(&self, name: &str) -> Option<&Property> {
        self.props.as_ref().and_then(|props| props.get(name))
    }

    /// Fill in defaults of child properties that are missing from `value`.
    ///
    /// Objects get each absent child that declares a default; lists of
    /// objects get the same treatment for every non-null entry. Present
    /// values are never overwritten. Recurses into every child that declares
    /// a default.
    pub fn apply_implied_defaults(&self, value: &mut Value) {
        let Some(props) = &self.props else {
            return;
        };

        match value {
            Value::Array(entries) => {
                for entry in entries.iter_mut().filter(|entry| !entry.is_null()) {
                    fill_children(props, entry);
                }
            },
            Value::Null => {},
            other => fill_children(props, other),
        }
    }
}

fn fill_children(props: &Schema, value: &mut Value) {
    let Value::Object(map) = value else {
        return;
    };

    for (name, prop) in props {
        let Some(default) = &prop.default else {
            continue;
        };
        let child = map.entry(name.clone()).or_insert_with(|| default.clone());
        prop.apply_implied_defaults(child);
    }
}

/// Check that a schema is structurally usable.
///
/// # Errors
///
/// Returns [`ProtocolError::InvalidSchema`] for the first container without
/// `props`, leaf with `props`, or `select` without `options`.
pub fn validate_schema(schema: &Schema) -> Result<()> {
    let mut path = Vec::new();
    validate_level(schema, &mut path)
}

fn validate_level<'a>(schema: &'a Schema, path: &mut Vec<&'a str>) -> Result<()> {
    for (name, prop) in schema {
        path.push(name);
        let invalid = |reason: &str| ProtocolError::InvalidSchema {
            path: path.join("."),
            reason: reason.to_string(),
        };

        match (&prop.props, prop.kind.is_container()) {
            (None, true) => return Err(invalid("container property without props")),
            (Some(_), false) => return Err(invalid("leaf property with props")),
            _ => {},
        }
        if prop.kind == PropertyType::Select && prop.options.as_ref().is_none_or(Vec::is_empty) {
            return Err(invalid("select without options"));
        }
        if let Some(label_entry) = &prop.label_entry {
            if prop.kind != PropertyType::ListObject || prop.child(label_entry).is_none() {
                return Err(invalid("labelEntry must name a child of a list_object"));
            }
        }

        if let Some(props) = &prop.props {
            validate_level(props, path)?;
        }
        path.pop();
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn server_schema() -> Property {
        Property::new(PropertyType::ListObject, "Servers")
            .with_prop("host", Property::new(PropertyType::Text, "Host"))
            .with_prop(
                "port",
                Property::new(PropertyType::Number, "Port").with_default(json!(443)),
            )
            .with_prop(
                "tls",
                Property::new(PropertyType::Object, "TLS")
                    .with_default(json!({}))
                    .with_prop(
                        "verify",
                        Property::new(PropertyType::Checkbox, "Verify").with_default(json!(true)),
                    ),
            )
    }

    #[test]
    fn implied_defaults_fill_list_entries() {
        let prop = server_schema();
        let mut value = json!([{ "host": "a" }, null, { "host": "b", "port": 8443 }]);

        prop.apply_implied_defaults(&mut value);

        assert_eq!(
            value,
            json!([
                { "host": "a", "port": 443, "tls": { "verify": true } },
                null,
                { "host": "b", "port": 8443, "tls": { "verify": true } },
            ])
        );
    }

    #[test]
    fn implied_defaults_keep_present_values() {
        let prop = Property::new(PropertyType::Object, "Proxy")
            .with_prop("enabled", Property::new(PropertyType::Checkbox, "On").with_default(json!(false)));
        let mut value = json!({ "enabled": true });

        prop.apply_implied_defaults(&mut value);

        assert_eq!(value, json!({ "enabled": true }));
    }

    #[test]
    fn schema_serializes_with_wire_names() {
        let mut prop = Property::new(PropertyType::ListText, "Tags");
        prop.addable = true;
        prop.removable = true;
        let encoded = serde_json::to_value(&prop).unwrap();
        assert_eq!(
            encoded,
            json!({ "type": "list_text", "label": "Tags", "addable": true, "removable": true })
        );
    }

    #[test]
    fn validate_rejects_container_without_props() {
        let mut schema = Schema::new();
        schema.insert("servers".to_string(), server_schema());
        schema.insert("extra".to_string(), Property::new(PropertyType::Object, "Extra"));

        let err = validate_schema(&schema).unwrap_err();
        assert_eq!(err, ProtocolError::InvalidSchema {
            path: "extra".to_string(),
            reason: "container property without props".to_string(),
        });
    }

    #[test]
    fn validate_reports_nested_path() {
        let mut schema = Schema::new();
        schema.insert(
            "servers".to_string(),
            server_schema().with_prop("mode", Property::new(PropertyType::Select, "Mode")),
        );

        let err = validate_schema(&schema).unwrap_err();
        assert!(matches!(err, ProtocolError::InvalidSchema { ref path, .. } if path == "servers.mode"));
    }

    #[test]
    fn validate_accepts_well_formed_schema() {
        let mut schema = Schema::new();
        schema.insert("servers".to_string(), server_schema());
        schema.insert("name".to_string(), Property::new(PropertyType::Text, "Name"));
        assert!(validate_schema(&schema).is_ok());
    }
}
