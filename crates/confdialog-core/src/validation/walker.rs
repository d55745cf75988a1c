//! Schema-driven validation and conversion walk.
//!
//! The walk is depth-first and post-order. Every node is visited exactly
//! once and validity never short-circuits:
//!
//! 1. Descend into named children that have rules, and into every entry of
//!    a list whose rules describe entry structure (named children). A list
//!    whose rules only carry entry callbacks is not descended into.
//! 2. Back at a list node with entry rules, run the entry converter, then
//!    the entry validator, on every entry in order. The list's own flag is
//!    the AND of all entry results.
//! 3. At a node that is not itself a list entry, run its converter (which
//!    keeps the current flag) and then its validator (ANDed into the flag).
//!
//! After each child returns, silent children are pruned from the parent so
//! the resulting [`MessageTree`] only contains nodes where something was
//! reported. The subtree result is the AND over every validator below.
//!
//! Converters rewrite the value tree in place. Callers that need atomic
//! commits walk a copy (see [`PropertyRegistry::submit`]).
//!
//! [`PropertyRegistry::submit`]: crate::registry::PropertyRegistry::submit

use confdialog_proto::{MessageTree, message_tree::index_key};
use serde_json::Value;
use thiserror::Error;

use super::rules::{CallbackError, EntryRules, Rules};

/// Which callbacks a walk runs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WalkOptions {
    /// Run converters
    pub run_converters: bool,
    /// Run validators
    pub run_validators: bool,
}

impl WalkOptions {
    /// Converters and validators, as for `Save`
    pub const FULL: Self = Self { run_converters: true, run_validators: true };

    /// Converters only, as when values are first loaded
    pub const CONVERT_ONLY: Self = Self { run_converters: true, run_validators: false };
}

/// Outcome of a completed walk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalkReport {
    /// AND of every validator result in the tree
    pub valid: bool,
    /// Pruned message tree
    pub validations: MessageTree,
}

/// A walk that could not complete
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WalkError {
    /// A node with entry rules holds something other than a list
    #[error("schema mismatch at '{path}': expected a list, found {found}")]
    SchemaMismatch {
        /// Dotted path of the node
        path: String,
        /// JSON type that was found
        found: &'static str,
    },

    /// A converter or validator failed
    #[error("callback failed at '{path}': {source}")]
    Callback {
        /// Dotted path of the node
        path: String,
        /// Callback error
        source: CallbackError,
    },
}

/// Walks a value tree against a [`Rules`] tree
#[derive(Debug, Clone, Copy)]
pub struct ValidationWalker<'r> {
    rules: &'r Rules,
    options: WalkOptions,
}

impl<'r> ValidationWalker<'r> {
    /// Create a walker
    pub fn new(rules: &'r Rules, options: WalkOptions) -> Self {
        Self { rules, options }
    }

    /// Walk `value`, converting it in place.
    ///
    /// Callbacks receive a snapshot of `value` as it was before the walk.
    ///
    /// # Errors
    ///
    /// Returns [`WalkError`] if the value does not fit the rules or a
    /// callback fails. `value` may be partially converted in that case.
    pub fn walk(&self, value: &mut Value) -> Result<WalkReport, WalkError> {
        if !self.options.run_converters && !self.options.run_validators {
            return Ok(WalkReport { valid: true, validations: MessageTree::new() });
        }

        let root = value.clone();
        let mut validations = MessageTree::new();
        let mut path = Vec::new();
        let valid = self.visit(value, self.rules, &mut validations, &mut path, false, &root)?;
        validations.prune();

        Ok(WalkReport { valid, validations })
    }

    fn visit(
        &self,
        value: &mut Value,
        rules: &Rules,
        node: &mut MessageTree,
        path: &mut Vec<String>,
        is_entry: bool,
        root: &Value,
    ) -> Result<bool, WalkError> {
        let mut subtree_valid = true;

        match value {
            Value::Array(entries) if !rules.props.is_empty() => {
                for (index, entry) in entries.iter_mut().enumerate() {
                    let key = index_key(index);
                    let mut child = MessageTree::new();
                    path.push(key.clone());
                    subtree_valid &= self.visit(entry, rules, &mut child, path, true, root)?;
                    path.pop();
                    node.insert_pruned(key, child);
                }
            },
            Value::Object(map) => {
                for (name, child_value) in map.iter_mut() {
                    let Some(child_rules) = rules.props.get(name) else {
                        continue;
                    };
                    let mut child = MessageTree::new();
                    path.push(name.clone());
                    subtree_valid &=
                        self.visit(child_value, child_rules, &mut child, path, false, root)?;
                    path.pop();
                    node.insert_pruned(name.clone(), child);
                }
            },
            _ => {},
        }

        if !is_entry {
            if let Some(entry_rules) = &rules.entries {
                match value {
                    Value::Array(entries) => {
                        subtree_valid &= self.visit_entries(entries, entry_rules, node, path, root)?;
                    },
                    Value::Null => {},
                    other => {
                        return Err(WalkError::SchemaMismatch {
                            path: path.join("."),
                            found: json_type(other),
                        });
                    },
                }
            }

            if self.options.run_converters {
                if let Some(converter) = &rules.converter {
                    let mut messages = node.messages.take().unwrap_or_default();
                    converter
                        .convert(value, &mut messages, root)
                        .map_err(|source| callback_error(path, source))?;
                    node.messages = Some(messages);
                    node.is_valid = Some(node.is_valid.unwrap_or(true));
                }
            }

            if self.options.run_validators {
                if let Some(validator) = &rules.validator {
                    let mut messages = node.messages.take().unwrap_or_default();
                    let ok = validator
                        .validate(value, &mut messages, root)
                        .map_err(|source| callback_error(path, source))?;
                    let is_valid = ok && node.is_valid.unwrap_or(true);
                    node.messages = Some(messages);
                    node.is_valid = Some(is_valid);
                    subtree_valid &= is_valid;
                }
            }
        }

        Ok(subtree_valid)
    }

    fn visit_entries(
        &self,
        entries: &mut [Value],
        rules: &EntryRules,
        node: &mut MessageTree,
        path: &mut Vec<String>,
        root: &Value,
    ) -> Result<bool, WalkError> {
        let mut list_valid = true;

        for (index, entry) in entries.iter_mut().enumerate() {
            let key = index_key(index);
            path.push(key.clone());

            if self.options.run_converters {
                if let Some(converter) = &rules.converter {
                    let mut messages = existing_messages(node, &key);
                    converter
                        .convert(entry, &mut messages, root)
                        .map_err(|source| callback_error(path, source))?;
                    if !messages.is_empty() {
                        let child = node.child_mut(&key);
                        child.messages = Some(messages);
                        child.is_valid = Some(child.is_valid.unwrap_or(true));
                    }
                }
            }

            if self.options.run_validators {
                if let Some(validator) = &rules.validator {
                    let mut messages = existing_messages(node, &key);
                    let ok = validator
                        .validate(entry, &mut messages, root)
                        .map_err(|source| callback_error(path, source))?;
                    if !ok || !messages.is_empty() {
                        let child = node.child_mut(&key);
                        child.messages = Some(messages);
                        child.is_valid = Some(ok);
                    }
                    list_valid &= ok;
                }
            }

            path.pop();
        }

        node.is_valid = Some(list_valid);
        Ok(list_valid)
    }
}

fn existing_messages(node: &MessageTree, key: &str) -> Vec<String> {
    node.child(key).and_then(|child| child.messages.clone()).unwrap_or_default()
}

fn callback_error(path: &[String], source: CallbackError) -> WalkError {
    WalkError::Callback { path: path.join("."), source }
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "list",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::validation::rules::{EntryRules, non_empty, trim_whitespace};

    fn tag_rules() -> Rules {
        Rules::new().prop("tags", Rules::new().entries(EntryRules::new().validator(
            |value, messages, _| {
                let empty = value.as_str().is_some_and(str::is_empty);
                if empty {
                    messages.push("empty".to_string());
                }
                Ok(!empty)
            },
        )))
    }

    #[test]
    fn failing_entry_is_reported_with_index() {
        let rules = tag_rules();
        let mut value = json!({ "name": "a", "tags": ["", "ok"] });

        let report = ValidationWalker::new(&rules, WalkOptions::FULL).walk(&mut value).unwrap();

        assert!(!report.valid);
        assert_eq!(
            serde_json::to_value(&report.validations).unwrap(),
            json!({ "tags": { "0": { "__isValid": false, "__messages": ["empty"] }, "__isValid": false } })
        );
    }

    #[test]
    fn passing_walk_prunes_to_empty() {
        let rules = tag_rules();
        let mut value = json!({ "name": "a", "tags": ["x", "y"] });

        let report = ValidationWalker::new(&rules, WalkOptions::FULL).walk(&mut value).unwrap();

        assert!(report.valid);
        assert!(report.validations.is_empty());
    }

    #[test]
    fn node_validator_combines_with_converter_messages() {
        let rules = Rules::new().prop(
            "name",
            Rules::new()
                .converter(|value, messages, _| {
                    let original = value.as_str().unwrap_or_default().to_string();
                    if original.trim() != original {
                        *value = json!(original.trim());
                        messages.push("trimmed".to_string());
                    }
                    Ok(())
                })
                .with_validator(Box::new(non_empty("required"))),
        );
        let mut value = json!({ "name": "   " });

        let report = ValidationWalker::new(&rules, WalkOptions::FULL).walk(&mut value).unwrap();

        assert!(!report.valid);
        assert_eq!(value, json!({ "name": "" }));
        assert_eq!(
            report.validations.child("name"),
            Some(&MessageTree::leaf(false, vec!["trimmed".to_string(), "required".to_string()]))
        );
    }

    #[test]
    fn converter_only_walk_never_invalidates() {
        let rules = Rules::new()
            .prop("name", Rules::new().with_converter(Box::new(trim_whitespace())))
            .prop("tags", Rules::new().with_validator(Box::new(non_empty("required"))));
        let mut value = json!({ "name": " a ", "tags": [] });

        let report =
            ValidationWalker::new(&rules, WalkOptions::CONVERT_ONLY).walk(&mut value).unwrap();

        assert!(report.valid);
        assert!(report.validations.is_empty());
        assert_eq!(value, json!({ "name": "a", "tags": [] }));
    }

    #[test]
    fn list_of_objects_descends_into_entries() {
        let rules = Rules::new().prop(
            "servers",
            Rules::new()
                .prop("host", Rules::new().with_validator(Box::new(non_empty("host required"))))
                .validator(|value, messages, _| {
                    let count = value.as_array().map_or(0, Vec::len);
                    if count > 2 {
                        messages.push("at most two servers".to_string());
                    }
                    Ok(count <= 2)
                }),
        );
        let mut value = json!({ "servers": [{ "host": "a" }, { "host": "" }] });

        let report = ValidationWalker::new(&rules, WalkOptions::FULL).walk(&mut value).unwrap();

        assert!(!report.valid);
        let servers = report.validations.child("servers").unwrap();
        assert_eq!(servers.is_valid, None);
        assert!(servers.entry(0).is_none());
        assert_eq!(
            servers.entry(1).and_then(|entry| entry.child("host")),
            Some(&MessageTree::leaf(false, vec!["host required".to_string()]))
        );
    }

    #[test]
    fn callbacks_see_whole_tree() {
        let rules = Rules::new().prop(
            "confirm",
            Rules::new().validator(|value, messages, root| {
                let matches = value == &root["password"];
                if !matches {
                    messages.push("does not match".to_string());
                }
                Ok(matches)
            }),
        );
        let mut value = json!({ "password": "x", "confirm": "y" });

        let report = ValidationWalker::new(&rules, WalkOptions::FULL).walk(&mut value).unwrap();
        assert!(!report.valid);
        assert!(report.validations.has_visible_messages());
    }

    #[test]
    fn entry_rules_on_scalar_is_schema_mismatch() {
        let rules = tag_rules();
        let mut value = json!({ "tags": "not a list" });

        let err = ValidationWalker::new(&rules, WalkOptions::FULL).walk(&mut value).unwrap_err();
        assert_eq!(err, WalkError::SchemaMismatch { path: "tags".to_string(), found: "string" });
    }

    #[test]
    fn failing_callback_aborts_walk() {
        let rules = Rules::new().prop(
            "servers",
            Rules::new().entries(
                EntryRules::new().converter(|_, _, _| Err(CallbackError::new("lookup failed"))),
            ),
        );
        let mut value = json!({ "servers": ["a"] });

        let err = ValidationWalker::new(&rules, WalkOptions::FULL).walk(&mut value).unwrap_err();
        assert_eq!(err.to_string(), "callback failed at 'servers.0': lookup failed");
    }

    #[test]
    fn disabled_walk_does_nothing() {
        let rules = tag_rules();
        let mut value = json!({ "tags": "not a list" });
        let options = WalkOptions { run_converters: false, run_validators: false };

        let report = ValidationWalker::new(&rules, options).walk(&mut value).unwrap();
        assert!(report.valid);
        assert!(report.validations.is_empty());
    }
}
