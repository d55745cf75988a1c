//! Validator and converter trees.
//!
//! [`Rules`] is keyed like the value tree: each node may carry a validator,
//! a converter, per-entry rules for lists, and rules for named children. It
//! lives only on the host and is never serialized.
//!
//! Callbacks see three things: the value of their node, that node's message
//! list (to append to), and a read-only snapshot of the whole submitted
//! tree for cross-field checks.

use std::{collections::BTreeMap, fmt};

use serde_json::Value;
use thiserror::Error;

/// A callback could not run to completion.
///
/// This aborts the whole walk. It is distinct from a validator returning
/// `false`, which is an ordinary validation failure.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct CallbackError {
    message: String,
}

impl CallbackError {
    /// Create an error
    pub fn new(message: impl Into<String>) -> Self {
        Self { message: message.into() }
    }
}

/// Result of a callback
pub type CallbackResult<T> = Result<T, CallbackError>;

/// Decides whether a value is acceptable
pub trait Validator: Send + Sync {
    /// Return validity, appending any messages for the user
    ///
    /// # Errors
    ///
    /// Returns [`CallbackError`] if the check itself cannot be performed.
    fn validate(
        &self,
        value: &Value,
        messages: &mut Vec<String>,
        root: &Value,
    ) -> CallbackResult<bool>;
}

/// Normalizes a value in place
pub trait Converter: Send + Sync {
    /// Rewrite `value`, appending advisory messages if useful
    ///
    /// # Errors
    ///
    /// Returns [`CallbackError`] if the value cannot be converted at all.
    fn convert(
        &self,
        value: &mut Value,
        messages: &mut Vec<String>,
        root: &Value,
    ) -> CallbackResult<()>;
}

impl<F> Validator for F
where
    F: Fn(&Value, &mut Vec<String>, &Value) -> CallbackResult<bool> + Send + Sync,
{
    fn validate(
        &self,
        value: &Value,
        messages: &mut Vec<String>,
        root: &Value,
    ) -> CallbackResult<bool> {
        self(value, messages, root)
    }
}

impl<F> Converter for F
where
    F: Fn(&mut Value, &mut Vec<String>, &Value) -> CallbackResult<()> + Send + Sync,
{
    fn convert(
        &self,
        value: &mut Value,
        messages: &mut Vec<String>,
        root: &Value,
    ) -> CallbackResult<()> {
        self(value, messages, root)
    }
}

/// Rules applied to every entry of a list
#[derive(Default)]
pub struct EntryRules {
    pub(crate) validator: Option<Box<dyn Validator>>,
    pub(crate) converter: Option<Box<dyn Converter>>,
}

impl EntryRules {
    /// No entry rules
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate every entry
    #[must_use]
    pub fn validator<F>(mut self, f: F) -> Self
    where
        F: Fn(&Value, &mut Vec<String>, &Value) -> CallbackResult<bool> + Send + Sync + 'static,
    {
        self.validator = Some(Box::new(f));
        self
    }

    /// Convert every entry
    #[must_use]
    pub fn converter<F>(mut self, f: F) -> Self
    where
        F: Fn(&mut Value, &mut Vec<String>, &Value) -> CallbackResult<()> + Send + Sync + 'static,
    {
        self.converter = Some(Box::new(f));
        self
    }
}

/// Rules for one node and its descendants
#[derive(Default)]
pub struct Rules {
    pub(crate) validator: Option<Box<dyn Validator>>,
    pub(crate) converter: Option<Box<dyn Converter>>,
    pub(crate) entries: Option<EntryRules>,
    pub(crate) props: BTreeMap<String, Rules>,
}

impl Rules {
    /// No rules
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate this node
    #[must_use]
    pub fn validator<F>(self, f: F) -> Self
    where
        F: Fn(&Value, &mut Vec<String>, &Value) -> CallbackResult<bool> + Send + Sync + 'static,
    {
        self.with_validator(Box::new(f))
    }

    /// Convert this node
    #[must_use]
    pub fn converter<F>(self, f: F) -> Self
    where
        F: Fn(&mut Value, &mut Vec<String>, &Value) -> CallbackResult<()> + Send + Sync + 'static,
    {
        self.with_converter(Box::new(f))
    }

    /// Validate this node with a named validator type
    #[must_use]
    pub fn with_validator(mut self, validator: Box<dyn Validator>) -> Self {
        self.validator = Some(validator);
        self
    }

    /// Convert this node with a named converter type
    #[must_use]
    pub fn with_converter(mut self, converter: Box<dyn Converter>) -> Self {
        self.converter = Some(converter);
        self
    }

    /// Rules for every entry of this list
    #[must_use]
    pub fn entries(mut self, entries: EntryRules) -> Self {
        self.entries = Some(entries);
        self
    }

    /// Rules for a named child
    #[must_use]
    pub fn prop(mut self, name: impl Into<String>, rules: Rules) -> Self {
        self.props.insert(name.into(), rules);
        self
    }

    /// Rules for a named child, if any
    #[must_use]
    pub fn child(&self, name: &str) -> Option<&Rules> {
        self.props.get(name)
    }

    /// Whether any node in this tree carries a converter
    #[must_use]
    pub fn has_converters(&self) -> bool {
        self.converter.is_some()
            || self.entries.as_ref().is_some_and(|entries| entries.converter.is_some())
            || self.props.values().any(Rules::has_converters)
    }
}

impl fmt::Debug for Rules {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Rules")
            .field("validator", &self.validator.is_some())
            .field("converter", &self.converter.is_some())
            .field(
                "entries",
                &self.entries.as_ref().map(|entries| {
                    (entries.validator.is_some(), entries.converter.is_some())
                }),
            )
            .field("props", &self.props)
            .finish()
    }
}

/// Validator rejecting empty strings, empty lists and null
pub fn non_empty(message: impl Into<String>) -> impl Validator + 'static {
    let message = message.into();
    move |value: &Value, messages: &mut Vec<String>, _root: &Value| -> CallbackResult<bool> {
        let empty = match value {
            Value::Null => true,
            Value::String(text) => text.trim().is_empty(),
            Value::Array(entries) => entries.is_empty(),
            _ => false,
        };
        if empty {
            messages.push(message.clone());
        }
        Ok(!empty)
    }
}

/// Converter trimming surrounding whitespace from strings
pub fn trim_whitespace() -> impl Converter + 'static {
    |value: &mut Value, _messages: &mut Vec<String>, _root: &Value| -> CallbackResult<()> {
        if let Value::String(text) = value {
            let trimmed = text.trim().to_string();
            if trimmed.len() != text.len() {
                *text = trimmed;
            }
        }
        Ok(())
    }
}
