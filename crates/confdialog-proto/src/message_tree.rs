//! Validation message trees.
//!
//! A [`MessageTree`] mirrors the shape of the value tree it was produced
//! from. Every node may carry a validity flag (`__isValid`) and an ordered
//! list of messages (`__messages`); every other key is a child, named after
//! the property it annotates or, for list entries, after the entry index.
//!
//! # Invariants
//!
//! - **Implicit Pass**: a node whose flag is not `false` and whose message
//!   list is empty says nothing. [`MessageTree::prune`] removes such leaves
//!   and strips such flags from inner nodes, so the pruned shape shows only
//!   where something was reported.
//! - **Idempotent Pruning**: pruning a pruned tree is a no-op.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Per-node validity and messages, plus children
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageTree {
    /// Validity of this node
    #[serde(rename = "__isValid", default, skip_serializing_if = "Option::is_none")]
    pub is_valid: Option<bool>,
    /// Messages reported for this node
    #[serde(rename = "__messages", default, skip_serializing_if = "Option::is_none")]
    pub messages: Option<Vec<String>>,
    /// Annotated children, keyed by property name or entry index
    #[serde(flatten)]
    pub children: BTreeMap<String, MessageTree>,
}

impl MessageTree {
    /// Empty tree
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Node with a flag and messages but no children
    #[must_use]
    pub fn leaf(is_valid: bool, messages: Vec<String>) -> Self {
        Self { is_valid: Some(is_valid), messages: Some(messages), children: BTreeMap::new() }
    }

    /// Add a child (builder style)
    #[must_use]
    pub fn with_child(mut self, key: impl Into<String>, child: MessageTree) -> Self {
        self.children.insert(key.into(), child);
        self
    }

    /// Set the validity flag (builder style)
    #[must_use]
    pub fn with_validity(mut self, is_valid: bool) -> Self {
        self.is_valid = Some(is_valid);
        self
    }

    /// Set the message list (builder style)
    #[must_use]
    pub fn with_messages<I, S>(mut self, messages: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.messages = Some(messages.into_iter().map(Into::into).collect());
        self
    }

    /// Child for a list entry
    #[must_use]
    pub fn entry(&self, index: usize) -> Option<&MessageTree> {
        self.children.get(&index_key(index))
    }

    /// Child by property name
    #[must_use]
    pub fn child(&self, name: &str) -> Option<&MessageTree> {
        self.children.get(name)
    }

    /// Child by key, created empty if missing
    pub fn child_mut(&mut self, key: &str) -> &mut MessageTree {
        self.children.entry(key.to_string()).or_default()
    }

    /// No flag, no messages, no children
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.is_valid.is_none() && self.messages.is_none() && self.children.is_empty()
    }

    /// Whether this node says nothing on its own
    #[must_use]
    pub fn is_implicit_pass(&self) -> bool {
        self.is_valid != Some(false) && self.messages.as_ref().is_none_or(Vec::is_empty)
    }

    /// Whether no node in the tree is flagged invalid
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.is_valid != Some(false) && self.children.values().all(MessageTree::is_valid)
    }

    /// Whether any node anywhere carries a non-empty message list.
    ///
    /// Validity flags are ignored: an invalid node without text has nothing
    /// to show.
    #[must_use]
    pub fn has_visible_messages(&self) -> bool {
        self.messages.as_ref().is_some_and(|messages| !messages.is_empty())
            || self.children.values().any(MessageTree::has_visible_messages)
    }

    /// Insert `child` under `key` unless it says nothing.
    ///
    /// Children that have their own children but are otherwise an implicit
    /// pass are kept with their flags stripped.
    pub fn insert_pruned(&mut self, key: impl Into<String>, mut child: MessageTree) {
        if child.is_implicit_pass() {
            if child.children.is_empty() {
                return;
            }
            child.is_valid = None;
            child.messages = None;
        }
        self.children.insert(key.into(), child);
    }

    /// Normalize the whole tree, root included.
    pub fn prune(&mut self) {
        let children = std::mem::take(&mut self.children);
        for (key, mut child) in children {
            child.prune();
            self.insert_pruned(key, child);
        }
        if self.is_implicit_pass() {
            self.is_valid = None;
            self.messages = None;
        }
    }

    /// Pruned copy
    #[must_use]
    pub fn pruned(mut self) -> Self {
        self.prune();
        self
    }

    /// Children in display order: list indices numerically, names lexically
    #[must_use]
    pub fn ordered_children(&self) -> Vec<(&str, &MessageTree)> {
        let mut children: Vec<_> =
            self.children.iter().map(|(key, child)| (key.as_str(), child)).collect();
        children.sort_by(|(a, _), (b, _)| match (parse_index(a), parse_index(b)) {
            (Some(a), Some(b)) => a.cmp(&b),
            (Some(_), None) => std::cmp::Ordering::Less,
            (None, Some(_)) => std::cmp::Ordering::Greater,
            (None, None) => a.cmp(b),
        });
        children
    }
}

/// Key used for the child annotating list entry `index`
#[must_use]
pub fn index_key(index: usize) -> String {
    index.to_string()
}

/// Inverse of [`index_key`]; rejects names that merely contain digits
#[must_use]
pub fn parse_index(key: &str) -> Option<usize> {
    if key.is_empty() || !key.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    if key.len() > 1 && key.starts_with('0') {
        return None;
    }
    key.parse().ok()
}
