//! Routing a message tree to display locations.
//!
//! The dialog shows one container node at a time (the root, a nested
//! object, or one entry of a list of objects). Given the node on screen,
//! each reported node in a [`MessageTree`] lands in exactly one place:
//!
//! - the node on screen itself: the `current` area, without a path;
//! - a descendant of the node on screen: the visible property it sits
//!   under, with a path relative to that property and, for list entries,
//!   the entry index;
//! - anything else: the `global` area, with the full path from the root.
//!
//! Nodes that are flagged invalid but carry no text still mark their
//! property with a [`NO_MESSAGE`] placeholder. In the other areas they are
//! skipped.

use std::{collections::BTreeMap, fmt};

use confdialog_proto::{
    MessageTree, Property, PropertyType, Schema, message_tree::parse_index,
};

/// Placeholder text for invalid nodes that carry no message
pub const NO_MESSAGE: &str = "No message";

/// One step of the path to the node on screen
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DisplayStep {
    /// Property name
    pub name: String,
    /// Entry index when the property is a list of objects
    pub index: Option<usize>,
}

/// Which container node the dialog is showing
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct DisplayPath {
    steps: Vec<DisplayStep>,
}

impl DisplayPath {
    /// Top-level view
    pub fn root() -> Self {
        Self::default()
    }

    /// Step into a nested object
    #[must_use]
    pub fn property(mut self, name: impl Into<String>) -> Self {
        self.steps.push(DisplayStep { name: name.into(), index: None });
        self
    }

    /// Step into one entry of a list of objects
    #[must_use]
    pub fn entry(mut self, name: impl Into<String>, index: usize) -> Self {
        self.steps.push(DisplayStep { name: name.into(), index: Some(index) });
        self
    }

    /// Whether this is the top-level view
    pub fn is_root(&self) -> bool {
        self.steps.is_empty()
    }

    /// Steps from the root
    pub fn steps(&self) -> &[DisplayStep] {
        &self.steps
    }

    /// Check that every step names a container the dialog can show.
    ///
    /// Objects are entered by name, lists of objects by name and index.
    ///
    /// # Errors
    ///
    /// Returns a description of the first step that does not resolve.
    pub fn check(&self, schema: &Schema) -> Result<(), String> {
        let mut scope = Scope::Root(schema);
        for (depth, step) in self.steps.iter().enumerate() {
            let Some(property) = scope.child(&step.name) else {
                return Err(format!("no property '{}' at depth {depth}", step.name));
            };
            match (property.kind, step.index) {
                (PropertyType::Object, None) | (PropertyType::ListObject, Some(_)) => {},
                (PropertyType::ListObject, None) => {
                    return Err(format!("'{}' is a list and needs an entry index", step.name));
                },
                (kind, _) => {
                    return Err(format!("'{}' ({kind:?}) cannot be displayed", step.name));
                },
            }
            scope = Scope::Property(property);
        }
        Ok(())
    }
}

impl fmt::Display for DisplayPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.steps.is_empty() {
            return f.write_str("/");
        }
        for step in &self.steps {
            write!(f, "/{}", step.name)?;
            if let Some(index) = step.index {
                write!(f, "[{index}]")?;
            }
        }
        Ok(())
    }
}

/// Path element shown in front of a message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Badge {
    /// A named property
    Label(String),
    /// An entry of the property the message is attached to
    Index(usize),
    /// An entry of a named list property
    IndexedLabel {
        /// Entry index
        index: usize,
        /// Property label
        label: String,
    },
}

impl fmt::Display for Badge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Label(label) => f.write_str(label),
            Self::Index(index) => write!(f, "#{index}"),
            Self::IndexedLabel { index, label } => write!(f, "{label} #{index}"),
        }
    }
}

/// A single routed message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Feedback {
    /// Validity of the node that reported it
    pub is_valid: bool,
    /// Path from the display location to the reporting node
    pub preamble: Vec<Badge>,
    /// Message text; `None` for the [`NO_MESSAGE`] placeholder
    pub text: Option<String>,
    /// Entry of the property this message belongs to, for lists
    pub list_entry: Option<usize>,
}

impl fmt::Display for Feedback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for badge in &self.preamble {
            write!(f, "[{badge}] ")?;
        }
        f.write_str(self.text.as_deref().unwrap_or(NO_MESSAGE))
    }
}

/// Messages attached to one visible property
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PropertyFeedback {
    /// AND over the validity of every message below the property
    pub is_valid: bool,
    /// Messages in tree order
    pub messages: Vec<Feedback>,
}

/// A message tree split by display location
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoutedMessages {
    /// Messages about the node on screen
    pub current: Vec<Feedback>,
    /// Messages about nodes that are not visible
    pub global: Vec<Feedback>,
    /// Messages per visible property of the node on screen
    pub properties: BTreeMap<String, PropertyFeedback>,
}

impl RoutedMessages {
    /// Nothing to show anywhere
    pub fn is_empty(&self) -> bool {
        self.current.is_empty() && self.global.is_empty() && self.properties.is_empty()
    }
}

/// Split `tree` into display locations for the node at `displayed`
pub fn route_messages(
    schema: &Schema,
    tree: &MessageTree,
    displayed: &DisplayPath,
) -> RoutedMessages {
    let mut router = Router { displayed, routed: RoutedMessages::default() };

    if let Some(messages) = &tree.messages {
        let is_valid = tree.is_valid.unwrap_or(true);
        let area =
            if displayed.is_root() { &mut router.routed.current } else { &mut router.routed.global };
        area.extend(messages.iter().map(|text| Feedback {
            is_valid,
            preamble: Vec::new(),
            text: Some(text.clone()),
            list_entry: None,
        }));
    }

    router.visit(tree, Scope::Root(schema), &mut Vec::new());
    router.routed
}

#[derive(Clone, Copy)]
enum Scope<'a> {
    Root(&'a Schema),
    Property(&'a Property),
    Unknown,
}

impl<'a> Scope<'a> {
    fn child(self, name: &str) -> Option<&'a Property> {
        match self {
            Self::Root(schema) => schema.get(name),
            Self::Property(property) => property.child(name),
            Self::Unknown => None,
        }
    }
}

#[derive(Debug)]
struct PathStep {
    name: String,
    label: String,
    index: Option<usize>,
}

enum Location {
    Current,
    Property(usize),
    Global,
}

struct Router<'d> {
    displayed: &'d DisplayPath,
    routed: RoutedMessages,
}

impl Router<'_> {
    fn visit(&mut self, node: &MessageTree, scope: Scope<'_>, path: &mut Vec<PathStep>) {
        for (key, child) in node.ordered_children() {
            let entry_of_last =
                parse_index(key).filter(|_| path.last().is_some_and(|step| step.index.is_none()));

            if let Some(index) = entry_of_last {
                if let Some(last) = path.last_mut() {
                    last.index = Some(index);
                }
                self.emit(child, path);
                self.visit(child, scope, path);
                if let Some(last) = path.last_mut() {
                    last.index = None;
                }
            } else {
                let property = scope.child(key);
                let label = property.map_or_else(|| key.to_string(), |p| p.label.clone());
                path.push(PathStep { name: key.to_string(), label, index: None });
                self.emit(child, path);
                let inner = property.map_or(Scope::Unknown, Scope::Property);
                self.visit(child, inner, path);
                path.pop();
            }
        }
    }

    fn locate(&self, path: &[PathStep]) -> Location {
        let shown = self.displayed.steps();
        if path.len() < shown.len() {
            return Location::Global;
        }
        let within = shown
            .iter()
            .zip(path)
            .all(|(shown, step)| shown.name == step.name && shown.index == step.index);
        match (within, path.len() == shown.len()) {
            (false, _) => Location::Global,
            (true, true) => Location::Current,
            (true, false) => Location::Property(shown.len()),
        }
    }

    fn emit(&mut self, node: &MessageTree, path: &[PathStep]) {
        let (Some(is_valid), Some(messages)) = (node.is_valid, &node.messages) else {
            return;
        };

        match self.locate(path) {
            Location::Current => {
                self.routed.current.extend(messages.iter().map(|text| Feedback {
                    is_valid,
                    preamble: Vec::new(),
                    text: Some(text.clone()),
                    list_entry: None,
                }));
            },
            Location::Global => {
                let preamble: Vec<Badge> = path.iter().map(full_badge).collect();
                self.routed.global.extend(messages.iter().map(|text| Feedback {
                    is_valid,
                    preamble: preamble.clone(),
                    text: Some(text.clone()),
                    list_entry: None,
                }));
            },
            Location::Property(depth) => {
                let anchor = &path[depth];
                let preamble: Vec<Badge> = anchor
                    .index
                    .map(Badge::Index)
                    .into_iter()
                    .chain(path[depth + 1..].iter().map(full_badge))
                    .collect();
                let feedback = self
                    .routed
                    .properties
                    .entry(anchor.name.clone())
                    .or_insert_with(|| PropertyFeedback { is_valid: true, messages: Vec::new() });
                feedback.is_valid &= is_valid;

                if messages.is_empty() {
                    feedback.messages.push(Feedback {
                        is_valid,
                        preamble,
                        text: None,
                        list_entry: anchor.index,
                    });
                } else {
                    feedback.messages.extend(messages.iter().map(|text| Feedback {
                        is_valid,
                        preamble: preamble.clone(),
                        text: Some(text.clone()),
                        list_entry: anchor.index,
                    }));
                }
            },
        }
    }
}

fn full_badge(step: &PathStep) -> Badge {
    match step.index {
        Some(index) => Badge::IndexedLabel { index, label: step.label.clone() },
        None => Badge::Label(step.label.clone()),
    }
}
