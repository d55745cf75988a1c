//! Validation and conversion of submitted value trees.
//!
//! - [`rules`]: host-side validator/converter trees
//! - [`walker`]: the post-order walk producing a [`MessageTree`]
//! - [`routing`]: splitting a message tree by display location
//!
//! [`MessageTree`]: confdialog_proto::MessageTree

pub mod routing;
pub mod rules;
pub mod walker;

pub use routing::{
    Badge, DisplayPath, DisplayStep, Feedback, NO_MESSAGE, PropertyFeedback, RoutedMessages,
    route_messages,
};
pub use rules::{
    CallbackError, CallbackResult, Converter, EntryRules, Rules, Validator, non_empty,
    trim_whitespace,
};
pub use walker::{ValidationWalker, WalkError, WalkOptions, WalkReport};
