//! Lifecycle messages: the application protocol carried inside envelopes.
//!
//! Each message is a JSON object tagged by its `lifecycle` field. Requests
//! and responses are correlated by name only: the answer to `X` is
//! `XSuccess` or `XFailure`. There is no request ID, so at most one request
//! of a given kind can be outstanding.
//!
//! | message | direction | answer |
//! |---|---|---|
//! | `Configure` | host → dialog | `ConfigureSuccess` / `ConfigureFailure` |
//! | `UpdateValues`, `UpdateValue` | host → dialog | none |
//! | `Save` | dialog → host | `SaveSuccess` / `SaveFailure` |
//! | `Close` | dialog → host | none |

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{
    MAX_PAYLOAD_SIZE,
    errors::{ProtocolError, Result},
    message_tree::MessageTree,
    schema::Schema,
};

/// Plaintext of the sealed handshake confirmation
pub const GET_CONFIGURATION: &str = "GetConfiguration";

/// Everything the dialog needs to render
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigurePayload {
    /// Schema of the editable properties
    pub props: Schema,
    /// Current value of every property
    pub values: Value,
    /// Dialog title
    pub title: String,
    /// Size hint for the dialog surface
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dlg_size: Option<String>,
}

/// Application-level messages
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "lifecycle")]
pub enum Lifecycle {
    /// Deliver schema and values; dialog renders
    Configure(ConfigurePayload),
    /// Dialog rendered the configuration
    ConfigureSuccess,
    /// Dialog could not render the configuration
    ConfigureFailure,
    /// Replace several top-level values
    UpdateValues {
        /// New values by property name
        values: Map<String, Value>,
    },
    /// Replace one top-level value
    #[serde(rename_all = "camelCase")]
    UpdateValue {
        /// Property to patch
        property_name: String,
        /// New value
        property_value: Value,
    },
    /// Submit the edited value tree
    Save {
        /// Edited values
        values: Value,
    },
    /// Submitted values were valid and stored
    SaveSuccess {
        /// Pruned message tree (possibly empty)
        validations: MessageTree,
    },
    /// Submitted values were rejected, or validation itself failed
    SaveFailure {
        /// Pruned message tree; absent when a callback failed
        #[serde(default, skip_serializing_if = "Option::is_none")]
        validations: Option<MessageTree>,
    },
    /// Dialog is going away
    Close,
}

/// Request kinds, used for response correlation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LifecycleKind {
    /// `Configure`
    Configure,
    /// `UpdateValues`
    UpdateValues,
    /// `UpdateValue`
    UpdateValue,
    /// `Save`
    Save,
    /// `Close`
    Close,
}

impl LifecycleKind {
    /// Wire name of the request
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Configure => "Configure",
            Self::UpdateValues => "UpdateValues",
            Self::UpdateValue => "UpdateValue",
            Self::Save => "Save",
            Self::Close => "Close",
        }
    }

    /// Whether the receiver answers this request
    #[must_use]
    pub const fn expects_response(self) -> bool {
        matches!(self, Self::Configure | Self::Save)
    }

    /// Wire name of the response with the given outcome
    #[must_use]
    pub fn response_name(self, outcome: Outcome) -> String {
        format!("{}{}", self.as_str(), outcome.suffix())
    }
}

impl fmt::Display for LifecycleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Response outcome
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Outcome {
    /// `…Success`
    Success,
    /// `…Failure`
    Failure,
}

impl Outcome {
    /// Suffix appended to the request name
    #[must_use]
    pub const fn suffix(self) -> &'static str {
        match self {
            Self::Success => "Success",
            Self::Failure => "Failure",
        }
    }
}

impl Lifecycle {
    /// Request kind this message is, or answers
    #[must_use]
    pub const fn kind(&self) -> LifecycleKind {
        match self {
            Self::Configure(_) | Self::ConfigureSuccess | Self::ConfigureFailure => {
                LifecycleKind::Configure
            },
            Self::UpdateValues { .. } => LifecycleKind::UpdateValues,
            Self::UpdateValue { .. } => LifecycleKind::UpdateValue,
            Self::Save { .. } | Self::SaveSuccess { .. } | Self::SaveFailure { .. } => {
                LifecycleKind::Save
            },
            Self::Close => LifecycleKind::Close,
        }
    }

    /// Outcome, if this is a response
    #[must_use]
    pub const fn outcome(&self) -> Option<Outcome> {
        match self {
            Self::ConfigureSuccess | Self::SaveSuccess { .. } => Some(Outcome::Success),
            Self::ConfigureFailure | Self::SaveFailure { .. } => Some(Outcome::Failure),
            _ => None,
        }
    }

    /// Wire name (the `lifecycle` tag)
    #[must_use]
    pub fn name(&self) -> String {
        match self.outcome() {
            Some(outcome) => self.kind().response_name(outcome),
            None => self.kind().as_str().to_string(),
        }
    }

    /// Build the response to a request of `kind`.
    ///
    /// Returns `None` for kinds that are not answered. Configure responses
    /// carry no validations; `SaveSuccess` without a tree carries an empty one.
    #[must_use]
    pub fn response(
        kind: LifecycleKind,
        outcome: Outcome,
        validations: Option<MessageTree>,
    ) -> Option<Self> {
        match (kind, outcome) {
            (LifecycleKind::Configure, Outcome::Success) => Some(Self::ConfigureSuccess),
            (LifecycleKind::Configure, Outcome::Failure) => Some(Self::ConfigureFailure),
            (LifecycleKind::Save, Outcome::Success) => {
                Some(Self::SaveSuccess { validations: validations.unwrap_or_default() })
            },
            (LifecycleKind::Save, Outcome::Failure) => Some(Self::SaveFailure { validations }),
            _ => None,
        }
    }

    /// Encode as UTF-8 JSON
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::JsonEncode`] if serialization fails, or
    /// [`ProtocolError::PayloadTooLarge`] if the message exceeds
    /// [`MAX_PAYLOAD_SIZE`].
    pub fn to_json_bytes(&self) -> Result<Vec<u8>> {
        let bytes = serde_json::to_vec(self).map_err(|e| ProtocolError::JsonEncode(e.to_string()))?;
        if bytes.len() > MAX_PAYLOAD_SIZE {
            return Err(ProtocolError::PayloadTooLarge { size: bytes.len(), max: MAX_PAYLOAD_SIZE });
        }
        Ok(bytes)
    }

    /// Decode from decrypted bytes: size check, UTF-8, then JSON
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::PayloadTooLarge`], [`ProtocolError::InvalidUtf8`]
    /// or [`ProtocolError::JsonDecode`].
    pub fn from_json_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() > MAX_PAYLOAD_SIZE {
            return Err(ProtocolError::PayloadTooLarge { size: bytes.len(), max: MAX_PAYLOAD_SIZE });
        }
        let text = std::str::from_utf8(bytes)
            .map_err(|e| ProtocolError::InvalidUtf8 { valid_up_to: e.valid_up_to() })?;
        serde_json::from_str(text).map_err(|e| ProtocolError::JsonDecode(e.to_string()))
    }
}
