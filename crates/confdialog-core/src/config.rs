//! Host configuration.
//!
//! Plain structs with public fields and `Default`, in the same style as
//! [`HandshakeConfig`].

use regex::Regex;

use crate::{handshake::HandshakeConfig, transport::Origin};

/// Configuration of one host-side dialog
#[derive(Debug, Clone)]
pub struct HostConfig {
    /// Origin the dialog is served from; handshake messages from any other
    /// origin are ignored
    pub dialog_origin: Origin,
    /// Where the dialog document is loaded from
    pub dialog_url: String,
    /// Dialog title sent with `Configure`
    pub title: String,
    /// Size hint sent with `Configure`
    pub dialog_size: Option<String>,
    /// Key under which values are persisted
    pub storage_key: String,
    /// Hosts on which the dialog must not be opened
    pub prohibited_hosts: Vec<Regex>,
    /// Handshake settings
    pub handshake: HandshakeConfig,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            dialog_origin: Origin::new("null"),
            dialog_url: String::new(),
            title: "Configure".to_string(),
            dialog_size: None,
            storage_key: "confdialog-values".to_string(),
            prohibited_hosts: Vec::new(),
            handshake: HandshakeConfig::default(),
        }
    }
}

impl HostConfig {
    /// Configuration for a dialog served from `dialog_origin`
    pub fn new(dialog_origin: Origin, dialog_url: impl Into<String>) -> Self {
        Self { dialog_origin, dialog_url: dialog_url.into(), ..Self::default() }
    }

    /// Compile and add prohibited host patterns
    ///
    /// # Errors
    ///
    /// Returns the first pattern that fails to compile.
    pub fn prohibit_hosts<'a>(
        mut self,
        patterns: impl IntoIterator<Item = &'a str>,
    ) -> Result<Self, regex::Error> {
        for pattern in patterns {
            self.prohibited_hosts.push(Regex::new(pattern)?);
        }
        Ok(self)
    }

    /// Whether the dialog may not be opened on `host`
    #[must_use]
    pub fn is_prohibited(&self, host: &str) -> bool {
        self.prohibited_hosts.iter().any(|pattern| pattern.is_match(host))
    }
}
