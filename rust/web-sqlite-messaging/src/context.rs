//! Identities of the extension's execution contexts.

use std::fmt::Display;

use serde::{Deserialize, Serialize};

/// The isolated execution contexts of the extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ContextId {
    /// The DevTools panel.
    Panel,
    /// The background service worker; always the coordinator.
    Background,
    /// The content script's ISOLATED world, which has extension API access.
    ContentIsolated,
    /// The content script's MAIN world, which shares the page's globals.
    ContentMain,
    /// The offscreen document.
    Offscreen,
}

impl ContextId {
    /// Tab-scoped contexts are reached through the host's tab messaging
    /// primitive rather than a global transport.
    pub fn is_tab_scoped(&self) -> bool {
        matches!(self, ContextId::ContentIsolated | ContextId::ContentMain)
    }

    /// The kebab-case name used on the wire and in logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            ContextId::Panel => "panel",
            ContextId::Background => "background",
            ContextId::ContentIsolated => "content-isolated",
            ContextId::ContentMain => "content-main",
            ContextId::Offscreen => "offscreen",
        }
    }
}

impl Display for ContextId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a context takes part in routing, decided once at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Holds the authoritative registry and dispatches every request.
    Coordinator,
    /// Registers handlers with, and sends through, the coordinator.
    Satellite,
}
