//! The background context: router, panel port and content uplink.

use web_sqlite_messaging::{
    ContextId, MailboxSender, MessagingConfig, Messenger, PANEL_CHANNELS, Passthrough, PortEnd,
    Router, TabMessenger,
};

use crate::InspectorError;

/// The extension's background context.
///
/// Owns the [Router] and relays every panel channel to the content script
/// of the inspected tab.
#[derive(Debug, Clone)]
pub struct Background {
    router: Router,
    messenger: Messenger,
    config: MessagingConfig,
}

impl Background {
    /// Validate `config` and start coordinating, reaching content scripts
    /// through `tabs`.
    pub async fn start<T>(config: MessagingConfig, tabs: T) -> Result<Self, InspectorError>
    where
        T: TabMessenger + 'static,
    {
        config.validate()?;

        let router = Router::new();
        let messenger = router.messenger();

        let passthrough = Passthrough::new(tabs);
        passthrough.install(&messenger, PANEL_CHANNELS).await?;
        router.attach_tabs(passthrough);

        tracing::info!(channels = PANEL_CHANNELS.len(), "Background started");
        Ok(Self {
            router,
            messenger,
            config,
        })
    }

    /// The router.
    pub fn router(&self) -> &Router {
        &self.router
    }

    /// The background's own messenger.
    pub fn messenger(&self) -> &Messenger {
        &self.messenger
    }

    /// The configuration this background was started with.
    pub fn config(&self) -> &MessagingConfig {
        &self.config
    }

    /// Accept a DevTools panel connection, returning the panel's end of the
    /// port.
    pub fn connect_panel(&self) -> PortEnd {
        tracing::debug!("Panel connected");
        self.router
            .open_port(ContextId::Panel, self.config.mailbox_capacity)
    }

    /// A `sendMessage` handle for content scripts talking to the background.
    pub fn content_uplink(&self) -> MailboxSender {
        self.router
            .open_mailbox(ContextId::ContentIsolated, self.config.mailbox_capacity)
    }

    /// Drop the panel's registrations after its port closed.
    pub fn disconnect_panel(&self) {
        tracing::debug!("Panel disconnected");
        self.router.disconnect(ContextId::Panel);
    }

    /// Stop routing.
    pub fn shutdown(&self) {
        self.router.shutdown();
        tracing::info!("Background stopped");
    }
}
