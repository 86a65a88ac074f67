//! Errors raised by channels, transports, frames and configuration.

use thiserror::Error;

/// Message used when the background cannot resolve a tab to forward to.
pub const NO_ACTIVE_TAB: &str = "No active tab found for content script communication";

/// Errors surfaced to the caller of a channel operation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChannelError {
    /// A request named a channel that no context ever registered.
    #[error(
        "No handler registered for channel \"{channel}\". Register one with `on()` in the context that should answer it"
    )]
    NoHandlerRegistered {
        /// The requested channel name.
        channel: String,
    },

    /// A request named a channel whose handler was explicitly unregistered.
    #[error("Handler for channel \"{channel}\" was unregistered")]
    HandlerCanceled {
        /// The requested channel name.
        channel: String,
    },

    /// The handler itself returned an error or panicked.
    #[error("{0}")]
    HandlerFailed(String),

    /// The underlying message-passing primitive failed.
    #[error("Transport unavailable: {0}")]
    TransportUnavailable(String),

    /// A request was delivered but nothing ever replied to it.
    #[error("No response received for channel \"{channel}\"")]
    NoResponse {
        /// The requested channel name.
        channel: String,
    },

    /// A second handler was registered for a channel in the same context.
    #[error("A handler is already registered for channel \"{channel}\" in this context")]
    DuplicateHandler {
        /// The channel name.
        channel: String,
    },

    /// A remote context answered with a failure response; the message is
    /// the remote error verbatim.
    #[error("{0}")]
    Rejected(String),

    /// A payload could not be serialized for the wire.
    #[error("Failed to encode payload: {0}")]
    Encode(String),

    /// A payload could not be deserialized from the wire.
    #[error("Failed to decode payload: {0}")]
    Decode(String),

    /// A frame violated the wire protocol.
    #[error("Protocol violation: {0}")]
    Protocol(String),
}

/// Errors raised by a [crate::Transport] or [crate::TabMessenger].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// The receiving context is gone.
    #[error("Receiving end of the transport is closed")]
    Closed,

    /// The port closed while a request was still pending.
    #[error("Port disconnected before a response arrived")]
    Disconnected,

    /// Tab resolution found no tab to deliver to.
    #[error("No active tab found for content script communication")]
    NoActiveTab,

    /// A host-specific failure.
    #[error("{0}")]
    Host(String),
}

impl From<TransportError> for ChannelError {
    fn from(error: TransportError) -> Self {
        match error {
            TransportError::NoActiveTab => ChannelError::Rejected(NO_ACTIVE_TAB.to_string()),
            other => ChannelError::TransportUnavailable(other.to_string()),
        }
    }
}

/// Violations detected when validating a [crate::WireMessage].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WireError {
    /// Requests and responses must carry a correlation id.
    #[error("{kind} frame on channel \"{channel}\" has no correlation id")]
    MissingCorrelationId {
        /// The frame kind.
        kind: String,
        /// The channel of the frame.
        channel: String,
    },

    /// A failed response must explain itself.
    #[error("Failed response on channel \"{channel}\" carries no error message")]
    MissingError {
        /// The channel of the frame.
        channel: String,
    },

    /// Only failed responses may carry an error.
    #[error("Frame on channel \"{channel}\" carries an error without being a failed response")]
    UnexpectedError {
        /// The channel of the frame.
        channel: String,
    },
}

impl From<WireError> for ChannelError {
    fn from(error: WireError) -> Self {
        ChannelError::Protocol(error.to_string())
    }
}

/// Errors raised while loading a [crate::MessagingConfig].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// The configuration was not valid JSON of the expected shape.
    #[error("Failed to parse configuration: {0}")]
    Parse(String),

    /// A value was out of range.
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn it_distinguishes_canceled_from_unregistered() {
        let canceled = ChannelError::HandlerCanceled {
            channel: "exec-sql".into(),
        }
        .to_string();
        let missing = ChannelError::NoHandlerRegistered {
            channel: "exec-sql".into(),
        }
        .to_string();

        assert_ne!(canceled, missing);
        assert!(canceled.contains("unregistered"));
        assert!(missing.contains("Register one"));
    }

    #[test]
    fn it_keeps_the_no_active_tab_message_intact() {
        let error: ChannelError = TransportError::NoActiveTab.into();
        assert_eq!(error.to_string(), NO_ACTIVE_TAB);
    }

    #[test]
    fn it_reports_remote_rejections_verbatim() {
        assert_eq!(ChannelError::Rejected("boom".into()).to_string(), "boom");
    }
}
