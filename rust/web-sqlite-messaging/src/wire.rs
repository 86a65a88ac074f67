//! The message envelope shared by every execution context.
//!
//! A [WireMessage] is the only thing that ever crosses a context boundary.
//! Its JSON shape is a stable contract:
//!
//! ```text
//! {
//!   "kind": "request" | "response" | "register" | "unregister",
//!   "channel": "exec-sql",
//!   "correlationId": "01J...",   // request/response only
//!   "payload": { ... },          // request args or response value
//!   "success": true,             // response only
//!   "error": "..."               // response only, iff success == false
//! }
//! ```

use std::fmt::Display;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use ulid::{Generator, Ulid};

use crate::{ChannelError, WireError};

/// The four frame kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    /// A call awaiting exactly one response.
    Request,
    /// The answer to a request with the same correlation id.
    Response,
    /// A satellite announcing that it handles a channel.
    Register,
    /// A satellite withdrawing a previously registered channel.
    Unregister,
}

impl Display for MessageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            MessageKind::Request => "request",
            MessageKind::Response => "response",
            MessageKind::Register => "register",
            MessageKind::Unregister => "unregister",
        };
        f.write_str(name)
    }
}

/// Token linking a request to its response.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationId(String);

impl CorrelationId {
    /// View the id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for CorrelationId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<Ulid> for CorrelationId {
    fn from(value: Ulid) -> Self {
        Self(value.to_string())
    }
}

impl Display for CorrelationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Produces strictly increasing correlation ids for one context.
///
/// Ids are ULIDs drawn from a monotonic generator, so two ids handed out by
/// the same instance never collide even within one millisecond.
pub struct CorrelationIds {
    generator: Mutex<Generator>,
}

impl Default for CorrelationIds {
    fn default() -> Self {
        Self {
            generator: Mutex::new(Generator::new()),
        }
    }
}

impl CorrelationIds {
    /// Hand out the next id.
    pub fn next(&self) -> CorrelationId {
        match self.generator.lock().generate() {
            Ok(id) => id.into(),
            // The random component overflowed within this millisecond
            Err(_) => Ulid::new().into(),
        }
    }
}

impl std::fmt::Debug for CorrelationIds {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CorrelationIds").finish_non_exhaustive()
    }
}

/// The unit of inter-context communication.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireMessage {
    /// What this frame is.
    pub kind: MessageKind,
    /// The logical operation, e.g. `"log:add"`.
    pub channel: String,
    /// Present on requests and responses.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<CorrelationId>,
    /// Request arguments or response value.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
    /// Response outcome.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub success: Option<bool>,
    /// Human readable failure, present iff `success == false`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl WireMessage {
    /// Build a request frame.
    pub fn request(
        channel: impl Into<String>,
        correlation_id: CorrelationId,
        payload: Value,
    ) -> Self {
        Self {
            kind: MessageKind::Request,
            channel: channel.into(),
            correlation_id: Some(correlation_id),
            payload: Some(payload),
            success: None,
            error: None,
        }
    }

    /// Build a register frame.
    pub fn register(channel: impl Into<String>) -> Self {
        Self::announcement(MessageKind::Register, channel)
    }

    /// Build an unregister frame.
    pub fn unregister(channel: impl Into<String>) -> Self {
        Self::announcement(MessageKind::Unregister, channel)
    }

    fn announcement(kind: MessageKind, channel: impl Into<String>) -> Self {
        Self {
            kind,
            channel: channel.into(),
            correlation_id: None,
            payload: None,
            success: None,
            error: None,
        }
    }

    /// Build the successful response to this request.
    pub fn succeed(&self, payload: Value) -> Self {
        Self {
            kind: MessageKind::Response,
            channel: self.channel.clone(),
            correlation_id: self.correlation_id.clone(),
            payload: Some(payload),
            success: Some(true),
            error: None,
        }
    }

    /// Build the failed response to this request.
    pub fn fail(&self, error: impl Into<String>) -> Self {
        Self {
            kind: MessageKind::Response,
            channel: self.channel.clone(),
            correlation_id: self.correlation_id.clone(),
            payload: None,
            success: Some(false),
            error: Some(error.into()),
        }
    }

    /// Build the response to this request from a handler outcome.
    pub fn respond(&self, outcome: Result<Value, String>) -> Self {
        match outcome {
            Ok(payload) => self.succeed(payload),
            Err(error) => self.fail(error),
        }
    }

    /// Re-address a response so that it answers `request` instead of the
    /// frame it was originally produced for. Used when relaying a reply
    /// received on a forwarded hop.
    pub fn answering(mut self, request: &WireMessage) -> Self {
        self.correlation_id = request.correlation_id.clone();
        self.channel = request.channel.clone();
        self
    }

    /// Check the structural invariants of the frame.
    pub fn validate(&self) -> Result<(), WireError> {
        match self.kind {
            MessageKind::Request | MessageKind::Response if self.correlation_id.is_none() => {
                return Err(WireError::MissingCorrelationId {
                    kind: self.kind.to_string(),
                    channel: self.channel.clone(),
                });
            }
            _ => (),
        }

        let failed = self.kind == MessageKind::Response && self.success == Some(false);
        match (failed, &self.error) {
            (true, None) => Err(WireError::MissingError {
                channel: self.channel.clone(),
            }),
            (false, Some(_)) => Err(WireError::UnexpectedError {
                channel: self.channel.clone(),
            }),
            _ => Ok(()),
        }
    }

    /// Interpret a response frame as the outcome of a call.
    pub fn into_outcome(self) -> Result<Value, ChannelError> {
        if self.kind != MessageKind::Response {
            return Err(ChannelError::Protocol(format!(
                "expected a response on channel \"{}\", got a {} frame",
                self.channel, self.kind
            )));
        }
        self.validate()?;

        match self.success {
            Some(true) => Ok(self.payload.unwrap_or(Value::Null)),
            Some(false) => Err(ChannelError::Rejected(self.error.unwrap_or_default())),
            None => Err(ChannelError::Protocol(format!(
                "response on channel \"{}\" carries no success flag",
                self.channel
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::collections::HashSet;
    use testresult::TestResult;

    #[test]
    fn it_serializes_requests_in_the_wire_shape() -> TestResult {
        let request = WireMessage::request("exec-sql", "abc".into(), json!({ "sql": "SELECT 1" }));
        let encoded = serde_json::to_value(&request)?;

        assert_eq!(
            encoded,
            json!({
                "kind": "request",
                "channel": "exec-sql",
                "correlationId": "abc",
                "payload": { "sql": "SELECT 1" }
            })
        );
        Ok(())
    }

    #[test]
    fn it_omits_absent_fields_on_announcements() -> TestResult {
        let encoded = serde_json::to_value(WireMessage::register("log:add"))?;
        assert_eq!(encoded, json!({ "kind": "register", "channel": "log:add" }));
        Ok(())
    }

    #[test]
    fn it_decodes_failed_responses_from_foreign_frames() -> TestResult {
        let frame: WireMessage = serde_json::from_value(json!({
            "kind": "response",
            "channel": "get-tables",
            "correlationId": "1",
            "success": false,
            "error": "database is locked"
        }))?;

        assert_eq!(
            frame.into_outcome(),
            Err(ChannelError::Rejected("database is locked".into()))
        );
        Ok(())
    }

    #[test]
    fn it_carries_the_correlation_id_into_responses() {
        let request = WireMessage::request("heartbeat", "42".into(), Value::Null);

        let ok = request.succeed(json!(true));
        let failed = request.fail("nope");

        assert_eq!(ok.correlation_id, request.correlation_id);
        assert_eq!(failed.correlation_id, request.correlation_id);
        assert_eq!(ok.validate(), Ok(()));
        assert_eq!(failed.validate(), Ok(()));
    }

    #[test]
    fn it_rejects_frames_that_break_the_envelope_invariants() {
        let mut request = WireMessage::request("heartbeat", "1".into(), Value::Null);
        request.correlation_id = None;
        assert!(matches!(
            request.validate(),
            Err(WireError::MissingCorrelationId { .. })
        ));

        let mut failed = WireMessage::request("heartbeat", "1".into(), Value::Null).fail("x");
        failed.error = None;
        assert!(matches!(failed.validate(), Err(WireError::MissingError { .. })));

        let mut ok = WireMessage::request("heartbeat", "1".into(), Value::Null).succeed(json!(1));
        ok.error = Some("stray".into());
        assert!(matches!(ok.validate(), Err(WireError::UnexpectedError { .. })));
    }

    #[test]
    fn it_refuses_to_treat_a_request_as_an_outcome() {
        let request = WireMessage::request("heartbeat", "1".into(), Value::Null);
        assert!(matches!(
            request.into_outcome(),
            Err(ChannelError::Protocol(_))
        ));
    }

    #[test]
    fn it_hands_out_distinct_correlation_ids() {
        let ids = CorrelationIds::default();
        let issued: HashSet<CorrelationId> = (0..1000).map(|_| ids.next()).collect();
        assert_eq!(issued.len(), 1000);
    }

    #[test]
    fn it_readdresses_relayed_responses() {
        let original = WireMessage::request("exec-sql", "panel-1".into(), Value::Null);
        let hop = WireMessage::request("exec-sql", "tab-7".into(), Value::Null);

        let relayed = hop.succeed(json!({ "rows": [] })).answering(&original);
        assert_eq!(relayed.correlation_id, Some("panel-1".into()));
    }
}
