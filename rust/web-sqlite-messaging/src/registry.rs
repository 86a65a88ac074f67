//! The coordinator's record of which context owns each channel.

use std::collections::{BTreeMap, BTreeSet};

use crate::ContextId;

/// Result of resolving a channel name against a [ChannelRegistry].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lookup {
    /// A handler is registered in the given context.
    Owned(ContextId),
    /// The handler was explicitly unregistered.
    Canceled,
    /// No handler was ever registered.
    Unknown,
}

/// The coordinator's view of which context handles which channel.
///
/// Each channel moves through `UNREGISTERED -> REGISTERED -> CANCELED`;
/// registering again from `CANCELED` is allowed and clears the mark.
#[derive(Debug, Default, Clone)]
pub struct ChannelRegistry {
    handled: BTreeMap<String, ContextId>,
    canceled: BTreeSet<String>,
}

impl ChannelRegistry {
    /// Record `owner` as the handler of `channel`. Re-registration is
    /// idempotent; a different owner replaces the previous one, which is
    /// returned.
    pub fn register(&mut self, channel: &str, owner: ContextId) -> Option<ContextId> {
        self.canceled.remove(channel);
        self.handled.insert(channel.to_string(), owner)
    }

    /// Withdraw `channel` on behalf of `owner`.
    ///
    /// Returns `false` when another context owns the channel; that context
    /// registered after `owner` did, so the stale unregister is dropped.
    pub fn unregister(&mut self, channel: &str, owner: ContextId) -> bool {
        match self.handled.get(channel) {
            Some(current) if *current != owner => false,
            _ => {
                self.handled.remove(channel);
                self.canceled.insert(channel.to_string());
                true
            }
        }
    }

    /// Resolve `channel`.
    pub fn lookup(&self, channel: &str) -> Lookup {
        if let Some(owner) = self.handled.get(channel) {
            Lookup::Owned(*owner)
        } else if self.canceled.contains(channel) {
            Lookup::Canceled
        } else {
            Lookup::Unknown
        }
    }

    /// Names of every handled channel, sorted.
    pub fn handled_channels(&self) -> Vec<String> {
        self.handled.keys().cloned().collect()
    }

    /// Names of every canceled channel, sorted.
    pub fn canceled_channels(&self) -> Vec<String> {
        self.canceled.iter().cloned().collect()
    }

    /// Forget every channel owned by `owner`, e.g. when its context is torn
    /// down. Returns the channels that were dropped.
    pub fn evict(&mut self, owner: ContextId) -> Vec<String> {
        let evicted: Vec<String> = self
            .handled
            .iter()
            .filter(|(_, current)| **current == owner)
            .map(|(channel, _)| channel.clone())
            .collect();

        for channel in &evicted {
            self.handled.remove(channel);
            self.canceled.insert(channel.clone());
        }

        evicted
    }

    /// Drop all state.
    pub fn clear(&mut self) {
        self.handled.clear();
        self.canceled.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn it_walks_the_channel_lifecycle() {
        let mut registry = ChannelRegistry::default();
        assert_eq!(registry.lookup("exec-sql"), Lookup::Unknown);

        registry.register("exec-sql", ContextId::ContentIsolated);
        assert_eq!(
            registry.lookup("exec-sql"),
            Lookup::Owned(ContextId::ContentIsolated)
        );

        assert!(registry.unregister("exec-sql", ContextId::ContentIsolated));
        assert_eq!(registry.lookup("exec-sql"), Lookup::Canceled);

        registry.register("exec-sql", ContextId::ContentIsolated);
        assert_eq!(
            registry.lookup("exec-sql"),
            Lookup::Owned(ContextId::ContentIsolated)
        );
        assert!(registry.canceled_channels().is_empty());
    }

    #[test]
    fn it_ignores_unregister_from_a_stale_owner() {
        let mut registry = ChannelRegistry::default();
        registry.register("log:batch", ContextId::Offscreen);
        registry.register("log:batch", ContextId::Panel);

        assert!(!registry.unregister("log:batch", ContextId::Offscreen));
        assert_eq!(registry.lookup("log:batch"), Lookup::Owned(ContextId::Panel));
    }

    #[test]
    fn it_treats_re_registration_as_idempotent() {
        let mut registry = ChannelRegistry::default();
        assert_eq!(registry.register("heartbeat", ContextId::Panel), None);
        assert_eq!(
            registry.register("heartbeat", ContextId::Panel),
            Some(ContextId::Panel)
        );
        assert_eq!(registry.handled_channels(), vec!["heartbeat".to_string()]);
    }

    #[test]
    fn it_evicts_every_channel_of_a_departed_context() {
        let mut registry = ChannelRegistry::default();
        registry.register("get-tables", ContextId::ContentIsolated);
        registry.register("exec-sql", ContextId::ContentIsolated);
        registry.register("log:batch", ContextId::Panel);

        let evicted = registry.evict(ContextId::ContentIsolated);

        assert_eq!(evicted, vec!["exec-sql".to_string(), "get-tables".to_string()]);
        assert_eq!(registry.lookup("exec-sql"), Lookup::Canceled);
        assert_eq!(registry.handled_channels(), vec!["log:batch".to_string()]);
    }
}
