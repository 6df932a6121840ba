//! Directory registry - capability based actor discovery.
//!
//! Maps a capability (`guide`, `coordinator`, ...) to the handles currently
//! advertising it. Every operation takes one lock; lookups hand back owned
//! snapshots so callers never iterate over live state.
//!
//! An empty lookup is an ordinary answer, not an error: callers retry on
//! their own schedule.

use std::collections::HashMap;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::trace;

use super::framework::{ActorHandle, Message};

/// Named service an actor advertises.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Capability {
    /// A guide currently able to take a tour.
    Guide,
    /// The tour coordinator.
    Coordinator,
    /// A visitor group present in the museum.
    VisitorGroup,
}

impl Capability {
    pub fn as_str(&self) -> &'static str {
        match self {
            Capability::Guide => "guide",
            Capability::Coordinator => "coordinator",
            Capability::VisitorGroup => "visitor-group",
        }
    }
}

impl std::fmt::Display for Capability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Process-wide (but not global) capability table.
pub struct Directory<M: Message> {
    state: RwLock<HashMap<Capability, Vec<ActorHandle<M>>>>,
}

impl<M: Message> Directory<M> {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(HashMap::new()),
        }
    }

    /// Advertise `capability` for `handle`. Registering twice is a no-op;
    /// the original registration order is kept.
    pub fn register(&self, handle: &ActorHandle<M>, capability: Capability) {
        let mut state = self.state.write();
        let entries = state.entry(capability).or_default();
        if entries.iter().any(|h| h == handle) {
            return;
        }
        entries.push(handle.clone());
        trace!(actor_id = %handle.actor_id(), %capability, "Registered");
    }

    /// Stop advertising one capability. Returns true if it was advertised.
    pub fn withdraw(&self, actor_id: &str, capability: Capability) -> bool {
        let mut state = self.state.write();
        let Some(entries) = state.get_mut(&capability) else {
            return false;
        };
        let before = entries.len();
        entries.retain(|h| h.actor_id() != actor_id);
        let removed = entries.len() != before;
        if entries.is_empty() {
            state.remove(&capability);
        }
        removed
    }

    /// Remove the actor from every capability. Idempotent.
    pub fn deregister(&self, actor_id: &str) {
        let mut state = self.state.write();
        state.retain(|_, entries| {
            entries.retain(|h| h.actor_id() != actor_id);
            !entries.is_empty()
        });
        trace!(actor_id = %actor_id, "Deregistered");
    }

    /// Snapshot of every handle advertising `capability`, in registration order.
    pub fn find(&self, capability: Capability) -> Vec<ActorHandle<M>> {
        self.state
            .read()
            .get(&capability)
            .cloned()
            .unwrap_or_default()
    }

    /// The earliest registered handle advertising `capability`.
    pub fn find_one(&self, capability: Capability) -> Option<ActorHandle<M>> {
        self.state
            .read()
            .get(&capability)
            .and_then(|entries| entries.first().cloned())
    }

    /// Whether `actor_id` currently advertises `capability`.
    pub fn advertises(&self, actor_id: &str, capability: Capability) -> bool {
        self.state
            .read()
            .get(&capability)
            .is_some_and(|entries| entries.iter().any(|h| h.actor_id() == actor_id))
    }

    /// Number of handles advertising `capability`.
    pub fn count(&self, capability: Capability) -> usize {
        self.state.read().get(&capability).map_or(0, Vec::len)
    }
}

impl<M: Message> Default for Directory<M> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actors::framework::mailbox;
    use std::sync::Arc;

    #[test]
    fn test_find_on_empty_capability_is_empty() {
        let directory = Directory::<u32>::new();
        assert!(directory.find(Capability::Guide).is_empty());
        assert!(directory.find_one(Capability::Coordinator).is_none());
        assert_eq!(directory.count(Capability::Guide), 0);
    }

    #[test]
    fn test_register_is_idempotent_and_ordered() {
        let directory = Directory::<u32>::new();
        let (a, _ra) = mailbox("a");
        let (b, _rb) = mailbox("b");

        directory.register(&a, Capability::Guide);
        directory.register(&b, Capability::Guide);
        directory.register(&a, Capability::Guide);

        let ids: Vec<_> = directory
            .find(Capability::Guide)
            .iter()
            .map(|h| h.actor_id().to_string())
            .collect();
        assert_eq!(ids, vec!["a", "b"]);
        assert_eq!(directory.find_one(Capability::Guide).unwrap().actor_id(), "a");
    }

    #[test]
    fn test_deregister_removes_all_capabilities() {
        let directory = Directory::<u32>::new();
        let (a, _ra) = mailbox("a");
        directory.register(&a, Capability::Guide);
        directory.register(&a, Capability::VisitorGroup);

        directory.deregister("a");
        directory.deregister("a");

        assert!(!directory.advertises("a", Capability::Guide));
        assert!(!directory.advertises("a", Capability::VisitorGroup));
    }

    #[test]
    fn test_withdraw_only_touches_one_capability() {
        let directory = Directory::<u32>::new();
        let (a, _ra) = mailbox("a");
        directory.register(&a, Capability::Guide);
        directory.register(&a, Capability::VisitorGroup);

        assert!(directory.withdraw("a", Capability::Guide));
        assert!(!directory.withdraw("a", Capability::Guide));
        assert!(directory.advertises("a", Capability::VisitorGroup));
    }

    #[test]
    fn test_find_returns_snapshot() {
        let directory = Directory::<u32>::new();
        let (a, _ra) = mailbox("a");
        let (b, _rb) = mailbox("b");
        directory.register(&a, Capability::Guide);

        let snapshot = directory.find(Capability::Guide);
        directory.register(&b, Capability::Guide);
        directory.deregister("a");

        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].actor_id(), "a");
    }

    #[test]
    fn test_concurrent_registration() {
        let directory = Arc::new(Directory::<u32>::new());
        let threads: Vec<_> = (0..8)
            .map(|n| {
                let directory = Arc::clone(&directory);
                std::thread::spawn(move || {
                    let (h, _r) = mailbox(format!("g{n}"));
                    directory.register(&h, Capability::Guide);
                    let _ = directory.find(Capability::Guide);
                })
            })
            .collect();
        for t in threads {
            t.join().unwrap();
        }
        assert_eq!(directory.count(Capability::Guide), 8);
    }
}
