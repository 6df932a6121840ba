//! Coordinator waiting queue.
//!
//! One ordered list split into urgency classes. Within a class entries are
//! FIFO; a more urgent class always sits ahead of a less urgent one.

use std::collections::VecDeque;

use galerie_id::GroupId;

use super::messages::Address;
use crate::visitors::{GroupProfile, Urgency};

/// A group waiting for a guide.
#[derive(Debug, Clone)]
pub struct WaitingEntry {
    pub group: GroupProfile,
    pub address: Address,
    pub class: Urgency,
    /// Times this group went back to the queue after a problem or a preemption.
    pub requeues: u32,
}

impl WaitingEntry {
    pub fn new(group: GroupProfile, address: Address, class: Urgency) -> Self {
        Self {
            group,
            address,
            class,
            requeues: 0,
        }
    }

    pub fn group_id(&self) -> GroupId {
        self.group.group_id
    }
}

#[derive(Debug, Default)]
pub struct WaitingQueue {
    entries: VecDeque<WaitingEntry>,
}

impl WaitingQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append at the back of the entry's class.
    pub fn push_back(&mut self, entry: WaitingEntry) {
        let at = self
            .entries
            .iter()
            .position(|e| e.class > entry.class)
            .unwrap_or(self.entries.len());
        self.entries.insert(at, entry);
    }

    /// Insert at the front of the entry's class.
    pub fn push_front(&mut self, entry: WaitingEntry) {
        let at = self
            .entries
            .iter()
            .position(|e| e.class >= entry.class)
            .unwrap_or(self.entries.len());
        self.entries.insert(at, entry);
    }

    pub fn remove(&mut self, group_id: GroupId) -> Option<WaitingEntry> {
        let at = self.position(group_id)?;
        self.entries.remove(at)
    }

    pub fn contains(&self, group_id: GroupId) -> bool {
        self.position(group_id).is_some()
    }

    pub fn position(&self, group_id: GroupId) -> Option<usize> {
        self.entries.iter().position(|e| e.group_id() == group_id)
    }

    /// Move a waiting group up to `class` (front of it). No-op if the group
    /// is absent or already at least that urgent.
    pub fn promote(&mut self, group_id: GroupId, class: Urgency) -> bool {
        match self.position(group_id) {
            Some(at) if self.entries[at].class > class => {
                if let Some(mut entry) = self.entries.remove(at) {
                    entry.class = class;
                    self.push_front(entry);
                }
                true
            }
            _ => false,
        }
    }

    pub fn group_ids(&self) -> Vec<GroupId> {
        self.entries.iter().map(WaitingEntry::group_id).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &WaitingEntry> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
