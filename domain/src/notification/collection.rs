//! Ordered, id-unique notification collection.

use std::collections::HashMap;

use super::model::{Notification, NotificationId};

/// Notifications in arrival/fetch order, at most one entry per id.
///
/// The read flag only ever moves from unread to read locally, and merging
/// keeps a notification read if either side says so. Because that merge is
/// monotone, a mark-all-read, a push and a refetch can be applied in any order
/// and end in the same state. The unread count is derived on demand and never
/// stored.
#[derive(Debug, Default, Clone)]
pub struct Collection {
    items: Vec<Notification>,
    positions: HashMap<NotificationId, usize>,
}

impl Collection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn get(&self, id: &NotificationId) -> Option<&Notification> {
        self.positions.get(id).map(|&index| &self.items[index])
    }

    pub fn contains(&self, id: &NotificationId) -> bool {
        self.positions.contains_key(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Notification> {
        self.items.iter()
    }

    pub fn ids(&self) -> Vec<NotificationId> {
        self.items.iter().map(|n| n.id.clone()).collect()
    }

    pub fn to_vec(&self) -> Vec<Notification> {
        self.items.clone()
    }

    /// Add a notification, or reconcile it with the entry already holding its id.
    ///
    /// Returns true when a new entry was appended. For an existing id the
    /// server's message and timestamp are taken and the read flags are OR-ed.
    pub fn upsert(&mut self, incoming: Notification) -> bool {
        match self.positions.get(&incoming.id) {
            Some(&index) => {
                let existing = &mut self.items[index];
                existing.is_read = existing.is_read || incoming.is_read;
                existing.message = incoming.message;
                existing.timestamp = incoming.timestamp;
                false
            }
            None => {
                self.positions.insert(incoming.id.clone(), self.items.len());
                self.items.push(incoming);
                true
            }
        }
    }

    /// Reconcile a fetched list. Returns how many entries were new.
    pub fn merge(&mut self, fetched: Vec<Notification>) -> usize {
        fetched
            .into_iter()
            .map(|notification| self.upsert(notification))
            .filter(|appended| *appended)
            .count()
    }

    /// Mark every current entry read. Returns how many flipped.
    pub fn mark_all_read(&mut self) -> usize {
        let mut flipped = 0;
        for notification in self.items.iter_mut().filter(|n| !n.is_read) {
            notification.is_read = true;
            flipped += 1;
        }
        flipped
    }

    pub fn unread_count(&self) -> usize {
        self.items.iter().filter(|n| !n.is_read).count()
    }

    pub fn clear(&mut self) {
        self.items.clear();
        self.positions.clear();
    }
}
