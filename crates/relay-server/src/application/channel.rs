//! The state of a single channel.
//!
//! A [`Channel`] is shared by `Arc` between the channel table and whoever is
//! currently operating on it.  All of its state sits behind one mutex so a
//! subscribe, an unsubscribe, and a broadcast snapshot on the same channel
//! are serialized, while different channels never contend.
//!
//! [`ChannelState`] itself is plain data with no locking; the channel manager
//! drives it while holding the channel's lock.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};

use relay_core::{ChannelKind, PresenceMember, PresenceSnapshot, SocketId};
use serde_json::Value;

use super::locks::lock;
use crate::domain::ChannelSummary;

/// One live channel of one application.
#[derive(Debug)]
pub struct Channel {
    name: String,
    kind: ChannelKind,
    state: Mutex<ChannelState>,
}

impl Channel {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            kind: ChannelKind::of(name),
            state: Mutex::new(ChannelState::default()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> ChannelKind {
        self.kind
    }

    /// Enters the channel's critical section.
    pub fn lock(&self) -> MutexGuard<'_, ChannelState> {
        lock(&self.state)
    }

    /// `true` once the channel has been destroyed.  A closed channel is never
    /// reopened; callers look up or create a fresh one instead.
    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }
}

#[derive(Debug, Clone)]
struct MemberEntry {
    user_info: Value,
    connections: usize,
}

/// What a subscribe changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JoinOutcome {
    /// The connection was already subscribed; nothing changed.
    pub already_subscribed: bool,
    /// A presence member id gained its first connection.
    pub new_member: bool,
}

/// What an unsubscribe changed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeaveOutcome {
    /// Presence member id whose last connection just left.
    pub departed_member: Option<String>,
}

/// Subscribers and presence members of one channel.
#[derive(Debug, Default)]
pub struct ChannelState {
    pub(crate) closed: bool,
    /// Subscribed connections, each with its presence member id if any.
    subscribers: HashMap<SocketId, Option<String>>,
    /// Presence members that have at least one subscribed connection.
    members: BTreeMap<String, MemberEntry>,
}

impl ChannelState {
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn is_empty(&self) -> bool {
        self.subscribers.is_empty()
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    pub fn member_count(&self) -> usize {
        self.members.len()
    }

    pub fn contains(&self, socket_id: &SocketId) -> bool {
        self.subscribers.contains_key(socket_id)
    }

    /// The presence member id `socket_id` joined as.
    pub fn member_of(&self, socket_id: &SocketId) -> Option<&str> {
        self.subscribers.get(socket_id)?.as_deref()
    }

    pub fn subscribers(&self) -> impl Iterator<Item = &SocketId> {
        self.subscribers.keys()
    }

    /// Adds `socket_id`, registering `member` for presence channels.
    ///
    /// Subscribing twice is a no-op; the member recorded by the first
    /// subscription is kept.
    pub fn join(&mut self, socket_id: &SocketId, member: Option<&PresenceMember>) -> JoinOutcome {
        if self.subscribers.contains_key(socket_id) {
            return JoinOutcome {
                already_subscribed: true,
                new_member: false,
            };
        }

        let mut new_member = false;
        if let Some(member) = member {
            let entry = self
                .members
                .entry(member.user_id.clone())
                .or_insert_with(|| {
                    new_member = true;
                    MemberEntry {
                        user_info: member.user_info.clone(),
                        connections: 0,
                    }
                });
            entry.connections += 1;
        }

        self.subscribers
            .insert(socket_id.clone(), member.map(|m| m.user_id.clone()));
        JoinOutcome {
            already_subscribed: false,
            new_member,
        }
    }

    /// Removes `socket_id`.  Returns `None` if it was not subscribed.
    pub fn leave(&mut self, socket_id: &SocketId) -> Option<LeaveOutcome> {
        let member_id = self.subscribers.remove(socket_id)?;

        let departed_member = member_id.and_then(|user_id| {
            let entry = self.members.get_mut(&user_id)?;
            entry.connections = entry.connections.saturating_sub(1);
            if entry.connections == 0 {
                self.members.remove(&user_id);
                Some(user_id)
            } else {
                None
            }
        });

        Some(LeaveOutcome { departed_member })
    }

    /// Current presence members ordered by user id.
    pub fn members(&self) -> Vec<PresenceMember> {
        self.members
            .iter()
            .map(|(id, entry)| PresenceMember::new(id.clone(), entry.user_info.clone()))
            .collect()
    }

    pub fn presence_snapshot(&self) -> PresenceSnapshot {
        PresenceSnapshot::from_members(&self.members())
    }

    pub fn summary(&self, name: &str, kind: ChannelKind) -> ChannelSummary {
        ChannelSummary {
            name: name.to_string(),
            kind,
            subscriber_count: self.subscriber_count(),
            member_count: (kind == ChannelKind::Presence).then(|| self.member_count()),
        }
    }
}
