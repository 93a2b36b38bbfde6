#![forbid(unsafe_code)]

use std::collections::{HashMap, HashSet};

use huddle_domain::{MessageId, PrincipalId};

use crate::server::store::MessageRecord;

/// Per-principal sets of message ids acknowledged as read.
///
/// Held in process memory only and never pruned; a set is allocated lazily on
/// a principal's first authentication and grows monotonically for the life of
/// the process.
#[derive(Debug, Default)]
pub struct ReadAckSets {
	by_principal: HashMap<PrincipalId, HashSet<MessageId>>,
}

impl ReadAckSets {
	/// Allocate the principal's read set if absent.
	pub fn ensure(&mut self, principal: &PrincipalId) {
		self.by_principal.entry(principal.clone()).or_default();
	}

	/// Union the ids into the principal's read set; returns how many were
	/// newly added. Idempotent.
	pub fn mark_read(&mut self, principal: &PrincipalId, ids: impl IntoIterator<Item = MessageId>) -> usize {
		let set = self.by_principal.entry(principal.clone()).or_default();
		let mut added = 0usize;
		for id in ids {
			if set.insert(id) {
				added += 1;
			}
		}
		added
	}

	/// Whether the principal has acknowledged the message.
	pub fn has_read(&self, principal: &PrincipalId, id: &MessageId) -> bool {
		self.by_principal.get(principal).is_some_and(|set| set.contains(id))
	}

	/// Whether a read set has been allocated for the principal.
	#[allow(dead_code)]
	pub fn is_tracked(&self, principal: &PrincipalId) -> bool {
		self.by_principal.contains_key(principal)
	}
}

/// Derived unread counts: viewer -> sender -> count.
pub type UnreadCounts = HashMap<PrincipalId, HashMap<PrincipalId, u64>>;

/// Recompute unread counts from the full message history.
///
/// `count(viewer, sender)` is the number of messages authored by `sender`
/// with `viewer != sender` whose id is absent from the viewer's read set.
/// Only pairs of currently online principals are materialized; every pair is
/// initialized to zero so counts that drop to zero are still pushed.
///
/// Cost is O(messages x online principals) per call. The full recompute is
/// deliberate: incremental counters drift after reconnects or missed events,
/// and history plus online-principal counts stay small in this domain.
pub fn compute_unread_counts(
	messages: &[MessageRecord],
	online: &HashSet<PrincipalId>,
	acks: &ReadAckSets,
) -> UnreadCounts {
	let mut counts: UnreadCounts = HashMap::with_capacity(online.len());
	for viewer in online {
		let mut per_sender = HashMap::with_capacity(online.len().saturating_sub(1));
		for sender in online {
			if sender != viewer {
				per_sender.insert(sender.clone(), 0u64);
			}
		}
		counts.insert(viewer.clone(), per_sender);
	}

	for message in messages {
		for viewer in online {
			if *viewer == message.sender_id {
				continue;
			}
			if acks.has_read(viewer, &message.id) {
				continue;
			}

			// Messages from offline senders have no materialized slot.
			if let Some(per_sender) = counts.get_mut(viewer)
				&& let Some(count) = per_sender.get_mut(&message.sender_id)
			{
				*count += 1;
			}
		}
	}

	counts
}
