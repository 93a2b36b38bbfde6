#![forbid(unsafe_code)]

use std::collections::HashSet;

use huddle_domain::{MessageId, PrincipalId};

use crate::server::store::MessageRecord;
use crate::server::unread::{ReadAckSets, compute_unread_counts};

fn pid(s: &str) -> PrincipalId {
	PrincipalId::new(s).expect("valid PrincipalId")
}

fn mid(s: &str) -> MessageId {
	MessageId::new(s).expect("valid MessageId")
}

fn msg(id: &str, sender: &str, at: i64) -> MessageRecord {
	MessageRecord {
		id: mid(id),
		sender_id: pid(sender),
		text: format!("message {id}"),
		file: None,
		created_at_unix_ms: at,
	}
}

fn online(ids: &[&str]) -> HashSet<PrincipalId> {
	ids.iter().map(|s| pid(s)).collect()
}

#[test]
fn counts_match_the_definition() {
	let history = vec![msg("m1", "u1", 1), msg("m2", "u1", 2), msg("m3", "u2", 3)];
	let online = online(&["u1", "u2"]);

	let mut acks = ReadAckSets::default();
	acks.mark_read(&pid("u2"), [mid("m1")]);

	let counts = compute_unread_counts(&history, &online, &acks);

	// u2 has read m1, leaving m2 unread from u1.
	assert_eq!(counts[&pid("u2")][&pid("u1")], 1);
	// u1 has read nothing; m3 from u2 is unread.
	assert_eq!(counts[&pid("u1")][&pid("u2")], 1);
}

#[test]
fn own_messages_never_count_as_unread() {
	let history = vec![msg("m1", "u1", 1), msg("m2", "u1", 2)];
	let online = online(&["u1", "u2"]);
	let acks = ReadAckSets::default();

	let counts = compute_unread_counts(&history, &online, &acks);

	assert!(!counts[&pid("u1")].contains_key(&pid("u1")));
	assert_eq!(counts[&pid("u2")][&pid("u1")], 2);
}

#[test]
fn pairs_initialize_to_zero_even_without_messages() {
	let counts = compute_unread_counts(&[], &online(&["u1", "u2", "u3"]), &ReadAckSets::default());

	for viewer in ["u1", "u2", "u3"] {
		let per_sender = &counts[&pid(viewer)];
		assert_eq!(per_sender.len(), 2);
		assert!(per_sender.values().all(|c| *c == 0));
	}
}

#[test]
fn offline_senders_are_not_materialized() {
	let history = vec![msg("m1", "u3", 1)];
	let counts = compute_unread_counts(&history, &online(&["u1", "u2"]), &ReadAckSets::default());

	// u3 is offline: no slot for it, and its message increments nothing.
	assert!(!counts[&pid("u1")].contains_key(&pid("u3")));
	assert_eq!(counts[&pid("u1")][&pid("u2")], 0);
}

#[test]
fn recompute_is_idempotent() {
	let history = vec![msg("m1", "u1", 1), msg("m2", "u2", 2)];
	let online = online(&["u1", "u2"]);

	let mut acks = ReadAckSets::default();
	acks.mark_read(&pid("u1"), [mid("m2")]);

	let first = compute_unread_counts(&history, &online, &acks);
	let second = compute_unread_counts(&history, &online, &acks);
	assert_eq!(first, second);
}

#[test]
fn mark_read_decrements_by_exactly_the_acked_unread_messages() {
	let history = vec![
		msg("m1", "u1", 1),
		msg("m2", "u1", 2),
		msg("m3", "u1", 3),
		msg("m4", "u2", 4),
	];
	let online = online(&["u1", "u2"]);
	let mut acks = ReadAckSets::default();

	let before = compute_unread_counts(&history, &online, &acks);
	assert_eq!(before[&pid("u2")][&pid("u1")], 3);

	// Two of u1's messages plus one already-absent id.
	let added = acks.mark_read(&pid("u2"), [mid("m1"), mid("m2"), mid("m4")]);
	assert_eq!(added, 3);

	let after = compute_unread_counts(&history, &online, &acks);
	assert_eq!(after[&pid("u2")][&pid("u1")], 1);

	// Reading never increases any of the viewer's counts.
	for (sender, count) in &after[&pid("u2")] {
		assert!(count <= &before[&pid("u2")][sender]);
	}

	// Other viewers are unaffected.
	assert_eq!(after[&pid("u1")], before[&pid("u1")]);
}

#[test]
fn mark_read_is_idempotent_set_union() {
	let mut acks = ReadAckSets::default();

	assert_eq!(acks.mark_read(&pid("u1"), [mid("m1"), mid("m2")]), 2);
	assert_eq!(acks.mark_read(&pid("u1"), [mid("m1"), mid("m2")]), 0);
	assert!(acks.has_read(&pid("u1"), &mid("m1")));
}

#[test]
fn read_sets_allocate_lazily() {
	let mut acks = ReadAckSets::default();
	assert!(!acks.is_tracked(&pid("u1")));

	acks.ensure(&pid("u1"));
	assert!(acks.is_tracked(&pid("u1")));
	assert!(!acks.has_read(&pid("u1"), &mid("m1")));
}
