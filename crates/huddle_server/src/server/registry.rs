#![forbid(unsafe_code)]

use std::collections::{HashMap, HashSet};

use huddle_domain::PrincipalId;

/// Identity attached to an authenticated connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectedPrincipal {
	pub user_id: PrincipalId,
	pub username: String,
}

/// Result of recording an `authenticate` for a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthOutcome {
	/// True when this was the principal's first active connection.
	pub first_connection: bool,
}

/// Result of removing an authenticated connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Departure {
	pub principal: ConnectedPrincipal,
	/// True when the principal has no remaining connections.
	pub last_connection: bool,
}

/// Connection/principal bookkeeping shared by all connection handlers.
///
/// Invariant: a principal id keys `principal_conns` iff at least one of its
/// connection ids keys `conns` with that principal. Both maps are mutated in
/// the same suspension-free critical section, so callers holding the outer
/// lock never observe one map updated without the other.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
	conns: HashMap<u64, ConnectedPrincipal>,
	principal_conns: HashMap<PrincipalId, HashSet<u64>>,
}

impl ConnectionRegistry {
	/// Attach a principal to a connection. Idempotent per connection.
	pub fn authenticate(&mut self, conn_id: u64, user_id: PrincipalId, username: String) -> AuthOutcome {
		if let Some(existing) = self.conns.get(&conn_id) {
			if existing.user_id == user_id {
				return AuthOutcome { first_connection: false };
			}

			// Re-authentication as a different principal detaches the old one.
			let _ = self.remove_conn(conn_id);
		}

		self.conns.insert(
			conn_id,
			ConnectedPrincipal {
				user_id: user_id.clone(),
				username,
			},
		);

		let conns = self.principal_conns.entry(user_id).or_default();
		conns.insert(conn_id);

		AuthOutcome {
			first_connection: conns.len() == 1,
		}
	}

	/// Remove a connection. A never-authenticated id is a silent no-op.
	pub fn remove_conn(&mut self, conn_id: u64) -> Option<Departure> {
		let principal = self.conns.remove(&conn_id)?;

		let mut last_connection = false;
		if let Some(set) = self.principal_conns.get_mut(&principal.user_id) {
			set.remove(&conn_id);
			if set.is_empty() {
				self.principal_conns.remove(&principal.user_id);
				last_connection = true;
			}
		}

		Some(Departure {
			principal,
			last_connection,
		})
	}

	/// Identity of the principal that authenticated a connection, if any.
	pub fn principal_for_conn(&self, conn_id: u64) -> Option<&ConnectedPrincipal> {
		self.conns.get(&conn_id)
	}

	/// Snapshot of online principals, deduplicated by principal id.
	pub fn online_principals(&self) -> Vec<ConnectedPrincipal> {
		let mut out: Vec<ConnectedPrincipal> = Vec::with_capacity(self.principal_conns.len());
		for info in self.conns.values() {
			if !out.iter().any(|p| p.user_id == info.user_id) {
				out.push(info.clone());
			}
		}
		out
	}

	/// Ids of currently online principals.
	pub fn online_ids(&self) -> HashSet<PrincipalId> {
		self.principal_conns.keys().cloned().collect()
	}

	/// Whether the principal has at least one active connection.
	#[allow(dead_code)]
	pub fn is_online(&self, user_id: &PrincipalId) -> bool {
		self.principal_conns.contains_key(user_id)
	}

	/// Number of authenticated connections.
	#[allow(dead_code)]
	pub fn connection_count(&self) -> usize {
		self.conns.len()
	}
}
