#![forbid(unsafe_code)]

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use huddle_domain::ChannelName;
use huddle_protocol::events::ServerEvent;
use tokio::sync::{Mutex, mpsc};
use tracing::debug;

/// Per-process hub that fans server events out to connections, scoped by
/// channel membership.
///
/// Delivery is best-effort: a full or half-closed subscriber queue never
/// blocks or fails delivery to the remaining subscribers.
#[derive(Debug, Clone)]
pub struct ChannelHub {
	inner: Arc<Mutex<Inner>>,
	cfg: ChannelHubConfig,
}

/// Configuration for `ChannelHub`.
#[derive(Debug, Clone)]
pub struct ChannelHubConfig {
	/// Maximum number of queued outbound events per connection.
	pub subscriber_queue_capacity: usize,

	pub debug_logs: bool,
}

impl Default for ChannelHubConfig {
	fn default() -> Self {
		Self {
			subscriber_queue_capacity: 256,
			debug_logs: false,
		}
	}
}

impl ChannelHub {
	pub fn new(cfg: ChannelHubConfig) -> Self {
		Self {
			inner: Arc::new(Mutex::new(Inner::default())),
			cfg,
		}
	}

	/// Register a connection's outbound queue; the returned receiver is
	/// drained by that connection's writer task.
	pub async fn register_conn(&self, conn_id: u64) -> mpsc::Receiver<ServerEvent> {
		let (tx, rx) = mpsc::channel(self.cfg.subscriber_queue_capacity);

		let mut inner = self.inner.lock().await;
		inner.senders.insert(conn_id, tx);

		if self.cfg.debug_logs {
			debug!(conn_id, conns = inner.senders.len(), "hub: connection registered");
		}

		rx
	}

	/// Drop a connection's queue and its membership in every channel.
	pub async fn unregister_conn(&self, conn_id: u64) {
		let mut inner = self.inner.lock().await;
		inner.senders.remove(&conn_id);
		inner.channels.retain(|_, members| {
			members.remove(&conn_id);
			!members.is_empty()
		});

		if self.cfg.debug_logs {
			debug!(conn_id, conns = inner.senders.len(), "hub: connection unregistered");
		}
	}

	/// Subscribe a registered connection to a channel.
	pub async fn join(&self, conn_id: u64, channel: ChannelName) {
		let mut inner = self.inner.lock().await;
		if !inner.senders.contains_key(&conn_id) {
			return;
		}

		inner.channels.entry(channel.clone()).or_default().insert(conn_id);

		if self.cfg.debug_logs {
			debug!(conn_id, channel = %channel, "hub: joined channel");
		}
	}

	/// Unsubscribe a connection from a channel.
	pub async fn leave(&self, conn_id: u64, channel: &ChannelName) {
		let mut inner = self.inner.lock().await;
		if let Some(members) = inner.channels.get_mut(channel) {
			members.remove(&conn_id);
			if members.is_empty() {
				inner.channels.remove(channel);
			}
		}

		if self.cfg.debug_logs {
			debug!(conn_id, channel = %channel, "hub: left channel");
		}
	}

	/// Deliver an event to every member of a channel, optionally excluding
	/// the originating connection.
	pub async fn publish(&self, channel: &ChannelName, event: ServerEvent, exclude: Option<u64>) {
		let mut inner = self.inner.lock().await;
		let Some(members) = inner.channels.get(channel) else {
			return;
		};

		let targets: Vec<u64> = members.iter().copied().filter(|id| Some(*id) != exclude).collect();
		let dropped = deliver(&mut inner, &targets, &event);

		if self.cfg.debug_logs && dropped > 0 {
			debug!(
				channel = %channel,
				dropped,
				"hub: dropped events due to full subscriber queues"
			);
		}
	}

	/// Deliver an event to every registered connection, optionally excluding
	/// the originating one.
	pub async fn broadcast(&self, event: ServerEvent, exclude: Option<u64>) {
		let mut inner = self.inner.lock().await;
		let targets: Vec<u64> = inner.senders.keys().copied().filter(|id| Some(*id) != exclude).collect();
		let dropped = deliver(&mut inner, &targets, &event);

		if self.cfg.debug_logs && dropped > 0 {
			debug!(dropped, "hub: dropped broadcast events due to full subscriber queues");
		}
	}

	/// Deliver an event to one connection. Unknown ids are a safe no-op.
	pub async fn send_to_conn(&self, conn_id: u64, event: ServerEvent) -> bool {
		let mut inner = self.inner.lock().await;
		if !inner.senders.contains_key(&conn_id) {
			return false;
		}

		let dropped = deliver(&mut inner, &[conn_id], &event);
		dropped == 0 && inner.senders.contains_key(&conn_id)
	}

	/// Get a snapshot of member counts per channel.
	#[allow(dead_code)]
	pub async fn channel_member_counts(&self) -> HashMap<ChannelName, usize> {
		let inner = self.inner.lock().await;
		inner.channels.iter().map(|(k, v)| (k.clone(), v.len())).collect()
	}
}

#[derive(Debug, Default)]
struct Inner {
	senders: HashMap<u64, mpsc::Sender<ServerEvent>>,
	channels: HashMap<ChannelName, HashSet<u64>>,
}

/// Push an event onto each target queue; prunes targets whose receiver is
/// gone and returns how many deliveries were dropped on full queues.
fn deliver(inner: &mut Inner, targets: &[u64], event: &ServerEvent) -> u64 {
	let mut dropped = 0u64;
	let mut closed: Vec<u64> = Vec::new();

	for conn_id in targets {
		let Some(sender) = inner.senders.get(conn_id) else {
			continue;
		};

		match sender.try_send(event.clone()) {
			Ok(()) => {
				metrics::counter!("huddle_server_events_out_total").increment(1);
			}
			Err(mpsc::error::TrySendError::Full(_)) => {
				dropped += 1;
				metrics::counter!("huddle_server_events_dropped_total").increment(1);
			}
			Err(mpsc::error::TrySendError::Closed(_)) => {
				closed.push(*conn_id);
			}
		}
	}

	for conn_id in closed {
		inner.senders.remove(&conn_id);
		inner.channels.retain(|_, members| {
			members.remove(&conn_id);
			!members.is_empty()
		});
	}

	dropped
}
