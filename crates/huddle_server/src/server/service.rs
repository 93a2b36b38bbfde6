#![forbid(unsafe_code)]

use std::sync::Arc;

use huddle_domain::{BoardId, ChannelName, FileDescriptor, MessageId, PrincipalId, TaskId};
use huddle_protocol::events::{MessageBroadcast, OnlineUser, ServerEvent};
use tokio::sync::{RwLock, mpsc};
use tracing::{debug, error, info, warn};

use crate::server::hub::ChannelHub;
use crate::server::registry::{ConnectedPrincipal, ConnectionRegistry};
use crate::server::store::{MessageStore, NewMessage, PrincipalStore};
use crate::server::unread::{ReadAckSets, compute_unread_counts};

/// Maximum chat message length in characters.
pub const MAX_MESSAGE_CHARS: usize = 1000;

/// The real-time service: presence, channel routing and unread counts.
///
/// One instance per server process, injected into every connection handler.
/// All cross-connection state lives here; the registry and read-ack sets are
/// only ever mutated under their locks without intervening awaits.
pub struct RealtimeService {
	registry: RwLock<ConnectionRegistry>,
	read_acks: RwLock<ReadAckSets>,
	hub: ChannelHub,
	messages: Arc<dyn MessageStore>,
	principals: Arc<dyn PrincipalStore>,
}

impl RealtimeService {
	pub fn new(hub: ChannelHub, messages: Arc<dyn MessageStore>, principals: Arc<dyn PrincipalStore>) -> Self {
		Self {
			registry: RwLock::new(ConnectionRegistry::default()),
			read_acks: RwLock::new(ReadAckSets::default()),
			hub,
			messages,
			principals,
		}
	}

	/// Register a connection's outbound queue. No observable side effect
	/// until the connection authenticates.
	pub async fn attach(&self, conn_id: u64) -> mpsc::Receiver<ServerEvent> {
		self.hub.register_conn(conn_id).await
	}

	/// Deliver an event to a single connection; a safe no-op once the
	/// connection is gone.
	pub async fn send_to_conn(&self, conn_id: u64, event: ServerEvent) {
		let _ = self.hub.send_to_conn(conn_id, event).await;
	}

	/// Attach a principal to a connection and announce presence.
	pub async fn authenticate(&self, conn_id: u64, user_id: &str, username: &str) {
		let Ok(user_id) = PrincipalId::new(user_id) else {
			debug!(conn_id, "ignoring authenticate with empty user id");
			return;
		};

		let (outcome, snapshot) = {
			let mut registry = self.registry.write().await;
			let outcome = registry.authenticate(conn_id, user_id.clone(), username.to_string());
			let snapshot = registry.online_principals();
			(outcome, snapshot)
		};

		info!(conn_id, user_id = %user_id, username, "principal authenticated");

		if outcome.first_connection {
			metrics::counter!("huddle_server_presence_online_total").increment(1);
			self.hub
				.broadcast(
					ServerEvent::UserOnline(OnlineUser {
						user_id: user_id.as_str().to_string(),
						username: username.to_string(),
					}),
					Some(conn_id),
				)
				.await;
		}

		self.hub.join(conn_id, ChannelName::User(user_id.clone())).await;
		self.hub.join(conn_id, ChannelName::Global).await;

		// Snapshot excludes the principal it is sent to.
		let others: Vec<OnlineUser> = snapshot
			.into_iter()
			.filter(|p| p.user_id != user_id)
			.map(online_user)
			.collect();
		self.send_to_conn(conn_id, ServerEvent::UsersOnline(others)).await;

		{
			let mut acks = self.read_acks.write().await;
			acks.ensure(&user_id);
		}

		self.recompute_and_push().await;
	}

	/// Detach a connection; announces offline on the principal's last one.
	pub async fn disconnect(&self, conn_id: u64) {
		let departure = {
			let mut registry = self.registry.write().await;
			registry.remove_conn(conn_id)
		};

		self.hub.unregister_conn(conn_id).await;

		let Some(departure) = departure else {
			debug!(conn_id, "unauthenticated connection closed");
			return;
		};

		info!(
			conn_id,
			user_id = %departure.principal.user_id,
			username = departure.principal.username,
			last_connection = departure.last_connection,
			"principal connection closed"
		);

		if departure.last_connection {
			metrics::counter!("huddle_server_presence_offline_total").increment(1);
			self.hub
				.broadcast(ServerEvent::UserOffline(online_user(departure.principal)), None)
				.await;
		}
	}

	pub async fn join_board(&self, conn_id: u64, board_id: &str) {
		let Ok(board_id) = BoardId::new(board_id) else {
			return;
		};

		debug!(conn_id, board_id = %board_id, "joining board channel");
		self.hub.join(conn_id, ChannelName::Board(board_id)).await;
	}

	pub async fn leave_board(&self, conn_id: u64, board_id: &str) {
		let Ok(board_id) = BoardId::new(board_id) else {
			return;
		};

		debug!(conn_id, board_id = %board_id, "leaving board channel");
		self.hub.leave(conn_id, &ChannelName::Board(board_id)).await;
	}

	pub async fn join_task(&self, conn_id: u64, task_id: &str) {
		let Ok(task_id) = TaskId::new(task_id) else {
			return;
		};

		debug!(conn_id, task_id = %task_id, "joining task channel");
		self.hub.join(conn_id, ChannelName::Task(task_id)).await;
	}

	pub async fn leave_task(&self, conn_id: u64, task_id: &str) {
		let Ok(task_id) = TaskId::new(task_id) else {
			return;
		};

		debug!(conn_id, task_id = %task_id, "leaving task channel");
		self.hub.leave(conn_id, &ChannelName::Task(task_id)).await;
	}

	/// Publish a typing indicator to the task channel (or the global channel
	/// for the `"global"` sentinel), excluding the sender.
	pub async fn comment_typing(&self, conn_id: u64, task_key: &str, is_typing: bool) {
		let principal = {
			let registry = self.registry.read().await;
			registry.principal_for_conn(conn_id).cloned()
		};

		let Some(principal) = principal else {
			return;
		};
		if task_key.trim().is_empty() {
			return;
		}

		let channel = if task_key == ChannelName::GLOBAL {
			ChannelName::Global
		} else {
			match TaskId::new(task_key) {
				Ok(task_id) => ChannelName::Task(task_id),
				Err(_) => return,
			}
		};

		self.hub
			.publish(
				&channel,
				ServerEvent::CommentTyping {
					task_id: task_key.to_string(),
					user: online_user(principal),
					is_typing,
				},
				Some(conn_id),
			)
			.await;
	}

	/// Persist and fan out a chat message.
	///
	/// The sender receives the saved message with the client's `temp_id`;
	/// everyone else receives it without. Nothing is broadcast unless
	/// persistence succeeded.
	pub async fn send_message(
		&self,
		conn_id: u64,
		text: Option<String>,
		file: Option<FileDescriptor>,
		temp_id: Option<serde_json::Value>,
	) {
		let principal = {
			let registry = self.registry.read().await;
			registry.principal_for_conn(conn_id).cloned()
		};

		let Some(principal) = principal else {
			metrics::counter!("huddle_server_messages_rejected_total").increment(1);
			self.send_error(conn_id, "User not authenticated").await;
			return;
		};

		let text = text.unwrap_or_default();
		if text.trim().is_empty() && file.is_none() {
			metrics::counter!("huddle_server_messages_rejected_total").increment(1);
			self.send_error(conn_id, "Please provide a message").await;
			return;
		}
		if text.chars().count() > MAX_MESSAGE_CHARS {
			metrics::counter!("huddle_server_messages_rejected_total").increment(1);
			self.send_error(conn_id, "Message cannot be more than 1000 characters").await;
			return;
		}

		let sender = match self.principals.find_by_id(&principal.user_id).await {
			Ok(Some(sender)) => sender,
			Ok(None) => {
				metrics::counter!("huddle_server_messages_rejected_total").increment(1);
				self.send_error(conn_id, "User not found").await;
				return;
			}
			Err(e) => {
				error!(conn_id, error = %e, "principal lookup failed");
				metrics::counter!("huddle_server_messages_rejected_total").increment(1);
				self.send_error(conn_id, &format!("Failed to send message: {e}")).await;
				return;
			}
		};

		let saved = match self
			.messages
			.create(NewMessage {
				sender_id: principal.user_id.clone(),
				text,
				file,
			})
			.await
		{
			Ok(saved) => saved,
			Err(e) => {
				error!(conn_id, error = %e, "message persistence failed");
				metrics::counter!("huddle_server_messages_failed_total").increment(1);
				self.send_error(conn_id, &format!("Failed to send message: {e}")).await;
				return;
			}
		};

		metrics::counter!("huddle_server_messages_total").increment(1);

		// Re-read so the broadcast reflects exactly what the store persisted.
		let saved = match self.messages.find_by_id(&saved.id).await {
			Ok(Some(record)) => record,
			Ok(None) | Err(_) => saved,
		};

		// The sender's own message never counts as unread for the sender.
		{
			let mut acks = self.read_acks.write().await;
			acks.mark_read(&principal.user_id, [saved.id.clone()]);
		}

		let broadcast = MessageBroadcast {
			id: saved.id.as_str().to_string(),
			sender_id: saved.sender_id.as_str().to_string(),
			sender_name: sender.name,
			sender_avatar: sender.avatar,
			text: saved.text,
			file: saved.file,
			created_at_unix_ms: saved.created_at_unix_ms,
			temp_id: None,
		};

		let echo = MessageBroadcast {
			temp_id,
			..broadcast.clone()
		};

		self.send_to_conn(conn_id, ServerEvent::NewMessage(echo)).await;
		self.hub.broadcast(ServerEvent::NewMessage(broadcast), Some(conn_id)).await;

		self.recompute_and_push().await;
	}

	/// Apply a read-acknowledgment batch for the connection's principal.
	pub async fn mark_read(&self, conn_id: u64, message_ids: Vec<String>) {
		let principal = {
			let registry = self.registry.read().await;
			registry.principal_for_conn(conn_id).cloned()
		};

		let Some(principal) = principal else {
			self.send_error(conn_id, "User not authenticated").await;
			return;
		};

		let ids: Vec<MessageId> = message_ids.into_iter().filter_map(|id| MessageId::new(id).ok()).collect();

		let added = {
			let mut acks = self.read_acks.write().await;
			acks.mark_read(&principal.user_id, ids)
		};

		debug!(conn_id, user_id = %principal.user_id, added, "read acknowledgments applied");

		self.recompute_and_push().await;
	}

	/// Recompute unread counts from the full history and push each online
	/// principal's per-sender map to their personal channel.
	///
	/// Not synchronized with concurrent sends or acks: a racing trigger may
	/// read slightly stale history, and the next trigger corrects it.
	pub async fn recompute_and_push(&self) {
		let online = {
			let registry = self.registry.read().await;
			registry.online_ids()
		};
		if online.is_empty() {
			return;
		}

		let messages = match self.messages.find_all_sorted().await {
			Ok(messages) => messages,
			Err(e) => {
				error!(error = %e, "failed to load message history for unread recompute");
				return;
			}
		};

		let counts = {
			let acks = self.read_acks.read().await;
			compute_unread_counts(&messages, &online, &acks)
		};

		metrics::counter!("huddle_server_unread_recomputes_total").increment(1);

		for (viewer, per_sender) in counts {
			let payload = per_sender
				.into_iter()
				.map(|(sender, count)| (sender.into_string(), count))
				.collect();

			self.hub
				.publish(&ChannelName::User(viewer), ServerEvent::UnreadCounts(payload), None)
				.await;
		}
	}

	/// Snapshot of channel membership counts.
	#[allow(dead_code)]
	pub async fn hub_snapshot(&self) -> std::collections::HashMap<ChannelName, usize> {
		self.hub.channel_member_counts().await
	}

	async fn send_error(&self, conn_id: u64, message: &str) {
		warn!(conn_id, message, "unicast error event");
		self.send_to_conn(
			conn_id,
			ServerEvent::Error {
				message: message.to_string(),
			},
		)
		.await;
	}
}

fn online_user(principal: ConnectedPrincipal) -> OnlineUser {
	OnlineUser {
		user_id: principal.user_id.into_string(),
		username: principal.username,
	}
}
