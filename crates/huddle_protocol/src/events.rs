#![forbid(unsafe_code)]

use std::collections::HashMap;

use huddle_domain::FileDescriptor;
use serde::{Deserialize, Serialize};

/// Events consumed by the server (client → server).
///
/// Each event name is a fixed tagged variant; payload shapes are part of the
/// v1 wire contract.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum ClientEvent {
	/// Transport handshake; must be the first frame on a connection.
	#[serde(rename = "hello")]
	Hello {
		#[serde(default)]
		token: String,
	},

	/// Attach a principal identity to this connection.
	#[serde(rename = "authenticate")]
	#[serde(rename_all = "camelCase")]
	Authenticate {
		user_id: String,
		#[serde(default)]
		username: String,
	},

	#[serde(rename = "board:join")]
	#[serde(rename_all = "camelCase")]
	BoardJoin {
		board_id: String,
	},

	#[serde(rename = "board:leave")]
	#[serde(rename_all = "camelCase")]
	BoardLeave {
		board_id: String,
	},

	#[serde(rename = "task:join")]
	#[serde(rename_all = "camelCase")]
	TaskJoin {
		task_id: String,
	},

	#[serde(rename = "task:leave")]
	#[serde(rename_all = "camelCase")]
	TaskLeave {
		task_id: String,
	},

	/// Typing indicator; `task_id == "global"` targets the global channel.
	#[serde(rename = "comment:typing")]
	#[serde(rename_all = "camelCase")]
	CommentTyping {
		task_id: String,
		is_typing: bool,
	},

	#[serde(rename = "sendMessage")]
	#[serde(rename_all = "camelCase")]
	SendMessage {
		#[serde(default)]
		text: Option<String>,
		#[serde(default)]
		file: Option<FileDescriptor>,
		/// Opaque client token echoed back only to the sender.
		#[serde(default)]
		temp_id: Option<serde_json::Value>,
	},

	#[serde(rename = "message:read")]
	#[serde(rename_all = "camelCase")]
	MessageRead {
		message_ids: Vec<String>,
	},

	#[serde(rename = "unread:request")]
	UnreadRequest {},
}

/// A principal visible in presence payloads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OnlineUser {
	pub user_id: String,
	pub username: String,
}

/// A persisted chat message as broadcast to clients.
///
/// `temp_id` is present only in the unicast echo to the sender so the client
/// can reconcile optimistic UI state; the broadcast copy omits the field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageBroadcast {
	pub id: String,
	pub sender_id: String,
	pub sender_name: String,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub sender_avatar: Option<String>,
	pub text: String,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub file: Option<FileDescriptor>,
	pub created_at_unix_ms: i64,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub temp_id: Option<serde_json::Value>,
}

/// Events produced by the server (server → client).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum ServerEvent {
	/// Handshake reply carrying connection parameters.
	#[serde(rename = "welcome")]
	#[serde(rename_all = "camelCase")]
	Welcome {
		server_name: String,
		server_time_unix_ms: i64,
		max_frame_bytes: u32,
	},

	#[serde(rename = "user:online")]
	UserOnline(OnlineUser),

	#[serde(rename = "user:offline")]
	UserOffline(OnlineUser),

	/// Snapshot of currently online principals, deduplicated by id.
	#[serde(rename = "users:online")]
	UsersOnline(Vec<OnlineUser>),

	#[serde(rename = "comment:typing")]
	#[serde(rename_all = "camelCase")]
	CommentTyping {
		task_id: String,
		user: OnlineUser,
		is_typing: bool,
	},

	#[serde(rename = "newMessage")]
	NewMessage(MessageBroadcast),

	/// Per-sender unread counts for the receiving principal.
	#[serde(rename = "unread:counts")]
	UnreadCounts(HashMap<String, u64>),

	#[serde(rename = "error")]
	Error {
		message: String,
	},
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn client_event_wire_names() {
		let json = serde_json::to_value(&ClientEvent::BoardJoin {
			board_id: "b1".to_string(),
		})
		.unwrap();
		assert_eq!(json["type"], "board:join");
		assert_eq!(json["data"]["boardId"], "b1");

		let parsed: ClientEvent =
			serde_json::from_str(r#"{"type":"message:read","data":{"messageIds":["m1","m2"]}}"#).unwrap();
		assert_eq!(
			parsed,
			ClientEvent::MessageRead {
				message_ids: vec!["m1".to_string(), "m2".to_string()],
			}
		);

		let parsed: ClientEvent = serde_json::from_str(r#"{"type":"unread:request","data":{}}"#).unwrap();
		assert_eq!(parsed, ClientEvent::UnreadRequest {});
	}

	#[test]
	fn send_message_fields_are_optional() {
		let parsed: ClientEvent = serde_json::from_str(r#"{"type":"sendMessage","data":{"text":"hi"}}"#).unwrap();
		assert_eq!(
			parsed,
			ClientEvent::SendMessage {
				text: Some("hi".to_string()),
				file: None,
				temp_id: None,
			}
		);
	}

	#[test]
	fn broadcast_omits_absent_temp_id() {
		let msg = MessageBroadcast {
			id: "m1".to_string(),
			sender_id: "u1".to_string(),
			sender_name: "User One".to_string(),
			sender_avatar: None,
			text: "hi".to_string(),
			file: None,
			created_at_unix_ms: 1,
			temp_id: None,
		};

		let json = serde_json::to_value(&ServerEvent::NewMessage(msg.clone())).unwrap();
		assert_eq!(json["type"], "newMessage");
		assert!(json["data"].get("tempId").is_none());

		let echo = MessageBroadcast {
			temp_id: Some(serde_json::json!(7)),
			..msg
		};
		let json = serde_json::to_value(&ServerEvent::NewMessage(echo)).unwrap();
		assert_eq!(json["data"]["tempId"], 7);
	}

	#[test]
	fn unread_counts_wire_shape() {
		let mut counts = HashMap::new();
		counts.insert("u2".to_string(), 3u64);

		let json = serde_json::to_value(&ServerEvent::UnreadCounts(counts)).unwrap();
		assert_eq!(json["type"], "unread:counts");
		assert_eq!(json["data"]["u2"], 3);
	}
}
