#![forbid(unsafe_code)]

use core::fmt;
use core::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors for parsing identifiers from strings.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseIdError {
	#[error("empty value")]
	Empty,
	#[error("invalid format: {0}")]
	InvalidFormat(String),
}

/// Stable identifier of an authenticated principal (end user).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PrincipalId(String);

impl PrincipalId {
	/// Create a non-empty `PrincipalId`.
	pub fn new(id: impl Into<String>) -> Result<Self, ParseIdError> {
		let id = id.into();
		if id.trim().is_empty() {
			return Err(ParseIdError::Empty);
		}
		Ok(Self(id))
	}
	pub fn as_str(&self) -> &str {
		&self.0
	}
	pub fn into_string(self) -> String {
		self.0
	}
}

impl fmt::Display for PrincipalId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.0)
	}
}

impl FromStr for PrincipalId {
	type Err = ParseIdError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		PrincipalId::new(s.to_string())
	}
}

/// Identifier of a board owned by the application layer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BoardId(String);

impl BoardId {
	/// Create a non-empty `BoardId`.
	pub fn new(id: impl Into<String>) -> Result<Self, ParseIdError> {
		let id = id.into();
		if id.trim().is_empty() {
			return Err(ParseIdError::Empty);
		}
		Ok(Self(id))
	}
	pub fn as_str(&self) -> &str {
		&self.0
	}
}

impl fmt::Display for BoardId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.0)
	}
}

/// Identifier of a task owned by the application layer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(String);

impl TaskId {
	/// Create a non-empty `TaskId`.
	pub fn new(id: impl Into<String>) -> Result<Self, ParseIdError> {
		let id = id.into();
		if id.trim().is_empty() {
			return Err(ParseIdError::Empty);
		}
		Ok(Self(id))
	}
	pub fn as_str(&self) -> &str {
		&self.0
	}
}

impl fmt::Display for TaskId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.0)
	}
}

/// Identifier of a persisted chat message.
///
/// Opaque on the wire; the store assigns new ids via [`MessageId::generate`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(String);

impl MessageId {
	/// Create a non-empty `MessageId`.
	pub fn new(id: impl Into<String>) -> Result<Self, ParseIdError> {
		let id = id.into();
		if id.trim().is_empty() {
			return Err(ParseIdError::Empty);
		}
		Ok(Self(id))
	}

	/// Generate a fresh random message id.
	pub fn generate() -> Self {
		Self(uuid::Uuid::new_v4().to_string())
	}

	pub fn as_str(&self) -> &str {
		&self.0
	}
	pub fn into_string(self) -> String {
		self.0
	}
}

impl fmt::Display for MessageId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.0)
	}
}

impl FromStr for MessageId {
	type Err = ParseIdError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		MessageId::new(s.to_string())
	}
}

/// Descriptor of a file attached to a chat message.
///
/// The file itself lives in external storage; only the pointer travels here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileDescriptor {
	pub name: String,
	pub url: String,
}

/// A named broadcast scope.
///
/// Board and task channels are issued by the application layer after its own
/// authorization checks; the personal channel supports direct addressing of
/// one principal across all of their connections.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ChannelName {
	Global,
	Board(BoardId),
	Task(TaskId),
	User(PrincipalId),
}

impl ChannelName {
	/// Sentinel channel key that maps to the global channel.
	pub const GLOBAL: &'static str = "global";

	/// Parse a channel name of the form `global`, `board:<id>`, `task:<id>`
	/// or `user:<id>`.
	pub fn parse(s: &str) -> Result<Self, ParseIdError> {
		let s = s.trim();
		if s.is_empty() {
			return Err(ParseIdError::Empty);
		}

		if s == Self::GLOBAL {
			return Ok(ChannelName::Global);
		}

		let (kind, id) = s
			.split_once(':')
			.ok_or_else(|| ParseIdError::InvalidFormat("expected global or <kind>:<id>".into()))?;

		match kind {
			"board" => Ok(ChannelName::Board(BoardId::new(id.to_string())?)),
			"task" => Ok(ChannelName::Task(TaskId::new(id.to_string())?)),
			"user" => Ok(ChannelName::User(PrincipalId::new(id.to_string())?)),
			other => Err(ParseIdError::InvalidFormat(format!("unknown channel kind: {other}"))),
		}
	}
}

impl fmt::Display for ChannelName {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			ChannelName::Global => f.write_str(Self::GLOBAL),
			ChannelName::Board(id) => write!(f, "board:{id}"),
			ChannelName::Task(id) => write!(f, "task:{id}"),
			ChannelName::User(id) => write!(f, "user:{id}"),
		}
	}
}

impl FromStr for ChannelName {
	type Err = ParseIdError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		ChannelName::parse(s)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn channel_name_parse_roundtrip() {
		let board = ChannelName::parse("board:b42").unwrap();
		assert_eq!(board, ChannelName::Board(BoardId::new("b42").unwrap()));
		assert_eq!(board.to_string(), "board:b42");

		let task = ChannelName::parse("task:t7").unwrap();
		assert_eq!(task.to_string(), "task:t7");

		let user = ChannelName::parse("user:u1").unwrap();
		assert_eq!(user.to_string(), "user:u1");

		assert_eq!(ChannelName::parse("global").unwrap(), ChannelName::Global);
		assert_eq!(ChannelName::Global.to_string(), "global");
	}

	#[test]
	fn channel_name_rejects_garbage() {
		assert!(ChannelName::parse("").is_err());
		assert!(ChannelName::parse("board:").is_err());
		assert!(ChannelName::parse("room:x").is_err());
		assert!(ChannelName::parse("boards").is_err());
	}

	#[test]
	fn rejects_empty_ids() {
		assert!(PrincipalId::new("").is_err());
		assert!(BoardId::new("   ").is_err());
		assert!(TaskId::new("").is_err());
		assert!(MessageId::new("").is_err());
	}

	#[test]
	fn generated_message_ids_are_distinct() {
		let a = MessageId::generate();
		let b = MessageId::generate();
		assert_ne!(a, b);
		assert!(!a.as_str().is_empty());
	}
}
