#![forbid(unsafe_code)]

use std::collections::HashMap;

use anyhow::{Context, anyhow};
use async_trait::async_trait;
use huddle_domain::{FileDescriptor, MessageId, PrincipalId};
use sqlx::Row as _;
use tokio::sync::Mutex;

use crate::util::time::unix_ms_now;

/// A persisted chat message.
#[derive(Debug, Clone, PartialEq)]
pub struct MessageRecord {
	pub id: MessageId,
	pub sender_id: PrincipalId,
	pub text: String,
	pub file: Option<FileDescriptor>,
	pub created_at_unix_ms: i64,
}

/// A chat message not yet persisted; the store assigns id and timestamp.
#[derive(Debug, Clone)]
pub struct NewMessage {
	pub sender_id: PrincipalId,
	pub text: String,
	pub file: Option<FileDescriptor>,
}

/// Display data for a principal, owned by the application layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrincipalRecord {
	pub id: PrincipalId,
	pub name: String,
	pub avatar: Option<String>,
}

/// Persistence interface for chat messages.
#[async_trait]
pub trait MessageStore: Send + Sync {
	async fn create(&self, message: NewMessage) -> anyhow::Result<MessageRecord>;

	async fn find_by_id(&self, id: &MessageId) -> anyhow::Result<Option<MessageRecord>>;

	/// Full history in ascending creation order.
	async fn find_all_sorted(&self) -> anyhow::Result<Vec<MessageRecord>>;
}

/// Read-only lookup of principal display data.
#[async_trait]
pub trait PrincipalStore: Send + Sync {
	async fn find_by_id(&self, id: &PrincipalId) -> anyhow::Result<Option<PrincipalRecord>>;
}

/// In-memory message store used in tests and when persistence is disabled.
#[derive(Default)]
pub struct InMemoryMessageStore {
	inner: Mutex<Vec<MessageRecord>>,
}

#[async_trait]
impl MessageStore for InMemoryMessageStore {
	async fn create(&self, message: NewMessage) -> anyhow::Result<MessageRecord> {
		let record = MessageRecord {
			id: MessageId::generate(),
			sender_id: message.sender_id,
			text: message.text,
			file: message.file,
			created_at_unix_ms: unix_ms_now(),
		};

		let mut guard = self.inner.lock().await;
		guard.push(record.clone());
		Ok(record)
	}

	async fn find_by_id(&self, id: &MessageId) -> anyhow::Result<Option<MessageRecord>> {
		let guard = self.inner.lock().await;
		Ok(guard.iter().find(|m| m.id == *id).cloned())
	}

	async fn find_all_sorted(&self) -> anyhow::Result<Vec<MessageRecord>> {
		let guard = self.inner.lock().await;
		let mut out = guard.clone();
		out.sort_by(|a, b| {
			a.created_at_unix_ms
				.cmp(&b.created_at_unix_ms)
				.then_with(|| a.id.as_str().cmp(b.id.as_str()))
		});
		Ok(out)
	}
}

/// In-memory principal directory used in tests and when persistence is
/// disabled.
#[derive(Default)]
pub struct InMemoryPrincipalStore {
	inner: Mutex<HashMap<PrincipalId, PrincipalRecord>>,
}

impl InMemoryPrincipalStore {
	#[allow(dead_code)]
	pub async fn insert(&self, record: PrincipalRecord) {
		let mut guard = self.inner.lock().await;
		guard.insert(record.id.clone(), record);
	}
}

#[async_trait]
impl PrincipalStore for InMemoryPrincipalStore {
	async fn find_by_id(&self, id: &PrincipalId) -> anyhow::Result<Option<PrincipalRecord>> {
		let guard = self.inner.lock().await;
		Ok(guard.get(id).cloned())
	}
}

/// SQL connection pool selected by database URL scheme.
#[derive(Clone)]
pub enum SqlBackend {
	Sqlite(sqlx::SqlitePool),
	Postgres(sqlx::PgPool),
	Mysql(sqlx::MySqlPool),
}

impl SqlBackend {
	pub async fn connect(database_url: &str) -> anyhow::Result<Self> {
		if database_url.starts_with("sqlite:") {
			let pool = sqlx::SqlitePool::connect(database_url).await.context("connect sqlite")?;
			Ok(Self::Sqlite(pool))
		} else if database_url.starts_with("postgres:") || database_url.starts_with("postgresql:") {
			let pool = sqlx::PgPool::connect(database_url).await.context("connect postgres")?;
			Ok(Self::Postgres(pool))
		} else if database_url.starts_with("mysql:") || database_url.starts_with("mariadb:") {
			let pool = sqlx::MySqlPool::connect(database_url).await.context("connect mysql")?;
			Ok(Self::Mysql(pool))
		} else {
			Err(anyhow!("unsupported database_url for stores"))
		}
	}
}

/// SQL-backed message store.
pub struct SqlMessageStore {
	backend: SqlBackend,
}

impl SqlMessageStore {
	/// Build the store and ensure its schema exists.
	pub async fn initialize(backend: SqlBackend) -> anyhow::Result<Self> {
		let ddl = match &backend {
			SqlBackend::Sqlite(_) => {
				"CREATE TABLE IF NOT EXISTS messages (\
				id TEXT PRIMARY KEY, \
				sender_id TEXT NOT NULL, \
				body TEXT NOT NULL, \
				file_name TEXT, \
				file_url TEXT, \
				created_at_unix_ms INTEGER NOT NULL)"
			}
			SqlBackend::Postgres(_) => {
				"CREATE TABLE IF NOT EXISTS messages (\
				id TEXT PRIMARY KEY, \
				sender_id TEXT NOT NULL, \
				body TEXT NOT NULL, \
				file_name TEXT, \
				file_url TEXT, \
				created_at_unix_ms BIGINT NOT NULL)"
			}
			SqlBackend::Mysql(_) => {
				"CREATE TABLE IF NOT EXISTS messages (\
				id VARCHAR(64) PRIMARY KEY, \
				sender_id VARCHAR(64) NOT NULL, \
				body TEXT NOT NULL, \
				file_name TEXT, \
				file_url TEXT, \
				created_at_unix_ms BIGINT NOT NULL)"
			}
		};

		match &backend {
			SqlBackend::Sqlite(pool) => {
				sqlx::query(ddl).execute(pool).await.context("create messages table (sqlite)")?;
			}
			SqlBackend::Postgres(pool) => {
				sqlx::query(ddl)
					.execute(pool)
					.await
					.context("create messages table (postgres)")?;
			}
			SqlBackend::Mysql(pool) => {
				sqlx::query(ddl).execute(pool).await.context("create messages table (mysql)")?;
			}
		}

		Ok(Self { backend })
	}
}

fn message_from_columns(
	id: String,
	sender_id: String,
	body: String,
	file_name: Option<String>,
	file_url: Option<String>,
	created_at_unix_ms: i64,
) -> anyhow::Result<MessageRecord> {
	let file = file_url.map(|url| FileDescriptor {
		name: file_name.unwrap_or_default(),
		url,
	});

	Ok(MessageRecord {
		id: MessageId::new(id).context("parse stored message id")?,
		sender_id: PrincipalId::new(sender_id).context("parse stored sender id")?,
		text: body,
		file,
		created_at_unix_ms,
	})
}

const SELECT_MESSAGE_COLUMNS: &str = "SELECT id, sender_id, body, file_name, file_url, created_at_unix_ms FROM messages";

#[async_trait]
impl MessageStore for SqlMessageStore {
	async fn create(&self, message: NewMessage) -> anyhow::Result<MessageRecord> {
		let record = MessageRecord {
			id: MessageId::generate(),
			sender_id: message.sender_id,
			text: message.text,
			file: message.file,
			created_at_unix_ms: unix_ms_now(),
		};

		let (file_name, file_url) = match &record.file {
			Some(f) => (Some(f.name.clone()), Some(f.url.clone())),
			None => (None, None),
		};

		match &self.backend {
			SqlBackend::Sqlite(pool) => {
				sqlx::query(
					"INSERT INTO messages (id, sender_id, body, file_name, file_url, created_at_unix_ms) \
					VALUES (?, ?, ?, ?, ?, ?)",
				)
				.bind(record.id.as_str())
				.bind(record.sender_id.as_str())
				.bind(&record.text)
				.bind(&file_name)
				.bind(&file_url)
				.bind(record.created_at_unix_ms)
				.execute(pool)
				.await
				.context("insert message (sqlite)")?;
			}
			SqlBackend::Postgres(pool) => {
				sqlx::query(
					"INSERT INTO messages (id, sender_id, body, file_name, file_url, created_at_unix_ms) \
					VALUES ($1, $2, $3, $4, $5, $6)",
				)
				.bind(record.id.as_str())
				.bind(record.sender_id.as_str())
				.bind(&record.text)
				.bind(&file_name)
				.bind(&file_url)
				.bind(record.created_at_unix_ms)
				.execute(pool)
				.await
				.context("insert message (postgres)")?;
			}
			SqlBackend::Mysql(pool) => {
				sqlx::query(
					"INSERT INTO messages (id, sender_id, body, file_name, file_url, created_at_unix_ms) \
					VALUES (?, ?, ?, ?, ?, ?)",
				)
				.bind(record.id.as_str())
				.bind(record.sender_id.as_str())
				.bind(&record.text)
				.bind(&file_name)
				.bind(&file_url)
				.bind(record.created_at_unix_ms)
				.execute(pool)
				.await
				.context("insert message (mysql)")?;
			}
		}

		Ok(record)
	}

	async fn find_by_id(&self, id: &MessageId) -> anyhow::Result<Option<MessageRecord>> {
		match &self.backend {
			SqlBackend::Sqlite(pool) => {
				let row = sqlx::query(&format!("{SELECT_MESSAGE_COLUMNS} WHERE id = ?"))
					.bind(id.as_str())
					.fetch_optional(pool)
					.await
					.context("select message (sqlite)")?;

				row.map(|r| {
					message_from_columns(
						r.try_get("id")?,
						r.try_get("sender_id")?,
						r.try_get("body")?,
						r.try_get("file_name")?,
						r.try_get("file_url")?,
						r.try_get("created_at_unix_ms")?,
					)
				})
				.transpose()
			}
			SqlBackend::Postgres(pool) => {
				let row = sqlx::query(&format!("{SELECT_MESSAGE_COLUMNS} WHERE id = $1"))
					.bind(id.as_str())
					.fetch_optional(pool)
					.await
					.context("select message (postgres)")?;

				row.map(|r| {
					message_from_columns(
						r.try_get("id")?,
						r.try_get("sender_id")?,
						r.try_get("body")?,
						r.try_get("file_name")?,
						r.try_get("file_url")?,
						r.try_get("created_at_unix_ms")?,
					)
				})
				.transpose()
			}
			SqlBackend::Mysql(pool) => {
				let row = sqlx::query(&format!("{SELECT_MESSAGE_COLUMNS} WHERE id = ?"))
					.bind(id.as_str())
					.fetch_optional(pool)
					.await
					.context("select message (mysql)")?;

				row.map(|r| {
					message_from_columns(
						r.try_get("id")?,
						r.try_get("sender_id")?,
						r.try_get("body")?,
						r.try_get("file_name")?,
						r.try_get("file_url")?,
						r.try_get("created_at_unix_ms")?,
					)
				})
				.transpose()
			}
		}
	}

	async fn find_all_sorted(&self) -> anyhow::Result<Vec<MessageRecord>> {
		let order = " ORDER BY created_at_unix_ms ASC, id ASC";

		match &self.backend {
			SqlBackend::Sqlite(pool) => {
				let rows = sqlx::query(&format!("{SELECT_MESSAGE_COLUMNS}{order}"))
					.fetch_all(pool)
					.await
					.context("select messages (sqlite)")?;

				rows.into_iter()
					.map(|r| {
						message_from_columns(
							r.try_get("id")?,
							r.try_get("sender_id")?,
							r.try_get("body")?,
							r.try_get("file_name")?,
							r.try_get("file_url")?,
							r.try_get("created_at_unix_ms")?,
						)
					})
					.collect()
			}
			SqlBackend::Postgres(pool) => {
				let rows = sqlx::query(&format!("{SELECT_MESSAGE_COLUMNS}{order}"))
					.fetch_all(pool)
					.await
					.context("select messages (postgres)")?;

				rows.into_iter()
					.map(|r| {
						message_from_columns(
							r.try_get("id")?,
							r.try_get("sender_id")?,
							r.try_get("body")?,
							r.try_get("file_name")?,
							r.try_get("file_url")?,
							r.try_get("created_at_unix_ms")?,
						)
					})
					.collect()
			}
			SqlBackend::Mysql(pool) => {
				let rows = sqlx::query(&format!("{SELECT_MESSAGE_COLUMNS}{order}"))
					.fetch_all(pool)
					.await
					.context("select messages (mysql)")?;

				rows.into_iter()
					.map(|r| {
						message_from_columns(
							r.try_get("id")?,
							r.try_get("sender_id")?,
							r.try_get("body")?,
							r.try_get("file_name")?,
							r.try_get("file_url")?,
							r.try_get("created_at_unix_ms")?,
						)
					})
					.collect()
			}
		}
	}
}

/// SQL-backed principal directory.
///
/// Principal records are written by the application layer; this store only
/// reads them, but still ensures the table exists so the service can start
/// against an empty database.
pub struct SqlPrincipalStore {
	backend: SqlBackend,
}

impl SqlPrincipalStore {
	pub async fn initialize(backend: SqlBackend) -> anyhow::Result<Self> {
		let ddl = match &backend {
			SqlBackend::Sqlite(_) | SqlBackend::Postgres(_) => {
				"CREATE TABLE IF NOT EXISTS principals (\
				id TEXT PRIMARY KEY, \
				name TEXT NOT NULL, \
				avatar TEXT)"
			}
			SqlBackend::Mysql(_) => {
				"CREATE TABLE IF NOT EXISTS principals (\
				id VARCHAR(64) PRIMARY KEY, \
				name TEXT NOT NULL, \
				avatar TEXT)"
			}
		};

		match &backend {
			SqlBackend::Sqlite(pool) => {
				sqlx::query(ddl)
					.execute(pool)
					.await
					.context("create principals table (sqlite)")?;
			}
			SqlBackend::Postgres(pool) => {
				sqlx::query(ddl)
					.execute(pool)
					.await
					.context("create principals table (postgres)")?;
			}
			SqlBackend::Mysql(pool) => {
				sqlx::query(ddl).execute(pool).await.context("create principals table (mysql)")?;
			}
		}

		Ok(Self { backend })
	}
}

fn principal_from_columns(id: String, name: String, avatar: Option<String>) -> anyhow::Result<PrincipalRecord> {
	Ok(PrincipalRecord {
		id: PrincipalId::new(id).context("parse stored principal id")?,
		name,
		avatar,
	})
}

#[async_trait]
impl PrincipalStore for SqlPrincipalStore {
	async fn find_by_id(&self, id: &PrincipalId) -> anyhow::Result<Option<PrincipalRecord>> {
		match &self.backend {
			SqlBackend::Sqlite(pool) => {
				let row = sqlx::query("SELECT id, name, avatar FROM principals WHERE id = ?")
					.bind(id.as_str())
					.fetch_optional(pool)
					.await
					.context("select principal (sqlite)")?;

				row.map(|r| principal_from_columns(r.try_get("id")?, r.try_get("name")?, r.try_get("avatar")?))
					.transpose()
			}
			SqlBackend::Postgres(pool) => {
				let row = sqlx::query("SELECT id, name, avatar FROM principals WHERE id = $1")
					.bind(id.as_str())
					.fetch_optional(pool)
					.await
					.context("select principal (postgres)")?;

				row.map(|r| principal_from_columns(r.try_get("id")?, r.try_get("name")?, r.try_get("avatar")?))
					.transpose()
			}
			SqlBackend::Mysql(pool) => {
				let row = sqlx::query("SELECT id, name, avatar FROM principals WHERE id = ?")
					.bind(id.as_str())
					.fetch_optional(pool)
					.await
					.context("select principal (mysql)")?;

				row.map(|r| principal_from_columns(r.try_get("id")?, r.try_get("name")?, r.try_get("avatar")?))
					.transpose()
			}
		}
	}
}
